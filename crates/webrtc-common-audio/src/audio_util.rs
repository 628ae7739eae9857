//! Sample format conversion and channel layout helpers.
//!
//! | Name     | Type  | Range                   |
//! |----------|-------|-------------------------|
//! | S16      | `i16` | \[-32768, 32767\]       |
//! | Float    | `f32` | \[-1.0, 1.0\]           |
//! | FloatS16 | `f32` | \[-32768.0, 32768.0\]   |
//!
//! The processing pipeline works in FloatS16 so that the float and integer
//! views of a buffer differ only by rounding.

const S16_TO_FLOAT: f32 = 1.0 / 32768.0;

/// S16 to Float.
#[inline]
pub fn s16_to_float(v: i16) -> f32 {
    f32::from(v) * S16_TO_FLOAT
}

/// FloatS16 to S16, saturating and rounding half away from zero.
#[inline]
pub fn float_s16_to_s16(v: f32) -> i16 {
    let v = v.clamp(-32768.0, 32767.0);
    (v + f32::copysign(0.5, v)) as i16
}

/// Float to S16, saturating.
#[inline]
pub fn float_to_s16(v: f32) -> i16 {
    float_s16_to_s16(v * 32768.0)
}

#[inline]
pub fn float_to_float_s16(v: f32) -> f32 {
    v.clamp(-1.0, 1.0) * 32768.0
}

#[inline]
pub fn float_s16_to_float(v: f32) -> f32 {
    v.clamp(-32768.0, 32768.0) * S16_TO_FLOAT
}

/// Linear gain for a level change of `db` decibels.
#[inline]
pub fn db_to_ratio(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Applies `convert` element-wise from `src` into `dest`.
///
/// # Panics
///
/// Panics if the slices differ in length.
pub fn convert_slice<S: Copy, D>(src: &[S], dest: &mut [D], convert: impl Fn(S) -> D) {
    assert_eq!(src.len(), dest.len(), "slice length mismatch");
    for (d, &s) in dest.iter_mut().zip(src) {
        *d = convert(s);
    }
}

/// Splits interleaved frames into one slice per channel.
pub fn deinterleave<T: Copy>(interleaved: &[T], num_channels: usize, dest: &mut [&mut [T]]) {
    assert!(num_channels > 0, "num_channels must be > 0");
    assert!(dest.len() >= num_channels, "too few destination channels");
    let frames = interleaved.len() / num_channels;
    for (ch, out) in dest.iter_mut().take(num_channels).enumerate() {
        assert!(out.len() >= frames, "channel {ch} buffer too short");
        for (slot, frame) in out.iter_mut().zip(interleaved.chunks_exact(num_channels)) {
            *slot = frame[ch];
        }
    }
}

/// Writes per-channel slices into interleaved frames.
pub fn interleave<T: Copy>(channels: &[&[T]], interleaved: &mut [T]) {
    let num_channels = channels.len();
    assert!(num_channels > 0, "num_channels must be > 0");
    for (ch, src) in channels.iter().enumerate() {
        for (frame, &s) in interleaved.chunks_exact_mut(num_channels).zip(src.iter()) {
            frame[ch] = s;
        }
    }
}

/// Copies a mono slice into every channel of an interleaved buffer.
pub fn upmix_mono_to_interleaved<T: Copy>(mono: &[T], num_channels: usize, interleaved: &mut [T]) {
    assert!(num_channels > 0, "num_channels must be > 0");
    for (frame, &s) in interleaved.chunks_exact_mut(num_channels).zip(mono) {
        frame.fill(s);
    }
}

/// Averages interleaved S16 frames into mono with a widened accumulator.
pub fn downmix_interleaved_to_mono_i16(interleaved: &[i16], num_channels: usize, mono: &mut [i16]) {
    assert!(num_channels > 0, "num_channels must be > 0");
    for (slot, frame) in mono.iter_mut().zip(interleaved.chunks_exact(num_channels)) {
        let acc: i32 = frame.iter().map(|&s| i32::from(s)).sum();
        *slot = (acc / num_channels as i32) as i16;
    }
}

/// Averages deinterleaved S16 channels into mono.
pub fn downmix_to_mono_i16(channels: &[&[i16]], mono: &mut [i16]) {
    assert!(!channels.is_empty(), "no channels to downmix");
    let n = channels.len() as i32;
    for (i, slot) in mono.iter_mut().enumerate() {
        let acc: i32 = channels.iter().map(|c| i32::from(c[i])).sum();
        *slot = (acc / n) as i16;
    }
}

/// Averages deinterleaved float channels into mono.
pub fn downmix_to_mono_f32(channels: &[&[f32]], mono: &mut [f32]) {
    assert!(!channels.is_empty(), "no channels to downmix");
    let scale = 1.0 / channels.len() as f32;
    for (i, slot) in mono.iter_mut().enumerate() {
        *slot = channels.iter().map(|c| c[i]).sum::<f32>() * scale;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_s16_rounds_and_saturates() {
        let input = [0.0, 0.4, 0.5, -0.4, -0.5, 32768.0, -32769.0];
        let output: Vec<i16> = input.iter().map(|&v| float_s16_to_s16(v)).collect();
        assert_eq!(output, [0, 0, 1, 0, -1, 32767, -32768]);
    }

    #[test]
    fn float_and_s16_scales_agree() {
        assert_eq!(s16_to_float(-32768), -1.0);
        assert_eq!(float_to_s16(0.5), 16384);
        assert_eq!(float_to_s16(2.0), 32767);
        assert_eq!(float_to_float_s16(-3.0), -32768.0);
        assert_eq!(float_s16_to_float(16384.0), 0.5);
    }

    #[test]
    fn interleave_layout() {
        let interleaved = [1, 10, 2, 20, 3, 30];
        let mut left = [0; 3];
        let mut right = [0; 3];
        deinterleave(&interleaved, 2, &mut [&mut left[..], &mut right[..]]);
        assert_eq!(left, [1, 2, 3]);
        assert_eq!(right, [10, 20, 30]);

        let mut back = [0; 6];
        interleave(&[&left[..], &right[..]], &mut back);
        assert_eq!(back, interleaved);
    }

    #[test]
    fn downmix_averages() {
        let mut mono = [0i16; 2];
        downmix_interleaved_to_mono_i16(&[100, 300, -32768, -32768], 2, &mut mono);
        assert_eq!(mono, [200, -32768]);

        let mut mono_f = [0.0f32; 2];
        downmix_to_mono_f32(&[&[1.0, 2.0], &[3.0, 4.0]], &mut mono_f);
        assert_eq!(mono_f, [2.0, 3.0]);

        let mut mono_i = [0i16; 1];
        downmix_to_mono_i16(&[&[32767], &[32767]], &mut mono_i);
        assert_eq!(mono_i, [32767]);
    }

    #[test]
    fn upmix_repeats_mono() {
        let mut out = [0i16; 6];
        upmix_mono_to_interleaved(&[7, 8], 3, &mut out);
        assert_eq!(out, [7, 7, 7, 8, 8, 8]);
    }
}
