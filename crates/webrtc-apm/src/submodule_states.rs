//! Which stages are active, and which optional pipeline steps that implies.

/// Enabled flags of every stage, sampled once per chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct StageFlags {
    pub(crate) beamformer: bool,
    pub(crate) high_pass_filter: bool,
    pub(crate) noise_suppression: bool,
    pub(crate) echo_cancellation: bool,
    pub(crate) echo_control_mobile: bool,
    pub(crate) gain_control: bool,
    pub(crate) voice_detection: bool,
    pub(crate) level_estimator: bool,
    pub(crate) transient_suppression: bool,
    pub(crate) intelligibility: bool,
}

/// Tracks the enabled stages and answers the "does this step run" questions
/// of the capture and render paths.
#[derive(Debug, Clone)]
pub(crate) struct SubmoduleStates {
    flags: StageFlags,
    first_update: bool,
}

impl SubmoduleStates {
    pub(crate) fn new() -> Self {
        Self {
            flags: StageFlags::default(),
            first_update: true,
        }
    }

    /// Stores `flags` and returns `true` if they differ from the previous
    /// ones. The first call always reports a change.
    pub(crate) fn update(&mut self, flags: StageFlags) -> bool {
        let changed = self.first_update || flags != self.flags;
        self.flags = flags;
        self.first_update = false;
        changed
    }

    pub(crate) fn flags(&self) -> StageFlags {
        self.flags
    }

    /// Some stage rewrites capture samples.
    pub(crate) fn fwd_processed(&self) -> bool {
        let f = &self.flags;
        f.beamformer
            || f.high_pass_filter
            || f.noise_suppression
            || f.echo_cancellation
            || f.echo_control_mobile
            || f.gain_control
    }

    /// Capture output differs from the input, either because it was
    /// processed or because the channel count changes.
    pub(crate) fn output_copy_needed(&self, num_input_channels: usize, num_output_channels: usize) -> bool {
        num_input_channels != num_output_channels
            || self.fwd_processed()
            || self.flags.transient_suppression
    }

    pub(crate) fn fwd_synthesis_needed(&self, multi_band: bool) -> bool {
        multi_band && self.fwd_processed()
    }

    /// The level estimator alone runs on the full band, so it never needs
    /// the split.
    pub(crate) fn fwd_analysis_needed(&self, multi_band: bool) -> bool {
        multi_band
            && (self.fwd_processed()
                || self.flags.voice_detection
                || self.flags.transient_suppression)
    }

    /// Render samples are modified in place.
    pub(crate) fn rev_processed(&self) -> bool {
        self.flags.intelligibility
    }

    pub(crate) fn rev_synthesis_needed(&self, multi_band: bool) -> bool {
        multi_band && self.rev_processed()
    }

    pub(crate) fn rev_analysis_needed(&self, multi_band: bool) -> bool {
        let f = &self.flags;
        multi_band
            && (self.rev_processed()
                || f.echo_cancellation
                || f.echo_control_mobile
                || f.gain_control)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn states(flags: StageFlags) -> SubmoduleStates {
        let mut states = SubmoduleStates::new();
        states.update(flags);
        states
    }

    #[test]
    fn first_update_always_returns_changed() {
        let mut states = SubmoduleStates::new();
        assert!(states.update(StageFlags::default()));
    }

    #[test]
    fn repeated_flags_are_not_a_change() {
        let mut states = states(StageFlags::default());
        assert!(!states.update(StageFlags::default()));
    }

    #[test]
    fn enabling_a_stage_is_a_change() {
        let mut states = states(StageFlags::default());
        assert!(states.update(StageFlags {
            noise_suppression: true,
            ..StageFlags::default()
        }));
    }

    #[test]
    fn level_estimator_alone_leaves_audio_untouched() {
        let states = states(StageFlags {
            level_estimator: true,
            ..StageFlags::default()
        });
        assert!(!states.fwd_processed());
        assert!(!states.output_copy_needed(1, 1));
        assert!(!states.fwd_analysis_needed(true));
        assert!(!states.fwd_synthesis_needed(true));
    }

    #[test]
    fn channel_change_forces_output_copy() {
        let states = states(StageFlags::default());
        assert!(states.output_copy_needed(2, 1));
    }

    #[test]
    fn voice_detection_splits_but_does_not_merge() {
        let states = states(StageFlags {
            voice_detection: true,
            ..StageFlags::default()
        });
        assert!(states.fwd_analysis_needed(true));
        assert!(!states.fwd_analysis_needed(false));
        assert!(!states.fwd_synthesis_needed(true));
    }

    #[test]
    fn transient_suppression_copies_output_and_splits() {
        let states = states(StageFlags {
            transient_suppression: true,
            ..StageFlags::default()
        });
        assert!(!states.fwd_processed());
        assert!(states.output_copy_needed(1, 1));
        assert!(states.fwd_analysis_needed(true));
    }

    #[test]
    fn render_analysis_follows_render_consumers() {
        let states = states(StageFlags {
            echo_control_mobile: true,
            ..StageFlags::default()
        });
        assert!(states.rev_analysis_needed(true));
        assert!(!states.rev_processed());
        assert!(!states.rev_synthesis_needed(true));
    }

    #[test]
    fn intelligibility_processes_render() {
        let states = states(StageFlags {
            intelligibility: true,
            ..StageFlags::default()
        });
        assert!(states.rev_processed());
        assert!(states.rev_synthesis_needed(true));
        assert!(!states.rev_synthesis_needed(false));
    }
}
