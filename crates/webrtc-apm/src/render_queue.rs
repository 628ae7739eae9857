//! Render-to-capture handoff built on [`SwapQueue`].
//!
//! The render side packs one item per 10 ms frame and the capture side drains
//! everything queued at the start of its own frame. Items are vectors whose
//! reserved capacity covers the largest frame the current format can produce.

use std::sync::Arc;

use derive_more::Debug;

use crate::swap_queue::SwapQueue;

/// Number of 10 ms frames the render side may run ahead of capture.
pub(crate) const MAX_QUEUED_RENDER_FRAMES: usize = 100;

pub(crate) type ItemCheck<T> = Box<dyn Fn(&Vec<T>) -> bool + Send + Sync>;

fn reserved_at_least<T: 'static>(element_size: usize) -> ItemCheck<T> {
    Box::new(move |item: &Vec<T>| item.capacity() >= element_size)
}

/// Producer half, owned by the render side.
#[derive(Debug)]
pub(crate) struct RenderQueueWriter<T> {
    #[debug(skip)]
    queue: Arc<SwapQueue<Vec<T>, ItemCheck<T>>>,
    #[debug(skip)]
    item: Vec<T>,
    pending: bool,
}

/// Consumer half, owned by the capture side.
#[derive(Debug)]
pub(crate) struct RenderQueueReader<T> {
    #[debug(skip)]
    queue: Arc<SwapQueue<Vec<T>, ItemCheck<T>>>,
    #[debug(skip)]
    item: Vec<T>,
}

/// Creates a connected writer and reader whose items hold up to
/// `element_size` samples.
pub(crate) fn render_queue<T: Copy + 'static>(
    element_size: usize,
) -> (RenderQueueWriter<T>, RenderQueueReader<T>) {
    let element_size = element_size.max(1);
    let queue = Arc::new(SwapQueue::with_verifier(
        MAX_QUEUED_RENDER_FRAMES,
        || Vec::with_capacity(element_size),
        reserved_at_least::<T>(element_size),
    ));
    (
        RenderQueueWriter {
            queue: Arc::clone(&queue),
            item: Vec::with_capacity(element_size),
            pending: false,
        },
        RenderQueueReader {
            queue,
            item: Vec::with_capacity(element_size),
        },
    )
}

impl<T: Copy> RenderQueueWriter<T> {
    /// Packs one frame with `fill` and tries to hand it over. Returns `false`
    /// if the queue is full; the packed frame is then kept for
    /// [`retry`](Self::retry).
    pub(crate) fn write(&mut self, fill: impl FnOnce(&mut Vec<T>)) -> bool {
        self.item.clear();
        fill(&mut self.item);
        self.pending = true;
        self.retry()
    }

    /// Re-attempts the handoff of a frame rejected by [`write`](Self::write).
    pub(crate) fn retry(&mut self) -> bool {
        if !self.pending {
            return true;
        }
        if self.queue.insert(&mut self.item) {
            self.pending = false;
            true
        } else {
            false
        }
    }
}

impl<T> RenderQueueReader<T> {
    /// Hands every queued frame, oldest first, to `consume`.
    pub(crate) fn drain(&mut self, mut consume: impl FnMut(&[T])) {
        while self.queue.remove(&mut self.item) {
            consume(&self.item);
        }
    }

    pub(crate) fn clear(&self) {
        self.queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_arrive_in_order() {
        let (mut writer, mut reader) = render_queue::<i16>(4);
        assert!(writer.write(|item| item.extend_from_slice(&[1, 2])));
        assert!(writer.write(|item| item.extend_from_slice(&[3, 4, 5])));
        let mut seen = Vec::new();
        reader.drain(|frame| seen.push(frame.to_vec()));
        assert_eq!(seen, vec![vec![1, 2], vec![3, 4, 5]]);
    }

    #[test]
    fn full_queue_keeps_frame_for_retry() {
        let (mut writer, mut reader) = render_queue::<f32>(1);
        for k in 0..MAX_QUEUED_RENDER_FRAMES {
            assert!(writer.write(|item| item.push(k as f32)));
        }
        assert!(!writer.write(|item| item.push(-1.0)));
        let mut count = 0;
        reader.drain(|_| count += 1);
        assert_eq!(count, MAX_QUEUED_RENDER_FRAMES);
        assert!(writer.retry());
        let mut last = Vec::new();
        reader.drain(|frame| last = frame.to_vec());
        assert_eq!(last, vec![-1.0]);
    }

    #[test]
    fn clear_discards_pending_frames() {
        let (mut writer, mut reader) = render_queue::<i16>(2);
        assert!(writer.write(|item| item.push(1)));
        reader.clear();
        let mut count = 0;
        reader.drain(|_| count += 1);
        assert_eq!(count, 0);
    }
}
