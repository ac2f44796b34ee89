// Per-source frame queue
//
// Normalized interleaved f32 samples with a read cursor. `pop` always returns
// the full request, zero-filling any shortfall so a lagging source reads as
// silence. The consumed prefix is compacted once the cursor passes a fixed
// threshold to bound memory; compaction has no observable effect.

/// Consumed samples kept before the prefix is physically removed.
const COMPACT_THRESHOLD: usize = 16_384;

pub struct FrameQueue {
    samples: Vec<f32>,
    cursor: usize,
    channels: usize,
}

impl FrameQueue {
    pub fn new(channels: u16) -> Self {
        debug_assert!(channels > 0);
        Self {
            samples: Vec::new(),
            cursor: 0,
            channels: channels as usize,
        }
    }

    /// Whole frames currently readable.
    pub fn available_frames(&self) -> usize {
        (self.samples.len() - self.cursor) / self.channels
    }

    pub fn append(&mut self, samples: &[f32]) {
        self.samples.extend_from_slice(samples);
    }

    /// Pop exactly `frames` frames. If fewer are buffered, the tail of the
    /// returned vector is zero-filled rather than under-returning.
    pub fn pop(&mut self, frames: usize) -> Vec<f32> {
        let wanted = frames * self.channels;
        let readable = (self.samples.len() - self.cursor).min(wanted);

        let mut out = Vec::with_capacity(wanted);
        out.extend_from_slice(&self.samples[self.cursor..self.cursor + readable]);
        out.resize(wanted, 0.0);
        self.cursor += readable;

        if self.cursor > COMPACT_THRESHOLD {
            self.samples.drain(..self.cursor);
            self.cursor = 0;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_pop_zero_fills_the_tail() {
        let mut q = FrameQueue::new(2);
        q.append(&[0.1, 0.2, 0.3, 0.4]); // 2 frames
        let out = q.pop(5);
        assert_eq!(out.len(), 10);
        assert_eq!(&out[..4], &[0.1, 0.2, 0.3, 0.4]);
        assert!(out[4..].iter().all(|&s| s == 0.0));
        assert_eq!(q.available_frames(), 0);
    }

    #[test]
    fn available_frames_tracks_cursor() {
        let mut q = FrameQueue::new(2);
        q.append(&vec![0.5; 100]); // 50 frames
        assert_eq!(q.available_frames(), 50);
        let _ = q.pop(20);
        assert_eq!(q.available_frames(), 30);
    }

    #[test]
    fn compaction_is_not_observable() {
        let mut q = FrameQueue::new(1);
        // Push well past the compaction threshold in uneven strides.
        let data: Vec<f32> = (0..40_000).map(|i| i as f32).collect();
        q.append(&data);

        let mut read = Vec::new();
        while q.available_frames() > 0 {
            let n = q.available_frames().min(777);
            read.extend(q.pop(n));
        }
        assert_eq!(read.len(), data.len());
        assert_eq!(read, data);
    }

    #[test]
    fn pop_from_empty_is_all_silence() {
        let mut q = FrameQueue::new(2);
        let out = q.pop(4);
        assert_eq!(out, vec![0.0; 8]);
    }
}
