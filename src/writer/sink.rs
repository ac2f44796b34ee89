// Container sink contract
//
// The muxer boundary the writer state machine talks to. `append_*` returns a
// readiness flag: `Ok(false)` means the sink cannot take more data right now
// and the caller drops the buffer instead of blocking a delivery thread.

use anyhow::Result;

/// Track identity inside a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

/// Parameters negotiated when a track is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackDescriptor {
    Audio {
        sample_rate: u32,
        channels: u16,
        bit_depth: u16,
    },
    Video {
        width: u32,
        height: u32,
    },
}

/// One captured video frame. Dimensions ride along so the writer can create
/// the video track lazily from the first frame it accepts.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub pts: f64,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// A container/muxer writer consuming finished chunks.
///
/// Call order: `add_track` (per track) → `start_session` → `append_*` →
/// `mark_finished` (per track) → `finalize`. `finalize` is the only call
/// allowed to block on I/O and is invoked exactly once.
pub trait ContainerSink: Send {
    fn add_track(&mut self, kind: TrackKind, desc: TrackDescriptor) -> Result<()>;

    /// Begin the session timeline at `at` seconds.
    fn start_session(&mut self, at: f64) -> Result<()>;

    /// Append interleaved audio samples. Returns `Ok(true)` if accepted,
    /// `Ok(false)` if the sink is not ready (caller drops the chunk).
    fn append_audio(&mut self, pts: f64, samples: &[f32]) -> Result<bool>;

    /// Append one video frame, same readiness contract as `append_audio`.
    fn append_video(&mut self, frame: &VideoFrame) -> Result<bool>;

    fn mark_finished(&mut self, kind: TrackKind);

    /// Flush and close the container. Errors here are the session's terminal
    /// error.
    fn finalize(&mut self) -> Result<()>;

    /// Bytes emitted so far, for size-limit polling.
    fn bytes_written(&self) -> u64;
}
