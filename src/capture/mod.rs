// Capture source types and the delivery contract
//
// Sources push tagged raw sample buffers asynchronously, each on its own
// delivery thread. The pipeline consumes them through `BufferCallback`;
// stopping is two-phase (`stop` signals the source, `join` drains in-flight
// callbacks) so nothing is appended after writer finalization begins.

use std::sync::Arc;

pub mod device;

pub use device::DeviceCaptureSource;

/// Which live input a buffer originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SourceKind {
    /// System loopback - the primary source; mix gain applies here.
    System,
    /// Microphone - the secondary source.
    Microphone,
}

impl SourceKind {
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::System => "system",
            SourceKind::Microphone => "microphone",
        }
    }
}

/// Native format of a delivered buffer (the sample type is carried by the
/// `RawSamples` variant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SampleSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Raw interleaved samples in the source's native sample type.
#[derive(Debug, Clone)]
pub enum RawSamples {
    I16(Vec<i16>),
    U16(Vec<u16>),
    F32(Vec<f32>),
}

impl RawSamples {
    pub fn len(&self) -> usize {
        match self {
            RawSamples::I16(v) => v.len(),
            RawSamples::U16(v) => v.len(),
            RawSamples::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discriminant used to detect format changes between buffers.
    pub fn format_tag(&self) -> &'static str {
        match self {
            RawSamples::I16(_) => "i16",
            RawSamples::U16(_) => "u16",
            RawSamples::F32(_) => "f32",
        }
    }
}

/// One buffer as delivered by a capture source. Created by the source,
/// consumed and discarded by the normalizer.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    pub source: SourceKind,
    /// Presentation timestamp in seconds on the source's capture timeline.
    pub pts: f64,
    pub spec: SampleSpec,
    pub data: RawSamples,
}

impl SampleBuffer {
    pub fn frames(&self) -> usize {
        if self.spec.channels == 0 {
            return 0;
        }
        self.data.len() / self.spec.channels as usize
    }
}

/// Callback a source invokes for every delivered buffer. Must be cheap and
/// non-blocking from the source's point of view.
pub type BufferCallback = Arc<dyn Fn(SampleBuffer) + Send + Sync>;

/// A live capture source delivering `SampleBuffer`s on its own thread.
///
/// Lifecycle: `start` begins delivery; `stop` signals the source to cease
/// producing; `join` blocks until every in-flight callback has returned.
/// Callers must call `stop` on all sources before `join`ing any of them.
pub trait CaptureSource: Send {
    fn kind(&self) -> SourceKind;

    /// Begin asynchronous delivery into `deliver`.
    fn start(&mut self, deliver: BufferCallback) -> Result<(), crate::error::RecorderError>;

    /// Signal the source to stop delivering. Non-blocking.
    fn stop(&mut self);

    /// Drain in-flight callbacks; returns once the delivery thread has exited.
    fn join(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_accounts_for_channel_count() {
        let buf = SampleBuffer {
            source: SourceKind::System,
            pts: 0.0,
            spec: SampleSpec {
                sample_rate: 48_000,
                channels: 2,
            },
            data: RawSamples::F32(vec![0.0; 512]),
        };
        assert_eq!(buf.frames(), 256);
    }

    #[test]
    fn format_tag_distinguishes_sample_types() {
        assert_ne!(
            RawSamples::I16(vec![]).format_tag(),
            RawSamples::F32(vec![]).format_tag()
        );
    }
}
