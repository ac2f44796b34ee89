// tapedeck - live audio session recorder
//
// Captures one or two live sources (system loopback and microphone),
// normalizes every buffer to a single target format, mixes onto one monotonic
// output timeline, and streams the result into a lazily-initialized container
// writer. A cooperative control loop supervises the session and ends it for
// exactly one reason: a key press, the duration deadline, sustained silence,
// the file size limit, or an interrupt. Split intervals rotate the output
// file without ending the session.

pub mod capture;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod writer;

pub use capture::{CaptureSource, DeviceCaptureSource, SampleBuffer, SourceKind};
pub use config::{MixMode, RecorderConfig, SilenceConfig};
pub use error::RecorderError;
pub use pipeline::AudioPipeline;
pub use session::keys::{KeyBindings, KeySource, NullKeySource};
pub use session::{Recorder, RecordingOutcome, SegmentInfo, StopReason};
pub use writer::{WavFileSink, WriterSession, WriterState, WriterStats};

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// `info` level. Safe to call once per process; later calls are ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
