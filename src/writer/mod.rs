// Writer module - container sinks and the session state machine

pub mod session;
pub mod sink;
pub mod wav;

pub use session::{WriterSession, WriterState, WriterStats};
pub use sink::{ContainerSink, TrackDescriptor, TrackKind, VideoFrame};
pub use wav::WavFileSink;
