// Error taxonomy for the recording core
//
// Fatal conditions surface through `RecorderError`; recoverable per-buffer
// conditions (conversion failures, non-monotonic timestamps, backpressure
// drops) are handled inside the pipeline with once-per-source warnings and
// never abort a session.

use thiserror::Error;

/// Fatal errors a recording session can terminate with.
#[derive(Debug, Error)]
pub enum RecorderError {
    /// Invalid or unsupported target sample rate / channel count.
    /// Raised at construction time, before any capture starts.
    #[error("invalid audio format: {0}")]
    Format(String),

    /// The sink rejected track negotiation. Aborts the session before any
    /// data is written.
    #[error("writer initialization failed: {0}")]
    WriterInit(#[source] anyhow::Error),

    /// The sink reported an error after accepting data. Writing stops at the
    /// first occurrence; the error is surfaced when the session finalizes.
    #[error("writer append failed: {0}")]
    WriterAppend(#[source] anyhow::Error),

    /// The container could not be finalized.
    #[error("writer finalize failed: {0}")]
    WriterFinalize(#[source] anyhow::Error),

    /// A capture source failed to start delivering buffers.
    #[error("capture source failed: {0}")]
    Capture(String),

    /// The session supervisor itself failed (e.g. the control task panicked).
    #[error("session control failed: {0}")]
    Session(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
