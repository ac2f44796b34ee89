// Writer state machine
//
// Wraps a container sink behind the session's synchronization rules: lazy
// track/session creation on the first accepted primary buffer, strictly
// increasing primary-track timestamps, silent discard of secondary buffers
// that predate the session timeline, and lossy backpressure (a not-ready sink
// drops the buffer, it never blocks a delivery thread). Append errors flip
// the machine to Failed and surface once, at finalize.

use anyhow::anyhow;
use tracing::{info, warn};

use super::sink::{ContainerSink, TrackDescriptor, TrackKind, VideoFrame};
use crate::error::RecorderError;
use crate::pipeline::mixer::MixedChunk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Unknown,
    Writing,
    Failed,
    Finished,
}

/// Per-session counters reported when the writer closes.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriterStats {
    pub chunks_accepted: u64,
    pub chunks_dropped_backpressure: u64,
    pub chunks_dropped_non_monotonic: u64,
    pub chunks_dropped_pre_session: u64,
    pub bytes_written: u64,
}

pub struct WriterSession {
    sink: Box<dyn ContainerSink>,
    state: WriterState,
    audio_desc: TrackDescriptor,
    /// Whether this session carries a video track; when it does, video is the
    /// primary track and mixed audio becomes secondary.
    expect_video: bool,

    audio_track_created: bool,
    video_track_created: bool,
    session_start: Option<f64>,
    last_primary_pts: Option<f64>,

    // Warn-once flags, owned per writer instance.
    warned_non_monotonic: bool,
    warned_backpressure: bool,

    append_error: Option<anyhow::Error>,
    /// True when the failure happened before the session ever opened, i.e.
    /// the sink rejected negotiation rather than an append.
    failed_before_writing: bool,
    stats: WriterStats,
}

impl WriterSession {
    pub fn new(sink: Box<dyn ContainerSink>, audio_desc: TrackDescriptor, expect_video: bool) -> Self {
        Self {
            sink,
            state: WriterState::Unknown,
            audio_desc,
            expect_video,
            audio_track_created: false,
            video_track_created: false,
            session_start: None,
            last_primary_pts: None,
            warned_non_monotonic: false,
            warned_backpressure: false,
            append_error: None,
            failed_before_writing: false,
            stats: WriterStats::default(),
        }
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub fn bytes_written(&self) -> u64 {
        self.sink.bytes_written()
    }

    /// Append one mixed audio chunk.
    pub fn append_chunk(&mut self, chunk: &MixedChunk) {
        if matches!(self.state, WriterState::Failed | WriterState::Finished) {
            return;
        }

        if self.expect_video {
            // Audio is the secondary track: it may not start the session, and
            // chunks that predate the synchronized timeline are discarded.
            match self.session_start {
                Some(start) if chunk.pts >= start => {}
                _ => {
                    self.stats.chunks_dropped_pre_session += 1;
                    return;
                }
            }
            if !self.ensure_audio_track() {
                return;
            }
        } else {
            // Audio-only: the first chunk lazily creates the track and opens
            // the session at its timestamp.
            if self.state == WriterState::Unknown {
                if !self.ensure_audio_track() {
                    return;
                }
                if let Err(e) = self.sink.start_session(chunk.pts) {
                    self.fail(e.context("start_session rejected"));
                    return;
                }
                self.session_start = Some(chunk.pts);
                self.state = WriterState::Writing;
                info!("📼 WRITER: session opened at {:.6}s (audio primary)", chunk.pts);
            }
            // Primary-track monotonicity: strictly greater than the last
            // accepted timestamp, violations dropped with one warning.
            if let Some(last) = self.last_primary_pts {
                if chunk.pts <= last {
                    self.stats.chunks_dropped_non_monotonic += 1;
                    if !self.warned_non_monotonic {
                        self.warned_non_monotonic = true;
                        warn!(
                            "⚠️ WRITER: dropping non-monotonic chunk ({:.6}s after {:.6}s); further drops silent",
                            chunk.pts, last
                        );
                    }
                    return;
                }
            }
        }

        match self.sink.append_audio(chunk.pts, &chunk.samples) {
            Ok(true) => {
                self.stats.chunks_accepted += 1;
                if !self.expect_video {
                    self.last_primary_pts = Some(chunk.pts);
                }
            }
            Ok(false) => {
                // Backpressure: drop, never block or queue for retry.
                self.stats.chunks_dropped_backpressure += 1;
                if !self.warned_backpressure {
                    self.warned_backpressure = true;
                    warn!("⚠️ WRITER: sink not ready, dropping chunks until it recovers");
                }
            }
            Err(e) => self.fail(e.context("audio append failed")),
        }
    }

    /// Append one video frame (primary track when video is expected).
    pub fn append_frame(&mut self, frame: &VideoFrame) {
        if matches!(self.state, WriterState::Failed | WriterState::Finished) || !self.expect_video {
            return;
        }

        if self.state == WriterState::Unknown {
            // Dimensions come from the first accepted frame.
            let desc = TrackDescriptor::Video {
                width: frame.width,
                height: frame.height,
            };
            if let Err(e) = self.sink.add_track(TrackKind::Video, desc) {
                self.fail(e.context("video track negotiation rejected"));
                return;
            }
            self.video_track_created = true;
            if let Err(e) = self.sink.start_session(frame.pts) {
                self.fail(e.context("start_session rejected"));
                return;
            }
            self.session_start = Some(frame.pts);
            self.state = WriterState::Writing;
            info!(
                "📼 WRITER: session opened at {:.6}s ({}x{} video primary)",
                frame.pts, frame.width, frame.height
            );
        }

        if let Some(last) = self.last_primary_pts {
            if frame.pts <= last {
                self.stats.chunks_dropped_non_monotonic += 1;
                if !self.warned_non_monotonic {
                    self.warned_non_monotonic = true;
                    warn!(
                        "⚠️ WRITER: dropping non-monotonic frame ({:.6}s after {:.6}s); further drops silent",
                        frame.pts, last
                    );
                }
                return;
            }
        }

        match self.sink.append_video(frame) {
            Ok(true) => {
                self.stats.chunks_accepted += 1;
                self.last_primary_pts = Some(frame.pts);
            }
            Ok(false) => {
                self.stats.chunks_dropped_backpressure += 1;
                if !self.warned_backpressure {
                    self.warned_backpressure = true;
                    warn!("⚠️ WRITER: sink not ready, dropping frames until it recovers");
                }
            }
            Err(e) => self.fail(e.context("video append failed")),
        }
    }

    fn ensure_audio_track(&mut self) -> bool {
        if self.audio_track_created {
            return true;
        }
        match self.sink.add_track(TrackKind::Audio, self.audio_desc) {
            Ok(()) => {
                self.audio_track_created = true;
                true
            }
            Err(e) => {
                self.fail(e.context("audio track negotiation rejected"));
                false
            }
        }
    }

    fn fail(&mut self, error: anyhow::Error) {
        if self.state != WriterState::Failed {
            warn!("❌ WRITER: entering failed state: {error:#}");
            self.failed_before_writing = self.state == WriterState::Unknown;
            self.state = WriterState::Failed;
            self.append_error = Some(error);
        }
    }

    /// Close the writer. Capture must already be stopped and delivery threads
    /// joined; this is the one blocking I/O point of the session.
    pub fn finish(mut self) -> Result<WriterStats, RecorderError> {
        let had_failed = self.state == WriterState::Failed;

        if self.audio_track_created {
            self.sink.mark_finished(TrackKind::Audio);
        }
        if self.video_track_created {
            self.sink.mark_finished(TrackKind::Video);
        }
        let finalize_result = self.sink.finalize();

        self.stats.bytes_written = self.sink.bytes_written();
        self.state = if had_failed {
            WriterState::Failed
        } else {
            WriterState::Finished
        };

        if let Some(e) = self.append_error.take() {
            return Err(if self.failed_before_writing {
                RecorderError::WriterInit(e)
            } else {
                RecorderError::WriterAppend(e)
            });
        }
        finalize_result
            .map_err(|e| RecorderError::WriterFinalize(anyhow!(e)))?;

        info!(
            "📼 WRITER: closed ({} accepted, {} backpressure drops, {} non-monotonic drops, {} bytes)",
            self.stats.chunks_accepted,
            self.stats.chunks_dropped_backpressure,
            self.stats.chunks_dropped_non_monotonic,
            self.stats.bytes_written
        );
        Ok(self.stats)
    }

    #[cfg(test)]
    pub fn stats(&self) -> WriterStats {
        self.stats
    }
}
