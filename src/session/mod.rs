// Recording session orchestration
//
// `Recorder::record` wires one session end to end: validate the config, build
// the first segment's writer and the pipeline, start every capture source,
// then hand supervision to the control loop on a blocking task. A `Split`
// rotates the writer and re-enters the loop; any other reason triggers the
// two-phase shutdown (signal all sources, join all delivery threads, only
// then finalize the writer) so nothing is appended to a closing container.

pub mod control;
pub mod keys;
pub mod silence;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::capture::CaptureSource;
use crate::config::RecorderConfig;
use crate::error::RecorderError;
use crate::pipeline::AudioPipeline;
use crate::writer::sink::TrackDescriptor;
use crate::writer::{WavFileSink, WriterSession};
pub use control::{ControlLoop, SegmentInfo, StopReason};
use keys::KeySource;

/// Everything the caller learns about a completed session.
#[derive(Debug, Clone)]
pub struct RecordingOutcome {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    /// The condition that ended the session (never `Split`).
    pub reason: StopReason,
    /// Unpaused time recorded across all segments.
    pub recorded: Duration,
    pub segments: Vec<SegmentInfo>,
}

pub struct Recorder {
    config: RecorderConfig,
    interrupt: Arc<AtomicBool>,
}

impl Recorder {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag a signal handler can raise to end the session as if the stop key
    /// had been pressed.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    fn writer_for_segment(&self, index: usize) -> WriterSession {
        let sink = WavFileSink::new(self.config.segment_path(index));
        WriterSession::new(
            Box::new(sink),
            TrackDescriptor::Audio {
                sample_rate: self.config.sample_rate,
                channels: self.config.channels,
                bit_depth: self.config.bit_depth,
            },
            false,
        )
    }

    /// Run one recording session to completion.
    pub async fn record(
        &self,
        mut sources: Vec<Box<dyn CaptureSource>>,
        key_source: Box<dyn KeySource>,
    ) -> Result<RecordingOutcome, RecorderError> {
        self.config.validate()?;
        std::fs::create_dir_all(&self.config.output_directory)?;
        let started_at = Utc::now();

        info!(
            "🎬 SESSION: starting {} ({:?}, {} Hz, {} ch, {} bit)",
            self.config.id,
            self.config.mix_mode,
            self.config.sample_rate,
            self.config.channels,
            self.config.bit_depth
        );

        let pipeline = Arc::new(AudioPipeline::new(&self.config, self.writer_for_segment(0)));

        let deliver = {
            let pipeline = Arc::clone(&pipeline);
            Arc::new(move |buffer| pipeline.ingest(buffer)) as crate::capture::BufferCallback
        };
        for (i, source) in sources.iter_mut().enumerate() {
            if let Err(e) = source.start(Arc::clone(&deliver)) {
                error!("❌ SESSION: {} source failed to start: {e}", source.kind().label());
                // Unwind the sources that did start before surfacing.
                for started in sources.iter_mut().take(i) {
                    started.stop();
                }
                for started in sources.iter_mut().take(i) {
                    started.join();
                }
                if let Err(finish_err) = pipeline.finish() {
                    warn!("⚠️ SESSION: writer cleanup after failed start: {finish_err}");
                }
                return Err(e);
            }
        }

        let mut ctl = Some(ControlLoop::new(
            &self.config,
            Arc::clone(&pipeline),
            Arc::clone(&self.interrupt),
            key_source,
        ));
        let mut segments = Vec::new();
        let mut index = 0usize;
        let mut fatal: Option<RecorderError> = None;

        let (reason, final_path) = loop {
            let path = self.config.segment_path(index);
            let Some(loop_owned) = ctl.take() else {
                break (StopReason::Key, path);
            };
            let run_path = path.clone();
            let joined = tokio::task::spawn_blocking(move || {
                let mut loop_owned = loop_owned;
                let reason = loop_owned.run(&run_path);
                (loop_owned, reason)
            })
            .await;

            let (returned, reason) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    fatal = Some(RecorderError::Session(format!("control task failed: {e}")));
                    break (StopReason::Key, path);
                }
            };
            ctl = Some(returned);

            if reason.ends_session() {
                break (reason, path);
            }

            // Split: install the next segment's writer while capture keeps
            // running, then record the closed segment.
            index += 1;
            match pipeline.rotate_writer(self.writer_for_segment(index)) {
                Ok(stats) => {
                    info!(
                        "✂️ SESSION: segment {} closed ({} chunks, {} bytes)",
                        path.display(),
                        stats.chunks_accepted,
                        stats.bytes_written
                    );
                    segments.push(SegmentInfo {
                        path,
                        bytes: stats.bytes_written,
                        chunks: stats.chunks_accepted,
                        stop_reason: StopReason::Split,
                    });
                }
                Err(e) => {
                    fatal = Some(e);
                    break (StopReason::Key, self.config.segment_path(index));
                }
            }
        };

        // Two-phase stop: signal everything first, then join, so sources shut
        // down in parallel and no callback can race the writer close below.
        info!("🛑 SESSION: stopping capture ({reason:?})");
        for source in sources.iter_mut() {
            source.stop();
        }
        for source in sources.iter_mut() {
            source.join();
        }

        for (kind, samples) in pipeline.delivered_samples() {
            if samples == 0 {
                warn!(
                    "⚠️ SESSION: {} source was configured but delivered no samples",
                    kind.label()
                );
            }
        }

        let finish = pipeline.finish();
        if let Some(fatal) = fatal {
            if let Err(e) = &finish {
                warn!("⚠️ SESSION: writer close also failed: {e}");
            }
            return Err(fatal);
        }
        let stats = finish?;
        segments.push(SegmentInfo {
            path: final_path,
            bytes: stats.bytes_written,
            chunks: stats.chunks_accepted,
            stop_reason: reason,
        });

        let recorded = ctl
            .as_ref()
            .map(ControlLoop::recorded_duration)
            .unwrap_or_default();
        info!(
            "✅ SESSION: {} finished after {:.2}s recorded, {} segment(s), reason {:?}",
            self.config.id,
            recorded.as_secs_f64(),
            segments.len(),
            reason
        );

        Ok(RecordingOutcome {
            session_id: self.config.id.clone(),
            started_at,
            reason,
            recorded,
            segments,
        })
    }
}
