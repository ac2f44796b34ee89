// Audio pipeline
//
// Owns everything between capture delivery and the writer: the pause clock,
// per-source normalizers, the mix engine, and the active writer session, all
// behind one mutex with short critical sections. Delivery threads call
// `ingest` concurrently; the control loop flips pause state; the orchestrator
// rotates writers on split and closes the last one at stop.

pub mod frame_queue;
pub mod mixer;
pub mod normalizer;
pub mod pause;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{info, warn};

use crate::capture::{SampleBuffer, SourceKind};
use crate::config::RecorderConfig;
use crate::error::RecorderError;
use crate::session::silence::LevelMeter;
use crate::writer::{VideoFrame, WriterSession, WriterStats};
use mixer::MixEngine;
use normalizer::FormatNormalizer;
use pause::PauseClock;

struct PipelineInner {
    pause: PauseClock,
    normalizers: HashMap<SourceKind, FormatNormalizer>,
    engine: MixEngine,
    writer: Option<WriterSession>,

    /// Sources already warned about conversion failures. Instance state, so
    /// concurrent sessions never share dedupe flags.
    warned_conversion: HashSet<SourceKind>,
    delivered_samples: HashMap<SourceKind, u64>,
    discarded_while_paused: u64,
}

pub struct AudioPipeline {
    inner: Mutex<PipelineInner>,
    meter: Arc<LevelMeter>,
}

impl AudioPipeline {
    pub fn new(config: &RecorderConfig, writer: WriterSession) -> Self {
        let mut normalizers = HashMap::new();
        let mut delivered = HashMap::new();
        for &kind in config.mix_mode.active_sources() {
            normalizers.insert(kind, FormatNormalizer::new(config.sample_rate, config.channels));
            delivered.insert(kind, 0u64);
        }

        Self {
            inner: Mutex::new(PipelineInner {
                pause: PauseClock::new(),
                normalizers,
                engine: MixEngine::new(
                    config.mix_mode,
                    config.sample_rate,
                    config.channels,
                    config.system_gain,
                ),
                writer: Some(writer),
                warned_conversion: HashSet::new(),
                delivered_samples: delivered,
                discarded_while_paused: 0,
            }),
            meter: Arc::new(LevelMeter::new()),
        }
    }

    /// Ingest one raw buffer from a capture delivery thread.
    pub fn ingest(&self, buffer: SampleBuffer) {
        let mut inner = self.inner.lock().expect("pipeline mutex poisoned");
        let inner = &mut *inner;

        // One snapshot per buffer: the flag and offset are read together so a
        // concurrent resume cannot tear them apart.
        let snap = inner.pause.snapshot();
        if snap.paused {
            inner.discarded_while_paused += 1;
            return;
        }
        let pts = buffer.pts - snap.offset;

        let Some(normalizer) = inner.normalizers.get_mut(&buffer.source) else {
            return; // source not part of this session's mix mode
        };

        let samples = match normalizer.normalize(&buffer) {
            Ok(samples) => samples,
            Err(e) => {
                // Warn once per source kind, drop the buffer, keep running.
                if inner.warned_conversion.insert(buffer.source) {
                    warn!(
                        "⚠️ PIPELINE: dropping undecodable {} buffers: {e:#}",
                        buffer.source.label()
                    );
                }
                return;
            }
        };

        if let Some(count) = inner.delivered_samples.get_mut(&buffer.source) {
            *count += samples.len() as u64;
        }
        if samples.is_empty() {
            return; // resampler still accumulating
        }

        inner.engine.append(buffer.source, &samples, pts);
        Self::drain_into_writer(inner, &self.meter);
        // Follow-up drain: a short source may have been topped up by the pop
        // above without crossing the availability check.
        Self::drain_into_writer(inner, &self.meter);
    }

    /// Ingest one video frame (sessions with a video track).
    pub fn ingest_video(&self, mut frame: VideoFrame) {
        let mut inner = self.inner.lock().expect("pipeline mutex poisoned");
        let snap = inner.pause.snapshot();
        if snap.paused {
            inner.discarded_while_paused += 1;
            return;
        }
        frame.pts -= snap.offset;
        if let Some(writer) = inner.writer.as_mut() {
            writer.append_frame(&frame);
        }
    }

    fn drain_into_writer(inner: &mut PipelineInner, meter: &LevelMeter) {
        let writer = &mut inner.writer;
        inner.engine.drain(|chunk| {
            meter.update_rms(chunk.rms());
            if let Some(writer) = writer.as_mut() {
                writer.append_chunk(&chunk);
            }
        });
    }

    pub fn pause(&self, now: Instant) {
        let mut inner = self.inner.lock().expect("pipeline mutex poisoned");
        if !inner.pause.is_paused() {
            info!("⏸️ PIPELINE: paused");
        }
        inner.pause.pause(now);
    }

    pub fn resume(&self, now: Instant) {
        let mut inner = self.inner.lock().expect("pipeline mutex poisoned");
        if inner.pause.is_paused() {
            inner.pause.resume(now);
            info!(
                "▶️ PIPELINE: resumed (cumulative pause offset {:.3}s)",
                inner.pause.snapshot().offset
            );
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().expect("pipeline mutex poisoned").pause.is_paused()
    }

    /// Latest mixed-chunk level, for the silence meter.
    pub fn level_db(&self) -> f32 {
        self.meter.level_db()
    }

    /// Bytes the active writer has emitted so far.
    pub fn bytes_written(&self) -> u64 {
        self.inner
            .lock()
            .expect("pipeline mutex poisoned")
            .writer
            .as_ref()
            .map_or(0, WriterSession::bytes_written)
    }

    /// Close the current segment's writer and install the next one. Capture
    /// keeps running; the mixer's output clock continues across segments.
    pub fn rotate_writer(&self, next: WriterSession) -> Result<WriterStats, RecorderError> {
        let previous = {
            let mut inner = self.inner.lock().expect("pipeline mutex poisoned");
            inner.writer.replace(next)
        };
        match previous {
            Some(writer) => writer.finish(),
            None => Ok(WriterStats::default()),
        }
    }

    /// Close the final writer. Call only after every capture source has been
    /// stopped and joined, so no buffer can arrive after finalization begins.
    pub fn finish(&self) -> Result<WriterStats, RecorderError> {
        let (writer, discarded) = {
            let mut inner = self.inner.lock().expect("pipeline mutex poisoned");
            (inner.writer.take(), inner.discarded_while_paused)
        };
        if discarded > 0 {
            info!("⏸️ PIPELINE: {discarded} buffers discarded while paused");
        }
        match writer {
            Some(writer) => writer.finish(),
            None => Ok(WriterStats::default()),
        }
    }

    /// Normalized samples each configured source has delivered, for the
    /// end-of-session empty-source warning.
    pub fn delivered_samples(&self) -> HashMap<SourceKind, u64> {
        self.inner
            .lock()
            .expect("pipeline mutex poisoned")
            .delivered_samples
            .clone()
    }
}
