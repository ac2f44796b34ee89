// Mixer / drainer
//
// Combines the per-source frame queues into fixed-size mixed chunks on a
// single monotonic output timeline. The output clock starts at the timestamp
// of the first accepted buffer of the session and advances by exactly the
// frames emitted, so chunk PTS never depends on wall-clock "now".

use tracing::debug;

use super::frame_queue::FrameQueue;
use crate::capture::SourceKind;
use crate::config::MixMode;

/// Maximum frames per emitted chunk.
pub const CHUNK_FRAMES: usize = 1024;

/// One mixed output chunk: interleaved f32, one PTS for the whole chunk.
#[derive(Debug, Clone)]
pub struct MixedChunk {
    pub pts: f64,
    pub samples: Vec<f32>,
    pub channels: u16,
}

impl MixedChunk {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Root-mean-square level of the chunk, for the silence meter.
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.samples.iter().map(|s| s * s).sum();
        (sum / self.samples.len() as f32).sqrt()
    }
}

/// Mix one sample pair: the system (primary) term takes the configured gain,
/// the sum is halved unconditionally, then clamped. With gain > 1 the
/// pre-clamp value can exceed the unit range and clip; that is the intended
/// behavior, not an artifact.
#[inline]
pub fn mix_samples(system: f32, microphone: f32, system_gain: f32) -> f32 {
    ((system_gain * system + microphone) / 2.0).clamp(-1.0, 1.0)
}

pub struct MixEngine {
    mode: MixMode,
    channels: u16,
    sample_rate: u32,
    system_gain: f32,

    system: FrameQueue,
    microphone: FrameQueue,

    /// Running output clock in seconds; `None` until the first buffer of the
    /// session is accepted.
    output_clock: Option<f64>,
    chunks_emitted: u64,
}

impl MixEngine {
    pub fn new(mode: MixMode, sample_rate: u32, channels: u16, system_gain: f32) -> Self {
        Self {
            mode,
            channels,
            sample_rate,
            system_gain,
            system: FrameQueue::new(channels),
            microphone: FrameQueue::new(channels),
            output_clock: None,
            chunks_emitted: 0,
        }
    }

    /// Queue normalized samples from one source. The first accepted buffer
    /// seeds the output clock with its (pause-adjusted) timestamp.
    pub fn append(&mut self, source: SourceKind, samples: &[f32], pts: f64) {
        if !self.mode.uses(source) || samples.is_empty() {
            return;
        }
        if self.output_clock.is_none() {
            debug!("🎛️ MIXER: output clock seeded at {pts:.6}s from {}", source.label());
            self.output_clock = Some(pts);
        }
        match source {
            SourceKind::System => self.system.append(samples),
            SourceKind::Microphone => self.microphone.append(samples),
        }
    }

    /// Drain every full-or-partial chunk currently available, in order.
    /// Called after each append and once more as a follow-up.
    pub fn drain(&mut self, mut emit: impl FnMut(MixedChunk)) {
        let Some(mut clock) = self.output_clock else {
            return;
        };

        let mut available = match self.mode {
            MixMode::SystemOnly => self.system.available_frames(),
            MixMode::MicrophoneOnly => self.microphone.available_frames(),
            // A source with fewer frames is treated as silent for the gap.
            MixMode::Dual => self
                .system
                .available_frames()
                .max(self.microphone.available_frames()),
        };

        while available > 0 {
            let frames = available.min(CHUNK_FRAMES);
            let samples = match self.mode {
                MixMode::SystemOnly => self.system.pop(frames),
                MixMode::MicrophoneOnly => self.microphone.pop(frames),
                MixMode::Dual => {
                    let sys = self.system.pop(frames);
                    let mic = self.microphone.pop(frames);
                    sys.iter()
                        .zip(mic.iter())
                        .map(|(&s, &m)| mix_samples(s, m, self.system_gain))
                        .collect()
                }
            };

            let chunk = MixedChunk {
                pts: clock,
                samples,
                channels: self.channels,
            };
            clock += frames as f64 / self.sample_rate as f64;
            self.chunks_emitted += 1;
            emit(chunk);

            available -= frames;
        }

        self.output_clock = Some(clock);
    }

    pub fn chunks_emitted(&self) -> u64 {
        self.chunks_emitted
    }
}
