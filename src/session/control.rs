// Session control loop
//
// Single-threaded cooperative loop that multiplexes every stop condition for
// one output segment: keyboard, total-duration deadline, split interval, file
// size, and sustained silence. Each `run` call blocks until exactly one
// condition fires and returns its reason; the orchestrator decides whether
// that reason ends the session or just rotates the segment.
//
// Checks are ordered by priority within one iteration: an interrupt or stop
// key always wins, then the duration deadline, then the split interval, then
// the size poll, then the silence meter. Recorded time accrues only while the
// pipeline is not paused, and it persists across `run` calls so the deadline
// spans all segments of a session.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{RecorderConfig, SilenceConfig};
use crate::pipeline::AudioPipeline;
use crate::session::keys::{KeyAction, KeyBindings, KeySource};
use crate::session::silence::SilenceTracker;

/// Longest a single iteration may block on the key source; keeps every other
/// condition responsive even when no key arrives.
const MAX_POLL: Duration = Duration::from_millis(250);

/// How often the output file size is stat'ed.
const SIZE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How often the level meter feeds the silence tracker.
const METER_INTERVAL: Duration = Duration::from_millis(200);

/// Why a `run` call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Stop key pressed or external interrupt raised.
    Key,
    /// Total recorded (unpaused) time reached the configured maximum.
    Duration,
    /// Mixed level stayed below the silence threshold long enough.
    Silence,
    /// The segment file reached the configured size limit.
    MaxSize,
    /// The split interval elapsed; the session continues in a new segment.
    Split,
}

impl StopReason {
    /// Split rotates the output file; everything else ends the session.
    pub fn ends_session(&self) -> bool {
        !matches!(self, StopReason::Split)
    }
}

pub struct ControlLoop {
    pipeline: Arc<AudioPipeline>,
    interrupt: Arc<AtomicBool>,
    keys: KeyBindings,
    key_source: Box<dyn KeySource>,

    max_duration: Option<Duration>,
    split_interval: Option<Duration>,
    max_file_size_bytes: Option<u64>,
    silence: Option<SilenceConfig>,

    /// Unpaused time recorded so far, across all segments.
    recorded: Duration,
}

impl ControlLoop {
    pub fn new(
        config: &RecorderConfig,
        pipeline: Arc<AudioPipeline>,
        interrupt: Arc<AtomicBool>,
        key_source: Box<dyn KeySource>,
    ) -> Self {
        Self {
            pipeline,
            interrupt,
            keys: config.keys.clone(),
            key_source,
            max_duration: config.max_duration,
            split_interval: config.split_interval,
            max_file_size_bytes: config.max_file_size_bytes,
            silence: config.silence,
            recorded: Duration::ZERO,
        }
    }

    /// Total unpaused time recorded across every completed `run`.
    pub fn recorded_duration(&self) -> Duration {
        self.recorded
    }

    /// Supervise one segment until a stop condition fires.
    pub fn run(&mut self, segment_path: &Path) -> StopReason {
        let mut split_elapsed = Duration::ZERO;
        let mut tracker = self
            .silence
            .map(|s| SilenceTracker::new(s.threshold_db, s.min_duration));

        let start = Instant::now();
        let mut last_tick = start;
        let mut last_size_poll = start;
        let mut last_meter_poll = start;
        let mut was_paused = self.pipeline.is_paused();

        loop {
            if self.interrupt.load(Ordering::SeqCst) {
                info!("🛑 CONTROL: interrupt raised, stopping");
                return StopReason::Key;
            }

            let before_wait = Instant::now();
            let to_size_poll = self
                .max_file_size_bytes
                .map(|_| SIZE_POLL_INTERVAL.saturating_sub(before_wait.duration_since(last_size_poll)));
            let to_meter_poll = tracker
                .as_ref()
                .map(|_| METER_INTERVAL.saturating_sub(before_wait.duration_since(last_meter_poll)));
            let timeout = self.poll_timeout(split_elapsed, to_size_poll, to_meter_poll);
            let key = self.key_source.read_key(timeout);
            let now = Instant::now();

            // Recorded time only advances while unpaused; the deadline and
            // the split interval both freeze during a pause.
            let tick = now.duration_since(last_tick);
            last_tick = now;
            if !self.pipeline.is_paused() {
                self.recorded += tick;
                split_elapsed += tick;
            }

            if let Some(byte) = key {
                match self.keys.classify(byte) {
                    Some(KeyAction::Stop) => {
                        info!("🛑 CONTROL: stop key pressed");
                        return StopReason::Key;
                    }
                    Some(KeyAction::Pause) => self.pipeline.pause(now),
                    Some(KeyAction::Resume) => self.pipeline.resume(now),
                    Some(KeyAction::TogglePause) => {
                        if self.pipeline.is_paused() {
                            self.pipeline.resume(now);
                        } else {
                            self.pipeline.pause(now);
                        }
                    }
                    None => debug!("CONTROL: unbound key 0x{byte:02x} ignored"),
                }
            }

            // A stale meter reading must not count toward silence, so the run
            // restarts on every pause/resume transition.
            let paused = self.pipeline.is_paused();
            if paused != was_paused {
                if let Some(t) = tracker.as_mut() {
                    t.reset();
                }
                was_paused = paused;
            }

            if let Some(limit) = self.max_duration {
                if self.recorded >= limit {
                    info!("⏱️ CONTROL: max duration {limit:?} reached");
                    return StopReason::Duration;
                }
            }

            if let Some(interval) = self.split_interval {
                if split_elapsed >= interval {
                    info!("✂️ CONTROL: split interval {interval:?} elapsed");
                    return StopReason::Split;
                }
            }

            if let Some(limit) = self.max_file_size_bytes {
                if now.duration_since(last_size_poll) >= SIZE_POLL_INTERVAL {
                    last_size_poll = now;
                    if self.segment_bytes(segment_path) >= limit {
                        info!("📦 CONTROL: segment reached {limit} bytes");
                        return StopReason::MaxSize;
                    }
                }
            }

            if !paused {
                if let Some(t) = tracker.as_mut() {
                    if now.duration_since(last_meter_poll) >= METER_INTERVAL {
                        last_meter_poll = now;
                        if t.observe(self.pipeline.level_db(), now) {
                            info!("🤫 CONTROL: sustained silence, stopping");
                            return StopReason::Silence;
                        }
                    }
                }
            }
        }
    }

    /// Block no longer than the nearest pending event: the hard cap, the
    /// deadline, the split boundary, the next size poll, or the next silence
    /// meter reading.
    fn poll_timeout(
        &self,
        split_elapsed: Duration,
        to_size_poll: Option<Duration>,
        to_meter_poll: Option<Duration>,
    ) -> Duration {
        let mut timeout = MAX_POLL;
        if let Some(limit) = self.max_duration {
            timeout = timeout.min(limit.saturating_sub(self.recorded));
        }
        if let Some(interval) = self.split_interval {
            timeout = timeout.min(interval.saturating_sub(split_elapsed));
        }
        if let Some(remaining) = to_size_poll {
            timeout = timeout.min(remaining);
        }
        if let Some(remaining) = to_meter_poll {
            timeout = timeout.min(remaining);
        }
        timeout.max(Duration::from_millis(1))
    }

    /// On-disk size of the active segment, falling back to the writer's own
    /// count when the file is not visible yet.
    fn segment_bytes(&self, path: &Path) -> u64 {
        match std::fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(_) => self.pipeline.bytes_written(),
        }
    }
}

/// Per-segment record returned to the caller once the session ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub path: PathBuf,
    pub bytes: u64,
    pub chunks: u64,
    /// The condition that closed this segment.
    pub stop_reason: StopReason,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MixMode;
    use crate::session::keys::NullKeySource;
    use crate::writer::sink::{ContainerSink, TrackDescriptor, TrackKind};
    use crate::writer::{VideoFrame, WriterSession};
    use std::collections::VecDeque;

    struct NullSink;

    impl ContainerSink for NullSink {
        fn add_track(&mut self, _: TrackKind, _: TrackDescriptor) -> anyhow::Result<()> {
            Ok(())
        }
        fn start_session(&mut self, _: f64) -> anyhow::Result<()> {
            Ok(())
        }
        fn append_audio(&mut self, _: f64, _: &[f32]) -> anyhow::Result<bool> {
            Ok(true)
        }
        fn append_video(&mut self, _: &VideoFrame) -> anyhow::Result<bool> {
            Ok(true)
        }
        fn mark_finished(&mut self, _: TrackKind) {}
        fn finalize(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
        fn bytes_written(&self) -> u64 {
            0
        }
    }

    /// Key source replaying a fixed byte script, one byte per poll.
    struct ScriptedKeys {
        script: VecDeque<Option<u8>>,
    }

    impl ScriptedKeys {
        fn new(script: Vec<Option<u8>>) -> Self {
            Self {
                script: script.into(),
            }
        }
    }

    impl KeySource for ScriptedKeys {
        fn read_key(&mut self, timeout: Duration) -> Option<u8> {
            std::thread::sleep(timeout.min(Duration::from_millis(5)));
            self.script.pop_front().flatten()
        }
    }

    fn pipeline(config: &RecorderConfig) -> Arc<AudioPipeline> {
        let writer = WriterSession::new(
            Box::new(NullSink),
            TrackDescriptor::Audio {
                sample_rate: config.sample_rate,
                channels: config.channels,
                bit_depth: config.bit_depth,
            },
            false,
        );
        Arc::new(AudioPipeline::new(config, writer))
    }

    fn config() -> RecorderConfig {
        RecorderConfig {
            mix_mode: MixMode::SystemOnly,
            ..Default::default()
        }
    }

    #[test]
    fn deadline_fires_as_duration() {
        let config = RecorderConfig {
            max_duration: Some(Duration::from_millis(40)),
            ..config()
        };
        let pipeline = pipeline(&config);
        let interrupt = Arc::new(AtomicBool::new(false));
        let mut ctl = ControlLoop::new(&config, pipeline, interrupt, Box::new(NullKeySource));

        let start = Instant::now();
        let reason = ctl.run(Path::new("/nonexistent/take.wav"));
        assert_eq!(reason, StopReason::Duration);
        assert!(ctl.recorded_duration() >= Duration::from_millis(40));
        // The loop must notice within one capped wait of the true trigger.
        assert!(start.elapsed() < Duration::from_millis(40) + MAX_POLL + Duration::from_millis(150));
    }

    #[test]
    fn split_fires_then_deadline_spans_segments() {
        let config = RecorderConfig {
            max_duration: Some(Duration::from_millis(100)),
            split_interval: Some(Duration::from_millis(40)),
            ..config()
        };
        let pipeline = pipeline(&config);
        let interrupt = Arc::new(AtomicBool::new(false));
        let mut ctl = ControlLoop::new(&config, pipeline, interrupt, Box::new(NullKeySource));

        let path = Path::new("/nonexistent/take.wav");
        assert_eq!(ctl.run(path), StopReason::Split);
        assert_eq!(ctl.run(path), StopReason::Split);
        // Recorded time carried over; the third segment hits the deadline
        // before its own split interval.
        assert_eq!(ctl.run(path), StopReason::Duration);
        assert!(ctl.recorded_duration() >= Duration::from_millis(100));
    }

    #[test]
    fn stop_key_wins() {
        let config = RecorderConfig {
            max_duration: Some(Duration::from_secs(60)),
            ..config()
        };
        let pipeline = pipeline(&config);
        let interrupt = Arc::new(AtomicBool::new(false));
        let keys = ScriptedKeys::new(vec![None, Some(b'q')]);
        let mut ctl = ControlLoop::new(&config, pipeline, interrupt, Box::new(keys));

        assert_eq!(ctl.run(Path::new("/nonexistent/take.wav")), StopReason::Key);
    }

    #[test]
    fn interrupt_flag_stops_immediately() {
        let config = config();
        let pipeline = pipeline(&config);
        let interrupt = Arc::new(AtomicBool::new(true));
        let mut ctl = ControlLoop::new(
            &config,
            pipeline,
            Arc::clone(&interrupt),
            Box::new(NullKeySource),
        );

        assert_eq!(ctl.run(Path::new("/nonexistent/take.wav")), StopReason::Key);
    }

    #[test]
    fn pause_key_freezes_recorded_time() {
        let config = RecorderConfig {
            max_duration: Some(Duration::from_secs(60)),
            ..config()
        };
        let pipeline = pipeline(&config);
        let interrupt = Arc::new(AtomicBool::new(false));
        // Toggle pause on, idle a few polls, toggle off, then stop.
        let keys = ScriptedKeys::new(vec![
            Some(b'p'),
            None,
            None,
            None,
            Some(b'p'),
            Some(b'q'),
        ]);
        let mut ctl = ControlLoop::new(
            &config,
            Arc::clone(&pipeline),
            interrupt,
            Box::new(keys),
        );

        assert_eq!(ctl.run(Path::new("/nonexistent/take.wav")), StopReason::Key);
        assert!(!pipeline.is_paused());
        // Three paused polls at ~5ms each did not accrue; only the unpaused
        // iterations count, so well under the wall time of the run.
        assert!(ctl.recorded_duration() < Duration::from_millis(25));
    }

    #[test]
    fn sustained_silence_stops() {
        let config = RecorderConfig {
            silence: Some(SilenceConfig {
                threshold_db: -60.0,
                min_duration: Duration::from_millis(250),
            }),
            ..config()
        };
        // The meter never gets a chunk, so it reads the floor throughout.
        let pipeline = pipeline(&config);
        let interrupt = Arc::new(AtomicBool::new(false));
        let mut ctl = ControlLoop::new(&config, pipeline, interrupt, Box::new(NullKeySource));

        let start = Instant::now();
        assert_eq!(
            ctl.run(Path::new("/nonexistent/take.wav")),
            StopReason::Silence
        );
        assert!(start.elapsed() >= Duration::from_millis(250));
        // One meter interval plus one capped wait bounds the overshoot.
        assert!(
            start.elapsed()
                < Duration::from_millis(250) + METER_INTERVAL + MAX_POLL + Duration::from_millis(150)
        );
    }

    #[test]
    fn poll_timeout_takes_the_nearest_pending_event() {
        let config = RecorderConfig {
            max_duration: Some(Duration::from_secs(10)),
            split_interval: Some(Duration::from_secs(5)),
            ..config()
        };
        let pipeline = pipeline(&config);
        let interrupt = Arc::new(AtomicBool::new(false));
        let ctl = ControlLoop::new(&config, pipeline, interrupt, Box::new(NullKeySource));

        // Nothing imminent: the hard cap wins.
        assert_eq!(ctl.poll_timeout(Duration::ZERO, None, None), MAX_POLL);
        // An imminent size poll or meter reading shortens the wait.
        assert_eq!(
            ctl.poll_timeout(Duration::ZERO, Some(Duration::from_millis(30)), None),
            Duration::from_millis(30)
        );
        assert_eq!(
            ctl.poll_timeout(Duration::ZERO, None, Some(Duration::from_millis(12))),
            Duration::from_millis(12)
        );
        // A split boundary closer than both wins instead.
        assert_eq!(
            ctl.poll_timeout(
                Duration::from_millis(4995),
                Some(Duration::from_millis(30)),
                Some(Duration::from_millis(30))
            ),
            Duration::from_millis(5)
        );
        // The wait never collapses to a busy spin.
        assert_eq!(
            ctl.poll_timeout(Duration::from_secs(5), None, None),
            Duration::from_millis(1)
        );
    }

    #[test]
    fn size_limit_fires_on_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        std::fs::write(&path, vec![0u8; 4096]).unwrap();

        let config = RecorderConfig {
            max_file_size_bytes: Some(1024),
            ..config()
        };
        let pipeline = pipeline(&config);
        let interrupt = Arc::new(AtomicBool::new(false));
        let mut ctl = ControlLoop::new(&config, pipeline, interrupt, Box::new(NullKeySource));

        assert_eq!(ctl.run(&path), StopReason::MaxSize);
    }
}
