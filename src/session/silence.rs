// Silence metering
//
// The mixer publishes each emitted chunk's RMS into a `LevelMeter`; the
// control loop samples it at a fixed interval and feeds a `SilenceTracker`
// that fires once the level has stayed under the dB threshold for the
// configured contiguous duration.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Floor reported when no signal has been observed at all.
pub const SILENCE_FLOOR_DB: f32 = -100.0;

/// Latest chunk level, shared lock-free between the mixer (writer side) and
/// the control loop (reader side). Stored as f32 bits in an atomic.
#[derive(Debug)]
pub struct LevelMeter {
    level_db_bits: AtomicU32,
}

impl LevelMeter {
    pub fn new() -> Self {
        Self {
            level_db_bits: AtomicU32::new(SILENCE_FLOOR_DB.to_bits()),
        }
    }

    /// Publish the RMS of one mixed chunk.
    pub fn update_rms(&self, rms: f32) {
        let db = linear_to_db(rms);
        self.level_db_bits.store(db.to_bits(), Ordering::Relaxed);
    }

    /// Most recent average level in dBFS.
    pub fn level_db(&self) -> f32 {
        f32::from_bits(self.level_db_bits.load(Ordering::Relaxed))
    }
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new()
    }
}

pub fn linear_to_db(level: f32) -> f32 {
    if level <= 0.0 {
        SILENCE_FLOOR_DB
    } else {
        (20.0 * level.log10()).max(SILENCE_FLOOR_DB)
    }
}

/// Tracks a contiguous run of below-threshold readings.
#[derive(Debug)]
pub struct SilenceTracker {
    threshold_db: f32,
    min_duration: Duration,
    silence_started: Option<Instant>,
}

impl SilenceTracker {
    pub fn new(threshold_db: f32, min_duration: Duration) -> Self {
        Self {
            threshold_db,
            min_duration,
            silence_started: None,
        }
    }

    /// Feed one periodic level reading; returns true once silence has been
    /// sustained for at least the configured duration.
    pub fn observe(&mut self, level_db: f32, now: Instant) -> bool {
        if level_db >= self.threshold_db {
            self.silence_started = None;
            return false;
        }
        let started = *self.silence_started.get_or_insert(now);
        now.duration_since(started) >= self.min_duration
    }

    /// Reset the run, e.g. around a pause where the meter goes stale.
    pub fn reset(&mut self) {
        self.silence_started = None;
    }
}
