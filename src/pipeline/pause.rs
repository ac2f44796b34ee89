// Pause clock
//
// Tracks how much wall-clock time the session has spent paused. Buffers
// arriving while paused are discarded upstream; buffers accepted afterwards
// have their timestamps shifted backward by the cumulative offset so the
// output timeline closes over the gap.

use std::time::Instant;

#[derive(Debug)]
pub struct PauseClock {
    paused: bool,
    pause_started: Option<Instant>,
    /// Total paused time in seconds. Monotonically non-decreasing.
    offset: f64,
}

/// Atomic view of the pause state, taken once per buffer so the flag and the
/// offset can never tear against a concurrent resume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PauseSnapshot {
    pub paused: bool,
    pub offset: f64,
}

impl PauseClock {
    pub fn new() -> Self {
        Self {
            paused: false,
            pause_started: None,
            offset: 0.0,
        }
    }

    /// Enter the paused state. No-op if already paused.
    pub fn pause(&mut self, now: Instant) {
        if !self.paused {
            self.paused = true;
            self.pause_started = Some(now);
        }
    }

    /// Leave the paused state, folding the pause duration into the offset.
    /// No-op if not paused.
    pub fn resume(&mut self, now: Instant) {
        if !self.paused {
            return;
        }
        if let Some(started) = self.pause_started.take() {
            let delta = now.saturating_duration_since(started).as_secs_f64();
            if delta > 0.0 {
                self.offset += delta;
            }
        }
        self.paused = false;
    }

    pub fn snapshot(&self) -> PauseSnapshot {
        PauseSnapshot {
            paused: self.paused,
            offset: self.offset,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }
}

impl Default for PauseClock {
    fn default() -> Self {
        Self::new()
    }
}
