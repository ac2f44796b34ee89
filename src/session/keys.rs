// Keyboard control
//
// Key classification for the control loop plus the terminal byte source.
// Classification is case-insensitive ASCII; when the pause and resume sets
// are identical the key toggles, otherwise each direction only moves one way.
// The stdin source puts the terminal in raw (unbuffered, no-echo) mode for
// the lifetime of its guard and reads single bytes with a poll timeout.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What a classified key press asks the control loop to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Stop,
    Pause,
    Resume,
    TogglePause,
}

/// Configured key sets. Bytes are matched after ASCII lowercasing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyBindings {
    pub stop: Vec<u8>,
    pub pause: Vec<u8>,
    pub resume: Vec<u8>,
}

impl Default for KeyBindings {
    fn default() -> Self {
        Self {
            stop: vec![b'q', 0x03], // 'q' or Ctrl-C byte in raw mode
            pause: vec![b'p'],
            resume: vec![b'p'],
        }
    }
}

impl KeyBindings {
    fn normalized(set: &[u8]) -> Vec<u8> {
        set.iter().map(u8::to_ascii_lowercase).collect()
    }

    /// True when pause and resume share the same key set, which turns the
    /// pause key into a toggle.
    pub fn pause_is_toggle(&self) -> bool {
        let mut a = Self::normalized(&self.pause);
        let mut b = Self::normalized(&self.resume);
        a.sort_unstable();
        b.sort_unstable();
        a == b
    }

    pub fn classify(&self, byte: u8) -> Option<KeyAction> {
        let b = byte.to_ascii_lowercase();
        if Self::normalized(&self.stop).contains(&b) {
            return Some(KeyAction::Stop);
        }
        let in_pause = Self::normalized(&self.pause).contains(&b);
        let in_resume = Self::normalized(&self.resume).contains(&b);
        match (in_pause, in_resume) {
            (true, true) => Some(KeyAction::TogglePause),
            (true, false) => Some(KeyAction::Pause),
            (false, true) => Some(KeyAction::Resume),
            (false, false) => None,
        }
    }
}

/// One non-blocking "read one byte within timeout" primitive.
pub trait KeySource: Send {
    /// Returns the next byte, or `None` once `timeout` elapses without input.
    fn read_key(&mut self, timeout: Duration) -> Option<u8>;
}

/// Source that never produces a byte; used when no terminal is attached.
pub struct NullKeySource;

impl KeySource for NullKeySource {
    fn read_key(&mut self, timeout: Duration) -> Option<u8> {
        std::thread::sleep(timeout);
        None
    }
}

#[cfg(unix)]
pub use stdin_source::StdinKeySource;

#[cfg(unix)]
mod stdin_source {
    use super::KeySource;
    use std::io::{IsTerminal, Read};
    use std::os::fd::AsFd;
    use std::time::Duration;

    use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
    use nix::sys::termios::{self, LocalFlags, SetArg, Termios};
    use tracing::warn;

    /// Raw-mode stdin reader. Construction flips the terminal into raw mode;
    /// drop restores the saved attributes. Only valid when stdin is a TTY.
    pub struct StdinKeySource {
        saved: Termios,
    }

    impl StdinKeySource {
        /// Returns `None` when stdin is not an interactive terminal.
        pub fn new() -> Option<Self> {
            let stdin = std::io::stdin();
            if !stdin.is_terminal() {
                return None;
            }
            let saved = termios::tcgetattr(stdin.as_fd()).ok()?;
            let mut raw = saved.clone();
            // ISIG comes off too so Ctrl-C arrives as the 0x03 byte and goes
            // through key classification instead of raising SIGINT.
            raw.local_flags
                .remove(LocalFlags::ICANON | LocalFlags::ECHO | LocalFlags::ISIG);
            termios::tcsetattr(stdin.as_fd(), SetArg::TCSANOW, &raw).ok()?;
            Some(Self { saved })
        }
    }

    impl Drop for StdinKeySource {
        fn drop(&mut self) {
            let stdin = std::io::stdin();
            if let Err(e) = termios::tcsetattr(stdin.as_fd(), SetArg::TCSANOW, &self.saved) {
                warn!("⚠️ KEYS: failed to restore terminal attributes: {e}");
            }
        }
    }

    impl KeySource for StdinKeySource {
        fn read_key(&mut self, timeout: Duration) -> Option<u8> {
            let stdin = std::io::stdin();
            let millis = timeout.as_millis().min(u128::from(u16::MAX)) as u16;
            let mut fds = [PollFd::new(stdin.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, PollTimeout::from(millis)) {
                Ok(n) if n > 0 => {
                    let readable = fds[0]
                        .revents()
                        .map(|r| r.contains(PollFlags::POLLIN))
                        .unwrap_or(false);
                    if !readable {
                        return None;
                    }
                    let mut byte = [0u8; 1];
                    match stdin.lock().read(&mut byte) {
                        Ok(1) => Some(byte[0]),
                        _ => None,
                    }
                }
                Ok(_) => None,
                Err(e) => {
                    warn!("⚠️ KEYS: poll failed: {e}");
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_is_case_insensitive() {
        let keys = KeyBindings::default();
        assert_eq!(keys.classify(b'Q'), Some(KeyAction::Stop));
        assert_eq!(keys.classify(b'q'), Some(KeyAction::Stop));
        assert_eq!(keys.classify(b'x'), None);
    }

    #[test]
    fn identical_pause_resume_sets_toggle() {
        let keys = KeyBindings::default();
        assert!(keys.pause_is_toggle());
        assert_eq!(keys.classify(b'p'), Some(KeyAction::TogglePause));
    }

    #[test]
    fn distinct_sets_pause_and_resume_one_way() {
        let keys = KeyBindings {
            stop: vec![b'q'],
            pause: vec![b'p'],
            resume: vec![b'r'],
        };
        assert!(!keys.pause_is_toggle());
        assert_eq!(keys.classify(b'p'), Some(KeyAction::Pause));
        assert_eq!(keys.classify(b'R'), Some(KeyAction::Resume));
    }

    #[test]
    fn ctrl_c_byte_stops() {
        let keys = KeyBindings::default();
        assert_eq!(keys.classify(0x03), Some(KeyAction::Stop));
    }
}
