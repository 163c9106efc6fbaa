//! Screen rotation state machine.
//!
//! One state per screen index. Each render tick asks it whether the active
//! screen changed: explicit jump requests win, then dwell expiry advances to
//! the next index with wrap-around. A pause flag keeps re-arming the dwell
//! timer instead of advancing.

use std::time::{Duration, Instant};

use log::warn;

/// Screens stay up at least this long no matter how short their configured
/// duration is; fast switching flickers badly on the panel.
pub const MIN_DWELL: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct Rotation {
    index: usize,
    requested: Option<usize>,
    paused: bool,
    dwell_start: Instant,
}

impl Default for Rotation {
    fn default() -> Self {
        Self::new()
    }
}

impl Rotation {
    pub fn new() -> Self {
        Self {
            index: 0,
            requested: None,
            paused: false,
            dwell_start: Instant::now(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Asks for an immediate jump, applied on the next tick.
    pub fn request(&mut self, index: usize) {
        self.requested = Some(index);
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn paused(&self) -> bool {
        self.paused
    }

    /// Advances the state machine. `duration_ms` is the active screen's
    /// configured duration; zero means it never auto-advances. Returns true
    /// when the active index changed.
    pub fn tick(&mut self, screen_count: usize, duration_ms: u64, now: Instant) -> bool {
        if screen_count <= 1 {
            self.requested = None;
            self.dwell_start = now;
            return false;
        }

        let before = self.index;

        if let Some(target) = self.requested.take() {
            if target < screen_count {
                self.index = target;
            } else {
                warn!("rotation: ignoring request for missing screen {target}");
            }
        } else if duration_ms > 0 {
            let dwell = Duration::from_millis(duration_ms).max(MIN_DWELL);
            if now.duration_since(self.dwell_start) > dwell {
                if self.paused {
                    // expiry re-evaluates after another full dwell
                    self.dwell_start = now;
                } else {
                    self.index = (self.index + 1) % screen_count;
                }
            }
        }

        if self.index != before {
            self.dwell_start = now;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(base: Instant, ms: u64) -> Instant {
        base + Duration::from_millis(ms)
    }

    #[test]
    fn test_dwell_floor_overrides_short_durations() {
        let base = Instant::now();
        let mut rotation = Rotation::new();
        rotation.dwell_start = base;

        // duration 2000 ms still holds for the 10 s floor
        assert!(!rotation.tick(3, 2000, at(base, 2500)));
        assert!(!rotation.tick(3, 2000, at(base, 9999)));
        assert!(rotation.tick(3, 2000, at(base, 10_001)));
        assert_eq!(rotation.index(), 1);
    }

    #[test]
    fn test_long_durations_use_their_own_expiry() {
        let base = Instant::now();
        let mut rotation = Rotation::new();
        rotation.dwell_start = base;

        assert!(!rotation.tick(2, 60_000, at(base, 59_000)));
        assert!(rotation.tick(2, 60_000, at(base, 60_001)));
    }

    #[test]
    fn test_zero_duration_never_advances() {
        let base = Instant::now();
        let mut rotation = Rotation::new();
        rotation.dwell_start = base;

        assert!(!rotation.tick(3, 0, at(base, 3_600_000)));
        assert_eq!(rotation.index(), 0);
    }

    #[test]
    fn test_advance_wraps_to_first_screen() {
        let base = Instant::now();
        let mut rotation = Rotation::new();
        rotation.index = 2;
        rotation.dwell_start = base;

        assert!(rotation.tick(3, 1000, at(base, 10_001)));
        assert_eq!(rotation.index(), 0);
    }

    #[test]
    fn test_request_jumps_immediately_and_resets_dwell() {
        let base = Instant::now();
        let mut rotation = Rotation::new();
        rotation.dwell_start = base;

        rotation.request(2);
        assert!(rotation.tick(3, 1000, at(base, 100)));
        assert_eq!(rotation.index(), 2);

        // dwell restarted at the jump; no expiry until 10 s later
        assert!(!rotation.tick(3, 1000, at(base, 10_050)));
        assert!(rotation.tick(3, 1000, at(base, 10_101 + 10_000)));
    }

    #[test]
    fn test_invalid_request_is_dropped() {
        let base = Instant::now();
        let mut rotation = Rotation::new();
        rotation.dwell_start = base;

        rotation.request(7);
        assert!(!rotation.tick(3, 0, at(base, 100)));
        assert_eq!(rotation.index(), 0);
        // the bad request does not linger
        assert!(!rotation.tick(3, 0, at(base, 200)));
    }

    #[test]
    fn test_pause_rearms_instead_of_advancing() {
        let base = Instant::now();
        let mut rotation = Rotation::new();
        rotation.dwell_start = base;
        rotation.set_paused(true);

        assert!(!rotation.tick(2, 1000, at(base, 10_001)));
        assert_eq!(rotation.index(), 0);

        // unpausing still needs a fresh dwell because the timer re-armed
        rotation.set_paused(false);
        assert!(!rotation.tick(2, 1000, at(base, 10_002)));
        assert!(rotation.tick(2, 1000, at(base, 20_002)));
    }

    #[test]
    fn test_single_screen_never_rotates() {
        let base = Instant::now();
        let mut rotation = Rotation::new();
        rotation.dwell_start = base;
        rotation.request(0);

        assert!(!rotation.tick(1, 1000, at(base, 60_000)));
        assert_eq!(rotation.index(), 0);
    }
}
