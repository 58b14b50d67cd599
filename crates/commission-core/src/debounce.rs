//! Edge-triggered input debounce
//!
//! Classifies a stream of raw `(level, timestamp)` samples into discrete
//! press events. Pure given its inputs, so the sampling task stays a thin
//! loop that funnels the resulting events into the serialized event
//! channel instead of mutating shared state.

use std::time::{Duration, Instant};

// ----------------------------------------------------------------------------
// Press Events
// ----------------------------------------------------------------------------

/// Classified button press
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonPress {
    /// Released before the medium-hold threshold
    Short,
    /// Held past the pairing-window threshold
    Medium,
    /// Held past the full-reset threshold
    Long,
}

// ----------------------------------------------------------------------------
// Debouncer
// ----------------------------------------------------------------------------

/// Debounces raw samples and emits hold-classified press events.
/// `Medium` and `Long` fire while the button is still held, each at most
/// once per press; `Short` fires on release.
#[derive(Debug)]
pub struct Debouncer {
    debounce: Duration,
    medium_hold: Duration,
    long_hold: Duration,
    last_raw: bool,
    last_change: Instant,
    stable: bool,
    press_start: Option<Instant>,
    medium_fired: bool,
    long_fired: bool,
}

impl Debouncer {
    pub fn new(debounce: Duration, medium_hold: Duration, long_hold: Duration, now: Instant) -> Self {
        Self {
            debounce,
            medium_hold,
            long_hold,
            last_raw: false,
            last_change: now,
            stable: false,
            press_start: None,
            medium_fired: false,
            long_fired: false,
        }
    }

    /// Feed one raw sample. `pressed` is the electrical level already
    /// normalized to active-high.
    pub fn sample(&mut self, pressed: bool, now: Instant) -> Option<ButtonPress> {
        if pressed != self.last_raw {
            self.last_change = now;
            self.last_raw = pressed;
        }

        if now.duration_since(self.last_change) < self.debounce {
            return None;
        }

        if self.stable != self.last_raw {
            self.stable = self.last_raw;
            if self.stable {
                // Press edge; the hold started when the level last changed
                self.press_start = Some(self.last_change);
                self.medium_fired = false;
                self.long_fired = false;
            } else {
                let was_short = !self.medium_fired && !self.long_fired;
                self.press_start = None;
                if was_short {
                    return Some(ButtonPress::Short);
                }
                return None;
            }
        }

        if self.stable {
            if let Some(start) = self.press_start {
                let held = now.duration_since(start);
                if !self.long_fired && held >= self.long_hold {
                    self.long_fired = true;
                    return Some(ButtonPress::Long);
                }
                if !self.medium_fired && !self.long_fired && held >= self.medium_hold {
                    self.medium_fired = true;
                    return Some(ButtonPress::Medium);
                }
            }
        }

        None
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
