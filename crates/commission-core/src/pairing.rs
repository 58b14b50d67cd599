//! Pairing window controller
//!
//! A time-boxed two-state machine gating whether unknown peers may bond.
//! Expiry is a soft deadline observed on the periodic tick.

use std::time::{Duration, Instant};

use tracing::info;

// ----------------------------------------------------------------------------
// Pairing Window
// ----------------------------------------------------------------------------

/// Time-boxed window during which new peers may bond
#[derive(Debug, Clone)]
pub struct PairingWindow {
    duration: Duration,
    opened_at: Option<Instant>,
}

impl PairingWindow {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            opened_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.opened_at.is_some()
    }

    /// Open the window, or reset the timer if it is already open.
    /// Re-opening is idempotent and never rejected.
    pub fn open(&mut self, now: Instant) {
        if self.opened_at.is_some() {
            info!("pairing window already open, resetting timer");
        } else {
            info!(duration_secs = self.duration.as_secs(), "pairing window opened");
        }
        self.opened_at = Some(now);
    }

    /// Close the window early
    pub fn close(&mut self) {
        if self.opened_at.take().is_some() {
            info!("pairing window closed");
        }
    }

    /// Observe the clock. Returns true exactly once, on the tick where the
    /// window transitions from open to expired.
    pub fn tick(&mut self, now: Instant) -> bool {
        let Some(opened_at) = self.opened_at else {
            return false;
        };
        if now.duration_since(opened_at) >= self.duration {
            self.opened_at = None;
            info!("pairing window expired");
            true
        } else {
            false
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
