//! Scan duty cycle
//!
//! Continuous high-power scanning drains the battery, so scanning alternates
//! between a short high-power window and a long low-power window. The
//! schedule itself is a plain state machine so it can be tested without a
//! clock; a tokio task drives it against the radio.

use std::time::Duration;

use crate::radio::ScanMode;

/// Length of the high-power scan window.
pub const HIGH_POWER_WINDOW: Duration = Duration::from_secs(10);

/// Length of the low-power scan window.
pub const LOW_POWER_WINDOW: Duration = Duration::from_secs(60);

/// Delay before retrying after a failed scan start.
pub const SCAN_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Alternating scan schedule. Starts in high power.
pub struct DutyCycle {
    current: ScanMode,
}

impl Default for DutyCycle {
    fn default() -> Self {
        Self {
            current: ScanMode::HighPower,
        }
    }
}

impl DutyCycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> ScanMode {
        self.current
    }

    /// How long to stay in the current mode.
    pub fn window(&self) -> Duration {
        match self.current {
            ScanMode::HighPower => HIGH_POWER_WINDOW,
            ScanMode::LowPower => LOW_POWER_WINDOW,
        }
    }

    /// Flip to the other mode and return it.
    pub fn advance(&mut self) -> ScanMode {
        self.current = match self.current {
            ScanMode::HighPower => ScanMode::LowPower,
            ScanMode::LowPower => ScanMode::HighPower,
        };
        self.current
    }
}
