//! Board level services used by the dispatcher - the monotonic clock and
//! system restart.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_time::Instant;

use crate::dispatcher::{Board, Clock};

/// The embassy time driver's monotonic clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Restarts the device with a hard system reset.
pub struct ResetBoard;

impl Board for ResetBoard {
    fn restart(&mut self) {
        reboot_normal()
    }
}

/// Called to perform a standard device reboot.  (Normally as in not entering
/// BOOTSEL/DFU mode.)
pub fn reboot_normal() -> ! {
    error!("Rebooting");
    cortex_m::peripheral::SCB::sys_reset()
}
