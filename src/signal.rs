//! The configuration selection signal.
//!
//! The USB stack tells us about the host selecting a configuration from its
//! own context, which may pre-empt the dispatcher (or run on the other
//! core).  All it does is store the selected number here.  The dispatcher
//! reads it once per tick.
//!
//! This is deliberately not a queue.  If the host selects several
//! configurations between two reads, the dispatcher only sees the last one,
//! and never visits the intermediate ones.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use portable_atomic::{AtomicU8, Ordering};

// Value held until the host selects something.  USB never sends
// configuration 0 as a selection.
const UNSET: u8 = 0;

/// Single word, lock-free cell holding the most recently selected USB
/// configuration number.
pub struct ConfigurationSignal {
    selected: AtomicU8,
}

impl ConfigurationSignal {
    pub const fn new() -> Self {
        Self {
            selected: AtomicU8::new(UNSET),
        }
    }

    /// Records the host's selection.  Safe to call from interrupt context -
    /// it never blocks, allocates or logs.
    ///
    /// The number is stored unvalidated, so that a selection with no
    /// compiled-in personality reaches the dispatcher and is handled as the
    /// fatal error it is.  Configuration 0 is reserved and ignored.
    pub fn notify(&self, config: u8) {
        if config != UNSET {
            self.selected.store(config, Ordering::Release);
        }
    }

    /// Returns the most recently notified configuration number, or `None`
    /// if the host hasn't selected one yet.
    pub fn read(&self) -> Option<u8> {
        match self.selected.load(Ordering::Acquire) {
            UNSET => None,
            config => Some(config),
        }
    }
}

impl Default for ConfigurationSignal {
    fn default() -> Self {
        Self::new()
    }
}
