//! The personalities built into the firmware image.
//!
//! The personality implementations themselves (ISO 7816 capture, CCID, card
//! emulation and relay) live outside this core.  Until they are wired in,
//! each enabled personality feature registers a [`Mode`], which tracks and
//! logs its lifecycle so the host side selection can be exercised end to
//! end.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_time::Instant;

use crate::constants::PERSONALITY_LOG_INTERVAL;
use crate::personality::{Personality, PersonalityId};

pub struct Mode {
    id: PersonalityId,
    configured: bool,
    active: bool,
    runs: u32,
    next_log_instant: Instant,
}

impl Mode {
    pub const fn new(id: PersonalityId) -> Self {
        Self {
            id,
            configured: false,
            active: false,
            runs: 0,
            next_log_instant: Instant::from_ticks(0),
        }
    }
}

impl Personality for Mode {
    fn configure(&mut self) {
        if !self.configured {
            debug!("{}: configured", self.id);
            self.configured = true;
        }
    }

    fn init(&mut self) {
        info!("{}: init", self.id);
        self.active = true;
        self.runs = 0;
        self.next_log_instant = Instant::now();
    }

    fn exit(&mut self) {
        info!("{}: exit after {} runs", self.id, self.runs);
        self.active = false;
    }

    fn run(&mut self) {
        if !self.active {
            warn!("{}: run while not active", self.id);
            return;
        }

        self.runs = self.runs.wrapping_add(1);

        let now = Instant::now();
        if now >= self.next_log_instant {
            trace!("{}: running, {} runs", self.id, self.runs);
            self.next_log_instant = now + PERSONALITY_LOG_INTERVAL;
        }
    }
}
