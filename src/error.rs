//! Errors raised by the personality dispatch core.
//!
//! None of these are recoverable locally.  Registry errors surface at start
//! of day, and the dispatch errors are handled by restarting the device.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use core::fmt;

use crate::personality::PersonalityId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The USB link did not reach the Configured state within
    /// [`BRINGUP_TIMEOUT`](crate::constants::BRINGUP_TIMEOUT).
    BringUpTimeout,

    /// The host selected a configuration number which has no compiled-in
    /// personality.  This is a build/deployment mismatch between the USB
    /// descriptors and the enabled personality features.
    UnknownConfig(u8),

    /// A personality was registered twice.
    DuplicatePersonality(PersonalityId),

    /// More personalities were registered than the registry can hold.
    RegistryFull,

    /// The dispatcher was started with no personalities registered.
    EmptyRegistry,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BringUpTimeout => write!(f, "USB link was not configured in time"),
            Error::UnknownConfig(num) => write!(f, "no personality for configuration {num}"),
            Error::DuplicatePersonality(id) => write!(f, "personality {id} registered twice"),
            Error::RegistryFull => write!(f, "personality registry full"),
            Error::EmptyRegistry => write!(f, "no personalities registered"),
        }
    }
}
