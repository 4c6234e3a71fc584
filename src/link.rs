//! Tracks the state of the USB link.
//!
//! The link state is purely informational - it drives the status LEDs.  It
//! never causes a personality to be started or stopped.  That is driven
//! solely by the configuration the host selects.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use portable_atomic::{AtomicBool, AtomicU8, Ordering};

use crate::indicator::Indicator;

/// The USB device state, as reported by the USB stack.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceState {
    /// The USB peripheral is disabled, or we're not attached to a host.
    Disabled = 0,

    /// Attached and powered, but not yet reset by the host.
    Powered,

    /// Reset by the host, using the default address.
    Default,

    /// The host has assigned an address.
    Addressed,

    /// The host has selected a configuration.
    Configured,

    /// The bus is suspended.
    Suspended,
}

impl DeviceState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => DeviceState::Powered,
            2 => DeviceState::Default,
            3 => DeviceState::Addressed,
            4 => DeviceState::Configured,
            5 => DeviceState::Suspended,
            _ => DeviceState::Disabled,
        }
    }
}

/// The transport layer, as the dispatcher sees it.
pub trait Transport {
    /// Returns the current state of the USB device.  Polled every tick.
    fn query_link_state(&self) -> DeviceState;
}

/// Coarse link status, independent of which personality is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkState {
    Disconnected,
    Connecting,
    Configured,
}

impl From<DeviceState> for LinkState {
    fn from(state: DeviceState) -> Self {
        match state {
            DeviceState::Disabled | DeviceState::Suspended => LinkState::Disconnected,
            DeviceState::Powered | DeviceState::Default | DeviceState::Addressed => {
                LinkState::Connecting
            }
            DeviceState::Configured => LinkState::Configured,
        }
    }
}

/// An edge in the link state, which the caller should show on the status
/// LEDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkChange {
    /// The link has just become Configured.
    Up,

    /// The link has just dropped out of Configured.
    Down,
}

impl LinkChange {
    /// Reflects this change on the status LEDs.
    pub fn apply<I: Indicator + ?Sized>(self, indicator: &mut I) {
        match self {
            LinkChange::Up => {
                indicator.set_alert(false);
                indicator.set_ready(true);
            }
            LinkChange::Down => {
                indicator.set_ready(false);
                indicator.set_alert(true);
            }
        }
    }
}

/// Result of polling the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkPoll {
    pub state: LinkState,
    pub change: Option<LinkChange>,
}

/// Derives [`LinkState`] from the transport each tick, and reports the
/// edges into and out of Configured.  Doesn't debounce - every flap is
/// reported.
pub struct ConnectionStateTracker {
    last: LinkState,
}

impl ConnectionStateTracker {
    pub const fn new() -> Self {
        Self {
            last: LinkState::Disconnected,
        }
    }

    /// The state seen at the last poll.
    pub fn state(&self) -> LinkState {
        self.last
    }

    pub fn poll<T: Transport + ?Sized>(&mut self, transport: &T) -> LinkPoll {
        let state = LinkState::from(transport.query_link_state());

        let change = match (self.last, state) {
            (LinkState::Configured, LinkState::Configured) => None,
            (_, LinkState::Configured) => Some(LinkChange::Up),
            (LinkState::Configured, _) => Some(LinkChange::Down),
            _ => None,
        };

        match change {
            Some(LinkChange::Up) => info!("USB is now configured"),
            Some(LinkChange::Down) => info!("USB is no longer configured: {}", state),
            None => (),
        }

        self.last = state;
        LinkPoll { state, change }
    }
}

impl Default for ConnectionStateTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds the USB device state, as updated from the USB stack's lifecycle
/// callbacks, and answers the dispatcher's [`Transport`] queries.
///
/// Suspension is kept separately from the underlying state, as the bus
/// returns to whatever state it was in before on resume.
pub struct UsbStateCell {
    state: AtomicU8,
    suspended: AtomicBool,
}

impl UsbStateCell {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(DeviceState::Disabled as u8),
            suspended: AtomicBool::new(false),
        }
    }

    /// Records a new device state.  `Suspended` is handled via
    /// [`set_suspended`](Self::set_suspended) instead.
    pub fn set(&self, state: DeviceState) {
        if state != DeviceState::Suspended {
            self.state.store(state as u8, Ordering::Release);
        }
    }

    pub fn set_suspended(&self, suspended: bool) {
        self.suspended.store(suspended, Ordering::Release);
    }
}

impl Default for UsbStateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for UsbStateCell {
    fn query_link_state(&self) -> DeviceState {
        if self.suspended.load(Ordering::Acquire) {
            DeviceState::Suspended
        } else {
            DeviceState::from_u8(self.state.load(Ordering::Acquire))
        }
    }
}
