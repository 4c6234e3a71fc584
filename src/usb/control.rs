//! This module implements the USB Control handler.
//!
//! This includes
//! * USB lifecycle events (enabled, reset, addressed, configured, suspended
//!   and resumed), which are mirrored into [`USB_STATE`] for the dispatcher
//!   to poll
//! * The host selecting an alternate setting on our interface, which is how
//!   it picks a personality, and is passed on via [`CONFIG_SIGNAL`]
//! * Vendor IN Control requests from the host, which return diagnostic
//!   information
//!
//! These callbacks run in the USB task on core 0, asynchronously to the
//! dispatcher on core 1.  They only ever store to the two atomic cells, and
//! never call into a personality.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_usb::Handler;
use embassy_usb::control::{InResponse, Recipient, Request, RequestType};
use embassy_usb::types::InterfaceNumber;
use static_cell::StaticCell;

use super::{CONFIG_SIGNAL, USB_STATE};
use crate::constants::{ECHO_CONTROL_RESPONSE_LEN, MAX_DEVINFO_SIZE, SELECTED_CONFIG_RESPONSE_LEN};
use crate::link::DeviceState;
use crate::util::built::{GIT_VERSION, PKG_VERSION, RUSTC_VERSION};

// Our Control Handler handles Control requests that come in on the Control
// endpoint, and the USB stack calls control_in() for us to handle them.  It
// also handles various USB device lifecycles events.  We pass ownership of
// this to our UsbDevice object, so we don't need anything other than a
// StaticCell.
static CONTROL: StaticCell<Control> = StaticCell::new();

/// Handle USB events.
pub struct Control {
    // The interface number of this control handler.  Used to check that we
    // only handle requests for this interface.
    if_num: InterfaceNumber,
}

// Error type used internally to decide how to respond to a Control message.
enum ControlError {
    // Ignore means we return None from the control handler function.
    Ignore,

    // Invalid means we return Rejected from the control handler function.
    Invalid,
}

impl Handler for Control {
    /// Called when the USB device has been enabled or disabled.
    fn enabled(&mut self, enabled: bool) {
        match enabled {
            true => {
                debug!("USB device enabled");
                USB_STATE.set(DeviceState::Powered);
            }
            false => {
                info!("USB device disabled");
                USB_STATE.set(DeviceState::Disabled);
            }
        }
        USB_STATE.set_suspended(false);
    }

    /// Called after a USB reset after the bus reset sequence is complete.
    fn reset(&mut self) {
        debug!("USB device reset complete");
        USB_STATE.set(DeviceState::Default);
        USB_STATE.set_suspended(false);
    }

    /// Called when the host has set the address of the device to `addr`.
    fn addressed(&mut self, addr: u8) {
        debug!("USB device addressed: {}", addr);
        USB_STATE.set(DeviceState::Addressed);
    }

    /// Called when the host has enabled or disabled the configuration of the device.
    fn configured(&mut self, configured: bool) {
        match configured {
            true => {
                debug!("USB device configuration enabled");
                USB_STATE.set(DeviceState::Configured);
            }
            false => {
                debug!("USB device configuration disabled");
                USB_STATE.set(DeviceState::Addressed);
            }
        }
    }

    /// Called when the bus has entered or exited the suspend state.
    fn suspended(&mut self, suspended: bool) {
        match suspended {
            true => debug!("USB device suspended"),
            false => debug!("USB device resumed"),
        }
        USB_STATE.set_suspended(suspended);
    }

    /// Called when the host selects an alternate setting.  For our
    /// interface, that is the host selecting a personality.  Alternate
    /// setting 0 is the reset default, and doesn't select anything.
    fn set_alternate_setting(&mut self, iface: InterfaceNumber, alternate_setting: u8) {
        if iface != self.if_num {
            return;
        }
        debug!("Host selected configuration {}", alternate_setting);
        CONFIG_SIGNAL.notify(alternate_setting);
    }

    /// Respond to IN control messages, where the host requests some data from
    /// the device.
    fn control_in<'a>(&'a mut self, req: Request, buf: &'a mut [u8]) -> Option<InResponse<'a>> {
        // Get the request type, and check for errors
        let request = match self.check_request(req) {
            Err(ControlError::Ignore) => return None,
            Err(ControlError::Invalid) => return Some(InResponse::Rejected),
            Ok(request) => request,
        };

        // Handle the request and build the response
        match Self::handle_in(&request, buf, req.length as usize) {
            Err(ControlError::Ignore) => None,
            Err(ControlError::Invalid) | Ok(0) => Some(InResponse::Rejected),
            Ok(len) => Some(InResponse::Accepted(&buf[..len])),
        }
    }
}

// Our own Control functions to help deal with the USB control requests.
impl Control {
    // Create a new instance of this control handler.  Stores the created
    // instance in the static.  Will panic if this is called more than once.
    pub fn create_static(if_num: InterfaceNumber) -> &'static mut Self {
        let control = Self { if_num };
        CONTROL.init(control)
    }

    // Check the request is valid and supported.
    fn check_request(&self, req: Request) -> Result<ControlRequest, ControlError> {
        // Trace the request.
        debug!(
            "Control request to interface: 0x{:02x}, request: {:#x}, request type: {}, recipient: {}",
            req.index, req.request, req.request_type, req.recipient
        );

        // Only handle Vendor request types to an Interface.
        if req.request_type != RequestType::Vendor || req.recipient != Recipient::Interface {
            return Err(ControlError::Ignore);
        }

        // Ignore requests to other interfaces.
        if req.index != self.if_num.0 as u16 {
            debug!("Ignoring Control request to interface: 0x{:02x}", req.index);
            return Err(ControlError::Ignore);
        }

        // Check we got a supported request - reject if not.
        ControlRequest::try_from(req.request).inspect_err(|_| {
            info!("Invalid Control request type: 0x{:02x}", req.request);
        })
    }

    // Handler for IN requests.
    fn handle_in(
        request: &ControlRequest,
        buf: &mut [u8],
        len: usize,
    ) -> Result<usize, ControlError> {
        // Check the expected length is correct for this request.
        let response_len = request.response_len();
        if len < response_len || buf.len() < response_len {
            info!(
                "Invalid response length for request: {}, {} vs {}",
                request, len, response_len
            );
            return Err(ControlError::Invalid);
        }

        // Zero out the number of bytes for this request's response
        buf[..response_len].fill(0);

        // Fill in the response
        match request {
            ControlRequest::Echo => buf[0] = ControlRequest::Echo as u8,
            ControlRequest::SelectedConfig => buf[0] = CONFIG_SIGNAL.read().unwrap_or(0),
            ControlRequest::PkgVer => {
                // Our Cargo.toml version (i.e. the version of this crate).
                Self::copy_string_to_buffer(PKG_VERSION, &mut buf[..response_len]);
            }
            ControlRequest::GitRev => {
                let version = GIT_VERSION.unwrap_or("unknown");
                Self::copy_string_to_buffer(version, &mut buf[..response_len]);
            }
            ControlRequest::RustcVer => {
                // Extract the version number (e.g. 1.85.0) from the full rustc
                // version string
                let version = RUSTC_VERSION.split_whitespace().nth(1).unwrap_or("unknown");
                Self::copy_string_to_buffer(version, &mut buf[..response_len]);
            }
        };

        Ok(response_len)
    }

    // Copies a string to a buffer, ensuring it is null-terminated.  Used for
    // returning device information on control requests.
    fn copy_string_to_buffer(source: &str, buf: &mut [u8]) {
        let copy_len = core::cmp::min(buf.len().saturating_sub(1), source.len());
        buf[..copy_len].copy_from_slice(&source.as_bytes()[..copy_len]);
        buf[copy_len] = 0;
    }
}

// List of Control requests that the device accepts.  All are IN requests.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
enum ControlRequest {
    Echo = 0x00,
    SelectedConfig = 0x01,
    PkgVer = 0x02,
    GitRev = 0x03,
    RustcVer = 0x04,
}

impl ControlRequest {
    // Returns the response (data) length of the request.
    fn response_len(&self) -> usize {
        match self {
            ControlRequest::Echo => ECHO_CONTROL_RESPONSE_LEN,
            ControlRequest::SelectedConfig => SELECTED_CONFIG_RESPONSE_LEN,
            ControlRequest::PkgVer | ControlRequest::GitRev | ControlRequest::RustcVer => {
                MAX_DEVINFO_SIZE
            }
        }
    }
}

// Implements try_from to create a ControlRequest from the USB control request
// byte
impl TryFrom<u8> for ControlRequest {
    type Error = ControlError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Echo),
            0x01 => Ok(Self::SelectedConfig),
            0x02 => Ok(Self::PkgVer),
            0x03 => Ok(Self::GitRev),
            0x04 => Ok(Self::RustcVer),
            _ => Err(ControlError::Invalid),
        }
    }
}
