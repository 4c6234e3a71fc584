//! This module contains constants for picotrace.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_time::Duration;
use static_assertions::const_assert;

use crate::personality::PersonalityId;

//
// Dispatcher timers
//

/// How long the dispatcher waits for the host to configure the USB device
/// before giving up and restarting.  This is measured against the monotonic
/// clock, not by counting loop iterations.
pub const BRINGUP_TIMEOUT: Duration = Duration::from_secs(1);

/// How long the dispatcher task pauses between ticks, so the USB stack and
/// other tasks on the core get to run.  Kept short, as personality `run()`
/// calls are driven from this loop.
pub const DISPATCH_LOOP_TIMER: Duration = Duration::from_micros(100);

// How often we aim to log from our primary loops to prove they are still
// alive.
pub const LOOP_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// How often a placeholder personality logs while it is running.
pub const PERSONALITY_LOG_INTERVAL: Duration = Duration::from_secs(10);

//
// Personality configuration
//

/// The highest USB configuration number which maps to a personality.
pub const MAX_CONFIG_NUMBER: u8 = PersonalityId::Relay as u8;

/// Maximum number of personalities the registry can hold.
pub const MAX_PERSONALITIES: usize = MAX_CONFIG_NUMBER as usize;

/// Personality to activate at bring-up if the host hasn't selected one yet.
/// The first of these which is compiled in wins.
pub const DEFAULT_PRECEDENCE: [PersonalityId; MAX_PERSONALITIES] = [
    PersonalityId::Sniffer,
    PersonalityId::CardEmulation,
    PersonalityId::ReaderEmulation,
    PersonalityId::Relay,
];

// Configuration number 0 is reserved by USB to mean "not configured".
const_assert!(PersonalityId::Sniffer as u8 >= 1);
const_assert!(MAX_PERSONALITIES == PersonalityId::ALL.len());

//
// Watchdog timers
//

/// Hardware watchdog timeout - the device resets if the task watchdog stops
/// feeding the hardware watchdog for this long.
pub const WATCHDOG_HW_TIMEOUT: Duration = Duration::from_millis(1500);

/// How often the task watchdog checks its tasks have been fed.
pub const WATCHDOG_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// How often the dispatcher task must feed the watchdog to prevent a reset.
/// This bounds how long any personality hook may take.
pub const DISPATCHER_WATCHDOG_TIMER: Duration = Duration::from_secs(1);
const_assert!(DISPATCHER_WATCHDOG_TIMER.as_ticks() > DISPATCH_LOOP_TIMER.as_ticks());

//
// USB device configuration constants.
//

/// USB Descriptor information - what current in mA this device draws.
pub const USB_POWER_MA: u16 = 100;

/// USB Descriptor information - maximum endpoint 0 (control endpoint)
/// packet size.
pub const MAX_PACKET_SIZE_0: u8 = 64;

/// USB Descriptor information - Vendor ID and Product ID.  The pid.codes
/// test PID.
pub const VENDOR_ID: u16 = 0x1209;
pub const PRODUCT_ID: u16 = 0x0001;

/// USB Descriptor information - manufacturer string
pub const MANUFACTURER: &str = "piers.rocks";

/// USB Descriptor info - product string
pub const PRODUCT: &str = "picotrace smart card adapter";

/// USB Descriptor info - serial number string
pub const SERIAL: &str = "000";

/// USB Descriptor info - device class, subclass, and protocol
pub const USB_CLASS: u8 = 0xff;
pub const USB_SUB_CLASS: u8 = 0;
pub const USB_PROTOCOL: u8 = 0;

/// Maximum size of the version strings returned by control requests.
pub const MAX_DEVINFO_SIZE: usize = 8;

/// The Echo Control request response length.
pub const ECHO_CONTROL_RESPONSE_LEN: usize = 1;

/// The SelectedConfig Control request response length.
pub const SELECTED_CONFIG_RESPONSE_LEN: usize = 1;

//
// Pin constants
//

/// Alert (red) LED pin.
pub const ALERT_LED_PIN: u8 = 15;

/// Ready (green) LED pin - the Pico's onboard LED.
pub const READY_LED_PIN: u8 = 25;

//
// Other constants
//

/// The size (in bytes) of the stack for core 1.
pub const CORE1_STACK_SIZE: usize = 4096;
