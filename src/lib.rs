//! picotrace
//!
//! The dispatch core of a multi-function USB smart card adapter.  The
//! firmware image contains several mutually exclusive personalities - a
//! passive ISO 7816 sniffer, a CCID reader, a card emulator and a relay -
//! and the host picks which one is active by selecting a USB configuration.
//!
//! The core ([`dispatcher`], [`personality`], [`signal`], [`link`] and
//! [`indicator`]) is hardware independent and tested on the host.  The
//! `firmware` feature adds the embassy-rp USB stack, tasks, watchdog and
//! entry point needed to run it on a Pico or Pico 2.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

#![cfg_attr(not(test), no_std)]

// Provide some feature guidance when compiling the firmware.
#[cfg(all(
    feature = "firmware",
    not(any(
        feature = "sniffer",
        feature = "ccid",
        feature = "cardem",
        feature = "mitm"
    ))
))]
compile_error!("At least one of 'sniffer', 'ccid', 'cardem' or 'mitm' must be enabled");
#[cfg(all(feature = "firmware", not(any(feature = "pico", feature = "pico2"))))]
compile_error!("Either 'pico' or 'pico2' feature must be enabled");
#[cfg(all(feature = "pico", feature = "pico2"))]
compile_error!("Features 'pico' and 'pico2' cannot be enabled simultaneously");

// Must come first, so the logging macros are visible to every other module.
#[macro_use]
mod fmt;

// Declare all of this library's modules.
pub mod constants;
pub mod dispatcher;
pub mod error;
pub mod indicator;
pub mod link;
pub mod modes;
pub mod personality;
pub mod signal;
#[cfg(test)]
mod testing;

#[cfg(feature = "firmware")]
pub mod entry;
#[cfg(feature = "firmware")]
mod infra;
#[cfg(feature = "firmware")]
mod task;
#[cfg(feature = "firmware")]
mod usb;
#[cfg(feature = "firmware")]
mod util;

pub use dispatcher::{Board, Clock, Dispatcher, State, Tick};
pub use error::Error;
pub use indicator::{Indicator, LedIndicator};
pub use link::{ConnectionStateTracker, DeviceState, LinkChange, LinkState, Transport};
pub use personality::{Personality, PersonalityId, Registry};
pub use signal::ConfigurationSignal;

// Extra binary information that picotool can read.
#[cfg(feature = "firmware")]
#[unsafe(link_section = ".bi_entries")]
#[used]
pub static PICOTOOL_ENTRIES: [embassy_rp::binary_info::EntryAddr; 4] = [
    embassy_rp::binary_info::rp_program_name!(c"picotrace by piers.rocks"),
    embassy_rp::binary_info::rp_program_description!(c"A multi-function USB smart card adapter - sniffer, CCID reader, card emulator and relay, selected by the host."),
    embassy_rp::binary_info::rp_cargo_version!(),
    embassy_rp::binary_info::rp_program_build_attribute!(),
];

// A note about Statics
//
// The dispatch core has no statics of its own.  The firmware declares the
// few it needs in the module that creates them:
//
// - usb holds CONFIG_SIGNAL and USB_STATE.  Both are plain atomics, written
//   by the USB stack on core 0 and read by the dispatcher on core 1, so no
//   Mutex is required.
//
// - Use StaticCell for statics that cannot be initialized at compile time,
//   such as the USB device and the core 1 executor.
//
// - Use ConstStaticCell for statics that can be initialized at compile time,
//   such as the USB descriptor buffers and core 1's stack.  These are take()n
//   once, at start of day.
