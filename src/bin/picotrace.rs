//! picotrace firmware.
//!
//! Build with a board feature and the personalities to include, for example:
//! ```bash
//! cargo build --bin picotrace --features pico,sniffer,cardem
//! ```

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

#![no_std]
#![no_main]

use {defmt_rtt as _, panic_probe as _};

#[embassy_executor::main]
async fn main(spawner: embassy_executor::Spawner) -> ! {
    picotrace_rs::entry::common_main(spawner, env!("CARGO_BIN_NAME")).await
}
