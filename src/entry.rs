//! Firmware entry point, shared by the firmware binaries.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_executor::Spawner;
use embassy_rp::gpio::{Level, Output};
use embassy_time::Timer;

use crate::constants::{ALERT_LED_PIN, LOOP_LOG_INTERVAL, READY_LED_PIN, SERIAL};
use crate::indicator::LedIndicator;
use crate::infra::watchdog::{WatchdogType, create_watchdog, watchdog_task};
use crate::task::{core1_spawn, spawn_or_reboot};
use crate::usb::{UsbStack, usb_task};
use crate::util::built::log_fw_info;

/// Brings up the board, spawns the core 0 tasks and hands the dispatcher
/// over to core 1.  Never returns.
pub async fn common_main(spawner: Spawner, bin_name: &str) -> ! {
    let p = embassy_rp::init(Default::default());

    log_fw_info(bin_name, SERIAL);

    // Light the alert LED as early as possible.  It stays lit until the host
    // configures us.
    info!(
        "Status LEDs: alert GPIO{}, ready GPIO{}",
        ALERT_LED_PIN, READY_LED_PIN
    );
    let leds = LedIndicator::new(
        Output::new(p.PIN_15, Level::High),
        Output::new(p.PIN_25, Level::Low),
    );

    // Create and start the watchdog.
    let watchdog: &'static WatchdogType = create_watchdog(p.WATCHDOG);
    spawn_or_reboot(spawner.spawn(watchdog_task(watchdog)), "Watchdog");

    // Create and run the USB stack.
    let usb = UsbStack::create_static(p.USB, SERIAL);
    spawn_or_reboot(spawner.spawn(usb_task(usb)), "USB");

    // The dispatcher runs on core 1.
    core1_spawn(p.CORE1, leds, watchdog);

    loop {
        Timer::after(LOOP_LOG_INTERVAL).await;
        trace!("Core0: main loop");
    }
}
