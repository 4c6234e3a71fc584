//! Implements task handling support, including dual core support, and the
//! dispatcher task.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_executor::Executor;
use embassy_rp::gpio::Output;
use embassy_rp::multicore::{Stack, spawn_core1 as rp_spawn_core1};
use embassy_rp::peripherals::CORE1;
use embassy_time::{Instant, Timer};
use static_cell::{ConstStaticCell, StaticCell};

use crate::constants::{
    CORE1_STACK_SIZE, DISPATCH_LOOP_TIMER, DISPATCHER_WATCHDOG_TIMER, LOOP_LOG_INTERVAL,
};
use crate::dispatcher::Dispatcher;
use crate::indicator::LedIndicator;
use crate::infra::board::{ResetBoard, SystemClock, reboot_normal};
use crate::infra::watchdog::{TaskId, WatchdogType};
use crate::modes::Mode;
use crate::personality::{Personality, PersonalityId, Registry};
use crate::usb::{CONFIG_SIGNAL, USB_STATE};

// Threading and tasks model
//
// Core 0 runs main(), the embassy USB stack (including the Control handler,
// which receives the host's personality selection) and the watchdog.
//
// Core 1 runs the dispatcher, and hence every personality hook.  This keeps
// the personalities' work from delaying the USB stack, and vice versa.  The
// only state shared between the two is the pair of atomic cells in the usb
// module.

/// The status LEDs - alert and ready.
pub type StatusLeds = LedIndicator<Output<'static>, Output<'static>>;

//
// Statics
//

// A stack for core 1.  We will take it and use it mutably in core1_spawn.
static CORE1_STACK: ConstStaticCell<Stack<CORE1_STACK_SIZE>> = ConstStaticCell::new(Stack::new());

// An executor for core 1.
static EXECUTOR1: StaticCell<Executor> = StaticCell::new();

// We're going to spawn the dispatcher on core 1.  This requires an executor,
// which needs to live for infinity, hence we have declared it as a static
// above.  We need to pass it a stack, which we have also declared as a
// static.
pub fn core1_spawn(p_core1: CORE1, leds: StatusLeds, watchdog: &'static WatchdogType) {
    rp_spawn_core1(p_core1, CORE1_STACK.take(), move || {
        let executor1 = EXECUTOR1.init(Executor::new());
        executor1.run(|spawner| {
            spawn_or_reboot(spawner.spawn(dispatcher_task(leds, watchdog)), "Dispatcher");
        })
    });
}

// Adds a personality to the registry.  Failure here means the build is
// broken, so we reboot.
fn register_or_reboot<'a>(
    registry: &mut Registry<'a>,
    id: PersonalityId,
    personality: &'a mut dyn Personality,
) {
    if let Err(e) = registry.register(id, personality) {
        error!("Failed to register personality {}: {}", id, e);
        reboot_normal();
    }
}

/// The dispatcher task.  Owns the personalities, and ticks the dispatcher
/// forever, pausing between ticks so other tasks on this core can run.
#[embassy_executor::task]
pub async fn dispatcher_task(mut leds: StatusLeds, watchdog: &'static WatchdogType) -> ! {
    let core: u32 = embassy_rp::pac::SIO.cpuid().read();
    info!("Core{}: Dispatcher task started", core);

    // Register with the watchdog
    let id = TaskId::Dispatcher;
    watchdog.register_task(&id, DISPATCHER_WATCHDOG_TIMER).await;

    // Build the registry from the compiled-in personalities.  These live
    // in this task for the life of the device.
    #[cfg(feature = "sniffer")]
    let mut sniffer = Mode::new(PersonalityId::Sniffer);
    #[cfg(feature = "ccid")]
    let mut ccid = Mode::new(PersonalityId::ReaderEmulation);
    #[cfg(feature = "cardem")]
    let mut cardem = Mode::new(PersonalityId::CardEmulation);
    #[cfg(feature = "mitm")]
    let mut mitm = Mode::new(PersonalityId::Relay);

    let mut registry = Registry::new();
    #[cfg(feature = "sniffer")]
    register_or_reboot(&mut registry, PersonalityId::Sniffer, &mut sniffer);
    #[cfg(feature = "ccid")]
    register_or_reboot(&mut registry, PersonalityId::ReaderEmulation, &mut ccid);
    #[cfg(feature = "cardem")]
    register_or_reboot(&mut registry, PersonalityId::CardEmulation, &mut cardem);
    #[cfg(feature = "mitm")]
    register_or_reboot(&mut registry, PersonalityId::Relay, &mut mitm);
    info!("Core{}: {} personalities compiled in", core, registry.len());

    let mut dispatcher = match Dispatcher::new(registry, &CONFIG_SIGNAL, SystemClock) {
        Ok(dispatcher) => dispatcher,
        Err(e) => {
            error!("Failed to create dispatcher: {}", e);
            reboot_normal();
        }
    };
    let mut board = ResetBoard;

    info!("Core{}: Waiting for USB to be configured", core);
    let mut next_log_instant = Instant::now();
    loop {
        let now = Instant::now();
        if now >= next_log_instant {
            trace!("Core{}: Dispatcher loop, state {}", core, dispatcher.state());
            next_log_instant += LOOP_LOG_INTERVAL;
        }

        // Feed the watchdog
        watchdog.feed(&id).await;

        // Do one unit of work.  Anything fatal restarts the device from
        // within tick().
        dispatcher.tick(&USB_STATE, &mut leds, &mut board);

        // Pause to allow other tasks to run
        Timer::after(DISPATCH_LOOP_TIMER).await;
    }
}

/// Method to spawn tasks.  Can be called on either core.
///
/// Using the Spawner object to spawn can fail, because too many instances of
/// that task are already running.  By default only 1 is allowed at once.
///
/// We handle that by rebooting - but it shouldn't happen if tasks are only
/// spawned at start of day.
///
/// Example:
/// ```ignore
/// spawn_or_reboot(spawner.spawn(my_task()), "my_task");
/// ```
pub fn spawn_or_reboot<T, E: defmt::Format>(spawn_result: Result<T, E>, task_name: &str) {
    match spawn_result {
        Ok(_) => {
            let core: u32 = embassy_rp::pac::SIO.cpuid().read();
            debug!("Core{}: Spawned task {}", core, task_name);
        }
        Err(e) => {
            error!("Failed to spawn task: {}, error: {}", task_name, e);
            reboot_normal();
        }
    }
}
