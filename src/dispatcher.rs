//! The personality dispatcher.
//!
//! This is the state machine at the heart of the firmware.  It:
//! - waits (for a bounded time) for the host to configure the USB device
//! - calls `configure()` on every compiled-in personality
//! - starts the personality the host selected, or a default if none yet
//! - on every subsequent tick, either runs the active personality, or, if
//!   the host has selected a different one, hands off to it.
//!
//! A hand-off always completes the outgoing personality's `exit()` before
//! the incoming one's `init()` is called, and no `run()` happens in the same
//! tick as a hand-off.  At most one personality is active at any time.
//!
//! The only failures are fatal - the link never coming up, or the host
//! selecting a configuration this build doesn't have.  Both are handled by
//! restarting the device via the [`Board`].

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_time::{Duration, Instant};

use crate::constants::BRINGUP_TIMEOUT;
use crate::error::Error;
use crate::indicator::Indicator;
use crate::link::{ConnectionStateTracker, LinkState, Transport};
use crate::personality::{PersonalityId, Registry};
use crate::signal::ConfigurationSignal;

/// Monotonic time source used for the bring-up deadline.
pub trait Clock {
    fn now(&self) -> Instant;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Board level operations the dispatcher needs.
pub trait Board {
    /// Hard resets the device.  On hardware this does not return.
    fn restart(&mut self);
}

/// Dispatcher state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// Waiting for the host to configure the USB device.  No personality
    /// hooks have been called yet.
    AwaitingLink,

    /// The given personality has been `init()`ed and not `exit()`ed.
    Active(PersonalityId),

    /// A fatal error has occurred and a restart has been requested.
    Halted,
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Tick {
    /// Still waiting for the link.
    AwaitingLink,

    /// Bring-up completed and this personality was started.
    Started(PersonalityId),

    /// The active personality's `run()` was called.
    Ran(PersonalityId),

    /// The active personality was exited and another started.
    HandedOff {
        from: PersonalityId,
        to: PersonalityId,
    },

    /// This tick hit a fatal error and requested a restart.
    Fatal(Error),

    /// A restart was previously requested - nothing was done.
    Halted,
}

pub struct Dispatcher<'a, C> {
    registry: Registry<'a>,
    signal: &'a ConfigurationSignal,
    tracker: ConnectionStateTracker,
    clock: C,
    bringup_timeout: Duration,
    bringup_deadline: Option<Instant>,
    state: State,
}

impl<'a, C: Clock> Dispatcher<'a, C> {
    /// Creates a dispatcher over the compiled-in personalities.  Fails if
    /// there are none, as there would be nothing to dispatch to.
    pub fn new(
        registry: Registry<'a>,
        signal: &'a ConfigurationSignal,
        clock: C,
    ) -> Result<Self, Error> {
        if registry.is_empty() {
            return Err(Error::EmptyRegistry);
        }

        Ok(Self {
            registry,
            signal,
            tracker: ConnectionStateTracker::new(),
            clock,
            bringup_timeout: BRINGUP_TIMEOUT,
            bringup_deadline: None,
            state: State::AwaitingLink,
        })
    }

    /// Overrides the default [`BRINGUP_TIMEOUT`].
    pub fn with_bringup_timeout(mut self, timeout: Duration) -> Self {
        self.bringup_timeout = timeout;
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The active personality, if bring-up has completed.
    pub fn active(&self) -> Option<PersonalityId> {
        match self.state {
            State::Active(id) => Some(id),
            _ => None,
        }
    }

    /// The link state seen on the last tick.
    pub fn link_state(&self) -> LinkState {
        self.tracker.state()
    }

    /// Performs one unit of dispatcher work.
    ///
    /// The link state is polled, and any change shown on the `indicator`.
    /// Then, depending on the state, we either check the bring-up deadline,
    /// complete bring-up, run the active personality or hand off to a newly
    /// selected one.  On a fatal error `board.restart()` is called, once.
    pub fn tick<T, I, B>(&mut self, transport: &T, indicator: &mut I, board: &mut B) -> Tick
    where
        T: Transport + ?Sized,
        I: Indicator + ?Sized,
        B: Board + ?Sized,
    {
        if self.state == State::Halted {
            return Tick::Halted;
        }

        // Link changes only ever affect the LEDs.
        let link = self.tracker.poll(transport);
        if let Some(change) = link.change {
            change.apply(indicator);
        }

        let result = match self.state {
            State::AwaitingLink => self.await_link(link.state),
            State::Active(current) => self.step(current),
            State::Halted => Ok(Tick::Halted),
        };

        match result {
            Ok(tick) => tick,
            Err(e) => self.halt(e, board),
        }
    }

    // Handles a tick while waiting for the host to configure us.
    fn await_link(&mut self, link: LinkState) -> Result<Tick, Error> {
        // The deadline runs from the first tick.
        let now = self.clock.now();
        let deadline = match self.bringup_deadline {
            Some(deadline) => deadline,
            None => {
                info!(
                    "Bring-up started, waiting up to {}ms for USB",
                    self.bringup_timeout.as_millis()
                );
                *self.bringup_deadline.insert(now + self.bringup_timeout)
            }
        };

        if link != LinkState::Configured {
            if now >= deadline {
                return Err(Error::BringUpTimeout);
            }
            return Ok(Tick::AwaitingLink);
        }

        // Let every personality do its static setup, whether or not it ends
        // up being selected.
        debug!("Calling configure of all personalities");
        self.registry.for_each(|id, personality| {
            debug!("Configure {}", id);
            personality.configure();
        });

        // Use the host's selection if there is one.  Otherwise fall back to
        // the default.
        let id = match self.signal.read() {
            Some(config) => self.registry.resolve(config)?,
            None => {
                let id = self.registry.default_id().ok_or(Error::EmptyRegistry)?;
                info!("No configuration selected yet, using default {}", id);
                id
            }
        };

        info!("Starting personality {}", id);
        self.registry.lookup(id)?.init();
        self.state = State::Active(id);

        Ok(Tick::Started(id))
    }

    // Handles a tick while a personality is active.  The selection is read
    // exactly once, so nothing can change under us during the tick.
    fn step(&mut self, current: PersonalityId) -> Result<Tick, Error> {
        let pending = match self.signal.read() {
            None => current,
            Some(config) if config == current.config_number() => current,
            Some(config) => self.registry.resolve(config)?,
        };

        if pending == current {
            self.registry.lookup(current)?.run();
            return Ok(Tick::Ran(current));
        }

        info!("USB config change {} -> {}", current, pending);
        self.registry.lookup(current)?.exit();
        self.registry.lookup(pending)?.init();
        self.state = State::Active(pending);

        Ok(Tick::HandedOff {
            from: current,
            to: pending,
        })
    }

    fn halt<B: Board + ?Sized>(&mut self, err: Error, board: &mut B) -> Tick {
        error!("Fatal dispatcher error: {} - restarting", err);
        self.state = State::Halted;
        board.restart();
        Tick::Fatal(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::DeviceState;
    use crate::testing::{
        Call, CallLog, ManualClock, RecordingBoard, RecordingIndicator, Recorder,
        ScriptedTransport, assert_mutually_exclusive,
    };

    use PersonalityId::{CardEmulation, ReaderEmulation, Relay, Sniffer};

    // The collaborators a tick is driven with.
    struct Io {
        transport: ScriptedTransport,
        indicator: RecordingIndicator,
        board: RecordingBoard,
    }

    impl Io {
        fn new() -> Self {
            Self {
                transport: ScriptedTransport::new(DeviceState::Powered),
                indicator: RecordingIndicator::new(),
                board: RecordingBoard::new(),
            }
        }

        fn tick(&mut self, dispatcher: &mut Dispatcher<&ManualClock>) -> Tick {
            dispatcher.tick(&self.transport, &mut self.indicator, &mut self.board)
        }
    }

    // Scenario A - personalities 1 and 3 compiled in, nothing selected
    // before bring-up, so the default (Sniffer) is started.
    #[test]
    fn bring_up_uses_default_when_nothing_selected() {
        let signal = ConfigurationSignal::new();
        let clock = ManualClock::new();
        let mut io = Io::new();
        let log = CallLog::new();
        let mut sniffer = Recorder::new(Sniffer, &log);
        let mut cardem = Recorder::new(CardEmulation, &log);

        let mut registry = Registry::new();
        registry.register(CardEmulation, &mut cardem).unwrap();
        registry.register(Sniffer, &mut sniffer).unwrap();
        let mut dispatcher = Dispatcher::new(registry, &signal, &clock).unwrap();

        assert_eq!(io.tick(&mut dispatcher), Tick::AwaitingLink);
        assert_eq!(dispatcher.state(), State::AwaitingLink);
        assert!(log.calls().is_empty());
        assert!(io.indicator.alert);

        io.transport.set(DeviceState::Configured);
        assert_eq!(io.tick(&mut dispatcher), Tick::Started(Sniffer));
        assert_eq!(dispatcher.active(), Some(Sniffer));
        assert_eq!(
            log.calls(),
            [
                Call::Configure(Sniffer),
                Call::Configure(CardEmulation),
                Call::Init(Sniffer),
            ]
        );

        // The link coming up is shown on the LEDs.
        assert!(io.indicator.ready);
        assert!(!io.indicator.alert);
        assert_eq!(io.board.restarts, 0);
    }

    #[test]
    fn bring_up_configures_everything_in_order_before_any_init() {
        let signal = ConfigurationSignal::new();
        let clock = ManualClock::new();
        let mut io = Io::new();
        let log = CallLog::new();
        let mut relay = Recorder::new(Relay, &log);
        let mut ccid = Recorder::new(ReaderEmulation, &log);
        let mut cardem = Recorder::new(CardEmulation, &log);
        let mut sniffer = Recorder::new(Sniffer, &log);

        let mut registry = Registry::new();
        registry.register(Relay, &mut relay).unwrap();
        registry.register(ReaderEmulation, &mut ccid).unwrap();
        registry.register(CardEmulation, &mut cardem).unwrap();
        registry.register(Sniffer, &mut sniffer).unwrap();
        let mut dispatcher = Dispatcher::new(registry, &signal, &clock).unwrap();

        // The host has already picked the relay.
        signal.notify(Relay.config_number());
        io.transport.set(DeviceState::Configured);
        assert_eq!(io.tick(&mut dispatcher), Tick::Started(Relay));

        assert_eq!(
            log.calls(),
            [
                Call::Configure(Sniffer),
                Call::Configure(ReaderEmulation),
                Call::Configure(CardEmulation),
                Call::Configure(Relay),
                Call::Init(Relay),
            ]
        );
    }

    // Scenario B - a selection while Sniffer is active hands off to card
    // emulation on the next tick, which then runs.
    #[test]
    fn selection_change_hands_off_exit_before_init() {
        let signal = ConfigurationSignal::new();
        let clock = ManualClock::new();
        let mut io = Io::new();
        let log = CallLog::new();
        let mut sniffer = Recorder::new(Sniffer, &log);
        let mut cardem = Recorder::new(CardEmulation, &log);

        let mut registry = Registry::new();
        registry.register(Sniffer, &mut sniffer).unwrap();
        registry.register(CardEmulation, &mut cardem).unwrap();
        let mut dispatcher = Dispatcher::new(registry, &signal, &clock).unwrap();

        io.transport.set(DeviceState::Configured);
        assert_eq!(io.tick(&mut dispatcher), Tick::Started(Sniffer));
        assert_eq!(io.tick(&mut dispatcher), Tick::Ran(Sniffer));
        log.clear();

        signal.notify(CardEmulation.config_number());
        assert_eq!(
            io.tick(&mut dispatcher),
            Tick::HandedOff {
                from: Sniffer,
                to: CardEmulation
            }
        );
        // No run() in the hand-off tick.
        assert_eq!(log.calls(), [Call::Exit(Sniffer), Call::Init(CardEmulation)]);

        assert_eq!(io.tick(&mut dispatcher), Tick::Ran(CardEmulation));
        assert_eq!(io.tick(&mut dispatcher), Tick::Ran(CardEmulation));
        assert_eq!(
            log.calls(),
            [
                Call::Exit(Sniffer),
                Call::Init(CardEmulation),
                Call::Run(CardEmulation),
                Call::Run(CardEmulation),
            ]
        );
        assert_eq!(dispatcher.active(), Some(CardEmulation));
    }

    #[test]
    fn steady_state_runs_once_per_tick() {
        let signal = ConfigurationSignal::new();
        let clock = ManualClock::new();
        let mut io = Io::new();
        let log = CallLog::new();
        let mut ccid = Recorder::new(ReaderEmulation, &log);

        let mut registry = Registry::new();
        registry.register(ReaderEmulation, &mut ccid).unwrap();
        let mut dispatcher = Dispatcher::new(registry, &signal, &clock).unwrap();

        io.transport.set(DeviceState::Configured);
        io.tick(&mut dispatcher);
        log.clear();

        // Re-selecting the active configuration is not a change.
        signal.notify(ReaderEmulation.config_number());
        for _ in 0..100 {
            assert_eq!(io.tick(&mut dispatcher), Tick::Ran(ReaderEmulation));
        }

        let calls = log.calls();
        assert_eq!(calls.len(), 100);
        assert!(calls.iter().all(|c| *c == Call::Run(ReaderEmulation)));
    }

    #[test]
    fn superseded_selections_are_never_visited() {
        let signal = ConfigurationSignal::new();
        let clock = ManualClock::new();
        let mut io = Io::new();
        let log = CallLog::new();
        let mut sniffer = Recorder::new(Sniffer, &log);
        let mut ccid = Recorder::new(ReaderEmulation, &log);
        let mut cardem = Recorder::new(CardEmulation, &log);
        let mut relay = Recorder::new(Relay, &log);

        let mut registry = Registry::new();
        registry.register(Sniffer, &mut sniffer).unwrap();
        registry.register(ReaderEmulation, &mut ccid).unwrap();
        registry.register(CardEmulation, &mut cardem).unwrap();
        registry.register(Relay, &mut relay).unwrap();
        let mut dispatcher = Dispatcher::new(registry, &signal, &clock).unwrap();

        io.transport.set(DeviceState::Configured);
        io.tick(&mut dispatcher);
        log.clear();

        signal.notify(ReaderEmulation.config_number());
        signal.notify(CardEmulation.config_number());
        signal.notify(Relay.config_number());

        assert_eq!(
            io.tick(&mut dispatcher),
            Tick::HandedOff {
                from: Sniffer,
                to: Relay
            }
        );
        assert_eq!(log.calls(), [Call::Exit(Sniffer), Call::Init(Relay)]);
    }

    #[test]
    fn link_flapping_only_affects_the_leds() {
        let signal = ConfigurationSignal::new();
        let clock = ManualClock::new();
        let mut io = Io::new();
        let log = CallLog::new();
        let mut sniffer = Recorder::new(Sniffer, &log);
        let mut cardem = Recorder::new(CardEmulation, &log);

        let mut registry = Registry::new();
        registry.register(Sniffer, &mut sniffer).unwrap();
        registry.register(CardEmulation, &mut cardem).unwrap();
        let mut dispatcher = Dispatcher::new(registry, &signal, &clock).unwrap();

        io.transport.set(DeviceState::Configured);
        io.tick(&mut dispatcher);
        log.clear();
        let writes_before = io.indicator.writes;

        for _ in 0..5 {
            io.transport.set(DeviceState::Disabled);
            assert_eq!(io.tick(&mut dispatcher), Tick::Ran(Sniffer));
            assert!(io.indicator.alert);
            assert!(!io.indicator.ready);
            assert_eq!(dispatcher.link_state(), LinkState::Disconnected);

            io.transport.set(DeviceState::Configured);
            assert_eq!(io.tick(&mut dispatcher), Tick::Ran(Sniffer));
            assert!(!io.indicator.alert);
            assert!(io.indicator.ready);
        }

        // Losing the link long after bring-up isn't a bring-up timeout.
        io.transport.set(DeviceState::Suspended);
        clock.advance(Duration::from_secs(60));
        assert_eq!(io.tick(&mut dispatcher), Tick::Ran(Sniffer));

        assert!(log.calls().iter().all(|c| *c == Call::Run(Sniffer)));
        // Two LED writes per edge, 11 edges.
        assert_eq!(io.indicator.writes - writes_before, 22);
        assert_eq!(io.board.restarts, 0);
    }

    // Scenario C - the link never comes up.
    #[test]
    fn bring_up_timeout_restarts_once() {
        let signal = ConfigurationSignal::new();
        let clock = ManualClock::new();
        let mut io = Io::new();
        let log = CallLog::new();
        let mut sniffer = Recorder::new(Sniffer, &log);

        let mut registry = Registry::new();
        registry.register(Sniffer, &mut sniffer).unwrap();
        let mut dispatcher = Dispatcher::new(registry, &signal, &clock).unwrap();

        signal.notify(Sniffer.config_number());
        for _ in 0..10 {
            assert_eq!(io.tick(&mut dispatcher), Tick::AwaitingLink);
            clock.advance(Duration::from_millis(99));
        }
        assert_eq!(io.board.restarts, 0);

        clock.advance(Duration::from_millis(10));
        assert_eq!(io.tick(&mut dispatcher), Tick::Fatal(Error::BringUpTimeout));
        assert_eq!(io.board.restarts, 1);
        assert_eq!(dispatcher.state(), State::Halted);

        // Even if the link now comes up, nothing more happens.
        io.transport.set(DeviceState::Configured);
        for _ in 0..5 {
            assert_eq!(io.tick(&mut dispatcher), Tick::Halted);
        }
        assert_eq!(io.board.restarts, 1);
        assert!(log.calls().is_empty());
    }

    #[test]
    fn bring_up_timeout_is_configurable() {
        let signal = ConfigurationSignal::new();
        let clock = ManualClock::new();
        let mut io = Io::new();
        let log = CallLog::new();
        let mut sniffer = Recorder::new(Sniffer, &log);

        let mut registry = Registry::new();
        registry.register(Sniffer, &mut sniffer).unwrap();
        let mut dispatcher = Dispatcher::new(registry, &signal, &clock)
            .unwrap()
            .with_bringup_timeout(Duration::from_secs(3));

        assert_eq!(io.tick(&mut dispatcher), Tick::AwaitingLink);
        clock.advance(Duration::from_millis(2999));
        assert_eq!(io.tick(&mut dispatcher), Tick::AwaitingLink);

        io.transport.set(DeviceState::Configured);
        assert_eq!(io.tick(&mut dispatcher), Tick::Started(Sniffer));
        assert_eq!(io.board.restarts, 0);
    }

    // Scenario D - the host selects a configuration with no personality.
    #[test]
    fn unknown_selection_while_active_is_fatal() {
        let signal = ConfigurationSignal::new();
        let clock = ManualClock::new();
        let mut io = Io::new();
        let log = CallLog::new();
        let mut sniffer = Recorder::new(Sniffer, &log);
        let mut cardem = Recorder::new(CardEmulation, &log);

        let mut registry = Registry::new();
        registry.register(Sniffer, &mut sniffer).unwrap();
        registry.register(CardEmulation, &mut cardem).unwrap();
        let mut dispatcher = Dispatcher::new(registry, &signal, &clock).unwrap();

        io.transport.set(DeviceState::Configured);
        io.tick(&mut dispatcher);
        io.tick(&mut dispatcher);
        log.clear();

        signal.notify(ReaderEmulation.config_number());
        assert_eq!(io.tick(&mut dispatcher), Tick::Fatal(Error::UnknownConfig(2)));
        assert_eq!(io.board.restarts, 1);
        assert_eq!(io.tick(&mut dispatcher), Tick::Halted);
        assert_eq!(io.board.restarts, 1);
        assert!(log.calls().is_empty());
        assert_eq!(dispatcher.active(), None);
    }

    #[test]
    fn unknown_selection_at_bring_up_is_fatal() {
        let signal = ConfigurationSignal::new();
        let clock = ManualClock::new();
        let mut io = Io::new();
        let log = CallLog::new();
        let mut sniffer = Recorder::new(Sniffer, &log);

        let mut registry = Registry::new();
        registry.register(Sniffer, &mut sniffer).unwrap();
        let mut dispatcher = Dispatcher::new(registry, &signal, &clock).unwrap();

        signal.notify(9);
        io.transport.set(DeviceState::Configured);
        assert_eq!(io.tick(&mut dispatcher), Tick::Fatal(Error::UnknownConfig(9)));
        assert_eq!(io.board.restarts, 1);
        assert!(
            !log.calls()
                .iter()
                .any(|c| matches!(c, Call::Init(_) | Call::Run(_)))
        );
    }

    #[test]
    fn empty_registry_is_rejected() {
        let signal = ConfigurationSignal::new();
        let clock = ManualClock::new();
        assert!(matches!(
            Dispatcher::new(Registry::new(), &signal, &clock),
            Err(Error::EmptyRegistry)
        ));
    }

    #[test]
    fn exactly_one_personality_active_across_any_selection_sequence() {
        let signal = ConfigurationSignal::new();
        let clock = ManualClock::new();
        let mut io = Io::new();
        let log = CallLog::new();
        let mut sniffer = Recorder::new(Sniffer, &log);
        let mut ccid = Recorder::new(ReaderEmulation, &log);
        let mut cardem = Recorder::new(CardEmulation, &log);
        let mut relay = Recorder::new(Relay, &log);

        let mut registry = Registry::new();
        registry.register(Sniffer, &mut sniffer).unwrap();
        registry.register(ReaderEmulation, &mut ccid).unwrap();
        registry.register(CardEmulation, &mut cardem).unwrap();
        registry.register(Relay, &mut relay).unwrap();
        let mut dispatcher = Dispatcher::new(registry, &signal, &clock).unwrap();

        io.transport.set(DeviceState::Configured);
        io.tick(&mut dispatcher);

        // Simple LCG, so the sequence is repeatable.
        let mut seed: u32 = 0x1234_5678;
        let mut handoffs = 0;
        for _ in 0..1000 {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let notifications = (seed >> 28) % 3;
            for n in 0..notifications {
                let config = ((seed >> (8 * n)) % 4) as u8 + 1;
                signal.notify(config);
            }

            let before = dispatcher.active();
            match io.tick(&mut dispatcher) {
                Tick::Ran(id) => assert_eq!(Some(id), before),
                Tick::HandedOff { from, to } => {
                    assert_eq!(Some(from), before);
                    assert_ne!(from, to);
                    handoffs += 1;
                }
                other => panic!("unexpected tick {other:?}"),
            }
            assert!(dispatcher.active().is_some());
        }

        assert!(handoffs > 0);
        assert_mutually_exclusive(&log.calls());
        assert_eq!(io.board.restarts, 0);
    }
}
