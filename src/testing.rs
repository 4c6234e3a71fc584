//! Test doubles for the dispatch core's collaborators.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::vec::Vec;

use embassy_time::{Duration, Instant};
use embedded_hal::digital::{ErrorKind, ErrorType, OutputPin};

use crate::dispatcher::{Board, Clock};
use crate::indicator::Indicator;
use crate::link::{DeviceState, Transport};
use crate::personality::{Personality, PersonalityId};

/// A personality lifecycle call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Configure(PersonalityId),
    Init(PersonalityId),
    Exit(PersonalityId),
    Run(PersonalityId),
}

/// Records lifecycle calls from any number of personalities, in order.
pub struct CallLog {
    calls: RefCell<Vec<Call>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self {
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn clear(&self) {
        self.calls.borrow_mut().clear();
    }

    fn push(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }
}

/// A personality which only records its lifecycle calls.
pub struct Recorder<'l> {
    id: PersonalityId,
    log: &'l CallLog,
}

impl<'l> Recorder<'l> {
    pub fn new(id: PersonalityId, log: &'l CallLog) -> Self {
        Self { id, log }
    }
}

impl Personality for Recorder<'_> {
    fn configure(&mut self) {
        self.log.push(Call::Configure(self.id));
    }

    fn init(&mut self) {
        self.log.push(Call::Init(self.id));
    }

    fn exit(&mut self) {
        self.log.push(Call::Exit(self.id));
    }

    fn run(&mut self) {
        self.log.push(Call::Run(self.id));
    }
}

/// Replays a call log, checking no personality is ever initialized while
/// another is active, that only the active personality is run or exited,
/// and that every configure precedes the first init.
pub fn assert_mutually_exclusive(calls: &[Call]) {
    let mut active: Option<PersonalityId> = None;
    let mut started = false;

    for (i, call) in calls.iter().enumerate() {
        match *call {
            Call::Configure(id) => {
                assert!(!started, "call {i}: configure({id:?}) after first init");
            }
            Call::Init(id) => {
                assert_eq!(active, None, "call {i}: init({id:?}) while another active");
                active = Some(id);
                started = true;
            }
            Call::Exit(id) => {
                assert_eq!(active, Some(id), "call {i}: exit({id:?}) when not active");
                active = None;
            }
            Call::Run(id) => {
                assert_eq!(active, Some(id), "call {i}: run({id:?}) when not active");
            }
        }
    }
}

/// A clock which only moves when told to.
pub struct ManualClock {
    now: Cell<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Cell::new(Instant::from_millis(0)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }
}

/// A transport whose state the test sets directly.
pub struct ScriptedTransport {
    state: Cell<DeviceState>,
}

impl ScriptedTransport {
    pub fn new(state: DeviceState) -> Self {
        Self {
            state: Cell::new(state),
        }
    }

    pub fn set(&self, state: DeviceState) {
        self.state.set(state);
    }
}

impl Transport for ScriptedTransport {
    fn query_link_state(&self) -> DeviceState {
        self.state.get()
    }
}

/// Records the LED states.  Starts as a real indicator does - alert on.
pub struct RecordingIndicator {
    pub alert: bool,
    pub ready: bool,
    pub writes: usize,
}

impl RecordingIndicator {
    pub fn new() -> Self {
        Self {
            alert: true,
            ready: false,
            writes: 0,
        }
    }
}

impl Indicator for RecordingIndicator {
    fn set_alert(&mut self, on: bool) {
        self.alert = on;
        self.writes += 1;
    }

    fn set_ready(&mut self, on: bool) {
        self.ready = on;
        self.writes += 1;
    }
}

/// Counts restart requests.
pub struct RecordingBoard {
    pub restarts: usize,
}

impl RecordingBoard {
    pub fn new() -> Self {
        Self { restarts: 0 }
    }
}

impl Board for RecordingBoard {
    fn restart(&mut self) {
        self.restarts += 1;
    }
}

#[derive(Debug)]
pub struct MockPinError;

impl embedded_hal::digital::Error for MockPinError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// An output pin whose level can be inspected through any clone of it.
/// A failing pin rejects every write.
#[derive(Clone)]
pub struct MockPin {
    high: Rc<Cell<bool>>,
    fail: bool,
}

impl MockPin {
    pub fn new() -> Self {
        Self {
            high: Rc::new(Cell::new(false)),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn is_high(&self) -> bool {
        self.high.get()
    }

    fn drive(&mut self, high: bool) -> Result<(), MockPinError> {
        if self.fail {
            return Err(MockPinError);
        }
        self.high.set(high);
        Ok(())
    }
}

impl ErrorType for MockPin {
    type Error = MockPinError;
}

impl OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.drive(false)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.drive(true)
    }
}
