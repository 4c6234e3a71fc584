//! Handles displaying the status of the device on the LEDs.
//!
//! There are two LEDs - alert (red) and ready (green).  Alert is lit from
//! power on until the host configures the device, at which point ready takes
//! over.  If the link drops they swap back.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embedded_hal::digital::OutputPin;

/// Two independent status outputs.  Purely side effecting.
pub trait Indicator {
    fn set_alert(&mut self, on: bool);
    fn set_ready(&mut self, on: bool);
}

/// An [`Indicator`] driving a pair of active high LEDs.
pub struct LedIndicator<A, R> {
    alert: A,
    ready: R,
}

impl<A: OutputPin, R: OutputPin> LedIndicator<A, R> {
    /// Creates the indicator, with the alert LED on and ready off, which is
    /// what we show until the USB link comes up.
    pub fn new(alert: A, ready: R) -> Self {
        let mut indicator = Self { alert, ready };
        indicator.set_alert(true);
        indicator.set_ready(false);
        indicator
    }
}

// LED errors are ignored - there's nothing useful we could do about them,
// and on the RP2040 setting a GPIO can't fail anyway.
fn drive<P: OutputPin>(pin: &mut P, on: bool) {
    let _ = if on { pin.set_high() } else { pin.set_low() };
}

impl<A: OutputPin, R: OutputPin> Indicator for LedIndicator<A, R> {
    fn set_alert(&mut self, on: bool) {
        drive(&mut self.alert, on);
    }

    fn set_ready(&mut self, on: bool) {
        drive(&mut self.ready, on);
    }
}
