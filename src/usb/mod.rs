//! Handles creation of the embassy USB stack.
//!
//! The device exposes a single vendor interface.  That interface has one
//! alternate setting for each USB configuration number, 0 to
//! [`MAX_CONFIG_NUMBER`], and the host selects a personality by selecting
//! the corresponding alternate setting.  Alternate setting 0 is the default
//! after the device is configured, and means no personality has been
//! selected.
//!
//! An alternate setting exists for every configuration number, whether or
//! not that personality is compiled in.  Selecting one which isn't is a
//! deployment error, which the dispatcher treats as fatal.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

pub(crate) mod control;

use embassy_rp::bind_interrupts;
use embassy_rp::peripherals::USB;
use embassy_rp::usb::{Driver as RpUsbDriver, InterruptHandler};
use embassy_usb::{Builder, Config, UsbDevice};
use static_cell::{ConstStaticCell, StaticCell};

use control::Control;

use crate::constants::{
    MANUFACTURER, MAX_CONFIG_NUMBER, MAX_PACKET_SIZE_0, PRODUCT, PRODUCT_ID, USB_CLASS,
    USB_POWER_MA, USB_PROTOCOL, USB_SUB_CLASS, VENDOR_ID,
};
use crate::link::UsbStateCell;
use crate::signal::ConfigurationSignal;

// Bind the hardware USB interrupt to the USB stack.  Interrupts are the
// primary mechanism the USB stack uses to receive data from hardware.
bind_interrupts!(struct Irqs {
    USBCTRL_IRQ => InterruptHandler<USB>;
});

/// The host's most recent personality selection.  Written by the Control
/// handler on core 0, read by the dispatcher on core 1.
pub static CONFIG_SIGNAL: ConfigurationSignal = ConfigurationSignal::new();

/// The USB device state, as seen by the Control handler's lifecycle
/// callbacks.  Polled by the dispatcher.
pub static USB_STATE: UsbStateCell = UsbStateCell::new();

// The USB_DEVICE is stored as a static to allow us to spawn a task using the
// USB runner.  StaticCell::init() returns a mutable reference to it, which
// we pass into the usb_task().
static USB_DEVICE: StaticCell<UsbDevice<'static, RpUsbDriver<'static, USB>>> = StaticCell::new();

// The following statics are used to store the USB descriptor buffers and
// control buffer.  We store them as statics to avoid lifetime issues when
// creating the USB builder.
//
// The ownership of these is passed to the USB builder.
static CONFIG_DESC: ConstStaticCell<[u8; 256]> = ConstStaticCell::new([0; 256]);
static BOS_DESC: ConstStaticCell<[u8; 256]> = ConstStaticCell::new([0; 256]);
static MSOS_DESC: ConstStaticCell<[u8; 256]> = ConstStaticCell::new([0; 256]);
static CONTROL_BUF: ConstStaticCell<[u8; 64]> = ConstStaticCell::new([0; 64]);

/// Used to create the embassy USB stack.
pub struct UsbStack {}

impl UsbStack {
    /// Creates the USB stack.
    ///
    /// # Arguments
    /// - `usb` - The USB peripheral
    /// - `serial` - This device's USB serial number
    pub fn create_static(
        p_usb: USB,
        serial: &'static str,
    ) -> &'static mut UsbDevice<'static, RpUsbDriver<'static, USB>> {
        // Create a new USB device
        let driver = RpUsbDriver::new(p_usb, Irqs);

        // Set up the USB device descriptor.
        let mut config = Config::new(VENDOR_ID, PRODUCT_ID);
        config.manufacturer = Some(MANUFACTURER);
        config.product = Some(PRODUCT);
        config.serial_number = Some(serial);
        config.max_power = USB_POWER_MA;
        config.max_packet_size_0 = MAX_PACKET_SIZE_0;

        // Set the device class, subclass, and protocol.
        config.device_class = USB_CLASS;
        config.device_sub_class = USB_SUB_CLASS;
        config.device_protocol = USB_PROTOCOL;

        // The default is composite with IADs, which gives use device class
        // code 0xEF, with is a miscellaneous device.
        config.composite_with_iads = false;

        // Create a USB builder giving it our Static descriptors and control
        // buffer.
        let mut builder = Builder::new(
            driver,
            config,
            CONFIG_DESC.take(),
            BOS_DESC.take(),
            MSOS_DESC.take(),
            CONTROL_BUF.take(),
        );

        // Set up the function and interface for the Vendor class, with one
        // alternate setting per configuration number.  Alternate settings are
        // numbered in the order they are created.  The personalities own
        // their endpoints, so none are declared here.
        let mut func = builder.function(USB_CLASS, USB_SUB_CLASS, USB_PROTOCOL);
        let mut interface = func.interface();
        let if_num = interface.interface_number();
        for _ in 0..=MAX_CONFIG_NUMBER {
            let _alt = interface.alt_setting(USB_CLASS, USB_SUB_CLASS, USB_PROTOCOL, None);
        }

        // Drop func, to allow us to use the builder again.  Otherwise builder is
        // already borrowed mutably by func.
        drop(func);

        // Create a handler for USB events and set it using builder.  We make
        // it static to avoid lifetime issues.
        let handler = Control::create_static(if_num);
        builder.handler(handler);

        // Build the UsbDevice and store it as a Static so we can spawn a task
        // with it.
        let usb = builder.build();
        USB_DEVICE.init(usb)
    }
}

// Method to run the USB stack.
#[embassy_executor::task]
pub async fn usb_task(usb: &'static mut UsbDevice<'static, RpUsbDriver<'static, USB>>) -> ! {
    let core = embassy_rp::pac::SIO.cpuid().read();
    info!("Core{}: USB task started", core);

    // Run the USB Device runner.  This loop is the internal implemenation of
    // usb.run().
    loop {
        // Run the USB stack until it suspends.  This is a blocking call and
        // is not safely cancellable.  If cancelled, disable() must be called
        // to fully reset the peripheral before calling any other methods.
        usb.run_until_suspend().await;

        // Cancel-safe
        usb.wait_resume().await;
    }
}
