//! Sharing the driver between the interrupt handler and the main loop

use crate::{
    driver::{DeviceState, Driver},
    vendor::{LineSettings, UartState},
};
use core::cell::RefCell;
use critical_section::Mutex;
use embedded_hal::delay::DelayNs;
use usb_device::UsbError;

/// Polls that [`Bus::wait_for_configuration`] callers typically allow
///
/// With [`POLL_MS`], that's five seconds.
pub const ENUMERATION_POLLS: u32 = 500;
/// Delay between configuration polls
pub const POLL_MS: u32 = 10;

/// The USB interrupt on STM32F103 parts
///
/// Shared with CAN1 RX0.
#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum Interrupt {
    USB_LP_CAN1_RX0 = 20,
}

// Safety: 20 is the USB low priority interrupt's position in the vector table.
unsafe impl cortex_m::interrupt::InterruptNumber for Interrupt {
    fn number(self) -> u16 {
        self as u16
    }
}

/// A [`Driver`] shared with an interrupt handler
///
/// Allocate the `Bus` in a `static`, and [`install`](Bus::install) an
/// initialized driver before unmasking the USB interrupt.
///
/// # Example
///
/// ```no_run
/// use cp210x_usbd::{Bus, Driver, Peripherals, RingBuffer};
///
/// struct Usb;
///
/// unsafe impl Peripherals for Usb {
///     fn usb(&self) -> *const () {
///         0x4000_5C00 as *const ()
///     }
///     fn packet_memory(&self) -> *const () {
///         0x4000_6000 as *const ()
///     }
/// }
///
/// static INPUT: RingBuffer<256> = RingBuffer::new();
/// static BUS: Bus = Bus::new();
///
/// // In the USB_LP_CAN1_RX0 handler:
/// fn usb_interrupt() {
///     BUS.on_interrupt();
/// }
///
/// let (producer, consumer) = INPUT.split().unwrap();
/// let mut driver = Driver::new(Usb, producer);
/// driver.initialize();
/// BUS.install(driver);
/// unsafe { Bus::unmask_interrupt() };
/// # let _ = consumer;
/// ```
pub struct Bus {
    driver: Mutex<RefCell<Option<Driver>>>,
}

impl Bus {
    pub const fn new() -> Self {
        Bus {
            driver: Mutex::new(RefCell::new(None)),
        }
    }

    /// Take ownership of `driver`, dropping any driver installed before
    pub fn install(&self, driver: Driver) {
        critical_section::with(|cs| {
            self.driver.borrow(cs).replace(Some(driver));
        });
    }

    /// Interrupt-safe, immutable access to the driver
    fn with_driver<R>(&self, func: impl FnOnce(&Driver) -> R) -> Option<R> {
        critical_section::with(|cs| {
            let driver = self.driver.borrow(cs);
            let driver = driver.borrow();
            driver.as_ref().map(func)
        })
    }

    /// Interrupt-safe, mutable access to the driver
    fn with_driver_mut<R>(&self, func: impl FnOnce(&mut Driver) -> R) -> Option<R> {
        critical_section::with(|cs| {
            let driver = self.driver.borrow(cs);
            let mut driver = driver.borrow_mut();
            driver.as_mut().map(func)
        })
    }

    /// Unmask the USB interrupt in the NVIC
    ///
    /// # Safety
    ///
    /// This may break mask-based critical sections. Install the driver first.
    pub unsafe fn unmask_interrupt() {
        cortex_m::peripheral::NVIC::unmask(Interrupt::USB_LP_CAN1_RX0);
    }

    /// Call this from the USB interrupt handler
    ///
    /// Does nothing if there's no driver.
    pub fn on_interrupt(&self) {
        self.with_driver_mut(Driver::on_interrupt);
    }

    pub fn state(&self) -> DeviceState {
        self.with_driver(Driver::state).unwrap_or(DeviceState::Boot)
    }

    pub fn uart_state(&self) -> UartState {
        self.with_driver(Driver::uart_state)
            .unwrap_or(UartState::Disabled)
    }

    pub fn line_settings(&self) -> LineSettings {
        self.with_driver(Driver::line_settings).unwrap_or_default()
    }

    pub fn is_transmitting(&self) -> bool {
        self.with_driver(Driver::is_transmitting).unwrap_or(false)
    }

    /// See [`Driver::take_prompt_request`]
    pub fn take_prompt_request(&self) -> bool {
        self.with_driver_mut(Driver::take_prompt_request)
            .unwrap_or(false)
    }

    /// Send all of `data` to the host, blocking until the last transfer starts
    ///
    /// Each transfer waits for the previous one to complete. There's no
    /// timeout; if the host stops reading, this never returns.
    ///
    /// A transfer carries at most [`TRANSMIT_CAPACITY`](crate::TRANSMIT_CAPACITY)
    /// bytes. Longer `data` goes out as several transfers, so
    /// [`is_transmitting`](Bus::is_transmitting) drops to `false` between them.
    ///
    /// # Errors
    ///
    /// `InvalidState` if there's no driver, if the device isn't configured,
    /// or if the host hasn't enabled the UART. Data accepted before the
    /// error was already sent.
    pub fn write(&self, mut data: &[u8]) -> usb_device::Result<()> {
        while !data.is_empty() {
            match self.with_driver_mut(|driver| driver.bulk_write(data)) {
                Some(Ok(accepted)) => data = &data[accepted..],
                Some(Err(UsbError::WouldBlock)) => core::hint::spin_loop(),
                Some(Err(err)) => return Err(err),
                None => return Err(UsbError::InvalidState),
            }
        }
        Ok(())
    }

    /// Poll the device state until the host configures the device
    ///
    /// Checks up to `polls` times, [`POLL_MS`] apart. Returns `true` once
    /// configured, or `false` if the polls run out.
    pub fn wait_for_configuration(&self, delay: &mut impl DelayNs, polls: u32) -> bool {
        for _ in 0..polls {
            if self.state() == DeviceState::Configured {
                info!("CONFIGURED");
                return true;
            }
            delay.delay_ms(POLL_MS);
        }
        let configured = self.state() == DeviceState::Configured;
        if !configured {
            warn!("Not configured after {} polls", polls);
        }
        configured
    }
}
