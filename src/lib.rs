//! A USB device stack for STM32F1 processors that presents as a CP2102
//!
//! `cp210x-usbd` drives the STM32F103 USB full-speed device peripheral
//! directly. It enumerates as a Silicon Labs CP2102 USB-serial bridge, so
//! the host's stock CP210x driver opens it as a serial port. Bytes that
//! the host writes to the port land in a [`RingBuffer`]. Bytes that you
//! [`write`](Bus::write) go back to the host.
//!
//! To interface the library, you must define a safe implementation of
//! [`Peripherals`]. See the peripherals documentation for more information.
//!
//! The usual setup is
//!
//! 1. split a `static` [`RingBuffer`].
//! 2. create and [`initialize`](Driver::initialize) a [`Driver`] with the
//!    producer.
//! 3. [`install`](Bus::install) the driver in a `static` [`Bus`], and call
//!    [`Bus::on_interrupt`] from the USB interrupt handler.
//! 4. unmask the interrupt, [wait for the host](Bus::wait_for_configuration),
//!    then run a [`Console`] with the consumer.

#![no_std]

#[cfg(feature = "defmt-03")]
extern crate defmt_03 as defmt;

#[macro_use]
mod log;

mod buffer;
mod bus;
mod console;
mod descriptors;
mod driver;
mod endpoint;
mod ral;
mod register;
mod ring;
mod setup;
mod vcell;
mod vendor;

#[cfg(test)]
mod testing;

pub use bus::{Bus, Interrupt, ENUMERATION_POLLS, POLL_MS};
pub use console::{Console, Terminal, Writer, ERASE, NEWLINE, PROMPT};
pub use descriptors::{Identity, PRODUCT_ID, VENDOR_ID};
pub use driver::{DeviceState, Driver, UnhandledPolicy};
pub use endpoint::TRANSMIT_CAPACITY;
pub use ring::{Consumer, Producer, RingBuffer};
pub use setup::SetupPacket;
pub use vendor::{LineSettings, UartState, VendorControl};

/// Hardware endpoint registers
const ENDPOINT_COUNT: usize = 8;

/// Max packet size of every endpoint
pub const MAX_PACKET_SIZE: usize = 64;

/// A type that owns the USB peripheral
///
/// An implementation of `Peripherals` is expected to own
///
/// - the USB device registers
/// - the USB packet memory
///
/// # Safety
///
/// `Peripherals` should only be implemented on a type that
/// owns both blocks. The pointers returned by the methods are
/// assumed to be valid for the life of the program, and will
/// be cast to register definitions.
///
/// # Example
///
/// A safe implementation of `Peripherals` that works with the
/// `stm32f1` peripheral access crate. Assume that `pac` is
/// shorthand for `stm32f1::stm32f103`.
///
/// ```
/// # mod pac {
/// #   pub struct USB; impl USB { pub const PTR: *const () = 0x4000_5C00 as *const (); }
/// #   pub struct Peripherals { pub USB: USB }
/// #   impl Peripherals { pub fn take() -> Option<Self> { Some(Peripherals { USB: USB }) } }
/// # }
/// use cp210x_usbd::Peripherals;
///
/// /// Packet memory has no PAC block
/// const PACKET_MEMORY: *const () = 0x4000_6000 as *const ();
///
/// struct Usb {
///     _usb: pac::USB,
/// }
///
/// unsafe impl Peripherals for Usb {
///     fn usb(&self) -> *const () {
///         pac::USB::PTR
///     }
///     fn packet_memory(&self) -> *const () {
///         PACKET_MEMORY
///     }
/// }
///
/// let pac = pac::Peripherals::take().unwrap();
/// let usb = Usb { _usb: pac.USB };
/// assert_eq!(usb.usb(), 0x4000_5C00 as *const ());
/// ```
pub unsafe trait Peripherals {
    /// Returns the address of the USB device registers
    fn usb(&self) -> *const ();
    /// Returns the address of the USB packet memory
    fn packet_memory(&self) -> *const ();
}
