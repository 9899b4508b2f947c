//! Line-oriented console over the bulk endpoints
//!
//! The [`Console`] drains host input from the ring, and turns it into
//! [`Terminal`] events. Ordinary characters are echoed back as they
//! arrive. Backspace and carriage return are left to the terminal, which
//! decides what to print through a [`Writer`].

use crate::{bus::Bus, ring::Consumer};
use core::fmt;
use embedded_hal::delay::DelayNs;

const BACKSPACE: u8 = 0x08;
const CARRIAGE_RETURN: u8 = 0x0D;

/// Cursor left, blank, cursor left
pub const ERASE: &str = "\x1B[D \x1B[D";
pub const NEWLINE: &str = "\n\r";
pub const PROMPT: &str = "# ";
/// [`NEWLINE`] then [`PROMPT`], as one write
const NEWLINE_PROMPT: &str = "\n\r# ";

/// Idle delay between polls in [`Console::run`]
const IDLE_MS: u32 = 1;

/// Sends text to the host
///
/// Writes block until the bulk IN endpoint accepts all of the text. A
/// write fails if the host closed the port.
pub struct Writer<'a> {
    bus: &'a Bus,
}

impl<'a> Writer<'a> {
    pub fn new(bus: &'a Bus) -> Self {
        Writer { bus }
    }
}

impl fmt::Write for Writer<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.bus.write(s.as_bytes()).map_err(|_| fmt::Error)
    }
}

/// Console events
///
/// All output methods write through `out`. Input characters have already
/// been echoed when [`input`](Terminal::input) is called.
pub trait Terminal {
    /// The host raised DTR
    ///
    /// The default prints [`PROMPT`].
    fn connected(&mut self, out: &mut Writer<'_>) -> fmt::Result {
        fmt::Write::write_str(out, PROMPT)
    }

    /// A character that isn't backspace or carriage return
    fn input(&mut self, byte: u8);

    /// The default erases the last character on the host's screen.
    fn backspace(&mut self, out: &mut Writer<'_>) -> fmt::Result {
        fmt::Write::write_str(out, ERASE)
    }

    /// The default starts a new line, and prompts.
    fn enter(&mut self, out: &mut Writer<'_>) -> fmt::Result {
        fmt::Write::write_str(out, NEWLINE_PROMPT)
    }
}

/// Runs a [`Terminal`] from the main loop
pub struct Console<'a> {
    bus: &'a Bus,
    input: Consumer<'a>,
}

impl<'a> Console<'a> {
    /// `input` is the consumer of the ring that the driver's producer fills
    pub fn new(bus: &'a Bus, input: Consumer<'a>) -> Self {
        Console { bus, input }
    }

    /// Handle one pending event
    ///
    /// A prompt request goes first. Otherwise, handle at most one input
    /// byte. Returns `false` if there was nothing to do.
    pub fn poll(&mut self, terminal: &mut impl Terminal) -> bool {
        let mut out = Writer::new(self.bus);

        if self.bus.take_prompt_request() {
            if terminal.connected(&mut out).is_err() {
                warn!("Prompt dropped");
            }
            return true;
        }

        let Some(byte) = self.input.pop() else {
            return false;
        };
        let result = match byte {
            BACKSPACE => terminal.backspace(&mut out),
            CARRIAGE_RETURN => terminal.enter(&mut out),
            byte => {
                terminal.input(byte);
                self.bus.write(&[byte]).map_err(|_| fmt::Error)
            }
        };
        if result.is_err() {
            warn!("Output dropped for {=u8:#x}", byte);
        }
        true
    }

    /// Poll forever, pausing when idle
    pub fn run(mut self, terminal: &mut impl Terminal, delay: &mut impl DelayNs) -> ! {
        loop {
            if !self.poll(terminal) {
                delay.delay_ms(IDLE_MS);
            }
        }
    }
}
