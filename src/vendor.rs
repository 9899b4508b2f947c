//! CP210x vendor requests
//!
//! Host drivers configure a CP210x through vendor requests on the
//! interface. The emulator answers enough of them for the host to open
//! the port. Line settings are recorded but never enacted; there's no
//! physical UART behind the bulk endpoints.

use crate::{endpoint::Endpoint, setup::tag, setup::SetupPacket};

/// Request types
const HOST_TO_INTERFACE: u8 = 0x41;
const INTERFACE_TO_HOST: u8 = 0xC1;
const DEVICE_TO_HOST: u8 = 0xC0;

/// CP210x request codes
pub mod request {
    pub const IFC_ENABLE: u8 = 0x00;
    pub const SET_LINE_CTL: u8 = 0x03;
    pub const GET_LINE_CTL: u8 = 0x04;
    pub const SET_MHS: u8 = 0x07;
    pub const GET_MDMSTS: u8 = 0x08;
    pub const GET_COMM_STATUS: u8 = 0x10;
    pub const GET_FLOW: u8 = 0x14;
    pub const SET_CHARS: u8 = 0x19;
    pub const GET_BAUDRATE: u8 = 0x1D;
    pub const SET_BAUDRATE: u8 = 0x1E;
    pub const VENDOR_SPECIFIC: u8 = 0xFF;
}

const ENABLE: u16 = tag(HOST_TO_INTERFACE, request::IFC_ENABLE);
const SET_LINE_CTL: u16 = tag(HOST_TO_INTERFACE, request::SET_LINE_CTL);
const GET_LINE_CTL: u16 = tag(INTERFACE_TO_HOST, request::GET_LINE_CTL);
const SET_MODEM_CONTROL: u16 = tag(HOST_TO_INTERFACE, request::SET_MHS);
const GET_MODEM_STATUS: u16 = tag(INTERFACE_TO_HOST, request::GET_MDMSTS);
const GET_COMM_STATUS: u16 = tag(INTERFACE_TO_HOST, request::GET_COMM_STATUS);
const GET_FLOW: u16 = tag(INTERFACE_TO_HOST, request::GET_FLOW);
const SET_CHARS: u16 = tag(HOST_TO_INTERFACE, request::SET_CHARS);
const GET_BAUDRATE: u16 = tag(INTERFACE_TO_HOST, request::GET_BAUDRATE);
const SET_BAUDRATE: u16 = tag(HOST_TO_INTERFACE, request::SET_BAUDRATE);
const PART_NUMBER: u16 = tag(DEVICE_TO_HOST, request::VENDOR_SPECIFIC);

/// Reported by the part number query
pub const CP2102: u8 = 0x02;

/// SET_MHS value bit that raises DTR
const DTR: u16 = 1 << 0;

/// Status replies. Enough for host sanity checks.
const DUMMY_STATUS: [u8; 2] = [0; 2];

/// Whether the emulated UART is enabled
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum UartState {
    Disabled,
    Enabled,
}

/// The data stage that the last SETUP announced
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum VendorControl {
    None,
    /// SET_BAUDRATE, four bytes
    AwaitingBaudPayload,
    /// SET_CHARS, the six special characters of the line coding
    AwaitingLineCodingPayload,
}

/// Line settings that the host asked for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineSettings {
    baud_rate: [u8; 4],
    line_control: [u8; 2],
    special_chars: [u8; 6],
}

impl LineSettings {
    /// 9600 baud, 8N1
    pub const DEFAULT: LineSettings = LineSettings {
        baud_rate: 9600u32.to_le_bytes(),
        line_control: 0x0800u16.to_le_bytes(),
        special_chars: [0; 6],
    };

    pub fn baud_rate(&self) -> u32 {
        u32::from_le_bytes(self.baud_rate)
    }

    /// Stop bits in 3:0, parity in 7:4, word length in 15:8
    pub fn line_control(&self) -> u16 {
        u16::from_le_bytes(self.line_control)
    }

    /// EOF, error, break, event, XON and XOFF characters
    pub fn special_chars(&self) -> [u8; 6] {
        self.special_chars
    }
}

impl Default for LineSettings {
    fn default() -> Self {
        LineSettings::DEFAULT
    }
}

/// CP210x vendor request state
pub struct Emulator {
    uart: UartState,
    control: VendorControl,
    settings: LineSettings,
    prompt_pending: bool,
}

impl Emulator {
    pub const fn new() -> Self {
        Emulator {
            uart: UartState::Disabled,
            control: VendorControl::None,
            settings: LineSettings::DEFAULT,
            prompt_pending: false,
        }
    }

    pub fn uart(&self) -> UartState {
        self.uart
    }

    pub fn control(&self) -> VendorControl {
        self.control
    }

    pub fn settings(&self) -> &LineSettings {
        &self.settings
    }

    pub fn prompt_pending(&self) -> bool {
        self.prompt_pending
    }

    /// Consume the one-shot prompt request
    pub fn take_prompt(&mut self) -> bool {
        core::mem::replace(&mut self.prompt_pending, false)
    }

    /// Forget any announced data stage
    pub fn clear_control(&mut self) {
        self.control = VendorControl::None;
    }

    /// Stage the reply for a vendor SETUP into `control`
    ///
    /// Returns `false` if the request isn't one of ours. Nothing is staged
    /// in that case.
    pub fn setup(&mut self, setup: &SetupPacket, control: &mut Endpoint) -> bool {
        match setup.tag() {
            ENABLE => {
                self.uart = if setup.value & 1 != 0 {
                    UartState::Enabled
                } else {
                    UartState::Disabled
                };
                info!("UART {}", self.uart);
                control.stage(&[]);
            }
            SET_BAUDRATE => {
                self.control = VendorControl::AwaitingBaudPayload;
                control.stage(&[]);
            }
            SET_CHARS => {
                self.control = VendorControl::AwaitingLineCodingPayload;
                control.stage(&[]);
            }
            SET_LINE_CTL => {
                self.settings.line_control = setup.value.to_le_bytes();
                control.stage(&[]);
            }
            SET_MODEM_CONTROL => {
                if setup.value & DTR != 0 {
                    self.prompt_pending = true;
                }
                control.stage(&[]);
            }
            GET_FLOW | GET_MODEM_STATUS | GET_COMM_STATUS => {
                control.stage(&DUMMY_STATUS);
            }
            GET_BAUDRATE => {
                control.stage(&self.settings.baud_rate);
            }
            GET_LINE_CTL => {
                control.stage(&self.settings.line_control);
            }
            PART_NUMBER => {
                control.stage(&[CP2102]);
            }
            _ => return false,
        }
        true
    }

    /// Capture a control OUT data stage
    ///
    /// Returns `false` if no data stage was announced.
    pub fn data(&mut self, data: &[u8]) -> bool {
        let target: &mut [u8] = match self.control {
            VendorControl::None => return false,
            VendorControl::AwaitingBaudPayload => &mut self.settings.baud_rate,
            VendorControl::AwaitingLineCodingPayload => &mut self.settings.special_chars,
        };
        let len = data.len().min(target.len());
        target[..len].copy_from_slice(&data[..len]);
        self.control = VendorControl::None;
        true
    }
}
