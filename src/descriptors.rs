//! Descriptors that present the device as a CP2102
//!
//! The device and configuration descriptors are the byte-for-byte wire
//! contract with the host. Host drivers bind on the vendor and product
//! IDs, and on the single vendor-specific interface with one bulk IN and
//! one bulk OUT endpoint.

use crate::MAX_PACKET_SIZE;
use usb_device::descriptor::descriptor_type;

/// Silicon Labs
pub const VENDOR_ID: u16 = 0x10c4;
/// CP210x UART bridge
pub const PRODUCT_ID: u16 = 0xea60;

/// The one configuration value
pub const CONFIGURATION_VALUE: u8 = 1;

/// Bulk endpoint addresses
pub const BULK_IN_ADDRESS: u8 = 0x81;
pub const BULK_OUT_ADDRESS: u8 = 0x01;

/// Not in `usb-device`'s table
pub const DEVICE_QUALIFIER: u8 = 6;

const LANGUAGE_EN_US: u16 = 0x0409;

/// Longest string that fits the encoding buffer
pub const MAX_STRING_LEN: usize = 31;

const VID: [u8; 2] = VENDOR_ID.to_le_bytes();
const PID: [u8; 2] = PRODUCT_ID.to_le_bytes();

pub const DEVICE: [u8; 18] = [
    18,                      // bLength
    descriptor_type::DEVICE, // bDescriptorType
    0x00,                    // bcdUSB 2.00
    0x02,
    0x00, // bDeviceClass: per interface
    0x00, // bDeviceSubClass
    0x00, // bDeviceProtocol
    MAX_PACKET_SIZE as u8,
    VID[0],
    VID[1],
    PID[0],
    PID[1],
    0x00, // bcdDevice 1.00
    0x01,
    1, // iManufacturer
    2, // iProduct
    3, // iSerialNumber
    1, // bNumConfigurations
];

pub const CONFIGURATION: [u8; 32] = [
    9,
    descriptor_type::CONFIGURATION,
    32, // wTotalLength
    0,
    1, // bNumInterfaces
    CONFIGURATION_VALUE,
    0,    // iConfiguration
    0xC0, // bmAttributes: self powered
    50,   // bMaxPower: 100 mA
    // Interface
    9,
    descriptor_type::INTERFACE,
    0,    // bInterfaceNumber
    0,    // bAlternateSetting
    2,    // bNumEndpoints
    0xFF, // bInterfaceClass: vendor specific
    0x00,
    0x00,
    2, // iInterface
    // Bulk IN
    7,
    descriptor_type::ENDPOINT,
    BULK_IN_ADDRESS,
    0x02, // bulk
    MAX_PACKET_SIZE as u8,
    0,
    0, // bInterval
    // Bulk OUT
    7,
    descriptor_type::ENDPOINT,
    BULK_OUT_ADDRESS,
    0x02,
    MAX_PACKET_SIZE as u8,
    0,
    0,
];

pub const LANGUAGES: [u8; 4] = [
    4,
    descriptor_type::STRING,
    LANGUAGE_EN_US.to_le_bytes()[0],
    LANGUAGE_EN_US.to_le_bytes()[1],
];

/// Strings that the host shows for the device
///
/// Each string is sent as one UTF-16 code unit per byte, so keep them
/// ASCII and no longer than [`MAX_STRING_LEN`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Identity {
    pub manufacturer: &'static str,
    pub product: &'static str,
    pub serial_number: &'static str,
}

impl Identity {
    pub const DEFAULT: Identity = Identity {
        manufacturer: "ACME computers",
        product: "Basic console port",
        serial_number: "1234",
    };

    fn string(&self, index: u8) -> &'static str {
        match index {
            1 => self.manufacturer,
            2 => self.product,
            3 => self.serial_number,
            _ => panic!("No string descriptor at index {}", index),
        }
    }
}

impl Default for Identity {
    fn default() -> Self {
        Identity::DEFAULT
    }
}

/// A descriptor lookup result
#[derive(Debug, PartialEq, Eq)]
pub enum Descriptor<'a> {
    Bytes(&'a [u8]),
    /// Answered with a zero length packet
    Empty,
}

/// Descriptor lookup, with a buffer for encoding strings
pub struct Catalog {
    identity: Identity,
    scratch: [u8; 2 + 2 * MAX_STRING_LEN],
}

impl Catalog {
    pub const fn new(identity: Identity) -> Self {
        Catalog {
            identity,
            scratch: [0; 2 + 2 * MAX_STRING_LEN],
        }
    }

    pub fn set_identity(&mut self, identity: Identity) {
        self.identity = identity;
    }

    /// Look up descriptor `kind` at `index`
    ///
    /// Returns `None` for descriptors that the device doesn't have.
    ///
    /// # Panics
    ///
    /// Panics if a string index is beyond the serial number, or if the
    /// string is longer than [`MAX_STRING_LEN`].
    pub fn descriptor(&mut self, kind: u8, index: u8) -> Option<Descriptor<'_>> {
        match kind {
            descriptor_type::DEVICE => Some(Descriptor::Bytes(&DEVICE)),
            descriptor_type::CONFIGURATION => Some(Descriptor::Bytes(&CONFIGURATION)),
            descriptor_type::STRING if index == 0 => Some(Descriptor::Bytes(&LANGUAGES)),
            descriptor_type::STRING => {
                let string = self.identity.string(index);
                Some(Descriptor::Bytes(self.encode(string)))
            }
            DEVICE_QUALIFIER => Some(Descriptor::Empty),
            _ => None,
        }
    }

    /// Encode `string` as a string descriptor
    fn encode(&mut self, string: &str) -> &[u8] {
        let bytes = string.as_bytes();
        if bytes.len() > MAX_STRING_LEN {
            panic!(
                "String descriptor is {} bytes, limit is {}",
                bytes.len(),
                MAX_STRING_LEN
            );
        }
        let len = 2 + 2 * bytes.len();
        self.scratch[0] = len as u8;
        self.scratch[1] = descriptor_type::STRING;
        for (unit, byte) in self.scratch[2..len].chunks_exact_mut(2).zip(bytes) {
            unit.copy_from_slice(&u16::from(*byte).to_le_bytes());
        }
        &self.scratch[..len]
    }
}
