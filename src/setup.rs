//! Control SETUP packets

use usb_device::{control::RequestType, UsbDirection};

/// Bytes in a SETUP packet
pub const SETUP_LEN: usize = 8;

/// Forms a dispatch tag from a request type and request
///
/// Requests are routed on the tag, so the same request code can mean
/// different things under different request types.
pub const fn tag(request_type: u8, request: u8) -> u16 {
    ((request_type as u16) << 8) | request as u16
}

/// A parsed SETUP packet
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct SetupPacket {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    /// Parse the first eight bytes of `bytes`
    ///
    /// Returns `None` if there are fewer than eight bytes.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let bytes: &[u8; SETUP_LEN] = bytes.get(..SETUP_LEN)?.try_into().ok()?;
        Some(SetupPacket {
            request_type: bytes[0],
            request: bytes[1],
            value: u16::from_le_bytes([bytes[2], bytes[3]]),
            index: u16::from_le_bytes([bytes[4], bytes[5]]),
            length: u16::from_le_bytes([bytes[6], bytes[7]]),
        })
    }

    pub fn tag(&self) -> u16 {
        tag(self.request_type, self.request)
    }

    pub fn kind(&self) -> RequestType {
        match (self.request_type >> 5) & 0b11 {
            0 => RequestType::Standard,
            1 => RequestType::Class,
            2 => RequestType::Vendor,
            _ => RequestType::Reserved,
        }
    }

    pub fn direction(&self) -> UsbDirection {
        if self.request_type & 0x80 != 0 {
            UsbDirection::In
        } else {
            UsbDirection::Out
        }
    }

    /// The descriptor type and index of a GET_DESCRIPTOR request
    pub fn descriptor(&self) -> (u8, u8) {
        let [index, kind] = self.value.to_le_bytes();
        (kind, index)
    }
}
