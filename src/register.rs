//! Endpoint status transitions
//!
//! An endpoint register mixes three kinds of bits:
//!
//! - `CTR_RX` and `CTR_TX` are cleared by writing zero. Writing one leaves
//!   them alone.
//! - `DTOG_*` and `STAT_*` flip when written with one. Writing zero leaves
//!   them alone.
//! - `EP_TYPE`, `EP_KIND` and `EA` are plain read-write bits.
//!
//! A plain read-modify-write would flip every status bit that happened to
//! be set. [`next`] computes the value to write for a given intent from
//! the value that was read, and [`EndpointRegister`] is the thin wrapper
//! that reads, calls `next`, and writes.

use crate::ral::{
    self,
    endpoint::{self, EPR},
    usb,
};

/// What to do with an endpoint
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Clear `CTR_RX` and accept the next OUT or SETUP packet.
    ArmReceive,
    /// Clear `CTR_RX`. Both statuses are untouched.
    AckReceive,
    /// Clear `CTR_TX`. Both statuses are untouched.
    AckTransmit,
    /// Clear `CTR_TX` and send the prepared packet on the next IN token.
    ArmTransmit,
    /// Clear `CTR_TX` and NAK IN tokens.
    TransmitNak,
    /// STALL IN tokens. No completion flags are cleared.
    Stall,
    /// Clear `CTR_RX` and `CTR_TX` together. Both statuses are untouched.
    AckComplete,
}

/// The bits that are written back as they were read
const KEEP: u32 = EPR::EP_TYPE::mask | EPR::EP_KIND::mask | EPR::EA::mask;

const CTR_RX: u32 = EPR::CTR_RX::mask;
const CTR_TX: u32 = EPR::CTR_TX::mask;

/// Bits to write into a toggle field so that it lands on `status`
const fn toggle_to(current: u32, mask: u32, offset: u32, status: u32) -> u32 {
    (current & mask) ^ ((status << offset) & mask)
}

const fn receive_status(current: u32, status: u32) -> u32 {
    toggle_to(current, EPR::STAT_RX::mask, EPR::STAT_RX::offset, status)
}

const fn transmit_status(current: u32, status: u32) -> u32 {
    toggle_to(current, EPR::STAT_TX::mask, EPR::STAT_TX::offset, status)
}

/// Returns the value to write into an endpoint register that currently
/// reads `current`, so that the hardware performs `transition`
///
/// Data toggles are never flipped. The status field that isn't addressed
/// is written with zeros, so it holds its value.
pub const fn next(current: u32, transition: Transition) -> u32 {
    let keep = current & KEEP;
    match transition {
        Transition::ArmReceive => {
            keep | CTR_TX | receive_status(current, EPR::STAT_RX::RW::VALID)
        }
        Transition::AckReceive => keep | (current & CTR_TX),
        Transition::AckTransmit => keep | CTR_RX,
        Transition::ArmTransmit => {
            keep | CTR_RX | transmit_status(current, EPR::STAT_TX::RW::VALID)
        }
        Transition::TransmitNak => keep | CTR_RX | transmit_status(current, EPR::STAT_TX::RW::NAK),
        Transition::Stall => {
            keep | CTR_RX | CTR_TX | transmit_status(current, EPR::STAT_TX::RW::STALL)
        }
        Transition::AckComplete => keep,
    }
}

/// One endpoint's register
///
/// Not reentrant for the same endpoint. Only the USB interrupt handler,
/// or code holding the driver's critical section, may use it.
pub struct EndpointRegister<'a> {
    epr: endpoint::Epr<'a>,
}

impl<'a> EndpointRegister<'a> {
    pub fn new(usb: &'a usb::RegisterBlock, index: usize) -> Self {
        EndpointRegister {
            epr: endpoint::register(usb, index),
        }
    }

    /// Snapshot of the register
    pub fn read(&self) -> u32 {
        ral::read_reg!(ral::endpoint, &self.epr, EPR)
    }

    fn apply(&self, transition: Transition) {
        let current = self.read();
        ral::write_reg!(ral::endpoint, &self.epr, EPR, next(current, transition));
    }

    /// Writes the endpoint type and address
    ///
    /// Completion flags are written as zero, so any stale completion is
    /// dropped. Status and data toggle fields are left alone.
    pub fn configure(&self, kind: u32, address: u8) {
        ral::write_reg!(ral::endpoint, &self.epr, EPR, EP_TYPE: kind, EA: address as u32);
    }

    /// Writes zero to the whole register
    pub fn clear(&self) {
        ral::write_reg!(ral::endpoint, &self.epr, EPR, 0);
    }

    pub fn arm_receive(&self) {
        self.apply(Transition::ArmReceive);
    }

    pub fn ack_receive_complete(&self) {
        self.apply(Transition::AckReceive);
    }

    pub fn ack_transmit_complete(&self) {
        self.apply(Transition::AckTransmit);
    }

    /// Drop both completion flags in one write
    pub fn ack_complete(&self) {
        self.apply(Transition::AckComplete);
    }

    pub fn arm_transmit(&self) {
        self.apply(Transition::ArmTransmit);
    }

    pub fn set_transmit_nak(&self) {
        self.apply(Transition::TransmitNak);
    }

    pub fn stall(&self) {
        self.apply(Transition::Stall);
    }
}
