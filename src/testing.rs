//! Host-side model of the peripheral, for tests
//!
//! The registers and packet memory are plain memory. A read returns the
//! last value written, so a status field shows the last toggle that the
//! driver wrote, not a hardware state. The [`Host`] plays the USB host by
//! writing what the hardware would after a transaction.

extern crate std;

use crate::{
    buffer::PacketMemory,
    driver::{Driver, CONTROL},
    ral::{endpoint::EPR, usb},
    ring::{Consumer, RingBuffer},
    Peripherals, ENDPOINT_COUNT,
};
use std::{boxed::Box, vec, vec::Vec};

pub const RING_CAPACITY: usize = 256;

/// Marks a transmit count that the driver hasn't written
const UNWRITTEN: usize = 0x3FF;

struct FakePeripherals {
    usb: &'static usb::RegisterBlock,
    pma: &'static PacketMemory,
}

unsafe impl Peripherals for FakePeripherals {
    fn usb(&self) -> *const () {
        (self.usb as *const usb::RegisterBlock).cast()
    }
    fn packet_memory(&self) -> *const () {
        (self.pma as *const PacketMemory).cast()
    }
}

pub struct Host {
    pub usb: &'static usb::RegisterBlock,
    pub pma: &'static PacketMemory,
}

impl Host {
    /// Poison every transmit count before the next event
    fn begin(&self) {
        for endpoint in 0..ENDPOINT_COUNT {
            self.pma.descriptor(endpoint).set_transmit_count(UNWRITTEN);
        }
    }

    /// Signal a transfer on `endpoint`, keeping its type and address
    fn complete(&self, endpoint: usize, flags: u32) {
        let epr = &self.usb.EPR[endpoint];
        let keep = EPR::EP_TYPE::mask | EPR::EP_KIND::mask | EPR::EA::mask;
        epr.write((epr.read() & keep) | flags);
        self.usb.ISTR.write(usb::ISTR::CTR::mask | endpoint as u32);
    }

    /// Send a SETUP to the control endpoint
    pub fn setup(&self, setup: [u8; 8]) {
        self.out(CONTROL, &setup, true);
    }

    /// Send `data` to `endpoint`
    pub fn out(&self, endpoint: usize, data: &[u8], setup: bool) {
        self.begin();
        let descriptor = self.pma.descriptor(endpoint);
        self.pma.copy_out(descriptor.receive_offset(), data);
        let count = descriptor.COUNT_RX.read() & !0x3FF;
        descriptor.COUNT_RX.write(count | data.len() as u32);

        let mut flags = EPR::CTR_RX::mask;
        if setup {
            flags |= EPR::SETUP::mask;
        }
        self.complete(endpoint, flags);
    }

    /// Acknowledge the packet that `endpoint` sent
    pub fn in_complete(&self, endpoint: usize) {
        self.begin();
        self.complete(endpoint, EPR::CTR_TX::mask);
    }

    pub fn bus_reset(&self) {
        self.begin();
        self.usb.ISTR.write(usb::ISTR::RESET::mask);
    }

    /// The packet that the driver sent from `endpoint` since the last event
    pub fn transmitted(&self, endpoint: usize) -> Option<Vec<u8>> {
        let descriptor = self.pma.descriptor(endpoint);
        let count = descriptor.transmit_count();
        if count == UNWRITTEN {
            return None;
        }
        let mut packet = vec![0; count];
        self.pma.copy_in(descriptor.transmit_offset(), &mut packet);
        Some(packet)
    }

    pub fn transmit_status(&self, endpoint: usize) -> u32 {
        (self.usb.EPR[endpoint].read() & EPR::STAT_TX::mask) >> EPR::STAT_TX::offset
    }

    pub fn receive_status(&self, endpoint: usize) -> u32 {
        (self.usb.EPR[endpoint].read() & EPR::STAT_RX::mask) >> EPR::STAT_RX::offset
    }

    pub fn receive_count(&self, endpoint: usize) -> usize {
        self.pma.descriptor(endpoint).receive_count()
    }
}

pub struct Harness {
    pub driver: Driver,
    pub host: Host,
    pub input: Consumer<'static>,
    pub ring: &'static RingBuffer<RING_CAPACITY>,
}

/// An initialized driver on fresh memory
pub fn harness() -> Harness {
    let usb: &'static usb::RegisterBlock = Box::leak(Box::default());
    let pma: &'static PacketMemory = Box::leak(Box::new(PacketMemory::new()));
    let ring: &'static RingBuffer<RING_CAPACITY> = Box::leak(Box::new(RingBuffer::new()));
    let (producer, input) = ring.split().unwrap();

    let mut driver = Driver::new(FakePeripherals { usb, pma }, producer);
    driver.initialize();
    Harness {
        driver,
        host: Host { usb, pma },
        input,
        ring,
    }
}

/// A GET_DESCRIPTOR SETUP
pub fn get_descriptor(kind: u8, index: u8, length: u16) -> [u8; 8] {
    let [low, high] = length.to_le_bytes();
    [0x80, 0x06, index, kind, 0, 0, low, high]
}

/// Configure the device, and enable the UART
pub fn open_port(driver: &mut Driver, host: &Host) {
    host.setup([0x00, 0x09, 0x01, 0x00, 0, 0, 0, 0]);
    driver.on_interrupt();
    host.setup([0x41, 0x00, 0x01, 0x00, 0, 0, 0, 0]);
    driver.on_interrupt();
}
