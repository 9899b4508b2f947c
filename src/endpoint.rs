//! A USB endpoint
//!
//! An endpoint pairs a hardware endpoint register with two packet memory
//! buffers, and owns the data of a transmit that spans more than one
//! packet. The driver stages a whole transfer into the endpoint, and the
//! endpoint hands it to the hardware one packet at a time.

use crate::{
    buffer::PacketMemory,
    ral::{endpoint::EPR, usb},
    register::EndpointRegister,
    MAX_PACKET_SIZE,
};

/// Largest transfer that an endpoint can stage
///
/// A multiple of the max packet size, so that splitting a long write into
/// transfers doesn't change the number of packets on the wire.
pub const TRANSMIT_CAPACITY: usize = 2 * MAX_PACKET_SIZE;

bitflags::bitflags! {
    /// Endpoint software state
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Flags: u8 {
        /// Armed to receive.
        const RX_BUSY = 1 << 0;
        /// A transfer is on its way to the host.
        const TX_BUSY = 1 << 1;
        /// The transfer is shorter than the host asked for. A full last
        /// packet is followed by a zero length packet.
        const TX_SHORT = 1 << 6;
        /// The staged transfer has packets left to send.
        const TX_REMAINDER = 1 << 7;
    }
}

/// Endpoint transfer types that the driver uses
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    Control,
    Bulk,
}

impl Kind {
    fn ep_type(self) -> u32 {
        match self {
            Kind::Control => EPR::EP_TYPE::RW::CONTROL,
            Kind::Bulk => EPR::EP_TYPE::RW::BULK,
        }
    }
}

/// Transfer data, and how much of it reached packet memory
struct Staged {
    data: [u8; TRANSMIT_CAPACITY],
    len: usize,
    cursor: usize,
}

impl Staged {
    const fn new() -> Self {
        Staged {
            data: [0; TRANSMIT_CAPACITY],
            len: 0,
            cursor: 0,
        }
    }

    fn remaining(&self) -> usize {
        self.len - self.cursor
    }

    /// The next packet, advancing the cursor past it
    fn next_packet(&mut self) -> &[u8] {
        let start = self.cursor;
        self.cursor += self.remaining().min(MAX_PACKET_SIZE);
        &self.data[start..self.cursor]
    }
}

pub struct Endpoint {
    index: usize,
    kind: Kind,
    transmit_buffer: u16,
    receive_buffer: u16,
    flags: Flags,
    staged: Staged,
}

impl Endpoint {
    /// Create an endpoint at hardware `index`, also used as its address
    ///
    /// `transmit_buffer` and `receive_buffer` are packet memory offsets of
    /// two buffers that are at least one max packet large.
    pub const fn new(index: usize, kind: Kind, transmit_buffer: u16, receive_buffer: u16) -> Self {
        Endpoint {
            index,
            kind,
            transmit_buffer,
            receive_buffer,
            flags: Flags::empty(),
            staged: Staged::new(),
        }
    }

    #[cfg(test)]
    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn register<'a>(&self, usb: &'a usb::RegisterBlock) -> EndpointRegister<'a> {
        EndpointRegister::new(usb, self.index)
    }

    /// Program the hardware for this endpoint, and forget any transfer
    ///
    /// The endpoint is armed to receive, and NAKs IN tokens.
    pub fn initialize(&mut self, usb: &usb::RegisterBlock, pma: &PacketMemory) {
        self.flags = Flags::empty();
        self.staged.len = 0;
        self.staged.cursor = 0;

        let descriptor = pma.descriptor(self.index);
        descriptor.set_transmit_buffer(self.transmit_buffer);
        descriptor.set_receive_buffer(self.receive_buffer);

        let epr = self.register(usb);
        epr.configure(self.kind.ep_type(), self.index as u8);
        self.rearm_receive(usb, pma);
        epr.set_transmit_nak();
    }

    /// Stage a transfer, replacing anything that was staged before
    ///
    /// Returns how many bytes of `data` were accepted, which is constrained
    /// by [`TRANSMIT_CAPACITY`]. Nothing is sent until [`transmit`](Endpoint::transmit).
    pub fn stage(&mut self, data: &[u8]) -> usize {
        let len = data.len().min(TRANSMIT_CAPACITY);
        self.staged.data[..len].copy_from_slice(&data[..len]);
        self.staged.len = len;
        self.staged.cursor = 0;
        self.flags.remove(Flags::TX_SHORT);
        len
    }

    /// Shorten the staged transfer to at most `len` bytes
    ///
    /// `len` is what the host asked for. If the transfer is shorter, and
    /// its last packet is full, the host gets a zero length packet after it.
    pub fn limit(&mut self, len: usize) {
        self.staged.len = self.staged.len.min(len);
        self.flags.set(Flags::TX_SHORT, self.staged.len < len);
    }

    pub fn is_transmitting(&self) -> bool {
        self.flags.contains(Flags::TX_BUSY)
    }

    pub fn has_remainder(&self) -> bool {
        self.flags.contains(Flags::TX_REMAINDER)
    }

    /// Send the next packet of the staged transfer
    ///
    /// An empty transfer sends a zero length packet. The endpoint stays
    /// busy until [`finish_transmit`](Endpoint::finish_transmit).
    pub fn transmit(&mut self, usb: &usb::RegisterBlock, pma: &PacketMemory) {
        let descriptor = pma.descriptor(self.index);
        let packet = self.staged.next_packet();
        let len = packet.len();
        pma.copy_out(self.transmit_buffer, packet);
        descriptor.set_transmit_count(len);

        let remaining = self.staged.remaining();
        let terminate = remaining == 0 && len == MAX_PACKET_SIZE;
        let terminate = terminate && self.flags.contains(Flags::TX_SHORT);
        let more = remaining > 0 || terminate;
        self.flags.insert(Flags::TX_BUSY);
        self.flags.set(Flags::TX_REMAINDER, more);
        self.register(usb).arm_transmit();
    }

    pub fn ack_transmit(&self, usb: &usb::RegisterBlock) {
        self.register(usb).ack_transmit_complete();
    }

    /// The transfer is complete
    pub fn finish_transmit(&mut self) {
        let done = Flags::TX_BUSY | Flags::TX_REMAINDER | Flags::TX_SHORT;
        self.flags.remove(done);
    }

    /// Bytes waiting in the receive buffer, as reported by the hardware
    pub fn received(&self, pma: &PacketMemory) -> usize {
        pma.descriptor(self.index).receive_count()
    }

    /// Copy the received packet into `buffer`, returning the number of bytes copied
    pub fn read(&self, pma: &PacketMemory, buffer: &mut [u8]) -> usize {
        let size = self.received(pma).min(buffer.len()).min(MAX_PACKET_SIZE);
        pma.copy_in(self.receive_buffer, &mut buffer[..size]);
        size
    }

    pub fn ack_receive(&mut self, usb: &usb::RegisterBlock) {
        self.flags.remove(Flags::RX_BUSY);
        self.register(usb).ack_receive_complete();
    }

    /// Accept the next OUT packet
    pub fn rearm_receive(&mut self, usb: &usb::RegisterBlock, pma: &PacketMemory) {
        pma.descriptor(self.index).clear_receive_count();
        self.flags.insert(Flags::RX_BUSY);
        self.register(usb).arm_receive();
    }

    pub fn stall(&self, usb: &usb::RegisterBlock) {
        self.register(usb).stall();
    }
}
