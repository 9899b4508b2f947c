//! Packet memory
//!
//! The peripheral's 512 bytes of packet memory hold the buffer descriptor
//! table and every endpoint buffer. The CPU sees each 16-bit packet memory
//! word in the low half of a 32-bit slot, so packet memory offset `n`
//! lives at CPU address `base + 2 * n`.

#![allow(non_snake_case, non_upper_case_globals)]

use crate::{vcell::VCell, ENDPOINT_COUNT, MAX_PACKET_SIZE};

/// Bytes of packet memory
pub const PMA_SIZE: u16 = 512;

/// Packet memory bytes used by the buffer descriptor table
pub const BUFFER_TABLE_SIZE: u16 = ENDPOINT_COUNT as u16 * 8;

const SLOTS: usize = PMA_SIZE as usize / 2;

/// Packet memory, as the CPU sees it
#[repr(C)]
pub struct PacketMemory {
    slots: [VCell<u32>; SLOTS],
}

/// One buffer descriptor table entry
///
/// Each register is a 16-bit packet memory word.
#[repr(C)]
pub struct BufferDescriptor {
    pub ADDR_TX: VCell<u32>,
    pub COUNT_TX: VCell<u32>,
    pub ADDR_RX: VCell<u32>,
    pub COUNT_RX: VCell<u32>,
}

const _: [(); 1] = [(); (core::mem::size_of::<BufferDescriptor>() == 16) as usize];
const _: [(); 1] = [(); (core::mem::size_of::<PacketMemory>() == 1024) as usize];

pub mod COUNT_TX {
    pub mod COUNT {
        pub const offset: u32 = 0;
        pub const mask: u32 = 0x3FF << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
}

pub mod COUNT_RX {
    /// Block size: 0 = 2 bytes, 1 = 32 bytes
    pub mod BL_SIZE {
        pub const offset: u32 = 15;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub mod NUM_BLOCK {
        pub const offset: u32 = 10;
        pub const mask: u32 = 0x1F << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub use super::COUNT_TX::COUNT;
}

impl BufferDescriptor {
    /// Point the transmit side at `offset`, with nothing to send
    pub fn set_transmit_buffer(&self, offset: u16) {
        crate::ral::write_reg!(crate::buffer, self, ADDR_TX, offset as u32);
        crate::ral::write_reg!(crate::buffer, self, COUNT_TX, 0);
    }

    /// Point the receive side at a 64 byte buffer at `offset`
    pub fn set_receive_buffer(&self, offset: u16) {
        crate::ral::write_reg!(crate::buffer, self, ADDR_RX, offset as u32);
        crate::ral::write_reg!(
            crate::buffer,
            self,
            COUNT_RX,
            BL_SIZE: 1,
            NUM_BLOCK: (MAX_PACKET_SIZE / 32) as u32 - 1
        );
    }

    pub fn transmit_offset(&self) -> u16 {
        crate::ral::read_reg!(crate::buffer, self, ADDR_TX) as u16
    }

    pub fn receive_offset(&self) -> u16 {
        crate::ral::read_reg!(crate::buffer, self, ADDR_RX) as u16
    }

    pub fn set_transmit_count(&self, count: usize) {
        crate::ral::write_reg!(crate::buffer, self, COUNT_TX, COUNT: count as u32);
    }

    pub fn transmit_count(&self) -> usize {
        crate::ral::read_reg!(crate::buffer, self, COUNT_TX, COUNT) as usize
    }

    /// Bytes the hardware placed in the receive buffer
    pub fn receive_count(&self) -> usize {
        crate::ral::read_reg!(crate::buffer, self, COUNT_RX, COUNT) as usize
    }

    /// Zero the received byte count, keeping the buffer size
    pub fn clear_receive_count(&self) {
        crate::ral::modify_reg!(crate::buffer, self, COUNT_RX, COUNT: 0);
    }
}

impl PacketMemory {
    /// The buffer descriptor table entry for `endpoint`
    ///
    /// The table is at packet memory offset zero.
    ///
    /// # Panics
    ///
    /// Panics if `endpoint` isn't a hardware endpoint.
    pub fn descriptor(&self, endpoint: usize) -> &BufferDescriptor {
        assert!(endpoint < ENDPOINT_COUNT);
        // Safety: a BufferDescriptor is four VCell<u32>, the same layout as
        // four slots. The assert keeps the entry inside the table.
        unsafe { &*self.slots.as_ptr().add(endpoint * 4).cast() }
    }

    /// Copy `dest.len()` bytes starting at packet memory `offset`
    ///
    /// Moves `ceil(len / 2)` words. The unused half of a trailing word is
    /// dropped.
    pub fn copy_in(&self, offset: u16, dest: &mut [u8]) {
        debug_assert!(dest.len() <= MAX_PACKET_SIZE);
        let slots = &self.slots[usize::from(offset) / 2..];
        for (slot, bytes) in slots.iter().zip(dest.chunks_mut(2)) {
            let word = (slot.read() as u16).to_le_bytes();
            bytes.copy_from_slice(&word[..bytes.len()]);
        }
    }

    /// Copy `src` into packet memory starting at `offset`
    ///
    /// Moves `ceil(len / 2)` words. An odd trailing byte is padded with zero.
    pub fn copy_out(&self, offset: u16, src: &[u8]) {
        debug_assert!(src.len() <= MAX_PACKET_SIZE);
        let slots = &self.slots[usize::from(offset) / 2..];
        for (slot, bytes) in slots.iter().zip(src.chunks(2)) {
            let mut word = [0; 2];
            word[..bytes.len()].copy_from_slice(bytes);
            slot.write(u16::from_le_bytes(word).into());
        }
    }

    /// Zero all of packet memory
    pub fn clear(&self) {
        for slot in &self.slots {
            slot.write(0);
        }
    }
}

#[cfg(test)]
impl PacketMemory {
    pub fn new() -> Self {
        PacketMemory {
            slots: core::array::from_fn(|_| VCell::default()),
        }
    }

    pub fn slot(&self, index: usize) -> u32 {
        self.slots[index].read()
    }
}

/// Packet memory buffer allocator
///
/// Hands out packet memory offsets from just after the buffer descriptor
/// table, growing up.
pub struct Allocator {
    next: u16,
    end: u16,
}

impl Allocator {
    pub const fn new() -> Self {
        Allocator {
            next: BUFFER_TABLE_SIZE,
            end: PMA_SIZE,
        }
    }

    /// Allocates a buffer of `size` bytes, returning its packet memory offset
    ///
    /// `size` is rounded up to a whole word.
    pub fn allocate(&mut self, size: u16) -> Option<u16> {
        let start = self.next;
        let end = start.checked_add(size.checked_add(1)? & !1)?;
        if end > self.end {
            None
        } else {
            self.next = end;
            Some(start)
        }
    }
}
