//! Interrupt-to-loop byte queue
//!
//! A fixed-capacity, single-producer, single-consumer ring. The USB
//! interrupt handler owns the [`Producer`] and pushes every byte it
//! receives on the bulk OUT endpoint. The cooperative loop owns the
//! [`Consumer`] and drains it.
//!
//! ```
//! use cp210x_usbd::RingBuffer;
//!
//! static INPUT: RingBuffer<256> = RingBuffer::new();
//!
//! let (mut producer, mut consumer) = INPUT.split().unwrap();
//! producer.push(b'h').unwrap();
//! assert_eq!(consumer.pop(), Some(b'h'));
//! assert!(INPUT.split().is_none());
//! ```

#![allow(clippy::declare_interior_mutable_const)] // Usage is legit in this module.

use core::{
    cell::UnsafeCell,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

/// Fixed-capacity byte ring shared by one producer and one consumer
///
/// Allocate a `static` ring, and [`split`](RingBuffer::split) it once.
/// Bytes that arrive while the ring is full are dropped and counted;
/// queued bytes are never overwritten.
pub struct RingBuffer<const N: usize> {
    storage: [UnsafeCell<u8>; N],
    /// Live count. The only state that both halves write.
    count: AtomicUsize,
    overflow: AtomicUsize,
    taken: AtomicBool,
}

// Safety: the storage is only accessed through the split halves. The
// producer only writes free slots, and the consumer only reads live slots.
// The live count publishes slots between the two.
unsafe impl<const N: usize> Sync for RingBuffer<N> {}

impl<const N: usize> RingBuffer<N> {
    pub const fn new() -> Self {
        const BYTE: UnsafeCell<u8> = UnsafeCell::new(0);
        RingBuffer {
            storage: [BYTE; N],
            count: AtomicUsize::new(0),
            overflow: AtomicUsize::new(0),
            taken: AtomicBool::new(false),
        }
    }

    /// Acquire the producer and consumer
    ///
    /// Returns `None` if the ring was already split.
    pub fn split(&self) -> Option<(Producer<'_>, Consumer<'_>)> {
        let taken = self.taken.swap(true, Ordering::SeqCst);
        (!taken).then(|| {
            let shared = Shared {
                storage: &self.storage,
                count: &self.count,
                overflow: &self.overflow,
            };
            (Producer { shared, head: 0 }, Consumer { shared, tail: 0 })
        })
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Bytes waiting to be popped
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn space_remaining(&self) -> usize {
        N - self.len()
    }

    /// Bytes dropped because the ring was full
    pub fn overflow_count(&self) -> usize {
        self.overflow.load(Ordering::Relaxed)
    }
}

#[derive(Clone, Copy)]
struct Shared<'a> {
    storage: &'a [UnsafeCell<u8>],
    count: &'a AtomicUsize,
    overflow: &'a AtomicUsize,
}

impl Shared<'_> {
    fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    fn advance(&self, index: usize) -> usize {
        let next = index + 1;
        if next == self.storage.len() {
            0
        } else {
            next
        }
    }
}

/// The pushing half of a [`RingBuffer`]
pub struct Producer<'a> {
    shared: Shared<'a>,
    head: usize,
}

// Safety: the producer is the only writer of free slots. See RingBuffer.
unsafe impl Send for Producer<'_> {}

impl Producer<'_> {
    /// Queue `byte`
    ///
    /// If the ring is full, the byte is dropped, the overflow counter
    /// increments, and the byte comes back as the error.
    pub fn push(&mut self, byte: u8) -> Result<(), u8> {
        if self.shared.len() >= self.shared.storage.len() {
            self.shared.overflow.fetch_add(1, Ordering::Relaxed);
            return Err(byte);
        }
        // Safety: the slot at head is free, and only the producer writes
        // free slots. The consumer won't read it until the count says so.
        unsafe { *self.shared.storage[self.head].get() = byte };
        self.head = self.shared.advance(self.head);
        self.shared.count.fetch_add(1, Ordering::Release);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn space_remaining(&self) -> usize {
        self.shared.storage.len() - self.len()
    }

    pub fn overflow_count(&self) -> usize {
        self.shared.overflow.load(Ordering::Relaxed)
    }
}

/// The popping half of a [`RingBuffer`]
pub struct Consumer<'a> {
    shared: Shared<'a>,
    tail: usize,
}

// Safety: the consumer is the only reader of live slots. See RingBuffer.
unsafe impl Send for Consumer<'_> {}

impl Consumer<'_> {
    /// Take the oldest byte, or `None` if the ring is empty
    pub fn pop(&mut self) -> Option<u8> {
        if self.shared.len() == 0 {
            return None;
        }
        // Safety: the count says that the slot at tail is live, and the
        // producer won't write it until the count drops.
        let byte = unsafe { *self.shared.storage[self.tail].get() };
        self.tail = self.shared.advance(self.tail);
        self.shared.count.fetch_sub(1, Ordering::Release);
        Some(byte)
    }

    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn space_remaining(&self) -> usize {
        self.shared.storage.len() - self.len()
    }

    pub fn overflow_count(&self) -> usize {
        self.shared.overflow.load(Ordering::Relaxed)
    }
}

impl Iterator for Consumer<'_> {
    type Item = u8;
    fn next(&mut self) -> Option<u8> {
        self.pop()
    }
}
