//! Volatile cell that conforms to the RAL's register API
//!
//! Both the peripheral registers and the packet memory slots are modeled
//! with `VCell`s, so the same `#[repr(C)]` blocks can sit on top of real
//! hardware or an ordinary allocation in tests.

use core::cell::UnsafeCell;

#[repr(transparent)]
pub struct VCell<T>(UnsafeCell<T>);

impl<T> VCell<T> {
    pub const fn new(val: T) -> Self {
        VCell(UnsafeCell::new(val))
    }
}

impl<T: Copy> VCell<T> {
    pub fn read(&self) -> T {
        // Safety: T is Copy, and the cell is only ever accessed by value.
        unsafe { self.0.get().read_volatile() }
    }
    pub fn write(&self, val: T) {
        // Safety: see read().
        unsafe { self.0.get().write_volatile(val) }
    }
}

impl<T: Default> Default for VCell<T> {
    fn default() -> Self {
        VCell::new(T::default())
    }
}
