//! Register access layer for the STM32F1 USB device peripheral
//!
//! There's no published RAL for this peripheral that fits the
//! `ral-registers` macros, so this module defines the register block and
//! its field modules by hand. The layout follows RM0008, section 23.5.
//!
//! It also adds some enhancements for endpoint register access.

#![allow(non_snake_case, non_upper_case_globals)]

use crate::{buffer::PacketMemory, vcell::VCell, Peripherals, ENDPOINT_COUNT};
use core::ops::Deref;

pub use ral_registers::{modify_reg, read_reg, write_reg};

/// Generates RAL field modules
///
/// Each field is `NAME [offset, width]`, optionally followed by the
/// enumerated values that may be written to that field.
macro_rules! fields {
    ($($field:ident [$offset:literal, $width:literal] $({ $($value:ident = $v:literal),* $(,)? })?)*) => {
        $(
            pub mod $field {
                pub const offset: u32 = $offset;
                pub const mask: u32 = ((1 << $width) - 1) << offset;
                pub mod R {}
                pub mod W {}
                pub mod RW {
                    $($(pub const $value: u32 = $v;)*)?
                }
            }
        )*
    };
}

/// A pointer to a peripheral block
///
/// Dereferences to the block. The [`Peripherals`] contract guarantees that
/// the pointer is valid for the life of the program.
pub struct Instance<T> {
    ptr: *const T,
}

impl<T: 'static> Instance<T> {
    /// The block, valid for the life of the program
    pub fn block(&self) -> &'static T {
        // Safety: pointer validity is upheld by the Peripherals implementation.
        unsafe { &*self.ptr }
    }
}

impl<T: 'static> Deref for Instance<T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.block()
    }
}

// Safety: the instance represents ownership of the peripheral block, and
// the driver is the only one accessing it.
unsafe impl<T> Send for Instance<T> {}

/// All the blocks the driver needs
pub struct Instances {
    pub usb: Instance<usb::RegisterBlock>,
    pub pma: Instance<PacketMemory>,
}

/// Converts the user's peripherals into typed register blocks
pub fn instances<P: Peripherals>(peripherals: P) -> Instances {
    Instances {
        usb: Instance {
            ptr: peripherals.usb().cast(),
        },
        pma: Instance {
            ptr: peripherals.packet_memory().cast(),
        },
    }
}

pub mod usb {
    use super::VCell;
    use crate::ENDPOINT_COUNT;

    /// USB device peripheral, based at `0x4000_5C00`
    #[repr(C)]
    #[cfg_attr(test, derive(Default))]
    pub struct RegisterBlock {
        pub EPR: [VCell<u32>; ENDPOINT_COUNT],
        _reserved: [VCell<u32>; 8],
        pub CNTR: VCell<u32>,
        pub ISTR: VCell<u32>,
        pub FNR: VCell<u32>,
        pub DADDR: VCell<u32>,
        pub BTABLE: VCell<u32>,
    }

    pub mod CNTR {
        fields! {
            CTRM [15, 1]
            PMAOVRM [14, 1]
            ERRM [13, 1]
            WKUPM [12, 1]
            SUSPM [11, 1]
            RESETM [10, 1]
            SOFM [9, 1]
            ESOFM [8, 1]
            RESUME [4, 1]
            FSUSP [3, 1]
            LP_MODE [2, 1]
            PDWN [1, 1]
            FRES [0, 1]
        }
    }

    /// Flags are `rc_w0`: write zero to clear, one to leave alone
    pub mod ISTR {
        fields! {
            CTR [15, 1]
            PMAOVR [14, 1]
            ERR [13, 1]
            WKUP [12, 1]
            SUSP [11, 1]
            RESET [10, 1]
            SOF [9, 1]
            ESOF [8, 1]
            DIR [4, 1]
            EP_ID [0, 4]
        }
    }

    pub mod FNR {
        fields! {
            RXDP [15, 1]
            RXDM [14, 1]
            LCK [13, 1]
            LSOF [11, 2]
            FN [0, 11]
        }
    }

    pub mod DADDR {
        fields! {
            EF [7, 1]
            ADD [0, 7]
        }
    }

    pub mod BTABLE {
        fields! {
            BTABLE [3, 13]
        }
    }
}

/// The RAL macros expect a named register on a block. `Epr` gives each
/// endpoint register that shape, so the macros work on any endpoint.
pub mod endpoint {
    use super::{usb, VCell};

    pub struct Epr<'a> {
        pub EPR: &'a VCell<u32>,
    }

    /// `CTR_*` are `rc_w0`. `DTOG_*` and `STAT_*` toggle when written with one.
    /// `SETUP` is read only.
    pub mod EPR {
        fields! {
            CTR_RX [15, 1]
            DTOG_RX [14, 1]
            STAT_RX [12, 2] { DISABLED = 0b00, STALL = 0b01, NAK = 0b10, VALID = 0b11 }
            SETUP [11, 1]
            EP_TYPE [9, 2] { BULK = 0b00, CONTROL = 0b01, ISO = 0b10, INTERRUPT = 0b11 }
            EP_KIND [8, 1]
            CTR_TX [7, 1]
            DTOG_TX [6, 1]
            STAT_TX [4, 2] { DISABLED = 0b00, STALL = 0b01, NAK = 0b10, VALID = 0b11 }
            EA [0, 4]
        }
    }

    pub fn register(usb: &usb::RegisterBlock, endpoint: usize) -> Epr<'_> {
        match usb.EPR.get(endpoint) {
            Some(epr) => Epr { EPR: epr },
            None => unreachable!("EPR register {} doesn't exist", endpoint),
        }
    }
}

const _: [(); 1] = [(); (core::mem::size_of::<usb::RegisterBlock>() == 0x54) as usize];
const _: [(); 1] = [(); (ENDPOINT_COUNT == 8) as usize];
