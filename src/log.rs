//! Logging interface, contingent on the `defmt-03` feature
//!
//! Only enable `defmt-03` when your logger doesn't share the USB
//! peripheral. A console that logs through the same CP210x port it
//! emulates will recurse into the driver.

macro_rules! trace {
    ($($args:tt)*) => {
        #[cfg(feature = "defmt-03")]
        ::defmt::trace!($($args)*)
    };
}

macro_rules! debug {
    ($($args:tt)*) => {
        #[cfg(feature = "defmt-03")]
        ::defmt::debug!($($args)*)
    };
}

macro_rules! info {
    ($($args:tt)*) => {
        #[cfg(feature = "defmt-03")]
        ::defmt::info!($($args)*)
    };
}

macro_rules! warn {
    ($($args:tt)*) => {
        #[cfg(feature = "defmt-03")]
        ::defmt::warn!($($args)*)
    };
}
