//! Parameter memory of the Yamaha FB-01 FM tone generator, modelled as
//! bit-packed register maps, plus the System Exclusive protocol used to
//! keep that memory in sync with the device.

pub mod memory;
pub mod link;
pub mod fb01;

#[cfg(feature = "midir")]
pub mod midi;

use std::time::Duration;

/// Error type for parameter access and device communication.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("{name} must be in the interval [{min}..{max}], got {value}")]
    Range { name: &'static str, value: i32, min: i32, max: i32 },

    #[error("unknown {kind} \"{value}\"")]
    UnknownEnumValue { kind: &'static str, value: String },

    #[error("there is no \"{0}\" key")]
    UnknownKeyName(String),

    #[error("no such field: {0}")]
    NoSuchField(String),

    #[error("device did not answer within {0:?}")]
    DeviceTimeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("got {actual} bytes of data, expected {expected} bytes")]
    InvalidLength { actual: usize, expected: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

// Here is a trick learned from "Programming Rust" 2nd Ed., p. 280.
// Define associated consts in a trait, but don't give them a value.
// Let the implementor of the trait do that.
pub trait Ranged {
    const FIRST: i32;
    const LAST: i32;
    const DEFAULT: i32;

    fn new(value: i32) -> Self;
    fn value(&self) -> i32;
    fn contains(value: i32) -> bool;
    fn random() -> Self;
}

// The `ranged_impl` macro generates an implementation of the `Ranged` trait,
// along with implementations of the `Default`, `Display` and `TryFrom<i32>`
// traits based on the values supplied as parameters
// (type name, first, last, default).
#[macro_export]
macro_rules! ranged_impl {
    ($typ:ty, $name:expr, $first:expr, $last:expr, $default:expr) => {
        impl $crate::Ranged for $typ {
            const FIRST: i32 = $first;
            const LAST: i32 = $last;
            const DEFAULT: i32 = $default;

            fn new(value: i32) -> Self {
                if <Self as $crate::Ranged>::contains(value) {
                    Self(value)
                }
                else {
                    panic!("expected value in range [{}...{}], got {}",
                        <Self as $crate::Ranged>::FIRST,
                        <Self as $crate::Ranged>::LAST,
                        value);
                }
            }

            fn value(&self) -> i32 { self.0 }

            fn contains(value: i32) -> bool {
                value >= <Self as $crate::Ranged>::FIRST
                    && value <= <Self as $crate::Ranged>::LAST
            }

            fn random() -> Self {
                use rand::Rng;
                let mut rng = rand::rng();
                Self::new(rng.random_range(
                    <Self as $crate::Ranged>::FIRST..=<Self as $crate::Ranged>::LAST))
            }
        }

        impl Default for $typ {
            fn default() -> Self {
                <Self as $crate::Ranged>::new(<Self as $crate::Ranged>::DEFAULT)
            }
        }

        impl std::fmt::Display for $typ {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl TryFrom<i32> for $typ {
            type Error = $crate::Error;

            fn try_from(value: i32) -> $crate::Result<Self> {
                if <Self as $crate::Ranged>::contains(value) {
                    Ok(<Self as $crate::Ranged>::new(value))
                }
                else {
                    Err($crate::Error::Range {
                        name: $name,
                        value,
                        min: <Self as $crate::Ranged>::FIRST,
                        max: <Self as $crate::Ranged>::LAST,
                    })
                }
            }
        }
    }
}
