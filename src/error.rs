//! Error type shared by the fallible operations of the crate.
//!
//! Only resource management can fail. Parameter values are clamped and
//! fixed-point arithmetic saturates, so neither produces an error.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// A buffer of `requested` elements could not be allocated.
    OutOfMemory { requested: usize },

    /// A buffer resize was requested that would yield the size already in use.
    SizeUnchanged,

    /// Waveform data whose length is not a supported power of two.
    InvalidTableLength { len: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OutOfMemory { requested } => {
                write!(f, "out of memory allocating {requested} elements")
            }
            Error::SizeUnchanged => write!(f, "buffer already has the requested size"),
            Error::InvalidTableLength { len } => {
                write!(f, "{len} samples is not a power-of-two table length")
            }
        }
    }
}

impl core::error::Error for Error {}
