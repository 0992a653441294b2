use thiserror::Error;

/// Failure modes for reading or writing through a [`crate::BitBuffer`].
#[derive(Error, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SerdeErr {
    /// A write did not fit in the buffer's remaining capacity.
    #[error("not enough capacity to write {name} ({required_bits} bits needed)")]
    CapacityExhausted {
        name: &'static str,
        required_bits: u32,
    },
    /// A read ran past the end of the buffer.
    #[error("not enough bits remaining to read {name}")]
    Truncated { name: &'static str },
}

pub type SerdeResult<T> = Result<T, SerdeErr>;
