//! Bit-level de/serialization for riptide: a fixed-capacity, absolute-bit-offset
//! addressed buffer plus varuint/zig-zag/fixed-width helpers built on top of it.

mod bit_buffer;
mod error;
mod primitives;
mod varint;

pub use bit_buffer::BitBuffer;
pub use error::{SerdeErr, SerdeResult};
pub use primitives::{get_array, get_byte_vec, get_string, put_array, put_byte_slice, put_string, Primitive};
pub use varint::{
    get_signed_varuint, get_varuint, put_signed_varuint, put_varuint, zigzag_decode_32,
    zigzag_decode_64, zigzag_encode_32, zigzag_encode_64,
};
