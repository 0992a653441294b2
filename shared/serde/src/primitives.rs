use crate::{
    bit_buffer::BitBuffer,
    error::{SerdeErr, SerdeResult},
    varint::{get_varuint, put_varuint},
};

/// A value with a fixed bit-width encoding, read/written at an absolute
/// buffer offset supplied (and advanced) by the caller.
pub trait Primitive: Sized + Copy {
    const BITS: u8;
    const NAME: &'static str;

    fn put(&self, buf: &mut BitBuffer, at: &mut u32) -> SerdeResult<()>;
    fn get(buf: &BitBuffer, at: &mut u32) -> SerdeResult<Self>;
}

macro_rules! impl_primitive_int {
    ($ty:ty, $bits:expr) => {
        impl Primitive for $ty {
            const BITS: u8 = $bits;
            const NAME: &'static str = stringify!($ty);

            fn put(&self, buf: &mut BitBuffer, at: &mut u32) -> SerdeResult<()> {
                buf.set_bits(*self as u64 & mask($bits), $bits, *at)
                    .map_err(|_| SerdeErr::CapacityExhausted {
                        name: Self::NAME,
                        required_bits: $bits as u32,
                    })?;
                *at += $bits as u32;
                Ok(())
            }

            fn get(buf: &BitBuffer, at: &mut u32) -> SerdeResult<Self> {
                let raw = buf
                    .get_bits($bits, *at)
                    .map_err(|_| SerdeErr::Truncated { name: Self::NAME })?;
                *at += $bits as u32;
                Ok(sign_extend::<$ty>(raw, $bits))
            }
        }
    };
}

fn mask(bits: u8) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

trait FromRaw {
    fn from_raw(raw: u64) -> Self;
}

macro_rules! impl_from_raw_unsigned {
    ($ty:ty) => {
        impl FromRaw for $ty {
            fn from_raw(raw: u64) -> Self {
                raw as $ty
            }
        }
    };
}

macro_rules! impl_from_raw_signed {
    ($ty:ty, $unsigned:ty) => {
        impl FromRaw for $ty {
            fn from_raw(raw: u64) -> Self {
                raw as $unsigned as $ty
            }
        }
    };
}

impl_from_raw_unsigned!(u8);
impl_from_raw_unsigned!(u16);
impl_from_raw_unsigned!(u32);
impl_from_raw_unsigned!(u64);
impl_from_raw_signed!(i8, u8);
impl_from_raw_signed!(i16, u16);
impl_from_raw_signed!(i32, u32);
impl_from_raw_signed!(i64, u64);

fn sign_extend<T: FromRaw>(raw: u64, _bits: u8) -> T {
    T::from_raw(raw)
}

impl_primitive_int!(u8, 8);
impl_primitive_int!(u16, 16);
impl_primitive_int!(u32, 32);
impl_primitive_int!(u64, 64);
impl_primitive_int!(i8, 8);
impl_primitive_int!(i16, 16);
impl_primitive_int!(i32, 32);
impl_primitive_int!(i64, 64);

impl Primitive for bool {
    const BITS: u8 = 1;
    const NAME: &'static str = "bool";

    fn put(&self, buf: &mut BitBuffer, at: &mut u32) -> SerdeResult<()> {
        buf.set_bits(*self as u64, 1, *at).map_err(|_| SerdeErr::CapacityExhausted {
            name: Self::NAME,
            required_bits: 1,
        })?;
        *at += 1;
        Ok(())
    }

    fn get(buf: &BitBuffer, at: &mut u32) -> SerdeResult<Self> {
        let raw = buf
            .get_bits(1, *at)
            .map_err(|_| SerdeErr::Truncated { name: Self::NAME })?;
        *at += 1;
        Ok(raw != 0)
    }
}

impl Primitive for f32 {
    const BITS: u8 = 32;
    const NAME: &'static str = "f32";

    fn put(&self, buf: &mut BitBuffer, at: &mut u32) -> SerdeResult<()> {
        self.to_bits().put(buf, at)
    }

    fn get(buf: &BitBuffer, at: &mut u32) -> SerdeResult<Self> {
        u32::get(buf, at).map(f32::from_bits)
    }
}

impl Primitive for f64 {
    const BITS: u8 = 64;
    const NAME: &'static str = "f64";

    fn put(&self, buf: &mut BitBuffer, at: &mut u32) -> SerdeResult<()> {
        self.to_bits().put(buf, at)
    }

    fn get(buf: &BitBuffer, at: &mut u32) -> SerdeResult<Self> {
        u64::get(buf, at).map(f64::from_bits)
    }
}

/// Writes a varuint-prefixed UTF-8 string.
pub fn put_string(buf: &mut BitBuffer, value: &str, at: &mut u32) -> SerdeResult<()> {
    let bytes = value.as_bytes();
    put_varuint(buf, bytes.len() as u64, at)?;
    put_byte_slice(buf, bytes, at)
}

pub fn get_string(buf: &BitBuffer, at: &mut u32) -> SerdeResult<String> {
    let len = get_varuint(buf, at)? as usize;
    let bytes = get_byte_vec(buf, at, len)?;
    String::from_utf8(bytes).map_err(|_| SerdeErr::Truncated { name: "string" })
}

pub fn put_byte_slice(buf: &mut BitBuffer, bytes: &[u8], at: &mut u32) -> SerdeResult<()> {
    for byte in bytes {
        byte.put(buf, at)?;
    }
    Ok(())
}

pub fn get_byte_vec(buf: &BitBuffer, at: &mut u32, len: usize) -> SerdeResult<Vec<u8>> {
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        out.push(u8::get(buf, at)?);
    }
    Ok(out)
}

/// Writes a varuint length prefix followed by `len` elements via `Primitive`.
pub fn put_array<T: Primitive>(buf: &mut BitBuffer, values: &[T], at: &mut u32) -> SerdeResult<()> {
    put_varuint(buf, values.len() as u64, at)?;
    for value in values {
        value.put(buf, at)?;
    }
    Ok(())
}

pub fn get_array<T: Primitive>(buf: &BitBuffer, at: &mut u32) -> SerdeResult<Vec<T>> {
    let len = get_varuint(buf, at)? as usize;
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        out.push(T::get(buf, at)?);
    }
    Ok(out)
}
