//! A single wire message: a header nibble followed by mode-dependent header
//! fields and a bit-packed payload, backed by a [`BitBuffer`] with read and
//! write cursors layered on top.

use crate::header::Header;
use crate::seq_id::SeqId;
use riptide_serde::{
    get_array, get_byte_vec, get_string, get_signed_varuint, get_varuint, put_array,
    put_byte_slice, put_signed_varuint, put_string, put_varuint, BitBuffer, Primitive, SerdeResult,
};

const HEADER_BYTE_BITS: u32 = 4;

pub struct Message {
    buf: BitBuffer,
    header: Option<Header>,
    read_bit: u32,
    write_bit: u32,
}

impl Message {
    /// A headerless message, used as the payload carrier for control
    /// messages that don't go through a sequencer (connect/reject payloads).
    pub fn empty(capacity_bytes: usize) -> Self {
        Self {
            buf: BitBuffer::with_capacity_bytes(capacity_bytes),
            header: None,
            read_bit: 0,
            write_bit: 0,
        }
    }

    /// A fresh outgoing message with its header nibble (and, for sequenced
    /// headers, a zeroed sequence-id slot) already written.
    pub fn from_header(header: Header, capacity_bytes: usize) -> SerdeResult<Self> {
        let mut buf = BitBuffer::with_capacity_bytes(capacity_bytes);
        buf.set_bits(header.to_u8() as u64, 4, 0)?;
        let hbits = header.header_bits();
        Ok(Self {
            buf,
            header: Some(header),
            read_bit: hbits,
            write_bit: hbits,
        })
    }

    /// Parses a received buffer's header nibble and positions the read
    /// cursor just past the full header; the write cursor is left at the end
    /// of the received bytes so the message can't accidentally be appended
    /// to.
    pub fn init_from_byte(bytes: Box<[u8]>, length_bytes: usize) -> SerdeResult<Self> {
        let buf = BitBuffer::from_bytes(bytes);
        let first = buf.get_bits(4, 0)? as u8;
        let header = Header::from_u8(first).ok_or(riptide_serde::SerdeErr::Truncated {
            name: "header",
        })?;
        let hbits = header.header_bits();
        Ok(Self {
            buf,
            header: Some(header),
            read_bit: hbits,
            write_bit: (length_bytes as u32) * 8,
        })
    }

    pub fn header(&self) -> Option<Header> {
        self.header
    }

    /// Patches a sequence id into a previously reserved header slot, used
    /// once a sequencer assigns the outgoing id.
    pub fn patch_seq_id(&mut self, id: SeqId, bit_offset: u32) -> SerdeResult<()> {
        self.buf.set_bits(u16::from(id) as u64, 16, bit_offset)
    }

    pub fn patch_bits(&mut self, value: u64, width: u8, bit_offset: u32) -> SerdeResult<()> {
        self.buf.set_bits(value, width, bit_offset)
    }

    pub fn peek_bits(&self, width: u8, bit_offset: u32) -> SerdeResult<u64> {
        self.buf.get_bits(width, bit_offset)
    }

    pub fn write<T: Primitive>(&mut self, value: T) -> SerdeResult<()> {
        value.put(&mut self.buf, &mut self.write_bit)
    }

    pub fn read<T: Primitive>(&mut self) -> SerdeResult<T> {
        T::get(&self.buf, &mut self.read_bit)
    }

    pub fn write_varuint(&mut self, value: u64) -> SerdeResult<()> {
        put_varuint(&mut self.buf, value, &mut self.write_bit)
    }

    pub fn read_varuint(&mut self) -> SerdeResult<u64> {
        get_varuint(&self.buf, &mut self.read_bit)
    }

    pub fn write_signed_varuint(&mut self, value: i64) -> SerdeResult<()> {
        put_signed_varuint(&mut self.buf, value, &mut self.write_bit)
    }

    pub fn read_signed_varuint(&mut self) -> SerdeResult<i64> {
        get_signed_varuint(&self.buf, &mut self.read_bit)
    }

    pub fn write_string(&mut self, value: &str) -> SerdeResult<()> {
        put_string(&mut self.buf, value, &mut self.write_bit)
    }

    pub fn read_string(&mut self) -> SerdeResult<String> {
        get_string(&self.buf, &mut self.read_bit)
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> SerdeResult<()> {
        put_byte_slice(&mut self.buf, bytes, &mut self.write_bit)
    }

    pub fn read_bytes(&mut self, len: usize) -> SerdeResult<Vec<u8>> {
        get_byte_vec(&self.buf, &mut self.read_bit, len)
    }

    /// Writes every remaining received byte verbatim, used to copy an
    /// opaque user payload into an outgoing envelope without reinterpreting it.
    pub fn write_remaining_bytes(&mut self) -> SerdeResult<Vec<u8>> {
        let remaining_bits = self.write_bit.saturating_sub(self.read_bit);
        let len = ((remaining_bits + 7) / 8) as usize;
        self.read_bytes(len)
    }

    pub fn write_array<T: Primitive>(&mut self, values: &[T]) -> SerdeResult<()> {
        put_array(&mut self.buf, values, &mut self.write_bit)
    }

    pub fn read_array<T: Primitive>(&mut self) -> SerdeResult<Vec<T>> {
        get_array(&self.buf, &mut self.read_bit)
    }

    pub fn len_bytes(&self) -> usize {
        ((self.write_bit + 7) / 8) as usize
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf.as_bytes()[..self.len_bytes()]
    }

    pub fn remaining_read_bits(&self) -> u32 {
        self.write_bit.saturating_sub(self.read_bit)
    }
}

/// Bit offset of the sequence-id slot for a header that carries one,
/// immediately following the 4-bit header nibble.
pub const SEQ_ID_BIT_OFFSET: u32 = HEADER_BYTE_BITS;
