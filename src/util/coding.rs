//! Little-endian fixed-width and length-prefixed encodings shared by the
//! WAL records, table blocks and blob files.

use crate::util::{Result, Status};

#[inline]
pub fn put_fixed32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

#[inline]
pub fn put_fixed64(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Append a varint (7 bits per byte, low groups first)
#[inline]
pub fn put_varint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value & 0x7F | 0x80) as u8);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Append `data` prefixed with its varint length
#[inline]
pub fn put_length_prefixed(buf: &mut Vec<u8>, data: &[u8]) {
    put_varint(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

#[inline]
pub fn decode_fixed32(data: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&data[..4]);
    u32::from_le_bytes(raw)
}

#[inline]
pub fn decode_fixed64(data: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&data[..8]);
    u64::from_le_bytes(raw)
}

/// Cursor over an encoded buffer. Every read checks bounds and reports
/// truncation as corruption.
pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Decoder { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn u8(&mut self) -> Result<u8> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or_else(|| Status::corruption("truncated byte"))?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn fixed32(&mut self) -> Result<u32> {
        let raw = self.bytes(4)?;
        Ok(decode_fixed32(raw))
    }

    pub fn fixed64(&mut self) -> Result<u64> {
        let raw = self.bytes(8)?;
        Ok(decode_fixed64(raw))
    }

    pub fn varint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        let mut shift = 0;
        loop {
            if shift >= 64 {
                return Err(Status::corruption("varint overflow"));
            }
            let byte = self.u8()?;
            value |= ((byte & 0x7F) as u64) << shift;
            if byte < 0x80 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| Status::corruption("truncated field"))?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn length_prefixed(&mut self) -> Result<&'a [u8]> {
        let len = self.varint()? as usize;
        self.bytes(len)
    }
}
