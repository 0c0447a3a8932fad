//! Bounds-checked cursor over a byte slice.
//!
//! Every integer in the container format is little-endian; reads go through
//! `byteorder` so host endianness never leaks into decoded values. All
//! methods return `Err` instead of panicking on truncated input, which is
//! what lets the scanners treat short records as recoverable.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::hash::Hash256;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReadError {
    #[error("unexpected end of record: wanted {wanted} bytes at offset {offset}, {remaining} left")]
    Truncated {
        offset: usize,
        wanted: usize,
        remaining: usize,
    },
    #[error("eight-byte varint at offset {offset} (value {value})")]
    OversizeVarint { offset: usize, value: u64 },
}

pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> ByteReader<'a> {
        ByteReader { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos == self.buf.len()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ReadError> {
        if self.remaining() < len {
            return Err(ReadError::Truncated {
                offset: self.pos,
                wanted: len,
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, ReadError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, ReadError> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn read_u32(&mut self) -> Result<u32, ReadError> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn read_u64(&mut self) -> Result<u64, ReadError> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    pub fn read_hash(&mut self) -> Result<Hash256, ReadError> {
        Ok(Hash256::from_slice(self.take(32)?))
    }

    /// Returns `len` bytes as a slice aliasing the underlying buffer.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ReadError> {
        self.take(len)
    }

    /// The bytes between an earlier position and the cursor; used to hash a
    /// serialized record over its exact extent.
    pub fn span(&self, start: usize) -> &'a [u8] {
        &self.buf[start..self.pos]
    }

    /// Bitcoin variable-length integer: a tag byte below 0xFD is the value;
    /// 0xFD is followed by a u16, 0xFE by a u32. The eight-byte 0xFF form
    /// never occurs in real chain data, so it is consumed and reported as an
    /// anomaly for the caller to flag.
    pub fn read_varint(&mut self) -> Result<u64, ReadError> {
        let tag = self.read_u8()?;
        match tag {
            0xFF => {
                let offset = self.pos - 1;
                let value = self.read_u64()?;
                Err(ReadError::OversizeVarint { offset, value })
            }
            0xFE => Ok(self.read_u32()? as u64),
            0xFD => Ok(self.read_u16()? as u64),
            v => Ok(v as u64),
        }
    }
}
