//! Bounds-checked fixed-width field readers.
//!
//! Every record decoder in this crate reads its fields through a [`FieldReader`]
//! positioned on the record's first byte. Each read validates that the whole
//! field lies inside the buffer before anything is returned.

use crate::{Error, Result};

/// A cursor over a byte slice that hands out typed fields.
#[derive(Debug, Clone)]
pub struct FieldReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Start reading at `offset`; the offset itself is checked on the first read.
    pub fn at(data: &'a [u8], offset: usize) -> Self {
        Self { data, pos: offset }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Borrow the next `len` bytes and advance past them.
    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let field = field(self.data, self.pos, len)?;
        self.pos += len;
        Ok(field)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub fn i8(&mut self) -> Result<i8> {
        Ok(self.u8()? as i8)
    }

    pub fn u16_be(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub fn u16_le(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn i16_le(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.array()?))
    }

    pub fn u32_le(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn i32_le(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub fn u64_le(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn i64_le(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    /// Read a fixed-size, NUL-padded text field of `len` bytes.
    ///
    /// The text ends at the first NUL; without one it runs to the field boundary.
    /// Bytes map one-to-one onto chars (Latin-1), so no input is rejected here.
    pub fn c_str(&mut self, len: usize) -> Result<String> {
        let raw = self.bytes(len)?;
        Ok(latin1_until_nul(raw))
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let raw = self.bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(raw);
        Ok(out)
    }
}

/// Borrow `data[offset..offset + len]` or fail with a bounds error.
pub fn field(data: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    offset
        .checked_add(len)
        .and_then(|end| data.get(offset..end))
        .ok_or(Error::Bounds {
            offset,
            len,
            available: data.len(),
        })
}

pub(crate) fn latin1_until_nul(raw: &[u8]) -> String {
    raw.iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect()
}
