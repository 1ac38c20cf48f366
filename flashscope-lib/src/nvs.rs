//! Best-effort decoding of an NVS partition.
//!
//! The region is split into 4096-byte pages. A page whose state word is
//! erased (`0xFFFFFFFF`) or uninitialized (`0x00000000`) is skipped whole;
//! otherwise every 32-byte slot after the 32-byte header is read as:
//!
//! ```text
//! 0      namespace index (0xFF marks an unused slot)
//! 1      type
//! 2      span
//! 3      chunk index
//! 4..8   crc32 (little-endian, recorded only)
//! 8..24  key (NUL terminated)
//! 24..32 value
//! ```
//!
//! Values that span several slots are reported slot by slot; only the first
//! eight bytes of a string or blob are decoded.

use crate::reader::FieldReader;
use crate::{Error, Result};
use std::fmt;

pub const PAGE_SIZE: usize = 0x1000;
pub const PAGE_HEADER_SIZE: usize = 32;
pub const SLOT_SIZE: usize = 32;

const PAGE_STATE_ERASED: u32 = 0xFFFF_FFFF;
const PAGE_STATE_UNINITIALIZED: u32 = 0x0000_0000;
const EMPTY_SLOT: u8 = 0xFF;
const KEY_LEN: usize = 16;
const VALUE_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NvsType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    String,
    Blob,
    Other(u8),
}

impl NvsType {
    pub fn code(self) -> u8 {
        match self {
            NvsType::U8 => 0x01,
            NvsType::I8 => 0x11,
            NvsType::U16 => 0x02,
            NvsType::I16 => 0x12,
            NvsType::U32 => 0x04,
            NvsType::I32 => 0x14,
            NvsType::U64 => 0x08,
            NvsType::I64 => 0x18,
            NvsType::String => 0x21,
            NvsType::Blob => 0x42,
            NvsType::Other(code) => code,
        }
    }
}

impl From<u8> for NvsType {
    fn from(code: u8) -> Self {
        match code {
            0x01 => NvsType::U8,
            0x11 => NvsType::I8,
            0x02 => NvsType::U16,
            0x12 => NvsType::I16,
            0x04 => NvsType::U32,
            0x14 => NvsType::I32,
            0x08 => NvsType::U64,
            0x18 => NvsType::I64,
            0x21 => NvsType::String,
            0x42 => NvsType::Blob,
            other => NvsType::Other(other),
        }
    }
}

impl fmt::Display for NvsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NvsType::U8 => f.write_str("U8"),
            NvsType::I8 => f.write_str("I8"),
            NvsType::U16 => f.write_str("U16"),
            NvsType::I16 => f.write_str("I16"),
            NvsType::U32 => f.write_str("U32"),
            NvsType::I32 => f.write_str("I32"),
            NvsType::U64 => f.write_str("U64"),
            NvsType::I64 => f.write_str("I64"),
            NvsType::String => f.write_str("String"),
            NvsType::Blob => f.write_str("Blob"),
            NvsType::Other(code) => write!(f, "0x{:x}", code),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NvsValue {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    String(String),
    Blob(Vec<u8>),
    /// Raw value bytes of a slot whose type is not decoded.
    Opaque([u8; VALUE_LEN]),
}

impl fmt::Display for NvsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NvsValue::U8(v) => write!(f, "{}", v),
            NvsValue::I8(v) => write!(f, "{}", v),
            NvsValue::U16(v) => write!(f, "{}", v),
            NvsValue::I16(v) => write!(f, "{}", v),
            NvsValue::U32(v) => write!(f, "{}", v),
            NvsValue::I32(v) => write!(f, "{}", v),
            NvsValue::U64(v) => write!(f, "{}", v),
            NvsValue::I64(v) => write!(f, "{}", v),
            NvsValue::String(s) => f.write_str(s),
            NvsValue::Blob(b) => f.write_str(&hex::encode(b)),
            NvsValue::Opaque(raw) => f.write_str(&hex::encode(raw)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NvsEntry {
    pub namespace_index: u8,
    pub nvs_type: NvsType,
    pub key: String,
    pub value: NvsValue,
    pub span: u8,
    pub chunk_index: u8,
    /// Stored checksum; never compared against the slot contents.
    pub crc32: u32,
}

/// Decode every populated slot of every live page, in page then slot order.
///
/// The buffer must consist of whole pages. Slots with an empty key are noise
/// and are dropped.
pub fn decode(bytes: &[u8]) -> Result<Vec<NvsEntry>> {
    if bytes.len() % PAGE_SIZE != 0 {
        return Err(Error::format(format!(
            "NVS region of {} bytes is not a whole number of {}-byte pages",
            bytes.len(),
            PAGE_SIZE
        )));
    }

    let mut entries = Vec::new();
    for (index, page) in bytes.chunks_exact(PAGE_SIZE).enumerate() {
        let state = FieldReader::new(page).u32_le().map_err(Error::into_format)?;
        if state == PAGE_STATE_ERASED || state == PAGE_STATE_UNINITIALIZED {
            tracing::debug!("page {} state 0x{:08X}, skipped", index, state);
            continue;
        }

        let before = entries.len();
        for slot in page[PAGE_HEADER_SIZE..].chunks_exact(SLOT_SIZE) {
            if let Some(entry) = decode_slot(slot).map_err(Error::into_format)? {
                entries.push(entry);
            }
        }
        tracing::debug!(
            "page {} state 0x{:08X}: {} entries",
            index,
            state,
            entries.len() - before
        );
    }

    tracing::info!("decoded {} NVS entries", entries.len());
    Ok(entries)
}

/// Decode one 32-byte slot; `None` for unused slots and keyless noise.
pub fn decode_slot(slot: &[u8]) -> Result<Option<NvsEntry>> {
    let mut reader = FieldReader::new(slot);
    let namespace_index = reader.u8()?;
    if namespace_index == EMPTY_SLOT {
        return Ok(None);
    }

    let nvs_type = NvsType::from(reader.u8()?);
    let span = reader.u8()?;
    let chunk_index = reader.u8()?;
    let crc32 = reader.u32_le()?;
    let key = reader.c_str(KEY_LEN)?;
    if key.is_empty() {
        return Ok(None);
    }
    let value = decode_value(nvs_type, reader.bytes(VALUE_LEN)?)?;

    Ok(Some(NvsEntry {
        namespace_index,
        nvs_type,
        key,
        value,
        span,
        chunk_index,
        crc32,
    }))
}

fn decode_value(nvs_type: NvsType, raw: &[u8]) -> Result<NvsValue> {
    let mut reader = FieldReader::new(raw);
    let value = match nvs_type {
        NvsType::U8 => NvsValue::U8(reader.u8()?),
        NvsType::I8 => NvsValue::I8(reader.i8()?),
        NvsType::U16 => NvsValue::U16(reader.u16_le()?),
        NvsType::I16 => NvsValue::I16(reader.i16_le()?),
        NvsType::U32 => NvsValue::U32(reader.u32_le()?),
        NvsType::I32 => NvsValue::I32(reader.i32_le()?),
        NvsType::U64 => NvsValue::U64(reader.u64_le()?),
        NvsType::I64 => NvsValue::I64(reader.i64_le()?),
        NvsType::String => NvsValue::String(reader.c_str(VALUE_LEN)?),
        NvsType::Blob => NvsValue::Blob(reader.bytes(VALUE_LEN)?.to_vec()),
        NvsType::Other(_) => {
            let mut opaque = [0u8; VALUE_LEN];
            opaque.copy_from_slice(reader.bytes(VALUE_LEN)?);
            NvsValue::Opaque(opaque)
        }
    };
    Ok(value)
}
