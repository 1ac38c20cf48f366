pub mod backup;
pub mod copier;
pub mod error;
pub mod export;
pub mod fs_scan;
pub mod inspect;
pub mod nvs;
pub mod partition;
pub mod progress;
pub mod reader;
pub mod serial;
pub mod slip;
pub mod transport;
pub mod utils;

pub use crate::copier::{ChunkedFlashCopier, DEFAULT_BLOCK_SIZE};
pub use crate::error::{Error, Result};
pub use crate::transport::{FlashTransport, ImageTransport, flash_size_from_id};

/// Conventional location of the partition table.
pub const PARTITION_TABLE_OFFSET: u32 = 0x8000;
/// Conventional read length of the partition table.
pub const PARTITION_TABLE_SIZE: u32 = 0xC00;

/// A half-open byte range `[offset, offset + size)` in flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlashRegion {
    offset: u32,
    size: u32,
}

impl FlashRegion {
    pub fn new(offset: u32, size: u32) -> Result<Self> {
        if offset.checked_add(size).is_none() {
            return Err(Error::invalid_input(format!(
                "region 0x{:08X}+0x{:X} overflows the 32-bit address space",
                offset, size
            )));
        }
        Ok(Self { offset, size })
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Exclusive end address.
    pub fn end(&self) -> u32 {
        self.offset + self.size
    }

    /// Keep only the first `max` bytes of the region.
    pub fn truncated(&self, max: u32) -> Self {
        Self {
            offset: self.offset,
            size: self.size.min(max),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum Chip {
    #[cfg_attr(feature = "cli", clap(name = "esp32"))]
    Esp32,
    #[cfg_attr(feature = "cli", clap(name = "esp32s2"))]
    Esp32S2,
    #[cfg_attr(feature = "cli", clap(name = "esp32s3"))]
    Esp32S3,
    #[cfg_attr(feature = "cli", clap(name = "esp32c3"))]
    Esp32C3,
    #[cfg_attr(feature = "cli", clap(name = "esp32c6"))]
    Esp32C6,
    #[cfg_attr(feature = "cli", clap(name = "esp8266"))]
    Esp8266,
}

impl Chip {
    pub fn description(&self) -> &'static str {
        match self {
            Chip::Esp32 => "ESP32",
            Chip::Esp32S2 => "ESP32-S2",
            Chip::Esp32S3 => "ESP32-S3",
            Chip::Esp32C3 => "ESP32-C3",
            Chip::Esp32C6 => "ESP32-C6",
            Chip::Esp8266 => "ESP8266",
        }
    }
}
