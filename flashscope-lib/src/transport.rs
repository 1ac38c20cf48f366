//! The read/write collaborator every flash operation goes through.

use crate::{Error, Result};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Blocking access to the device's flash, one outstanding request at a time.
///
/// Implementations own any timeout or retry policy; callers treat every error
/// returned here as fatal to the operation in progress.
pub trait FlashTransport {
    fn read_bytes(&mut self, offset: u32, length: u32) -> Result<Vec<u8>>;

    fn write_bytes(&mut self, offset: u32, data: &[u8]) -> Result<()>;

    fn erase_all(&mut self) -> Result<()>;

    /// Human readable chip name used in backup metadata.
    fn chip_description(&self) -> String {
        "unknown".to_string()
    }

    /// Total flash size when the transport knows it.
    fn flash_size(&self) -> Option<u32> {
        None
    }

    /// JEDEC ID reported by the flash chip, if the link can query it.
    fn flash_id(&self) -> Option<u32> {
        None
    }
}

/// Size in bytes encoded by the capacity byte (bits 16..24) of a JEDEC flash ID.
pub fn flash_size_from_id(flash_id: u32) -> Option<u32> {
    match (flash_id >> 16) & 0xFF {
        size_id @ 0x12..=0x18 => Some((256 * 1024) << (size_id - 0x12)),
        _ => None,
    }
}

impl<T: FlashTransport + ?Sized> FlashTransport for Box<T> {
    fn read_bytes(&mut self, offset: u32, length: u32) -> Result<Vec<u8>> {
        (**self).read_bytes(offset, length)
    }

    fn write_bytes(&mut self, offset: u32, data: &[u8]) -> Result<()> {
        (**self).write_bytes(offset, data)
    }

    fn erase_all(&mut self) -> Result<()> {
        (**self).erase_all()
    }

    fn chip_description(&self) -> String {
        (**self).chip_description()
    }

    fn flash_size(&self) -> Option<u32> {
        (**self).flash_size()
    }

    fn flash_id(&self) -> Option<u32> {
        (**self).flash_id()
    }
}

/// A raw flash dump standing in for the device.
///
/// Reads and writes operate on an in-memory copy; [`ImageTransport::save`]
/// persists it back to the file it was loaded from.
#[derive(Debug, Clone)]
pub struct ImageTransport {
    path: Option<PathBuf>,
    chip: String,
    data: Vec<u8>,
    dirty: bool,
}

impl ImageTransport {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut data = Vec::new();
        File::open(path)?.read_to_end(&mut data)?;
        if u32::try_from(data.len()).is_err() {
            return Err(Error::invalid_input(format!(
                "image '{}' exceeds the 32-bit flash address space",
                path.display()
            )));
        }
        tracing::info!("loaded flash image {} ({} bytes)", path.display(), data.len());
        Ok(Self {
            path: Some(path.to_path_buf()),
            chip: "image".to_string(),
            data,
            dirty: false,
        })
    }

    /// An image that only lives in memory, e.g. a freshly erased chip of `size` bytes.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            path: None,
            chip: "image".to_string(),
            data,
            dirty: false,
        }
    }

    pub fn with_chip(mut self, chip: impl Into<String>) -> Self {
        self.chip = chip.into();
        self
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Write modified contents back to the source file.
    ///
    /// The new image is staged in the same directory and renamed over the old one.
    pub fn save(&mut self) -> Result<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        let mut staged = match dir {
            Some(dir) => tempfile::NamedTempFile::new_in(dir)?,
            None => tempfile::NamedTempFile::new_in(".")?,
        };
        staged.write_all(&self.data)?;
        staged.flush()?;
        staged.persist(path).map_err(|e| Error::Io(e.error))?;
        self.dirty = false;
        Ok(())
    }

    fn range(&self, offset: u32, length: usize) -> Result<std::ops::Range<usize>> {
        let start = offset as usize;
        let end = start
            .checked_add(length)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                Error::transport(format!(
                    "access of {} bytes at 0x{:08X} is outside the {}-byte image",
                    length,
                    offset,
                    self.data.len()
                ))
            })?;
        Ok(start..end)
    }
}

impl FlashTransport for ImageTransport {
    fn read_bytes(&mut self, offset: u32, length: u32) -> Result<Vec<u8>> {
        let range = self.range(offset, length as usize)?;
        Ok(self.data[range].to_vec())
    }

    fn write_bytes(&mut self, offset: u32, data: &[u8]) -> Result<()> {
        let range = self.range(offset, data.len())?;
        self.data[range].copy_from_slice(data);
        self.dirty = true;
        Ok(())
    }

    fn erase_all(&mut self) -> Result<()> {
        self.data.fill(0xFF);
        self.dirty = true;
        Ok(())
    }

    fn chip_description(&self) -> String {
        self.chip.clone()
    }

    fn flash_size(&self) -> Option<u32> {
        u32::try_from(self.data.len()).ok()
    }
}
