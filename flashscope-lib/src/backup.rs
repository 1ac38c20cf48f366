//! Full or partial flash backups and whole-chip restore.
//!
//! A backup is a raw `.bin` image of the requested range plus a `.json`
//! sidecar describing where it came from. Restore only consumes the image.

use crate::copier::ChunkedFlashCopier;
use crate::inspect::read_region;
use crate::progress::{ProgressHelper, ProgressOperation, ProgressStatus};
use crate::transport::{FlashTransport, flash_size_from_id};
use crate::utils::Utils;
use crate::{Error, FlashRegion, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    pub chip_type: String,
    pub flash_size: u32,
    /// RFC 3339 timestamp of when the read finished.
    pub backup_date: String,
    /// Start address as `0x` plus six upper-case hex digits.
    pub flash_address: String,
    pub size: u32,
    pub partial: bool,
}

impl BackupMetadata {
    pub fn new(chip_type: impl Into<String>, flash_size: u32, region: FlashRegion) -> Self {
        Self {
            chip_type: chip_type.into(),
            flash_size,
            backup_date: chrono::Utc::now().to_rfc3339(),
            flash_address: Utils::format_hex(region.offset()),
            size: region.size(),
            partial: region.offset() != 0 || region.size() != flash_size,
        }
    }
}

/// Files produced by [`write_backup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupFiles {
    pub image: PathBuf,
    pub metadata: PathBuf,
}

/// Flash size from an explicit value, else the transport, else its JEDEC ID.
///
/// Fails rather than guessing when none of them is known.
pub fn resolve_flash_size<T: FlashTransport + ?Sized>(
    transport: &T,
    explicit: Option<u32>,
) -> Result<u32> {
    if let Some(size) = explicit.or_else(|| transport.flash_size()) {
        return Ok(size);
    }
    match transport.flash_id() {
        Some(id) => flash_size_from_id(id).ok_or_else(|| {
            Error::invalid_input(format!(
                "flash id 0x{:06X} has no known capacity, give the flash size explicitly",
                id
            ))
        }),
        None => Err(Error::invalid_input(
            "flash size unknown, give the flash size explicitly",
        )),
    }
}

/// `esp_backup_<YYYY-MM-DD>` for today's date.
pub fn default_stem() -> String {
    format!("esp_backup_{}", chrono::Utc::now().format("%Y-%m-%d"))
}

/// Read `region` and describe it.
///
/// A region that does not cover `[0, flash_size)` exactly is marked partial.
pub fn backup<T: FlashTransport + ?Sized>(
    transport: &mut T,
    region: FlashRegion,
    flash_size: u32,
    block_size: u32,
    progress: &ProgressHelper,
) -> Result<(Vec<u8>, BackupMetadata)> {
    if region.end() > flash_size {
        return Err(Error::invalid_input(format!(
            "backup range {}..{} exceeds flash size {}",
            Utils::format_hex(region.offset()),
            Utils::format_hex(region.end()),
            Utils::format_hex(flash_size)
        )));
    }
    let chip = transport.chip_description();
    let data = read_region(transport, region, block_size, progress)?;
    let metadata = BackupMetadata::new(chip, flash_size, region);
    tracing::info!(
        "backed up {} from {}",
        Utils::format_bytes(data.len() as u64),
        metadata.flash_address
    );
    Ok((data, metadata))
}

/// Store `<stem>.bin` and a pretty-printed `<stem>.json` in `dir`.
pub fn write_backup<P: AsRef<Path>>(
    dir: P,
    stem: &str,
    data: &[u8],
    metadata: &BackupMetadata,
) -> Result<BackupFiles> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let files = BackupFiles {
        image: dir.join(format!("{}.bin", stem)),
        metadata: dir.join(format!("{}.json", stem)),
    };
    fs::write(&files.image, data)?;
    fs::write(&files.metadata, serde_json::to_string_pretty(metadata)?)?;
    tracing::debug!("wrote {} and {}", files.image.display(), files.metadata.display());
    Ok(files)
}

/// Erase the whole chip, then write `image` from address 0.
///
/// The image is checked against the flash size before anything is erased.
pub fn restore<T: FlashTransport + ?Sized>(
    transport: &mut T,
    image: &[u8],
    flash_size: Option<u32>,
    block_size: u32,
    progress: &ProgressHelper,
) -> Result<()> {
    let flash_size = resolve_flash_size(&*transport, flash_size)?;
    if image.len() as u64 > u64::from(flash_size) {
        return Err(Error::invalid_input(format!(
            "image of {} does not fit in {} of flash",
            Utils::format_bytes(image.len() as u64),
            Utils::format_bytes(u64::from(flash_size))
        )));
    }
    let mut copier = ChunkedFlashCopier::new(transport, block_size)?;

    let spinner = progress.create_spinner(ProgressOperation::EraseAll);
    if let Err(e) = copier.transport().erase_all() {
        spinner.finish(ProgressStatus::Failed);
        return Err(e);
    }
    spinner.finish(ProgressStatus::Success);

    let mut bar = progress.create_bar(
        100,
        ProgressOperation::WriteFlash {
            address: 0,
            size: image.len() as u32,
        },
    );
    match copier.write_range(0, image, |percent| bar.set_percent(percent)) {
        Ok(()) => {
            bar.finish(ProgressStatus::Success);
            tracing::info!("restored {}", Utils::format_bytes(image.len() as u64));
            Ok(())
        }
        Err(e) => {
            bar.finish(ProgressStatus::Failed);
            Err(e)
        }
    }
}
