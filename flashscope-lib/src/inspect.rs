//! Device-level operations: fetch bytes through the copier, hand them to a decoder.
//!
//! The partition table is returned to the caller and passed back in by
//! reference; nothing here keeps state between calls.

use crate::copier::ChunkedFlashCopier;
use crate::fs_scan::{self, FS_SCAN_WINDOW, FileCandidate};
use crate::nvs::{self, NvsEntry};
use crate::partition::{PartitionEntry, PartitionTable};
use crate::progress::{ProgressHelper, ProgressOperation, ProgressStatus};
use crate::transport::FlashTransport;
use crate::{Error, FlashRegion, PARTITION_TABLE_OFFSET, PARTITION_TABLE_SIZE, Result};

/// Read `region` through a progress bar.
pub fn read_region<T: FlashTransport + ?Sized>(
    transport: &mut T,
    region: FlashRegion,
    block_size: u32,
    progress: &ProgressHelper,
) -> Result<Vec<u8>> {
    let mut bar = progress.create_bar(
        100,
        ProgressOperation::ReadFlash {
            address: region.offset(),
            size: region.size(),
        },
    );
    let result = ChunkedFlashCopier::new(transport, block_size)?.copy_range(
        region,
        |_, _| {},
        |percent| bar.set_percent(percent),
    );
    match result {
        Ok(data) => {
            bar.finish(ProgressStatus::Success);
            Ok(data)
        }
        Err(e) => {
            bar.finish(ProgressStatus::Failed);
            Err(e)
        }
    }
}

/// Read and decode the table at the conventional `0x8000` offset.
pub fn read_partition_table<T: FlashTransport + ?Sized>(
    transport: &mut T,
    block_size: u32,
    progress: &ProgressHelper,
) -> Result<PartitionTable> {
    let region = FlashRegion::new(PARTITION_TABLE_OFFSET, PARTITION_TABLE_SIZE)?;
    let bytes = read_region(transport, region, block_size, progress)?;
    let table = PartitionTable::decode(&bytes)?;
    tracing::info!("partition table holds {} entries", table.len());
    Ok(table)
}

pub fn read_nvs<T: FlashTransport + ?Sized>(
    transport: &mut T,
    table: &PartitionTable,
    block_size: u32,
    progress: &ProgressHelper,
) -> Result<(PartitionEntry, Vec<NvsEntry>)> {
    let partition = table
        .find_nvs()
        .ok_or_else(|| Error::PartitionNotFound("nvs".to_string()))?;
    let bytes = read_region(transport, partition.region()?, block_size, progress)?;
    Ok((partition.clone(), nvs::decode(&bytes)?))
}

/// Scan the start of the `spiffs`/`fat` partition for file names.
pub fn scan_filesystem<T: FlashTransport + ?Sized>(
    transport: &mut T,
    table: &PartitionTable,
    block_size: u32,
    progress: &ProgressHelper,
) -> Result<(PartitionEntry, Vec<FileCandidate>)> {
    let partition = table
        .find_filesystem()
        .ok_or_else(|| Error::PartitionNotFound("spiffs/fat".to_string()))?;
    let region = partition.region()?.truncated(FS_SCAN_WINDOW);
    let bytes = read_region(transport, region, block_size, progress)?;
    Ok((partition.clone(), fs_scan::scan(&bytes)))
}
