//! Plain-text tables for decoded flash structures.

use flashscope_lib::fs_scan::FileCandidate;
use flashscope_lib::nvs::NvsEntry;
use flashscope_lib::partition::{PartitionEntry, PartitionTable};
use flashscope_lib::utils::Utils;
use std::io::{self, Write};

pub fn print_partitions<W: Write>(table: &PartitionTable, out: &mut W) -> io::Result<()> {
    writeln!(
        out,
        "{:<16} {:<6} {:<10} {:<10} {:>10} {:<6}",
        "Name", "Type", "SubType", "Offset", "Size", "Flags"
    )?;
    for entry in table {
        writeln!(
            out,
            "{:<16} {:<6} {:<10} {:<10} {:>10} 0x{:x}",
            entry.display_name(),
            entry.type_name(),
            entry.subtype_name(),
            Utils::format_hex(entry.offset),
            Utils::format_bytes(u64::from(entry.size)),
            entry.flags
        )?;
    }
    writeln!(out, "{} partitions", table.len())
}

pub fn print_nvs<W: Write>(
    partition: &PartitionEntry,
    entries: &[NvsEntry],
    out: &mut W,
) -> io::Result<()> {
    writeln!(
        out,
        "NVS partition '{}' at {} ({})",
        partition.display_name(),
        Utils::format_hex(partition.offset),
        Utils::format_bytes(u64::from(partition.size))
    )?;
    writeln!(out, "{:<4} {:<16} {:<8} {}", "NS", "Key", "Type", "Value")?;
    for entry in entries {
        writeln!(
            out,
            "{:<4} {:<16} {:<8} {}",
            entry.namespace_index,
            entry.key,
            entry.nvs_type.to_string(),
            entry.value
        )?;
    }
    writeln!(out, "{} entries", entries.len())
}

pub fn print_files<W: Write>(
    partition: &PartitionEntry,
    files: &[FileCandidate],
    out: &mut W,
) -> io::Result<()> {
    writeln!(
        out,
        "{} partition '{}' at {}",
        partition.subtype_name(),
        partition.display_name(),
        Utils::format_hex(partition.offset)
    )?;
    if files.is_empty() {
        return writeln!(out, "no file names found");
    }
    writeln!(out, "{:<32} {:>10} {:<10} {}", "Name", "Size", "Type", "Confidence")?;
    for file in files {
        writeln!(
            out,
            "{:<32} {:>10} {:<10} {}",
            file.name,
            Utils::format_bytes(u64::from(file.size)),
            file.file_type.to_string(),
            file.confidence
        )?;
    }
    writeln!(out, "{} files", files.len())
}
