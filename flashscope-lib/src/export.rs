//! CSV export of decoded structures.
//!
//! Header rows name the record fields verbatim; the `csv` writer quotes any
//! value containing a delimiter, quote or line break.

use crate::Result;
use crate::fs_scan::FileCandidate;
use crate::nvs::NvsEntry;
use crate::partition::PartitionTable;
use csv::Writer;
use std::io::Write;

pub fn write_partitions_csv<W: Write>(table: &PartitionTable, out: W) -> Result<()> {
    let mut wtr = Writer::from_writer(out);
    wtr.write_record(["magic", "type", "subtype", "offset", "size", "name", "flags"])?;
    for entry in table {
        wtr.write_record([
            format!("0x{:04X}", entry.magic),
            entry.type_name(),
            entry.subtype_name(),
            format!("0x{:06X}", entry.offset),
            format!("0x{:06X}", entry.size),
            entry.name.clone(),
            format!("0x{:x}", entry.flags),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_nvs_csv<W: Write>(entries: &[NvsEntry], out: W) -> Result<()> {
    let mut wtr = Writer::from_writer(out);
    wtr.write_record([
        "namespaceIndex",
        "type",
        "key",
        "value",
        "span",
        "chunkIndex",
        "crc32",
    ])?;
    for entry in entries {
        wtr.write_record([
            entry.namespace_index.to_string(),
            entry.nvs_type.to_string(),
            entry.key.clone(),
            entry.value.to_string(),
            entry.span.to_string(),
            entry.chunk_index.to_string(),
            format!("0x{:08X}", entry.crc32),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_files_csv<W: Write>(files: &[FileCandidate], out: W) -> Result<()> {
    let mut wtr = Writer::from_writer(out);
    wtr.write_record(["name", "size", "confidence", "type"])?;
    for file in files {
        wtr.write_record([
            file.name.clone(),
            file.size.to_string(),
            file.confidence.to_string(),
            file.file_type.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs_scan::{Confidence, FileType};
    use crate::nvs::{NvsType, NvsValue};
    use crate::partition::{PARTITION_MAGIC, PartitionEntry};

    #[test]
    fn partition_rows() {
        let table = PartitionTable::from_entries(vec![PartitionEntry {
            magic: PARTITION_MAGIC,
            partition_type: 1,
            subtype: 2,
            offset: 0x9000,
            size: 0x6000,
            name: "nvs".to_string(),
            flags: 0,
        }]);
        let mut out = Vec::new();
        write_partitions_csv(&table, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "magic,type,subtype,offset,size,name,flags\n0xAA50,data,nvs,0x009000,0x006000,nvs,0x0\n"
        );
    }

    #[test]
    fn nvs_values_with_delimiters_are_quoted() {
        let entries = vec![NvsEntry {
            namespace_index: 1,
            nvs_type: NvsType::String,
            key: "greeting".to_string(),
            value: NvsValue::String("hi, you".to_string()),
            span: 1,
            chunk_index: 255,
            crc32: 0x1234,
        }];
        let mut out = Vec::new();
        write_nvs_csv(&entries, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("namespaceIndex,type,key,value,span,chunkIndex,crc32\n"));
        assert!(text.contains("1,String,greeting,\"hi, you\",1,255,0x00001234"));
    }

    #[test]
    fn file_rows() {
        let files = vec![FileCandidate {
            name: "/index.html".to_string(),
            size: 1024,
            confidence: Confidence::High,
            file_type: FileType::Html,
        }];
        let mut out = Vec::new();
        write_files_csv(&files, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "name,size,confidence,type\n/index.html,1024,HIGH,HTML\n"
        );
    }
}
