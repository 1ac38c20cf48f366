//! ESP partition table decoding.
//!
//! The table is a run of 32-byte rows starting at the first byte of the
//! supplied buffer. Each row is laid out as:
//!
//! ```text
//! 0..2   magic   (0xAA50, read big-endian)
//! 2      type
//! 3      subtype
//! 4..8   offset  (little-endian)
//! 8..12  size    (little-endian)
//! 12..28 name    (NUL padded)
//! 28..32 flags   (little-endian)
//! ```

use crate::reader::FieldReader;
use crate::{Error, FlashRegion, Result};

pub const PARTITION_MAGIC: u16 = 0xAA50;
pub const ENTRY_SIZE: usize = 32;
const NAME_LEN: usize = 16;

pub const TYPE_APP: u8 = 0x00;
pub const TYPE_DATA: u8 = 0x01;

pub const SUBTYPE_DATA_NVS: u8 = 0x02;
pub const SUBTYPE_DATA_FAT: u8 = 0x81;
pub const SUBTYPE_DATA_SPIFFS: u8 = 0x82;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionEntry {
    pub magic: u16,
    pub partition_type: u8,
    pub subtype: u8,
    pub offset: u32,
    pub size: u32,
    pub name: String,
    pub flags: u32,
}

impl PartitionEntry {
    pub fn type_name(&self) -> String {
        match self.partition_type {
            TYPE_APP => "app".to_string(),
            TYPE_DATA => "data".to_string(),
            other => format!("0x{:x}", other),
        }
    }

    pub fn subtype_name(&self) -> String {
        subtype_name(self.partition_type, self.subtype)
    }

    /// Name for display; rows with an empty name show as `unnamed`.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            "unnamed"
        } else {
            &self.name
        }
    }

    pub fn region(&self) -> Result<FlashRegion> {
        FlashRegion::new(self.offset, self.size)
    }

    pub fn is_data(&self, subtype: u8) -> bool {
        self.partition_type == TYPE_DATA && self.subtype == subtype
    }

    /// Encode this entry as an on-flash row. Names longer than 16 bytes are cut.
    pub fn to_bytes(&self) -> [u8; ENTRY_SIZE] {
        let mut row = [0u8; ENTRY_SIZE];
        row[0..2].copy_from_slice(&self.magic.to_be_bytes());
        row[2] = self.partition_type;
        row[3] = self.subtype;
        row[4..8].copy_from_slice(&self.offset.to_le_bytes());
        row[8..12].copy_from_slice(&self.size.to_le_bytes());
        let name: Vec<u8> = self.name.chars().map(|c| c as u32 as u8).collect();
        let len = name.len().min(NAME_LEN);
        row[12..12 + len].copy_from_slice(&name[..len]);
        row[28..32].copy_from_slice(&self.flags.to_le_bytes());
        row
    }

    fn decode(row: &[u8]) -> Result<Self> {
        let mut reader = FieldReader::new(row);
        Ok(Self {
            magic: reader.u16_be()?,
            partition_type: reader.u8()?,
            subtype: reader.u8()?,
            offset: reader.u32_le()?,
            size: reader.u32_le()?,
            name: reader.c_str(NAME_LEN)?,
            flags: reader.u32_le()?,
        })
    }
}

fn subtype_name(partition_type: u8, subtype: u8) -> String {
    let known = match (partition_type, subtype) {
        (TYPE_APP, 0x00) => Some("factory"),
        (TYPE_APP, 0x20) => Some("test"),
        (TYPE_APP, ota @ 0x10..=0x1F) => return format!("ota_{}", ota - 0x10),
        (TYPE_DATA, 0x00) => Some("ota"),
        (TYPE_DATA, 0x01) => Some("phy"),
        (TYPE_DATA, SUBTYPE_DATA_NVS) => Some("nvs"),
        (TYPE_DATA, 0x03) => Some("coredump"),
        (TYPE_DATA, 0x04) => Some("nvs_keys"),
        (TYPE_DATA, 0x05) => Some("efuse"),
        (TYPE_DATA, 0x80) => Some("esphttpd"),
        (TYPE_DATA, SUBTYPE_DATA_FAT) => Some("fat"),
        (TYPE_DATA, SUBTYPE_DATA_SPIFFS) => Some("spiffs"),
        _ => None,
    };
    match known {
        Some(name) => name.to_string(),
        None => format!("0x{:x}", subtype),
    }
}

/// Decoded partition table in on-flash order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionTable {
    entries: Vec<PartitionEntry>,
}

impl PartitionTable {
    /// Decode a table whose first row sits at `bytes[0]`.
    ///
    /// Fails with a format error when the first row is not a valid entry.
    /// Decoding stops at the first all-`0xFF` or all-`0x00` magic; rows with
    /// any other foreign magic (such as the `0xEBEB` MD5 row) are skipped.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let first_magic = FieldReader::new(bytes)
            .u16_be()
            .map_err(|_| Error::format("bad magic"))?;
        if first_magic != PARTITION_MAGIC {
            return Err(Error::format("bad magic"));
        }
        if bytes.len() < ENTRY_SIZE {
            return Err(Error::format("partition table shorter than one entry"));
        }

        let mut entries = Vec::new();
        let rows = bytes.chunks_exact(ENTRY_SIZE);
        let trailing = rows.remainder().len();

        for (index, row) in rows.enumerate() {
            let magic = u16::from_be_bytes([row[0], row[1]]);
            match magic {
                0xFFFF | 0x0000 => break,
                PARTITION_MAGIC => {
                    let entry = PartitionEntry::decode(row).map_err(Error::into_format)?;
                    tracing::debug!(
                        "partition {} at 0x{:06X} size 0x{:X}",
                        entry.display_name(),
                        entry.offset,
                        entry.size
                    );
                    entries.push(entry);
                }
                other => {
                    tracing::debug!("skipping row {} with magic 0x{:04X}", index, other);
                }
            }
        }

        if trailing != 0 {
            tracing::warn!("ignoring {} trailing bytes after last table row", trailing);
        }
        Ok(Self { entries })
    }

    pub fn from_entries(entries: Vec<PartitionEntry>) -> Self {
        Self { entries }
    }

    /// Encode the table followed by an all-`0xFF` terminator row.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity((self.entries.len() + 1) * ENTRY_SIZE);
        for entry in &self.entries {
            out.extend_from_slice(&entry.to_bytes());
        }
        out.extend_from_slice(&[0xFF; ENTRY_SIZE]);
        out
    }

    pub fn entries(&self) -> &[PartitionEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PartitionEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First `data`/`nvs` partition.
    pub fn find_nvs(&self) -> Option<&PartitionEntry> {
        self.entries.iter().find(|e| e.is_data(SUBTYPE_DATA_NVS))
    }

    /// First `data` partition holding a `spiffs` or `fat` filesystem.
    pub fn find_filesystem(&self) -> Option<&PartitionEntry> {
        self.entries
            .iter()
            .find(|e| e.is_data(SUBTYPE_DATA_SPIFFS) || e.is_data(SUBTYPE_DATA_FAT))
    }
}

impl<'a> IntoIterator for &'a PartitionTable {
    type Item = &'a PartitionEntry;
    type IntoIter = std::slice::Iter<'a, PartitionEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PARTITION_TABLE_SIZE;
    use pretty_assertions::assert_eq;

    fn entry(name: &str, partition_type: u8, subtype: u8, offset: u32, size: u32) -> PartitionEntry {
        PartitionEntry {
            magic: PARTITION_MAGIC,
            partition_type,
            subtype,
            offset,
            size,
            name: name.to_string(),
            flags: 0,
        }
    }

    fn default_table() -> PartitionTable {
        PartitionTable::from_entries(vec![
            entry("nvs", TYPE_DATA, SUBTYPE_DATA_NVS, 0x9000, 0x6000),
            entry("phy_init", TYPE_DATA, 0x01, 0xF000, 0x1000),
            entry("factory", TYPE_APP, 0x00, 0x10000, 0x100000),
            entry("spiffs", TYPE_DATA, SUBTYPE_DATA_SPIFFS, 0x110000, 0xF0000),
        ])
    }

    #[test]
    fn decodes_what_was_encoded() {
        let table = default_table();
        let mut bytes = table.to_bytes();
        bytes.resize(0xC00, 0xFF);

        let decoded = PartitionTable::decode(&bytes).unwrap();
        assert_eq!(decoded, table);
        assert_eq!(decoded.find_nvs().unwrap().offset, 0x9000);
        assert_eq!(decoded.find_filesystem().unwrap().name, "spiffs");
    }

    fn generated_entry(index: usize) -> PartitionEntry {
        let (partition_type, subtype) = match index % 4 {
            0 => (TYPE_DATA, SUBTYPE_DATA_NVS),
            1 => (TYPE_APP, 0x10 + (index % 16) as u8),
            2 => (TYPE_DATA, SUBTYPE_DATA_SPIFFS),
            _ => (0x40 + index as u8, 0x99),
        };
        // 偶数行使用占满 16 字节、没有结尾 NUL 的名字
        let name = if index % 2 == 0 {
            format!("partition_{:06}", index)
        } else {
            format!("p{}", index)
        };
        PartitionEntry {
            magic: PARTITION_MAGIC,
            partition_type,
            subtype,
            offset: 0x9000 + index as u32 * 0x1_0000,
            size: 0x1000 * (index as u32 + 1),
            name,
            flags: (index as u32 + 1) * 0x0101,
        }
    }

    #[test]
    fn generated_tables_round_trip_around_md5_rows() {
        let mut md5_row = [0xFFu8; ENTRY_SIZE];
        md5_row[0] = 0xEB;
        md5_row[1] = 0xEB;
        md5_row[16..].copy_from_slice(&[0x5C; 16]);

        for count in 1..=40 {
            let table = PartitionTable::from_entries((0..count).map(generated_entry).collect());
            let mut bytes = Vec::new();
            for (i, entry) in table.iter().enumerate() {
                if i > 0 {
                    bytes.extend_from_slice(&md5_row);
                }
                bytes.extend_from_slice(&entry.to_bytes());
            }
            bytes.resize(PARTITION_TABLE_SIZE as usize, 0xFF);

            let decoded = PartitionTable::decode(&bytes).unwrap();
            assert_eq!(decoded, table, "table of {} entries", count);
            assert_eq!(PartitionTable::decode(&table.to_bytes()).unwrap(), table);
        }

        // 没有任何分区时第一行就是终止行
        assert!(matches!(
            PartitionTable::decode(&PartitionTable::default().to_bytes()),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn bad_first_magic_is_a_format_error() {
        let mut bytes = default_table().to_bytes();
        bytes[0] = 0x50;
        bytes[1] = 0xAA;
        assert!(matches!(
            PartitionTable::decode(&bytes),
            Err(Error::Format(msg)) if msg == "bad magic"
        ));

        assert!(matches!(
            PartitionTable::decode(&[0xFF; 64]),
            Err(Error::Format(_))
        ));
        assert!(matches!(PartitionTable::decode(&[]), Err(Error::Format(_))));
    }

    #[test]
    fn stray_rows_are_skipped_and_zero_magic_terminates() {
        let table = default_table();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&table.entries()[0].to_bytes());
        let mut md5_row = [0u8; ENTRY_SIZE];
        md5_row[0] = 0xEB;
        md5_row[1] = 0xEB;
        bytes.extend_from_slice(&md5_row);
        bytes.extend_from_slice(&table.entries()[2].to_bytes());
        bytes.extend_from_slice(&[0u8; ENTRY_SIZE]);
        bytes.extend_from_slice(&table.entries()[3].to_bytes());

        let decoded = PartitionTable::decode(&bytes).unwrap();
        let names: Vec<_> = decoded.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["nvs", "factory"]);
    }

    #[test]
    fn name_without_nul_stops_at_field_boundary() {
        let mut long = entry("", TYPE_APP, 0x10, 0x10000, 0x1000);
        long.name = "abcdefghijklmnopqrst".to_string();
        let decoded = PartitionTable::decode(&long.to_bytes()).unwrap();
        assert_eq!(decoded.entries()[0].name, "abcdefghijklmnop");
        assert_eq!(decoded.entries()[0].display_name(), "abcdefghijklmnop");
    }

    #[test]
    fn symbolic_type_names() {
        assert_eq!(entry("a", TYPE_APP, 0x00, 0, 0).subtype_name(), "factory");
        assert_eq!(entry("a", TYPE_APP, 0x13, 0, 0).subtype_name(), "ota_3");
        assert_eq!(entry("a", TYPE_APP, 0x20, 0, 0).subtype_name(), "test");
        assert_eq!(entry("a", TYPE_APP, 0x42, 0, 0).subtype_name(), "0x42");
        assert_eq!(entry("a", TYPE_DATA, 0x05, 0, 0).subtype_name(), "efuse");
        assert_eq!(entry("a", TYPE_DATA, 0x81, 0, 0).subtype_name(), "fat");
        assert_eq!(entry("a", TYPE_DATA, 0x99, 0, 0).subtype_name(), "0x99");
        assert_eq!(entry("a", 0x40, 0x01, 0, 0).type_name(), "0x40");
        assert_eq!(entry("a", 0x40, 0x01, 0, 0).subtype_name(), "0x1");
        assert_eq!(entry("", TYPE_DATA, 0x01, 0, 0).display_name(), "unnamed");
    }

    #[test]
    fn fat_partition_counts_as_filesystem() {
        let table = PartitionTable::from_entries(vec![
            entry("factory", TYPE_APP, 0x00, 0x10000, 0x100000),
            entry("storage", TYPE_DATA, SUBTYPE_DATA_FAT, 0x110000, 0x10000),
        ]);
        assert_eq!(table.find_filesystem().unwrap().name, "storage");
        assert!(table.find_nvs().is_none());
    }
}
