use crate::{Error, FlashRegion, Result};

pub struct Utils;
impl Utils {
    /// Parse a number with an optional `0x`/`0b`/`0o` prefix and `k`/`M`/`G` suffix.
    ///
    /// Suffixes are binary multiples, so `4M` is `0x400000`.
    pub fn str_to_u32(s: &str) -> Result<u32> {
        let s = s.trim();

        let (num_str, multiplier) = match s.chars().last() {
            Some('k') | Some('K') => (&s[..s.len() - 1], 1u32 << 10),
            Some('m') | Some('M') => (&s[..s.len() - 1], 1u32 << 20),
            Some('g') | Some('G') => (&s[..s.len() - 1], 1u32 << 30),
            _ => (s, 1),
        };

        let unsigned: u32 = if let Some(hex) = num_str
            .strip_prefix("0x")
            .or_else(|| num_str.strip_prefix("0X"))
        {
            u32::from_str_radix(hex, 16)?
        } else if let Some(bin) = num_str.strip_prefix("0b") {
            u32::from_str_radix(bin, 2)?
        } else if let Some(oct) = num_str.strip_prefix("0o") {
            u32::from_str_radix(oct, 8)?
        } else {
            num_str.parse()?
        };

        unsigned
            .checked_mul(multiplier)
            .ok_or_else(|| Error::invalid_input(format!("{} does not fit in 32 bits", s)))
    }

    /// Parse `address:size`, e.g. `0x9000:0x6000` or `0:4M`.
    pub fn parse_region(s: &str) -> Result<FlashRegion> {
        let (address, size) = s
            .split_once(':')
            .ok_or_else(|| Error::invalid_input(format!("expected address:size, got {}", s)))?;
        FlashRegion::new(Self::str_to_u32(address)?, Self::str_to_u32(size)?)
    }

    /// `0x` followed by at least six upper-case hex digits.
    pub fn format_hex(value: u32) -> String {
        format!("0x{:06X}", value)
    }

    /// Human-readable size with up to two decimals, e.g. `1.5 KB`.
    pub fn format_bytes(bytes: u64) -> String {
        const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
        if bytes == 0 {
            return "0 Bytes".to_string();
        }

        let mut value = bytes as f64;
        let mut unit = 0;
        while value >= 1024.0 && unit < UNITS.len() - 1 {
            value /= 1024.0;
            unit += 1;
        }

        let text = format!("{:.2}", value);
        let text = text.trim_end_matches('0').trim_end_matches('.');
        format!("{} {}", text, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_with_prefixes_and_suffixes() {
        assert_eq!(Utils::str_to_u32("0x8000").unwrap(), 0x8000);
        assert_eq!(Utils::str_to_u32("0b101").unwrap(), 5);
        assert_eq!(Utils::str_to_u32("0o17").unwrap(), 15);
        assert_eq!(Utils::str_to_u32(" 4096 ").unwrap(), 4096);
        assert_eq!(Utils::str_to_u32("4k").unwrap(), 0x1000);
        assert_eq!(Utils::str_to_u32("4M").unwrap(), 0x40_0000);
        assert!(Utils::str_to_u32("zz").is_err());
        assert!(Utils::str_to_u32("8G").is_err());
    }

    #[test]
    fn region_from_address_and_size() {
        let region = Utils::parse_region("0x9000:0x6000").unwrap();
        assert_eq!(region.offset(), 0x9000);
        assert_eq!(region.size(), 0x6000);
        assert!(Utils::parse_region("0x9000").is_err());
        assert!(Utils::parse_region("0xFFFFFFFF:2").is_err());
    }

    #[test]
    fn hex_and_byte_formatting() {
        assert_eq!(Utils::format_hex(0x9000), "0x009000");
        assert_eq!(Utils::format_hex(0x1234_5678), "0x12345678");
        assert_eq!(Utils::format_bytes(0), "0 Bytes");
        assert_eq!(Utils::format_bytes(512), "512 Bytes");
        assert_eq!(Utils::format_bytes(1536), "1.5 KB");
        assert_eq!(Utils::format_bytes(0x6000), "24 KB");
        assert_eq!(Utils::format_bytes(4 * 1024 * 1024), "4 MB");
    }
}
