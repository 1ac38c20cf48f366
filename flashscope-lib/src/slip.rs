//! SLIP framing used by the ESP serial bootloader.
//!
//! Every packet is wrapped in `0xC0` delimiters; `0xC0` and `0xDB` inside the
//! packet are sent as `0xDB 0xDC` and `0xDB 0xDD`.

use crate::{Error, Result};

pub const END: u8 = 0xC0;
pub const ESC: u8 = 0xDB;
pub const ESC_END: u8 = 0xDC;
pub const ESC_ESC: u8 = 0xDD;

/// Wrap `packet` in a SLIP frame.
pub fn encode(packet: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(packet.len() + 2);
    frame.push(END);
    for &byte in packet {
        match byte {
            END => frame.extend_from_slice(&[ESC, ESC_END]),
            ESC => frame.extend_from_slice(&[ESC, ESC_ESC]),
            other => frame.push(other),
        }
    }
    frame.push(END);
    frame
}

/// Incremental frame decoder fed one byte at a time.
///
/// Bytes outside a frame (boot messages printed by the ROM) are dropped.
#[derive(Debug, Default)]
pub struct SlipDecoder {
    packet: Vec<u8>,
    in_frame: bool,
    escaped: bool,
}

impl SlipDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the packet once its closing delimiter arrives.
    pub fn push(&mut self, byte: u8) -> Result<Option<Vec<u8>>> {
        if !self.in_frame {
            if byte == END {
                self.in_frame = true;
            }
            return Ok(None);
        }

        if self.escaped {
            self.escaped = false;
            let unescaped = match byte {
                ESC_END => END,
                ESC_ESC => ESC,
                other => {
                    self.reset();
                    return Err(Error::protocol(format!(
                        "invalid SLIP escape 0xDB 0x{:02X}",
                        other
                    )));
                }
            };
            self.packet.push(unescaped);
            return Ok(None);
        }

        match byte {
            // 两个相邻的 0xC0 之间没有数据，视为新帧的开始
            END if self.packet.is_empty() => Ok(None),
            END => {
                self.in_frame = false;
                Ok(Some(std::mem::take(&mut self.packet)))
            }
            ESC => {
                self.escaped = true;
                Ok(None)
            }
            other => {
                self.packet.push(other);
                Ok(None)
            }
        }
    }

    pub fn reset(&mut self) {
        self.packet.clear();
        self.in_frame = false;
        self.escaped = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut decoder = SlipDecoder::new();
        bytes
            .iter()
            .filter_map(|&b| decoder.push(b).unwrap())
            .collect()
    }

    #[test]
    fn escapes_delimiters_inside_the_packet() {
        assert_eq!(
            encode(&[0x01, END, 0x02, ESC]),
            vec![END, 0x01, ESC, ESC_END, 0x02, ESC, ESC_ESC, END]
        );
    }

    #[test]
    fn decoder_skips_boot_noise_and_empty_frames() {
        let mut stream = b"ets Jun  8 2016 00:22:57\r\n".to_vec();
        stream.extend_from_slice(&encode(&[0x01, 0x08, END]));
        stream.push(END);
        stream.extend_from_slice(&encode(&[0x01, 0x0A]));

        assert_eq!(
            decode_all(&stream),
            vec![vec![0x01, 0x08, END], vec![0x01, 0x0A]]
        );
    }

    #[test]
    fn bad_escape_is_a_protocol_error() {
        let mut decoder = SlipDecoder::new();
        decoder.push(END).unwrap();
        decoder.push(ESC).unwrap();
        assert!(matches!(decoder.push(0x00), Err(Error::Protocol(_))));
        assert_eq!(decoder.push(0x42).unwrap(), None);
    }
}
