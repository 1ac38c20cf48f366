//! 基于 ESP 串口引导程序（ROM loader）的 Flash 传输
//!
//! 每个请求是一个 SLIP 帧：
//!
//! ```text
//! 0x00 | opcode | len (u16 LE) | checksum (u32 LE) | data[len]
//! ```
//!
//! 设备回复 `0x01 | opcode | len | value (u32 LE) | data`，data 末尾是状态字节
//! （ESP8266 为 2 字节，其余芯片的 ROM 为 4 字节，只有前两个有意义）。
//! ROM 只在 ESP32 和 ESP8266 上支持读取 Flash (`READ_FLASH_SLOW`)。

use crate::reader::FieldReader;
use crate::slip::{self, SlipDecoder};
use crate::transport::{FlashTransport, flash_size_from_id};
use crate::utils::Utils;
use crate::{Chip, Error, Result};
use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};
use strum::{Display, FromRepr};

/// ROM 引导程序命令
#[derive(Display, FromRepr, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    FlashBegin = 0x02,
    FlashData = 0x03,
    Sync = 0x08,
    WriteReg = 0x09,
    ReadReg = 0x0A,
    SpiSetParams = 0x0B,
    SpiAttach = 0x0D,
    ReadFlashSlow = 0x0E,
    ChangeBaudrate = 0x0F,
}

const DIRECTION_REQUEST: u8 = 0x00;
const DIRECTION_RESPONSE: u8 = 0x01;

/// ROM 复位后固定使用的波特率
pub const ROM_BAUD: u32 = 115_200;

const CHIP_DETECT_MAGIC_REG: u32 = 0x4000_1000;
const FLASH_WRITE_SIZE: usize = 0x400;
const READ_SLOW_BLOCK: u32 = 64;
const SECTOR_SIZE: u32 = 0x1000;
const CHECKSUM_SEED: u8 = 0xEF;

const SPI_FLASH_RDID: u32 = 0x9F;
const SPI_CMD_USR: u32 = 1 << 18;
const SPI_USR_COMMAND: u32 = 1 << 31;
const SPI_USR_MISO: u32 = 1 << 28;
const SPI_USR2_COMMAND_LEN_SHIFT: u32 = 28;
const SPI_MISO_BITLEN_SHIFT_ESP8266: u32 = 8;

const SYNC_ATTEMPTS: usize = 7;
const SYNC_TIMEOUT: Duration = Duration::from_millis(100);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
const ERASE_TIMEOUT_PER_MIB: Duration = Duration::from_secs(30);

/// 串口参数
#[derive(Debug, Clone)]
pub struct SerialOptions {
    pub port_name: String,
    pub baud: u32,
    /// 期望的芯片；与探测结果不符时只给出警告
    pub chip: Option<Chip>,
    /// 覆盖从 Flash ID 推算出的容量
    pub flash_size: Option<u32>,
}

/// 一次命令的应答，`data` 已去掉状态字节
#[derive(Debug, Clone, PartialEq, Eq)]
struct Response {
    value: u32,
    data: Vec<u8>,
}

/// SPI 控制器寄存器布局，用于在 ROM 中执行 RDID
#[derive(Debug, Clone, Copy)]
struct SpiRegisters {
    base: u32,
    usr: u32,
    usr1: u32,
    usr2: u32,
    miso_dlen: Option<u32>,
    w0: u32,
}

impl SpiRegisters {
    fn for_chip(chip: &Chip) -> Self {
        let later = |base| Self {
            base,
            usr: 0x18,
            usr1: 0x1C,
            usr2: 0x20,
            miso_dlen: Some(0x28),
            w0: 0x58,
        };
        match chip {
            Chip::Esp8266 => Self {
                base: 0x6000_0200,
                usr: 0x1C,
                usr1: 0x20,
                usr2: 0x24,
                miso_dlen: None,
                w0: 0x40,
            },
            Chip::Esp32 => Self {
                base: 0x3FF4_2000,
                usr: 0x1C,
                usr1: 0x20,
                usr2: 0x24,
                miso_dlen: Some(0x2C),
                w0: 0x80,
            },
            Chip::Esp32S2 => later(0x3F40_2000),
            Chip::Esp32S3 | Chip::Esp32C3 => later(0x6000_2000),
            Chip::Esp32C6 => later(0x6000_3000),
        }
    }

    fn cmd(&self) -> u32 {
        self.base
    }

    fn reg(&self, offset: u32) -> u32 {
        self.base + offset
    }
}

fn chip_from_magic(magic: u32) -> Option<Chip> {
    match magic {
        0xFFF0_C101 => Some(Chip::Esp8266),
        0x00F0_1D83 => Some(Chip::Esp32),
        0x0000_07C6 => Some(Chip::Esp32S2),
        0x0000_0009 => Some(Chip::Esp32S3),
        0x6921_506F | 0x1B31_506F | 0x4881_606F | 0x4361_606F => Some(Chip::Esp32C3),
        0x2CE0_806F => Some(Chip::Esp32C6),
        _ => None,
    }
}

fn rom_error_name(code: u8) -> &'static str {
    match code {
        0x05 => "invalid message",
        0x06 => "failed to act on message",
        0x07 => "invalid CRC in message",
        0x08 => "flash write error",
        0x09 => "flash read error",
        0x0A => "flash read length error",
        0x0B => "deflate error",
        _ => "unknown error",
    }
}

fn checksum(data: &[u8]) -> u32 {
    u32::from(data.iter().fold(CHECKSUM_SEED, |acc, b| acc ^ b))
}

/// ESP8266 ROM 的擦除长度计算有误，需要预先修正请求的长度
fn esp8266_erase_size(offset: u32, size: u32) -> u32 {
    const SECTORS_PER_BLOCK: u32 = 16;
    let num_sectors = size.div_ceil(SECTOR_SIZE);
    let start_sector = offset / SECTOR_SIZE;
    let head_sectors = (SECTORS_PER_BLOCK - start_sector % SECTORS_PER_BLOCK).min(num_sectors);
    if num_sectors < 2 * head_sectors {
        num_sectors.div_ceil(2) * SECTOR_SIZE
    } else {
        (num_sectors - head_sectors) * SECTOR_SIZE
    }
}

fn erase_timeout(size: u32) -> Duration {
    let mib = size.div_ceil(1024 * 1024);
    (ERASE_TIMEOUT_PER_MIB * mib).max(DEFAULT_TIMEOUT)
}

fn response_fields<'a>(reader: &mut FieldReader<'a>) -> Result<(u32, &'a [u8])> {
    let size = reader.u16_le()?;
    let value = reader.u32_le()?;
    Ok((value, reader.bytes(size as usize)?))
}

fn is_retryable(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
    )
}

/// 通过 DTR/RTS 让芯片复位进入下载模式
fn reset_into_bootloader(port: &mut dyn SerialPort) -> Result<()> {
    port.write_data_terminal_ready(false)?;
    port.write_request_to_send(true)?;
    std::thread::sleep(Duration::from_millis(100));
    port.write_data_terminal_ready(true)?;
    port.write_request_to_send(false)?;
    std::thread::sleep(Duration::from_millis(50));
    port.write_data_terminal_ready(false)?;
    Ok(())
}

pub struct SerialTransport<P = Box<dyn SerialPort>> {
    port: P,
    decoder: SlipDecoder,
    chip: Option<Chip>,
    flash_id: Option<u32>,
    flash_size: Option<u32>,
}

impl SerialTransport<Box<dyn SerialPort>> {
    /// 打开串口，复位芯片并完成握手
    pub fn open(options: &SerialOptions) -> Result<Self> {
        let mut port = serialport::new(&options.port_name, ROM_BAUD)
            .timeout(Duration::from_millis(50))
            .open()?;
        reset_into_bootloader(port.as_mut())?;

        let mut transport = Self::connect(port, options)?;
        if options.baud != ROM_BAUD {
            transport.change_baud(options.baud)?;
        }
        tracing::info!(
            "connected to {} on {} at {} baud",
            transport.chip_description(),
            options.port_name,
            options.baud
        );
        Ok(transport)
    }

    fn change_baud(&mut self, baud: u32) -> Result<()> {
        if self.chip == Some(Chip::Esp8266) {
            tracing::warn!("the ESP8266 ROM cannot change baud rate, staying at {}", ROM_BAUD);
            return Ok(());
        }
        let mut data = baud.to_le_bytes().to_vec();
        data.extend_from_slice(&0u32.to_le_bytes());
        self.command(Command::ChangeBaudrate, &data, 0, DEFAULT_TIMEOUT)?;
        self.port.set_baud_rate(baud)?;
        std::thread::sleep(Duration::from_millis(50));
        self.port.clear(serialport::ClearBuffer::Input)?;
        self.decoder.reset();
        Ok(())
    }
}

impl<P: Read + Write> SerialTransport<P> {
    /// 在已经处于下载模式的链路上同步、识别芯片并读取 Flash ID
    pub fn connect(port: P, options: &SerialOptions) -> Result<Self> {
        let mut transport = Self {
            port,
            decoder: SlipDecoder::new(),
            chip: None,
            flash_id: None,
            flash_size: options.flash_size,
        };
        transport.sync()?;

        let magic = transport.read_reg(CHIP_DETECT_MAGIC_REG)?;
        let chip = chip_from_magic(magic)
            .ok_or_else(|| Error::protocol(format!("unknown chip magic 0x{:08X}", magic)))?;
        if let Some(expected) = options.chip.as_ref().filter(|c| **c != chip) {
            tracing::warn!(
                "expected {} but the bootloader reports {}",
                expected.description(),
                chip.description()
            );
        }
        transport.chip = Some(chip);

        transport.attach_flash()?;
        let id = transport.read_flash_id()?;
        transport.flash_id = Some(id);
        if transport.flash_size.is_none() {
            transport.flash_size = flash_size_from_id(id);
        }
        match transport.flash_size {
            Some(size) => transport.set_flash_params(size)?,
            None => tracing::warn!("unrecognised flash id 0x{:06X}", id),
        }
        tracing::debug!("flash id 0x{:06X}, size {:?}", id, transport.flash_size);
        Ok(transport)
    }

    fn status_len(&self) -> usize {
        match self.chip {
            Some(Chip::Esp8266) => 2,
            _ => 4,
        }
    }

    fn command(
        &mut self,
        command: Command,
        data: &[u8],
        checksum: u32,
        timeout: Duration,
    ) -> Result<Response> {
        let len = u16::try_from(data.len())
            .map_err(|_| Error::invalid_input(format!("{} payload too large", command)))?;
        let mut packet = Vec::with_capacity(8 + data.len());
        packet.push(DIRECTION_REQUEST);
        packet.push(command as u8);
        packet.extend_from_slice(&len.to_le_bytes());
        packet.extend_from_slice(&checksum.to_le_bytes());
        packet.extend_from_slice(data);

        tracing::trace!("command {} ({} bytes)", command, data.len());
        self.port.write_all(&slip::encode(&packet))?;
        self.port.flush()?;

        let deadline = Instant::now() + timeout;
        loop {
            let packet = self.read_packet(deadline)?;
            let mut reader = FieldReader::new(&packet);
            let direction = reader.u8().map_err(|_| Error::protocol("empty response"))?;
            let opcode = reader.u8().map_err(|_| Error::protocol("short response"))?;
            if direction != DIRECTION_RESPONSE || opcode != command as u8 {
                tracing::debug!(
                    "ignoring packet {:?} while waiting for {}",
                    Command::from_repr(opcode),
                    command
                );
                continue;
            }
            let (value, body) = response_fields(&mut reader)
                .map_err(|e| Error::protocol(format!("malformed {} response: {}", command, e)))?;

            if body.len() < 2 {
                return Err(Error::protocol(format!("{} response has no status", command)));
            }
            let status_at = body.len().saturating_sub(self.status_len());
            let (status, code) = (body[status_at], body[status_at + 1]);
            if status != 0 {
                return Err(Error::protocol(format!(
                    "{} failed: 0x{:02X} ({})",
                    command,
                    code,
                    rom_error_name(code)
                )));
            }
            return Ok(Response {
                value,
                data: body[..status_at].to_vec(),
            });
        }
    }

    fn read_packet(&mut self, deadline: Instant) -> Result<Vec<u8>> {
        let mut byte = [0u8; 1];
        loop {
            if Instant::now() > deadline {
                return Err(Error::timeout("waiting for bootloader response"));
            }
            match self.port.read(&mut byte) {
                Ok(0) => {}
                Ok(_) => {
                    if let Some(packet) = self.decoder.push(byte[0])? {
                        return Ok(packet);
                    }
                }
                Err(e) if is_retryable(&e) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn sync(&mut self) -> Result<()> {
        let mut payload = vec![0x07, 0x07, 0x12, 0x20];
        payload.extend_from_slice(&[0x55; 32]);

        for attempt in 1..=SYNC_ATTEMPTS {
            match self.command(Command::Sync, &payload, 0, SYNC_TIMEOUT) {
                Ok(_) => {
                    // ROM 对一次 SYNC 会回复多次
                    let deadline = Instant::now() + SYNC_TIMEOUT;
                    while self.read_packet(deadline).is_ok() {}
                    self.decoder.reset();
                    return Ok(());
                }
                Err(e @ (Error::Timeout(_) | Error::Protocol(_))) => {
                    tracing::debug!("sync attempt {} failed: {}", attempt, e);
                    self.decoder.reset();
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::timeout("syncing with the ROM bootloader"))
    }

    fn read_reg(&mut self, address: u32) -> Result<u32> {
        let response = self.command(
            Command::ReadReg,
            &address.to_le_bytes(),
            0,
            DEFAULT_TIMEOUT,
        )?;
        Ok(response.value)
    }

    fn write_reg(&mut self, address: u32, value: u32) -> Result<()> {
        let data: Vec<u8> = [address, value, u32::MAX, 0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        self.command(Command::WriteReg, &data, 0, DEFAULT_TIMEOUT)?;
        Ok(())
    }

    fn chip(&self) -> Result<&Chip> {
        self.chip
            .as_ref()
            .ok_or_else(|| Error::protocol("chip not detected yet"))
    }

    fn attach_flash(&mut self) -> Result<()> {
        if self.chip()? == &Chip::Esp8266 {
            // ESP8266 的 ROM 通过一次空的 FLASH_BEGIN 挂载 SPI Flash
            return self.flash_begin(0, 0, 0);
        }
        self.command(Command::SpiAttach, &[0u8; 8], 0, DEFAULT_TIMEOUT)?;
        Ok(())
    }

    fn set_flash_params(&mut self, size: u32) -> Result<()> {
        let data: Vec<u8> = [0, size, 0x1_0000, SECTOR_SIZE, 0x100, 0xFFFF]
            .iter()
            .flat_map(|v: &u32| v.to_le_bytes())
            .collect();
        self.command(Command::SpiSetParams, &data, 0, DEFAULT_TIMEOUT)?;
        Ok(())
    }

    /// 在 ROM 中通过 SPI 用户命令执行 RDID (0x9F)，返回 24 位 JEDEC ID
    fn read_flash_id(&mut self) -> Result<u32> {
        const READ_BITS: u32 = 24;
        let regs = SpiRegisters::for_chip(self.chip()?);
        let old_usr = self.read_reg(regs.reg(regs.usr))?;
        let old_usr2 = self.read_reg(regs.reg(regs.usr2))?;

        match regs.miso_dlen {
            Some(miso_dlen) => self.write_reg(regs.reg(miso_dlen), READ_BITS - 1)?,
            None => self.write_reg(
                regs.reg(regs.usr1),
                (READ_BITS - 1) << SPI_MISO_BITLEN_SHIFT_ESP8266,
            )?,
        }
        self.write_reg(regs.reg(regs.usr), SPI_USR_COMMAND | SPI_USR_MISO)?;
        self.write_reg(
            regs.reg(regs.usr2),
            (7 << SPI_USR2_COMMAND_LEN_SHIFT) | SPI_FLASH_RDID,
        )?;
        self.write_reg(regs.reg(regs.w0), 0)?;
        self.write_reg(regs.cmd(), SPI_CMD_USR)?;

        let mut done = false;
        for _ in 0..10 {
            if self.read_reg(regs.cmd())? & SPI_CMD_USR == 0 {
                done = true;
                break;
            }
        }
        if !done {
            return Err(Error::timeout("SPI flash RDID command"));
        }
        let id = self.read_reg(regs.reg(regs.w0))? & 0x00FF_FFFF;

        self.write_reg(regs.reg(regs.usr), old_usr)?;
        self.write_reg(regs.reg(regs.usr2), old_usr2)?;
        Ok(id)
    }

    /// 擦除 `erase_size` 字节并准备接收 `blocks` 个数据块
    fn flash_begin(&mut self, erase_size: u32, blocks: u32, offset: u32) -> Result<()> {
        let chip = self.chip()?;
        let erase_size = match chip {
            Chip::Esp8266 => esp8266_erase_size(offset, erase_size),
            _ => erase_size,
        };
        let mut params = vec![erase_size, blocks, FLASH_WRITE_SIZE as u32, offset];
        if !matches!(chip, Chip::Esp32 | Chip::Esp8266) {
            // 较新的 ROM 额外需要“是否加密写入”参数
            params.push(0);
        }
        let data: Vec<u8> = params.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.command(Command::FlashBegin, &data, 0, erase_timeout(erase_size))?;
        Ok(())
    }
}

impl<P: Read + Write> FlashTransport for SerialTransport<P> {
    fn read_bytes(&mut self, offset: u32, length: u32) -> Result<Vec<u8>> {
        let chip = self.chip()?;
        if !matches!(chip, Chip::Esp32 | Chip::Esp8266) {
            return Err(Error::protocol(format!(
                "the {} ROM bootloader cannot read flash",
                chip.description()
            )));
        }

        let mut data = Vec::with_capacity(length as usize);
        let mut done = 0u32;
        while done < length {
            let block = (length - done).min(READ_SLOW_BLOCK);
            let address = offset + done;
            let mut request = address.to_le_bytes().to_vec();
            request.extend_from_slice(&block.to_le_bytes());
            let response =
                self.command(Command::ReadFlashSlow, &request, 0, DEFAULT_TIMEOUT)?;
            if response.data.len() < block as usize {
                return Err(Error::protocol(format!(
                    "short read at 0x{:08X}: {} of {} bytes",
                    address,
                    response.data.len(),
                    block
                )));
            }
            data.extend_from_slice(&response.data[..block as usize]);
            done += block;
        }
        Ok(data)
    }

    fn write_bytes(&mut self, offset: u32, data: &[u8]) -> Result<()> {
        if offset % SECTOR_SIZE != 0 {
            return Err(Error::invalid_input(format!(
                "write at {} is not aligned to a 4 KiB sector",
                Utils::format_hex(offset)
            )));
        }
        if data.is_empty() {
            return Ok(());
        }
        let size = u32::try_from(data.len())
            .map_err(|_| Error::invalid_input("write exceeds the 32-bit address space"))?;
        let blocks = data.len().div_ceil(FLASH_WRITE_SIZE) as u32;
        self.flash_begin(size, blocks, offset)?;

        for (seq, chunk) in data.chunks(FLASH_WRITE_SIZE).enumerate() {
            let mut block = chunk.to_vec();
            block.resize(FLASH_WRITE_SIZE, 0xFF);
            let mut payload = Vec::with_capacity(16 + FLASH_WRITE_SIZE);
            for header in [FLASH_WRITE_SIZE as u32, seq as u32, 0, 0] {
                payload.extend_from_slice(&header.to_le_bytes());
            }
            payload.extend_from_slice(&block);
            self.command(Command::FlashData, &payload, checksum(&block), DEFAULT_TIMEOUT)?;
        }
        Ok(())
    }

    fn erase_all(&mut self) -> Result<()> {
        let size = self.flash_size.ok_or_else(|| {
            Error::invalid_input("flash size unknown, cannot erase the whole chip")
        })?;
        tracing::info!("erasing {}", Utils::format_bytes(u64::from(size)));
        self.flash_begin(size, 0, 0)
    }

    fn chip_description(&self) -> String {
        self.chip
            .as_ref()
            .map_or("unknown", Chip::description)
            .to_string()
    }

    fn flash_size(&self) -> Option<u32> {
        self.flash_size
    }

    fn flash_id(&self) -> Option<u32> {
        self.flash_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::io;

    /// 在内存中模拟 ROM 引导程序
    struct FakeRom {
        magic: u32,
        status_len: usize,
        flash_id: u32,
        spi: SpiRegisters,
        flash: Vec<u8>,
        regs: HashMap<u32, u32>,
        decoder: SlipDecoder,
        outbox: VecDeque<u8>,
        received: Vec<Command>,
        write_offset: u32,
        fail: Option<(Command, u8)>,
    }

    impl FakeRom {
        fn new(chip: Chip, magic: u32, flash_id: u32, flash: Vec<u8>) -> Self {
            Self {
                magic,
                status_len: if chip == Chip::Esp8266 { 2 } else { 4 },
                flash_id,
                spi: SpiRegisters::for_chip(&chip),
                flash,
                regs: HashMap::new(),
                decoder: SlipDecoder::new(),
                outbox: VecDeque::new(),
                received: Vec::new(),
                write_offset: 0,
                fail: None,
            }
        }

        fn esp32(flash: Vec<u8>) -> Self {
            Self::new(Chip::Esp32, 0x00F0_1D83, 0x16_40EF, flash)
        }

        fn count(&self, command: Command) -> usize {
            self.received.iter().filter(|c| **c == command).count()
        }

        fn reply(&mut self, command: Command, value: u32, mut body: Vec<u8>, status: [u8; 2]) {
            body.extend_from_slice(&status);
            body.resize(body.len() + self.status_len - 2, 0);
            let mut packet = vec![DIRECTION_RESPONSE, command as u8];
            packet.extend_from_slice(&(body.len() as u16).to_le_bytes());
            packet.extend_from_slice(&value.to_le_bytes());
            packet.extend_from_slice(&body);
            self.outbox.extend(slip::encode(&packet));
        }

        fn handle(&mut self, packet: Vec<u8>) {
            let command = Command::from_repr(packet[1]).unwrap();
            let word = |i: usize| u32::from_le_bytes(packet[8 + i * 4..12 + i * 4].try_into().unwrap());
            self.received.push(command);
            if let Some((failing, code)) = self.fail {
                if failing == command {
                    self.reply(command, 0, Vec::new(), [1, code]);
                    return;
                }
            }

            let mut value = 0;
            let mut body = Vec::new();
            match command {
                Command::ReadReg => {
                    let address = word(0);
                    value = if address == CHIP_DETECT_MAGIC_REG {
                        self.magic
                    } else {
                        self.regs.get(&address).copied().unwrap_or(0)
                    };
                }
                Command::WriteReg => {
                    let (address, data) = (word(0), word(1));
                    if address == self.spi.cmd() && data & SPI_CMD_USR != 0 {
                        self.regs.insert(self.spi.reg(self.spi.w0), self.flash_id);
                        self.regs.insert(address, 0);
                    } else {
                        self.regs.insert(address, data);
                    }
                }
                Command::FlashBegin => {
                    let (erase, offset) = (word(0) as usize, word(3) as usize);
                    let sectors = erase.div_ceil(SECTOR_SIZE as usize);
                    let end = (offset + sectors * SECTOR_SIZE as usize).min(self.flash.len());
                    self.flash[offset.min(end)..end].fill(0xFF);
                    self.write_offset = word(3);
                }
                Command::FlashData => {
                    let (len, seq) = (word(0) as usize, word(1) as usize);
                    let block = &packet[24..24 + len];
                    let sent = u32::from_le_bytes(packet[4..8].try_into().unwrap());
                    assert_eq!(sent, checksum(block));
                    let start = self.write_offset as usize + seq * len;
                    let end = (start + len).min(self.flash.len());
                    self.flash[start..end].copy_from_slice(&block[..end - start]);
                }
                Command::ReadFlashSlow => {
                    let (offset, len) = (word(0) as usize, word(1) as usize);
                    body = self.flash[offset..offset + len].to_vec();
                    body.resize(READ_SLOW_BLOCK as usize, 0xFF);
                }
                _ => {}
            }
            self.reply(command, value, body, [0, 0]);
        }
    }

    impl Read for FakeRom {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut n = 0;
            while n < buf.len() {
                match self.outbox.pop_front() {
                    Some(b) => {
                        buf[n] = b;
                        n += 1;
                    }
                    None => break,
                }
            }
            if n == 0 {
                return Err(io::Error::new(ErrorKind::TimedOut, "no data"));
            }
            Ok(n)
        }
    }

    impl Write for FakeRom {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            for &b in buf {
                if let Some(packet) = self.decoder.push(b).unwrap() {
                    self.handle(packet);
                }
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn options(flash_size: Option<u32>) -> SerialOptions {
        SerialOptions {
            port_name: "fake".to_string(),
            baud: ROM_BAUD,
            chip: None,
            flash_size,
        }
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    #[test]
    fn connect_detects_chip_and_flash_size() {
        let mut rom = FakeRom::esp32(vec![0; 0x1000]);
        let transport = SerialTransport::connect(&mut rom, &options(None)).unwrap();
        assert_eq!(transport.chip_description(), "ESP32");
        assert_eq!(transport.flash_id(), Some(0x16_40EF));
        assert_eq!(transport.flash_size(), Some(4 * 1024 * 1024));
        drop(transport);

        assert_eq!(rom.count(Command::SpiAttach), 1);
        assert_eq!(rom.count(Command::SpiSetParams), 1);
        assert_eq!(rom.regs[&rom.spi.reg(rom.spi.usr)], 0);
    }

    #[test]
    fn explicit_flash_size_overrides_the_id() {
        let mut rom = FakeRom::esp32(vec![0; 0x1000]);
        let transport =
            SerialTransport::connect(&mut rom, &options(Some(16 * 1024 * 1024))).unwrap();
        assert_eq!(transport.flash_size(), Some(16 * 1024 * 1024));
    }

    #[test]
    fn unknown_flash_id_leaves_size_unknown() {
        let mut rom = FakeRom::new(Chip::Esp8266, 0xFFF0_C101, 0x00_40EF, vec![0; 0x1000]);
        let mut transport = SerialTransport::connect(&mut rom, &options(None)).unwrap();
        assert_eq!(transport.chip_description(), "ESP8266");
        assert_eq!(transport.flash_size(), None);
        assert!(matches!(transport.erase_all(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn reads_are_split_into_rom_blocks() {
        let flash = pattern(0x9000);
        let mut rom = FakeRom::esp32(flash.clone());
        let mut transport = SerialTransport::connect(&mut rom, &options(None)).unwrap();
        let data = transport.read_bytes(0x8010, 150).unwrap();
        assert_eq!(data, flash[0x8010..0x8010 + 150]);
        drop(transport);
        assert_eq!(rom.count(Command::ReadFlashSlow), 3);
    }

    #[test]
    fn writes_erase_then_send_padded_blocks() {
        let mut rom = FakeRom::esp32(vec![0; 0x3000]);
        let mut transport = SerialTransport::connect(&mut rom, &options(None)).unwrap();
        let data = pattern(0x500);
        transport.write_bytes(0x1000, &data).unwrap();

        let err = transport.write_bytes(0x1800, &data).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        drop(transport);

        assert_eq!(rom.count(Command::FlashData), 2);
        assert_eq!(&rom.flash[0x1000..0x1500], &data[..]);
        assert!(rom.flash[0x1500..0x2000].iter().all(|&b| b == 0xFF));
        assert!(rom.flash[..0x1000].iter().all(|&b| b == 0));
    }

    #[test]
    fn erase_all_covers_the_detected_size() {
        let mut rom = FakeRom::new(Chip::Esp32C3, 0x1B31_506F, 0x12_20C8, vec![0; 256 * 1024]);
        let mut transport = SerialTransport::connect(&mut rom, &options(None)).unwrap();
        assert_eq!(transport.chip_description(), "ESP32-C3");
        transport.erase_all().unwrap();
        drop(transport);
        assert!(rom.flash.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn newer_roms_refuse_reads() {
        let mut rom = FakeRom::new(Chip::Esp32S3, 0x0000_0009, 0x17_4020, vec![0; 0x1000]);
        let mut transport = SerialTransport::connect(&mut rom, &options(None)).unwrap();
        let err = transport.read_bytes(0, 16).unwrap_err();
        assert!(err.is_transport());
        drop(transport);
        assert_eq!(rom.count(Command::ReadFlashSlow), 0);
    }

    #[test]
    fn failing_status_names_the_rom_error() {
        let mut rom = FakeRom::esp32(vec![0; 0x2000]);
        rom.fail = Some((Command::FlashData, 0x08));
        let mut transport = SerialTransport::connect(&mut rom, &options(None)).unwrap();
        match transport.write_bytes(0, &[1, 2, 3]) {
            Err(Error::Protocol(msg)) => assert!(msg.contains("flash write error"), "{}", msg),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn esp8266_erase_size_matches_rom_quirk() {
        assert_eq!(esp8266_erase_size(0, 0x1000), 0x1000);
        assert_eq!(esp8266_erase_size(0, 0x10000), 0x8000);
        assert_eq!(esp8266_erase_size(0, 0x40000), 0x30000);
    }

    #[test]
    fn unknown_magic_is_rejected() {
        let mut rom = FakeRom::new(Chip::Esp32, 0x1234_5678, 0, Vec::new());
        assert!(matches!(
            SerialTransport::connect(&mut rom, &options(None)),
            Err(Error::Protocol(_))
        ));
    }
}
