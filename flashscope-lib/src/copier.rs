//! 分块 Flash 复制
//!
//! 把任意 Flash 区域拆分为固定大小的块，按地址递增顺序逐块读写。
//! 传输层同一时间只允许一个请求，因此每块都必须完成后才发出下一块。

use crate::transport::FlashTransport;
use crate::{Error, FlashRegion, Result};

/// 默认块大小（4KB）
pub const DEFAULT_BLOCK_SIZE: u32 = 0x1000;

pub struct ChunkedFlashCopier<'t, T: FlashTransport + ?Sized> {
    transport: &'t mut T,
    block_size: u32,
}

impl<'t, T: FlashTransport + ?Sized> ChunkedFlashCopier<'t, T> {
    pub fn new(transport: &'t mut T, block_size: u32) -> Result<Self> {
        if block_size == 0 {
            return Err(Error::invalid_input("block size must be non-zero"));
        }
        Ok(Self {
            transport,
            block_size,
        })
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// 底层传输，用于整片擦除等不分块的操作
    pub fn transport(&mut self) -> &mut T {
        &mut *self.transport
    }

    /// 读取整个区域
    ///
    /// `on_chunk` 收到每块相对于区域起点的偏移和数据，`on_progress` 收到
    /// 单调不减的百分比，最后一块时恰好为 100。任何一块失败都会使整个
    /// 复制失败，不返回部分数据。
    pub fn copy_range<C, P>(
        &mut self,
        region: FlashRegion,
        mut on_chunk: C,
        mut on_progress: P,
    ) -> Result<Vec<u8>>
    where
        C: FnMut(u32, &[u8]),
        P: FnMut(u32),
    {
        let mut buffer = Vec::with_capacity(region.size() as usize);

        for (relative, len) in chunk_plan(region.size(), self.block_size) {
            let address = region.offset() + relative;
            tracing::debug!("read chunk 0x{:08X} +0x{:X}", address, len);
            let chunk = self.transport.read_bytes(address, len).map_err(|e| {
                tracing::warn!("read failed at 0x{:08X}: {}", address, e);
                e
            })?;
            if chunk.len() != len as usize {
                return Err(Error::transport(format!(
                    "short read at 0x{:08X}: requested {} bytes, got {}",
                    address,
                    len,
                    chunk.len()
                )));
            }
            on_chunk(relative, &chunk);
            buffer.extend_from_slice(&chunk);
            on_progress(percent_done(u64::from(relative + len), region.size()));
        }

        if region.size() == 0 {
            on_progress(100);
        }
        tracing::info!(
            "read 0x{:X} bytes from 0x{:08X}",
            region.size(),
            region.offset()
        );
        Ok(buffer)
    }

    /// 把 `data` 按块写入以 `offset` 开始的区域
    pub fn write_range<P>(&mut self, offset: u32, data: &[u8], mut on_progress: P) -> Result<()>
    where
        P: FnMut(u32),
    {
        let size = u32::try_from(data.len())
            .map_err(|_| Error::invalid_input("write larger than the flash address space"))?;
        let region = FlashRegion::new(offset, size)?;

        for (relative, len) in chunk_plan(region.size(), self.block_size) {
            let address = region.offset() + relative;
            let start = relative as usize;
            let chunk = &data[start..start + len as usize];
            tracing::debug!("write chunk 0x{:08X} +0x{:X}", address, len);
            self.transport.write_bytes(address, chunk)?;
            on_progress(percent_done(u64::from(relative + len), region.size()));
        }

        if region.size() == 0 {
            on_progress(100);
        }
        tracing::info!("wrote 0x{:X} bytes at 0x{:08X}", size, offset);
        Ok(())
    }
}

/// 每块的 (相对偏移, 长度)
fn chunk_plan(size: u32, block_size: u32) -> impl Iterator<Item = (u32, u32)> {
    (0..size.div_ceil(block_size)).map(move |index| {
        let relative = index * block_size;
        (relative, block_size.min(size - relative))
    })
}

/// `round(100 * done / total)`
fn percent_done(done: u64, total: u32) -> u32 {
    let total = u64::from(total);
    if total == 0 {
        return 100;
    }
    ((done * 100 + total / 2) / total) as u32
}
