//! LRU block cache over a [`BlockIo`].
//!
//! The file-tree walker issues many small scattered reads for FIDs and
//! allocation extents; this keeps the hot blocks resident. Writes go to the
//! cached copy and are flushed back in LRU order or on [`Cache::flush`].

use std::collections::HashSet;
use std::num::NonZeroUsize;

use lru::LruCache;

use crate::error::Result;
use crate::io::BlockIo;

const DEFAULT_CACHED_BLOCKS: usize = 32 * 1024;

pub struct Cache<'a> {
    io: &'a mut dyn BlockIo,
    block_size: usize,
    lru: LruCache<u32, Vec<u8>>,
    dirty: HashSet<u32>,
}

impl<'a> Cache<'a> {
    pub fn new(io: &'a mut dyn BlockIo, block_size: u32) -> Self {
        Self::with_capacity(io, block_size, DEFAULT_CACHED_BLOCKS)
    }

    pub fn with_capacity(io: &'a mut dyn BlockIo, block_size: u32, blocks: usize) -> Self {
        Self {
            io,
            block_size: block_size as usize,
            lru: LruCache::new(NonZeroUsize::new(blocks.max(1)).unwrap()),
            dirty: HashSet::new(),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Read into `buf` starting at an absolute byte position.
    pub fn read_exact(&mut self, pos: u64, buf: &mut [u8]) -> Result<()> {
        let mut read = 0usize;
        while read < buf.len() {
            let pos_this_read = pos + read as u64;
            let block = (pos_this_read / self.block_size as u64) as u32;
            let offset = (pos_this_read % self.block_size as u64) as usize;
            let len = (buf.len() - read).min(self.block_size - offset);
            let data = self.block(block)?;
            buf[read..read + len].copy_from_slice(&data[offset..offset + len]);
            read += len;
        }
        Ok(())
    }

    /// Read one whole block at the absolute block number.
    pub fn block(&mut self, block: u32) -> Result<&[u8]> {
        if !self.lru.contains(&block) {
            let mut data = vec![0u8; self.block_size];
            crate::io::read_checked(self.io, block as u64 * self.block_size as u64, &mut data)?;
            if let Some((old_block, old_data)) = self.lru.push(block, data) {
                if old_block != block && self.dirty.remove(&old_block) {
                    self.io
                        .write_at(old_block as u64 * self.block_size as u64, &old_data)?;
                }
            }
        }
        Ok(self.lru.get(&block).unwrap())
    }

    /// Overwrite bytes at an absolute byte position through the cache.
    pub fn write_exact(&mut self, pos: u64, buf: &[u8]) -> Result<()> {
        let mut written = 0usize;
        while written < buf.len() {
            let pos_this_write = pos + written as u64;
            let block = (pos_this_write / self.block_size as u64) as u32;
            let offset = (pos_this_write % self.block_size as u64) as usize;
            let len = (buf.len() - written).min(self.block_size - offset);
            self.block(block)?;
            let data = self.lru.get_mut(&block).unwrap();
            data[offset..offset + len].copy_from_slice(&buf[written..written + len]);
            self.dirty.insert(block);
            written += len;
        }
        Ok(())
    }

    /// Write every dirty block back and sync the device.
    pub fn flush(&mut self) -> Result<()> {
        let dirty: Vec<u32> = self.dirty.iter().copied().collect();
        for block in dirty {
            if let Some(data) = self.lru.peek(&block) {
                let data = data.clone();
                self.io
                    .write_at(block as u64 * self.block_size as u64, &data)?;
            }
            self.dirty.remove(&block);
        }
        self.io.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemIo;

    #[test]
    fn test_cache_read_spanning_blocks() {
        let mut data = vec![0u8; 2048 * 4];
        for (i, b) in data.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        let mut io = MemIo::new(data.clone());
        let mut cache = Cache::with_capacity(&mut io, 2048, 2);
        let mut buf = vec![0u8; 3000];
        cache.read_exact(1000, &mut buf).unwrap();
        assert_eq!(&buf[..], &data[1000..4000]);
    }

    #[test]
    fn test_cache_write_through_flush() {
        let mut io = MemIo::new(vec![0u8; 2048 * 4]);
        {
            let mut cache = Cache::with_capacity(&mut io, 2048, 2);
            cache.write_exact(2040, b"0123456789abcdef").unwrap();
            cache.flush().unwrap();
        }
        let mut buf = [0u8; 16];
        io.read_at(2040, &mut buf).unwrap();
        assert_eq!(&buf, b"0123456789abcdef");
    }
}
