//! Block-level device access capability.
//!
//! The engine never touches a device directly; everything goes through a
//! [`BlockIo`], which a caller backs with a regular file, a block device,
//! or an in-memory image.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::debug;

use crate::error::{Result, UdfError};

pub trait BlockIo {
    /// Read exactly `buf.len()` bytes at the absolute byte offset.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;
    /// Write all of `buf` at the absolute byte offset; partial writes are
    /// rejected.
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()>;
    /// Durable-to-media fence.
    fn sync(&mut self) -> Result<()>;
    /// Device size in bytes.
    fn size_bytes(&self) -> u64;
    /// Physical sector size reported by the device.
    fn sector_size(&self) -> u32 {
        512
    }
    /// First block of the last session on multisession optical media.
    fn multisession_start_block(&self) -> Option<u32> {
        None
    }
    /// Last written block on optical media, when the device can report it.
    fn last_written_block(&self) -> Option<u32> {
        None
    }
}

/// Bounds-checked read helper shared by the scanners: reading beyond the
/// device is an error the caller may treat as recoverable.
pub fn read_checked(io: &mut dyn BlockIo, offset: u64, buf: &mut [u8]) -> Result<()> {
    if offset + buf.len() as u64 > io.size_bytes() {
        debug!(
            "read of {} bytes at {} is beyond end of device ({})",
            buf.len(),
            offset,
            io.size_bytes()
        );
        return Err(UdfError::ReadBeyondDevice {
            offset,
            length: buf.len(),
        });
    }
    io.read_at(offset, buf)
}

/// A [`BlockIo`] over a seekable file or block device.
pub struct FileIo {
    file: File,
    size: u64,
    sector_size: u32,
}

impl FileIo {
    pub fn open(path: &Path, writable: bool) -> Result<Self> {
        let file = File::options().read(true).write(writable).open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file,
            size,
            sector_size: 512,
        })
    }

    pub fn with_sector_size(mut self, sector_size: u32) -> Self {
        self.sector_size = sector_size;
        self
    }
}

impl BlockIo for FileIo {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        Ok(())
    }
    fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
    fn size_bytes(&self) -> u64 {
        self.size
    }
    fn sector_size(&self) -> u32 {
        self.sector_size
    }
}

/// A [`BlockIo`] over an in-memory image. Used by the tests and by tools
/// that stage a whole image before writing it out.
pub struct MemIo {
    pub data: Vec<u8>,
    sector_size: u32,
    last_written: Option<u32>,
}

impl MemIo {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            sector_size: 512,
            last_written: None,
        }
    }
    pub fn with_sector_size(mut self, sector_size: u32) -> Self {
        self.sector_size = sector_size;
        self
    }
    pub fn with_last_written_block(mut self, block: u32) -> Self {
        self.last_written = Some(block);
        self
    }
}

impl BlockIo for MemIo {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.data.len() {
            return Err(UdfError::ReadBeyondDevice {
                offset,
                length: buf.len(),
            });
        }
        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.data.len() {
            return Err(UdfError::ReadBeyondDevice {
                offset,
                length: buf.len(),
            });
        }
        self.data[start..end].copy_from_slice(buf);
        Ok(())
    }
    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
    fn size_bytes(&self) -> u64 {
        self.data.len() as u64
    }
    fn sector_size(&self) -> u32 {
        self.sector_size
    }
    fn last_written_block(&self) -> Option<u32> {
        self.last_written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memio_roundtrip() {
        let mut io = MemIo::new(vec![0u8; 4096]);
        io.write_at(100, b"hello").unwrap();
        let mut buf = [0u8; 5];
        io.read_at(100, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_read_beyond_end() {
        let mut io = MemIo::new(vec![0u8; 64]);
        let mut buf = [0u8; 16];
        assert!(matches!(
            read_checked(&mut io, 60, &mut buf),
            Err(UdfError::ReadBeyondDevice { .. })
        ));
    }
}
