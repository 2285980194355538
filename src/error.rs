use std::io;

use bitflags::bitflags;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UdfError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("read of {length} bytes at offset {offset} is beyond end of device")]
    ReadBeyondDevice { offset: u64, length: usize },
    #[error("device is busy or locked by another user")]
    DeviceBusy,
    #[error("not a UDF filesystem")]
    NotUdf,
    #[error("invalid block size {0}")]
    InvalidBlockSize(u32),
    #[error("UDF revision {0:#06x} is newer than 2.60 and not supported")]
    UnsupportedRevision(u16),
    #[error("invalid descriptor tag")]
    InvalidDescriptorTag,
    #[error("invalid partition map")]
    InvalidPartitionMap,
    #[error("unknown partition reference number {0}")]
    InvalidPartitionNumber(u16),
    #[error("buffer too small")]
    BufferTooSmall,
    #[error("extent map is corrupt: range spans multiple typed extents")]
    CorruptExtentMap,
    #[error("both Main and Reserve copy of {0} are damaged")]
    BothCopiesDamaged(&'static str),
    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, UdfError>;

bitflags! {
    /// Per-descriptor error conditions collected during verification.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ErrorFlags: u16 {
        const CHECKSUM   = 1 << 0;
        const CRC        = 1 << 1;
        const POSITION   = 1 << 2;
        const WRONG_DESC = 1 << 3;
        const EXT_LEN    = 1 << 4;
        const UNIQUE_ID  = 1 << 5;
        const TIMESTAMP  = 1 << 6;
        const FREE_SPACE = 1 << 7;
        const FILES      = 1 << 8;
    }
}

/// Exit codes following the fsck convention.
pub mod exit_code {
    pub const OK: i32 = 0;
    pub const ERRORS_CORRECTED: i32 = 1;
    pub const ERRORS_UNCORRECTED: i32 = 4;
    pub const OPERATIONAL_ERROR: i32 = 8;
    pub const USAGE_ERROR: i32 = 16;
    pub const CANCELLED: i32 = 32;
}
