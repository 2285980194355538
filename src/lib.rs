//! Userspace toolkit for UDF (ECMA-167 / OSTA UDF 1.02-2.60) filesystems:
//! an in-memory model of a UDF volume plus the read, verify, repair and
//! write paths for its on-disc descriptor graph.
//!
//! The entry point for reading is [`disc::read_disc`], which drives the
//! discovery pipeline: anchor and Volume Recognition Sequence location,
//! the Main and Reserve Volume Descriptor Sequences, the integrity chain,
//! the partition maps (virtual, sparable, metadata), the File Set
//! Descriptor and the free-space figures. [`walk::walk_file_tree`]
//! traverses the directory tree and [`fix::check`] repairs what it finds.

pub mod cache;
pub mod crc;
pub mod detect;
pub mod disc;
pub mod error;
pub mod extent;
pub mod fix;
pub mod icb;
pub mod io;
pub mod label;
pub mod lvid;
pub mod osta;
pub mod partition;
pub mod space;
pub mod udf;
pub mod vat;
pub mod vds;
pub mod walk;

#[cfg(test)]
pub(crate) mod testimg;

pub use disc::{read_disc, Disc, ReadOptions};
pub use error::{exit_code, ErrorFlags, Result, UdfError};
pub use fix::{check, FixOptions, RepairPolicy};
pub use io::{BlockIo, FileIo, MemIo};
