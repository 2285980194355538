//! Logical Volume Integrity Descriptor chain.
//!
//! LVIDs are recorded sequentially in the integrity extent named by the
//! LVD; a record may point at a continuation extent via its next-integrity
//! extent, which must be at a strictly higher block. The last well-formed
//! record wins. Its integrity type is authoritative for the mount state.

use log::{debug, warn};

use crate::crc::verify_tag;
use crate::disc::Disc;
use crate::extent::SpaceType;
use crate::io::{read_checked, BlockIo};
use crate::udf::{
    LogicalVolumeIntegrityDescriptor, TerminatingDescriptor, EXT_LENGTH_MASK,
};

const LVID_MAX_PARTITIONS: u32 = 32;
const LVID_MAX_SCANNED: u32 = 1000;

pub fn scan_integrity_sequence(io: &mut dyn BlockIo, disc: &mut Disc) {
    let Some(lvd) = disc.lvd_any() else {
        return;
    };

    let mut location = lvd.integrity_sequence_extent.location_sector;
    let mut length = lvd.integrity_sequence_extent.length_bytes & EXT_LENGTH_MASK;
    let bs = disc.block_size;
    let mut scanned = 0u32;

    while location != 0 && length != 0 {
        if length > 256 * bs {
            warn!(
                "Logical Volume Integrity Descriptor Sequence is too big ({})",
                length
            );
            break;
        }

        let mut block = vec![0u8; bs as usize];
        if read_checked(io, disc.byte_offset(location), &mut block).is_err() {
            return;
        }

        let ident = u16::from_le_bytes([block[0], block[1]]);
        if ident == 0 {
            break;
        }
        let tag_location = u32::from_le_bytes([block[12], block[13], block[14], block[15]]);
        if tag_location != location {
            warn!("Incorrect Logical Volume Integrity Descriptor");
            break;
        }
        if ident == TerminatingDescriptor::TAG_IDENTIFIER {
            break;
        }
        if ident != LogicalVolumeIntegrityDescriptor::TAG_IDENTIFIER {
            warn!("Incorrect Logical Volume Integrity Descriptor");
            break;
        }

        let num_partitions = u32::from_le_bytes([block[72], block[73], block[74], block[75]]);
        if num_partitions > LVID_MAX_PARTITIONS {
            warn!(
                "Too many partitions ({}) in Logical Volume Integrity Descriptor, stopping scanning",
                num_partitions
            );
            break;
        }
        let imp_use_len = u32::from_le_bytes([block[76], block[77], block[78], block[79]]);
        if imp_use_len > 32 * bs {
            warn!(
                "Logical Volume Integrity Descriptor Implementation Use is too big ({}), stopping scanning",
                imp_use_len
            );
            break;
        }

        let lvid_length = LogicalVolumeIntegrityDescriptor::FIXED_SIZE
            + num_partitions as usize * 8
            + imp_use_len as usize;
        if lvid_length as u32 > length {
            warn!("Incorrect Logical Volume Integrity Descriptor");
            break;
        }

        let mut buf = vec![0u8; lvid_length.max(bs as usize)];
        if read_checked(io, disc.byte_offset(location), &mut buf).is_err() {
            return;
        }
        buf.truncate(lvid_length.max(LogicalVolumeIntegrityDescriptor::FIXED_SIZE));

        let lvid = LogicalVolumeIntegrityDescriptor::read(&buf);
        let flags = verify_tag(
            &buf,
            Some(LogicalVolumeIntegrityDescriptor::TAG_IDENTIFIER),
            location,
        );

        let blocks = (lvid_length as u32).div_ceil(bs);
        if let Ok(ext) = disc.map.set_extent(SpaceType::LVID, location, blocks) {
            disc.map.set_desc(
                ext,
                LogicalVolumeIntegrityDescriptor::TAG_IDENTIFIER,
                0,
                buf,
            );
        }

        let next_location = lvid.next_integrity_extent.location_sector;
        let mut next_length = lvid.next_integrity_extent.length_bytes & EXT_LENGTH_MASK;

        disc.lvid = Some(lvid);
        disc.lvid_location = location;
        disc.seq.lvid.tag_ident = LogicalVolumeIntegrityDescriptor::TAG_IDENTIFIER;
        disc.seq.lvid.location = location;
        disc.seq.lvid.error = flags;
        if !flags.is_empty() {
            warn!(
                "Logical Volume Integrity Descriptor at block {} has errors {:?}",
                location, flags
            );
        }

        if next_length != 0 && next_location <= location {
            warn!("Next Logical Volume Integrity is not on higher block number, ignoring it");
            next_length = 0;
        }

        if next_location != 0 && next_length != 0 {
            location = next_location;
            length = next_length;
        } else if length > bs {
            location += 1;
            length -= bs;
        } else {
            break;
        }

        scanned += 1;
        if scanned >= LVID_MAX_SCANNED {
            warn!("Too many Logical Volume Integrity Descriptors, stopping scanning");
            break;
        }
    }

    if let Some(lvid) = &disc.lvid {
        if lvid.is_open() {
            warn!("Logical Volume Integrity Descriptor is open, volume was not cleanly unmounted");
        } else {
            debug!("Logical Volume Integrity Descriptor is closed");
        }
    }
}

/// Counts and revision floors from the LVID implementation use area.
pub fn parse_imp_use(disc: &mut Disc) {
    let Some(lvid) = &disc.lvid else {
        return;
    };
    let Some(iu) = lvid.imp_use() else {
        warn!("Logical Volume Integrity Descriptor Implementation Use not found");
        return;
    };

    disc.num_files = iu.number_of_files;
    disc.num_dirs = iu.number_of_directories;

    // minUDFReadRev and minUDFWriteRev exist since UDF 1.02
    if disc.udf_rev >= 0x0102 {
        if iu.min_udf_read_revision != 0 {
            disc.udf_rev = iu.min_udf_read_revision;
        }
        if disc.udf_write_rev < iu.min_udf_write_revision {
            disc.udf_write_rev = iu.min_udf_write_revision;
        }
        if disc.udf_write_rev < disc.udf_rev {
            disc.udf_write_rev = disc.udf_rev;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disc::{read_disc, ReadOptions};
    use crate::testimg::TestImageBuilder;
    use crate::udf::LVID_INTEGRITY_TYPE_OPEN;

    #[test]
    fn test_latest_lvid_wins() {
        // the image's integrity extent holds an older record followed by
        // the current one; the second must prevail
        let img = TestImageBuilder::new().with_lvid_history().build();
        let mut io = img.into_io();
        let disc = read_disc(&mut io, &ReadOptions::default()).unwrap();
        let lvid = disc.lvid.as_ref().unwrap();
        assert_eq!(lvid.next_unique_id(), crate::testimg::NEXT_UNIQUE_ID);
        assert!(!lvid.is_open());
    }

    #[test]
    fn test_open_integrity_detected() {
        let img = TestImageBuilder::new().with_open_lvid().build();
        let mut io = img.into_io();
        let disc = read_disc(&mut io, &ReadOptions::default()).unwrap();
        let lvid = disc.lvid.as_ref().unwrap();
        assert_eq!(lvid.integrity_type, LVID_INTEGRITY_TYPE_OPEN);
        assert!(lvid.is_open());
    }

    #[test]
    fn test_counts_from_imp_use() {
        let img = TestImageBuilder::new().build();
        let mut io = img.into_io();
        let disc = read_disc(&mut io, &ReadOptions::default()).unwrap();
        assert_eq!(disc.num_files, 3);
        assert_eq!(disc.num_dirs, 2);
        assert_eq!(disc.udf_rev, 0x0201);
    }
}
