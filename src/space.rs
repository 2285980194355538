//! Free-space accounting.
//!
//! Declared free space comes from the LVID's per-partition tables or, when
//! those are absent, from counting the partition's Space Bitmap or space
//! tables. The reconciliation pass compares the on-disc Space Bitmap with
//! the bitmap observed by the file-tree walker, block by block.

use log::{debug, warn};

use crate::crc::verify_tag;
use crate::disc::Disc;
use crate::error::ErrorFlags;
use crate::icb::{AllocationDescriptorForm, SpaceBitmapDescriptor, UnallocatedSpaceEntry};
use crate::io::{read_checked, BlockIo};
use crate::partition::find_block_position;
use crate::udf::{
    LongAd, PartitionDescriptor, PartitionMap, ShortAllocationDescriptor,
    PD_PARTITION_CONTENTS_NSR02, PD_PARTITION_CONTENTS_NSR03,
};
use crate::walk::WalkReport;

pub fn setup_total_space_blocks(disc: &mut Disc) {
    let Some(pd) = disc.pd_any() else {
        warn!("Determining total space blocks is not possible");
        return;
    };
    let pd_partition_length = pd.partition_length;
    let pd_partition_starting_location = pd.partition_starting_location;

    disc.total_space_blocks = pd_partition_length;

    let mut warn_beyond = disc.virtual_partition_map().is_none();
    if warn_beyond && pd_partition_length + pd_partition_starting_location > disc.blocks {
        warn!("Some space blocks are beyond end of disk");
        warn_beyond = false;
    }

    if let Some(pd2) = disc.pd2_any() {
        let pd2_partition_length = pd2.partition_length;
        let pd2_partition_starting_location = pd2.partition_starting_location;
        if warn_beyond && pd2_partition_length + pd2_partition_starting_location > disc.blocks {
            warn!("Some space blocks are beyond end of disk");
        }
        disc.total_space_blocks += pd2_partition_length;
    }
}

/// Count the free blocks declared by a Space Bitmap Descriptor.
fn count_bitmap_blocks(
    io: &mut dyn BlockIo,
    disc: &Disc,
    pmap: &PartitionMap,
    block: u32,
    length: u32,
) -> u32 {
    if (SpaceBitmapDescriptor::HEADER_SIZE as u32) > length {
        warn!("Invalid Space Bitmap Descriptor");
        return 0;
    }
    let Some((partition, position)) = find_block_position(disc, pmap, block) else {
        return 0;
    };
    let Some(pd) = disc.find_partition_descriptor(partition) else {
        return 0;
    };
    let location = pd.partition_starting_location + position;

    let mut header = [0u8; SpaceBitmapDescriptor::HEADER_SIZE];
    if read_checked(io, disc.byte_offset(location), &mut header).is_err() {
        return 0;
    }
    let bits = u32::from_le_bytes([header[16], header[17], header[18], header[19]]);
    let declared_bytes = u32::from_le_bytes([header[20], header[21], header[22], header[23]]);

    if declared_bytes > length - SpaceBitmapDescriptor::HEADER_SIZE as u32
        || declared_bytes < bits.div_ceil(8)
    {
        warn!("Invalid Space Bitmap Descriptor");
        return 0;
    }

    let bytes = bits.div_ceil(8) as usize;
    let mut bitmap = vec![0u8; bytes];
    if read_checked(
        io,
        disc.byte_offset(location) + SpaceBitmapDescriptor::HEADER_SIZE as u64,
        &mut bitmap,
    )
    .is_err()
    {
        return 0;
    }

    if bits % 8 != 0 {
        bitmap[bytes - 1] &= (1u8 << (bits % 8)) - 1;
    }
    bitmap.iter().map(|b| b.count_ones()).sum()
}

/// Count the free blocks recorded in an unallocated/freed space table.
fn count_table_blocks(
    io: &mut dyn BlockIo,
    disc: &Disc,
    pmap: &PartitionMap,
    block: u32,
    length: u32,
) -> u32 {
    if (UnallocatedSpaceEntry::HEADER_SIZE as u32) > length {
        warn!("Invalid Space Entry");
        return 0;
    }
    let Some((partition, position)) = find_block_position(disc, pmap, block) else {
        return 0;
    };
    let Some(pd) = disc.find_partition_descriptor(partition) else {
        return 0;
    };
    let location = pd.partition_starting_location + position;
    let bs = disc.block_size;

    let mut block_buf = vec![0u8; bs as usize];
    if read_checked(io, disc.byte_offset(location), &mut block_buf).is_err() {
        return 0;
    }
    let declared =
        u32::from_le_bytes([block_buf[36], block_buf[37], block_buf[38], block_buf[39]]);
    let use_len = UnallocatedSpaceEntry::HEADER_SIZE + declared as usize;
    if use_len as u32 > length {
        warn!("Invalid Space Entry");
        return 0;
    }

    let mut buf = vec![0u8; use_len.max(bs as usize)];
    if read_checked(io, disc.byte_offset(location), &mut buf).is_err() {
        return 0;
    }
    let use_entry = UnallocatedSpaceEntry::read(&buf);

    let mut space: u64 = 0;
    match use_entry.icb_tag.allocation_descriptor_form() {
        AllocationDescriptorForm::Short => {
            for chunk in use_entry.allocation_descriptors.chunks_exact(8) {
                space += ShortAllocationDescriptor::read(chunk).extent_length_bytes() as u64;
            }
        }
        AllocationDescriptorForm::Long => {
            for chunk in use_entry.allocation_descriptors.chunks_exact(16) {
                space += LongAd::read(chunk).extent_length_bytes() as u64;
            }
        }
        _ => {
            warn!("Invalid Information Control Block in Space Entry");
        }
    }

    space.div_ceil(bs as u64).min(u32::MAX as u64) as u32
}

fn count_free_partition_blocks(
    io: &mut dyn BlockIo,
    disc: &Disc,
    pd: &PartitionDescriptor,
) -> u32 {
    // only maps that span the whole partition descriptor qualify, so
    // Type 1 and Type 2 Sparable
    let found = disc
        .find_partition_map(|m| {
            matches!(m, PartitionMap::Type1(t) if t.partition_number == pd.partition_number)
                || matches!(m, PartitionMap::Sparable(s) if s.partition_number == pd.partition_number)
        });
    let Some((partition_ref, pmap)) = found else {
        warn!("Determining free space blocks is not possible");
        return 0;
    };

    let vat_hosted = disc.vat.is_some()
        && disc
            .find_partition_map(
                |m| matches!(m, PartitionMap::Virtual(v) if v.partition_number == pd.partition_number),
            )
            .is_some();

    // The LVID does not contain up-to-date information when a VAT is built
    // on top of the main partition.
    if !vat_hosted {
        if let Some(lvid) = &disc.lvid {
            if let Some(&free) = lvid.free_space_table.get(partition_ref as usize) {
                if free != 0xFFFF_FFFF {
                    return free;
                }
            }
        }
    }

    // with a VAT on top of the main partition everything after the VAT
    // block is free
    if vat_hosted {
        let vat_block = disc.vat_block.unwrap_or(disc.last_block);
        return (pd.partition_starting_location + disc.total_space_blocks)
            .saturating_sub(vat_block + 1);
    }

    if !pd.partition_contents.matches(PD_PARTITION_CONTENTS_NSR02)
        && !pd.partition_contents.matches(PD_PARTITION_CONTENTS_NSR03)
    {
        warn!("Unknown Partition Descriptor Content, determining free space blocks is not possible");
        return 0;
    }

    let phd = pd.partition_header();
    let checks = [
        (&phd.unalloc_space_bitmap, true),
        (&phd.freed_space_bitmap, true),
        (&phd.unalloc_space_table, false),
        (&phd.freed_space_table, false),
    ];
    for (ad, is_bitmap) in checks {
        let length = ad.extent_length_bytes();
        if length == 0 {
            continue;
        }
        let blocks = if is_bitmap {
            count_bitmap_blocks(io, disc, &pmap, ad.extent_location, length)
        } else {
            count_table_blocks(io, disc, &pmap, ad.extent_location, length)
        };
        if blocks != 0 {
            return blocks;
        }
    }

    0
}

pub fn scan_free_space_blocks(io: &mut dyn BlockIo, disc: &mut Disc) {
    let mut free = 0u32;
    if let Some(pd) = disc.pd_any() {
        free += count_free_partition_blocks(io, disc, pd);
    } else {
        warn!("Determining free space blocks is not possible");
        disc.free_space_blocks = 0;
        return;
    }
    if let Some(pd2) = disc.pd2_any() {
        free += count_free_partition_blocks(io, disc, pd2);
    }
    disc.free_space_blocks = free;
}

/// Result of comparing declared and observed space accounting.
#[derive(Debug, Default)]
pub struct SpaceCheck {
    pub declared_free_blocks: u32,
    pub computed_free_blocks: u32,
    pub mismatched_blocks: u32,
    /// partition-relative position of the Space Bitmap Descriptor
    pub sbd_position: Option<u32>,
}

/// Compare the on-disc Space Bitmap with the walker's observed bitmap.
/// Space tables are inspected but not reconciled; their presence only
/// produces a warning and their blocks count as used.
pub fn reconcile_space(
    io: &mut dyn BlockIo,
    disc: &mut Disc,
    walk: &mut WalkReport,
) -> SpaceCheck {
    let mut check = SpaceCheck::default();
    let Some(pd) = disc.pd_any().cloned() else {
        return check;
    };
    let phd = pd.partition_header();

    // account the partition-header structures as used space
    if let Some(bitmap) = &mut walk.used_bitmap {
        for ad in [
            &phd.unalloc_space_table,
            &phd.unalloc_space_bitmap,
            &phd.freed_space_table,
            &phd.freed_space_bitmap,
        ] {
            let length = ad.extent_length_bytes();
            if length > 0 {
                bitmap.mark_used(ad.extent_location, length.div_ceil(disc.block_size));
            }
        }
    }

    if phd.unalloc_space_table.extent_length_bytes() > 0 {
        warn!("Unallocated Space Table present; inspected but not reconciled");
    }
    if phd.freed_space_table.extent_length_bytes() > 0 {
        warn!("Freed Space Table present; inspected but not reconciled");
    }
    if phd.freed_space_bitmap.extent_length_bytes() > 0 {
        warn!("Freed Space Bitmap present; inspected but not reconciled");
    }

    // ECMA-167 4/14.14.1.1: lengths 0-3 are special values
    let sbd_len = phd.unalloc_space_bitmap.extent_length_bytes();
    if sbd_len > 3 {
        let position = phd.unalloc_space_bitmap.extent_location;
        let location = pd.partition_starting_location + position;
        let mut buf = vec![0u8; sbd_len as usize];
        if read_checked(io, disc.byte_offset(location), &mut buf).is_ok() {
            let flags = verify_tag(&buf, Some(SpaceBitmapDescriptor::TAG_IDENTIFIER), position);
            disc.seq.pd_bitmap.tag_ident = SpaceBitmapDescriptor::TAG_IDENTIFIER;
            disc.seq.pd_bitmap.location = location;
            disc.seq.pd_bitmap.error |= flags;
            if !flags.is_empty() {
                warn!("Space Bitmap Descriptor has errors {:?}", flags);
            }

            let sbd = SpaceBitmapDescriptor::read(&buf);
            check.sbd_position = Some(position);
            check.declared_free_blocks = count_ones_bounded(&sbd.bitmap, sbd.number_of_bits);

            if let Some(observed) = &walk.used_bitmap {
                check.computed_free_blocks = observed.count_free();
                let bits = sbd.number_of_bits.min(observed.bits());
                let mut mismatched = 0u32;
                for lbn in 0..bits {
                    let declared_free =
                        sbd.bitmap[(lbn / 8) as usize] & (1 << (lbn % 8)) != 0;
                    if declared_free != observed.is_free(lbn) {
                        if mismatched < 16 {
                            debug!(
                                "space bitmap disagrees at lbn {}: declared {} observed {}",
                                lbn,
                                if declared_free { "free" } else { "used" },
                                if observed.is_free(lbn) { "free" } else { "used" },
                            );
                        }
                        mismatched += 1;
                    }
                }
                check.mismatched_blocks = mismatched;
                if mismatched > 0 {
                    warn!("{} blocks differ between declared and observed space bitmap", mismatched);
                    disc.seq.pd_bitmap.error |= ErrorFlags::FREE_SPACE;
                }
            }
        }
    }

    check
}

fn count_ones_bounded(bitmap: &[u8], bits: u32) -> u32 {
    let mut free = 0u32;
    let full_bytes = (bits / 8) as usize;
    for &b in bitmap.iter().take(full_bytes) {
        free += b.count_ones();
    }
    if bits % 8 != 0 {
        if let Some(&last) = bitmap.get(full_bytes) {
            free += (last & ((1u8 << (bits % 8)) - 1)).count_ones();
        }
    }
    free
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disc::{read_disc, ReadOptions};
    use crate::testimg::TestImageBuilder;
    use crate::walk::walk_file_tree;

    #[test]
    fn test_clean_image_reconciles() {
        let img = TestImageBuilder::new().build();
        let mut io = img.into_io();
        let mut disc = read_disc(&mut io, &ReadOptions::default()).unwrap();
        let mut walk = walk_file_tree(&mut io, &mut disc).unwrap();
        let check = reconcile_space(&mut io, &mut disc, &mut walk);
        assert_eq!(check.mismatched_blocks, 0);
        assert_eq!(check.declared_free_blocks, crate::testimg::FREE_BLOCKS);
        assert_eq!(check.computed_free_blocks, crate::testimg::FREE_BLOCKS);
        assert!(!disc.seq.pd_bitmap.error.contains(ErrorFlags::FREE_SPACE));
    }

    #[test]
    fn test_bitmap_divergence_detected() {
        let img = TestImageBuilder::new().with_bitmap_divergence().build();
        let mut io = img.into_io();
        let mut disc = read_disc(&mut io, &ReadOptions::default()).unwrap();
        let mut walk = walk_file_tree(&mut io, &mut disc).unwrap();
        let check = reconcile_space(&mut io, &mut disc, &mut walk);
        assert!(check.mismatched_blocks > 0);
        assert!(disc.seq.pd_bitmap.error.contains(ErrorFlags::FREE_SPACE));
    }

    #[test]
    fn test_declared_free_space_from_lvid() {
        let img = TestImageBuilder::new().build();
        let mut io = img.into_io();
        let disc = read_disc(&mut io, &ReadOptions::default()).unwrap();
        assert_eq!(disc.free_space_blocks, crate::testimg::FREE_BLOCKS);
    }
}
