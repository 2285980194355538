//! Volume Descriptor Sequence scanner.
//!
//! Walks the Main and Reserve sequences named by the anchor, applies the
//! UDF prevailing-descriptor rules per class, follows Volume Descriptor
//! Pointer continuations, and keeps per-slot bookkeeping of where each
//! prevailing descriptor was read and which errors it carries. The scanner
//! fills slots; it never interprets semantics.

use log::{debug, error, warn};

use crate::crc::verify_tag;
use crate::disc::{Disc, MAIN_VDS, RESERVE_VDS};
use crate::error::ErrorFlags;
use crate::extent::SpaceType;
use crate::io::{read_checked, BlockIo};
use crate::udf::{
    AnchorVolumeDescriptorPointer, ImpUseVolumeDescriptor, LogicalVolumeDescriptor,
    PartitionDescriptor, PrimaryVolumeDescriptor, TerminatingDescriptor,
    UnallocatedSpaceDescriptor, VolumeDescriptorPointer, EXT_LENGTH_MASK, UDF_ID_COMPLIANT,
    UDF_ID_LV_INFO,
};

/// Longest descriptor sequence the scanner will walk, in blocks.
const VDS_MAX_BLOCKS: u32 = 256;
/// Continuation nesting limit for Volume Descriptor Pointers.
const VDS_MAX_NESTING: u32 = 64;

pub const SLOT_PVD: usize = 0;
pub const SLOT_LVD: usize = 1;
pub const SLOT_PD: usize = 2;
pub const SLOT_PD2: usize = 3;
pub const SLOT_USD: usize = 4;
pub const SLOT_IUVD: usize = 5;
pub const SLOT_TD: usize = 6;
pub const VDS_SLOTS: usize = 7;

#[derive(Debug, Clone, Copy, Default)]
pub struct SlotInfo {
    pub tag_ident: u16,
    pub location: u32,
    pub error: ErrorFlags,
}

/// Location and error bookkeeping for every slotted descriptor: the three
/// anchors, the Main and Reserve VDS slots, the LVID and the Space Bitmap.
#[derive(Debug, Clone, Default)]
pub struct VdsBookkeeping {
    pub anchors: [SlotInfo; 3],
    pub main: [SlotInfo; VDS_SLOTS],
    pub reserve: [SlotInfo; VDS_SLOTS],
    pub lvid: SlotInfo,
    pub pd_bitmap: SlotInfo,
}

impl VdsBookkeeping {
    pub fn side(&self, vds: usize) -> &[SlotInfo; VDS_SLOTS] {
        if vds == MAIN_VDS {
            &self.main
        } else {
            &self.reserve
        }
    }
    pub fn side_mut(&mut self, vds: usize) -> &mut [SlotInfo; VDS_SLOTS] {
        if vds == MAIN_VDS {
            &mut self.main
        } else {
            &mut self.reserve
        }
    }
    pub fn record(&mut self, vds: usize, slot: usize, ident: u16, location: u32) {
        let s = &mut self.side_mut(vds)[slot];
        s.tag_ident = ident;
        s.location = location;
    }
    pub fn append_error(&mut self, vds: usize, slot: usize, error: ErrorFlags) {
        self.side_mut(vds)[slot].error |= error;
    }
    /// Index of a side whose copy of the slot is error free, Main first.
    pub fn correct_side(&self, slot: usize) -> Option<usize> {
        if self.main[slot].tag_ident != 0 && self.main[slot].error.is_empty() {
            Some(MAIN_VDS)
        } else if self.reserve[slot].tag_ident != 0 && self.reserve[slot].error.is_empty() {
            Some(RESERVE_VDS)
        } else {
            None
        }
    }
}

pub fn slot_name(slot: usize) -> &'static str {
    match slot {
        SLOT_PVD => "PVD",
        SLOT_LVD => "LVD",
        SLOT_PD => "PD",
        SLOT_PD2 => "PD",
        SLOT_USD => "USD",
        SLOT_IUVD => "IUVD",
        SLOT_TD => "TD",
        _ => "Unknown",
    }
}

fn choose_anchor(disc: &Disc) -> Option<&AnchorVolumeDescriptorPointer> {
    disc.anchors.iter().flatten().next()
}

enum ScanOutcome {
    Ok,
    NotFound,
    Damaged,
}

/// Read a full descriptor starting at `location`; descriptors longer than
/// one block (LVD with its map table, USD with its extents) span into the
/// following blocks of the sequence.
fn read_descriptor(
    io: &mut dyn BlockIo,
    disc: &Disc,
    location: u32,
    declared_length: usize,
) -> Option<Vec<u8>> {
    let mut buf = vec![0u8; declared_length.max(disc.block_size as usize)];
    read_checked(io, disc.byte_offset(location), &mut buf).ok()?;
    Some(buf)
}

fn scan_vds(io: &mut dyn BlockIo, disc: &mut Disc, vds: usize) -> ScanOutcome {
    let Some(anchor) = choose_anchor(disc) else {
        return ScanOutcome::NotFound;
    };

    let space_type = if vds == MAIN_VDS {
        SpaceType::MVDS
    } else {
        SpaceType::RVDS
    };
    let main_ext = &anchor.main_volume_descriptor_sequence_location;
    let this_ext = if vds == MAIN_VDS {
        main_ext
    } else {
        &anchor.reserve_volume_descriptor_sequence_location
    };

    let mut next_location = this_ext.location_sector;
    let mut next_length = this_ext.length_bytes & EXT_LENGTH_MASK;

    if vds == RESERVE_VDS && next_location == main_ext.location_sector {
        warn!("Reserve Volume Descriptor Sequence is on same location as Main");
        disc.pvd[1] = disc.pvd[0].clone();
        disc.lvd[1] = disc.lvd[0].clone();
        disc.pd[1] = disc.pd[0].clone();
        disc.pd2[1] = disc.pd2[0].clone();
        disc.usd[1] = disc.usd[0].clone();
        disc.iuvd[1] = disc.iuvd[0].clone();
        disc.td[1] = disc.td[0].clone();
        disc.seq.reserve = disc.seq.main;
        return ScanOutcome::Ok;
    }

    let mut next_count = next_length / disc.block_size;
    if next_location == 0 || next_count == 0 {
        return ScanOutcome::NotFound;
    }

    let bs = disc.block_size;
    let mut nested = 0u32;

    while next_location != 0 && next_count != 0 {
        nested += 1;
        if nested > VDS_MAX_NESTING {
            warn!("Too many nested Volume Descriptor Sequences, stopping scanning");
            break;
        }

        let location = next_location;
        let count = next_count.min(VDS_MAX_BLOCKS);
        if next_count > VDS_MAX_BLOCKS {
            warn!(
                "Too many descriptors ({}) in Volume Descriptor Sequence, stopping scanning",
                next_count
            );
        }
        next_location = 0;
        next_count = 0;

        let ext = match disc.map.set_extent(space_type, location, count) {
            Ok(ext) => ext,
            Err(_) => {
                warn!("Volume Descriptor Sequence overlaps other structures");
                return ScanOutcome::Damaged;
            }
        };

        let mut i = 0u32;
        while i < count {
            let mut block = vec![0u8; bs as usize];
            if read_checked(io, disc.byte_offset(location + i), &mut block).is_err() {
                return ScanOutcome::Damaged;
            }

            let ident = u16::from_le_bytes([block[0], block[1]]);
            if ident == 0 {
                break;
            }
            let tag_location = u32::from_le_bytes([block[12], block[13], block[14], block[15]]);
            if tag_location != location + i {
                warn!("Incorrect Volume Descriptor at block {}", location + i);
                return ScanOutcome::Damaged;
            }

            let mut done = false;
            match ident {
                PrimaryVolumeDescriptor::TAG_IDENTIFIER => {
                    let pvd = PrimaryVolumeDescriptor::read(&block[..512.min(bs as usize)]);
                    let retain = match &disc.pvd[vds] {
                        None => true,
                        Some(cur) => {
                            pvd.volume_descriptor_sequence_number
                                > cur.volume_descriptor_sequence_number
                                || (pvd.volume_descriptor_sequence_number
                                    == cur.volume_descriptor_sequence_number
                                    && pvd.primary_volume_descriptor_number
                                        < cur.primary_volume_descriptor_number)
                        }
                    };
                    if retain {
                        disc.seq.record(vds, SLOT_PVD, ident, location + i);
                        disc.pvd[vds] = Some(pvd);
                    }
                    disc.map.set_desc(ext, ident, i, block[..512].to_vec());
                }

                PartitionDescriptor::TAG_IDENTIFIER => {
                    let pd = PartitionDescriptor::read(&block[..512]);
                    let number = pd.partition_number;
                    let fits_pd = disc.pd[vds]
                        .as_ref()
                        .map(|c| c.partition_number == number)
                        .unwrap_or(true);
                    let fits_pd2 = disc.pd2[vds]
                        .as_ref()
                        .map(|c| c.partition_number == number)
                        .unwrap_or(true);
                    if fits_pd {
                        let retain = disc.pd[vds]
                            .as_ref()
                            .map(|c| {
                                c.volume_descriptor_sequence_number
                                    < pd.volume_descriptor_sequence_number
                            })
                            .unwrap_or(true);
                        if retain {
                            disc.seq.record(vds, SLOT_PD, ident, location + i);
                            disc.pd[vds] = Some(pd);
                        }
                    } else if fits_pd2 {
                        let retain = disc.pd2[vds]
                            .as_ref()
                            .map(|c| {
                                c.volume_descriptor_sequence_number
                                    < pd.volume_descriptor_sequence_number
                            })
                            .unwrap_or(true);
                        if retain {
                            disc.seq.record(vds, SLOT_PD2, ident, location + i);
                            disc.pd2[vds] = Some(pd);
                        }
                    } else {
                        warn!("More than two Partition Descriptors are present, ignoring others");
                    }
                    disc.map.set_desc(ext, ident, i, block[..512].to_vec());
                }

                LogicalVolumeDescriptor::TAG_IDENTIFIER => {
                    let map_table_length =
                        u32::from_le_bytes([block[264], block[265], block[266], block[267]]);
                    let gd_length = LogicalVolumeDescriptor::FIXED_SIZE + map_table_length as usize;
                    if gd_length as u64 > VDS_MAX_BLOCKS as u64 * bs as u64 {
                        warn!("Logical Volume Descriptor is too big ({})", gd_length);
                        break;
                    }
                    let Some(buf) = read_descriptor(io, disc, location + i, gd_length) else {
                        return ScanOutcome::Damaged;
                    };
                    let lvd = LogicalVolumeDescriptor::read(&buf[..gd_length.max(440)]);
                    disc.map.set_desc(ext, ident, i, buf[..gd_length].to_vec());

                    if lvd.domain_identifier.matches(UDF_ID_COMPLIANT) {
                        let retain = disc.lvd[vds]
                            .as_ref()
                            .map(|c| {
                                c.volume_descriptor_sequence_number
                                    < lvd.volume_descriptor_sequence_number
                            })
                            .unwrap_or(true);
                        if retain {
                            let rev = lvd.domain_identifier.suffix_udf_revision();
                            disc.raise_write_revision(rev);
                            disc.seq.record(vds, SLOT_LVD, ident, location + i);
                            if lvd.logical_block_size != disc.block_size {
                                warn!(
                                    "block size in Logical Volume Descriptor is different than expected"
                                );
                            }
                            disc.lvd[vds] = Some(lvd);
                        }
                    }
                    if gd_length > bs as usize {
                        i += gd_length.div_ceil(bs as usize) as u32 - 1;
                    }
                }

                UnallocatedSpaceDescriptor::TAG_IDENTIFIER => {
                    let num =
                        u32::from_le_bytes([block[20], block[21], block[22], block[23]]) as usize;
                    let gd_length = UnallocatedSpaceDescriptor::FIXED_SIZE + num * 8;
                    if gd_length as u64 > VDS_MAX_BLOCKS as u64 * bs as u64 {
                        warn!("Unallocated Space Descriptor is too big ({})", gd_length);
                        break;
                    }
                    let Some(buf) = read_descriptor(io, disc, location + i, gd_length) else {
                        return ScanOutcome::Damaged;
                    };
                    let usd = UnallocatedSpaceDescriptor::read(&buf);
                    disc.map
                        .set_desc(ext, ident, i, buf[..gd_length.max(24)].to_vec());
                    let retain = disc.usd[vds]
                        .as_ref()
                        .map(|c| {
                            c.volume_descriptor_sequence_number
                                < usd.volume_descriptor_sequence_number
                        })
                        .unwrap_or(true);
                    if retain {
                        disc.seq.record(vds, SLOT_USD, ident, location + i);
                        disc.usd[vds] = Some(usd);
                    }
                    if gd_length > bs as usize {
                        i += gd_length.div_ceil(bs as usize) as u32 - 1;
                    }
                }

                ImpUseVolumeDescriptor::TAG_IDENTIFIER => {
                    let iuvd = ImpUseVolumeDescriptor::read(&block[..512]);
                    disc.map.set_desc(ext, ident, i, block[..512].to_vec());
                    if iuvd.implementation_identifier.matches(UDF_ID_LV_INFO) {
                        let retain = disc.iuvd[vds]
                            .as_ref()
                            .map(|c| {
                                c.volume_descriptor_sequence_number
                                    < iuvd.volume_descriptor_sequence_number
                            })
                            .unwrap_or(true);
                        if retain {
                            let rev = iuvd.implementation_identifier.suffix_udf_revision();
                            disc.raise_write_revision(rev);
                            disc.seq.record(vds, SLOT_IUVD, ident, location + i);
                            disc.iuvd[vds] = Some(iuvd);
                        }
                    }
                }

                TerminatingDescriptor::TAG_IDENTIFIER => {
                    disc.map.set_desc(ext, ident, i, block[..512].to_vec());
                    if disc.td[vds].is_none() {
                        disc.seq.record(vds, SLOT_TD, ident, location + i);
                        disc.td[vds] = Some(TerminatingDescriptor::read(&block[..512]));
                    }
                    done = true;
                }

                VolumeDescriptorPointer::TAG_IDENTIFIER => {
                    let vdp = VolumeDescriptorPointer::read(&block[..512]);
                    disc.map.set_desc(ext, ident, i, block[..512].to_vec());
                    let loc = vdp.next_volume_descriptor_sequence_extent.location_sector;
                    if loc <= location {
                        warn!(
                            "Next descriptor in Volume Descriptor Sequence is not on higher block number, ignoring it"
                        );
                    } else {
                        next_location = loc;
                        next_count = (vdp.next_volume_descriptor_sequence_extent.length_bytes
                            & EXT_LENGTH_MASK)
                            / bs;
                    }
                    done = true;
                }

                _ => {
                    warn!("Unknown descriptor {} in Volume Descriptor Sequence", ident);
                    disc.map.set_desc(ext, ident, i, block[..512].to_vec());
                }
            }

            if done {
                break;
            }
            i += 1;
        }
    }

    ScanOutcome::Ok
}

pub fn scan_mvds(io: &mut dyn BlockIo, disc: &mut Disc) {
    match scan_vds(io, disc, MAIN_VDS) {
        ScanOutcome::NotFound => warn!("Main Volume Descriptor Sequence not found"),
        ScanOutcome::Damaged => warn!("Main Volume Descriptor Sequence is damaged"),
        ScanOutcome::Ok => debug!("Main Volume Descriptor Sequence scanned"),
    }
}

pub fn scan_rvds(io: &mut dyn BlockIo, disc: &mut Disc) {
    match scan_vds(io, disc, RESERVE_VDS) {
        ScanOutcome::NotFound => warn!("Reserve Volume Descriptor Sequence not found"),
        ScanOutcome::Damaged => warn!("Reserve Volume Descriptor Sequence is damaged"),
        ScanOutcome::Ok => debug!("Reserve Volume Descriptor Sequence scanned"),
    }
}

fn side_name(vds: usize) -> &'static str {
    if vds == MAIN_VDS {
        "Main"
    } else {
        "Reserve"
    }
}

/// Serialize one retained descriptor back to bytes for verification or
/// rewriting.
pub(crate) fn slot_bytes(disc: &Disc, vds: usize, slot: usize) -> Option<Vec<u8>> {
    match slot {
        SLOT_PVD => disc.pvd[vds].as_ref().map(|d| {
            let mut b = vec![0u8; 512];
            d.write(&mut b);
            b
        }),
        SLOT_LVD => disc.lvd[vds].as_ref().map(|d| {
            let mut b = vec![0u8; d.get_length()];
            d.write(&mut b);
            b
        }),
        SLOT_PD => disc.pd[vds].as_ref().map(|d| {
            let mut b = vec![0u8; 512];
            d.write(&mut b);
            b
        }),
        SLOT_PD2 => disc.pd2[vds].as_ref().map(|d| {
            let mut b = vec![0u8; 512];
            d.write(&mut b);
            b
        }),
        SLOT_USD => disc.usd[vds].as_ref().map(|d| {
            let mut b = vec![0u8; d.get_length()];
            d.write(&mut b);
            b
        }),
        SLOT_IUVD => disc.iuvd[vds].as_ref().map(|d| {
            let mut b = vec![0u8; 512];
            d.write(&mut b);
            b
        }),
        SLOT_TD => disc.td[vds].as_ref().map(|d| {
            let mut b = vec![0u8; 512];
            d.write(&mut b);
            b
        }),
        _ => None,
    }
}

/// Check checksum, CRC and recorded position of every retained descriptor
/// of one VDS side, accumulating errors into the bookkeeping.
pub fn verify_vds(disc: &mut Disc, vds: usize) {
    for slot in 0..VDS_SLOTS {
        let info = disc.seq.side(vds)[slot];
        if info.tag_ident == 0 {
            continue;
        }
        let Some(bytes) = slot_bytes(disc, vds, slot) else {
            continue;
        };
        let flags = verify_tag(&bytes, Some(info.tag_ident), info.location);
        if flags.contains(ErrorFlags::CHECKSUM) {
            error!("Checksum failure at {}[{}]", slot_name(slot), side_name(vds));
        }
        if flags.contains(ErrorFlags::CRC) {
            error!("CRC error at {}[{}]", slot_name(slot), side_name(vds));
        }
        if flags.contains(ErrorFlags::POSITION) {
            error!("Position failure at {}[{}]", slot_name(slot), side_name(vds));
        }
        if !flags.is_empty() {
            disc.seq.append_error(vds, slot, flags);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disc::{read_disc, ReadOptions};
    use crate::testimg::TestImageBuilder;

    #[test]
    fn test_prevailing_rule_highest_sequence_number() {
        // image carries two PVDs in the main VDS; the later one has the
        // higher volume descriptor sequence number and must prevail
        let img = TestImageBuilder::new().with_stale_extra_pvd().build();
        let mut io = img.into_io();
        let disc = read_disc(&mut io, &ReadOptions::default()).unwrap();
        let pvd = disc.pvd[MAIN_VDS].as_ref().unwrap();
        assert_eq!(pvd.volume_descriptor_sequence_number, 1);
        assert_eq!(pvd.volume_identifier.to_string(), "LinuxUDF");
    }

    #[test]
    fn test_corrupt_main_pvd_flagged() {
        let img = TestImageBuilder::new().corrupt_main_pvd_crc().build();
        let mut io = img.into_io();
        let disc = read_disc(&mut io, &ReadOptions::default()).unwrap();
        assert!(disc.seq.main[SLOT_PVD].error.contains(ErrorFlags::CRC));
        assert!(disc.seq.reserve[SLOT_PVD].error.is_empty());
        assert_eq!(disc.seq.correct_side(SLOT_PVD), Some(RESERVE_VDS));
    }

    #[test]
    fn test_both_sides_scanned_to_distinct_locations() {
        let img = TestImageBuilder::new().build();
        let mut io = img.into_io();
        let disc = read_disc(&mut io, &ReadOptions::default()).unwrap();
        assert_ne!(
            disc.seq.main[SLOT_PVD].location,
            disc.seq.reserve[SLOT_PVD].location
        );
        assert_eq!(disc.seq.main[SLOT_TD].tag_ident, 8);
        assert_eq!(disc.seq.reserve[SLOT_TD].tag_ident, 8);
    }
}
