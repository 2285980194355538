//! Structural repair.
//!
//! Everything here mutates descriptors in memory first, recomputes the
//! CRC and tag checksum, and only then writes. In dry-run mode the writes
//! are suppressed while the in-memory state mutates identically. Write
//! ordering in a full check is strict: Main copies first, a sync fence,
//! then Reserve copies, and the LVID close-out last.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{error, info, warn};

use crate::crc::{relocate_tag, seal_tag, verify_tag};
use crate::disc::{Disc, MAIN_VDS, RESERVE_VDS};
use crate::error::{exit_code, ErrorFlags, Result, UdfError};
use crate::icb::SpaceBitmapDescriptor;
use crate::io::{read_checked, BlockIo};
use crate::udf::{
    AnchorVolumeDescriptorPointer, LogicalVolumeIntegrityDescriptor, Timestamp,
    LVID_INTEGRITY_TYPE_CLOSE,
};
use crate::vds::{slot_name, SLOT_LVD, VDS_SLOTS};
use crate::walk::{DirectoryLocation, PartitionBitmap, RepairAction, WalkReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairPolicy {
    /// report problems, never write
    ReportOnly,
    /// repair everything repairable without asking
    AutoFix,
    /// ask the prompt callback before each repair
    Interactive,
}

/// Yes/no confirmation source for interactive repair.
pub trait Prompt {
    fn confirm(&mut self, message: &str) -> bool;
}

pub struct FixOptions<'a> {
    pub policy: RepairPolicy,
    /// suppress device writes; in-memory state still mutates
    pub no_write: bool,
    /// proceed with repairs on write-once or read-only media
    pub force: bool,
    /// timezone offset recorded in rewritten timestamps, minutes from UTC
    pub timezone_offset_minutes: i16,
    pub prompt: Option<&'a mut dyn Prompt>,
    pub cancel: Option<Arc<AtomicBool>>,
}

impl<'a> Default for FixOptions<'a> {
    fn default() -> Self {
        Self {
            policy: RepairPolicy::ReportOnly,
            no_write: false,
            force: false,
            timezone_offset_minutes: 0,
            prompt: None,
            cancel: None,
        }
    }
}

impl<'a> FixOptions<'a> {
    fn approve(&mut self, message: &str) -> bool {
        match self.policy {
            RepairPolicy::ReportOnly => false,
            RepairPolicy::AutoFix => true,
            RepairPolicy::Interactive => match &mut self.prompt {
                Some(p) => p.confirm(message),
                None => false,
            },
        }
    }

    fn check_cancel(&self) -> Result<()> {
        if let Some(flag) = &self.cancel {
            if flag.load(Ordering::Relaxed) {
                return Err(UdfError::Cancelled);
            }
        }
        Ok(())
    }
}

fn write_bytes(io: &mut dyn BlockIo, opts: &FixOptions, offset: u64, bytes: &[u8]) -> Result<()> {
    if opts.no_write {
        return Ok(());
    }
    io.write_at(offset, bytes)
}

/// Write a stored descriptor's bytes back to its home position, found by
/// identity and intra-extent offset within the extent's descriptor store.
pub fn write_desc(
    disc: &Disc,
    io: &mut dyn BlockIo,
    opts: &FixOptions,
    ext: crate::extent::ExtentId,
    ident: u16,
    offset: u32,
) -> Result<()> {
    let extent = disc.map.get(ext);
    let Some(desc) = disc.map.find_desc(ext, offset).filter(|d| d.ident == ident) else {
        return Err(UdfError::InvalidDescriptorTag);
    };
    let position = (extent.start + desc.offset) as u64 * disc.block_size as u64;
    write_bytes(io, opts, position, &desc.bytes())
}

/// Copy a descriptor between two absolute blocks, fixing the declared
/// position, CRC and checksum in the destination copy.
pub fn copy_descriptor(
    io: &mut dyn BlockIo,
    disc: &Disc,
    opts: &FixOptions,
    source_block: u32,
    destination_block: u32,
    size: usize,
) -> Result<()> {
    let mut buf = vec![0u8; size];
    read_checked(io, disc.byte_offset(source_block), &mut buf)?;
    relocate_tag(&mut buf, destination_block);
    write_bytes(io, opts, disc.byte_offset(destination_block), &buf)
}

/// Absolute block of an anchor slot: 256, last-256, last.
pub fn anchor_position(disc: &Disc, slot: usize) -> u32 {
    match slot {
        0 => disc.start_block + 256,
        1 => disc.last_block.min(disc.blocks.saturating_sub(1)) - 256,
        _ => disc.last_block.min(disc.blocks.saturating_sub(1)),
    }
}

/// Write the anchor from `source` to `target`, re-reading and verifying
/// the written copy.
pub fn write_avdp(
    disc: &mut Disc,
    io: &mut dyn BlockIo,
    opts: &FixOptions,
    source: usize,
    target: usize,
) -> Result<()> {
    let source_position = anchor_position(disc, source);
    let target_position = anchor_position(disc, target);

    copy_descriptor(
        io,
        disc,
        opts,
        source_position,
        target_position,
        AnchorVolumeDescriptorPointer::size(),
    )?;

    if opts.no_write {
        // mirror the write in memory only
        if let Some(src) = disc.anchors[source].clone() {
            let mut copy = src;
            copy.tag.tag_location = target_position;
            disc.anchors[target] = Some(copy);
        }
        return Ok(());
    }

    let mut buf = vec![0u8; AnchorVolumeDescriptorPointer::size()];
    read_checked(io, disc.byte_offset(target_position), &mut buf)?;
    let flags = verify_tag(
        &buf,
        Some(AnchorVolumeDescriptorPointer::TAG_IDENTIFIER),
        target_position,
    );
    if !flags.is_empty() {
        error!("AVDP[{}] verification after write failed: {:?}", target, flags);
        return Err(UdfError::InvalidDescriptorTag);
    }
    disc.anchors[target] = Some(AnchorVolumeDescriptorPointer::read(&buf));
    disc.seq.anchors[target].tag_ident = AnchorVolumeDescriptorPointer::TAG_IDENTIFIER;
    disc.seq.anchors[target].location = target_position;
    disc.seq.anchors[target].error = ErrorFlags::empty();
    info!("AVDP[{}] successfully written", target);
    Ok(())
}

/// Repair an anchor's VDS extent lengths: when Main and Reserve declare
/// different lengths, the larger value wins provided it covers the 16
/// logical blocks ECMA-167 mandates.
pub fn fix_avdp_extent_lengths(
    disc: &mut Disc,
    io: &mut dyn BlockIo,
    opts: &FixOptions,
    target: usize,
) -> Result<()> {
    let minimum = 16 * disc.block_size;
    let position = anchor_position(disc, target);
    let Some(anchor) = &mut disc.anchors[target] else {
        return Err(UdfError::InvalidDescriptorTag);
    };

    let main_len = anchor.main_volume_descriptor_sequence_location.length_bytes;
    let reserve_len = anchor
        .reserve_volume_descriptor_sequence_location
        .length_bytes;
    if main_len > reserve_len {
        if main_len >= minimum {
            anchor
                .reserve_volume_descriptor_sequence_location
                .length_bytes = main_len;
        }
    } else if reserve_len >= minimum {
        anchor.main_volume_descriptor_sequence_location.length_bytes = reserve_len;
    }

    let mut buf = vec![0u8; AnchorVolumeDescriptorPointer::size()];
    anchor.write(&mut buf);
    seal_tag(&mut buf);
    disc.anchors[target] = Some(AnchorVolumeDescriptorPointer::read(&buf));
    disc.seq.anchors[target].error &= !ErrorFlags::EXT_LEN;
    write_bytes(io, opts, disc.byte_offset(position), &buf)?;
    info!("AVDP[{}] extent lengths fixed", target);
    Ok(())
}

/// Copy one descriptor class between the Main and Reserve sequences,
/// rewriting the destination's position, CRC and checksum.
pub fn copy_vds_descriptor(
    disc: &mut Disc,
    io: &mut dyn BlockIo,
    opts: &FixOptions,
    source_vds: usize,
    slot: usize,
) -> Result<()> {
    let target_vds = 1 - source_vds;
    let source = disc.seq.side(source_vds)[slot];
    let target = disc.seq.side(target_vds)[slot];
    if source.tag_ident == 0 || target.tag_ident == 0 {
        return Err(UdfError::InvalidDescriptorTag);
    }
    let size = descriptor_store_size(disc, source_vds, slot);
    copy_descriptor(io, disc, opts, source.location, target.location, size)?;
    copy_slot_in_memory(disc, slot, source_vds, target_vds, target.location);
    Ok(())
}

/// Reconcile the Main and Reserve VDS: a damaged copy is replaced by its
/// healthy sibling. Both copies damaged is unrecoverable for that
/// descriptor. Returns the fsck-style status bits (0, 1, 4).
pub fn fix_vds(disc: &mut Disc, io: &mut dyn BlockIo, opts: &mut FixOptions) -> Result<i32> {
    let mut status = 0;
    let mut fixed_main = false;

    // A slot missing from one sequence entirely gets the mirror position:
    // the same offset within the sibling sequence extent.
    let vds_starts = disc.anchors.iter().flatten().next().map(|a| {
        (
            a.main_volume_descriptor_sequence_location.location_sector,
            a.reserve_volume_descriptor_sequence_location.location_sector,
        )
    });
    let mirror_location = |present: u32, from_start: u32, to_start: u32| -> Option<u32> {
        present.checked_sub(from_start).map(|off| to_start + off)
    };

    // Main copies first
    for slot in 0..VDS_SLOTS {
        opts.check_cancel()?;
        let main = disc.seq.main[slot];
        let reserve = disc.seq.reserve[slot];
        if main.tag_ident == 0 && reserve.tag_ident == 0 {
            continue;
        }

        if !main.error.is_empty() && !reserve.error.is_empty() {
            error!(
                "Both copies of {} are broken, maybe not able to continue later",
                slot_name(slot)
            );
            status |= exit_code::ERRORS_UNCORRECTED;
        } else if !main.error.is_empty() || main.tag_ident == 0 {
            let destination = if main.tag_ident != 0 {
                Some(main.location)
            } else {
                vds_starts.and_then(|(m, r)| mirror_location(reserve.location, r, m))
            };
            let Some(destination) = destination else {
                status |= exit_code::ERRORS_UNCORRECTED;
                continue;
            };
            if opts.approve(&format!("Main {} is broken. Fix it?", slot_name(slot))) {
                warn!("Fixing Main {}", slot_name(slot));
                let size = descriptor_store_size(disc, RESERVE_VDS, slot);
                copy_descriptor(io, disc, opts, reserve.location, destination, size)?;
                copy_slot_in_memory(disc, slot, RESERVE_VDS, MAIN_VDS, destination);
                status |= exit_code::ERRORS_CORRECTED;
                fixed_main = true;
            } else {
                error!("Main {} is broken", slot_name(slot));
                status |= exit_code::ERRORS_UNCORRECTED;
            }
        }
    }

    // a crash between the copies must not leave both halves torn
    if fixed_main {
        if !opts.no_write {
            io.sync()?;
        }
    }

    for slot in 0..VDS_SLOTS {
        opts.check_cancel()?;
        let main = disc.seq.main[slot];
        let reserve = disc.seq.reserve[slot];
        if main.tag_ident == 0 && reserve.tag_ident == 0 {
            continue;
        }
        if main.error.is_empty()
            && main.tag_ident != 0
            && (!reserve.error.is_empty() || reserve.tag_ident == 0)
        {
            let destination = if reserve.tag_ident != 0 {
                Some(reserve.location)
            } else {
                vds_starts.and_then(|(m, r)| mirror_location(main.location, m, r))
            };
            let Some(destination) = destination else {
                status |= exit_code::ERRORS_UNCORRECTED;
                continue;
            };
            if opts.approve(&format!("Reserve {} is broken. Fix it?", slot_name(slot))) {
                warn!("Fixing Reserve {}", slot_name(slot));
                let size = descriptor_store_size(disc, MAIN_VDS, slot);
                copy_descriptor(io, disc, opts, main.location, destination, size)?;
                copy_slot_in_memory(disc, slot, MAIN_VDS, RESERVE_VDS, destination);
                status |= exit_code::ERRORS_CORRECTED;
            } else {
                error!("Reserve {} is broken", slot_name(slot));
                status |= exit_code::ERRORS_UNCORRECTED;
            }
        }
    }

    if status & exit_code::ERRORS_CORRECTED != 0 && !opts.no_write {
        io.sync()?;
    }
    Ok(status)
}

/// On-disc size of one slot's descriptor, for copying.
fn descriptor_store_size(disc: &Disc, vds: usize, slot: usize) -> usize {
    match slot {
        SLOT_LVD => disc.lvd[vds]
            .as_ref()
            .map(|l| l.get_length())
            .unwrap_or(512),
        crate::vds::SLOT_USD => disc.usd[vds]
            .as_ref()
            .map(|u| u.get_length())
            .unwrap_or(512),
        _ => 512,
    }
}

/// Mirror a VDS copy repair in the in-memory slots and bookkeeping.
fn copy_slot_in_memory(disc: &mut Disc, slot: usize, from: usize, to: usize, location: u32) {
    match slot {
        crate::vds::SLOT_PVD => disc.pvd[to] = disc.pvd[from].clone(),
        crate::vds::SLOT_LVD => disc.lvd[to] = disc.lvd[from].clone(),
        crate::vds::SLOT_PD => disc.pd[to] = disc.pd[from].clone(),
        crate::vds::SLOT_PD2 => disc.pd2[to] = disc.pd2[from].clone(),
        crate::vds::SLOT_USD => disc.usd[to] = disc.usd[from].clone(),
        crate::vds::SLOT_IUVD => disc.iuvd[to] = disc.iuvd[from].clone(),
        crate::vds::SLOT_TD => disc.td[to] = disc.td[from].clone(),
        _ => {}
    }
    let ident = disc.seq.side(from)[slot].tag_ident;
    disc.seq.record(to, slot, ident, location);
    disc.seq.side_mut(to)[slot].error = ErrorFlags::empty();
}

/// Replace the on-disc Space Bitmap with the walker's observed bitmap,
/// recomputing the descriptor CRC.
pub fn fix_pd_space_bitmap(
    disc: &mut Disc,
    io: &mut dyn BlockIo,
    opts: &FixOptions,
    observed: &PartitionBitmap,
) -> Result<()> {
    let Some(pd) = disc.pd_any() else {
        error!("No correct PD found. Aborting.");
        return Err(UdfError::BothCopiesDamaged("PD"));
    };
    let phd = pd.partition_header();
    let length = phd.unalloc_space_bitmap.extent_length_bytes();
    if length <= 3 {
        error!("PD Space Bitmap recovery failed: no bitmap recorded");
        return Err(UdfError::InvalidDescriptorTag);
    }

    let position = phd.unalloc_space_bitmap.extent_location;
    let location = pd.partition_starting_location + position;

    let mut buf = vec![0u8; length as usize];
    read_checked(io, disc.byte_offset(location), &mut buf)?;
    let sbd = SpaceBitmapDescriptor::read(&buf);
    if sbd.tag.tag_identifier != SpaceBitmapDescriptor::TAG_IDENTIFIER {
        error!("Space Bitmap Descriptor not found");
        return Err(UdfError::InvalidDescriptorTag);
    }

    let copy_len = (sbd.number_of_bytes as usize).min(observed.as_bytes().len());
    buf[SpaceBitmapDescriptor::HEADER_SIZE..SpaceBitmapDescriptor::HEADER_SIZE + copy_len]
        .copy_from_slice(&observed.as_bytes()[..copy_len]);
    seal_tag(&mut buf);
    write_bytes(io, opts, disc.byte_offset(location), &buf)?;

    disc.seq.pd_bitmap.error &= !(ErrorFlags::FREE_SPACE | ErrorFlags::CRC | ErrorFlags::CHECKSUM);
    info!("PD Space Bitmap recovery was successful");
    Ok(())
}

/// Figures the LVID close-out writes back.
pub struct CloseStats {
    pub num_files: u32,
    pub num_dirs: u32,
    pub max_unique_id: u64,
    pub used_blocks: u32,
}

/// Close the LVID: fresh recording timestamp, counts from the walk, the
/// next Unique ID, the free-space table, and integrity type `close`.
pub fn fix_lvid_close(
    disc: &mut Disc,
    io: &mut dyn BlockIo,
    opts: &FixOptions,
    stats: &CloseStats,
) -> Result<()> {
    if disc.seq.correct_side(SLOT_LVD).is_none() {
        error!("No correct LVD found. Aborting.");
        return Err(UdfError::BothCopiesDamaged("LVD"));
    }
    let Some(lvid) = &mut disc.lvid else {
        return Err(UdfError::InvalidDescriptorTag);
    };

    if let Some(mut iu) = lvid.imp_use() {
        iu.number_of_files = stats.num_files;
        iu.number_of_directories = stats.num_dirs;
        lvid.set_imp_use(&iu);
    }

    lvid.set_next_unique_id(stats.max_unique_id + 1);

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    lvid.recording_date_and_time = Timestamp::from_unix(now, opts.timezone_offset_minutes);

    if let (Some(&size), Some(free)) = (
        lvid.size_table.first(),
        lvid.free_space_table.first_mut(),
    ) {
        *free = size.saturating_sub(stats.used_blocks);
    }

    // close the integrity last, then reseal
    lvid.integrity_type = LVID_INTEGRITY_TYPE_CLOSE;

    let mut buf = vec![0u8; lvid.get_length()];
    lvid.write(&mut buf);
    seal_tag(&mut buf);
    *lvid = LogicalVolumeIntegrityDescriptor::read(&buf);

    let location = disc.lvid_location;
    write_bytes(io, opts, disc.byte_offset(location), &buf)?;
    disc.seq.lvid.error = ErrorFlags::empty();
    info!("LVID recovery was successful");
    Ok(())
}

/// Apply the walker's recorded repairs: Unique ID rewrites and directory
/// streams with deleted unfinished files, scattered back in extent order.
pub fn apply_walk_repairs(
    disc: &mut Disc,
    io: &mut dyn BlockIo,
    opts: &mut FixOptions,
    report: &WalkReport,
) -> Result<(u32, u32)> {
    let mut fixed = 0u32;
    let mut skipped = 0u32;
    let bs = disc.block_size as usize;

    for repair in &report.repairs {
        opts.check_cancel()?;
        match repair {
            RepairAction::RewriteFileEntryUniqueId { fe_block, unique_id } => {
                if !opts.approve("File Entry Unique ID differs from its directory entry. Fix it?") {
                    skipped += 1;
                    continue;
                }
                let mut block = vec![0u8; bs];
                read_checked(io, disc.byte_offset(*fe_block), &mut block)?;
                let Some(mut entry) = crate::icb::AnyFileEntry::parse(&block) else {
                    skipped += 1;
                    continue;
                };
                entry.set_unique_id(*unique_id);
                entry.write(&mut block);
                seal_tag(&mut block[..entry.get_length()]);
                write_bytes(io, opts, disc.byte_offset(*fe_block), &block)?;
                fixed += 1;
            }
            RepairAction::RewriteDirectory(patch) => {
                if !opts.approve("Remove unfinished file?") {
                    skipped += 1;
                    continue;
                }
                match &patch.location {
                    DirectoryLocation::InIcb { fe_block } => {
                        let mut block = vec![0u8; bs];
                        read_checked(io, disc.byte_offset(*fe_block), &mut block)?;
                        let Some(entry) = crate::icb::AnyFileEntry::parse(&block) else {
                            skipped += 1;
                            continue;
                        };
                        let start = entry.header_size()
                            + entry.length_of_extended_attributes() as usize;
                        let len = patch.buffer.len().min(bs - start);
                        block[start..start + len].copy_from_slice(&patch.buffer[..len]);
                        seal_tag(&mut block[..entry.get_length()]);
                        write_bytes(io, opts, disc.byte_offset(*fe_block), &block)?;
                    }
                    DirectoryLocation::Extents(extents) => {
                        // scatter the linearized buffer back in extent order
                        let mut offset = 0usize;
                        for (abs_block, byte_len) in extents {
                            let len = *byte_len as usize;
                            let chunk = &patch.buffer[offset..offset + len];
                            write_bytes(io, opts, disc.byte_offset(*abs_block), chunk)?;
                            offset += len;
                        }
                    }
                }
                for zero_block in &patch.zero_blocks {
                    let zeros = vec![0u8; bs];
                    write_bytes(io, opts, disc.byte_offset(*zero_block), &zeros)?;
                }
                fixed += 1;
            }
        }
    }
    Ok((fixed, skipped))
}

/// Outcome of a full check-and-repair run.
#[derive(Debug, Default)]
pub struct CheckReport {
    pub errors_found: u32,
    pub errors_fixed: u32,
    pub errors_remaining: u32,
    pub num_files: u32,
    pub num_dirs: u32,
    pub exit_code: i32,
}

/// Full filesystem check: walk the tree, reconcile space accounting, and
/// repair per policy with the strict Main-then-Reserve write ordering and
/// the LVID closed last.
pub fn check(disc: &mut Disc, io: &mut dyn BlockIo, opts: &mut FixOptions) -> Result<CheckReport> {
    let mut report = CheckReport::default();

    // fatal preconditions
    if disc.anchors.iter().all(|a| a.is_none()) {
        return Err(UdfError::BothCopiesDamaged("AVDP"));
    }
    if disc.lvd[0].is_none() && disc.lvd[1].is_none() {
        return Err(UdfError::BothCopiesDamaged("LVD"));
    }
    if let Some(lvd) = disc.lvd_any() {
        if lvd.logical_block_size != disc.block_size {
            return Err(UdfError::InvalidBlockSize(lvd.logical_block_size));
        }
    }
    if disc.fsd.is_none() {
        return Err(UdfError::BothCopiesDamaged("FSD"));
    }

    // write-once and read-only media refuse mutation unless forced
    let write_protected = disc.vat.is_some()
        || disc
            .pd_any()
            .map(|p| {
                p.access_type == crate::udf::ACCESS_TYPE_READ_ONLY
                    || p.access_type == crate::udf::ACCESS_TYPE_WRITE_ONCE
            })
            .unwrap_or(false);
    if write_protected && !opts.force && opts.policy != RepairPolicy::ReportOnly {
        warn!("medium is write-once or read-only, refusing repairs without --force");
        opts.policy = RepairPolicy::ReportOnly;
    }

    let lvid_was_open = disc.lvid.as_ref().map(|l| l.is_open()).unwrap_or(false);
    if lvid_was_open {
        warn!("Logical Volume Integrity Descriptor is open");
        report.errors_found += 1;
    }

    let mut walk = crate::walk::walk_file_tree(io, disc)?;
    let space = crate::space::reconcile_space(io, disc, &mut walk);
    report.num_files = walk.num_files;
    report.num_dirs = walk.num_dirs;
    report.errors_found += walk.structural_errors;
    report.errors_remaining += walk.structural_errors;

    // anchors: restore missing copies from a healthy one. The anchor at
    // last-256 (slot 1) is optional; slot 0 found at the legacy block 512
    // means unclosed media, whose anchor layout is left alone.
    let legacy_layout = disc.seq.anchors[0].location == disc.start_block + 512;
    if let Some(source) = (0..3).find(|&i| {
        disc.anchors[i].is_some() && disc.seq.anchors[i].error.is_empty()
    }) {
        for target in 0..3 {
            if target == source
                || disc.last_block <= 512
                || legacy_layout
                || disc.virtual_partition_map().is_some()
            {
                continue;
            }
            let damaged =
                disc.anchors[target].is_some() && !disc.seq.anchors[target].error.is_empty();
            let missing = disc.anchors[target].is_none() && target != 1;
            if damaged || missing {
                report.errors_found += 1;
                if opts.approve(&format!("AVDP[{}] is broken or missing. Fix it?", target)) {
                    if write_avdp(disc, io, opts, source, target).is_ok() {
                        report.errors_fixed += 1;
                    } else {
                        report.errors_remaining += 1;
                    }
                } else {
                    report.errors_remaining += 1;
                }
            }
        }
    }

    // anchor extent lengths
    for slot in 0..3 {
        let Some(anchor) = &disc.anchors[slot] else {
            continue;
        };
        let main_len = anchor.main_volume_descriptor_sequence_location.length_bytes;
        let reserve_len = anchor
            .reserve_volume_descriptor_sequence_location
            .length_bytes;
        let minimum = 16 * disc.block_size;
        if main_len != reserve_len && (main_len >= minimum || reserve_len >= minimum) {
            disc.seq.anchors[slot].error |= ErrorFlags::EXT_LEN;
            report.errors_found += 1;
            if opts.approve(&format!("AVDP[{}] extent lengths differ. Fix it?", slot)) {
                fix_avdp_extent_lengths(disc, io, opts, slot)?;
                report.errors_fixed += 1;
            } else {
                report.errors_remaining += 1;
            }
        }
    }

    // VDS pairs
    let vds_errors = (0..VDS_SLOTS)
        .filter(|&s| {
            !disc.seq.main[s].error.is_empty() || !disc.seq.reserve[s].error.is_empty()
        })
        .count() as u32;
    report.errors_found += vds_errors;
    let status = fix_vds(disc, io, opts)?;
    if status & exit_code::ERRORS_CORRECTED != 0 {
        report.errors_fixed += vds_errors;
    } else if vds_errors > 0 {
        report.errors_remaining += vds_errors;
    }

    // file-tree repairs recorded by the walker
    let repair_count = walk.repairs.len() as u32;
    report.errors_found += repair_count;
    let (fixed, skipped) = apply_walk_repairs(disc, io, opts, &walk)?;
    report.errors_fixed += fixed;
    report.errors_remaining += skipped;
    let mut files_removed = 0u32;
    if fixed > 0 {
        for repair in &walk.repairs {
            if let RepairAction::RewriteDirectory(patch) = repair {
                files_removed += patch.files_removed;
            }
        }
    }

    // space bitmap divergence
    if disc.seq.pd_bitmap.error.contains(ErrorFlags::FREE_SPACE)
        || disc.seq.pd_bitmap.error.contains(ErrorFlags::CRC)
    {
        report.errors_found += 1;
        let approved = opts.approve("Space Bitmap differs from observed usage. Rebuild it?");
        if approved {
            if let Some(bitmap) = &walk.used_bitmap {
                fix_pd_space_bitmap(disc, io, opts, bitmap)?;
                report.errors_fixed += 1;
            }
        } else {
            report.errors_remaining += 1;
        }
    }

    // LVID close-out, strictly last
    let timestamp_skew = disc.seq.lvid.error.contains(ErrorFlags::TIMESTAMP);
    let counts_differ =
        walk.num_files - files_removed != disc.num_files || walk.num_dirs != disc.num_dirs;
    let next_id_stale = disc
        .lvid
        .as_ref()
        .map(|l| l.next_unique_id() != walk.max_unique_id + 1 && walk.max_unique_id != 0)
        .unwrap_or(false);
    if lvid_was_open || timestamp_skew || counts_differ || next_id_stale {
        if !lvid_was_open {
            report.errors_found += 1;
        }
        if opts.approve("Logical Volume Integrity needs closing. Fix it?") {
            if !opts.no_write {
                io.sync()?;
            }
            let used_blocks = walk
                .used_bitmap
                .as_ref()
                .map(|b| b.bits() - b.count_free())
                .unwrap_or((walk.used_space_bytes / disc.block_size as u64) as u32);
            let stats = CloseStats {
                num_files: walk.num_files - files_removed,
                num_dirs: walk.num_dirs,
                max_unique_id: walk.max_unique_id,
                used_blocks,
            };
            fix_lvid_close(disc, io, opts, &stats)?;
            disc.num_files = stats.num_files;
            disc.num_dirs = stats.num_dirs;
            report.errors_fixed += 1;
        } else {
            report.errors_remaining += 1;
        }
    }

    if !opts.no_write {
        io.sync()?;
    }

    space_summary(&space);

    report.exit_code = if report.errors_found == 0 {
        exit_code::OK
    } else if report.errors_remaining == 0 {
        exit_code::ERRORS_CORRECTED
    } else {
        exit_code::ERRORS_UNCORRECTED
    };
    Ok(report)
}

fn space_summary(space: &crate::space::SpaceCheck) {
    if space.mismatched_blocks > 0 {
        warn!(
            "free space: declared {} blocks, observed {} blocks, {} blocks differ",
            space.declared_free_blocks, space.computed_free_blocks, space.mismatched_blocks
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disc::{read_disc, ReadOptions};
    use crate::testimg::TestImageBuilder;
    use crate::vds::SLOT_PVD;

    fn autofix() -> FixOptions<'static> {
        FixOptions {
            policy: RepairPolicy::AutoFix,
            ..Default::default()
        }
    }

    #[test]
    fn test_clean_image_checks_clean() {
        let img = TestImageBuilder::new().build();
        let mut io = img.into_io();
        let mut disc = read_disc(&mut io, &ReadOptions::default()).unwrap();
        let report = check(&mut disc, &mut io, &mut autofix()).unwrap();
        assert_eq!(report.exit_code, exit_code::OK);
        assert_eq!(report.errors_found, 0);
        assert_eq!(report.num_files, 3);
        assert_eq!(report.num_dirs, 2);
    }

    #[test]
    fn test_fix_vds_copies_reserve_over_broken_main() {
        let img = TestImageBuilder::new().corrupt_main_pvd_crc().build();
        let mut io = img.into_io();
        let mut disc = read_disc(&mut io, &ReadOptions::default()).unwrap();
        assert!(disc.seq.main[SLOT_PVD].error.contains(ErrorFlags::CRC));
        let status = fix_vds(&mut disc, &mut io, &mut autofix()).unwrap();
        assert_eq!(status, exit_code::ERRORS_CORRECTED);

        // post-state: a fresh scan of the same device sees a healthy main PVD
        let disc2 = read_disc(&mut io, &ReadOptions::default()).unwrap();
        assert!(disc2.seq.main[SLOT_PVD].error.is_empty());
        assert_eq!(
            disc2.pvd[MAIN_VDS].as_ref().unwrap().volume_identifier.to_string(),
            disc2.pvd[RESERVE_VDS].as_ref().unwrap().volume_identifier.to_string()
        );
    }

    #[test]
    fn test_fix_vds_is_idempotent() {
        let img = TestImageBuilder::new().corrupt_main_pvd_crc().build();
        let mut io = img.into_io();
        let mut disc = read_disc(&mut io, &ReadOptions::default()).unwrap();
        fix_vds(&mut disc, &mut io, &mut autofix()).unwrap();

        let mut disc2 = read_disc(&mut io, &ReadOptions::default()).unwrap();
        let status = fix_vds(&mut disc2, &mut io, &mut autofix()).unwrap();
        assert_eq!(status, 0, "second application must be a no-op");
    }

    #[test]
    fn test_report_only_never_writes() {
        let img = TestImageBuilder::new().corrupt_main_pvd_crc().build();
        let before = img.clone_data();
        let mut io = img.into_io();
        let mut disc = read_disc(&mut io, &ReadOptions::default()).unwrap();
        let mut opts = FixOptions::default(); // ReportOnly
        let _ = check(&mut disc, &mut io, &mut opts).unwrap();
        assert_eq!(io.data, before, "report-only must not touch the device");
    }

    #[test]
    fn test_no_write_mutates_memory_only() {
        let img = TestImageBuilder::new().with_open_lvid().build();
        let before = img.clone_data();
        let mut io = img.into_io();
        let mut disc = read_disc(&mut io, &ReadOptions::default()).unwrap();
        let mut opts = FixOptions {
            policy: RepairPolicy::AutoFix,
            no_write: true,
            ..Default::default()
        };
        let report = check(&mut disc, &mut io, &mut opts).unwrap();
        assert_eq!(report.exit_code, exit_code::ERRORS_CORRECTED);
        assert!(!disc.lvid.as_ref().unwrap().is_open());
        assert_eq!(io.data, before, "dry run must not touch the device");
    }

    #[test]
    fn test_lvid_close_out() {
        let img = TestImageBuilder::new().with_open_lvid().build();
        let mut io = img.into_io();
        let mut disc = read_disc(&mut io, &ReadOptions::default()).unwrap();
        assert!(disc.lvid.as_ref().unwrap().is_open());
        let report = check(&mut disc, &mut io, &mut autofix()).unwrap();
        assert_eq!(report.exit_code, exit_code::ERRORS_CORRECTED);

        let disc2 = read_disc(&mut io, &ReadOptions::default()).unwrap();
        let lvid = disc2.lvid.as_ref().unwrap();
        assert!(!lvid.is_open());
        assert_eq!(lvid.next_unique_id(), crate::testimg::MAX_UNIQUE_ID + 1);
        // a rewritten LVID must verify clean
        assert!(disc2.seq.lvid.error.is_empty());

        // recorded timestamp is close to the wall clock
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        let recorded = lvid.recording_date_and_time.to_unix().unwrap();
        assert!((now - recorded).abs() < 5, "timestamp skew too large");
    }

    #[test]
    fn test_interactive_declined_leaves_errors() {
        struct No;
        impl Prompt for No {
            fn confirm(&mut self, _message: &str) -> bool {
                false
            }
        }
        let img = TestImageBuilder::new().corrupt_main_pvd_crc().build();
        let mut io = img.into_io();
        let mut disc = read_disc(&mut io, &ReadOptions::default()).unwrap();
        let mut no = No;
        let mut opts = FixOptions {
            policy: RepairPolicy::Interactive,
            prompt: Some(&mut no),
            ..Default::default()
        };
        let report = check(&mut disc, &mut io, &mut opts).unwrap();
        assert_eq!(report.exit_code, exit_code::ERRORS_UNCORRECTED);
    }

    #[test]
    fn test_unfinished_file_removed_and_counts_updated() {
        let img = TestImageBuilder::new().with_unfinished_file().build();
        let mut io = img.into_io();
        let mut disc = read_disc(&mut io, &ReadOptions::default()).unwrap();
        let report = check(&mut disc, &mut io, &mut autofix()).unwrap();
        assert!(report.errors_fixed > 0);

        // after the repair the walk sees one file less and no repairs
        let mut disc2 = read_disc(&mut io, &ReadOptions::default()).unwrap();
        let walk = crate::walk::walk_file_tree(&mut io, &mut disc2).unwrap();
        assert_eq!(walk.num_files, 3); // 4 files on this image, one removed
        assert!(walk.repairs.is_empty());
    }

    #[test]
    fn test_space_bitmap_rebuild_roundtrip() {
        let img = TestImageBuilder::new().with_bitmap_divergence().build();
        let mut io = img.into_io();
        let mut disc = read_disc(&mut io, &ReadOptions::default()).unwrap();
        let report = check(&mut disc, &mut io, &mut autofix()).unwrap();
        assert!(report.errors_fixed > 0);

        // a fresh walk must now match the on-disc bitmap bit for bit
        let mut disc2 = read_disc(&mut io, &ReadOptions::default()).unwrap();
        let mut walk = crate::walk::walk_file_tree(&mut io, &mut disc2).unwrap();
        let check2 = crate::space::reconcile_space(&mut io, &mut disc2, &mut walk);
        assert_eq!(check2.mismatched_blocks, 0);
    }
}
