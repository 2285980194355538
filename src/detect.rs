//! Volume Recognition Sequence and Anchor Volume Descriptor Pointer
//! location, including logical block size inference.
//!
//! The VRS lives at byte offset 32768 of the session; anchors are probed
//! at block 256, the last recorded block, last-256 and finally the legacy
//! block 512 of unclosed write-once media. When no block size is supplied
//! the detector iterates the legal sizes and accepts the smallest one for
//! which both a VRS and an anchor validate.

use log::{debug, error, warn};

use crate::crc::verify_tag;
use crate::disc::{Disc, ReadOptions};
use crate::error::{Result, UdfError};
use crate::extent::SpaceType;
use crate::io::{read_checked, BlockIo};
use crate::udf::{AnchorVolumeDescriptorPointer, VolStructDesc};

/// The legal logical block sizes, ECMA-167 requires a power of two.
pub const BLOCK_SIZES: [u32; 7] = [512, 1024, 2048, 4096, 8192, 16384, 32768];

pub const VRS_OFFSET: u64 = 32768;
const VRS_MAX_RECORDS: u32 = 64;

pub fn is_valid_block_size(size: u32) -> bool {
    BLOCK_SIZES.contains(&size)
}

struct VrsScan {
    bea: Option<u32>,
    nsr: Option<u32>,
    tea: Option<u32>,
}

/// Scan the Volume Recognition Sequence. `Ok(None)` means the area was
/// readable but carries no NSR record, i.e. this is not a UDF volume at
/// this block size.
fn read_vrs(io: &mut dyn BlockIo, disc: &mut Disc) -> Result<Option<VrsScan>> {
    let vsd_len = disc.block_size.max(2048) as u64;
    let mut scan = VrsScan {
        bea: None,
        nsr: None,
        tea: None,
    };
    let mut buf = [0u8; 7];

    for i in 0..VRS_MAX_RECORDS {
        if VRS_OFFSET + i as u64 * vsd_len >= 256 * disc.block_size as u64 {
            break;
        }
        let offset = disc.byte_offset(disc.start_block) + VRS_OFFSET + i as u64 * vsd_len;
        if read_checked(io, offset, &mut buf).is_err() {
            break;
        }
        if buf[1] == 0 {
            break;
        }
        let vsd = VolStructDesc::read(&buf);
        let ident = &vsd.standard_identifier;
        if ident == VolStructDesc::STD_ID_BEA01 {
            if scan.bea.is_none() {
                scan.bea = Some(i);
                disc.vrs[0] = Some(vsd);
            }
        } else if ident == VolStructDesc::STD_ID_NSR02
            || ident == VolStructDesc::STD_ID_NSR03
            || ident == VolStructDesc::STD_ID_NSR01
        {
            if scan.nsr.is_none() {
                scan.nsr = Some(i);
                disc.vrs[1] = Some(vsd);
            }
        } else if ident == VolStructDesc::STD_ID_TEA01 {
            if scan.tea.is_none() {
                scan.tea = Some(i);
                disc.vrs[2] = Some(vsd);
            }
        } else if ident != VolStructDesc::STD_ID_BOOT2
            && ident != VolStructDesc::STD_ID_CD001
            && ident != VolStructDesc::STD_ID_CDW02
        {
            break;
        }
        if i == VRS_MAX_RECORDS - 1 {
            warn!("Too many Volume Structure Descriptors in Volume Recognition Sequence, stopping scanning");
        }
    }

    if scan.nsr.is_none() {
        disc.vrs = [None, None, None];
        return Ok(None);
    }
    Ok(Some(scan))
}

/// Claim the VRS extent in the map once the block size is settled.
fn setup_vrs_extent(disc: &mut Disc, scan: &VrsScan) {
    let max = scan
        .bea
        .into_iter()
        .chain(scan.nsr)
        .chain(scan.tea)
        .max()
        .unwrap_or(0);
    let start = disc.start_block + (VRS_OFFSET / disc.block_size as u64) as u32;
    let blocks = if disc.block_size >= 2048 {
        max + 1
    } else {
        (2048 * (max + 1)).div_ceil(disc.block_size)
    };
    let _ = disc.map.set_extent(SpaceType::VRS, start, blocks);
}

/// Try to read an anchor at the given absolute block into slot `i`.
fn read_anchor_at(io: &mut dyn BlockIo, disc: &mut Disc, i: usize, location: u32) -> bool {
    let mut buf = vec![0u8; AnchorVolumeDescriptorPointer::size()];
    if read_checked(io, disc.byte_offset(location), &mut buf).is_err() {
        return false;
    }
    let avdp = AnchorVolumeDescriptorPointer::read(&buf);
    if avdp.tag.tag_identifier != AnchorVolumeDescriptorPointer::TAG_IDENTIFIER
        || avdp.tag.tag_location != location
    {
        return false;
    }
    let flags = verify_tag(
        &buf,
        Some(AnchorVolumeDescriptorPointer::TAG_IDENTIFIER),
        location,
    );
    if !flags.is_empty() {
        debug!("anchor at block {} has errors {:?}", location, flags);
    }
    disc.seq.anchors[i].tag_ident = AnchorVolumeDescriptorPointer::TAG_IDENTIFIER;
    disc.seq.anchors[i].location = location;
    disc.seq.anchors[i].error = flags;
    disc.anchors[i] = Some(avdp);
    if let Ok(ext) = disc.map.set_extent(SpaceType::ANCHOR, location, 1) {
        disc.map
            .set_desc(ext, AnchorVolumeDescriptorPointer::TAG_IDENTIFIER, 0, buf);
    }
    true
}

fn read_anchor_first(io: &mut dyn BlockIo, disc: &mut Disc) -> bool {
    let location = disc.start_block + 256;
    read_anchor_at(io, disc, 0, location)
}

/// Probe the second (last-256) and third (last) anchor locations.
fn read_anchor_second_third(io: &mut dyn BlockIo, disc: &mut Disc) -> bool {
    let last_block = disc.last_block.min(disc.blocks.saturating_sub(1));
    let bs = disc.block_size as u64;

    let mut found = false;
    if last_block > 256
        && (last_block - 256) as u64 * bs > VRS_OFFSET + bs
        && last_block - 256 != 256
    {
        found |= read_anchor_at(io, disc, 1, last_block - 256);
    }
    if last_block as u64 * bs > VRS_OFFSET + bs && last_block != 256 {
        found |= read_anchor_at(io, disc, 2, last_block);
    }

    let main_loc = |a: &Option<AnchorVolumeDescriptorPointer>| {
        a.as_ref()
            .map(|a| a.main_volume_descriptor_sequence_location.location_sector)
    };
    if disc.anchors[0].is_some() {
        for i in [1usize, 2] {
            if disc.anchors[i].is_some() && main_loc(&disc.anchors[0]) != main_loc(&disc.anchors[i])
            {
                warn!(
                    "Anchor Volume Descriptor Pointers disagree about the Main Volume Descriptor Sequence location, maybe wrong --startblock or --lastblock?"
                );
            }
        }
    }
    found
}

fn read_anchor_512(io: &mut dyn BlockIo, disc: &mut Disc) -> bool {
    let location = disc.start_block + 512;
    let found = read_anchor_at(io, disc, 0, location);
    if found {
        warn!("First, second and third Anchor Volume Descriptor Pointer not found, but found on block 512, using it");
    }
    found
}

fn setup_blocks(io: &mut dyn BlockIo, disc: &mut Disc, opts: &ReadOptions) {
    let blocks = io.size_bytes() / disc.block_size as u64;
    disc.blocks = blocks.min(u32::MAX as u64) as u32;
    if blocks > u32::MAX as u64 {
        warn!(
            "Disk is too big ({} blocks), using only {} blocks",
            blocks,
            u32::MAX
        );
    }
    disc.map = crate::extent::ExtentMap::new(disc.blocks);

    disc.start_block = opts
        .start_block
        .or_else(|| io.multisession_start_block())
        .unwrap_or(0);

    disc.last_block = opts
        .last_block
        .or(opts.vat_block)
        .or_else(|| io.last_written_block())
        .unwrap_or_else(|| disc.blocks.saturating_sub(1));
}

/// One detection attempt at the current `disc.block_size`. Returns true
/// when both a VRS and at least one anchor validate.
fn detect_at_block_size(io: &mut dyn BlockIo, disc: &mut Disc, opts: &ReadOptions) -> Result<bool> {
    setup_blocks(io, disc, opts);

    let Some(scan) = read_vrs(io, disc)? else {
        return Ok(false);
    };

    let first = read_anchor_first(io, disc);
    let second = read_anchor_second_third(io, disc);
    let found = if !first && !second {
        read_anchor_512(io, disc)
    } else {
        true
    };
    if !found {
        return Ok(false);
    }

    setup_vrs_extent(disc, &scan);
    Ok(true)
}

/// Locate the VRS and anchors, inferring the block size when necessary.
pub fn detect_udf(io: &mut dyn BlockIo, disc: &mut Disc, opts: &ReadOptions) -> Result<()> {
    if let Some(size) = opts.block_size {
        if !is_valid_block_size(size) {
            return Err(UdfError::InvalidBlockSize(size));
        }
        disc.block_size = size;
        if detect_at_block_size(io, disc, opts)? {
            finish_detection(io, disc);
            return Ok(());
        }
        error!("UDF Volume Recognition Sequence or Anchor Volume Descriptor Pointer not found");
        return Err(UdfError::NotUdf);
    }

    // Prefer the device's own sector size, then iterate the legal sizes
    // smallest first.
    let sector = io.sector_size();
    if is_valid_block_size(sector) {
        disc.block_size = sector;
        if detect_at_block_size(io, disc, opts)? {
            finish_detection(io, disc);
            return Ok(());
        }
    }

    for size in BLOCK_SIZES {
        if size == sector {
            continue;
        }
        opts.check_cancel()?;
        disc.block_size = size;
        disc.vrs = [None, None, None];
        disc.anchors = [None, None, None];
        if detect_at_block_size(io, disc, opts)? {
            finish_detection(io, disc);
            return Ok(());
        }
    }

    error!("UDF Volume Recognition Sequence not found");
    Err(UdfError::NotUdf)
}

fn finish_detection(io: &mut dyn BlockIo, disc: &mut Disc) {
    let sector = io.sector_size();
    if sector != 0 && sector != disc.block_size {
        warn!(
            "Detected block size is not corresponding to stored in medium: device reports {} but UDF uses {}",
            sector, disc.block_size
        );
    }
    debug!(
        "detected block size {} ({} blocks, start {}, last {})",
        disc.block_size, disc.blocks, disc.start_block, disc.last_block
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorFlags as EF;
    use crate::testimg::TestImageBuilder;

    #[test]
    fn test_detect_finds_vrs_and_anchors() {
        let img = TestImageBuilder::new().build();
        let mut io = img.into_io();
        let mut disc = Disc::new();
        detect_udf(&mut io, &mut disc, &ReadOptions::default()).unwrap();
        assert_eq!(disc.block_size, 2048);
        assert!(disc.vrs[0].is_some(), "BEA01 expected");
        assert!(disc.vrs[1].is_some(), "NSR descriptor expected");
        assert!(disc.vrs[2].is_some(), "TEA01 expected");
        assert!(disc.anchors[0].is_some());
        assert!(disc.anchors[2].is_some());
        assert_eq!(disc.seq.anchors[0].error, EF::empty());
    }

    #[test]
    fn test_forced_wrong_block_size_fails() {
        let img = TestImageBuilder::new().build();
        let mut io = img.into_io();
        let mut disc = Disc::new();
        let opts = ReadOptions {
            block_size: Some(512),
            ..Default::default()
        };
        assert!(detect_udf(&mut io, &mut disc, &opts).is_err());
    }

    #[test]
    fn test_invalid_block_size_rejected() {
        let img = TestImageBuilder::new().build();
        let mut io = img.into_io();
        let mut disc = Disc::new();
        for bad in [0u32, 3000, 1536, 65536] {
            let opts = ReadOptions {
                block_size: Some(bad),
                ..Default::default()
            };
            assert!(matches!(
                detect_udf(&mut io, &mut disc, &opts),
                Err(UdfError::InvalidBlockSize(_))
            ));
        }
    }

    #[test]
    fn test_anchor_only_at_512() {
        // wipe anchors at 256 and last; keep the legacy one at 512
        let img = TestImageBuilder::new().with_legacy_anchor_only().build();
        let mut io = img.into_io();
        let mut disc = Disc::new();
        detect_udf(&mut io, &mut disc, &ReadOptions::default()).unwrap();
        assert!(disc.anchors[0].is_some());
        assert_eq!(disc.seq.anchors[0].location, 512);
    }

    #[test]
    fn test_vrs_tolerates_cd001() {
        let img = TestImageBuilder::new().with_iso9660_bridge().build();
        let mut io = img.into_io();
        let mut disc = Disc::new();
        detect_udf(&mut io, &mut disc, &ReadOptions::default()).unwrap();
        assert!(disc.vrs[1].is_some());
    }
}
