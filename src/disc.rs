//! The in-memory model of one UDF volume plus the `read_disc` discovery
//! pipeline that builds it: BlockIo -> anchor/VRS detection -> VDS scan ->
//! LVID chain -> partition maps (VAT / sparing / metadata) -> FSD ->
//! free-space figures.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::warn;

use crate::error::{Result, UdfError};
use crate::extent::{ExtentMap, SpaceType};
use crate::io::{read_checked, BlockIo};
use crate::udf::{
    AnchorVolumeDescriptorPointer, FileSetDescriptor, ImpUseVolumeDescriptor,
    LogicalVolumeDescriptor, LogicalVolumeIntegrityDescriptor, PartitionDescriptor, PartitionMap,
    PrimaryVolumeDescriptor, ShortAllocationDescriptor, SparingTable, TerminatingDescriptor,
    UnallocatedSpaceDescriptor, VolStructDesc,
};
use crate::vds::VdsBookkeeping;

/// Highest UDF revision this engine understands.
pub const MAX_SUPPORTED_REVISION: u16 = 0x0260;

pub const MBR_BOOT_SIGNATURE: u16 = 0xAA55;

/// Main copy of a Main/Reserve descriptor pair.
pub const MAIN_VDS: usize = 0;
/// Reserve copy of a Main/Reserve descriptor pair.
pub const RESERVE_VDS: usize = 1;

#[derive(Clone, Default)]
pub struct ReadOptions {
    /// Logical block size; detected from the medium when absent. Mandatory
    /// when it differs from the device's reported sector size.
    pub block_size: Option<u32>,
    /// Session start block for multisession media.
    pub start_block: Option<u32>,
    /// Last recorded block, overriding what the device reports.
    pub last_block: Option<u32>,
    /// Block to search for the Virtual Allocation Table.
    pub vat_block: Option<u32>,
    /// Cooperative cancel flag, checked at descriptor-sequence boundaries.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl ReadOptions {
    pub fn check_cancel(&self) -> Result<()> {
        if let Some(flag) = &self.cancel {
            if flag.load(Ordering::Relaxed) {
                return Err(UdfError::Cancelled);
            }
        }
        Ok(())
    }
}

/// The root aggregate describing everything known about one volume.
///
/// Descriptor pairs are kept in slots: index 0 is the instance that
/// prevailed in the Main VDS, index 1 the one from the Reserve VDS. Both
/// refer to the same logical object; divergence is a repair event.
pub struct Disc {
    /// UDF revision of the volume (from LVID/IUVD/domain suffixes)
    pub udf_rev: u16,
    /// minimum revision required to write the volume
    pub udf_write_rev: u16,
    pub block_size: u32,
    /// device size in blocks
    pub blocks: u32,
    pub start_block: u32,
    pub last_block: u32,
    pub vat_block: Option<u32>,
    pub num_files: u32,
    pub num_dirs: u32,
    pub free_space_blocks: u32,
    pub total_space_blocks: u32,

    /// BEA / NSR / TEA records of the Volume Recognition Sequence
    pub vrs: [Option<VolStructDesc>; 3],
    /// anchors at 256, last-256 and last (or legacy 512 in slot 0)
    pub anchors: [Option<AnchorVolumeDescriptorPointer>; 3],
    pub pvd: [Option<PrimaryVolumeDescriptor>; 2],
    pub lvd: [Option<LogicalVolumeDescriptor>; 2],
    pub pd: [Option<PartitionDescriptor>; 2],
    /// second partition descriptor with a distinct partition number
    pub pd2: [Option<PartitionDescriptor>; 2],
    pub usd: [Option<UnallocatedSpaceDescriptor>; 2],
    pub iuvd: [Option<ImpUseVolumeDescriptor>; 2],
    pub td: [Option<TerminatingDescriptor>; 2],
    pub lvid: Option<LogicalVolumeIntegrityDescriptor>,
    /// absolute block the prevailing LVID was read from
    pub lvid_location: u32,
    pub sparing_tables: [Option<SparingTable>; 4],
    /// virtual block number -> physical lbn within the hosting partition
    pub vat: Option<Vec<u32>>,
    pub fsd: Option<FileSetDescriptor>,
    /// absolute block the FSD was read from
    pub fsd_location: u32,
    /// partition-relative lbn of the FSD (its tag location)
    pub fsd_lbn: u32,
    /// Metadata File (0) and Metadata Mirror File (1) extent lists
    pub metadata_file_map: [Option<Vec<ShortAllocationDescriptor>>; 2],

    pub map: ExtentMap,
    pub seq: VdsBookkeeping,
}

impl Disc {
    pub fn new() -> Self {
        Self {
            udf_rev: 0,
            udf_write_rev: 0,
            block_size: 0,
            blocks: 0,
            start_block: 0,
            last_block: 0,
            vat_block: None,
            num_files: 0,
            num_dirs: 0,
            free_space_blocks: 0,
            total_space_blocks: 0,
            vrs: [None, None, None],
            anchors: [None, None, None],
            pvd: [None, None],
            lvd: [None, None],
            pd: [None, None],
            pd2: [None, None],
            usd: [None, None],
            iuvd: [None, None],
            td: [None, None],
            lvid: None,
            lvid_location: 0,
            sparing_tables: [None, None, None, None],
            vat: None,
            fsd: None,
            fsd_location: 0,
            fsd_lbn: 0,
            metadata_file_map: [None, None],
            map: ExtentMap::new(0),
            seq: VdsBookkeeping::default(),
        }
    }

    pub fn byte_offset(&self, block: u32) -> u64 {
        block as u64 * self.block_size as u64
    }

    /// The prevailing instance of a slotted pair, Main preferred.
    pub fn pvd_any(&self) -> Option<&PrimaryVolumeDescriptor> {
        self.pvd[0].as_ref().or(self.pvd[1].as_ref())
    }
    pub fn lvd_any(&self) -> Option<&LogicalVolumeDescriptor> {
        self.lvd[0].as_ref().or(self.lvd[1].as_ref())
    }
    pub fn pd_any(&self) -> Option<&PartitionDescriptor> {
        self.pd[0].as_ref().or(self.pd[1].as_ref())
    }
    pub fn pd2_any(&self) -> Option<&PartitionDescriptor> {
        self.pd2[0].as_ref().or(self.pd2[1].as_ref())
    }
    pub fn usd_any(&self) -> Option<&UnallocatedSpaceDescriptor> {
        self.usd[0].as_ref().or(self.usd[1].as_ref())
    }
    pub fn iuvd_any(&self) -> Option<&ImpUseVolumeDescriptor> {
        self.iuvd[0].as_ref().or(self.iuvd[1].as_ref())
    }

    pub fn partition_maps(&self) -> Vec<PartitionMap> {
        self.lvd_any()
            .and_then(|lvd| lvd.read_partition_maps().ok())
            .unwrap_or_default()
    }

    /// Find a partition map by predicate, returning its declaration index
    /// (the partition reference number) with it.
    pub fn find_partition_map<F>(&self, pred: F) -> Option<(u16, PartitionMap)>
    where
        F: Fn(&PartitionMap) -> bool,
    {
        self.partition_maps()
            .into_iter()
            .enumerate()
            .find(|(_, m)| pred(m))
            .map(|(i, m)| (i as u16, m))
    }

    pub fn virtual_partition_map(&self) -> Option<(u16, PartitionMap)> {
        self.find_partition_map(|m| matches!(m, PartitionMap::Virtual(_)))
    }
    pub fn sparable_partition_map(&self) -> Option<(u16, PartitionMap)> {
        self.find_partition_map(|m| matches!(m, PartitionMap::Sparable(_)))
    }
    pub fn metadata_partition_map(&self) -> Option<(u16, PartitionMap)> {
        self.find_partition_map(|m| matches!(m, PartitionMap::Metadata(_)))
    }

    /// The partition descriptor carrying the given partition number,
    /// checking the pd then the pd2 slot pair.
    pub fn find_partition_descriptor(&self, partition: u16) -> Option<&PartitionDescriptor> {
        if let Some(pd) = self.pd_any() {
            if pd.partition_number == partition {
                return Some(pd);
            }
        }
        if let Some(pd) = self.pd2_any() {
            if pd.partition_number == partition {
                return Some(pd);
            }
        }
        None
    }

    /// Raise the write-revision floor; called whenever an identifier
    /// suffix or integrity structure declares a revision.
    pub fn raise_write_revision(&mut self, rev: u16) {
        if rev != 0 && self.udf_write_rev < rev {
            self.udf_write_rev = rev;
        }
        if rev != 0 && self.udf_rev < rev {
            self.udf_rev = rev;
        }
    }
}

impl Default for Disc {
    fn default() -> Self {
        Self::new()
    }
}

/// A valid MBR boot signature at block 0 claims it as boot area.
fn read_mbr(io: &mut dyn BlockIo, disc: &mut Disc) {
    let mut buf = [0u8; 512];
    if read_checked(io, 0, &mut buf).is_err() {
        return;
    }
    if u16::from_le_bytes([buf[510], buf[511]]) != MBR_BOOT_SIGNATURE {
        return;
    }
    let _ = disc.map.set_extent(SpaceType::MBR, 0, 1);
}

/// Read and validate the whole volume metadata graph.
pub fn read_disc(io: &mut dyn BlockIo, opts: &ReadOptions) -> Result<Disc> {
    let mut disc = Disc::new();

    crate::detect::detect_udf(io, &mut disc, opts)?;
    read_mbr(io, &mut disc);
    opts.check_cancel()?;

    crate::vds::scan_mvds(io, &mut disc);
    opts.check_cancel()?;
    crate::vds::scan_rvds(io, &mut disc);
    opts.check_cancel()?;

    if disc.anchors[1].is_none()
        && disc.anchors[2].is_none()
        && disc.virtual_partition_map().is_none()
    {
        warn!("Second and third Anchor Volume Descriptor Pointer not found");
    }
    if disc.pvd[0].is_none() && disc.pvd[1].is_none() {
        warn!("Primary Volume Descriptor not found");
    }
    if disc.pd[0].is_none() && disc.pd[1].is_none() {
        warn!("Partition Descriptor not found");
    }
    if disc.lvd[0].is_none() && disc.lvd[1].is_none() {
        warn!("Logical Volume Descriptor not found");
    }
    if disc.usd[0].is_none() && disc.usd[1].is_none() {
        warn!("Unallocated Space Descriptor not found");
    }
    if disc.iuvd[0].is_none() && disc.iuvd[1].is_none() {
        warn!("Implementation Use Volume Descriptor not found");
    }
    if disc.td[0].is_none() && disc.td[1].is_none() {
        warn!("Terminating Descriptor not found");
    }

    crate::vds::verify_vds(&mut disc, MAIN_VDS);
    crate::vds::verify_vds(&mut disc, RESERVE_VDS);

    if let Some(lvd) = disc.lvd_any() {
        if lvd.logical_block_size != disc.block_size {
            warn!(
                "block size in Logical Volume Descriptor ({}) does not match detected block size ({})",
                lvd.logical_block_size, disc.block_size
            );
        }
    }

    opts.check_cancel()?;
    crate::lvid::scan_integrity_sequence(io, &mut disc);
    if disc.lvid.is_none() {
        warn!("Logical Volume Integrity Descriptor not found");
    }
    crate::lvid::parse_imp_use(&mut disc);

    if disc.udf_rev > MAX_SUPPORTED_REVISION {
        return Err(UdfError::UnsupportedRevision(disc.udf_rev));
    }

    opts.check_cancel()?;
    crate::partition::read_sparing_tables(io, &mut disc);
    crate::vat::read_vat(io, &mut disc, opts);
    crate::partition::read_metadata_files(io, &mut disc);
    crate::partition::setup_partition_space(&mut disc, false);
    crate::partition::setup_partition_space(&mut disc, true);

    opts.check_cancel()?;
    crate::walk::read_fsd(io, &mut disc);
    if disc.fsd.is_none() {
        warn!("File Set Descriptor not found");
    }

    crate::space::setup_total_space_blocks(&mut disc);
    crate::space::scan_free_space_blocks(io, &mut disc);

    Ok(disc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testimg::TestImageBuilder;

    #[test]
    fn test_read_disc_well_formed_image() {
        let img = TestImageBuilder::new().build();
        let mut io = img.into_io();
        let disc = read_disc(&mut io, &ReadOptions::default()).unwrap();

        assert_eq!(disc.block_size, 2048);
        assert!(disc.anchors[0].is_some(), "anchor at 256 expected");
        assert!(disc.anchors[2].is_some(), "anchor at last block expected");
        assert!(disc.pvd[0].is_some() && disc.pvd[1].is_some());
        assert!(disc.lvd[0].is_some() && disc.lvd[1].is_some());
        assert!(disc.pd[0].is_some() && disc.pd[1].is_some());
        assert!(disc.fsd.is_some());

        let lvid = disc.lvid.as_ref().expect("LVID expected");
        assert!(!lvid.is_open());
        assert_eq!(disc.num_files, 3);
        assert_eq!(disc.num_dirs, 2);

        // declared free space comes straight from the LVID table
        assert_eq!(disc.free_space_blocks, crate::testimg::FREE_BLOCKS);
        assert_eq!(disc.total_space_blocks, crate::testimg::PARTITION_BLOCKS);

        // every slot of the well-formed image verifies clean
        for slot in disc.seq.main.iter().chain(disc.seq.reserve.iter()) {
            assert!(
                slot.error.is_empty(),
                "slot {:?} has errors {:?}",
                slot.tag_ident,
                slot.error
            );
        }
    }

    #[test]
    fn test_read_disc_block_size_detection() {
        // no block size supplied: the locator must find 2048 by iteration
        let img = TestImageBuilder::new().build();
        let mut io = img.into_io();
        let disc = read_disc(&mut io, &ReadOptions::default()).unwrap();
        assert_eq!(disc.block_size, 2048);
    }

    #[test]
    fn test_read_disc_rejects_garbage() {
        let mut io = crate::io::MemIo::new(vec![0u8; 1 << 20]);
        assert!(matches!(
            read_disc(&mut io, &ReadOptions::default()),
            Err(UdfError::NotUdf)
        ));
    }

    #[test]
    fn test_cancellation() {
        let img = TestImageBuilder::new().build();
        let mut io = img.into_io();
        let flag = Arc::new(AtomicBool::new(true));
        let opts = ReadOptions {
            cancel: Some(flag),
            ..Default::default()
        };
        assert!(matches!(
            read_disc(&mut io, &opts),
            Err(UdfError::Cancelled)
        ));
    }
}
