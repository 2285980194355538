//! In-memory UDF 2.01 image builder for the tests: a rewritable volume
//! with block size 2048, one Type 1 partition, three files and two
//! directories, every descriptor sealed with a real CRC and checksum.
//! Builder switches produce the damaged layouts the repair tests need.

use crate::crc::seal_tag;
use crate::icb::{FidCharacteristics, FileEntry, FileIdentifierDescriptor, SpaceBitmapDescriptor};
use crate::io::MemIo;
use crate::udf::*;

pub const BLOCK_SIZE: u32 = 2048;
pub const TOTAL_BLOCKS: u32 = 1400;
pub const PARTITION_START: u32 = 300;
pub const PARTITION_BLOCKS: u32 = 1000;
pub const FREE_BLOCKS: u32 = 988;
pub const MAX_UNIQUE_ID: u64 = 19;
pub const NEXT_UNIQUE_ID: u64 = 20;
pub const VAT_BLOCK: u32 = 1399;
pub const BAD_FID_UNIQUE_ID: u32 = 99;
/// partition-relative blocks the walker must see as used
pub const USED_LBNS: [u32; 9] = [0, 1, 2, 3, 4, 5, 7, 20, 22];
pub const AN_UNUSED_LBN: u32 = 50;

const MVDS_START: u32 = 32;
const RVDS_START: u32 = 64;
const LVID_START: u32 = 80;
const VDS_LEN_BYTES: u32 = 16 * BLOCK_SIZE;

const FE_TIME: i64 = 1_590_000_000;
const LVID_TIME: i64 = 1_700_000_000;

pub struct TestImage {
    data: Vec<u8>,
}

impl TestImage {
    pub fn into_io(self) -> MemIo {
        MemIo::new(self.data).with_sector_size(2048)
    }
    pub fn clone_data(&self) -> Vec<u8> {
        self.data.clone()
    }
}

#[derive(Default)]
pub struct TestImageBuilder {
    stale_extra_pvd: bool,
    corrupt_main_pvd: bool,
    lvid_history: bool,
    open_lvid: bool,
    legacy_anchor_only: bool,
    iso9660_bridge: bool,
    virtual_partition: bool,
    bad_fid_unique_id: bool,
    unfinished_file: bool,
    bitmap_divergence: bool,
}

impl TestImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_stale_extra_pvd(mut self) -> Self {
        self.stale_extra_pvd = true;
        self
    }
    pub fn corrupt_main_pvd_crc(mut self) -> Self {
        self.corrupt_main_pvd = true;
        self
    }
    pub fn with_lvid_history(mut self) -> Self {
        self.lvid_history = true;
        self
    }
    pub fn with_open_lvid(mut self) -> Self {
        self.open_lvid = true;
        self
    }
    pub fn with_legacy_anchor_only(mut self) -> Self {
        self.legacy_anchor_only = true;
        self
    }
    pub fn with_iso9660_bridge(mut self) -> Self {
        self.iso9660_bridge = true;
        self
    }
    pub fn with_virtual_partition(mut self) -> Self {
        self.virtual_partition = true;
        self
    }
    pub fn with_bad_fid_unique_id(mut self) -> Self {
        self.bad_fid_unique_id = true;
        self
    }
    pub fn with_unfinished_file(mut self) -> Self {
        self.unfinished_file = true;
        self
    }
    pub fn with_bitmap_divergence(mut self) -> Self {
        self.bitmap_divergence = true;
        self
    }

    pub fn build(self) -> TestImage {
        let mut data = vec![0u8; (TOTAL_BLOCKS * BLOCK_SIZE) as usize];

        self.write_vrs(&mut data);
        self.write_vds_and_lvid(&mut data);
        self.write_partition(&mut data);
        self.write_anchors(&mut data);
        if self.virtual_partition {
            self.write_vat(&mut data);
        }
        if self.corrupt_main_pvd {
            // flip one body byte of the Main PVD; CRC no longer matches
            let pvd_block = if self.stale_extra_pvd {
                MVDS_START + 1
            } else {
                MVDS_START
            };
            data[(pvd_block * BLOCK_SIZE + 100) as usize] ^= 0xFF;
        }

        TestImage { data }
    }

    fn write_vrs(&self, data: &mut [u8]) {
        let mut records: Vec<[u8; 5]> = vec![*VolStructDesc::STD_ID_BEA01];
        if self.iso9660_bridge {
            records.push(*VolStructDesc::STD_ID_CD001);
        }
        records.push(*VolStructDesc::STD_ID_NSR03);
        records.push(*VolStructDesc::STD_ID_TEA01);

        let vrs_block = 32768 / BLOCK_SIZE;
        for (i, ident) in records.iter().enumerate() {
            let offset = ((vrs_block + i as u32) * BLOCK_SIZE) as usize;
            data[offset] = 0;
            data[offset + 1..offset + 6].copy_from_slice(ident);
            data[offset + 6] = 1;
        }
    }

    fn partition_maps_table(&self) -> Vec<u8> {
        let mut table = vec![0u8; 6];
        PartitionMap::Type1(Type1PartitionMap {
            header: GenericPartitionMapHeader {
                partition_map_type: 1,
                partition_map_length: 6,
            },
            volume_seq_number: 1,
            partition_number: 0,
        })
        .write(&mut table[0..6]);
        if self.virtual_partition {
            let mut vmap = vec![0u8; 64];
            PartitionMap::Virtual(VirtualPartitionMap {
                header: GenericPartitionMapHeader {
                    partition_map_type: 2,
                    partition_map_length: 64,
                },
                partition_type_identifier: EntityID::udf_entity(UDF_ID_VIRTUAL, 0x0150),
                volume_seq_number: 1,
                partition_number: 0,
            })
            .write(&mut vmap);
            table.extend_from_slice(&vmap);
        }
        table
    }

    fn make_pvd(&self, location: u32, seq_num: u32, name: &str) -> Vec<u8> {
        let mut pvd = PrimaryVolumeDescriptor::default();
        pvd.tag = DescriptorTag::new(PrimaryVolumeDescriptor::TAG_IDENTIFIER, 3, location, 496);
        pvd.volume_descriptor_sequence_number = seq_num;
        pvd.volume_identifier = Dstring::from_str(name);
        pvd.volume_set_identifier = Dstring::from_str("3a45f2b87c9d01e6LinuxUDF");
        pvd.volume_sequence_number = 1;
        pvd.maximum_volume_sequence_number = 1;
        pvd.interchange_level = 2;
        pvd.maximum_interchange_level = 3;
        pvd.character_set_list = 1;
        pvd.maximum_character_set_list = 1;
        pvd.descriptor_character_set = CharSpec::new();
        pvd.explanatory_character_set = CharSpec::new();
        pvd.recording_date_and_time = Timestamp::from_unix(FE_TIME, 0);
        pvd.flags = 1;
        let mut buf = vec![0u8; 512];
        pvd.write(&mut buf);
        seal_tag(&mut buf);
        buf
    }

    fn make_lvd(&self, location: u32) -> Vec<u8> {
        let table = self.partition_maps_table();
        let mut lvd = LogicalVolumeDescriptor::default();
        let length = LogicalVolumeDescriptor::FIXED_SIZE + table.len();
        lvd.tag = DescriptorTag::new(
            LogicalVolumeDescriptor::TAG_IDENTIFIER,
            3,
            location,
            (length - 16) as u16,
        );
        lvd.volume_descriptor_sequence_number = 2;
        lvd.descriptor_character_set = CharSpec::new();
        lvd.logical_volume_identifier = Dstring::from_str("LinuxUDF");
        lvd.logical_block_size = BLOCK_SIZE;
        lvd.domain_identifier = EntityID::udf_entity(UDF_ID_COMPLIANT, 0x0201);
        let mut fsd_ad = LongAd::default();
        fsd_ad.extent_length_and_type = BLOCK_SIZE;
        fsd_ad.extent_location.logical_block_number = 0;
        fsd_ad.extent_location.partition_reference_number = 0;
        fsd_ad.write(&mut lvd.logical_volume_contents_use);
        lvd.map_table_length = table.len() as u32;
        lvd.number_of_partition_maps = if self.virtual_partition { 2 } else { 1 };
        lvd.integrity_sequence_extent = ExtentAd {
            length_bytes: 4 * BLOCK_SIZE,
            location_sector: LVID_START,
        };
        lvd.partition_map_table = table;
        let mut buf = vec![0u8; length];
        lvd.write(&mut buf);
        seal_tag(&mut buf);
        buf
    }

    fn make_pd(&self, location: u32) -> Vec<u8> {
        let mut pd = PartitionDescriptor::default();
        pd.tag = DescriptorTag::new(PartitionDescriptor::TAG_IDENTIFIER, 3, location, 496);
        pd.volume_descriptor_sequence_number = 3;
        pd.partition_flags = 1;
        pd.partition_number = 0;
        pd.partition_contents.identifier[..6].copy_from_slice(PD_PARTITION_CONTENTS_NSR02);
        pd.access_type = if self.virtual_partition {
            ACCESS_TYPE_WRITE_ONCE
        } else {
            ACCESS_TYPE_REWRITABLE
        };
        pd.partition_starting_location = PARTITION_START;
        pd.partition_length = PARTITION_BLOCKS;
        let phd = PartitionHeaderDescriptor {
            unalloc_space_bitmap: ShortAllocationDescriptor {
                extent_length_and_type: SpaceBitmapDescriptor::HEADER_SIZE as u32
                    + PARTITION_BLOCKS.div_ceil(8),
                extent_location: 10,
            },
            ..Default::default()
        };
        pd.set_partition_header(&phd);
        let mut buf = vec![0u8; 512];
        pd.write(&mut buf);
        seal_tag(&mut buf);
        buf
    }

    fn make_usd(&self, location: u32) -> Vec<u8> {
        let mut usd = UnallocatedSpaceDescriptor::default();
        usd.tag = DescriptorTag::new(
            UnallocatedSpaceDescriptor::TAG_IDENTIFIER,
            3,
            location,
            (UnallocatedSpaceDescriptor::FIXED_SIZE - 16) as u16,
        );
        usd.volume_descriptor_sequence_number = 4;
        let mut buf = vec![0u8; usd.get_length()];
        usd.write(&mut buf);
        seal_tag(&mut buf);
        buf
    }

    fn make_iuvd(&self, location: u32) -> Vec<u8> {
        let mut iuvd = ImpUseVolumeDescriptor::default();
        iuvd.tag = DescriptorTag::new(ImpUseVolumeDescriptor::TAG_IDENTIFIER, 3, location, 496);
        iuvd.volume_descriptor_sequence_number = 5;
        iuvd.implementation_identifier = EntityID::udf_entity(UDF_ID_LV_INFO, 0x0201);
        let mut info = LVInformation::default();
        info.lvi_charset = CharSpec::new();
        info.logical_volume_identifier = Dstring::from_str("LinuxUDF");
        iuvd.set_lv_information(&info);
        let mut buf = vec![0u8; 512];
        iuvd.write(&mut buf);
        seal_tag(&mut buf);
        buf
    }

    fn make_td(&self, location: u32) -> Vec<u8> {
        let mut td = TerminatingDescriptor::default();
        td.tag = DescriptorTag::new(TerminatingDescriptor::TAG_IDENTIFIER, 3, location, 496);
        let mut buf = vec![0u8; 512];
        td.write(&mut buf);
        seal_tag(&mut buf);
        buf
    }

    fn make_lvid(&self, location: u32, integrity: u32, next_uid: u64, files: u32) -> Vec<u8> {
        let mut lvid = LogicalVolumeIntegrityDescriptor::default();
        lvid.recording_date_and_time = Timestamp::from_unix(LVID_TIME, 0);
        lvid.integrity_type = integrity;
        lvid.number_of_partitions = 1;
        lvid.set_next_unique_id(next_uid);
        lvid.free_space_table = vec![self.free_blocks()];
        lvid.size_table = vec![PARTITION_BLOCKS];
        let mut iu = vec![0u8; LvidImplementationUse::SIZE];
        LvidImplementationUse {
            number_of_files: files,
            number_of_directories: 2,
            min_udf_read_revision: 0x0201,
            min_udf_write_revision: 0x0201,
            max_udf_write_revision: 0x0201,
            ..Default::default()
        }
        .write(&mut iu);
        lvid.length_of_implementation_use = iu.len() as u32;
        lvid.implementation_use = iu;
        let length = lvid.get_length();
        lvid.tag = DescriptorTag::new(
            LogicalVolumeIntegrityDescriptor::TAG_IDENTIFIER,
            3,
            location,
            (length - 16) as u16,
        );
        let mut buf = vec![0u8; length];
        lvid.write(&mut buf);
        seal_tag(&mut buf);
        buf
    }

    fn write_vds_and_lvid(&self, data: &mut [u8]) {
        for (start, is_main) in [(MVDS_START, true), (RVDS_START, false)] {
            let mut block = start;
            let mut place = |data: &mut [u8], bytes: &[u8], blocks: u32, block: &mut u32| {
                let offset = (*block * BLOCK_SIZE) as usize;
                data[offset..offset + bytes.len()].copy_from_slice(bytes);
                *block += blocks;
            };

            if is_main && self.stale_extra_pvd {
                let stale = self.make_pvd(block, 0, "OldLabel");
                place(data, &stale, 1, &mut block);
            }
            let pvd = self.make_pvd(block, 1, "LinuxUDF");
            place(data, &pvd, 1, &mut block);
            let lvd = self.make_lvd(block);
            place(data, &lvd, 1, &mut block);
            let pd = self.make_pd(block);
            place(data, &pd, 1, &mut block);
            let usd = self.make_usd(block);
            place(data, &usd, 1, &mut block);
            let iuvd = self.make_iuvd(block);
            place(data, &iuvd, 1, &mut block);
            let td = self.make_td(block);
            place(data, &td, 1, &mut block);
        }

        // integrity sequence
        let files = if self.unfinished_file { 4 } else { 3 };
        let mut block = LVID_START;
        if self.lvid_history {
            let stale = self.make_lvid(block, LVID_INTEGRITY_TYPE_CLOSE, 10, files);
            let offset = (block * BLOCK_SIZE) as usize;
            data[offset..offset + stale.len()].copy_from_slice(&stale);
            block += 1;
        }
        let integrity = if self.open_lvid {
            LVID_INTEGRITY_TYPE_OPEN
        } else {
            LVID_INTEGRITY_TYPE_CLOSE
        };
        let lvid = self.make_lvid(block, integrity, NEXT_UNIQUE_ID, files);
        let offset = (block * BLOCK_SIZE) as usize;
        data[offset..offset + lvid.len()].copy_from_slice(&lvid);
        let td = self.make_td(block + 1);
        let offset = ((block + 1) * BLOCK_SIZE) as usize;
        data[offset..offset + td.len()].copy_from_slice(&td);
    }

    fn used_lbns(&self) -> Vec<u32> {
        let mut used = vec![0, 1, 2, 3, 4, 5, 6, 7, 10, 20, 21, 22];
        if self.unfinished_file {
            used.extend_from_slice(&[8, 23, 24, 25, 26]);
        }
        used
    }

    fn free_blocks(&self) -> u32 {
        PARTITION_BLOCKS - self.used_lbns().len() as u32
    }

    fn write_partition(&self, data: &mut [u8]) {
        let place_p = |data: &mut [u8], lbn: u32, bytes: &[u8]| {
            let offset = ((PARTITION_START + lbn) * BLOCK_SIZE) as usize;
            data[offset..offset + bytes.len()].copy_from_slice(bytes);
        };

        // File Set Descriptor at partition block 0
        let mut fsd = FileSetDescriptor::default();
        fsd.tag = DescriptorTag::new(FileSetDescriptor::TAG_IDENTIFIER, 3, 0, 496);
        fsd.recording_date_and_time = Timestamp::from_unix(FE_TIME, 0);
        fsd.interchange_level = 3;
        fsd.maximum_interchange_level = 3;
        fsd.character_set_list = 1;
        fsd.maximum_character_set_list = 1;
        fsd.logical_volume_identifier_character_set = CharSpec::new();
        fsd.logical_volume_identifier = Dstring::from_str("LinuxUDF");
        fsd.file_set_character_set = CharSpec::new();
        fsd.file_set_identifier = Dstring::from_str("LinuxUDF");
        fsd.root_directory_icb = long_ad(BLOCK_SIZE, 1, 0);
        fsd.domain_identifier = EntityID::udf_entity(UDF_ID_COMPLIANT, 0x0201);
        let mut buf = vec![0u8; 512];
        fsd.write(&mut buf);
        seal_tag(&mut buf);
        place_p(data, 0, &buf);

        // root directory stream at partition block 2
        let mut root_fids: Vec<Vec<u8>> = Vec::new();
        root_fids.push(make_fid(2, "", FidCharacteristics::DIRECTORY | FidCharacteristics::PARENT, 1, 0));
        root_fids.push(make_fid(2, "subdir", FidCharacteristics::DIRECTORY, 3, 16));
        root_fids.push(make_fid(2, "a.txt", FidCharacteristics::empty(), 5, 17));
        let b_uuid = if self.bad_fid_unique_id {
            BAD_FID_UNIQUE_ID
        } else {
            18
        };
        root_fids.push(make_fid(2, "b.txt", FidCharacteristics::empty(), 6, b_uuid));
        if self.unfinished_file {
            root_fids.push(make_fid(2, "d.txt", FidCharacteristics::empty(), 8, 20));
        }
        let root_dir: Vec<u8> = root_fids.concat();
        place_p(data, 2, &root_dir);

        // subdirectory stream at partition block 4
        let sub_fids: Vec<Vec<u8>> = vec![
            make_fid(4, "", FidCharacteristics::DIRECTORY | FidCharacteristics::PARENT, 1, 0),
            make_fid(4, "c.txt", FidCharacteristics::empty(), 7, 19),
        ];
        let sub_dir: Vec<u8> = sub_fids.concat();
        place_p(data, 4, &sub_dir);

        // directory and file entries
        place_p(data, 1, &make_dir_fe(1, 0, root_dir.len() as u64, 2));
        place_p(data, 3, &make_dir_fe(3, 16, sub_dir.len() as u64, 4));
        place_p(data, 5, &make_file_fe(5, 17, 4096, 2, Some((4096, 20))));
        place_p(data, 6, &make_file_fe(6, 18, 100, 1, Some((100, 22))));
        place_p(data, 7, &make_inline_fe(7, 19, b"hello world"));
        if self.unfinished_file {
            // information length wants 4 blocks but only 1 is recorded
            place_p(data, 8, &make_file_fe(8, 20, 8192, 1, Some((8192, 23))));
        }

        // file payloads
        place_p(data, 20, &[0xA5u8; 4096]);
        place_p(data, 22, &[0x5Au8; 100]);

        // Space Bitmap Descriptor at partition block 10
        let bytes = PARTITION_BLOCKS.div_ceil(8);
        let mut sbd = SpaceBitmapDescriptor::default();
        sbd.tag = DescriptorTag::new(
            SpaceBitmapDescriptor::TAG_IDENTIFIER,
            3,
            10,
            (SpaceBitmapDescriptor::HEADER_SIZE as u32 + bytes - 16) as u16,
        );
        sbd.number_of_bits = PARTITION_BLOCKS;
        sbd.number_of_bytes = bytes;
        sbd.bitmap = vec![0xFFu8; bytes as usize];
        for lbn in self.used_lbns() {
            sbd.bitmap[(lbn / 8) as usize] &= !(1 << (lbn % 8));
        }
        if self.bitmap_divergence {
            // declare a free block as used
            sbd.bitmap[(AN_UNUSED_LBN / 8) as usize] &= !(1 << (AN_UNUSED_LBN % 8));
        }
        let mut buf = vec![0u8; sbd.get_length()];
        sbd.write(&mut buf);
        seal_tag(&mut buf);
        place_p(data, 10, &buf);
    }

    fn write_anchors(&self, data: &mut [u8]) {
        let mut avdp = AnchorVolumeDescriptorPointer::default();
        avdp.main_volume_descriptor_sequence_location = ExtentAd {
            length_bytes: VDS_LEN_BYTES,
            location_sector: MVDS_START,
        };
        avdp.reserve_volume_descriptor_sequence_location = ExtentAd {
            length_bytes: VDS_LEN_BYTES,
            location_sector: RVDS_START,
        };

        let locations: &[u32] = if self.legacy_anchor_only {
            &[512]
        } else if self.virtual_partition {
            &[256]
        } else {
            &[256, TOTAL_BLOCKS - 1]
        };
        for &location in locations {
            avdp.tag =
                DescriptorTag::new(AnchorVolumeDescriptorPointer::TAG_IDENTIFIER, 3, location, 496);
            let mut buf = vec![0u8; 512];
            avdp.write(&mut buf);
            seal_tag(&mut buf);
            let offset = (location * BLOCK_SIZE) as usize;
            data[offset..offset + buf.len()].copy_from_slice(&buf);
        }
    }

    fn write_vat(&self, data: &mut [u8]) {
        // UDF 2.00 VAT: header plus ten entries, inline in the file entry
        let mut vat_contents = vec![0u8; 152 + 40];
        let mut header = crate::icb::VirtualAllocationTable20::default();
        header.length_of_header = 152;
        let ident = Dstring::<128>::from_str("LinuxUDF");
        header.logical_volume_identifier = ident.0;
        header.number_of_files = 3;
        header.number_of_directories = 2;
        header.min_udf_read_revision = 0x0201;
        header.min_udf_write_revision = 0x0201;
        header.max_udf_write_revision = 0x0201;
        header.write(&mut vat_contents[..152]);
        for i in 0u32..10 {
            let value = if i == 5 { 2500 } else { i };
            vat_contents[152 + i as usize * 4..152 + i as usize * 4 + 4]
                .copy_from_slice(&value.to_le_bytes());
        }

        let mut fe = FileEntry::default();
        fe.icb_tag.strategy_type = 4;
        fe.icb_tag.file_type = crate::icb::FILE_TYPE_RAW_VAT20;
        fe.icb_tag.flags = 3; // data in ICB
        fe.file_link_count = 0;
        fe.information_length = vat_contents.len() as u64;
        fe.logical_blocks_recorded = 0;
        fe.access_time = Timestamp::from_unix(FE_TIME, 0);
        fe.modification_time = Timestamp::from_unix(FE_TIME, 0);
        fe.attribute_time = Timestamp::from_unix(FE_TIME, 0);
        fe.unique_id = 100;
        fe.length_of_allocation_descriptors = vat_contents.len() as u32;
        fe.allocation_descriptors = vat_contents;
        let length = fe.get_length();
        fe.tag = DescriptorTag::new(
            FileEntry::TAG_IDENTIFIER,
            3,
            VAT_BLOCK - PARTITION_START,
            (length - 16) as u16,
        );
        let mut buf = vec![0u8; length];
        fe.write(&mut buf);
        seal_tag(&mut buf);
        let offset = (VAT_BLOCK * BLOCK_SIZE) as usize;
        data[offset..offset + buf.len()].copy_from_slice(&buf);
    }
}

fn long_ad(length: u32, lbn: u32, partition: u16) -> LongAd {
    let mut ad = LongAd::default();
    ad.extent_length_and_type = length;
    ad.extent_location.logical_block_number = lbn;
    ad.extent_location.partition_reference_number = partition;
    ad
}

fn make_fid(
    dir_lbn: u32,
    name: &str,
    characteristics: FidCharacteristics,
    child_lbn: u32,
    child_uuid: u32,
) -> Vec<u8> {
    let mut fid = FileIdentifierDescriptor::default();
    fid.file_version_number = 1;
    fid.file_characteristics = characteristics.bits();
    fid.icb = long_ad(BLOCK_SIZE, child_lbn, 0);
    fid.icb.set_unique_id_lo32(child_uuid);
    if !name.is_empty() {
        fid.file_identifier = DynamicDstring::from_str(name);
        fid.length_of_file_identifier = fid.file_identifier.0.len() as u8;
    }
    fid.tag = DescriptorTag::new(
        FileIdentifierDescriptor::TAG_IDENTIFIER,
        3,
        dir_lbn,
        (fid.size() - 16) as u16,
    );
    let mut buf = vec![0u8; fid.padded_size()];
    fid.write(&mut buf);
    seal_tag(&mut buf[..fid.size()]);
    buf
}

fn fe_base(lbn: u32, unique_id: u64) -> FileEntry {
    let mut fe = FileEntry::default();
    fe.icb_tag.strategy_type = 4;
    fe.icb_tag.maximum_number_of_entries = 1;
    fe.permissions = 0o775;
    fe.file_link_count = 1;
    fe.access_time = Timestamp::from_unix(FE_TIME, 0);
    fe.modification_time = Timestamp::from_unix(FE_TIME, 0);
    fe.attribute_time = Timestamp::from_unix(FE_TIME, 0);
    fe.unique_id = unique_id;
    fe.tag.tag_location = lbn;
    fe
}

fn finish_fe(mut fe: FileEntry) -> Vec<u8> {
    let length = fe.get_length();
    fe.tag = DescriptorTag::new(
        FileEntry::TAG_IDENTIFIER,
        3,
        fe.tag.tag_location,
        (length - 16) as u16,
    );
    let mut buf = vec![0u8; length];
    fe.write(&mut buf);
    seal_tag(&mut buf);
    buf
}

fn make_dir_fe(lbn: u32, unique_id: u64, info_length: u64, data_lbn: u32) -> Vec<u8> {
    let mut fe = fe_base(lbn, unique_id);
    fe.icb_tag.file_type = 4;
    fe.icb_tag.flags = 0; // short allocation descriptors
    fe.file_link_count = 2;
    fe.information_length = info_length;
    fe.logical_blocks_recorded = 1;
    let ad = ShortAllocationDescriptor {
        extent_length_and_type: info_length as u32,
        extent_location: data_lbn,
    };
    let mut ad_bytes = vec![0u8; 8];
    ad.write(&mut ad_bytes);
    fe.length_of_allocation_descriptors = 8;
    fe.allocation_descriptors = ad_bytes;
    finish_fe(fe)
}

fn make_file_fe(
    lbn: u32,
    unique_id: u64,
    info_length: u64,
    blocks_recorded: u64,
    extent: Option<(u32, u32)>,
) -> Vec<u8> {
    let mut fe = fe_base(lbn, unique_id);
    fe.icb_tag.file_type = 5;
    fe.icb_tag.flags = 0;
    fe.information_length = info_length;
    fe.logical_blocks_recorded = blocks_recorded;
    if let Some((length, data_lbn)) = extent {
        let ad = ShortAllocationDescriptor {
            extent_length_and_type: length,
            extent_location: data_lbn,
        };
        let mut ad_bytes = vec![0u8; 8];
        ad.write(&mut ad_bytes);
        fe.length_of_allocation_descriptors = 8;
        fe.allocation_descriptors = ad_bytes;
    }
    finish_fe(fe)
}

fn make_inline_fe(lbn: u32, unique_id: u64, contents: &[u8]) -> Vec<u8> {
    let mut fe = fe_base(lbn, unique_id);
    fe.icb_tag.file_type = 5;
    fe.icb_tag.flags = 3; // data in ICB
    fe.information_length = contents.len() as u64;
    fe.logical_blocks_recorded = 0;
    fe.length_of_allocation_descriptors = contents.len() as u32;
    fe.allocation_descriptors = contents.to_vec();
    finish_fe(fe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc::verify_tag;

    #[test]
    fn test_image_descriptors_verify() {
        let img = TestImageBuilder::new().build();
        let data = img.clone_data();

        // anchor at 256
        let offset = (256 * BLOCK_SIZE) as usize;
        assert_eq!(
            verify_tag(&data[offset..offset + 512], Some(2), 256),
            crate::error::ErrorFlags::empty()
        );
        // main PVD at the head of the MVDS
        let offset = (MVDS_START * BLOCK_SIZE) as usize;
        assert_eq!(
            verify_tag(&data[offset..offset + 512], Some(1), MVDS_START),
            crate::error::ErrorFlags::empty()
        );
    }

    #[test]
    fn test_free_block_arithmetic() {
        let b = TestImageBuilder::new();
        assert_eq!(b.free_blocks(), FREE_BLOCKS);
    }
}
