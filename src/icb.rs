//! ECMA-167 part 4 file structures: ICBs, file entries, directory records
//! and the partition-space descriptors referenced from them.

use bitflags::bitflags;
use static_assertions::assert_eq_size;

use crate::udf::{DescriptorTag, DynamicDstring, EntityID, LbAddr, LongAd, Timestamp};

/// ECMA-167 4/14.6.8 ICB flags, low three bits select the allocation
/// descriptor form.
pub const ICB_FLAG_AD_MASK: u16 = 0x0007;

/// https://ecma-international.org/wp-content/uploads/ECMA-167_3rd_edition_june_1997.pdf#page=96
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AllocationDescriptorForm {
    Short = 0,
    Long = 1,
    Extended = 2,
    /// data recorded inline in the allocation descriptor area
    InIcb = 3,
}
impl From<u16> for AllocationDescriptorForm {
    fn from(flags: u16) -> AllocationDescriptorForm {
        match flags & ICB_FLAG_AD_MASK {
            0 => AllocationDescriptorForm::Short,
            1 => AllocationDescriptorForm::Long,
            2 => AllocationDescriptorForm::Extended,
            _ => AllocationDescriptorForm::InIcb,
        }
    }
}

/// ECMA-167 4/14.6.6 file types, with the UDF system file extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// 0; also the type of a UDF 1.50 VAT
    Unspecified,
    UnallocatedSpaceEntry,
    PartitionIntegrity,
    Indirect,
    Directory,
    SequenceOfBytes,
    BlockSpecialDevice,
    CharacterSpecialDevice,
    ExtendedAttributes,
    Fifo,
    Socket,
    TerminalEntry,
    SymbolicLink,
    StreamDirectory,
    /// 248, UDF 2.00+ Virtual Allocation Table
    Vat20,
    /// 250, UDF Metadata File
    MetadataFile,
    /// 251, UDF Metadata Mirror File
    MetadataMirrorFile,
    /// 252, UDF Metadata Bitmap File
    MetadataBitmapFile,
    Other(u8),
}
impl From<u8> for FileType {
    fn from(v: u8) -> FileType {
        match v {
            0 => FileType::Unspecified,
            1 => FileType::UnallocatedSpaceEntry,
            2 => FileType::PartitionIntegrity,
            3 => FileType::Indirect,
            4 => FileType::Directory,
            5 => FileType::SequenceOfBytes,
            6 => FileType::BlockSpecialDevice,
            7 => FileType::CharacterSpecialDevice,
            8 => FileType::ExtendedAttributes,
            9 => FileType::Fifo,
            10 => FileType::Socket,
            11 => FileType::TerminalEntry,
            12 => FileType::SymbolicLink,
            13 => FileType::StreamDirectory,
            248 => FileType::Vat20,
            250 => FileType::MetadataFile,
            251 => FileType::MetadataMirrorFile,
            252 => FileType::MetadataBitmapFile,
            other => FileType::Other(other),
        }
    }
}

pub const FILE_TYPE_RAW_VAT15: u8 = 0;
pub const FILE_TYPE_RAW_VAT20: u8 = 248;

/// ECMA-167 4/14.6, UDF 2.3.5
/// http://www.osta.org/specs/pdf/udf260.pdf#page=60
#[derive(Default, Debug, Clone)]
#[repr(C)]
pub struct ICBTag {
    pub prior_recorded_number_of_direct_entries: u32,
    pub strategy_type: u16,
    pub strategy_parameter: [u8; 2],
    pub maximum_number_of_entries: u16,
    pub reserved: u8,
    pub file_type: u8,
    pub parent_icb_location: LbAddr,
    /// http://www.osta.org/specs/pdf/udf260.pdf#page=61
    pub flags: u16,
}
assert_eq_size!(ICBTag, [u8; 20]);
impl ICBTag {
    pub fn size() -> usize {
        20
    }
    pub fn read(bytes: &[u8]) -> Self {
        let mut r = Self::default();
        r.prior_recorded_number_of_direct_entries =
            u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        r.strategy_type = u16::from_le_bytes([bytes[4], bytes[5]]);
        r.strategy_parameter.copy_from_slice(&bytes[6..8]);
        r.maximum_number_of_entries = u16::from_le_bytes([bytes[8], bytes[9]]);
        r.reserved = bytes[10];
        r.file_type = bytes[11];
        r.parent_icb_location = LbAddr::read(&bytes[12..18]);
        r.flags = u16::from_le_bytes([bytes[18], bytes[19]]);
        r
    }
    pub fn write(&self, bytes: &mut [u8]) {
        bytes[0..4].copy_from_slice(&self.prior_recorded_number_of_direct_entries.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.strategy_type.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.strategy_parameter);
        bytes[8..10].copy_from_slice(&self.maximum_number_of_entries.to_le_bytes());
        bytes[10] = self.reserved;
        bytes[11] = self.file_type;
        self.parent_icb_location.write(&mut bytes[12..18]);
        bytes[18..20].copy_from_slice(&self.flags.to_le_bytes());
    }
    pub fn allocation_descriptor_form(&self) -> AllocationDescriptorForm {
        AllocationDescriptorForm::from(self.flags)
    }
    pub fn file_type(&self) -> FileType {
        FileType::from(self.file_type)
    }
}

/// File Entry is like an inode in Unix; it has permissions, timestamps,
/// and pointers to data blocks.
/// ECMA-167 4/14.9 File Entry
/// https://ecma-international.org/wp-content/uploads/ECMA-167_3rd_edition_june_1997.pdf#page=98
#[derive(Debug, Clone, Default)]
#[repr(C)]
pub struct FileEntry {
    pub tag: DescriptorTag,
    pub icb_tag: ICBTag,
    pub uid: u32,
    pub gid: u32,
    pub permissions: u32,
    pub file_link_count: u16,
    pub record_format: u8,
    pub record_display_attributes: u8,
    pub record_length: u32,
    pub information_length: u64,
    pub logical_blocks_recorded: u64,
    pub access_time: Timestamp,
    pub modification_time: Timestamp,
    pub attribute_time: Timestamp,
    pub checkpoint: u32,
    pub extended_attribute_icb: LongAd,
    pub implementation_identifier: EntityID,
    pub unique_id: u64,
    pub length_of_extended_attributes: u32,
    pub length_of_allocation_descriptors: u32,
    pub extended_attributes: Vec<u8>,
    /// "This field shall be a sequence of allocation descriptors
    /// recorded as specified in 4/12.1."
    pub allocation_descriptors: Vec<u8>,
}

impl FileEntry {
    pub const TAG_IDENTIFIER: u16 = 261;
    pub const HEADER_SIZE: usize = 176;

    pub fn get_length(&self) -> usize {
        Self::HEADER_SIZE + self.extended_attributes.len() + self.allocation_descriptors.len()
    }

    pub fn read(bytes: &[u8]) -> Self {
        let mut r = Self::default();
        r.tag = DescriptorTag::read(&bytes[0..16]);
        r.icb_tag = ICBTag::read(&bytes[16..36]);
        r.uid = u32::from_le_bytes([bytes[36], bytes[37], bytes[38], bytes[39]]);
        r.gid = u32::from_le_bytes([bytes[40], bytes[41], bytes[42], bytes[43]]);
        r.permissions = u32::from_le_bytes([bytes[44], bytes[45], bytes[46], bytes[47]]);
        r.file_link_count = u16::from_le_bytes([bytes[48], bytes[49]]);
        r.record_format = bytes[50];
        r.record_display_attributes = bytes[51];
        r.record_length = u32::from_le_bytes([bytes[52], bytes[53], bytes[54], bytes[55]]);
        r.information_length = u64::from_le_bytes(bytes[56..64].try_into().unwrap());
        r.logical_blocks_recorded = u64::from_le_bytes(bytes[64..72].try_into().unwrap());
        r.access_time = Timestamp::read(&bytes[72..84]);
        r.modification_time = Timestamp::read(&bytes[84..96]);
        r.attribute_time = Timestamp::read(&bytes[96..108]);
        r.checkpoint = u32::from_le_bytes([bytes[108], bytes[109], bytes[110], bytes[111]]);
        r.extended_attribute_icb = LongAd::read(&bytes[112..128]);
        r.implementation_identifier = EntityID::read(&bytes[128..160]);
        r.unique_id = u64::from_le_bytes(bytes[160..168].try_into().unwrap());
        r.length_of_extended_attributes =
            u32::from_le_bytes([bytes[168], bytes[169], bytes[170], bytes[171]]);
        r.length_of_allocation_descriptors =
            u32::from_le_bytes([bytes[172], bytes[173], bytes[174], bytes[175]]);
        let ea_len = (r.length_of_extended_attributes as usize)
            .min(bytes.len().saturating_sub(Self::HEADER_SIZE));
        let ad_len = (r.length_of_allocation_descriptors as usize)
            .min(bytes.len().saturating_sub(Self::HEADER_SIZE + ea_len));
        r.extended_attributes = bytes[Self::HEADER_SIZE..Self::HEADER_SIZE + ea_len].to_vec();
        r.allocation_descriptors =
            bytes[Self::HEADER_SIZE + ea_len..Self::HEADER_SIZE + ea_len + ad_len].to_vec();
        r
    }

    pub fn write(&self, bytes: &mut [u8]) {
        self.tag.write(&mut bytes[0..16]);
        self.icb_tag.write(&mut bytes[16..36]);
        bytes[36..40].copy_from_slice(&self.uid.to_le_bytes());
        bytes[40..44].copy_from_slice(&self.gid.to_le_bytes());
        bytes[44..48].copy_from_slice(&self.permissions.to_le_bytes());
        bytes[48..50].copy_from_slice(&self.file_link_count.to_le_bytes());
        bytes[50] = self.record_format;
        bytes[51] = self.record_display_attributes;
        bytes[52..56].copy_from_slice(&self.record_length.to_le_bytes());
        bytes[56..64].copy_from_slice(&self.information_length.to_le_bytes());
        bytes[64..72].copy_from_slice(&self.logical_blocks_recorded.to_le_bytes());
        self.access_time.write(&mut bytes[72..84]);
        self.modification_time.write(&mut bytes[84..96]);
        self.attribute_time.write(&mut bytes[96..108]);
        bytes[108..112].copy_from_slice(&self.checkpoint.to_le_bytes());
        self.extended_attribute_icb.write(&mut bytes[112..128]);
        self.implementation_identifier.write(&mut bytes[128..160]);
        bytes[160..168].copy_from_slice(&self.unique_id.to_le_bytes());
        bytes[168..172].copy_from_slice(&self.length_of_extended_attributes.to_le_bytes());
        bytes[172..176].copy_from_slice(&self.length_of_allocation_descriptors.to_le_bytes());
        let ea_end = Self::HEADER_SIZE + self.extended_attributes.len();
        bytes[Self::HEADER_SIZE..ea_end].copy_from_slice(&self.extended_attributes);
        bytes[ea_end..ea_end + self.allocation_descriptors.len()]
            .copy_from_slice(&self.allocation_descriptors);
    }
}

/// Extended File Entry, ECMA-167 4/14.17. Same shape as the File Entry
/// with creation time, object size and a stream directory ICB added.
#[derive(Debug, Clone, Default)]
#[repr(C)]
pub struct ExtendedFileEntry {
    pub tag: DescriptorTag,
    pub icb_tag: ICBTag,
    pub uid: u32,
    pub gid: u32,
    pub permissions: u32,
    pub file_link_count: u16,
    pub record_format: u8,
    pub record_display_attributes: u8,
    pub record_length: u32,
    pub information_length: u64,
    pub object_size: u64,
    pub logical_blocks_recorded: u64,
    pub access_time: Timestamp,
    pub modification_time: Timestamp,
    pub creation_time: Timestamp,
    pub attribute_time: Timestamp,
    pub checkpoint: u32,
    pub reserved: u32,
    pub extended_attribute_icb: LongAd,
    pub stream_directory_icb: LongAd,
    pub implementation_identifier: EntityID,
    pub unique_id: u64,
    pub length_of_extended_attributes: u32,
    pub length_of_allocation_descriptors: u32,
    pub extended_attributes: Vec<u8>,
    pub allocation_descriptors: Vec<u8>,
}

impl ExtendedFileEntry {
    pub const TAG_IDENTIFIER: u16 = 266;
    pub const HEADER_SIZE: usize = 216;

    pub fn get_length(&self) -> usize {
        Self::HEADER_SIZE + self.extended_attributes.len() + self.allocation_descriptors.len()
    }

    pub fn read(bytes: &[u8]) -> Self {
        let mut r = Self::default();
        r.tag = DescriptorTag::read(&bytes[0..16]);
        r.icb_tag = ICBTag::read(&bytes[16..36]);
        r.uid = u32::from_le_bytes([bytes[36], bytes[37], bytes[38], bytes[39]]);
        r.gid = u32::from_le_bytes([bytes[40], bytes[41], bytes[42], bytes[43]]);
        r.permissions = u32::from_le_bytes([bytes[44], bytes[45], bytes[46], bytes[47]]);
        r.file_link_count = u16::from_le_bytes([bytes[48], bytes[49]]);
        r.record_format = bytes[50];
        r.record_display_attributes = bytes[51];
        r.record_length = u32::from_le_bytes([bytes[52], bytes[53], bytes[54], bytes[55]]);
        r.information_length = u64::from_le_bytes(bytes[56..64].try_into().unwrap());
        r.object_size = u64::from_le_bytes(bytes[64..72].try_into().unwrap());
        r.logical_blocks_recorded = u64::from_le_bytes(bytes[72..80].try_into().unwrap());
        r.access_time = Timestamp::read(&bytes[80..92]);
        r.modification_time = Timestamp::read(&bytes[92..104]);
        r.creation_time = Timestamp::read(&bytes[104..116]);
        r.attribute_time = Timestamp::read(&bytes[116..128]);
        r.checkpoint = u32::from_le_bytes([bytes[128], bytes[129], bytes[130], bytes[131]]);
        r.reserved = u32::from_le_bytes([bytes[132], bytes[133], bytes[134], bytes[135]]);
        r.extended_attribute_icb = LongAd::read(&bytes[136..152]);
        r.stream_directory_icb = LongAd::read(&bytes[152..168]);
        r.implementation_identifier = EntityID::read(&bytes[168..200]);
        r.unique_id = u64::from_le_bytes(bytes[200..208].try_into().unwrap());
        r.length_of_extended_attributes =
            u32::from_le_bytes([bytes[208], bytes[209], bytes[210], bytes[211]]);
        r.length_of_allocation_descriptors =
            u32::from_le_bytes([bytes[212], bytes[213], bytes[214], bytes[215]]);
        let ea_len = (r.length_of_extended_attributes as usize)
            .min(bytes.len().saturating_sub(Self::HEADER_SIZE));
        let ad_len = (r.length_of_allocation_descriptors as usize)
            .min(bytes.len().saturating_sub(Self::HEADER_SIZE + ea_len));
        r.extended_attributes = bytes[Self::HEADER_SIZE..Self::HEADER_SIZE + ea_len].to_vec();
        r.allocation_descriptors =
            bytes[Self::HEADER_SIZE + ea_len..Self::HEADER_SIZE + ea_len + ad_len].to_vec();
        r
    }

    pub fn write(&self, bytes: &mut [u8]) {
        self.tag.write(&mut bytes[0..16]);
        self.icb_tag.write(&mut bytes[16..36]);
        bytes[36..40].copy_from_slice(&self.uid.to_le_bytes());
        bytes[40..44].copy_from_slice(&self.gid.to_le_bytes());
        bytes[44..48].copy_from_slice(&self.permissions.to_le_bytes());
        bytes[48..50].copy_from_slice(&self.file_link_count.to_le_bytes());
        bytes[50] = self.record_format;
        bytes[51] = self.record_display_attributes;
        bytes[52..56].copy_from_slice(&self.record_length.to_le_bytes());
        bytes[56..64].copy_from_slice(&self.information_length.to_le_bytes());
        bytes[64..72].copy_from_slice(&self.object_size.to_le_bytes());
        bytes[72..80].copy_from_slice(&self.logical_blocks_recorded.to_le_bytes());
        self.access_time.write(&mut bytes[80..92]);
        self.modification_time.write(&mut bytes[92..104]);
        self.creation_time.write(&mut bytes[104..116]);
        self.attribute_time.write(&mut bytes[116..128]);
        bytes[128..132].copy_from_slice(&self.checkpoint.to_le_bytes());
        bytes[132..136].copy_from_slice(&self.reserved.to_le_bytes());
        self.extended_attribute_icb.write(&mut bytes[136..152]);
        self.stream_directory_icb.write(&mut bytes[152..168]);
        self.implementation_identifier.write(&mut bytes[168..200]);
        bytes[200..208].copy_from_slice(&self.unique_id.to_le_bytes());
        bytes[208..212].copy_from_slice(&self.length_of_extended_attributes.to_le_bytes());
        bytes[212..216].copy_from_slice(&self.length_of_allocation_descriptors.to_le_bytes());
        let ea_end = Self::HEADER_SIZE + self.extended_attributes.len();
        bytes[Self::HEADER_SIZE..ea_end].copy_from_slice(&self.extended_attributes);
        bytes[ea_end..ea_end + self.allocation_descriptors.len()]
            .copy_from_slice(&self.allocation_descriptors);
    }
}

/// A File Entry or Extended File Entry; the two are interchangeable roots
/// of an ICB and most consumers do not care which one they got.
#[derive(Debug, Clone)]
pub enum AnyFileEntry {
    Fe(FileEntry),
    Efe(ExtendedFileEntry),
}

impl AnyFileEntry {
    /// Parse either entry form from a descriptor buffer, dispatching on the
    /// tag identifier. Returns `None` for any other identifier.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let ident = u16::from_le_bytes([bytes[0], bytes[1]]);
        match ident {
            FileEntry::TAG_IDENTIFIER => Some(AnyFileEntry::Fe(FileEntry::read(bytes))),
            ExtendedFileEntry::TAG_IDENTIFIER => {
                Some(AnyFileEntry::Efe(ExtendedFileEntry::read(bytes)))
            }
            _ => None,
        }
    }

    pub fn tag(&self) -> &DescriptorTag {
        match self {
            AnyFileEntry::Fe(fe) => &fe.tag,
            AnyFileEntry::Efe(efe) => &efe.tag,
        }
    }
    pub fn icb_tag(&self) -> &ICBTag {
        match self {
            AnyFileEntry::Fe(fe) => &fe.icb_tag,
            AnyFileEntry::Efe(efe) => &efe.icb_tag,
        }
    }
    pub fn header_size(&self) -> usize {
        match self {
            AnyFileEntry::Fe(_) => FileEntry::HEADER_SIZE,
            AnyFileEntry::Efe(_) => ExtendedFileEntry::HEADER_SIZE,
        }
    }
    pub fn get_length(&self) -> usize {
        match self {
            AnyFileEntry::Fe(fe) => fe.get_length(),
            AnyFileEntry::Efe(efe) => efe.get_length(),
        }
    }
    pub fn information_length(&self) -> u64 {
        match self {
            AnyFileEntry::Fe(fe) => fe.information_length,
            AnyFileEntry::Efe(efe) => efe.information_length,
        }
    }
    pub fn logical_blocks_recorded(&self) -> u64 {
        match self {
            AnyFileEntry::Fe(fe) => fe.logical_blocks_recorded,
            AnyFileEntry::Efe(efe) => efe.logical_blocks_recorded,
        }
    }
    pub fn modification_time(&self) -> &Timestamp {
        match self {
            AnyFileEntry::Fe(fe) => &fe.modification_time,
            AnyFileEntry::Efe(efe) => &efe.modification_time,
        }
    }
    pub fn unique_id(&self) -> u64 {
        match self {
            AnyFileEntry::Fe(fe) => fe.unique_id,
            AnyFileEntry::Efe(efe) => efe.unique_id,
        }
    }
    pub fn set_unique_id(&mut self, id: u64) {
        match self {
            AnyFileEntry::Fe(fe) => fe.unique_id = id,
            AnyFileEntry::Efe(efe) => efe.unique_id = id,
        }
    }
    pub fn file_link_count(&self) -> u16 {
        match self {
            AnyFileEntry::Fe(fe) => fe.file_link_count,
            AnyFileEntry::Efe(efe) => efe.file_link_count,
        }
    }
    pub fn length_of_extended_attributes(&self) -> u32 {
        match self {
            AnyFileEntry::Fe(fe) => fe.length_of_extended_attributes,
            AnyFileEntry::Efe(efe) => efe.length_of_extended_attributes,
        }
    }
    pub fn length_of_allocation_descriptors(&self) -> u32 {
        match self {
            AnyFileEntry::Fe(fe) => fe.length_of_allocation_descriptors,
            AnyFileEntry::Efe(efe) => efe.length_of_allocation_descriptors,
        }
    }
    pub fn extended_attributes(&self) -> &[u8] {
        match self {
            AnyFileEntry::Fe(fe) => &fe.extended_attributes,
            AnyFileEntry::Efe(efe) => &efe.extended_attributes,
        }
    }
    pub fn allocation_descriptors(&self) -> &[u8] {
        match self {
            AnyFileEntry::Fe(fe) => &fe.allocation_descriptors,
            AnyFileEntry::Efe(efe) => &efe.allocation_descriptors,
        }
    }
    pub fn write(&self, bytes: &mut [u8]) {
        match self {
            AnyFileEntry::Fe(fe) => fe.write(bytes),
            AnyFileEntry::Efe(efe) => efe.write(bytes),
        }
    }
}

pub struct TerminalEntry {
    pub tag: DescriptorTag,
    pub icb_tag: ICBTag,
}
assert_eq_size!(TerminalEntry, [u8; 36]);
impl Default for TerminalEntry {
    fn default() -> Self {
        Self {
            tag: Default::default(),
            icb_tag: Default::default(),
        }
    }
}
impl TerminalEntry {
    pub const TAG_IDENTIFIER: u16 = 260;
    pub fn size() -> usize {
        36
    }
    pub fn read(bytes: &[u8]) -> Self {
        let mut r = Self::default();
        r.tag = DescriptorTag::read(&bytes[0..16]);
        r.icb_tag = ICBTag::read(&bytes[16..36]);
        r
    }
    pub fn write(&self, bytes: &mut [u8]) {
        self.tag.write(&mut bytes[0..16]);
        self.icb_tag.write(&mut bytes[16..36]);
    }
}

/// ECMA-167 4/14.7 Indirect Entry
#[derive(Debug, Clone)]
pub struct IndirectEntry {
    pub tag: DescriptorTag,
    pub icb_tag: ICBTag,
    pub indirect_icb: LongAd,
}
impl Default for IndirectEntry {
    fn default() -> Self {
        Self {
            tag: Default::default(),
            icb_tag: Default::default(),
            indirect_icb: Default::default(),
        }
    }
}
impl IndirectEntry {
    pub const TAG_IDENTIFIER: u16 = 259;
    pub fn size() -> usize {
        52
    }
    pub fn read(bytes: &[u8]) -> Self {
        let mut r = Self::default();
        r.tag = DescriptorTag::read(&bytes[0..16]);
        r.icb_tag = ICBTag::read(&bytes[16..36]);
        r.indirect_icb = LongAd::read(&bytes[36..52]);
        r
    }
    pub fn write(&self, bytes: &mut [u8]) {
        self.tag.write(&mut bytes[0..16]);
        self.icb_tag.write(&mut bytes[16..36]);
        self.indirect_icb.write(&mut bytes[36..52]);
    }
}

bitflags! {
    /// ECMA-167 4/14.4.3 File Characteristics, with the UDF correction in
    /// http://www.osta.org/specs/pdf/udf260.pdf#page=58
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FidCharacteristics: u8 {
        const EXISTENCE = 1 << 0;
        const DIRECTORY = 1 << 1;
        const DELETED   = 1 << 2;
        const PARENT    = 1 << 3;
        const METADATA  = 1 << 4;
    }
}

/// UDF 2.3.4 File Identifier Descriptor aka ECMA-167 4/14.4.
/// Placed back-to-back inside a directory's data stream; each record is
/// `38 + L_IU + L_FI` bytes rounded up to a multiple of 4.
#[derive(Debug, Clone, PartialEq, Default)]
#[repr(C)]
pub struct FileIdentifierDescriptor {
    pub tag: DescriptorTag,
    pub file_version_number: u16,
    pub file_characteristics: u8,
    pub length_of_file_identifier: u8,
    pub icb: LongAd,
    pub length_of_implementation_use: u16,
    pub implementation_use: Vec<u8>,
    /// length 0 for the parent directory entry, otherwise 1-255 dchars
    pub file_identifier: DynamicDstring,
}

impl FileIdentifierDescriptor {
    pub const TAG_IDENTIFIER: u16 = 257;

    pub fn size(&self) -> usize {
        38 + self.length_of_implementation_use as usize + self.length_of_file_identifier as usize
    }

    /// FIDs are stored rounded up to a 4 byte boundary, ECMA-167 4/14.4.9.
    pub fn padded_size(&self) -> usize {
        (self.size() + 3) & !3
    }

    pub fn characteristics(&self) -> FidCharacteristics {
        FidCharacteristics::from_bits_truncate(self.file_characteristics)
    }
    pub fn is_directory(&self) -> bool {
        self.characteristics().contains(FidCharacteristics::DIRECTORY)
    }
    pub fn is_deleted(&self) -> bool {
        self.characteristics().contains(FidCharacteristics::DELETED)
    }
    pub fn is_parent(&self) -> bool {
        self.characteristics().contains(FidCharacteristics::PARENT)
    }
    /// The existence bit set means the file is made known only to the
    /// implementation, i.e. hidden. ECMA-167 4/14.4.3.
    pub fn is_hidden(&self) -> bool {
        self.characteristics().contains(FidCharacteristics::EXISTENCE)
    }
    pub fn is_metadata(&self) -> bool {
        self.characteristics().contains(FidCharacteristics::METADATA)
    }

    pub fn read(bytes: &[u8]) -> Self {
        let mut r = Self::default();
        r.tag = DescriptorTag::read(&bytes[0..16]);
        r.file_version_number = u16::from_le_bytes([bytes[16], bytes[17]]);
        r.file_characteristics = bytes[18];
        r.length_of_file_identifier = bytes[19];
        r.icb = LongAd::read(&bytes[20..36]);
        r.length_of_implementation_use = u16::from_le_bytes([bytes[36], bytes[37]]);
        let impl_use_len = (r.length_of_implementation_use as usize)
            .min(bytes.len().saturating_sub(38));
        let file_id_len = (r.length_of_file_identifier as usize)
            .min(bytes.len().saturating_sub(38 + impl_use_len));
        r.implementation_use = bytes[38..38 + impl_use_len].to_vec();
        r.file_identifier =
            DynamicDstring(bytes[38 + impl_use_len..38 + impl_use_len + file_id_len].to_vec());
        r
    }

    pub fn write(&self, bytes: &mut [u8]) {
        self.tag.write(&mut bytes[0..16]);
        bytes[16..18].copy_from_slice(&self.file_version_number.to_le_bytes());
        bytes[18] = self.file_characteristics;
        bytes[19] = self.length_of_file_identifier;
        self.icb.write(&mut bytes[20..36]);
        bytes[36..38].copy_from_slice(&self.length_of_implementation_use.to_le_bytes());
        let iu_end = 38 + self.implementation_use.len();
        bytes[38..iu_end].copy_from_slice(&self.implementation_use);
        bytes[iu_end..iu_end + self.file_identifier.0.len()]
            .copy_from_slice(&self.file_identifier.0);
        // zero the alignment padding
        for b in bytes[self.size()..self.padded_size()].iter_mut() {
            *b = 0;
        }
    }
}

/// Allocation Extent Descriptor, ECMA-167 4/14.5. Heads a continuation
/// block of allocation descriptors.
#[derive(Debug, Clone, Default)]
pub struct AllocationExtentDescriptor {
    pub tag: DescriptorTag,
    pub previous_allocation_extent_location: u32,
    pub length_of_allocation_descriptors: u32,
}
impl AllocationExtentDescriptor {
    pub const TAG_IDENTIFIER: u16 = 258;
    pub fn size() -> usize {
        24
    }
    pub fn read(bytes: &[u8]) -> Self {
        let mut r = Self::default();
        r.tag = DescriptorTag::read(&bytes[0..16]);
        r.previous_allocation_extent_location =
            u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
        r.length_of_allocation_descriptors =
            u32::from_le_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
        r
    }
    pub fn write(&self, bytes: &mut [u8]) {
        self.tag.write(&mut bytes[0..16]);
        bytes[16..20].copy_from_slice(&self.previous_allocation_extent_location.to_le_bytes());
        bytes[20..24].copy_from_slice(&self.length_of_allocation_descriptors.to_le_bytes());
    }
}

/// Unallocated Space Entry, ECMA-167 4/14.11. A space table is the
/// allocation-descriptor area of one of these.
#[derive(Debug, Clone, Default)]
pub struct UnallocatedSpaceEntry {
    pub tag: DescriptorTag,
    pub icb_tag: ICBTag,
    pub length_of_allocation_descriptors: u32,
    pub allocation_descriptors: Vec<u8>,
}
impl UnallocatedSpaceEntry {
    pub const TAG_IDENTIFIER: u16 = 263;
    pub const HEADER_SIZE: usize = 40;

    pub fn get_length(&self) -> usize {
        Self::HEADER_SIZE + self.allocation_descriptors.len()
    }
    pub fn read(bytes: &[u8]) -> Self {
        let mut r = Self::default();
        r.tag = DescriptorTag::read(&bytes[0..16]);
        r.icb_tag = ICBTag::read(&bytes[16..36]);
        r.length_of_allocation_descriptors =
            u32::from_le_bytes([bytes[36], bytes[37], bytes[38], bytes[39]]);
        let len = (r.length_of_allocation_descriptors as usize)
            .min(bytes.len().saturating_sub(Self::HEADER_SIZE));
        r.allocation_descriptors = bytes[Self::HEADER_SIZE..Self::HEADER_SIZE + len].to_vec();
        r
    }
    pub fn write(&self, bytes: &mut [u8]) {
        self.tag.write(&mut bytes[0..16]);
        self.icb_tag.write(&mut bytes[16..36]);
        bytes[36..40].copy_from_slice(&self.length_of_allocation_descriptors.to_le_bytes());
        bytes[Self::HEADER_SIZE..Self::HEADER_SIZE + self.allocation_descriptors.len()]
            .copy_from_slice(&self.allocation_descriptors);
    }
}

/// Space Bitmap Descriptor, ECMA-167 4/14.12. Bit value 1 means the block
/// is free.
#[derive(Debug, Clone, Default)]
pub struct SpaceBitmapDescriptor {
    pub tag: DescriptorTag,
    pub number_of_bits: u32,
    pub number_of_bytes: u32,
    pub bitmap: Vec<u8>,
}
impl SpaceBitmapDescriptor {
    pub const TAG_IDENTIFIER: u16 = 264;
    pub const HEADER_SIZE: usize = 24;

    pub fn get_length(&self) -> usize {
        Self::HEADER_SIZE + self.bitmap.len()
    }
    pub fn read(bytes: &[u8]) -> Self {
        let mut r = Self::default();
        r.tag = DescriptorTag::read(&bytes[0..16]);
        r.number_of_bits = u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
        r.number_of_bytes = u32::from_le_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
        let len = (r.number_of_bytes as usize).min(bytes.len().saturating_sub(Self::HEADER_SIZE));
        r.bitmap = bytes[Self::HEADER_SIZE..Self::HEADER_SIZE + len].to_vec();
        r
    }
    pub fn write(&self, bytes: &mut [u8]) {
        self.tag.write(&mut bytes[0..16]);
        bytes[16..20].copy_from_slice(&self.number_of_bits.to_le_bytes());
        bytes[20..24].copy_from_slice(&self.number_of_bytes.to_le_bytes());
        bytes[Self::HEADER_SIZE..Self::HEADER_SIZE + self.bitmap.len()]
            .copy_from_slice(&self.bitmap);
    }
}

/// UDF 2.2.11 trailing identifier of a 1.50 Virtual Allocation Table:
/// VAT entries first, this 36 byte structure last.
#[derive(Debug, Clone, Default)]
pub struct VirtualAllocationTable15 {
    pub vat_identifier: EntityID,
    pub previous_vat_icb_location: u32,
}
impl VirtualAllocationTable15 {
    pub const SIZE: usize = 36;
    pub fn read(bytes: &[u8]) -> Self {
        Self {
            vat_identifier: EntityID::read(&bytes[0..32]),
            previous_vat_icb_location: u32::from_le_bytes([
                bytes[32], bytes[33], bytes[34], bytes[35],
            ]),
        }
    }
    pub fn write(&self, bytes: &mut [u8]) {
        self.vat_identifier.write(&mut bytes[0..32]);
        bytes[32..36].copy_from_slice(&self.previous_vat_icb_location.to_le_bytes());
    }
}

/// UDF 2.2.11 header of a 2.00 Virtual Allocation Table: this structure
/// first, VAT entries after `length_of_header` bytes.
#[derive(Debug, Clone)]
pub struct VirtualAllocationTable20 {
    pub length_of_header: u16,
    pub length_of_implementation_use: u16,
    pub logical_volume_identifier: [u8; 128],
    pub previous_vat_icb_location: u32,
    pub number_of_files: u32,
    pub number_of_directories: u32,
    pub min_udf_read_revision: u16,
    pub min_udf_write_revision: u16,
    pub max_udf_write_revision: u16,
}
impl Default for VirtualAllocationTable20 {
    fn default() -> Self {
        Self {
            length_of_header: Self::SIZE as u16,
            length_of_implementation_use: 0,
            logical_volume_identifier: [0; 128],
            previous_vat_icb_location: 0,
            number_of_files: 0,
            number_of_directories: 0,
            min_udf_read_revision: 0,
            min_udf_write_revision: 0,
            max_udf_write_revision: 0,
        }
    }
}
impl VirtualAllocationTable20 {
    pub const SIZE: usize = 152;
    pub fn read(bytes: &[u8]) -> Self {
        let mut r = Self::default();
        r.length_of_header = u16::from_le_bytes([bytes[0], bytes[1]]);
        r.length_of_implementation_use = u16::from_le_bytes([bytes[2], bytes[3]]);
        r.logical_volume_identifier.copy_from_slice(&bytes[4..132]);
        r.previous_vat_icb_location =
            u32::from_le_bytes([bytes[132], bytes[133], bytes[134], bytes[135]]);
        r.number_of_files = u32::from_le_bytes([bytes[136], bytes[137], bytes[138], bytes[139]]);
        r.number_of_directories =
            u32::from_le_bytes([bytes[140], bytes[141], bytes[142], bytes[143]]);
        r.min_udf_read_revision = u16::from_le_bytes([bytes[144], bytes[145]]);
        r.min_udf_write_revision = u16::from_le_bytes([bytes[146], bytes[147]]);
        r.max_udf_write_revision = u16::from_le_bytes([bytes[148], bytes[149]]);
        r
    }
    pub fn write(&self, bytes: &mut [u8]) {
        bytes[0..2].copy_from_slice(&self.length_of_header.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.length_of_implementation_use.to_le_bytes());
        bytes[4..132].copy_from_slice(&self.logical_volume_identifier);
        bytes[132..136].copy_from_slice(&self.previous_vat_icb_location.to_le_bytes());
        bytes[136..140].copy_from_slice(&self.number_of_files.to_le_bytes());
        bytes[140..144].copy_from_slice(&self.number_of_directories.to_le_bytes());
        bytes[144..146].copy_from_slice(&self.min_udf_read_revision.to_le_bytes());
        bytes[146..148].copy_from_slice(&self.min_udf_write_revision.to_le_bytes());
        bytes[148..150].copy_from_slice(&self.max_udf_write_revision.to_le_bytes());
        bytes[150..152].fill(0);
    }
}

/// Extended Attribute Header Descriptor, ECMA-167 4/14.10.1.
#[derive(Debug, Clone, Default)]
pub struct ExtendedAttrHeaderDescriptor {
    pub tag: DescriptorTag,
    pub implementation_attributes_location: u32,
    pub application_attributes_location: u32,
}
impl ExtendedAttrHeaderDescriptor {
    pub const TAG_IDENTIFIER: u16 = 262;
    pub fn size() -> usize {
        24
    }
    pub fn read(bytes: &[u8]) -> Self {
        let mut r = Self::default();
        r.tag = DescriptorTag::read(&bytes[0..16]);
        r.implementation_attributes_location =
            u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
        r.application_attributes_location =
            u32::from_le_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
        r
    }
}

pub const EXTATTR_TYPE_IMP_USE: u32 = 2048;

/// Implementation Use Extended Attribute header, ECMA-167 4/14.10.8.
#[derive(Debug, Clone, Default)]
pub struct ImpUseExtendedAttr {
    pub attribute_type: u32,
    pub attribute_subtype: u8,
    pub attribute_length: u32,
    pub implementation_use_length: u32,
    pub implementation_identifier: EntityID,
}
impl ImpUseExtendedAttr {
    pub const SIZE: usize = 48;
    pub fn read(bytes: &[u8]) -> Self {
        let mut r = Self::default();
        r.attribute_type = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        r.attribute_subtype = bytes[4];
        r.attribute_length = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        r.implementation_use_length =
            u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
        r.implementation_identifier = EntityID::read(&bytes[16..48]);
        r
    }
}

/// UDF 3.3.4.5.1.3 Logical Volume Extension, an Implementation Use EA on
/// the 1.50 VAT carrying counts and the volume identifier.
#[derive(Debug, Clone)]
pub struct LVExtensionEA {
    pub verification_id: u64,
    pub number_of_files: u32,
    pub number_of_directories: u32,
    pub logical_volume_identifier: [u8; 128],
}
impl LVExtensionEA {
    pub const SIZE: usize = 144;
    pub fn read(bytes: &[u8]) -> Self {
        let mut logical_volume_identifier = [0u8; 128];
        logical_volume_identifier.copy_from_slice(&bytes[16..144]);
        Self {
            verification_id: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            number_of_files: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            number_of_directories: u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
            logical_volume_identifier,
        }
    }
}
