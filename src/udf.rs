//! On-disk layouts of the ECMA-167 part 3 volume structures, with explicit
//! little-endian codecs. File-structure (part 4) descriptors live in
//! [`crate::icb`].

use std::borrow::Cow;
use std::ffi::CStr;
use std::fmt::Debug;

use log::warn;
use static_assertions::assert_eq_size;

use crate::osta;

/// Mask extracting the byte length of an extent from an extent length field;
/// the two most significant bits carry the extent type.
pub const EXT_LENGTH_MASK: u32 = 0x3FFF_FFFF;

#[derive(Clone, PartialEq)]
pub struct Dstring<const N: usize>(pub [u8; N]);
impl<const N: usize> Dstring<N> {
    pub fn from_str(s: &str) -> Self {
        let mut x = [0; N];
        match osta::encode_dstring(s, N) {
            Ok(v) => x.copy_from_slice(&v),
            Err(e) => warn!("could not encode {:?} as a dstring: {}", s, e),
        }
        Self(x)
    }
    pub fn to_string(&self) -> String {
        osta::decode_dstring(&self.0)
    }
    pub fn is_empty(&self) -> bool {
        self.0[N - 1] == 0
    }
}
impl<const N: usize> Default for Dstring<N> {
    fn default() -> Self {
        Self([0; N])
    }
}
impl<const N: usize> Debug for Dstring<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_string())
    }
}

/// Variable-length dchars whose length is carried outside the field,
/// as in the File Identifier Descriptor.
#[derive(Clone, PartialEq, Default)]
pub struct DynamicDstring(pub Vec<u8>);
impl DynamicDstring {
    pub fn from_str(s: &str) -> Self {
        match osta::encode(s) {
            Ok(v) => Self(v),
            Err(e) => {
                warn!("could not encode {:?} as dchars: {}", s, e);
                Self(Vec::new())
            }
        }
    }
    pub fn to_string(&self) -> String {
        osta::decode(&self.0)
    }
}
impl Debug for DynamicDstring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_string())
    }
}

/// UDF 2.1.2 OSTA CS0 Charspec
#[derive(Clone, PartialEq)]
#[repr(C)]
pub struct CharSpec {
    /// should always be 0 in UDF
    pub character_set_type: u8,
    /// should always be "OSTA Compressed Unicode" in UDF padded with 0
    pub character_set_info: [u8; 63],
}
impl CharSpec {
    pub fn new() -> Self {
        let mut info = [0u8; 63];
        info[..23].copy_from_slice(b"OSTA Compressed Unicode");
        Self {
            character_set_type: 0,
            character_set_info: info,
        }
    }
    pub fn size() -> usize {
        64
    }
    pub fn read(bytes: &[u8]) -> Self {
        let mut r = Self::default();
        r.character_set_type = bytes[0];
        r.character_set_info.copy_from_slice(&bytes[1..64]);
        r
    }
    pub fn write(&self, bytes: &mut [u8]) {
        bytes[0] = self.character_set_type;
        bytes[1..64].copy_from_slice(&self.character_set_info);
    }
    pub fn is_osta_compressed_unicode(&self) -> bool {
        self.character_set_type == 0
            && &self.character_set_info[0..23] == b"OSTA Compressed Unicode"
    }
}
impl Default for CharSpec {
    fn default() -> Self {
        Self {
            character_set_type: 0,
            character_set_info: [0; 63],
        }
    }
}
impl Debug for CharSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_osta_compressed_unicode() {
            f.write_str("OSTA Compressed Unicode")
        } else {
            f.debug_struct("CharSpec")
                .field("character_set_type", &self.character_set_type)
                .field(
                    "character_set_info",
                    &CStr::from_bytes_until_nul(&self.character_set_info)
                        .map(|x| x.to_string_lossy())
                        .unwrap_or(Cow::Borrowed("")),
                )
                .finish()
        }
    }
}

/// UDF 2.1.4 Timestamp aka ISO 13346 1/7.3
#[derive(Default, Clone, PartialEq)]
#[repr(C)]
pub struct Timestamp {
    pub type_and_timezone: u16,
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub centiseconds: u8,
    pub hundreds_of_microseconds: u8,
    pub microseconds: u8,
}
assert_eq_size!(Timestamp, [u8; 12]);
impl Debug for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        ))
    }
}
impl Timestamp {
    pub fn size() -> usize {
        12
    }
    pub fn read(bytes: &[u8]) -> Self {
        let mut r = Self::default();
        r.type_and_timezone = u16::from_le_bytes([bytes[0], bytes[1]]);
        r.year = u16::from_le_bytes([bytes[2], bytes[3]]);
        r.month = bytes[4];
        r.day = bytes[5];
        r.hour = bytes[6];
        r.minute = bytes[7];
        r.second = bytes[8];
        r.centiseconds = bytes[9];
        r.hundreds_of_microseconds = bytes[10];
        r.microseconds = bytes[11];
        r
    }
    pub fn write(&self, bytes: &mut [u8]) {
        bytes[0..2].copy_from_slice(&self.type_and_timezone.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.year.to_le_bytes());
        bytes[4] = self.month;
        bytes[5] = self.day;
        bytes[6] = self.hour;
        bytes[7] = self.minute;
        bytes[8] = self.second;
        bytes[9] = self.centiseconds;
        bytes[10] = self.hundreds_of_microseconds;
        bytes[11] = self.microseconds;
    }

    /// Timezone offset in minutes from the low 12 bits, sign extended.
    /// -2047 means "not specified" and decodes to `None`.
    pub fn timezone_offset_minutes(&self) -> Option<i16> {
        let raw = (self.type_and_timezone & 0x0FFF) as i16;
        let offset = if raw >= 0x0800 { raw - 0x1000 } else { raw };
        if offset == -2047 {
            None
        } else {
            Some(offset)
        }
    }

    /// Build a local-time timestamp (interpretation type 1) from Unix
    /// seconds and a timezone offset in minutes.
    pub fn from_unix(unix_secs: i64, tz_offset_minutes: i16) -> Self {
        let local = unix_secs + tz_offset_minutes as i64 * 60;
        let days = local.div_euclid(86400);
        let secs = local.rem_euclid(86400);
        let (year, month, day) = civil_from_days(days);
        Self {
            type_and_timezone: (1 << 12) | (tz_offset_minutes as u16 & 0x0FFF),
            year: year as u16,
            month,
            day,
            hour: (secs / 3600) as u8,
            minute: ((secs / 60) % 60) as u8,
            second: (secs % 60) as u8,
            centiseconds: 0,
            hundreds_of_microseconds: 0,
            microseconds: 0,
        }
    }

    /// Approximate Unix seconds of the recorded instant, normalized for the
    /// recorded timezone offset. `None` for unrepresentable field values.
    pub fn to_unix(&self) -> Option<i64> {
        if self.month == 0 || self.month > 12 || self.day == 0 || self.day > 31 {
            return None;
        }
        let days = days_from_civil(self.year as i64, self.month, self.day);
        let mut secs = days * 86400
            + self.hour as i64 * 3600
            + self.minute as i64 * 60
            + self.second as i64;
        secs -= self.timezone_offset_minutes().unwrap_or(0) as i64 * 60;
        Some(secs)
    }
}

// Civil calendar conversion, days relative to 1970-01-01.
fn civil_from_days(z: i64) -> (i64, u8, u8) {
    let z = z + 719468;
    let era = z.div_euclid(146097);
    let doe = z.rem_euclid(146097);
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    (if m <= 2 { y + 1 } else { y }, m as u8, d as u8)
}

fn days_from_civil(y: i64, m: u8, d: u8) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = y.div_euclid(400);
    let yoe = y.rem_euclid(400);
    let mp = if m > 2 { m as i64 - 3 } else { m as i64 + 9 };
    let doy = (153 * mp + 2) / 5 + d as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146097 + doe - 719468
}

/// 2.1.5 Entity Identifier aka ISO 13346 1/7.4
/// http://www.osta.org/specs/pdf/udf260.pdf#page=25
#[derive(Clone, PartialEq)]
#[repr(C)]
pub struct EntityID {
    /// UDF: "Shall be set to ZERO."
    pub flags: u8,
    pub identifier: [u8; 23],
    /// domain, UDF, or implementation identifier suffix
    pub identifier_suffix: [u8; 8],
}
assert_eq_size!(EntityID, [u8; 32]);

pub const UDF_ID_COMPLIANT: &[u8] = b"*OSTA UDF Compliant";
pub const UDF_ID_LV_INFO: &[u8] = b"*UDF LV Info";
pub const UDF_ID_VIRTUAL: &[u8] = b"*UDF Virtual Partition";
pub const UDF_ID_SPARABLE: &[u8] = b"*UDF Sparable Partition";
pub const UDF_ID_METADATA: &[u8] = b"*UDF Metadata Partition";
pub const UDF_ID_SPARING: &[u8] = b"*UDF Sparing Table";
pub const UDF_ID_ALLOC: &[u8] = b"*UDF Virtual Alloc Tbl";
pub const UDF_ID_VAT_LVEXTENSION: &[u8] = b"*UDF VAT LVExtension";

/// Domain identifier suffix flag: soft write-protect.
pub const DOMAIN_FLAG_SOFT_WRITE_PROTECT: u8 = 1 << 0;
/// Domain identifier suffix flag: hard write-protect.
pub const DOMAIN_FLAG_HARD_WRITE_PROTECT: u8 = 1 << 1;

impl Default for EntityID {
    fn default() -> Self {
        Self {
            flags: 0,
            identifier: [0; 23],
            identifier_suffix: [0; 8],
        }
    }
}
impl Debug for EntityID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityID")
            .field("flags", &self.flags)
            .field(
                "identifier",
                &CStr::from_bytes_until_nul(&self.identifier)
                    .map(|x| x.to_string_lossy())
                    .unwrap_or(Cow::Borrowed("")),
            )
            .field("identifier_suffix", &self.identifier_suffix)
            .finish()
    }
}
impl EntityID {
    pub fn size() -> usize {
        32
    }
    pub fn read(bytes: &[u8]) -> Self {
        let mut r = Self::default();
        r.flags = bytes[0];
        r.identifier.copy_from_slice(&bytes[1..24]);
        r.identifier_suffix.copy_from_slice(&bytes[24..32]);
        r
    }
    pub fn write(&self, bytes: &mut [u8]) {
        bytes[0] = self.flags;
        bytes[1..24].copy_from_slice(&self.identifier);
        bytes[24..32].copy_from_slice(&self.identifier_suffix);
    }

    /// Entity with a UDF identifier suffix carrying the given revision.
    pub fn udf_entity(ident: &[u8], udf_revision: u16) -> Self {
        let mut r = Self::default();
        r.identifier[..ident.len()].copy_from_slice(ident);
        r.identifier_suffix[0..2].copy_from_slice(&udf_revision.to_le_bytes());
        r
    }

    /// Compare the identifier with a registered name, NUL padded.
    pub fn matches(&self, ident: &[u8]) -> bool {
        if ident.len() > 23 {
            return false;
        }
        self.identifier[..ident.len()] == *ident
            && self.identifier[ident.len()..].iter().all(|&b| b == 0)
    }

    /// UDF revision from the first two suffix bytes (UDF and domain
    /// identifier suffixes both carry it there).
    pub fn suffix_udf_revision(&self) -> u16 {
        u16::from_le_bytes([self.identifier_suffix[0], self.identifier_suffix[1]])
    }

    /// Domain flags byte of a domain identifier suffix.
    pub fn domain_flags(&self) -> u8 {
        self.identifier_suffix[2]
    }
}

/// DescriptorTag is the header of all UDF descriptors.
/// UDF Descriptor Tag aka ISO 13346 3/7.2
// http://www.osta.org/specs/pdf/udf260.pdf#page=45
#[derive(Default, Debug, Clone, PartialEq)]
#[repr(C)]
pub struct DescriptorTag {
    pub tag_identifier: u16,
    pub descriptor_version: u16,
    /// "This field shall specify the sum modulo 256 of bytes 0-3 and 5-15 of the tag"
    /// ECMA-167 7.2.3 Tag Checksum
    pub tag_checksum: u8,
    pub _reserved: u8,
    /// "Ignored. Intended for disaster recovery"
    pub tag_serial_number: u16,
    pub descriptor_crc: u16,
    /// "(Size of the Descriptor) - (Length of Descriptor Tag)"
    pub descriptor_crc_length: u16,
    /// logical block relative to the partition for partition-space
    /// descriptors, absolute otherwise
    pub tag_location: u32,
}
assert_eq_size!(DescriptorTag, [u8; 16]);
impl DescriptorTag {
    pub fn size() -> usize {
        16
    }
    pub fn read(bytes: &[u8]) -> Self {
        let mut r = Self::default();
        r.tag_identifier = u16::from_le_bytes([bytes[0], bytes[1]]);
        r.descriptor_version = u16::from_le_bytes([bytes[2], bytes[3]]);
        r.tag_checksum = bytes[4];
        r._reserved = bytes[5];
        r.tag_serial_number = u16::from_le_bytes([bytes[6], bytes[7]]);
        r.descriptor_crc = u16::from_le_bytes([bytes[8], bytes[9]]);
        r.descriptor_crc_length = u16::from_le_bytes([bytes[10], bytes[11]]);
        r.tag_location = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
        r
    }
    pub fn write(&self, bytes: &mut [u8]) {
        bytes[0..2].copy_from_slice(&self.tag_identifier.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.descriptor_version.to_le_bytes());
        bytes[4] = self.tag_checksum;
        bytes[5] = self._reserved;
        bytes[6..8].copy_from_slice(&self.tag_serial_number.to_le_bytes());
        bytes[8..10].copy_from_slice(&self.descriptor_crc.to_le_bytes());
        bytes[10..12].copy_from_slice(&self.descriptor_crc_length.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.tag_location.to_le_bytes());
    }
    pub fn new(identifier: u16, version: u16, location: u32, crc_length: u16) -> Self {
        Self {
            tag_identifier: identifier,
            descriptor_version: version,
            tag_checksum: 0,
            _reserved: 0,
            tag_serial_number: 0,
            descriptor_crc: 0,
            descriptor_crc_length: crc_length,
            tag_location: location,
        }
    }
}

/// Volume Structure Descriptor of the Volume Recognition Sequence,
/// ECMA-167 2/9.1. One record per `max(block_size, 2048)` bytes starting at
/// byte offset 32768.
#[derive(Debug, Clone, PartialEq)]
pub struct VolStructDesc {
    pub structure_type: u8,
    pub standard_identifier: [u8; 5],
    pub structure_version: u8,
}
impl VolStructDesc {
    pub const STD_ID_BEA01: &'static [u8; 5] = b"BEA01";
    pub const STD_ID_NSR01: &'static [u8; 5] = b"NSR01";
    pub const STD_ID_NSR02: &'static [u8; 5] = b"NSR02";
    pub const STD_ID_NSR03: &'static [u8; 5] = b"NSR03";
    pub const STD_ID_TEA01: &'static [u8; 5] = b"TEA01";
    pub const STD_ID_BOOT2: &'static [u8; 5] = b"BOOT2";
    pub const STD_ID_CD001: &'static [u8; 5] = b"CD001";
    pub const STD_ID_CDW02: &'static [u8; 5] = b"CDW02";

    pub fn read(bytes: &[u8]) -> Self {
        let mut standard_identifier = [0u8; 5];
        standard_identifier.copy_from_slice(&bytes[1..6]);
        Self {
            structure_type: bytes[0],
            standard_identifier,
            structure_version: bytes[6],
        }
    }
    pub fn write(&self, bytes: &mut [u8]) {
        bytes[0] = self.structure_type;
        bytes[1..6].copy_from_slice(&self.standard_identifier);
        bytes[6] = self.structure_version;
    }
}

/// ECMA-167 3/7.1 Extent Descriptor aka extent_ad
#[derive(Default, Debug, Clone, PartialEq)]
#[repr(C)]
pub struct ExtentAd {
    /// length in bytes; the 30 low bits only
    pub length_bytes: u32,
    /// location in logical sector number, or 0 if length is 0
    pub location_sector: u32,
}
assert_eq_size!(ExtentAd, [u8; 8]);
impl ExtentAd {
    pub fn size() -> usize {
        8
    }
    pub fn read(bytes: &[u8]) -> Self {
        let mut r = Self::default();
        r.length_bytes = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        r.location_sector = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        r
    }
    pub fn write(&self, bytes: &mut [u8]) {
        bytes[0..4].copy_from_slice(&self.length_bytes.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.location_sector.to_le_bytes());
    }
    pub fn length_masked(&self) -> u32 {
        self.length_bytes & EXT_LENGTH_MASK
    }
}

/// ECMA-167 4/7.1 Recorded address aka lb_addr
#[derive(Default, Debug, Clone, PartialEq, Copy)]
#[repr(C, packed)]
pub struct LbAddr {
    pub logical_block_number: u32,
    pub partition_reference_number: u16,
}
assert_eq_size!(LbAddr, [u8; 6]);
impl LbAddr {
    pub fn size() -> usize {
        6
    }
    pub fn read(bytes: &[u8]) -> Self {
        let mut r = Self::default();
        r.logical_block_number = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        r.partition_reference_number = u16::from_le_bytes([bytes[4], bytes[5]]);
        r
    }
    pub fn write(&self, bytes: &mut [u8]) {
        bytes[0..4].copy_from_slice(&self.logical_block_number.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.partition_reference_number.to_le_bytes());
    }
}

/// Upper two bits of an allocation descriptor's extent length field.
/// ECMA-167 4/14.14.1.1
#[derive(Debug, Clone, PartialEq, Copy)]
#[repr(u8)]
pub enum ExtentType {
    /// 0 Extent recorded and allocated
    RecordedAllocated = 0,
    /// 1 Extent not recorded but allocated
    NotRecordedAllocated = 1,
    /// 2 Extent not recorded and not allocated
    NotRecordedNotAllocated = 2,
    /// 3 The extent is the next extent of allocation descriptors (see 4/12)
    NextExtent = 3,
}
impl ExtentType {
    pub fn from_u8(v: u8) -> ExtentType {
        match v & 0b11 {
            0 => ExtentType::RecordedAllocated,
            1 => ExtentType::NotRecordedAllocated,
            2 => ExtentType::NotRecordedNotAllocated,
            _ => ExtentType::NextExtent,
        }
    }
}

/// ECMA-167 4/14.14.1 Short Allocation Descriptor aka struct short_ad
#[derive(Default, Debug, Clone, PartialEq)]
pub struct ShortAllocationDescriptor {
    pub extent_length_and_type: u32,
    /// "the logical block number, within the partition the descriptor is
    /// recorded on, of the extent."
    pub extent_location: u32,
}
assert_eq_size!(ShortAllocationDescriptor, [u8; 8]);
impl ShortAllocationDescriptor {
    pub fn size() -> usize {
        8
    }
    pub fn extent_length_bytes(&self) -> u32 {
        self.extent_length_and_type & EXT_LENGTH_MASK
    }
    pub fn extent_type(&self) -> ExtentType {
        ExtentType::from_u8((self.extent_length_and_type >> 30) as u8)
    }
    pub fn read(bytes: &[u8]) -> Self {
        Self {
            extent_length_and_type: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            extent_location: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }
    pub fn write(&self, bytes: &mut [u8]) {
        bytes[0..4].copy_from_slice(&self.extent_length_and_type.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.extent_location.to_le_bytes());
    }
}

/// 2.3.10.1 Long Allocation Descriptor aka ECMA-167 4/14.14.2 aka struct long_ad
/// http://www.osta.org/specs/pdf/udf260.pdf#page=66
#[derive(Default, Debug, Clone, PartialEq)]
#[repr(C)]
pub struct LongAd {
    /// length in bytes, with most significant 2 bits used for flags
    pub extent_length_and_type: u32,
    pub extent_location: LbAddr,
    /// UDF 2.3.10.1 ADImpUse: 2 flag bytes followed by 4 bytes that carry
    /// the low half of the referenced entry's Unique ID in a FID's ICB field
    pub implementation_use: [u8; 6],
}
assert_eq_size!(LongAd, [u8; 16]);
impl LongAd {
    pub const fn size() -> usize {
        16
    }
    pub fn read(bytes: &[u8]) -> Self {
        let mut r = Self::default();
        r.extent_length_and_type = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        r.extent_location = LbAddr::read(&bytes[4..10]);
        r.implementation_use.copy_from_slice(&bytes[10..16]);
        r
    }
    pub fn write(&self, bytes: &mut [u8]) {
        bytes[0..4].copy_from_slice(&self.extent_length_and_type.to_le_bytes());
        self.extent_location.write(&mut bytes[4..10]);
        bytes[10..16].copy_from_slice(&self.implementation_use);
    }
    pub fn extent_length_bytes(&self) -> u32 {
        self.extent_length_and_type & EXT_LENGTH_MASK
    }
    pub fn extent_type(&self) -> ExtentType {
        ExtentType::from_u8((self.extent_length_and_type >> 30) as u8)
    }
    /// Unique ID low half carried in a FID's ICB field, UDF 2.3.4.3.
    pub fn unique_id_lo32(&self) -> u32 {
        u32::from_le_bytes([
            self.implementation_use[2],
            self.implementation_use[3],
            self.implementation_use[4],
            self.implementation_use[5],
        ])
    }
    pub fn set_unique_id_lo32(&mut self, id: u32) {
        self.implementation_use[2..6].copy_from_slice(&id.to_le_bytes());
    }
}

/// ECMA-167 4/14.14.3 Extended Allocation Descriptor aka ext_ad
#[derive(Default, Debug, Clone, PartialEq)]
pub struct ExtAllocationDescriptor {
    pub extent_length_and_type: u32,
    pub recorded_length: u32,
    pub information_length: u32,
    pub extent_location: LbAddr,
    pub implementation_use: [u8; 2],
}
impl ExtAllocationDescriptor {
    pub fn size() -> usize {
        20
    }
    pub fn read(bytes: &[u8]) -> Self {
        let mut r = Self::default();
        r.extent_length_and_type = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        r.recorded_length = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        r.information_length = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        r.extent_location = LbAddr::read(&bytes[12..18]);
        r.implementation_use.copy_from_slice(&bytes[18..20]);
        r
    }
    pub fn write(&self, bytes: &mut [u8]) {
        bytes[0..4].copy_from_slice(&self.extent_length_and_type.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.recorded_length.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.information_length.to_le_bytes());
        self.extent_location.write(&mut bytes[12..18]);
        bytes[18..20].copy_from_slice(&self.implementation_use);
    }
    pub fn extent_length_bytes(&self) -> u32 {
        self.extent_length_and_type & EXT_LENGTH_MASK
    }
    pub fn extent_type(&self) -> ExtentType {
        ExtentType::from_u8((self.extent_length_and_type >> 30) as u8)
    }
}

/// UDF Anchor Volume Descriptor Pointer aka ISO 13346 3/10.2
/// This shall be recorded in at least 2 of:
/// 1) Logical Sector 256, 2) Logical Sector (N - 256), 3) N
#[derive(Debug, Clone)]
#[repr(C)]
pub struct AnchorVolumeDescriptorPointer {
    pub tag: DescriptorTag,
    /// main_volume_descriptor_sequence_location.length_bytes >= 16 blocks
    pub main_volume_descriptor_sequence_location: ExtentAd,
    /// reserve_volume_descriptor_sequence_location.length_bytes >= 16 blocks
    pub reserve_volume_descriptor_sequence_location: ExtentAd,
    pub reserved: [u8; 480],
}
impl Default for AnchorVolumeDescriptorPointer {
    fn default() -> Self {
        Self {
            tag: Default::default(),
            main_volume_descriptor_sequence_location: Default::default(),
            reserve_volume_descriptor_sequence_location: Default::default(),
            reserved: [0; 480],
        }
    }
}
impl AnchorVolumeDescriptorPointer {
    pub const TAG_IDENTIFIER: u16 = 2;
    pub fn size() -> usize {
        512
    }
    pub fn read(bytes: &[u8]) -> Self {
        let mut r = Self::default();
        r.tag = DescriptorTag::read(&bytes[0..16]);
        r.main_volume_descriptor_sequence_location = ExtentAd::read(&bytes[16..24]);
        r.reserve_volume_descriptor_sequence_location = ExtentAd::read(&bytes[24..32]);
        r.reserved.copy_from_slice(&bytes[32..512]);
        r
    }
    pub fn write(&self, bytes: &mut [u8]) {
        self.tag.write(&mut bytes[0..16]);
        self.main_volume_descriptor_sequence_location
            .write(&mut bytes[16..24]);
        self.reserve_volume_descriptor_sequence_location
            .write(&mut bytes[24..32]);
        bytes[32..512].copy_from_slice(&self.reserved);
    }
}

/// Volume Descriptor Pointer, ECMA-167 3/10.3. Continues a Volume
/// Descriptor Sequence in another extent.
#[derive(Default, Debug, Clone)]
pub struct VolumeDescriptorPointer {
    pub tag: DescriptorTag,
    pub volume_descriptor_sequence_number: u32,
    pub next_volume_descriptor_sequence_extent: ExtentAd,
}
impl VolumeDescriptorPointer {
    pub const TAG_IDENTIFIER: u16 = 3;
    pub fn read(bytes: &[u8]) -> Self {
        let mut r = Self::default();
        r.tag = DescriptorTag::read(&bytes[0..16]);
        r.volume_descriptor_sequence_number =
            u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
        r.next_volume_descriptor_sequence_extent = ExtentAd::read(&bytes[20..28]);
        r
    }
}

/// There is exactly one prevailing instance of this per volume.
/// UDF 2.2.2 Primary Volume Descriptor aka ECMA-167 3/10.1
#[derive(Clone, Debug)]
#[repr(C)]
pub struct PrimaryVolumeDescriptor {
    pub tag: DescriptorTag,
    pub volume_descriptor_sequence_number: u32,
    pub primary_volume_descriptor_number: u32,
    pub volume_identifier: Dstring<32>,
    pub volume_sequence_number: u16,
    pub maximum_volume_sequence_number: u16,
    pub interchange_level: u16,
    pub maximum_interchange_level: u16,
    pub character_set_list: u32,
    pub maximum_character_set_list: u32,
    pub volume_set_identifier: Dstring<128>,
    pub descriptor_character_set: CharSpec,
    pub explanatory_character_set: CharSpec,
    pub volume_abstract: ExtentAd,
    pub volume_copyright_notice: ExtentAd,
    pub application_identifier: EntityID,
    pub recording_date_and_time: Timestamp,
    pub implementation_identifier: EntityID,
    pub implementation_use: [u8; 64],
    pub predecessor_volume_descriptor_sequence_location: u32,
    pub flags: u16,
    pub reserved: [u8; 22],
}
impl Default for PrimaryVolumeDescriptor {
    fn default() -> Self {
        Self {
            tag: Default::default(),
            volume_descriptor_sequence_number: 0,
            primary_volume_descriptor_number: 0,
            volume_identifier: Dstring::default(),
            volume_sequence_number: 0,
            maximum_volume_sequence_number: 0,
            interchange_level: 0,
            maximum_interchange_level: 0,
            character_set_list: 0,
            maximum_character_set_list: 0,
            volume_set_identifier: Dstring::default(),
            descriptor_character_set: Default::default(),
            explanatory_character_set: Default::default(),
            volume_abstract: Default::default(),
            volume_copyright_notice: Default::default(),
            application_identifier: Default::default(),
            recording_date_and_time: Default::default(),
            implementation_identifier: Default::default(),
            implementation_use: [0; 64],
            predecessor_volume_descriptor_sequence_location: 0,
            flags: 0,
            reserved: [0; 22],
        }
    }
}
impl PrimaryVolumeDescriptor {
    pub const TAG_IDENTIFIER: u16 = 1;
    pub fn size() -> usize {
        512
    }
    pub fn read(bytes: &[u8]) -> Self {
        let mut r = Self::default();
        r.tag = DescriptorTag::read(&bytes[0..16]);
        r.volume_descriptor_sequence_number =
            u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
        r.primary_volume_descriptor_number =
            u32::from_le_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
        r.volume_identifier.0.copy_from_slice(&bytes[24..56]);
        r.volume_sequence_number = u16::from_le_bytes([bytes[56], bytes[57]]);
        r.maximum_volume_sequence_number = u16::from_le_bytes([bytes[58], bytes[59]]);
        r.interchange_level = u16::from_le_bytes([bytes[60], bytes[61]]);
        r.maximum_interchange_level = u16::from_le_bytes([bytes[62], bytes[63]]);
        r.character_set_list = u32::from_le_bytes([bytes[64], bytes[65], bytes[66], bytes[67]]);
        r.maximum_character_set_list =
            u32::from_le_bytes([bytes[68], bytes[69], bytes[70], bytes[71]]);
        r.volume_set_identifier.0.copy_from_slice(&bytes[72..200]);
        r.descriptor_character_set = CharSpec::read(&bytes[200..264]);
        r.explanatory_character_set = CharSpec::read(&bytes[264..328]);
        r.volume_abstract = ExtentAd::read(&bytes[328..336]);
        r.volume_copyright_notice = ExtentAd::read(&bytes[336..344]);
        r.application_identifier = EntityID::read(&bytes[344..376]);
        r.recording_date_and_time = Timestamp::read(&bytes[376..388]);
        r.implementation_identifier = EntityID::read(&bytes[388..420]);
        r.implementation_use.copy_from_slice(&bytes[420..484]);
        r.predecessor_volume_descriptor_sequence_location =
            u32::from_le_bytes([bytes[484], bytes[485], bytes[486], bytes[487]]);
        r.flags = u16::from_le_bytes([bytes[488], bytes[489]]);
        r.reserved.copy_from_slice(&bytes[490..512]);
        r
    }
    pub fn write(&self, bytes: &mut [u8]) {
        self.tag.write(&mut bytes[0..16]);
        bytes[16..20].copy_from_slice(&self.volume_descriptor_sequence_number.to_le_bytes());
        bytes[20..24].copy_from_slice(&self.primary_volume_descriptor_number.to_le_bytes());
        bytes[24..56].copy_from_slice(&self.volume_identifier.0);
        bytes[56..58].copy_from_slice(&self.volume_sequence_number.to_le_bytes());
        bytes[58..60].copy_from_slice(&self.maximum_volume_sequence_number.to_le_bytes());
        bytes[60..62].copy_from_slice(&self.interchange_level.to_le_bytes());
        bytes[62..64].copy_from_slice(&self.maximum_interchange_level.to_le_bytes());
        bytes[64..68].copy_from_slice(&self.character_set_list.to_le_bytes());
        bytes[68..72].copy_from_slice(&self.maximum_character_set_list.to_le_bytes());
        bytes[72..200].copy_from_slice(&self.volume_set_identifier.0);
        self.descriptor_character_set.write(&mut bytes[200..264]);
        self.explanatory_character_set.write(&mut bytes[264..328]);
        self.volume_abstract.write(&mut bytes[328..336]);
        self.volume_copyright_notice.write(&mut bytes[336..344]);
        self.application_identifier.write(&mut bytes[344..376]);
        self.recording_date_and_time.write(&mut bytes[376..388]);
        self.implementation_identifier.write(&mut bytes[388..420]);
        bytes[420..484].copy_from_slice(&self.implementation_use);
        bytes[484..488].copy_from_slice(
            &self
                .predecessor_volume_descriptor_sequence_location
                .to_le_bytes(),
        );
        bytes[488..490].copy_from_slice(&self.flags.to_le_bytes());
        bytes[490..512].copy_from_slice(&self.reserved);
    }
}

// https://ecma-international.org/wp-content/uploads/ECMA-167_3rd_edition_june_1997.pdf#page=60
#[derive(Default, Debug, Clone, PartialEq)]
#[repr(C)]
pub struct GenericPartitionMapHeader {
    pub partition_map_type: u8,
    pub partition_map_length: u8,
}

/// see ECMA-167 3/10.7.2 Type 1 Partition Map
#[derive(Default, Debug, Clone, PartialEq)]
pub struct Type1PartitionMap {
    pub header: GenericPartitionMapHeader,
    /// volume upon which the partition is recorded; typically 1
    pub volume_seq_number: u16,
    pub partition_number: u16,
}

/// UDF 2.2.8 Virtual Partition Map, write-once media.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualPartitionMap {
    pub header: GenericPartitionMapHeader,
    pub partition_type_identifier: EntityID,
    pub volume_seq_number: u16,
    pub partition_number: u16,
}

/// UDF 2.2.9 Sparable Partition Map, CD-RW style defect management.
#[derive(Debug, Clone, PartialEq)]
pub struct SparablePartitionMap {
    pub header: GenericPartitionMapHeader,
    pub partition_type_identifier: EntityID,
    pub volume_seq_number: u16,
    pub partition_number: u16,
    /// packet length in blocks, typically 32
    pub packet_length: u16,
    pub num_sparing_tables: u8,
    pub size_sparing_table: u32,
    /// up to four table locations; trailing entries are zero
    pub loc_sparing_table: [u32; 4],
}

/// UDF 2.2.10 Metadata Partition Map.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataPartitionMap {
    pub header: GenericPartitionMapHeader,
    pub partition_type_identifier: EntityID,
    pub volume_seq_number: u16,
    pub partition_number: u16,
    pub metadata_file_location: u32,
    pub metadata_mirror_file_location: u32,
    pub metadata_bitmap_file_location: u32,
    pub allocation_unit_size: u32,
    pub alignment_unit_size: u16,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PartitionMap {
    Type1(Type1PartitionMap),
    Virtual(VirtualPartitionMap),
    Sparable(SparablePartitionMap),
    Metadata(MetadataPartitionMap),
    Other {
        header: GenericPartitionMapHeader,
        data: Vec<u8>,
    },
}

impl PartitionMap {
    pub fn read(bytes: &[u8]) -> Result<Self, crate::error::UdfError> {
        use crate::error::UdfError;

        if bytes.len() < 2 {
            return Err(UdfError::BufferTooSmall);
        }
        let map_type = bytes[0];
        let map_length = bytes[1];
        if map_length < 2 || bytes.len() < map_length as usize {
            return Err(UdfError::BufferTooSmall);
        }

        let header = GenericPartitionMapHeader {
            partition_map_type: map_type,
            partition_map_length: map_length,
        };

        match map_type {
            1 => {
                if map_length != 6 {
                    return Err(UdfError::InvalidPartitionMap);
                }
                Ok(PartitionMap::Type1(Type1PartitionMap {
                    header,
                    volume_seq_number: u16::from_le_bytes([bytes[2], bytes[3]]),
                    partition_number: u16::from_le_bytes([bytes[4], bytes[5]]),
                }))
            }
            2 => {
                if map_length != 64 {
                    return Err(UdfError::InvalidPartitionMap);
                }
                let ident = EntityID::read(&bytes[4..36]);
                let volume_seq_number = u16::from_le_bytes([bytes[36], bytes[37]]);
                let partition_number = u16::from_le_bytes([bytes[38], bytes[39]]);
                if ident.matches(UDF_ID_VIRTUAL) {
                    Ok(PartitionMap::Virtual(VirtualPartitionMap {
                        header,
                        partition_type_identifier: ident,
                        volume_seq_number,
                        partition_number,
                    }))
                } else if ident.matches(UDF_ID_SPARABLE) {
                    let mut loc_sparing_table = [0u32; 4];
                    for (i, loc) in loc_sparing_table.iter_mut().enumerate() {
                        let o = 48 + i * 4;
                        *loc = u32::from_le_bytes([
                            bytes[o],
                            bytes[o + 1],
                            bytes[o + 2],
                            bytes[o + 3],
                        ]);
                    }
                    Ok(PartitionMap::Sparable(SparablePartitionMap {
                        header,
                        partition_type_identifier: ident,
                        volume_seq_number,
                        partition_number,
                        packet_length: u16::from_le_bytes([bytes[40], bytes[41]]),
                        num_sparing_tables: bytes[42],
                        size_sparing_table: u32::from_le_bytes([
                            bytes[44], bytes[45], bytes[46], bytes[47],
                        ]),
                        loc_sparing_table,
                    }))
                } else if ident.matches(UDF_ID_METADATA) {
                    Ok(PartitionMap::Metadata(MetadataPartitionMap {
                        header,
                        partition_type_identifier: ident,
                        volume_seq_number,
                        partition_number,
                        metadata_file_location: u32::from_le_bytes([
                            bytes[40], bytes[41], bytes[42], bytes[43],
                        ]),
                        metadata_mirror_file_location: u32::from_le_bytes([
                            bytes[44], bytes[45], bytes[46], bytes[47],
                        ]),
                        metadata_bitmap_file_location: u32::from_le_bytes([
                            bytes[48], bytes[49], bytes[50], bytes[51],
                        ]),
                        allocation_unit_size: u32::from_le_bytes([
                            bytes[52], bytes[53], bytes[54], bytes[55],
                        ]),
                        alignment_unit_size: u16::from_le_bytes([bytes[56], bytes[57]]),
                        flags: bytes[58],
                    }))
                } else {
                    Ok(PartitionMap::Other {
                        header,
                        data: bytes[..64].to_vec(),
                    })
                }
            }
            _ => Ok(PartitionMap::Other {
                header,
                data: bytes[..map_length as usize].to_vec(),
            }),
        }
    }

    pub fn write(&self, bytes: &mut [u8]) {
        match self {
            PartitionMap::Type1(map) => {
                bytes[0] = 1;
                bytes[1] = 6;
                bytes[2..4].copy_from_slice(&map.volume_seq_number.to_le_bytes());
                bytes[4..6].copy_from_slice(&map.partition_number.to_le_bytes());
            }
            PartitionMap::Virtual(map) => {
                bytes[..64].fill(0);
                bytes[0] = 2;
                bytes[1] = 64;
                map.partition_type_identifier.write(&mut bytes[4..36]);
                bytes[36..38].copy_from_slice(&map.volume_seq_number.to_le_bytes());
                bytes[38..40].copy_from_slice(&map.partition_number.to_le_bytes());
            }
            PartitionMap::Sparable(map) => {
                bytes[..64].fill(0);
                bytes[0] = 2;
                bytes[1] = 64;
                map.partition_type_identifier.write(&mut bytes[4..36]);
                bytes[36..38].copy_from_slice(&map.volume_seq_number.to_le_bytes());
                bytes[38..40].copy_from_slice(&map.partition_number.to_le_bytes());
                bytes[40..42].copy_from_slice(&map.packet_length.to_le_bytes());
                bytes[42] = map.num_sparing_tables;
                bytes[44..48].copy_from_slice(&map.size_sparing_table.to_le_bytes());
                for (i, loc) in map.loc_sparing_table.iter().enumerate() {
                    let o = 48 + i * 4;
                    bytes[o..o + 4].copy_from_slice(&loc.to_le_bytes());
                }
            }
            PartitionMap::Metadata(map) => {
                bytes[..64].fill(0);
                bytes[0] = 2;
                bytes[1] = 64;
                map.partition_type_identifier.write(&mut bytes[4..36]);
                bytes[36..38].copy_from_slice(&map.volume_seq_number.to_le_bytes());
                bytes[38..40].copy_from_slice(&map.partition_number.to_le_bytes());
                bytes[40..44].copy_from_slice(&map.metadata_file_location.to_le_bytes());
                bytes[44..48].copy_from_slice(&map.metadata_mirror_file_location.to_le_bytes());
                bytes[48..52].copy_from_slice(&map.metadata_bitmap_file_location.to_le_bytes());
                bytes[52..56].copy_from_slice(&map.allocation_unit_size.to_le_bytes());
                bytes[56..58].copy_from_slice(&map.alignment_unit_size.to_le_bytes());
                bytes[58] = map.flags;
            }
            PartitionMap::Other { header: _, data } => {
                bytes[..data.len()].copy_from_slice(data);
            }
        }
    }

    pub fn get_length(&self) -> u8 {
        match self {
            PartitionMap::Type1(_) => 6,
            PartitionMap::Virtual(_) | PartitionMap::Sparable(_) | PartitionMap::Metadata(_) => 64,
            PartitionMap::Other { header, .. } => header.partition_map_length,
        }
    }

    pub fn partition_number(&self) -> Option<u16> {
        match self {
            PartitionMap::Type1(m) => Some(m.partition_number),
            PartitionMap::Virtual(m) => Some(m.partition_number),
            PartitionMap::Sparable(m) => Some(m.partition_number),
            PartitionMap::Metadata(m) => Some(m.partition_number),
            PartitionMap::Other { .. } => None,
        }
    }
}

/// UDF Logical Volume Descriptor aka ISO 13346 3/10.6
///
/// The fixed 440 byte prefix is followed by the partition map table, kept
/// here as raw bytes so the descriptor re-serializes bit exactly.
#[derive(Clone, Debug)]
#[repr(C)]
pub struct LogicalVolumeDescriptor {
    pub tag: DescriptorTag,
    pub volume_descriptor_sequence_number: u32,
    pub descriptor_character_set: CharSpec,
    pub logical_volume_identifier: Dstring<128>,
    pub logical_block_size: u32,
    pub domain_identifier: EntityID,
    /// a Logical Volume Header Descriptor; for UDF this is a long_ad of
    /// the File Set Descriptor
    /// http://www.osta.org/specs/pdf/udf260.pdf#page=70
    pub logical_volume_contents_use: [u8; 16],
    pub map_table_length: u32,
    pub number_of_partition_maps: u32,
    pub implementation_identifier: EntityID,
    pub implementation_use: [u8; 128],
    /// points to the Logical Volume Integrity Descriptor sequence
    pub integrity_sequence_extent: ExtentAd,
    /// raw partition map table, `map_table_length` bytes
    pub partition_map_table: Vec<u8>,
}
impl Default for LogicalVolumeDescriptor {
    fn default() -> Self {
        Self {
            tag: Default::default(),
            volume_descriptor_sequence_number: 0,
            descriptor_character_set: Default::default(),
            logical_volume_identifier: Dstring::default(),
            logical_block_size: 0,
            domain_identifier: Default::default(),
            logical_volume_contents_use: [0; 16],
            map_table_length: 0,
            number_of_partition_maps: 0,
            implementation_identifier: Default::default(),
            implementation_use: [0; 128],
            integrity_sequence_extent: Default::default(),
            partition_map_table: Vec::new(),
        }
    }
}
impl LogicalVolumeDescriptor {
    pub const TAG_IDENTIFIER: u16 = 6;
    pub const FIXED_SIZE: usize = 440;

    pub fn get_length(&self) -> usize {
        Self::FIXED_SIZE + self.partition_map_table.len()
    }

    pub fn read(bytes: &[u8]) -> Self {
        let mut r = Self::default();
        r.tag = DescriptorTag::read(&bytes[0..16]);
        r.volume_descriptor_sequence_number =
            u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
        r.descriptor_character_set = CharSpec::read(&bytes[20..84]);
        r.logical_volume_identifier
            .0
            .copy_from_slice(&bytes[84..212]);
        r.logical_block_size = u32::from_le_bytes([bytes[212], bytes[213], bytes[214], bytes[215]]);
        r.domain_identifier = EntityID::read(&bytes[216..248]);
        r.logical_volume_contents_use
            .copy_from_slice(&bytes[248..264]);
        r.map_table_length = u32::from_le_bytes([bytes[264], bytes[265], bytes[266], bytes[267]]);
        r.number_of_partition_maps =
            u32::from_le_bytes([bytes[268], bytes[269], bytes[270], bytes[271]]);
        r.implementation_identifier = EntityID::read(&bytes[272..304]);
        r.implementation_use.copy_from_slice(&bytes[304..432]);
        r.integrity_sequence_extent = ExtentAd::read(&bytes[432..440]);
        let map_len = (r.map_table_length as usize).min(bytes.len() - Self::FIXED_SIZE);
        r.partition_map_table = bytes[440..440 + map_len].to_vec();
        r
    }

    pub fn write(&self, bytes: &mut [u8]) {
        self.tag.write(&mut bytes[0..16]);
        bytes[16..20].copy_from_slice(&self.volume_descriptor_sequence_number.to_le_bytes());
        self.descriptor_character_set.write(&mut bytes[20..84]);
        bytes[84..212].copy_from_slice(&self.logical_volume_identifier.0);
        bytes[212..216].copy_from_slice(&self.logical_block_size.to_le_bytes());
        self.domain_identifier.write(&mut bytes[216..248]);
        bytes[248..264].copy_from_slice(&self.logical_volume_contents_use);
        bytes[264..268].copy_from_slice(&self.map_table_length.to_le_bytes());
        bytes[268..272].copy_from_slice(&self.number_of_partition_maps.to_le_bytes());
        self.implementation_identifier.write(&mut bytes[272..304]);
        bytes[304..432].copy_from_slice(&self.implementation_use);
        self.integrity_sequence_extent.write(&mut bytes[432..440]);
        bytes[440..440 + self.partition_map_table.len()]
            .copy_from_slice(&self.partition_map_table);
    }

    /// Parse the partition map table, iterating by each entry's
    /// self-reported length.
    pub fn read_partition_maps(&self) -> Result<Vec<PartitionMap>, crate::error::UdfError> {
        let mut maps = Vec::new();
        let mut offset = 0usize;
        while maps.len() < self.number_of_partition_maps as usize
            && offset < self.partition_map_table.len()
        {
            let map = PartitionMap::read(&self.partition_map_table[offset..])?;
            offset += map.get_length() as usize;
            maps.push(map);
        }
        if offset != self.map_table_length as usize {
            warn!(
                "partition map table length mismatch: walked {} bytes but expected {}",
                offset, self.map_table_length
            );
        }
        Ok(maps)
    }

    /// The long_ad of the File Set Descriptor, UDF 2.2.4.4.
    pub fn file_set_descriptor_location(&self) -> LongAd {
        LongAd::read(&self.logical_volume_contents_use)
    }
}

/// UDF 2.2.14 Partition Descriptor aka ECMA-167 3/10.5
#[derive(Debug, Clone)]
#[repr(C)]
pub struct PartitionDescriptor {
    pub tag: DescriptorTag,
    pub volume_descriptor_sequence_number: u32,
    pub partition_flags: u16,
    pub partition_number: u16,
    pub partition_contents: EntityID,
    pub partition_contents_use: [u8; 128],
    pub access_type: u32,
    /// position of the partition in absolute blocks
    pub partition_starting_location: u32,
    /// length in blocks
    pub partition_length: u32,
    pub implementation_identifier: EntityID,
    pub implementation_use: [u8; 128],
    pub reserved: [u8; 156],
}
impl Default for PartitionDescriptor {
    fn default() -> Self {
        Self {
            tag: Default::default(),
            volume_descriptor_sequence_number: Default::default(),
            partition_flags: Default::default(),
            partition_number: Default::default(),
            partition_contents: Default::default(),
            partition_contents_use: [0; 128],
            access_type: Default::default(),
            partition_starting_location: Default::default(),
            partition_length: Default::default(),
            implementation_identifier: Default::default(),
            implementation_use: [0; 128],
            reserved: [0; 156],
        }
    }
}

/// Partition access types, ECMA-167 3/10.5.7 and UDF 2.2.14.2.
pub const ACCESS_TYPE_UNSPECIFIED: u32 = 0;
pub const ACCESS_TYPE_READ_ONLY: u32 = 1;
pub const ACCESS_TYPE_WRITE_ONCE: u32 = 2;
pub const ACCESS_TYPE_REWRITABLE: u32 = 3;
pub const ACCESS_TYPE_OVERWRITABLE: u32 = 4;
pub const ACCESS_TYPE_PSEUDO_OVERWRITABLE: u32 = 5;

pub const PD_PARTITION_CONTENTS_NSR02: &[u8] = b"+NSR02";
pub const PD_PARTITION_CONTENTS_NSR03: &[u8] = b"+NSR03";

impl PartitionDescriptor {
    pub const TAG_IDENTIFIER: u16 = 5;
    pub fn size() -> usize {
        512
    }
    pub fn read(bytes: &[u8]) -> Self {
        let mut r = Self::default();
        r.tag = DescriptorTag::read(&bytes[0..16]);
        r.volume_descriptor_sequence_number =
            u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
        r.partition_flags = u16::from_le_bytes([bytes[20], bytes[21]]);
        r.partition_number = u16::from_le_bytes([bytes[22], bytes[23]]);
        r.partition_contents = EntityID::read(&bytes[24..56]);
        r.partition_contents_use.copy_from_slice(&bytes[56..184]);
        r.access_type = u32::from_le_bytes([bytes[184], bytes[185], bytes[186], bytes[187]]);
        r.partition_starting_location =
            u32::from_le_bytes([bytes[188], bytes[189], bytes[190], bytes[191]]);
        r.partition_length = u32::from_le_bytes([bytes[192], bytes[193], bytes[194], bytes[195]]);
        r.implementation_identifier = EntityID::read(&bytes[196..228]);
        r.implementation_use.copy_from_slice(&bytes[228..356]);
        r.reserved.copy_from_slice(&bytes[356..512]);
        r
    }
    pub fn write(&self, bytes: &mut [u8]) {
        self.tag.write(&mut bytes[0..16]);
        bytes[16..20].copy_from_slice(&self.volume_descriptor_sequence_number.to_le_bytes());
        bytes[20..22].copy_from_slice(&self.partition_flags.to_le_bytes());
        bytes[22..24].copy_from_slice(&self.partition_number.to_le_bytes());
        self.partition_contents.write(&mut bytes[24..56]);
        bytes[56..184].copy_from_slice(&self.partition_contents_use);
        bytes[184..188].copy_from_slice(&self.access_type.to_le_bytes());
        bytes[188..192].copy_from_slice(&self.partition_starting_location.to_le_bytes());
        bytes[192..196].copy_from_slice(&self.partition_length.to_le_bytes());
        self.implementation_identifier.write(&mut bytes[196..228]);
        bytes[228..356].copy_from_slice(&self.implementation_use);
        bytes[356..512].copy_from_slice(&self.reserved);
    }
    pub fn partition_header(&self) -> PartitionHeaderDescriptor {
        PartitionHeaderDescriptor::read(&self.partition_contents_use)
    }
    pub fn set_partition_header(&mut self, phd: &PartitionHeaderDescriptor) {
        phd.write(&mut self.partition_contents_use);
    }
}

/// ECMA-167 4/14.3 Partition Header Descriptor, stored in the Partition
/// Descriptor's partition contents use area. All short_ads here address
/// partition space.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct PartitionHeaderDescriptor {
    pub unalloc_space_table: ShortAllocationDescriptor,
    pub unalloc_space_bitmap: ShortAllocationDescriptor,
    pub partition_integrity_table: ShortAllocationDescriptor,
    pub freed_space_table: ShortAllocationDescriptor,
    pub freed_space_bitmap: ShortAllocationDescriptor,
}
impl PartitionHeaderDescriptor {
    pub fn read(bytes: &[u8]) -> Self {
        Self {
            unalloc_space_table: ShortAllocationDescriptor::read(&bytes[0..8]),
            unalloc_space_bitmap: ShortAllocationDescriptor::read(&bytes[8..16]),
            partition_integrity_table: ShortAllocationDescriptor::read(&bytes[16..24]),
            freed_space_table: ShortAllocationDescriptor::read(&bytes[24..32]),
            freed_space_bitmap: ShortAllocationDescriptor::read(&bytes[32..40]),
        }
    }
    pub fn write(&self, bytes: &mut [u8]) {
        self.unalloc_space_table.write(&mut bytes[0..8]);
        self.unalloc_space_bitmap.write(&mut bytes[8..16]);
        self.partition_integrity_table.write(&mut bytes[16..24]);
        self.freed_space_table.write(&mut bytes[24..32]);
        self.freed_space_bitmap.write(&mut bytes[32..40]);
    }
}

/// Unallocated Space Descriptor, ECMA-167 3/10.8.
#[derive(Default, Debug, Clone)]
pub struct UnallocatedSpaceDescriptor {
    pub tag: DescriptorTag,
    pub volume_descriptor_sequence_number: u32,
    pub allocation_descriptors: Vec<ExtentAd>,
}
impl UnallocatedSpaceDescriptor {
    pub const TAG_IDENTIFIER: u16 = 7;
    pub const FIXED_SIZE: usize = 24;

    pub fn get_length(&self) -> usize {
        Self::FIXED_SIZE + self.allocation_descriptors.len() * ExtentAd::size()
    }
    pub fn read(bytes: &[u8]) -> Self {
        let mut r = Self::default();
        r.tag = DescriptorTag::read(&bytes[0..16]);
        r.volume_descriptor_sequence_number =
            u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
        let num = u32::from_le_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]) as usize;
        let num = num.min((bytes.len() - Self::FIXED_SIZE) / ExtentAd::size());
        for i in 0..num {
            let o = Self::FIXED_SIZE + i * 8;
            r.allocation_descriptors.push(ExtentAd::read(&bytes[o..o + 8]));
        }
        r
    }
    pub fn write(&self, bytes: &mut [u8]) {
        self.tag.write(&mut bytes[0..16]);
        bytes[16..20].copy_from_slice(&self.volume_descriptor_sequence_number.to_le_bytes());
        bytes[20..24]
            .copy_from_slice(&(self.allocation_descriptors.len() as u32).to_le_bytes());
        for (i, ad) in self.allocation_descriptors.iter().enumerate() {
            let o = Self::FIXED_SIZE + i * 8;
            ad.write(&mut bytes[o..o + 8]);
        }
    }
}

/// Implementation Use Volume Descriptor, ECMA-167 3/10.4. UDF 2.2.7
/// constrains the implementation use area to the LV Information structure.
#[derive(Clone, Debug)]
pub struct ImpUseVolumeDescriptor {
    pub tag: DescriptorTag,
    pub volume_descriptor_sequence_number: u32,
    pub implementation_identifier: EntityID,
    pub implementation_use: [u8; 460],
}
impl Default for ImpUseVolumeDescriptor {
    fn default() -> Self {
        Self {
            tag: Default::default(),
            volume_descriptor_sequence_number: 0,
            implementation_identifier: Default::default(),
            implementation_use: [0; 460],
        }
    }
}
impl ImpUseVolumeDescriptor {
    pub const TAG_IDENTIFIER: u16 = 4;
    pub fn size() -> usize {
        512
    }
    pub fn read(bytes: &[u8]) -> Self {
        let mut r = Self::default();
        r.tag = DescriptorTag::read(&bytes[0..16]);
        r.volume_descriptor_sequence_number =
            u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
        r.implementation_identifier = EntityID::read(&bytes[20..52]);
        r.implementation_use.copy_from_slice(&bytes[52..512]);
        r
    }
    pub fn write(&self, bytes: &mut [u8]) {
        self.tag.write(&mut bytes[0..16]);
        bytes[16..20].copy_from_slice(&self.volume_descriptor_sequence_number.to_le_bytes());
        self.implementation_identifier.write(&mut bytes[20..52]);
        bytes[52..512].copy_from_slice(&self.implementation_use);
    }
    pub fn lv_information(&self) -> LVInformation {
        LVInformation::read(&self.implementation_use)
    }
    pub fn set_lv_information(&mut self, info: &LVInformation) {
        info.write(&mut self.implementation_use);
    }
}

/// UDF 2.2.7.2 LV Information, inside the IUVD implementation use area.
#[derive(Clone, Debug)]
pub struct LVInformation {
    pub lvi_charset: CharSpec,
    pub logical_volume_identifier: Dstring<128>,
    pub lv_info1: Dstring<36>,
    pub lv_info2: Dstring<36>,
    pub lv_info3: Dstring<36>,
    pub implementation_id: EntityID,
    pub implementation_use: [u8; 128],
}
impl Default for LVInformation {
    fn default() -> Self {
        Self {
            lvi_charset: Default::default(),
            logical_volume_identifier: Dstring::default(),
            lv_info1: Dstring::default(),
            lv_info2: Dstring::default(),
            lv_info3: Dstring::default(),
            implementation_id: Default::default(),
            implementation_use: [0; 128],
        }
    }
}
impl LVInformation {
    pub fn read(bytes: &[u8]) -> Self {
        let mut r = Self::default();
        r.lvi_charset = CharSpec::read(&bytes[0..64]);
        r.logical_volume_identifier.0.copy_from_slice(&bytes[64..192]);
        r.lv_info1.0.copy_from_slice(&bytes[192..228]);
        r.lv_info2.0.copy_from_slice(&bytes[228..264]);
        r.lv_info3.0.copy_from_slice(&bytes[264..300]);
        r.implementation_id = EntityID::read(&bytes[300..332]);
        r.implementation_use.copy_from_slice(&bytes[332..460]);
        r
    }
    pub fn write(&self, bytes: &mut [u8]) {
        self.lvi_charset.write(&mut bytes[0..64]);
        bytes[64..192].copy_from_slice(&self.logical_volume_identifier.0);
        bytes[192..228].copy_from_slice(&self.lv_info1.0);
        bytes[228..264].copy_from_slice(&self.lv_info2.0);
        bytes[264..300].copy_from_slice(&self.lv_info3.0);
        self.implementation_id.write(&mut bytes[300..332]);
        bytes[332..460].copy_from_slice(&self.implementation_use);
    }
}

#[derive(Debug, Clone)]
pub struct TerminatingDescriptor {
    /// tag identifier must be 8
    pub tag: DescriptorTag,
    pub reserved: [u8; 496],
}
impl Default for TerminatingDescriptor {
    fn default() -> Self {
        Self {
            tag: DescriptorTag::default(),
            reserved: [0; 496],
        }
    }
}
impl TerminatingDescriptor {
    pub const TAG_IDENTIFIER: u16 = 8;
    pub fn size() -> usize {
        512
    }
    pub fn read(bytes: &[u8]) -> Self {
        let mut r = Self::default();
        r.tag = DescriptorTag::read(&bytes[0..16]);
        r.reserved.copy_from_slice(&bytes[16..512]);
        r
    }
    pub fn write(&self, bytes: &mut [u8]) {
        self.tag.write(&mut bytes[0..16]);
        bytes[16..512].copy_from_slice(&self.reserved);
    }
}

/// Logical Volume Integrity Descriptor, ECMA-167 3/10.10.
///
/// Holds the mount state of the volume, the next Unique ID, per-partition
/// free/size tables and a UDF implementation use suffix with file and
/// directory counts.
#[derive(Clone, Debug, Default)]
pub struct LogicalVolumeIntegrityDescriptor {
    pub tag: DescriptorTag,
    pub recording_date_and_time: Timestamp,
    pub integrity_type: u32,
    pub next_integrity_extent: ExtentAd,
    /// Logical Volume Header Descriptor, ECMA-167 4/14.15: 8 byte next
    /// Unique ID followed by 24 reserved bytes
    pub logical_volume_contents_use: [u8; 32],
    pub number_of_partitions: u32,
    pub length_of_implementation_use: u32,
    pub free_space_table: Vec<u32>,
    pub size_table: Vec<u32>,
    pub implementation_use: Vec<u8>,
}

pub const LVID_INTEGRITY_TYPE_OPEN: u32 = 0;
pub const LVID_INTEGRITY_TYPE_CLOSE: u32 = 1;

impl LogicalVolumeIntegrityDescriptor {
    pub const TAG_IDENTIFIER: u16 = 9;
    pub const FIXED_SIZE: usize = 80;

    pub fn get_length(&self) -> usize {
        Self::FIXED_SIZE + self.free_space_table.len() * 8 + self.implementation_use.len()
    }

    pub fn read(bytes: &[u8]) -> Self {
        let mut r = Self::default();
        r.tag = DescriptorTag::read(&bytes[0..16]);
        r.recording_date_and_time = Timestamp::read(&bytes[16..28]);
        r.integrity_type = u32::from_le_bytes([bytes[28], bytes[29], bytes[30], bytes[31]]);
        r.next_integrity_extent = ExtentAd::read(&bytes[32..40]);
        r.logical_volume_contents_use.copy_from_slice(&bytes[40..72]);
        r.number_of_partitions = u32::from_le_bytes([bytes[72], bytes[73], bytes[74], bytes[75]]);
        r.length_of_implementation_use =
            u32::from_le_bytes([bytes[76], bytes[77], bytes[78], bytes[79]]);
        let n = r.number_of_partitions as usize;
        let n = n.min((bytes.len().saturating_sub(Self::FIXED_SIZE)) / 8);
        for i in 0..n {
            let o = Self::FIXED_SIZE + i * 4;
            r.free_space_table
                .push(u32::from_le_bytes([bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]]));
        }
        for i in 0..n {
            let o = Self::FIXED_SIZE + n * 4 + i * 4;
            r.size_table
                .push(u32::from_le_bytes([bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]]));
        }
        let iu_start = Self::FIXED_SIZE + n * 8;
        let iu_len = (r.length_of_implementation_use as usize)
            .min(bytes.len().saturating_sub(iu_start));
        r.implementation_use = bytes[iu_start..iu_start + iu_len].to_vec();
        r
    }

    pub fn write(&self, bytes: &mut [u8]) {
        self.tag.write(&mut bytes[0..16]);
        self.recording_date_and_time.write(&mut bytes[16..28]);
        bytes[28..32].copy_from_slice(&self.integrity_type.to_le_bytes());
        self.next_integrity_extent.write(&mut bytes[32..40]);
        bytes[40..72].copy_from_slice(&self.logical_volume_contents_use);
        bytes[72..76].copy_from_slice(&self.number_of_partitions.to_le_bytes());
        bytes[76..80].copy_from_slice(&self.length_of_implementation_use.to_le_bytes());
        let n = self.free_space_table.len();
        for (i, v) in self.free_space_table.iter().enumerate() {
            let o = Self::FIXED_SIZE + i * 4;
            bytes[o..o + 4].copy_from_slice(&v.to_le_bytes());
        }
        for (i, v) in self.size_table.iter().enumerate() {
            let o = Self::FIXED_SIZE + n * 4 + i * 4;
            bytes[o..o + 4].copy_from_slice(&v.to_le_bytes());
        }
        let iu_start = Self::FIXED_SIZE + n * 8;
        bytes[iu_start..iu_start + self.implementation_use.len()]
            .copy_from_slice(&self.implementation_use);
    }

    pub fn is_open(&self) -> bool {
        self.integrity_type == LVID_INTEGRITY_TYPE_OPEN
    }

    /// Next Unique ID to hand out, from the Logical Volume Header Descriptor.
    pub fn next_unique_id(&self) -> u64 {
        u64::from_le_bytes(self.logical_volume_contents_use[0..8].try_into().unwrap())
    }
    pub fn set_next_unique_id(&mut self, id: u64) {
        self.logical_volume_contents_use[0..8].copy_from_slice(&id.to_le_bytes());
    }

    pub fn imp_use(&self) -> Option<LvidImplementationUse> {
        if self.implementation_use.len() < LvidImplementationUse::SIZE {
            return None;
        }
        Some(LvidImplementationUse::read(&self.implementation_use))
    }
    pub fn set_imp_use(&mut self, iu: &LvidImplementationUse) {
        if self.implementation_use.len() >= LvidImplementationUse::SIZE {
            iu.write(&mut self.implementation_use);
        }
    }
}

/// Implementation Use for the LVID, UDF 2.2.6.4.
#[derive(Clone, Debug, Default)]
pub struct LvidImplementationUse {
    pub implementation_id: EntityID,
    pub number_of_files: u32,
    pub number_of_directories: u32,
    pub min_udf_read_revision: u16,
    pub min_udf_write_revision: u16,
    pub max_udf_write_revision: u16,
}
impl LvidImplementationUse {
    pub const SIZE: usize = 46;
    pub fn read(bytes: &[u8]) -> Self {
        Self {
            implementation_id: EntityID::read(&bytes[0..32]),
            number_of_files: u32::from_le_bytes([bytes[32], bytes[33], bytes[34], bytes[35]]),
            number_of_directories: u32::from_le_bytes([bytes[36], bytes[37], bytes[38], bytes[39]]),
            min_udf_read_revision: u16::from_le_bytes([bytes[40], bytes[41]]),
            min_udf_write_revision: u16::from_le_bytes([bytes[42], bytes[43]]),
            max_udf_write_revision: u16::from_le_bytes([bytes[44], bytes[45]]),
        }
    }
    pub fn write(&self, bytes: &mut [u8]) {
        self.implementation_id.write(&mut bytes[0..32]);
        bytes[32..36].copy_from_slice(&self.number_of_files.to_le_bytes());
        bytes[36..40].copy_from_slice(&self.number_of_directories.to_le_bytes());
        bytes[40..42].copy_from_slice(&self.min_udf_read_revision.to_le_bytes());
        bytes[42..44].copy_from_slice(&self.min_udf_write_revision.to_le_bytes());
        bytes[44..46].copy_from_slice(&self.max_udf_write_revision.to_le_bytes());
    }
}

/// UDF 2.3.2 File Set Descriptor aka ECMA-167 4/14.1
/// http://www.osta.org/specs/pdf/udf260.pdf#page=54
#[derive(Debug, Clone)]
#[repr(C)]
pub struct FileSetDescriptor {
    pub tag: DescriptorTag,
    pub recording_date_and_time: Timestamp,
    pub interchange_level: u16,
    pub maximum_interchange_level: u16,
    pub character_set_list: u32,
    pub maximum_character_set_list: u32,
    pub file_set_number: u32,
    pub file_set_descriptor_number: u32,
    pub logical_volume_identifier_character_set: CharSpec,
    pub logical_volume_identifier: Dstring<128>,
    pub file_set_character_set: CharSpec,
    pub file_set_identifier: Dstring<32>,
    pub copyright_file_identifier: Dstring<32>,
    pub abstract_file_identifier: Dstring<32>,
    pub root_directory_icb: LongAd,
    pub domain_identifier: EntityID,
    pub next_extent: LongAd,
    pub system_stream_directory_icb: LongAd,
    pub reserved: [u8; 32],
}
impl Default for FileSetDescriptor {
    fn default() -> Self {
        Self {
            tag: Default::default(),
            recording_date_and_time: Default::default(),
            interchange_level: 0,
            maximum_interchange_level: 0,
            character_set_list: 0,
            maximum_character_set_list: 0,
            file_set_number: 0,
            file_set_descriptor_number: 0,
            logical_volume_identifier_character_set: Default::default(),
            logical_volume_identifier: Dstring::default(),
            file_set_character_set: Default::default(),
            file_set_identifier: Dstring::default(),
            copyright_file_identifier: Dstring::default(),
            abstract_file_identifier: Dstring::default(),
            root_directory_icb: Default::default(),
            domain_identifier: Default::default(),
            next_extent: Default::default(),
            system_stream_directory_icb: Default::default(),
            reserved: [0; 32],
        }
    }
}
impl FileSetDescriptor {
    pub const TAG_IDENTIFIER: u16 = 256;
    pub fn size() -> usize {
        512
    }
    pub fn read(bytes: &[u8]) -> Self {
        let mut r = Self::default();
        r.tag = DescriptorTag::read(&bytes[0..16]);
        r.recording_date_and_time = Timestamp::read(&bytes[16..28]);
        r.interchange_level = u16::from_le_bytes([bytes[28], bytes[29]]);
        r.maximum_interchange_level = u16::from_le_bytes([bytes[30], bytes[31]]);
        r.character_set_list = u32::from_le_bytes([bytes[32], bytes[33], bytes[34], bytes[35]]);
        r.maximum_character_set_list =
            u32::from_le_bytes([bytes[36], bytes[37], bytes[38], bytes[39]]);
        r.file_set_number = u32::from_le_bytes([bytes[40], bytes[41], bytes[42], bytes[43]]);
        r.file_set_descriptor_number =
            u32::from_le_bytes([bytes[44], bytes[45], bytes[46], bytes[47]]);
        r.logical_volume_identifier_character_set = CharSpec::read(&bytes[48..112]);
        r.logical_volume_identifier
            .0
            .copy_from_slice(&bytes[112..240]);
        r.file_set_character_set = CharSpec::read(&bytes[240..304]);
        r.file_set_identifier.0.copy_from_slice(&bytes[304..336]);
        r.copyright_file_identifier
            .0
            .copy_from_slice(&bytes[336..368]);
        r.abstract_file_identifier
            .0
            .copy_from_slice(&bytes[368..400]);
        r.root_directory_icb = LongAd::read(&bytes[400..416]);
        r.domain_identifier = EntityID::read(&bytes[416..448]);
        r.next_extent = LongAd::read(&bytes[448..464]);
        r.system_stream_directory_icb = LongAd::read(&bytes[464..480]);
        r.reserved.copy_from_slice(&bytes[480..512]);
        r
    }
    pub fn write(&self, bytes: &mut [u8]) {
        self.tag.write(&mut bytes[0..16]);
        self.recording_date_and_time.write(&mut bytes[16..28]);
        bytes[28..30].copy_from_slice(&self.interchange_level.to_le_bytes());
        bytes[30..32].copy_from_slice(&self.maximum_interchange_level.to_le_bytes());
        bytes[32..36].copy_from_slice(&self.character_set_list.to_le_bytes());
        bytes[36..40].copy_from_slice(&self.maximum_character_set_list.to_le_bytes());
        bytes[40..44].copy_from_slice(&self.file_set_number.to_le_bytes());
        bytes[44..48].copy_from_slice(&self.file_set_descriptor_number.to_le_bytes());
        self.logical_volume_identifier_character_set
            .write(&mut bytes[48..112]);
        bytes[112..240].copy_from_slice(&self.logical_volume_identifier.0);
        self.file_set_character_set.write(&mut bytes[240..304]);
        bytes[304..336].copy_from_slice(&self.file_set_identifier.0);
        bytes[336..368].copy_from_slice(&self.copyright_file_identifier.0);
        bytes[368..400].copy_from_slice(&self.abstract_file_identifier.0);
        self.root_directory_icb.write(&mut bytes[400..416]);
        self.domain_identifier.write(&mut bytes[416..448]);
        self.next_extent.write(&mut bytes[448..464]);
        self.system_stream_directory_icb.write(&mut bytes[464..480]);
        bytes[480..512].copy_from_slice(&self.reserved);
    }
}

/// UDF 2.2.12 Sparing Table. Carries its own descriptor tag with
/// identifier 0 and the `*UDF Sparing Table` entity.
#[derive(Debug, Clone, Default)]
pub struct SparingTable {
    pub tag: DescriptorTag,
    pub sparing_identifier: EntityID,
    pub reallocation_table_length: u16,
    pub sequence_number: u32,
    pub map_entries: Vec<SparingEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SparingEntry {
    pub original_location: u32,
    pub mapped_location: u32,
}

/// Original locations at or above this value terminate the table scan:
/// 0xFFFFFFF0 marks an available entry, 0xFFFFFFF1 a defective one.
pub const SPARING_LOCATION_TERMINATOR: u32 = 0xFFFF_FFF0;

impl SparingTable {
    pub const FIXED_SIZE: usize = 56;

    pub fn get_length(&self) -> usize {
        Self::FIXED_SIZE + self.map_entries.len() * 8
    }
    pub fn read(bytes: &[u8]) -> Self {
        let mut r = Self::default();
        r.tag = DescriptorTag::read(&bytes[0..16]);
        r.sparing_identifier = EntityID::read(&bytes[16..48]);
        r.reallocation_table_length = u16::from_le_bytes([bytes[48], bytes[49]]);
        r.sequence_number = u32::from_le_bytes([bytes[52], bytes[53], bytes[54], bytes[55]]);
        let n = (r.reallocation_table_length as usize)
            .min((bytes.len().saturating_sub(Self::FIXED_SIZE)) / 8);
        for i in 0..n {
            let o = Self::FIXED_SIZE + i * 8;
            r.map_entries.push(SparingEntry {
                original_location: u32::from_le_bytes([
                    bytes[o],
                    bytes[o + 1],
                    bytes[o + 2],
                    bytes[o + 3],
                ]),
                mapped_location: u32::from_le_bytes([
                    bytes[o + 4],
                    bytes[o + 5],
                    bytes[o + 6],
                    bytes[o + 7],
                ]),
            });
        }
        r
    }
    pub fn write(&self, bytes: &mut [u8]) {
        self.tag.write(&mut bytes[0..16]);
        self.sparing_identifier.write(&mut bytes[16..48]);
        bytes[48..50].copy_from_slice(&self.reallocation_table_length.to_le_bytes());
        bytes[50..52].fill(0);
        bytes[52..56].copy_from_slice(&self.sequence_number.to_le_bytes());
        for (i, e) in self.map_entries.iter().enumerate() {
            let o = Self::FIXED_SIZE + i * 8;
            bytes[o..o + 4].copy_from_slice(&e.original_location.to_le_bytes());
            bytes[o + 4..o + 8].copy_from_slice(&e.mapped_location.to_le_bytes());
        }
    }

    /// Packet-level remap lookup. Entries are ordered by original location;
    /// terminator entries stop the scan.
    pub fn lookup(&self, packet: u32) -> Option<u32> {
        for e in &self.map_entries {
            if e.original_location >= SPARING_LOCATION_TERMINATOR {
                break;
            }
            if e.original_location == packet {
                return Some(e.mapped_location);
            }
            if e.original_location > packet {
                break;
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_roundtrip() {
        let ts = Timestamp::from_unix(1_600_000_000, 0);
        assert_eq!(ts.year, 2020);
        assert_eq!(ts.month, 9);
        assert_eq!(ts.day, 13);
        assert_eq!(ts.to_unix(), Some(1_600_000_000));
    }

    #[test]
    fn test_timestamp_timezone() {
        // +02:00 shifts the civil fields but not the instant
        let ts = Timestamp::from_unix(1_600_000_000, 120);
        assert_eq!(ts.timezone_offset_minutes(), Some(120));
        assert_eq!(ts.to_unix(), Some(1_600_000_000));

        let ts = Timestamp::from_unix(1_600_000_000, -300);
        assert_eq!(ts.timezone_offset_minutes(), Some(-300));
        assert_eq!(ts.to_unix(), Some(1_600_000_000));
    }

    #[test]
    fn test_entity_matching() {
        let e = EntityID::udf_entity(UDF_ID_SPARING, 0x0201);
        assert!(e.matches(UDF_ID_SPARING));
        assert!(!e.matches(UDF_ID_VIRTUAL));
        assert_eq!(e.suffix_udf_revision(), 0x0201);
    }

    #[test]
    fn test_pvd_roundtrip() {
        let mut pvd = PrimaryVolumeDescriptor::default();
        pvd.tag.tag_identifier = PrimaryVolumeDescriptor::TAG_IDENTIFIER;
        pvd.volume_identifier = Dstring::from_str("TEST_VOLUME");
        pvd.volume_descriptor_sequence_number = 3;
        let mut buf = vec![0u8; 512];
        pvd.write(&mut buf);
        let back = PrimaryVolumeDescriptor::read(&buf);
        assert_eq!(back.volume_identifier.to_string(), "TEST_VOLUME");
        assert_eq!(back.volume_descriptor_sequence_number, 3);
    }

    #[test]
    fn test_lvd_with_partition_maps() {
        let mut lvd = LogicalVolumeDescriptor::default();
        lvd.tag.tag_identifier = LogicalVolumeDescriptor::TAG_IDENTIFIER;
        lvd.logical_block_size = 2048;
        lvd.number_of_partition_maps = 2;

        let mut table = vec![0u8; 6 + 64];
        PartitionMap::Type1(Type1PartitionMap {
            header: GenericPartitionMapHeader {
                partition_map_type: 1,
                partition_map_length: 6,
            },
            volume_seq_number: 1,
            partition_number: 0,
        })
        .write(&mut table[0..6]);
        PartitionMap::Sparable(SparablePartitionMap {
            header: GenericPartitionMapHeader {
                partition_map_type: 2,
                partition_map_length: 64,
            },
            partition_type_identifier: EntityID::udf_entity(UDF_ID_SPARABLE, 0x0150),
            volume_seq_number: 1,
            partition_number: 0,
            packet_length: 32,
            num_sparing_tables: 2,
            size_sparing_table: 2048,
            loc_sparing_table: [100, 200, 0, 0],
        })
        .write(&mut table[6..70]);
        lvd.map_table_length = table.len() as u32;
        lvd.partition_map_table = table;

        let mut buf = vec![0u8; lvd.get_length()];
        lvd.write(&mut buf);
        let back = LogicalVolumeDescriptor::read(&buf);
        let maps = back.read_partition_maps().unwrap();
        assert_eq!(maps.len(), 2);
        assert!(matches!(maps[0], PartitionMap::Type1(_)));
        match &maps[1] {
            PartitionMap::Sparable(s) => {
                assert_eq!(s.packet_length, 32);
                assert_eq!(s.loc_sparing_table[1], 200);
            }
            other => panic!("expected sparable map, got {:?}", other),
        }
    }

    #[test]
    fn test_lvid_tables_roundtrip() {
        let mut lvid = LogicalVolumeIntegrityDescriptor::default();
        lvid.tag.tag_identifier = LogicalVolumeIntegrityDescriptor::TAG_IDENTIFIER;
        lvid.integrity_type = LVID_INTEGRITY_TYPE_CLOSE;
        lvid.number_of_partitions = 1;
        lvid.free_space_table = vec![9900];
        lvid.size_table = vec![10000];
        lvid.set_next_unique_id(43);
        let mut iu = vec![0u8; LvidImplementationUse::SIZE];
        LvidImplementationUse {
            number_of_files: 3,
            number_of_directories: 2,
            min_udf_read_revision: 0x0201,
            min_udf_write_revision: 0x0201,
            max_udf_write_revision: 0x0201,
            ..Default::default()
        }
        .write(&mut iu);
        lvid.length_of_implementation_use = iu.len() as u32;
        lvid.implementation_use = iu;

        let mut buf = vec![0u8; lvid.get_length()];
        lvid.write(&mut buf);
        let back = LogicalVolumeIntegrityDescriptor::read(&buf);
        assert_eq!(back.free_space_table, vec![9900]);
        assert_eq!(back.size_table, vec![10000]);
        assert_eq!(back.next_unique_id(), 43);
        assert_eq!(back.imp_use().unwrap().number_of_files, 3);
        assert!(!back.is_open());
    }

    #[test]
    fn test_sparing_table_lookup() {
        let mut st = SparingTable::default();
        st.map_entries = vec![
            SparingEntry {
                original_location: 64,
                mapped_location: 320,
            },
            SparingEntry {
                original_location: SPARING_LOCATION_TERMINATOR,
                mapped_location: 0,
            },
            SparingEntry {
                original_location: 96,
                mapped_location: 999,
            },
        ];
        st.reallocation_table_length = st.map_entries.len() as u16;
        assert_eq!(st.lookup(64), Some(320));
        assert_eq!(st.lookup(0), None);
        // entries after the terminator must not be consulted
        assert_eq!(st.lookup(96), None);
    }
}
