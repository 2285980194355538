use crc::{Algorithm, Crc};

use crate::error::ErrorFlags;
use crate::udf::DescriptorTag;

// ECMA-167 CRC-16 algorithm parameters
// ECMA-167 7.2.6 Descriptor CRC
// https://ecma-international.org/wp-content/uploads/ECMA-167_3rd_edition_june_1997.pdf#page=44
// UDF 6.5 CRC Calculation
// http://www.osta.org/specs/pdf/udf260.pdf#page=118
const UDF_CRC_ALGO: Algorithm<u16> = Algorithm {
    width: 16,
    // x^16 + x^12 + x^5 + 1
    poly: 0x1021,
    init: 0x0000,
    refin: false,
    refout: false,
    xorout: 0x0000,
    check: 0x29b1,
    residue: 0x0000,
};

const UDF_CRC: Crc<u16> = Crc::<u16>::new(&UDF_CRC_ALGO);

/// Calculate CRC-16 for a UDF descriptor body aka CRC-16/CCITT_FALSE.
pub fn cksum(data: &[u8]) -> u16 {
    UDF_CRC.checksum(data)
}

/// Sum modulo 256 of bytes 0-3 and 5-15 of the tag.
/// ECMA-167 7.2.3 Tag Checksum
/// https://ecma-international.org/wp-content/uploads/ECMA-167_3rd_edition_june_1997.pdf#page=43
pub fn tag_checksum(tag_bytes: &[u8]) -> u8 {
    tag_bytes[0..4]
        .iter()
        .chain(&tag_bytes[5..16])
        .fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Verify a serialized descriptor against its own tag.
///
/// `expected_location` is the tag location the descriptor was read from,
/// expressed in partition-relative blocks for partition-space descriptors
/// and in absolute blocks otherwise. `expected_ident` of `None` accepts
/// any identifier. The returned flags are empty when the descriptor is
/// well formed.
pub fn verify_tag(buf: &[u8], expected_ident: Option<u16>, expected_location: u32) -> ErrorFlags {
    let mut flags = ErrorFlags::empty();
    if buf.len() < DescriptorTag::size() {
        return ErrorFlags::WRONG_DESC;
    }
    let tag = DescriptorTag::read(&buf[0..16]);

    if tag.tag_checksum != tag_checksum(&buf[0..16]) {
        flags |= ErrorFlags::CHECKSUM;
    }
    if let Some(ident) = expected_ident {
        if tag.tag_identifier != ident {
            flags |= ErrorFlags::WRONG_DESC;
        }
    }
    if tag.tag_location != expected_location {
        flags |= ErrorFlags::POSITION;
    }

    // descCRCLength may legally be shorter than the descriptor itself.
    let start = DescriptorTag::size();
    let end = (start + tag.descriptor_crc_length as usize).min(buf.len());
    if tag.descriptor_crc_length > 0 && cksum(&buf[start..end]) != tag.descriptor_crc {
        flags |= ErrorFlags::CRC;
    }

    flags
}

/// Recompute the descriptor CRC (over `descriptor_crc_length` bytes past the
/// tag) and the tag checksum of a serialized descriptor in place. Every
/// mutated descriptor must pass through here before it is written back.
pub fn seal_tag(buf: &mut [u8]) {
    let crc_len = u16::from_le_bytes([buf[10], buf[11]]) as usize;
    let start = DescriptorTag::size();
    let end = (start + crc_len).min(buf.len());
    let crc = cksum(&buf[start..end]);
    buf[8..10].copy_from_slice(&crc.to_le_bytes());
    buf[4] = tag_checksum(&buf[0..16]);
}

/// Rewrite the tag location of a serialized descriptor and re-seal it.
pub fn relocate_tag(buf: &mut [u8], location: u32) {
    buf[12..16].copy_from_slice(&location.to_le_bytes());
    seal_tag(buf);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_example() {
        // example from https://ecma-international.org/wp-content/uploads/ECMA-167_3rd_edition_june_1997.pdf#page=46
        // "As an example, the CRC of the three bytes #70 #6A #77 is #3299"
        let crc = cksum(&[0x70, 0x6a, 0x77]);
        assert_eq!(crc, 0x3299);
    }

    #[test]
    fn test_seal_and_verify_roundtrip() {
        let mut buf = vec![0u8; 64];
        let mut tag = DescriptorTag::default();
        tag.tag_identifier = 8;
        tag.descriptor_version = 3;
        tag.descriptor_crc_length = 48;
        tag.tag_location = 77;
        tag.write(&mut buf[0..16]);
        buf[20] = 0xAB;
        seal_tag(&mut buf);
        assert_eq!(verify_tag(&buf, Some(8), 77), ErrorFlags::empty());

        // a single corrupted body byte must trip the CRC check
        buf[20] ^= 1;
        assert_eq!(verify_tag(&buf, Some(8), 77), ErrorFlags::CRC);
    }

    #[test]
    fn test_verify_position_and_ident() {
        let mut buf = vec![0u8; 32];
        let mut tag = DescriptorTag::default();
        tag.tag_identifier = 2;
        tag.descriptor_crc_length = 16;
        tag.tag_location = 256;
        tag.write(&mut buf[0..16]);
        seal_tag(&mut buf);

        assert_eq!(verify_tag(&buf, Some(2), 256), ErrorFlags::empty());
        assert_eq!(verify_tag(&buf, Some(2), 257), ErrorFlags::POSITION);
        assert_eq!(verify_tag(&buf, Some(1), 256), ErrorFlags::WRONG_DESC);
    }

    #[test]
    fn test_relocate_keeps_descriptor_valid() {
        let mut buf = vec![0u8; 32];
        let mut tag = DescriptorTag::default();
        tag.tag_identifier = 2;
        tag.descriptor_crc_length = 16;
        tag.tag_location = 256;
        tag.write(&mut buf[0..16]);
        seal_tag(&mut buf);

        relocate_tag(&mut buf, 9999);
        assert_eq!(verify_tag(&buf, Some(2), 9999), ErrorFlags::empty());
    }
}
