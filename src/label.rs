//! Volume label and identifier handling: extraction, mutation across all
//! descriptors that carry a copy, the volume-set UUID and the serial
//! number Windows derives from the File Set Descriptor.

use log::warn;

use crate::crc::seal_tag;
use crate::disc::{Disc, MAIN_VDS, RESERVE_VDS};
use crate::error::{Result, UdfError};
use crate::fix::FixOptions;
use crate::io::BlockIo;
use crate::osta;
use crate::udf::{Dstring, FileSetDescriptor};
use crate::vds::{slot_bytes, SLOT_IUVD, SLOT_LVD, SLOT_PVD};

/// The volume label, preferring the Logical Volume identifier and falling
/// back to the File Set identifier.
pub fn extract_label(disc: &Disc) -> String {
    if let Some(lvd) = disc.lvd_any() {
        let label = lvd.logical_volume_identifier.to_string();
        if !label.is_empty() {
            return label;
        }
    }
    if let Some(fsd) = &disc.fsd {
        return fsd.logical_volume_identifier.to_string();
    }
    String::new()
}

/// Serialize one slotted descriptor, reseal its tag, refresh the copy in
/// the extent map's descriptor store and write it back to its recorded
/// location.
fn rewrite_slot(
    disc: &mut Disc,
    io: &mut dyn BlockIo,
    opts: &FixOptions,
    vds: usize,
    slot: usize,
) -> Result<()> {
    let info = disc.seq.side(vds)[slot];
    if info.tag_ident == 0 {
        return Ok(());
    }
    let Some(mut bytes) = slot_bytes(disc, vds, slot) else {
        return Ok(());
    };
    seal_tag(&mut bytes);

    let ext = disc.map.find_extent(info.location);
    let ext_start = disc.map.get(ext).start;
    if info.location >= ext_start {
        let offset = info.location - ext_start;
        if let Some(desc) = disc.map.find_desc_mut(ext, offset) {
            if desc.ident == info.tag_ident {
                desc.data = vec![bytes];
                desc.length = desc.data[0].len() as u64;
                return crate::fix::write_desc(disc, io, opts, ext, info.tag_ident, offset);
            }
        }
    }
    // descriptor was not captured in the store; write it directly
    if !opts.no_write {
        io.write_at(disc.byte_offset(info.location), &bytes)?;
    }
    Ok(())
}

/// Write the Main and Reserve copies of a slot with a sync fence between
/// them, so a crash cannot leave both halves half-written.
fn rewrite_slot_pair(
    disc: &mut Disc,
    io: &mut dyn BlockIo,
    opts: &FixOptions,
    slot: usize,
) -> Result<()> {
    rewrite_slot(disc, io, opts, MAIN_VDS, slot)?;
    if !opts.no_write {
        io.sync()?;
    }
    rewrite_slot(disc, io, opts, RESERVE_VDS, slot)?;
    if !opts.no_write {
        io.sync()?;
    }
    Ok(())
}

/// Set the Logical Volume identifier everywhere it is recorded: both LVD
/// copies, the IUVD's LV Information, and the File Set Descriptor.
pub fn set_logical_volume_identifier(
    disc: &mut Disc,
    io: &mut dyn BlockIo,
    opts: &FixOptions,
    label: &str,
) -> Result<()> {
    // validate the encoding up front so nothing is half-written
    osta::encode_dstring(label, 128).map_err(|e| {
        warn!("label does not fit: {}", e);
        UdfError::BufferTooSmall
    })?;
    let encoded: Dstring<128> = Dstring::from_str(label);

    for vds in [MAIN_VDS, RESERVE_VDS] {
        if let Some(lvd) = &mut disc.lvd[vds] {
            lvd.logical_volume_identifier = encoded.clone();
        }
        if let Some(iuvd) = &mut disc.iuvd[vds] {
            let mut info = iuvd.lv_information();
            info.logical_volume_identifier = encoded.clone();
            iuvd.set_lv_information(&info);
        }
    }
    rewrite_slot_pair(disc, io, opts, SLOT_LVD)?;
    rewrite_slot_pair(disc, io, opts, SLOT_IUVD)?;

    let mut bytes = vec![0u8; FileSetDescriptor::size()];
    let have_fsd = if let Some(fsd) = disc.fsd.as_mut() {
        fsd.logical_volume_identifier = encoded;
        fsd.write(&mut bytes);
        true
    } else {
        false
    };
    if have_fsd {
        seal_tag(&mut bytes);
        disc.fsd = Some(FileSetDescriptor::read(&bytes));

        let location = disc.fsd_location;
        let ext = disc.map.find_extent(location);
        let ext_start = disc.map.get(ext).start;
        let mut wrote = false;
        if location >= ext_start {
            let offset = location - ext_start;
            if let Some(desc) = disc.map.find_desc_mut(ext, offset) {
                if desc.ident == FileSetDescriptor::TAG_IDENTIFIER {
                    desc.data = vec![bytes.clone()];
                    desc.length = bytes.len() as u64;
                    crate::fix::write_desc(
                        disc,
                        io,
                        opts,
                        ext,
                        FileSetDescriptor::TAG_IDENTIFIER,
                        offset,
                    )?;
                    wrote = true;
                }
            }
        }
        if !wrote && !opts.no_write {
            io.write_at(disc.byte_offset(location), &bytes)?;
        }
        if !opts.no_write {
            io.sync()?;
        }
    }
    Ok(())
}

/// Set the Volume identifier recorded in both Primary Volume Descriptors.
pub fn set_volume_identifier(
    disc: &mut Disc,
    io: &mut dyn BlockIo,
    opts: &FixOptions,
    name: &str,
) -> Result<()> {
    osta::encode_dstring(name, 32).map_err(|e| {
        warn!("volume identifier does not fit: {}", e);
        UdfError::BufferTooSmall
    })?;
    let encoded: Dstring<32> = Dstring::from_str(name);

    for vds in [MAIN_VDS, RESERVE_VDS] {
        if let Some(pvd) = &mut disc.pvd[vds] {
            pvd.volume_identifier = encoded.clone();
        }
    }
    rewrite_slot_pair(disc, io, opts, SLOT_PVD)
}

/// The serial number Windows computes over the File Set Descriptor:
/// each serial byte is the modulo-256 sum of one byte column.
pub fn compute_windows_serial_number(disc: &Disc) -> Option<u32> {
    let fsd = disc.fsd.as_ref()?;
    let mut bytes = vec![0u8; FileSetDescriptor::size()];
    fsd.write(&mut bytes);

    let mut columns = [0u8; 4];
    for (i, &b) in bytes.iter().enumerate() {
        columns[i % 4] = columns[i % 4].wrapping_add(b);
    }
    Some(u32::from_le_bytes(columns))
}

/// Derive the 16 hex digit UUID prefix from the Volume Set identifier:
/// the first 8 characters must be hex digits, otherwise the raw bytes
/// are hex-encoded instead.
pub fn volume_set_uuid(disc: &Disc) -> Option<String> {
    let pvd = disc.pvd_any()?;
    let decoded = pvd.volume_set_identifier.to_string();
    let chars: Vec<char> = decoded.chars().collect();
    if chars.len() < 8 {
        return None;
    }

    let hex_prefix = chars.iter().take(16).take_while(|c| c.is_ascii_hexdigit()).count();
    let bytes: Vec<u8> = decoded.bytes().collect();

    if hex_prefix < 8 {
        Some(bytes[..8].iter().map(|b| format!("{:02x}", b)).collect())
    } else if hex_prefix < 16 {
        let head: String = chars[..8].iter().collect::<String>().to_lowercase();
        let tail: String = bytes[8..12.min(bytes.len())]
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        Some(format!("{}{}", head, tail))
    } else {
        Some(chars[..16].iter().collect::<String>().to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disc::{read_disc, ReadOptions};
    use crate::fix::RepairPolicy;
    use crate::testimg::TestImageBuilder;

    #[test]
    fn test_extract_label() {
        let img = TestImageBuilder::new().build();
        let mut io = img.into_io();
        let disc = read_disc(&mut io, &ReadOptions::default()).unwrap();
        assert_eq!(extract_label(&disc), "LinuxUDF");
    }

    #[test]
    fn test_set_label_updates_all_copies() {
        let img = TestImageBuilder::new().build();
        let mut io = img.into_io();
        let mut disc = read_disc(&mut io, &ReadOptions::default()).unwrap();
        let opts = FixOptions {
            policy: RepairPolicy::AutoFix,
            ..Default::default()
        };
        set_logical_volume_identifier(&mut disc, &mut io, &opts, "NewLabel").unwrap();

        // everything must still verify after the rewrite
        let disc2 = read_disc(&mut io, &ReadOptions::default()).unwrap();
        assert_eq!(extract_label(&disc2), "NewLabel");
        assert!(disc2.seq.main[SLOT_LVD].error.is_empty());
        assert!(disc2.seq.reserve[SLOT_LVD].error.is_empty());
        assert_eq!(
            disc2
                .fsd
                .as_ref()
                .unwrap()
                .logical_volume_identifier
                .to_string(),
            "NewLabel"
        );
        let iuvd = disc2.iuvd_any().unwrap();
        assert_eq!(
            iuvd.lv_information().logical_volume_identifier.to_string(),
            "NewLabel"
        );
    }

    #[test]
    fn test_label_too_long_rejected() {
        let img = TestImageBuilder::new().build();
        let before = img.clone_data();
        let mut io = img.into_io();
        let mut disc = read_disc(&mut io, &ReadOptions::default()).unwrap();
        let opts = FixOptions {
            policy: RepairPolicy::AutoFix,
            ..Default::default()
        };
        let long: String = std::iter::repeat('x').take(200).collect();
        assert!(set_logical_volume_identifier(&mut disc, &mut io, &opts, &long).is_err());
        assert_eq!(io.data, before);
    }

    #[test]
    fn test_windows_serial_is_stable() {
        let img = TestImageBuilder::new().build();
        let mut io = img.into_io();
        let disc = read_disc(&mut io, &ReadOptions::default()).unwrap();
        let a = compute_windows_serial_number(&disc).unwrap();
        let b = compute_windows_serial_number(&disc).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, 0);
    }

    #[test]
    fn test_volume_set_uuid_hex_prefix() {
        let img = TestImageBuilder::new().build();
        let mut io = img.into_io();
        let disc = read_disc(&mut io, &ReadOptions::default()).unwrap();
        // the test image records a hex volume set identifier prefix
        let uuid = volume_set_uuid(&disc).unwrap();
        assert_eq!(uuid.len(), 16);
        assert!(uuid.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
