//! Virtual Allocation Table loader for write-once media.
//!
//! The VAT is an ordinary file whose contents map virtual block numbers to
//! physical blocks. Its file entry sits in the last recorded session; the
//! loader searches backwards from the last recorded block (or the block
//! named by the caller) for a file entry of VAT type, then materializes
//! the table in either its 1.50 (trailing identifier) or 2.00 (leading
//! header) form.

use log::{error, warn};

use crate::disc::{Disc, ReadOptions};
use crate::icb::{
    AllocationDescriptorForm, AnyFileEntry, ExtendedAttrHeaderDescriptor, ImpUseExtendedAttr,
    LVExtensionEA, VirtualAllocationTable15, VirtualAllocationTable20, EXTATTR_TYPE_IMP_USE,
    FILE_TYPE_RAW_VAT15, FILE_TYPE_RAW_VAT20,
};
use crate::io::{read_checked, BlockIo};
use crate::udf::{
    LongAd, PartitionMap, ShortAllocationDescriptor, LVID_INTEGRITY_TYPE_CLOSE,
    UDF_ID_ALLOC, UDF_ID_VAT_LVEXTENSION,
};

/// How many blocks before the last recorded block are searched for the
/// VAT file entry.
const VAT_SEARCH_WINDOW: u32 = 32;

pub fn read_vat(io: &mut dyn BlockIo, disc: &mut Disc, opts: &ReadOptions) {
    let Some((_, PartitionMap::Virtual(vpm))) = disc.virtual_partition_map() else {
        if opts.vat_block.is_some() {
            error!("Virtual Partition Map not found, but a VAT block was specified");
        }
        return;
    };

    disc.raise_write_revision(vpm.partition_type_identifier.suffix_udf_revision());

    let Some(pd) = disc.find_partition_descriptor(vpm.partition_number) else {
        error!("Virtual Partition Map found, but corresponding Partition Descriptor not found");
        return;
    };
    let hosting_start = pd.partition_starting_location;
    let bs = disc.block_size;

    let vat_block = opts.vat_block.unwrap_or(disc.last_block);

    let low = vat_block.saturating_sub(VAT_SEARCH_WINDOW - 1).max(1);
    for i in (low..=vat_block + 3).rev() {
        let mut block = vec![0u8; bs as usize];
        if read_checked(io, disc.byte_offset(i), &mut block).is_err() {
            continue;
        }
        let Some(entry) = AnyFileEntry::parse(&block) else {
            continue;
        };
        let raw_type = entry.icb_tag().file_type;
        if raw_type != FILE_TYPE_RAW_VAT15 && raw_type != FILE_TYPE_RAW_VAT20 {
            continue;
        }
        if hosting_start + entry.tag().tag_location != i {
            warn!(
                "Found Virtual Allocation Table at block {}, but its descriptor claims partition offset {}, maybe wrong --startblock or --lastblock? ignoring it",
                i,
                entry.tag().tag_location
            );
            continue;
        }

        let unique_id = entry.unique_id();
        let ad_length = entry.length_of_allocation_descriptors() as usize;
        if ad_length == 0 {
            warn!("Information Control Block for Virtual Allocation Table is empty");
            break;
        }
        if entry.get_length() > bs as usize {
            warn!("Information Control Block for Virtual Allocation Table is larger than block size");
            break;
        }

        // Materialize the VAT contents.
        let vat_bytes: Vec<u8> = match entry.icb_tag().allocation_descriptor_form() {
            AllocationDescriptorForm::InIcb => {
                let info = entry.information_length() as usize;
                if info > ad_length {
                    warn!("Virtual Allocation Table inside of Information Control Block is larger than allocated block");
                    break;
                }
                entry.allocation_descriptors()[..info].to_vec()
            }
            form @ (AllocationDescriptorForm::Short | AllocationDescriptorForm::Long) => {
                match read_vat_extents(io, disc, &entry, form, vpm.partition_number, hosting_start)
                {
                    Some(bytes) => bytes,
                    None => break,
                }
            }
            AllocationDescriptorForm::Extended => {
                error!("Information Control Block for Virtual Allocation Table has unknown Allocation Descriptors type");
                break;
            }
        };

        let applied = if raw_type == FILE_TYPE_RAW_VAT15 {
            apply_vat15(disc, &entry, &vat_bytes, unique_id)
        } else {
            apply_vat20(disc, &vat_bytes)
        };
        if !applied {
            break;
        }

        disc.vat_block = Some(i);

        // A valid VAT implies the volume is effectively closed.
        if let Some(lvid) = &mut disc.lvid {
            lvid.integrity_type = LVID_INTEGRITY_TYPE_CLOSE;
        }

        if i != vat_block {
            warn!(
                "Note: Found Virtual Allocation Table at block {} (expected at block {})",
                i, vat_block
            );
        }
        return;
    }

    error!("Virtual Allocation Table not found, maybe wrong --vatblock?");
}

/// Read the VAT contents scattered over short or long allocation
/// descriptors onto one contiguous buffer.
fn read_vat_extents(
    io: &mut dyn BlockIo,
    disc: &Disc,
    entry: &AnyFileEntry,
    form: AllocationDescriptorForm,
    virtual_partition: u16,
    hosting_start: u32,
) -> Option<Vec<u8>> {
    let bs = disc.block_size;
    let descs = entry.allocation_descriptors();

    // Prefer a non-virtual partition as the extent host when one exists.
    let mut ext_start = hosting_start;
    let mut ext_partition = virtual_partition;
    for pd in [
        disc.pd[0].as_ref(),
        disc.pd[1].as_ref(),
        disc.pd2[0].as_ref(),
        disc.pd2[1].as_ref(),
    ]
    .into_iter()
    .flatten()
    {
        if pd.partition_number != virtual_partition {
            ext_start = pd.partition_starting_location;
            ext_partition = pd.partition_number;
            break;
        }
    }

    struct VatExtent {
        length: u32,
        position: u32,
    }
    let mut extents = Vec::new();
    let mut total: u64 = 0;
    match form {
        AllocationDescriptorForm::Short => {
            for chunk in descs.chunks_exact(8) {
                let ad = ShortAllocationDescriptor::read(chunk);
                if ad.extent_length_bytes() == 0 {
                    continue;
                }
                total += ad.extent_length_bytes() as u64;
                extents.push(VatExtent {
                    length: ad.extent_length_bytes(),
                    position: ad.extent_location,
                });
            }
        }
        AllocationDescriptorForm::Long => {
            for chunk in descs.chunks_exact(16) {
                let ad = LongAd::read(chunk);
                if ad.extent_length_bytes() == 0 {
                    continue;
                }
                if ad.extent_location.partition_reference_number != ext_partition {
                    error!("Virtual Allocation Table is stored on different partition");
                    return None;
                }
                total += ad.extent_length_bytes() as u64;
                extents.push(VatExtent {
                    length: ad.extent_length_bytes(),
                    position: ad.extent_location.logical_block_number,
                });
            }
        }
        _ => return None,
    }

    if total == 0 {
        warn!("Virtual Allocation Table is empty");
        return None;
    }
    if total > 256 * bs as u64 {
        warn!("Virtual Allocation Table is too big");
        return None;
    }

    let mut vat = vec![0u8; total as usize];
    let mut offset = 0usize;
    for ext in extents {
        let pos = disc.byte_offset(ext_start + ext.position);
        if read_checked(io, pos, &mut vat[offset..offset + ext.length as usize]).is_err() {
            error!("Virtual Allocation Table is damaged");
            return None;
        }
        offset += ext.length as usize;
    }
    Some(vat)
}

fn vat_entries(bytes: &[u8], start: usize, count: usize) -> Vec<u32> {
    bytes[start..start + count * 4]
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// UDF 1.50 VAT: entries first, a 36 byte trailer with the
/// `*UDF Virtual Alloc Tbl` identifier last. The optional Logical Volume
/// Extension EA carries counts and the volume identifier, verified by a
/// Unique ID match against the VAT file entry.
fn apply_vat15(
    disc: &mut Disc,
    entry: &AnyFileEntry,
    vat_bytes: &[u8],
    unique_id: u64,
) -> bool {
    if vat_bytes.len() < VirtualAllocationTable15::SIZE {
        warn!("Virtual Allocation Table is too small");
        return false;
    }
    let trailer_offset = ((vat_bytes.len() - 36) / 4) * 4;
    let trailer = VirtualAllocationTable15::read(&vat_bytes[trailer_offset..trailer_offset + 36]);
    if !trailer.vat_identifier.matches(UDF_ID_ALLOC) {
        warn!("Virtual Allocation Table is damaged");
        return false;
    }
    disc.raise_write_revision(trailer.vat_identifier.suffix_udf_revision());

    let count = (vat_bytes.len() - 36) / 4;
    disc.vat = Some(vat_entries(vat_bytes, 0, count));

    // LV Extension implementation-use extended attribute
    let ea = entry.extended_attributes();
    if !ea.is_empty() {
        apply_lv_extension_ea(disc, ea, unique_id);
    }
    true
}

fn apply_lv_extension_ea(disc: &mut Disc, ea: &[u8], unique_id: u64) {
    if ea.len() < ExtendedAttrHeaderDescriptor::size() {
        warn!("Extended Attributes for Virtual Allocation Table are damaged");
        return;
    }
    let hdr = ExtendedAttrHeaderDescriptor::read(ea);
    // UDF 3.3.4.1: a missing attribute class points past the EA space
    let mut attr_offset = hdr.implementation_attributes_location as usize;
    while attr_offset + ImpUseExtendedAttr::SIZE <= ea.len() {
        let attr = ImpUseExtendedAttr::read(&ea[attr_offset..]);
        let attr_length = attr.attribute_length as usize;
        if attr_length == 0 {
            break;
        }
        if attr_offset + attr_length > ea.len()
            || ImpUseExtendedAttr::SIZE + attr.implementation_use_length as usize > attr_length
        {
            warn!("Extended Attributes for Virtual Allocation Table are damaged");
            break;
        }
        if attr.attribute_type == EXTATTR_TYPE_IMP_USE
            && attr
                .implementation_identifier
                .matches(UDF_ID_VAT_LVEXTENSION)
        {
            disc.raise_write_revision(attr.implementation_identifier.suffix_udf_revision());
            if attr_length < ImpUseExtendedAttr::SIZE + LVExtensionEA::SIZE
                || (attr.implementation_use_length as usize) < LVExtensionEA::SIZE
            {
                warn!("Logical Volume Extended Information for Virtual Allocation Table is damaged");
                break;
            }
            let lv = LVExtensionEA::read(&ea[attr_offset + ImpUseExtendedAttr::SIZE..]);
            if lv.verification_id != unique_id {
                warn!("Logical Volume Extended Information for Virtual Allocation Table is damaged");
            } else {
                for lvd in disc.lvd.iter_mut().flatten() {
                    lvd.logical_volume_identifier.0 = lv.logical_volume_identifier;
                }
                if disc.lvid.is_some() {
                    disc.num_files = lv.number_of_files;
                    disc.num_dirs = lv.number_of_directories;
                }
                break;
            }
        }
        attr_offset += attr_length;
    }
}

/// UDF 2.00 VAT: header first, entries after `length_of_header`.
fn apply_vat20(disc: &mut Disc, vat_bytes: &[u8]) -> bool {
    if vat_bytes.len() < VirtualAllocationTable20::SIZE {
        warn!("Virtual Allocation Table is damaged");
        return false;
    }
    let vat20 = VirtualAllocationTable20::read(vat_bytes);
    let header_len = vat20.length_of_header as usize;
    if header_len < VirtualAllocationTable20::SIZE
        || header_len
            != VirtualAllocationTable20::SIZE + vat20.length_of_implementation_use as usize
        || header_len > vat_bytes.len()
    {
        warn!("Virtual Allocation Table is damaged");
        return false;
    }

    for lvd in disc.lvd.iter_mut().flatten() {
        lvd.logical_volume_identifier.0 = vat20.logical_volume_identifier;
    }
    if disc.lvid.is_some() {
        if vat20.min_udf_read_revision != 0 {
            disc.udf_rev = vat20.min_udf_read_revision;
        }
        if disc.udf_write_rev < vat20.min_udf_write_revision {
            disc.udf_write_rev = vat20.min_udf_write_revision;
        }
        if disc.udf_write_rev < disc.udf_rev {
            disc.udf_write_rev = disc.udf_rev;
        }
        disc.num_files = vat20.number_of_files;
        disc.num_dirs = vat20.number_of_directories;
    }

    let count = (vat_bytes.len() - header_len) / 4;
    disc.vat = Some(vat_entries(vat_bytes, header_len, count));
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disc::{read_disc, ReadOptions};
    use crate::testimg::TestImageBuilder;

    #[test]
    fn test_vat20_located_at_last_block() {
        let img = TestImageBuilder::new().with_virtual_partition().build();
        let mut io = img.into_io();
        let disc = read_disc(&mut io, &ReadOptions::default()).unwrap();
        assert!(disc.vat.is_some(), "VAT expected");
        assert_eq!(disc.vat_block, Some(crate::testimg::VAT_BLOCK));
        // virtual block 5 resolves through the table
        let vat = disc.vat.as_ref().unwrap();
        assert_eq!(vat[5], 2500);
        // a loaded VAT synthesizes a closed integrity
        assert!(!disc.lvid.as_ref().unwrap().is_open());
    }

    #[test]
    fn test_vat_resolution_through_partition_map() {
        let img = TestImageBuilder::new().with_virtual_partition().build();
        let mut io = img.into_io();
        let disc = read_disc(&mut io, &ReadOptions::default()).unwrap();
        // the virtual map is declared second, so partition reference 1
        let abs = crate::partition::resolve_to_absolute(&disc, 1, 5).unwrap();
        let pd = disc.pd_any().unwrap();
        assert_eq!(abs, pd.partition_starting_location + 2500);
    }

    #[test]
    fn test_no_vat_no_false_positive() {
        let img = TestImageBuilder::new().build();
        let mut io = img.into_io();
        let disc = read_disc(&mut io, &ReadOptions::default()).unwrap();
        assert!(disc.vat.is_none());
        assert_eq!(disc.vat_block, None);
    }
}
