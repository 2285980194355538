//! Partition resolution: translating `(partition_reference, logical block)`
//! pairs to absolute blocks through Type 1, Virtual, Sparable and Metadata
//! partition maps, plus the loaders for sparing tables and the metadata
//! file extent lists that the translation consults.

use log::{debug, error, warn};

use crate::disc::Disc;
use crate::extent::SpaceType;
use crate::icb::{AllocationDescriptorForm, AnyFileEntry, FileType};
use crate::io::{read_checked, BlockIo};
use crate::udf::{
    PartitionMap, ShortAllocationDescriptor, SparingTable, UDF_ID_SPARING,
};

/// Translate a logical block through one partition map to a physical
/// position within the hosting partition. Returns the hosting partition
/// number with the position.
pub fn find_block_position(disc: &Disc, pmap: &PartitionMap, block: u32) -> Option<(u16, u32)> {
    match pmap {
        PartitionMap::Type1(m) => Some((m.partition_number, block)),
        PartitionMap::Virtual(m) => {
            // out-of-range virtual blocks pass through unchanged, the
            // legacy unmapped-block convention
            if let Some(vat) = &disc.vat {
                if (block as usize) < vat.len() {
                    return Some((m.partition_number, vat[block as usize]));
                }
            }
            Some((m.partition_number, block))
        }
        PartitionMap::Sparable(m) => {
            let packet_len = m.packet_length.max(1) as u32;
            let offset = block % packet_len;
            let packet = block - offset;
            for table in disc.sparing_tables.iter().flatten() {
                if let Some(mapped) = table.lookup(packet) {
                    return Some((m.partition_number, mapped + offset));
                }
            }
            // no entry means the packet is unspared
            Some((m.partition_number, block))
        }
        PartitionMap::Metadata(m) => {
            for filemap in disc.metadata_file_map.iter().flatten() {
                let mut location = 0u32;
                for ad in filemap {
                    let length = ad.extent_length_bytes() / disc.block_size;
                    if block >= location && block < location + length {
                        return Some((m.partition_number, ad.extent_location + (block - location)));
                    }
                    location += length;
                }
            }
            None
        }
        PartitionMap::Other { .. } => {
            warn!("Unknown partition map");
            None
        }
    }
}

/// Translate `(partition_reference_number, logical_block)` to an absolute
/// block, adding the hosting partition's starting location.
pub fn resolve_to_absolute(disc: &Disc, partition_ref: u16, block: u32) -> Option<u32> {
    let maps = disc.partition_maps();
    let pmap = maps.get(partition_ref as usize)?;
    let (partition_number, position) = find_block_position(disc, pmap, block)?;
    let pd = disc.find_partition_descriptor(partition_number)?;
    Some(pd.partition_starting_location + position)
}

/// Load up to four sparing tables named by the Sparable Partition Map and
/// claim the spared packets in the extent map.
pub fn read_sparing_tables(io: &mut dyn BlockIo, disc: &mut Disc) {
    let Some((_, PartitionMap::Sparable(spm))) = disc.sparable_partition_map() else {
        return;
    };

    disc.raise_write_revision(spm.partition_type_identifier.suffix_udf_revision());

    let count = spm.num_sparing_tables as usize;
    if count > 4 {
        warn!("Too many Sparing Tables");
    }
    let count = count.min(4);
    let length = spm.size_sparing_table;
    let packet_len = spm.packet_length.max(1) as u32;
    let bs = disc.block_size;

    for i in 0..count {
        let location = spm.loc_sparing_table[i];
        let mut block = vec![0u8; bs as usize];
        if read_checked(io, disc.byte_offset(location), &mut block).is_err() {
            return;
        }

        let st = SparingTable::read(&block);
        // a sparing table's own tag carries identifier 0
        if st.tag.tag_identifier != 0 || st.tag.tag_location != location {
            warn!("Invalid Sparing Table at block {}", location);
            return;
        }
        if st.sparing_identifier.flags != 0 || !st.sparing_identifier.matches(UDF_ID_SPARING) {
            continue;
        }
        disc.raise_write_revision(st.sparing_identifier.suffix_udf_revision());

        let st_len = SparingTable::FIXED_SIZE + st.reallocation_table_length as usize * 8;
        if st_len as u32 > length {
            warn!("Sparing Table is too big ({})", st_len);
            return;
        }

        let mut buf = vec![0u8; st_len.max(bs as usize)];
        if read_checked(io, disc.byte_offset(location), &mut buf).is_err() {
            return;
        }
        let st = SparingTable::read(&buf[..st_len.max(SparingTable::FIXED_SIZE)]);

        let _ = disc
            .map
            .set_extent(SpaceType::STABLE, location, length.div_ceil(bs));

        for entry in &st.map_entries {
            if entry.original_location >= crate::udf::SPARING_LOCATION_TERMINATOR {
                break;
            }
            if let Ok(ext) = disc
                .map
                .set_extent(SpaceType::SSPACE, entry.mapped_location, packet_len)
            {
                // coalesce with an adjacent spared packet
                if let Some(prev) = disc.map.prev_of(ext) {
                    if disc.map.get(prev).space_type == SpaceType::SSPACE
                        && disc.map.get(prev).end() == entry.mapped_location
                    {
                        disc.map.absorb_next_if_same_type(prev);
                    }
                }
            }
        }

        if let Some(first) = disc.sparing_tables.iter().flatten().next() {
            if first.map_entries != st.map_entries {
                warn!("Sparing Tables disagree, using the first one for lookups");
            }
        }
        disc.sparing_tables[i] = Some(st);
    }
}

fn read_metadata_file(io: &mut dyn BlockIo, disc: &mut Disc, start: u32, location: u32, mirror: bool) {
    let which = if mirror { "Mirror " } else { "" };
    let bs = disc.block_size;
    let mut block = vec![0u8; bs as usize];
    if read_checked(io, disc.byte_offset(start + location), &mut block).is_err() {
        warn!("Cannot read Metadata {}File", which);
        return;
    }

    let Some(entry) = AnyFileEntry::parse(&block) else {
        warn!("Descriptor for Metadata {}File has unknown Tag Identifier", which);
        return;
    };

    let expected = if mirror {
        FileType::MetadataMirrorFile
    } else {
        FileType::MetadataFile
    };
    if entry.icb_tag().file_type() != expected {
        warn!(
            "Information Control Block for Metadata {}File has unknown File type",
            which
        );
        return;
    }
    if entry.icb_tag().allocation_descriptor_form() != AllocationDescriptorForm::Short {
        // only short_ads are defined for the metadata files
        warn!(
            "Information Control Block for Metadata {}File has unknown Allocation Descriptors type",
            which
        );
        return;
    }
    if entry.tag().tag_location != location {
        warn!("Descriptor for Metadata {}File has invalid location", which);
        return;
    }
    if entry.unique_id() != 0 {
        warn!("File Entry for Metadata {}File has invalid Unique ID", which);
    }

    let ad_bytes = entry.allocation_descriptors();
    if ad_bytes.len() < ShortAllocationDescriptor::size() {
        warn!("Allocation Descriptors for Metadata {}File are empty", which);
        return;
    }
    if entry.get_length() > bs as usize {
        warn!(
            "Allocation Descriptors for Metadata {}File are larger than block size",
            which
        );
        return;
    }

    let ads: Vec<ShortAllocationDescriptor> = ad_bytes
        .chunks_exact(ShortAllocationDescriptor::size())
        .map(ShortAllocationDescriptor::read)
        .collect();
    debug!("Metadata {}File extents: {:?}", which, ads);
    disc.metadata_file_map[mirror as usize] = Some(ads);
}

/// Read the Metadata File and Metadata Mirror File allocation descriptors
/// that back the metadata partition.
pub fn read_metadata_files(io: &mut dyn BlockIo, disc: &mut Disc) {
    let Some((_, PartitionMap::Metadata(mpm))) = disc.metadata_partition_map() else {
        return;
    };

    disc.raise_write_revision(mpm.partition_type_identifier.suffix_udf_revision());

    let Some(pd) = disc.find_partition_descriptor(mpm.partition_number) else {
        error!("Metadata Partition Map found, but corresponding Partition Descriptor not found");
        return;
    };
    let start = pd.partition_starting_location;

    read_metadata_file(io, disc, start, mpm.metadata_file_location, false);
    read_metadata_file(io, disc, start, mpm.metadata_mirror_file_location, true);
}

/// Claim the partition space described by a Partition Descriptor in the
/// extent map. `second` selects the pd2 slot pair.
pub fn setup_partition_space(disc: &mut Disc, second: bool) {
    let pd = if second { disc.pd2_any() } else { disc.pd_any() };
    let Some(pd) = pd else {
        if !second {
            warn!("Partition Space not found");
        }
        return;
    };

    let location = pd.partition_starting_location;
    let blocks = pd.partition_length;
    if blocks == 0 {
        warn!("{}Partition Space not found", if second { "Second " } else { "" });
        return;
    }

    if location + blocks > disc.blocks && disc.virtual_partition_map().is_none() {
        warn!(
            "{}Partition Space is beyond end of disk",
            if second { "Second " } else { "" }
        );
    }

    // mark every unallocated sub-range of the partition; anything already
    // typed (sparing space, integrity extents) stays as it is
    let end = (location + blocks).min(disc.map.blocks());
    let mut cursor = location;
    let mut overlapped = false;
    while cursor < end {
        let ext = disc.map.find_extent(cursor);
        let (ext_type, ext_end) = {
            let e = disc.map.get(ext);
            (e.space_type, e.end())
        };
        let span_end = ext_end.min(end);
        if ext_type == SpaceType::USPACE {
            if disc
                .map
                .set_extent(SpaceType::PSPACE, cursor, span_end - cursor)
                .is_err()
            {
                overlapped = true;
            }
        } else if ext_type != SpaceType::PSPACE {
            overlapped = true;
        }
        cursor = span_end;
    }
    if overlapped {
        warn!(
            "{}Partition Space overlaps with other blocks",
            if second { "Second " } else { "" }
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::udf::{
        GenericPartitionMapHeader, MetadataPartitionMap, SparablePartitionMap, SparingEntry,
        Type1PartitionMap, VirtualPartitionMap,
    };
    use crate::udf::{EntityID, UDF_ID_METADATA, UDF_ID_VIRTUAL};

    fn header(t: u8, l: u8) -> GenericPartitionMapHeader {
        GenericPartitionMapHeader {
            partition_map_type: t,
            partition_map_length: l,
        }
    }

    fn disc_with_pd(start: u32, length: u32) -> Disc {
        let mut disc = Disc::new();
        disc.block_size = 2048;
        disc.blocks = 100_000;
        let mut pd = crate::udf::PartitionDescriptor::default();
        pd.partition_number = 0;
        pd.partition_starting_location = start;
        pd.partition_length = length;
        disc.pd[0] = Some(pd);
        disc
    }

    #[test]
    fn test_type1_identity() {
        let disc = disc_with_pd(257, 10_000);
        let pmap = PartitionMap::Type1(Type1PartitionMap {
            header: header(1, 6),
            volume_seq_number: 1,
            partition_number: 0,
        });
        assert_eq!(find_block_position(&disc, &pmap, 5), Some((0, 5)));
    }

    #[test]
    fn test_virtual_map_lookup() {
        let mut disc = disc_with_pd(0, 10_000);
        let mut vat = vec![0u32; 10];
        vat[5] = 2500;
        disc.vat = Some(vat);
        let pmap = PartitionMap::Virtual(VirtualPartitionMap {
            header: header(2, 64),
            partition_type_identifier: EntityID::udf_entity(UDF_ID_VIRTUAL, 0x0150),
            volume_seq_number: 1,
            partition_number: 0,
        });
        assert_eq!(find_block_position(&disc, &pmap, 5), Some((0, 2500)));
        // out of range passes through unchanged
        assert_eq!(find_block_position(&disc, &pmap, 77), Some((0, 77)));
    }

    #[test]
    fn test_sparable_packet_remap() {
        let mut disc = disc_with_pd(100, 10_000);
        let mut st = SparingTable::default();
        st.map_entries = vec![SparingEntry {
            original_location: 64,
            mapped_location: 320,
        }];
        st.reallocation_table_length = 1;
        disc.sparing_tables[0] = Some(st);
        let pmap = PartitionMap::Sparable(SparablePartitionMap {
            header: header(2, 64),
            partition_type_identifier: EntityID::udf_entity(crate::udf::UDF_ID_SPARABLE, 0x0150),
            volume_seq_number: 1,
            partition_number: 0,
            packet_length: 32,
            num_sparing_tables: 1,
            size_sparing_table: 1024,
            loc_sparing_table: [0; 4],
        });
        // spared packet: 70 lives in packet 64 -> 320 + 6
        assert_eq!(find_block_position(&disc, &pmap, 70), Some((0, 326)));
        // unspared packet passes through
        assert_eq!(find_block_position(&disc, &pmap, 10), Some((0, 10)));
    }

    #[test]
    fn test_metadata_extent_walk() {
        let mut disc = disc_with_pd(0, 10_000);
        disc.metadata_file_map[0] = Some(vec![
            ShortAllocationDescriptor {
                extent_length_and_type: 8192,
                extent_location: 1000,
            },
            ShortAllocationDescriptor {
                extent_length_and_type: 4096,
                extent_location: 2000,
            },
        ]);
        let pmap = PartitionMap::Metadata(MetadataPartitionMap {
            header: header(2, 64),
            partition_type_identifier: EntityID::udf_entity(UDF_ID_METADATA, 0x0250),
            volume_seq_number: 1,
            partition_number: 0,
            metadata_file_location: 0,
            metadata_mirror_file_location: 0,
            metadata_bitmap_file_location: 0,
            allocation_unit_size: 32,
            alignment_unit_size: 32,
            flags: 0,
        });
        // 8192 bytes at 2048 per block: the first extent covers virtual
        // blocks 0..4, the 4096 byte mirror extent 4..6
        assert_eq!(find_block_position(&disc, &pmap, 3), Some((0, 1003)));
        assert_eq!(find_block_position(&disc, &pmap, 4), Some((0, 2000)));
        assert_eq!(find_block_position(&disc, &pmap, 5), Some((0, 2001)));
        assert_eq!(find_block_position(&disc, &pmap, 6), None);
    }

    #[test]
    fn test_resolve_adds_partition_start() {
        let mut disc = disc_with_pd(257, 10_000);
        let mut lvd = crate::udf::LogicalVolumeDescriptor::default();
        let mut table = vec![0u8; 6];
        PartitionMap::Type1(Type1PartitionMap {
            header: header(1, 6),
            volume_seq_number: 1,
            partition_number: 0,
        })
        .write(&mut table);
        lvd.map_table_length = 6;
        lvd.number_of_partition_maps = 1;
        lvd.partition_map_table = table;
        disc.lvd[0] = Some(lvd);
        assert_eq!(resolve_to_absolute(&disc, 0, 70), Some(327));
        assert_eq!(resolve_to_absolute(&disc, 1, 70), None);
    }
}
