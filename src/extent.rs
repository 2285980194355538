//! Address-ordered map of disjoint block extents tagged by space type, with
//! a per-extent store of the descriptors read from or destined for disk.
//!
//! The extents form a doubly-linked list over an arena of nodes addressed
//! by `u32` indices; the arena owns every node and links never dangle.
//! The list fully covers `[0, blocks)` at all times: `set_extent` splits
//! and relabels, it never creates holes.

use bitflags::bitflags;

use crate::error::{Result, UdfError};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SpaceType: u16 {
        /// Reserved Space
        const RESERVED = 0x0001;
        /// Volume Recognition Sequence
        const VRS      = 0x0002;
        /// Anchor
        const ANCHOR   = 0x0004;
        /// Main Volume Descriptor Sequence
        const MVDS     = 0x0008;
        /// Reserve Volume Descriptor Sequence
        const RVDS     = 0x0010;
        /// Logical Volume Integrity Descriptor
        const LVID     = 0x0020;
        /// Sparing Table
        const STABLE   = 0x0040;
        /// Sparing Space
        const SSPACE   = 0x0080;
        /// Partition Space
        const PSPACE   = 0x0100;
        /// Unallocated Space
        const USPACE   = 0x0200;
        /// Bad Blocks
        const BAD      = 0x0400;
        /// MBR Boot Area
        const MBR      = 0x0800;
    }
}

pub type ExtentId = u32;
const NIL: u32 = u32::MAX;

/// One descriptor inside an extent, at a fixed intra-extent block offset.
/// Data larger than one buffer is kept as a chain of buffers, so an
/// allocation-descriptor area can grow without moving earlier chunks.
#[derive(Debug, Clone)]
pub struct DescNode {
    pub ident: u16,
    /// block offset relative to the extent start
    pub offset: u32,
    pub length: u64,
    pub data: Vec<Vec<u8>>,
}

impl DescNode {
    /// Flatten the data chain into one contiguous buffer.
    pub fn bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.length as usize);
        for chunk in &self.data {
            out.extend_from_slice(chunk);
        }
        out
    }

    /// Link an additional buffer into the data chain.
    pub fn append_data(&mut self, chunk: Vec<u8>) {
        self.length += chunk.len() as u64;
        self.data.push(chunk);
    }
}

#[derive(Debug, Clone)]
pub struct Extent {
    pub space_type: SpaceType,
    pub start: u32,
    pub blocks: u32,
    pub descs: Vec<DescNode>,
    next: u32,
    prev: u32,
}

impl Extent {
    pub fn end(&self) -> u32 {
        self.start + self.blocks
    }
}

#[derive(Debug, Clone)]
pub struct ExtentMap {
    arena: Vec<Extent>,
    head: u32,
    tail: u32,
}

impl ExtentMap {
    /// A map whose single extent covers the whole device as unallocated.
    pub fn new(blocks: u32) -> Self {
        Self {
            arena: vec![Extent {
                space_type: SpaceType::USPACE,
                start: 0,
                blocks,
                descs: Vec::new(),
                next: NIL,
                prev: NIL,
            }],
            head: 0,
            tail: 0,
        }
    }

    pub fn head(&self) -> ExtentId {
        self.head
    }
    pub fn tail(&self) -> ExtentId {
        self.tail
    }
    pub fn get(&self, id: ExtentId) -> &Extent {
        &self.arena[id as usize]
    }
    pub fn get_mut(&mut self, id: ExtentId) -> &mut Extent {
        &mut self.arena[id as usize]
    }
    pub fn next_of(&self, id: ExtentId) -> Option<ExtentId> {
        let n = self.arena[id as usize].next;
        (n != NIL).then_some(n)
    }
    pub fn prev_of(&self, id: ExtentId) -> Option<ExtentId> {
        let p = self.arena[id as usize].prev;
        (p != NIL).then_some(p)
    }

    /// Total cover in blocks.
    pub fn blocks(&self) -> u32 {
        self.get(self.tail).end()
    }

    /// Grow or shrink the cover; only meaningful while the map is still a
    /// single extent, before any structure has been recorded.
    pub fn reset_cover(&mut self, blocks: u32) {
        if self.arena.len() == 1 {
            self.arena[0].blocks = blocks;
        }
    }

    pub fn iter(&self) -> ExtentIter<'_> {
        ExtentIter {
            map: self,
            cur: self.head,
        }
    }

    /// The extent containing `block`.
    pub fn find_extent(&self, block: u32) -> ExtentId {
        let mut cur = self.head;
        loop {
            let ext = self.get(cur);
            if ext.next == NIL || ext.end() > block {
                return cur;
            }
            cur = ext.next;
        }
    }

    fn alloc(&mut self, ext: Extent) -> ExtentId {
        self.arena.push(ext);
        (self.arena.len() - 1) as ExtentId
    }

    fn link_before(&mut self, new_id: ExtentId, before: ExtentId) {
        let prev = self.arena[before as usize].prev;
        self.arena[new_id as usize].prev = prev;
        self.arena[new_id as usize].next = before;
        self.arena[before as usize].prev = new_id;
        if prev == NIL {
            self.head = new_id;
        } else {
            self.arena[prev as usize].next = new_id;
        }
    }

    fn link_after(&mut self, new_id: ExtentId, after: ExtentId) {
        let next = self.arena[after as usize].next;
        self.arena[new_id as usize].next = next;
        self.arena[new_id as usize].prev = after;
        self.arena[after as usize].next = new_id;
        if next == NIL {
            self.tail = new_id;
        } else {
            self.arena[next as usize].prev = new_id;
        }
    }

    /// Mark `[start, start+blocks)` with the given space type, splitting the
    /// host extent as needed. The range must lie within a single existing
    /// extent; spanning several indicates a corrupt map and is an error.
    /// Adjacent same-typed extents are intentionally not merged, callers
    /// rely on the split boundaries.
    pub fn set_extent(
        &mut self,
        space_type: SpaceType,
        start: u32,
        blocks: u32,
    ) -> Result<ExtentId> {
        let host = self.find_extent(start);
        let (host_start, host_blocks, host_type) = {
            let e = self.get(host);
            (e.start, e.blocks, e.space_type)
        };

        if start == host_start {
            if blocks == host_blocks {
                self.get_mut(host).space_type = space_type;
                return Ok(host);
            } else if blocks < host_blocks {
                let new_id = self.alloc(Extent {
                    space_type,
                    start,
                    blocks,
                    descs: Vec::new(),
                    next: NIL,
                    prev: NIL,
                });
                self.link_before(new_id, host);
                let e = self.get_mut(host);
                e.start += blocks;
                e.blocks -= blocks;
                return Ok(new_id);
            }
            return Err(UdfError::CorruptExtentMap);
        }

        // start > host_start
        let host_end = host_start + host_blocks;
        let end = start + blocks;
        if end == host_end {
            let new_id = self.alloc(Extent {
                space_type,
                start,
                blocks,
                descs: Vec::new(),
                next: NIL,
                prev: NIL,
            });
            self.get_mut(host).blocks -= blocks;
            self.link_after(new_id, host);
            Ok(new_id)
        } else if end < host_end {
            let new_id = self.alloc(Extent {
                space_type,
                start,
                blocks,
                descs: Vec::new(),
                next: NIL,
                prev: NIL,
            });
            let tail_id = self.alloc(Extent {
                space_type: host_type,
                start: end,
                blocks: host_end - end,
                descs: Vec::new(),
                next: NIL,
                prev: NIL,
            });
            self.get_mut(host).blocks = start - host_start;
            self.link_after(new_id, host);
            self.link_after(tail_id, new_id);
            Ok(new_id)
        } else {
            Err(UdfError::CorruptExtentMap)
        }
    }

    /// First extent at or after `from` whose type intersects `mask`.
    pub fn next_extent(&self, from: Option<ExtentId>, mask: SpaceType) -> Option<ExtentId> {
        let mut cur = from.unwrap_or(self.head);
        loop {
            if self.get(cur).space_type.intersects(mask) {
                return Some(cur);
            }
            cur = self.next_of(cur)?;
        }
    }

    /// Last extent at or before `from` whose type intersects `mask`.
    pub fn prev_extent(&self, from: Option<ExtentId>, mask: SpaceType) -> Option<ExtentId> {
        let mut cur = from.unwrap_or(self.tail);
        loop {
            if self.get(cur).space_type.intersects(mask) {
                return Some(cur);
            }
            cur = self.prev_of(cur)?;
        }
    }

    /// Starting block of the first matching extent that can hold `blocks`
    /// blocks at the given alignment. Used for ECC-packet-aligned
    /// allocations on sparable media.
    pub fn next_extent_size(
        &self,
        from: Option<ExtentId>,
        mask: SpaceType,
        blocks: u32,
        align: u32,
    ) -> Option<u32> {
        let align = align.max(1);
        let mut cur = self.next_extent(from, mask)?;
        loop {
            let ext = self.get(cur);
            if ext.blocks >= blocks {
                let misalign = ext.start % align;
                let inc = if misalign != 0 { align - misalign } else { 0 };
                if ext.blocks - inc >= blocks {
                    return Some(ext.start + inc);
                }
            }
            cur = self.next_extent(Some(self.next_of(cur)?), mask)?;
        }
    }

    /// Starting block of the last matching extent that can hold `blocks`
    /// blocks ending at the given alignment.
    pub fn prev_extent_size(
        &self,
        from: Option<ExtentId>,
        mask: SpaceType,
        blocks: u32,
        align: u32,
    ) -> Option<u32> {
        let align = align.max(1);
        let mut cur = self.prev_extent(from, mask)?;
        loop {
            let ext = self.get(cur);
            if ext.blocks >= blocks {
                let dec = ext.end() % align;
                if ext.blocks - dec >= blocks {
                    return Some(ext.end() - dec - blocks);
                }
            }
            cur = self.prev_extent(Some(self.prev_of(cur)?), mask)?;
        }
    }

    /// Absorb the next extent into `id` when both carry the same type.
    /// The sparing-space setup uses this to coalesce adjacent packets.
    pub fn absorb_next_if_same_type(&mut self, id: ExtentId) {
        let Some(next) = self.next_of(id) else { return };
        if self.get(next).space_type != self.get(id).space_type {
            return;
        }
        let next_end = self.get(next).end();
        let next_next = self.arena[next as usize].next;
        let e = self.get_mut(id);
        e.blocks = next_end - e.start;
        e.next = next_next;
        if next_next == NIL {
            self.tail = id;
        } else {
            self.arena[next_next as usize].prev = id;
        }
    }

    /// Insert a descriptor into the extent's store, keeping the store
    /// ordered by intra-extent block offset.
    pub fn set_desc(
        &mut self,
        ext: ExtentId,
        ident: u16,
        offset: u32,
        data: Vec<u8>,
    ) -> &mut DescNode {
        let node = DescNode {
            ident,
            offset,
            length: data.len() as u64,
            data: vec![data],
        };
        let descs = &mut self.get_mut(ext).descs;
        let pos = descs.partition_point(|d| d.offset <= offset);
        descs.insert(pos, node);
        &mut self.get_mut(ext).descs[pos]
    }

    /// The descriptor at exactly the given intra-extent offset.
    pub fn find_desc(&self, ext: ExtentId, offset: u32) -> Option<&DescNode> {
        let descs = &self.get(ext).descs;
        let pos = descs.partition_point(|d| d.offset < offset);
        descs.get(pos).filter(|d| d.offset == offset)
    }

    pub fn find_desc_mut(&mut self, ext: ExtentId, offset: u32) -> Option<&mut DescNode> {
        let descs = &mut self.get_mut(ext).descs;
        let pos = descs.partition_point(|d| d.offset < offset);
        descs.get_mut(pos).filter(|d| d.offset == offset)
    }

    /// First descriptor with the given tag identifier in the extent.
    pub fn next_desc(&self, ext: ExtentId, ident: u16) -> Option<&DescNode> {
        self.get(ext).descs.iter().find(|d| d.ident == ident)
    }

    pub fn next_desc_mut(&mut self, ext: ExtentId, ident: u16) -> Option<&mut DescNode> {
        self.get_mut(ext).descs.iter_mut().find(|d| d.ident == ident)
    }
}

pub struct ExtentIter<'a> {
    map: &'a ExtentMap,
    cur: u32,
}

impl<'a> Iterator for ExtentIter<'a> {
    type Item = (ExtentId, &'a Extent);
    fn next(&mut self) -> Option<Self::Item> {
        if self.cur == NIL {
            return None;
        }
        let id = self.cur;
        let ext = self.map.get(id);
        self.cur = ext.next;
        Some((id, ext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_cover(map: &ExtentMap) {
        // the extents must tile [0, blocks) without gaps or overlap
        let mut expected_start = 0;
        for (_, ext) in map.iter() {
            assert_eq!(ext.start, expected_start);
            expected_start = ext.end();
        }
        assert_eq!(expected_start, map.blocks());
        assert_eq!(map.get(map.head()).start, 0);
    }

    #[test]
    fn test_exact_relabel() {
        let mut map = ExtentMap::new(1000);
        let id = map.set_extent(SpaceType::PSPACE, 0, 1000).unwrap();
        assert_eq!(map.get(id).space_type, SpaceType::PSPACE);
        assert_cover(&map);
    }

    #[test]
    fn test_three_way_split() {
        let mut map = ExtentMap::new(1000);
        let id = map.set_extent(SpaceType::ANCHOR, 256, 1).unwrap();
        assert_eq!(map.get(id).start, 256);
        assert_eq!(map.get(id).blocks, 1);
        assert_cover(&map);

        let segments: Vec<(u32, u32, SpaceType)> = map
            .iter()
            .map(|(_, e)| (e.start, e.blocks, e.space_type))
            .collect();
        assert_eq!(
            segments,
            vec![
                (0, 256, SpaceType::USPACE),
                (256, 1, SpaceType::ANCHOR),
                (257, 743, SpaceType::USPACE),
            ]
        );
    }

    #[test]
    fn test_head_and_tail_aligned_splits() {
        let mut map = ExtentMap::new(100);
        map.set_extent(SpaceType::VRS, 0, 10).unwrap();
        map.set_extent(SpaceType::LVID, 90, 10).unwrap();
        assert_cover(&map);
        assert_eq!(map.get(map.head()).space_type, SpaceType::VRS);
        assert_eq!(map.get(map.tail()).space_type, SpaceType::LVID);
    }

    #[test]
    fn test_spanning_extents_is_fatal() {
        let mut map = ExtentMap::new(100);
        map.set_extent(SpaceType::ANCHOR, 50, 1).unwrap();
        assert!(matches!(
            map.set_extent(SpaceType::PSPACE, 40, 20),
            Err(UdfError::CorruptExtentMap)
        ));
    }

    #[test]
    fn test_adjacent_same_type_not_merged() {
        let mut map = ExtentMap::new(100);
        map.set_extent(SpaceType::MVDS, 10, 5).unwrap();
        map.set_extent(SpaceType::MVDS, 15, 5).unwrap();
        let count = map
            .iter()
            .filter(|(_, e)| e.space_type == SpaceType::MVDS)
            .count();
        assert_eq!(count, 2);
        assert_cover(&map);
    }

    #[test]
    fn test_find_extent() {
        let mut map = ExtentMap::new(100);
        map.set_extent(SpaceType::ANCHOR, 30, 2).unwrap();
        let id = map.find_extent(31);
        assert_eq!(map.get(id).space_type, SpaceType::ANCHOR);
        let id = map.find_extent(32);
        assert_eq!(map.get(id).space_type, SpaceType::USPACE);
    }

    #[test]
    fn test_next_extent_mask_walk() {
        let mut map = ExtentMap::new(1000);
        map.set_extent(SpaceType::ANCHOR, 256, 1).unwrap();
        map.set_extent(SpaceType::PSPACE, 300, 500).unwrap();
        let id = map.next_extent(None, SpaceType::PSPACE).unwrap();
        assert_eq!(map.get(id).start, 300);
        let id = map
            .prev_extent(None, SpaceType::ANCHOR | SpaceType::PSPACE)
            .unwrap();
        assert_eq!(map.get(id).start, 300);
    }

    #[test]
    fn test_next_extent_size_alignment() {
        let mut map = ExtentMap::new(1000);
        // carve the map so the only free run starts misaligned at 70
        map.set_extent(SpaceType::PSPACE, 0, 70).unwrap();
        // a 32-aligned allocation of 100 blocks must start at 96
        let start = map
            .next_extent_size(None, SpaceType::USPACE, 100, 32)
            .unwrap();
        assert_eq!(start, 96);
        // without alignment the run itself qualifies
        let start = map.next_extent_size(None, SpaceType::USPACE, 100, 1).unwrap();
        assert_eq!(start, 70);
    }

    #[test]
    fn test_desc_store_ordering() {
        let mut map = ExtentMap::new(100);
        let id = map.set_extent(SpaceType::MVDS, 10, 16).unwrap();
        map.set_desc(id, 5, 2, vec![0u8; 512]);
        map.set_desc(id, 1, 0, vec![0u8; 512]);
        map.set_desc(id, 6, 1, vec![0u8; 512]);
        let offsets: Vec<u32> = map.get(id).descs.iter().map(|d| d.offset).collect();
        assert_eq!(offsets, vec![0, 1, 2]);
        assert_eq!(map.find_desc(id, 1).unwrap().ident, 6);
        assert!(map.find_desc(id, 3).is_none());
    }

    #[test]
    fn test_append_data_chain() {
        let mut map = ExtentMap::new(100);
        let id = map.set_extent(SpaceType::PSPACE, 0, 100).unwrap();
        map.set_desc(id, 261, 4, vec![1u8; 100]);
        let desc = map.find_desc_mut(id, 4).unwrap();
        desc.append_data(vec![2u8; 50]);
        assert_eq!(desc.length, 150);
        let bytes = desc.bytes();
        assert_eq!(bytes.len(), 150);
        assert_eq!(bytes[99], 1);
        assert_eq!(bytes[100], 2);
    }

    #[test]
    fn test_absorb_next_same_type() {
        let mut map = ExtentMap::new(100);
        map.set_extent(SpaceType::SSPACE, 10, 8).unwrap();
        let id = map.find_extent(10);
        map.set_extent(SpaceType::SSPACE, 18, 8).unwrap();
        map.absorb_next_if_same_type(id);
        assert_eq!(map.get(id).blocks, 16);
        assert_cover(&map);
    }
}
