#![forbid(unsafe_code)]
//! Layout planning and free-list construction.
//!
//! ## Design
//!
//! Serialization places everything in one pass over the logical address
//! space, layered bottom-up:
//!
//! 1. **Placement** — pack tree nodes after the fixed header block, each
//!    at an offset aligned to its own power-of-two block size.
//! 2. **Free-list building** — tile the gaps the buddy alignment leaves
//!    behind with power-of-two, self-aligned free blocks.
//! 3. **Allocator sizing** — pick the smallest power-of-two block that
//!    holds the serialized allocator, growing and re-tiling until it fits.

use dss_error::StoreError;
use dss_ondisk::alloc_block::{address_table_len, AllocatorBlock, FREE_LIST_COUNT};
use dss_types::{
    align_up, BlockAddress, HEADER_RESERVATION, MAX_BLOCK_POW, MIN_BLOCK_POW, MIN_BLOCK_SIZE,
    PAGE_SIZE,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Logical offset of the fixed root-metadata block (block 1).
pub const TREE_HEADER_OFFSET: u32 = HEADER_RESERVATION;

/// Size of the fixed root-metadata block.
pub const TREE_HEADER_BLOCK_SIZE: u32 = MIN_BLOCK_SIZE;

/// Smallest allocator block exponent tried by the sizing loop.
const FIRST_ALLOCATOR_POW: u32 = 12;

/// A planned block: number, logical offset, and size exponent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPlacement {
    pub block: u32,
    pub offset: u32,
    pub size_pow: u32,
}

impl BlockPlacement {
    #[must_use]
    pub const fn size(&self) -> u32 {
        1 << self.size_pow
    }
}

/// The fully-planned container: node placements, the sized allocator
/// block, and the resulting logical file end.
#[derive(Debug, Clone)]
pub struct Plan {
    /// One placement per tree node, in the order the node images were
    /// given; element `k` is block `2 + k`.
    pub placements: Vec<BlockPlacement>,
    /// Ready-to-serialize allocator state (addresses, toc, free lists).
    pub allocator: AllocatorBlock,
    pub allocator_offset: u32,
    pub allocator_size: u32,
    /// Logical end of the file: allocator offset + allocator size.
    pub file_end: u32,
}

fn too_large() -> StoreError {
    StoreError::InvalidRecord {
        reason: "container exceeds the 32-bit logical address space".to_owned(),
    }
}

/// Plan the whole container for the given serialized node sizes.
///
/// Node `k` gets block number `2 + k`; block 0 is the allocator and
/// block 1 the fixed root-metadata block at offset 0x20.
pub fn plan_container(node_sizes: &[usize]) -> Result<Plan, StoreError> {
    let placements = place_nodes(node_sizes)?;
    let after_nodes = placements
        .last()
        .map_or(TREE_HEADER_OFFSET + TREE_HEADER_BLOCK_SIZE, |p| {
            p.offset + p.size()
        });

    // Fixed reservations plus every node block.
    let mut allocated = Vec::with_capacity(placements.len() + 2);
    allocated.push((0, HEADER_RESERVATION));
    allocated.push((TREE_HEADER_OFFSET, TREE_HEADER_BLOCK_SIZE));
    allocated.extend(placements.iter().map(|p| (p.offset, p.size())));

    let block_count = u32::try_from(placements.len())
        .ok()
        .and_then(|n| n.checked_add(2))
        .ok_or_else(too_large)?;

    // Size the allocator: grow the exponent until the serialized block,
    // including the free lists its own placement creates, fits.
    for pow in FIRST_ALLOCATOR_POW..=MAX_BLOCK_POW {
        let size = 1_u32 << pow;
        let Some(offset) = align_up(after_nodes, size) else {
            continue;
        };
        let Some(file_end) = offset.checked_add(size) else {
            continue;
        };

        let mut ranges = allocated.clone();
        ranges.push((offset, size));
        let free_lists = build_free_lists(&ranges, file_end)?;

        let allocator = build_allocator_block(block_count, offset, pow, &placements, free_lists)?;
        let serialized_len = allocator.serialize().len();
        if serialized_len <= size as usize {
            debug!(
                target: "dss::alloc",
                event = "allocator_sized",
                pow,
                serialized_len,
                file_end
            );
            return Ok(Plan {
                placements,
                allocator,
                allocator_offset: offset,
                allocator_size: size,
                file_end,
            });
        }
    }

    Err(too_large())
}

/// Pack node blocks sequentially after the root-metadata block, each at
/// an offset rounded up to its own block size.
fn place_nodes(node_sizes: &[usize]) -> Result<Vec<BlockPlacement>, StoreError> {
    let mut placements = Vec::with_capacity(node_sizes.len());
    let mut cursor = TREE_HEADER_OFFSET + TREE_HEADER_BLOCK_SIZE;

    for (index, &len) in node_sizes.iter().enumerate() {
        let len = u32::try_from(len).map_err(|_| too_large())?;
        if len > PAGE_SIZE {
            return Err(StoreError::InvalidRecord {
                reason: format!("node of {len} bytes exceeds the page size"),
            });
        }
        let size = len.next_power_of_two().max(MIN_BLOCK_SIZE);
        let offset = align_up(cursor, size).ok_or_else(too_large)?;
        let block = u32::try_from(index)
            .ok()
            .and_then(|i| i.checked_add(2))
            .ok_or_else(too_large)?;
        placements.push(BlockPlacement {
            block,
            offset,
            size_pow: size.trailing_zeros(),
        });
        cursor = offset.checked_add(size).ok_or_else(too_large)?;
    }
    Ok(placements)
}

fn build_allocator_block(
    block_count: u32,
    allocator_offset: u32,
    allocator_pow: u32,
    placements: &[BlockPlacement],
    free_lists: [Vec<u32>; FREE_LIST_COUNT],
) -> Result<AllocatorBlock, StoreError> {
    let mut addresses = vec![0_u32; address_table_len(block_count) as usize];
    addresses[0] = BlockAddress::new(allocator_offset, allocator_pow)
        .map_err(|_| StoreError::InvalidBlockAddress)?
        .raw();
    addresses[1] = BlockAddress::new(TREE_HEADER_OFFSET, MIN_BLOCK_POW)
        .map_err(|_| StoreError::InvalidBlockAddress)?
        .raw();
    for placement in placements {
        addresses[placement.block as usize] = BlockAddress::new(placement.offset, placement.size_pow)
            .map_err(|_| StoreError::InvalidBlockAddress)?
            .raw();
    }

    let mut toc = BTreeMap::new();
    toc.insert("DSDB".to_owned(), 1);

    Ok(AllocatorBlock {
        block_count,
        addresses,
        toc,
        free_lists,
    })
}

/// Tile the complement of `allocated` within `[0, file_end)` with
/// power-of-two, self-aligned free blocks, bucketed by size exponent.
///
/// `allocated` must include the 0x20-byte header reservation. Overlaps
/// and ranges past `file_end` are rejected.
pub fn build_free_lists(
    allocated: &[(u32, u32)],
    file_end: u32,
) -> Result<[Vec<u32>; FREE_LIST_COUNT], StoreError> {
    let mut ranges: Vec<(u32, u32)> = allocated.to_vec();
    ranges.sort_unstable();

    let mut free_lists: [Vec<u32>; FREE_LIST_COUNT] = Default::default();
    let mut cursor = 0_u32;
    for &(offset, size) in &ranges {
        if offset < cursor {
            return Err(StoreError::CorruptedFile(format!(
                "allocated ranges overlap at {offset:#x}"
            )));
        }
        let end = offset.checked_add(size).ok_or_else(too_large)?;
        if end > file_end {
            return Err(StoreError::CorruptedFile(format!(
                "allocated range {offset:#x}+{size:#x} extends past the file end"
            )));
        }
        cover_gap(&mut free_lists, cursor, offset)?;
        cursor = end;
    }
    cover_gap(&mut free_lists, cursor, file_end)?;
    Ok(free_lists)
}

/// Greedily split one gap into aligned power-of-two free blocks.
fn cover_gap(
    free_lists: &mut [Vec<u32>; FREE_LIST_COUNT],
    start: u32,
    end: u32,
) -> Result<(), StoreError> {
    let mut offset = start;
    while offset < end {
        let remaining = end - offset;
        // Largest exponent the offset's own alignment allows…
        let align_pow = if offset == 0 {
            MAX_BLOCK_POW
        } else {
            offset.trailing_zeros()
        };
        // …capped by what still fits in the gap.
        let fit_pow = 31 - remaining.leading_zeros();
        let pow = align_pow.min(fit_pow).min(MAX_BLOCK_POW);
        if pow < MIN_BLOCK_POW {
            return Err(StoreError::CorruptedFile(format!(
                "unable to align free blocks at {offset:#x} (gap of {remaining:#x})"
            )));
        }
        free_lists[pow as usize].push(offset);
        offset += 1 << pow;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Flatten free lists back into (offset, size) ranges.
    fn free_ranges(lists: &[Vec<u32>; FREE_LIST_COUNT]) -> Vec<(u32, u32)> {
        let mut out = Vec::new();
        for (pow, list) in lists.iter().enumerate() {
            for &offset in list {
                out.push((offset, 1_u32 << pow));
            }
        }
        out.sort_unstable();
        out
    }

    /// Assert allocated + free tiles [0, file_end) with no overlap.
    fn assert_exact_cover(allocated: &[(u32, u32)], lists: &[Vec<u32>; FREE_LIST_COUNT], file_end: u32) {
        let mut ranges = allocated.to_vec();
        ranges.extend(free_ranges(lists));
        ranges.sort_unstable();
        let mut cursor = 0_u32;
        for (offset, size) in ranges {
            assert_eq!(offset, cursor, "hole or overlap before {offset:#x}");
            cursor = offset + size;
        }
        assert_eq!(cursor, file_end, "coverage stops short of the file end");
    }

    #[test]
    fn empty_container_plan() {
        // A single empty-leaf node of 8 bytes.
        let plan = plan_container(&[8]).expect("plan");
        assert_eq!(plan.placements.len(), 1);
        let node = plan.placements[0];
        assert_eq!(node.block, 2);
        assert_eq!(node.offset, 0x40);
        assert_eq!(node.size(), MIN_BLOCK_SIZE);

        assert_eq!(plan.allocator_offset, 0x1000);
        assert_eq!(plan.allocator_size, 0x1000);
        assert_eq!(plan.file_end, 0x2000);
        assert_eq!(plan.allocator.block_count, 3);
        assert_eq!(plan.allocator.addresses[0], 0x1000 | 12);
        assert_eq!(plan.allocator.addresses[1], 0x20 | 5);
        assert_eq!(plan.allocator.addresses[2], 0x40 | 5);
        assert_eq!(plan.allocator.toc.get("DSDB"), Some(&1));
        assert!(plan.allocator.serialize().len() <= plan.allocator_size as usize);

        let mut allocated = vec![
            (0, HEADER_RESERVATION),
            (TREE_HEADER_OFFSET, TREE_HEADER_BLOCK_SIZE),
            (node.offset, node.size()),
            (plan.allocator_offset, plan.allocator_size),
        ];
        allocated.sort_unstable();
        assert_exact_cover(&allocated, &plan.allocator.free_lists, plan.file_end);
    }

    #[test]
    fn nodes_pack_with_buddy_alignment() {
        // A page-sized node after a 32-byte one must skip to the next
        // page boundary.
        let plan = plan_container(&[8, 4096]).expect("plan");
        assert_eq!(plan.placements[0].offset, 0x40);
        assert_eq!(plan.placements[1].offset, 0x1000);
        assert_eq!(plan.placements[1].size(), 0x1000);
    }

    #[test]
    fn oversized_node_rejected() {
        assert!(matches!(
            plan_container(&[4097]),
            Err(StoreError::InvalidRecord { .. })
        ));
    }

    #[test]
    fn many_nodes_grow_the_address_table() {
        let sizes = vec![256_usize; 300];
        let plan = plan_container(&sizes).expect("plan");
        assert_eq!(plan.allocator.block_count, 302);
        assert_eq!(plan.allocator.addresses.len(), 512);
        assert!(plan.allocator.serialize().len() <= plan.allocator_size as usize);
    }

    #[test]
    fn free_lists_reject_overlap() {
        let err = build_free_lists(&[(0, 0x40), (0x20, 0x20)], 0x100).unwrap_err();
        assert!(matches!(err, StoreError::CorruptedFile(_)));
    }

    #[test]
    fn free_lists_reject_range_past_end() {
        let err = build_free_lists(&[(0, 0x20), (0x80, 0x100)], 0x100).unwrap_err();
        assert!(matches!(err, StoreError::CorruptedFile(_)));
    }

    #[test]
    fn greedy_cover_uses_largest_aligned_blocks() {
        // Gap [0x60, 0x1000): 32 @ 0x60, then doubling runs.
        let lists = build_free_lists(
            &[(0, 0x20), (0x20, 0x20), (0x40, 0x20), (0x1000, 0x1000)],
            0x2000,
        )
        .expect("cover");
        assert_eq!(lists[5], vec![0x60]);
        assert_eq!(lists[6], Vec::<u32>::new());
        assert_eq!(lists[7], vec![0x80]);
        assert_eq!(lists[8], vec![0x100]);
        assert_eq!(lists[9], vec![0x200]);
        assert_eq!(lists[10], vec![0x400]);
        assert_eq!(lists[11], vec![0x800]);
    }

    #[test]
    fn misaligned_gap_fails() {
        // Gap [0x21, 0x40) can never be covered by 32-byte-aligned blocks.
        let err = build_free_lists(&[(0, 0x21), (0x40, 0x20)], 0x60).unwrap_err();
        assert!(matches!(err, StoreError::CorruptedFile(_)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn planned_containers_tile_exactly(
            sizes in proptest::collection::vec(8_usize..=4096, 0..40),
        ) {
            let plan = plan_container(&sizes).expect("plan");
            let mut allocated = vec![
                (0, HEADER_RESERVATION),
                (TREE_HEADER_OFFSET, TREE_HEADER_BLOCK_SIZE),
                (plan.allocator_offset, plan.allocator_size),
            ];
            allocated.extend(plan.placements.iter().map(|p| (p.offset, p.size())));
            allocated.sort_unstable();
            assert_exact_cover(&allocated, &plan.allocator.free_lists, plan.file_end);

            // Every free offset is aligned to its bucket.
            for (pow, list) in plan.allocator.free_lists.iter().enumerate() {
                for &offset in list {
                    prop_assert_eq!(offset % (1_u32 << pow), 0);
                }
            }
        }
    }
}
