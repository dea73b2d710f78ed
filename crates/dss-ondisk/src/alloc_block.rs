//! Buddy-allocator block: block-address table, table of contents, free lists.

use crate::diag::Diagnostic;
use crate::header::FileHeader;
use dss_error::StoreError;
use dss_types::{u32_to_usize, BlockAddress, Cursor, Writer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Number of buddy free lists (one per size exponent 0..=31).
pub const FREE_LIST_COUNT: usize = 32;

/// Block-address tables are sized in chunks of 256 entries.
const ADDRESS_TABLE_CHUNK: u32 = 256;

/// Parsed (or to-be-serialized) allocator state.
///
/// `addresses` holds raw packed entries, padded with zeros to the table
/// length; entry 0 always describes the allocator block itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorBlock {
    pub block_count: u32,
    pub addresses: Vec<u32>,
    pub toc: BTreeMap<String, u32>,
    pub free_lists: [Vec<u32>; FREE_LIST_COUNT],
}

/// Address-table length for a given block count.
#[must_use]
pub fn address_table_len(block_count: u32) -> u32 {
    block_count
        .div_ceil(ADDRESS_TABLE_CHUNK)
        .max(1)
        .saturating_mul(ADDRESS_TABLE_CHUNK)
}

impl AllocatorBlock {
    /// Parse the allocator block out of the logical address space.
    ///
    /// `logical` is the file contents after the 4-byte alignment word;
    /// `header` locates the block. Non-fatal anomalies go to `diag`.
    pub fn parse(
        logical: &[u8],
        header: &FileHeader,
        diag: &mut dyn FnMut(Diagnostic),
    ) -> Result<Self, StoreError> {
        let start = u32_to_usize(header.allocator_offset, "allocator_offset")
            .map_err(|err| StoreError::CorruptedFile(err.to_string()))?;
        let end = start
            .checked_add(
                u32_to_usize(header.allocator_size, "allocator_size")
                    .map_err(|err| StoreError::CorruptedFile(err.to_string()))?,
            )
            .filter(|end| *end <= logical.len())
            .ok_or_else(|| {
                StoreError::CorruptedFile("allocator block lies outside the file".to_owned())
            })?;

        let mut cur = Cursor::new(&logical[start..end]);
        let corrupt = |what: &str| StoreError::CorruptedFile(format!("allocator block: {what}"));

        let block_count = cur
            .read_u32()
            .map_err(|_| corrupt("truncated block count"))?;
        if block_count == 0 {
            return Err(corrupt("block count is zero"));
        }

        let reserved = cur.read_u32().map_err(|_| corrupt("truncated header"))?;
        if reserved != 0 {
            diag(Diagnostic::ReservedNonZero {
                location: "allocator word after block count",
                value: reserved,
            });
        }

        // Block-address table, padded to a multiple of 256 entries. Check
        // the declared length against the buffer before allocating for it.
        let table_len = address_table_len(block_count);
        if u32_to_usize(table_len, "address_table_len")
            .ok()
            .and_then(|len| len.checked_mul(4))
            .is_none_or(|bytes| bytes > cur.remaining())
        {
            return Err(corrupt("truncated block-address table"));
        }
        let mut addresses = Vec::with_capacity(table_len as usize);
        for index in 0..table_len {
            let entry = cur
                .read_u32()
                .map_err(|_| corrupt("truncated block-address table"))?;
            if index >= block_count && entry != 0 {
                return Err(corrupt("non-zero address past the block count"));
            }
            addresses.push(entry);
        }

        // Entry 0 must describe the allocator block itself.
        let self_addr = BlockAddress::new(
            header.allocator_offset,
            header.allocator_size.trailing_zeros(),
        )
        .map_err(|_| StoreError::InvalidBlockAddress)?;
        if addresses[0] != self_addr.raw() {
            return Err(corrupt("entry 0 does not match the declared allocator block"));
        }

        // Table of contents.
        let toc_count = cur
            .read_u32()
            .map_err(|_| corrupt("truncated table of contents"))?;
        if toc_count == 0 || toc_count > block_count {
            return Err(corrupt("table-of-contents count out of range"));
        }
        let mut toc = BTreeMap::new();
        for _ in 0..toc_count {
            let name_len = cur
                .read_u8()
                .map_err(|_| corrupt("truncated table-of-contents entry"))?;
            if name_len == 0 {
                return Err(corrupt("empty table-of-contents name"));
            }
            let name_bytes = cur
                .read_bytes(usize::from(name_len))
                .map_err(|_| corrupt("truncated table-of-contents name"))?;
            if !name_bytes.iter().all(u8::is_ascii) {
                return Err(corrupt("non-ASCII table-of-contents name"));
            }
            let name = String::from_utf8_lossy(name_bytes).into_owned();
            let block = cur
                .read_u32()
                .map_err(|_| corrupt("truncated table-of-contents entry"))?;
            if block == 0 || block >= block_count {
                return Err(corrupt("table-of-contents block number out of range"));
            }
            if name != "DSDB" {
                diag(Diagnostic::UnknownTocEntry {
                    name: name.clone(),
                    block,
                });
            }
            if toc.insert(name, block).is_some() {
                return Err(corrupt("duplicate table-of-contents name"));
            }
        }

        // 32 free lists, one per size exponent.
        let mut free_lists: [Vec<u32>; FREE_LIST_COUNT] = Default::default();
        for (pow, list) in free_lists.iter_mut().enumerate() {
            let count = cur.read_u32().map_err(|_| corrupt("truncated free list"))?;
            let bucket = 1_u32 << pow;
            for _ in 0..count {
                let offset = cur
                    .read_u32()
                    .map_err(|_| corrupt("truncated free list"))?;
                if offset % bucket != 0 {
                    return Err(corrupt("free-list offset not aligned to its bucket"));
                }
                list.push(offset);
            }
        }

        Ok(Self {
            block_count,
            addresses,
            toc,
            free_lists,
        })
    }

    /// The block number bound to the `DSDB` table-of-contents entry.
    pub fn dsdb_block(&self) -> Result<u32, StoreError> {
        self.toc.get("DSDB").copied().ok_or_else(|| {
            StoreError::CorruptedFile("table of contents has no DSDB entry".to_owned())
        })
    }

    /// Resolve a block number to its decoded address.
    pub fn resolve(&self, block: u32) -> Result<BlockAddress, StoreError> {
        if block >= self.block_count {
            return Err(StoreError::CorruptedFile(format!(
                "block number {block} out of range (count {})",
                self.block_count
            )));
        }
        let raw = self.addresses[block as usize];
        if raw == 0 {
            return Err(StoreError::CorruptedFile(format!(
                "block number {block} is unallocated"
            )));
        }
        BlockAddress::from_raw(raw).map_err(|_| StoreError::InvalidBlockAddress)
    }

    /// Serialize the allocator block body.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u32(self.block_count);
        w.write_u32(0);

        let table_len = address_table_len(self.block_count) as usize;
        for index in 0..table_len {
            w.write_u32(self.addresses.get(index).copied().unwrap_or(0));
        }

        w.write_u32(u32::try_from(self.toc.len()).unwrap_or(u32::MAX));
        for (name, block) in &self.toc {
            w.write_u8(u8::try_from(name.len()).unwrap_or(u8::MAX));
            w.write_bytes(name.as_bytes());
            w.write_u32(*block);
        }

        for list in &self.free_lists {
            w.write_u32(u32::try_from(list.len()).unwrap_or(u32::MAX));
            for offset in list {
                w.write_u32(*offset);
            }
        }

        w.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_block() -> AllocatorBlock {
        let mut toc = BTreeMap::new();
        toc.insert("DSDB".to_owned(), 1);
        let mut free_lists: [Vec<u32>; FREE_LIST_COUNT] = Default::default();
        free_lists[5].push(0x60);
        free_lists[11].push(0x800);

        AllocatorBlock {
            block_count: 3,
            addresses: {
                let mut table = vec![0_u32; 256];
                table[0] = 0x1000 | 12; // the allocator itself
                table[1] = 0x20 | 5; // tree header block
                table[2] = 0x40 | 5; // one node
                table
            },
            toc,
            free_lists,
        }
    }

    fn layout(block: &AllocatorBlock) -> (Vec<u8>, FileHeader) {
        let header = FileHeader {
            allocator_offset: 0x1000,
            allocator_size: 0x1000,
        };
        let body = block.serialize();
        let mut logical = vec![0_u8; 0x2000];
        logical[0x1000..0x1000 + body.len()].copy_from_slice(&body);
        (logical, header)
    }

    #[test]
    fn serialize_parse_round_trip() {
        let block = sample_block();
        let (logical, header) = layout(&block);
        let mut diags = Vec::new();
        let parsed = AllocatorBlock::parse(&logical, &header, &mut |d| diags.push(d))
            .expect("round trip");
        // The serialized table is padded to 256 entries; compare the live span.
        assert_eq!(parsed.block_count, block.block_count);
        assert_eq!(&parsed.addresses[..3], &block.addresses[..3]);
        assert_eq!(parsed.toc, block.toc);
        assert_eq!(parsed.free_lists, block.free_lists);
        assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
    }

    #[test]
    fn unknown_toc_names_are_diagnosed_and_retained() {
        let mut block = sample_block();
        block.toc.insert("Iloc".to_owned(), 2);
        let (logical, header) = layout(&block);
        let mut diags = Vec::new();
        let parsed = AllocatorBlock::parse(&logical, &header, &mut |d| diags.push(d))
            .expect("parse");
        assert_eq!(parsed.toc.get("Iloc"), Some(&2));
        assert_eq!(
            diags,
            vec![Diagnostic::UnknownTocEntry {
                name: "Iloc".to_owned(),
                block: 2
            }]
        );
    }

    #[test]
    fn reserved_word_emits_diagnostic() {
        let block = sample_block();
        let (mut logical, header) = layout(&block);
        logical[0x1004..0x1008].copy_from_slice(&7_u32.to_be_bytes());
        let mut diags = Vec::new();
        AllocatorBlock::parse(&logical, &header, &mut |d| diags.push(d)).expect("parse");
        assert!(matches!(
            diags.as_slice(),
            [Diagnostic::ReservedNonZero { value: 7, .. }]
        ));
    }

    #[test]
    fn rejects_zero_block_count() {
        let block = sample_block();
        let (mut logical, header) = layout(&block);
        logical[0x1000..0x1004].copy_from_slice(&0_u32.to_be_bytes());
        assert!(matches!(
            AllocatorBlock::parse(&logical, &header, &mut |_| {}),
            Err(StoreError::CorruptedFile(_))
        ));
    }

    #[test]
    fn rejects_entry_zero_mismatch() {
        let mut block = sample_block();
        block.addresses[0] = 0x2000 | 12; // does not match the header
        let (logical, header) = layout(&block);
        assert!(matches!(
            AllocatorBlock::parse(&logical, &header, &mut |_| {}),
            Err(StoreError::CorruptedFile(_))
        ));
    }

    #[test]
    fn rejects_nonzero_entry_past_block_count() {
        let mut block = sample_block();
        block.addresses[10] = 0x40 | 5; // block_count is 3
        let (logical, header) = layout(&block);
        assert!(matches!(
            AllocatorBlock::parse(&logical, &header, &mut |_| {}),
            Err(StoreError::CorruptedFile(_))
        ));
    }

    #[test]
    fn rejects_unaligned_free_list_offset() {
        let mut block = sample_block();
        block.free_lists[11][0] = 0x900; // not a multiple of 0x800
        let (logical, header) = layout(&block);
        assert!(matches!(
            AllocatorBlock::parse(&logical, &header, &mut |_| {}),
            Err(StoreError::CorruptedFile(_))
        ));
    }

    #[test]
    fn rejects_toc_block_out_of_range() {
        let mut block = sample_block();
        block.toc.insert("Xtra".to_owned(), 3); // block_count is 3
        let (logical, header) = layout(&block);
        assert!(matches!(
            AllocatorBlock::parse(&logical, &header, &mut |_| {}),
            Err(StoreError::CorruptedFile(_))
        ));
    }

    #[test]
    fn resolve_checks_range_and_allocation() {
        let block = sample_block();
        let addr = block.resolve(1).expect("tree header block");
        assert_eq!(addr.offset(), 0x20);
        assert_eq!(addr.size(), 32);
        assert!(block.resolve(3).is_err());

        let mut sparse = block.clone();
        sparse.addresses[2] = 0;
        assert!(sparse.resolve(2).is_err());
    }

    #[test]
    fn address_table_len_rounds_to_256() {
        assert_eq!(address_table_len(1), 256);
        assert_eq!(address_table_len(256), 256);
        assert_eq!(address_table_len(257), 512);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn parse_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let header = FileHeader {
                allocator_offset: 0,
                allocator_size: 0x400,
            };
            let _ = AllocatorBlock::parse(&bytes, &header, &mut |_| {});
        }
    }
}
