#![forbid(unsafe_code)]
//! Adversarial parsing: a hand-built valid container is mutated field by
//! field (and at random) and fed through the full read pipeline. Every
//! mutation must fail cleanly with a public error kind — never a panic —
//! and the systematic corruptions must exercise each kind at least once.

use dss_error::StoreError;
use dss_ondisk::{
    alloc_block::AllocatorBlock,
    header::{FileHeader, TreeHeader, ALIGNMENT_WORD},
    read_records, Record, Value,
};
use dss_types::{Writer, PAGE_SIZE};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Build a complete, valid container image: one leaf with two records,
/// the allocator block at 0x1000.
fn valid_image() -> Vec<u8> {
    let records = [
        Record::new(
            "alpha.txt",
            dss_ondisk::record::codes::ILOC,
            Value::Blob(vec![0_u8; 16]),
        ),
        Record::new(
            "beta.txt",
            dss_ondisk::record::codes::CMMT,
            Value::Ustr("hello".to_owned()),
        ),
    ];

    let mut leaf = Writer::new();
    leaf.write_u32(0);
    leaf.write_u32(2);
    for record in &records {
        leaf.write_bytes(&record.encode().expect("encode"));
    }
    let leaf = leaf.into_bytes();
    let leaf_block_size: u32 = u32::try_from(leaf.len().next_power_of_two().max(32)).expect("fits");
    assert!(leaf_block_size <= PAGE_SIZE);
    // Buddy rule: the block must sit at a multiple of its own size.
    let leaf_offset = 0x40_u32.next_multiple_of(leaf_block_size);
    let leaf_end = leaf_offset + leaf_block_size;

    let mut free_lists: [Vec<u32>; 32] = Default::default();
    let mut cover = |mut offset: u32, end: u32| {
        while offset < end {
            let pow = offset
                .trailing_zeros()
                .min(31 - (end - offset).leading_zeros());
            free_lists[pow as usize].push(offset);
            offset += 1 << pow;
        }
    };
    cover(0x40, leaf_offset);
    cover(leaf_end, 0x1000);

    let mut toc = BTreeMap::new();
    toc.insert("DSDB".to_owned(), 1);
    let mut addresses = vec![0_u32; 256];
    addresses[0] = 0x1000 | 12;
    addresses[1] = 0x20 | 5;
    addresses[2] = leaf_offset | leaf_block_size.trailing_zeros();
    let alloc = AllocatorBlock {
        block_count: 3,
        addresses,
        toc,
        free_lists,
    };

    let mut logical = Writer::new();
    FileHeader {
        allocator_offset: 0x1000,
        allocator_size: 0x1000,
    }
    .write(&mut logical)
    .expect("header");
    TreeHeader {
        root_node_block: 2,
        internal_level_count: 0,
        record_count: 2,
        node_count: 1,
        page_size: PAGE_SIZE,
    }
    .write(&mut logical);
    logical.pad_to(leaf_offset as usize).expect("pad");
    logical.write_bytes(&leaf);
    logical.pad_to(0x1000).expect("pad");
    logical.write_bytes(&alloc.serialize());
    logical.pad_to(0x2000).expect("pad");

    let mut file = ALIGNMENT_WORD.to_be_bytes().to_vec();
    file.extend_from_slice(logical.as_bytes());
    file
}

/// The full read pipeline, as the container driver composes it.
fn read_pipeline(bytes: &[u8]) -> Result<Vec<Record>, StoreError> {
    let header = FileHeader::parse(bytes)?;
    let logical = &bytes[4..];
    let alloc = AllocatorBlock::parse(logical, &header, &mut |_| {})?;
    let dsdb = alloc.dsdb_block()?;
    let addr = alloc.resolve(dsdb)?;
    let start = addr.offset() as usize;
    let end = start
        .checked_add(addr.size() as usize)
        .filter(|end| *end <= logical.len())
        .ok_or(StoreError::InvalidBTreeHeader)?;
    let tree = TreeHeader::parse(&logical[start..end])?;
    read_records(logical, &alloc, &tree, &mut |_| {})
}

#[derive(Debug, Default)]
struct ErrorCoverage {
    invalid_magic: u32,
    invalid_header: u32,
    offset_mismatch: u32,
    invalid_btree_header: u32,
    corrupted_file: u32,
    other: u32,
}

impl ErrorCoverage {
    fn observe(&mut self, err: &StoreError) {
        match err {
            StoreError::InvalidMagic => self.invalid_magic += 1,
            StoreError::InvalidHeader => self.invalid_header += 1,
            StoreError::OffsetMismatch => self.offset_mismatch += 1,
            StoreError::InvalidBTreeHeader => self.invalid_btree_header += 1,
            StoreError::CorruptedFile(_) => self.corrupted_file += 1,
            _ => self.other += 1,
        }
    }
}

#[test]
fn baseline_image_parses() {
    let records = read_pipeline(&valid_image()).expect("valid image");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].filename(), "alpha.txt");
    assert_eq!(records[1].filename(), "beta.txt");
}

#[test]
fn systematic_corruptions_hit_each_error_kind() {
    // Each case is a set of u32 patches (file offset, replacement).
    let corruptions: &[(&[(usize, u32)], &str)] = &[
        (&[(0x00, 0x2)], "alignment word"),
        (&[(0x04, 0xDEAD_BEEF)], "magic"),
        (&[(0x08, 0x2000)], "allocator offset without matching check"),
        (
            // Both copies patched, so the mismatch check passes and the
            // alignment check is what fires.
            &[(0x08, 0x1001), (0x10, 0x1001)],
            "allocator offset misaligned",
        ),
        (&[(0x0C, 0x600)], "allocator size not a power of two"),
        (&[(0x10, 0x2000)], "offset check mismatch"),
        (&[(0x24, 0)], "root node block zero"),
        (&[(0x28, 9)], "level count above node count"),
        (&[(0x2C, 5)], "record count mismatch"),
        (&[(0x30, 7)], "node count mismatch"),
        (&[(0x34, 0x20)], "page size"),
    ];

    let baseline = valid_image();
    let mut coverage = ErrorCoverage::default();
    for &(patches, label) in corruptions {
        let mut bytes = baseline.clone();
        for &(offset, replacement) in patches {
            bytes[offset..offset + 4].copy_from_slice(&replacement.to_be_bytes());
        }
        let err = read_pipeline(&bytes)
            .expect_err(&format!("corrupting {label} must fail"));
        coverage.observe(&err);
    }

    assert!(coverage.invalid_magic >= 1);
    assert!(coverage.invalid_header >= 2, "alignment word and offset alignment");
    assert!(coverage.offset_mismatch >= 2, "either offset copy diverging");
    assert!(coverage.invalid_btree_header >= 3, "root, levels, page size");
    assert!(coverage.corrupted_file >= 3, "allocator size and both counters");
    assert_eq!(coverage.other, 0);
}

#[test]
fn allocator_body_corruptions_never_panic() {
    let baseline = valid_image();
    // The allocator body starts at file offset 0x1004; walk a window of
    // single-byte flips across it.
    for offset in 0x1004..0x1100 {
        let mut bytes = baseline.clone();
        bytes[offset] ^= 0xFF;
        let outcome = catch_unwind(AssertUnwindSafe(|| read_pipeline(&bytes)));
        assert!(
            outcome.is_ok(),
            "parser panicked on allocator flip at {offset:#x}"
        );
    }
}

#[test]
fn truncations_never_panic() {
    let baseline = valid_image();
    for len in 0..baseline.len() {
        let outcome = catch_unwind(AssertUnwindSafe(|| read_pipeline(&baseline[..len])));
        assert!(outcome.is_ok(), "parser panicked on truncation to {len}");
        assert!(
            read_pipeline(&baseline[..len]).is_err(),
            "truncated file parsed at {len}"
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_mutations_never_panic(
        offset in 0_usize..0x2004,
        value in any::<u8>(),
    ) {
        let mut bytes = valid_image();
        bytes[offset] = value;
        let outcome = catch_unwind(AssertUnwindSafe(|| read_pipeline(&bytes)));
        prop_assert!(outcome.is_ok(), "parser panicked on mutation at {offset:#x}");
    }

    #[test]
    fn arbitrary_garbage_never_panics(
        bytes in proptest::collection::vec(any::<u8>(), 0..1024),
    ) {
        let outcome = catch_unwind(AssertUnwindSafe(|| read_pipeline(&bytes)));
        prop_assert!(outcome.is_ok(), "parser panicked on garbage input");
    }
}
