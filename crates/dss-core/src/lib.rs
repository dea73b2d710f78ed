#![forbid(unsafe_code)]
//! Container driver: the mutable record set and the read/write pipeline.
//!
//! [`DsStore`] holds records sorted under the total record order; the
//! sorted vector doubles as the dedup index, since the comparison is only
//! `Equal` for an identical `(filename, type code)` pair. Reading and
//! writing are pure byte-buffer transforms; thin `open`/`save` wrappers
//! put `std::fs` at the edge.

use dss_alloc::plan_container;
use dss_btree::TreeBuilder;
use dss_error::{Result, StoreError};
use dss_ondisk::{
    alloc_block::AllocatorBlock,
    header::{FileHeader, TreeHeader, ALIGNMENT_WORD, TREE_HEADER_LEN},
    order, read_records, Diagnostic, Record,
};
use dss_types::{u32_to_usize, FourCC, Writer, HEADER_RESERVATION, PAGE_SIZE};
use std::cmp::Ordering;
use std::path::Path;
use tracing::warn;

pub use dss_ondisk::{record::codes, record::DIRECTORY_SENTINEL, Value};
pub use dss_types::{BlockAddress, Cursor};

/// An in-memory Bud1 container: a deduplicated, ordered record set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DsStore {
    /// Sorted under [`Record::compare`]; never holds two records with the
    /// same identity.
    records: Vec<Record>,
}

impl DsStore {
    /// An empty container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a container from a record list; duplicates under the
    /// `(filename, type code)` identity are rejected.
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Result<Self> {
        let mut store = Self::new();
        for record in records {
            let filename = record.filename().to_owned();
            let code = record.type_code();
            if store.insert(record).is_some() {
                return Err(StoreError::InvalidRecord {
                    reason: format!("duplicate record for {filename:?} / {code}"),
                });
            }
        }
        Ok(store)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in the total order they will serialize in.
    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    fn position(&self, filename: &str, code: FourCC) -> std::result::Result<usize, usize> {
        self.records.binary_search_by(|record| {
            order::compare_keys(record.filename(), record.type_code(), filename, code)
        })
    }

    /// Insert a record, replacing (and returning) any prior record with
    /// the same identity.
    pub fn insert(&mut self, record: Record) -> Option<Record> {
        match self.position(record.filename(), record.type_code()) {
            Ok(index) => Some(std::mem::replace(&mut self.records[index], record)),
            Err(index) => {
                self.records.insert(index, record);
                None
            }
        }
    }

    /// Remove and return the record with the given identity.
    pub fn remove(&mut self, filename: &str, code: FourCC) -> Option<Record> {
        match self.position(filename, code) {
            Ok(index) => Some(self.records.remove(index)),
            Err(_) => None,
        }
    }

    #[must_use]
    pub fn get(&self, filename: &str, code: FourCC) -> Option<&Record> {
        self.position(filename, code)
            .ok()
            .map(|index| &self.records[index])
    }

    // ── Read path ───────────────────────────────────────────────────────

    /// Parse a container from its file bytes. Diagnostics are logged via
    /// `tracing::warn!`; use [`read_with`] to capture them instead.
    ///
    /// [`read_with`]: DsStore::read_with
    pub fn read(bytes: &[u8]) -> Result<Self> {
        Self::read_with(bytes, &mut |diagnostic: Diagnostic| {
            warn!(target: "dss::read", %diagnostic, "container diagnostic");
        })
    }

    /// Parse a container, invoking `diag` for every non-fatal anomaly.
    pub fn read_with(bytes: &[u8], diag: &mut dyn FnMut(Diagnostic)) -> Result<Self> {
        let header = FileHeader::parse(bytes)?;
        let logical = &bytes[4..];

        let alloc = AllocatorBlock::parse(logical, &header, diag)?;

        let dsdb = alloc.dsdb_block()?;
        let addr = alloc.resolve(dsdb)?;
        let start = u32_to_usize(addr.offset(), "tree_header_offset")
            .map_err(|err| StoreError::CorruptedFile(err.to_string()))?;
        let tree_block = start
            .checked_add(addr.size() as usize)
            .filter(|end| *end <= logical.len())
            .map(|end| &logical[start..end])
            .ok_or(StoreError::InvalidBTreeHeader)?;
        if tree_block.len() < TREE_HEADER_LEN {
            return Err(StoreError::InvalidBTreeHeader);
        }
        let tree = TreeHeader::parse(tree_block)?;

        let mut records = read_records(logical, &alloc, &tree, diag)?;
        // A file with diagnosed order violations still loads; restore the
        // in-memory invariant. Duplicates were already rejected, so the
        // sort cannot merge identities.
        records.sort_by(Record::compare);
        Ok(Self { records })
    }

    // ── Write path ──────────────────────────────────────────────────────

    /// Serialize the record set into a fresh container file.
    ///
    /// The allocator and tree are rebuilt from scratch: records encode in
    /// order, bulk-load into the page-bounded tree, nodes and the
    /// allocator get buddy-aligned offsets, and the free lists tile
    /// whatever the alignment left over.
    pub fn write(&self) -> Result<Vec<u8>> {
        let record_count = u32::try_from(self.records.len()).map_err(|_| {
            StoreError::InvalidRecord {
                reason: "record count exceeds u32".to_owned(),
            }
        })?;

        let mut encoded = Vec::with_capacity(self.records.len());
        for record in &self.records {
            encoded.push(record.encode()?);
        }

        let builder = TreeBuilder::bulk_load(encoded)?;
        let node_images = builder.serialize(2)?;
        let node_sizes: Vec<usize> = node_images.iter().map(Vec::len).collect();
        let plan = plan_container(&node_sizes)?;

        let tree = TreeHeader {
            root_node_block: 2,
            internal_level_count: builder.internal_level_count(),
            record_count,
            node_count: builder.node_count(),
            page_size: PAGE_SIZE,
        };

        let mut logical = Writer::with_capacity(plan.file_end as usize);
        let write_err = |err: dss_types::ParseError| StoreError::WriteFailed(err.to_string());

        FileHeader {
            allocator_offset: plan.allocator_offset,
            allocator_size: plan.allocator_size,
        }
        .write(&mut logical)
        .map_err(write_err)?;

        debug_assert_eq!(logical.position(), HEADER_RESERVATION as usize);
        tree.write(&mut logical);

        for (image, placement) in node_images.iter().zip(&plan.placements) {
            logical
                .pad_to(placement.offset as usize)
                .map_err(write_err)?;
            logical.write_bytes(image);
        }

        logical
            .pad_to(plan.allocator_offset as usize)
            .map_err(write_err)?;
        logical.write_bytes(&plan.allocator.serialize());
        logical.pad_to(plan.file_end as usize).map_err(write_err)?;

        let mut file = Vec::with_capacity(4 + plan.file_end as usize);
        file.extend_from_slice(&ALIGNMENT_WORD.to_be_bytes());
        file.extend_from_slice(logical.as_bytes());
        Ok(file)
    }

    // ── File-I/O convenience ────────────────────────────────────────────

    /// Read a container from a file on disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                StoreError::FileNotFound(path.to_owned())
            } else {
                StoreError::ReadFailed(err.to_string())
            }
        })?;
        Self::read(&bytes)
    }

    /// Serialize and atomically replace the file contents at `path`
    /// (write to a sibling temp file, then rename over the target).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.write()?;

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = std::path::PathBuf::from(tmp);

        let io_err = |err: std::io::Error| StoreError::WriteFailed(err.to_string());
        std::fs::write(&tmp, bytes).map_err(io_err)?;
        std::fs::rename(&tmp, path).map_err(|err| {
            let _ = std::fs::remove_file(&tmp);
            io_err(err)
        })
    }
}

impl<'a> IntoIterator for &'a DsStore {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Sort comparator re-exported for callers that keep external record
/// lists aligned with the container order.
#[must_use]
pub fn record_order(a: &Record, b: &Record) -> Ordering {
    a.compare(b)
}
