//! B-tree traversal with structural validation.
//!
//! Walks the record tree depth-first from the root, emitting records in
//! file order while rejecting every structural breakage: node reuse,
//! bottomless recursion, zero child pointers, out-of-range blocks,
//! duplicate records, and header counters that disagree with what the
//! traversal actually observed. Order violations inside nodes are
//! diagnostic-only so files produced by buggy writers stay readable.

use crate::alloc_block::AllocatorBlock;
use crate::diag::Diagnostic;
use crate::header::TreeHeader;
use crate::record::Record;
use dss_error::StoreError;
use dss_types::{Cursor, FourCC, ParseError};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Hard recursion ceiling, independent of the claimed node count.
const MAX_DEPTH: u32 = 1024;

/// Read every record of the tree rooted in `tree`, in file order.
pub fn read_records(
    logical: &[u8],
    alloc: &AllocatorBlock,
    tree: &TreeHeader,
    diag: &mut dyn FnMut(Diagnostic),
) -> Result<Vec<Record>, StoreError> {
    let mut walker = Walker {
        logical,
        alloc,
        depth_limit: tree.node_count.min(MAX_DEPTH),
        diag,
        visited: HashSet::new(),
        seen: HashSet::new(),
        records: Vec::new(),
        max_internal_depth: 0,
        seen_internal: false,
    };
    walker.walk(tree.root_node_block, 0)?;

    let visited = u32::try_from(walker.visited.len())
        .map_err(|_| StoreError::CorruptedFile("node count overflow".to_owned()))?;
    if visited != tree.node_count {
        return Err(StoreError::CorruptedFile(format!(
            "header claims {} nodes, traversal found {visited}",
            tree.node_count
        )));
    }

    let record_count = u32::try_from(walker.records.len())
        .map_err(|_| StoreError::CorruptedFile("record count overflow".to_owned()))?;
    if record_count != tree.record_count {
        return Err(StoreError::CorruptedFile(format!(
            "header claims {} records, traversal found {record_count}",
            tree.record_count
        )));
    }

    let levels = if walker.seen_internal {
        walker.max_internal_depth + 1
    } else {
        0
    };
    if levels != tree.internal_level_count {
        return Err(StoreError::CorruptedFile(format!(
            "header claims {} internal levels, traversal found {levels}",
            tree.internal_level_count
        )));
    }

    Ok(walker.records)
}

fn record_error(err: ParseError) -> StoreError {
    match err {
        ParseError::UnknownDataType { code } => StoreError::UnknownDataType(FourCC(code)),
        ParseError::InvalidUtf16 { .. } => StoreError::InvalidUtf16String,
        other => StoreError::CorruptedFile(other.to_string()),
    }
}

struct Walker<'a, 'd> {
    logical: &'a [u8],
    alloc: &'a AllocatorBlock,
    depth_limit: u32,
    diag: &'d mut dyn FnMut(Diagnostic),
    visited: HashSet<u32>,
    seen: HashSet<(String, u32)>,
    records: Vec<Record>,
    max_internal_depth: u32,
    seen_internal: bool,
}

impl Walker<'_, '_> {
    fn walk(&mut self, block: u32, depth: u32) -> Result<(), StoreError> {
        if !self.visited.insert(block) {
            return Err(StoreError::CorruptedFile(format!(
                "node block {block} reached twice"
            )));
        }
        if depth >= self.depth_limit {
            return Err(StoreError::CorruptedFile(format!(
                "tree depth exceeds {} at block {block}",
                self.depth_limit
            )));
        }

        let addr = self.alloc.resolve(block)?;
        let logical = self.logical;
        let start = addr.offset() as usize;
        let node_bytes = start
            .checked_add(addr.size() as usize)
            .filter(|end| *end <= logical.len())
            .map(|end| &logical[start..end])
            .ok_or_else(|| {
                StoreError::CorruptedFile(format!("node block {block} lies outside the file"))
            })?;

        // Records are decoded against the block slice, so every read is
        // bounds-checked to lie within the block.
        let mut cur = Cursor::new(node_bytes);
        let truncated =
            |_| StoreError::CorruptedFile(format!("node block {block} is truncated"));
        let rightmost = cur.read_u32().map_err(truncated)?;
        let entry_count = cur.read_u32().map_err(truncated)?;

        if rightmost == 0 {
            for _ in 0..entry_count {
                let record = Record::decode(&mut cur).map_err(record_error)?;
                self.note_record(record)?;
            }
        } else {
            self.seen_internal = true;
            self.max_internal_depth = self.max_internal_depth.max(depth);
            for _ in 0..entry_count {
                let child = cur.read_u32().map_err(truncated)?;
                if child == 0 {
                    return Err(StoreError::CorruptedFile(format!(
                        "internal node block {block} has a zero child pointer"
                    )));
                }
                // The child subtree is parsed through its own cursor; the
                // saved position of this one survives the recursion.
                let resume = cur.position();
                self.walk(child, depth + 1)?;
                cur.seek(resume).map_err(truncated)?;
                let record = Record::decode(&mut cur).map_err(record_error)?;
                self.note_record(record)?;
            }
            self.walk(rightmost, depth + 1)?;
        }
        Ok(())
    }

    fn note_record(&mut self, record: Record) -> Result<(), StoreError> {
        if !self
            .seen
            .insert((record.filename().to_owned(), record.type_code().0))
        {
            return Err(StoreError::CorruptedFile(format!(
                "duplicate record for {:?} / {}",
                record.filename(),
                record.type_code()
            )));
        }
        if let Some(prev) = self.records.last() {
            if prev.compare(&record) != Ordering::Less {
                (self.diag)(Diagnostic::OutOfOrderRecord {
                    filename: record.filename().to_owned(),
                });
            }
        }
        self.records.push(record);
        Ok(())
    }
}
