#![forbid(unsafe_code)]
//! Page-bounded B-tree bulk loader.
//!
//! Loads an already-sorted sequence of encoded records into a tree whose
//! nodes each serialize to at most one 4096-byte page. Records arrive in
//! order, so insertion always descends the rightmost spine; an overfull
//! node splits at the separator that best balances the two halves, and the
//! separator is promoted to the parent. The node graph is an arena — a
//! vector of nodes addressed by index — so splits never juggle aliased
//! references.

use dss_error::StoreError;
use dss_types::{Writer, PAGE_SIZE};
use tracing::debug;

const PAGE: usize = PAGE_SIZE as usize;

/// Serialized node header: rightmost-child word plus entry count.
pub const NODE_HEADER_LEN: usize = 8;

/// Per-record overhead inside an internal node (one child pointer).
const CHILD_PTR_LEN: usize = 4;

#[derive(Debug, Default)]
struct Node {
    records: Vec<Vec<u8>>,
    /// Arena indices; empty for a leaf, `records.len() + 1` otherwise.
    children: Vec<usize>,
    /// Cached serialized size, maintained on every mutation.
    size: usize,
}

impl Node {
    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    fn overhead(&self) -> usize {
        if self.is_leaf() { 0 } else { CHILD_PTR_LEN }
    }
}

fn node_size(records: &[Vec<u8>], is_leaf: bool) -> usize {
    let overhead = if is_leaf { 0 } else { CHILD_PTR_LEN };
    NODE_HEADER_LEN + records.iter().map(|r| r.len() + overhead).sum::<usize>()
}

/// Arena-based bulk loader. Feed records in sorted order via [`push`],
/// then serialize with block numbers assigned in preorder.
///
/// [`push`]: TreeBuilder::push
#[derive(Debug)]
pub struct TreeBuilder {
    nodes: Vec<Node>,
    root: usize,
    /// Total levels; 1 while the root is a leaf.
    height: u32,
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeBuilder {
    /// An empty tree: a single empty leaf.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                size: NODE_HEADER_LEN,
                ..Node::default()
            }],
            root: 0,
            height: 1,
        }
    }

    /// Bulk-load a sorted record sequence.
    pub fn bulk_load(records: impl IntoIterator<Item = Vec<u8>>) -> Result<Self, StoreError> {
        let mut builder = Self::new();
        for record in records {
            builder.push(record)?;
        }
        Ok(builder)
    }

    #[must_use]
    pub fn node_count(&self) -> u32 {
        u32::try_from(self.nodes.len()).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub fn internal_level_count(&self) -> u32 {
        self.height - 1
    }

    /// Append the next record (which must sort after every prior one).
    pub fn push(&mut self, record: Vec<u8>) -> Result<(), StoreError> {
        if record.len() + NODE_HEADER_LEN > PAGE {
            return Err(StoreError::InvalidRecord {
                reason: format!(
                    "encoded record of {} bytes cannot fit a {PAGE}-byte page",
                    record.len()
                ),
            });
        }

        // Descend the rightmost spine to the insertion leaf.
        let mut path = vec![self.root];
        let mut cur = self.root;
        while let Some(&child) = self.nodes[cur].children.last() {
            cur = child;
            path.push(cur);
        }

        self.nodes[cur].size += record.len();
        self.nodes[cur].records.push(record);

        // Splits cascade up the spine; an ancestor only grows when a
        // separator is promoted into it.
        while let Some(index) = path.pop() {
            if self.nodes[index].size <= PAGE {
                break;
            }
            let parent = path.last().copied();
            self.split(index, parent)?;
        }
        Ok(())
    }

    /// Split an overfull node, promoting the separator into `parent`
    /// (or into a fresh root when `parent` is `None`).
    fn split(&mut self, index: usize, parent: Option<usize>) -> Result<(), StoreError> {
        let entry_overhead = self.nodes[index].overhead();
        let sizes: Vec<usize> = self.nodes[index]
            .records
            .iter()
            .map(|r| r.len() + entry_overhead)
            .collect();
        let total: usize = sizes.iter().sum();
        let n = sizes.len();

        let separator = Self::pick_separator(&sizes, total, n, entry_overhead)?;

        let is_leaf = self.nodes[index].is_leaf();
        let mut records = std::mem::take(&mut self.nodes[index].records);
        let right_records = records.split_off(separator + 1);
        let Some(sep_record) = records.pop() else {
            return Err(StoreError::CorruptedFile(
                "unable to split an empty node".to_owned(),
            ));
        };
        let left_records = records;

        let (left_children, right_children) = if is_leaf {
            (Vec::new(), Vec::new())
        } else {
            // Left keeps one more child than it has records.
            let mut children = std::mem::take(&mut self.nodes[index].children);
            let right_children = children.split_off(separator + 1);
            (children, right_children)
        };

        debug!(
            target: "dss::btree",
            event = "node_split",
            node = index,
            left_entries = left_records.len(),
            right_entries = right_records.len(),
            promoted_len = sep_record.len()
        );

        self.nodes[index].size = node_size(&left_records, is_leaf);
        self.nodes[index].records = left_records;
        self.nodes[index].children = left_children;

        let right = self.nodes.len();
        self.nodes.push(Node {
            size: node_size(&right_records, is_leaf),
            records: right_records,
            children: right_children,
        });

        match parent {
            Some(p) => {
                debug_assert_eq!(self.nodes[p].children.last(), Some(&index));
                self.nodes[p].size += sep_record.len() + CHILD_PTR_LEN;
                self.nodes[p].records.push(sep_record);
                self.nodes[p].children.push(right);
            }
            None => {
                let new_root = self.nodes.len();
                self.nodes.push(Node {
                    size: NODE_HEADER_LEN + sep_record.len() + CHILD_PTR_LEN,
                    records: vec![sep_record],
                    children: vec![index, right],
                });
                self.root = new_root;
                self.height += 1;
                debug!(target: "dss::btree", event = "root_grown", height = self.height);
            }
        }
        Ok(())
    }

    /// Choose the separator index minimizing the size imbalance, halves
    /// within the page budget. The separator is promoted into an internal
    /// node, so it must also fit there (record + header + child pointer).
    /// Prefers splits with both halves non-empty; falls back to an empty
    /// side, and fails when not even that fits.
    fn pick_separator(
        sizes: &[usize],
        total: usize,
        n: usize,
        entry_overhead: usize,
    ) -> Result<usize, StoreError> {
        let candidate = |i: usize| {
            let sep_len = sizes[i] - entry_overhead;
            if sep_len + NODE_HEADER_LEN + CHILD_PTR_LEN > PAGE {
                return None;
            }
            let prefix: usize = sizes[..i].iter().sum();
            let left = NODE_HEADER_LEN + prefix;
            let right = NODE_HEADER_LEN + total - prefix - sizes[i];
            (left <= PAGE && right <= PAGE).then(|| left.abs_diff(right))
        };

        let best = |range: &mut dyn Iterator<Item = usize>| {
            range
                .filter_map(|i| candidate(i).map(|imbalance| (imbalance, i)))
                .min()
                .map(|(_, i)| i)
        };

        // Both halves non-empty: separator strictly inside.
        if n >= 3 {
            if let Some(i) = best(&mut (1..n - 1)) {
                return Ok(i);
            }
        }
        // One empty side is acceptable as long as the other half fits.
        if n >= 2 {
            if let Some(i) = best(&mut [0, n - 1].into_iter()) {
                return Ok(i);
            }
        }
        Err(StoreError::InvalidRecord {
            reason: "unable to split node within the page budget".to_owned(),
        })
    }

    /// Serialize every node, assigning block numbers `first_block..` in
    /// preorder. Element `k` of the result belongs to block
    /// `first_block + k`; the root is always `first_block`.
    pub fn serialize(&self, first_block: u32) -> Result<Vec<Vec<u8>>, StoreError> {
        let order = self.preorder();
        let mut block_of = vec![0_u32; self.nodes.len()];
        for (k, &index) in order.iter().enumerate() {
            let k = u32::try_from(k).map_err(|_| StoreError::CorruptedFile(
                "node count overflow".to_owned(),
            ))?;
            block_of[index] = first_block
                .checked_add(k)
                .ok_or_else(|| StoreError::CorruptedFile("block number overflow".to_owned()))?;
        }

        let mut out = Vec::with_capacity(order.len());
        for &index in &order {
            let node = &self.nodes[index];
            let mut w = Writer::with_capacity(node.size);
            if node.is_leaf() {
                w.write_u32(0);
                w.write_u32(u32::try_from(node.records.len()).unwrap_or(u32::MAX));
                for record in &node.records {
                    w.write_bytes(record);
                }
            } else {
                let rightmost = node.children[node.children.len() - 1];
                w.write_u32(block_of[rightmost]);
                w.write_u32(u32::try_from(node.records.len()).unwrap_or(u32::MAX));
                for (child, record) in node.children.iter().zip(&node.records) {
                    w.write_u32(block_of[*child]);
                    w.write_bytes(record);
                }
            }
            debug_assert_eq!(w.position(), node.size);
            out.push(w.into_bytes());
        }
        Ok(out)
    }

    /// Preorder node order: root first, then each child subtree
    /// left-to-right (matching the read-side traversal).
    fn preorder(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(index) = stack.pop() {
            order.push(index);
            stack.extend(self.nodes[index].children.iter().rev());
        }
        order
    }
}
