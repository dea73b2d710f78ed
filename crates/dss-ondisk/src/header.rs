//! Container prefix and B-tree root-metadata codecs.
//!
//! The file opens with a 4-byte alignment word; every stored offset after
//! it is relative to the logical space that follows. `FileHeader` covers
//! the 0x20-byte logical header reservation, `TreeHeader` the fixed
//! 20-byte root metadata that lives in block 1.

use dss_error::StoreError;
use dss_types::{read_be_u32, ParseError, Writer, HEADER_RESERVATION, MIN_BLOCK_SIZE, PAGE_SIZE};
use serde::{Deserialize, Serialize};

/// Fixed first word of every container file.
pub const ALIGNMENT_WORD: u32 = 1;

/// `"Bud1"` big-endian.
pub const MAGIC: u32 = 0x4275_6431;

/// Byte length of the serialized root-metadata prefix.
pub const TREE_HEADER_LEN: usize = 20;

/// Smallest parseable file: prefix word plus the logical reservation.
pub const MIN_FILE_LEN: usize = 4 + HEADER_RESERVATION as usize;

/// The parsed logical header reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHeader {
    pub allocator_offset: u32,
    pub allocator_size: u32,
}

impl FileHeader {
    /// Parse and validate the container prefix from the whole file.
    pub fn parse(file: &[u8]) -> Result<Self, StoreError> {
        if file.len() < MIN_FILE_LEN {
            return Err(StoreError::InvalidHeader);
        }
        let word = |offset| read_be_u32(file, offset).map_err(|_| StoreError::InvalidHeader);

        if word(0x00)? != ALIGNMENT_WORD {
            return Err(StoreError::InvalidHeader);
        }
        let magic = word(0x04)?;
        if magic != MAGIC {
            return Err(StoreError::InvalidMagic);
        }

        let allocator_offset = word(0x08)?;
        let allocator_size = word(0x0C)?;
        let offset_check = word(0x10)?;
        if offset_check != allocator_offset {
            return Err(StoreError::OffsetMismatch);
        }
        if allocator_offset % 4 != 0 {
            return Err(StoreError::InvalidHeader);
        }
        if !allocator_size.is_power_of_two() || allocator_size < MIN_BLOCK_SIZE {
            return Err(StoreError::CorruptedFile(format!(
                "allocator size {allocator_size:#x} is not a power of two >= {MIN_BLOCK_SIZE:#x}"
            )));
        }

        Ok(Self {
            allocator_offset,
            allocator_size,
        })
    }

    /// Serialize the logical header reservation (magic through the 16
    /// reserved bytes). The caller prepends the alignment word.
    pub fn write(&self, w: &mut Writer) -> Result<(), ParseError> {
        w.write_u32(MAGIC);
        w.write_u32(self.allocator_offset);
        w.write_u32(self.allocator_size);
        w.write_u32(self.allocator_offset);
        w.pad_to(HEADER_RESERVATION as usize)
    }
}

/// The fixed root-metadata prefix of block 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeHeader {
    pub root_node_block: u32,
    /// Zero when the root is a leaf; otherwise the number of internal
    /// levels (one less than total height).
    pub internal_level_count: u32,
    pub record_count: u32,
    pub node_count: u32,
    pub page_size: u32,
}

impl TreeHeader {
    /// Parse from a block's bytes, enforcing the header invariants.
    pub fn parse(block: &[u8]) -> Result<Self, StoreError> {
        let word = |offset| read_be_u32(block, offset).map_err(|_| StoreError::InvalidBTreeHeader);

        let header = Self {
            root_node_block: word(0x00)?,
            internal_level_count: word(0x04)?,
            record_count: word(0x08)?,
            node_count: word(0x0C)?,
            page_size: word(0x10)?,
        };

        if header.page_size != PAGE_SIZE
            || header.root_node_block == 0
            || header.node_count == 0
            || header.internal_level_count > header.node_count
        {
            return Err(StoreError::InvalidBTreeHeader);
        }
        Ok(header)
    }

    pub fn write(&self, w: &mut Writer) {
        w.write_u32(self.root_node_block);
        w.write_u32(self.internal_level_count);
        w.write_u32(self.record_count);
        w.write_u32(self.node_count);
        w.write_u32(self.page_size);
    }
}
