#![forbid(unsafe_code)]
//! Shared primitives for the Bud1 container format.
//!
//! `FourCC` identifiers, the buddy block-address codec, bounds-checked
//! big-endian read helpers, and the `Cursor`/`Writer` pair every other
//! crate parses and serializes through. Pure data manipulation — no I/O.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Logical offset of the buddy-allocator header reservation end.
///
/// The first 0x20 logical bytes hold the magic and the allocator
/// offset/size fields and are never covered by any block.
pub const HEADER_RESERVATION: u32 = 0x20;

/// Upper bound on any tree node block.
pub const PAGE_SIZE: u32 = 0x1000;

/// Smallest representable buddy block (2^5).
pub const MIN_BLOCK_POW: u32 = 5;

/// Largest representable buddy block exponent.
pub const MAX_BLOCK_POW: u32 = 31;

pub const MIN_BLOCK_SIZE: u32 = 1 << MIN_BLOCK_POW;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid magic: expected {expected:#x}, got {actual:#x}")]
    InvalidMagic { expected: u32, actual: u32 },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("integer conversion failed: {field}")]
    IntegerConversion { field: &'static str },
    #[error("invalid UTF-16 string at offset {offset}")]
    InvalidUtf16 { offset: usize },
    #[error("unknown record data type {code:#010x}")]
    UnknownDataType { code: u32 },
}

// ── Big-endian read helpers ─────────────────────────────────────────────────

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_be_u16(data: &[u8], offset: usize) -> Result<u16, ParseError> {
    let bytes = ensure_slice(data, offset, 2)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

#[inline]
pub fn read_be_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn read_be_u64(data: &[u8], offset: usize) -> Result<u64, ParseError> {
    let bytes = ensure_slice(data, offset, 8)?;
    Ok(u64::from_be_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]))
}

#[inline]
pub fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N], ParseError> {
    let bytes = ensure_slice(data, offset, N)?;
    let mut out = [0_u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

// ── Alignment math ──────────────────────────────────────────────────────────

/// Round `value` down to the nearest multiple of `alignment`.
///
/// `alignment` must be a non-zero power of two; returns `None` otherwise.
#[must_use]
pub fn align_down(value: u32, alignment: u32) -> Option<u32> {
    if alignment == 0 || !alignment.is_power_of_two() {
        return None;
    }
    Some(value & !(alignment - 1))
}

/// Round `value` up to the nearest multiple of `alignment`.
///
/// `alignment` must be a non-zero power of two; returns `None` on overflow
/// or if `alignment` is invalid.
#[must_use]
pub fn align_up(value: u32, alignment: u32) -> Option<u32> {
    if alignment == 0 || !alignment.is_power_of_two() {
        return None;
    }
    let mask = alignment - 1;
    value.checked_add(mask).map(|v| v & !mask)
}

/// Narrow a `u32` to `usize` with an explicit error path.
pub fn u32_to_usize(value: u32, field: &'static str) -> Result<usize, ParseError> {
    usize::try_from(value).map_err(|_| ParseError::IntegerConversion { field })
}

// ── FourCC ──────────────────────────────────────────────────────────────────

/// Four ASCII bytes stored as a big-endian `u32`.
///
/// Equality and hashing are on the integer; `Display` renders the ASCII
/// form when printable and falls back to hex otherwise.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FourCC(pub u32);

impl FourCC {
    /// Build from a 4-byte ASCII literal. Total — use for known codes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(bytes))
    }

    /// Build from arbitrary text; fails unless exactly four ASCII bytes.
    pub fn from_str_exact(text: &str) -> Result<Self, ParseError> {
        let bytes = text.as_bytes();
        if bytes.len() != 4 {
            return Err(ParseError::InvalidField {
                field: "fourcc",
                reason: "must be exactly four bytes",
            });
        }
        if !bytes.iter().all(u8::is_ascii) {
            return Err(ParseError::InvalidField {
                field: "fourcc",
                reason: "must be ASCII",
            });
        }
        Ok(Self(u32::from_be_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3],
        ])))
    }

    #[must_use]
    pub const fn to_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    /// Whether all four bytes are printable ASCII.
    #[must_use]
    pub fn is_printable(self) -> bool {
        self.to_bytes()
            .iter()
            .all(|b| (0x20..0x7F).contains(b))
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_printable() {
            let bytes = self.to_bytes();
            for b in bytes {
                write!(f, "{}", b as char)?;
            }
            Ok(())
        } else {
            write!(f, "{:#010x}", self.0)
        }
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCC({self})")
    }
}

// ── Buddy block address ─────────────────────────────────────────────────────

/// Packed buddy block address: low 5 bits hold the size exponent, the
/// upper 27 bits the file offset. The offset must be a multiple of the
/// block size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockAddress(u32);

impl BlockAddress {
    /// Encode an (offset, exponent) pair.
    pub fn new(offset: u32, size_pow: u32) -> Result<Self, ParseError> {
        if !(MIN_BLOCK_POW..=MAX_BLOCK_POW).contains(&size_pow) {
            return Err(ParseError::InvalidField {
                field: "block_address",
                reason: "size exponent out of range",
            });
        }
        if offset & 0x1F != 0 {
            return Err(ParseError::InvalidField {
                field: "block_address",
                reason: "offset collides with exponent bits",
            });
        }
        if offset % (1_u32 << size_pow) != 0 {
            return Err(ParseError::InvalidField {
                field: "block_address",
                reason: "offset not aligned to block size",
            });
        }
        Ok(Self(offset | size_pow))
    }

    /// Decode a raw table entry, validating exponent range and alignment.
    pub fn from_raw(raw: u32) -> Result<Self, ParseError> {
        let size_pow = raw & 0x1F;
        if size_pow < MIN_BLOCK_POW {
            return Err(ParseError::InvalidField {
                field: "block_address",
                reason: "size exponent below minimum",
            });
        }
        let offset = raw & !0x1F;
        if offset % (1_u32 << size_pow) != 0 {
            return Err(ParseError::InvalidField {
                field: "block_address",
                reason: "offset not aligned to block size",
            });
        }
        Ok(Self(raw))
    }

    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn offset(self) -> u32 {
        self.0 & !0x1F
    }

    #[must_use]
    pub const fn size_pow(self) -> u32 {
        self.0 & 0x1F
    }

    #[must_use]
    pub const fn size(self) -> u32 {
        1 << self.size_pow()
    }
}

impl fmt::Display for BlockAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}+{:#x}", self.offset(), self.size())
    }
}

// ── Cursor ──────────────────────────────────────────────────────────────────

/// Bounds-checked big-endian reader over a byte slice.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Move the read position; fails past the end of the slice.
    pub fn seek(&mut self, pos: usize) -> Result<(), ParseError> {
        if pos > self.data.len() {
            return Err(ParseError::InsufficientData {
                needed: pos,
                offset: 0,
                actual: self.data.len(),
            });
        }
        self.pos = pos;
        Ok(())
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ParseError> {
        let out = ensure_slice(self.data, self.pos, len)?;
        self.pos += len;
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, ParseError> {
        let bytes = self.read_bytes(1)?;
        Ok(bytes[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, ParseError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, ParseError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, ParseError> {
        let bytes = self.read_bytes(8)?;
        Ok(u64::from_be_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]))
    }

    pub fn read_fourcc(&mut self) -> Result<FourCC, ParseError> {
        Ok(FourCC(self.read_u32()?))
    }

    /// Read `char_count` UTF-16BE code units and decode them.
    ///
    /// Fails on length overflow, short data, or unpaired surrogates.
    pub fn read_utf16_be(&mut self, char_count: u32) -> Result<String, ParseError> {
        let count = usize::try_from(char_count).map_err(|_| ParseError::IntegerConversion {
            field: "utf16_char_count",
        })?;
        let byte_len = count
            .checked_mul(2)
            .ok_or(ParseError::IntegerConversion {
                field: "utf16_byte_len",
            })?;
        let start = self.pos;
        let bytes = self.read_bytes(byte_len)?;
        let units = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
        char::decode_utf16(units)
            .collect::<Result<String, _>>()
            .map_err(|_| ParseError::InvalidUtf16 { offset: start })
    }
}

// ── Writer ──────────────────────────────────────────────────────────────────

/// Append-only big-endian writer.
#[derive(Debug, Default, Clone)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    #[must_use]
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_fourcc(&mut self, code: FourCC) {
        self.write_u32(code.0);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Write a string as UTF-16BE code units (no length prefix).
    pub fn write_utf16_be(&mut self, text: &str) {
        for unit in text.encode_utf16() {
            self.write_u16(unit);
        }
    }

    /// Zero-fill up to `offset`; fails if the buffer is already past it.
    pub fn pad_to(&mut self, offset: usize) -> Result<(), ParseError> {
        if self.buf.len() > offset {
            return Err(ParseError::InvalidField {
                field: "pad_to",
                reason: "writer already past target offset",
            });
        }
        self.buf.resize(offset, 0);
        Ok(())
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}
