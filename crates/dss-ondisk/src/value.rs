//! Record value codec.
//!
//! Maps between the tagged [`Value`] union and its on-disk type code +
//! payload. Blob payloads that sniff as property lists are upgraded to a
//! decoded [`plist::Value`]; the writer re-serializes them as binary
//! property lists inside a `blob` payload.

use dss_error::StoreError;
use dss_types::{Cursor, FourCC, ParseError, Writer};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const TYPE_BOOL: FourCC = FourCC::from_bytes(*b"bool");
pub const TYPE_LONG: FourCC = FourCC::from_bytes(*b"long");
pub const TYPE_SHOR: FourCC = FourCC::from_bytes(*b"shor");
pub const TYPE_COMP: FourCC = FourCC::from_bytes(*b"comp");
pub const TYPE_DUTC: FourCC = FourCC::from_bytes(*b"dutc");
pub const TYPE_TYPE: FourCC = FourCC::from_bytes(*b"type");
pub const TYPE_USTR: FourCC = FourCC::from_bytes(*b"ustr");
pub const TYPE_BLOB: FourCC = FourCC::from_bytes(*b"blob");
pub const TYPE_BOOK: FourCC = FourCC::from_bytes(*b"book");
/// The null value stores type code zero and carries no payload.
pub const TYPE_NULL: FourCC = FourCC(0);

/// Seconds between 1904-01-01 and 1970-01-01 (both UTC).
const MAC_EPOCH_OFFSET_SECS: u64 = 2_082_844_800;
/// `dutc` timestamps tick at 65 536 units per second.
const DUTC_UNITS_PER_SEC: u64 = 65_536;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// A record value, one variant per on-disk type code.
///
/// `Blob` and `PropertyList` are distinct: the reader upgrades a `blob`
/// payload to `PropertyList` when the property-list sniff succeeds, and
/// the writer downgrades on emission.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Long(u32),
    Shor(u16),
    Comp(u64),
    /// Timestamp in 1/65 536-second units since 1904-01-01 UTC.
    Dutc(u64),
    Type(FourCC),
    Ustr(String),
    Blob(Vec<u8>),
    Book(Vec<u8>),
    PropertyList(plist::Value),
    Null,
}

impl Value {
    /// The on-disk type code this value serializes under.
    #[must_use]
    pub fn type_code(&self) -> FourCC {
        match self {
            Self::Bool(_) => TYPE_BOOL,
            Self::Long(_) => TYPE_LONG,
            Self::Shor(_) => TYPE_SHOR,
            Self::Comp(_) => TYPE_COMP,
            Self::Dutc(_) => TYPE_DUTC,
            Self::Type(_) => TYPE_TYPE,
            Self::Ustr(_) => TYPE_USTR,
            Self::Blob(_) | Self::PropertyList(_) => TYPE_BLOB,
            Self::Book(_) => TYPE_BOOK,
            Self::Null => TYPE_NULL,
        }
    }

    /// Decode a value (type code + payload) at the cursor.
    pub fn decode(cur: &mut Cursor<'_>) -> Result<Self, ParseError> {
        let raw = cur.read_u32()?;
        if raw == 0 {
            return Ok(Self::Null);
        }

        match &FourCC(raw).to_bytes() {
            b"bool" => {
                let byte = cur.read_u8()?;
                if byte > 1 {
                    return Err(ParseError::InvalidField {
                        field: "bool_value",
                        reason: "must be 0 or 1",
                    });
                }
                Ok(Self::Bool(byte == 1))
            }
            b"long" => Ok(Self::Long(cur.read_u32()?)),
            b"shor" => {
                let slot = cur.read_u32()?;
                let value = u16::try_from(slot).map_err(|_| ParseError::InvalidField {
                    field: "shor_value",
                    reason: "upper 16 bits must be zero",
                })?;
                Ok(Self::Shor(value))
            }
            b"comp" => Ok(Self::Comp(cur.read_u64()?)),
            b"dutc" => Ok(Self::Dutc(cur.read_u64()?)),
            b"type" => Ok(Self::Type(cur.read_fourcc()?)),
            b"ustr" => {
                let count = cur.read_u32()?;
                Ok(Self::Ustr(cur.read_utf16_be(count)?))
            }
            b"blob" => {
                let len = cur.read_u32()?;
                let bytes = cur.read_bytes(dss_types::u32_to_usize(len, "blob_len")?)?;
                if plist_sniff(bytes) {
                    if let Ok(value) = plist::Value::from_reader(std::io::Cursor::new(bytes)) {
                        return Ok(Self::PropertyList(value));
                    }
                }
                Ok(Self::Blob(bytes.to_vec()))
            }
            b"book" => {
                let len = cur.read_u32()?;
                let bytes = cur.read_bytes(dss_types::u32_to_usize(len, "book_len")?)?;
                Ok(Self::Book(bytes.to_vec()))
            }
            _ => Err(ParseError::UnknownDataType { code: raw }),
        }
    }

    /// Encode type code + payload into the writer.
    pub fn encode(&self, w: &mut Writer) -> Result<(), StoreError> {
        match self {
            Self::Bool(value) => {
                w.write_fourcc(TYPE_BOOL);
                w.write_u8(u8::from(*value));
            }
            Self::Long(value) => {
                w.write_fourcc(TYPE_LONG);
                w.write_u32(*value);
            }
            Self::Shor(value) => {
                w.write_fourcc(TYPE_SHOR);
                w.write_u32(u32::from(*value));
            }
            Self::Comp(value) => {
                w.write_fourcc(TYPE_COMP);
                w.write_u64(*value);
            }
            Self::Dutc(value) => {
                w.write_fourcc(TYPE_DUTC);
                w.write_u64(*value);
            }
            Self::Type(code) => {
                w.write_fourcc(TYPE_TYPE);
                w.write_fourcc(*code);
            }
            Self::Ustr(text) => {
                let units = utf16_len_u32(text)?;
                w.write_fourcc(TYPE_USTR);
                w.write_u32(units);
                w.write_utf16_be(text);
            }
            Self::Blob(bytes) => write_sized(w, TYPE_BLOB, bytes)?,
            Self::Book(bytes) => write_sized(w, TYPE_BOOK, bytes)?,
            Self::PropertyList(value) => {
                let mut bytes = Vec::new();
                value
                    .to_writer_binary(&mut bytes)
                    .map_err(|err| StoreError::PlistSerializationFailed(err.to_string()))?;
                write_sized(w, TYPE_BLOB, &bytes)?;
            }
            Self::Null => w.write_u32(0),
        }
        Ok(())
    }
}

fn write_sized(w: &mut Writer, code: FourCC, bytes: &[u8]) -> Result<(), StoreError> {
    let len = u32::try_from(bytes.len()).map_err(|_| StoreError::InvalidRecord {
        reason: format!("{code} payload of {} bytes exceeds u32", bytes.len()),
    })?;
    w.write_fourcc(code);
    w.write_u32(len);
    w.write_bytes(bytes);
    Ok(())
}

/// UTF-16 code-unit count of `text`, checked against the u32 prefix.
pub(crate) fn utf16_len_u32(text: &str) -> Result<u32, StoreError> {
    u32::try_from(text.encode_utf16().count()).map_err(|_| StoreError::InvalidRecord {
        reason: "string length exceeds u32 code units".to_owned(),
    })
}

/// Whether a blob payload looks like a serialized property list.
#[must_use]
pub fn plist_sniff(bytes: &[u8]) -> bool {
    bytes.starts_with(b"bplist") || bytes.starts_with(b"<?xml")
}

// ── dutc conversions ────────────────────────────────────────────────────────

/// Convert a `dutc` timestamp to wall time.
///
/// The 1/65 536-second tick is not a whole number of nanoseconds, so the
/// sub-second part truncates to nanosecond precision.
pub fn dutc_to_system_time(raw: u64) -> Result<SystemTime, StoreError> {
    let secs = raw / DUTC_UNITS_PER_SEC;
    let frac = raw % DUTC_UNITS_PER_SEC;
    #[allow(clippy::cast_possible_truncation)] // < 1e9 by construction
    let nanos = (frac * NANOS_PER_SEC / DUTC_UNITS_PER_SEC) as u32;

    UNIX_EPOCH
        .checked_sub(Duration::from_secs(MAC_EPOCH_OFFSET_SECS))
        .and_then(|mac_epoch| mac_epoch.checked_add(Duration::new(secs, nanos)))
        .ok_or_else(|| StoreError::InvalidRecord {
            reason: "timestamp not representable as wall time on this platform".to_owned(),
        })
}

/// Convert wall time to a `dutc` timestamp, rounding toward zero.
///
/// Rejects instants before 1904-01-01 and values past the u64 range.
pub fn dutc_from_system_time(time: SystemTime) -> Result<u64, StoreError> {
    let mac_epoch = UNIX_EPOCH
        .checked_sub(Duration::from_secs(MAC_EPOCH_OFFSET_SECS))
        .ok_or_else(|| StoreError::InvalidRecord {
            reason: "1904 epoch not representable on this platform".to_owned(),
        })?;
    let delta = time
        .duration_since(mac_epoch)
        .map_err(|_| StoreError::InvalidRecord {
            reason: "timestamp predates 1904-01-01".to_owned(),
        })?;

    let whole = delta
        .as_secs()
        .checked_mul(DUTC_UNITS_PER_SEC)
        .ok_or_else(|| StoreError::InvalidRecord {
            reason: "timestamp exceeds the dutc range".to_owned(),
        })?;
    let frac = u64::from(delta.subsec_nanos()) * DUTC_UNITS_PER_SEC / NANOS_PER_SEC;
    whole
        .checked_add(frac)
        .ok_or_else(|| StoreError::InvalidRecord {
            reason: "timestamp exceeds the dutc range".to_owned(),
        })
}
