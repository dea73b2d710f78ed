//! Records: the `(filename, type code, value)` triples stored in the tree.

use crate::order;
use crate::value::{utf16_len_u32, Value};
use dss_error::StoreError;
use dss_types::{Cursor, FourCC, ParseError, Writer};
use std::cmp::Ordering;

/// The filename sentinel for the directory itself.
pub const DIRECTORY_SENTINEL: &str = ".";

/// Well-known record type codes. Unknown codes round-trip verbatim.
pub mod codes {
    use dss_types::FourCC;

    /// Icon position within an icon view.
    pub const ILOC: FourCC = FourCC::from_bytes(*b"Iloc");
    /// Folder background (legacy structure).
    pub const BKGD: FourCC = FourCC::from_bytes(*b"BKGD");
    /// Picture bytes backing a `BKGD` picture background.
    pub const PICT: FourCC = FourCC::from_bytes(*b"pict");
    /// Browser window settings property list.
    pub const BWSP: FourCC = FourCC::from_bytes(*b"bwsp");
    /// Icon view settings property list.
    pub const ICVP: FourCC = FourCC::from_bytes(*b"icvp");
    /// List view settings property list.
    pub const LSVP: FourCC = FourCC::from_bytes(*b"lsvp");
    /// List view settings property list (newer variant).
    pub const LSVP_UPPER: FourCC = FourCC::from_bytes(*b"lsvP");
    /// Gallery view settings property list.
    pub const GLVP: FourCC = FourCC::from_bytes(*b"glvp");
    /// View style selector.
    pub const VSTL: FourCC = FourCC::from_bytes(*b"vstl");
    /// View sort order.
    pub const VSRN: FourCC = FourCC::from_bytes(*b"vSrn");
    /// Legacy window geometry.
    pub const FWI0: FourCC = FourCC::from_bytes(*b"fwi0");
    /// Finder comment.
    pub const CMMT: FourCC = FourCC::from_bytes(*b"cmmt");
    /// Trash put-back location.
    pub const PTBL: FourCC = FourCC::from_bytes(*b"ptbL");
    /// Logical size of a directory's contents.
    pub const LOGS: FourCC = FourCC::from_bytes(*b"logS");
    /// Logical size (newer variant).
    pub const LG1S: FourCC = FourCC::from_bytes(*b"lg1S");
    /// Physical size of a directory's contents.
    pub const PHYS: FourCC = FourCC::from_bytes(*b"phyS");
    /// Physical size (newer variant).
    pub const PH1S: FourCC = FourCC::from_bytes(*b"ph1S");
}

/// One stored record.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    filename: String,
    type_code: FourCC,
    value: Value,
}

impl Record {
    #[must_use]
    pub fn new(filename: impl Into<String>, type_code: FourCC, value: Value) -> Self {
        Self {
            filename: filename.into(),
            type_code,
            value,
        }
    }

    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    #[must_use]
    pub fn type_code(&self) -> FourCC {
        self.type_code
    }

    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Whether `other` names the same `(filename, type code)` slot.
    #[must_use]
    pub fn same_identity(&self, other: &Self) -> bool {
        self.type_code == other.type_code && self.filename == other.filename
    }

    /// The total record order imposed on the in-file tree.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        order::compare_keys(
            &self.filename,
            self.type_code,
            &other.filename,
            other.type_code,
        )
    }

    /// Decode one record at the cursor.
    pub fn decode(cur: &mut Cursor<'_>) -> Result<Self, ParseError> {
        let units = cur.read_u32()?;
        let filename = cur.read_utf16_be(units)?;
        let type_code = cur.read_fourcc()?;
        let value = Value::decode(cur)?;
        Ok(Self {
            filename,
            type_code,
            value,
        })
    }

    /// Encode this record into a standalone byte buffer.
    ///
    /// Rejects filenames containing U+0000 or longer than `u32::MAX`
    /// UTF-16 code units; value-level rejections (oversized payloads,
    /// plist failures) surface from the value codec.
    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        if self.filename.contains('\0') {
            return Err(StoreError::InvalidRecord {
                reason: format!("filename {:?} contains U+0000", self.filename),
            });
        }
        let units = utf16_len_u32(&self.filename)?;

        let mut w = Writer::new();
        w.write_u32(units);
        w.write_utf16_be(&self.filename);
        w.write_fourcc(self.type_code);
        self.value.encode(&mut w)?;
        Ok(w.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let rec = Record::new("App.app", codes::ILOC, Value::Blob(vec![0_u8; 16]));
        let bytes = rec.encode().expect("encode");
        let mut cur = Cursor::new(&bytes);
        let decoded = Record::decode(&mut cur).expect("decode");
        assert_eq!(decoded, rec);
        assert_eq!(cur.remaining(), 0);
    }

    #[test]
    fn directory_sentinel_encodes_as_one_unit() {
        let rec = Record::new(
            DIRECTORY_SENTINEL,
            codes::VSTL,
            Value::Type(FourCC::from_bytes(*b"icnv")),
        );
        let bytes = rec.encode().expect("encode");
        // name length prefix counts UTF-16 units
        assert_eq!(&bytes[0..4], &[0, 0, 0, 1]);
        assert_eq!(&bytes[4..6], &[0, b'.']);
    }

    #[test]
    fn nul_in_filename_rejected() {
        let rec = Record::new("bad\0name", codes::CMMT, Value::Ustr("x".to_owned()));
        assert!(matches!(
            rec.encode(),
            Err(StoreError::InvalidRecord { .. })
        ));
    }

    #[test]
    fn identity_ignores_value() {
        let a = Record::new("f", codes::ILOC, Value::Long(1));
        let b = Record::new("f", codes::ILOC, Value::Long(2));
        let c = Record::new("f", codes::BKGD, Value::Long(1));
        assert!(a.same_identity(&b));
        assert!(!a.same_identity(&c));
    }

    #[test]
    fn compare_orders_by_folded_name_then_code() {
        let a = Record::new("a.txt", codes::ILOC, Value::Null);
        let b = Record::new("B.txt", codes::ILOC, Value::Null);
        let a2 = Record::new("a.txt", codes::VSTL, Value::Null);
        assert_eq!(a.compare(&b), Ordering::Less);
        assert_eq!(a.compare(&a2), Ordering::Less); // Iloc < vstl numerically
    }
}
