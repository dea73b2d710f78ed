#![forbid(unsafe_code)]
//! Typed views over record payloads.
//!
//! Thin facades that translate between opaque record values and the
//! structured data they carry: icon positions, folder backgrounds, window
//! geometry, view style and sort selectors, the trash put-back path, and
//! the property-list-backed view settings. Stateless — everything round
//! trips through the value codec in `dss-ondisk`.

use dss_error::{Result, StoreError};
use dss_ondisk::{record::codes, Record, Value};
use dss_types::{read_be_u16, read_be_u32, FourCC, Writer};
use serde::{Deserialize, Serialize};

fn payload_error(what: &str) -> StoreError {
    StoreError::CorruptedFile(format!("malformed {what} payload"))
}

// ── Icon position (Iloc) ────────────────────────────────────────────────────

/// An icon's position inside its parent's icon view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IconLocation {
    pub x: u32,
    pub y: u32,
}

impl IconLocation {
    #[must_use]
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// The canonical 16-byte `Iloc` blob: coordinates, six `0xFF`, two
    /// zero pad bytes.
    #[must_use]
    pub fn to_value(self) -> Value {
        let mut w = Writer::with_capacity(16);
        w.write_u32(self.x);
        w.write_u32(self.y);
        w.write_bytes(&[0xFF; 6]);
        w.write_bytes(&[0x00; 2]);
        Value::Blob(w.into_bytes())
    }

    /// Decode from an `Iloc` payload. Requires at least the two
    /// coordinates; a trailer that differs from the canonical pad is
    /// logged and otherwise ignored.
    pub fn from_value(value: &Value) -> Result<Self> {
        let Value::Blob(bytes) = value else {
            return Err(payload_error("Iloc"));
        };
        let location = Self {
            x: read_be_u32(bytes, 0).map_err(|_| payload_error("Iloc"))?,
            y: read_be_u32(bytes, 4).map_err(|_| payload_error("Iloc"))?,
        };
        let canonical_trailer =
            bytes.len() == 16 && bytes[8..14] == [0xFF; 6] && bytes[14..16] == [0x00; 2];
        if !canonical_trailer {
            tracing::warn!(target: "dss::views", len = bytes.len(), "non-canonical Iloc trailer");
        }
        Ok(location)
    }

    #[must_use]
    pub fn record(self, filename: impl Into<String>) -> Record {
        Record::new(filename, codes::ILOC, self.to_value())
    }
}

// ── Folder background (BKGD) ────────────────────────────────────────────────

/// A folder's background, as stored in the legacy 12-byte `BKGD` blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Background {
    Default,
    Color { r: u16, g: u16, b: u16 },
    /// Picture backgrounds store the alias length here; the alias bytes
    /// themselves live in the companion `pict` record.
    Picture { alias_len: u32 },
}

const BKGD_DEFAULT: FourCC = FourCC::from_bytes(*b"DefB");
const BKGD_COLOR: FourCC = FourCC::from_bytes(*b"ClrB");
const BKGD_PICTURE: FourCC = FourCC::from_bytes(*b"PctB");

impl Background {
    #[must_use]
    pub fn to_value(self) -> Value {
        let mut w = Writer::with_capacity(12);
        match self {
            Self::Default => {
                w.write_fourcc(BKGD_DEFAULT);
                w.write_bytes(&[0; 8]);
            }
            Self::Color { r, g, b } => {
                w.write_fourcc(BKGD_COLOR);
                w.write_u16(r);
                w.write_u16(g);
                w.write_u16(b);
                w.write_bytes(&[0; 2]);
            }
            Self::Picture { alias_len } => {
                w.write_fourcc(BKGD_PICTURE);
                w.write_u32(alias_len);
                w.write_bytes(&[0; 4]);
            }
        }
        Value::Blob(w.into_bytes())
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let Value::Blob(bytes) = value else {
            return Err(payload_error("BKGD"));
        };
        let tag = FourCC(read_be_u32(bytes, 0).map_err(|_| payload_error("BKGD"))?);
        match tag {
            BKGD_DEFAULT => Ok(Self::Default),
            BKGD_COLOR => Ok(Self::Color {
                r: read_be_u16(bytes, 4).map_err(|_| payload_error("BKGD"))?,
                g: read_be_u16(bytes, 6).map_err(|_| payload_error("BKGD"))?,
                b: read_be_u16(bytes, 8).map_err(|_| payload_error("BKGD"))?,
            }),
            BKGD_PICTURE => Ok(Self::Picture {
                alias_len: read_be_u32(bytes, 4).map_err(|_| payload_error("BKGD"))?,
            }),
            _ => Err(payload_error("BKGD")),
        }
    }

    #[must_use]
    pub fn record(self, filename: impl Into<String>) -> Record {
        Record::new(filename, codes::BKGD, self.to_value())
    }

    /// The companion `pict` record for a picture background; the trailing
    /// eight bytes after the alias are emitted zero.
    #[must_use]
    pub fn picture_record(filename: impl Into<String>, alias: &[u8]) -> Record {
        let mut bytes = alias.to_vec();
        bytes.extend_from_slice(&[0; 8]);
        Record::new(filename, codes::PICT, Value::Blob(bytes))
    }
}

// ── Window geometry (fwi0) ──────────────────────────────────────────────────

/// Legacy window geometry and view selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowInfo {
    pub top: u16,
    pub left: u16,
    pub bottom: u16,
    pub right: u16,
    pub view: FourCC,
}

impl WindowInfo {
    #[must_use]
    pub fn to_value(self) -> Value {
        let mut w = Writer::with_capacity(16);
        w.write_u16(self.top);
        w.write_u16(self.left);
        w.write_u16(self.bottom);
        w.write_u16(self.right);
        w.write_fourcc(self.view);
        w.write_bytes(&[0; 4]);
        Value::Blob(w.into_bytes())
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let Value::Blob(bytes) = value else {
            return Err(payload_error("fwi0"));
        };
        let word = |offset| read_be_u16(bytes, offset).map_err(|_| payload_error("fwi0"));
        Ok(Self {
            top: word(0)?,
            left: word(2)?,
            bottom: word(4)?,
            right: word(6)?,
            view: FourCC(read_be_u32(bytes, 8).map_err(|_| payload_error("fwi0"))?),
        })
    }

    #[must_use]
    pub fn record(self, filename: impl Into<String>) -> Record {
        Record::new(filename, codes::FWI0, self.to_value())
    }
}

// ── View style (vstl) ───────────────────────────────────────────────────────

/// The folder's presentation style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViewStyle {
    Icon,
    Column,
    List,
    CoverFlow,
}

impl ViewStyle {
    #[must_use]
    pub const fn fourcc(self) -> FourCC {
        match self {
            Self::Icon => FourCC::from_bytes(*b"icnv"),
            Self::Column => FourCC::from_bytes(*b"clmv"),
            Self::List => FourCC::from_bytes(*b"Nlsv"),
            Self::CoverFlow => FourCC::from_bytes(*b"Flwv"),
        }
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let Value::Type(code) = value else {
            return Err(payload_error("vstl"));
        };
        match &code.to_bytes() {
            b"icnv" => Ok(Self::Icon),
            b"clmv" => Ok(Self::Column),
            b"Nlsv" => Ok(Self::List),
            b"Flwv" => Ok(Self::CoverFlow),
            _ => Err(payload_error("vstl")),
        }
    }

    #[must_use]
    pub fn record(self, filename: impl Into<String>) -> Record {
        Record::new(filename, codes::VSTL, Value::Type(self.fourcc()))
    }
}

// ── Sort order (vSrn) ───────────────────────────────────────────────────────

/// The folder's sort column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    None,
    Name,
    Kind,
    DateModified,
    DateCreated,
    Size,
    Label,
}

impl SortOrder {
    #[must_use]
    pub const fn fourcc(self) -> FourCC {
        match self {
            Self::None => FourCC::from_bytes(*b"none"),
            Self::Name => FourCC::from_bytes(*b"name"),
            Self::Kind => FourCC::from_bytes(*b"kind"),
            Self::DateModified => FourCC::from_bytes(*b"modd"),
            Self::DateCreated => FourCC::from_bytes(*b"crea"),
            Self::Size => FourCC::from_bytes(*b"size"),
            Self::Label => FourCC::from_bytes(*b"labl"),
        }
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let Value::Type(code) = value else {
            return Err(payload_error("vSrn"));
        };
        match &code.to_bytes() {
            b"none" => Ok(Self::None),
            b"name" => Ok(Self::Name),
            b"kind" => Ok(Self::Kind),
            b"modd" => Ok(Self::DateModified),
            b"crea" => Ok(Self::DateCreated),
            b"size" => Ok(Self::Size),
            b"labl" => Ok(Self::Label),
            _ => Err(payload_error("vSrn")),
        }
    }

    #[must_use]
    pub fn record(self, filename: impl Into<String>) -> Record {
        Record::new(filename, codes::VSRN, Value::Type(self.fourcc()))
    }
}

// ── Trash put-back path (ptbL) ──────────────────────────────────────────────

/// Read a `ptbL` payload as an absolute path, prefixing `/` when the
/// stored value lacks one.
pub fn put_back_path(value: &Value) -> Result<String> {
    let path = match value {
        Value::Ustr(text) => text.clone(),
        Value::Blob(bytes) => String::from_utf8(bytes.clone())
            .map_err(|_| payload_error("ptbL"))?,
        _ => return Err(payload_error("ptbL")),
    };
    if path.starts_with('/') {
        Ok(path)
    } else {
        Ok(format!("/{path}"))
    }
}

/// Build a `ptbL` record for the given original location.
#[must_use]
pub fn put_back_record(filename: impl Into<String>, path: &str) -> Record {
    let path = if path.starts_with('/') {
        path.to_owned()
    } else {
        format!("/{path}")
    };
    Record::new(filename, codes::PTBL, Value::Ustr(path))
}

// ── Property-list-backed view settings ──────────────────────────────────────

fn dictionary_of(value: &Value, what: &str) -> Result<plist::Dictionary> {
    match value {
        Value::PropertyList(plist::Value::Dictionary(dict)) => Ok(dict.clone()),
        _ => Err(payload_error(what)),
    }
}

macro_rules! plist_settings {
    ($(#[$doc:meta])* $name:ident, $code:expr, $label:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Default)]
        pub struct $name {
            dict: plist::Dictionary,
        }

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self::default()
            }

            /// Wrap a decoded payload; unknown keys ride along untouched.
            pub fn from_value(value: &Value) -> Result<Self> {
                Ok(Self {
                    dict: dictionary_of(value, $label)?,
                })
            }

            #[must_use]
            pub fn to_value(&self) -> Value {
                Value::PropertyList(plist::Value::Dictionary(self.dict.clone()))
            }

            #[must_use]
            pub fn record(&self, filename: impl Into<String>) -> Record {
                Record::new(filename, $code, self.to_value())
            }

            #[must_use]
            pub fn get(&self, key: &str) -> Option<&plist::Value> {
                self.dict.get(key)
            }

            pub fn set(&mut self, key: impl Into<String>, value: plist::Value) {
                self.dict.insert(key.into(), value);
            }

            fn bool_key(&self, key: &str) -> Option<bool> {
                self.dict.get(key).and_then(plist::Value::as_boolean)
            }

            fn real_key(&self, key: &str) -> Option<f64> {
                self.dict.get(key).and_then(plist::Value::as_real)
            }

            fn string_key(&self, key: &str) -> Option<&str> {
                self.dict.get(key).and_then(plist::Value::as_string)
            }
        }
    };
}

plist_settings!(
    /// `bwsp`: browser window geometry and chrome switches.
    BrowserWindowSettings,
    codes::BWSP,
    "bwsp"
);

impl BrowserWindowSettings {
    /// `{{x, y}, {w, h}}`-formatted frame string.
    #[must_use]
    pub fn window_bounds(&self) -> Option<&str> {
        self.string_key("WindowBounds")
    }

    #[must_use]
    pub fn show_sidebar(&self) -> Option<bool> {
        self.bool_key("ShowSidebar")
    }

    #[must_use]
    pub fn show_toolbar(&self) -> Option<bool> {
        self.bool_key("ShowToolbar")
    }

    #[must_use]
    pub fn show_status_bar(&self) -> Option<bool> {
        self.bool_key("ShowStatusBar")
    }

    #[must_use]
    pub fn show_path_bar(&self) -> Option<bool> {
        self.bool_key("ShowPathbar")
    }

    #[must_use]
    pub fn sidebar_width(&self) -> Option<f64> {
        self.real_key("SidebarWidth")
    }
}

plist_settings!(
    /// `icvp`: icon view knobs (icon size, grid, labels, background).
    IconViewSettings,
    codes::ICVP,
    "icvp"
);

impl IconViewSettings {
    #[must_use]
    pub fn icon_size(&self) -> Option<f64> {
        self.real_key("iconSize")
    }

    #[must_use]
    pub fn grid_spacing(&self) -> Option<f64> {
        self.real_key("gridSpacing")
    }

    #[must_use]
    pub fn text_size(&self) -> Option<f64> {
        self.real_key("textSize")
    }

    #[must_use]
    pub fn arrange_by(&self) -> Option<&str> {
        self.string_key("arrangeBy")
    }

    #[must_use]
    pub fn show_icon_preview(&self) -> Option<bool> {
        self.bool_key("showIconPreview")
    }

    #[must_use]
    pub fn label_on_bottom(&self) -> Option<bool> {
        self.bool_key("labelOnBottom")
    }

    #[must_use]
    pub fn background_type(&self) -> Option<&str> {
        self.string_key("backgroundType")
    }
}

plist_settings!(
    /// `lsvp`/`lsvP`: list view columns and sizing.
    ListViewSettings,
    codes::LSVP,
    "lsvp"
);

impl ListViewSettings {
    #[must_use]
    pub fn icon_size(&self) -> Option<f64> {
        self.real_key("iconSize")
    }

    #[must_use]
    pub fn text_size(&self) -> Option<f64> {
        self.real_key("textSize")
    }

    #[must_use]
    pub fn sort_column(&self) -> Option<&str> {
        self.string_key("sortColumn")
    }

    #[must_use]
    pub fn use_relative_dates(&self) -> Option<bool> {
        self.bool_key("useRelativeDates")
    }

    #[must_use]
    pub fn calculate_all_sizes(&self) -> Option<bool> {
        self.bool_key("calculateAllSizes")
    }

    /// Same payload under the newer `lsvP` code.
    #[must_use]
    pub fn record_upper(&self, filename: impl Into<String>) -> Record {
        Record::new(filename, codes::LSVP_UPPER, self.to_value())
    }
}

plist_settings!(
    /// `glvp`: gallery view knobs.
    GalleryViewSettings,
    codes::GLVP,
    "glvp"
);

impl GalleryViewSettings {
    #[must_use]
    pub fn icon_size(&self) -> Option<f64> {
        self.real_key("iconSize")
    }

    #[must_use]
    pub fn show_icon_preview(&self) -> Option<bool> {
        self.bool_key("showIconPreview")
    }

    #[must_use]
    pub fn arrange_by(&self) -> Option<&str> {
        self.string_key("arrangeBy")
    }
}
