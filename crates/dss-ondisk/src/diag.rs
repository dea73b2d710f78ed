//! Non-fatal anomalies surfaced during a read.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A non-fatal anomaly observed while reading a container.
///
/// Structural breakage is always a hard error; these cover the cases the
/// format tolerates so files produced by buggy writers stay readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Diagnostic {
    /// Table-of-contents entry with a name other than `DSDB`; retained.
    UnknownTocEntry { name: String, block: u32 },
    /// A reserved slot observed non-zero.
    ReservedNonZero { location: &'static str, value: u32 },
    /// A record pair violating the total order during traversal.
    OutOfOrderRecord { filename: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTocEntry { name, block } => {
                write!(f, "unknown table-of-contents entry {name:?} -> block {block}")
            }
            Self::ReservedNonZero { location, value } => {
                write!(f, "reserved {location} is non-zero ({value:#x})")
            }
            Self::OutOfOrderRecord { filename } => {
                write!(f, "record {filename:?} out of order")
            }
        }
    }
}
