//! Filename collation.
//!
//! The record B-tree is keyed by a case-insensitive, diacritic-insensitive
//! filename comparison in the spirit of the POSIX locale, tie-broken so the
//! order is a strict total order over distinct `(filename, type code)`
//! pairs. Exposed publicly so writers can reuse the exact rule.

use dss_types::FourCC;
use std::cmp::Ordering;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Fold a filename for comparison: NFD-decompose, strip combining marks,
/// lowercase. Idempotent.
#[must_use]
pub fn fold_filename(name: &str) -> String {
    name.nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Compare two filenames: folded comparison first, then raw UTF-16 code
/// units so distinct names that fold together still order deterministically.
#[must_use]
pub fn compare_filenames(a: &str, b: &str) -> Ordering {
    fold_filename(a)
        .cmp(&fold_filename(b))
        .then_with(|| a.encode_utf16().cmp(b.encode_utf16()))
}

/// The total record order: filename, then type code as a raw u32.
#[must_use]
pub fn compare_keys(a_name: &str, a_code: FourCC, b_name: &str, b_code: FourCC) -> Ordering {
    compare_filenames(a_name, b_name).then_with(|| a_code.0.cmp(&b_code.0))
}
