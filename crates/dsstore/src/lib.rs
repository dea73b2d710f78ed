#![forbid(unsafe_code)]
//! Public API facade for the Bud1 container workspace.
//!
//! Re-exports the container type, records and values, the error taxonomy,
//! and the typed payload views through a single crate for downstream
//! consumers.

pub use dss_core::{codes, record_order, DsStore, Value, DIRECTORY_SENTINEL};
pub use dss_error::{Result, StoreError};
pub use dss_ondisk::{
    compare_filenames, compare_keys, dutc_from_system_time, dutc_to_system_time, fold_filename,
    Diagnostic, Record,
};
pub use dss_types::{BlockAddress, FourCC};
pub use dss_views::{
    put_back_path, put_back_record, Background, BrowserWindowSettings, GalleryViewSettings,
    IconLocation, IconViewSettings, ListViewSettings, SortOrder, ViewStyle, WindowInfo,
};
