// Star Coins - Core Library
// Classroom coin tracking: roster store, spreadsheet import/export and
// persistence, shared by the CLI/TUI binary and the dev proxy.

pub mod config;
pub mod error;
pub mod import;
pub mod model;
pub mod persist;
pub mod roster;
pub mod spreadsheet;
pub mod view;

#[cfg(feature = "proxy")]
pub mod proxy;

// Re-export commonly used types
pub use config::{ProxyConfig, StoreConfig};
pub use error::{RosterError, StoreError};
pub use import::{ImportMode, ImportPlan, ImportRow, ImportSummary};
pub use model::{Class, Selection, Snapshot, Student, ALL_CLASSES};
pub use persist::{
    BlobStore, LoadOutcome, MemoryBlobStore, PersistentRoster, SqliteBlobStore, STORAGE_KEY,
};
pub use roster::{BatchTarget, ClassDeletion, DeleteStrategy, ExportRow, Roster, SortKey};
pub use spreadsheet::SheetFormat;
pub use view::{RosterStats, StudentRow};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
