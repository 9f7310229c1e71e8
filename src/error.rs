// Error types for the roster store and its persistence layer

use thiserror::Error;

/// Errors produced by roster operations.
///
/// Every variant is raised before any mutation happens, so a failed
/// operation always leaves the roster exactly as it was.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RosterError {
    /// One or more names collide inside a class.
    #[error("duplicate name(s) in class: {}", names.join("、"))]
    DuplicateName { names: Vec<String> },

    /// The operation needs a concrete class but got none or "all classes".
    #[error("invalid selection: {0}")]
    InvalidSelection(String),

    /// A class or student id does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Zero, unparseable or overflowing coin amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Blank class or student name.
    #[error("name must not be empty")]
    EmptyName,

    /// An import produced no valid rows.
    #[error("no valid rows to import ({errors} skipped)")]
    NothingToImport { errors: usize },

    /// An import plan was computed against an older roster state.
    #[error("import plan is stale, the roster changed since it was computed")]
    StalePlan,

    /// Persisted snapshot could not be used.
    #[error("corrupt state: {0}")]
    CorruptState(String),
}

impl RosterError {
    pub fn duplicate(name: impl Into<String>) -> Self {
        RosterError::DuplicateName {
            names: vec![name.into()],
        }
    }
}

/// Errors produced by the blob store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Snapshot (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Spreadsheet (CSV) read/write error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Workbook (xlsx/xls/ods) read error.
    #[error("Workbook error: {0}")]
    Workbook(#[from] calamine::Error),

    /// Workbook write error.
    #[error("Workbook write error: {0}")]
    WorkbookWrite(#[from] rust_xlsxwriter::XlsxError),

    /// File extension names no supported spreadsheet format.
    #[error("Unsupported spreadsheet format: {0} (expected .xlsx, .xls, .ods or .csv)")]
    UnsupportedFormat(String),

    /// Generic I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A roster operation was rejected.
    #[error(transparent)]
    Roster(#[from] RosterError),
}

/// Convenience alias for roster operations.
pub type Result<T> = std::result::Result<T, RosterError>;

/// Convenience alias for persistence operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
