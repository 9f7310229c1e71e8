// Persistence - the roster lives in a single JSON blob under one key.
//
// The blob is read once at start-up and fully rewritten after every
// successful mutation (write-through, last writer wins).

use crate::error::{Result as RosterResult, RosterError, StoreResult};
use crate::model::Snapshot;
use crate::roster::Roster;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Key under which the snapshot is stored
pub const STORAGE_KEY: &str = "starCoinSystem";

/// Opaque key-value blob storage
pub trait BlobStore {
    fn read(&self, key: &str) -> StoreResult<Option<String>>;
    fn write(&mut self, key: &str, value: &str) -> StoreResult<()>;
}

// ============================================================================
// SQLITE STORE
// ============================================================================

/// Blob store backed by a SQLite key-value table
pub struct SqliteBlobStore {
    conn: Connection,
}

impl SqliteBlobStore {
    /// Open (or create) the database file
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory store (tests)
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        setup_database(&conn)?;
        Ok(SqliteBlobStore { conn })
    }
}

pub fn setup_database(conn: &Connection) -> StoreResult<()> {
    // WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS blobs (
            key TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

impl BlobStore for SqliteBlobStore {
    fn read(&self, key: &str) -> StoreResult<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM blobs WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn write(&mut self, key: &str, value: &str) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO blobs (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

// ============================================================================
// MEMORY STORE
// ============================================================================

/// Blob store kept in a map; nothing survives the process
#[derive(Debug, Default, Clone)]
pub struct MemoryBlobStore {
    blobs: HashMap<String, String>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn read(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.blobs.get(key).cloned())
    }

    fn write(&mut self, key: &str, value: &str) -> StoreResult<()> {
        self.blobs.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

// ============================================================================
// LOAD / SAVE
// ============================================================================

/// How the roster was obtained at start-up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Restored from the stored snapshot
    Loaded,
    /// Nothing stored yet; default data seeded
    Seeded,
    /// Stored snapshot was unusable; default data seeded
    Recovered(RosterError),
}

/// Decode a stored blob into a roster
pub fn decode_snapshot(raw: &str) -> RosterResult<Roster> {
    let snapshot: Snapshot = serde_json::from_str(raw)
        .map_err(|e| RosterError::CorruptState(e.to_string()))?;
    Roster::from_snapshot(snapshot)
}

/// Serialize and store the whole roster
pub fn save<B: BlobStore>(store: &mut B, roster: &Roster) -> StoreResult<()> {
    let json = serde_json::to_string(&roster.to_snapshot())?;
    store.write(STORAGE_KEY, &json)?;
    debug!(bytes = json.len(), revision = roster.revision(), "snapshot saved");
    Ok(())
}

/// Load the roster, seeding defaults when the blob is absent or corrupt.
///
/// Corruption is never fatal: it is logged, reported in the outcome, and
/// replaced by default data (which is saved immediately).
pub fn load_or_seed<B: BlobStore>(store: &mut B) -> StoreResult<(Roster, LoadOutcome)> {
    let (roster, outcome) = match store.read(STORAGE_KEY)? {
        Some(raw) => match decode_snapshot(&raw) {
            Ok(roster) => {
                info!(
                    classes = roster.classes().len(),
                    students = roster.students().len(),
                    "roster loaded"
                );
                return Ok((roster, LoadOutcome::Loaded));
            }
            Err(err) => {
                warn!(error = %err, "stored roster unreadable, resetting to defaults");
                (Roster::with_defaults(), LoadOutcome::Recovered(err))
            }
        },
        None => {
            info!("no stored roster, seeding defaults");
            (Roster::with_defaults(), LoadOutcome::Seeded)
        }
    };

    save(store, &roster)?;
    Ok((roster, outcome))
}

// ============================================================================
// WRITE-THROUGH WRAPPER
// ============================================================================

/// A roster bound to its blob store.
///
/// Every successful [`PersistentRoster::apply`] rewrites the blob; a
/// rejected operation leaves both the roster and the blob untouched.
pub struct PersistentRoster<B: BlobStore> {
    roster: Roster,
    store: B,
}

impl<B: BlobStore> PersistentRoster<B> {
    /// Load from `store`, seeding defaults if needed
    pub fn open(mut store: B) -> StoreResult<(Self, LoadOutcome)> {
        let (roster, outcome) = load_or_seed(&mut store)?;
        Ok((PersistentRoster { roster, store }, outcome))
    }

    /// Read-only view of the roster
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn store(&self) -> &B {
        &self.store
    }

    /// Run one roster operation and persist the result if it succeeded
    pub fn apply<T, F>(&mut self, op: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Roster) -> RosterResult<T>,
    {
        let revision = self.roster.revision();
        let value = op(&mut self.roster)?;
        if self.roster.revision() != revision {
            save(&mut self.store, &self.roster)?;
        }
        Ok(value)
    }
}
