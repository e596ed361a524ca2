//! SQLite-backed store for incidents, stations, alerts, missions and the
//! audit event log.
//!
//! Each operation opens its own connection, so concurrent workers contend
//! only at SQLite's write lock. Every write runs in an `IMMEDIATE`
//! transaction: the lock is taken before the first read, which makes a
//! conditional `UPDATE … WHERE … RETURNING` an exclusive find-and-modify.

pub mod alerts;
pub mod events;
pub mod incidents;
pub mod missions;
pub mod schema;
pub mod stations;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};

pub use events::{AuditEvent, EventKind};
pub use incidents::{AnalysisClaim, DispatchClaim, StageOutput};

/// How long a connection waits on the write lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The dispatch claim was taken away (manual reroute or lease expiry)
    /// while its holder was still working.
    #[error("Claim lost: {0}")]
    ClaimLost(String),

    #[error("Background task failed: {0}")]
    Background(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<crate::incident::IllegalTransition> for StoreError {
    fn from(e: crate::incident::IllegalTransition) -> Self {
        Self::InvalidState(e.to_string())
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Handle to the incident database. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Store {
    db_path: Arc<PathBuf>,
}

impl Store {
    /// Open or create a store at the given path and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self {
            db_path: Arc::new(path.to_path_buf()),
        };
        let conn = store.connection()?;
        conn.execute_batch(schema::PRAGMAS)?;
        conn.execute_batch(schema::SCHEMA)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn connection(&self) -> StoreResult<Connection> {
        let conn = Connection::open(&*self.db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(conn)
    }

    /// Run `f` inside an `IMMEDIATE` transaction, committing on `Ok`.
    pub fn write<T, E>(&self, f: impl FnOnce(&StoreTx<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut conn = self.connection().map_err(E::from)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| E::from(StoreError::from(e)))?;
        let store_tx = StoreTx { tx };
        let value = f(&store_tx)?;
        store_tx
            .tx
            .commit()
            .map_err(|e| E::from(StoreError::from(e)))?;
        Ok(value)
    }

    /// Run blocking store work on tokio's blocking pool, so a connection
    /// waiting on the write lock stalls only its caller.
    pub async fn blocking<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Store) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<StoreError> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| E::from(StoreError::Background(format!("task join error: {e}"))))?
    }

    /// Run a read-only closure on a fresh connection.
    fn read<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        let conn = self.connection()?;
        f(&conn)
    }
}

/// An open write transaction. Row-level helpers live with their tables.
pub struct StoreTx<'conn> {
    tx: Transaction<'conn>,
}

impl StoreTx<'_> {
    fn conn(&self) -> &Connection {
        &self.tx
    }
}

/// Timestamps are stored as fixed-width RFC 3339 so they sort as text.
pub(crate) fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(e.to_string()))
}

pub(crate) fn parse_opt_ts(s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> StoreResult<String> {
    Ok(serde_json::to_string(value)?)
}

pub(crate) fn opt_json<T: serde::Serialize>(value: Option<&T>) -> StoreResult<Option<String>> {
    value.map(to_json).transpose()
}

pub(crate) fn from_json<T: serde::de::DeserializeOwned>(s: &str) -> rusqlite::Result<T> {
    serde_json::from_str(s).map_err(|e| conversion_error(e.to_string()))
}

pub(crate) fn from_opt_json<T: serde::de::DeserializeOwned>(
    s: Option<String>,
) -> rusqlite::Result<Option<T>> {
    s.as_deref().map(from_json).transpose()
}

/// Parse an enum column through its `FromStr` impl.
pub(crate) fn parse_enum<T>(s: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    s.parse::<T>().map_err(conversion_error)
}

pub(crate) fn conversion_error(msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(StoreError::Serialization(msg)),
    )
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A store in a fresh temporary directory. Keep the guard alive.
    pub fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("aegis.db")).unwrap();
        (dir, store)
    }
}
