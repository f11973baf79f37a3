//! Record repositories.
//!
//! The server only ever reads or writes the whole collection. Implementations
//! are blocking; the session layer moves calls onto the blocking pool.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use userdir_common::record::{find_duplicate_id, UserID, UserRecord};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store I/O failure on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Store content is malformed: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Store holds duplicate id {0}")]
    DuplicateId(UserID),
    #[error("Store is unavailable: {0}")]
    Unavailable(String),
}

/// A keyed collection of user records persisted as one unit.
pub trait RecordStore: Send + Sync + 'static {
    /// Read the whole collection, in stored order.
    fn read_all(&self) -> Result<Vec<UserRecord>, StoreError>;

    /// Replace the whole collection.
    ///
    /// Either every record is durably stored, or the previous collection
    /// remains visible to later reads.
    fn write_all(&self, records: &[UserRecord]) -> Result<(), StoreError>;
}

// =============================================================================

/// Store backed by a single pretty-printed JSON array on disk.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Sibling file the next collection is staged in before the rename.
    fn staging_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "users.json".to_string());

        self.path
            .with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4()))
    }
}

impl RecordStore for JsonFileStore {
    fn read_all(&self) -> Result<Vec<UserRecord>, StoreError> {
        let data =
            std::fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;

        let records: Vec<UserRecord> = serde_json::from_str(&data)?;

        if let Some(id) = find_duplicate_id(&records) {
            return Err(StoreError::DuplicateId(id));
        }

        log::debug!(
            "Read {} records from {}",
            records.len(),
            self.path.display()
        );

        Ok(records)
    }

    fn write_all(&self, records: &[UserRecord]) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(records)?;

        let staging = self.staging_path();

        if let Err(e) = std::fs::write(&staging, content) {
            let _ = std::fs::remove_file(&staging);
            return Err(self.io_error(e));
        }

        if let Err(e) = std::fs::rename(&staging, &self.path) {
            let _ = std::fs::remove_file(&staging);
            return Err(self.io_error(e));
        }

        log::debug!(
            "Wrote {} records to {}",
            records.len(),
            self.path.display()
        );

        Ok(())
    }
}

// =============================================================================

/// Store that keeps the collection in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<UserRecord>>,
}

impl MemoryStore {
    pub fn new(records: Vec<UserRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }
}

impl RecordStore for MemoryStore {
    fn read_all(&self) -> Result<Vec<UserRecord>, StoreError> {
        let lock = self
            .records
            .lock()
            .map_err(|_| StoreError::Unavailable("poisoned".into()))?;
        Ok(lock.clone())
    }

    fn write_all(&self, records: &[UserRecord]) -> Result<(), StoreError> {
        let mut lock = self
            .records
            .lock()
            .map_err(|_| StoreError::Unavailable("poisoned".into()))?;
        *lock = records.to_vec();
        Ok(())
    }
}
