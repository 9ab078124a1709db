//! Store snapshots on disk.
//!
//! The whole store state is written as one versioned JSON document; loading
//! refuses any other version.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::PersistenceError;
use crate::store::{Store, StoreState};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// A saved store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Format version for compatibility checking.
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub state: StoreState,
}

impl StoreSnapshot {
    pub fn new(state: StoreState) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            state,
        }
    }

    /// Snapshot the committed state of `store`.
    pub async fn capture(store: &Store) -> Self {
        Self::new(store.snapshot().await)
    }

    /// Save to a JSON file.
    pub async fn save_json(&self, path: impl AsRef<Path>) -> Result<(), PersistenceError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Load from a JSON file.
    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let content = fs::read_to_string(path).await?;

        // Check the version before the full parse so old formats fail cleanly.
        #[derive(Deserialize)]
        struct Header {
            version: u32,
        }
        let header: Header = serde_json::from_str(&content)?;
        if header.version != SNAPSHOT_VERSION {
            return Err(PersistenceError::VersionMismatch {
                expected: SNAPSHOT_VERSION,
                found: header.version,
            });
        }

        Ok(serde_json::from_str(&content)?)
    }

    /// A store holding this snapshot's state.
    pub fn into_store(self) -> Store {
        Store::from_state(self.state)
    }
}
