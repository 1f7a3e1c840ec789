//! Store configuration.

use std::path::PathBuf;

/// Where the generation store keeps its documents.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory for JSON documents. `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: Some(PathBuf::from("./data")),
        }
    }
}

impl StoreConfig {
    /// In-memory store, used by tests and throwaway runs.
    pub fn memory() -> Self {
        Self { data_dir: None }
    }

    /// Load from environment variables.
    ///
    /// `STORE_BACKEND=memory` disables persistence; otherwise documents are
    /// written under `DATA_DIR` (default `./data`).
    pub fn from_env() -> Self {
        let memory = std::env::var("STORE_BACKEND")
            .map(|b| b.eq_ignore_ascii_case("memory"))
            .unwrap_or(false);
        if memory {
            return Self::memory();
        }

        Self {
            data_dir: Some(
                std::env::var("DATA_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("./data")),
            ),
        }
    }
}
