//! Storage engines for write-through persistence
//!
//! The store keeps its state in memory and hands every mutation to a
//! `StorageEngine`. Engines are chosen at the composition root, either
//! directly or from configuration via [`open_engine`].
//!
//! ## Engines
//!
//! - **SQLite** (default): Embedded database, feature `storage-sqlite`
//! - **In-Memory**: No persistence, for testing or ephemeral deployments
//!
//! ## Usage
//!
//! ```no_run
//! use ping_store::{Store, storage::memory::MemoryEngine};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (store, events) = Store::bind(Box::new(MemoryEngine::new()), "").await?;
//!     // hand `events` to the poller pool, `store` to the API layer
//!     Ok(())
//! }
//! ```

pub mod engine;
pub mod error;
pub mod memory;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use engine::StorageEngine;
pub use error::{StorageError, StorageResult};

use crate::config::StorageConfig;

/// Build the engine selected by `config`
///
/// Returns the engine together with the engine-specific configuration string
/// to pass to [`Store::bind`](crate::Store::bind).
pub fn open_engine(config: &StorageConfig) -> StorageResult<(Box<dyn StorageEngine>, String)> {
    match config {
        StorageConfig::None => Ok((Box::new(memory::MemoryEngine::new()), String::new())),

        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path } => Ok((
            Box::new(sqlite::SqliteEngine::new()),
            path.to_string_lossy().to_string(),
        )),

        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => Err(StorageError::InvalidConfig(
            "SQLite storage requires the `storage-sqlite` feature".to_string(),
        )),
    }
}
