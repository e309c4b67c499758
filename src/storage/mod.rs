//! Persistence for monitoring records
//!
//! ## Design
//!
//! - **Trait-based**: `Store` / `StoreTx` let the core run against any engine
//! - **Unit of work**: every node tick and service tick owns one transaction
//! - **Async**: all operations are async for compatibility with Tokio actors
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database
//! - **In-Memory**: No persistence, for testing or throwaway runs
//!
//! ## Usage
//!
//! ```no_run
//! use monitorix::storage::{Store, sqlite::SqliteStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = SqliteStore::new("./monitorix.db").await?;
//!     let mut tx = store.begin().await?;
//!     let nodes = tx.nodes().await?;
//!     println!("{} nodes configured", nodes.len());
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use crate::config::StorageConfig;

pub mod backend;
pub mod error;
pub mod memory;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{MetricQuery, NodePoll, Store, StoreTx};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;

/// Open the backend selected in configuration
pub async fn open(config: &StorageConfig) -> StorageResult<Arc<dyn Store>> {
    match config {
        StorageConfig::None => Ok(Arc::new(MemoryStore::new())),
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path } => Ok(Arc::new(sqlite::SqliteStore::new(path).await?)),
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => Err(StorageError::ConnectionFailed(
            "built without the storage-sqlite feature".to_string(),
        )),
    }
}
