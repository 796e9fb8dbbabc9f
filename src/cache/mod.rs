//! Persistent offline storage for downloaded subjects.
//!
//! This module provides:
//! - A keyed subject store trait with SQLite and in-memory backends
//! - Whole-record replacement on every write (last full write wins)
//! - The [`OfflineCache`] facade that downloads, queries and evicts subjects

mod layer;
mod memory;
mod storage;
mod traits;

pub use layer::OfflineCache;
pub use memory::MemoryStorage;
pub use storage::SqliteStorage;
pub use traits::SubjectStore;

use crate::error::StorageError;

/// Run a synchronous storage call on the blocking thread pool.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, StorageError>
where
  F: FnOnce() -> Result<T, StorageError> + Send + 'static,
  T: Send + 'static,
{
  tokio::task::spawn_blocking(f)
    .await
    .map_err(|e| StorageError::Task(e.to_string()))?
}
