//! Offline content cache for NoteLab subjects.
//!
//! Downloads every unit file of a subject concurrently, persists the result
//! as one record per subject, and answers "is this subject available
//! offline?" without touching the network.

pub mod cache;
pub mod config;
pub mod download;
pub mod error;
pub mod notes;

pub use cache::{MemoryStorage, OfflineCache, SqliteStorage, SubjectStore};
pub use download::{DownloadOptions, FailurePolicy, Orchestrator};
pub use error::{DownloadError, FetchError, StorageError, UnitFailure};
