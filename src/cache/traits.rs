//! Core trait for the subject store.

use crate::error::StorageError;
use crate::notes::{CachedSubjectRecord, CachedSubjectSummary};

/// Keyed store of cached subjects.
///
/// Holds at most one record per subject id. `save` replaces any previous
/// record wholesale and must be atomic from a reader's point of view: a
/// concurrent `get` observes either the old or the new complete record.
///
/// Implementations do not serialize concurrent writers (last write wins).
/// Callers that need one download per subject at a time enforce it
/// themselves, see [`OfflineCache`](super::OfflineCache).
pub trait SubjectStore: Send + Sync {
  /// Store a record under its subject id, replacing any previous one.
  fn save(&self, record: &CachedSubjectRecord) -> Result<(), StorageError>;

  /// Get the record for a subject, if one is cached.
  fn get(&self, subject_id: &str) -> Result<Option<CachedSubjectRecord>, StorageError>;

  /// Check whether a record exists without loading payloads.
  fn exists(&self, subject_id: &str) -> Result<bool, StorageError> {
    Ok(self.get(subject_id)?.is_some())
  }

  /// Delete a cached subject. Returns whether anything was removed.
  fn remove(&self, subject_id: &str) -> Result<bool, StorageError>;

  /// List cached subjects, most recently downloaded first.
  fn list(&self) -> Result<Vec<CachedSubjectSummary>, StorageError>;
}
