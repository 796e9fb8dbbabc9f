use std::collections::HashMap;
use std::sync::RwLock;

use super::traits::SubjectStore;
use crate::error::StorageError;
use crate::notes::{CachedSubjectRecord, CachedSubjectSummary};

/// Storage that keeps records in process memory.
/// Nothing survives a restart; used in tests and when no database is wanted.
#[derive(Default)]
pub struct MemoryStorage {
  records: RwLock<HashMap<String, CachedSubjectRecord>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl SubjectStore for MemoryStorage {
  fn save(&self, record: &CachedSubjectRecord) -> Result<(), StorageError> {
    let mut records = self.records.write().map_err(|_| StorageError::Poisoned)?;
    records.insert(record.subject_id().to_string(), record.clone());
    Ok(())
  }

  fn get(&self, subject_id: &str) -> Result<Option<CachedSubjectRecord>, StorageError> {
    let records = self.records.read().map_err(|_| StorageError::Poisoned)?;
    Ok(records.get(subject_id).cloned())
  }

  fn exists(&self, subject_id: &str) -> Result<bool, StorageError> {
    let records = self.records.read().map_err(|_| StorageError::Poisoned)?;
    Ok(records.contains_key(subject_id))
  }

  fn remove(&self, subject_id: &str) -> Result<bool, StorageError> {
    let mut records = self.records.write().map_err(|_| StorageError::Poisoned)?;
    Ok(records.remove(subject_id).is_some())
  }

  fn list(&self) -> Result<Vec<CachedSubjectSummary>, StorageError> {
    let records = self.records.read().map_err(|_| StorageError::Poisoned)?;
    let mut summaries: Vec<CachedSubjectSummary> =
      records.values().map(CachedSubjectSummary::from).collect();
    summaries.sort_by(|a, b| {
      b.downloaded_at
        .cmp(&a.downloaded_at)
        .then_with(|| a.subject_id.cmp(&b.subject_id))
    });
    Ok(summaries)
  }
}
