#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use notelab_offline::notes::{
  CachedSubjectRecord, CachedSubjectSummary, CachedUnit, SubjectMetadata, UnitDescriptor,
  UnitFetcher,
};
use notelab_offline::{FetchError, MemoryStorage, StorageError, SubjectStore};

/// Scripted unit fetcher: each unit id maps to a queue of results.
/// The last scripted result repeats once the queue is drained.
#[derive(Default)]
pub struct FakeFetcher {
  scripts: Mutex<HashMap<String, Vec<Result<Vec<u8>, FetchError>>>>,
  delays: HashMap<String, Duration>,
  hang: Vec<String>,
  calls: AtomicUsize,
}

impl FakeFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn ok(self, unit_id: &str, payload: &[u8]) -> Self {
    self.script(unit_id, vec![Ok(payload.to_vec())])
  }

  pub fn fail(self, unit_id: &str, error: FetchError) -> Self {
    self.script(unit_id, vec![Err(error)])
  }

  pub fn script(self, unit_id: &str, results: Vec<Result<Vec<u8>, FetchError>>) -> Self {
    self
      .scripts
      .lock()
      .unwrap()
      .insert(unit_id.to_string(), results);
    self
  }

  pub fn delay(mut self, unit_id: &str, delay: Duration) -> Self {
    self.delays.insert(unit_id.to_string(), delay);
    self
  }

  /// Fetches of this unit never complete.
  pub fn hang(mut self, unit_id: &str) -> Self {
    self.hang.push(unit_id.to_string());
    self
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  fn next_result(&self, unit_id: &str) -> Result<Vec<u8>, FetchError> {
    let mut scripts = self.scripts.lock().unwrap();
    match scripts.get_mut(unit_id) {
      Some(queue) if queue.len() > 1 => queue.remove(0),
      Some(queue) => queue[0].clone(),
      None => Err(FetchError::Remote {
        status: Some(404),
        message: format!("unit {} not found", unit_id),
      }),
    }
  }
}

#[async_trait]
impl UnitFetcher for FakeFetcher {
  async fn fetch_unit(&self, unit: &UnitDescriptor) -> Result<CachedUnit, FetchError> {
    self.calls.fetch_add(1, Ordering::SeqCst);

    if self.hang.contains(&unit.id) {
      std::future::pending::<()>().await;
    }
    if let Some(delay) = self.delays.get(&unit.id) {
      tokio::time::sleep(*delay).await;
    }

    let payload = self.next_result(&unit.id)?;
    Ok(CachedUnit {
      id: unit.id.clone(),
      name: unit.name.clone(),
      payload,
      content_type: "application/pdf".to_string(),
    })
  }
}

/// Store whose writes always fail, as on a full disk. Reads go to an empty
/// in-memory store.
#[derive(Default)]
pub struct FullDiskStore {
  inner: MemoryStorage,
}

impl SubjectStore for FullDiskStore {
  fn save(&self, _record: &CachedSubjectRecord) -> Result<(), StorageError> {
    Err(StorageError::from(std::io::Error::other(
      "no space left on device",
    )))
  }

  fn get(&self, subject_id: &str) -> Result<Option<CachedSubjectRecord>, StorageError> {
    self.inner.get(subject_id)
  }

  fn exists(&self, subject_id: &str) -> Result<bool, StorageError> {
    self.inner.exists(subject_id)
  }

  fn remove(&self, subject_id: &str) -> Result<bool, StorageError> {
    self.inner.remove(subject_id)
  }

  fn list(&self) -> Result<Vec<CachedSubjectSummary>, StorageError> {
    self.inner.list()
  }
}

pub fn subject(id: &str) -> SubjectMetadata {
  SubjectMetadata {
    id: id.to_string(),
    title: format!("Subject {}", id),
    description: Some("Semester notes".to_string()),
    tags: vec!["cs".to_string(), "sem4".to_string()],
    image: None,
  }
}

pub fn units(list: &[(&str, &str)]) -> Vec<UnitDescriptor> {
  list
    .iter()
    .map(|(id, name)| UnitDescriptor::new(*id, *name))
    .collect()
}
