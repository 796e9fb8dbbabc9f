//! Offline cache facade used by the UI layer.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::blocking;
use super::traits::SubjectStore;
use crate::download::{DownloadOptions, Orchestrator};
use crate::error::{DownloadError, StorageError};
use crate::notes::{
  CachedSubjectRecord, CachedSubjectSummary, SubjectMetadata, UnitDescriptor, UnitFetcher,
};

type DownloadResult = Result<Option<CachedSubjectRecord>, DownloadError>;
type SharedDownload = Shared<BoxFuture<'static, DownloadResult>>;
type Registry = Arc<Mutex<HashMap<String, InFlight>>>;

/// A running download and the callers waiting on it.
struct InFlight {
  id: u64,
  download: SharedDownload,
  cancel: CancellationToken,
  waiters: usize,
}

/// One caller's interest in an in-flight download. When the last waiter
/// leaves before the download settles, the download is cancelled.
struct Waiter {
  registry: Registry,
  subject_id: String,
  id: u64,
}

impl Drop for Waiter {
  fn drop(&mut self) {
    let Ok(mut in_flight) = self.registry.lock() else {
      return;
    };

    let abandoned = match in_flight.get_mut(&self.subject_id) {
      Some(entry) if entry.id == self.id => {
        entry.waiters -= 1;
        entry.waiters == 0
      }
      _ => false,
    };

    if abandoned {
      if let Some(entry) = in_flight.remove(&self.subject_id) {
        debug!(subject_id = %self.subject_id, "no callers left, cancelling download");
        entry.cancel.cancel();
      }
    }
  }
}

/// Offline content cache for subjects.
///
/// Downloads go through the [`Orchestrator`]; status and reads go straight to
/// the store and never touch the network.
///
/// At most one download per subject id runs at a time. A caller asking for a
/// subject that is already downloading joins the in-flight download and gets
/// its result, regardless of the units it passed. Each download runs on its
/// own task and is cancelled once every caller waiting on it has cancelled or
/// gone away.
pub struct OfflineCache<S: SubjectStore> {
  storage: Arc<S>,
  orchestrator: Arc<Orchestrator<S>>,
  in_flight: Registry,
  next_id: Arc<AtomicU64>,
}

impl<S: SubjectStore + 'static> OfflineCache<S> {
  /// Create a new offline cache over the given storage backend.
  pub fn new(storage: S, fetcher: Arc<dyn UnitFetcher>, options: DownloadOptions) -> Self {
    let storage = Arc::new(storage);
    let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&storage), fetcher, options));

    Self {
      storage,
      orchestrator,
      in_flight: Arc::new(Mutex::new(HashMap::new())),
      next_id: Arc::new(AtomicU64::new(0)),
    }
  }

  /// Download a subject for offline reading.
  pub async fn download_subject(
    &self,
    subject: SubjectMetadata,
    units: Vec<UnitDescriptor>,
  ) -> DownloadResult {
    self
      .download_subject_with_cancel(subject, units, CancellationToken::new())
      .await
  }

  /// Download a subject, giving up when `cancel` fires.
  ///
  /// Firing `cancel` (or dropping the returned future) only detaches this
  /// caller. The download itself is cancelled, and never reaches the store,
  /// once no caller is left waiting on it.
  pub async fn download_subject_with_cancel(
    &self,
    subject: SubjectMetadata,
    units: Vec<UnitDescriptor>,
    cancel: CancellationToken,
  ) -> DownloadResult {
    if cancel.is_cancelled() {
      return Err(DownloadError::Cancelled);
    }

    let subject_id = subject.id.clone();
    let (id, download) = self.join_or_start(subject, units)?;
    let _waiter = Waiter {
      registry: Arc::clone(&self.in_flight),
      subject_id,
      id,
    };

    tokio::select! {
      _ = cancel.cancelled() => Err(DownloadError::Cancelled),
      result = download => result,
    }
  }

  /// Register as a waiter on the in-flight download for this subject, or
  /// spawn a new one.
  fn join_or_start(
    &self,
    subject: SubjectMetadata,
    units: Vec<UnitDescriptor>,
  ) -> Result<(u64, SharedDownload), DownloadError> {
    let mut in_flight = self
      .in_flight
      .lock()
      .map_err(|_| StorageError::Poisoned)?;

    if let Some(entry) = in_flight.get_mut(&subject.id) {
      debug!(subject_id = %subject.id, "joining in-flight download");
      entry.waiters += 1;
      return Ok((entry.id, entry.download.clone()));
    }

    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let subject_id = subject.id.clone();
    let cancel = CancellationToken::new();

    let orchestrator = Arc::clone(&self.orchestrator);
    let registry = Arc::clone(&self.in_flight);
    let task_cancel = cancel.clone();
    let key = subject_id.clone();
    let handle = tokio::spawn(async move {
      let result = orchestrator
        .request_download(subject, units, &task_cancel)
        .await;
      // Deregister before resolving so later callers start a fresh download
      if let Ok(mut in_flight) = registry.lock() {
        if in_flight.get(&key).is_some_and(|entry| entry.id == id) {
          in_flight.remove(&key);
        }
      }
      result
    });

    let download = async move {
      handle
        .await
        .unwrap_or_else(|e| Err(StorageError::Task(e.to_string()).into()))
    }
    .boxed()
    .shared();

    in_flight.insert(
      subject_id,
      InFlight {
        id,
        download: download.clone(),
        cancel,
        waiters: 1,
      },
    );
    Ok((id, download))
  }

  /// Whether a subject has a cached record.
  pub async fn is_subject_downloaded(&self, subject_id: &str) -> Result<bool, StorageError> {
    let storage = Arc::clone(&self.storage);
    let subject_id = subject_id.to_string();
    blocking(move || storage.exists(&subject_id)).await
  }

  /// Get the cached record for offline reading.
  pub async fn get_cached_subject(
    &self,
    subject_id: &str,
  ) -> Result<Option<CachedSubjectRecord>, StorageError> {
    let storage = Arc::clone(&self.storage);
    let subject_id = subject_id.to_string();
    blocking(move || storage.get(&subject_id)).await
  }

  /// Delete a cached subject. Returns whether one was cached.
  pub async fn remove_cached_subject(&self, subject_id: &str) -> Result<bool, StorageError> {
    let storage = Arc::clone(&self.storage);
    let subject_id = subject_id.to_string();
    blocking(move || storage.remove(&subject_id)).await
  }

  pub async fn list_cached_subjects(&self) -> Result<Vec<CachedSubjectSummary>, StorageError> {
    let storage = Arc::clone(&self.storage);
    blocking(move || storage.list()).await
  }
}

impl<S: SubjectStore> Clone for OfflineCache<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      orchestrator: Arc::clone(&self.orchestrator),
      in_flight: Arc::clone(&self.in_flight),
      next_id: Arc::clone(&self.next_id),
    }
  }
}
