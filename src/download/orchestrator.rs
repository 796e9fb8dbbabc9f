//! Fan-out/fan-in download of every unit of a subject.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::policy::{FailurePolicy, UnitOutcome};
use crate::cache::{blocking, SubjectStore};
use crate::config::CacheConfig;
use crate::error::DownloadError;
use crate::notes::{CachedSubjectRecord, SubjectMetadata, UnitDescriptor, UnitFetcher};

/// Tuning for a single subject download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadOptions {
  /// Maximum unit fetches in flight at once
  pub concurrency: usize,
  pub policy: FailurePolicy,
  /// Extra attempts for a unit whose fetch failed
  pub max_retries: u32,
}

impl Default for DownloadOptions {
  fn default() -> Self {
    Self {
      concurrency: 4,
      policy: FailurePolicy::default(),
      max_retries: 0,
    }
  }
}

impl From<&CacheConfig> for DownloadOptions {
  fn from(config: &CacheConfig) -> Self {
    Self {
      concurrency: config.concurrency.max(1),
      policy: config.failure_policy,
      max_retries: config.max_retries,
    }
  }
}

/// Downloads all units of a subject and persists them as one record.
pub struct Orchestrator<S> {
  storage: Arc<S>,
  fetcher: Arc<dyn UnitFetcher>,
  options: DownloadOptions,
}

impl<S: SubjectStore + 'static> Orchestrator<S> {
  pub fn new(storage: Arc<S>, fetcher: Arc<dyn UnitFetcher>, options: DownloadOptions) -> Self {
    Self {
      storage,
      fetcher,
      options,
    }
  }

  /// Download every unit of `subject` and store the result.
  ///
  /// Returns `Ok(None)` without touching the store when `units` is empty.
  /// Every unit fetch settles before the failure policy is applied; the
  /// surviving units are written with a single `save`. Cancelling `cancel`
  /// drops all pending fetches and guarantees nothing is written.
  #[instrument(skip_all, fields(subject_id = %subject.id, units = units.len()))]
  pub async fn request_download(
    &self,
    subject: SubjectMetadata,
    units: Vec<UnitDescriptor>,
    cancel: &CancellationToken,
  ) -> Result<Option<CachedSubjectRecord>, DownloadError> {
    if units.is_empty() {
      debug!("subject has no units, nothing to cache");
      return Ok(None);
    }
    validate_units(&units)?;

    if cancel.is_cancelled() {
      return Err(DownloadError::Cancelled);
    }

    info!("downloading subject for offline use");

    // buffered() yields in input order, so the record keeps request order
    let fan_out = stream::iter(units)
      .map(|unit| self.fetch_settled(unit))
      .buffered(self.options.concurrency.max(1))
      .collect::<Vec<_>>();

    let outcomes = tokio::select! {
      _ = cancel.cancelled() => {
        warn!("download cancelled before all units settled");
        return Err(DownloadError::Cancelled);
      }
      outcomes = fan_out => outcomes,
    };

    let units = self.options.policy.collapse(outcomes)?;
    let record = CachedSubjectRecord {
      subject,
      units,
      downloaded_at: Utc::now(),
    };

    if cancel.is_cancelled() {
      return Err(DownloadError::Cancelled);
    }

    let storage = Arc::clone(&self.storage);
    let record = blocking(move || storage.save(&record).map(|()| record)).await?;

    info!(
      cached_units = record.units.len(),
      bytes = record.total_bytes(),
      "subject cached"
    );
    Ok(Some(record))
  }

  /// Fetch one unit, retrying up to `max_retries` times. Never fails: the
  /// outcome carries the error instead.
  async fn fetch_settled(&self, unit: UnitDescriptor) -> UnitOutcome {
    let mut attempt = 0;
    loop {
      match self.fetcher.fetch_unit(&unit).await {
        Err(e) if attempt < self.options.max_retries => {
          attempt += 1;
          warn!(unit_id = %unit.id, attempt, error = %e, "unit fetch failed, retrying");
        }
        result => {
          if let Err(e) = &result {
            warn!(unit_id = %unit.id, unit_name = %unit.name, error = %e, "unit fetch failed");
          }
          return UnitOutcome { unit, result };
        }
      }
    }
  }
}

/// Reject unit lists that cannot be mapped to distinct cached units.
fn validate_units(units: &[UnitDescriptor]) -> Result<(), DownloadError> {
  let mut seen = HashSet::with_capacity(units.len());
  for unit in units {
    if unit.id.trim().is_empty() {
      return Err(DownloadError::InvalidUnits(format!(
        "unit '{}' has an empty id",
        unit.name
      )));
    }
    if !seen.insert(unit.id.as_str()) {
      return Err(DownloadError::InvalidUnits(format!(
        "duplicate unit id {}",
        unit.id
      )));
    }
  }
  Ok(())
}
