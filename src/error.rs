//! Error types for the offline cache.
//!
//! Fetch failures are split into connectivity problems and remote rejections
//! so callers can render a dedicated offline state for the former.

use std::sync::Arc;
use thiserror::Error;

/// Failure fetching a single unit (locator exchange or payload retrieval).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
  /// The remote could not be reached at all.
  #[error("network unavailable: {0}")]
  Network(String),

  /// The remote was reachable but rejected the request.
  #[error("remote rejected request{}: {message}", status_suffix(.status))]
  Remote {
    status: Option<u16>,
    message: String,
  },
}

fn status_suffix(status: &Option<u16>) -> String {
  status.map(|s| format!(" ({})", s)).unwrap_or_default()
}

impl FetchError {
  pub fn remote(message: impl Into<String>) -> Self {
    Self::Remote {
      status: None,
      message: message.into(),
    }
  }

  pub fn is_network(&self) -> bool {
    matches!(self, Self::Network(_))
  }
}

/// Failure reading or writing the local store.
///
/// Cloneable so that one failed download can be reported to every caller
/// waiting on it.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
  #[error("sqlite error: {0}")]
  Sqlite(#[source] Arc<rusqlite::Error>),

  #[error("failed to (de)serialize cached data: {0}")]
  Serialization(#[source] Arc<serde_json::Error>),

  #[error("I/O error: {0}")]
  Io(#[source] Arc<std::io::Error>),

  #[error("store lock poisoned")]
  Poisoned,

  /// Stored data does not match what was written.
  #[error("cached record for {subject_id} is corrupt: {reason}")]
  Corrupt { subject_id: String, reason: String },

  /// The blocking storage task panicked or was cancelled.
  #[error("storage task failed: {0}")]
  Task(String),
}

impl From<rusqlite::Error> for StorageError {
  fn from(e: rusqlite::Error) -> Self {
    Self::Sqlite(Arc::new(e))
  }
}

impl From<serde_json::Error> for StorageError {
  fn from(e: serde_json::Error) -> Self {
    Self::Serialization(Arc::new(e))
  }
}

impl From<std::io::Error> for StorageError {
  fn from(e: std::io::Error) -> Self {
    Self::Io(Arc::new(e))
  }
}

/// One unit that did not make it into the cached record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
  pub unit_id: String,
  pub unit_name: String,
  pub error: FetchError,
}

/// Operation-level failure of a subject download.
#[derive(Debug, Clone, Error)]
pub enum DownloadError {
  /// At least one unit failed because the network was unreachable.
  #[error("no network connection, could not fetch {} unit(s)", .failures.len())]
  Network { failures: Vec<UnitFailure> },

  /// Units were rejected by the remote collaborator.
  #[error("remote rejected {} unit(s): {}", .failures.len(), first_message(.failures))]
  Remote { failures: Vec<UnitFailure> },

  #[error(transparent)]
  Storage(#[from] StorageError),

  #[error("download cancelled")]
  Cancelled,

  /// The unit list cannot be fanned out.
  #[error("invalid unit list: {0}")]
  InvalidUnits(String),
}

fn first_message(failures: &[UnitFailure]) -> String {
  failures
    .first()
    .map(|f| f.error.to_string())
    .unwrap_or_default()
}

impl DownloadError {
  /// Build the aggregate error for a set of failed units.
  ///
  /// Any connectivity failure makes the whole download a network failure.
  pub fn from_failures(failures: Vec<UnitFailure>) -> Self {
    if failures.iter().any(|f| f.error.is_network()) {
      Self::Network { failures }
    } else {
      Self::Remote { failures }
    }
  }

  pub fn is_network(&self) -> bool {
    matches!(self, Self::Network { .. })
  }

  /// Names of the units that failed, empty for non-fetch errors.
  pub fn failed_unit_names(&self) -> Vec<&str> {
    match self {
      Self::Network { failures } | Self::Remote { failures } => {
        failures.iter().map(|f| f.unit_name.as_str()).collect()
      }
      _ => Vec::new(),
    }
  }
}
