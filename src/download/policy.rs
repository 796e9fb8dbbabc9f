//! Partial-failure handling for a settled batch of unit fetches.

use serde::Deserialize;
use tracing::warn;

use crate::error::{DownloadError, FetchError, UnitFailure};
use crate::notes::{CachedUnit, UnitDescriptor};

/// What to do once every unit fetch of a subject has settled and some failed.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
  /// Write nothing if any unit failed and report the failures
  #[default]
  Abort,
  /// Drop the failed units and persist the rest
  Skip,
}

/// Settled result of one unit fetch.
#[derive(Debug, Clone)]
pub struct UnitOutcome {
  pub unit: UnitDescriptor,
  pub result: Result<CachedUnit, FetchError>,
}

impl FailurePolicy {
  /// Collapse settled outcomes into the units to persist.
  ///
  /// Surviving units keep the order of `outcomes`. Never returns an empty
  /// list: a batch where nothing survived is an error under every policy.
  pub fn collapse(self, outcomes: Vec<UnitOutcome>) -> Result<Vec<CachedUnit>, DownloadError> {
    let mut units = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();

    for outcome in outcomes {
      match outcome.result {
        Ok(unit) => units.push(unit),
        Err(error) => failures.push(UnitFailure {
          unit_id: outcome.unit.id,
          unit_name: outcome.unit.name,
          error,
        }),
      }
    }

    if failures.is_empty() {
      return Ok(units);
    }

    match self {
      Self::Skip if !units.is_empty() => {
        warn!(
          failed = failures.len(),
          kept = units.len(),
          "dropping units that failed to download"
        );
        Ok(units)
      }
      _ => Err(DownloadError::from_failures(failures)),
    }
  }
}
