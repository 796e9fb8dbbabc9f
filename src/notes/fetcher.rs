//! Remote unit fetching: locator exchange followed by payload retrieval.

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::error::FetchError;

use super::types::{CachedUnit, UnitDescriptor};

/// Exchanges a unit id for a short-lived content locator.
#[async_trait]
pub trait LocatorSource: Send + Sync {
  async fn unit_locator(&self, unit_id: &str) -> Result<Url, FetchError>;
}

/// Retrieves binary content behind a locator.
#[async_trait]
pub trait BinarySource: Send + Sync {
  /// Returns the payload and its content type.
  async fn get_binary(&self, locator: &Url) -> Result<(Vec<u8>, String), FetchError>;
}

/// Fetches a single unit, ready to be cached.
#[async_trait]
pub trait UnitFetcher: Send + Sync {
  async fn fetch_unit(&self, unit: &UnitDescriptor) -> Result<CachedUnit, FetchError>;
}

/// Unit fetcher backed by a locator source and a binary source.
///
/// Usually both roles are played by the same [`ApiClient`](super::ApiClient).
pub struct RemoteUnitFetcher<L, B> {
  locators: L,
  binaries: B,
}

impl<L, B> RemoteUnitFetcher<L, B> {
  pub fn new(locators: L, binaries: B) -> Self {
    Self { locators, binaries }
  }
}

#[async_trait]
impl<L, B> UnitFetcher for RemoteUnitFetcher<L, B>
where
  L: LocatorSource,
  B: BinarySource,
{
  async fn fetch_unit(&self, unit: &UnitDescriptor) -> Result<CachedUnit, FetchError> {
    let locator = self.locators.unit_locator(&unit.id).await?;
    let (payload, content_type) = self.binaries.get_binary(&locator).await?;

    debug!(
      unit_id = %unit.id,
      bytes = payload.len(),
      content_type = %content_type,
      "fetched unit payload"
    );

    Ok(CachedUnit {
      id: unit.id.clone(),
      name: unit.name.clone(),
      payload,
      content_type,
    })
  }
}
