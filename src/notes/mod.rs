//! Notes domain types and the remote collaborators used to fetch unit files.

pub mod api_types;
mod client;
mod fetcher;
mod types;

pub use client::{classify_reqwest_error, classify_status, ApiClient};
pub use fetcher::{BinarySource, LocatorSource, RemoteUnitFetcher, UnitFetcher};
pub use types::{
  CachedSubjectRecord, CachedSubjectSummary, CachedUnit, SubjectImage, SubjectMetadata,
  UnitDescriptor,
};
