//! Serde-deserializable types matching the notes API responses.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping domain types focused on what the cache stores.

use serde::Deserialize;

use super::types::{SubjectImage, SubjectMetadata, UnitDescriptor};

// ============================================================================
// Unit locator endpoint
// ============================================================================

/// `GET /units/{id}/url` response envelope.
#[derive(Debug, Deserialize)]
pub struct ApiLocatorResponse {
  pub data: ApiLocatorData,
}

#[derive(Debug, Deserialize)]
pub struct ApiLocatorData {
  pub url: String,
}

/// Error body returned with non-success statuses.
#[derive(Debug, Default, Deserialize)]
pub struct ApiErrorBody {
  #[serde(default)]
  pub message: Option<String>,
  #[serde(default)]
  pub error: Option<String>,
}

impl ApiErrorBody {
  pub fn into_message(self) -> Option<String> {
    self.message.or(self.error)
  }
}

// ============================================================================
// Subject and unit shapes (as returned by the subject/unit list endpoints)
// ============================================================================

/// Binary data either as a plain byte array or as a serialized Node buffer
/// (`{ "type": "Buffer", "data": [...] }`).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiBinary {
  Bytes(Vec<u8>),
  Buffer { data: Vec<u8> },
}

impl ApiBinary {
  fn into_bytes(self) -> Vec<u8> {
    match self {
      Self::Bytes(b) | Self::Buffer { data: b } => b,
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiImage {
  #[serde(rename = "contentType")]
  pub content_type: String,
  pub data: ApiBinary,
}

#[derive(Debug, Deserialize)]
pub struct ApiSubject {
  #[serde(rename = "_id", alias = "id")]
  pub id: String,
  pub title: String,
  pub description: Option<String>,
  #[serde(default)]
  pub tags: Vec<String>,
  #[serde(alias = "image")]
  pub img: Option<ApiImage>,
}

impl From<ApiSubject> for SubjectMetadata {
  fn from(api: ApiSubject) -> Self {
    SubjectMetadata {
      id: api.id,
      title: api.title,
      description: api.description.filter(|d| !d.trim().is_empty()),
      tags: api.tags,
      image: api.img.map(|img| SubjectImage {
        content_type: img.content_type,
        data: img.data.into_bytes(),
      }),
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiUnit {
  #[serde(rename = "_id", alias = "id")]
  pub id: String,
  pub name: String,
}

impl From<ApiUnit> for UnitDescriptor {
  fn from(api: ApiUnit) -> Self {
    UnitDescriptor {
      id: api.id,
      name: api.name,
    }
  }
}
