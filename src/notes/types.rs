use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cover image attached to a subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectImage {
  pub content_type: String,
  pub data: Vec<u8>,
}

/// Subject metadata as shown in the subject page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectMetadata {
  pub id: String,
  pub title: String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub tags: Vec<String>,
  #[serde(default)]
  pub image: Option<SubjectImage>,
}

/// A unit (chapter or part) that belongs to a subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitDescriptor {
  pub id: String,
  pub name: String,
}

impl UnitDescriptor {
  pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      name: name.into(),
    }
  }
}

/// A unit payload fetched for offline reading
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedUnit {
  pub id: String,
  pub name: String,
  pub payload: Vec<u8>,
  pub content_type: String,
}

/// Everything stored for one downloaded subject
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedSubjectRecord {
  pub subject: SubjectMetadata,
  pub units: Vec<CachedUnit>,
  pub downloaded_at: DateTime<Utc>,
}

impl CachedSubjectRecord {
  pub fn subject_id(&self) -> &str {
    &self.subject.id
  }

  pub fn total_bytes(&self) -> u64 {
    self.units.iter().map(|u| u.payload.len() as u64).sum()
  }
}

/// Lightweight listing entry for a cached subject
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedSubjectSummary {
  pub subject_id: String,
  pub title: String,
  pub unit_count: usize,
  pub total_bytes: u64,
  pub downloaded_at: DateTime<Utc>,
}

impl From<&CachedSubjectRecord> for CachedSubjectSummary {
  fn from(record: &CachedSubjectRecord) -> Self {
    Self {
      subject_id: record.subject.id.clone(),
      title: record.subject.title.clone(),
      unit_count: record.units.len(),
      total_bytes: record.total_bytes(),
      downloaded_at: record.downloaded_at,
    }
  }
}
