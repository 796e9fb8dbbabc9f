//! CLI command handlers over the offline cache.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use notelab_offline::notes::api_types::{ApiSubject, ApiUnit};
use notelab_offline::notes::{CachedUnit, SubjectMetadata, UnitDescriptor};
use notelab_offline::{DownloadError, OfflineCache, SubjectStore};

/// Subject plus its unit list, as returned by the subject and unit endpoints.
#[derive(Debug, Deserialize)]
pub struct Manifest {
  pub subject: ApiSubject,
  #[serde(default)]
  pub units: Vec<ApiUnit>,
}

impl Manifest {
  pub fn into_parts(self) -> (SubjectMetadata, Vec<UnitDescriptor>) {
    (
      self.subject.into(),
      self.units.into_iter().map(UnitDescriptor::from).collect(),
    )
  }
}

pub fn load_manifest(path: &Path) -> Result<Manifest> {
  let contents = std::fs::read(path)
    .map_err(|e| eyre!("Failed to read manifest {}: {}", path.display(), e))?;

  serde_json::from_slice(&contents)
    .map_err(|e| eyre!("Failed to parse manifest {}: {}", path.display(), e))
}

pub async fn download<S: SubjectStore + 'static>(
  cache: &OfflineCache<S>,
  manifest_path: &Path,
) -> Result<()> {
  let (subject, units) = load_manifest(manifest_path)?.into_parts();
  let title = subject.title.clone();

  // Ctrl-C abandons the download before anything is written
  let cancel = CancellationToken::new();
  let guard = cancel.clone();
  let ctrl_c = tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      guard.cancel();
    }
  });

  let result = cache
    .download_subject_with_cancel(subject, units, cancel)
    .await;
  ctrl_c.abort();

  match result {
    Ok(Some(record)) => {
      println!(
        "Downloaded \"{}\": {} unit(s), {}",
        title,
        record.units.len(),
        format_bytes(record.total_bytes())
      );
      Ok(())
    }
    Ok(None) => {
      println!("\"{}\" has no units to download", title);
      Ok(())
    }
    Err(e) => Err(download_failure(e)),
  }
}

/// Generic failure message, with the failed unit names when there are any.
fn download_failure(err: DownloadError) -> color_eyre::Report {
  warn!(error = %err, "download failed");

  if err.is_network() {
    return eyre!("No internet: could not complete download");
  }

  let failed = err.failed_unit_names();
  if failed.is_empty() {
    eyre!("Could not complete download: {}", err)
  } else {
    eyre!(
      "Could not complete download, failed units: {}",
      failed.join(", ")
    )
  }
}

pub async fn status<S: SubjectStore + 'static>(
  cache: &OfflineCache<S>,
  subject_id: &str,
) -> Result<()> {
  if cache.is_subject_downloaded(subject_id).await? {
    println!("downloaded");
  } else {
    println!("not downloaded");
  }
  Ok(())
}

pub async fn show<S: SubjectStore + 'static>(
  cache: &OfflineCache<S>,
  subject_id: &str,
) -> Result<()> {
  let record = cache
    .get_cached_subject(subject_id)
    .await?
    .ok_or_else(|| eyre!("Subject {} is not downloaded", subject_id))?;

  println!("{}", record.subject.title);
  if let Some(description) = &record.subject.description {
    println!("{}", description);
  }
  if !record.subject.tags.is_empty() {
    println!("tags: {}", record.subject.tags.join(", "));
  }
  println!(
    "downloaded: {}",
    record.downloaded_at.format("%Y-%m-%d %H:%M UTC")
  );
  for (position, unit) in record.units.iter().enumerate() {
    println!(
      "  {:>2}. {} ({}, {})",
      position + 1,
      unit.name,
      unit.content_type,
      format_bytes(unit.payload.len() as u64)
    );
  }
  Ok(())
}

pub async fn export<S: SubjectStore + 'static>(
  cache: &OfflineCache<S>,
  subject_id: &str,
  dir: &Path,
) -> Result<Vec<PathBuf>> {
  let record = cache
    .get_cached_subject(subject_id)
    .await?
    .ok_or_else(|| eyre!("Subject {} is not downloaded", subject_id))?;

  tokio::fs::create_dir_all(dir)
    .await
    .map_err(|e| eyre!("Failed to create {}: {}", dir.display(), e))?;

  let mut written = Vec::with_capacity(record.units.len());
  for (position, unit) in record.units.iter().enumerate() {
    let path = dir.join(export_file_name(position, unit));
    tokio::fs::write(&path, &unit.payload)
      .await
      .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?;
    written.push(path);
  }

  info!(subject_id, files = written.len(), "exported cached units");
  Ok(written)
}

pub async fn list<S: SubjectStore + 'static>(cache: &OfflineCache<S>) -> Result<()> {
  let subjects = cache.list_cached_subjects().await?;
  if subjects.is_empty() {
    println!("No subjects downloaded");
    return Ok(());
  }

  for s in subjects {
    println!(
      "{}  {}  {} unit(s)  {}  {}",
      s.subject_id,
      s.title,
      s.unit_count,
      format_bytes(s.total_bytes),
      s.downloaded_at.format("%Y-%m-%d")
    );
  }
  Ok(())
}

pub async fn remove<S: SubjectStore + 'static>(
  cache: &OfflineCache<S>,
  subject_id: &str,
) -> Result<()> {
  if cache.remove_cached_subject(subject_id).await? {
    println!("Removed {}", subject_id);
  } else {
    println!("{} was not downloaded", subject_id);
  }
  Ok(())
}

/// File name for an exported unit: position prefix, sanitized name, extension.
fn export_file_name(position: usize, unit: &CachedUnit) -> String {
  let name: String = unit
    .name
    .chars()
    .map(|c| match c {
      '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
      c if c.is_control() => '_',
      c => c,
    })
    .collect();
  let name = name.trim();
  let name = if name.is_empty() { unit.id.as_str() } else { name };

  format!(
    "{:02}-{}.{}",
    position + 1,
    name,
    extension_for(&unit.content_type)
  )
}

fn extension_for(content_type: &str) -> &'static str {
  let essence = content_type
    .split(';')
    .next()
    .unwrap_or("")
    .trim()
    .to_ascii_lowercase();

  match essence.as_str() {
    "application/pdf" => "pdf",
    "text/plain" => "txt",
    "text/html" => "html",
    "image/png" => "png",
    "image/jpeg" => "jpg",
    "application/zip" => "zip",
    _ => "bin",
  }
}

fn format_bytes(bytes: u64) -> String {
  const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
  let mut value = bytes as f64;
  let mut unit = 0;
  while value >= 1024.0 && unit < UNITS.len() - 1 {
    value /= 1024.0;
    unit += 1;
  }
  if unit == 0 {
    format!("{} B", bytes)
  } else {
    format!("{:.1} {}", value, UNITS[unit])
  }
}
