mod common;

use chrono::{TimeZone, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use common::{subject, units, FakeFetcher, FullDiskStore};
use notelab_offline::notes::{CachedSubjectRecord, CachedUnit};
use notelab_offline::{
  DownloadError, DownloadOptions, FailurePolicy, FetchError, MemoryStorage, OfflineCache,
  SqliteStorage, StorageError, SubjectStore,
};

fn options(policy: FailurePolicy) -> DownloadOptions {
  DownloadOptions {
    concurrency: 4,
    policy,
    max_retries: 0,
  }
}

fn memory_cache(fetcher: &Arc<FakeFetcher>, policy: FailurePolicy) -> OfflineCache<MemoryStorage> {
  OfflineCache::new(MemoryStorage::new(), fetcher.clone(), options(policy))
}

#[tokio::test]
async fn test_all_units_cached_in_request_order() {
  // Later units finish first; the record must still follow request order
  let fetcher = Arc::new(
    FakeFetcher::new()
      .ok("1", b"unit one")
      .ok("2", b"unit two")
      .ok("3", b"unit three")
      .delay("1", Duration::from_millis(40))
      .delay("2", Duration::from_millis(20)),
  );
  let cache = memory_cache(&fetcher, FailurePolicy::Abort);

  let record = cache
    .download_subject(
      subject("s1"),
      units(&[("1", "Unit A"), ("2", "Unit B"), ("3", "Unit C")]),
    )
    .await
    .unwrap()
    .expect("record written");

  assert_eq!(record.units.len(), 3);
  let got: Vec<(&str, &str, &[u8])> = record
    .units
    .iter()
    .map(|u| (u.id.as_str(), u.name.as_str(), u.payload.as_slice()))
    .collect();
  assert_eq!(
    got,
    vec![
      ("1", "Unit A", &b"unit one"[..]),
      ("2", "Unit B", &b"unit two"[..]),
      ("3", "Unit C", &b"unit three"[..]),
    ]
  );

  let stored = cache.get_cached_subject("s1").await.unwrap();
  assert_eq!(stored, Some(record));
}

#[tokio::test]
async fn test_second_download_replaces_first() {
  let fetcher = Arc::new(
    FakeFetcher::new()
      .ok("1", b"one")
      .ok("2", b"two")
      .ok("3", b"three"),
  );
  let cache = memory_cache(&fetcher, FailurePolicy::Abort);

  cache
    .download_subject(subject("s1"), units(&[("1", "Unit A"), ("2", "Unit B")]))
    .await
    .unwrap();

  let mut renamed = subject("s1");
  renamed.title = "Renamed".to_string();
  let latest = cache
    .download_subject(renamed.clone(), units(&[("3", "Unit C")]))
    .await
    .unwrap()
    .unwrap();

  let stored = cache.get_cached_subject("s1").await.unwrap().unwrap();
  assert_eq!(stored, latest);
  assert_eq!(stored.subject, renamed);
  assert_eq!(stored.units.len(), 1);
  assert_eq!(stored.units[0].id, "3");
  assert_eq!(cache.list_cached_subjects().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_status_checks_do_not_touch_network() {
  let fetcher = Arc::new(FakeFetcher::new().ok("1", b"one"));
  let cache = memory_cache(&fetcher, FailurePolicy::Abort);

  assert!(!cache.is_subject_downloaded("s1").await.unwrap());

  cache
    .download_subject(subject("s1"), units(&[("1", "Unit A")]))
    .await
    .unwrap();
  let calls_after_download = fetcher.calls();

  assert!(cache.is_subject_downloaded("s1").await.unwrap());
  assert!(!cache.is_subject_downloaded("never-saved").await.unwrap());
  assert!(cache.get_cached_subject("never-saved").await.unwrap().is_none());
  assert_eq!(fetcher.calls(), calls_after_download);
}

#[tokio::test]
async fn test_empty_unit_list_writes_nothing() {
  let fetcher = Arc::new(FakeFetcher::new().ok("1", b"one"));
  let cache = memory_cache(&fetcher, FailurePolicy::Abort);

  let result = cache.download_subject(subject("s1"), Vec::new()).await.unwrap();
  assert!(result.is_none());
  assert!(!cache.is_subject_downloaded("s1").await.unwrap());
  assert_eq!(fetcher.calls(), 0);

  // An existing record is left as is
  let saved = cache
    .download_subject(subject("s1"), units(&[("1", "Unit A")]))
    .await
    .unwrap()
    .unwrap();
  assert!(cache.download_subject(subject("s1"), Vec::new()).await.unwrap().is_none());
  assert_eq!(cache.get_cached_subject("s1").await.unwrap(), Some(saved));
}

#[tokio::test]
async fn test_abort_policy_writes_nothing_when_a_locator_is_rejected() {
  let fetcher = Arc::new(FakeFetcher::new().ok("1", b"one").fail(
    "2",
    FetchError::Remote {
      status: Some(404),
      message: "unit not found".into(),
    },
  ));
  let cache = memory_cache(&fetcher, FailurePolicy::Abort);

  let err = cache
    .download_subject(subject("s1"), units(&[("1", "Unit A"), ("2", "Unit B")]))
    .await
    .unwrap_err();

  match &err {
    DownloadError::Remote { failures } => {
      assert_eq!(failures.len(), 1);
      assert_eq!(failures[0].unit_id, "2");
    }
    other => panic!("expected remote error, got {other:?}"),
  }
  assert_eq!(err.failed_unit_names(), vec!["Unit B"]);
  assert!(!cache.is_subject_downloaded("s1").await.unwrap());
  // Both fetches settled before the policy ran
  assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn test_skip_policy_persists_only_successful_units() {
  let fetcher = Arc::new(
    FakeFetcher::new()
      .ok("1", b"one")
      .fail("2", FetchError::remote("unit not found")),
  );
  let cache = memory_cache(&fetcher, FailurePolicy::Skip);

  let record = cache
    .download_subject(subject("s1"), units(&[("1", "Unit A"), ("2", "Unit B")]))
    .await
    .unwrap()
    .unwrap();

  assert_eq!(record.units.len(), 1);
  assert_eq!(record.units[0].id, "1");
  assert_eq!(record.units[0].name, "Unit A");
  assert_eq!(record.units[0].payload, b"one".to_vec());

  let stored = cache.get_cached_subject("s1").await.unwrap().unwrap();
  assert_eq!(stored.units, record.units);
}

#[tokio::test]
async fn test_skip_policy_waits_for_slow_units() {
  // A fast failure must not cut the batch short
  let fetcher = Arc::new(
    FakeFetcher::new()
      .fail("1", FetchError::remote("gone"))
      .ok("2", b"slow but fine")
      .delay("2", Duration::from_millis(50)),
  );
  let cache = memory_cache(&fetcher, FailurePolicy::Skip);

  let record = cache
    .download_subject(subject("s1"), units(&[("1", "Unit A"), ("2", "Unit B")]))
    .await
    .unwrap()
    .unwrap();

  assert_eq!(record.units.len(), 1);
  assert_eq!(record.units[0].payload, b"slow but fine".to_vec());
}

#[tokio::test]
async fn test_network_failure_is_reported_as_offline() {
  let fetcher = Arc::new(
    FakeFetcher::new()
      .fail("1", FetchError::Network("connection refused".into()))
      .fail("2", FetchError::remote("server error")),
  );
  let cache = memory_cache(&fetcher, FailurePolicy::Skip);

  let err = cache
    .download_subject(subject("s1"), units(&[("1", "Unit A"), ("2", "Unit B")]))
    .await
    .unwrap_err();

  assert!(err.is_network());
  assert!(!cache.is_subject_downloaded("s1").await.unwrap());
}

#[tokio::test]
async fn test_retries_recover_transient_failures() {
  let flaky = || {
    Arc::new(FakeFetcher::new().script(
      "1",
      vec![Err(FetchError::Network("reset".into())), Ok(b"one".to_vec())],
    ))
  };

  let fetcher = flaky();
  let cache = memory_cache(&fetcher, FailurePolicy::Abort);
  let err = cache
    .download_subject(subject("s1"), units(&[("1", "Unit A")]))
    .await
    .unwrap_err();
  assert!(err.is_network());

  let fetcher = flaky();
  let cache = OfflineCache::new(
    MemoryStorage::new(),
    fetcher.clone(),
    DownloadOptions {
      max_retries: 1,
      ..options(FailurePolicy::Abort)
    },
  );
  let record = cache
    .download_subject(subject("s1"), units(&[("1", "Unit A")]))
    .await
    .unwrap()
    .unwrap();
  assert_eq!(record.units[0].payload, b"one".to_vec());
  assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn test_invalid_unit_list_is_rejected_before_fetching() {
  let fetcher = Arc::new(FakeFetcher::new().ok("1", b"one"));
  let cache = memory_cache(&fetcher, FailurePolicy::Skip);

  let err = cache
    .download_subject(subject("s1"), units(&[("1", "Unit A"), ("1", "Unit A again")]))
    .await
    .unwrap_err();

  assert!(matches!(err, DownloadError::InvalidUnits(_)));
  assert_eq!(fetcher.calls(), 0);
  assert!(!cache.is_subject_downloaded("s1").await.unwrap());
}

#[tokio::test]
async fn test_cancelled_download_never_reaches_store() {
  let fetcher = Arc::new(FakeFetcher::new().ok("1", b"one").hang("2"));
  let cache = memory_cache(&fetcher, FailurePolicy::Skip);

  let cancel = CancellationToken::new();
  let trigger = cancel.clone();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(30)).await;
    trigger.cancel();
  });

  let err = cache
    .download_subject_with_cancel(
      subject("s1"),
      units(&[("1", "Unit A"), ("2", "Unit B")]),
      cancel,
    )
    .await
    .unwrap_err();

  assert!(matches!(err, DownloadError::Cancelled));
  assert!(!cache.is_subject_downloaded("s1").await.unwrap());

  // The subject can be downloaded again afterwards
  let fetcher = Arc::new(FakeFetcher::new().ok("1", b"one"));
  let cache = memory_cache(&fetcher, FailurePolicy::Skip);
  assert!(cache
    .download_subject(subject("s1"), units(&[("1", "Unit A")]))
    .await
    .unwrap()
    .is_some());
}

#[tokio::test]
async fn test_already_cancelled_token_skips_fetching() {
  let fetcher = Arc::new(FakeFetcher::new().ok("1", b"one"));
  let cache = memory_cache(&fetcher, FailurePolicy::Abort);

  let cancel = CancellationToken::new();
  cancel.cancel();

  let err = cache
    .download_subject_with_cancel(subject("s1"), units(&[("1", "Unit A")]), cancel)
    .await
    .unwrap_err();
  assert!(matches!(err, DownloadError::Cancelled));
  assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn test_concurrent_downloads_of_same_subject_are_coalesced() {
  let fetcher = Arc::new(
    FakeFetcher::new()
      .ok("1", b"one")
      .ok("2", b"two")
      .delay("1", Duration::from_millis(30))
      .delay("2", Duration::from_millis(30)),
  );
  let cache = memory_cache(&fetcher, FailurePolicy::Abort);
  let list = units(&[("1", "Unit A"), ("2", "Unit B")]);

  let (first, second) = tokio::join!(
    cache.download_subject(subject("s1"), list.clone()),
    cache.download_subject(subject("s1"), list.clone()),
  );

  let first = first.unwrap().unwrap();
  let second = second.unwrap().unwrap();
  assert_eq!(first, second);
  assert_eq!(fetcher.calls(), 2);

  // Once settled, a new request starts a fresh download
  cache.download_subject(subject("s1"), list).await.unwrap();
  assert_eq!(fetcher.calls(), 4);
}

#[tokio::test]
async fn test_abandoned_download_does_not_block_the_next_one() {
  let fetcher = Arc::new(FakeFetcher::new().ok("1", b"one").hang("2"));
  let cache = memory_cache(&fetcher, FailurePolicy::Abort);

  // The only caller gives up while unit 2 is still pending
  let abandoned = tokio::time::timeout(
    Duration::from_millis(30),
    cache.download_subject(subject("s1"), units(&[("1", "Unit A"), ("2", "Unit B")])),
  )
  .await;
  assert!(abandoned.is_err());

  let record = tokio::time::timeout(
    Duration::from_millis(500),
    cache.download_subject(subject("s1"), units(&[("1", "Unit A")])),
  )
  .await
  .expect("fresh download after the first caller left")
  .unwrap()
  .unwrap();

  assert_eq!(record.units.len(), 1);
  assert_eq!(cache.get_cached_subject("s1").await.unwrap(), Some(record));
}

#[tokio::test]
async fn test_joined_caller_can_cancel_without_stopping_the_download() {
  let fetcher = Arc::new(
    FakeFetcher::new()
      .ok("1", b"one")
      .delay("1", Duration::from_millis(80)),
  );
  let cache = memory_cache(&fetcher, FailurePolicy::Abort);

  let first = tokio::spawn({
    let cache = cache.clone();
    async move {
      cache
        .download_subject(subject("s1"), units(&[("1", "Unit A")]))
        .await
    }
  });
  tokio::time::sleep(Duration::from_millis(10)).await;

  let cancel = CancellationToken::new();
  let trigger = cancel.clone();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(20)).await;
    trigger.cancel();
  });

  let err = cache
    .download_subject_with_cancel(subject("s1"), units(&[("1", "Unit A")]), cancel)
    .await
    .unwrap_err();
  assert!(matches!(err, DownloadError::Cancelled));

  // The caller that stayed still gets its record
  let record = first.await.unwrap().unwrap().unwrap();
  assert_eq!(record.units[0].payload, b"one".to_vec());
  assert!(cache.is_subject_downloaded("s1").await.unwrap());
  assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn test_storage_failure_is_reported_and_nothing_is_cached() {
  let fetcher = Arc::new(FakeFetcher::new().ok("1", b"one").ok("2", b"two"));
  let cache = OfflineCache::new(
    FullDiskStore::default(),
    fetcher.clone(),
    options(FailurePolicy::Abort),
  );

  let err = cache
    .download_subject(subject("s1"), units(&[("1", "Unit A"), ("2", "Unit B")]))
    .await
    .unwrap_err();

  assert!(
    matches!(err, DownloadError::Storage(StorageError::Io(_))),
    "expected storage error, got {err:?}"
  );
  assert!(!err.is_network());
  assert!(err.failed_unit_names().is_empty());
  assert!(!cache.is_subject_downloaded("s1").await.unwrap());
}

#[tokio::test]
async fn test_different_subjects_download_independently() {
  let fetcher = Arc::new(
    FakeFetcher::new()
      .ok("1", b"one")
      .ok("2", b"two")
      .delay("1", Duration::from_millis(20)),
  );
  let cache = memory_cache(&fetcher, FailurePolicy::Abort);

  let (a, b) = tokio::join!(
    cache.download_subject(subject("s1"), units(&[("1", "Unit A")])),
    cache.download_subject(subject("s2"), units(&[("2", "Unit B")])),
  );

  assert_eq!(a.unwrap().unwrap().units[0].id, "1");
  assert_eq!(b.unwrap().unwrap().units[0].id, "2");
  assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn test_sqlite_cache_survives_reopen() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("offline.db");

  let fetcher = Arc::new(
    FakeFetcher::new()
      .ok("1", vec![0xABu8; 64 * 1024].as_slice())
      .ok("2", b"%PDF-1.7"),
  );
  let saved = {
    let cache = OfflineCache::new(
      SqliteStorage::open_at(&path).unwrap(),
      fetcher.clone(),
      options(FailurePolicy::Abort),
    );
    cache
      .download_subject(subject("s1"), units(&[("1", "Unit A"), ("2", "Unit B")]))
      .await
      .unwrap()
      .unwrap()
  };

  // A fresh connection sees the same record
  let storage = SqliteStorage::open_at(&path).unwrap();
  assert!(storage.exists("s1").unwrap());
  let loaded = storage.get("s1").unwrap().unwrap();
  assert_eq!(loaded, saved);
  assert_eq!(loaded.units[0].payload.len(), 64 * 1024);
}

fn stored_record(subject_id: &str, label: &str, unit_count: usize) -> CachedSubjectRecord {
  CachedSubjectRecord {
    subject: subject(subject_id),
    units: (0..unit_count)
      .map(|i| CachedUnit {
        id: format!("{}-{}", label, i),
        name: format!("Unit {}", i),
        payload: vec![i as u8; 128 * 1024],
        content_type: "application/pdf".to_string(),
      })
      .collect(),
    downloaded_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
  }
}

#[test]
fn test_sqlite_reader_sees_whole_records_during_replace() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("offline.db");

  let old = stored_record("s1", "old", 3);
  let new = stored_record("s1", "new", 1);
  let writer = SqliteStorage::open_at(&path).unwrap();
  writer.save(&old).unwrap();

  let done = Arc::new(AtomicBool::new(false));
  let reader = {
    let (path, old, new, done) = (path.clone(), old.clone(), new.clone(), Arc::clone(&done));
    std::thread::spawn(move || {
      // Separate connection, so only the transaction keeps reads consistent
      let reader = SqliteStorage::open_at(&path).unwrap();
      let mut reads = 0;
      loop {
        let seen = reader.get("s1").unwrap().expect("a record is always present");
        assert!(
          seen == old || seen == new,
          "partial record with {} units",
          seen.units.len()
        );
        reads += 1;
        if done.load(Ordering::SeqCst) {
          return reads;
        }
      }
    })
  };

  for round in 0..40 {
    let next = if round % 2 == 0 { &new } else { &old };
    writer.save(next).unwrap();
  }
  done.store(true, Ordering::SeqCst);

  assert!(reader.join().unwrap() > 0);
  assert_eq!(writer.get("s1").unwrap(), Some(old));
}

#[tokio::test]
async fn test_remove_cached_subject() {
  let fetcher = Arc::new(FakeFetcher::new().ok("1", b"one"));
  let cache = memory_cache(&fetcher, FailurePolicy::Abort);

  cache
    .download_subject(subject("s1"), units(&[("1", "Unit A")]))
    .await
    .unwrap();

  assert!(cache.remove_cached_subject("s1").await.unwrap());
  assert!(!cache.is_subject_downloaded("s1").await.unwrap());
  assert!(!cache.remove_cached_subject("s1").await.unwrap());
}
