//! End-to-end replication scenarios against in-memory stores.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::{bucket, eventually, fast_journal_settings, fast_reconciler_settings, init_tracing, Harness};
use twinblob_journal::{
    BackoffPolicy, InMemoryJournal, JournalError, JournalSettings, LeasedObligation, Obligation,
    ObligationJournal, ObligationKey, ObligationKind,
};
use twinblob_replication::Reconciler;
use twinblob_store::{BlobStoreDao, FaultMode};
use twinblob_types::{BlobId, Timestamp};

#[tokio::test]
async fn secondary_outage_heals_after_restore() {
    init_tracing();
    let h = Harness::new();
    let handle = Reconciler::new(&h.store, fast_reconciler_settings()).spawn();
    let b = bucket("mail");

    let hello = h.store.save_content(&b, Bytes::from_static(b"hello")).await.unwrap();
    eventually("hello replicated", || h.secondary_data.contains(&b, &hello)).await;

    h.secondary.set_mode(FaultMode::Unavailable);
    let world = h.store.save_content(&b, Bytes::from_static(b"world")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!h.secondary_data.contains(&b, &world));
    assert!(h.journal.get(&ObligationKind::save(b.clone(), world).key()).unwrap().unwrap().attempt_count > 0);

    h.secondary.resume();
    h.wait_converged().await;

    let mut expected = vec![hello, world];
    expected.sort();
    assert_eq!(Harness::ids(h.primary.as_ref(), &b).await, expected);
    assert_eq!(Harness::ids(h.secondary_data.as_ref(), &b).await, expected);
    handle.shutdown().await;
}

#[tokio::test]
async fn delete_all_buckets_with_pending_obligations_empties_both() {
    init_tracing();
    let h = Harness::new();
    let old = h
        .secondary_data
        .save_content(&bucket("archive"), Bytes::from_static(b"old"))
        .await
        .unwrap();
    h.secondary.set_mode(FaultMode::Unavailable);

    for (name, body) in [("a", "one"), ("b", "two"), ("c", "three")] {
        h.store
            .save_content(&bucket(name), Bytes::from(body.as_bytes().to_vec()))
            .await
            .unwrap();
    }
    h.store.delete_all_buckets().await.unwrap();
    assert_eq!(h.journal.len().unwrap(), 1);

    h.secondary.resume();
    let handle = Reconciler::new(&h.store, fast_reconciler_settings()).spawn();
    eventually("journal drained", || h.journal.is_empty().unwrap()).await;

    assert!(h.primary.is_empty());
    assert!(h.secondary_data.is_empty());
    assert!(!h.secondary_data.contains(&bucket("archive"), &old));
    handle.shutdown().await;
}

#[tokio::test]
async fn delete_before_replication_wins() {
    init_tracing();
    let h = Harness::new();
    h.secondary.pause();
    let reconciler = Reconciler::new(&h.store, fast_reconciler_settings());
    let b = bucket("mail");

    let id = h.store.save_content(&b, Bytes::from_static(b"draft")).await.unwrap();
    h.store.delete(&b, &id).await.unwrap();

    h.secondary.resume();
    reconciler.run_once().await.unwrap();

    assert!(h.journal.is_empty().unwrap());
    assert!(!h.primary.contains(&b, &id));
    assert!(!h.secondary_data.contains(&b, &id));
}

#[tokio::test]
async fn delete_waits_for_in_flight_save() {
    init_tracing();
    let h = Harness::new();
    h.secondary.pause();
    let handle = Reconciler::new(&h.store, fast_reconciler_settings()).spawn();
    let b = bucket("mail");

    let id = h.store.save_content(&b, Bytes::from_static(b"racing")).await.unwrap();
    // Let the reconciler lease the save and block on the stalled secondary.
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.store.delete(&b, &id).await.unwrap();
    h.secondary.resume();

    eventually("journal drained", || h.journal.is_empty().unwrap()).await;
    assert!(!h.secondary_data.contains(&b, &id));
    handle.shutdown().await;
}

#[tokio::test]
async fn save_does_not_wait_for_stalled_secondary() {
    init_tracing();
    let h = Harness::new();
    h.secondary.pause();
    let handle = Reconciler::new(&h.store, fast_reconciler_settings()).spawn();
    let b = bucket("mail");

    let saved = tokio::time::timeout(
        Duration::from_secs(1),
        h.store.save_content(&b, Bytes::from_static(b"fast path")),
    )
    .await
    .expect("save blocked on the secondary")
    .unwrap();
    assert!(h.primary.contains(&b, &saved));
    assert_eq!(h.store.read(&b, &saved).await.unwrap(), Bytes::from_static(b"fast path"));

    h.secondary.resume();
    h.wait_converged().await;
    handle.shutdown().await;
}

#[tokio::test]
async fn at_most_one_operation_per_blob_in_flight() {
    init_tracing();
    let instrumented = Arc::new(common::InstrumentedBlobStore::new(
        Arc::new(twinblob_store::InMemoryBlobStore::new()),
        Duration::from_millis(15),
    ));
    let wrapped: Arc<dyn BlobStoreDao> = instrumented.clone();
    let h = Harness::with_secondary(
        Arc::new(InMemoryJournal::new(fast_journal_settings())),
        move |_| wrapped,
    );
    let mut settings = fast_reconciler_settings();
    settings.max_workers = 8;
    let handle = Reconciler::new(&h.store, settings).spawn();

    let contents: Vec<Bytes> = (0u8..4).map(|i| Bytes::from(vec![i; 32])).collect();
    let mut writers = Vec::new();
    // Many writers hammering the same few ids.
    for _ in 0..6 {
        let store = h.store.clone();
        let contents = contents.clone();
        writers.push(tokio::spawn(async move {
            for round in 0..10 {
                let data = contents[round % contents.len()].clone();
                store.save_content(&bucket("hot"), data).await.unwrap();
                tokio::task::yield_now().await;
            }
        }));
    }
    // One writer toggling a single id between saved and deleted.
    {
        let store = h.store.clone();
        writers.push(tokio::spawn(async move {
            let b = bucket("toggle");
            for _ in 0..10 {
                let id = store.save_content(&b, Bytes::from_static(b"flip")).await.unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
                store.delete(&b, &id).await.unwrap();
            }
            store.save_content(&b, Bytes::from_static(b"flip")).await.unwrap();
        }));
    }
    for writer in writers {
        writer.await.unwrap();
    }

    eventually("journal drained", || h.journal.is_empty().unwrap()).await;
    assert!(instrumented.calls() > 0);
    assert_eq!(instrumented.max_overlap(), 1, "two operations overlapped on one blob");

    let prober = twinblob_replication::ConsistencyProber::new(h.primary.clone(), instrumented.clone());
    assert!(prober.is_converged().await.unwrap());
    handle.shutdown().await;
}

#[tokio::test]
async fn attempts_never_outlive_their_lease() {
    init_tracing();
    let instrumented = Arc::new(common::InstrumentedBlobStore::new(
        Arc::new(twinblob_store::InMemoryBlobStore::new()),
        Duration::from_millis(300),
    ));
    let wrapped: Arc<dyn BlobStoreDao> = instrumented.clone();
    let journal = Arc::new(InMemoryJournal::new(JournalSettings {
        backoff: BackoffPolicy::fixed(Duration::from_millis(5), Duration::from_millis(20)),
        lease_timeout: Duration::from_millis(50),
    }));
    let h = Harness::with_secondary(journal, move |_| wrapped);
    let mut settings = fast_reconciler_settings();
    settings.attempt_timeout = Duration::from_secs(2);
    let reconciler = Reconciler::new(&h.store, settings);
    assert!(reconciler.settings().attempt_timeout < Duration::from_millis(50));
    let handle = reconciler.spawn();

    h.store
        .save_content(&bucket("mail"), Bytes::from_static(b"slow secondary"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    handle.shutdown().await;

    assert!(instrumented.calls() > 1, "attempts were not retried");
    assert_eq!(instrumented.max_overlap(), 1, "expired lease let a second attempt overlap");
}

/// Journal that can be switched to reject appends.
struct FlakyJournal {
    inner: InMemoryJournal,
    failing: AtomicBool,
}

impl ObligationJournal for FlakyJournal {
    fn append(&self, kind: ObligationKind, now: Timestamp) -> twinblob_journal::Result<Obligation> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(JournalError::Io(std::io::Error::other("journal volume offline")));
        }
        self.inner.append(kind, now)
    }

    fn drain_ready(&self, now: Timestamp, limit: usize) -> twinblob_journal::Result<Vec<LeasedObligation>> {
        self.inner.drain_ready(now, limit)
    }

    fn mark_delivered(&self, leased: &LeasedObligation) -> twinblob_journal::Result<()> {
        self.inner.mark_delivered(leased)
    }

    fn mark_failed(&self, leased: &LeasedObligation, error: &str, now: Timestamp) -> twinblob_journal::Result<()> {
        self.inner.mark_failed(leased, error, now)
    }

    fn pending(&self) -> twinblob_journal::Result<Vec<Obligation>> {
        self.inner.pending()
    }

    fn len(&self) -> twinblob_journal::Result<usize> {
        self.inner.len()
    }

    fn get(&self, key: &ObligationKey) -> twinblob_journal::Result<Option<Obligation>> {
        self.inner.get(key)
    }

    fn lease_timeout(&self) -> Duration {
        self.inner.lease_timeout()
    }
}

#[tokio::test]
async fn resync_repairs_lost_obligations() {
    init_tracing();
    let journal = Arc::new(FlakyJournal {
        inner: InMemoryJournal::new(fast_journal_settings()),
        failing: AtomicBool::new(false),
    });
    let h = Harness::with_journal(journal.clone());
    let reconciler = Reconciler::new(&h.store, fast_reconciler_settings());
    let b = bucket("mail");

    let kept = h.store.save_content(&b, Bytes::from_static(b"kept")).await.unwrap();
    let doomed = h.store.save_content(&b, Bytes::from_static(b"doomed")).await.unwrap();
    reconciler.run_once().await.unwrap();
    assert!(h.converged().await);

    journal.failing.store(true, Ordering::SeqCst);
    let lost = h.store.save_content(&b, Bytes::from_static(b"lost")).await.unwrap();
    h.store.delete(&b, &doomed).await.unwrap();
    journal.failing.store(false, Ordering::SeqCst);

    assert_eq!(h.store.stats().unwrap().obligations_lost, 2);
    reconciler.run_once().await.unwrap();
    assert!(!h.converged().await);

    let report = h.store.resync_all().await.unwrap();
    assert_eq!(report.saves_enqueued, 1);
    assert_eq!(report.deletes_enqueued, 1);

    reconciler.run_once().await.unwrap();
    assert!(h.converged().await);
    assert!(h.secondary_data.contains(&b, &kept));
    assert!(h.secondary_data.contains(&b, &lost));
    assert!(!h.secondary_data.contains(&b, &doomed));
}

#[tokio::test]
async fn missing_primary_blob_is_not_copied() {
    init_tracing();
    let h = Harness::new();
    let b = bucket("mail");
    let ghost = BlobId::of(b"ghost");
    h.journal
        .append(ObligationKind::save(b.clone(), ghost), Timestamp::now())
        .unwrap();

    let summary = Reconciler::new(&h.store, fast_reconciler_settings())
        .run_once()
        .await
        .unwrap();
    assert_eq!(summary.failed, 0);
    assert!(h.journal.is_empty().unwrap());
    assert!(Harness::ids(h.secondary_data.as_ref(), &b).await.is_empty());
}
