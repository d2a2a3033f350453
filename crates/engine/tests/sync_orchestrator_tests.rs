//! End-to-end orchestrator scenarios against a stubbed feed and an
//! in-memory store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{Barrier, Notify, Semaphore};
use tokio_util::sync::CancellationToken;

use vantasync_engine::client::{BatchSink, FeedProvider, VulnerabilityFeed};
use vantasync_engine::{
    ApiClientError, ApiCredentials, BatchStats, MemorySettingsStore, StreamKind, SyncError,
    SyncOptions, SyncOrchestrator, SyncState, VulnStore,
};

/// Scripted feed: serves pre-baked pages per stream and records the
/// filters and cancellation tokens it was handed.
#[derive(Default)]
struct StubFeed {
    vulnerability_pages: Vec<Vec<Value>>,
    remediation_pages: Vec<Vec<Value>>,
    asset_pages: Vec<Vec<Value>>,
    /// All three fetches must arrive here before any proceeds.
    start_barrier: Option<Arc<Barrier>>,
    /// Pages after the first wait for a permit per page.
    page_gate: Option<Arc<Semaphore>>,
    /// When set, the vulnerability fetch hangs until cancelled.
    hang_vulnerabilities_until_cancelled: bool,
    /// When set, the vulnerability fetch hangs until notified, ignoring
    /// cancellation, then reports the cancelled request.
    hang_vulnerabilities_until: Option<Arc<Notify>>,
    seen_filters: Mutex<Vec<(StreamKind, Vec<(String, String)>)>>,
    seen_tokens: Mutex<Vec<CancellationToken>>,
}

#[async_trait]
impl VulnerabilityFeed for StubFeed {
    async fn fetch(
        &self,
        stream: StreamKind,
        filters: Vec<(String, String)>,
        cancel: CancellationToken,
        mut on_batch: BatchSink,
    ) -> Result<(), SyncError> {
        self.seen_filters.lock().push((stream, filters));
        self.seen_tokens.lock().push(cancel.clone());

        if let Some(barrier) = &self.start_barrier {
            barrier.wait().await;
        }

        let pages = match stream {
            StreamKind::Vulnerabilities => self.vulnerability_pages.clone(),
            StreamKind::Remediations => self.remediation_pages.clone(),
            StreamKind::Assets => self.asset_pages.clone(),
        };

        for (index, page) in pages.into_iter().enumerate() {
            if index > 0 {
                if let Some(gate) = &self.page_gate {
                    gate.acquire().await.expect("gate closed").forget();
                }
            }
            if cancel.is_cancelled() {
                return Err(ApiClientError::Cancelled.into());
            }
            if !page.is_empty() {
                on_batch(page).await?;
            }
        }

        if stream == StreamKind::Vulnerabilities {
            if let Some(release) = &self.hang_vulnerabilities_until {
                release.notified().await;
                return Err(ApiClientError::Cancelled.into());
            }
            if self.hang_vulnerabilities_until_cancelled {
                cancel.cancelled().await;
                return Err(ApiClientError::Cancelled.into());
            }
        }
        Ok(())
    }
}

struct StubProvider(Arc<StubFeed>);

impl FeedProvider for StubProvider {
    fn connect(
        &self,
        _credentials: &ApiCredentials,
    ) -> Result<Arc<dyn VulnerabilityFeed>, SyncError> {
        Ok(Arc::clone(&self.0) as Arc<dyn VulnerabilityFeed>)
    }
}

struct Fixture {
    store: Arc<VulnStore>,
    orchestrator: Arc<SyncOrchestrator>,
    feed: Arc<StubFeed>,
}

fn fixture(feed: StubFeed) -> Fixture {
    let store = Arc::new(VulnStore::open_in_memory().expect("in-memory store"));
    let settings = Arc::new(MemorySettingsStore::with_credentials(ApiCredentials::new(
        "client-id",
        "client-secret",
    )));
    let feed = Arc::new(feed);
    let orchestrator = Arc::new(SyncOrchestrator::new(
        Arc::clone(&store),
        settings,
        Arc::new(StubProvider(Arc::clone(&feed))),
    ));
    Fixture {
        store,
        orchestrator,
        feed,
    }
}

fn drain<T: Clone>(rx: &mut tokio::sync::broadcast::Receiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(item) = rx.try_recv() {
        out.push(item);
    }
    out
}

#[tokio::test]
async fn small_clean_sync_classifies_and_journals() {
    let fx = fixture(StubFeed {
        vulnerability_pages: vec![vec![
            json!({"id": "v-1", "name": "SSH vuln", "severity": "CRITICAL"}),
            json!({"id": "v-2", "name": "Kernel CVE", "severity": "HIGH",
                   "deactivateMetadata": {"deactivatedOnDate": "2024-01-10"}}),
            json!({"id": "v-3", "name": "Lib bug", "severity": "MEDIUM"}),
        ]],
        remediation_pages: vec![vec![
            json!({"id": "r-1", "vulnerabilityId": "v-1", "status": "open"}),
            json!({"id": "r-2", "vulnerabilityId": "v-2", "status": "closed"}),
        ]],
        ..StubFeed::default()
    });

    let mut states = fx.orchestrator.events().subscribe_state();
    let outcome = fx
        .orchestrator
        .sync(SyncOptions::default())
        .await
        .expect("sync");

    assert_eq!(
        outcome.vulnerabilities,
        BatchStats {
            new: 3,
            updated: 0,
            remediated: 1,
            total: 3
        }
    );
    assert_eq!(
        outcome.remediations,
        BatchStats {
            new: 2,
            updated: 0,
            remediated: 0,
            total: 2
        }
    );

    let history = fx.store.get_sync_history(None).await.expect("history");
    let starts = history
        .iter()
        .filter(|e| e.event_type.as_deref() == Some("start"))
        .count();
    let completes = history
        .iter()
        .filter(|e| e.event_type.as_deref() == Some("complete"))
        .count();
    assert_eq!(starts, 1);
    assert_eq!(completes, 1);

    let states = drain(&mut states);
    assert_eq!(states.first(), Some(&SyncState::Running));
    assert_eq!(states.last(), Some(&SyncState::Idle));
}

#[tokio::test]
async fn buffered_flush_splits_into_threshold_sized_batches() {
    let page = |start: usize, len: usize| -> Vec<Value> {
        (start..start + len)
            .map(|i| json!({"id": format!("v-{i}"), "name": format!("vuln {i}")}))
            .collect()
    };
    let fx = fixture(StubFeed {
        vulnerability_pages: vec![page(0, 1000), page(1000, 1000), page(2000, 500)],
        ..StubFeed::default()
    });

    let mut incrementals = fx.orchestrator.events().subscribe_incremental();
    let mut progress = fx.orchestrator.events().subscribe_progress();

    let outcome = fx
        .orchestrator
        .sync(SyncOptions {
            batch_size: 1000,
            ..SyncOptions::default()
        })
        .await
        .expect("sync");
    assert_eq!(outcome.vulnerabilities.new, 2500);

    let flushes: Vec<usize> = drain(&mut incrementals)
        .into_iter()
        .filter(|u| u.stream == StreamKind::Vulnerabilities)
        .map(|u| u.flushed)
        .collect();
    assert_eq!(flushes, vec![1000, 1000, 500]);
    assert!(flushes.len() >= 2);

    // Progress counts are monotonically non-decreasing per stream.
    let counts: Vec<u64> = drain(&mut progress)
        .into_iter()
        .filter(|p| p.stream == StreamKind::Vulnerabilities)
        .map(|p| p.count)
        .collect();
    assert_eq!(counts, vec![1000, 2000, 2500]);
    assert!(counts.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn pause_blocks_the_next_batch_until_resume() {
    let gate = Arc::new(Semaphore::new(0));
    let fx = fixture(StubFeed {
        vulnerability_pages: vec![
            vec![json!({"id": "v-1", "name": "first"})],
            vec![json!({"id": "v-2", "name": "second"})],
        ],
        page_gate: Some(Arc::clone(&gate)),
        ..StubFeed::default()
    });

    let mut states = fx.orchestrator.events().subscribe_state();
    let mut progress = fx.orchestrator.events().subscribe_progress();

    let orch = Arc::clone(&fx.orchestrator);
    let session = tokio::spawn(async move { orch.sync(SyncOptions::default()).await });

    // First batch lands.
    let first = progress.recv().await.expect("first progress");
    assert_eq!(first.count, 1);

    fx.orchestrator.pause().await.expect("pause");
    // Release the second page; its batch boundary must now block.
    gate.add_permits(1);

    // The paused transition is observable before any second batch.
    loop {
        let state = states.recv().await.expect("state");
        if state == SyncState::Paused {
            break;
        }
    }
    assert!(progress.try_recv().is_err());
    assert_eq!(fx.orchestrator.current_state(), SyncState::Paused);

    fx.orchestrator.resume().await.expect("resume");
    let outcome = session.await.expect("join").expect("sync");
    assert_eq!(outcome.vulnerabilities.new, 2);

    let mut observed = vec![SyncState::Running, SyncState::Paused];
    observed.extend(drain(&mut states));
    assert_eq!(
        observed,
        vec![
            SyncState::Running,
            SyncState::Paused,
            SyncState::Running,
            SyncState::Idle
        ]
    );
}

#[tokio::test]
async fn stop_rejects_the_session_and_returns_to_idle() {
    let fx = fixture(StubFeed {
        hang_vulnerabilities_until_cancelled: true,
        ..StubFeed::default()
    });

    let orch = Arc::clone(&fx.orchestrator);
    let session = tokio::spawn(async move { orch.sync(SyncOptions::default()).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    fx.orchestrator.stop().await.expect("stop");

    let err = session.await.expect("join").expect_err("session rejects");
    assert!(matches!(err, SyncError::StoppedByUser));

    // The cancellation signal handed to in-flight fetches reports cancelled.
    let tokens = fx.feed.seen_tokens.lock().clone();
    assert!(!tokens.is_empty());
    assert!(tokens.iter().all(|t| t.is_cancelled()));

    let info = fx.orchestrator.sync_state().await;
    assert_eq!(info.state, SyncState::Idle);
    assert!(!info.has_active_session);

    let history = fx.store.get_sync_history(None).await.expect("history");
    let error_row = history
        .iter()
        .find(|e| e.event_type.as_deref() == Some("error"))
        .expect("error event");
    assert!(error_row
        .message
        .as_deref()
        .unwrap_or_default()
        .contains("stopped by user"));
}

#[tokio::test]
async fn stop_is_idempotent_while_the_session_unwinds() {
    let release = Arc::new(Notify::new());
    let fx = fixture(StubFeed {
        hang_vulnerabilities_until: Some(Arc::clone(&release)),
        ..StubFeed::default()
    });

    let orch = Arc::clone(&fx.orchestrator);
    let session = tokio::spawn(async move { orch.sync(SyncOptions::default()).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    fx.orchestrator.stop().await.expect("first stop");
    // The fetch ignores cancellation, so the session is still active.
    fx.orchestrator.stop().await.expect("second stop");

    release.notify_one();
    let err = session.await.expect("join").expect_err("session rejects");
    assert!(matches!(err, SyncError::StoppedByUser));
}

#[tokio::test]
async fn stop_while_paused_aborts_the_waiter() {
    let gate = Arc::new(Semaphore::new(0));
    let fx = fixture(StubFeed {
        vulnerability_pages: vec![
            vec![json!({"id": "v-1"})],
            vec![json!({"id": "v-2"})],
        ],
        page_gate: Some(Arc::clone(&gate)),
        ..StubFeed::default()
    });

    let mut states = fx.orchestrator.events().subscribe_state();
    let orch = Arc::clone(&fx.orchestrator);
    let session = tokio::spawn(async move { orch.sync(SyncOptions::default()).await });

    // Wait for the session to start, pause it, then let page two hit the
    // paused boundary.
    loop {
        if states.recv().await.expect("state") == SyncState::Running {
            break;
        }
    }
    fx.orchestrator.pause().await.expect("pause");
    gate.add_permits(1);
    loop {
        if states.recv().await.expect("state") == SyncState::Paused {
            break;
        }
    }

    fx.orchestrator.stop().await.expect("stop");
    let err = session.await.expect("join").expect_err("session rejects");
    assert!(matches!(err, SyncError::StoppedByUser));
    assert_eq!(fx.orchestrator.current_state(), SyncState::Idle);
}

#[tokio::test]
async fn concurrent_sync_is_rejected() {
    let release = Arc::new(Notify::new());
    let fx = fixture(StubFeed {
        hang_vulnerabilities_until: Some(Arc::clone(&release)),
        ..StubFeed::default()
    });

    let orch = Arc::clone(&fx.orchestrator);
    let session = tokio::spawn(async move { orch.sync(SyncOptions::default()).await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let err = fx
        .orchestrator
        .sync(SyncOptions::default())
        .await
        .expect_err("second session rejected");
    assert!(matches!(err, SyncError::AlreadyInProgress));

    fx.orchestrator.stop().await.expect("stop");
    release.notify_one();
    let _ = session.await.expect("join");
}

#[tokio::test]
async fn all_three_streams_fetch_concurrently() {
    // Every fetch blocks on a three-party barrier before serving pages:
    // serialized fetching would deadlock here.
    let fx = fixture(StubFeed {
        vulnerability_pages: vec![vec![json!({"id": "v-1"})]],
        remediation_pages: vec![vec![json!({"id": "r-1"})]],
        asset_pages: vec![vec![json!({"id": "a-1"})]],
        start_barrier: Some(Arc::new(Barrier::new(3))),
        ..StubFeed::default()
    });

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        fx.orchestrator.sync(SyncOptions::default()),
    )
    .await
    .expect("streams must start in parallel")
    .expect("sync");

    assert_eq!(outcome.vulnerabilities.new, 1);
    assert_eq!(outcome.remediations.new, 1);
    assert_eq!(outcome.assets.new, 1);
}

#[tokio::test]
async fn incremental_sync_filters_only_remediations() {
    let fx = fixture(StubFeed::default());
    fx.store
        .log_sync_event("complete", "Sync completed", None)
        .await
        .expect("seed journal");
    let last = fx
        .store
        .get_last_successful_sync_date()
        .await
        .expect("date")
        .expect("present");

    fx.orchestrator
        .sync(SyncOptions {
            incremental: true,
            ..SyncOptions::default()
        })
        .await
        .expect("sync");

    let seen = fx.feed.seen_filters.lock().clone();
    for (stream, filters) in seen {
        match stream {
            StreamKind::Remediations => {
                assert_eq!(
                    filters,
                    vec![("remediatedAfterDate".to_string(), last.clone())]
                );
            }
            _ => assert!(filters.is_empty()),
        }
    }
}

#[tokio::test]
async fn completed_syncs_land_in_history_with_counters() {
    let fx = fixture(StubFeed {
        vulnerability_pages: vec![vec![json!({"id": "v-1", "name": "only"})]],
        ..StubFeed::default()
    });

    fx.orchestrator
        .sync(SyncOptions::default())
        .await
        .expect("sync");

    let history = fx.store.get_sync_history(None).await.expect("history");
    let summary = history
        .iter()
        .find(|e| e.event_type.is_none())
        .expect("summary row");
    assert_eq!(summary.vulnerabilities_new, Some(1));
    assert_eq!(summary.new_count, Some(1));

    // A follow-up session is accepted once the first returns to idle.
    let fresh = fx
        .orchestrator
        .sync(SyncOptions::default())
        .await
        .expect("second sync");
    assert_eq!(fresh.vulnerabilities.new, 0);
}
