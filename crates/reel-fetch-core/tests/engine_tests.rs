//! Integration tests for the download engine and status synchronizer
//!
//! The in-memory native session plays the BitTorrent engine; each test
//! scripts what it reports and drives the synchronizer by hand.

use reel_fetch_core::session::{AlertKind, NativeState};
use reel_fetch_core::{
    DownloadEngine, DownloadStatus, EngineEvent, Error, InMemorySession, Settings,
    StatusSynchronizer,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::timeout;

const HASH_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const HASH_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

struct Harness {
    _temp_dir: TempDir,
    download_dir: std::path::PathBuf,
    session: InMemorySession,
    engine: Arc<DownloadEngine>,
    sync: StatusSynchronizer,
    events: async_channel::Receiver<EngineEvent>,
}

/// Helper to create an engine over an in-memory session in a temp directory
fn harness() -> Harness {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let download_dir = temp_dir.path().join("media");
    let settings = Settings {
        download_path: download_dir.to_string_lossy().to_string(),
        search_base_url: "http://127.0.0.1:9".to_string(),
        ..Default::default()
    };

    let session = InMemorySession::new();
    let engine = DownloadEngine::new(Box::new(session.clone()), settings).expect("engine");
    let sync = engine.synchronizer().expect("synchronizer");
    let events = engine.subscribe();

    Harness {
        _temp_dir: temp_dir,
        download_dir,
        session,
        engine,
        sync,
        events,
    }
}

fn magnet(hash: &str) -> String {
    format!("magnet:?xt=urn:btih:{}", hash)
}

fn drain(events: &async_channel::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn completed_count(events: &[EngineEvent], hash: &str) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, EngineEvent::Completed(r) if r.info_hash == hash))
        .count()
}

/// Add a magnet and drive it into `Downloading` at the given fraction
async fn add_downloading(h: &Harness, hash: &str, progress: f64) {
    h.engine.add(&magnet(hash), Some("Movie")).await.unwrap();
    h.session.update_status(hash, |s| {
        s.state = NativeState::Downloading;
        s.progress = progress;
    });
    h.sync.process_pending().await;
}

// =============================================================================
// Adding downloads
// =============================================================================

#[tokio::test]
async fn test_add_creates_metadata_record_with_lowercase_hash() {
    let h = harness();
    let uri = format!("magnet:?xt=urn:btih:{}", HASH_A.to_uppercase());

    let hash = h.engine.add(&uri, Some("Inception")).await.unwrap();
    assert_eq!(hash, HASH_A);

    let list = h.engine.list().await;
    assert_eq!(list.len(), 1);
    let record = &list[0];
    assert_eq!(record.title, "Inception");
    assert_eq!(record.status, DownloadStatus::Metadata);
    assert_eq!(record.progress_percent, 0.0);
    assert_eq!(record.save_path, h.download_dir);
    assert!(h.download_dir.is_dir());

    let params = h.session.last_add().unwrap();
    assert!(params.sparse);
    assert_eq!(params.save_dir, h.download_dir);

    let events = drain(&h.events);
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], EngineEvent::Added(r) if r.info_hash == HASH_A));
}

#[tokio::test]
async fn test_duplicate_add_returns_existing_hash() {
    let h = harness();
    let first = h.engine.add(&magnet(HASH_A), Some("Inception")).await.unwrap();
    let second = h.engine.add(&magnet(HASH_A), Some("Other")).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(h.engine.list().await.len(), 1);
    assert_eq!(h.session.torrent_count(), 1);
    assert_eq!(h.engine.get(HASH_A).await.unwrap().title, "Inception");
    assert_eq!(drain(&h.events).len(), 1);
}

#[tokio::test]
async fn test_non_magnet_is_unsupported() {
    let h = harness();
    let err = h
        .engine
        .add("https://example.com/movie.torrent", None)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UnsupportedSource(_)));
    assert!(h.engine.list().await.is_empty());
    assert_eq!(h.session.torrent_count(), 0);
    assert!(drain(&h.events).is_empty());
}

#[tokio::test]
async fn test_magnet_without_info_hash_is_invalid() {
    let h = harness();
    let err = h
        .engine
        .add("magnet:?dn=Nothing&tr=udp%3A%2F%2Ftracker", None)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidMagnet(_)));
    assert!(h.engine.list().await.is_empty());
    assert!(drain(&h.events).is_empty());
}

#[tokio::test]
async fn test_native_fault_on_add_emits_error_for_hash() {
    let h = harness();
    h.session.fail_next_add("disk full");

    let err = h.engine.add(&magnet(HASH_A), None).await.unwrap_err();
    assert!(matches!(err, Error::EngineFault(msg) if msg == "disk full"));
    assert!(h.engine.list().await.is_empty());

    let events = drain(&h.events);
    assert_eq!(events.len(), 1);
    match &events[0] {
        EngineEvent::Error { info_hash, message } => {
            assert_eq!(info_hash, HASH_A);
            assert!(message.contains("disk full"));
        }
        other => panic!("expected Error event, got {:?}", other),
    }
}

#[tokio::test]
async fn test_timed_out_add_removes_the_native_torrent() {
    let temp_dir = TempDir::new().unwrap();
    let settings = Settings {
        download_path: temp_dir.path().to_string_lossy().to_string(),
        native_call_timeout_ms: 50,
        ..Default::default()
    };
    let session = InMemorySession::new();
    let engine = DownloadEngine::new(Box::new(session.clone()), settings).unwrap();
    let events = engine.subscribe();

    session.stall_next_add(Duration::from_secs(5));
    let err = engine.add(&magnet(HASH_A), None).await.unwrap_err();
    assert!(matches!(err, Error::EngineFault(msg) if msg.contains("timed out")));

    assert!(engine.list().await.is_empty());
    assert_eq!(session.torrent_count(), 0);
    assert_eq!(session.removed(), vec![(HASH_A.to_string(), false)]);
    assert!(matches!(
        &drain(&events)[..],
        [EngineEvent::Error { info_hash, .. }] if info_hash == HASH_A
    ));

    // A retry goes through normally
    assert_eq!(engine.add(&magnet(HASH_A), None).await.unwrap(), HASH_A);
}

#[tokio::test]
async fn test_placeholder_title_comes_from_display_name() {
    let h = harness();
    let uri = format!("{}&dn=Some.Movie.2010", magnet(HASH_A));
    h.engine.add(&uri, None).await.unwrap();
    assert_eq!(h.engine.get(HASH_A).await.unwrap().title, "Some.Movie.2010");

    h.engine.add(&magnet(HASH_B), Some("  ")).await.unwrap();
    assert_eq!(h.engine.get(HASH_B).await.unwrap().title, HASH_B);
}

// =============================================================================
// Pause / resume
// =============================================================================

#[tokio::test]
async fn test_pause_from_metadata_is_invalid() {
    let h = harness();
    h.engine.add(&magnet(HASH_A), None).await.unwrap();
    drain(&h.events);

    let err = h.engine.pause(HASH_A).await.unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidTransition {
            action: "pause",
            status: DownloadStatus::Metadata
        }
    ));
    assert!(drain(&h.events).is_empty());
}

#[tokio::test]
async fn test_pause_is_not_idempotent_and_resume_restores_downloading() {
    let h = harness();
    add_downloading(&h, HASH_A, 0.4).await;
    assert_eq!(h.engine.get(HASH_A).await.unwrap().status, DownloadStatus::Downloading);
    drain(&h.events);

    h.engine.pause(HASH_A).await.unwrap();
    assert_eq!(h.engine.get(HASH_A).await.unwrap().status, DownloadStatus::Paused);
    let events = drain(&h.events);
    assert!(matches!(&events[..], [EngineEvent::Updated(r)] if r.status == DownloadStatus::Paused));

    let err = h.engine.pause(HASH_A).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { action: "pause", .. }));
    assert_eq!(h.engine.get(HASH_A).await.unwrap().status, DownloadStatus::Paused);
    assert!(drain(&h.events).is_empty());

    // The native session reports paused too, so a refresh keeps it paused
    h.sync.process_pending().await;
    assert_eq!(h.engine.get(HASH_A).await.unwrap().status, DownloadStatus::Paused);

    h.engine.resume(HASH_A).await.unwrap();
    assert_eq!(h.engine.get(HASH_A).await.unwrap().status, DownloadStatus::Downloading);
    let err = h.engine.resume(HASH_A).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { action: "resume", .. }));
}

#[tokio::test]
async fn test_paused_complete_download_resumes_as_finished() {
    let h = harness();
    h.engine.add(&magnet(HASH_A), None).await.unwrap();
    h.session.update_status(HASH_A, |s| {
        s.state = NativeState::Seeding;
        s.progress = 1.0;
        s.is_finished = true;
        s.is_seeding = true;
    });
    h.sync.process_pending().await;
    assert_eq!(h.engine.get(HASH_A).await.unwrap().status, DownloadStatus::Seeding);

    h.engine.pause(HASH_A).await.unwrap();
    h.engine.resume(HASH_A).await.unwrap();
    assert_eq!(h.engine.get(HASH_A).await.unwrap().status, DownloadStatus::Finished);

    h.sync.process_pending().await;
    assert_eq!(h.engine.get(HASH_A).await.unwrap().status, DownloadStatus::Seeding);
    assert_eq!(completed_count(&drain(&h.events), HASH_A), 1);
}

#[tokio::test]
async fn test_unknown_hash_is_not_found() {
    let h = harness();
    assert!(matches!(h.engine.pause(HASH_A).await, Err(Error::NotFound(_))));
    assert!(matches!(h.engine.resume(HASH_A).await, Err(Error::NotFound(_))));
    assert!(matches!(h.engine.remove(HASH_A, false).await, Err(Error::NotFound(_))));
    assert!(h.engine.get(HASH_A).await.is_none());
}

// =============================================================================
// Synchronizer
// =============================================================================

#[tokio::test]
async fn test_finished_flag_forces_finished_with_one_completed_event() {
    let h = harness();
    add_downloading(&h, HASH_A, 0.7).await;
    assert_eq!(h.engine.get(HASH_A).await.unwrap().progress_percent, 70.0);

    // Native state lags behind the finished flag
    h.session.update_status(HASH_A, |s| s.is_finished = true);
    h.sync.process_pending().await;

    let record = h.engine.get(HASH_A).await.unwrap();
    assert_eq!(record.status, DownloadStatus::Finished);
    assert_eq!(record.progress_percent, 100.0);
    assert_eq!(record.eta_seconds, 0.0);

    // Neither another refresh nor a late finished alert repeats the event
    h.sync.process_pending().await;
    let handle = h.session.handle_for(HASH_A).unwrap();
    h.session.push_alert(handle, AlertKind::Finished);
    h.sync.process_pending().await;

    assert_eq!(completed_count(&drain(&h.events), HASH_A), 1);
}

#[tokio::test]
async fn test_finished_alert_completes_download() {
    let h = harness();
    add_downloading(&h, HASH_A, 0.9).await;
    drain(&h.events);

    let handle = h.session.handle_for(HASH_A).unwrap();
    h.session.push_alert(handle, AlertKind::Finished);
    h.session.update_status(HASH_A, |s| {
        s.state = NativeState::Finished;
        s.progress = 1.0;
        s.is_finished = true;
    });
    h.sync.process_pending().await;

    let events = drain(&h.events);
    assert!(matches!(&events[0], EngineEvent::Completed(r) if r.status == DownloadStatus::Finished));
    assert_eq!(completed_count(&events, HASH_A), 1);
}

#[tokio::test]
async fn test_progress_never_goes_backwards_while_downloading() {
    let h = harness();
    add_downloading(&h, HASH_A, 0.5).await;

    h.session.update_status(HASH_A, |s| s.progress = 0.3);
    h.sync.process_pending().await;
    assert_eq!(h.engine.get(HASH_A).await.unwrap().progress_percent, 50.0);

    h.session.update_status(HASH_A, |s| s.progress = 0.6);
    h.sync.process_pending().await;
    assert_eq!(h.engine.get(HASH_A).await.unwrap().progress_percent, 60.0);
}

#[tokio::test]
async fn test_progress_never_goes_backwards_while_checking() {
    let h = harness();
    h.engine.add(&magnet(HASH_A), None).await.unwrap();
    h.session.update_status(HASH_A, |s| {
        s.state = NativeState::CheckingFiles;
        s.progress = 0.5;
    });
    h.sync.process_pending().await;
    assert_eq!(h.engine.get(HASH_A).await.unwrap().progress_percent, 50.0);

    h.session.update_status(HASH_A, |s| s.progress = 0.3);
    h.sync.process_pending().await;
    let record = h.engine.get(HASH_A).await.unwrap();
    assert_eq!(record.status, DownloadStatus::Checking);
    assert_eq!(record.progress_percent, 50.0);

    // Checking into Allocating keeps the high-water mark too
    h.session.update_status(HASH_A, |s| {
        s.state = NativeState::Allocating;
        s.progress = 0.1;
    });
    h.sync.process_pending().await;
    let record = h.engine.get(HASH_A).await.unwrap();
    assert_eq!(record.status, DownloadStatus::Allocating);
    assert_eq!(record.progress_percent, 50.0);
}

#[tokio::test]
async fn test_finished_alert_survives_lagging_native_status() {
    let h = harness();
    add_downloading(&h, HASH_A, 0.9).await;
    drain(&h.events);

    // Native counters still report an unfinished download
    let handle = h.session.handle_for(HASH_A).unwrap();
    h.session.push_alert(handle, AlertKind::Finished);
    h.sync.process_pending().await;

    let record = h.engine.get(HASH_A).await.unwrap();
    assert_eq!(record.status, DownloadStatus::Finished);
    assert_eq!(record.progress_percent, 100.0);

    let events = drain(&h.events);
    assert_eq!(completed_count(&events, HASH_A), 1);
    assert!(events.iter().all(|e| match e {
        EngineEvent::Updated(r) | EngineEvent::Completed(r) => {
            r.status == DownloadStatus::Finished && r.progress_percent == 100.0
        }
        _ => true,
    }));

    // Seeding is still reachable afterwards
    h.session.update_status(HASH_A, |s| {
        s.state = NativeState::Seeding;
        s.is_seeding = true;
    });
    h.sync.process_pending().await;
    assert_eq!(h.engine.get(HASH_A).await.unwrap().status, DownloadStatus::Seeding);
    assert_eq!(completed_count(&drain(&h.events), HASH_A), 0);
}

#[tokio::test]
async fn test_eta_follows_rate_and_completion() {
    let h = harness();
    add_downloading(&h, HASH_A, 0.2).await;
    assert!(h.engine.get(HASH_A).await.unwrap().eta_seconds.is_infinite());

    h.session.update_status(HASH_A, |s| {
        s.download_rate = 100;
        s.total_wanted = 1_000;
        s.total_wanted_done = 200;
    });
    h.sync.process_pending().await;
    let record = h.engine.get(HASH_A).await.unwrap();
    assert_eq!(record.eta_seconds, 8.0);
    assert_eq!(record.total_size_bytes, 1_000);
    assert_eq!(record.downloaded_bytes, 200);
    assert_eq!(record.download_rate_bps, 100);

    h.session.update_status(HASH_A, |s| {
        s.state = NativeState::Finished;
        s.progress = 1.0;
        s.download_rate = 0;
        s.total_wanted_done = 1_000;
    });
    h.sync.process_pending().await;
    assert_eq!(h.engine.get(HASH_A).await.unwrap().eta_seconds, 0.0);
}

#[tokio::test]
async fn test_metadata_alert_replaces_placeholder_title_only() {
    let h = harness();
    h.engine.add(&magnet(HASH_A), None).await.unwrap();
    h.engine.add(&magnet(HASH_B), Some("Inception")).await.unwrap();

    for (hash, name) in [(HASH_A, "Real.Name.2019"), (HASH_B, "Inception.2010.1080p")] {
        h.session.set_metadata(hash, name, 4_096);
        let handle = h.session.handle_for(hash).unwrap();
        h.session.push_alert(handle, AlertKind::MetadataReceived);
    }
    h.sync.process_pending().await;

    let a = h.engine.get(HASH_A).await.unwrap();
    assert_eq!(a.title, "Real.Name.2019");
    assert_eq!(a.total_size_bytes, 4_096);

    let b = h.engine.get(HASH_B).await.unwrap();
    assert_eq!(b.title, "Inception");
    assert_eq!(b.total_size_bytes, 4_096);
}

#[tokio::test]
async fn test_engine_error_alert_is_terminal() {
    let h = harness();
    add_downloading(&h, HASH_A, 0.1).await;
    drain(&h.events);

    let handle = h.session.handle_for(HASH_A).unwrap();
    h.session.push_alert(handle, AlertKind::EngineError("tracker refused".into()));
    h.sync.process_pending().await;

    let record = h.engine.get(HASH_A).await.unwrap();
    assert_eq!(record.status, DownloadStatus::Error);
    assert_eq!(record.error_message.as_deref(), Some("tracker refused"));
    let events = drain(&h.events);
    assert!(matches!(
        &events[..],
        [EngineEvent::Error { info_hash, message }] if info_hash == HASH_A && message == "tracker refused"
    ));

    // Even a seeding report does not revive it, and it cannot be resumed
    h.session.update_status(HASH_A, |s| {
        s.state = NativeState::Seeding;
        s.is_seeding = true;
    });
    h.sync.process_pending().await;
    assert_eq!(h.engine.get(HASH_A).await.unwrap().status, DownloadStatus::Error);
    assert!(drain(&h.events).is_empty());
    assert!(matches!(
        h.engine.resume(HASH_A).await,
        Err(Error::InvalidTransition { action: "resume", status: DownloadStatus::Error })
    ));
}

#[tokio::test]
async fn test_invalid_handle_only_fails_its_download() {
    let h = harness();
    add_downloading(&h, HASH_A, 0.2).await;
    add_downloading(&h, HASH_B, 0.2).await;
    drain(&h.events);

    h.session.invalidate(HASH_A);
    h.session.update_status(HASH_B, |s| s.progress = 0.4);
    h.sync.process_pending().await;

    let a = h.engine.get(HASH_A).await.unwrap();
    assert_eq!(a.status, DownloadStatus::Error);
    assert!(a.error_message.unwrap().contains("invalid torrent handle"));

    let b = h.engine.get(HASH_B).await.unwrap();
    assert_eq!(b.status, DownloadStatus::Downloading);
    assert_eq!(b.progress_percent, 40.0);

    let events = drain(&h.events);
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::Error { info_hash, .. } if info_hash == HASH_A)));
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::Updated(r) if r.info_hash == HASH_B)));
}

// =============================================================================
// Removal
// =============================================================================

#[tokio::test]
async fn test_remove_detaches_and_ignores_stale_alerts() {
    let h = harness();
    add_downloading(&h, HASH_A, 0.3).await;
    let handle = h.session.handle_for(HASH_A).unwrap();
    drain(&h.events);

    h.engine.remove(HASH_A, true).await.unwrap();
    assert_eq!(h.session.removed(), vec![(HASH_A.to_string(), true)]);
    let events = drain(&h.events);
    assert!(matches!(&events[..], [EngineEvent::Removed(hash)] if hash == HASH_A));

    // Alerts queued for the old handle must not resurrect the record
    h.session.push_alert(handle, AlertKind::Stats);
    h.session.push_alert(handle, AlertKind::Finished);
    h.sync.process_pending().await;

    assert!(h.engine.get(HASH_A).await.is_none());
    assert!(h.engine.list().await.is_empty());
    assert!(drain(&h.events).is_empty());
}

#[tokio::test]
async fn test_native_fault_on_remove_keeps_download() {
    let h = harness();
    h.engine.add(&magnet(HASH_A), None).await.unwrap();
    drain(&h.events);
    h.session.fail_next_remove("file busy");

    let err = h.engine.remove(HASH_A, false).await.unwrap_err();
    assert!(matches!(err, Error::EngineFault(msg) if msg == "file busy"));
    assert!(h.engine.get(HASH_A).await.is_some());

    let events = drain(&h.events);
    assert!(matches!(
        &events[..],
        [EngineEvent::Error { info_hash, .. }] if info_hash == HASH_A
    ));

    // A second attempt goes through
    h.engine.remove(HASH_A, false).await.unwrap();
    assert!(h.engine.list().await.is_empty());
}

// =============================================================================
// Background loop and shutdown
// =============================================================================

#[tokio::test]
async fn test_background_loop_publishes_updates() {
    let temp_dir = TempDir::new().unwrap();
    let settings = Settings {
        download_path: temp_dir.path().to_string_lossy().to_string(),
        sync_interval_ms: 50,
        ..Default::default()
    };
    let session = InMemorySession::new();
    let engine = DownloadEngine::new(Box::new(session.clone()), settings).unwrap();
    let events = engine.subscribe();
    engine.start().unwrap();
    assert!(engine.synchronizer().is_none());

    engine.add(&magnet(HASH_A), None).await.unwrap();
    session.update_status(HASH_A, |s| {
        s.state = NativeState::Downloading;
        s.progress = 0.25;
    });

    let update = timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(EngineEvent::Updated(r)) if r.status == DownloadStatus::Downloading => {
                    return Some(r)
                }
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    })
    .await
    .expect("timed out waiting for an update")
    .expect("event stream closed");
    assert_eq!(update.progress_percent, 25.0);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_pauses_persists_and_releases() {
    let h = harness();
    h.engine.add(&magnet(HASH_A), None).await.unwrap();

    h.engine.shutdown().await;
    assert!(h.session.session_paused());
    assert!(h.session.resume_data_saved());
    assert!(h.session.is_shut_down());

    assert!(matches!(
        h.engine.add(&magnet(HASH_B), None).await,
        Err(Error::Shutdown)
    ));
    assert!(matches!(h.engine.pause(HASH_A).await, Err(Error::Shutdown)));

    // Second shutdown is a no-op
    h.engine.shutdown().await;
}
