//! Download engine
//!
//! Public facade over the searcher, the session registry and the status
//! synchronizer. Foreground calls and the background loop share the
//! registry lock; events are emitted while it is held so that every
//! subscriber sees a download's changes in the order they were made.

use crate::error::{Error, Result};
use crate::events::{EngineEvent, EventBus};
use crate::magnet::Magnet;
use crate::registry::{SessionRegistry, TrackedDownload};
use crate::search::{ContentSearcher, SearchConfig};
use crate::session::{AddTorrentParams, AlertReceiver, GoshSession, NativeSession};
use crate::synchronizer::StatusSynchronizer;
use crate::types::{DownloadRecord, DownloadStatus, SearchResult, Settings};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct DownloadEngine {
    registry: Arc<SessionRegistry>,
    events: EventBus,
    searcher: ContentSearcher,
    settings: Settings,
    alerts: Mutex<Option<AlertReceiver>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    native_timeout: Duration,
    shutdown_timeout: Duration,
}

impl DownloadEngine {
    /// Build an engine around an already started native session.
    ///
    /// Creates the save directory if needed. The synchronizer is not running
    /// until [`start`](Self::start) is called.
    pub fn new(session: Box<dyn NativeSession>, settings: Settings) -> Result<Arc<Self>> {
        let download_dir = settings.download_dir();
        if !download_dir.exists() {
            std::fs::create_dir_all(&download_dir)?;
        }

        let alerts = session.take_alerts().unwrap_or_else(|| {
            log::warn!("Native session has no alert stream; relying on polling only");
            let (_, rx) = async_channel::unbounded();
            rx
        });
        let searcher = ContentSearcher::new(SearchConfig::from(&settings))?;

        Ok(Arc::new(Self {
            registry: Arc::new(SessionRegistry::new(session)),
            events: EventBus::new(),
            searcher,
            native_timeout: Duration::from_millis(settings.native_call_timeout_ms),
            shutdown_timeout: Duration::from_millis(settings.shutdown_timeout_ms),
            settings,
            alerts: Mutex::new(Some(alerts)),
            worker: Mutex::new(None),
            cancel: CancellationToken::new(),
        }))
    }

    /// Build an engine backed by gosh-dl
    pub async fn with_native_session(settings: Settings) -> Result<Arc<Self>> {
        let session = GoshSession::new(&settings).await?;
        Self::new(Box::new(session), settings)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Spawn the status synchronizer on the current runtime
    pub fn start(&self) -> Result<()> {
        self.ensure_running()?;
        let Some(synchronizer) = self.synchronizer() else {
            log::warn!("Status synchronizer already started");
            return Ok(());
        };

        let handle = tokio::spawn(synchronizer.run(self.cancel.child_token()));
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Take the synchronizer to drive it by hand instead of calling `start`.
    ///
    /// Only the first call (of this or `start`) gets it.
    pub fn synchronizer(&self) -> Option<StatusSynchronizer> {
        let alerts = self
            .alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        Some(StatusSynchronizer::new(
            self.registry.clone(),
            self.events.clone(),
            alerts,
            Duration::from_millis(self.settings.sync_interval_ms),
        ))
    }

    pub fn subscribe(&self) -> async_channel::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Search the configured index; `None` uses the configured default limit
    pub async fn search(&self, query: &str, limit: Option<usize>) -> Result<Vec<SearchResult>> {
        let limit = limit.unwrap_or_else(|| self.searcher.default_limit());
        self.searcher.search(query, limit).await
    }

    /// Run a search in the background; the outcome arrives as an event
    pub fn spawn_search(&self, query: impl Into<String>, limit: Option<usize>) -> JoinHandle<()> {
        let searcher = self.searcher.clone();
        let events = self.events.clone();
        let query = query.into();
        let limit = limit.unwrap_or_else(|| searcher.default_limit());

        tokio::spawn(async move {
            match searcher.search(&query, limit).await {
                Ok(results) => events.emit(EngineEvent::SearchCompleted(results)),
                Err(e) => {
                    log::warn!("Search for '{}' failed: {}", query, e);
                    events.emit(EngineEvent::SearchError(e.to_string()));
                }
            }
        })
    }

    /// Start downloading a magnet; returns its info-hash.
    ///
    /// Adding a magnet that is already tracked returns the existing hash.
    pub async fn add(&self, magnet_uri: &str, title: Option<&str>) -> Result<String> {
        self.ensure_running()?;
        let magnet = Magnet::parse(magnet_uri)?;
        let info_hash = magnet.info_hash.clone();

        let mut state = self.registry.lock().await;
        if state.contains(&info_hash) {
            log::debug!("{} is already tracked", info_hash);
            return Ok(info_hash);
        }

        let save_dir = self.settings.download_dir();
        let params = AddTorrentParams {
            magnet_uri: magnet.uri.clone(),
            save_dir: save_dir.clone(),
            sparse: self.settings.sparse_allocation,
        };
        let added =
            tokio::time::timeout(self.native_timeout, state.session().add_magnet(params)).await;
        let handle = match added {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => return Err(self.add_failed(&info_hash, native_fault(e))),
            Err(_) => {
                // The abandoned call may still have registered the torrent
                if let Some(orphan) = state.session().find(&info_hash) {
                    log::warn!("Removing {} left behind by a timed-out add", info_hash);
                    let removed = bounded(
                        self.native_timeout,
                        "remove orphaned torrent",
                        state.session().remove(orphan, false),
                    )
                    .await;
                    if let Err(e) = removed {
                        log::warn!("{} may still be running natively: {}", info_hash, e);
                    }
                }
                let err = Error::EngineFault(format!(
                    "add magnet timed out after {:?}",
                    self.native_timeout
                ));
                return Err(self.add_failed(&info_hash, err));
            }
        };

        let caller_title = title.map(str::trim).filter(|t| !t.is_empty());
        let (title, title_is_placeholder) = match (caller_title, magnet.display_name) {
            (Some(title), _) => (title.to_string(), false),
            (None, Some(name)) => (name, true),
            (None, None) => (info_hash.clone(), true),
        };

        let record = DownloadRecord::new(&info_hash, title, magnet.uri, save_dir);
        log::info!("Added download '{}' ({})", record.title, info_hash);
        self.events.emit(EngineEvent::Added(record.clone()));
        state.put(TrackedDownload {
            record,
            handle,
            title_is_placeholder,
            completion_reported: false,
        });

        Ok(info_hash)
    }

    pub async fn pause(&self, info_hash: &str) -> Result<()> {
        self.ensure_running()?;
        let mut state = self.registry.lock().await;
        let (handle, status) = state
            .entry(info_hash)
            .map(|entry| (entry.handle, entry.record.status))
            .ok_or_else(|| Error::NotFound(info_hash.to_string()))?;
        if !status.can_pause() {
            return Err(Error::InvalidTransition {
                action: "pause",
                status,
            });
        }

        bounded(self.native_timeout, "pause", state.session().pause(handle))
            .await
            .map_err(native_fault)?;

        if let Some(entry) = state.entry_mut(info_hash) {
            let record = &mut entry.record;
            record.status = DownloadStatus::Paused;
            record.download_rate_bps = 0;
            record.upload_rate_bps = 0;
            log::info!("Paused '{}'", record.title);
            self.events.emit(EngineEvent::Updated(record.clone()));
        }
        Ok(())
    }

    pub async fn resume(&self, info_hash: &str) -> Result<()> {
        self.ensure_running()?;
        let mut state = self.registry.lock().await;
        let (handle, status) = state
            .entry(info_hash)
            .map(|entry| (entry.handle, entry.record.status))
            .ok_or_else(|| Error::NotFound(info_hash.to_string()))?;
        if !status.can_resume() {
            return Err(Error::InvalidTransition {
                action: "resume",
                status,
            });
        }

        bounded(self.native_timeout, "resume", state.session().resume(handle))
            .await
            .map_err(native_fault)?;

        if let Some(entry) = state.entry_mut(info_hash) {
            let record = &mut entry.record;
            record.status = if record.progress_percent >= 100.0 {
                DownloadStatus::Finished
            } else {
                DownloadStatus::Downloading
            };
            log::info!("Resumed '{}'", record.title);
            self.events.emit(EngineEvent::Updated(record.clone()));
        }
        Ok(())
    }

    /// Stop tracking a download, optionally deleting its payload.
    ///
    /// If the native session refuses, the download stays registered.
    pub async fn remove(&self, info_hash: &str, delete_files: bool) -> Result<()> {
        self.ensure_running()?;
        let mut state = self.registry.lock().await;
        let handle = state
            .entry(info_hash)
            .map(|entry| entry.handle)
            .ok_or_else(|| Error::NotFound(info_hash.to_string()))?;

        let removed = bounded(
            self.native_timeout,
            "remove",
            state.session().remove(handle, delete_files),
        )
        .await;
        if let Err(e) = removed {
            let err = native_fault(e);
            log::error!("Failed to remove {}: {}", info_hash, err);
            self.events.emit(EngineEvent::Error {
                info_hash: info_hash.to_string(),
                message: err.to_string(),
            });
            return Err(err);
        }

        state.delete(info_hash);
        log::info!("Removed {} (delete files: {})", info_hash, delete_files);
        self.events.emit(EngineEvent::Removed(info_hash.to_string()));
        Ok(())
    }

    /// Snapshot of every download, oldest first
    pub async fn list(&self) -> Vec<DownloadRecord> {
        self.registry.snapshot().await
    }

    pub async fn get(&self, info_hash: &str) -> Option<DownloadRecord> {
        self.registry.get(info_hash).await
    }

    /// Stop the synchronizer, persist resume data and release the session.
    ///
    /// Failures are logged; later calls are no-ops.
    pub async fn shutdown(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        log::info!("Shutting down download engine");
        self.cancel.cancel();

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut worker) = worker {
            match tokio::time::timeout(self.shutdown_timeout, &mut worker).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::warn!("Status synchronizer ended abnormally: {}", e),
                Err(_) => {
                    log::warn!("Status synchronizer did not stop in time; aborting it");
                    worker.abort();
                }
            }
        }

        let state = self.registry.lock().await;
        let session = state.session();
        let persist = async {
            if let Err(e) = session.pause_session().await {
                log::warn!("Failed to pause session before shutdown: {}", e);
            }
            session.save_resume_data().await
        };
        match tokio::time::timeout(self.shutdown_timeout, persist).await {
            Ok(Ok(())) => log::debug!("Resume data saved"),
            Ok(Err(e)) => log::warn!("Failed to save resume data: {}", e),
            Err(_) => log::warn!(
                "Saving resume data took longer than {:?}; skipped",
                self.shutdown_timeout
            ),
        }

        if let Err(e) = bounded(self.native_timeout, "shutdown", session.shutdown()).await {
            log::warn!("Native session shutdown failed: {}", e);
        }
        log::info!("Download engine stopped");
    }

    fn add_failed(&self, info_hash: &str, err: Error) -> Error {
        log::error!("Failed to add {}: {}", info_hash, err);
        self.events.emit(EngineEvent::Error {
            info_hash: info_hash.to_string(),
            message: err.to_string(),
        });
        err
    }

    fn ensure_running(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Shutdown)
        } else {
            Ok(())
        }
    }
}

impl Drop for DownloadEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Await a native call, failing it once `limit` has passed
async fn bounded<T, F>(limit: Duration, operation: &str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
        Err(Error::EngineFault(format!(
            "{} timed out after {:?}",
            operation, limit
        )))
    })
}

/// Native failures surface as engine faults, except shutdown
fn native_fault(err: Error) -> Error {
    match err {
        Error::EngineFault(_) | Error::Shutdown => err,
        Error::NotFound(message) | Error::InvalidInput(message) | Error::Network(message) => {
            Error::EngineFault(message)
        }
        other => Error::EngineFault(other.to_string()),
    }
}
