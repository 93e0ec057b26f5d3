//! Status synchronizer
//!
//! Background loop that keeps download records in step with the native
//! session. Each tick first drains alerts until the tick deadline, then
//! refreshes every registered download from live handle counters.

use crate::events::{EngineEvent, EventBus};
use crate::registry::{RegistryState, SessionRegistry, TrackedDownload};
use crate::session::{Alert, AlertKind, AlertReceiver, HandleStatus, NativeState};
use crate::types::DownloadStatus;
use crate::utils::compute_eta;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub struct StatusSynchronizer {
    registry: Arc<SessionRegistry>,
    events: EventBus,
    alerts: AlertReceiver,
    interval: Duration,
}

impl StatusSynchronizer {
    pub fn new(
        registry: Arc<SessionRegistry>,
        events: EventBus,
        alerts: AlertReceiver,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            events,
            alerts,
            interval,
        }
    }

    /// Tick until the token is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        log::info!("Status synchronizer started ({:?} tick)", self.interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.run_once() => {}
            }
        }
        log::info!("Status synchronizer stopped");
    }

    /// One tick: alerts until the deadline, then a full refresh
    pub async fn run_once(&self) {
        let deadline = Instant::now() + self.interval;
        loop {
            match tokio::time::timeout_at(deadline, self.alerts.recv()).await {
                Ok(Ok(alert)) => self.handle_alert(alert).await,
                Ok(Err(_)) => {
                    // Alert stream gone; keep polling at the tick rate
                    tokio::time::sleep_until(deadline).await;
                    break;
                }
                Err(_) => break,
            }
        }
        self.refresh_all().await;
    }

    /// Handle whatever alerts are already queued, then refresh once
    pub async fn process_pending(&self) {
        while let Ok(alert) = self.alerts.try_recv() {
            self.handle_alert(alert).await;
        }
        self.refresh_all().await;
    }

    async fn handle_alert(&self, alert: Alert) {
        let mut state = self.registry.lock().await;
        let Some(hash) = state.hash_for_handle(alert.handle) else {
            log::debug!(
                "Ignoring {:?} alert for unregistered handle {}",
                alert.kind,
                alert.handle
            );
            return;
        };

        match alert.kind {
            AlertKind::MetadataReceived => self.on_metadata(&mut state, &hash),
            AlertKind::Finished => self.on_finished(&mut state, &hash),
            AlertKind::EngineError(message) => {
                if let Some(entry) = state.entry_mut(&hash) {
                    log::warn!("Download {} failed: {}", hash, message);
                    mark_error(entry, message, &self.events);
                }
            }
            AlertKind::Stats => refresh_one(&mut state, &hash, &self.events),
        }
    }

    fn on_metadata(&self, state: &mut RegistryState, hash: &str) {
        let Some((session, entry)) = state.session_and_entry(hash) else {
            return;
        };
        let Some(descriptor) = session.descriptor(entry.handle) else {
            log::debug!("Metadata alert for {} but no descriptor yet", hash);
            return;
        };

        if entry.title_is_placeholder && !descriptor.name.is_empty() {
            entry.record.title = descriptor.name;
            entry.title_is_placeholder = false;
        }
        if descriptor.total_size > 0 {
            entry.record.total_size_bytes = descriptor.total_size;
        }
        log::info!("Metadata received for '{}'", entry.record.title);
        self.events.emit(EngineEvent::Updated(entry.record.clone()));
    }

    fn on_finished(&self, state: &mut RegistryState, hash: &str) {
        let Some(entry) = state.entry_mut(hash) else {
            return;
        };
        let record = &mut entry.record;
        if record.status == DownloadStatus::Error {
            return;
        }

        if record.status != DownloadStatus::Seeding {
            record.status = DownloadStatus::Finished;
        }
        record.progress_percent = 100.0;
        record.eta_seconds = 0.0;
        record.downloaded_bytes = record.downloaded_bytes.max(record.total_size_bytes);
        log::info!("Download completed: {}", record.title);
        report_completion(entry, &self.events);
    }

    async fn refresh_all(&self) {
        let mut state = self.registry.lock().await;
        for hash in state.hashes() {
            refresh_one(&mut state, &hash, &self.events);
        }
    }
}

/// Pull live counters for one download and fold them into its record
fn refresh_one(state: &mut RegistryState, hash: &str, events: &EventBus) {
    let Some((session, entry)) = state.session_and_entry(hash) else {
        return;
    };
    if entry.record.status == DownloadStatus::Error {
        return;
    }

    let native = match session.status(entry.handle) {
        Ok(native) => native,
        Err(e) => {
            log::warn!("Status query for {} failed: {}", hash, e);
            mark_error(entry, e.to_string(), events);
            return;
        }
    };

    apply_status(entry, &native);
    events.emit(EngineEvent::Updated(entry.record.clone()));

    if entry.record.status.is_complete() && !entry.completion_reported {
        log::info!("Download completed: {}", entry.record.title);
        entry.completion_reported = true;
        events.emit(EngineEvent::Completed(entry.record.clone()));
    }
}

fn apply_status(entry: &mut TrackedDownload, native: &HandleStatus) {
    let record = &mut entry.record;
    let previous = record.status;
    let status = reconcile(previous, native);

    let mut progress = (native.progress * 100.0).clamp(0.0, 100.0);
    if status.is_complete() {
        progress = 100.0;
    } else if status.is_transferring() && previous.is_transferring() {
        progress = progress.max(record.progress_percent);
    }

    record.status = status;
    record.progress_percent = progress;
    record.download_rate_bps = native.download_rate;
    record.upload_rate_bps = native.upload_rate;
    record.num_peers = native.num_peers;
    record.num_seeds = native.num_seeds;
    if native.total_wanted > 0 {
        record.total_size_bytes = native.total_wanted;
    }
    record.downloaded_bytes = native.total_wanted_done;
    record.eta_seconds = compute_eta(
        native.total_wanted,
        native.total_wanted_done,
        native.download_rate,
        progress,
    );
}

/// Derive the canonical status from native state and flags.
///
/// `Error` is never overwritten. The paused flag wins over everything else.
/// A completed download only moves between `Finished` and `Seeding`.
/// When the completion flags disagree with the native state the flags win.
pub fn reconcile(current: DownloadStatus, native: &HandleStatus) -> DownloadStatus {
    if current == DownloadStatus::Error {
        return DownloadStatus::Error;
    }
    if native.is_paused {
        return DownloadStatus::Paused;
    }
    if current.is_complete() {
        return if native.is_seeding || native.state == NativeState::Seeding {
            DownloadStatus::Seeding
        } else if native.is_finished || native.state == NativeState::Finished {
            DownloadStatus::Finished
        } else {
            current
        };
    }

    let derived = match &native.state {
        NativeState::CheckingFiles => DownloadStatus::Checking,
        NativeState::DownloadingMetadata => DownloadStatus::Metadata,
        NativeState::Downloading => DownloadStatus::Downloading,
        NativeState::Finished => DownloadStatus::Finished,
        NativeState::Seeding => DownloadStatus::Seeding,
        NativeState::Allocating => DownloadStatus::Allocating,
        NativeState::Unknown(_) if native.is_seeding => DownloadStatus::Seeding,
        NativeState::Unknown(_) if native.is_finished => DownloadStatus::Finished,
        NativeState::Unknown(_) => current,
    };

    if derived == DownloadStatus::Paused {
        derived
    } else if native.is_seeding && derived != DownloadStatus::Seeding {
        DownloadStatus::Seeding
    } else if native.is_finished && !derived.is_complete() {
        DownloadStatus::Finished
    } else {
        derived
    }
}

fn mark_error(entry: &mut TrackedDownload, message: String, events: &EventBus) {
    let record = &mut entry.record;
    record.status = DownloadStatus::Error;
    record.error_message = Some(message.clone());
    record.download_rate_bps = 0;
    record.upload_rate_bps = 0;
    events.emit(EngineEvent::Error {
        info_hash: record.info_hash.clone(),
        message,
    });
}

fn report_completion(entry: &mut TrackedDownload, events: &EventBus) {
    if entry.completion_reported {
        events.emit(EngineEvent::Updated(entry.record.clone()));
        return;
    }
    entry.completion_reported = true;
    events.emit(EngineEvent::Completed(entry.record.clone()));
}
