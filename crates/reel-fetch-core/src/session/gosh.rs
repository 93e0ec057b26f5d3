//! gosh-dl binding
//!
//! This module adapts the gosh-dl download engine to the native session
//! interface: engine events become alerts, engine status becomes handle
//! counters.

use super::{
    AddTorrentParams, Alert, AlertKind, AlertReceiver, HandleStatus, NativeHandle, NativeSession,
    NativeState, TorrentDescriptor,
};
use crate::error::{Error, Result};
use crate::types::Settings;
use crate::utils::calculate_progress;
use async_trait::async_trait;
use gosh_dl::{
    AllocationMode, DownloadEngine, DownloadEvent, DownloadId, DownloadOptions,
    DownloadState as EngineState, DownloadStatus, EngineConfig,
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// [`NativeSession`] backed by a gosh-dl engine
pub struct GoshSession {
    engine: Arc<DownloadEngine>,
    alerts: Mutex<Option<AlertReceiver>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
    sparse: bool,
    persists_resume_data: bool,
}

impl GoshSession {
    /// Start a gosh-dl engine configured from the given settings
    pub async fn new(settings: &Settings) -> Result<Self> {
        let config = settings_to_engine_config(settings)?;
        let sparse = config.torrent.allocation_mode == AllocationMode::Sparse;
        let persists_resume_data = config.database_path.is_some();
        let engine = DownloadEngine::new(config).await?;

        let (alert_tx, alert_rx) = async_channel::unbounded();
        let events = engine.subscribe();
        let forwarder = tokio::spawn(forward_events(engine.clone(), events, alert_tx));

        log::info!(
            "Native session ready (ports {}-{}, sparse allocation: {})",
            settings.listen_port_start,
            settings.listen_port_end,
            sparse
        );

        Ok(Self {
            engine,
            alerts: Mutex::new(Some(alert_rx)),
            forwarder: Mutex::new(Some(forwarder)),
            sparse,
            persists_resume_data,
        })
    }

    fn id(handle: NativeHandle) -> DownloadId {
        DownloadId::from_uuid(*handle.as_uuid())
    }

    fn engine_status(&self, handle: NativeHandle) -> Result<DownloadStatus> {
        self.engine
            .status(Self::id(handle))
            .ok_or_else(|| Error::EngineFault(format!("invalid torrent handle {}", handle)))
    }
}

#[async_trait]
impl NativeSession for GoshSession {
    async fn add_magnet(&self, params: AddTorrentParams) -> Result<NativeHandle> {
        if params.sparse != self.sparse {
            log::debug!(
                "Per-torrent allocation mode is not supported by gosh-dl; using the session mode"
            );
        }

        let options = DownloadOptions {
            save_dir: Some(params.save_dir),
            ..Default::default()
        };
        let id = self.engine.add_magnet(&params.magnet_uri, options).await?;
        Ok(NativeHandle::new(*id.as_uuid()))
    }

    async fn pause(&self, handle: NativeHandle) -> Result<()> {
        self.engine.pause(Self::id(handle)).await?;
        Ok(())
    }

    async fn resume(&self, handle: NativeHandle) -> Result<()> {
        self.engine.resume(Self::id(handle)).await?;
        Ok(())
    }

    async fn remove(&self, handle: NativeHandle, delete_files: bool) -> Result<()> {
        self.engine.cancel(Self::id(handle), delete_files).await?;
        Ok(())
    }

    fn status(&self, handle: NativeHandle) -> Result<HandleStatus> {
        convert_status(&self.engine_status(handle)?)
    }

    fn find(&self, info_hash: &str) -> Option<NativeHandle> {
        self.engine
            .list()
            .into_iter()
            .find(|status| {
                status
                    .metadata
                    .info_hash
                    .as_deref()
                    .is_some_and(|hash| hash.eq_ignore_ascii_case(info_hash))
            })
            .map(|status| NativeHandle::new(*status.id.as_uuid()))
    }

    fn descriptor(&self, handle: NativeHandle) -> Option<TorrentDescriptor> {
        let status = self.engine.status(Self::id(handle))?;
        let info = status.torrent_info.as_ref()?;
        let total_size = status
            .progress
            .total_size
            .unwrap_or_else(|| info.files.iter().map(|f| f.size).sum());

        Some(TorrentDescriptor {
            name: status.metadata.name.clone(),
            total_size,
        })
    }

    fn take_alerts(&self) -> Option<AlertReceiver> {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    async fn pause_session(&self) -> Result<()> {
        for status in self.engine.active() {
            if let Err(e) = self.engine.pause(status.id).await {
                log::warn!("Failed to pause {} before shutdown: {}", status.id, e);
            }
        }
        Ok(())
    }

    async fn save_resume_data(&self) -> Result<()> {
        // gosh-dl writes its state to the session database as it changes
        if !self.persists_resume_data {
            log::debug!("No resume data database configured; nothing to persist");
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        let result = self.engine.shutdown().await;
        if let Some(forwarder) = self
            .forwarder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            forwarder.abort();
        }
        result.map_err(Error::from)
    }
}

/// Translate engine events into alerts until either side goes away
async fn forward_events(
    engine: Arc<DownloadEngine>,
    mut events: broadcast::Receiver<DownloadEvent>,
    alerts: async_channel::Sender<Alert>,
) {
    let mut with_metadata: HashSet<DownloadId> = HashSet::new();

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!("Native event stream lagged, {} events skipped", skipped);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        for alert in translate_event(&engine, &mut with_metadata, event) {
            if alerts.send(alert).await.is_err() {
                return;
            }
        }
    }
}

fn translate_event(
    engine: &DownloadEngine,
    with_metadata: &mut HashSet<DownloadId>,
    event: DownloadEvent,
) -> Vec<Alert> {
    let alert = |id: DownloadId, kind: AlertKind| Alert {
        handle: NativeHandle::new(*id.as_uuid()),
        kind,
    };

    match event {
        DownloadEvent::Completed { id } => vec![alert(id, AlertKind::Finished)],
        DownloadEvent::Failed { id, error, .. } => vec![alert(id, AlertKind::EngineError(error))],
        DownloadEvent::Started { id }
        | DownloadEvent::Progress { id, .. }
        | DownloadEvent::StateChanged { id, .. }
        | DownloadEvent::Paused { id }
        | DownloadEvent::Resumed { id } => {
            let mut out = Vec::with_capacity(2);
            let metadata_ready = engine
                .status(id)
                .is_some_and(|status| status.torrent_info.is_some());
            if metadata_ready && with_metadata.insert(id) {
                out.push(alert(id, AlertKind::MetadataReceived));
            }
            out.push(alert(id, AlertKind::Stats));
            out
        }
        DownloadEvent::Removed { id } => {
            with_metadata.remove(&id);
            Vec::new()
        }
        DownloadEvent::Added { .. } => Vec::new(),
    }
}

/// Convert gosh-dl status to handle counters
fn convert_status(status: &DownloadStatus) -> Result<HandleStatus> {
    let has_metadata = status.torrent_info.is_some();
    let transfer_state = if has_metadata {
        NativeState::Downloading
    } else {
        NativeState::DownloadingMetadata
    };

    let (state, is_paused, is_finished, is_seeding) = match &status.state {
        EngineState::Error { message, .. } => return Err(Error::EngineFault(message.clone())),
        EngineState::Queued if has_metadata => {
            (NativeState::Unknown("queued".to_string()), false, false, false)
        }
        EngineState::Queued | EngineState::Connecting | EngineState::Downloading => {
            (transfer_state, false, false, false)
        }
        EngineState::Paused => (NativeState::Unknown("paused".to_string()), true, false, false),
        EngineState::Seeding => (NativeState::Seeding, false, true, true),
        EngineState::Completed => (NativeState::Finished, false, true, false),
    };

    let progress = &status.progress;
    let total_wanted = progress.total_size.unwrap_or(0);
    let fraction = if is_finished {
        1.0
    } else {
        calculate_progress(progress.completed_size, total_wanted)
    };

    Ok(HandleStatus {
        state,
        progress: fraction,
        download_rate: progress.download_speed,
        upload_rate: progress.upload_speed,
        num_peers: progress.peers,
        num_seeds: progress.seeders,
        total_wanted,
        total_wanted_done: progress.completed_size,
        is_paused,
        is_finished,
        is_seeding,
    })
}

/// Convert settings to engine configuration
pub fn settings_to_engine_config(settings: &Settings) -> Result<EngineConfig> {
    let download_dir = settings.download_dir();

    // Ensure download directory exists
    if !download_dir.exists() {
        std::fs::create_dir_all(&download_dir)?;
    }

    let database_path = settings.resume_data_path.as_ref().map(PathBuf::from);
    if let Some(parent) = database_path.as_ref().and_then(|p| p.parent()) {
        if let Err(e) = std::fs::create_dir_all(parent) {
            log::warn!("Failed to create resume data directory {:?}: {}", parent, e);
        }
    }

    let mut config = EngineConfig {
        download_dir,
        user_agent: settings.user_agent.clone(),
        enable_dht: settings.bt_enable_dht,
        enable_pex: settings.bt_enable_pex,
        enable_lpd: settings.bt_enable_lpd,
        max_peers: settings.bt_max_peers as usize,
        seed_ratio: settings.bt_seed_ratio,
        database_path,
        ..Default::default()
    };
    config.torrent.listen_port_range = (settings.listen_port_start, settings.listen_port_end);
    config.torrent.allocation_mode = if settings.sparse_allocation {
        AllocationMode::Sparse
    } else {
        AllocationMode::None
    };

    Ok(config)
}
