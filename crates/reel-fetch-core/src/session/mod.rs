//! Native session adapter
//!
//! The engine talks to the BitTorrent implementation through the
//! [`NativeSession`] trait only. [`GoshSession`] binds it to gosh-dl;
//! [`InMemorySession`] is a scriptable stand-in for tests and embedding.

mod gosh;
mod memory;

pub use gosh::{settings_to_engine_config, GoshSession};
pub use memory::InMemorySession;

use crate::error::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use uuid::Uuid;

/// Opaque reference to a torrent inside the native session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeHandle(Uuid);

impl NativeHandle {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parameters for submitting a magnet to the native session
#[derive(Debug, Clone)]
pub struct AddTorrentParams {
    pub magnet_uri: String,
    pub save_dir: PathBuf,
    /// Request sparse file allocation; adapters that cannot honour it per
    /// torrent fall back to their session-wide mode
    pub sparse: bool,
}

/// Native torrent state as reported by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeState {
    CheckingFiles,
    DownloadingMetadata,
    Downloading,
    Finished,
    Seeding,
    Allocating,
    /// Anything the adapter cannot classify (queued, connecting, ...)
    Unknown(String),
}

/// Live counters pulled for one handle
#[derive(Debug, Clone, PartialEq)]
pub struct HandleStatus {
    pub state: NativeState,
    /// 0.0 - 1.0
    pub progress: f64,
    pub download_rate: u64,
    pub upload_rate: u64,
    pub num_peers: u32,
    pub num_seeds: u32,
    pub total_wanted: u64,
    pub total_wanted_done: u64,
    pub is_paused: bool,
    pub is_finished: bool,
    pub is_seeding: bool,
}

impl Default for HandleStatus {
    fn default() -> Self {
        Self {
            state: NativeState::DownloadingMetadata,
            progress: 0.0,
            download_rate: 0,
            upload_rate: 0,
            num_peers: 0,
            num_seeds: 0,
            total_wanted: 0,
            total_wanted_done: 0,
            is_paused: false,
            is_finished: false,
            is_seeding: false,
        }
    }
}

/// What the native session knows once metadata has arrived
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentDescriptor {
    pub name: String,
    pub total_size: u64,
}

/// Asynchronous notification from the native session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub handle: NativeHandle,
    pub kind: AlertKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertKind {
    MetadataReceived,
    Finished,
    EngineError(String),
    Stats,
}

pub type AlertReceiver = async_channel::Receiver<Alert>;

/// Adapter interface over one native BitTorrent engine.
///
/// Implementations are owned by the session registry and only ever called
/// while its lock is held.
#[async_trait]
pub trait NativeSession: Send + Sync {
    /// Submit a magnet; returns the handle for the new torrent
    async fn add_magnet(&self, params: AddTorrentParams) -> Result<NativeHandle>;

    async fn pause(&self, handle: NativeHandle) -> Result<()>;

    async fn resume(&self, handle: NativeHandle) -> Result<()>;

    /// Drop the torrent, optionally deleting its payload from disk
    async fn remove(&self, handle: NativeHandle, delete_files: bool) -> Result<()>;

    /// Live counters; an error means the handle is invalid or stale
    fn status(&self, handle: NativeHandle) -> Result<HandleStatus>;

    /// Handle of a torrent already in the session, by lowercase hex info-hash
    fn find(&self, info_hash: &str) -> Option<NativeHandle>;

    /// Torrent descriptor, once metadata is available
    fn descriptor(&self, handle: NativeHandle) -> Option<TorrentDescriptor>;

    /// Take the alert stream. Only the first call returns it.
    fn take_alerts(&self) -> Option<AlertReceiver>;

    /// Stop all transfers ahead of shutdown
    async fn pause_session(&self) -> Result<()>;

    /// Persist resume data, best effort
    async fn save_resume_data(&self) -> Result<()>;

    /// Release the native session
    async fn shutdown(&self) -> Result<()>;
}
