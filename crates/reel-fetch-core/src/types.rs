//! Types module - data structures for Reel-Fetch
//!
//! These types define the data models shared by the engine, the searcher and
//! whatever frontend consumes the event stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Canonical lifecycle status of a download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    /// Waiting for the torrent descriptor from peers
    #[default]
    Metadata,
    Checking,
    Allocating,
    Downloading,
    Paused,
    Finished,
    Seeding,
    /// Terminal until the download is removed and re-added
    Error,
}

impl DownloadStatus {
    /// Statuses from which a download may be paused
    pub fn can_pause(self) -> bool {
        matches!(
            self,
            DownloadStatus::Downloading | DownloadStatus::Finished | DownloadStatus::Seeding
        )
    }

    /// Statuses from which a download may be resumed
    pub fn can_resume(self) -> bool {
        self == DownloadStatus::Paused
    }

    /// Payload fully present on disk
    pub fn is_complete(self) -> bool {
        matches!(self, DownloadStatus::Finished | DownloadStatus::Seeding)
    }

    /// Statuses during which progress may only grow
    pub(crate) fn is_transferring(self) -> bool {
        matches!(
            self,
            DownloadStatus::Downloading | DownloadStatus::Checking | DownloadStatus::Allocating
        )
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DownloadStatus::Metadata => write!(f, "metadata"),
            DownloadStatus::Checking => write!(f, "checking"),
            DownloadStatus::Allocating => write!(f, "allocating"),
            DownloadStatus::Downloading => write!(f, "downloading"),
            DownloadStatus::Paused => write!(f, "paused"),
            DownloadStatus::Finished => write!(f, "finished"),
            DownloadStatus::Seeding => write!(f, "seeding"),
            DownloadStatus::Error => write!(f, "error"),
        }
    }
}

/// Download record, keyed by info-hash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRecord {
    /// 40-character lowercase hex info-hash
    pub info_hash: String,
    pub title: String,
    pub status: DownloadStatus,
    /// 0.0 - 100.0
    pub progress_percent: f64,
    pub download_rate_bps: u64,
    pub upload_rate_bps: u64,
    pub num_peers: u32,
    pub num_seeds: u32,
    pub total_size_bytes: u64,
    pub downloaded_bytes: u64,
    /// Infinite while stalled and incomplete
    pub eta_seconds: f64,
    pub added_at: DateTime<Utc>,
    pub magnet_uri: String,
    pub save_path: PathBuf,
    pub error_message: Option<String>,
}

impl DownloadRecord {
    /// Fresh record for a magnet the native session just accepted
    pub fn new(
        info_hash: impl Into<String>,
        title: impl Into<String>,
        magnet_uri: impl Into<String>,
        save_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            info_hash: info_hash.into(),
            title: title.into(),
            status: DownloadStatus::Metadata,
            progress_percent: 0.0,
            download_rate_bps: 0,
            upload_rate_bps: 0,
            num_peers: 0,
            num_seeds: 0,
            total_size_bytes: 0,
            downloaded_bytes: 0,
            eta_seconds: f64::INFINITY,
            added_at: Utc::now(),
            magnet_uri: magnet_uri.into(),
            save_path: save_path.into(),
            error_message: None,
        }
    }
}

/// A single usable row of a torrent-index search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub year: Option<u16>,
    /// Quality label such as "1080p", when the title carries one
    pub quality: Option<String>,
    /// Human readable size as printed by the source, e.g. "1.4 GB"
    pub size: String,
    pub seeders: u32,
    pub peers: u32,
    pub magnet_uri: String,
    pub info_hash: String,
    /// Tag naming the index the result came from
    pub source: String,
    pub rating: Option<f32>,
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub download_path: String,
    pub search_base_url: String,
    pub search_source_name: String,
    pub search_limit: usize,
    pub search_timeout_ms: u64,
    pub detail_timeout_ms: u64,
    pub request_delay_ms: u64,
    pub user_agent: String,
    pub sync_interval_ms: u64,
    pub native_call_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub sparse_allocation: bool,
    pub listen_port_start: u16,
    pub listen_port_end: u16,
    pub bt_enable_dht: bool,
    pub bt_enable_pex: bool,
    pub bt_enable_lpd: bool,
    pub bt_max_peers: u32,
    pub bt_seed_ratio: f64,
    /// Where the native session keeps its resume data, if anywhere
    pub resume_data_path: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        let download_path = dirs::download_dir()
            .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join("Downloads"))
            .join("ReelFetch")
            .to_string_lossy()
            .to_string();

        Self {
            download_path,
            search_base_url: "https://1337x.to".to_string(),
            search_source_name: "1337x".to_string(),
            search_limit: 10,
            search_timeout_ms: 15_000,
            detail_timeout_ms: 10_000,
            request_delay_ms: 100,
            user_agent: "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0"
                .to_string(),
            sync_interval_ms: 1_000,
            native_call_timeout_ms: 20_000,
            shutdown_timeout_ms: 3_000,
            sparse_allocation: true,
            listen_port_start: 6881,
            listen_port_end: 6891,
            bt_enable_dht: true,
            bt_enable_pex: true,
            bt_enable_lpd: true,
            bt_max_peers: 55,
            bt_seed_ratio: 1.0,
            resume_data_path: None,
        }
    }
}

impl Settings {
    /// Load settings from a JSON file, falling back to defaults when it is missing
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("No settings file at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let mut settings: Settings = serde_json::from_str(&text)?;
        settings.download_path = expand_home(&settings.download_path);
        Ok(settings)
    }

    /// Write settings as pretty JSON, creating the parent directory
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Default location of the settings file
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("reel-fetch")
            .join("settings.json")
    }

    pub fn download_dir(&self) -> PathBuf {
        PathBuf::from(&self.download_path)
    }
}

/// Expand a leading `~` to the home directory
fn expand_home(value: &str) -> String {
    if let Some(rest) = value.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).to_string_lossy().to_string();
        }
    } else if value == "~" {
        if let Some(home) = dirs::home_dir() {
            return home.to_string_lossy().to_string();
        }
    }
    value.to_string()
}
