//! Reel-Fetch Core Library
//!
//! This crate provides torrent-index search, the download engine with its
//! session registry and status synchronizer, the native session adapters,
//! and the service layer for the Reel-Fetch media downloader.
//! It is UI-agnostic and can be used with any frontend (CLI, GTK, etc.)

pub mod engine;
pub mod error;
pub mod events;
pub mod magnet;
pub mod registry;
pub mod scrape;
pub mod search;
pub mod service;
pub mod session;
pub mod synchronizer;
pub mod types;
pub mod utils;

// Re-exports for convenience
pub use engine::DownloadEngine;
pub use error::{Error, Result};
pub use events::{EngineEvent, EventBus};
pub use magnet::Magnet;
pub use registry::SessionRegistry;
pub use search::{ContentSearcher, SearchConfig};
pub use service::{DownloadService, EngineCommand, UiMessage};
pub use session::{settings_to_engine_config, GoshSession, InMemorySession, NativeSession};
pub use synchronizer::StatusSynchronizer;
pub use types::*;
pub use utils::{calculate_progress, compute_eta, format_bytes, format_eta, format_speed};

// Re-export gosh-dl types that frontends might need
pub use gosh_dl::EngineConfig;
