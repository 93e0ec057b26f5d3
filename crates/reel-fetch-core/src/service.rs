//! Download service - runs the engine on its own tokio runtime and bridges
//! it to a frontend through a pair of channels

use crate::engine::DownloadEngine;
use crate::events::EngineEvent;
use crate::types::{DownloadRecord, Settings};
use std::sync::Arc;

/// Commands sent from the frontend to the engine
#[derive(Debug, Clone)]
pub enum EngineCommand {
    /// Search the torrent index; results arrive as an event
    Search {
        query: String,
        limit: Option<usize>,
    },
    /// Add a magnet link
    AddMagnet { uri: String, title: Option<String> },
    Pause(String),
    Resume(String),
    Remove {
        info_hash: String,
        delete_files: bool,
    },
    /// Request current downloads list
    RefreshDownloads,
    /// Shutdown the service
    Shutdown,
}

/// Messages sent from the engine to the frontend
#[derive(Debug, Clone)]
pub enum UiMessage {
    /// Engine initialized
    EngineReady,
    Event(EngineEvent),
    /// Full downloads list
    DownloadsList(Vec<DownloadRecord>),
    /// A command failed
    Error(String),
}

pub struct DownloadService;

impl DownloadService {
    /// Start a gosh-dl backed engine in a background thread and serve
    /// commands until `Shutdown` or until the command channel closes
    pub fn spawn(
        settings: Settings,
        ui_sender: async_channel::Sender<UiMessage>,
        cmd_receiver: async_channel::Receiver<EngineCommand>,
    ) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || {
            let rt = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    log::error!("Failed to create tokio runtime: {}", e);
                    let _ = ui_sender.send_blocking(UiMessage::Error(e.to_string()));
                    return;
                }
            };

            rt.block_on(async move {
                let engine = match DownloadEngine::with_native_session(settings).await {
                    Ok(engine) => engine,
                    Err(e) => {
                        log::error!("Failed to create download engine: {}", e);
                        let _ = ui_sender.send(UiMessage::Error(e.to_string())).await;
                        return;
                    }
                };
                if let Err(e) = engine.start() {
                    log::error!("Failed to start status synchronizer: {}", e);
                    let _ = ui_sender.send(UiMessage::Error(e.to_string())).await;
                    return;
                }

                Self::run(engine, ui_sender, cmd_receiver).await;
            });
        })
    }

    /// Serve commands against an existing engine on the current runtime.
    ///
    /// The engine is shut down when the loop ends.
    pub async fn run(
        engine: Arc<DownloadEngine>,
        ui_sender: async_channel::Sender<UiMessage>,
        cmd_receiver: async_channel::Receiver<EngineCommand>,
    ) {
        let events = engine.subscribe();

        // Notify frontend that engine is ready
        let _ = ui_sender.send(UiMessage::EngineReady).await;

        loop {
            tokio::select! {
                cmd_result = cmd_receiver.recv() => {
                    match cmd_result {
                        Ok(EngineCommand::Shutdown) => {
                            log::info!("Download service shutting down");
                            break;
                        }
                        Ok(cmd) => {
                            handle_command(&engine, &ui_sender, cmd).await;
                        }
                        Err(_) => {
                            log::warn!("Command channel closed");
                            break;
                        }
                    }
                }

                event_result = events.recv() => {
                    if let Ok(event) = event_result {
                        if ui_sender.send(UiMessage::Event(event)).await.is_err() {
                            log::warn!("Frontend channel closed");
                            break;
                        }
                    }
                }
            }
        }

        engine.shutdown().await;
    }
}

/// Handle a command from the frontend
async fn handle_command(
    engine: &DownloadEngine,
    ui_sender: &async_channel::Sender<UiMessage>,
    cmd: EngineCommand,
) {
    let result = match cmd {
        EngineCommand::Search { query, limit } => {
            engine.spawn_search(query, limit);
            Ok(())
        }
        EngineCommand::AddMagnet { uri, title } => {
            engine.add(&uri, title.as_deref()).await.map(|_| ())
        }
        EngineCommand::Pause(info_hash) => engine.pause(&info_hash).await,
        EngineCommand::Resume(info_hash) => engine.resume(&info_hash).await,
        EngineCommand::Remove {
            info_hash,
            delete_files,
        } => engine.remove(&info_hash, delete_files).await,
        EngineCommand::RefreshDownloads => {
            let downloads = engine.list().await;
            let _ = ui_sender.send(UiMessage::DownloadsList(downloads)).await;
            Ok(())
        }
        EngineCommand::Shutdown => {
            // Handled in the main loop
            Ok(())
        }
    };

    if let Err(e) = result {
        let _ = ui_sender.send(UiMessage::Error(e.to_string())).await;
    }
}
