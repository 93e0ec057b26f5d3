//! In-memory native session
//!
//! Holds torrents as plain structs and lets the caller script what the
//! "engine" reports: counters, flags, alerts, faults. Clones share state, so
//! a test keeps one clone while the engine owns another.

use super::{
    AddTorrentParams, Alert, AlertKind, AlertReceiver, HandleStatus, NativeHandle, NativeSession,
    TorrentDescriptor,
};
use crate::error::{Error, Result};
use crate::magnet::info_hash_from_magnet;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug)]
struct MemoryTorrent {
    info_hash: String,
    status: HandleStatus,
    descriptor: Option<TorrentDescriptor>,
    invalid: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    torrents: HashMap<NativeHandle, MemoryTorrent>,
    add_failure: Option<String>,
    add_stall: Option<Duration>,
    remove_failure: Option<String>,
    last_add: Option<AddTorrentParams>,
    removed: Vec<(String, bool)>,
    session_paused: bool,
    resume_data_saved: bool,
    shut_down: bool,
}

struct Inner {
    state: Mutex<MemoryState>,
    alert_tx: async_channel::Sender<Alert>,
    alert_rx: Mutex<Option<AlertReceiver>>,
}

/// Scriptable [`NativeSession`] backed by a hash map
#[derive(Clone)]
pub struct InMemorySession {
    inner: Arc<Inner>,
}

impl Default for InMemorySession {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySession {
    pub fn new() -> Self {
        let (alert_tx, alert_rx) = async_channel::unbounded();
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(MemoryState::default()),
                alert_tx,
                alert_rx: Mutex::new(Some(alert_rx)),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Handle of the torrent with this info-hash, if it is still in the session
    pub fn handle_for(&self, info_hash: &str) -> Option<NativeHandle> {
        self.state()
            .torrents
            .iter()
            .find(|(_, t)| t.info_hash == info_hash)
            .map(|(handle, _)| *handle)
    }

    /// Edit the counters the session will report for a torrent
    pub fn update_status<F>(&self, info_hash: &str, edit: F) -> bool
    where
        F: FnOnce(&mut HandleStatus),
    {
        let mut state = self.state();
        match state
            .torrents
            .values_mut()
            .find(|t| t.info_hash == info_hash)
        {
            Some(torrent) => {
                edit(&mut torrent.status);
                true
            }
            None => false,
        }
    }

    /// Make the torrent descriptor available, as if metadata had arrived
    pub fn set_metadata(&self, info_hash: &str, name: &str, total_size: u64) -> bool {
        let mut state = self.state();
        match state
            .torrents
            .values_mut()
            .find(|t| t.info_hash == info_hash)
        {
            Some(torrent) => {
                torrent.descriptor = Some(TorrentDescriptor {
                    name: name.to_string(),
                    total_size,
                });
                torrent.status.total_wanted = total_size;
                true
            }
            None => false,
        }
    }

    /// Queue an alert for the synchronizer
    pub fn push_alert(&self, handle: NativeHandle, kind: AlertKind) {
        let _ = self.inner.alert_tx.try_send(Alert { handle, kind });
    }

    /// Make the next `add_magnet` call fault with this message
    pub fn fail_next_add(&self, message: impl Into<String>) {
        self.state().add_failure = Some(message.into());
    }

    /// Make the next `add_magnet` call register the torrent and then hang
    /// for this long before returning
    pub fn stall_next_add(&self, delay: Duration) {
        self.state().add_stall = Some(delay);
    }

    /// Make the next `remove` call fault with this message
    pub fn fail_next_remove(&self, message: impl Into<String>) {
        self.state().remove_failure = Some(message.into());
    }

    /// Make every later status query for this torrent fail
    pub fn invalidate(&self, info_hash: &str) -> bool {
        let mut state = self.state();
        match state
            .torrents
            .values_mut()
            .find(|t| t.info_hash == info_hash)
        {
            Some(torrent) => {
                torrent.invalid = true;
                true
            }
            None => false,
        }
    }

    /// Removals performed so far as `(info_hash, delete_files)`
    pub fn removed(&self) -> Vec<(String, bool)> {
        self.state().removed.clone()
    }

    pub fn last_add(&self) -> Option<AddTorrentParams> {
        self.state().last_add.clone()
    }

    pub fn torrent_count(&self) -> usize {
        self.state().torrents.len()
    }

    pub fn session_paused(&self) -> bool {
        self.state().session_paused
    }

    pub fn resume_data_saved(&self) -> bool {
        self.state().resume_data_saved
    }

    pub fn is_shut_down(&self) -> bool {
        self.state().shut_down
    }

    fn with_torrent<T, F>(&self, handle: NativeHandle, f: F) -> Result<T>
    where
        F: FnOnce(&mut MemoryTorrent) -> T,
    {
        let mut state = self.state();
        if state.shut_down {
            return Err(Error::Shutdown);
        }
        match state.torrents.get_mut(&handle) {
            Some(torrent) if !torrent.invalid => Ok(f(torrent)),
            _ => Err(Error::EngineFault(format!("invalid torrent handle {}", handle))),
        }
    }
}

#[async_trait]
impl NativeSession for InMemorySession {
    async fn add_magnet(&self, params: AddTorrentParams) -> Result<NativeHandle> {
        let (handle, stall) = {
            let mut state = self.state();
            if state.shut_down {
                return Err(Error::Shutdown);
            }
            if let Some(message) = state.add_failure.take() {
                return Err(Error::EngineFault(message));
            }

            let info_hash = info_hash_from_magnet(&params.magnet_uri)
                .ok_or_else(|| Error::EngineFault("magnet has no info-hash".to_string()))?;
            let handle = NativeHandle::new(Uuid::new_v4());

            state.torrents.insert(
                handle,
                MemoryTorrent {
                    info_hash,
                    status: HandleStatus::default(),
                    descriptor: None,
                    invalid: false,
                },
            );
            state.last_add = Some(params);
            (handle, state.add_stall.take())
        };

        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        Ok(handle)
    }

    async fn pause(&self, handle: NativeHandle) -> Result<()> {
        self.with_torrent(handle, |t| t.status.is_paused = true)
    }

    async fn resume(&self, handle: NativeHandle) -> Result<()> {
        self.with_torrent(handle, |t| t.status.is_paused = false)
    }

    async fn remove(&self, handle: NativeHandle, delete_files: bool) -> Result<()> {
        let mut state = self.state();
        if let Some(message) = state.remove_failure.take() {
            return Err(Error::EngineFault(message));
        }
        let torrent = state
            .torrents
            .remove(&handle)
            .ok_or_else(|| Error::EngineFault(format!("invalid torrent handle {}", handle)))?;
        state.removed.push((torrent.info_hash, delete_files));
        Ok(())
    }

    fn status(&self, handle: NativeHandle) -> Result<HandleStatus> {
        self.with_torrent(handle, |t| t.status.clone())
    }

    fn find(&self, info_hash: &str) -> Option<NativeHandle> {
        self.handle_for(info_hash)
    }

    fn descriptor(&self, handle: NativeHandle) -> Option<TorrentDescriptor> {
        self.state()
            .torrents
            .get(&handle)
            .and_then(|t| t.descriptor.clone())
    }

    fn take_alerts(&self) -> Option<AlertReceiver> {
        self.inner
            .alert_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    async fn pause_session(&self) -> Result<()> {
        let mut state = self.state();
        state.session_paused = true;
        for torrent in state.torrents.values_mut() {
            torrent.status.is_paused = true;
        }
        Ok(())
    }

    async fn save_resume_data(&self) -> Result<()> {
        self.state().resume_data_saved = true;
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.state().shut_down = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(hash: &str) -> AddTorrentParams {
        AddTorrentParams {
            magnet_uri: format!("magnet:?xt=urn:btih:{}", hash),
            save_dir: std::env::temp_dir(),
            sparse: true,
        }
    }

    #[tokio::test]
    async fn add_then_query_status() {
        let session = InMemorySession::new();
        let hash = "b".repeat(40);
        let handle = session.add_magnet(params(&hash)).await.unwrap();

        assert_eq!(session.handle_for(&hash), Some(handle));
        assert!(session.update_status(&hash, |s| s.progress = 0.5));
        assert_eq!(session.status(handle).unwrap().progress, 0.5);
    }

    #[tokio::test]
    async fn invalidated_handle_faults() {
        let session = InMemorySession::new();
        let hash = "c".repeat(40);
        let handle = session.add_magnet(params(&hash)).await.unwrap();
        session.invalidate(&hash);

        assert!(matches!(session.status(handle), Err(Error::EngineFault(_))));
    }

    #[tokio::test]
    async fn scripted_add_failure_is_consumed_once() {
        let session = InMemorySession::new();
        session.fail_next_add("disk full");

        let err = session.add_magnet(params(&"d".repeat(40))).await.unwrap_err();
        assert!(matches!(err, Error::EngineFault(msg) if msg == "disk full"));
        assert!(session.add_magnet(params(&"d".repeat(40))).await.is_ok());
    }

    #[test]
    fn alert_stream_can_only_be_taken_once() {
        let session = InMemorySession::new();
        assert!(session.take_alerts().is_some());
        assert!(session.take_alerts().is_none());
    }
}
