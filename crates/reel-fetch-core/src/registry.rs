//! Session registry
//!
//! The one place where download records and the native session live. Every
//! read-modify-write, from the engine or the synchronizer, happens while
//! holding the registry lock.

use crate::session::{NativeHandle, NativeSession};
use crate::types::DownloadRecord;
use std::collections::HashMap;
use tokio::sync::{Mutex, MutexGuard};

/// Registry entry: the public record plus engine-private bookkeeping
#[derive(Debug, Clone)]
pub(crate) struct TrackedDownload {
    pub record: DownloadRecord,
    pub handle: NativeHandle,
    /// Title came from the magnet or the hash, not from the caller
    pub title_is_placeholder: bool,
    /// `Completed` has already been emitted for this record
    pub completion_reported: bool,
}

/// Mutex-guarded map from info-hash to download, plus the native session
pub struct SessionRegistry {
    inner: Mutex<RegistryState>,
}

/// Registry contents, reachable only through [`SessionRegistry::lock`]
pub struct RegistryState {
    session: Box<dyn NativeSession>,
    entries: HashMap<String, TrackedDownload>,
}

impl SessionRegistry {
    pub fn new(session: Box<dyn NativeSession>) -> Self {
        Self {
            inner: Mutex::new(RegistryState {
                session,
                entries: HashMap::new(),
            }),
        }
    }

    /// Acquire the registry for a read-modify-write
    pub async fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.inner.lock().await
    }

    /// Copies of every record, oldest first
    pub async fn snapshot(&self) -> Vec<DownloadRecord> {
        self.lock().await.snapshot()
    }

    pub async fn get(&self, info_hash: &str) -> Option<DownloadRecord> {
        self.lock().await.get(info_hash).cloned()
    }
}

impl RegistryState {
    pub fn get(&self, info_hash: &str) -> Option<&DownloadRecord> {
        self.entries.get(info_hash).map(|entry| &entry.record)
    }

    pub fn contains(&self, info_hash: &str) -> bool {
        self.entries.contains_key(info_hash)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<DownloadRecord> {
        let mut records: Vec<DownloadRecord> =
            self.entries.values().map(|e| e.record.clone()).collect();
        records.sort_by(|a, b| {
            a.added_at
                .cmp(&b.added_at)
                .then_with(|| a.info_hash.cmp(&b.info_hash))
        });
        records
    }

    pub fn session(&self) -> &dyn NativeSession {
        self.session.as_ref()
    }

    pub(crate) fn put(&mut self, entry: TrackedDownload) {
        self.entries.insert(entry.record.info_hash.clone(), entry);
    }

    pub(crate) fn delete(&mut self, info_hash: &str) -> Option<TrackedDownload> {
        self.entries.remove(info_hash)
    }

    pub(crate) fn entry(&self, info_hash: &str) -> Option<&TrackedDownload> {
        self.entries.get(info_hash)
    }

    pub(crate) fn entry_mut(&mut self, info_hash: &str) -> Option<&mut TrackedDownload> {
        self.entries.get_mut(info_hash)
    }

    /// Info-hash of the download owning a native handle
    pub(crate) fn hash_for_handle(&self, handle: NativeHandle) -> Option<String> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.handle == handle)
            .map(|(hash, _)| hash.clone())
    }

    pub(crate) fn hashes(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Session and mutable entry at once, for refreshes that read one and write the other
    pub(crate) fn session_and_entry(
        &mut self,
        info_hash: &str,
    ) -> Option<(&dyn NativeSession, &mut TrackedDownload)> {
        let entry = self.entries.get_mut(info_hash)?;
        Some((self.session.as_ref(), entry))
    }
}
