//! Engine events and their fan-out to consumers

use crate::types::{DownloadRecord, SearchResult};
use std::sync::{Arc, Mutex, PoisonError};

/// Notifications delivered to frontends
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A magnet was accepted and is now tracked
    Added(DownloadRecord),
    /// Counters or status changed
    Updated(DownloadRecord),
    /// The payload finished downloading
    Completed(DownloadRecord),
    /// A download was removed from the registry
    Removed(String),
    /// A fault scoped to one download; the hash may be empty when none could be derived
    Error { info_hash: String, message: String },
    SearchCompleted(Vec<SearchResult>),
    SearchError(String),
}

impl EngineEvent {
    /// Info-hash the event concerns, if any
    pub fn info_hash(&self) -> Option<&str> {
        match self {
            EngineEvent::Added(r) | EngineEvent::Updated(r) | EngineEvent::Completed(r) => {
                Some(&r.info_hash)
            }
            EngineEvent::Removed(hash) => Some(hash),
            EngineEvent::Error { info_hash, .. } => Some(info_hash),
            EngineEvent::SearchCompleted(_) | EngineEvent::SearchError(_) => None,
        }
    }
}

/// Ordered, best-effort fan-out.
///
/// Each subscriber gets its own unbounded channel, so events reach every
/// consumer in emission order. Subscribers that hung up are dropped on the
/// next emit.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<async_channel::Sender<EngineEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> async_channel::Receiver<EngineEvent> {
        let (tx, rx) = async_channel::unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Deliver to every live subscriber without blocking
    pub fn emit(&self, event: EngineEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.try_send(event.clone()).is_ok());
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
