//! In-memory transport implementation for testing

use super::{async_trait, Transport};
use crate::session::Envelope;
use crate::{Error, Result, Role, SessionKey};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// In-memory envelope queues for local runs.
///
/// Envelopes are stored in their JSON wire form so both parties exercise the
/// same encoding a network transport would.
#[derive(Clone)]
pub struct MemoryTransport {
    /// (session, addressee) -> queued envelopes
    queues: Arc<DashMap<(SessionKey, Role), VecDeque<Vec<u8>>>>,
    /// Notification channel
    notify: broadcast::Sender<()>,
    timeout: Duration,
}

impl MemoryTransport {
    /// Create a new in-memory transport
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(60))
    }

    /// Transport whose `recv` gives up after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        let (notify, _) = broadcast::channel(100);
        Self {
            queues: Arc::new(DashMap::new()),
            notify,
            timeout,
        }
    }

    /// Envelopes waiting for `to`
    pub fn pending(&self, key: &SessionKey, to: Role) -> usize {
        self.queues
            .get(&(key.clone(), to))
            .map(|q| q.len())
            .unwrap_or(0)
    }

    fn pop(&self, key: &SessionKey, me: Role) -> Option<Vec<u8>> {
        self.queues
            .get_mut(&(key.clone(), me))
            .and_then(|mut q| q.pop_front())
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn serialize(envelope: &Envelope) -> Result<Vec<u8>> {
    serde_json::to_vec(envelope).map_err(|e| Error::Serialization(e.to_string()))
}

fn deserialize(bytes: &[u8]) -> Result<Envelope> {
    serde_json::from_slice(bytes).map_err(|e| Error::Deserialization(e.to_string()))
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, key: &SessionKey, envelope: Envelope) -> Result<()> {
        let bytes = serialize(&envelope)?;

        self.queues
            .entry((key.clone(), envelope.to))
            .or_default()
            .push_back(bytes);

        let _ = self.notify.send(());
        Ok(())
    }

    async fn recv(&self, key: &SessionKey, me: Role) -> Result<Envelope> {
        let mut rx = self.notify.subscribe();
        let deadline = tokio::time::Instant::now() + self.timeout;

        loop {
            if let Some(bytes) = self.pop(key, me) {
                return deserialize(&bytes);
            }

            // Wait for notification with timeout
            tokio::select! {
                _ = rx.recv() => continue,
                _ = tokio::time::sleep(Duration::from_millis(100)) => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(Error::Timeout(format!("{me} envelope for {key}")));
                    }
                }
            }
        }
    }
}
