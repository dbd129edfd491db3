//! Mock implementations for testing
//!
//! Provides an in-memory [`Transport`] and [`SetpointStore`] so sessions can be
//! exercised without a broker or a filesystem. Both are cheap to clone and the
//! clones share state, so a test can keep a handle after moving one into a
//! session.

use crate::error::DashboardError;
use crate::storage::{PersistenceError, SetpointStore};
use crate::transport::{mqtt::ConnectionState, InboundMessage, Transport};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Topic, payload and retain flag of one publish
pub type PublishedMessage = (String, Vec<u8>, bool);

/// Mock transport for testing
#[derive(Debug, Default, Clone)]
pub struct MockTransport {
    pub published_messages: Arc<Mutex<Vec<PublishedMessage>>>,
    pub subscriptions: Arc<Mutex<Vec<String>>>,
    pub should_fail: bool,
    connected: Arc<AtomicBool>,
    message_sender: Arc<Mutex<Option<mpsc::Sender<InboundMessage>>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every operation fails
    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    pub async fn get_published_messages(&self) -> Vec<PublishedMessage> {
        self.published_messages.lock().await.clone()
    }

    /// Payloads published on one topic, as UTF-8
    pub async fn published_payloads(&self, topic: &str) -> Vec<String> {
        self.published_messages
            .lock()
            .await
            .iter()
            .filter(|(t, _, _)| t == topic)
            .map(|(_, payload, _)| String::from_utf8_lossy(payload).to_string())
            .collect()
    }

    pub async fn get_subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().await.clone()
    }

    pub async fn clear_history(&self) {
        self.published_messages.lock().await.clear();
    }

    /// Deliver a message as if the broker sent it. Returns false when no
    /// receiver is registered or it has gone away.
    pub async fn inject(&self, message: InboundMessage) -> bool {
        let sender = self.message_sender.lock().await.clone();
        match sender {
            Some(sender) => sender.send(message).await.is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = DashboardError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        if self.should_fail {
            return Err(DashboardError::internal_error("Mock connection failure"));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), Self::Error> {
        if self.should_fail {
            return Err(DashboardError::internal_error("Mock subscribe failure"));
        }
        self.subscriptions.lock().await.push(topic.to_string());
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), Self::Error> {
        if self.should_fail {
            return Err(DashboardError::internal_error("Mock publish failure"));
        }

        self.published_messages
            .lock()
            .await
            .push((topic.to_string(), payload, retain));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        if self.should_fail {
            Some(ConnectionState::Disconnected(
                "Mock disconnection".to_string(),
            ))
        } else if self.is_connected() {
            Some(ConnectionState::Connected)
        } else {
            None
        }
    }

    fn is_permanently_disconnected(&self) -> bool {
        false
    }

    async fn set_message_sender(&self, sender: mpsc::Sender<InboundMessage>) {
        *self.message_sender.lock().await = Some(sender);
    }
}

/// In-memory setpoint store
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    items: Arc<Mutex<BTreeMap<String, String>>>,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
    batch_writes: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-filled with raw (JSON-encoded) values
    pub fn with_items<K, V>(items: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let items = items
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            items: Arc::new(Mutex::new(items)),
            ..Default::default()
        }
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.items.lock().await.get(key).cloned()
    }

    /// Number of successful checkpoint batches
    pub fn batch_writes(&self) -> usize {
        self.batch_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SetpointStore for MemoryStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(PersistenceError::Backend("Mock read failure".to_string()));
        }
        Ok(self.items.lock().await.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: String) -> Result<(), PersistenceError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PersistenceError::Backend("Mock write failure".to_string()));
        }
        self.items.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn set_items(&self, items: Vec<(String, String)>) -> Result<(), PersistenceError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PersistenceError::Backend("Mock write failure".to_string()));
        }
        self.items.lock().await.extend(items);
        self.batch_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
