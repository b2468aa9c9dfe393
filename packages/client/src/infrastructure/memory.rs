//! In-memory implementations of the transport and store seams.
//!
//! The transport is scriptable: tests push channel events into subscribed
//! topics and inspect what the synchronizers tracked or sent. The store
//! keeps items and vote rows in memory with the same natural-key upsert
//! semantics as the real backend, plus failure injection for rollback and
//! retry tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};

use crate::domain::{BanVote, BannableItem, PresenceRecord};
use crate::error::{StoreError, TransportError};
use crate::lobby::LobbyCode;
use crate::store::{FetchedItem, VoteStore};
use crate::transport::{ChannelConfig, ChannelEvent, ChannelHandle, ChannelTransport};

const EVENT_BUFFER: usize = 64;

#[derive(Default)]
struct TopicState {
    sender: Option<mpsc::Sender<ChannelEvent>>,
    tracked: Option<PresenceRecord>,
    sent: Vec<(String, Value)>,
    subscribe_count: u32,
    unsubscribe_count: u32,
}

struct TransportInner {
    topics: Mutex<HashMap<String, TopicState>>,
    fail_subscribes: AtomicU32,
}

/// Scriptable in-memory channel transport
pub struct InMemoryTransport {
    inner: Arc<TransportInner>,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TransportInner {
                topics: Mutex::new(HashMap::new()),
                fail_subscribes: AtomicU32::new(0),
            }),
        }
    }

    /// Make the next `count` subscribe calls fail with a connect error
    pub fn fail_next_subscribes(&self, count: u32) {
        self.inner.fail_subscribes.store(count, Ordering::SeqCst);
    }

    /// Push an event into the topic's live subscription, if any
    pub async fn push(&self, topic: &str, event: ChannelEvent) {
        let sender = {
            let topics = self.inner.topics.lock().await;
            topics.get(topic).and_then(|t| t.sender.clone())
        };
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }

    /// Simulate a channel failure on the topic
    pub async fn emit_error(&self, topic: &str, message: &str) {
        self.push(topic, ChannelEvent::ChannelError(message.to_string()))
            .await;
    }

    /// The presence payload currently tracked on the topic
    pub async fn tracked(&self, topic: &str) -> Option<PresenceRecord> {
        let topics = self.inner.topics.lock().await;
        topics.get(topic).and_then(|t| t.tracked.clone())
    }

    /// Broadcasts sent by the client on the topic
    pub async fn sent(&self, topic: &str) -> Vec<(String, Value)> {
        let topics = self.inner.topics.lock().await;
        topics.get(topic).map(|t| t.sent.clone()).unwrap_or_default()
    }

    pub async fn subscribe_count(&self, topic: &str) -> u32 {
        let topics = self.inner.topics.lock().await;
        topics.get(topic).map(|t| t.subscribe_count).unwrap_or(0)
    }

    pub async fn unsubscribe_count(&self, topic: &str) -> u32 {
        let topics = self.inner.topics.lock().await;
        topics.get(topic).map(|t| t.unsubscribe_count).unwrap_or(0)
    }
}

#[async_trait]
impl ChannelTransport for InMemoryTransport {
    async fn subscribe(
        &self,
        topic: &str,
        _config: ChannelConfig,
    ) -> Result<Box<dyn ChannelHandle>, TransportError> {
        let remaining = self.inner.fail_subscribes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.inner
                .fail_subscribes
                .store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::Connect("injected failure".to_string()));
        }

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        {
            let mut topics = self.inner.topics.lock().await;
            let state = topics.entry(topic.to_string()).or_default();
            state.sender = Some(tx.clone());
            state.subscribe_count += 1;
        }
        // Completing the handshake is the subscription ack
        let _ = tx.send(ChannelEvent::Subscribed).await;

        Ok(Box::new(InMemoryChannel {
            inner: Arc::clone(&self.inner),
            topic: topic.to_string(),
            events: Some(rx),
        }))
    }
}

struct InMemoryChannel {
    inner: Arc<TransportInner>,
    topic: String,
    events: Option<mpsc::Receiver<ChannelEvent>>,
}

#[async_trait]
impl ChannelHandle for InMemoryChannel {
    fn take_events(&mut self) -> Option<mpsc::Receiver<ChannelEvent>> {
        self.events.take()
    }

    async fn track(&mut self, record: PresenceRecord) -> Result<(), TransportError> {
        let mut topics = self.inner.topics.lock().await;
        if let Some(state) = topics.get_mut(&self.topic) {
            state.tracked = Some(record);
        }
        Ok(())
    }

    async fn untrack(&mut self) -> Result<(), TransportError> {
        let mut topics = self.inner.topics.lock().await;
        if let Some(state) = topics.get_mut(&self.topic) {
            state.tracked = None;
        }
        Ok(())
    }

    async fn send(&mut self, event: &str, payload: Value) -> Result<(), TransportError> {
        let mut topics = self.inner.topics.lock().await;
        if let Some(state) = topics.get_mut(&self.topic) {
            state.sent.push((event.to_string(), payload));
        }
        Ok(())
    }

    async fn unsubscribe(&mut self) -> Result<(), TransportError> {
        let mut topics = self.inner.topics.lock().await;
        if let Some(state) = topics.get_mut(&self.topic) {
            state.sender = None;
            state.unsubscribe_count += 1;
        }
        Ok(())
    }
}

/// In-memory vote store with natural-key upsert semantics
pub struct InMemoryVoteStore {
    items: Mutex<Vec<BannableItem>>,
    votes: Mutex<Vec<BanVote>>,
    fail_writes: AtomicBool,
    fail_fetches: AtomicBool,
}

impl InMemoryVoteStore {
    pub fn new(items: Vec<BannableItem>) -> Self {
        Self {
            items: Mutex::new(items),
            votes: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
            fail_fetches: AtomicBool::new(false),
        }
    }

    /// Make subsequent upsert/delete calls fail
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent fetches fail
    pub fn fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    /// All vote rows for an item within a lobby (test inspection)
    pub async fn votes_for(&self, item_id: &str, lobby: &LobbyCode) -> Vec<BanVote> {
        let votes = self.votes.lock().await;
        votes
            .iter()
            .filter(|v| v.item_id == item_id && v.lobby_code == lobby.as_str())
            .cloned()
            .collect()
    }
}

#[async_trait]
impl VoteStore for InMemoryVoteStore {
    async fn fetch_items(&self, lobby: &LobbyCode) -> Result<Vec<FetchedItem>, StoreError> {
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(StoreError::Query("injected fetch failure".to_string()));
        }

        let items = self.items.lock().await;
        let votes = self.votes.lock().await;
        Ok(items
            .iter()
            .map(|item| {
                let latest = votes
                    .iter()
                    .filter(|v| v.item_id == item.id && v.lobby_code == lobby.as_str())
                    .max_by_key(|v| v.created_at)
                    .cloned();
                FetchedItem {
                    item: item.clone(),
                    latest_ban_vote: latest,
                }
            })
            .collect())
    }

    async fn upsert_ban_vote(&self, vote: BanVote) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected("injected write failure".to_string()));
        }

        let mut votes = self.votes.lock().await;
        match votes
            .iter_mut()
            .find(|v| v.item_id == vote.item_id && v.lobby_code == vote.lobby_code)
        {
            Some(existing) => *existing = vote,
            None => votes.push(vote),
        }
        Ok(())
    }

    async fn delete_ban_votes(&self, item_id: &str, lobby: &LobbyCode) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected("injected write failure".to_string()));
        }

        let mut votes = self.votes.lock().await;
        votes.retain(|v| !(v.item_id == item_id && v.lobby_code == lobby.as_str()));
        Ok(())
    }
}
