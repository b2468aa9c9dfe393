//! Realtime channel transport seam.
//!
//! The synchronizers depend on this trait, not on a concrete transport
//! (dependency inversion): `infrastructure` provides WebSocket, SSE, and
//! in-memory implementations. A channel delivers its lifecycle and payload
//! events over an mpsc receiver so the owning synchronizer can consume them
//! in a single select loop.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::domain::PresenceRecord;
use crate::error::TransportError;

/// Per-channel configuration supplied at subscribe time
#[derive(Debug, Clone, Default)]
pub struct ChannelConfig {
    /// Presence key identifying this connection within the channel
    /// (user id + session suffix); `None` for broadcast-only channels
    pub presence_key: Option<String>,
}

/// One roster entry as delivered by the channel: session key plus record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    pub key: String,
    pub record: PresenceRecord,
}

/// Events delivered by a subscribed channel
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// The subscription is live; presence tracking may begin
    Subscribed,
    /// Authoritative full roster snapshot; replaces local state wholesale
    PresenceSync(Vec<PresenceEntry>),
    /// Incremental join diff
    PresenceJoin(Vec<PresenceEntry>),
    /// Incremental leave diff (session keys)
    PresenceLeave(Vec<String>),
    /// Named broadcast payload (e.g. `item-updated`)
    Broadcast { event: String, payload: Value },
    /// The channel failed; the subscription is dead
    ChannelError(String),
    /// The channel was closed by the remote end
    Closed,
}

/// Factory for subscribed channels, scoped by topic
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Open a channel on `topic`. The returned handle owns the subscription.
    async fn subscribe(
        &self,
        topic: &str,
        config: ChannelConfig,
    ) -> Result<Box<dyn ChannelHandle>, TransportError>;
}

/// A live channel subscription.
///
/// Dropping a handle without calling [`unsubscribe`] leaks the remote
/// subscription until the server times it out; synchronizers always
/// unsubscribe on teardown.
///
/// [`unsubscribe`]: ChannelHandle::unsubscribe
#[async_trait]
pub trait ChannelHandle: Send {
    /// Take the event receiver. Yields `None` on subsequent calls; the
    /// owning synchronizer takes it exactly once.
    fn take_events(&mut self) -> Option<mpsc::Receiver<ChannelEvent>>;

    /// Announce this connection's presence payload to channel peers
    async fn track(&mut self, record: PresenceRecord) -> Result<(), TransportError>;

    /// Withdraw this connection's presence so peers see an immediate leave
    async fn untrack(&mut self) -> Result<(), TransportError>;

    /// Publish a named broadcast payload to channel peers
    async fn send(&mut self, event: &str, payload: Value) -> Result<(), TransportError>;

    /// Tear down the subscription
    async fn unsubscribe(&mut self) -> Result<(), TransportError>;
}
