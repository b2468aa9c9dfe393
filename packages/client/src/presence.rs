//! Presence synchronization: a live, per-lobby roster of connected sessions.
//!
//! The synchronizer owns a spawned actor task that holds the roster (a keyed
//! map session-key -> record) and is its only mutator. Channel events and
//! reconnect commands are consumed in a single select loop, so every event
//! applies atomically with respect to published snapshots. Consumers read
//! the state through a `watch` receiver and never mutate it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use banstage_shared::time::{Clock, timestamp_to_rfc3339};

use crate::domain::{self, ConnectionState, PresenceRecord};
use crate::error::SyncError;
use crate::lobby::LobbyCode;
use crate::retry::{RetryConfig, RetryScheduler, ScheduleOutcome};
use crate::transport::{ChannelConfig, ChannelEvent, ChannelHandle, ChannelTransport};

/// Identity tracked by this connection
#[derive(Debug, Clone)]
pub struct SelfPresence {
    pub user_id: String,
    pub display_name: Option<String>,
}

/// Read-only presence snapshot published to the display layer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceView {
    /// One entry per connected session; two tabs of one user are two entries
    pub connected_users: Vec<PresenceRecord>,
    pub is_connected: bool,
    pub is_reconnecting: bool,
    pub last_error: Option<String>,
}

enum Command {
    Reconnect,
    Shutdown,
}

/// Keeps the lobby roster in sync with the presence channel, reconnecting
/// with exponential backoff on failure.
pub struct PresenceSynchronizer {
    view_rx: watch::Receiver<PresenceView>,
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl PresenceSynchronizer {
    /// Spawn the synchronizer for a lobby.
    ///
    /// The channel topic is scoped to the lobby code; the presence key is
    /// the user id plus a random session suffix so duplicate tabs coexist.
    pub fn spawn(
        transport: Arc<dyn ChannelTransport>,
        lobby: &LobbyCode,
        identity: SelfPresence,
        retry_config: RetryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (view_tx, view_rx) = watch::channel(PresenceView::default());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let actor = PresenceActor {
            transport,
            topic: format!("presence:{}", lobby),
            session_key: domain::session_key(&identity.user_id),
            identity,
            clock,
            roster: HashMap::new(),
            state: ConnectionState::Disconnected,
            last_error: None,
            view_tx,
            retry: RetryScheduler::new(retry_config),
            commands: cmd_tx.clone(),
        };
        let task = tokio::spawn(actor.run(cmd_rx));

        Self {
            view_rx,
            commands: cmd_tx,
            task,
        }
    }

    /// Subscribe to roster snapshots
    pub fn view(&self) -> watch::Receiver<PresenceView> {
        self.view_rx.clone()
    }

    /// Untrack, unsubscribe, and cancel any pending retry, then stop.
    ///
    /// Proactive untracking lets peers see the departure immediately
    /// instead of waiting for a presence timeout.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown);
        let _ = self.task.await;
    }
}

struct PresenceActor {
    transport: Arc<dyn ChannelTransport>,
    topic: String,
    session_key: String,
    identity: SelfPresence,
    clock: Arc<dyn Clock>,
    roster: HashMap<String, PresenceRecord>,
    state: ConnectionState,
    last_error: Option<String>,
    view_tx: watch::Sender<PresenceView>,
    retry: RetryScheduler,
    commands: mpsc::UnboundedSender<Command>,
}

impl PresenceActor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut handle: Option<Box<dyn ChannelHandle>> = None;
        let mut events: Option<mpsc::Receiver<ChannelEvent>> = None;

        self.state = ConnectionState::Connecting;
        self.publish_view();
        self.connect(&mut handle, &mut events).await;

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Reconnect) => {
                        tracing::info!("Reconnecting presence channel '{}'", self.topic);
                        self.teardown_channel(&mut handle, &mut events, false).await;
                        self.connect(&mut handle, &mut events).await;
                    }
                    Some(Command::Shutdown) | None => {
                        self.retry.cancel().await;
                        self.teardown_channel(&mut handle, &mut events, true).await;
                        break;
                    }
                },
                event = recv_event(&mut events) => match event {
                    Some(event) => self.handle_event(event, &mut handle, &mut events).await,
                    None => {
                        self.handle_disconnect("event stream ended".to_string(), &mut handle, &mut events)
                            .await;
                    }
                },
            }
        }
    }

    async fn connect(
        &mut self,
        handle: &mut Option<Box<dyn ChannelHandle>>,
        events: &mut Option<mpsc::Receiver<ChannelEvent>>,
    ) {
        let config = ChannelConfig {
            presence_key: Some(self.session_key.clone()),
        };
        match self.transport.subscribe(&self.topic, config).await {
            Ok(mut h) => {
                *events = h.take_events();
                *handle = Some(h);
            }
            Err(e) => {
                self.handle_disconnect(e.to_string(), handle, events).await;
            }
        }
    }

    async fn handle_event(
        &mut self,
        event: ChannelEvent,
        handle: &mut Option<Box<dyn ChannelHandle>>,
        events: &mut Option<mpsc::Receiver<ChannelEvent>>,
    ) {
        match event {
            ChannelEvent::Subscribed => {
                let record = PresenceRecord {
                    id: self.identity.user_id.clone(),
                    name: self.identity.display_name.clone(),
                    online_at: timestamp_to_rfc3339(self.clock.now_utc_millis()),
                };
                let tracked = match handle.as_mut() {
                    Some(h) => h.track(record).await,
                    None => return,
                };
                match tracked {
                    Ok(()) => {
                        self.retry.reset().await;
                        self.state = ConnectionState::Connected;
                        self.last_error = None;
                        tracing::info!("Presence channel '{}' connected", self.topic);
                    }
                    Err(e) => {
                        self.handle_disconnect(e.to_string(), handle, events).await;
                        return;
                    }
                }
            }
            ChannelEvent::PresenceSync(entries) => {
                self.roster = domain::roster_from_snapshot(
                    entries.into_iter().map(|e| (e.key, e.record)),
                );
            }
            ChannelEvent::PresenceJoin(entries) => {
                domain::apply_join(
                    &mut self.roster,
                    entries.into_iter().map(|e| (e.key, e.record)),
                );
            }
            ChannelEvent::PresenceLeave(keys) => {
                domain::apply_leave(&mut self.roster, keys.iter().map(String::as_str));
            }
            ChannelEvent::Broadcast { event, .. } => {
                tracing::debug!("Ignoring broadcast '{}' on presence channel", event);
            }
            ChannelEvent::ChannelError(msg) => {
                self.handle_disconnect(msg, handle, events).await;
                return;
            }
            ChannelEvent::Closed => {
                self.handle_disconnect("channel closed".to_string(), handle, events)
                    .await;
                return;
            }
        }
        self.publish_view();
    }

    async fn handle_disconnect(
        &mut self,
        reason: String,
        handle: &mut Option<Box<dyn ChannelHandle>>,
        events: &mut Option<mpsc::Receiver<ChannelEvent>>,
    ) {
        tracing::warn!("Presence channel '{}' lost: {}", self.topic, reason);
        *events = None;
        if let Some(mut h) = handle.take() {
            // The channel already failed; a failing unsubscribe is expected
            let _ = h.unsubscribe().await;
        }

        self.state = ConnectionState::Reconnecting;
        self.last_error = Some(reason);

        let commands = self.commands.clone();
        let outcome = self
            .retry
            .schedule_retry(move || {
                let _ = commands.send(Command::Reconnect);
            })
            .await;
        if outcome == ScheduleOutcome::Exhausted {
            self.state = ConnectionState::Disconnected;
            self.last_error = Some(SyncError::ExhaustedRetries.to_string());
        }
        self.publish_view();
    }

    async fn teardown_channel(
        &mut self,
        handle: &mut Option<Box<dyn ChannelHandle>>,
        events: &mut Option<mpsc::Receiver<ChannelEvent>>,
        untrack: bool,
    ) {
        *events = None;
        if let Some(mut h) = handle.take() {
            if untrack {
                let _ = h.untrack().await;
            }
            let _ = h.unsubscribe().await;
        }
    }

    fn publish_view(&self) {
        self.view_tx.send_replace(PresenceView {
            connected_users: domain::roster_to_list(&self.roster),
            is_connected: self.state == ConnectionState::Connected,
            is_reconnecting: self.state == ConnectionState::Reconnecting,
            last_error: self.last_error.clone(),
        });
    }
}

async fn recv_event(events: &mut Option<mpsc::Receiver<ChannelEvent>>) -> Option<ChannelEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
