//! Ban-state synchronization: the shared list of votable items.
//!
//! The item list is fetched from the store with ban status derived from the
//! latest ban vote per item in the lobby, then kept fresh by `item-updated`
//! broadcasts. User toggles are applied optimistically in three phases:
//! snapshot, apply, confirm-or-revert. The rollback is a pure restore of the
//! snapshot, so a failed remote call can never leave local state diverged.
//!
//! Concurrent conflicting toggles from different users resolve by vote
//! timestamp (last write wins); the server orders, the client never
//! arbitrates beyond optimistic display.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;

use banstage_shared::time::{Clock, timestamp_to_rfc3339};

use crate::domain::{self, BanVote, BannableItem};
use crate::error::SyncError;
use crate::lobby::LobbyCode;
use crate::retry::{RetryConfig, RetryScheduler, ScheduleOutcome};
use crate::store::VoteStore;
use crate::transport::{ChannelConfig, ChannelEvent, ChannelHandle, ChannelTransport};

/// Broadcast event name for authoritative item updates
pub const ITEM_UPDATED_EVENT: &str = "item-updated";

/// Read-only ban-list snapshot published to the display layer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BanListView {
    /// Items sorted by name for stable display ordering
    pub items: Vec<BannableItem>,
    pub loading: bool,
    pub error: Option<String>,
}

struct ListState {
    items: Vec<BannableItem>,
    loading: bool,
    error: Option<String>,
}

/// Item list plus its view channel; the synchronizer's methods and its
/// update actor are the only mutators.
struct Shared {
    state: Mutex<ListState>,
    view_tx: watch::Sender<BanListView>,
}

impl Shared {
    fn publish(&self, state: &ListState) {
        self.view_tx.send_replace(BanListView {
            items: state.items.clone(),
            loading: state.loading,
            error: state.error.clone(),
        });
    }
}

enum Command {
    /// Scheduled reconnect from the backoff timer; keeps the attempt count
    Reconnect,
    /// Manual user-triggered refresh; restores the retry budget
    Refresh,
    Shutdown,
}

/// Keeps the bannable item list in sync with the store and the per-lobby
/// update stream, with optimistic local toggles.
pub struct BanListSynchronizer {
    store: Arc<dyn VoteStore>,
    lobby: LobbyCode,
    clock: Arc<dyn Clock>,
    shared: Arc<Shared>,
    view_rx: watch::Receiver<BanListView>,
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl BanListSynchronizer {
    /// Spawn the synchronizer for a lobby.
    ///
    /// The update channel is scoped to the lobby code and follows the same
    /// backoff pattern as the presence channel, with its own independent
    /// attempt counter. The initial fetch happens once the channel is live,
    /// so updates broadcast during the fetch are not missed.
    pub fn spawn(
        transport: Arc<dyn ChannelTransport>,
        store: Arc<dyn VoteStore>,
        lobby: &LobbyCode,
        retry_config: RetryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (view_tx, view_rx) = watch::channel(BanListView {
            items: Vec::new(),
            loading: true,
            error: None,
        });
        let shared = Arc::new(Shared {
            state: Mutex::new(ListState {
                items: Vec::new(),
                loading: true,
                error: None,
            }),
            view_tx,
        });
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let actor = BanListActor {
            transport,
            store: Arc::clone(&store),
            topic: format!("banlist:{}", lobby),
            lobby: lobby.clone(),
            shared: Arc::clone(&shared),
            retry: RetryScheduler::new(retry_config),
            commands: cmd_tx.clone(),
        };
        let task = tokio::spawn(actor.run(cmd_rx));

        Self {
            store,
            lobby: lobby.clone(),
            clock,
            shared,
            view_rx,
            commands: cmd_tx,
            task,
        }
    }

    /// Subscribe to ban-list snapshots
    pub fn view(&self) -> watch::Receiver<BanListView> {
        self.view_rx.clone()
    }

    /// Toggle the ban state of an item on behalf of `actor_name`.
    ///
    /// The local flip is applied before the store call so the UI responds
    /// with zero perceived latency; on store failure the pre-toggle snapshot
    /// is restored exactly and the error is surfaced. Banning upserts a vote
    /// on the `(item, lobby)` natural key, so duplicate rapid bans from the
    /// same actor collapse to a single row; unbanning deletes the votes.
    pub async fn toggle_ban(&self, item_id: &str, actor_name: &str) -> Result<(), SyncError> {
        let now = self.clock.now_utc_millis();

        // Phase 1 + 2: snapshot, then optimistic apply
        let (snapshot, banning) = {
            let mut state = self.shared.state.lock().await;
            let Some(item) = state.items.iter_mut().find(|i| i.id == item_id) else {
                return Err(SyncError::ItemNotFound(item_id.to_string()));
            };
            let snapshot = item.clone();
            let banning = !item.is_banned;
            if banning {
                item.is_banned = true;
                item.banned_by = Some(actor_name.to_string());
                item.banned_at = Some(timestamp_to_rfc3339(now));
            } else {
                item.is_banned = false;
                item.banned_by = None;
                item.banned_at = None;
            }
            self.shared.publish(&state);
            (snapshot, banning)
        };

        // Phase 3: confirm against the store, or revert
        let result = if banning {
            self.store
                .upsert_ban_vote(BanVote {
                    item_id: item_id.to_string(),
                    lobby_code: self.lobby.as_str().to_string(),
                    voter: actor_name.to_string(),
                    created_at: now,
                })
                .await
        } else {
            self.store.delete_ban_votes(item_id, &self.lobby).await
        };

        if let Err(e) = result {
            tracing::warn!("Ban toggle for '{}' failed, rolling back: {}", item_id, e);
            let mut state = self.shared.state.lock().await;
            if let Some(item) = state.items.iter_mut().find(|i| i.id == item_id) {
                *item = snapshot;
            }
            let message = e.to_string();
            state.error = Some(message.clone());
            self.shared.publish(&state);
            return Err(SyncError::MutationConflict(message));
        }

        Ok(())
    }

    /// Re-fetch the item list and reset the channel retry budget.
    ///
    /// This is the manual refresh path after retries are exhausted.
    pub async fn refresh(&self) -> Result<(), SyncError> {
        fetch_all(&*self.store, &self.lobby, &self.shared).await?;
        let _ = self.commands.send(Command::Refresh);
        Ok(())
    }

    /// Unsubscribe from the update channel and cancel any pending retry
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown);
        let _ = self.task.await;
    }
}

/// Fetch every item with its lobby-scoped ban state and publish the result
async fn fetch_all(
    store: &dyn VoteStore,
    lobby: &LobbyCode,
    shared: &Shared,
) -> Result<(), SyncError> {
    {
        let mut state = shared.state.lock().await;
        state.loading = true;
        shared.publish(&state);
    }

    match store.fetch_items(lobby).await {
        Ok(rows) => {
            let mut items: Vec<BannableItem> = rows
                .into_iter()
                .map(|row| domain::derive_ban_state(row.item, row.latest_ban_vote.as_ref()))
                .collect();
            domain::sort_items(&mut items);

            let mut state = shared.state.lock().await;
            state.items = items;
            state.loading = false;
            state.error = None;
            shared.publish(&state);
            Ok(())
        }
        Err(e) => {
            let mut state = shared.state.lock().await;
            state.loading = false;
            state.error = Some(e.to_string());
            shared.publish(&state);
            Err(SyncError::Store(e))
        }
    }
}

struct BanListActor {
    transport: Arc<dyn ChannelTransport>,
    store: Arc<dyn VoteStore>,
    topic: String,
    lobby: LobbyCode,
    shared: Arc<Shared>,
    retry: RetryScheduler,
    commands: mpsc::UnboundedSender<Command>,
}

impl BanListActor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut handle: Option<Box<dyn ChannelHandle>> = None;
        let mut events: Option<mpsc::Receiver<ChannelEvent>> = None;

        self.connect(&mut handle, &mut events).await;

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Reconnect) => {
                        tracing::info!("Reconnecting update channel '{}'", self.topic);
                        self.teardown_channel(&mut handle, &mut events).await;
                        self.connect(&mut handle, &mut events).await;
                    }
                    Some(Command::Refresh) => {
                        tracing::info!("Manual refresh of update channel '{}'", self.topic);
                        self.retry.reset().await;
                        self.teardown_channel(&mut handle, &mut events).await;
                        self.connect(&mut handle, &mut events).await;
                    }
                    Some(Command::Shutdown) | None => {
                        self.retry.cancel().await;
                        self.teardown_channel(&mut handle, &mut events).await;
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
        match self
            .transport
            .subscribe(&self.topic, ChannelConfig::default())
            .await
        {
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
                self.retry.reset().await;
                tracing::info!("Update channel '{}' connected", self.topic);
                // Fetch after (re)subscribe so diffs missed while offline
                // are reconciled against the authoritative store
                if let Err(e) = fetch_all(&*self.store, &self.lobby, &self.shared).await {
                    tracing::warn!("Item fetch after subscribe failed: {}", e);
                }
            }
            ChannelEvent::Broadcast { event, payload } if event == ITEM_UPDATED_EVENT => {
                match serde_json::from_value::<BannableItem>(payload) {
                    Ok(updated) => self.apply_item_update(updated).await,
                    Err(e) => tracing::warn!("Malformed '{}' payload: {}", ITEM_UPDATED_EVENT, e),
                }
            }
            ChannelEvent::Broadcast { event, .. } => {
                tracing::debug!("Ignoring broadcast '{}' on update channel", event);
            }
            ChannelEvent::PresenceSync(_)
            | ChannelEvent::PresenceJoin(_)
            | ChannelEvent::PresenceLeave(_) => {}
            ChannelEvent::ChannelError(msg) => {
                self.handle_disconnect(msg, handle, events).await;
            }
            ChannelEvent::Closed => {
                self.handle_disconnect("channel closed".to_string(), handle, events)
                    .await;
            }
        }
    }

    /// The event payload is authoritative: it supersedes any optimistic
    /// local copy of the item wholesale.
    async fn apply_item_update(&self, updated: BannableItem) {
        let mut state = self.shared.state.lock().await;
        match state.items.iter_mut().find(|i| i.id == updated.id) {
            Some(item) => *item = updated,
            None => {
                tracing::debug!("Update for unknown item '{}' ignored", updated.id);
                return;
            }
        }
        domain::sort_items(&mut state.items);
        self.shared.publish(&state);
    }

    async fn handle_disconnect(
        &mut self,
        reason: String,
        handle: &mut Option<Box<dyn ChannelHandle>>,
        events: &mut Option<mpsc::Receiver<ChannelEvent>>,
    ) {
        tracing::warn!("Update channel '{}' lost: {}", self.topic, reason);
        self.teardown_channel(handle, events).await;

        {
            let mut state = self.shared.state.lock().await;
            state.error = Some(reason);
            self.shared.publish(&state);
        }

        let commands = self.commands.clone();
        let outcome = self
            .retry
            .schedule_retry(move || {
                let _ = commands.send(Command::Reconnect);
            })
            .await;
        if outcome == ScheduleOutcome::Exhausted {
            let mut state = self.shared.state.lock().await;
            state.error = Some(SyncError::ExhaustedRetries.to_string());
            self.shared.publish(&state);
        }
    }

    async fn teardown_channel(
        &mut self,
        handle: &mut Option<Box<dyn ChannelHandle>>,
        events: &mut Option<mpsc::Receiver<ChannelEvent>>,
    ) {
        *events = None;
        if let Some(mut h) = handle.take() {
            let _ = h.unsubscribe().await;
        }
    }
}

async fn recv_event(events: &mut Option<mpsc::Receiver<ChannelEvent>>) -> Option<ChannelEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
