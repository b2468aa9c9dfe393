//! Lobby session management: one validated lobby code gating both
//! synchronizers.
//!
//! The session owns its transport and store handles explicitly; they are
//! constructed per session and disposed on shutdown, so nothing leaks across
//! lobbies and teardown is deterministic. Changing lobby means shutting the
//! session down and joining a new one; synchronizers never migrate a live
//! scope.

use std::sync::Arc;

use tokio::sync::watch;

use banstage_shared::time::{Clock, SystemClock};

use crate::banlist::{BanListSynchronizer, BanListView};
use crate::error::SyncError;
use crate::lobby::LobbyCode;
use crate::presence::{PresenceSynchronizer, PresenceView, SelfPresence};
use crate::retry::RetryConfig;
use crate::store::VoteStore;
use crate::transport::ChannelTransport;

/// External collaborators a session is built on.
///
/// Presence and ban-state updates may ride the same transport or different
/// ones (e.g. WebSocket presence plus an SSE update stream).
pub struct SessionHandles {
    pub presence_transport: Arc<dyn ChannelTransport>,
    pub update_transport: Arc<dyn ChannelTransport>,
    pub store: Arc<dyn VoteStore>,
}

/// Session parameters
pub struct SessionConfig {
    /// Candidate lobby code; a fresh random code is generated when `None`
    pub lobby_code: Option<String>,
    /// Stable user identity tracked in presence
    pub user_id: String,
    /// Display name; a session may track no name
    pub display_name: Option<String>,
    /// Retry policy applied to both channels (independent counters)
    pub retry: RetryConfig,
    /// Clock used for presence and vote timestamps
    pub clock: Arc<dyn Clock>,
}

impl SessionConfig {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            lobby_code: None,
            user_id: user_id.into(),
            display_name: None,
            retry: RetryConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }
}

/// An active lobby session: one canonical code, one presence synchronizer,
/// one ban-list synchronizer.
pub struct LobbySession {
    code: LobbyCode,
    presence: PresenceSynchronizer,
    banlist: BanListSynchronizer,
}

impl LobbySession {
    /// Validate (or generate) the lobby code and activate both
    /// synchronizers scoped to it.
    ///
    /// An invalid candidate fails with [`SyncError::InvalidLobbyCode`]
    /// carrying the raw input; no synchronizer is activated in that case.
    pub async fn join(handles: SessionHandles, config: SessionConfig) -> Result<Self, SyncError> {
        let code = match &config.lobby_code {
            Some(candidate) => LobbyCode::parse(candidate)?,
            None => LobbyCode::generate(),
        };
        tracing::info!("Joining lobby {}", code);

        let presence = PresenceSynchronizer::spawn(
            handles.presence_transport,
            &code,
            SelfPresence {
                user_id: config.user_id,
                display_name: config.display_name,
            },
            config.retry.clone(),
            Arc::clone(&config.clock),
        );
        let banlist = BanListSynchronizer::spawn(
            handles.update_transport,
            handles.store,
            &code,
            config.retry,
            config.clock,
        );

        Ok(Self {
            code,
            presence,
            banlist,
        })
    }

    /// The canonical lobby code this session is scoped to
    pub fn lobby_code(&self) -> &LobbyCode {
        &self.code
    }

    /// Subscribe to roster snapshots
    pub fn presence_view(&self) -> watch::Receiver<PresenceView> {
        self.presence.view()
    }

    /// Subscribe to ban-list snapshots
    pub fn ban_list_view(&self) -> watch::Receiver<BanListView> {
        self.banlist.view()
    }

    /// Toggle an item's ban state on behalf of `actor_name`
    pub async fn toggle_ban(&self, item_id: &str, actor_name: &str) -> Result<(), SyncError> {
        self.banlist.toggle_ban(item_id, actor_name).await
    }

    /// Manual refresh of the ban list (restores the channel retry budget)
    pub async fn refresh_ban_list(&self) -> Result<(), SyncError> {
        self.banlist.refresh().await
    }

    /// Tear the session down: cancel pending retries, untrack presence,
    /// and unsubscribe both channels before dropping the handles.
    pub async fn shutdown(self) {
        tracing::info!("Leaving lobby {}", self.code);
        self.presence.shutdown().await;
        self.banlist.shutdown().await;
    }
}
