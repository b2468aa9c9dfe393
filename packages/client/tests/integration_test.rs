//! Integration tests for the lobby synchronizers over the in-memory
//! transport and store.
//!
//! Tokio's paused clock drives the retry timers, so reconnection scenarios
//! run deterministically without wall-clock sleeps.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use banstage_client::banlist::{BanListSynchronizer, ITEM_UPDATED_EVENT};
use banstage_client::domain::{BanVote, BannableItem, PresenceRecord};
use banstage_client::error::SyncError;
use banstage_client::infrastructure::memory::{InMemoryTransport, InMemoryVoteStore};
use banstage_client::lobby::LobbyCode;
use banstage_client::presence::{PresenceSynchronizer, SelfPresence};
use banstage_client::retry::RetryConfig;
use banstage_client::session::{LobbySession, SessionConfig, SessionHandles};
use banstage_client::store::VoteStore;
use banstage_client::transport::{ChannelEvent, ChannelTransport, PresenceEntry};
use banstage_shared::time::SystemClock;

const LOBBY: &str = "ABC-123";
const PRESENCE_TOPIC: &str = "presence:ABC-123";
const BANLIST_TOPIC: &str = "banlist:ABC-123";

/// Wait until the view satisfies the predicate, or fail after 5 (paused)
/// seconds
async fn wait_for<T: Clone>(
    rx: &mut watch::Receiver<T>,
    predicate: impl Fn(&T) -> bool,
) -> T {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let view = rx.borrow();
                if predicate(&view) {
                    return view.clone();
                }
            }
            rx.changed().await.expect("view channel closed");
        }
    })
    .await
    .expect("condition not reached in time")
}

fn lobby() -> LobbyCode {
    LobbyCode::parse(LOBBY).unwrap()
}

fn entry(key: &str, user_id: &str, name: &str) -> PresenceEntry {
    PresenceEntry {
        key: key.to_string(),
        record: PresenceRecord {
            id: user_id.to_string(),
            name: Some(name.to_string()),
            online_at: "2026-01-01T00:00:00+00:00".to_string(),
        },
    }
}

fn item(id: &str, name: &str) -> BannableItem {
    BannableItem {
        id: id.to_string(),
        name: name.to_string(),
        category: "leader".to_string(),
        is_banned: false,
        banned_by: None,
        banned_at: None,
    }
}

fn presence_sync(
    transport: &Arc<InMemoryTransport>,
    retry: RetryConfig,
) -> PresenceSynchronizer {
    PresenceSynchronizer::spawn(
        Arc::clone(transport) as Arc<dyn ChannelTransport>,
        &lobby(),
        SelfPresence {
            user_id: "user-1".to_string(),
            display_name: Some("Alice".to_string()),
        },
        retry,
        Arc::new(SystemClock),
    )
}

fn banlist_sync(
    transport: &Arc<InMemoryTransport>,
    store: &Arc<InMemoryVoteStore>,
) -> BanListSynchronizer {
    BanListSynchronizer::spawn(
        Arc::clone(transport) as Arc<dyn ChannelTransport>,
        Arc::clone(store) as Arc<dyn VoteStore>,
        &lobby(),
        RetryConfig::default(),
        Arc::new(SystemClock),
    )
}

#[tokio::test(start_paused = true)]
async fn test_presence_connects_and_tracks_self() {
    // given:
    let transport = Arc::new(InMemoryTransport::new());
    let sync = presence_sync(&transport, RetryConfig::default());
    let mut view = sync.view();

    // when:
    wait_for(&mut view, |v| v.is_connected).await;

    // then: the self payload is tracked on the lobby-scoped topic
    let tracked = transport.tracked(PRESENCE_TOPIC).await.unwrap();
    assert_eq!(tracked.id, "user-1");
    assert_eq!(tracked.name.as_deref(), Some("Alice"));

    sync.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_roster_equals_last_sync_plus_later_diffs() {
    // given:
    let transport = Arc::new(InMemoryTransport::new());
    let sync = presence_sync(&transport, RetryConfig::default());
    let mut view = sync.view();
    wait_for(&mut view, |v| v.is_connected).await;

    // when: joins, then an authoritative full sync, then more diffs
    transport
        .push(
            PRESENCE_TOPIC,
            ChannelEvent::PresenceJoin(vec![entry("stale", "u9", "Ghost")]),
        )
        .await;
    transport
        .push(
            PRESENCE_TOPIC,
            ChannelEvent::PresenceSync(vec![entry("a", "u1", "Ann")]),
        )
        .await;
    transport
        .push(
            PRESENCE_TOPIC,
            ChannelEvent::PresenceJoin(vec![entry("b", "u2", "Bob")]),
        )
        .await;
    transport
        .push(PRESENCE_TOPIC, ChannelEvent::PresenceLeave(vec!["a".to_string()]))
        .await;

    // then: final roster is the last sync plus the diffs after it
    let final_view = wait_for(&mut view, |v| {
        v.connected_users.len() == 1 && v.connected_users[0].id == "u2"
    })
    .await;
    assert_eq!(final_view.connected_users[0].name.as_deref(), Some("Bob"));

    sync.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_two_tabs_of_one_user_show_as_two_entries() {
    // given:
    let transport = Arc::new(InMemoryTransport::new());
    let sync = presence_sync(&transport, RetryConfig::default());
    let mut view = sync.view();
    wait_for(&mut view, |v| v.is_connected).await;

    // when: the same user is tracked under two session keys
    transport
        .push(
            PRESENCE_TOPIC,
            ChannelEvent::PresenceSync(vec![
                entry("user-1_tab1", "user-1", "Alice"),
                entry("user-1_tab2", "user-1", "Alice"),
            ]),
        )
        .await;

    // then: the count reflects connections, not distinct people
    wait_for(&mut view, |v| v.connected_users.len() == 2).await;

    // and closing one tab drops the roster to one within a sync cycle
    transport
        .push(
            PRESENCE_TOPIC,
            ChannelEvent::PresenceLeave(vec!["user-1_tab1".to_string()]),
        )
        .await;
    let after = wait_for(&mut view, |v| v.connected_users.len() == 1).await;
    assert_eq!(after.connected_users[0].name.as_deref(), Some("Alice"));

    sync.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_presence_reconnects_after_channel_error() {
    // given: a connected synchronizer
    let transport = Arc::new(InMemoryTransport::new());
    let sync = presence_sync(&transport, RetryConfig::default());
    let mut view = sync.view();
    wait_for(&mut view, |v| v.is_connected).await;
    assert_eq!(transport.subscribe_count(PRESENCE_TOPIC).await, 1);

    // when: the channel fails
    transport.emit_error(PRESENCE_TOPIC, "boom").await;
    wait_for(&mut view, |v| v.is_reconnecting).await;

    // then: the backoff timer fires, the channel is recreated and re-tracked
    wait_for(&mut view, |v| v.is_connected).await;
    assert_eq!(transport.subscribe_count(PRESENCE_TOPIC).await, 2);
    assert!(transport.tracked(PRESENCE_TOPIC).await.is_some());

    sync.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_presence_exhausts_retries_to_disconnected() {
    // given: a transport that never accepts a subscription
    let transport = Arc::new(InMemoryTransport::new());
    transport.fail_next_subscribes(10);
    let retry = RetryConfig {
        max_retries: 2,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(1),
        jitter_factor: 0.0,
    };
    let sync = presence_sync(&transport, retry);
    let mut view = sync.view();

    // then: after the budget is spent the state is terminally disconnected
    let final_view = wait_for(&mut view, |v| {
        !v.is_reconnecting && v.last_error.is_some()
    })
    .await;
    assert!(!final_view.is_connected);
    assert_eq!(
        final_view.last_error.as_deref(),
        Some("reconnection attempts exhausted")
    );

    sync.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_presence_shutdown_untracks_and_unsubscribes() {
    // given:
    let transport = Arc::new(InMemoryTransport::new());
    let sync = presence_sync(&transport, RetryConfig::default());
    let mut view = sync.view();
    wait_for(&mut view, |v| v.is_connected).await;
    assert!(transport.tracked(PRESENCE_TOPIC).await.is_some());

    // when:
    sync.shutdown().await;

    // then: peers see the departure immediately
    assert!(transport.tracked(PRESENCE_TOPIC).await.is_none());
    assert!(transport.unsubscribe_count(PRESENCE_TOPIC).await >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_ban_list_fetch_derives_state_from_latest_vote() {
    // given: one prior ban vote from Alice on item X
    let transport = Arc::new(InMemoryTransport::new());
    let store = Arc::new(InMemoryVoteStore::new(vec![
        item("x", "Trajan"),
        item("y", "Cleopatra"),
    ]));
    store
        .upsert_ban_vote(BanVote {
            item_id: "x".to_string(),
            lobby_code: LOBBY.to_string(),
            voter: "Alice".to_string(),
            created_at: 1_000,
        })
        .await
        .unwrap();

    // when:
    let sync = banlist_sync(&transport, &store);
    let mut view = sync.view();
    let loaded = wait_for(&mut view, |v| !v.loading && v.items.len() == 2).await;

    // then: sorted by name, ban state derived from the vote
    assert_eq!(loaded.items[0].name, "Cleopatra");
    assert!(!loaded.items[0].is_banned);
    assert_eq!(loaded.items[1].name, "Trajan");
    assert!(loaded.items[1].is_banned);
    assert_eq!(loaded.items[1].banned_by.as_deref(), Some("Alice"));

    sync.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_toggle_ban_round_trip_restores_unbanned_state() {
    // given:
    let transport = Arc::new(InMemoryTransport::new());
    let store = Arc::new(InMemoryVoteStore::new(vec![item("x", "Trajan")]));
    let sync = banlist_sync(&transport, &store);
    let mut view = sync.view();
    wait_for(&mut view, |v| !v.loading).await;

    // when: ban then unban by the same actor
    sync.toggle_ban("x", "Alice").await.unwrap();
    assert_eq!(store.votes_for("x", &lobby()).await.len(), 1);
    sync.toggle_ban("x", "Alice").await.unwrap();

    // then:
    let after = view.borrow().clone();
    assert!(!after.items[0].is_banned);
    assert_eq!(after.items[0].banned_by, None);
    assert_eq!(after.items[0].banned_at, None);
    assert!(store.votes_for("x", &lobby()).await.is_empty());

    sync.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_toggle_ban_rolls_back_on_store_failure() {
    // given:
    let transport = Arc::new(InMemoryTransport::new());
    let store = Arc::new(InMemoryVoteStore::new(vec![item("x", "Trajan")]));
    let sync = banlist_sync(&transport, &store);
    let mut view = sync.view();
    wait_for(&mut view, |v| !v.loading).await;
    let before = view.borrow().items.clone();

    // when: the store rejects the mutation
    store.fail_writes(true);
    let result = sync.toggle_ban("x", "Alice").await;

    // then: local state after rollback exactly equals the pre-call state
    assert!(matches!(result, Err(SyncError::MutationConflict(_))));
    assert_eq!(view.borrow().items, before);
    assert!(store.votes_for("x", &lobby()).await.is_empty());

    sync.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_later_vote_wins_via_live_update() {
    // given: Alice banned X locally
    let transport = Arc::new(InMemoryTransport::new());
    let store = Arc::new(InMemoryVoteStore::new(vec![item("x", "Trajan")]));
    let sync = banlist_sync(&transport, &store);
    let mut view = sync.view();
    wait_for(&mut view, |v| !v.loading).await;
    sync.toggle_ban("x", "Alice").await.unwrap();

    // when: a later ban vote from Bob becomes authoritative and is pushed
    let mut authoritative = item("x", "Trajan");
    authoritative.is_banned = true;
    authoritative.banned_by = Some("Bob".to_string());
    authoritative.banned_at = Some("2026-01-01T00:00:01+00:00".to_string());
    transport
        .push(
            BANLIST_TOPIC,
            ChannelEvent::Broadcast {
                event: ITEM_UPDATED_EVENT.to_string(),
                payload: serde_json::to_value(&authoritative).unwrap(),
            },
        )
        .await;

    // then: the pushed payload supersedes the optimistic copy wholesale
    let after = wait_for(&mut view, |v| {
        v.items[0].banned_by.as_deref() == Some("Bob")
    })
    .await;
    assert_eq!(after.items[0], authoritative);

    sync.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_update_channel_reconnects_and_refetches() {
    // given:
    let transport = Arc::new(InMemoryTransport::new());
    let store = Arc::new(InMemoryVoteStore::new(vec![item("x", "Trajan")]));
    let sync = banlist_sync(&transport, &store);
    let mut view = sync.view();
    wait_for(&mut view, |v| !v.loading).await;

    // when: a vote lands while the channel is down
    store
        .upsert_ban_vote(BanVote {
            item_id: "x".to_string(),
            lobby_code: LOBBY.to_string(),
            voter: "Bob".to_string(),
            created_at: 2_000,
        })
        .await
        .unwrap();
    transport.emit_error(BANLIST_TOPIC, "boom").await;

    // then: the channel reconnects and the missed change is reconciled by
    // the post-subscribe fetch
    let after = wait_for(&mut view, |v| v.items[0].is_banned).await;
    assert_eq!(after.items[0].banned_by.as_deref(), Some("Bob"));
    assert!(transport.subscribe_count(BANLIST_TOPIC).await >= 2);

    sync.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_session_rejects_invalid_lobby_code() {
    // given:
    let transport = Arc::new(InMemoryTransport::new());
    let store = Arc::new(InMemoryVoteStore::new(Vec::new()));
    let mut config = SessionConfig::new("user-1");
    config.lobby_code = Some("ab-123".to_string());

    // when:
    let result = LobbySession::join(
        SessionHandles {
            presence_transport: Arc::clone(&transport) as Arc<dyn ChannelTransport>,
            update_transport: Arc::clone(&transport) as Arc<dyn ChannelTransport>,
            store: store as Arc<dyn VoteStore>,
        },
        config,
    )
    .await;

    // then: the raw candidate is surfaced and no synchronizer was activated
    assert!(matches!(
        result,
        Err(SyncError::InvalidLobbyCode(raw)) if raw == "ab-123"
    ));
    assert_eq!(transport.subscribe_count("presence:AB-123").await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_session_normalizes_code_and_activates_both_channels() {
    // given:
    let transport = Arc::new(InMemoryTransport::new());
    let store = Arc::new(InMemoryVoteStore::new(vec![item("x", "Trajan")]));
    let mut config = SessionConfig::new("user-1");
    config.lobby_code = Some("abc-123".to_string());
    config.display_name = Some("Alice".to_string());

    // when:
    let session = LobbySession::join(
        SessionHandles {
            presence_transport: Arc::clone(&transport) as Arc<dyn ChannelTransport>,
            update_transport: Arc::clone(&transport) as Arc<dyn ChannelTransport>,
            store: Arc::clone(&store) as Arc<dyn VoteStore>,
        },
        config,
    )
    .await
    .unwrap();

    // then: one canonical uppercase code scopes both channels
    assert_eq!(session.lobby_code().as_str(), "ABC-123");
    let mut presence = session.presence_view();
    let mut ban_list = session.ban_list_view();
    wait_for(&mut presence, |v| v.is_connected).await;
    wait_for(&mut ban_list, |v| !v.loading).await;
    assert_eq!(transport.subscribe_count(PRESENCE_TOPIC).await, 1);
    assert_eq!(transport.subscribe_count(BANLIST_TOPIC).await, 1);

    // and toggling through the session hits the store
    session.toggle_ban("x", "Alice").await.unwrap();
    assert_eq!(store.votes_for("x", &lobby()).await.len(), 1);

    session.shutdown().await;
    assert!(transport.tracked(PRESENCE_TOPIC).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_session_generates_a_valid_code_when_none_supplied() {
    // given:
    let transport = Arc::new(InMemoryTransport::new());
    let store = Arc::new(InMemoryVoteStore::new(Vec::new()));

    // when:
    let session = LobbySession::join(
        SessionHandles {
            presence_transport: Arc::clone(&transport) as Arc<dyn ChannelTransport>,
            update_transport: Arc::clone(&transport) as Arc<dyn ChannelTransport>,
            store: store as Arc<dyn VoteStore>,
        },
        SessionConfig::new("user-1"),
    )
    .await
    .unwrap();

    // then:
    assert!(LobbyCode::parse(session.lobby_code().as_str()).is_ok());

    session.shutdown().await;
}
