//! Domain model for lobby presence and ban state.
//!
//! This module contains the core records plus pure functions that implement
//! the reconciliation logic without side effects, making them easy to test.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use banstage_shared::time::timestamp_to_rfc3339;

/// A single connected session in a lobby.
///
/// One record per connection, not per user: a user with two tabs produces
/// two records sharing the same `id` under distinct session keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    /// Stable user identity
    pub id: String,
    /// Display name; a client may track no name
    pub name: Option<String>,
    /// RFC 3339 timestamp of when this session came online
    pub online_at: String,
}

/// Connection state of a realtime channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// A votable item with its lobby-scoped ban status.
///
/// Invariant: `is_banned == false` implies `banned_by` and `banned_at` are
/// `None`; `is_banned == true` implies both are `Some`. Ban status is derived
/// from the most recent ban vote for the item in the lobby, so toggling is
/// idempotent under concurrent writers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BannableItem {
    pub id: String,
    pub name: String,
    pub category: String,
    pub is_banned: bool,
    pub banned_by: Option<String>,
    pub banned_at: Option<String>,
}

/// A ban vote, keyed naturally by `(item_id, lobby_code)` for upsert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanVote {
    pub item_id: String,
    pub lobby_code: String,
    pub voter: String,
    /// Unix timestamp in UTC milliseconds; total order for latest-wins
    pub created_at: i64,
}

/// Build a per-connection presence key: user id plus a random session suffix
/// so multiple tabs from the same user coexist as distinct roster entries.
pub fn session_key(user_id: &str) -> String {
    format!("{}_{}", user_id, uuid::Uuid::new_v4())
}

/// Apply the ban state derived from the latest ban vote (or its absence)
/// onto a bare item. Absence of a vote means not banned.
pub fn derive_ban_state(mut item: BannableItem, latest_vote: Option<&BanVote>) -> BannableItem {
    match latest_vote {
        Some(vote) => {
            item.is_banned = true;
            item.banned_by = Some(vote.voter.clone());
            item.banned_at = Some(timestamp_to_rfc3339(vote.created_at));
        }
        None => {
            item.is_banned = false;
            item.banned_by = None;
            item.banned_at = None;
        }
    }
    item
}

/// Sort items by name for stable display ordering
pub fn sort_items(items: &mut [BannableItem]) {
    items.sort_by(|a, b| a.name.cmp(&b.name));
}

/// Replace the roster wholesale from an authoritative full-sync snapshot
pub fn roster_from_snapshot(
    entries: impl IntoIterator<Item = (String, PresenceRecord)>,
) -> HashMap<String, PresenceRecord> {
    entries.into_iter().collect()
}

/// Insert newly joined entries into the roster.
///
/// Keyed insertion makes a redelivered join idempotent: the same session key
/// never produces a duplicate entry.
pub fn apply_join(
    roster: &mut HashMap<String, PresenceRecord>,
    entries: impl IntoIterator<Item = (String, PresenceRecord)>,
) {
    for (key, record) in entries {
        roster.insert(key, record);
    }
}

/// Remove entries matching the left session keys
pub fn apply_leave<'a>(
    roster: &mut HashMap<String, PresenceRecord>,
    keys: impl IntoIterator<Item = &'a str>,
) {
    for key in keys {
        roster.remove(key);
    }
}

/// Flatten the roster into a display list sorted by session key for
/// consistent ordering
pub fn roster_to_list(roster: &HashMap<String, PresenceRecord>) -> Vec<PresenceRecord> {
    let mut keyed: Vec<(&String, &PresenceRecord)> = roster.iter().collect();
    keyed.sort_by(|a, b| a.0.cmp(b.0));
    keyed.into_iter().map(|(_, record)| record.clone()).collect()
}
