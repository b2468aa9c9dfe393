//! Data store seam for items and ban votes.
//!
//! The authoritative copy of the item list and the vote rows lives in an
//! external store; the client only sees it through this trait. Ban status is
//! never stored as a mutable flag client-side: it is derived from the most
//! recent ban vote per `(item, lobby)`, which makes repeated toggles
//! idempotent under concurrent writers.

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::domain::{BanVote, BannableItem};
use crate::error::StoreError;
use crate::lobby::LobbyCode;

/// A bare item row plus the latest ban vote for it within a lobby
/// (`None` when no vote exists, meaning not banned)
#[derive(Debug, Clone)]
pub struct FetchedItem {
    pub item: BannableItem,
    pub latest_ban_vote: Option<BanVote>,
}

/// Store operations the synchronizers need
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VoteStore: Send + Sync {
    /// Fetch every item together with its most recent ban vote scoped to
    /// the given lobby
    async fn fetch_items(&self, lobby: &LobbyCode) -> Result<Vec<FetchedItem>, StoreError>;

    /// Insert or update the ban vote for the vote's `(item_id, lobby_code)`
    /// natural key. Upsert semantics collapse duplicate rapid bans from the
    /// same actor into a single row.
    async fn upsert_ban_vote(&self, vote: BanVote) -> Result<(), StoreError>;

    /// Delete all ban votes for the item within the lobby (unban)
    async fn delete_ban_votes(&self, item_id: &str, lobby: &LobbyCode) -> Result<(), StoreError>;
}
