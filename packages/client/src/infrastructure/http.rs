//! HTTP implementation of the vote store.
//!
//! Items are read through a lobby-scoped query joining each item with its
//! latest ban vote; votes are written through upsert/delete endpoints. The
//! server owns conflict ordering (last write wins by vote timestamp).

use async_trait::async_trait;

use crate::error::StoreError;
use crate::lobby::LobbyCode;
use crate::store::{FetchedItem, VoteStore};

use super::dto::{BanVoteDto, ItemWithVoteDto};

/// Vote store backed by the HTTP API
pub struct HttpVoteStore {
    base_url: String,
    client: reqwest::Client,
}

impl HttpVoteStore {
    /// `base_url` is the API root, e.g. `http://127.0.0.1:8787`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl VoteStore for HttpVoteStore {
    async fn fetch_items(&self, lobby: &LobbyCode) -> Result<Vec<FetchedItem>, StoreError> {
        let url = format!("{}/items?lobby={}", self.base_url, lobby);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        if !response.status().is_success() {
            return Err(StoreError::Query(format!("HTTP {}", response.status())));
        }

        let rows: Vec<ItemWithVoteDto> = response
            .json()
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn upsert_ban_vote(&self, vote: crate::domain::BanVote) -> Result<(), StoreError> {
        let url = format!("{}/votes", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&BanVoteDto::from(vote))
            .send()
            .await
            .map_err(|e| StoreError::Rejected(e.to_string()))?;
        if !response.status().is_success() {
            return Err(StoreError::Rejected(format!("HTTP {}", response.status())));
        }
        Ok(())
    }

    async fn delete_ban_votes(&self, item_id: &str, lobby: &LobbyCode) -> Result<(), StoreError> {
        let url = format!(
            "{}/votes?item_id={}&lobby={}",
            self.base_url, item_id, lobby
        );
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| StoreError::Rejected(e.to_string()))?;
        if !response.status().is_success() {
            return Err(StoreError::Rejected(format!("HTTP {}", response.status())));
        }
        Ok(())
    }
}
