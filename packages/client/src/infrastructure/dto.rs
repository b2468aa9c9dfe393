//! Wire DTOs for the WebSocket channel protocol and the HTTP store API,
//! with conversions to and from the domain model.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{BanVote, BannableItem, PresenceRecord};
use crate::store::FetchedItem;
use crate::transport::PresenceEntry;

/// Frames the server pushes over a WebSocket channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    PresenceSync { entries: Vec<PresenceEntryDto> },
    PresenceJoin { entries: Vec<PresenceEntryDto> },
    PresenceLeave { keys: Vec<String> },
    Broadcast { event: String, payload: Value },
}

/// Frames the client sends over a WebSocket channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Track { payload: PresenceRecord },
    Untrack,
    Broadcast { event: String, payload: Value },
}

/// One roster entry on the wire: session key plus the tracked payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceEntryDto {
    pub key: String,
    pub id: String,
    pub name: Option<String>,
    pub online_at: String,
}

impl From<PresenceEntryDto> for PresenceEntry {
    fn from(dto: PresenceEntryDto) -> Self {
        Self {
            key: dto.key,
            record: PresenceRecord {
                id: dto.id,
                name: dto.name,
                online_at: dto.online_at,
            },
        }
    }
}

impl From<PresenceEntry> for PresenceEntryDto {
    fn from(entry: PresenceEntry) -> Self {
        Self {
            key: entry.key,
            id: entry.record.id,
            name: entry.record.name,
            online_at: entry.record.online_at,
        }
    }
}

/// One item row from `GET /items`, joined with the latest lobby-scoped
/// ban vote
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemWithVoteDto {
    pub id: String,
    pub name: String,
    pub category: String,
    pub latest_ban_vote: Option<BanVoteDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanVoteDto {
    pub item_id: String,
    pub lobby_code: String,
    pub voter: String,
    pub created_at: i64,
}

impl From<ItemWithVoteDto> for FetchedItem {
    fn from(dto: ItemWithVoteDto) -> Self {
        Self {
            item: BannableItem {
                id: dto.id,
                name: dto.name,
                category: dto.category,
                is_banned: false,
                banned_by: None,
                banned_at: None,
            },
            latest_ban_vote: dto.latest_ban_vote.map(Into::into),
        }
    }
}

impl From<BanVoteDto> for BanVote {
    fn from(dto: BanVoteDto) -> Self {
        Self {
            item_id: dto.item_id,
            lobby_code: dto.lobby_code,
            voter: dto.voter,
            created_at: dto.created_at,
        }
    }
}

impl From<BanVote> for BanVoteDto {
    fn from(vote: BanVote) -> Self {
        Self {
            item_id: vote.item_id,
            lobby_code: vote.lobby_code,
            voter: vote.voter,
            created_at: vote.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_frame_deserializes_tagged_presence_sync() {
        // given:
        let json = r#"{
            "type": "presence_sync",
            "entries": [
                {"key": "u1_abc", "id": "u1", "name": "Ann", "online_at": "2026-01-01T00:00:00+00:00"}
            ]
        }"#;

        // when:
        let frame: ServerFrame = serde_json::from_str(json).unwrap();

        // then:
        match frame {
            ServerFrame::PresenceSync { entries } => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].key, "u1_abc");
                assert_eq!(entries[0].name.as_deref(), Some("Ann"));
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_client_track_frame_serializes_payload() {
        // given:
        let frame = ClientFrame::Track {
            payload: PresenceRecord {
                id: "u1".to_string(),
                name: None,
                online_at: "2026-01-01T00:00:00+00:00".to_string(),
            },
        };

        // when:
        let json = serde_json::to_value(&frame).unwrap();

        // then:
        assert_eq!(json["type"], "track");
        assert_eq!(json["payload"]["id"], "u1");
        assert_eq!(json["payload"]["name"], Value::Null);
    }

    #[test]
    fn test_item_row_without_vote_converts_to_unbanned_item() {
        // given:
        let dto = ItemWithVoteDto {
            id: "1".to_string(),
            name: "Cleopatra".to_string(),
            category: "leader".to_string(),
            latest_ban_vote: None,
        };

        // when:
        let fetched: FetchedItem = dto.into();

        // then:
        assert!(!fetched.item.is_banned);
        assert!(fetched.latest_ban_vote.is_none());
    }
}
