//! Realtime lobby synchronization client for Banstage.
//!
//! This library keeps a client in sync with a shared game lobby under
//! unreliable connectivity: a live roster of who is online, and a shared
//! list of bannable items mutated by votes. Both are resilient to channel
//! errors through exponential-backoff reconnection, and ban toggles are
//! applied optimistically with rollback on failure.
//!
//! The data store and the realtime transport are external collaborators
//! behind the [`store::VoteStore`] and [`transport::ChannelTransport`]
//! traits; `infrastructure` provides WebSocket, SSE, HTTP, and in-memory
//! implementations.

// core
pub mod banlist;
pub mod domain;
pub mod error;
pub mod lobby;
pub mod presence;
pub mod retry;
pub mod session;

// collaborator seams
pub mod store;
pub mod transport;

// concrete collaborators
pub mod infrastructure;

// peripheral conveniences
pub mod profile;

pub use banlist::{BanListSynchronizer, BanListView};
pub use domain::{BanVote, BannableItem, ConnectionState, PresenceRecord};
pub use error::SyncError;
pub use lobby::LobbyCode;
pub use presence::{PresenceSynchronizer, PresenceView};
pub use retry::{RetryConfig, RetryScheduler};
pub use session::{LobbySession, SessionConfig, SessionHandles};
