//! Lobby codes: validation, normalization, and generation.
//!
//! A lobby code is the scope key for every channel and query in a session,
//! so it is validated and normalized once, up front. The canonical form is
//! uppercase `XXX-XXX` over `[A-Z0-9]`.

use rand::Rng;

use crate::error::SyncError;

/// Character set used for generated lobby codes (uniform distribution)
const LOBBY_CODE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of each segment on either side of the dash
const SEGMENT_LEN: usize = 3;

/// A validated, canonical (uppercase `XXX-XXX`) lobby code.
///
/// Invariant: a `LobbyCode` always matches the canonical shape; invalid
/// candidates never get past [`LobbyCode::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LobbyCode(String);

impl LobbyCode {
    /// Parse a candidate string into a canonical lobby code.
    ///
    /// Input is case-insensitive and surrounding whitespace is ignored.
    /// On failure the raw candidate is carried in the error for display.
    pub fn parse(candidate: &str) -> Result<Self, SyncError> {
        let trimmed = candidate.trim();
        if trimmed.is_empty() {
            return Err(SyncError::InvalidLobbyCode(candidate.to_string()));
        }

        let normalized = trimmed.to_ascii_uppercase();
        if Self::is_valid_shape(&normalized) {
            Ok(Self(normalized))
        } else {
            Err(SyncError::InvalidLobbyCode(candidate.to_string()))
        }
    }

    /// Generate a fresh random lobby code using the thread-local RNG
    pub fn generate() -> Self {
        Self::generate_with(&mut rand::thread_rng())
    }

    /// Generate a fresh random lobby code from the given RNG source
    pub fn generate_with<R: Rng>(rng: &mut R) -> Self {
        let mut code = String::with_capacity(SEGMENT_LEN * 2 + 1);
        for i in 0..(SEGMENT_LEN * 2) {
            if i == SEGMENT_LEN {
                code.push('-');
            }
            let idx = rng.gen_range(0..LOBBY_CODE_CHARS.len());
            code.push(LOBBY_CODE_CHARS[idx] as char);
        }
        Self(code)
    }

    /// Get the canonical code as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_valid_shape(code: &str) -> bool {
        let bytes = code.as_bytes();
        if bytes.len() != SEGMENT_LEN * 2 + 1 {
            return false;
        }
        bytes.iter().enumerate().all(|(i, b)| {
            if i == SEGMENT_LEN {
                *b == b'-'
            } else {
                b.is_ascii_uppercase() || b.is_ascii_digit()
            }
        })
    }
}

impl std::fmt::Display for LobbyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for LobbyCode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
