//! Concrete implementations of the transport and store seams.
//!
//! - [`websocket`]: full channel transport (presence + broadcast) over
//!   tokio-tungstenite
//! - [`sse`]: broadcast-only transport over a long-lived HTTP event stream
//! - [`http`]: vote store backed by the HTTP API
//! - [`memory`]: scriptable in-memory transport and store used by tests

pub mod dto;
pub mod http;
pub mod memory;
pub mod sse;
pub mod websocket;
