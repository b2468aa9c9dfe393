//! Shared utilities for the Banstage workspace.
//!
//! This crate holds the pieces that both the library core and the binaries
//! need: a clock abstraction for testable timestamps and tracing setup.

pub mod logger;
pub mod time;
