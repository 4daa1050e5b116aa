//! Route inbound messages to agents and build session keys.
//!
//! Binding cascade (precedence):
//! 1. Peer binding (channel + peer, optionally account)
//! 2. Account binding (channel + account)
//! 3. Channel binding (channel, any account)
//! 4. Default agent (`agents.defaults.id`)

pub mod error;
pub mod resolve;

pub use {
    error::{Error, Result},
    resolve::{MatchedBy, ResolvedRoute, derive_session_key, resolve_agent, resolve_route},
};
