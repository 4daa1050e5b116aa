//! Provider credentials: failure taxonomy, backoff curves, and the rotating
//! credential pool with persisted cooldowns.
//!
//! - [`FailureReason`]: the closed set of reasons a model call can fail
//! - [`backoff`]: reason-specific cooldown curve
//! - [`CredentialPool`]: round-robin selection skipping credentials in backoff
//! - [`CooldownStore`]: where cooldowns survive restarts (JSON file or memory)

pub mod backoff;
pub mod error;
pub mod pool;
pub mod reason;
pub mod store;

pub use {
    backoff::backoff,
    error::{Error, Result},
    pool::{CredentialPool, CredentialStatus, persist_key},
    reason::FailureReason,
    store::{CooldownRecord, CooldownStore, JsonFileStore, MemoryStore},
};
