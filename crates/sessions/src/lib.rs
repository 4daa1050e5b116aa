//! Session keys and the registry of live session handles.
//!
//! A handle is reused until the configured [`StalenessPolicy`] says
//! otherwise (manual, daily reset hour, or idle timeout), then disposed and
//! replaced.

pub mod error;
pub mod key;
pub mod registry;
pub mod staleness;

pub use {
    error::{Error, Result},
    key::SessionKey,
    registry::{Acquired, SessionRegistry, SharedHandle},
    staleness::StalenessPolicy,
};
