//! Channel outbound adapters.
//!
//! Each messaging platform implements [`ChannelOutbound`] and describes its
//! limits with [`ChannelCapabilities`]; the dispatcher looks adapters up in a
//! [`ChannelRegistry`] by channel id.

pub mod error;
pub mod memory;
pub mod plugin;
pub mod registry;

pub use {
    error::{Error, Result},
    memory::{MemoryOutbound, Sent},
    plugin::{ChannelCapabilities, ChannelOutbound, ChannelReplyTarget, DEFAULT_MAX_TEXT_LEN},
    registry::ChannelRegistry,
};
