use std::{collections::HashMap, sync::Arc};

use tracing::debug;

use crate::{
    error::{Error, Result},
    plugin::{ChannelCapabilities, ChannelOutbound},
};

/// Outbound adapters keyed by channel id.
#[derive(Default, Clone)]
pub struct ChannelRegistry {
    outbounds: HashMap<String, Arc<dyn ChannelOutbound>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, channel_id: impl Into<String>, outbound: Arc<dyn ChannelOutbound>) {
        let channel_id = channel_id.into();
        debug!(channel = %channel_id, caps = ?outbound.capabilities(), "channel registered");
        self.outbounds.insert(channel_id, outbound);
    }

    pub fn get(&self, channel_id: &str) -> Option<Arc<dyn ChannelOutbound>> {
        self.outbounds.get(channel_id).cloned()
    }

    pub fn require(&self, channel_id: &str) -> Result<Arc<dyn ChannelOutbound>> {
        self.get(channel_id)
            .ok_or_else(|| Error::unknown_channel(channel_id))
    }

    pub fn capabilities(&self, channel_id: &str) -> Option<ChannelCapabilities> {
        self.outbounds.get(channel_id).map(|o| o.capabilities())
    }

    pub fn list(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.outbounds.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.outbounds.is_empty()
    }
}
