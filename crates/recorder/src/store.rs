//! Persistence trait for the tracked channel list.

use async_trait::async_trait;

use crate::{Result, types::StoredChannel};

/// Persistence backend for channel configuration.
///
/// Only configuration and bookkeeping timestamps are persisted; runtime state
/// always starts over as `Idle`.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    async fn load_channels(&self) -> Result<Vec<StoredChannel>>;
    async fn save_channel(&self, channel: &StoredChannel) -> Result<()>;
    async fn update_channel(&self, channel: &StoredChannel) -> Result<()>;
    async fn delete_channel(&self, id: &str) -> Result<()>;
}
