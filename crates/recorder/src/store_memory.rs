//! In-memory store for testing.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::{Error, Result, store::ChannelStore, types::StoredChannel};

/// In-memory store backed by a `Vec`. No persistence, for tests only.
pub struct InMemoryStore {
    channels: Mutex<Vec<StoredChannel>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(Vec::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelStore for InMemoryStore {
    async fn load_channels(&self) -> Result<Vec<StoredChannel>> {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        Ok(channels.clone())
    }

    async fn save_channel(&self, channel: &StoredChannel) -> Result<()> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        match channels.iter_mut().find(|c| c.config.id == channel.config.id) {
            Some(existing) => *existing = channel.clone(),
            None => channels.push(channel.clone()),
        }
        Ok(())
    }

    async fn update_channel(&self, channel: &StoredChannel) -> Result<()> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let existing = channels
            .iter_mut()
            .find(|c| c.config.id == channel.config.id)
            .ok_or_else(|| Error::not_found(&channel.config.id))?;
        *existing = channel.clone();
        Ok(())
    }

    async fn delete_channel(&self, id: &str) -> Result<()> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let before = channels.len();
        channels.retain(|c| c.config.id != id);
        if channels.len() == before {
            return Err(Error::not_found(id));
        }
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, streamsaver_config::ChannelConfig};

    fn make_channel(id: &str) -> StoredChannel {
        StoredChannel {
            config: ChannelConfig::new(id),
            created_at_ms: 1000,
            updated_at_ms: 1000,
        }
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let store = InMemoryStore::new();
        store.save_channel(&make_channel("1")).await.unwrap();
        store.save_channel(&make_channel("2")).await.unwrap();

        let channels = store.load_channels().await.unwrap();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].config.id, "1");
    }

    #[tokio::test]
    async fn test_save_replaces_existing() {
        let store = InMemoryStore::new();
        store.save_channel(&make_channel("1")).await.unwrap();
        let mut ch = make_channel("1");
        ch.config.alias = Some("replaced".into());
        store.save_channel(&ch).await.unwrap();

        let channels = store.load_channels().await.unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].config.alias.as_deref(), Some("replaced"));
    }

    #[tokio::test]
    async fn test_delete() {
        let store = InMemoryStore::new();
        store.save_channel(&make_channel("1")).await.unwrap();
        store.delete_channel("1").await.unwrap();
        assert!(store.load_channels().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_not_found() {
        let store = InMemoryStore::new();
        assert!(store.delete_channel("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_update_not_found() {
        let store = InMemoryStore::new();
        assert!(store.update_channel(&make_channel("1")).await.is_err());
    }
}
