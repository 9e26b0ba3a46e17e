//! JSON file-backed channel store with atomic writes.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use {
    async_trait::async_trait,
    serde::Deserialize,
    streamsaver_config::{ChannelConfig, Quality},
    tokio::{fs, sync::Mutex},
    tracing::debug,
};

use crate::{Error, Result, store::ChannelStore, types::StoredChannel};

/// File-backed store. All channels in a single JSON array.
///
/// Every mutation rewrites the whole file, so mutations hold `write_lock`
/// from read to rename.
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

/// On-disk layouts accepted when loading. Writes always use `List`.
#[derive(Deserialize)]
#[serde(untagged)]
enum ChannelsFile {
    List(Vec<StoredChannel>),
    /// Older files keyed channels by id: `{ "<id>": { "alias": .., "quality": .. } }`.
    Legacy(BTreeMap<String, LegacyEntry>),
}

#[derive(Deserialize)]
struct LegacyEntry {
    #[serde(default)]
    alias: Option<String>,
    #[serde(default)]
    quality: Quality,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn dir(&self) -> &Path {
        self.path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
    }

    /// Atomic write: write a uniquely named temp file, keep a `.bak` copy of
    /// the previous version, rename over the target.
    async fn atomic_write(&self, channels: &[StoredChannel]) -> Result<()> {
        let dir = self.dir();
        fs::create_dir_all(dir).await?;
        let json = serde_json::to_string_pretty(channels)?;

        let tmp = tempfile::Builder::new()
            .prefix(".channels-")
            .suffix(".tmp")
            .tempfile_in(dir)?;
        fs::write(tmp.path(), json.as_bytes()).await?;

        // Copy, not rename: readers must always find the file.
        if fs::try_exists(&self.path).await.unwrap_or(false) {
            let bak = self.path.with_extension("json.bak");
            if let Err(e) = fs::copy(&self.path, &bak).await {
                debug!(path = %bak.display(), error = %e, "backup failed");
            }
        }

        tmp.persist(&self.path).map_err(|e| e.error)?;
        debug!(path = %self.path.display(), count = channels.len(), "saved channels");
        Ok(())
    }

    async fn read_channels(&self) -> Result<Vec<StoredChannel>> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&self.path).await?;
        if data.trim().is_empty() {
            return Ok(Vec::new());
        }
        let parsed: ChannelsFile = serde_json::from_str(&data).map_err(|e| {
            Error::external(format!("failed to parse {}", self.path.display()), e)
        })?;
        Ok(match parsed {
            ChannelsFile::List(channels) => channels,
            ChannelsFile::Legacy(map) => map
                .into_iter()
                .map(|(id, entry)| StoredChannel {
                    config: ChannelConfig {
                        id,
                        alias: entry.alias,
                        quality: entry.quality,
                    },
                    created_at_ms: 0,
                    updated_at_ms: 0,
                })
                .collect(),
        })
    }
}

#[async_trait]
impl ChannelStore for FileStore {
    async fn load_channels(&self) -> Result<Vec<StoredChannel>> {
        let _guard = self.write_lock.lock().await;
        self.read_channels().await
    }

    async fn save_channel(&self, channel: &StoredChannel) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut channels = self.read_channels().await?;
        // Replace existing or append.
        if let Some(pos) = channels
            .iter()
            .position(|c| c.config.id == channel.config.id)
        {
            channels[pos] = channel.clone();
        } else {
            channels.push(channel.clone());
        }
        self.atomic_write(&channels).await
    }

    async fn update_channel(&self, channel: &StoredChannel) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut channels = self.read_channels().await?;
        let pos = channels
            .iter()
            .position(|c| c.config.id == channel.config.id)
            .ok_or_else(|| Error::not_found(&channel.config.id))?;
        channels[pos] = channel.clone();
        self.atomic_write(&channels).await
    }

    async fn delete_channel(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut channels = self.read_channels().await?;
        let before = channels.len();
        channels.retain(|c| c.config.id != id);
        if channels.len() == before {
            return Err(Error::not_found(id));
        }
        self.atomic_write(&channels).await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, std::path::Path, tempfile::TempDir};

    fn make_store(dir: &Path) -> FileStore {
        FileStore::new(dir.join("channels.json"))
    }

    fn make_channel(id: &str) -> StoredChannel {
        StoredChannel {
            config: ChannelConfig::new(id),
            created_at_ms: 1000,
            updated_at_ms: 1000,
        }
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = make_store(tmp.path());

        store.save_channel(&make_channel("1")).await.unwrap();
        store.save_channel(&make_channel("2")).await.unwrap();

        let channels = store.load_channels().await.unwrap();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[1].config.id, "2");
    }

    #[tokio::test]
    async fn test_file_store_delete() {
        let tmp = TempDir::new().unwrap();
        let store = make_store(tmp.path());

        store.save_channel(&make_channel("1")).await.unwrap();
        store.delete_channel("1").await.unwrap();
        assert!(store.load_channels().await.unwrap().is_empty());
        assert!(store.delete_channel("1").await.is_err());
    }

    #[tokio::test]
    async fn test_file_store_backup_created() {
        let tmp = TempDir::new().unwrap();
        let store = make_store(tmp.path());

        store.save_channel(&make_channel("1")).await.unwrap();
        store.save_channel(&make_channel("2")).await.unwrap();

        assert!(tmp.path().join("channels.json.bak").exists());
        assert_eq!(leftover_temp_files(tmp.path()), 0);
    }

    fn leftover_temp_files(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .ends_with(".tmp")
            })
            .count()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_file_store_concurrent_saves_keep_every_channel() {
        let tmp = TempDir::new().unwrap();
        let store = std::sync::Arc::new(make_store(tmp.path()));

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let store = std::sync::Arc::clone(&store);
                tokio::spawn(async move {
                    store.save_channel(&make_channel(&format!("c{i}"))).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let mut ids: Vec<String> = store
            .load_channels()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.config.id)
            .collect();
        ids.sort();
        let mut expected: Vec<String> = (0..20).map(|i| format!("c{i}")).collect();
        expected.sort();
        assert_eq!(ids, expected);
        assert_eq!(leftover_temp_files(tmp.path()), 0);
    }

    #[tokio::test]
    async fn test_file_store_load_missing_or_empty() {
        let tmp = TempDir::new().unwrap();
        let store = make_store(tmp.path());
        assert!(store.load_channels().await.unwrap().is_empty());

        std::fs::write(tmp.path().join("channels.json"), "  \n").unwrap();
        assert!(store.load_channels().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_update() {
        let tmp = TempDir::new().unwrap();
        let store = make_store(tmp.path());

        store.save_channel(&make_channel("1")).await.unwrap();
        let mut ch = make_channel("1");
        ch.config.quality = Quality::P480;
        store.update_channel(&ch).await.unwrap();

        let channels = store.load_channels().await.unwrap();
        assert_eq!(channels[0].config.quality, Quality::P480);
        assert!(store.update_channel(&make_channel("2")).await.is_err());
    }

    #[tokio::test]
    async fn test_file_store_reads_legacy_map() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("channels.json"),
            r#"{ "night_show": { "alias": "Night", "quality": "720" }, "daily": {} }"#,
        )
        .unwrap();
        let store = make_store(tmp.path());

        let channels = store.load_channels().await.unwrap();
        assert_eq!(channels.len(), 2);
        let night = channels
            .iter()
            .find(|c| c.config.id == "night_show")
            .unwrap();
        assert_eq!(night.config.alias.as_deref(), Some("Night"));
        assert_eq!(night.config.quality, Quality::P720);

        // The next write migrates to the list layout.
        store.save_channel(&make_channel("new")).await.unwrap();
        let raw = std::fs::read_to_string(tmp.path().join("channels.json")).unwrap();
        assert!(raw.trim_start().starts_with('['));
        assert_eq!(store.load_channels().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_file_store_rejects_garbage() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("channels.json"), "[{\"nope\": 1}]").unwrap();
        assert!(make_store(tmp.path()).load_channels().await.is_err());
    }
}
