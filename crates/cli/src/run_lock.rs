//! Advisory lock next to the channels file.
//!
//! `streamsaver run` holds it for its whole lifetime and the commands that
//! change the channel list take it for the duration of the edit. A running
//! recorder owns its channels: edits from another process would skip its busy
//! checks, never cancel its captures and never reach its scan loop.

use std::{
    ffi::OsString,
    fs::{File, OpenOptions},
    io::ErrorKind,
    path::{Path, PathBuf},
};

use {
    anyhow::{Context, Result, bail},
    fd_lock::{RwLock, RwLockWriteGuard},
};

pub(crate) struct ChannelsLock {
    path: PathBuf,
    lock: RwLock<File>,
}

impl ChannelsLock {
    pub(crate) fn open(channels_file: &Path) -> Result<Self> {
        let path = lock_path(channels_file);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        Ok(Self {
            path,
            lock: RwLock::new(file),
        })
    }

    /// Held by `run` until it exits.
    pub(crate) fn lock_for_run(&mut self) -> Result<RwLockWriteGuard<'_, File>> {
        let path = self.path.display().to_string();
        match self.lock.try_write() {
            Ok(guard) => Ok(guard),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                bail!("another streamsaver process is using the channel list ({path})")
            },
            Err(e) => Err(e).with_context(|| format!("failed to lock {path}")),
        }
    }

    /// Held while `channels add|remove|update` rewrites the list.
    pub(crate) fn lock_for_edit(&mut self) -> Result<RwLockWriteGuard<'_, File>> {
        let path = self.path.display().to_string();
        match self.lock.try_write() {
            Ok(guard) => Ok(guard),
            Err(e) if e.kind() == ErrorKind::WouldBlock => bail!(
                "`streamsaver run` is active ({path}); stop it before changing channels"
            ),
            Err(e) => Err(e).with_context(|| format!("failed to lock {path}")),
        }
    }
}

fn lock_path(channels_file: &Path) -> PathBuf {
    let mut name = OsString::from(channels_file.as_os_str());
    name.push(".lock");
    PathBuf::from(name)
}
