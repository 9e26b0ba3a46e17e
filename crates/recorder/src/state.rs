//! Authoritative in-memory channel registry.
//!
//! Every mutation happens under one write lock, so a state transition is an
//! atomic compare-and-set and two callers can never both move a channel out
//! of the same state.

use std::sync::{Arc, RwLock};

use streamsaver_config::ChannelConfig;

use crate::{
    Error, Result,
    events::{ChannelEvent, EventBus, EventKind},
    types::{Channel, ChannelPatch, ChannelState, now_ms},
};

/// Channel records in insertion order.
pub struct ChannelStateStore {
    channels: RwLock<Vec<Channel>>,
    events: Arc<EventBus>,
}

impl ChannelStateStore {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            channels: RwLock::new(Vec::new()),
            events,
        }
    }

    /// Insert a new channel in `Idle`. Rejects duplicate ids.
    pub fn add(&self, config: ChannelConfig) -> Result<Channel> {
        self.insert(Channel::new(config))
    }

    /// Insert a channel restored from persistence. Runtime state is reset.
    pub fn insert(&self, mut channel: Channel) -> Result<Channel> {
        let id = channel.config.id.trim().to_string();
        if id.is_empty() {
            return Err(Error::invalid_config("channel id must not be empty"));
        }
        channel.config.id = id;
        channel.state = ChannelState::Idle;
        channel.recording_started_at_ms = None;

        let mut channels = self.write();
        if channels.iter().any(|c| c.config.id == channel.config.id) {
            return Err(Error::duplicate(channel.config.id));
        }
        channels.push(channel.clone());
        Ok(channel)
    }

    /// Remove a channel regardless of its state. The caller is responsible for
    /// cancelling any in-flight work first.
    pub fn remove(&self, id: &str) -> Result<Channel> {
        let mut channels = self.write();
        let pos = channels
            .iter()
            .position(|c| c.config.id == id)
            .ok_or_else(|| Error::not_found(id))?;
        Ok(channels.remove(pos))
    }

    /// Apply a configuration patch. Rejected while the channel holds a slot.
    pub fn update_config(&self, id: &str, patch: &ChannelPatch) -> Result<Channel> {
        let mut channels = self.write();
        let ch = find_mut(&mut channels, id)?;
        if ch.state.is_busy() {
            return Err(Error::busy(id, ch.state));
        }
        patch.apply(&mut ch.config);
        ch.updated_at_ms = now_ms();
        Ok(ch.clone())
    }

    pub fn get(&self, id: &str) -> Result<Channel> {
        self.read()
            .iter()
            .find(|c| c.config.id == id)
            .cloned()
            .ok_or_else(|| Error::not_found(id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().iter().any(|c| c.config.id == id)
    }

    pub fn list(&self) -> Vec<Channel> {
        self.read().clone()
    }

    /// Ids of channels currently in `state`, in insertion order.
    pub fn ids_in_state(&self, state: ChannelState) -> Vec<String> {
        self.read()
            .iter()
            .filter(|c| c.state == state)
            .map(|c| c.config.id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Compare-and-set `from -> to`. Only lifecycle edges are accepted.
    pub fn transition(&self, id: &str, from: ChannelState, to: ChannelState) -> Result<Channel> {
        self.transition_with(id, from, to, |_| {})
    }

    /// CAS `from -> Error`, recording `message` as the channel's last error.
    pub fn fail(&self, id: &str, from: ChannelState, message: impl Into<String>) -> Result<Channel> {
        let message = message.into();
        self.transition_with(id, from, ChannelState::Error, |ch| {
            ch.last_error = Some(message);
        })
    }

    /// CAS with an extra mutation applied under the same lock.
    pub fn transition_with(
        &self,
        id: &str,
        from: ChannelState,
        to: ChannelState,
        f: impl FnOnce(&mut Channel),
    ) -> Result<Channel> {
        let updated = {
            let mut channels = self.write();
            let ch = find_mut(&mut channels, id)?;
            if ch.state != from || !from.can_transition_to(to) {
                return Err(Error::InvalidTransition {
                    channel_id: id.to_string(),
                    from,
                    to,
                    actual: ch.state,
                });
            }
            ch.state = to;
            if to == ChannelState::Recording {
                ch.recording_started_at_ms = Some(now_ms());
            } else {
                ch.recording_started_at_ms = None;
            }
            f(ch);
            ch.clone()
        };
        self.events
            .emit(ChannelEvent::channel(id, EventKind::StateChanged { from, to }));
        Ok(updated)
    }

    /// Mutate non-state bookkeeping fields of a channel.
    pub fn annotate(&self, id: &str, f: impl FnOnce(&mut Channel)) -> Result<Channel> {
        let mut channels = self.write();
        let ch = find_mut(&mut channels, id)?;
        let state = ch.state;
        f(ch);
        ch.state = state;
        Ok(ch.clone())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Channel>> {
        self.channels.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Channel>> {
        self.channels.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn find_mut<'a>(channels: &'a mut [Channel], id: &str) -> Result<&'a mut Channel> {
    channels
        .iter_mut()
        .find(|c| c.config.id == id)
        .ok_or_else(|| Error::not_found(id))
}
