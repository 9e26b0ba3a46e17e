//! Recorder event bus.
//!
//! Every observable change (channel added, state transition, scan cycle,
//! probe result, recording start/end) is published as a [`ChannelEvent`]:
//! logged through `tracing`, fanned out to broadcast subscribers, and kept in
//! a bounded buffer for callers that poll instead of subscribing.

use std::{collections::VecDeque, sync::Mutex};

use {
    serde::{Deserialize, Serialize},
    tokio::sync::broadcast,
    tracing::{debug, info, warn},
};

use crate::types::{ChannelState, now_ms};

/// Maximum events retained before oldest entries are dropped.
pub const MAX_RECENT_EVENTS: usize = 200;

/// Broadcast channel depth; slow subscribers observe `Lagged`.
const BROADCAST_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EventKind {
    ChannelAdded,
    ChannelRemoved,
    ChannelUpdated,
    StateChanged {
        from: ChannelState,
        to: ChannelState,
    },
    ScanCycleStarted {
        cycle: u64,
    },
    ScanCycleFinished {
        cycle: u64,
        submitted: usize,
    },
    ChannelLive,
    ChannelOffline,
    StreamScheduled,
    ProbeFailed,
    RecordingStarted,
    RecordingFinished,
    RecordingFailed,
    RecordingCancelled,
}

/// A single recorder event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(flatten)]
    pub kind: EventKind,
    pub at_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ChannelEvent {
    pub fn channel(channel_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            channel_id: Some(channel_id.into()),
            kind,
            at_ms: now_ms(),
            detail: None,
        }
    }

    pub fn system(kind: EventKind) -> Self {
        Self {
            channel_id: None,
            kind,
            at_ms: now_ms(),
            detail: None,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    fn same_content(&self, other: &Self) -> bool {
        self.channel_id == other.channel_id && self.kind == other.kind && self.detail == other.detail
    }
}

/// Fan-out plus bounded, dedup-aware history.
pub struct EventBus {
    tx: broadcast::Sender<ChannelEvent>,
    recent: Mutex<VecDeque<ChannelEvent>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            tx,
            recent: Mutex::new(VecDeque::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.tx.subscribe()
    }

    /// Log, buffer and broadcast an event. Consecutive duplicates (same
    /// channel, kind and detail) are logged but not buffered twice.
    pub fn emit(&self, event: ChannelEvent) {
        log_event(&event);
        {
            let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
            if !recent.back().is_some_and(|last| last.same_content(&event)) {
                if recent.len() >= MAX_RECENT_EVENTS {
                    recent.pop_front();
                }
                recent.push_back(event.clone());
            }
        }
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    /// The most recent `limit` events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<ChannelEvent> {
        let recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        let start = recent.len().saturating_sub(limit);
        recent.iter().skip(start).cloned().collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn log_event(event: &ChannelEvent) {
    let channel = event.channel_id.as_deref().unwrap_or("-");
    let detail = event.detail.as_deref().unwrap_or("");
    match &event.kind {
        EventKind::StateChanged { from, to } => {
            debug!(channel, %from, %to, "channel state changed");
        },
        EventKind::ScanCycleStarted { cycle } => debug!(cycle, "scan cycle started"),
        EventKind::ScanCycleFinished { cycle, submitted } => {
            debug!(cycle, submitted, "scan cycle finished");
        },
        EventKind::ChannelAdded => info!(channel, "channel added"),
        EventKind::ChannelRemoved => info!(channel, "channel removed"),
        EventKind::ChannelUpdated => info!(channel, detail, "channel updated"),
        EventKind::ChannelLive => info!(channel, "channel is online"),
        EventKind::ChannelOffline => info!(channel, "channel is offline"),
        EventKind::StreamScheduled => warn!(channel, starts_in = detail, "stream scheduled"),
        EventKind::ProbeFailed => warn!(channel, error = detail, "probe failed"),
        EventKind::RecordingStarted => info!(channel, path = detail, "recording started"),
        EventKind::RecordingFinished => info!(channel, path = detail, "recording finished"),
        EventKind::RecordingFailed => warn!(channel, error = detail, "recording failed"),
        EventKind::RecordingCancelled => info!(channel, "recording cancelled"),
    }
}
