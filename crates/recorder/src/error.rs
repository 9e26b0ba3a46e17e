use thiserror::Error;

use crate::types::ChannelState;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("channel already tracked: {channel_id}")]
    DuplicateChannel { channel_id: String },

    #[error("channel not found: {channel_id}")]
    NotFound { channel_id: String },

    #[error("channel {channel_id} is busy ({state})")]
    ChannelBusy {
        channel_id: String,
        state: ChannelState,
    },

    #[error("channel {channel_id} is not recording ({state})")]
    NotRecording {
        channel_id: String,
        state: ChannelState,
    },

    #[error("invalid transition for {channel_id}: {from} -> {to} (current state: {actual})")]
    InvalidTransition {
        channel_id: String,
        from: ChannelState,
        to: ChannelState,
        actual: ChannelState,
    },

    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("{message}")]
    Message { message: String },

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn duplicate(channel_id: impl Into<String>) -> Self {
        Self::DuplicateChannel {
            channel_id: channel_id.into(),
        }
    }

    #[must_use]
    pub fn not_found(channel_id: impl Into<String>) -> Self {
        Self::NotFound {
            channel_id: channel_id.into(),
        }
    }

    #[must_use]
    pub fn busy(channel_id: impl Into<String>, state: ChannelState) -> Self {
        Self::ChannelBusy {
            channel_id: channel_id.into(),
            state,
        }
    }

    #[must_use]
    pub fn not_recording(channel_id: impl Into<String>, state: ChannelState) -> Self {
        Self::NotRecording {
            channel_id: channel_id.into(),
            state,
        }
    }

    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
