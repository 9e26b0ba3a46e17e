//! Channel scan-and-record orchestrator.
//!
//! A scan loop probes every idle tracked channel once per cycle through a
//! bounded worker pool. Live channels are recorded by an external stream tool
//! piped into ffmpeg; the per-channel state machine tracks
//! `idle -> probing -> recording -> idle/error`.

pub mod capture;
pub mod error;
pub mod events;
pub mod pool;
pub mod scheduler;
pub mod service;
pub mod state;
pub mod store;
pub mod store_file;
pub mod store_memory;
pub mod types;

pub use {
    error::{Error, Result},
    service::RecorderService,
};
