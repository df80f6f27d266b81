//! # tally-core
//!
//! Core types for the Tally telemetry pipeline.
//!
//! Shared by the collector agent and the central server:
//! - the metric data model and its JSON wire payload
//! - the error taxonomy surfaced by every other crate
//! - server and agent configuration
//! - the transport codec: gzip, HMAC-SHA256 signing, RSA-OAEP envelope
//! - fixed-backoff retry for transient backend failures
//! - process signal handling shared by both binaries

pub mod codec;
pub mod config;
pub mod crypto;
mod error;
pub mod retry;
pub mod shutdown;
pub mod signing;
mod types;

pub use config::{AgentConfig, ServerConfig, Transport};
pub use error::{Result, TallyError};
pub use retry::{fail_open, RetryPolicy};
pub use types::*;

/// Header carrying the hex-encoded HMAC-SHA256 digest of the wire bytes.
pub const HASH_HEADER: &str = "HashSHA256";

/// Header carrying the caller's real origin address.
pub const REAL_IP_HEADER: &str = "X-Real-IP";
