//! KDL configuration for squeue.
//!
//! This crate handles:
//! - Database nicknames and per-type credentials
//! - Per-queue database and lease timeouts
//! - Layered discovery of configuration files

pub mod connections;
pub mod duration;
pub mod error;

pub use connections::{
    Config, Credentials, DatabaseKind, DatabaseProfile, QueueSettings, parse_config,
};
pub use duration::parse_duration;
pub use error::{ConfigError, ConfigResult};
