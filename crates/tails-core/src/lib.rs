//! Tails Core Library
//!
//! Shared functionality for the `tails` server:
//! - Event broker fanning tailed lines out to subscribers
//! - Line sources (`tail -F` process, native file follower) and their
//!   restart supervisor
//! - Settings file loading
//! - Tracing initialisation

pub mod broker;
pub mod config;
pub mod source;
pub mod tracing_init;

pub use broker::{Broker, BrokerConfig, BrokerError, BrokerStats, Event, Subscription};
pub use config::{ConfigError, Settings};
pub use source::{LineSource, SourceError, SourceKind, SourceStatus, SourceSupervisor};
