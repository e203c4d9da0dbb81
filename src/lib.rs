//! Inboxwatch - mailbox item activity monitor
//!
//! Watches the currently-selected mail/calendar item through an abstract
//! host API, detects property changes by polling, classifies them and
//! broadcasts structured change records. The capture of each polling round
//! is sequenced through a small FIFO job queue so every field is read
//! against a consistent round before comparison.

pub mod cli;
pub mod config;
pub mod host;
pub mod monitor;
pub mod queue;

pub use config::MonitorConfig;
pub use monitor::PropertyMonitor;
