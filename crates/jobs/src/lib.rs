//! Client-side tracking of long-running stock analysis jobs.
//!
//! Starts an analysis on the remote valuation service, observes its
//! progress over a push stream (`data:`-prefixed records) or a status
//! poll loop, and delivers exactly one terminal outcome per job to the
//! consumer. One job is active per ticker; starting another for the
//! same ticker supersedes the first and its late events are dropped.
//!
//! The public entry point is [`JobController`].

pub mod api;
pub mod codec;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod messages;
pub mod registry;
pub mod subscription;
pub mod transport;
pub mod watchdog;

pub use config::JobsConfig;
pub use controller::{JobController, StartOptions};
pub use error::JobError;
pub use events::{JobNotification, ProgressEvent};
pub use subscription::{JobObserver, JobSubscription};
