//! Client-side tracking of long-running ERP jobs.
//!
//! taskpulse keeps one WebSocket to the server's task endpoint and mirrors
//! every job the server reports: live records with progress, a bounded
//! archive of raw envelopes, and user-facing notices through a pluggable
//! [`Notifier`]. [`TaskChannel`] is the entry point; everything else hangs
//! off it.

pub mod channel;
pub mod config;
pub mod error;
pub mod notify;

pub use channel::{
    ConnectionState, HistoryEntry, HistoryLog, JobDetails, TaskChannel, TaskRecord, TaskRegistry,
    TaskStatus,
};
pub use config::{AppConfig, ChannelConfig};
pub use error::{ChannelError, ChannelResult};
pub use notify::{LogNotifier, Notice, Notifier, Severity};
