//! Real-time task tracking over one WebSocket connection.
//!
//! Data flow:
//!
//! ```text
//! server frame -> service driver -> router -+-> registry (task records)
//!                                           +-> history  (bounded archive)
//!                                           +-> notifier (user notices)
//! ```
//!
//! The service owns the connection lifecycle, the router owns every state
//! mutation, and the registry and history only ever hand out snapshots.

mod history;
mod registry;
mod router;
mod service;
mod transport;

pub use history::{HistoryEntry, HistoryLog};
pub use registry::{JobDetails, TaskRecord, TaskRegistry, TaskStatus};
pub use service::TaskChannel;
pub use transport::{CHANNEL_PATH, ConnectionState, endpoint_url};
