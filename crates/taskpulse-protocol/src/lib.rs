//! Wire protocol types for the taskpulse job-tracking channel.
//!
//! One frame on the wire is one JSON object. Inbound frames carry progress
//! notifications for server-side background jobs; outbound frames carry the
//! subscription hints a client sends back:
//!
//! ```text
//! Server --[JSON: task events]--> Client (channel service)
//! Server <--[JSON: subscribe_task / unsubscribe_task]-- Client
//! ```
//!
//! Every inbound envelope is tagged by a `type` field. The known types are
//! modelled as [`events::TaskEvent`] variants with a closed set of typed
//! fields plus an `extra` bag that preserves whatever else the server sent.
//! Frames with an unrecognized `type` do not deserialize into `TaskEvent`;
//! consumers keep them as raw JSON and treat them as forward-compatible
//! noise.

pub mod commands;
pub mod events;

pub use commands::ClientCommand;
pub use events::TaskEvent;
