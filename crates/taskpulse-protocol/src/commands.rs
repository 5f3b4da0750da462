//! Outbound command envelopes.
//!
//! Commands are pure interest hints: the server pushes events for any job it
//! chooses regardless of subscriptions, and a subscription grants no access
//! beyond what the session already has.

use serde::{Deserialize, Serialize};

/// All outbound envelope types, tagged by `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Ask the server to push events for one job.
    SubscribeTask { task_id: String },

    /// Withdraw interest in one job.
    UnsubscribeTask { task_id: String },
}

impl ClientCommand {
    pub fn subscribe(task_id: impl Into<String>) -> Self {
        Self::SubscribeTask {
            task_id: task_id.into(),
        }
    }

    pub fn unsubscribe(task_id: impl Into<String>) -> Self {
        Self::UnsubscribeTask {
            task_id: task_id.into(),
        }
    }

    /// The job id this command addresses.
    pub fn task_id(&self) -> &str {
        match self {
            Self::SubscribeTask { task_id } | Self::UnsubscribeTask { task_id } => task_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_serialization() {
        let cmd = ClientCommand::subscribe("t1");
        let json = serde_json::to_string(&cmd).unwrap();
        assert_eq!(json, r#"{"type":"subscribe_task","task_id":"t1"}"#);
    }

    #[test]
    fn test_unsubscribe_serialization() {
        let cmd = ClientCommand::unsubscribe("t1");
        let json = serde_json::to_string(&cmd).unwrap();
        assert_eq!(json, r#"{"type":"unsubscribe_task","task_id":"t1"}"#);
    }

    #[test]
    fn test_task_id_accessor() {
        assert_eq!(ClientCommand::subscribe("pay-9").task_id(), "pay-9");
        assert_eq!(ClientCommand::unsubscribe("pay-9").task_id(), "pay-9");
    }
}
