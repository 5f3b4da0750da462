//! Inbound event envelopes.
//!
//! The server pushes one envelope per state change of a background job. The
//! lifecycle per job is `*_started` → zero or more `*_progress` → exactly one
//! of `*_completed` / `task_failed`. Payroll runs and the other named job
//! kinds use their own envelope types with kind-specific fields; everything
//! the server adds beyond the known fields survives in `extra`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// All inbound envelope types, tagged by `type` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    // -- Job start --
    /// Generic background job accepted and running.
    TaskStarted {
        task_id: String,
        /// Server-side job class (e.g. `report_export`).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },

    /// Bulk payroll run accepted and running.
    PayrollProcessingStarted {
        task_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        employee_count: Option<u64>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },

    // -- Job progress --
    /// Generic progress update, percentage supplied by the server.
    TaskProgress {
        task_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },

    /// Payroll progress as processed/total counts; the client derives the
    /// percentage.
    PayrollProcessingProgress {
        task_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        processed: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },

    // -- Job completion --
    /// Generic job finished successfully.
    TaskCompleted {
        task_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },

    /// Bulk payroll run finished successfully.
    PayrollProcessingCompleted {
        task_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payslips_created: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },

    /// Single-payslip rerun finished successfully.
    PayslipRerunCompleted {
        task_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payslip_id: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },

    /// Payment voucher generation finished successfully.
    VoucherGenerated {
        task_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        voucher_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },

    /// Payslip email distribution finished successfully.
    EmailDistributionCompleted {
        task_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        emails_sent: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_emails: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },

    // -- Job failure --
    /// Job failed; `error` carries the server-side diagnostic payload.
    TaskFailed {
        task_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<Value>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },

    // -- Channel-level error --
    /// Server-reported channel error, not tied to a job lifecycle.
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<Value>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
}

impl TaskEvent {
    /// Decode a parsed frame. Fails for unrecognized `type` values and for
    /// envelopes missing required fields (e.g. a lifecycle event without a
    /// `task_id`).
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(value)
    }

    /// The job id this envelope addresses, if any.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::TaskStarted { task_id, .. }
            | Self::PayrollProcessingStarted { task_id, .. }
            | Self::TaskProgress { task_id, .. }
            | Self::PayrollProcessingProgress { task_id, .. }
            | Self::TaskCompleted { task_id, .. }
            | Self::PayrollProcessingCompleted { task_id, .. }
            | Self::PayslipRerunCompleted { task_id, .. }
            | Self::VoucherGenerated { task_id, .. }
            | Self::EmailDistributionCompleted { task_id, .. }
            | Self::TaskFailed { task_id, .. } => Some(task_id),
            Self::Error { task_id, .. } => task_id.as_deref(),
        }
    }

    /// The wire `type` tag of this envelope.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::TaskStarted { .. } => "task_started",
            Self::PayrollProcessingStarted { .. } => "payroll_processing_started",
            Self::TaskProgress { .. } => "task_progress",
            Self::PayrollProcessingProgress { .. } => "payroll_processing_progress",
            Self::TaskCompleted { .. } => "task_completed",
            Self::PayrollProcessingCompleted { .. } => "payroll_processing_completed",
            Self::PayslipRerunCompleted { .. } => "payslip_rerun_completed",
            Self::VoucherGenerated { .. } => "voucher_generated",
            Self::EmailDistributionCompleted { .. } => "email_distribution_completed",
            Self::TaskFailed { .. } => "task_failed",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_started_deserialization() {
        let value = json!({
            "type": "task_started",
            "task_id": "t1",
            "task_type": "report_export",
            "message": "starting"
        });

        match TaskEvent::from_value(&value).unwrap() {
            TaskEvent::TaskStarted {
                task_id,
                task_type,
                message,
                extra,
            } => {
                assert_eq!(task_id, "t1");
                assert_eq!(task_type.as_deref(), Some("report_export"));
                assert_eq!(message.as_deref(), Some("starting"));
                assert!(extra.is_empty());
            }
            other => panic!("Expected TaskStarted, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_fields_land_in_extra() {
        let value = json!({
            "type": "payroll_processing_started",
            "task_id": "pay-7",
            "employee_count": 120,
            "period": "2025-06",
            "initiated_by": "hr.admin"
        });

        match TaskEvent::from_value(&value).unwrap() {
            TaskEvent::PayrollProcessingStarted {
                employee_count,
                extra,
                ..
            } => {
                assert_eq!(employee_count, Some(120));
                assert_eq!(extra.get("period"), Some(&json!("2025-06")));
                assert_eq!(extra.get("initiated_by"), Some(&json!("hr.admin")));
            }
            other => panic!("Expected PayrollProcessingStarted, got {other:?}"),
        }
    }

    #[test]
    fn test_progress_accepts_integer_and_float() {
        let int = json!({"type": "task_progress", "task_id": "t1", "progress": 42});
        let float = json!({"type": "task_progress", "task_id": "t1", "progress": 42.5});

        for value in [int, float] {
            match TaskEvent::from_value(&value).unwrap() {
                TaskEvent::TaskProgress { progress, .. } => assert!(progress.is_some()),
                other => panic!("Expected TaskProgress, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let value = json!({"type": "cache_invalidated", "scope": "payroll"});
        assert!(TaskEvent::from_value(&value).is_err());
    }

    #[test]
    fn test_started_without_task_id_is_rejected() {
        let value = json!({"type": "task_started", "message": "starting"});
        assert!(TaskEvent::from_value(&value).is_err());
    }

    #[test]
    fn test_error_without_task_id_is_accepted() {
        let value = json!({"type": "error", "message": "queue backlog"});

        match TaskEvent::from_value(&value).unwrap() {
            TaskEvent::Error {
                task_id, message, ..
            } => {
                assert!(task_id.is_none());
                assert_eq!(message.as_deref(), Some("queue backlog"));
            }
            other => panic!("Expected Error, got {other:?}"),
        }
    }

    #[test]
    fn test_task_id_accessor() {
        let completed = json!({"type": "voucher_generated", "task_id": "v-3"});
        let event = TaskEvent::from_value(&completed).unwrap();
        assert_eq!(event.task_id(), Some("v-3"));
        assert_eq!(event.type_name(), "voucher_generated");
    }

    #[test]
    fn test_serialization_round_tags() {
        let event = TaskEvent::EmailDistributionCompleted {
            task_id: "mail-1".to_string(),
            message: None,
            emails_sent: Some(40),
            total_emails: Some(42),
            result: None,
            extra: Map::new(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"email_distribution_completed\""));
        assert!(json.contains("\"emails_sent\":40"));
        assert!(!json.contains("\"result\""));
    }
}
