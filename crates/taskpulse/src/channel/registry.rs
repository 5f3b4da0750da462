//! Task registry: per-job state keyed by server-assigned task id.
//!
//! All mutation funnels through the message router; callers only ever get
//! snapshots. Deletion is the one operation driven by a timer instead of a
//! message: completed and failed records linger for a retention window so the
//! UI can show the final state, then a removal task deletes them. Every
//! removal task holds a cancellation token, so replacing a record or tearing
//! down the owning service cancels pending deletions deterministically, and
//! records carry a revision stamp so a removal only ever deletes the exact
//! record it was armed for.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::debug;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

/// Lifecycle of one tracked job. `Completed` and `Failed` are terminal; the
/// only way out is removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Kind-specific job state, tagged by job kind.
///
/// Known fields stay typed per kind; anything else the server sends rides in
/// the record's `extra` bag instead.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobDetails {
    /// Generic background task; `task_type` is the server-side job class.
    Task {
        #[serde(skip_serializing_if = "Option::is_none")]
        task_type: Option<String>,
    },
    BatchPayroll {
        #[serde(skip_serializing_if = "Option::is_none")]
        employee_count: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        processed: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        total: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        payslips_created: Option<u64>,
    },
    PayslipRerun {
        #[serde(skip_serializing_if = "Option::is_none")]
        payslip_id: Option<u64>,
    },
    VoucherRun {
        #[serde(skip_serializing_if = "Option::is_none")]
        voucher_type: Option<String>,
    },
    EmailDistribution {
        #[serde(skip_serializing_if = "Option::is_none")]
        emails_sent: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        total_emails: Option<u64>,
    },
}

impl JobDetails {
    pub fn generic(task_type: Option<String>) -> Self {
        Self::Task { task_type }
    }

    /// Wire-style kind name.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Task { .. } => "task",
            Self::BatchPayroll { .. } => "batch_payroll",
            Self::PayslipRerun { .. } => "payslip_rerun",
            Self::VoucherRun { .. } => "voucher_run",
            Self::EmailDistribution { .. } => "email_distribution",
        }
    }

    /// Human-readable kind label for notifications.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Task { .. } => "Task",
            Self::BatchPayroll { .. } => "Payroll Run",
            Self::PayslipRerun { .. } => "Payslip Rerun",
            Self::VoucherRun { .. } => "Voucher Generation",
            Self::EmailDistribution { .. } => "Email Distribution",
        }
    }

    /// Merge kind-specific fields from a later envelope.
    ///
    /// Matching kinds merge field-wise (incoming values win when present). A
    /// generic record is refined to the incoming kind when a kind-specific
    /// envelope arrives for it. Conflicting specific kinds keep the current
    /// state.
    pub(crate) fn merge_from(&mut self, incoming: JobDetails) {
        match (&mut *self, incoming) {
            (
                Self::Task { task_type },
                Self::Task {
                    task_type: incoming_type,
                },
            ) => {
                if incoming_type.is_some() {
                    *task_type = incoming_type;
                }
            }
            (
                Self::BatchPayroll {
                    employee_count,
                    processed,
                    total,
                    payslips_created,
                },
                Self::BatchPayroll {
                    employee_count: in_employee_count,
                    processed: in_processed,
                    total: in_total,
                    payslips_created: in_payslips_created,
                },
            ) => {
                *employee_count = in_employee_count.or(*employee_count);
                *processed = in_processed.or(*processed);
                *total = in_total.or(*total);
                *payslips_created = in_payslips_created.or(*payslips_created);
            }
            (
                Self::PayslipRerun { payslip_id },
                Self::PayslipRerun {
                    payslip_id: in_payslip_id,
                },
            ) => {
                *payslip_id = in_payslip_id.or(*payslip_id);
            }
            (
                Self::VoucherRun { voucher_type },
                Self::VoucherRun {
                    voucher_type: in_voucher_type,
                },
            ) => {
                if in_voucher_type.is_some() {
                    *voucher_type = in_voucher_type;
                }
            }
            (
                Self::EmailDistribution {
                    emails_sent,
                    total_emails,
                },
                Self::EmailDistribution {
                    emails_sent: in_emails_sent,
                    total_emails: in_total_emails,
                },
            ) => {
                *emails_sent = in_emails_sent.or(*emails_sent);
                *total_emails = in_total_emails.or(*total_emails);
            }
            (Self::Task { .. }, incoming) => *self = incoming,
            (current, incoming) => {
                debug!(
                    "keeping job kind {} over conflicting {}",
                    current.kind_name(),
                    incoming.kind_name()
                );
            }
        }
    }
}

/// Tracked state of one background job.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub id: String,
    pub status: TaskStatus,
    /// Percent complete, 0..=100.
    pub progress: u8,
    pub message: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub job: JobDetails,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    /// Fields from the triggering envelopes that have no typed home.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
    /// Stamped on insert; removal timers only delete the revision they were
    /// armed with, so a stale timer cannot take out a replacement record.
    #[serde(skip)]
    pub(crate) revision: u64,
}

impl TaskRecord {
    pub fn new(id: impl Into<String>, job: JobDetails, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: TaskStatus::Running,
            progress: 0,
            message: message.into(),
            started_at: Utc::now(),
            updated_at: None,
            finished_at: None,
            job,
            result: None,
            error: None,
            extra: Map::new(),
            revision: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == TaskStatus::Running
    }
}

struct RemovalGuard {
    generation: u64,
    token: CancellationToken,
}

/// Registry of live task records. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TaskRegistry {
    tasks: Arc<DashMap<String, TaskRecord>>,
    removals: Arc<DashMap<String, RemovalGuard>>,
    /// Source of record revisions and removal-guard generations.
    seq: Arc<AtomicU64>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(DashMap::new()),
            removals: Arc::new(DashMap::new()),
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Snapshot of one record.
    pub fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.tasks.get(task_id).map(|r| r.clone())
    }

    /// Snapshot of all current records.
    pub fn all(&self) -> Vec<TaskRecord> {
        self.tasks.iter().map(|r| r.clone()).collect()
    }

    pub fn running_count(&self) -> usize {
        self.tasks.iter().filter(|r| r.is_running()).count()
    }

    pub fn has_running(&self) -> bool {
        self.tasks.iter().any(|r| r.is_running())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Insert a fresh record, replacing any previous record under the same
    /// id and cancelling its pending removal so a stale timer cannot delete
    /// the replacement.
    pub(crate) fn insert(&self, mut record: TaskRecord) {
        self.cancel_removal(&record.id);
        record.revision = self.seq.fetch_add(1, Ordering::Relaxed);
        self.tasks.insert(record.id.clone(), record);
    }

    /// Mutate a record in place if it exists; returns a snapshot of the
    /// mutated record. Unknown ids are left untouched.
    pub(crate) fn update<F>(&self, task_id: &str, mutate: F) -> Option<TaskRecord>
    where
        F: FnOnce(&mut TaskRecord),
    {
        self.tasks.get_mut(task_id).map(|mut record| {
            mutate(&mut record);
            record.clone()
        })
    }

    /// Schedule deletion of a record after `after`, replacing any previously
    /// scheduled deletion for the same id. The timer is a child of `parent`,
    /// so cancelling `parent` cancels every pending removal.
    pub(crate) fn schedule_removal(
        &self,
        task_id: &str,
        after: Duration,
        parent: &CancellationToken,
    ) {
        let Some(revision) = self.tasks.get(task_id).map(|record| record.revision) else {
            return;
        };
        let token = parent.child_token();
        let generation = self.seq.fetch_add(1, Ordering::Relaxed);
        if let Some(previous) = self.removals.insert(
            task_id.to_string(),
            RemovalGuard {
                generation,
                token: token.clone(),
            },
        ) {
            previous.token.cancel();
        }

        let registry = self.clone();
        let task_id = task_id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(after) => {
                    // Only the currently scheduled timer may delete, and only
                    // the record it was armed for. An insert racing the wakeup
                    // replaces the record under the id; the revision check
                    // keeps that replacement alive.
                    let owns_slot = registry
                        .removals
                        .remove_if(&task_id, |_, guard| guard.generation == generation)
                        .is_some();
                    if owns_slot && registry.remove_expired(&task_id, revision) {
                        debug!("task {task_id} removed from registry");
                    }
                }
            }
        });
    }

    /// Delete `task_id` only while the stored record is still the `revision`
    /// the removal was armed with.
    fn remove_expired(&self, task_id: &str, revision: u64) -> bool {
        self.tasks
            .remove_if(task_id, |_, record| record.revision == revision)
            .is_some()
    }

    pub(crate) fn cancel_removal(&self, task_id: &str) {
        if let Some((_, guard)) = self.removals.remove(task_id) {
            guard.token.cancel();
        }
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
