//! Inbound frame routing.
//!
//! Every text frame from the socket lands here. The router decodes it,
//! archives it, then applies it to the task registry and notification sink.
//! Ordering is strict: archive first, dispatch second, so the history log is
//! a superset of everything that ever reached dispatch. Frames that are not
//! JSON at all are dropped before archiving.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use taskpulse_protocol::TaskEvent;

use crate::channel::history::HistoryLog;
use crate::channel::registry::{JobDetails, TaskRecord, TaskRegistry, TaskStatus};
use crate::notify::{Notice, Notifier};

/// Summary line used for server-level error notices that have no task.
const SERVER_ERROR_SUMMARY: &str = "Task tracking";

pub(crate) struct EventRouter {
    registry: TaskRegistry,
    history: HistoryLog,
    notifier: Arc<dyn Notifier>,
    /// How long completed records stay visible before removal.
    completed_retention: Duration,
    /// How long failed records stay visible before removal.
    failed_retention: Duration,
    /// Parent token for removal timers; cancelled on teardown.
    teardown: CancellationToken,
}

impl EventRouter {
    pub(crate) fn new(
        registry: TaskRegistry,
        history: HistoryLog,
        notifier: Arc<dyn Notifier>,
        completed_retention: Duration,
        failed_retention: Duration,
        teardown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            history,
            notifier,
            completed_retention,
            failed_retention,
            teardown,
        }
    }

    /// Route one raw text frame.
    pub(crate) fn handle_frame(&self, text: &str) {
        let envelope: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(err) => {
                warn!("dropping undecodable frame: {err}");
                return;
            }
        };

        self.history.append(envelope.clone());

        let event = match TaskEvent::from_value(&envelope) {
            Ok(event) => event,
            Err(err) => {
                debug!("ignoring unrecognized frame: {err}");
                return;
            }
        };

        self.dispatch(event);
    }

    fn dispatch(&self, event: TaskEvent) {
        match event {
            TaskEvent::TaskStarted {
                task_id,
                task_type,
                message,
                extra,
            } => self.start(task_id, JobDetails::generic(task_type), message, extra),
            TaskEvent::PayrollProcessingStarted {
                task_id,
                message,
                employee_count,
                extra,
            } => self.start(
                task_id,
                JobDetails::BatchPayroll {
                    employee_count,
                    processed: None,
                    total: None,
                    payslips_created: None,
                },
                message,
                extra,
            ),
            TaskEvent::TaskProgress {
                task_id,
                progress,
                message,
                extra,
            } => self.progress(&task_id, progress.map(clamp_percent), None, message, extra),
            TaskEvent::PayrollProcessingProgress {
                task_id,
                processed,
                total,
                message,
                extra,
            } => {
                let percent = match (processed, total) {
                    (Some(processed), Some(total)) => percent_from_counts(processed, total),
                    _ => None,
                };
                self.progress(
                    &task_id,
                    percent,
                    Some(JobDetails::BatchPayroll {
                        employee_count: None,
                        processed,
                        total,
                        payslips_created: None,
                    }),
                    message,
                    extra,
                );
            }
            TaskEvent::TaskCompleted {
                task_id,
                message,
                result,
                extra,
            } => self.complete(&task_id, None, message, result, extra),
            TaskEvent::PayrollProcessingCompleted {
                task_id,
                message,
                payslips_created,
                result,
                extra,
            } => self.complete(
                &task_id,
                Some(JobDetails::BatchPayroll {
                    employee_count: None,
                    processed: None,
                    total: None,
                    payslips_created,
                }),
                message,
                result,
                extra,
            ),
            TaskEvent::PayslipRerunCompleted {
                task_id,
                message,
                payslip_id,
                result,
                extra,
            } => self.complete(
                &task_id,
                Some(JobDetails::PayslipRerun { payslip_id }),
                message,
                result,
                extra,
            ),
            TaskEvent::VoucherGenerated {
                task_id,
                message,
                voucher_type,
                result,
                extra,
            } => self.complete(
                &task_id,
                Some(JobDetails::VoucherRun { voucher_type }),
                message,
                result,
                extra,
            ),
            TaskEvent::EmailDistributionCompleted {
                task_id,
                message,
                emails_sent,
                total_emails,
                result,
                extra,
            } => self.complete(
                &task_id,
                Some(JobDetails::EmailDistribution {
                    emails_sent,
                    total_emails,
                }),
                message,
                result,
                extra,
            ),
            TaskEvent::TaskFailed {
                task_id,
                message,
                error,
                extra,
            } => self.fail(&task_id, message, error, extra),
            TaskEvent::Error {
                task_id,
                message,
                detail,
                ..
            } => self.server_error(task_id, message, detail),
        }
    }

    /// A `*_started` envelope creates a fresh running record, replacing any
    /// record already tracked under the same id.
    fn start(
        &self,
        task_id: String,
        job: JobDetails,
        message: Option<String>,
        extra: Map<String, Value>,
    ) {
        let label = job.label();
        let detail = message.unwrap_or_else(|| format!("{label} started"));
        let mut record = TaskRecord::new(task_id, job, detail.clone());
        record.extra = extra;
        self.registry.insert(record);
        self.notifier.notify(Notice::info(label, detail));
    }

    /// Progress envelopes update known records only; updates for ids we are
    /// not tracking are dropped so a late frame cannot resurrect a job.
    fn progress(
        &self,
        task_id: &str,
        percent: Option<u8>,
        job: Option<JobDetails>,
        message: Option<String>,
        extra: Map<String, Value>,
    ) {
        let updated = self.registry.update(task_id, |record| {
            if let Some(percent) = percent {
                record.progress = percent;
            }
            if let Some(message) = message {
                record.message = message;
            }
            if let Some(job) = job {
                record.job.merge_from(job);
            }
            merge_extra(record, extra);
            record.updated_at = Some(chrono::Utc::now());
        });
        if updated.is_none() {
            debug!("dropping progress for untracked task {task_id}");
        }
    }

    fn complete(
        &self,
        task_id: &str,
        job: Option<JobDetails>,
        message: Option<String>,
        result: Option<Value>,
        extra: Map<String, Value>,
    ) {
        let updated = self.registry.update(task_id, |record| {
            record.status = TaskStatus::Completed;
            record.progress = 100;
            let now = chrono::Utc::now();
            record.updated_at = Some(now);
            record.finished_at = Some(now);
            if let Some(message) = message {
                record.message = message;
            }
            if result.is_some() {
                record.result = result;
            }
            if let Some(job) = job {
                record.job.merge_from(job);
            }
            merge_extra(record, extra);
        });

        match updated {
            Some(record) => {
                self.registry
                    .schedule_removal(task_id, self.completed_retention, &self.teardown);
                let label = record.job.label();
                self.notifier
                    .notify(Notice::success(label, record.message.clone()));
            }
            None => debug!("dropping completion for untracked task {task_id}"),
        }
    }

    fn fail(
        &self,
        task_id: &str,
        message: Option<String>,
        error: Option<Value>,
        extra: Map<String, Value>,
    ) {
        let detail_text = failure_text(message.as_deref(), error.as_ref());
        let updated = self.registry.update(task_id, |record| {
            record.status = TaskStatus::Failed;
            let now = chrono::Utc::now();
            record.updated_at = Some(now);
            record.finished_at = Some(now);
            if let Some(message) = message {
                record.message = message;
            }
            if error.is_some() {
                record.error = error;
            }
            merge_extra(record, extra);
        });

        match updated {
            Some(record) => {
                self.registry
                    .schedule_removal(task_id, self.failed_retention, &self.teardown);
                let label = record.job.label();
                let detail = detail_text.unwrap_or_else(|| format!("{label} failed"));
                self.notifier.notify(Notice::error(label, detail));
            }
            None => debug!("dropping failure for untracked task {task_id}"),
        }
    }

    /// Server-level `error` envelopes surface as a notice but never touch the
    /// registry.
    fn server_error(&self, task_id: Option<String>, message: Option<String>, detail: Option<Value>) {
        let text = failure_text(message.as_deref(), detail.as_ref())
            .unwrap_or_else(|| "The server reported an error".to_string());
        match task_id {
            Some(task_id) => debug!("server error for task {task_id}: {text}"),
            None => debug!("server error: {text}"),
        }
        self.notifier.notify(Notice::error(SERVER_ERROR_SUMMARY, text));
    }
}

fn merge_extra(record: &mut TaskRecord, extra: Map<String, Value>) {
    for (key, value) in extra {
        record.extra.insert(key, value);
    }
}

/// Clamp a raw percentage to 0..=100. Infinities saturate to the nearest
/// bound; NaN collapses to 0.
fn clamp_percent(raw: f64) -> u8 {
    raw.round().clamp(0.0, 100.0) as u8
}

/// Percent complete from item counts. A zero total carries no information,
/// so it yields no update rather than a division by zero.
fn percent_from_counts(processed: u64, total: u64) -> Option<u8> {
    if total == 0 {
        return None;
    }
    Some(clamp_percent(processed as f64 / total as f64 * 100.0))
}

/// Best human-readable text for a failure, preferring the explicit message.
fn failure_text(message: Option<&str>, error: Option<&Value>) -> Option<String> {
    if let Some(message) = message {
        return Some(message.to_string());
    }
    match error {
        Some(Value::String(text)) => Some(text.clone()),
        Some(other) => Some(other.to_string()),
        None => None,
    }
}
