//! User-facing notification sink.
//!
//! The channel never renders anything itself; every user-visible signal goes
//! through the [`Notifier`] trait. The host application decides what a notice
//! becomes (toast, terminal line, log entry).

use log::{error, info, warn};
use serde::Serialize;

/// Notification severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warn,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Success => write!(f, "success"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Display duration for informational notices (milliseconds).
const INFO_DURATION_MS: u64 = 3000;

/// Display duration for success and warning notices (milliseconds).
const SUCCESS_DURATION_MS: u64 = 5000;

/// One user-visible notification.
///
/// `duration_ms` is a rendering hint; `None` means the notice should stay
/// until acknowledged.
#[derive(Debug, Clone, Serialize)]
pub struct Notice {
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl Notice {
    pub fn info(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            summary: Some(summary.into()),
            detail: detail.into(),
            duration_ms: Some(INFO_DURATION_MS),
        }
    }

    pub fn success(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity: Severity::Success,
            summary: Some(summary.into()),
            detail: detail.into(),
            duration_ms: Some(SUCCESS_DURATION_MS),
        }
    }

    pub fn warn(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warn,
            summary: Some(summary.into()),
            detail: detail.into(),
            duration_ms: Some(SUCCESS_DURATION_MS),
        }
    }

    /// Errors are sticky: no duration hint.
    pub fn error(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            summary: Some(summary.into()),
            detail: detail.into(),
            duration_ms: None,
        }
    }
}

/// Sink for user-visible notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Default sink: forwards notices to the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        let summary = notice.summary.as_deref().unwrap_or("notice");
        match notice.severity {
            Severity::Info | Severity::Success => info!("{}: {}", summary, notice.detail),
            Severity::Warn => warn!("{}: {}", summary, notice.detail),
            Severity::Error => error!("{}: {}", summary, notice.detail),
        }
    }
}
