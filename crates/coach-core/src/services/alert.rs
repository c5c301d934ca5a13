//! Alerting hook for conditions that need a human
//!
//! A refund that fails after a billed attempt leaves a user short one unit with
//! no automatic way back. Such failures go to an [`AlertSink`] in addition to
//! the error log.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::QuotaKind;

/// Details of a failed refund
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundAlert {
    pub user_id: String,
    pub kind: QuotaKind,
    pub consumption_record_id: Option<String>,
    /// Error that triggered the refund
    pub original_error: String,
    /// Why the refund itself failed
    pub refund_error: String,
    pub occurred_at: DateTime<Utc>,
}

pub trait AlertSink: Send + Sync {
    fn critical(&self, alert: RefundAlert);
}

/// Writes alerts to the error log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn critical(&self, alert: RefundAlert) {
        log::error!(
            "[alert] REFUND FAILED - manual intervention required: user={} kind={} record={} original_error={} refund_error={}",
            alert.user_id,
            alert.kind,
            alert.consumption_record_id.as_deref().unwrap_or("-"),
            alert.original_error,
            alert.refund_error
        );
    }
}

/// Keeps alerts in memory; useful for tests and for surfacing alerts in a UI
#[derive(Debug, Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<RefundAlert>>,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<RefundAlert> {
        match self.alerts.lock() {
            Ok(alerts) => alerts.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AlertSink for RecordingAlertSink {
    fn critical(&self, alert: RefundAlert) {
        LogAlertSink.critical(alert.clone());
        match self.alerts.lock() {
            Ok(mut alerts) => alerts.push(alert),
            Err(poisoned) => poisoned.into_inner().push(alert),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_keeps_alerts() {
        let sink = RecordingAlertSink::new();
        sink.critical(RefundAlert {
            user_id: "u1".to_string(),
            kind: QuotaKind::ResumeQuiz,
            consumption_record_id: Some("rec".to_string()),
            original_error: "Generation failed: empty".to_string(),
            refund_error: "user not found".to_string(),
            occurred_at: Utc::now(),
        });

        let alerts = sink.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].user_id, "u1");
    }
}
