//! # Failure Formatter
//!
//! Turns a failed job into a reporting-friendly shape. Upstream reasons of
//! the form `code: status: message` become structured; anything else is
//! passed through untouched. Formatting never fails.

use serde::{Deserialize, Serialize};

use crate::models::{JobData, JobRecord};

/// Structured or raw failure reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FailedReason {
    Structured {
        code: i64,
        status: String,
        message: String,
    },
    Raw(String),
}

impl FailedReason {
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.splitn(3, ": ");
        if let (Some(code), Some(status), Some(message)) =
            (parts.next(), parts.next(), parts.next())
        {
            if let Ok(code) = code.trim().parse::<i64>() {
                return Self::Structured {
                    code,
                    status: status.to_string(),
                    message: message.to_string(),
                };
            }
        }
        Self::Raw(raw.to_string())
    }
}

/// A job as reported by `failed(formatted = true)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormattedFailedJob {
    pub data: JobData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<FailedReason>,
}

pub fn format_failed_job(job: &JobRecord) -> FormattedFailedJob {
    FormattedFailedJob {
        data: job.data.clone(),
        failed_reason: job.failed_reason.as_deref().map(FailedReason::parse),
    }
}
