//! DDI feedback envelope
//!
//! Status documents posted to the server at deployment lifecycle points and
//! when identifying the device.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::Serialize;

/// Execution state reported to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Execution {
    Proceeding,
    Closed,
}

/// Result reported to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Finished {
    None,
    Success,
    Failure,
}

/// A single DDI status document.
#[derive(Debug, Clone, Serialize)]
pub struct Feedback {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,

    /// UTC wall clock at construction time, `YYYYMMDDTHHMMSS`
    time: String,

    status: FeedbackStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize)]
struct FeedbackStatus {
    result: FeedbackResult,
    execution: Execution,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
struct FeedbackResult {
    finished: Finished,
}

impl Feedback {
    fn build(
        id: Option<String>,
        finished: Finished,
        execution: Execution,
        detail: Option<String>,
        data: Option<BTreeMap<String, String>>,
    ) -> Self {
        Self {
            id,
            time: Utc::now().format("%Y%m%dT%H%M%S").to_string(),
            status: FeedbackStatus {
                result: FeedbackResult { finished },
                execution,
                details: detail.map(|detail| vec![detail]),
            },
            data,
        }
    }

    /// Intermediate progress: execution `proceeding`, result `none`.
    pub fn progress(action_id: &str, detail: impl Into<String>) -> Self {
        Self::build(
            Some(action_id.to_string()),
            Finished::None,
            Execution::Proceeding,
            Some(detail.into()),
            None,
        )
    }

    /// Terminal status: execution `closed` with a success or failure result.
    pub fn terminal(action_id: &str, finished: Finished, detail: impl Into<String>) -> Self {
        Self::build(
            Some(action_id.to_string()),
            finished,
            Execution::Closed,
            Some(detail.into()),
            None,
        )
    }

    /// Identification document carrying the configured device attributes.
    /// Sent without an action id.
    pub fn identify(device: &BTreeMap<String, String>) -> Self {
        Self::build(
            None,
            Finished::Success,
            Execution::Closed,
            None,
            Some(device.clone()),
        )
    }
}
