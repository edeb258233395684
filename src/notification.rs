//! Typed views over the JSON bodies Cronicle posts to a web hook.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CronicleError;

/// The lifecycle step a notification reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    LaunchFailure,
    Start,
    Complete,
}

impl Action {
    /// Reads the `action` field of a raw payload.
    pub fn of(payload: &Value) -> Result<Self, CronicleError> {
        let action = payload.get("action").and_then(Value::as_str);
        match action {
            Some("job_launch_failure") => Ok(Action::LaunchFailure),
            Some("job_start") => Ok(Action::Start),
            Some("job_complete") => Ok(Action::Complete),
            Some(other) => Err(CronicleError::protocol(format!(
                "Saw unknown job action: {other}."
            ))),
            None => Err(CronicleError::protocol("Notification has no action.")),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::LaunchFailure => write!(f, "job_launch_failure"),
            Action::Start => write!(f, "job_start"),
            Action::Complete => write!(f, "job_complete"),
        }
    }
}

/// Payload of `job_start`. Immutable once a job is built from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartNotification {
    pub id: String,
    pub job_details_url: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Payload of `job_complete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteNotification {
    pub id: String,
    #[serde(default)]
    pub code: Value,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub(crate) fn parse<T: serde::de::DeserializeOwned>(
    action: Action,
    payload: &Value,
) -> Result<T, CronicleError> {
    serde_json::from_value(payload.clone())
        .map_err(|e| CronicleError::protocol(format!("Malformed {action} notification: {e}.")))
}
