//! Wire types exchanged with the Cronicle API.
//!
//! Cronicle is loose with numbers and flags (`1`/`0` for booleans, codes that
//! are sometimes strings), so the structs keep those fields as raw JSON and
//! expose typed accessors.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An event definition as returned by `get_event`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default = "default_enabled")]
    pub enabled: Value,
    /// Secondary address every notification for this event is relayed to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_hook: Option<String>,
    #[serde(default)]
    pub multiplex: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_enabled() -> Value {
    Value::from(1)
}

impl Event {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            enabled: default_enabled(),
            ..Default::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        truthy(&self.enabled)
    }

    /// Multiplexed events fan out to several servers, each producing its own
    /// notification stream.
    pub fn is_multiplex(&self) -> bool {
        truthy(&self.multiplex)
    }

    /// The relay address, ignoring the empty string Cronicle stores when
    /// no web hook is configured.
    pub fn relay_url(&self) -> Option<&str> {
        self.web_hook.as_deref().filter(|url| !url.trim().is_empty())
    }
}

/// How to look an event up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventQuery {
    Id(String),
    Title(String),
}

impl EventQuery {
    /// Prefers `id` when both are given; `None` when both are empty.
    pub fn from_parts(id: Option<&str>, title: Option<&str>) -> Option<Self> {
        match (id, title) {
            (Some(id), _) if !id.is_empty() => Some(EventQuery::Id(id.to_string())),
            (_, Some(title)) if !title.is_empty() => Some(EventQuery::Title(title.to_string())),
            _ => None,
        }
    }

    pub(crate) fn params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        match self {
            EventQuery::Id(id) => params.insert("id".into(), Value::from(id.as_str())),
            EventQuery::Title(title) => params.insert("title".into(), Value::from(title.as_str())),
        };
        params
    }
}

/// Status snapshot of a running or finished job (`get_job_status`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobStatus {
    #[serde(default)]
    pub complete: Value,
    #[serde(default)]
    pub code: Value,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub elapsed: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobStatus {
    pub fn is_complete(&self) -> bool {
        truthy(&self.complete)
    }

    pub fn mark_complete(&mut self) {
        self.complete = Value::from(1);
    }

    /// Numeric result code, when the scheduler reported one.
    pub fn code(&self) -> Option<i64> {
        match &self.code {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Any code other than zero, including non-numeric ones such as
    /// `"warning"`, counts as a failure.
    pub fn is_failed(&self) -> bool {
        match &self.code {
            Value::Null => false,
            Value::String(s) if s.is_empty() => false,
            _ => self.code() != Some(0),
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty() && s != "0",
        Value::Array(_) | Value::Object(_) => true,
    }
}
