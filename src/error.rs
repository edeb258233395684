use std::panic::Location;
use std::time::Duration;

use thiserror::Error;

use crate::api::ApiError;

#[derive(Debug, Error)]
pub enum CronicleError {
    /// A notification that does not fit the hook it was routed to: unknown
    /// id, wrong order, or an action nobody understands.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Event {event} failed to start.")]
    LaunchFailure { event: String },

    #[error("Transport failure: {0}")]
    Transport(#[from] ApiError),

    #[error("{category}: {message} ({location})")]
    Wrapped {
        category: String,
        message: String,
        location: String,
    },

    #[error("Unsupported request: {0}")]
    Unsupported(String),

    #[error("Could not issue a unique hook id after {0} attempts")]
    IdExhausted(usize),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Waiter abandoned before resolution")]
    Abandoned,

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl CronicleError {
    pub fn protocol(message: impl Into<String>) -> Self {
        CronicleError::ProtocolViolation(message.into())
    }

    /// Wraps an unexpected fault, recording its type and where it was caught.
    #[track_caller]
    pub fn wrap<E: std::error::Error>(err: E) -> Self {
        CronicleError::Wrapped {
            category: short_type_name::<E>().to_string(),
            message: err.to_string(),
            location: Location::caller().to_string(),
        }
    }

    /// Wraps a caught panic payload.
    #[track_caller]
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        CronicleError::Wrapped {
            category: "panic".to_string(),
            message,
            location: Location::caller().to_string(),
        }
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    // Keep generics intact; only strip the leading module path.
    let head = full.split('<').next().unwrap_or(full);
    match head.rfind("::") {
        Some(idx) => &full[idx + 2..],
        None => full,
    }
}
