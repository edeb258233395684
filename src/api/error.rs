//! Errors raised by the scheduler API client.

use thiserror::Error;

/// Failures talking to the Cronicle API.
///
/// Anything here ends up as a transport failure once it leaves the client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The scheduler answered with a non-2xx HTTP status.
    #[error("API call failed: {status} {body}")]
    Status { status: u16, body: String },

    /// The body was not the JSON envelope Cronicle always sends.
    #[error("API call returned unparsable data: {0}")]
    Unparsable(String),

    /// The envelope carried a non-zero `code`.
    #[error("API call failed with result: ({code}) {description}")]
    Rejected { code: String, description: String },

    #[error("Unsupported scheme for API: {0}")]
    UnsupportedScheme(String),

    #[error("Invalid API URL: {0}")]
    InvalidUrl(String),

    /// DNS, refused connection, timeout.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}
