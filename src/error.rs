//! Error types for the debrid-dl library.

use thiserror::Error;

/// Errors that can occur while authenticating, talking to the seedbox or
/// downloading files.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid input argument or configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing OAuth client id, or device authorization was never approved.
    #[error("Authorization failed: {0}")]
    Auth(String),

    /// Non-2xx response from the seedbox API.
    #[error("The server returned an error for '{url}': ({status}) {status_text}{}", fmt_body(.body))]
    Api {
        /// Full request URL.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Canonical reason phrase of the status.
        status_text: String,
        /// Response body, empty when it could not be read.
        body: String,
    },

    /// A successful response did not carry the expected payload.
    #[error("Unexpected response from '{0}'")]
    UnexpectedResponse(String),

    /// A single file transfer failed.
    #[error("Download failed: {0}")]
    Download(String),

    /// The verification mail could not be built or sent.
    #[error("Mail error: {0}")]
    Mail(String),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Malformed JSON payload.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn fmt_body(body: &str) -> String {
    if body.is_empty() {
        String::new()
    } else {
        format!(" - {body}")
    }
}

impl Error {
    /// Returns the HTTP status for API errors.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// A specialized `Result` type for debrid-dl operations.
pub type Result<T> = std::result::Result<T, Error>;
