use crate::pipeline::{CallEvent, CallState};
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),
    #[error("Timeout: {0}")]
    Timeout(#[source] reqwest::Error),
    #[error("Request failed ({status}): {message}")]
    Http { status: u16, message: String },
    #[error("Response error: {0}")]
    Parse(String),
    #[error("Request error: {0}")]
    Serialization(String),
    #[error("Storage error: {0}")]
    Storage(String),
    /// The refresh credential was rejected; local state is gone and the user must sign in again.
    #[error("Session expired, sign in again at {redirect_to}")]
    ReauthenticationRequired { redirect_to: String },
    #[error("invalid call transition from {from:?} on {event:?}")]
    InvalidTransition { from: CallState, event: CallEvent },
}

impl Error {
    /// HTTP status carried by the error, if the backend answered at all.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    #[must_use]
    pub fn requires_reauthentication(&self) -> bool {
        matches!(self, Self::ReauthenticationRequired { .. })
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err)
        } else if err.is_decode() {
            Self::Parse(format!("Failed to decode response: {err}"))
        } else if err.is_builder() {
            Self::Serialization(format!("Failed to build request: {err}"))
        } else {
            Self::Network(err)
        }
    }
}
