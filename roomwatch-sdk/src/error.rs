//! Error classification for remote calls.

use thiserror::Error;

/// Failure of a single remote call.
///
/// The split matters to callers: `AuthExpired` means the credential is dead
/// and a refresh may repair the call; everything else is either transient or
/// a service-side rejection and is retried (or not) at the action level.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication expired (status {status})")]
    AuthExpired { status: u16 },

    #[error("service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ApiError {
    /// Classify a non-success HTTP status. The service signals a dead
    /// credential anywhere in the 401..=403 range.
    pub fn from_status(status: u16, body: String) -> Self {
        if (401..=403).contains(&status) {
            ApiError::AuthExpired { status }
        } else {
            ApiError::Status { status, body }
        }
    }

    pub fn is_auth_expired(&self) -> bool {
        matches!(self, ApiError::AuthExpired { .. })
    }
}
