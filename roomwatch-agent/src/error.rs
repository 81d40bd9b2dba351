//! Agent-level error taxonomy.

use roomwatch_sdk::ApiError;
use thiserror::Error;

/// Errors surfaced by the agent's components.
///
/// `AuthenticationFailed`, `Store` and `TokenFile` are fatal: without a
/// working credential or durable state no further work is meaningful.
/// `Remote` carries a failed discover cycle to the outer loop, which logs
/// it and skips the cycle.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("store failure: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("token file error: {0}")]
    TokenFile(#[from] std::io::Error),

    #[error("remote service call failed: {0}")]
    Remote(#[from] ApiError),
}
