//! roomwatch-agent: lifecycle orchestration for live audio-room monitoring.
//!
//! Discovers channels advertised by the remote service, joins them to
//! capture interaction tokens and participant lists, and polls each one
//! until it ends. Observed state is persisted in SQLite; the service is
//! reached through `roomwatch-sdk`.

pub mod credentials;
pub mod db;
pub mod error;
pub mod queue;
pub mod registry;
pub mod worker;
