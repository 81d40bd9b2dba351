//! roomwatch-sdk: typed client for the audio-room service.
//!
//! Wraps the service's JSON API (phone auth, channel listing, join) and the
//! public web probe used to detect ended rooms. Consumers talk to the
//! [`client::RoomService`] trait; [`client::RoomClient`] is the HTTP
//! implementation.

pub mod client;
pub mod error;
pub mod types;

pub use client::{ClientConfig, RoomClient, RoomService};
pub use error::ApiError;
