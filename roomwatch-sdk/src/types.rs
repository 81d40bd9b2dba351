//! Wire types for the audio-room service API.
//!
//! Replies are deserialized leniently: on failure the service omits most
//! fields, so everything join-derived defaults to empty. Listing and user
//! records carry flattened extras because the service adds fields between
//! app builds and we persist whatever it sends.

use serde::{Deserialize, Serialize};

/// Reply from the channel listing endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelList {
    #[serde(default)]
    pub channels: Vec<ChannelSummary>,
}

/// One advertised channel in the listing.
///
/// `(channel_id, channel)` is the channel's identity and never changes for
/// the lifetime of a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSummary {
    pub channel_id: i64,
    /// URL-safe room name.
    pub channel: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub num_speakers: i64,
    #[serde(default)]
    pub num_all: i64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A participant as reported by the join endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoomUser {
    pub user_id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_speaker: bool,
    #[serde(default)]
    pub is_moderator: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Reply from the join endpoint.
///
/// On `success = false` only `error_message` is meaningful.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JoinReply {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub is_empty: bool,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub rtm_token: Option<String>,
    #[serde(default)]
    pub pubnub_token: Option<String>,
    #[serde(default)]
    pub pubnub_origin: Option<String>,
    #[serde(default)]
    pub pubnub_heartbeat_value: Option<i64>,
    #[serde(default)]
    pub pubnub_heartbeat_interval: Option<i64>,
    #[serde(default)]
    pub pubnub_enable: Option<bool>,
    #[serde(default)]
    pub agora_native_mute: Option<bool>,
    #[serde(default)]
    pub users: Vec<RoomUser>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl JoinReply {
    /// True when the service reports the room as gone for good, as opposed
    /// to a transient join failure.
    pub fn room_gone(&self) -> bool {
        self.error_message
            .as_deref()
            .is_some_and(|m| m.contains("no longer available"))
    }
}

/// Reply from the start-phone-auth endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartAuthReply {
    #[serde(default)]
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: i64,
}

/// Reply from the complete-phone-auth endpoint. The profile and token are
/// only present when `success` is true.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompleteAuthReply {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub user_profile: Option<UserProfile>,
    #[serde(default)]
    pub auth_token: Option<String>,
}
