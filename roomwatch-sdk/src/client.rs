//! HTTP client for the audio-room service.
//!
//! Every API call carries the device headers the service expects from its
//! mobile app, plus the session headers (auth token and user id) once a
//! login has completed. The end-of-life probe is different: it fetches the
//! room's public web page unauthenticated and looks for the ended marker,
//! which is far cheaper for the service than an API call.

use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde_json::json;

use crate::error::ApiError;
use crate::types::{ChannelList, CompleteAuthReply, JoinReply, StartAuthReply};

const USER_AGENT: &str = "clubhouse/269 (iPhone; iOS 14.1; Scale/3.00)";
const APP_VERSION: &str = "0.1.15";
const APP_BUILD: &str = "269";

/// Marker text on the public room page once a room has ended.
const ENDED_MARKER: &str = "This room has already ended";

/// Contract the monitoring agent requires from the remote service.
///
/// Implemented by [`RoomClient`] for the real service and by scripted fakes
/// in tests. All calls except `room_ended` require a session once the
/// service decides to enforce one; an expired session surfaces as
/// [`ApiError::AuthExpired`].
#[allow(async_fn_in_trait)]
pub trait RoomService {
    async fn list_channels(&self) -> Result<ChannelList, ApiError>;
    async fn join_channel(&self, channel: &str) -> Result<JoinReply, ApiError>;
    /// Probe whether a room has ended. Does not require a session.
    async fn room_ended(&self, channel: &str) -> Result<bool, ApiError>;
    async fn start_phone_auth(&self, phone: &str) -> Result<StartAuthReply, ApiError>;
    async fn complete_phone_auth(
        &self,
        phone: &str,
        code: &str,
    ) -> Result<CompleteAuthReply, ApiError>;
    /// Install the session carried on subsequent calls.
    fn set_session(&self, user_id: i64, auth_token: &str);
    fn clear_session(&self);
}

/// Connection parameters for [`RoomClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the JSON API.
    pub api_url: String,
    /// Base URL of the public web pages (room probe).
    pub web_url: String,
    /// Device identity sent with every request.
    pub device_id: String,
}

#[derive(Debug, Clone)]
struct Session {
    user_id: i64,
    auth_token: String,
}

/// reqwest-backed implementation of [`RoomService`].
pub struct RoomClient {
    http: reqwest::Client,
    config: ClientConfig,
    session: Mutex<Option<Session>>,
}

impl RoomClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            session: Mutex::new(None),
        }
    }

    fn api_headers(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let req = req
            .header("User-Agent", USER_AGENT)
            .header("CH-Languages", "en-US")
            .header("CH-Locale", "en_US")
            .header("CH-AppVersion", APP_VERSION)
            .header("CH-AppBuild", APP_BUILD)
            .header("CH-DeviceId", &self.config.device_id);
        match self.session.lock().unwrap().as_ref() {
            Some(session) => req
                .header("Authorization", format!("Token {}", session.auth_token))
                .header("CH-UserID", session.user_id.to_string()),
            None => req,
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{path}", self.config.api_url.trim_end_matches('/'))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let resp = self.api_headers(self.http.get(self.api_url(path))).send().await?;
        Self::decode(resp).await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, ApiError> {
        let resp = self
            .api_headers(self.http.post(self.api_url(path)))
            .json(&body)
            .send()
            .await?;
        Self::decode(resp).await
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ApiError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status.as_u16(), body));
        }
        Ok(resp.json::<T>().await?)
    }
}

impl RoomService for RoomClient {
    async fn list_channels(&self) -> Result<ChannelList, ApiError> {
        self.get_json("get_channels").await
    }

    async fn join_channel(&self, channel: &str) -> Result<JoinReply, ApiError> {
        self.post_json("join_channel", json!({ "channel": channel })).await
    }

    async fn room_ended(&self, channel: &str) -> Result<bool, ApiError> {
        let url = format!("{}/room/{channel}", self.config.web_url.trim_end_matches('/'));
        let resp = self.http.get(&url).send().await?;
        let body = resp.text().await?;
        Ok(body.contains(ENDED_MARKER))
    }

    async fn start_phone_auth(&self, phone: &str) -> Result<StartAuthReply, ApiError> {
        self.post_json("start_phone_number_auth", json!({ "phone_number": phone }))
            .await
    }

    async fn complete_phone_auth(
        &self,
        phone: &str,
        code: &str,
    ) -> Result<CompleteAuthReply, ApiError> {
        self.post_json(
            "complete_phone_number_auth",
            json!({ "phone_number": phone, "verification_code": code }),
        )
        .await
    }

    fn set_session(&self, user_id: i64, auth_token: &str) {
        tracing::debug!(user_id, "session installed");
        *self.session.lock().unwrap() = Some(Session {
            user_id,
            auth_token: auth_token.to_string(),
        });
    }

    fn clear_session(&self) {
        *self.session.lock().unwrap() = None;
    }
}
