//! Login-token management: restore, interactive login, refresh.
//!
//! Exactly one token is active at a time. Depending on configuration it is
//! persisted either to a JSON file or to the store's `tokens` table, where
//! activating a new token retires the previous one in the same transaction.

use std::path::PathBuf;
use std::sync::Arc;

use roomwatch_sdk::client::RoomService;
use serde::{Deserialize, Serialize};

use crate::db::Db;
use crate::error::AgentError;

/// Where the active token is persisted between runs.
#[derive(Debug, Clone)]
pub enum TokenBacking {
    File(PathBuf),
    Store,
}

/// Supplies the out-of-band verification code during phone auth.
///
/// This is the suspension point of the login flow: the orchestrator loop
/// stays responsive while an implementation waits for operator input.
#[allow(async_fn_in_trait)]
pub trait CodePrompt {
    async fn verification_code(&self, phone: &str) -> anyhow::Result<String>;
}

/// Reads the verification code from stdin, off the async loop.
pub struct StdinPrompt;

impl CodePrompt for StdinPrompt {
    async fn verification_code(&self, phone: &str) -> anyhow::Result<String> {
        println!("Verification code sent to {phone}. Enter it to continue:");
        let line = tokio::task::spawn_blocking(|| {
            let mut buf = String::new();
            std::io::stdin().read_line(&mut buf).map(|_| buf)
        })
        .await??;
        Ok(line.trim().to_string())
    }
}

/// On-disk token shape, shared with the store backing.
#[derive(Debug, Serialize, Deserialize)]
struct SavedToken {
    user_profile: SavedProfile,
    auth_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedProfile {
    user_id: i64,
}

/// Obtains and refreshes the login token used for all API calls.
pub struct CredentialManager {
    phone: String,
    backing: TokenBacking,
    db: Arc<Db>,
    authenticated: bool,
}

impl CredentialManager {
    pub fn new(phone: String, backing: TokenBacking, db: Arc<Db>) -> Self {
        Self { phone, backing, db, authenticated: false }
    }

    /// No-op when a session is already installed. Otherwise restores a
    /// persisted token, falling back to an interactive login.
    pub async fn ensure_authenticated<S: RoomService, P: CodePrompt>(
        &mut self,
        service: &S,
        prompt: &P,
    ) -> Result<(), AgentError> {
        if self.authenticated {
            return Ok(());
        }
        if self.restore(service)? {
            self.authenticated = true;
            return Ok(());
        }
        self.login(service, prompt).await
    }

    /// Forces a full login cycle; invoked when the service reports the
    /// current token expired. Callers bound how often they invoke this for
    /// a single logical operation.
    pub async fn refresh<S: RoomService, P: CodePrompt>(
        &mut self,
        service: &S,
        prompt: &P,
    ) -> Result<(), AgentError> {
        self.authenticated = false;
        service.clear_session();
        self.login(service, prompt).await
    }

    fn restore<S: RoomService>(&self, service: &S) -> Result<bool, AgentError> {
        match &self.backing {
            TokenBacking::File(path) => match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<SavedToken>(&bytes) {
                    Ok(saved) => {
                        service.set_session(saved.user_profile.user_id, &saved.auth_token);
                        tracing::info!(path = %path.display(), "restored token from file");
                        Ok(true)
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "token file unreadable, logging in");
                        Ok(false)
                    }
                },
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "no token file, logging in");
                    Ok(false)
                }
            },
            TokenBacking::Store => match self.db.active_token()? {
                Some(token) => {
                    service.set_session(token.user_id, &token.auth_token);
                    tracing::info!(user_id = token.user_id, "restored token from store");
                    Ok(true)
                }
                None => Ok(false),
            },
        }
    }

    /// Runs the two-step phone auth. Any non-success along the way is
    /// fatal: without a working credential no further remote call can
    /// succeed.
    async fn login<S: RoomService, P: CodePrompt>(
        &mut self,
        service: &S,
        prompt: &P,
    ) -> Result<(), AgentError> {
        tracing::info!(phone = %self.phone, "starting phone auth");
        let started = service
            .start_phone_auth(&self.phone)
            .await
            .map_err(|e| AgentError::AuthenticationFailed(format!("start phone auth: {e}")))?;
        if !started.success {
            return Err(AgentError::AuthenticationFailed(
                "service declined to send a verification code".to_string(),
            ));
        }

        let code = prompt
            .verification_code(&self.phone)
            .await
            .map_err(|e| AgentError::AuthenticationFailed(format!("verification code: {e}")))?;

        let reply = service
            .complete_phone_auth(&self.phone, &code)
            .await
            .map_err(|e| AgentError::AuthenticationFailed(format!("complete phone auth: {e}")))?;
        if !reply.success {
            return Err(AgentError::AuthenticationFailed(
                "verification code rejected".to_string(),
            ));
        }
        let (profile, auth_token) = match (reply.user_profile, reply.auth_token) {
            (Some(p), Some(t)) => (p, t),
            _ => {
                return Err(AgentError::AuthenticationFailed(
                    "login reply missing profile or token".to_string(),
                ))
            }
        };

        service.set_session(profile.user_id, &auth_token);
        self.persist(profile.user_id, &auth_token)?;
        self.authenticated = true;
        tracing::info!(user_id = profile.user_id, "login complete");
        Ok(())
    }

    fn persist(&self, user_id: i64, auth_token: &str) -> Result<(), AgentError> {
        match &self.backing {
            TokenBacking::File(path) => {
                let saved = SavedToken {
                    user_profile: SavedProfile { user_id },
                    auth_token: auth_token.to_string(),
                };
                let bytes = serde_json::to_vec(&saved).map_err(std::io::Error::other)?;
                std::fs::write(path, bytes)?;
            }
            TokenBacking::Store => self.db.save_token(user_id, auth_token)?,
        }
        Ok(())
    }
}
