//! The lifecycle orchestrator: pulls every known channel through
//! discover → join → monitor → end.
//!
//! Single-threaded cooperative loop. One action runs at a time, so each
//! channel row is touched by at most one in-flight operation and neither
//! the store nor the registry needs extra locking. A randomized wait
//! follows every action; this is a rate limit against the remote service,
//! not a tuning knob, and holds even when configured near zero.
//!
//! Cancellation is cooperative: the token is checked between actions and an
//! in-flight remote call is allowed to finish.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio_util::sync::CancellationToken;

use roomwatch_sdk::client::RoomService;
use roomwatch_sdk::types::ChannelList;

use crate::credentials::{CodePrompt, CredentialManager};
use crate::db::Db;
use crate::error::AgentError;
use crate::queue::{Action, WorkQueues};
use crate::registry::{ChannelKey, Phase, Registry};

/// Tuning for the orchestrator loop.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often listing counters of already-known channels are refreshed.
    pub refresh_interval: Duration,
    /// Attempt budget for one listing call, including credential refreshes.
    pub max_retries: u32,
    /// Cap on the persisted participant list per channel.
    pub user_limit: usize,
    /// Wait window in seconds after join-class actions and discover.
    pub join_wait: (u64, u64),
    /// Wait window in seconds after status checks.
    pub check_wait: (u64, u64),
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(3600),
            max_retries: 5,
            user_limit: 500,
            join_wait: (5, 20),
            check_wait: (5, 10),
        }
    }
}

/// The control loop tracking every known channel's state and scheduling
/// the next action for each.
pub struct Worker<S, P> {
    service: S,
    prompt: P,
    db: Arc<Db>,
    credentials: CredentialManager,
    registry: Registry,
    queues: WorkQueues,
    config: WorkerConfig,
    cancel: CancellationToken,
    last_refresh: Option<Instant>,
}

impl<S: RoomService, P: CodePrompt> Worker<S, P> {
    pub fn new(
        service: S,
        prompt: P,
        db: Arc<Db>,
        credentials: CredentialManager,
        config: WorkerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            service,
            prompt,
            db,
            credentials,
            registry: Registry::new(),
            queues: WorkQueues::new(),
            config,
            cancel,
            last_refresh: None,
        }
    }

    pub async fn ensure_authenticated(&mut self) -> Result<(), AgentError> {
        self.credentials
            .ensure_authenticated(&self.service, &self.prompt)
            .await
    }

    /// Rebuild the in-memory registry and queues from the store's alive
    /// set. Rows that already carry a join token go straight to monitoring;
    /// the rest are re-queued for a join.
    pub fn bootstrap(&mut self) -> Result<(), AgentError> {
        for row in self.db.alive_channels()? {
            let key = ChannelKey::new(row.channel_id, row.channel);
            if self.registry.contains(&key) {
                continue;
            }
            if row.token.is_some() {
                self.registry.add(key.clone(), Phase::Monitoring);
                self.queues.enqueue(Action::CheckStatus, key);
            } else {
                self.registry.add(key.clone(), Phase::PendingJoin);
                self.queues.enqueue(Action::Join, key);
            }
        }
        tracing::info!(
            channels = self.registry.len(),
            pending_join = self.queues.len(Action::Join),
            pending_check = self.queues.len(Action::CheckStatus),
            "bootstrapped from store"
        );
        Ok(())
    }

    /// Drive cycles until cancelled. A discover that failed for a
    /// non-credential reason only costs this cycle.
    pub async fn run(&mut self) -> Result<(), AgentError> {
        while !self.cancel.is_cancelled() {
            match self.run_cycle().await {
                Ok(()) => {}
                Err(AgentError::Remote(e)) => {
                    tracing::warn!(error = %e, "discover cycle failed, skipping");
                    self.wait(self.config.join_wait).await;
                }
                Err(e) => return Err(e),
            }
        }
        tracing::info!("cancellation requested, stopping");
        Ok(())
    }

    /// One outer cycle: discover, drain the join queue, drain the check
    /// queue. A failed discover skips the drains so joins never run against
    /// a listing that never arrived.
    ///
    /// Each drain handles at most the entries present when it starts;
    /// anything re-enqueued mid-drain (a still-alive monitored channel, a
    /// failed join) waits for the next cycle, which is what keeps discover
    /// re-firing instead of starving behind the monitoring loop.
    pub async fn run_cycle(&mut self) -> Result<(), AgentError> {
        self.discover().await?;
        self.wait(self.config.join_wait).await;

        for _ in 0..self.queues.len(Action::Join) {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            let Some(key) = self.queues.dequeue(Action::Join) else { break };
            self.join(key).await?;
            self.wait(self.config.join_wait).await;
        }
        for _ in 0..self.queues.len(Action::CheckStatus) {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            let Some(key) = self.queues.dequeue(Action::CheckStatus) else { break };
            self.check_status(key, true).await?;
            self.wait(self.config.check_wait).await;
        }
        Ok(())
    }

    /// One listing pass. Auth expiry triggers a credential refresh and a
    /// retry within the attempt budget; exhausting the budget on expiry is
    /// fatal, any other failure is a cycle-level error for the outer loop.
    pub async fn discover(&mut self) -> Result<(), AgentError> {
        for attempt in 1..=self.config.max_retries {
            match self.service.list_channels().await {
                Ok(list) => return self.absorb_listing(list),
                Err(e) if e.is_auth_expired() => {
                    tracing::warn!(attempt, error = %e, "listing rejected, credential expired");
                    if attempt == self.config.max_retries {
                        break;
                    }
                    self.credentials.refresh(&self.service, &self.prompt).await?;
                }
                Err(e) => return Err(AgentError::Remote(e)),
            }
        }
        Err(AgentError::AuthenticationFailed(format!(
            "listing still rejected after {} attempts",
            self.config.max_retries
        )))
    }

    fn absorb_listing(&mut self, list: ChannelList) -> Result<(), AgentError> {
        let refresh_due = self
            .last_refresh
            .is_none_or(|at| at.elapsed() >= self.config.refresh_interval);
        if refresh_due {
            self.last_refresh = Some(Instant::now());
        }

        for summary in list.channels {
            let key = ChannelKey::new(summary.channel_id, summary.channel.clone());
            if self.registry.contains(&key) {
                if refresh_due {
                    tracing::debug!(channel = %key, "refreshing listing counters");
                    self.db
                        .update_counts(summary.channel_id, summary.num_speakers, summary.num_all)?;
                }
                continue;
            }
            // A room that ended once never comes back under the same id;
            // stale listings may still advertise it.
            if let Some(row) = self.db.channel(summary.channel_id)? {
                if !row.success {
                    tracing::debug!(channel = %key, "listing still advertises an ended channel");
                    continue;
                }
            }
            tracing::info!(channel = %key, num_all = summary.num_all, "discovered new channel");
            self.db.insert_channel(&summary)?;
            self.registry.add(key.clone(), Phase::PendingJoin);
            self.queues.enqueue(Action::Join, key);
        }
        Ok(())
    }

    /// Handle one channel from the join queue. Probes for end-of-life
    /// first so an already-ended room never sees a join call; the probe
    /// must not create a monitoring entry for a channel we have not joined.
    pub async fn join(&mut self, key: ChannelKey) -> Result<(), AgentError> {
        if self.check_status(key.clone(), false).await? {
            return Ok(());
        }
        match self.service.join_channel(&key.name).await {
            Ok(reply) if reply.success => {
                self.db.record_join(key.id, &reply, self.config.user_limit)?;
                self.registry.set_phase(&key, Phase::Monitoring);
                tracing::info!(
                    channel = %key,
                    users = reply.users.len().min(self.config.user_limit),
                    is_empty = reply.is_empty,
                    "joined channel"
                );
                self.queues.enqueue(Action::CheckStatus, key);
            }
            Ok(reply) if reply.room_gone() => {
                tracing::info!(channel = %key, "room gone before join");
                self.end_channel(&key)?;
            }
            Ok(reply) => {
                // Declined for some other reason; a discovered channel is
                // never dropped, so try again later.
                tracing::warn!(
                    channel = %key,
                    error = reply.error_message.as_deref().unwrap_or("unknown"),
                    "join declined, requeueing"
                );
                self.queues.enqueue(Action::Join, key);
            }
            Err(e) => {
                tracing::warn!(channel = %key, error = %e, "join failed, requeueing");
                self.queues.enqueue(Action::Join, key);
            }
        }
        Ok(())
    }

    /// Probe a channel for end-of-life; returns true when the room has
    /// ended. `requeue` keeps a live channel in the monitoring loop; the
    /// pre-join probe opts out.
    pub async fn check_status(
        &mut self,
        key: ChannelKey,
        requeue: bool,
    ) -> Result<bool, AgentError> {
        match self.service.room_ended(&key.name).await {
            Ok(true) => {
                tracing::info!(channel = %key, "room ended");
                self.end_channel(&key)?;
                Ok(true)
            }
            Ok(false) => {
                if requeue {
                    self.queues.enqueue(Action::CheckStatus, key);
                }
                Ok(false)
            }
            Err(e) => {
                // A failed probe says nothing about the room; keep it
                // monitored rather than dropping it.
                tracing::warn!(channel = %key, error = %e, "status probe failed");
                if requeue {
                    self.queues.enqueue(Action::CheckStatus, key);
                }
                Ok(false)
            }
        }
    }

    /// Terminal transition. Safe to call twice: both the store update and
    /// the registry removal tolerate an already-ended channel.
    pub fn end_channel(&mut self, key: &ChannelKey) -> Result<(), AgentError> {
        if !self.db.mark_ended(key.id)? {
            tracing::debug!(channel = %key, "store row already ended or missing");
        }
        if !self.registry.remove(key) {
            tracing::debug!(channel = %key, "channel already absent from registry");
        }
        Ok(())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn queues(&self) -> &WorkQueues {
        &self.queues
    }

    async fn wait(&self, (min, max): (u64, u64)) {
        let secs = rand::thread_rng().gen_range(min..=max);
        if secs > 0 {
            tracing::debug!(secs, "waiting before next action");
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
            _ = self.cancel.cancelled() => {}
        }
    }
}
