//! Session Supervisor
//!
//! Detects a session that still reports `Connected` after its link or pump
//! died, tears it down and reconnects with exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::session::GatewaySession;
use crate::application::error::GatewayError;
use crate::domain::session::{GatewayEndpoint, SessionState};
use crate::infrastructure::gateway::reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
use crate::infrastructure::metrics;

/// Liveness watchdog for a [`GatewaySession`].
#[derive(Debug)]
pub struct SessionSupervisor {
    session: Arc<GatewaySession>,
    config: ReconnectConfig,
    check_interval: Duration,
    connect_on_start: bool,
}

impl SessionSupervisor {
    /// Create a supervisor polling every `check_interval`.
    #[must_use]
    pub const fn new(
        session: Arc<GatewaySession>,
        config: ReconnectConfig,
        check_interval: Duration,
    ) -> Self {
        Self {
            session,
            config,
            check_interval,
            connect_on_start: false,
        }
    }

    /// Also establish the first connection, with backoff, before polling.
    #[must_use]
    pub const fn with_initial_connect(mut self, enabled: bool) -> Self {
        self.connect_on_start = enabled;
        self
    }

    /// Supervise until cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`ReconnectError::MaxAttemptsExceeded`] when a reconnect runs
    /// out of attempts.
    pub async fn run(
        &self,
        endpoint: GatewayEndpoint,
        cancel: CancellationToken,
    ) -> Result<(), ReconnectError> {
        let mut policy = ReconnectPolicy::new(self.config.clone());

        if self.connect_on_start && !self.session.is_connected() {
            self.restore(&endpoint, &mut policy, &cancel).await?;
        }

        let mut interval = tokio::time::interval(self.check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::info!("Session supervisor stopped");
                    return Ok(());
                }
                _ = interval.tick() => {}
            }

            if self.session.state() == SessionState::Connected && !self.session.is_connected() {
                tracing::warn!(%endpoint, "Gateway session is dead, reconnecting");
                self.session.disconnect();
                self.restore(&endpoint, &mut policy, &cancel).await?;
            }
        }
    }

    /// Connect, backing off between failures. Returns once connected or
    /// cancelled.
    async fn restore(
        &self,
        endpoint: &GatewayEndpoint,
        policy: &mut ReconnectPolicy,
        cancel: &CancellationToken,
    ) -> Result<(), ReconnectError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            match self.session.connect(endpoint.clone()).await {
                Ok(true) => {
                    if policy.attempt_count() > 0 {
                        tracing::info!(attempts = policy.attempt_count(), "Gateway session restored");
                    }
                    policy.reset();
                    return Ok(());
                }
                Ok(false) => {}
                Err(GatewayError::InvalidState(state)) => {
                    tracing::debug!(state = state.as_str(), "Connect already in progress");
                    return Ok(());
                }
                Err(e) => tracing::warn!(error = %e, "Connect attempt failed"),
            }

            let Some(delay) = policy.next_delay() else {
                tracing::error!(attempts = policy.attempt_count(), "Giving up on gateway");
                return Err(ReconnectError::MaxAttemptsExceeded(policy.attempt_count()));
            };
            metrics::record_reconnect();
            tracing::info!(
                attempt = policy.attempt_count(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting to gateway"
            );

            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}
