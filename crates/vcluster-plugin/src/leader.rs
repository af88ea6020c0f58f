//! Leader gate
//!
//! The host runs leader election; the plugin only asks. Several replicas of a
//! plugin may be attached to several host replicas, and only the one next to
//! the leading host may start syncers. Standby replicas poll forever.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::host::{HostConnector, HostError, HostSession};
use crate::poll::PollConfig;
use crate::{Error, Result};

/// Non-leader answers between info-level progress logs. One minute at the
/// default interval.
pub const DEFAULT_LOG_EVERY: u64 = 12;

/// Blocks until the host reports leadership
#[derive(Clone)]
pub struct LeaderGate {
    connector: Arc<dyn HostConnector>,
    config: PollConfig,
    log_every: u64,
}

impl LeaderGate {
    /// Create a gate polling through `connector`
    pub fn new(connector: Arc<dyn HostConnector>, config: PollConfig) -> Self {
        Self {
            connector,
            config,
            log_every: DEFAULT_LOG_EVERY,
        }
    }

    /// Log every `n`th consecutive non-leader answer at info
    pub fn with_log_every(mut self, n: u64) -> Self {
        self.log_every = n.max(1);
        self
    }

    /// Poll until this instance leads.
    ///
    /// Transport failures drop the session and redial on the next poll. There
    /// is no overall timeout; only cancellation of `token` ends the wait early.
    pub async fn wait_for_leadership(&self, token: &CancellationToken) -> Result<()> {
        let mut session: Option<Box<dyn HostSession>> = None;
        let mut standby_polls = 0u64;

        info!("Waiting to become leader...");
        loop {
            if token.is_cancelled() {
                return Err(Error::cancelled("waiting for leadership"));
            }

            let outcome = tokio::select! {
                _ = token.cancelled() => return Err(Error::cancelled("waiting for leadership")),
                outcome = self.config.attempt(self.ask(&mut session)) => outcome,
            };

            match outcome {
                Ok(true) => {
                    info!(standby_polls, "Acquired leadership, starting syncers");
                    return Ok(());
                }
                Ok(false) => {
                    standby_polls += 1;
                    if standby_polls % self.log_every == 0 {
                        info!(standby_polls, "Still not leader, waiting...");
                    } else {
                        debug!(standby_polls, "Not leader");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Leader check failed, reconnecting...");
                }
            }

            if !self.config.pause(token).await {
                return Err(Error::cancelled("waiting for leadership"));
            }
        }
    }

    /// One leadership check. The session is kept only when the call succeeds.
    async fn ask(
        &self,
        session: &mut Option<Box<dyn HostSession>>,
    ) -> std::result::Result<bool, HostError> {
        let current = match session.take() {
            Some(existing) => existing,
            None => self.connector.connect().await?,
        };
        let leader = current.is_leader().await?;
        *session = Some(current);
        Ok(leader)
    }
}
