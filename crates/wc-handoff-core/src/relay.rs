//! Handoff of an approved session to the extension's persistence authority.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::domain::ApprovedSession;
use crate::messages::BridgeMessage;
use crate::ports::{DurabilityPort, PortError, RelayChannel};
use crate::state_machine::ConnectError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    Reloaded,
    /// The consumer answered but did not confirm the reload.
    Declined(String),
    Failed(String),
    TimedOut,
}

impl ReloadOutcome {
    pub fn is_reloaded(&self) -> bool {
        matches!(self, Self::Reloaded)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffReport {
    pub topic: String,
    pub storage_persisted: bool,
    pub reload: ReloadOutcome,
}

pub struct SessionRelay<R, D>
where
    R: RelayChannel,
    D: DurabilityPort,
{
    pub channel: R,
    pub durability: D,
    target_id: String,
    grace: Duration,
    reload_timeout: Duration,
}

impl<R, D> SessionRelay<R, D>
where
    R: RelayChannel,
    D: DurabilityPort,
{
    pub fn new(
        channel: R,
        durability: D,
        target_id: impl Into<String>,
        grace: Duration,
        reload_timeout: Duration,
    ) -> Self {
        Self {
            channel,
            durability,
            target_id: target_id.into(),
            grace,
            reload_timeout,
        }
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    /// Save the session remotely, then ask the downstream consumer to reload.
    /// Only the save decides the outcome.
    pub async fn handoff(&self, session: &ApprovedSession) -> Result<HandoffReport, ConnectError> {
        let storage_persisted = self.durability_hint().await;
        self.save(session).await?;
        let reload = self.force_reload().await;
        Ok(HandoffReport {
            topic: session.topic.clone(),
            storage_persisted,
            reload,
        })
    }

    /// Best-effort: request persistent local storage and let pending writes flush.
    pub async fn durability_hint(&self) -> bool {
        let persisted = match self.durability.request_persistence().await {
            Ok(granted) => {
                debug!(granted, "persistent storage requested");
                granted
            }
            Err(e) => {
                debug!(error = %e, "persistent storage request failed");
                false
            }
        };
        if !self.grace.is_zero() {
            tokio::time::sleep(self.grace).await;
        }
        persisted
    }

    pub async fn save(&self, session: &ApprovedSession) -> Result<(), ConnectError> {
        let message = BridgeMessage::WalletConnected {
            session: session.durable(),
        };
        let ack = self
            .channel
            .send(&self.target_id, message)
            .await
            .map_err(|e| match e {
                PortError::Unreachable(m) => {
                    ConnectError::Relay(format!("Extension runtime error: {m}"))
                }
                other => ConnectError::Relay(format!("Failed to save session: {}", other.detail())),
            })?;
        if !ack.success {
            let reason = ack
                .error
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| "Extension failed to acknowledge session save.".to_owned());
            return Err(ConnectError::Relay(reason));
        }
        info!(topic = %session.topic, target = %self.target_id, "extension confirmed session save");
        Ok(())
    }

    pub async fn force_reload(&self) -> ReloadOutcome {
        let send = self
            .channel
            .send(&self.target_id, BridgeMessage::BridgeForceReload);
        let outcome = match tokio::time::timeout(self.reload_timeout, send).await {
            Err(_) => ReloadOutcome::TimedOut,
            Ok(Err(e)) => ReloadOutcome::Failed(e.detail()),
            Ok(Ok(ack)) if ack.success => ReloadOutcome::Reloaded,
            Ok(Ok(ack)) => ReloadOutcome::Declined(
                ack.error
                    .unwrap_or_else(|| "reload not acknowledged".to_owned()),
            ),
        };
        match &outcome {
            ReloadOutcome::Reloaded => info!("session consumer reloaded"),
            other => warn!(outcome = ?other, "failed to force session consumer reload"),
        }
        outcome
    }
}
