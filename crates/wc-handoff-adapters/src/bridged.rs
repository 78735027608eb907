//! Wallet-session client whose WalletConnect instance lives in the extension
//! background. Pairing is requested over the relay and progress arrives as
//! broadcast events.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use wc_handoff_core::{
    AppMetadata, ApprovalFuture, ApprovedSession, BridgeEvent, BridgeMessage, DisconnectReason,
    EventSource, InitPayload, PairingProposal, PairingRequest, PortError, RelayChannel,
    WalletClient, WalletSessionPort,
};

#[derive(Debug, Clone)]
pub struct BridgedWalletSession<C> {
    channel: C,
    target_id: String,
}

impl<C> BridgedWalletSession<C>
where
    C: RelayChannel + EventSource + Clone + 'static,
{
    pub fn new(channel: C, target_id: impl Into<String>) -> Self {
        Self {
            channel,
            target_id: target_id.into(),
        }
    }
}

#[async_trait]
impl<C> WalletSessionPort for BridgedWalletSession<C>
where
    C: RelayChannel + EventSource + Clone + 'static,
{
    type Client = BridgedClient<C>;

    async fn init(
        &self,
        project_id: &str,
        metadata: &AppMetadata,
    ) -> Result<Self::Client, PortError> {
        debug!(target_id = %self.target_id, "bridged wallet client ready");
        Ok(BridgedClient {
            channel: self.channel.clone(),
            target_id: self.target_id.clone(),
            project_id: project_id.to_owned(),
            metadata: metadata.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct BridgedClient<C> {
    channel: C,
    target_id: String,
    project_id: String,
    metadata: AppMetadata,
}

impl<C> BridgedClient<C>
where
    C: RelayChannel + EventSource + Clone + 'static,
{
    async fn await_uri(&self) -> Result<String, PortError> {
        loop {
            match self.channel.next_event().await? {
                BridgeEvent::UriGenerated { payload } => {
                    return payload
                        .uri
                        .filter(|u| !u.trim().is_empty())
                        .ok_or_else(|| {
                            PortError::Transport("Failed to generate connection URI".to_owned())
                        });
                }
                BridgeEvent::Error { payload } | BridgeEvent::SessionRejected { payload } => {
                    return Err(PortError::Rejected(payload.error.unwrap_or_else(|| {
                        "An error occurred during connection".to_owned()
                    })));
                }
                BridgeEvent::SessionApproved { payload } => {
                    warn!(
                        topic = %payload.session.topic,
                        "ignoring approval that arrived before a URI"
                    );
                }
            }
        }
    }
}

#[async_trait]
impl<C> WalletClient for BridgedClient<C>
where
    C: RelayChannel + EventSource + Clone + 'static,
{
    async fn connect(&self, request: &PairingRequest) -> Result<PairingProposal, PortError> {
        let message = BridgeMessage::InitWalletConnect {
            payload: InitPayload {
                project_id: self.project_id.clone(),
                metadata: self.metadata.clone(),
                required_namespaces: request.required_namespaces.clone(),
            },
        };
        let ack = self
            .channel
            .send(&self.target_id, message)
            .await
            .map_err(|e| match e {
                PortError::Unreachable(m) => {
                    PortError::Unreachable(format!("Extension Runtime Error: {m}"))
                }
                other => other,
            })?;
        if !ack.success {
            return Err(PortError::Rejected(ack.error.unwrap_or_else(|| {
                "Failed to initialize WalletConnect".to_owned()
            })));
        }

        let uri = self.await_uri().await?;
        info!("pairing URI received from extension");

        let approval: ApprovalFuture = Box::pin(await_approval(self.channel.clone()));
        Ok(PairingProposal { uri, approval })
    }

    // The background owns the WalletConnect client, so nothing is tracked here.
    fn active_pairings(&self) -> Result<Vec<String>, PortError> {
        Ok(Vec::new())
    }

    fn sessions(&self) -> Result<Vec<String>, PortError> {
        Ok(Vec::new())
    }

    async fn disconnect_pairing(&self, _topic: &str) -> Result<(), PortError> {
        Err(PortError::NotImplemented("bridged.disconnect_pairing"))
    }

    async fn disconnect_session(
        &self,
        _topic: &str,
        _reason: &DisconnectReason,
    ) -> Result<(), PortError> {
        Err(PortError::NotImplemented("bridged.disconnect_session"))
    }
}

async fn await_approval<C>(channel: C) -> Result<ApprovedSession, PortError>
where
    C: EventSource,
{
    loop {
        match channel.next_event().await? {
            BridgeEvent::SessionApproved { payload } => return Ok(payload.session),
            BridgeEvent::SessionRejected { payload } => {
                return Err(PortError::Rejected(
                    payload
                        .error
                        .unwrap_or_else(|| "Connection was rejected".to_owned()),
                ));
            }
            BridgeEvent::Error { payload } => {
                return Err(PortError::Rejected(payload.error.unwrap_or_else(|| {
                    "An error occurred during connection".to_owned()
                })));
            }
            BridgeEvent::UriGenerated { .. } => {
                debug!("ignoring repeated URI while awaiting approval");
            }
        }
    }
}
