use std::fmt;
use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{
    AppMetadata, ApprovedSession, DisconnectReason, DisplayArtifact, PairingRequest, QrOptions,
    RelayAcknowledgment,
};
use crate::messages::{BridgeEvent, BridgeMessage};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PortError {
    #[error("port not implemented: {0}")]
    NotImplemented(&'static str),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("target unreachable: {0}")]
    Unreachable(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("policy error: {0}")]
    Policy(String),
    #[error("{0}")]
    Rejected(String),
}

impl PortError {
    /// Message without the variant prefix, as a user should read it.
    pub fn detail(&self) -> String {
        match self {
            Self::NotImplemented(what) => format!("{what} is not implemented"),
            Self::Transport(m)
            | Self::Unreachable(m)
            | Self::Validation(m)
            | Self::NotFound(m)
            | Self::Policy(m)
            | Self::Rejected(m) => m.clone(),
        }
    }
}

pub type ApprovalFuture =
    Pin<Box<dyn Future<Output = Result<ApprovedSession, PortError>> + Send + 'static>>;

/// Result of `connect`: the URI to display and the pending wallet approval.
pub struct PairingProposal {
    pub uri: String,
    pub approval: ApprovalFuture,
}

impl fmt::Debug for PairingProposal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingProposal")
            .field("uri", &self.uri)
            .finish_non_exhaustive()
    }
}

/// Factory for the wallet-session client. Called at most once per connector.
#[async_trait]
pub trait WalletSessionPort: Send + Sync {
    type Client: WalletClient + 'static;

    async fn init(
        &self,
        project_id: &str,
        metadata: &AppMetadata,
    ) -> Result<Self::Client, PortError>;
}

#[async_trait]
pub trait WalletClient: Send + Sync {
    async fn connect(&self, request: &PairingRequest) -> Result<PairingProposal, PortError>;
    /// Topics of pairings that are still active (pending proposals included).
    fn active_pairings(&self) -> Result<Vec<String>, PortError>;
    fn sessions(&self) -> Result<Vec<String>, PortError>;
    async fn disconnect_pairing(&self, topic: &str) -> Result<(), PortError>;
    async fn disconnect_session(
        &self,
        topic: &str,
        reason: &DisconnectReason,
    ) -> Result<(), PortError>;
}

/// Request/response channel to another execution context.
/// `Unreachable` is reserved for delivery failures; an application-level
/// refusal comes back as `Ok` with `success: false`.
#[async_trait]
pub trait RelayChannel: Send + Sync {
    async fn send(
        &self,
        target: &str,
        message: BridgeMessage,
    ) -> Result<RelayAcknowledgment, PortError>;
}

#[async_trait]
pub trait EventSource: Send + Sync {
    async fn next_event(&self) -> Result<BridgeEvent, PortError>;
}

pub trait DisplayPort: Send + Sync {
    fn render(&self, uri: &str, options: &QrOptions) -> Result<DisplayArtifact, PortError>;
}

#[async_trait]
pub trait DurabilityPort: Send + Sync {
    /// Ask local storage to avoid eviction. `Ok(false)` means the request was declined.
    async fn request_persistence(&self) -> Result<bool, PortError>;
}
