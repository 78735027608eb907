use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Initializing,
    AwaitingApproval,
    Validating,
    Persisting,
    Connected,
    Failed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Connected | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionAction {
    UriReady,
    ApprovalResolved,
    ProposalExpired,
    SessionAccepted,
    SessionPersisted,
    Fail,
    Retry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub reason: &'static str,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal connection transition: {from:?} --{action:?}-->")]
pub struct StateMachineError {
    pub from: ConnectionState,
    pub action: ConnectionAction,
}

pub fn connection_transition(
    from: ConnectionState,
    action: ConnectionAction,
) -> Result<(ConnectionState, StateTransition), StateMachineError> {
    use ConnectionAction as A;
    use ConnectionState as S;

    let (to, reason) = match (from, action) {
        (S::Initializing, A::UriReady) => (S::AwaitingApproval, "pairing_uri_displayed"),
        (S::AwaitingApproval, A::ApprovalResolved) => (S::Validating, "wallet_approved"),
        (S::AwaitingApproval, A::ProposalExpired) => (S::Initializing, "proposal_expired"),
        (S::Validating, A::SessionAccepted) => (S::Persisting, "session_valid"),
        (S::Persisting, A::SessionPersisted) => (S::Connected, "session_persisted"),
        (s, A::Fail) if !s.is_terminal() => (S::Failed, "attempt_failed"),
        (_, A::Retry) => (S::Initializing, "user_retry"),
        _ => return Err(StateMachineError { from, action }),
    };
    Ok((
        to,
        StateTransition {
            from,
            to,
            reason,
        },
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    Configuration,
    Capability,
    Approval,
    ProposalExpired,
    ChainMismatch,
    Relay,
    Display,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("{0}")]
    Configuration(String),
    #[error("{0}")]
    Capability(String),
    #[error("{0}")]
    Approval(String),
    #[error("proposal expired: {0}")]
    ProposalExpired(String),
    #[error(
        "Wallet did not approve the required chain ({required}). Your wallet approved: {}. \
         Please reconnect and approve all requested chains, or add the network to your wallet first.",
        approved_summary(.approved)
    )]
    ChainMismatch {
        required: String,
        approved: Vec<String>,
    },
    #[error("{0}")]
    Relay(String),
    #[error("{0}")]
    Display(String),
}

impl ConnectError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Configuration(_) => FailureKind::Configuration,
            Self::Capability(_) => FailureKind::Capability,
            Self::Approval(_) => FailureKind::Approval,
            Self::ProposalExpired(_) => FailureKind::ProposalExpired,
            Self::ChainMismatch { .. } => FailureKind::ChainMismatch,
            Self::Relay(_) => FailureKind::Relay,
            Self::Display(_) => FailureKind::Display,
        }
    }

    pub fn is_user_visible(&self) -> bool {
        !matches!(self, Self::ProposalExpired(_))
    }
}

fn approved_summary(approved: &[String]) -> String {
    if approved.is_empty() {
        "no chains".to_owned()
    } else {
        approved.join(", ")
    }
}

/// Approval failures mentioning expiry are the capability's way of saying the
/// proposal timed out.
pub fn is_expiry_message(message: &str) -> bool {
    message.to_lowercase().contains("expired")
}
