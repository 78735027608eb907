//! Wire shapes exchanged with the extension runtime.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{AppMetadata, ApprovedSession, DurableSession, RequiredNamespace};

/// Requests sent from the connect page to the extension background.
/// Each one is answered with a single `RelayAcknowledgment`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BridgeMessage {
    #[serde(rename = "INIT_WALLETCONNECT")]
    InitWalletConnect { payload: InitPayload },
    #[serde(rename = "WALLET_CONNECTED")]
    WalletConnected { session: DurableSession },
    #[serde(rename = "BRIDGE_FORCE_RELOAD")]
    BridgeForceReload,
}

impl BridgeMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InitWalletConnect { .. } => "INIT_WALLETCONNECT",
            Self::WalletConnected { .. } => "WALLET_CONNECTED",
            Self::BridgeForceReload => "BRIDGE_FORCE_RELOAD",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitPayload {
    pub project_id: String,
    pub metadata: AppMetadata,
    pub required_namespaces: BTreeMap<String, RequiredNamespace>,
}

/// Broadcasts pushed from the extension background to the connect page.
/// These carry no response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BridgeEvent {
    #[serde(rename = "WC_URI_GENERATED")]
    UriGenerated { payload: UriPayload },
    #[serde(rename = "WC_SESSION_APPROVED")]
    SessionApproved { payload: SessionPayload },
    #[serde(rename = "WC_SESSION_REJECTED")]
    SessionRejected { payload: ErrorPayload },
    #[serde(rename = "WC_ERROR")]
    Error { payload: ErrorPayload },
}

impl BridgeEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UriGenerated { .. } => "WC_URI_GENERATED",
            Self::SessionApproved { .. } => "WC_SESSION_APPROVED",
            Self::SessionRejected { .. } => "WC_SESSION_REJECTED",
            Self::Error { .. } => "WC_ERROR",
        }
    }

    pub fn uri_generated(uri: impl Into<String>) -> Self {
        Self::UriGenerated {
            payload: UriPayload {
                uri: Some(uri.into()),
            },
        }
    }

    pub fn session_approved(session: ApprovedSession) -> Self {
        Self::SessionApproved {
            payload: SessionPayload { session },
        }
    }

    pub fn session_rejected(error: impl Into<String>) -> Self {
        Self::SessionRejected {
            payload: ErrorPayload {
                error: Some(error.into()),
            },
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self::Error {
            payload: ErrorPayload {
                error: Some(error.into()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UriPayload {
    #[serde(default)]
    pub uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPayload {
    pub session: ApprovedSession,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub error: Option<String>,
}
