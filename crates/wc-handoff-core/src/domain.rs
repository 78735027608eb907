use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unix timestamp in seconds, as WalletConnect reports session expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnixSeconds(pub u64);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid chain id `{0}`: expected `<namespace>:<reference>`")]
pub struct ChainIdParseError(pub String);

/// CAIP-2 chain identifier such as `eip155:560048`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainId {
    namespace: String,
    reference: String,
}

impl ChainId {
    pub fn new(namespace: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            reference: reference.into(),
        }
    }

    pub fn eip155(chain_id: u64) -> Self {
        Self::new("eip155", chain_id.to_string())
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.reference)
    }
}

impl FromStr for ChainId {
    type Err = ChainIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.split_once(':') {
            Some((ns, reference))
                if !ns.is_empty() && !reference.is_empty() && !reference.contains(':') =>
            {
                Ok(Self::new(ns, reference))
            }
            _ => Err(ChainIdParseError(s.to_owned())),
        }
    }
}

impl Serialize for ChainId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChainId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMetadata {
    pub name: String,
    pub description: String,
    pub url: String,
    pub icons: Vec<String>,
}

impl AppMetadata {
    /// Metadata for a page served from `origin`, icon at `<origin>/favicon.ico`.
    pub fn for_origin(
        name: impl Into<String>,
        description: impl Into<String>,
        origin: &str,
    ) -> Self {
        let origin = origin.trim_end_matches('/');
        Self {
            name: name.into(),
            description: description.into(),
            url: origin.to_owned(),
            icons: vec![format!("{origin}/favicon.ico")],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredNamespace {
    pub methods: Vec<String>,
    pub chains: Vec<ChainId>,
    pub events: Vec<String>,
}

impl RequiredNamespace {
    pub fn eip155(chain: ChainId) -> Self {
        Self {
            methods: [
                "eth_sendTransaction",
                "personal_sign",
                "eth_signTypedData",
                "eth_signTransaction",
            ]
            .into_iter()
            .map(str::to_owned)
            .collect(),
            chains: vec![chain],
            events: ["chainChanged", "accountsChanged"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingRequest {
    pub required_namespaces: BTreeMap<String, RequiredNamespace>,
    pub metadata: AppMetadata,
}

impl PairingRequest {
    /// EVM pairing request: the `eip155` method and event sets for `required_chain`.
    pub fn new(required_chain: ChainId, metadata: AppMetadata) -> Self {
        let mut required_namespaces = BTreeMap::new();
        required_namespaces.insert(
            required_chain.namespace().to_owned(),
            RequiredNamespace::eip155(required_chain),
        );
        Self {
            required_namespaces,
            metadata,
        }
    }

    /// First chain of the first namespace; the chain the approved session must cover.
    pub fn required_chain(&self) -> Option<&ChainId> {
        self.required_namespaces
            .values()
            .flat_map(|ns| ns.chains.iter())
            .next()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionNamespace {
    #[serde(default)]
    pub chains: Vec<String>,
    #[serde(default)]
    pub accounts: Vec<String>,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub events: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovedSession {
    pub topic: String,
    pub namespaces: BTreeMap<String, SessionNamespace>,
    pub expiry: UnixSeconds,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<AppMetadata>,
}

impl ApprovedSession {
    pub fn durable(&self) -> DurableSession {
        DurableSession {
            topic: self.topic.clone(),
            namespaces: self.namespaces.clone(),
            expiry: self.expiry,
        }
    }
}

/// Fields of an approved session that cross into the persistence authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurableSession {
    pub topic: String,
    pub namespaces: BTreeMap<String, SessionNamespace>,
    pub expiry: UnixSeconds,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayAcknowledgment {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RelayAcknowledgment {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrOptions {
    pub width: u32,
    pub margin: u32,
    pub dark: String,
    pub light: String,
}

impl Default for QrOptions {
    fn default() -> Self {
        Self {
            width: 400,
            margin: 2,
            dark: "#000000".to_owned(),
            light: "#FFFFFF".to_owned(),
        }
    }
}

/// Rendered pairing code, ready for a UI to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayArtifact {
    pub mime_type: String,
    pub data_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectReason {
    pub code: i64,
    pub message: String,
}

impl DisconnectReason {
    pub fn page_closed() -> Self {
        Self {
            code: 6000,
            message: "User closed connection page".to_owned(),
        }
    }

    pub fn unmounted() -> Self {
        Self {
            code: 6000,
            message: "Component unmounted".to_owned(),
        }
    }

    pub fn is_page_closed(&self) -> bool {
        *self == Self::page_closed()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorConfig {
    pub project_id: String,
    pub target_id: String,
    pub request: PairingRequest,
    pub qr: QrOptions,
    pub durability_grace: Duration,
    pub reload_timeout: Duration,
    pub max_expiry_renewals: u32,
}

impl ConnectorConfig {
    pub fn new(
        project_id: impl Into<String>,
        target_id: impl Into<String>,
        request: PairingRequest,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            target_id: target_id.into(),
            request,
            qr: QrOptions::default(),
            durability_grace: Duration::from_millis(50),
            reload_timeout: Duration::from_secs(5),
            max_expiry_renewals: 3,
        }
    }
}
