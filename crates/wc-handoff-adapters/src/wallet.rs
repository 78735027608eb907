use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use alloy::primitives::{hex, keccak256, Address};
use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::debug;

use wc_handoff_core::{
    AppMetadata, ApprovalFuture, ApprovedSession, ChainId, DisconnectReason, PairingProposal,
    PairingRequest, PortError, SessionNamespace, UnixSeconds, WalletClient, WalletSessionPort,
};

type ApprovalSender = oneshot::Sender<Result<ApprovedSession, PortError>>;

/// What the wallet does with the next pairing proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalScript {
    Approve(ApprovedSession),
    Reject(String),
    /// Leave the proposal pending until `approve_pending` or `reject_pending`.
    Hold,
}

/// Scriptable wallet used in place of a live WalletConnect relay. Topics and
/// accounts are derived from keccak256 so runs are reproducible.
#[derive(Debug, Clone, Default)]
pub struct DeterministicWallet {
    state: Arc<Mutex<WalletState>>,
}

#[derive(Debug, Default)]
struct WalletState {
    project_id: Option<String>,
    init_calls: u32,
    connect_calls: u32,
    init_failure: Option<String>,
    connect_failures: VecDeque<String>,
    blank_uris: u32,
    scripts: VecDeque<ApprovalScript>,
    pending: VecDeque<(String, ApprovalSender)>,
    pairings: Vec<String>,
    sessions: Vec<String>,
    disconnected_pairings: Vec<String>,
    disconnected_sessions: Vec<(String, DisconnectReason)>,
    failing_topics: HashSet<String>,
}

impl DeterministicWallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_script(&self, script: ApprovalScript) -> Result<(), PortError> {
        self.lock()?.scripts.push_back(script);
        Ok(())
    }

    pub fn fail_init(&self, error: impl Into<String>) -> Result<(), PortError> {
        self.lock()?.init_failure = Some(error.into());
        Ok(())
    }

    pub fn fail_next_connect(&self, error: impl Into<String>) -> Result<(), PortError> {
        self.lock()?.connect_failures.push_back(error.into());
        Ok(())
    }

    /// Make the next proposal come back with an empty URI.
    pub fn blank_next_uri(&self) -> Result<(), PortError> {
        self.lock()?.blank_uris += 1;
        Ok(())
    }

    pub fn fail_disconnect(&self, topic: impl Into<String>) -> Result<(), PortError> {
        self.lock()?.failing_topics.insert(topic.into());
        Ok(())
    }

    /// Resolve the oldest pending proposal with `session`.
    pub fn approve_pending(&self, session: ApprovedSession) -> Result<(), PortError> {
        let mut g = self.lock()?;
        let (pairing, tx) = g
            .pending
            .pop_front()
            .ok_or_else(|| PortError::NotFound("no pending proposal".to_owned()))?;
        g.sessions.push(session.topic.clone());
        debug!(%pairing, session = %session.topic, "wallet approved pending proposal");
        if tx.send(Ok(session)).is_err() {
            debug!(%pairing, "approval receiver already dropped");
        }
        Ok(())
    }

    pub fn reject_pending(&self, error: impl Into<String>) -> Result<(), PortError> {
        let (pairing, tx) = self
            .lock()?
            .pending
            .pop_front()
            .ok_or_else(|| PortError::NotFound("no pending proposal".to_owned()))?;
        if tx.send(Err(PortError::Rejected(error.into()))).is_err() {
            debug!(%pairing, "approval receiver already dropped");
        }
        Ok(())
    }

    pub fn pending_count(&self) -> Result<usize, PortError> {
        Ok(self.lock()?.pending.len())
    }

    pub fn init_calls(&self) -> Result<u32, PortError> {
        Ok(self.lock()?.init_calls)
    }

    pub fn connect_calls(&self) -> Result<u32, PortError> {
        Ok(self.lock()?.connect_calls)
    }

    pub fn disconnected_pairings(&self) -> Result<Vec<String>, PortError> {
        Ok(self.lock()?.disconnected_pairings.clone())
    }

    pub fn disconnected_sessions(&self) -> Result<Vec<(String, DisconnectReason)>, PortError> {
        Ok(self.lock()?.disconnected_sessions.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, WalletState>, PortError> {
        self.state
            .lock()
            .map_err(|e| PortError::Transport(format!("wallet lock poisoned: {e}")))
    }
}

#[async_trait]
impl WalletSessionPort for DeterministicWallet {
    type Client = DeterministicWallet;

    async fn init(
        &self,
        project_id: &str,
        metadata: &AppMetadata,
    ) -> Result<Self::Client, PortError> {
        let mut g = self.lock()?;
        g.init_calls += 1;
        if let Some(error) = g.init_failure.clone() {
            return Err(PortError::Transport(error));
        }
        debug!(app = %metadata.name, "deterministic wallet initialized");
        g.project_id = Some(project_id.to_owned());
        Ok(self.clone())
    }
}

#[async_trait]
impl WalletClient for DeterministicWallet {
    async fn connect(&self, request: &PairingRequest) -> Result<PairingProposal, PortError> {
        let mut g = self.lock()?;
        g.connect_calls += 1;
        if let Some(error) = g.connect_failures.pop_front() {
            return Err(PortError::Transport(error));
        }
        let seed = format!(
            "{}:{}:{}",
            g.project_id.as_deref().unwrap_or_default(),
            g.connect_calls,
            request.required_chain().map(ToString::to_string).unwrap_or_default()
        );
        let topic = hex::encode(keccak256(seed.as_bytes()));
        let sym_key = hex::encode(keccak256(topic.as_bytes()));
        let uri = if g.blank_uris > 0 {
            g.blank_uris -= 1;
            String::new()
        } else {
            format!("wc:{topic}@2?relay-protocol=irn&symKey={sym_key}")
        };
        g.pairings.push(topic.clone());

        let (tx, rx) = oneshot::channel();
        match g.scripts.pop_front().unwrap_or(ApprovalScript::Hold) {
            ApprovalScript::Approve(session) => {
                g.sessions.push(session.topic.clone());
                let _ = tx.send(Ok(session));
            }
            ApprovalScript::Reject(error) => {
                let _ = tx.send(Err(PortError::Rejected(error)));
            }
            ApprovalScript::Hold => g.pending.push_back((topic.clone(), tx)),
        }
        debug!(%topic, "pairing proposal created");

        let approval: ApprovalFuture = Box::pin(async move {
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(PortError::Transport("wallet dropped the proposal".to_owned())),
            }
        });
        Ok(PairingProposal { uri, approval })
    }

    fn active_pairings(&self) -> Result<Vec<String>, PortError> {
        Ok(self.lock()?.pairings.clone())
    }

    fn sessions(&self) -> Result<Vec<String>, PortError> {
        Ok(self.lock()?.sessions.clone())
    }

    async fn disconnect_pairing(&self, topic: &str) -> Result<(), PortError> {
        let mut g = self.lock()?;
        if g.failing_topics.contains(topic) {
            return Err(PortError::Transport(format!("pairing disconnect failed: {topic}")));
        }
        g.pairings.retain(|t| t != topic);
        g.disconnected_pairings.push(topic.to_owned());
        Ok(())
    }

    async fn disconnect_session(
        &self,
        topic: &str,
        reason: &DisconnectReason,
    ) -> Result<(), PortError> {
        let mut g = self.lock()?;
        if g.failing_topics.contains(topic) {
            return Err(PortError::Transport(format!("session disconnect failed: {topic}")));
        }
        g.sessions.retain(|t| t != topic);
        g.disconnected_sessions
            .push((topic.to_owned(), reason.clone()));
        Ok(())
    }
}

/// Deterministic account for `seed`.
pub fn derived_address(seed: &str) -> Address {
    let hash = keccak256(seed.as_bytes());
    Address::from_slice(&hash[12..])
}

/// An approved session covering `chains`, with one derived account on each.
pub fn approved_session(topic: &str, chains: &[ChainId], expiry: UnixSeconds) -> ApprovedSession {
    let account = derived_address(topic);
    let mut namespaces: BTreeMap<String, SessionNamespace> = BTreeMap::new();
    for chain in chains {
        let ns = namespaces.entry(chain.namespace().to_owned()).or_default();
        ns.chains.push(chain.to_string());
        ns.accounts.push(format!("{chain}:{account}"));
        if ns.methods.is_empty() {
            ns.methods = vec!["personal_sign".to_owned(), "eth_sendTransaction".to_owned()];
            ns.events = vec!["chainChanged".to_owned(), "accountsChanged".to_owned()];
        }
    }
    ApprovedSession {
        topic: topic.to_owned(),
        namespaces,
        expiry,
        peer: Some(AppMetadata::for_origin(
            "Deterministic Wallet",
            "Scripted wallet peer",
            "https://wallet.invalid",
        )),
    }
}
