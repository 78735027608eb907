//! In-memory extension background: the persistence authority that receives
//! approved sessions and the reload signal.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use wc_handoff_core::{
    ApprovedSession, BridgeEvent, BridgeMessage, DurableSession, InitPayload, PortError,
    RelayAcknowledgment,
};

use crate::runtime::{EventEmitter, HostEndpoint, RuntimeRequest};

/// How the host answers `BRIDGE_FORCE_RELOAD`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ReloadBehavior {
    #[default]
    Acknowledge,
    Decline(String),
    /// Drop the reply slot so the page sees a closed port.
    Drop,
    /// Keep the reply slot open without answering.
    Hang,
}

/// Scripted answer to one `INIT_WALLETCONNECT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingScript {
    /// Broadcast the URI, then the approved session.
    Approve { uri: String, session: ApprovedSession },
    Reject { uri: String, error: String },
    /// Broadcast a URI event and nothing else.
    UriOnly { uri: Option<String> },
    ErrorEvent(String),
    /// Refuse the init request itself.
    Refuse(String),
}

#[derive(Debug, Default)]
struct HostState {
    sessions: HashMap<String, DurableSession>,
    received: Vec<String>,
    init_payloads: Vec<InitPayload>,
    reloads: u32,
    save_error: Option<String>,
    reload: ReloadBehavior,
    pairing_scripts: VecDeque<PairingScript>,
    parked: Vec<oneshot::Sender<RelayAcknowledgment>>,
}

#[derive(Debug, Clone, Default)]
pub struct ExtensionHost {
    state: Arc<Mutex<HostState>>,
}

impl ExtensionHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_saves(&self, error: impl Into<String>) -> Result<(), PortError> {
        self.with_state(|s| s.save_error = Some(error.into()))
    }

    pub fn set_reload_behavior(&self, behavior: ReloadBehavior) -> Result<(), PortError> {
        self.with_state(|s| s.reload = behavior)
    }

    pub fn push_pairing(&self, script: PairingScript) -> Result<(), PortError> {
        self.with_state(|s| s.pairing_scripts.push_back(script))
    }

    pub fn session(&self, topic: &str) -> Result<Option<DurableSession>, PortError> {
        self.with_state(|s| s.sessions.get(topic).cloned())
    }

    pub fn session_count(&self) -> Result<usize, PortError> {
        self.with_state(|s| s.sessions.len())
    }

    pub fn reload_count(&self) -> Result<u32, PortError> {
        self.with_state(|s| s.reloads)
    }

    /// Kinds of every message received, in arrival order.
    pub fn received(&self) -> Result<Vec<String>, PortError> {
        self.with_state(|s| s.received.clone())
    }

    pub fn init_payloads(&self) -> Result<Vec<InitPayload>, PortError> {
        self.with_state(|s| s.init_payloads.clone())
    }

    /// Serve requests from `endpoint` until the page side goes away.
    pub fn spawn(&self, mut endpoint: HostEndpoint) -> JoinHandle<()> {
        let host = self.clone();
        tokio::spawn(async move {
            let emitter = endpoint.emitter();
            info!(target_id = endpoint.target_id(), "extension host listening");
            while let Some(request) = endpoint.recv().await {
                if let Err(e) = host.handle(request, &emitter) {
                    warn!(error = %e, "extension host failed to handle message");
                }
            }
            debug!("extension host stopped");
        })
    }

    /// Answer one request, as the background's message listener would.
    pub fn handle(&self, request: RuntimeRequest, emitter: &EventEmitter) -> Result<(), PortError> {
        let (message, reply) = request.into_parts();
        let kind = message.kind();
        self.with_state(|s| s.received.push(kind.to_owned()))?;

        match message {
            BridgeMessage::WalletConnected { session } => {
                let ack = self.store(session)?;
                respond(reply, ack);
            }
            BridgeMessage::BridgeForceReload => {
                let behavior = self.with_state(|s| {
                    s.reloads += 1;
                    s.reload.clone()
                })?;
                match behavior {
                    ReloadBehavior::Acknowledge => respond(reply, RelayAcknowledgment::ok()),
                    ReloadBehavior::Decline(e) => respond(reply, RelayAcknowledgment::failed(e)),
                    ReloadBehavior::Drop => drop(reply),
                    ReloadBehavior::Hang => self.with_state(|s| s.parked.push(reply))?,
                }
            }
            BridgeMessage::InitWalletConnect { payload } => {
                let script = self.with_state(|s| {
                    s.init_payloads.push(payload);
                    s.pairing_scripts.pop_front()
                })?;
                self.run_pairing(script, reply, emitter)?;
            }
        }
        Ok(())
    }

    fn store(&self, session: DurableSession) -> Result<RelayAcknowledgment, PortError> {
        self.with_state(|s| {
            if let Some(error) = s.save_error.clone() {
                warn!(topic = %session.topic, %error, "session save refused");
                return RelayAcknowledgment::failed(error);
            }
            if session.topic.trim().is_empty() {
                return RelayAcknowledgment::failed("Session topic is missing");
            }
            let replaced = s.sessions.insert(session.topic.clone(), session).is_some();
            debug!(replaced, count = s.sessions.len(), "session stored");
            RelayAcknowledgment::ok()
        })
    }

    fn run_pairing(
        &self,
        script: Option<PairingScript>,
        reply: oneshot::Sender<RelayAcknowledgment>,
        emitter: &EventEmitter,
    ) -> Result<(), PortError> {
        let Some(script) = script else {
            respond(reply, RelayAcknowledgment::ok());
            return emitter.emit(BridgeEvent::error("No wallet is available"));
        };
        if let PairingScript::Refuse(error) = script {
            respond(reply, RelayAcknowledgment::failed(error));
            return Ok(());
        }
        respond(reply, RelayAcknowledgment::ok());
        match script {
            PairingScript::Approve { uri, session } => {
                emitter.emit(BridgeEvent::uri_generated(uri))?;
                emitter.emit(BridgeEvent::session_approved(session))
            }
            PairingScript::Reject { uri, error } => {
                emitter.emit(BridgeEvent::uri_generated(uri))?;
                emitter.emit(BridgeEvent::session_rejected(error))
            }
            PairingScript::UriOnly { uri } => emitter.emit(BridgeEvent::UriGenerated {
                payload: wc_handoff_core::UriPayload { uri },
            }),
            PairingScript::ErrorEvent(error) => emitter.emit(BridgeEvent::error(error)),
            PairingScript::Refuse(_) => Ok(()),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut HostState) -> T) -> Result<T, PortError> {
        let mut g = self
            .state
            .lock()
            .map_err(|e| PortError::Transport(format!("extension host lock poisoned: {e}")))?;
        Ok(f(&mut g))
    }
}

fn respond(reply: oneshot::Sender<RelayAcknowledgment>, ack: RelayAcknowledgment) {
    if reply.send(ack).is_err() {
        debug!("page stopped waiting for acknowledgment");
    }
}
