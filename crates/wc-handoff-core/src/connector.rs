use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, watch, OnceCell};
use tracing::{debug, error, info, warn};

use crate::domain::{
    ApprovedSession, ConnectorConfig, DisconnectReason, DisplayArtifact, PairingRequest,
};
use crate::guard::AttemptGuard;
use crate::ports::{
    DisplayPort, DurabilityPort, PairingProposal, RelayChannel, WalletClient, WalletSessionPort,
};
use crate::relay::{ReloadOutcome, SessionRelay};
use crate::state_machine::{
    connection_transition, is_expiry_message, ConnectError, ConnectionAction, ConnectionState,
    StateMachineError, StateTransition,
};
use crate::validation::validate_session;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    StateChanged {
        generation: u64,
        transition: StateTransition,
    },
    DisplayReady {
        generation: u64,
        uri: String,
        artifact: DisplayArtifact,
    },
    /// Session saved, but the downstream consumer did not confirm its reload.
    ConsumerStale {
        generation: u64,
        outcome: ReloadOutcome,
    },
    Connected {
        generation: u64,
        topic: String,
    },
    Failed {
        generation: u64,
        error: ConnectError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub last_error: Option<ConnectError>,
    pub current_uri: Option<String>,
    pub display: Option<DisplayArtifact>,
    pub current_session: Option<ApprovedSession>,
    /// User-visible failures only; silent expiry resets are counted separately.
    pub failure_count: u32,
    pub expiry_resets: u32,
    pub generation: u64,
    pub in_flight: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    InFlight,
    AlreadyConnected,
    RetryRequired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Finished(ConnectionSnapshot),
    Skipped(SkipReason),
    /// A retry or teardown superseded this attempt while it was suspended.
    Abandoned,
}

impl StartOutcome {
    pub fn snapshot(&self) -> Option<&ConnectionSnapshot> {
        match self {
            Self::Finished(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub pairings_closed: usize,
    pub sessions_closed: usize,
    pub failures: usize,
}

#[derive(Debug)]
struct ConnectionAttempt {
    state: ConnectionState,
    last_error: Option<ConnectError>,
    current_uri: Option<String>,
    display: Option<DisplayArtifact>,
    current_session: Option<ApprovedSession>,
    failure_count: u32,
    expiry_resets: u32,
    guard: AttemptGuard,
}

impl Default for ConnectionAttempt {
    fn default() -> Self {
        Self {
            state: ConnectionState::Initializing,
            last_error: None,
            current_uri: None,
            display: None,
            current_session: None,
            failure_count: 0,
            expiry_resets: 0,
            guard: AttemptGuard::default(),
        }
    }
}

impl ConnectionAttempt {
    fn clear_transient(&mut self) {
        self.last_error = None;
        self.current_uri = None;
        self.display = None;
        self.current_session = None;
    }

    fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            state: self.state,
            last_error: self.last_error.clone(),
            current_uri: self.current_uri.clone(),
            display: self.display.clone(),
            current_session: self.current_session.clone(),
            failure_count: self.failure_count,
            expiry_resets: self.expiry_resets,
            generation: self.guard.generation(),
            in_flight: self.guard.in_flight(),
        }
    }
}

enum AttemptEnd {
    Settled,
    Expired,
    Stale,
}

enum Halt {
    Stale,
    Expired(String),
    Failed(ConnectError),
    Illegal(StateMachineError),
}

impl From<ConnectError> for Halt {
    fn from(e: ConnectError) -> Self {
        Self::Failed(e)
    }
}

/// Drives pairing attempts: request a URI, show it, await approval, validate
/// the session and hand it off over the relay.
pub struct Connector<W, R, D, Q>
where
    W: WalletSessionPort,
    R: RelayChannel,
    D: DurabilityPort,
    Q: DisplayPort,
{
    pub wallet: W,
    pub relay: SessionRelay<R, D>,
    pub display: Q,
    config: ConnectorConfig,
    client: OnceCell<W::Client>,
    attempt: Mutex<ConnectionAttempt>,
    /// Latest guard generation; suspended attempts watch it to notice they were superseded.
    current_generation: watch::Sender<u64>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl<W, R, D, Q> Connector<W, R, D, Q>
where
    W: WalletSessionPort,
    R: RelayChannel,
    D: DurabilityPort,
    Q: DisplayPort,
{
    pub fn new(config: ConnectorConfig, wallet: W, channel: R, durability: D, display: Q) -> Self {
        let relay = SessionRelay::new(
            channel,
            durability,
            config.target_id.clone(),
            config.durability_grace,
            config.reload_timeout,
        );
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (current_generation, _) = watch::channel(0);
        Self {
            wallet,
            relay,
            display,
            config,
            client: OnceCell::new(),
            attempt: Mutex::new(ConnectionAttempt::default()),
            current_generation,
            events,
        }
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.lock().snapshot()
    }

    /// Begin the first attempt. A no-op while another attempt is in flight;
    /// once the machine has settled, use `retry`.
    pub async fn start(&self) -> StartOutcome {
        let entered = {
            let mut attempt = self.lock();
            match attempt.state {
                ConnectionState::Connected => Err(SkipReason::AlreadyConnected),
                ConnectionState::Initializing => {
                    let entered = attempt.guard.try_enter().ok_or(SkipReason::InFlight);
                    if let Ok(generation) = entered {
                        self.current_generation.send_replace(generation);
                    }
                    entered
                }
                _ if attempt.guard.in_flight() => Err(SkipReason::InFlight),
                _ => Err(SkipReason::RetryRequired),
            }
        };
        match entered {
            Ok(generation) => self.drive(generation).await,
            Err(reason) => {
                info!(?reason, "connection start skipped");
                StartOutcome::Skipped(reason)
            }
        }
    }

    /// Discard the current attempt, whatever its state, and start over.
    /// Pending work of the discarded attempt is ignored when it completes.
    pub async fn retry(&self) -> StartOutcome {
        let (generation, transition) = {
            let mut attempt = self.lock();
            let abandoned = attempt.guard.generation();
            let generation = attempt.guard.force_enter();
            self.current_generation.send_replace(generation);
            attempt.clear_transient();
            let transition = match connection_transition(attempt.state, ConnectionAction::Retry) {
                Ok((to, transition)) => {
                    attempt.state = to;
                    Some(transition)
                }
                Err(e) => {
                    error!(error = %e, "retry transition rejected");
                    None
                }
            };
            info!(abandoned, generation, "retrying wallet connection");
            (generation, transition)
        };
        if let Some(transition) = transition {
            self.emit(ConnectionEvent::StateChanged {
                generation,
                transition,
            });
        }
        self.drive(generation).await
    }

    /// True while the wallet holds a session that has not been handed off yet.
    pub fn should_block_unload(&self) -> bool {
        if self.lock().state == ConnectionState::Connected {
            return false;
        }
        self.client
            .get()
            .and_then(|client| client.sessions().ok())
            .is_some_and(|sessions| !sessions.is_empty())
    }

    /// Close pending pairings and active sessions held by the client.
    /// Each failure is logged and counted; teardown never stops early.
    /// Closing the page after a completed handoff leaves the session open.
    pub async fn teardown(&self, reason: DisconnectReason) -> TeardownReport {
        let mut report = TeardownReport::default();
        let connected = {
            let mut attempt = self.lock();
            attempt.guard.abandon();
            self.current_generation.send_replace(attempt.guard.generation());
            attempt.state == ConnectionState::Connected
        };
        let Some(client) = self.client.get() else {
            return report;
        };
        if connected && reason.is_page_closed() {
            info!("page closed after handoff, leaving wallet session open");
            return report;
        }

        match client.active_pairings() {
            Ok(topics) => {
                for topic in topics {
                    match client.disconnect_pairing(&topic).await {
                        Ok(()) => report.pairings_closed += 1,
                        Err(e) => {
                            debug!(%topic, error = %e, "pairing cleanup failed");
                            report.failures += 1;
                        }
                    }
                }
            }
            Err(e) => {
                debug!(error = %e, "listing pairings for cleanup failed");
                report.failures += 1;
            }
        }

        match client.sessions() {
            Ok(topics) => {
                for topic in topics {
                    match client.disconnect_session(&topic, &reason).await {
                        Ok(()) => report.sessions_closed += 1,
                        Err(e) => {
                            debug!(%topic, error = %e, "session cleanup failed");
                            report.failures += 1;
                        }
                    }
                }
            }
            Err(e) => {
                debug!(error = %e, "listing sessions for cleanup failed");
                report.failures += 1;
            }
        }

        info!(?report, reason = %reason.message, "wallet client torn down");
        report
    }

    async fn drive(&self, mut generation: u64) -> StartOutcome {
        let mut renewals = 0;
        loop {
            match self.run_attempt(generation).await {
                AttemptEnd::Settled => return StartOutcome::Finished(self.snapshot()),
                AttemptEnd::Stale => return StartOutcome::Abandoned,
                AttemptEnd::Expired => {
                    if renewals >= self.config.max_expiry_renewals {
                        debug!(renewals, "expiry renewals exhausted, waiting for user");
                        return StartOutcome::Finished(self.snapshot());
                    }
                    renewals += 1;
                    let next = {
                        let mut attempt = self.lock();
                        let next = attempt.guard.try_enter();
                        if let Some(g) = next {
                            self.current_generation.send_replace(g);
                        }
                        next
                    };
                    match next {
                        Some(g) => generation = g,
                        None => return StartOutcome::Skipped(SkipReason::InFlight),
                    }
                }
            }
        }
    }

    async fn run_attempt(&self, generation: u64) -> AttemptEnd {
        match self.attempt_steps(generation).await {
            Ok(()) => AttemptEnd::Settled,
            Err(Halt::Stale) => {
                debug!(generation, "discarding result of abandoned attempt");
                AttemptEnd::Stale
            }
            Err(Halt::Expired(detail)) => self.silent_reset(generation, detail),
            Err(Halt::Failed(e)) => self.fail(generation, e),
            Err(Halt::Illegal(e)) => {
                error!(generation, error = %e, "connection state machine rejected transition");
                self.fail(
                    generation,
                    ConnectError::Capability(format!("Connection state error: {e}")),
                )
            }
        }
    }

    async fn attempt_steps(&self, generation: u64) -> Result<(), Halt> {
        let request = self.checked_request()?;
        let required = request.required_chain().cloned().ok_or_else(|| {
            ConnectError::Configuration("Required chain is not configured.".to_owned())
        })?;

        let client = self.client().await?;
        self.ensure_current(generation)?;

        debug!(generation, chain = %required, "requesting pairing proposal");
        let proposal = tokio::select! {
            biased;
            () = self.superseded(generation) => return Err(Halt::Stale),
            proposal = client.connect(request) => proposal,
        };
        let PairingProposal { uri, approval } = proposal.map_err(|e| {
            ConnectError::Capability(format!("Failed to create pairing proposal: {}", e.detail()))
        })?;
        self.ensure_current(generation)?;
        if uri.trim().is_empty() {
            let error = ConnectError::Capability("Failed to generate pairing URI".to_owned());
            return Err(error.into());
        }

        let artifact = self.display.render(&uri, &self.config.qr).map_err(|e| {
            ConnectError::Display(format!("Failed to generate QR code: {}", e.detail()))
        })?;
        self.apply(generation, ConnectionAction::UriReady, |a| {
            a.current_uri = Some(uri.clone());
            a.display = Some(artifact.clone());
        })?;
        self.emit(ConnectionEvent::DisplayReady {
            generation,
            uri,
            artifact,
        });

        let approved = tokio::select! {
            biased;
            () = self.superseded(generation) => return Err(Halt::Stale),
            approved = approval => approved,
        };
        let session = match approved {
            Ok(session) => session,
            Err(e) => {
                self.ensure_current(generation)?;
                let detail = e.detail();
                if is_expiry_message(&detail) {
                    return Err(Halt::Expired(detail));
                }
                let message = if detail.trim().is_empty() {
                    "Connection was rejected".to_owned()
                } else {
                    detail
                };
                return Err(ConnectError::Approval(message).into());
            }
        };
        info!(generation, topic = %session.topic, "wallet approved session");
        self.apply(generation, ConnectionAction::ApprovalResolved, |a| {
            a.current_session = Some(session.clone());
        })?;

        if let Err(failure) = validate_session(&session, &required) {
            warn!(generation, %failure, "session validation failed");
            return Err(ConnectError::ChainMismatch {
                required: failure.required.to_string(),
                approved: failure.approved,
            }
            .into());
        }
        self.apply(generation, ConnectionAction::SessionAccepted, |_| {})?;

        let report = self.relay.handoff(&session).await?;
        self.ensure_current(generation)?;
        if !report.reload.is_reloaded() {
            self.emit(ConnectionEvent::ConsumerStale {
                generation,
                outcome: report.reload.clone(),
            });
        }
        self.apply(generation, ConnectionAction::SessionPersisted, |a| {
            a.guard.release(generation);
        })?;
        info!(
            generation,
            topic = %report.topic,
            "wallet connected, session persistence confirmed"
        );
        self.emit(ConnectionEvent::Connected {
            generation,
            topic: report.topic,
        });
        Ok(())
    }

    fn checked_request(&self) -> Result<&PairingRequest, ConnectError> {
        if self.config.project_id.trim().is_empty() {
            return Err(ConnectError::Configuration(
                "WalletConnect project id is missing. Set WALLETCONNECT_PROJECT_ID \
                 or pass ?projectId= in the page URL."
                    .to_owned(),
            ));
        }
        if self.config.target_id.trim().is_empty() {
            return Err(ConnectError::Configuration(
                "Extension id is missing; the session has nowhere to be saved.".to_owned(),
            ));
        }
        Ok(&self.config.request)
    }

    async fn client(&self) -> Result<&W::Client, ConnectError> {
        self.client
            .get_or_try_init(|| async {
                info!("initializing wallet client");
                self.wallet
                    .init(&self.config.project_id, &self.config.request.metadata)
                    .await
            })
            .await
            .map_err(|e| {
                ConnectError::Capability(format!(
                    "Failed to initialize wallet client: {}",
                    e.detail()
                ))
            })
    }

    /// Resolves once `generation` is no longer the current attempt. Dropping the
    /// attempt's pending futures here stops them consuming a newer attempt's events.
    async fn superseded(&self, generation: u64) {
        let mut current = self.current_generation.subscribe();
        // The sender lives as long as `self`, so this only returns on a change.
        let _ = current.wait_for(|g| *g != generation).await;
    }

    fn ensure_current(&self, generation: u64) -> Result<(), Halt> {
        if self.lock().guard.is_current(generation) {
            Ok(())
        } else {
            Err(Halt::Stale)
        }
    }

    fn apply(
        &self,
        generation: u64,
        action: ConnectionAction,
        mutate: impl FnOnce(&mut ConnectionAttempt),
    ) -> Result<(), Halt> {
        let transition = {
            let mut attempt = self.lock();
            if !attempt.guard.is_current(generation) {
                return Err(Halt::Stale);
            }
            let (to, transition) =
                connection_transition(attempt.state, action).map_err(Halt::Illegal)?;
            attempt.state = to;
            mutate(&mut attempt);
            transition
        };
        debug!(
            generation,
            from = ?transition.from,
            to = ?transition.to,
            reason = transition.reason,
            "connection transition"
        );
        self.emit(ConnectionEvent::StateChanged {
            generation,
            transition,
        });
        Ok(())
    }

    fn fail(&self, generation: u64, error: ConnectError) -> AttemptEnd {
        let transition = {
            let mut attempt = self.lock();
            if !attempt.guard.is_current(generation) {
                debug!(generation, error = %error, "dropping failure of abandoned attempt");
                return AttemptEnd::Stale;
            }
            let transition = match connection_transition(attempt.state, ConnectionAction::Fail) {
                Ok((to, transition)) => {
                    attempt.state = to;
                    Some(transition)
                }
                Err(e) => {
                    error!(error = %e, "failure transition rejected");
                    None
                }
            };
            attempt.last_error = Some(error.clone());
            attempt.failure_count = attempt.failure_count.saturating_add(1);
            attempt.guard.release(generation);
            transition
        };
        error!(generation, kind = ?error.kind(), error = %error, "wallet connection failed");
        if let Some(transition) = transition {
            self.emit(ConnectionEvent::StateChanged {
                generation,
                transition,
            });
        }
        self.emit(ConnectionEvent::Failed { generation, error });
        AttemptEnd::Settled
    }

    fn silent_reset(&self, generation: u64, detail: String) -> AttemptEnd {
        let transition = {
            let mut attempt = self.lock();
            if !attempt.guard.is_current(generation) {
                return AttemptEnd::Stale;
            }
            let transition =
                match connection_transition(attempt.state, ConnectionAction::ProposalExpired) {
                    Ok((to, transition)) => {
                        attempt.state = to;
                        transition
                    }
                    Err(e) => {
                        drop(attempt);
                        return self.fail(generation, ConnectError::Approval(e.to_string()));
                    }
                };
            attempt.clear_transient();
            attempt.expiry_resets = attempt.expiry_resets.saturating_add(1);
            attempt.guard.release(generation);
            transition
        };
        let expired = ConnectError::ProposalExpired(detail);
        debug!(generation, error = %expired, "proposal expired, resetting for retry");
        self.emit(ConnectionEvent::StateChanged {
            generation,
            transition,
        });
        AttemptEnd::Expired
    }

    fn emit(&self, event: ConnectionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionAttempt> {
        self.attempt.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::future;

    use async_trait::async_trait;

    use super::{AttemptEnd, Connector};
    use crate::domain::{
        AppMetadata, ChainId, ConnectorConfig, DisconnectReason, DisplayArtifact, PairingRequest,
        QrOptions, RelayAcknowledgment,
    };
    use crate::messages::BridgeMessage;
    use crate::ports::{
        DisplayPort, DurabilityPort, PairingProposal, PortError, RelayChannel, WalletClient,
        WalletSessionPort,
    };
    use crate::state_machine::{ConnectionState, FailureKind};

    struct HeldWallet;
    struct HeldClient;

    #[async_trait]
    impl WalletSessionPort for HeldWallet {
        type Client = HeldClient;

        async fn init(&self, _: &str, _: &AppMetadata) -> Result<HeldClient, PortError> {
            Ok(HeldClient)
        }
    }

    #[async_trait]
    impl WalletClient for HeldClient {
        async fn connect(&self, _: &PairingRequest) -> Result<PairingProposal, PortError> {
            Ok(PairingProposal {
                uri: "wc:held@2".to_owned(),
                approval: Box::pin(future::pending()),
            })
        }

        fn active_pairings(&self) -> Result<Vec<String>, PortError> {
            Ok(Vec::new())
        }

        fn sessions(&self) -> Result<Vec<String>, PortError> {
            Ok(Vec::new())
        }

        async fn disconnect_pairing(&self, _: &str) -> Result<(), PortError> {
            Ok(())
        }

        async fn disconnect_session(&self, _: &str, _: &DisconnectReason) -> Result<(), PortError> {
            Ok(())
        }
    }

    struct AckRelay;

    #[async_trait]
    impl RelayChannel for AckRelay {
        async fn send(&self, _: &str, _: BridgeMessage) -> Result<RelayAcknowledgment, PortError> {
            Ok(RelayAcknowledgment::ok())
        }
    }

    struct Persisted;

    #[async_trait]
    impl DurabilityPort for Persisted {
        async fn request_persistence(&self) -> Result<bool, PortError> {
            Ok(true)
        }
    }

    struct PlainDisplay;

    impl DisplayPort for PlainDisplay {
        fn render(&self, uri: &str, _: &QrOptions) -> Result<DisplayArtifact, PortError> {
            Ok(DisplayArtifact {
                mime_type: "text/plain".to_owned(),
                data_url: uri.to_owned(),
            })
        }
    }

    fn connector() -> Connector<HeldWallet, AckRelay, Persisted, PlainDisplay> {
        let request = PairingRequest::new(
            ChainId::eip155(560048),
            AppMetadata::for_origin("Gas Tank", "Pays gas", "https://app.test"),
        );
        Connector::new(
            ConnectorConfig::new("project", "extension", request),
            HeldWallet,
            AckRelay,
            Persisted,
            PlainDisplay,
        )
    }

    #[tokio::test]
    async fn rejected_transition_fails_the_attempt() {
        let connector = connector();
        let generation = {
            let mut attempt = connector.lock();
            attempt.state = ConnectionState::Validating;
            let generation = attempt.guard.try_enter().expect("enter");
            connector.current_generation.send_replace(generation);
            generation
        };

        let end = connector.run_attempt(generation).await;

        assert!(matches!(end, AttemptEnd::Settled));
        let snapshot = connector.snapshot();
        assert_eq!(snapshot.state, ConnectionState::Failed);
        assert_eq!(snapshot.failure_count, 1);
        assert!(!snapshot.in_flight);
        let error = snapshot.last_error.expect("error");
        assert_eq!(error.kind(), FailureKind::Capability);
        assert!(error.to_string().contains("Connection state error"));
    }

    #[tokio::test]
    async fn retry_drops_the_held_approval() {
        let connector = std::sync::Arc::new(connector());
        let first = tokio::spawn({
            let connector = connector.clone();
            async move { connector.start().await }
        });
        while connector.snapshot().state != ConnectionState::AwaitingApproval {
            tokio::task::yield_now().await;
        }

        let abandoned = connector.snapshot().generation;
        let _retry = tokio::spawn({
            let connector = connector.clone();
            async move { connector.retry().await }
        });

        let outcome = tokio::time::timeout(std::time::Duration::from_secs(2), first)
            .await
            .expect("first attempt released")
            .expect("join");
        assert_eq!(outcome, super::StartOutcome::Abandoned);
        assert!(connector.snapshot().generation > abandoned);
    }
}
