//! Bridge between the CLI shell and the handoff workspace crates.
//! This must remain the only shell-facing boundary for connection operations.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use eyre::{bail, WrapErr};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use wc_handoff_adapters::{
    approved_session, runtime_channel, svg_from_data_url, ApprovalScript, BridgedWalletSession,
    DeterministicWallet, ExtensionHost, FsDurability, HandoffConfig, HttpRelayChannel,
    QrDisplayAdapter, RuntimeChannel,
};
use wc_handoff_core::{
    ConnectionEvent, ConnectionSnapshot, ConnectionState, Connector, DisconnectReason,
    DurabilityPort, RelayChannel, StartOutcome, TeardownReport, UnixSeconds, WalletSessionPort,
};

const DEMO_SESSION_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

pub type HttpConnector = Connector<
    BridgedWalletSession<HttpRelayChannel>,
    HttpRelayChannel,
    FsDurability,
    QrDisplayAdapter,
>;

pub type InProcessConnector =
    Connector<DeterministicWallet, RuntimeChannel, FsDurability, QrDisplayAdapter>;

pub struct HandoffBridge<W, R, D>
where
    W: WalletSessionPort,
    R: RelayChannel,
    D: DurabilityPort,
{
    connector: Arc<Connector<W, R, D, QrDisplayAdapter>>,
    _host: Option<JoinHandle<()>>,
}

impl HandoffBridge<BridgedWalletSession<HttpRelayChannel>, HttpRelayChannel, FsDurability> {
    /// Wallet client and persistence authority both live behind the HTTP relay.
    pub fn over_http(config: &HandoffConfig) -> eyre::Result<Self> {
        let channel = HttpRelayChannel::from_config(config).wrap_err("relay channel")?;
        let wallet = BridgedWalletSession::new(channel.clone(), config.extension_id.clone());
        let connector: HttpConnector = Connector::new(
            config.connector_config().wrap_err("connector config")?,
            wallet,
            channel,
            FsDurability::new(&config.state_dir),
            QrDisplayAdapter,
        );
        Ok(Self {
            connector: Arc::new(connector),
            _host: None,
        })
    }
}

impl HandoffBridge<DeterministicWallet, RuntimeChannel, FsDurability> {
    /// Self-contained run: a scripted wallet approves on the required chain and
    /// an in-process extension host stores the session.
    pub fn in_process(config: &HandoffConfig) -> eyre::Result<Self> {
        let connector_config = config.connector_config().wrap_err("connector config")?;
        let chain = connector_config
            .request
            .required_chain()
            .cloned()
            .ok_or_else(|| eyre::eyre!("required chain is not configured"))?;

        let wallet = DeterministicWallet::new();
        let expiry = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .wrap_err("system clock before unix epoch")?
            + DEMO_SESSION_TTL;
        let topic = format!("demo-{}", expiry.as_secs());
        wallet
            .push_script(ApprovalScript::Approve(approved_session(
                &topic,
                &[chain],
                UnixSeconds(expiry.as_secs()),
            )))
            .wrap_err("script demo wallet")?;

        let host = ExtensionHost::new();
        let (channel, endpoint) = runtime_channel(&connector_config.target_id, 8);
        let host_task = host.spawn(endpoint);
        let connector: InProcessConnector = Connector::new(
            connector_config,
            wallet,
            channel,
            FsDurability::new(&config.state_dir),
            QrDisplayAdapter,
        );
        Ok(Self {
            connector: Arc::new(connector),
            _host: Some(host_task),
        })
    }
}

impl<W, R, D> HandoffBridge<W, R, D>
where
    W: WalletSessionPort + 'static,
    R: RelayChannel + 'static,
    D: DurabilityPort + 'static,
{
    /// Run attempts until one settles, retrying user-visible failures up to `retries` times.
    pub async fn connect(&self, retries: u32) -> eyre::Result<ConnectionSnapshot> {
        let mut remaining = retries;
        let mut outcome = self.connector.start().await;
        loop {
            match outcome {
                StartOutcome::Finished(snapshot)
                    if snapshot.state == ConnectionState::Failed && remaining > 0 =>
                {
                    remaining -= 1;
                    warn!(
                        remaining,
                        error = ?snapshot.last_error,
                        "connection failed, retrying"
                    );
                    outcome = self.connector.retry().await;
                }
                StartOutcome::Finished(snapshot) => return Ok(snapshot),
                StartOutcome::Skipped(reason) => bail!("connection attempt skipped: {reason:?}"),
                StartOutcome::Abandoned => bail!("connection attempt was abandoned"),
            }
        }
    }

    /// Write each new pairing code to `path` as it is displayed.
    pub fn spawn_display_writer(&self, path: PathBuf) -> JoinHandle<()> {
        let mut events = self.connector.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                let ConnectionEvent::DisplayReady { uri, artifact, .. } = event else {
                    continue;
                };
                info!(%uri, "scan the pairing code with your wallet");
                let svg = match svg_from_data_url(&artifact.data_url) {
                    Ok(svg) => svg,
                    Err(e) => {
                        warn!(error = %e, "pairing code could not be decoded");
                        continue;
                    }
                };
                if let Some(parent) = path.parent() {
                    if let Err(e) = tokio::fs::create_dir_all(parent).await {
                        warn!(error = %e, "could not create output directory");
                        continue;
                    }
                }
                match tokio::fs::write(&path, svg).await {
                    Ok(()) => info!(path = %path.display(), "pairing code written"),
                    Err(e) => warn!(path = %path.display(), error = %e, "pairing code write failed"),
                }
            }
            debug!("display writer stopped");
        })
    }

    pub fn should_block_unload(&self) -> bool {
        self.connector.should_block_unload()
    }

    pub async fn teardown(&self, reason: DisconnectReason) -> TeardownReport {
        self.connector.teardown(reason).await
    }
}
