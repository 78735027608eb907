#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use wc_handoff_adapters::{
    approved_session, runtime_channel, DeterministicWallet, ExtensionHost, NoDurability,
    QrDisplayAdapter, RuntimeChannel,
};
use wc_handoff_core::{
    AppMetadata, ApprovedSession, ChainId, ConnectionEvent, Connector, ConnectorConfig,
    PairingRequest, UnixSeconds,
};

pub const TARGET: &str = "test-extension-id";
pub const PROJECT: &str = "test-project";

pub type TestConnector =
    Connector<DeterministicWallet, RuntimeChannel, NoDurability, QrDisplayAdapter>;

pub struct Harness {
    pub connector: Arc<TestConnector>,
    pub wallet: DeterministicWallet,
    pub host: ExtensionHost,
    pub channel: RuntimeChannel,
    pub host_task: JoinHandle<()>,
}

pub fn hoodi() -> ChainId {
    ChainId::eip155(560048)
}

pub fn mainnet() -> ChainId {
    ChainId::eip155(1)
}

pub fn metadata() -> AppMetadata {
    AppMetadata::for_origin("Gas Tank", "Pays gas", "https://app.test")
}

pub fn test_config() -> ConnectorConfig {
    let mut config =
        ConnectorConfig::new(PROJECT, TARGET, PairingRequest::new(hoodi(), metadata()));
    config.durability_grace = Duration::ZERO;
    config.reload_timeout = Duration::from_millis(200);
    config
}

pub fn session_on(topic: &str, chains: &[ChainId]) -> ApprovedSession {
    approved_session(topic, chains, UnixSeconds(1_760_000_000))
}

/// Connector over the deterministic wallet and an in-process extension host.
/// Must be called from inside a tokio runtime.
pub fn harness_with(config: ConnectorConfig) -> Harness {
    let wallet = DeterministicWallet::new();
    let host = ExtensionHost::new();
    let (channel, endpoint) = runtime_channel(&config.target_id, 8);
    let host_task = host.spawn(endpoint);
    let connector = Arc::new(Connector::new(
        config,
        wallet.clone(),
        channel.clone(),
        NoDurability,
        QrDisplayAdapter,
    ));
    Harness {
        connector,
        wallet,
        host,
        channel,
        host_task,
    }
}

pub fn harness() -> Harness {
    harness_with(test_config())
}

/// Poll `check` until it holds or two seconds pass.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

pub async fn wait_for_pending(wallet: &DeterministicWallet, count: usize) {
    wait_until(|| wallet.pending_count().expect("pending count") >= count).await;
}

pub fn drain(rx: &mut tokio::sync::broadcast::Receiver<ConnectionEvent>) -> Vec<ConnectionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
