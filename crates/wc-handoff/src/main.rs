//! wc-handoff: pair a WalletConnect wallet and hand the session to the extension.

use wc_handoff_adapters::HandoffConfig;
use wc_handoff_core::{
    ConnectionSnapshot, ConnectionState, DisconnectReason, DurabilityPort, RelayChannel,
    WalletSessionPort,
};

mod handoff_bridge;

use handoff_bridge::HandoffBridge;

const PAIRING_FILE: &str = "pairing.svg";

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting wc-handoff");

    let config = HandoffConfig::from_env();
    let retries = std::env::var("WC_HANDOFF_RETRIES")
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(0);

    if config.relay_base_url.is_some() {
        run(HandoffBridge::over_http(&config)?, &config, retries).await
    } else {
        tracing::warn!("WC_HANDOFF_RELAY_URL not set; using the in-process wallet and extension");
        run(HandoffBridge::in_process(&config)?, &config, retries).await
    }
}

async fn run<W, R, D>(
    bridge: HandoffBridge<W, R, D>,
    config: &HandoffConfig,
    retries: u32,
) -> eyre::Result<()>
where
    W: WalletSessionPort + 'static,
    R: RelayChannel + 'static,
    D: DurabilityPort + 'static,
{
    let writer = bridge.spawn_display_writer(config.state_dir.join(PAIRING_FILE));

    let result = tokio::select! {
        result = bridge.connect(retries) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    let reason = match result {
        Some(_) => DisconnectReason::unmounted(),
        None => {
            if bridge.should_block_unload() {
                tracing::warn!("Session is being saved. Please wait...");
            }
            DisconnectReason::page_closed()
        }
    };
    let report = bridge.teardown(reason).await;
    tracing::debug!(?report, "teardown finished");
    writer.abort();

    match result {
        Some(Ok(snapshot)) => report_outcome(&snapshot),
        Some(Err(e)) => Err(e),
        None => {
            tracing::info!("interrupted");
            Ok(())
        }
    }
}

fn report_outcome(snapshot: &ConnectionSnapshot) -> eyre::Result<()> {
    match snapshot.state {
        ConnectionState::Connected => {
            let topic = snapshot
                .current_session
                .as_ref()
                .map(|s| s.topic.as_str())
                .unwrap_or_default();
            tracing::info!(%topic, "Wallet connected. You can close this window.");
            Ok(())
        }
        ConnectionState::Failed => match &snapshot.last_error {
            Some(error) => eyre::bail!("{error}"),
            None => eyre::bail!("connection failed"),
        },
        state => {
            tracing::info!(
                ?state,
                resets = snapshot.expiry_resets,
                "pairing proposal expired; run again to get a new code"
            );
            Ok(())
        }
    }
}
