mod common;

use std::time::Duration;

use wc_handoff_adapters::runtime::PORT_CLOSED;
use wc_handoff_adapters::{
    runtime_channel, svg_from_data_url, ApprovalScript, DeterministicWallet, NoDurability,
    QrDisplayAdapter, ReloadBehavior,
};
use wc_handoff_core::{
    BridgeMessage, ConnectError, ConnectionEvent, ConnectionState, Connector, DisplayArtifact,
    DisplayPort, FailureKind, PortError, QrOptions, RelayAcknowledgment, ReloadOutcome,
    SkipReason, StartOutcome, UnixSeconds,
};

use common::{drain, harness, harness_with, hoodi, mainnet, session_on, test_config, TARGET};

struct BrokenDisplay;

impl DisplayPort for BrokenDisplay {
    fn render(&self, _uri: &str, _options: &QrOptions) -> Result<DisplayArtifact, PortError> {
        Err(PortError::Transport("canvas unavailable".to_owned()))
    }
}

#[tokio::test]
async fn hoodi_approval_connects_and_hands_off() {
    let h = harness();
    h.wallet
        .push_script(ApprovalScript::Approve(session_on("topic-hoodi", &[hoodi()])))
        .expect("script");
    let mut events = h.connector.subscribe();

    let snapshot = h
        .connector
        .start()
        .await
        .snapshot()
        .cloned()
        .expect("attempt finished");

    assert_eq!(snapshot.state, ConnectionState::Connected);
    assert_eq!(snapshot.last_error, None);
    assert_eq!(snapshot.failure_count, 0);
    assert!(!snapshot.in_flight);
    let uri = snapshot.current_uri.expect("uri shown");
    assert!(uri.starts_with("wc:"));
    let display = snapshot.display.expect("qr shown");
    assert_eq!(display.mime_type, "image/svg+xml");
    assert!(svg_from_data_url(&display.data_url)
        .expect("svg")
        .contains("<svg"));

    let saved = h
        .host
        .session("topic-hoodi")
        .expect("host state")
        .expect("session saved");
    assert_eq!(saved.expiry, UnixSeconds(1_760_000_000));
    assert_eq!(saved.namespaces["eip155"].chains, vec!["eip155:560048".to_owned()]);
    assert_eq!(
        h.host.received().expect("received"),
        vec!["WALLET_CONNECTED".to_owned(), "BRIDGE_FORCE_RELOAD".to_owned()]
    );
    assert_eq!(h.host.reload_count().expect("reloads"), 1);

    let events = drain(&mut events);
    let states: Vec<ConnectionState> = events
        .iter()
        .filter_map(|e| match e {
            ConnectionEvent::StateChanged { transition, .. } => Some(transition.to),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            ConnectionState::AwaitingApproval,
            ConnectionState::Validating,
            ConnectionState::Persisting,
            ConnectionState::Connected,
        ]
    );
    assert!(events.iter().any(|e| matches!(
        e,
        ConnectionEvent::Connected { topic, .. } if topic == "topic-hoodi"
    )));
    assert!(!events
        .iter()
        .any(|e| matches!(e, ConnectionEvent::ConsumerStale { .. })));
}

#[tokio::test]
async fn mainnet_only_session_fails_with_chain_mismatch() {
    let h = harness();
    h.wallet
        .push_script(ApprovalScript::Approve(session_on("topic-mainnet", &[mainnet()])))
        .expect("script");

    let snapshot = h.connector.start().await.snapshot().cloned().expect("finished");

    assert_eq!(snapshot.state, ConnectionState::Failed);
    assert_eq!(snapshot.failure_count, 1);
    let error = snapshot.last_error.expect("error recorded");
    assert_eq!(error.kind(), FailureKind::ChainMismatch);
    assert_eq!(
        error,
        ConnectError::ChainMismatch {
            required: "eip155:560048".to_owned(),
            approved: vec!["eip155:1".to_owned()],
        }
    );
    let message = error.to_string();
    assert!(message.contains("eip155:560048"));
    assert!(message.contains("eip155:1"));
    assert!(h.host.received().expect("received").is_empty());
}

#[tokio::test]
async fn save_refusal_is_a_relay_error_and_skips_reload() {
    let h = harness();
    h.host.fail_saves("quota exceeded").expect("knob");
    h.wallet
        .push_script(ApprovalScript::Approve(session_on("topic-quota", &[hoodi()])))
        .expect("script");

    let snapshot = h.connector.start().await.snapshot().cloned().expect("finished");

    assert_eq!(snapshot.state, ConnectionState::Failed);
    assert_eq!(
        snapshot.last_error,
        Some(ConnectError::Relay("quota exceeded".to_owned()))
    );
    assert_eq!(
        h.host.received().expect("received"),
        vec!["WALLET_CONNECTED".to_owned()]
    );
    assert_eq!(h.host.reload_count().expect("reloads"), 0);
    assert_eq!(h.host.session_count().expect("count"), 0);
}

#[tokio::test]
async fn lost_save_reply_is_a_relay_error_and_skips_reload() {
    let wallet = DeterministicWallet::new();
    wallet
        .push_script(ApprovalScript::Approve(session_on("topic-lost", &[hoodi()])))
        .expect("script");
    let (channel, mut endpoint) = runtime_channel(TARGET, 4);
    tokio::spawn(async move {
        while let Some(request) = endpoint.recv().await {
            if matches!(request.message, BridgeMessage::WalletConnected { .. }) {
                drop(request);
            } else {
                request.respond(RelayAcknowledgment::ok());
            }
        }
    });
    let connector = Connector::new(
        test_config(),
        wallet,
        channel.clone(),
        NoDurability,
        QrDisplayAdapter,
    );

    let snapshot = connector.start().await.snapshot().cloned().expect("finished");

    assert_eq!(snapshot.state, ConnectionState::Failed);
    assert_eq!(snapshot.failure_count, 1);
    let error = snapshot.last_error.expect("error recorded");
    assert_eq!(error.kind(), FailureKind::Relay);
    assert_eq!(
        error.to_string(),
        format!("Extension runtime error: {PORT_CLOSED}")
    );
    assert_eq!(
        channel.sent_kinds().expect("sent"),
        vec!["WALLET_CONNECTED".to_owned()]
    );
}

#[tokio::test]
async fn display_failure_is_a_display_error() {
    let wallet = DeterministicWallet::new();
    wallet
        .push_script(ApprovalScript::Approve(session_on("topic-unseen", &[hoodi()])))
        .expect("script");
    let (channel, _endpoint) = runtime_channel(TARGET, 4);
    let connector = Connector::new(
        test_config(),
        wallet,
        channel.clone(),
        NoDurability,
        BrokenDisplay,
    );

    let snapshot = connector.start().await.snapshot().cloned().expect("finished");

    assert_eq!(snapshot.state, ConnectionState::Failed);
    assert_eq!(snapshot.failure_count, 1);
    assert_eq!(snapshot.current_uri, None);
    let error = snapshot.last_error.expect("error recorded");
    assert_eq!(error.kind(), FailureKind::Display);
    assert!(error.to_string().contains("canvas unavailable"));
    assert!(channel.sent_kinds().expect("sent").is_empty());
}

#[tokio::test]
async fn declined_reload_still_connects_and_flags_consumer() {
    let h = harness();
    h.host
        .set_reload_behavior(ReloadBehavior::Decline("no consumer tab".to_owned()))
        .expect("knob");
    h.wallet
        .push_script(ApprovalScript::Approve(session_on("topic-declined", &[hoodi()])))
        .expect("script");
    let mut events = h.connector.subscribe();

    let snapshot = h.connector.start().await.snapshot().cloned().expect("finished");

    assert_eq!(snapshot.state, ConnectionState::Connected);
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        ConnectionEvent::ConsumerStale {
            outcome: ReloadOutcome::Declined(reason),
            ..
        } if reason == "no consumer tab"
    )));
}

#[tokio::test]
async fn unanswered_reload_times_out_without_failing() {
    let mut config = test_config();
    config.reload_timeout = Duration::from_millis(30);
    let h = harness_with(config);
    h.host
        .set_reload_behavior(ReloadBehavior::Hang)
        .expect("knob");
    h.wallet
        .push_script(ApprovalScript::Approve(session_on("topic-hang", &[hoodi()])))
        .expect("script");
    let mut events = h.connector.subscribe();

    let snapshot = h.connector.start().await.snapshot().cloned().expect("finished");

    assert_eq!(snapshot.state, ConnectionState::Connected);
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        ConnectionEvent::ConsumerStale {
            outcome: ReloadOutcome::TimedOut,
            ..
        }
    )));
    assert!(h.host.session("topic-hang").expect("state").is_some());
}

#[tokio::test]
async fn dropped_reload_reply_reports_closed_port() {
    let h = harness();
    h.host
        .set_reload_behavior(ReloadBehavior::Drop)
        .expect("knob");
    h.wallet
        .push_script(ApprovalScript::Approve(session_on("topic-drop", &[hoodi()])))
        .expect("script");
    let mut events = h.connector.subscribe();

    let snapshot = h.connector.start().await.snapshot().cloned().expect("finished");

    assert_eq!(snapshot.state, ConnectionState::Connected);
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        ConnectionEvent::ConsumerStale {
            outcome: ReloadOutcome::Failed(reason),
            ..
        } if reason.contains("message port closed")
    )));
}

#[tokio::test]
async fn rejection_fails_and_retry_recovers() {
    let h = harness();
    h.wallet
        .push_script(ApprovalScript::Reject("User rejected the request".to_owned()))
        .expect("script");

    let snapshot = h.connector.start().await.snapshot().cloned().expect("finished");
    assert_eq!(snapshot.state, ConnectionState::Failed);
    assert_eq!(
        snapshot.last_error,
        Some(ConnectError::Approval("User rejected the request".to_owned()))
    );

    assert_eq!(
        h.connector.start().await,
        StartOutcome::Skipped(SkipReason::RetryRequired)
    );

    h.wallet
        .push_script(ApprovalScript::Approve(session_on("topic-retry", &[hoodi()])))
        .expect("script");
    let snapshot = h.connector.retry().await.snapshot().cloned().expect("finished");
    assert_eq!(snapshot.state, ConnectionState::Connected);
    assert_eq!(snapshot.last_error, None);
    assert_eq!(snapshot.failure_count, 1);
    assert_eq!(h.wallet.init_calls().expect("inits"), 1);
    assert_eq!(h.wallet.connect_calls().expect("connects"), 2);

    assert_eq!(
        h.connector.start().await,
        StartOutcome::Skipped(SkipReason::AlreadyConnected)
    );
}

#[tokio::test]
async fn empty_rejection_message_gets_a_default() {
    let h = harness();
    h.wallet
        .push_script(ApprovalScript::Reject(String::new()))
        .expect("script");

    let snapshot = h.connector.start().await.snapshot().cloned().expect("finished");

    assert_eq!(
        snapshot.last_error,
        Some(ConnectError::Approval("Connection was rejected".to_owned()))
    );
}

#[tokio::test]
async fn missing_project_id_fails_before_touching_the_wallet() {
    let mut config = test_config();
    config.project_id = "  ".to_owned();
    let h = harness_with(config);

    let snapshot = h.connector.start().await.snapshot().cloned().expect("finished");

    assert_eq!(snapshot.state, ConnectionState::Failed);
    let error = snapshot.last_error.expect("error");
    assert_eq!(error.kind(), FailureKind::Configuration);
    assert!(error.to_string().contains("WALLETCONNECT_PROJECT_ID"));
    assert_eq!(h.wallet.init_calls().expect("inits"), 0);
    assert_eq!(h.wallet.connect_calls().expect("connects"), 0);
}

#[tokio::test]
async fn client_init_failure_is_a_capability_error() {
    let h = harness();
    h.wallet.fail_init("relay handshake failed").expect("knob");

    let snapshot = h.connector.start().await.snapshot().cloned().expect("finished");

    let error = snapshot.last_error.expect("error");
    assert_eq!(error.kind(), FailureKind::Capability);
    assert!(error.to_string().contains("relay handshake failed"));
    assert_eq!(h.wallet.connect_calls().expect("connects"), 0);
}

#[tokio::test]
async fn blank_uri_is_a_capability_error() {
    let h = harness();
    h.wallet.blank_next_uri().expect("knob");

    let snapshot = h.connector.start().await.snapshot().cloned().expect("finished");

    assert_eq!(
        snapshot.last_error,
        Some(ConnectError::Capability(
            "Failed to generate pairing URI".to_owned()
        ))
    );
    assert_eq!(snapshot.current_uri, None);
}

#[tokio::test]
async fn connect_failure_is_a_capability_error() {
    let h = harness();
    h.wallet.fail_next_connect("socket stalled").expect("knob");

    let snapshot = h.connector.start().await.snapshot().cloned().expect("finished");

    let error = snapshot.last_error.expect("error");
    assert_eq!(error.kind(), FailureKind::Capability);
    assert!(error.to_string().contains("socket stalled"));
}
