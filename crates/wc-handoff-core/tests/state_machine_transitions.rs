use wc_handoff_core::{
    connection_transition, is_expiry_message, ConnectError, ConnectionAction, ConnectionState,
    FailureKind,
};

#[test]
fn connection_happy_path_transitions() {
    let (s1, _) = connection_transition(ConnectionState::Initializing, ConnectionAction::UriReady)
        .expect("initializing -> awaiting");
    assert_eq!(s1, ConnectionState::AwaitingApproval);
    let (s2, _) = connection_transition(s1, ConnectionAction::ApprovalResolved)
        .expect("awaiting -> validating");
    assert_eq!(s2, ConnectionState::Validating);
    let (s3, _) = connection_transition(s2, ConnectionAction::SessionAccepted)
        .expect("validating -> persisting");
    assert_eq!(s3, ConnectionState::Persisting);
    let (s4, t4) = connection_transition(s3, ConnectionAction::SessionPersisted)
        .expect("persisting -> connected");
    assert_eq!(s4, ConnectionState::Connected);
    assert_eq!(t4.from, ConnectionState::Persisting);
    assert!(s4.is_terminal());
}

#[test]
fn proposal_expiry_returns_to_initializing() {
    let (s, t) =
        connection_transition(ConnectionState::AwaitingApproval, ConnectionAction::ProposalExpired)
            .expect("awaiting -> initializing");
    assert_eq!(s, ConnectionState::Initializing);
    assert_eq!(t.reason, "proposal_expired");
}

#[test]
fn every_non_terminal_state_can_fail() {
    for state in [
        ConnectionState::Initializing,
        ConnectionState::AwaitingApproval,
        ConnectionState::Validating,
        ConnectionState::Persisting,
    ] {
        let (s, _) = connection_transition(state, ConnectionAction::Fail).expect("fail");
        assert_eq!(s, ConnectionState::Failed);
    }
}

#[test]
fn terminal_states_cannot_fail_again() {
    for state in [ConnectionState::Connected, ConnectionState::Failed] {
        let err = connection_transition(state, ConnectionAction::Fail).expect_err("must fail");
        assert!(err.to_string().contains("illegal connection transition"));
    }
}

#[test]
fn retry_is_legal_from_any_state() {
    for state in [
        ConnectionState::Initializing,
        ConnectionState::AwaitingApproval,
        ConnectionState::Validating,
        ConnectionState::Persisting,
        ConnectionState::Connected,
        ConnectionState::Failed,
    ] {
        let (s, _) = connection_transition(state, ConnectionAction::Retry).expect("retry");
        assert_eq!(s, ConnectionState::Initializing);
    }
}

#[test]
fn skipping_stages_is_rejected() {
    let err = connection_transition(ConnectionState::Initializing, ConnectionAction::SessionPersisted)
        .expect_err("must fail");
    assert!(err.to_string().contains("illegal connection transition"));
    let err = connection_transition(ConnectionState::Connected, ConnectionAction::UriReady)
        .expect_err("connected is terminal");
    assert_eq!(err.from, ConnectionState::Connected);
}

#[test]
fn expiry_detection_is_case_insensitive() {
    assert!(is_expiry_message("Proposal expired"));
    assert!(is_expiry_message("PROPOSAL EXPIRED"));
    assert!(is_expiry_message("pairing request Expired after 300s"));
    assert!(!is_expiry_message("User rejected the request"));
}

#[test]
fn failure_kinds_and_visibility() {
    assert_eq!(
        ConnectError::Relay("quota exceeded".to_owned()).kind(),
        FailureKind::Relay
    );
    assert!(!ConnectError::ProposalExpired("expired".to_owned()).is_user_visible());
    assert!(ConnectError::Display("qr".to_owned()).is_user_visible());
}

#[test]
fn chain_mismatch_message_lists_approved_chains() {
    let err = ConnectError::ChainMismatch {
        required: "eip155:560048".to_owned(),
        approved: vec!["eip155:1".to_owned(), "eip155:10".to_owned()],
    };
    let msg = err.to_string();
    assert!(msg.contains("eip155:560048"));
    assert!(msg.contains("Your wallet approved: eip155:1, eip155:10."));

    let none = ConnectError::ChainMismatch {
        required: "eip155:560048".to_owned(),
        approved: vec![],
    };
    assert!(none.to_string().contains("no chains"));
}
