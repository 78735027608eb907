pub mod connector;
pub mod domain;
pub mod guard;
pub mod messages;
pub mod ports;
pub mod relay;
pub mod state_machine;
pub mod validation;

pub use connector::{
    ConnectionEvent, ConnectionSnapshot, Connector, SkipReason, StartOutcome, TeardownReport,
};
pub use domain::{
    AppMetadata, ApprovedSession, ChainId, ChainIdParseError, ConnectorConfig, DisconnectReason,
    DisplayArtifact, DurableSession, PairingRequest, QrOptions, RelayAcknowledgment,
    RequiredNamespace, SessionNamespace, UnixSeconds,
};
pub use guard::AttemptGuard;
pub use messages::{BridgeEvent, BridgeMessage, ErrorPayload, InitPayload, SessionPayload, UriPayload};
pub use ports::{
    ApprovalFuture, DisplayPort, DurabilityPort, EventSource, PairingProposal, PortError,
    RelayChannel, WalletClient, WalletSessionPort,
};
pub use relay::{HandoffReport, ReloadOutcome, SessionRelay};
pub use state_machine::{
    connection_transition, is_expiry_message, ConnectError, ConnectionAction, ConnectionState,
    FailureKind, StateMachineError, StateTransition,
};
pub use validation::{approved_chains, validate_session, ValidationFailure};
