pub mod bridged;
pub mod config;
pub mod durability;
pub mod host;
pub mod http;
pub mod qr;
pub mod runtime;
pub mod wallet;

pub use bridged::{BridgedClient, BridgedWalletSession};
pub use config::{HandoffConfig, ProjectIdSource, ProjectIdSources};
pub use durability::{FsDurability, NoDurability};
pub use host::{ExtensionHost, PairingScript, ReloadBehavior};
pub use http::HttpRelayChannel;
pub use qr::{svg_from_data_url, QrDisplayAdapter};
pub use runtime::{runtime_channel, EventEmitter, HostEndpoint, RuntimeChannel, RuntimeRequest};
pub use wallet::{approved_session, derived_address, ApprovalScript, DeterministicWallet};
