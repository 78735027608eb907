use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use wc_handoff_core::{AppMetadata, ChainId, ConnectorConfig, PairingRequest, PortError};

pub const DEFAULT_EXTENSION_ID: &str = "obolaknhonmbgdcmfiihbdcenhhiiaao";
pub const DEFAULT_REQUIRED_CHAIN: &str = "eip155:560048";
pub const DEFAULT_APP_URL: &str = "https://example.com";
const PERSISTED_PROJECT_FILE: &str = "project_id.json";
const PROJECT_ID_QUERY_KEY: &str = "projectId";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectIdSource {
    BuildTime,
    RuntimeInjected,
    UrlParameter,
    Persisted,
}

/// Candidate locations for the WalletConnect project id, highest priority first.
#[derive(Debug, Clone, Default)]
pub struct ProjectIdSources {
    pub build_time: Option<String>,
    pub runtime_injected: Option<String>,
    pub page_url: Option<String>,
    pub persisted_path: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedProjectId {
    #[serde(rename = "WALLETCONNECT_PROJECT_ID")]
    project_id: String,
}

impl ProjectIdSources {
    /// Resolve the project id. A value taken from the page URL is written to
    /// the persisted location so later launches without the parameter find it.
    pub fn resolve(&self) -> Option<(String, ProjectIdSource)> {
        if let Some(id) = non_empty(self.build_time.as_deref()) {
            return Some((id, ProjectIdSource::BuildTime));
        }
        if let Some(id) = non_empty(self.runtime_injected.as_deref()) {
            return Some((id, ProjectIdSource::RuntimeInjected));
        }
        if let Some(id) = self.page_url.as_deref().and_then(project_id_from_url) {
            if let Some(path) = self.persisted_path.as_deref() {
                if let Err(e) = persist_project_id(path, &id) {
                    warn!(error = %e, "could not persist project id from page URL");
                }
            }
            return Some((id, ProjectIdSource::UrlParameter));
        }
        self.persisted_path
            .as_deref()
            .and_then(read_persisted_project_id)
            .map(|id| (id, ProjectIdSource::Persisted))
    }
}

pub fn project_id_from_url(page_url: &str) -> Option<String> {
    let url = reqwest::Url::parse(page_url).ok()?;
    let id = url
        .query_pairs()
        .find(|(k, _)| k == PROJECT_ID_QUERY_KEY)
        .map(|(_, v)| v.into_owned());
    non_empty(id.as_deref())
}

pub fn read_persisted_project_id(path: &Path) -> Option<String> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "no persisted project id");
            return None;
        }
    };
    match serde_json::from_str::<PersistedProjectId>(&raw) {
        Ok(p) => non_empty(Some(&p.project_id)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable persisted project id");
            None
        }
    }
}

pub fn persist_project_id(path: &Path, project_id: &str) -> Result<(), PortError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| PortError::Transport(format!("create state dir failed: {e}")))?;
    }
    let body = serde_json::to_vec_pretty(&PersistedProjectId {
        project_id: project_id.to_owned(),
    })
    .map_err(|e| PortError::Validation(format!("project id serialize failed: {e}")))?;
    std::fs::write(path, body)
        .map_err(|e| PortError::Transport(format!("persist project id failed: {e}")))
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

#[derive(Debug, Clone)]
pub struct HandoffConfig {
    pub project_id: Option<String>,
    pub project_id_source: Option<ProjectIdSource>,
    pub extension_id: String,
    pub app_name: String,
    pub app_description: String,
    pub app_url: String,
    pub required_chain: String,
    pub relay_base_url: Option<String>,
    pub state_dir: PathBuf,
    pub durability_grace_ms: u64,
    pub reload_timeout_ms: u64,
    pub http_timeout_ms: u64,
    pub event_poll_interval_ms: u64,
    pub max_expiry_renewals: u32,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            project_id_source: None,
            extension_id: DEFAULT_EXTENSION_ID.to_owned(),
            app_name: "FastRPC Gas Tank".to_owned(),
            app_description: "FastRPC service to handle your gas payments".to_owned(),
            app_url: DEFAULT_APP_URL.to_owned(),
            required_chain: DEFAULT_REQUIRED_CHAIN.to_owned(),
            relay_base_url: None,
            state_dir: PathBuf::from(".wc-handoff"),
            durability_grace_ms: 50,
            reload_timeout_ms: 5_000,
            http_timeout_ms: 15_000,
            event_poll_interval_ms: 1_000,
            max_expiry_renewals: 3,
        }
    }
}

impl HandoffConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(dir) = env_string("WC_HANDOFF_STATE_DIR") {
            cfg.state_dir = PathBuf::from(dir);
        }

        let sources = ProjectIdSources {
            build_time: option_env!("WC_HANDOFF_PROJECT_ID").map(str::to_owned),
            runtime_injected: env_string("WALLETCONNECT_PROJECT_ID")
                .or_else(|| env_string("NEXT_PUBLIC_WALLETCONNECT_PROJECT_ID")),
            page_url: env_string("WC_HANDOFF_PAGE_URL"),
            persisted_path: Some(cfg.persisted_project_path()),
        };
        match sources.resolve() {
            Some((id, source)) => {
                info!(?source, "using WalletConnect project id");
                cfg.project_id = Some(id);
                cfg.project_id_source = Some(source);
            }
            None => warn!("no WalletConnect project id found; connection will fail"),
        }

        if let Some(id) = env_string("WC_HANDOFF_EXTENSION_ID") {
            cfg.extension_id = id;
        }
        if let Some(url) =
            env_string("WC_HANDOFF_APP_URL").or_else(|| env_string("WC_HANDOFF_SITE_URL"))
        {
            cfg.app_url = url;
        }
        if let Some(chain) = env_string("WC_HANDOFF_REQUIRED_CHAIN") {
            cfg.required_chain = chain;
        }
        cfg.relay_base_url = env_string("WC_HANDOFF_RELAY_URL");
        cfg.durability_grace_ms = env_u64("WC_HANDOFF_GRACE_MS", cfg.durability_grace_ms);
        cfg.reload_timeout_ms = env_u64("WC_HANDOFF_RELOAD_TIMEOUT_MS", cfg.reload_timeout_ms);
        cfg.http_timeout_ms = env_u64("WC_HANDOFF_HTTP_TIMEOUT_MS", cfg.http_timeout_ms);
        cfg.event_poll_interval_ms =
            env_u64("WC_HANDOFF_EVENT_POLL_MS", cfg.event_poll_interval_ms);
        cfg.max_expiry_renewals = env_u64(
            "WC_HANDOFF_MAX_EXPIRY_RENEWALS",
            u64::from(cfg.max_expiry_renewals),
        )
        .try_into()
        .unwrap_or(u32::MAX);
        cfg
    }

    pub fn persisted_project_path(&self) -> PathBuf {
        self.state_dir.join(PERSISTED_PROJECT_FILE)
    }

    pub fn metadata(&self) -> AppMetadata {
        AppMetadata::for_origin(&self.app_name, &self.app_description, &self.app_url)
    }

    /// Build the connector configuration. A missing project id is passed
    /// through as empty so the connector reports it as a configuration failure.
    pub fn connector_config(&self) -> Result<ConnectorConfig, PortError> {
        let chain: ChainId = self
            .required_chain
            .parse()
            .map_err(|e| PortError::Validation(format!("required chain: {e}")))?;
        if chain.namespace() != "eip155" {
            return Err(PortError::Validation(format!(
                "required chain: {chain} is not an eip155 chain"
            )));
        }
        let mut config = ConnectorConfig::new(
            self.project_id.clone().unwrap_or_default(),
            self.extension_id.clone(),
            PairingRequest::new(chain, self.metadata()),
        );
        config.durability_grace = Duration::from_millis(self.durability_grace_ms);
        config.reload_timeout = Duration::from_millis(self.reload_timeout_ms);
        config.max_expiry_renewals = self.max_expiry_renewals;
        Ok(config)
    }
}

fn env_string(key: &str) -> Option<String> {
    non_empty(std::env::var(key).ok().as_deref())
}

fn env_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "ignoring non-numeric setting");
            default
        }),
        Err(_) => default,
    }
}
