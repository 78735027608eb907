//! Relay channel over HTTP, for a host process that exposes the extension's
//! message port as `POST {base}/runtime/{target}/message` and its broadcasts
//! as `GET {base}/runtime/{target}/events`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use wc_handoff_core::{
    BridgeEvent, BridgeMessage, EventSource, PortError, RelayAcknowledgment, RelayChannel,
};

use crate::config::HandoffConfig;

#[derive(Debug, Clone)]
pub struct HttpRelayChannel {
    base_url: String,
    events_target: String,
    client: reqwest::Client,
    poll_interval: Duration,
    buffered: Arc<tokio::sync::Mutex<VecDeque<BridgeEvent>>>,
}

impl HttpRelayChannel {
    pub fn new(
        base_url: &str,
        events_target: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Self, PortError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PortError::Transport(format!("failed to build relay client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            events_target: events_target.to_owned(),
            client,
            poll_interval,
            buffered: Arc::new(tokio::sync::Mutex::new(VecDeque::new())),
        })
    }

    pub fn from_config(config: &HandoffConfig) -> Result<Self, PortError> {
        let base_url = config.relay_base_url.as_deref().ok_or_else(|| {
            PortError::Policy("relay URL not configured (set WC_HANDOFF_RELAY_URL)".to_owned())
        })?;
        Self::new(
            base_url,
            &config.extension_id,
            Duration::from_millis(config.http_timeout_ms),
            Duration::from_millis(config.event_poll_interval_ms),
        )
    }

    fn url(&self, target: &str, leaf: &str) -> String {
        format!("{}/runtime/{target}/{leaf}", self.base_url)
    }

    async fn fetch_events(&self) -> Result<Vec<BridgeEvent>, PortError> {
        let url = self.url(&self.events_target, "events");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PortError::Unreachable(format!("event poll failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PortError::Unreachable(format!(
                "event poll returned {status}"
            )));
        }
        response
            .json::<Vec<BridgeEvent>>()
            .await
            .map_err(|e| PortError::Transport(format!("event decode failed: {e}")))
    }
}

#[async_trait]
impl RelayChannel for HttpRelayChannel {
    async fn send(
        &self,
        target: &str,
        message: BridgeMessage,
    ) -> Result<RelayAcknowledgment, PortError> {
        let url = self.url(target, "message");
        debug!(kind = message.kind(), %url, "relay POST");
        let response = self
            .client
            .post(&url)
            .json(&message)
            .send()
            .await
            .map_err(|e| PortError::Unreachable(format!("relay request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, kind = message.kind(), "relay rejected message");
            return Err(PortError::Unreachable(format!(
                "relay returned {status}: {body}"
            )));
        }
        response
            .json::<RelayAcknowledgment>()
            .await
            .map_err(|e| PortError::Transport(format!("acknowledgment decode failed: {e}")))
    }
}

#[async_trait]
impl EventSource for HttpRelayChannel {
    async fn next_event(&self) -> Result<BridgeEvent, PortError> {
        let mut buffered = self.buffered.lock().await;
        loop {
            if let Some(event) = buffered.pop_front() {
                return Ok(event);
            }
            let events = self.fetch_events().await?;
            if events.is_empty() {
                tokio::time::sleep(self.poll_interval).await;
            } else {
                debug!(count = events.len(), "relay events received");
                buffered.extend(events);
            }
        }
    }
}
