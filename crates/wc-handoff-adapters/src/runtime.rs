//! In-process stand-in for the extension messaging API.
//!
//! The page side (`RuntimeChannel`) sends requests that each get one reply
//! slot; the host side (`HostEndpoint`) answers them and can push broadcast
//! events back to the page.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use wc_handoff_core::{
    BridgeEvent, BridgeMessage, EventSource, PortError, RelayAcknowledgment, RelayChannel,
};

pub const NO_RECEIVER: &str = "Could not establish connection. Receiving end does not exist.";
pub const PORT_CLOSED: &str = "The message port closed before a response was received.";

#[derive(Debug)]
pub struct RuntimeRequest {
    pub message: BridgeMessage,
    reply: oneshot::Sender<RelayAcknowledgment>,
}

impl RuntimeRequest {
    /// Answer the request. Returns false if the sender stopped waiting.
    pub fn respond(self, ack: RelayAcknowledgment) -> bool {
        self.reply.send(ack).is_ok()
    }

    /// Split into the message and its reply slot, for hosts that answer later.
    pub fn into_parts(self) -> (BridgeMessage, oneshot::Sender<RelayAcknowledgment>) {
        (self.message, self.reply)
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeChannel {
    target_id: String,
    requests: mpsc::Sender<RuntimeRequest>,
    events: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<BridgeEvent>>>,
    sent: Arc<Mutex<Vec<String>>>,
}

#[derive(Debug)]
pub struct HostEndpoint {
    target_id: String,
    requests: mpsc::Receiver<RuntimeRequest>,
    events: mpsc::UnboundedSender<BridgeEvent>,
}

pub fn runtime_channel(target_id: &str, capacity: usize) -> (RuntimeChannel, HostEndpoint) {
    let (req_tx, req_rx) = mpsc::channel(capacity.max(1));
    let (ev_tx, ev_rx) = mpsc::unbounded_channel();
    (
        RuntimeChannel {
            target_id: target_id.to_owned(),
            requests: req_tx,
            events: Arc::new(tokio::sync::Mutex::new(ev_rx)),
            sent: Arc::new(Mutex::new(Vec::new())),
        },
        HostEndpoint {
            target_id: target_id.to_owned(),
            requests: req_rx,
            events: ev_tx,
        },
    )
}

impl RuntimeChannel {
    /// Kinds of every message handed to the runtime, in send order.
    pub fn sent_kinds(&self) -> Result<Vec<String>, PortError> {
        let g = self
            .sent
            .lock()
            .map_err(|e| PortError::Transport(format!("runtime log lock poisoned: {e}")))?;
        Ok(g.clone())
    }

    fn record(&self, kind: &str) -> Result<(), PortError> {
        let mut g = self
            .sent
            .lock()
            .map_err(|e| PortError::Transport(format!("runtime log lock poisoned: {e}")))?;
        g.push(kind.to_owned());
        Ok(())
    }
}

#[async_trait]
impl RelayChannel for RuntimeChannel {
    async fn send(
        &self,
        target: &str,
        message: BridgeMessage,
    ) -> Result<RelayAcknowledgment, PortError> {
        if target != self.target_id {
            return Err(PortError::Unreachable(format!("{NO_RECEIVER} ({target})")));
        }
        self.record(message.kind())?;
        debug!(kind = message.kind(), %target, "runtime send");
        let (reply, response) = oneshot::channel();
        self.requests
            .send(RuntimeRequest { message, reply })
            .await
            .map_err(|_| PortError::Unreachable(NO_RECEIVER.to_owned()))?;
        response
            .await
            .map_err(|_| PortError::Unreachable(PORT_CLOSED.to_owned()))
    }
}

#[async_trait]
impl EventSource for RuntimeChannel {
    async fn next_event(&self) -> Result<BridgeEvent, PortError> {
        let mut events = self.events.lock().await;
        events
            .recv()
            .await
            .ok_or_else(|| PortError::Unreachable("extension runtime disconnected".to_owned()))
    }
}

impl HostEndpoint {
    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub async fn recv(&mut self) -> Option<RuntimeRequest> {
        self.requests.recv().await
    }

    pub fn emitter(&self) -> EventEmitter {
        EventEmitter {
            events: self.events.clone(),
        }
    }
}

/// Host-side handle for pushing broadcast events to the page.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    events: mpsc::UnboundedSender<BridgeEvent>,
}

impl EventEmitter {
    pub fn emit(&self, event: BridgeEvent) -> Result<(), PortError> {
        debug!(kind = event.kind(), "runtime broadcast");
        self.events
            .send(event)
            .map_err(|_| PortError::Unreachable("connect page is gone".to_owned()))
    }
}
