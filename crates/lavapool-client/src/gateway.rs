//! Voice gateway collaborator
//!
//! Nodes occasionally need the application to put a raw payload on its
//! voice gateway connection (`sendWS`). The client never interprets these
//! payloads; it hands them to a [`GatewaySink`].

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{ClientError, Result};

/// Receives raw gateway payloads emitted by nodes
#[async_trait]
pub trait GatewaySink: Send + Sync {
    async fn send(&self, payload: Value) -> Result<()>;
}

/// Drops every payload. Used when the application did not install a sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopGateway;

#[async_trait]
impl GatewaySink for NoopGateway {
    async fn send(&self, payload: Value) -> Result<()> {
        debug!("No gateway sink installed, dropping payload: {}", payload);
        Ok(())
    }
}

/// Forwards payloads into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelGateway {
    tx: mpsc::UnboundedSender<Value>,
}

impl ChannelGateway {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl GatewaySink for ChannelGateway {
    async fn send(&self, payload: Value) -> Result<()> {
        self.tx
            .send(payload)
            .map_err(|e| ClientError::SendFailed(e.to_string()))
    }
}
