//! Node connection
//!
//! One [`NodeConnection`] per configured audio node. A supervisor task owns
//! the socket: it connects, routes inbound frames, and reconnects with
//! exponential backoff after the socket drops. Losing the socket destroys
//! every session placed on the node.

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{ClientConfig, NodeConfig, NodeId};
use crate::error::{ClientError, Result};
use crate::gateway::GatewaySink;
use crate::selector::Candidate;
use crate::session::{Session, VoiceChannel};
use crate::table::SessionTable;
use lavapool_core::{ControlFrame, Frame, Inbound, LoadStats, SessionFrame};
use lavapool_transport::{
    Transport, TransportEvent, TransportReceiver, TransportSender, WebSocketConfig,
    WebSocketTransport,
};

/// Connection state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Disconnected,
    Connecting,
    Connected,
}

/// Outbound path from a session to its node's socket.
///
/// Cloned into every session placed on the node. The supervisor attaches
/// a fresh sender after each successful connect and detaches it when the
/// socket drops.
#[derive(Clone)]
pub(crate) struct NodeLink {
    node_id: NodeId,
    sender: Arc<RwLock<Option<Arc<dyn TransportSender>>>>,
}

impl NodeLink {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            sender: Arc::new(RwLock::new(None)),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn attach(&self, sender: Arc<dyn TransportSender>) {
        *self.sender.write() = Some(sender);
    }

    pub fn detach(&self) -> Option<Arc<dyn TransportSender>> {
        self.sender.write().take()
    }

    pub async fn send(&self, frame: &Frame) -> Result<()> {
        // Clone out so the lock is not held across the await
        let sender = self
            .sender
            .read()
            .clone()
            .ok_or(ClientError::NotConnected)?;
        let text = frame.encode()?;
        debug!("-> {} {}", self.node_id, text);
        sender.send(text).await?;
        Ok(())
    }
}

/// Per-node settings derived from [`ClientConfig`]
#[derive(Debug, Clone)]
pub(crate) struct NodeOptions {
    pub user_id: String,
    pub num_shards: u32,
    pub client_name: String,
    pub command_timeout: Duration,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
}

impl From<&ClientConfig> for NodeOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            user_id: config.user_id.clone(),
            num_shards: config.num_shards,
            client_name: config.client_name.clone(),
            command_timeout: config.command_timeout(),
            reconnect_base: config.reconnect_base(),
            reconnect_max: config.reconnect_max(),
        }
    }
}

/// A supervised connection to one audio node
pub struct NodeConnection {
    id: NodeId,
    config: NodeConfig,
    options: NodeOptions,
    state: watch::Sender<NodeState>,
    stats: RwLock<LoadStats>,
    link: NodeLink,
    table: Arc<SessionTable>,
    gateway: Arc<dyn GatewaySink>,
    shutdown: watch::Sender<bool>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl NodeConnection {
    pub(crate) fn new(
        config: NodeConfig,
        options: NodeOptions,
        table: Arc<SessionTable>,
        gateway: Arc<dyn GatewaySink>,
    ) -> Arc<Self> {
        let id = config.id();
        let (state, _) = watch::channel(NodeState::Disconnected);
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            link: NodeLink::new(id.clone()),
            id,
            config,
            options,
            state,
            stats: RwLock::new(LoadStats::default()),
            table,
            gateway,
            shutdown,
            supervisor: Mutex::new(None),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    pub fn url(&self) -> String {
        self.config.url()
    }

    /// Region tag from the node's configuration
    pub fn region(&self) -> &str {
        &self.config.region
    }

    pub fn state(&self) -> NodeState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == NodeState::Connected
    }

    /// Last reported load
    pub fn stats(&self) -> LoadStats {
        *self.stats.read()
    }

    /// Sessions placed on this node
    pub fn players(&self) -> Vec<Arc<Session>> {
        self.table.node_sessions(&self.id)
    }

    pub fn player(&self, guild_id: &str) -> Option<Arc<Session>> {
        self.table.node_get(&self.id, guild_id)
    }

    /// Wait until the node reaches [`NodeState::Connected`]
    pub async fn wait_connected(&self, within: Duration) -> bool {
        let mut state = self.state.subscribe();
        let reached =
            tokio::time::timeout(within, state.wait_for(|s| *s == NodeState::Connected)).await;
        matches!(reached, Ok(Ok(_)))
    }

    /// Start the connection supervisor. Does nothing if already started.
    pub(crate) fn start(self: &Arc<Self>) {
        let mut slot = self.supervisor.lock();
        if slot.is_some() {
            return;
        }
        let shutdown = self.shutdown.subscribe();
        *slot = Some(tokio::spawn(self.clone().supervise(shutdown)));
    }

    /// Tell the supervisor to stop without waiting for it. The supervisor
    /// closes the socket and drops the node's sessions on its way out.
    pub(crate) fn signal_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Stop reconnecting, close the socket and drop every session.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let handle = self.supervisor.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Supervisor for node {} panicked: {}", self.id, e);
            }
        }
        self.connection_lost(Some("shutdown".to_string())).await;
        info!("Node {} shut down", self.id);
    }

    /// Send one frame to the node
    pub async fn send(&self, op: &str, payload: Value) -> Result<()> {
        self.link.send(&Frame::new(op, payload)).await
    }

    /// Place a new session for `channel` on this node and run its join
    /// handshake. The session is registered before `join` is sent so the
    /// `connected` event can be routed to it.
    pub async fn create_player(&self, channel: &VoiceChannel) -> Result<Arc<Session>> {
        let session = Session::new(
            channel,
            &self.options.user_id,
            self.link.clone(),
            self.options.command_timeout,
        );
        self.table.insert(session.clone())?;

        let table = Arc::downgrade(&self.table);
        session.on_terminal(Box::new(move |session| {
            if let Some(table) = table.upgrade() {
                table.remove(session);
            }
        }));

        info!(
            "Creating player for guild {} in channel {} on node {}",
            channel.guild_id, channel.id, self.id
        );

        if let Err(e) = session.connect().await {
            warn!("Join for guild {} failed: {}", channel.guild_id, e);
            session.destroy();
            return Err(e);
        }
        Ok(session)
    }

    /// Route one inbound text frame
    pub async fn on_frame(&self, raw: &str) {
        let frame = match Frame::decode(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Node {} sent an undecodable frame: {}", self.id, e);
                return;
            }
        };

        match Inbound::classify(&frame) {
            Ok(Inbound::Session { guild_id, event, .. }) => {
                let Some(session) = self.table.node_get(&self.id, &guild_id) else {
                    debug!("Node {} sent {} for unknown guild {}", self.id, frame.op, guild_id);
                    return;
                };
                session.on_message(&frame);
                if event == SessionFrame::Disconnected {
                    session.destroy();
                }
            }
            Ok(Inbound::Control(ControlFrame::SendWs(payload))) => {
                if let Err(e) = self.gateway.send(payload).await {
                    warn!("Gateway rejected payload from node {}: {}", self.id, e);
                }
            }
            Ok(Inbound::Control(ControlFrame::Stats(stats))) => {
                debug!(
                    "Node {} load {:.2} on {} cores",
                    self.id, stats.load, stats.cores
                );
                *self.stats.write() = stats;
            }
            Ok(Inbound::Control(ControlFrame::Unknown(op))) => {
                debug!("Node {} sent unhandled op {}", self.id, op);
            }
            Err(e) => {
                warn!("Node {} sent a malformed {} frame: {}", self.id, frame.op, e);
            }
        }
    }

    fn transport(&self) -> WebSocketTransport {
        let mut config = WebSocketConfig::default()
            .header("User-Id", &self.options.user_id)
            .header("Num-Shards", &self.options.num_shards.to_string())
            .header("Client-Name", &self.options.client_name);
        if let Some(password) = &self.config.password {
            config = config.header("Authorization", password);
        }
        WebSocketTransport::with_config(config)
    }

    fn set_state(&self, state: NodeState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Node {} {:?} -> {:?}", self.id, previous, state);
        }
    }

    async fn supervise(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let transport = self.transport();
        let url = self.config.url();
        let mut delay = self.options.reconnect_base;

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.set_state(NodeState::Connecting);
            info!("Connecting to node {} at {}", self.id, url);

            let connected = tokio::select! {
                _ = shutdown.changed() => break,
                result = transport.connect(&url) => result,
            };

            match connected {
                Ok((sender, mut receiver)) => {
                    self.link.attach(Arc::new(sender));
                    self.set_state(NodeState::Connected);
                    info!("Connected to node {}", self.id);
                    delay = self.options.reconnect_base;

                    let reason = loop {
                        tokio::select! {
                            _ = shutdown.changed() => break Some("shutdown".to_string()),
                            event = receiver.recv() => match event {
                                Some(TransportEvent::Frame(raw)) => self.on_frame(&raw).await,
                                Some(TransportEvent::Error(e)) => {
                                    warn!("Node {} socket error: {}", self.id, e);
                                }
                                Some(TransportEvent::Connected) => {}
                                Some(TransportEvent::Disconnected { reason }) => break reason,
                                None => break None,
                            },
                        }
                    };

                    self.connection_lost(reason).await;
                }
                Err(e) => {
                    warn!("Failed to connect to node {}: {}", self.id, e);
                    self.set_state(NodeState::Disconnected);
                }
            }

            if *shutdown.borrow() {
                break;
            }

            info!("Reconnecting to node {} in {:?}", self.id, delay);
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            delay = (delay * 2).min(self.options.reconnect_max);
        }

        self.set_state(NodeState::Disconnected);
        debug!("Supervisor for node {} stopped", self.id);
    }

    /// Detach the socket and destroy every session on this node
    async fn connection_lost(&self, reason: Option<String>) {
        if let Some(sender) = self.link.detach() {
            if let Err(e) = sender.close().await {
                debug!("Closing socket for node {}: {}", self.id, e);
            }
            warn!(
                "Lost connection to node {}: {}",
                self.id,
                reason.as_deref().unwrap_or("closed")
            );
        }
        self.set_state(NodeState::Disconnected);

        let sessions = self.table.node_sessions(&self.id);
        if !sessions.is_empty() {
            info!("Dropping {} sessions on node {}", sessions.len(), self.id);
        }
        for session in sessions {
            session.destroy_with(|| ClientError::ConnectionLost(self.id.clone()));
        }
    }
}

impl Candidate for NodeConnection {
    fn is_connected(&self) -> bool {
        NodeConnection::is_connected(self)
    }

    fn region(&self) -> &str {
        NodeConnection::region(self)
    }

    fn load(&self) -> LoadStats {
        self.stats()
    }
}

impl fmt::Debug for NodeConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeConnection")
            .field("id", &self.id)
            .field("region", &self.config.region)
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{ChannelGateway, NoopGateway};
    use serde_json::json;

    fn options() -> NodeOptions {
        let mut config = ClientConfig::new("42");
        config.command_timeout_ms = 1_000;
        NodeOptions::from(&config)
    }

    fn node() -> Arc<NodeConnection> {
        NodeConnection::new(
            NodeConfig::new("127.0.0.1", 1, "eu"),
            options(),
            Arc::new(SessionTable::new()),
            Arc::new(NoopGateway),
        )
    }

    #[test]
    fn test_new_node_is_disconnected() {
        let node = node();
        assert_eq!(node.id(), "127.0.0.1:1");
        assert_eq!(node.state(), NodeState::Disconnected);
        assert!(!node.is_connected());
        assert_eq!(node.stats(), LoadStats::default());
        assert_eq!(node.region(), "eu");
    }

    #[tokio::test]
    async fn test_stats_frame_updates_load() {
        let node = node();
        node.on_frame(r#"{"op":"stats","d":{"cores":8,"load":2.0}}"#)
            .await;
        assert_eq!(node.stats(), LoadStats::new(8, 2.0));
        assert_eq!(node.load().score(), 25.0);

        // Malformed stats leave the last value in place
        node.on_frame(r#"{"op":"stats","d":{"cores":2}}"#).await;
        assert_eq!(node.stats(), LoadStats::new(8, 2.0));
    }

    #[tokio::test]
    async fn test_send_ws_goes_to_gateway() {
        let (gateway, mut rx) = ChannelGateway::new();
        let node = NodeConnection::new(
            NodeConfig::new("127.0.0.1", 1, "eu"),
            options(),
            Arc::new(SessionTable::new()),
            Arc::new(gateway),
        );
        node.on_frame(r#"{"op":"sendWS","d":{"op":4,"d":{"guild_id":"g1"}}}"#)
            .await;
        assert_eq!(rx.recv().await, Some(json!({ "op": 4, "d": { "guild_id": "g1" } })));
    }

    #[tokio::test]
    async fn test_garbage_and_unknown_frames_are_ignored() {
        let node = node();
        node.on_frame("not json").await;
        node.on_frame(r#"{"op":"mystery","d":{}}"#).await;
        node.on_frame(r#"{"op":"trackEnd","d":{"guildId":"g9","channelId":"c9"}}"#)
            .await;
        assert!(node.players().is_empty());
    }

    #[tokio::test]
    async fn test_send_while_disconnected() {
        let node = node();
        let err = node.send("stop", json!({})).await.unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
    }

    #[tokio::test]
    async fn test_create_player_without_socket_cleans_up() {
        let node = node();
        let err = node
            .create_player(&VoiceChannel::new("g1", "c1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
        assert!(node.players().is_empty());
        assert!(node.player("g1").is_none());
        node.table.assert_consistent();
    }

    #[tokio::test]
    async fn test_wait_connected_times_out_on_unreachable_node() {
        let node = node();
        node.start();
        assert!(!node.wait_connected(Duration::from_millis(100)).await);
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_signal_shutdown_stops_supervisor() {
        let node = node();
        node.start();
        node.signal_shutdown();

        let handle = node.supervisor.lock().take().unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("supervisor kept running")
            .unwrap();
        assert_eq!(node.state(), NodeState::Disconnected);
    }

    #[tokio::test]
    async fn test_shutdown_without_start() {
        let node = node();
        node.shutdown().await;
        assert_eq!(node.state(), NodeState::Disconnected);
    }
}
