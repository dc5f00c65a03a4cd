//! Node registry
//!
//! Entry point for applications. Owns every [`NodeConnection`], places new
//! sessions on the best node and keeps the guild -> session index.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::builder::RegistryBuilder;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::gateway::{GatewaySink, NoopGateway};
use crate::node::{NodeConnection, NodeOptions};
use crate::region::RegionAffinity;
use crate::selector;
use crate::session::{Session, VoiceChannel};
use crate::table::SessionTable;

/// A pool of audio nodes and the sessions placed on them
pub struct Registry {
    config: ClientConfig,
    nodes: Vec<Arc<NodeConnection>>,
    table: Arc<SessionTable>,
}

impl Registry {
    /// Create a builder
    pub fn builder(user_id: &str) -> RegistryBuilder {
        RegistryBuilder::new(user_id)
    }

    /// Create the registry and start one supervisor per node.
    ///
    /// Must be called inside a Tokio runtime. Nodes connect in the
    /// background; see [`Registry::wait_for_nodes`].
    pub fn new(config: ClientConfig, gateway: Arc<dyn GatewaySink>) -> Result<Self> {
        config.validate()?;

        let table = Arc::new(SessionTable::new());
        let options = NodeOptions::from(&config);
        let nodes: Vec<Arc<NodeConnection>> = config
            .nodes
            .iter()
            .map(|node| {
                NodeConnection::new(node.clone(), options.clone(), table.clone(), gateway.clone())
            })
            .collect();

        for node in &nodes {
            node.start();
        }

        info!("Registry started with {} nodes", nodes.len());
        Ok(Self {
            config,
            nodes,
            table,
        })
    }

    /// Create from a config with no gateway sink
    pub fn from_config(config: ClientConfig) -> Result<Self> {
        Self::new(config, Arc::new(NoopGateway))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn regions(&self) -> &RegionAffinity {
        &self.config.regions
    }

    /// Nodes in configuration order
    pub fn nodes(&self) -> &[Arc<NodeConnection>] {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&Arc<NodeConnection>> {
        self.nodes.iter().find(|node| node.id() == id)
    }

    /// Pick the node a new session for a guild in `region` would go to
    pub fn select_node(&self, region: Option<&str>) -> Result<Arc<NodeConnection>> {
        selector::select(&self.nodes, region, &self.config.regions).cloned()
    }

    /// Join a voice channel.
    ///
    /// Selects a node, registers the session on it and waits for the node's
    /// `connected` event. On failure the guild slot is released again.
    pub async fn join(&self, channel: &VoiceChannel) -> Result<Arc<Session>> {
        if self
            .table
            .get(&channel.guild_id)
            .map_or(false, |current| !current.is_closed())
        {
            return Err(ClientError::AlreadyJoined(channel.guild_id.clone()));
        }

        let node = self.select_node(channel.region.as_deref())?;
        debug!(
            "Selected node {} for guild {} (region {:?})",
            node.id(),
            channel.guild_id,
            channel.region
        );
        node.create_player(channel).await
    }

    /// Session for `guild_id`, if any
    pub fn get(&self, guild_id: &str) -> Option<Arc<Session>> {
        self.table.get(guild_id)
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.table.sessions()
    }

    /// Leave the guild's voice channel
    pub async fn leave(&self, guild_id: &str) -> Result<()> {
        self.session(guild_id)?.leave().await
    }

    /// Forward a gateway voice state update to the guild's node
    pub async fn voice_state_update(&self, guild_id: &str, session_id: &str) -> Result<()> {
        self.session(guild_id)?.voice_state_update(session_id).await
    }

    /// Forward a gateway voice server update to the guild's node
    pub async fn voice_server_update(
        &self,
        guild_id: &str,
        endpoint: &str,
        token: &str,
    ) -> Result<()> {
        self.session(guild_id)?
            .voice_server_update(endpoint, token)
            .await
    }

    /// Wait until at least one node is connected
    pub async fn wait_for_nodes(&self, within: Duration) -> bool {
        if self.nodes.iter().any(|node| node.is_connected()) {
            return true;
        }
        let waits = self
            .nodes
            .iter()
            .map(|node| Box::pin(node.wait_connected(within)));
        // `select_all` completes on the first node to finish waiting; a
        // `false` from it only means that node timed out.
        let mut pending: Vec<_> = waits.collect();
        while !pending.is_empty() {
            let (connected, _, rest) = futures::future::select_all(pending).await;
            if connected {
                return true;
            }
            pending = rest;
        }
        false
    }

    /// Shut down every node and destroy all sessions
    pub async fn shutdown(&self) {
        info!("Shutting down registry");
        for node in &self.nodes {
            node.shutdown().await;
        }
    }

    fn session(&self, guild_id: &str) -> Result<Arc<Session>> {
        self.table
            .get(guild_id)
            .ok_or_else(|| ClientError::SessionNotFound(guild_id.to_string()))
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        // Supervisors hold their node alive; without a signal they would
        // keep reconnecting after the registry is gone
        for node in &self.nodes {
            node.signal_shutdown();
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("nodes", &self.nodes)
            .field("sessions", &self.table.len())
            .finish()
    }
}
