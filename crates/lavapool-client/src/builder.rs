//! Registry builder pattern

use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::config::{ClientConfig, NodeConfig};
use crate::error::{ClientError, Result};
use crate::gateway::{GatewaySink, NoopGateway};
use crate::region::RegionAffinity;
use crate::Registry;

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Builder for [`Registry`]
pub struct RegistryBuilder {
    config: ClientConfig,
    gateway: Arc<dyn GatewaySink>,
}

impl RegistryBuilder {
    /// Create a new builder
    pub fn new(user_id: &str) -> Self {
        Self::from_config(ClientConfig::new(user_id))
    }

    /// Start from an existing configuration
    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config,
            gateway: Arc::new(NoopGateway),
        }
    }

    /// Add a node
    pub fn node(mut self, host: &str, port: u16, region: &str) -> Self {
        self.config.nodes.push(NodeConfig::new(host, port, region));
        self
    }

    /// Add a fully specified node
    pub fn node_config(mut self, node: NodeConfig) -> Self {
        self.config.nodes.push(node);
        self
    }

    /// Shard count reported in the handshake
    pub fn num_shards(mut self, shards: u32) -> Self {
        self.config.num_shards = shards;
        self
    }

    /// Set client name
    pub fn client_name(mut self, name: &str) -> Self {
        self.config.client_name = name.to_string();
        self
    }

    /// Deadline for acknowledged commands
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout_ms = millis(timeout);
        self
    }

    /// Reconnect delay bounds
    pub fn reconnect_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.config.reconnect_base_ms = millis(base);
        self.config.reconnect_max_ms = millis(max);
        self
    }

    /// Replace the region affinity table
    pub fn regions(mut self, regions: RegionAffinity) -> Self {
        self.config.regions = regions;
        self
    }

    /// Set the sink for `sendWS` payloads
    pub fn gateway<G: GatewaySink + 'static>(mut self, gateway: G) -> Self {
        self.gateway = Arc::new(gateway);
        self
    }

    /// Build the registry. Nodes connect in the background.
    pub fn build(self) -> Result<Registry> {
        Registry::new(self.config, self.gateway)
    }

    /// Build and wait for the first node to connect
    pub async fn connect(self) -> Result<Registry> {
        let within = self.config.command_timeout();
        let registry = self.build()?;
        if !registry.wait_for_nodes(within).await {
            warn!("No node connected within {:?}", within);
            registry.shutdown().await;
            return Err(ClientError::NoAvailableNode);
        }
        Ok(registry)
    }
}
