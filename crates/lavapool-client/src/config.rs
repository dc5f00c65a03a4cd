//! Client configuration
//!
//! Loaded from TOML, e.g.
//!
//! ```toml
//! user_id = "123456789012345678"
//! command_timeout_ms = 10000
//!
//! [[nodes]]
//! host = "10.0.0.5"
//! port = 2333
//! region = "eu"
//! password = "youshallnotpass"
//!
//! [regions]
//! eu = ["eu", "russia"]
//! us = ["us", "brazil"]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::error::{ClientError, Result};
use crate::region::RegionAffinity;
use lavapool_core::{UserId, DEFAULT_NODE_PORT};

/// Node identity, `host:port`
pub type NodeId = String;

/// One audio node to connect to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Region tag looked up in the affinity table
    pub region: String,
    /// Sent as the `Authorization` handshake header
    #[serde(default)]
    pub password: Option<String>,
    /// Use `wss://`
    #[serde(default)]
    pub secure: bool,
}

impl NodeConfig {
    pub fn new(host: &str, port: u16, region: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            region: region.to_string(),
            password: None,
            secure: false,
        }
    }

    pub fn id(&self) -> NodeId {
        format!("{}:{}", self.host, self.port)
    }

    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

/// Client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Bot user id sent with every `join`
    pub user_id: UserId,
    #[serde(default = "default_num_shards")]
    pub num_shards: u32,
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// Deadline for acknowledged commands (connect, play, stop, leave)
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// First reconnect delay; doubles per failed attempt
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub regions: RegionAffinity,
}

fn default_port() -> u16 {
    DEFAULT_NODE_PORT
}

fn default_num_shards() -> u32 {
    1
}

fn default_client_name() -> String {
    format!("lavapool/{}", env!("CARGO_PKG_VERSION"))
}

fn default_command_timeout_ms() -> u64 {
    10_000
}

fn default_reconnect_base_ms() -> u64 {
    1_000
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

impl ClientConfig {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            num_shards: default_num_shards(),
            client_name: default_client_name(),
            command_timeout_ms: default_command_timeout_ms(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            nodes: Vec::new(),
            regions: RegionAffinity::default(),
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: ClientConfig =
            toml::from_str(text).map_err(|e| ClientError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ClientError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Sanity checks that would otherwise surface as confusing runtime
    /// failures.
    pub fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(ClientError::Config("user_id must not be empty".to_string()));
        }
        if self.num_shards == 0 {
            return Err(ClientError::Config("num_shards must be at least 1".to_string()));
        }
        if self.command_timeout_ms == 0 {
            return Err(ClientError::Config(
                "command_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.reconnect_base_ms == 0 || self.reconnect_max_ms < self.reconnect_base_ms {
            return Err(ClientError::Config(format!(
                "invalid reconnect backoff: base {}ms, max {}ms",
                self.reconnect_base_ms, self.reconnect_max_ms
            )));
        }
        if self.nodes.is_empty() {
            return Err(ClientError::Config("at least one node is required".to_string()));
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.host.is_empty() {
                return Err(ClientError::Config("node host must not be empty".to_string()));
            }
            if !seen.insert(node.id()) {
                return Err(ClientError::Config(format!("duplicate node {}", node.id())));
            }
        }

        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }
}
