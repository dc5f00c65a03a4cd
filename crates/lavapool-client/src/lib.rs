//! lavapool client library
//!
//! Connects to a pool of audio nodes, places each guild's playback session
//! on the least-loaded node in its region, and drives the per-guild
//! command/event state machine.
//!
//! # Example
//!
//! ```ignore
//! use lavapool_client::{Registry, VoiceChannel};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = Registry::builder("123456789012345678")
//!         .node("10.0.0.5", 2333, "eu")
//!         .node("10.0.1.5", 2333, "us")
//!         .connect()
//!         .await?;
//!
//!     let channel = VoiceChannel::new("guild", "channel").with_region("vip-us-east");
//!     let session = registry.join(&channel).await?;
//!     let info = session.play(json!({ "url": "https://example.com/a.mp3" })).await?;
//!     println!("now playing {}", info);
//!
//!     session.leave().await?;
//!     registry.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod config;
pub mod error;
pub mod gateway;
pub mod node;
pub mod region;
pub mod registry;
pub mod selector;
pub mod session;
mod table;

pub use builder::RegistryBuilder;
pub use config::{ClientConfig, NodeConfig, NodeId};
pub use error::{ClientError, Result};
pub use gateway::{ChannelGateway, GatewaySink, NoopGateway};
pub use node::{NodeConnection, NodeState};
pub use region::{simplify_region, RegionAffinity};
pub use registry::Registry;
pub use session::{Session, SessionEvent, SessionState, VoiceChannel};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::builder::RegistryBuilder;
    pub use crate::error::{ClientError, Result};
    pub use crate::registry::Registry;
    pub use crate::session::{Session, SessionEvent, SessionState, VoiceChannel};
    pub use lavapool_core::LoadStats;
}
