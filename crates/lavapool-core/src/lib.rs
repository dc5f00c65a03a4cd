//! Lavapool Core
//!
//! Protocol primitives shared by the lavapool client and its test harness.
//!
//! This crate provides:
//! - The JSON wire frame ([`Frame`]) exchanged with audio nodes
//! - Opcode names ([`op`])
//! - Typed outbound commands ([`Command`])
//! - Classification of inbound frames ([`Inbound`], [`SessionFrame`], [`ControlFrame`])

pub mod command;
pub mod error;
pub mod event;
pub mod frame;
pub mod op;

pub use command::Command;
pub use error::{Error, Result};
pub use event::{ControlFrame, EventKind, Inbound, LoadStats, SessionFrame};
pub use frame::Frame;

/// Guild identifier as carried on the wire
pub type GuildId = String;

/// Voice channel identifier as carried on the wire
pub type ChannelId = String;

/// Bot user identifier sent with `join`
pub type UserId = String;

/// Default node port
pub const DEFAULT_NODE_PORT: u16 = 2333;
