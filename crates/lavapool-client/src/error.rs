//! Client error types

use std::time::Duration;
use thiserror::Error;

use crate::session::SessionState;
use lavapool_core::GuildId;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    /// Selection found no node in the Connected state
    #[error("no available node")]
    NoAvailableNode,

    /// A command's acknowledgement did not arrive in time
    #[error("{op} not acknowledged within {after:?}")]
    CommandTimeout { op: &'static str, after: Duration },

    /// The node connection owning the session went away
    #[error("connection to node {0} lost")]
    ConnectionLost(String),

    /// The guild already has a live or in-flight session
    #[error("guild {0} already has a session")]
    AlreadyJoined(GuildId),

    #[error("no session for guild {0}")]
    SessionNotFound(GuildId),

    /// The session was destroyed; no further commands are accepted
    #[error("session destroyed")]
    SessionDestroyed,

    #[error("cannot {op} while {state:?}")]
    InvalidState { op: &'static str, state: SessionState },

    #[error("not connected")]
    NotConnected,

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] lavapool_core::Error),

    #[error("transport error: {0}")]
    Transport(#[from] lavapool_transport::TransportError),
}
