//! Lavapool Transport Layer
//!
//! Persistent text-frame sockets between the client and audio nodes.
//! The client only depends on the traits in [`traits`]; [`websocket`]
//! provides the default implementation plus a server used by test harnesses.

pub mod error;
pub mod traits;
pub mod websocket;

pub use error::{Result, TransportError};
pub use traits::{Transport, TransportEvent, TransportReceiver, TransportSender, TransportServer};
pub use websocket::{WebSocketConfig, WebSocketReceiver, WebSocketSender, WebSocketServer, WebSocketTransport};
