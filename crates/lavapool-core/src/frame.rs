//! JSON wire frame
//!
//! Every message in either direction is a single JSON text frame of the
//! shape `{"op": "<opcode>", "d": { ... }}`. `serde_json` never emits
//! newlines in compact mode, so encoded frames are newline-free.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::{ChannelId, GuildId};

/// Payload key carrying the guild id
pub const GUILD_ID_KEY: &str = "guildId";

/// Payload key carrying the channel id
pub const CHANNEL_ID_KEY: &str = "channelId";

/// One `{op, d}` frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub op: String,
    #[serde(default)]
    pub d: Value,
}

impl Frame {
    pub fn new(op: impl Into<String>, d: Value) -> Self {
        Self { op: op.into(), d }
    }

    /// Encode to a compact JSON string
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Encode(e.to_string()))
    }

    /// Decode a frame from raw socket text
    pub fn decode(raw: &str) -> Result<Self> {
        let frame: Frame = serde_json::from_str(raw).map_err(|e| Error::Decode(e.to_string()))?;
        if frame.op.is_empty() {
            return Err(Error::MissingField("op"));
        }
        Ok(frame)
    }

    /// Guild id from the payload, if present
    pub fn guild_id(&self) -> Option<GuildId> {
        id_field(&self.d, GUILD_ID_KEY)
    }

    /// Channel id from the payload, if present
    pub fn channel_id(&self) -> Option<ChannelId> {
        id_field(&self.d, CHANNEL_ID_KEY)
    }

    /// The guild/channel pair a frame is addressed to.
    ///
    /// Only frames carrying both identifiers are session-scoped; everything
    /// else is connection-level control traffic.
    pub fn target(&self) -> Option<(GuildId, ChannelId)> {
        Some((self.guild_id()?, self.channel_id()?))
    }
}

/// Snowflakes usually arrive as strings, but some nodes send them as numbers.
fn id_field(d: &Value, key: &str) -> Option<String> {
    match d.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
