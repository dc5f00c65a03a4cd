//! Outbound commands (client -> node)

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::{op, ChannelId, GuildId, UserId};

/// A command sent to an audio node.
///
/// Serializes directly to the `{op, d}` wire shape. Field names follow the
/// node protocol, including the snake_case keys of the forwarded voice
/// gateway payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "op",
    content = "d",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum Command {
    Join {
        channel_id: ChannelId,
        guild_id: GuildId,
        user_id: UserId,
    },
    Play {
        track: Value,
        guild_id: GuildId,
        channel_id: ChannelId,
    },
    Stop {
        guild_id: GuildId,
        channel_id: ChannelId,
    },
    Leave {
        guild_id: GuildId,
        channel_id: ChannelId,
    },
    Seek {
        position: u64,
        guild_id: GuildId,
        channel_id: ChannelId,
    },
    Volume {
        volume: u16,
        guild_id: GuildId,
        channel_id: ChannelId,
    },
    Pause {
        /// `None` lets the node toggle
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pause: Option<bool>,
        guild_id: GuildId,
        channel_id: ChannelId,
    },
    VoiceStateUpdate {
        guild_id: GuildId,
        channel_id: ChannelId,
        #[serde(rename = "session_id")]
        session_id: String,
    },
    VoiceServerUpdate {
        guild_id: GuildId,
        channel_id: ChannelId,
        endpoint: String,
        #[serde(rename = "guild_id")]
        server_guild_id: GuildId,
        token: String,
    },
}

impl Command {
    /// Opcode this command is sent under
    pub fn op(&self) -> &'static str {
        match self {
            Command::Join { .. } => op::JOIN,
            Command::Play { .. } => op::PLAY,
            Command::Stop { .. } => op::STOP,
            Command::Leave { .. } => op::LEAVE,
            Command::Seek { .. } => op::SEEK,
            Command::Volume { .. } => op::VOLUME,
            Command::Pause { .. } => op::PAUSE,
            Command::VoiceStateUpdate { .. } => op::VOICE_STATE_UPDATE,
            Command::VoiceServerUpdate { .. } => op::VOICE_SERVER_UPDATE,
        }
    }

    /// Guild the command targets
    pub fn guild_id(&self) -> &str {
        match self {
            Command::Join { guild_id, .. }
            | Command::Play { guild_id, .. }
            | Command::Stop { guild_id, .. }
            | Command::Leave { guild_id, .. }
            | Command::Seek { guild_id, .. }
            | Command::Volume { guild_id, .. }
            | Command::Pause { guild_id, .. }
            | Command::VoiceStateUpdate { guild_id, .. }
            | Command::VoiceServerUpdate { guild_id, .. } => guild_id,
        }
    }

    /// Convert into a generic frame
    pub fn to_frame(&self) -> Result<Frame> {
        let value = serde_json::to_value(self).map_err(|e| Error::Encode(e.to_string()))?;
        serde_json::from_value(value).map_err(|e| Error::Encode(e.to_string()))
    }

    /// Parse a command back out of a frame (used by node-side tooling)
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let value = serde_json::to_value(frame).map_err(|e| Error::Decode(e.to_string()))?;
        serde_json::from_value(value).map_err(|e| Error::Decode(e.to_string()))
    }
}
