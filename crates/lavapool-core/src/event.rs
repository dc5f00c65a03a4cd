//! Inbound frames (node -> client)

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::{op, ChannelId, GuildId};

/// Acknowledgement kinds a session can wait on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    TrackInfo,
    TrackEnd,
}

impl EventKind {
    pub fn op(&self) -> &'static str {
        match self {
            EventKind::Connected => op::CONNECTED,
            EventKind::Disconnected => op::DISCONNECTED,
            EventKind::TrackInfo => op::TRACK_INFO,
            EventKind::TrackEnd => op::TRACK_END,
        }
    }
}

/// Load snapshot reported by a node's `stats` frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadStats {
    pub cores: u32,
    pub load: f64,
}

impl LoadStats {
    /// Build a snapshot, clamping to `cores >= 1` and `load >= 0`
    pub fn new(cores: u32, load: f64) -> Self {
        let load = if load.is_finite() && load > 0.0 { load } else { 0.0 };
        Self {
            cores: cores.max(1),
            load,
        }
    }

    /// Selection score: `100 * load / cores`, lower is better
    pub fn score(&self) -> f64 {
        100.0 * (self.load / f64::from(self.cores.max(1)))
    }
}

impl Default for LoadStats {
    fn default() -> Self {
        Self::new(1, 0.0)
    }
}

/// An event addressed to one guild's session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionFrame {
    Connected,
    Disconnected,
    TrackInfo(Value),
    TrackEnd,
    /// Any other op carrying guild and channel ids
    Unknown(String),
}

impl SessionFrame {
    pub fn from_frame(frame: &Frame) -> Self {
        match frame.op.as_str() {
            op::CONNECTED => SessionFrame::Connected,
            op::DISCONNECTED => SessionFrame::Disconnected,
            op::TRACK_INFO => {
                SessionFrame::TrackInfo(frame.d.get("info").cloned().unwrap_or(Value::Null))
            }
            op::TRACK_END => SessionFrame::TrackEnd,
            other => SessionFrame::Unknown(other.to_string()),
        }
    }

    /// The acknowledgement this event satisfies
    pub fn kind(&self) -> Option<EventKind> {
        match self {
            SessionFrame::Connected => Some(EventKind::Connected),
            SessionFrame::Disconnected => Some(EventKind::Disconnected),
            SessionFrame::TrackInfo(_) => Some(EventKind::TrackInfo),
            SessionFrame::TrackEnd => Some(EventKind::TrackEnd),
            SessionFrame::Unknown(_) => None,
        }
    }
}

/// Connection-level control traffic
#[derive(Debug, Clone, PartialEq)]
pub enum ControlFrame {
    /// Raw payload to hand to the application's voice gateway
    SendWs(Value),
    /// Replacement load snapshot
    Stats(LoadStats),
    Unknown(String),
}

impl ControlFrame {
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        match frame.op.as_str() {
            op::SEND_WS => {
                if frame.d.is_null() {
                    return Err(Error::MissingField("d"));
                }
                Ok(ControlFrame::SendWs(frame.d.clone()))
            }
            op::STATS => {
                let cores = frame
                    .d
                    .get("cores")
                    .ok_or(Error::MissingField("cores"))?
                    .as_u64()
                    .ok_or_else(|| Error::InvalidField {
                        field: "cores",
                        reason: "expected a non-negative integer".to_string(),
                    })?;
                let load = frame
                    .d
                    .get("load")
                    .ok_or(Error::MissingField("load"))?
                    .as_f64()
                    .ok_or_else(|| Error::InvalidField {
                        field: "load",
                        reason: "expected a number".to_string(),
                    })?;
                let cores = u32::try_from(cores).unwrap_or(u32::MAX);
                Ok(ControlFrame::Stats(LoadStats::new(cores, load)))
            }
            other => Ok(ControlFrame::Unknown(other.to_string())),
        }
    }
}

/// Result of demultiplexing an inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Session {
        guild_id: GuildId,
        channel_id: ChannelId,
        event: SessionFrame,
    },
    Control(ControlFrame),
}

impl Inbound {
    /// Route by payload shape: guild + channel ids mean session traffic.
    pub fn classify(frame: &Frame) -> Result<Self> {
        match frame.target() {
            Some((guild_id, channel_id)) => Ok(Inbound::Session {
                guild_id,
                channel_id,
                event: SessionFrame::from_frame(frame),
            }),
            None => ControlFrame::from_frame(frame).map(Inbound::Control),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_score() {
        assert_eq!(LoadStats::new(4, 2.0).score(), 50.0);
        assert_eq!(LoadStats::default().score(), 0.0);
    }

    #[test]
    fn test_stats_clamped() {
        let stats = LoadStats::new(0, -3.0);
        assert_eq!(stats.cores, 1);
        assert_eq!(stats.load, 0.0);
        assert_eq!(LoadStats::new(2, f64::NAN).load, 0.0);
    }

    #[test]
    fn test_classify_session_frame() {
        let frame = Frame::new(
            "trackInfo",
            json!({ "guildId": "1", "channelId": "2", "info": { "url": "x" } }),
        );
        match Inbound::classify(&frame).unwrap() {
            Inbound::Session {
                guild_id, event, ..
            } => {
                assert_eq!(guild_id, "1");
                assert_eq!(event, SessionFrame::TrackInfo(json!({ "url": "x" })));
                assert_eq!(event.kind(), Some(EventKind::TrackInfo));
            }
            other => panic!("Expected session frame, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_stats() {
        let frame = Frame::new("stats", json!({ "cores": 8, "load": 1.5 }));
        assert_eq!(
            Inbound::classify(&frame).unwrap(),
            Inbound::Control(ControlFrame::Stats(LoadStats::new(8, 1.5)))
        );
    }

    #[test]
    fn test_classify_malformed_stats() {
        let frame = Frame::new("stats", json!({ "cores": "many" }));
        assert!(Inbound::classify(&frame).is_err());
        let frame = Frame::new("stats", json!({ "cores": 2 }));
        assert_eq!(
            Inbound::classify(&frame).unwrap_err(),
            Error::MissingField("load")
        );
    }

    #[test]
    fn test_send_ws_passes_payload_through() {
        let payload = json!({ "op": 4, "d": { "guild_id": "1", "channel_id": null } });
        let frame = Frame::new("sendWS", payload.clone());
        assert_eq!(
            ControlFrame::from_frame(&frame).unwrap(),
            ControlFrame::SendWs(payload)
        );
    }

    #[test]
    fn test_unknown_session_op() {
        let frame = Frame::new("playerUpdate", json!({ "guildId": "1", "channelId": "2" }));
        let event = SessionFrame::from_frame(&frame);
        assert_eq!(event, SessionFrame::Unknown("playerUpdate".to_string()));
        assert_eq!(event.kind(), None);
    }
}
