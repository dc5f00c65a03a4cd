//! Opcode names used in the `op` field of a frame

// Client -> node
pub const JOIN: &str = "join";
pub const PLAY: &str = "play";
pub const STOP: &str = "stop";
pub const LEAVE: &str = "leave";
pub const SEEK: &str = "seek";
pub const VOLUME: &str = "volume";
pub const PAUSE: &str = "pause";
pub const VOICE_STATE_UPDATE: &str = "voiceStateUpdate";
pub const VOICE_SERVER_UPDATE: &str = "voiceServerUpdate";

// Node -> client, per guild
pub const CONNECTED: &str = "connected";
pub const DISCONNECTED: &str = "disconnected";
pub const TRACK_INFO: &str = "trackInfo";
pub const TRACK_END: &str = "trackEnd";

// Node -> client, connection level
pub const SEND_WS: &str = "sendWS";
pub const STATS: &str = "stats";
