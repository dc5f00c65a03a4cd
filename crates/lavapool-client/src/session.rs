//! Per-guild playback session
//!
//! A session is a small request/response state machine layered over the
//! node's command/event protocol:
//!
//! ```text
//! Idle --connect--> Connecting --connected--> Connected <--> Playing / Stopped
//!                                                  |
//!                          leave / disconnected / timeout / connection lost
//!                                                  v
//!                                            Disconnected (terminal)
//! ```
//!
//! Acknowledged commands (`connect`, `play`, `stop`, `leave`) hold the
//! session's command lock until the matching event arrives or the command
//! times out, so two overlapping calls can never resolve each other's
//! futures. `seek`, `volume` and `pause` are sent without waiting.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use crate::config::NodeId;
use crate::error::{ClientError, Result};
use crate::node::NodeLink;
use lavapool_core::{ChannelId, Command, EventKind, Frame, GuildId, SessionFrame, UserId};

/// Capacity of each session's event broadcast
const EVENT_CAPACITY: usize = 32;

/// A voice channel to join
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceChannel {
    pub id: ChannelId,
    pub guild_id: GuildId,
    /// The guild's declared voice region, e.g. `vip-us-east`
    pub region: Option<String>,
}

impl VoiceChannel {
    pub fn new(guild_id: &str, id: &str) -> Self {
        Self {
            id: id.to_string(),
            guild_id: guild_id.to_string(),
            region: None,
        }
    }

    pub fn with_region(mut self, region: &str) -> Self {
        self.region = Some(region.to_string());
        self
    }
}

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Playing,
    Stopped,
    Disconnected,
}

impl SessionState {
    /// Joined and able to take playback commands
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Connected | SessionState::Playing | SessionState::Stopped
        )
    }
}

/// Notifications for the application
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected,
    TrackStarted(Value),
    TrackEnded,
    Disconnected,
}

type Ack = oneshot::Sender<Result<Value>>;
pub(crate) type TerminalHook = Box<dyn FnOnce(&Session) + Send>;

struct Inner {
    state: SessionState,
    ready: bool,
    now_playing: Option<Value>,
    destroyed: bool,
    pending: HashMap<EventKind, Ack>,
    hooks: Vec<TerminalHook>,
}

impl Inner {
    fn check(&self, op: &'static str, allowed: fn(SessionState) -> bool) -> Result<SessionState> {
        if self.destroyed || self.state == SessionState::Disconnected {
            return Err(ClientError::SessionDestroyed);
        }
        if !allowed(self.state) {
            return Err(ClientError::InvalidState {
                op,
                state: self.state,
            });
        }
        Ok(self.state)
    }
}

/// Playback handle for one guild
pub struct Session {
    guild_id: GuildId,
    channel_id: ChannelId,
    user_id: UserId,
    link: NodeLink,
    command_timeout: Duration,
    inner: Mutex<Inner>,
    commands: tokio::sync::Mutex<()>,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    pub(crate) fn new(
        channel: &VoiceChannel,
        user_id: &str,
        link: NodeLink,
        command_timeout: Duration,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            guild_id: channel.guild_id.clone(),
            channel_id: channel.id.clone(),
            user_id: user_id.to_string(),
            link,
            command_timeout,
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                ready: false,
                now_playing: None,
                destroyed: false,
                pending: HashMap::new(),
                hooks: Vec::new(),
            }),
            commands: tokio::sync::Mutex::new(()),
            events,
        })
    }

    pub fn guild_id(&self) -> &str {
        &self.guild_id
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Node this session was placed on
    pub fn node_id(&self) -> &NodeId {
        self.link.node_id()
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// True between the `connected` event and disconnection
    pub fn is_ready(&self) -> bool {
        self.inner.lock().ready
    }

    /// Track info reported by the last `trackInfo`, cleared on `trackEnd`
    pub fn now_playing(&self) -> Option<Value> {
        self.inner.lock().now_playing.clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.lock().destroyed
    }

    /// Destroyed, or told by the node that it left the channel
    pub fn is_closed(&self) -> bool {
        let inner = self.inner.lock();
        inner.destroyed || inner.state == SessionState::Disconnected
    }

    /// Subscribe to session notifications
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Run `hook` once when the session is destroyed (immediately if it
    /// already is).
    pub(crate) fn on_terminal(&self, hook: TerminalHook) {
        {
            let mut inner = self.inner.lock();
            if !inner.destroyed {
                inner.hooks.push(hook);
                return;
            }
        }
        hook(self);
    }

    /// Send `join` and wait for the node's `connected` event
    pub async fn connect(&self) -> Result<()> {
        let _guard = self.commands.lock().await;
        let command = Command::Join {
            channel_id: self.channel_id.clone(),
            guild_id: self.guild_id.clone(),
            user_id: self.user_id.clone(),
        };
        self.exchange(
            command,
            EventKind::Connected,
            |s| s == SessionState::Idle,
            Some(SessionState::Connecting),
        )
        .await?;
        info!("Session for guild {} connected on {}", self.guild_id, self.node_id());
        Ok(())
    }

    /// Start `track`; resolves with the node's track info
    pub async fn play(&self, track: Value) -> Result<Value> {
        let _guard = self.commands.lock().await;
        let command = Command::Play {
            track,
            guild_id: self.guild_id.clone(),
            channel_id: self.channel_id.clone(),
        };
        self.exchange(command, EventKind::TrackInfo, |s| s.is_active(), None)
            .await
    }

    /// Stop playback.
    ///
    /// Waits for `trackEnd` when a track is playing; otherwise the node has
    /// nothing to end and the command is only sent.
    pub async fn stop(&self) -> Result<()> {
        let _guard = self.commands.lock().await;
        let command = Command::Stop {
            guild_id: self.guild_id.clone(),
            channel_id: self.channel_id.clone(),
        };

        // Whether to wait is decided under the same lock that registers the
        // wait, so a `trackEnd` arriving first cannot leave a dangling entry
        let pending = self.register(
            "stop",
            EventKind::TrackEnd,
            |s| s.is_active(),
            None,
            |s| s == SessionState::Playing,
        )?;

        match pending {
            Some(rx) => self.send_and_wait(&command, EventKind::TrackEnd, rx).await.map(|_| ()),
            None => self.send(&command).await,
        }
    }

    /// Leave the voice channel and destroy the session once the node
    /// confirms with `disconnected`
    pub async fn leave(&self) -> Result<()> {
        let _guard = self.commands.lock().await;
        let command = Command::Leave {
            guild_id: self.guild_id.clone(),
            channel_id: self.channel_id.clone(),
        };
        self.exchange(
            command,
            EventKind::Disconnected,
            |s| s == SessionState::Connecting || s.is_active(),
            None,
        )
        .await?;
        self.destroy();
        Ok(())
    }

    /// Seek to `position` milliseconds
    pub async fn seek(&self, position: u64) -> Result<()> {
        self.fire(Command::Seek {
            position,
            guild_id: self.guild_id.clone(),
            channel_id: self.channel_id.clone(),
        })
        .await
    }

    pub async fn volume(&self, volume: u16) -> Result<()> {
        self.fire(Command::Volume {
            volume,
            guild_id: self.guild_id.clone(),
            channel_id: self.channel_id.clone(),
        })
        .await
    }

    /// Pause (`Some(true)`), resume (`Some(false)`) or toggle (`None`)
    pub async fn pause(&self, pause: Option<bool>) -> Result<()> {
        self.fire(Command::Pause {
            pause,
            guild_id: self.guild_id.clone(),
            channel_id: self.channel_id.clone(),
        })
        .await
    }

    /// Forward the gateway's voice state session id to the node
    pub async fn voice_state_update(&self, session_id: &str) -> Result<()> {
        self.forward(Command::VoiceStateUpdate {
            guild_id: self.guild_id.clone(),
            channel_id: self.channel_id.clone(),
            session_id: session_id.to_string(),
        })
        .await
    }

    /// Forward the gateway's voice server endpoint and token to the node
    pub async fn voice_server_update(&self, endpoint: &str, token: &str) -> Result<()> {
        self.forward(Command::VoiceServerUpdate {
            guild_id: self.guild_id.clone(),
            channel_id: self.channel_id.clone(),
            endpoint: endpoint.to_string(),
            server_guild_id: self.guild_id.clone(),
            token: token.to_string(),
        })
        .await
    }

    /// Apply an inbound frame addressed to this guild
    pub fn on_message(&self, frame: &Frame) {
        let event = SessionFrame::from_frame(frame);

        let (ack, rejected, notify) = {
            let mut inner = self.inner.lock();
            if inner.destroyed || inner.state == SessionState::Disconnected {
                debug!("Ignoring {} for closed session {}", frame.op, self.guild_id);
                return;
            }

            let notify = match &event {
                SessionFrame::Connected => {
                    if matches!(inner.state, SessionState::Idle | SessionState::Connecting) {
                        inner.state = SessionState::Connected;
                    }
                    inner.ready = true;
                    Some(SessionEvent::Connected)
                }
                SessionFrame::TrackInfo(info) if inner.state.is_active() => {
                    inner.now_playing = Some(info.clone());
                    inner.state = SessionState::Playing;
                    Some(SessionEvent::TrackStarted(info.clone()))
                }
                SessionFrame::TrackEnd if inner.state.is_active() => {
                    inner.now_playing = None;
                    if inner.state == SessionState::Playing {
                        inner.state = SessionState::Stopped;
                    }
                    Some(SessionEvent::TrackEnded)
                }
                SessionFrame::Disconnected => {
                    inner.state = SessionState::Disconnected;
                    inner.ready = false;
                    inner.now_playing = None;
                    Some(SessionEvent::Disconnected)
                }
                SessionFrame::TrackInfo(_) | SessionFrame::TrackEnd => {
                    debug!(
                        "Ignoring {} for guild {} while {:?}",
                        frame.op, self.guild_id, inner.state
                    );
                    return;
                }
                SessionFrame::Unknown(op) => {
                    debug!("Unhandled op {} for guild {}", op, self.guild_id);
                    None
                }
            };

            let ack = event.kind().and_then(|kind| inner.pending.remove(&kind));
            let rejected: Vec<Ack> = if event == SessionFrame::Disconnected {
                inner.pending.drain().map(|(_, tx)| tx).collect()
            } else {
                Vec::new()
            };
            (ack, rejected, notify)
        };

        if let Some(tx) = ack {
            let payload = match event {
                SessionFrame::TrackInfo(info) => info,
                _ => frame.d.clone(),
            };
            let _ = tx.send(Ok(payload));
        }
        for tx in rejected {
            let _ = tx.send(Err(ClientError::SessionDestroyed));
        }
        if let Some(notify) = notify {
            let _ = self.events.send(notify);
        }
    }

    /// Tear the session down. Idempotent.
    ///
    /// Pending command futures are rejected with
    /// [`ClientError::SessionDestroyed`] before state is cleared.
    pub fn destroy(&self) {
        self.destroy_with(|| ClientError::SessionDestroyed);
    }

    /// Tear down, rejecting pending futures with `reason()`
    pub(crate) fn destroy_with<F>(&self, reason: F)
    where
        F: Fn() -> ClientError,
    {
        let (pending, hooks, was_live) = {
            let mut inner = self.inner.lock();
            if inner.destroyed {
                return;
            }
            inner.destroyed = true;
            inner.ready = false;
            inner.now_playing = None;
            let was_live = inner.state != SessionState::Disconnected;
            inner.state = SessionState::Disconnected;
            (
                std::mem::take(&mut inner.pending),
                std::mem::take(&mut inner.hooks),
                was_live,
            )
        };

        for (_, tx) in pending {
            let _ = tx.send(Err(reason()));
        }
        if was_live {
            let _ = self.events.send(SessionEvent::Disconnected);
        }
        for hook in hooks {
            hook(self);
        }

        debug!("Session for guild {} destroyed", self.guild_id);
    }

    /// Send `command` and wait for `expect`. Callers hold the command lock.
    async fn exchange(
        &self,
        command: Command,
        expect: EventKind,
        allowed: fn(SessionState) -> bool,
        entering: Option<SessionState>,
    ) -> Result<Value> {
        match self.register(command.op(), expect, allowed, entering, |_| true)? {
            Some(rx) => self.send_and_wait(&command, expect, rx).await,
            None => Err(ClientError::SessionDestroyed),
        }
    }

    /// Check the state and, if `wait(state)` holds, register a pending
    /// acknowledgement for `expect`. Both happen in one critical section.
    fn register(
        &self,
        op: &'static str,
        expect: EventKind,
        allowed: fn(SessionState) -> bool,
        entering: Option<SessionState>,
        wait: fn(SessionState) -> bool,
    ) -> Result<Option<oneshot::Receiver<Result<Value>>>> {
        let mut inner = self.inner.lock();
        let state = inner.check(op, allowed)?;
        if !wait(state) {
            return Ok(None);
        }
        let (tx, rx) = oneshot::channel();
        inner.pending.insert(expect, tx);
        if let Some(state) = entering {
            inner.state = state;
        }
        Ok(Some(rx))
    }

    async fn send_and_wait(
        &self,
        command: &Command,
        expect: EventKind,
        rx: oneshot::Receiver<Result<Value>>,
    ) -> Result<Value> {
        let op = command.op();
        if let Err(e) = self.send(command).await {
            self.inner.lock().pending.remove(&expect);
            return Err(e);
        }

        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::SessionDestroyed),
            Err(_) => {
                let after = self.command_timeout;
                warn!(
                    "{} for guild {} not acknowledged within {:?}, dropping session",
                    op, self.guild_id, after
                );
                self.destroy_with(|| ClientError::CommandTimeout { op, after });
                Err(ClientError::CommandTimeout { op, after })
            }
        }
    }

    /// Playback command with no acknowledgement
    async fn fire(&self, command: Command) -> Result<()> {
        self.inner.lock().check(command.op(), |s| s.is_active())?;
        self.send(&command).await
    }

    /// Voice updates flow while the join handshake is still pending
    async fn forward(&self, command: Command) -> Result<()> {
        self.inner.lock().check(command.op(), |_| true)?;
        self.send(&command).await
    }

    async fn send(&self, command: &Command) -> Result<()> {
        let frame = command.to_frame()?;
        self.link.send(&frame).await
    }
}

#[cfg(test)]
impl Session {
    pub(crate) fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Session")
            .field("guild_id", &self.guild_id)
            .field("channel_id", &self.channel_id)
            .field("node_id", self.link.node_id())
            .field("state", &inner.state)
            .field("ready", &inner.ready)
            .field("destroyed", &inner.destroyed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeLink;
    use async_trait::async_trait;
    use lavapool_transport::{TransportError, TransportSender};
    use serde_json::json;
    use tokio::sync::mpsc;

    struct RecordingSender {
        tx: mpsc::UnboundedSender<Frame>,
    }

    #[async_trait]
    impl TransportSender for RecordingSender {
        async fn send(&self, frame: String) -> lavapool_transport::Result<()> {
            let frame = Frame::decode(&frame).map_err(|e| TransportError::Other(e.to_string()))?;
            self.tx
                .send(frame)
                .map_err(|e| TransportError::SendFailed(e.to_string()))
        }

        fn is_connected(&self) -> bool {
            true
        }

        async fn close(&self) -> lavapool_transport::Result<()> {
            Ok(())
        }
    }

    fn session_with_timeout(timeout: Duration) -> (Arc<Session>, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let link = NodeLink::new("node-a:2333".to_string());
        link.attach(Arc::new(RecordingSender { tx }));
        let channel = VoiceChannel::new("g1", "c1");
        (Session::new(&channel, "u1", link, timeout), rx)
    }

    fn session() -> (Arc<Session>, mpsc::UnboundedReceiver<Frame>) {
        session_with_timeout(Duration::from_secs(5))
    }

    fn event(op: &str) -> Frame {
        Frame::new(op, json!({ "guildId": "g1", "channelId": "c1" }))
    }

    /// Wait for the next outbound frame and check its op
    async fn expect_sent(rx: &mut mpsc::UnboundedReceiver<Frame>, op: &str) -> Frame {
        let frame = rx.recv().await.expect("no frame sent");
        assert_eq!(frame.op, op);
        frame
    }

    async fn connected_session() -> (Arc<Session>, mpsc::UnboundedReceiver<Frame>) {
        let (session, mut rx) = session();
        let task = tokio::spawn({
            let session = session.clone();
            async move { session.connect().await }
        });
        expect_sent(&mut rx, "join").await;
        session.on_message(&event("connected"));
        task.await.unwrap().unwrap();
        (session, rx)
    }

    #[tokio::test]
    async fn test_connect_handshake() {
        let (session, mut rx) = session();
        assert_eq!(session.state(), SessionState::Idle);
        let mut events = session.subscribe();

        let task = tokio::spawn({
            let session = session.clone();
            async move { session.connect().await }
        });

        let join = expect_sent(&mut rx, "join").await;
        assert_eq!(join.d, json!({ "channelId": "c1", "guildId": "g1", "userId": "u1" }));
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(!session.is_ready());

        session.on_message(&event("connected"));
        task.await.unwrap().unwrap();

        assert_eq!(session.state(), SessionState::Connected);
        assert!(session.is_ready());
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Connected);
    }

    #[tokio::test]
    async fn test_connect_twice_is_invalid() {
        let (session, _rx) = connected_session().await;
        let err = session.connect().await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::InvalidState { op: "join", state: SessionState::Connected }
        ));
    }

    #[tokio::test]
    async fn test_play_resolves_with_track_info() {
        let (session, mut rx) = connected_session().await;
        let mut events = session.subscribe();

        let task = tokio::spawn({
            let session = session.clone();
            async move { session.play(json!({ "url": "x" })).await }
        });

        let play = expect_sent(&mut rx, "play").await;
        assert_eq!(play.d["track"], json!({ "url": "x" }));

        session.on_message(&Frame::new(
            "trackInfo",
            json!({ "guildId": "g1", "channelId": "c1", "info": { "url": "x" } }),
        ));

        let info = task.await.unwrap().unwrap();
        assert_eq!(info, json!({ "url": "x" }));
        assert_eq!(session.now_playing(), Some(json!({ "url": "x" })));
        assert_eq!(session.state(), SessionState::Playing);
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::TrackStarted(json!({ "url": "x" }))
        );
    }

    #[tokio::test]
    async fn test_play_before_connect_is_invalid() {
        let (session, _rx) = session();
        let err = session.play(json!({ "url": "x" })).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidState { op: "play", .. }));
    }

    #[tokio::test]
    async fn test_track_end_resolves_pending_stop() {
        let (session, mut rx) = connected_session().await;
        session.on_message(&Frame::new(
            "trackInfo",
            json!({ "guildId": "g1", "channelId": "c1", "info": { "url": "x" } }),
        ));
        assert_eq!(session.state(), SessionState::Playing);

        let task = tokio::spawn({
            let session = session.clone();
            async move { session.stop().await }
        });
        expect_sent(&mut rx, "stop").await;

        session.on_message(&event("trackEnd"));
        task.await.unwrap().unwrap();

        assert_eq!(session.now_playing(), None);
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_when_idle_does_not_wait() {
        let (session, mut rx) = connected_session().await;
        session.stop().await.unwrap();
        expect_sent(&mut rx, "stop").await;
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn test_stop_after_natural_track_end_registers_no_wait() {
        let (session, mut rx) = session_with_timeout(Duration::from_millis(50));
        let task = tokio::spawn({
            let session = session.clone();
            async move { session.connect().await }
        });
        expect_sent(&mut rx, "join").await;
        session.on_message(&event("connected"));
        task.await.unwrap().unwrap();

        session.on_message(&Frame::new(
            "trackInfo",
            json!({ "guildId": "g1", "channelId": "c1", "info": { "url": "x" } }),
        ));
        session.on_message(&event("trackEnd"));

        // Nothing to end: stop is sent without waiting for a trackEnd
        session.stop().await.unwrap();
        expect_sent(&mut rx, "stop").await;
        assert_eq!(session.pending_count(), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!session.is_destroyed());
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn test_is_closed_after_node_disconnect() {
        let (session, _rx) = connected_session().await;
        assert!(!session.is_closed());
        session.on_message(&event("disconnected"));
        assert!(session.is_closed());
        assert!(!session.is_destroyed());
    }

    #[tokio::test]
    async fn test_unsolicited_track_end_clears_now_playing() {
        let (session, _rx) = connected_session().await;
        session.on_message(&Frame::new(
            "trackInfo",
            json!({ "guildId": "g1", "channelId": "c1", "info": { "url": "x" } }),
        ));
        session.on_message(&event("trackEnd"));
        assert_eq!(session.now_playing(), None);
        assert_eq!(session.state(), SessionState::Stopped);

        // Stopped -> Playing again
        session.on_message(&Frame::new(
            "trackInfo",
            json!({ "guildId": "g1", "channelId": "c1", "info": { "url": "y" } }),
        ));
        assert_eq!(session.state(), SessionState::Playing);
    }

    #[tokio::test]
    async fn test_fire_and_forget_commands() {
        let (session, mut rx) = connected_session().await;

        session.seek(1500).await.unwrap();
        assert_eq!(expect_sent(&mut rx, "seek").await.d["position"], 1500);

        session.volume(70).await.unwrap();
        assert_eq!(expect_sent(&mut rx, "volume").await.d["volume"], 70);

        session.pause(Some(true)).await.unwrap();
        assert_eq!(expect_sent(&mut rx, "pause").await.d["pause"], true);

        session.pause(None).await.unwrap();
        assert!(expect_sent(&mut rx, "pause").await.d.get("pause").is_none());

        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn test_voice_updates_allowed_during_handshake() {
        let (session, mut rx) = session();
        let task = tokio::spawn({
            let session = session.clone();
            async move { session.connect().await }
        });
        expect_sent(&mut rx, "join").await;

        session.voice_state_update("sess").await.unwrap();
        let frame = expect_sent(&mut rx, "voiceStateUpdate").await;
        assert_eq!(frame.d["session_id"], "sess");

        session.voice_server_update("host:443", "tok").await.unwrap();
        let frame = expect_sent(&mut rx, "voiceServerUpdate").await;
        assert_eq!(frame.d["guild_id"], "g1");
        assert_eq!(frame.d["token"], "tok");

        session.on_message(&event("connected"));
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_leave_destroys_after_ack() {
        let (session, mut rx) = connected_session().await;
        let task = tokio::spawn({
            let session = session.clone();
            async move { session.leave().await }
        });
        expect_sent(&mut rx, "leave").await;

        session.on_message(&event("disconnected"));
        task.await.unwrap().unwrap();

        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.is_ready());
        assert!(session.is_destroyed());
    }

    #[tokio::test]
    async fn test_node_initiated_disconnect() {
        let (session, _rx) = connected_session().await;
        let mut events = session.subscribe();

        session.on_message(&event("disconnected"));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.is_ready());
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Disconnected);

        // Terminal: later frames are ignored
        session.on_message(&event("connected"));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.is_ready());
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent_and_runs_hooks_once() {
        let (session, _rx) = connected_session().await;
        let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = calls.clone();
        session.on_terminal(Box::new(move |_| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }));

        session.destroy();
        session.destroy();

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(session.is_destroyed());
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.now_playing(), None);
        assert!(matches!(session.seek(1).await, Err(ClientError::SessionDestroyed)));
        assert!(matches!(
            session.play(json!({})).await,
            Err(ClientError::SessionDestroyed)
        ));
    }

    #[tokio::test]
    async fn test_hook_added_after_destroy_runs_immediately() {
        let (session, _rx) = session();
        session.destroy();
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = ran.clone();
        session.on_terminal(Box::new(move |_| flag.store(true, std::sync::atomic::Ordering::SeqCst)));
        assert!(ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_destroy_rejects_pending_command() {
        let (session, mut rx) = connected_session().await;
        let task = tokio::spawn({
            let session = session.clone();
            async move { session.play(json!({ "url": "x" })).await }
        });
        expect_sent(&mut rx, "play").await;

        session.destroy();
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::SessionDestroyed));
    }

    #[tokio::test]
    async fn test_command_timeout_tears_down() {
        let (session, mut rx) = session_with_timeout(Duration::from_millis(50));
        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, ClientError::CommandTimeout { op: "join", .. }));
        expect_sent(&mut rx, "join").await;
        assert!(session.is_destroyed());
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_overlapping_plays_are_serialized() {
        let (session, mut rx) = connected_session().await;

        let first = tokio::spawn({
            let session = session.clone();
            async move { session.play(json!({ "url": "a" })).await }
        });
        assert_eq!(expect_sent(&mut rx, "play").await.d["track"]["url"], "a");

        let second = tokio::spawn({
            let session = session.clone();
            async move { session.play(json!({ "url": "b" })).await }
        });

        // The second play is queued behind the first acknowledgement
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());

        session.on_message(&Frame::new(
            "trackInfo",
            json!({ "guildId": "g1", "channelId": "c1", "info": { "url": "a" } }),
        ));
        assert_eq!(first.await.unwrap().unwrap()["url"], "a");

        assert_eq!(expect_sent(&mut rx, "play").await.d["track"]["url"], "b");
        session.on_message(&Frame::new(
            "trackInfo",
            json!({ "guildId": "g1", "channelId": "c1", "info": { "url": "b" } }),
        ));
        assert_eq!(second.await.unwrap().unwrap()["url"], "b");
    }

    #[tokio::test]
    async fn test_send_without_connection_fails() {
        let link = NodeLink::new("node-b:2333".to_string());
        let session = Session::new(&VoiceChannel::new("g2", "c2"), "u1", link, Duration::from_secs(1));
        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
    }
}
