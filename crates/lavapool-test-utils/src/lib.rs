//! Common test helpers and utilities for lavapool tests
//!
//! This crate provides:
//! - Condition-based waiting (no hardcoded sleeps)
//! - A mock audio node that speaks the node protocol over a real
//!   localhost WebSocket, with RAII cleanup

use lavapool_core::{op, Frame};
use lavapool_transport::{
    TransportEvent, TransportReceiver, TransportSender, WebSocketReceiver, WebSocketSender,
    WebSocketServer,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Port Allocation
// ============================================================================

/// Find an available TCP port for testing
pub async fn find_available_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F, Fut>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Poll a synchronous condition until it holds
pub async fn wait_until<F>(check: F, max_wait: Duration) -> bool
where
    F: Fn() -> bool,
{
    wait_for(|| std::future::ready(check()), DEFAULT_CHECK_INTERVAL, max_wait).await
}

// ============================================================================
// Mock Node - RAII wrapper with proper cleanup
// ============================================================================

#[derive(Default)]
struct MockState {
    received: Mutex<Vec<Frame>>,
    handshakes: Mutex<Vec<HashMap<String, String>>>,
    connections: Mutex<Vec<Arc<WebSocketSender>>>,
    auto_ack: AtomicBool,
    stats: Mutex<Option<(u32, f64)>>,
}

impl MockState {
    /// Reply the way a real node acknowledges each command
    fn ack_for(frame: &Frame) -> Option<Frame> {
        let target = json!({
            "guildId": frame.d.get("guildId").cloned().unwrap_or(Value::Null),
            "channelId": frame.d.get("channelId").cloned().unwrap_or(Value::Null),
        });
        let with = |name: &str, extra: Option<(&str, Value)>| {
            let mut d = target.clone();
            if let (Some((key, value)), Some(map)) = (extra, d.as_object_mut()) {
                map.insert(key.to_string(), value);
            }
            Frame::new(name, d)
        };

        match frame.op.as_str() {
            op::JOIN => Some(with(op::CONNECTED, None)),
            op::PLAY => Some(with(
                op::TRACK_INFO,
                Some(("info", frame.d.get("track").cloned().unwrap_or(Value::Null))),
            )),
            op::STOP => Some(with(op::TRACK_END, None)),
            op::LEAVE => Some(with(op::DISCONNECTED, None)),
            _ => None,
        }
    }
}

/// An in-process audio node that stops on drop.
///
/// With auto-ack enabled (the default) it answers `join` with `connected`,
/// `play` with `trackInfo` echoing the track, `stop` with `trackEnd` and
/// `leave` with `disconnected`. Everything received is recorded.
pub struct MockNode {
    port: u16,
    state: Arc<MockState>,
    handle: Option<JoinHandle<()>>,
}

impl MockNode {
    /// Start on a free localhost port
    pub async fn start() -> Self {
        let port = find_available_port().await;
        Self::start_on(port).await
    }

    /// Start on `port`, e.g. to bring a stopped node back
    pub async fn start_on(port: u16) -> Self {
        let state = Arc::new(MockState::default());
        state.auto_ack.store(true, Ordering::SeqCst);

        let mut server = WebSocketServer::bind(&format!("127.0.0.1:{}", port))
            .await
            .unwrap();

        let accept_state = state.clone();
        let handle = tokio::spawn(async move {
            loop {
                let (sender, receiver, addr, headers) = match server.accept_with_headers().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        debug!("Mock node accept failed: {}", e);
                        continue;
                    }
                };
                debug!("Mock node accepted {}", addr);

                let sender = Arc::new(sender);
                accept_state.handshakes.lock().push(headers);
                accept_state.connections.lock().push(sender.clone());

                let stats = *accept_state.stats.lock();
                if let Some((cores, load)) = stats {
                    let frame = Frame::new(op::STATS, json!({ "cores": cores, "load": load }));
                    let _ = sender.send(frame.encode().unwrap()).await;
                }

                tokio::spawn(serve_connection(accept_state.clone(), sender, receiver));
            }
        });

        Self {
            port,
            state,
            handle: Some(handle),
        }
    }

    /// Start and announce `stats` to every client on connect
    pub async fn start_with_stats(cores: u32, load: f64) -> Self {
        let node = Self::start().await;
        *node.state.stats.lock() = Some((cores, load));
        node
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host(&self) -> &'static str {
        "127.0.0.1"
    }

    pub fn url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port)
    }

    /// Turn automatic acknowledgements on or off
    pub fn set_auto_ack(&self, enabled: bool) {
        self.state.auto_ack.store(enabled, Ordering::SeqCst);
    }

    /// Frames received so far, oldest first
    pub fn received(&self) -> Vec<Frame> {
        self.state.received.lock().clone()
    }

    /// Received frames with the given op
    pub fn received_op(&self, op: &str) -> Vec<Frame> {
        self.state
            .received
            .lock()
            .iter()
            .filter(|f| f.op == op)
            .cloned()
            .collect()
    }

    /// Wait for the first frame with `op`
    pub async fn wait_for_op(&self, op: &str, max_wait: Duration) -> Option<Frame> {
        let found = wait_until(|| !self.received_op(op).is_empty(), max_wait).await;
        if found {
            self.received_op(op).into_iter().next()
        } else {
            None
        }
    }

    /// Handshake headers of each accepted connection (names lowercased)
    pub fn handshakes(&self) -> Vec<HashMap<String, String>> {
        self.state.handshakes.lock().clone()
    }

    /// Number of accepted connections over the node's lifetime
    pub fn accepted(&self) -> usize {
        self.state.handshakes.lock().len()
    }

    /// Currently open connections
    pub fn connection_count(&self) -> usize {
        self.state.connections.lock().len()
    }

    /// Wait until at least `n` clients are connected
    pub async fn wait_for_connections(&self, n: usize, max_wait: Duration) -> bool {
        wait_until(|| self.connection_count() >= n, max_wait).await
    }

    /// Send a frame to every connected client
    pub async fn push(&self, op: &str, d: Value) {
        let text = Frame::new(op, d).encode().unwrap();
        let senders: Vec<_> = self.state.connections.lock().clone();
        for sender in senders {
            let _ = sender.send(text.clone()).await;
        }
    }

    /// Push a `stats` frame to every connected client
    pub async fn send_stats(&self, cores: u32, load: f64) {
        self.push(op::STATS, json!({ "cores": cores, "load": load }))
            .await;
    }

    /// Close every open connection. The listener keeps accepting.
    pub async fn drop_connections(&self) {
        let senders: Vec<_> = self.state.connections.lock().drain(..).collect();
        for sender in senders {
            let _ = sender.close().await;
        }
    }

    /// Stop accepting and close all connections (also happens on drop)
    pub async fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
        self.drop_connections().await;
    }
}

impl Drop for MockNode {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        let senders: Vec<_> = self.state.connections.lock().drain(..).collect();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            for sender in senders {
                runtime.spawn(async move {
                    let _ = sender.close().await;
                });
            }
        }
    }
}

async fn serve_connection(
    state: Arc<MockState>,
    sender: Arc<WebSocketSender>,
    mut receiver: WebSocketReceiver,
) {
    while let Some(event) = receiver.recv().await {
        match event {
            TransportEvent::Frame(raw) => {
                let Ok(frame) = Frame::decode(&raw) else {
                    debug!("Mock node ignoring undecodable frame: {}", raw);
                    continue;
                };
                let reply = if state.auto_ack.load(Ordering::SeqCst) {
                    MockState::ack_for(&frame)
                } else {
                    None
                };
                state.received.lock().push(frame);
                if let Some(reply) = reply {
                    let _ = sender.send(reply.encode().unwrap()).await;
                }
            }
            TransportEvent::Disconnected { .. } => break,
            _ => {}
        }
    }
    state
        .connections
        .lock()
        .retain(|open| !Arc::ptr_eq(open, &sender));
}
