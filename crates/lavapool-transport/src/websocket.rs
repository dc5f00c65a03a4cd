//! WebSocket transport implementation

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    accept_hdr_async, connect_async,
    tungstenite::{
        client::IntoClientRequest,
        handshake::server::{Request as HsRequest, Response as HsResponse},
        http::{HeaderName, HeaderValue},
        protocol::Message as WsMessage,
    },
    WebSocketStream,
};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::{Result, TransportError};
use crate::traits::{
    Transport, TransportEvent, TransportReceiver, TransportSender, TransportServer,
};

/// WebSocket configuration
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Extra handshake headers (authorization, client identity)
    pub headers: Vec<(String, String)>,
    /// Capacity of the internal send/receive queues
    pub channel_capacity: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            channel_capacity: 100,
        }
    }
}

impl WebSocketConfig {
    /// Add a handshake header
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// WebSocket transport
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport {
    config: WebSocketConfig,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: WebSocketConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }
}

/// WebSocket sender
pub struct WebSocketSender {
    tx: mpsc::Sender<WsMessage>,
    connected: Arc<Mutex<bool>>,
}

#[async_trait]
impl TransportSender for WebSocketSender {
    async fn send(&self, frame: String) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        self.tx
            .send(WsMessage::Text(frame))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    async fn close(&self) -> Result<()> {
        let _ = self.tx.send(WsMessage::Close(None)).await;
        *self.connected.lock() = false;
        Ok(())
    }
}

/// WebSocket receiver
pub struct WebSocketReceiver {
    rx: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for WebSocketReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    type Sender = WebSocketSender;
    type Receiver = WebSocketReceiver;

    async fn connect(&self, url: &str) -> Result<(Self::Sender, Self::Receiver)> {
        info!("Connecting to WebSocket: {}", url);

        let parsed = Url::parse(url)?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(TransportError::InvalidUrl(format!(
                "unsupported scheme: {}",
                parsed.scheme()
            )));
        }

        let mut request = parsed.as_str().into_client_request()?;
        for (name, value) in &self.config.headers {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| TransportError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            let header_value =
                HeaderValue::from_str(value).map_err(|e| TransportError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            request.headers_mut().insert(header_name, header_value);
        }

        let (ws_stream, response) = connect_async(request)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        debug!("WebSocket connected, response: {:?}", response.status());

        Ok(split_stream(ws_stream, self.config.channel_capacity))
    }
}

/// Bridge a WebSocket stream onto a writer task and a reader task.
fn split_stream<S>(ws_stream: WebSocketStream<S>, capacity: usize) -> (WebSocketSender, WebSocketReceiver)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (write, read) = ws_stream.split();

    let (send_tx, mut send_rx) = mpsc::channel::<WsMessage>(capacity);
    let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(capacity);

    let connected = Arc::new(Mutex::new(true));
    let connected_write = connected.clone();
    let connected_read = connected.clone();

    // Writer
    tokio::spawn(async move {
        let mut write = write;
        while let Some(msg) = send_rx.recv().await {
            let closing = matches!(msg, WsMessage::Close(_));
            if let Err(e) = write.send(msg).await {
                error!("WebSocket write error: {}", e);
                break;
            }
            if closing {
                break;
            }
        }
        *connected_write.lock() = false;
    });

    // Reader
    tokio::spawn(async move {
        let mut read = read;

        let _ = event_tx.send(TransportEvent::Connected).await;

        let mut reason = None;
        while let Some(result) = read.next().await {
            match result {
                Ok(WsMessage::Text(text)) => {
                    let _ = event_tx.send(TransportEvent::Frame(text)).await;
                }
                Ok(WsMessage::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => {
                        let _ = event_tx.send(TransportEvent::Frame(text)).await;
                    }
                    Err(_) => warn!("Dropping non-UTF-8 binary message"),
                },
                Ok(WsMessage::Ping(_)) => {
                    // Pong is handled automatically by tungstenite
                    debug!("Received ping");
                }
                Ok(WsMessage::Pong(_)) => {
                    debug!("Received pong");
                }
                Ok(WsMessage::Close(frame)) => {
                    reason = frame.map(|f| f.reason.to_string());
                    info!("WebSocket closed: {:?}", reason);
                    break;
                }
                Ok(WsMessage::Frame(_)) => {}
                Err(e) => {
                    error!("WebSocket read error: {}", e);
                    let _ = event_tx.send(TransportEvent::Error(e.to_string())).await;
                    reason = Some(e.to_string());
                    break;
                }
            }
        }

        *connected_read.lock() = false;
        let _ = event_tx.send(TransportEvent::Disconnected { reason }).await;
    });

    let sender = WebSocketSender {
        tx: send_tx,
        connected,
    };
    let receiver = WebSocketReceiver { rx: event_rx };

    (sender, receiver)
}

/// WebSocket server
pub struct WebSocketServer {
    listener: tokio::net::TcpListener,
    config: WebSocketConfig,
}

impl WebSocketServer {
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        info!("WebSocket server listening on {}", addr);

        Ok(Self {
            listener,
            config: WebSocketConfig::default(),
        })
    }

    pub fn with_config(mut self, config: WebSocketConfig) -> Self {
        self.config = config;
        self
    }

    /// Accept a connection and return the client's handshake headers
    /// (names lowercased) alongside it.
    pub async fn accept_with_headers(
        &mut self,
    ) -> Result<(WebSocketSender, WebSocketReceiver, SocketAddr, HashMap<String, String>)> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        debug!("Accepted TCP connection from {}", addr);

        let mut headers = HashMap::new();
        let ws_stream = accept_hdr_async(stream, |req: &HsRequest, response: HsResponse| {
            for (name, value) in req.headers() {
                if let Ok(value) = value.to_str() {
                    headers.insert(name.as_str().to_string(), value.to_string());
                }
            }
            Ok(response)
        })
        .await
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        info!("WebSocket client connected from {}", addr);

        let (sender, receiver) = split_stream(ws_stream, self.config.channel_capacity);
        Ok((sender, receiver, addr, headers))
    }
}

#[async_trait]
impl TransportServer for WebSocketServer {
    type Sender = WebSocketSender;
    type Receiver = WebSocketReceiver;

    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, SocketAddr)> {
        let (sender, receiver, addr, _) = self.accept_with_headers().await?;
        Ok((sender, receiver, addr))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(TransportError::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_config() {
        let config = WebSocketConfig::default()
            .header("Authorization", "pw")
            .header("User-Id", "1");
        assert_eq!(config.headers.len(), 2);
        assert_eq!(config.channel_capacity, 100);
    }

    #[tokio::test]
    async fn test_rejects_non_ws_scheme() {
        let transport = WebSocketTransport::new();
        let result = transport.connect("http://localhost:2333").await;
        assert!(matches!(result, Err(TransportError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_rejects_unparseable_url() {
        let transport = WebSocketTransport::new();
        let result = transport.connect("not a url").await;
        assert!(matches!(result, Err(TransportError::InvalidUrl(_))));
    }
}
