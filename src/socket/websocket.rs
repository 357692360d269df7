//! Socket.IO connection over WebSocket with automatic reconnection

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::packet::{self, Packet};
use super::{ClientEvent, ServerEvent, SocketEvent, Transport};
use crate::error::ChatError;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Connection and reconnection settings.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// Backend base URL (`http(s)://host:port`).
    pub base_url: String,
    pub api_key: Option<String>,
    /// Username passed as a query parameter so the server can map sockets.
    pub username: Option<String>,
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub connect_timeout: Duration,
}

impl SocketOptions {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            username: None,
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(20),
        }
    }

    /// Build the Engine.IO WebSocket endpoint.
    pub fn ws_url(&self) -> Result<url::Url> {
        let mut url = url::Url::parse(&self.base_url)
            .with_context(|| format!("Invalid socket URL {}", self.base_url))?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => bail!("Unsupported socket URL scheme: {}", other),
        };
        url.set_scheme(scheme)
            .map_err(|_| anyhow::anyhow!("Cannot switch {} to {}", self.base_url, scheme))?;
        url.set_path("/socket.io/");
        {
            let mut q = url.query_pairs_mut();
            q.clear();
            q.append_pair("EIO", "4");
            q.append_pair("transport", "websocket");
            if let Some(ref user) = self.username {
                q.append_pair("userId", user);
            }
        }
        Ok(url)
    }

    /// Delay before reconnect attempt `attempt` (1-based): doubles, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    fn auth(&self) -> Value {
        match self.api_key {
            Some(ref key) => json!({ "apiKey": key }),
            None => Value::Null,
        }
    }
}

/// Handle used by the reconciler to emit events.
#[derive(Clone)]
pub struct SocketTransport {
    outbound: mpsc::UnboundedSender<ClientEvent>,
    connected: Arc<AtomicBool>,
}

impl SocketTransport {
    /// Spawn the connection task. Events arrive on the returned receiver.
    pub fn spawn(options: SocketOptions) -> (Self, mpsc::UnboundedReceiver<SocketEvent>) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));

        tokio::spawn(run(options, outbound_rx, events_tx, Arc::clone(&connected)));

        (
            Self {
                outbound: outbound_tx,
                connected,
            },
            events_rx,
        )
    }
}

impl Transport for SocketTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn emit(&self, event: ClientEvent) -> Result<(), ChatError> {
        if !self.is_connected() {
            return Err(ChatError::Transport(format!(
                "not connected, dropped {}",
                event.name()
            )));
        }
        self.outbound
            .send(event)
            .map_err(|_| ChatError::Transport("socket task stopped".into()))
    }
}

/// Reconnect loop. Stops when attempts are exhausted or the owner drops
/// both the transport handle and the event receiver.
async fn run(
    options: SocketOptions,
    mut outbound: mpsc::UnboundedReceiver<ClientEvent>,
    events: mpsc::UnboundedSender<SocketEvent>,
    connected: Arc<AtomicBool>,
) {
    let mut attempt = 0u32;

    loop {
        let result = run_session(&options, attempt, &mut outbound, &events, &connected).await;
        let was_connected = connected.swap(false, Ordering::SeqCst);

        let reason = match result {
            Ok(()) => {
                tracing::info!("Socket closed by owner");
                return;
            }
            Err(e) => format!("{:#}", e),
        };

        if was_connected {
            // A session that got as far as connecting resets the budget.
            attempt = 0;
            if events
                .send(SocketEvent::Disconnected {
                    reason: reason.clone(),
                })
                .is_err()
            {
                return;
            }
        }

        attempt += 1;
        if attempt > options.max_attempts {
            tracing::warn!("Socket reconnection gave up after {} attempts", options.max_attempts);
            let _ = events.send(SocketEvent::GaveUp);
            return;
        }

        let delay = options.backoff(attempt);
        tracing::warn!(
            "Socket disconnected: {}. Reconnecting in {:?} (attempt {}/{})",
            reason,
            delay,
            attempt,
            options.max_attempts
        );
        time::sleep(delay).await;

        // Drop anything queued while we were down; callers re-emit on connect.
        while outbound.try_recv().is_ok() {}
    }
}

/// One connection: handshake, then pump frames both ways until failure.
///
/// Returns `Ok(())` only when the owner is gone and the task should stop.
async fn run_session(
    options: &SocketOptions,
    attempt: u32,
    outbound: &mut mpsc::UnboundedReceiver<ClientEvent>,
    events: &mpsc::UnboundedSender<SocketEvent>,
    connected: &AtomicBool,
) -> Result<()> {
    let url = options.ws_url()?;
    tracing::info!("Connecting socket to {}", url);

    let (mut ws, response) = time::timeout(options.connect_timeout, connect_async(url.as_str()))
        .await
        .context("Socket connect timed out")?
        .context("WebSocket connection failed")?;
    tracing::debug!("WebSocket upgraded (status={})", response.status());

    // Engine.IO open
    let open = match recv_packet(&mut ws, options.connect_timeout).await? {
        Packet::Open(info) => info,
        other => bail!("Expected open packet, got {:?}", other),
    };
    tracing::debug!(
        "Engine.IO open: sid={} ping={}ms/{}ms",
        open.sid,
        open.ping_interval,
        open.ping_timeout
    );
    let liveness = Duration::from_millis(open.ping_interval + open.ping_timeout);

    // Socket.IO namespace connect with auth
    send_text(&mut ws, packet::encode_connect(&options.auth())).await?;
    loop {
        match recv_packet(&mut ws, options.connect_timeout).await? {
            Packet::Connect => break,
            Packet::ConnectError(msg) => bail!("Connect rejected: {}", msg),
            Packet::Ping => send_text(&mut ws, packet::PONG.to_string()).await?,
            other => tracing::debug!("Ignoring pre-connect packet: {:?}", other),
        }
    }

    connected.store(true, Ordering::SeqCst);
    tracing::info!("Socket connected");
    if events
        .send(SocketEvent::Connected {
            reconnect_attempts: attempt,
        })
        .is_err()
    {
        return Ok(());
    }

    loop {
        tokio::select! {
            incoming = recv_packet(&mut ws, liveness) => {
                match incoming? {
                    Packet::Ping => send_text(&mut ws, packet::PONG.to_string()).await?,
                    Packet::Event { name, data } => match ServerEvent::decode(&name, data) {
                        Some(event) => {
                            if events.send(SocketEvent::Event(event)).is_err() {
                                return Ok(());
                            }
                        }
                        None => tracing::debug!("Dropping unknown or malformed event {}", name),
                    },
                    Packet::Disconnect => bail!("Server disconnected the namespace"),
                    Packet::Close => bail!("Server closed the session"),
                    Packet::ConnectError(msg) => bail!("Connect error: {}", msg),
                    other => tracing::debug!("Ignoring packet: {:?}", other),
                }
            }
            out = outbound.recv() => {
                match out {
                    Some(event) => {
                        let frame = packet::encode_event(event.name(), &event.payload());
                        send_text(&mut ws, frame).await?;
                    }
                    None => {
                        let _ = ws.close(None).await;
                        return Ok(());
                    }
                }
            }
        }
    }
}

async fn send_text(ws: &mut WsStream, text: String) -> Result<()> {
    tracing::debug!("WS send: {}", text);
    ws.send(Message::Text(text))
        .await
        .context("Failed to send WebSocket message")
}

/// Next Engine.IO packet, answering WebSocket pings and enforcing a deadline.
async fn recv_packet(ws: &mut WsStream, deadline: Duration) -> Result<Packet> {
    loop {
        let next = time::timeout(deadline, ws.next())
            .await
            .context("Socket heartbeat timed out")?;
        match next {
            Some(Ok(Message::Text(text))) => {
                tracing::trace!("WS recv: {}", text);
                return Ok(packet::parse(&text));
            }
            Some(Ok(Message::Ping(data))) => {
                ws.send(Message::Pong(data))
                    .await
                    .context("Failed to send pong")?;
            }
            Some(Ok(Message::Close(frame))) => bail!("WebSocket closed: {:?}", frame),
            Some(Ok(other)) => tracing::debug!("WS frame (ignored): {:?}", other),
            Some(Err(e)) => return Err(e).context("WebSocket receive error"),
            None => bail!("WebSocket stream ended"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_url() {
        let mut opts = SocketOptions::new("https://chat.example:4000/ignored");
        opts.username = Some("alice".into());
        assert_eq!(
            opts.ws_url().unwrap().as_str(),
            "wss://chat.example:4000/socket.io/?EIO=4&transport=websocket&userId=alice"
        );

        let opts = SocketOptions::new("http://localhost:4000");
        assert_eq!(
            opts.ws_url().unwrap().as_str(),
            "ws://localhost:4000/socket.io/?EIO=4&transport=websocket"
        );

        assert!(SocketOptions::new("ftp://x").ws_url().is_err());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let opts = SocketOptions::new("http://localhost");
        assert_eq!(opts.backoff(1), Duration::from_secs(1));
        assert_eq!(opts.backoff(2), Duration::from_secs(2));
        assert_eq!(opts.backoff(3), Duration::from_secs(4));
        assert_eq!(opts.backoff(4), Duration::from_secs(5));
        assert_eq!(opts.backoff(40), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_emit_fails_fast_while_disconnected() {
        // Nothing listens on port 1; the task keeps retrying in the background.
        let mut opts = SocketOptions::new("http://127.0.0.1:1");
        opts.max_attempts = 0;
        let (transport, mut events) = SocketTransport::spawn(opts);

        assert!(!transport.is_connected());
        let err = transport.emit(ClientEvent::JoinRoom("r1".into())).unwrap_err();
        assert!(matches!(err, ChatError::Transport(_)));

        assert_eq!(events.recv().await, Some(SocketEvent::GaveUp));
    }
}
