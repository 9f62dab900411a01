// =============================================================================
// WS Session — one persistent WebSocket with reconnect and correlation
// =============================================================================
//
// A session owns a single connection to one URI. Inbound frames are handed to
// the adapter's `WsHandler`; frames that decode to a known correlation id
// resolve the oneshot slot registered by `send`. Any transport failure tears
// the connection down, aborts the handler's auxiliary tasks (keep-alive,
// listen-key refresh), and reconnects after a short delay. The loop never
// terminates on its own; the owning task is simply aborted at shutdown.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, warn};

/// Delay between reconnect attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(200);

/// Default wait for a correlated response.
const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-connection callbacks implemented by each venue adapter.
#[async_trait]
pub trait WsHandler: Send + Sync {
    /// Invoked once per established connection. Returned tasks (keep-alive,
    /// listen-key refresh, subscriptions that need their own loop) are
    /// aborted when the connection drops.
    async fn on_connect(&self, _session: &Arc<WsSession>) -> Vec<JoinHandle<()>> {
        Vec::new()
    }

    /// Decode one inbound text frame. A non-empty correlation id resolves
    /// the pending `send` waiting on it.
    async fn on_message(
        &self,
        session: &Arc<WsSession>,
        symbol: &str,
        raw: &str,
    ) -> (Option<Value>, String);
}

/// One WebSocket connection with auto-reconnect.
pub struct WsSession {
    name: String,
    uri: String,
    symbol: String,
    send_timeout: Duration,
    open: AtomicBool,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    pending: Mutex<HashMap<String, oneshot::Sender<Value>>>,
    /// Signalled by a handler that wants the current connection recycled
    /// (e.g. after a rejected login).
    reconnect: Notify,
}

impl WsSession {
    pub fn new(uri: impl Into<String>, name: impl Into<String>) -> Arc<Self> {
        Self::with_symbol(uri, name, "")
    }

    pub fn with_symbol(
        uri: impl Into<String>,
        name: impl Into<String>,
        symbol: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            uri: uri.into(),
            symbol: symbol.into(),
            send_timeout: DEFAULT_SEND_TIMEOUT,
            open: AtomicBool::new(false),
            outbound: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            reconnect: Notify::new(),
        })
    }

    /// True iff a connection is currently live.
    pub fn ready(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Symbol this session subscribes, empty for non-public sessions.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Ask the run loop to drop the current connection and reconnect.
    pub fn request_reconnect(&self) {
        self.reconnect.notify_one();
    }

    // -------------------------------------------------------------------------
    // Outbound
    // -------------------------------------------------------------------------

    /// JSON-encode and transmit `payload`.
    ///
    /// With a non-empty `id`, registers a pending-response slot and awaits
    /// the correlated reply up to the send timeout. Returns `(response, ok)`.
    /// If the socket is not open this fails fast with `(None, false)` —
    /// pending waiters from a dropped connection are left to time out here.
    pub async fn send(&self, payload: &Value, id: &str) -> (Option<Value>, bool) {
        let tx = self.outbound.lock().clone();
        let tx = match tx {
            Some(tx) if self.ready() => tx,
            _ => {
                warn!(name = %self.name, "send on a socket that is not open");
                return (None, false);
            }
        };

        let mut waiter = None;
        if !id.is_empty() {
            let (otx, orx) = oneshot::channel();
            self.pending.lock().insert(id.to_string(), otx);
            waiter = Some(orx);
        }

        if tx.send(Message::Text(payload.to_string())).is_err() {
            if !id.is_empty() {
                self.pending.lock().remove(id);
            }
            return (None, false);
        }

        let Some(orx) = waiter else {
            return (None, true);
        };

        match tokio::time::timeout(self.send_timeout, orx).await {
            Ok(Ok(value)) => (Some(value), true),
            Ok(Err(_)) => (None, false),
            Err(_) => {
                self.pending.lock().remove(id);
                warn!(name = %self.name, id, "timed out waiting for correlated response");
                (None, false)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Connection loop
    // -------------------------------------------------------------------------

    /// Connect, dispatch frames, reconnect on failure. Never returns; abort
    /// the owning task to stop the session.
    pub async fn run(self: Arc<Self>, handler: Arc<dyn WsHandler>) {
        loop {
            if let Err(e) = self.conn(&handler).await {
                error!(
                    name = %self.name,
                    class = classify(&e),
                    error = %e,
                    "connection lost — reconnecting"
                );
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    /// One connect-and-read cycle. Errors bubble to `run` for the reconnect.
    async fn conn(self: &Arc<Self>, handler: &Arc<dyn WsHandler>) -> Result<()> {
        let (stream, _response) = connect_async(&self.uri).await?;
        debug!(name = %self.name, "connected");

        let (mut write, mut read) = stream.split();

        // Writer task: serializes all outbound traffic so `send` never needs
        // exclusive access to the sink.
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if write.send(msg).await.is_err() {
                    break;
                }
            }
        });

        *self.outbound.lock() = Some(tx.clone());
        self.open.store(true, Ordering::SeqCst);

        let aux = handler.on_connect(self).await;

        let result = loop {
            tokio::select! {
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        let (decoded, id) = handler.on_message(self, &self.symbol, &text).await;
                        if !id.is_empty() {
                            if let Some(slot) = self.pending.lock().remove(&id) {
                                let _ = slot.send(decoded.unwrap_or(Value::Null));
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = tx.send(Message::Pong(payload));
                    }
                    Some(Ok(Message::Close(_))) => {
                        break Err(anyhow!("closed by peer"));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Err(e.into()),
                    None => break Err(anyhow!("stream ended")),
                },
                _ = self.reconnect.notified() => {
                    break Err(anyhow!("reconnect requested by handler"));
                }
            }
        };

        self.open.store(false, Ordering::SeqCst);
        *self.outbound.lock() = None;
        for task in aux {
            task.abort();
        }
        writer.abort();

        result
    }
}

/// Human-readable failure class for reconnect logs.
fn classify(e: &anyhow::Error) -> &'static str {
    match e.downcast_ref::<tungstenite::Error>() {
        Some(tungstenite::Error::Http(_)) | Some(tungstenite::Error::HttpFormat(_)) => {
            "handshake"
        }
        Some(tungstenite::Error::Io(io)) if io.kind() == std::io::ErrorKind::TimedOut => {
            "timeout"
        }
        Some(tungstenite::Error::ConnectionClosed) | Some(tungstenite::Error::AlreadyClosed) => {
            "closed"
        }
        Some(_) => "transport",
        None => {
            if e.to_string().contains("closed") {
                "closed"
            } else {
                "unknown"
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn send_before_open_fails_fast() {
        let session = WsSession::new("wss://example.invalid/ws", "test");
        let started = std::time::Instant::now();
        let (res, ok) = session.send(&json!({"ping": 1}), "").await;
        assert!(res.is_none());
        assert!(!ok);
        // Fail-fast: no blocking on the 5 s correlation timeout.
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn send_with_id_before_open_does_not_register_pending() {
        let session = WsSession::new("wss://example.invalid/ws", "test");
        let (_, ok) = session.send(&json!({"id": "abc"}), "abc").await;
        assert!(!ok);
        assert!(session.pending.lock().is_empty());
    }

    #[test]
    fn fresh_session_is_not_ready() {
        let session = WsSession::new("wss://example.invalid/ws", "test");
        assert!(!session.ready());
    }
}
