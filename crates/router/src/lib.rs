//! Message router / WebSocket client (§4.8): a long-lived connection to the
//! gateway with request/response correlation by `echo`, reconnection with
//! bounded exponential backoff, and a listen loop that forwards event frames
//! onward for dispatch.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use ncatbot_protocol::{ActionFrame, ActionSender, InboundFrame, ResponseFrame};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// Default per-call timeout for [`MessageRouter::send`] (§4.8).
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(30);
/// Ceiling on the reconnect backoff (§4.8 "bounded exponential backoff").
pub const MAX_RECONNECT_BACKOFF: Duration = Duration::from_secs(30);

/// Receives every inbound frame that does not carry an `echo` — i.e. a raw
/// gateway event payload (§4.8 "Inbound frames without echo are events and
/// are forwarded to the dispatcher"). Kept as a trait here rather than a
/// direct dependency on `ncatbot-events` so the router never needs to know
/// about the typed event model, only that *something* wants raw payloads.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn handle_event(&self, payload: serde_json::Value);
}

/// Configuration for [`MessageRouter::connect`].
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub url: String,
    pub access_token: Option<String>,
    pub action_timeout: Duration,
    pub max_backoff: Duration,
}

impl RouterConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            access_token: None,
            action_timeout: DEFAULT_ACTION_TIMEOUT,
            max_backoff: MAX_RECONNECT_BACKOFF,
        }
    }
}

struct Pending {
    tx: oneshot::Sender<ResponseFrame>,
}

/// The router itself. Construct with [`MessageRouter::new`], then
/// [`MessageRouter::connect`] to spawn the background connection task.
pub struct MessageRouter {
    config: RouterConfig,
    sink: Arc<dyn EventSink>,
    pending: Arc<DashMap<String, Pending>>,
    write_tx: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    running: Arc<AtomicBool>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl MessageRouter {
    #[must_use]
    pub fn new(config: RouterConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            sink,
            pending: Arc::new(DashMap::new()),
            write_tx: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    /// Spawn the reconnect-loop background task (§4.8, §5 "Scoped
    /// acquisition"). Idempotent — a second call while already running is a
    /// no-op.
    pub fn connect(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = self.clone();
        let handle = tokio::spawn(async move { this.connection_loop().await });
        *self.task.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
    }

    async fn connection_loop(self: Arc<Self>) {
        let mut backoff = Duration::from_secs(1);
        while self.running.load(Ordering::SeqCst) {
            match self.connect_and_run().await {
                Ok(()) => {
                    debug!("router connection closed cleanly");
                    backoff = Duration::from_secs(1);
                },
                Err(e) => {
                    error!(error = %e, "router connection failed");
                },
            }

            self.fail_all_pending();
            *self.write_tx.lock().unwrap_or_else(|p| p.into_inner()) = None;

            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            info!(delay = ?backoff, "reconnecting to gateway");
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.config.max_backoff);
        }
    }

    async fn connect_and_run(&self) -> ncatbot_common::Result<()> {
        let mut url = url::Url::parse(&self.config.url).map_err(ncatbot_common::Error::message)?;
        if let Some(token) = &self.config.access_token {
            if !url.query_pairs().any(|(k, _)| k == "access_token") {
                url.query_pairs_mut().append_pair("access_token", token);
            }
        }

        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| ncatbot_common::Error::message(format!("gateway connect failed: {e}")))?;
        info!(url = %self.config.url, "connected to gateway");
        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<Message>();
        *self.write_tx.lock().unwrap_or_else(|p| p.into_inner()) = Some(write_tx);

        loop {
            tokio::select! {
                incoming = ws_stream.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => self.handle_raw_frame(&text).await,
                        Some(Ok(Message::Ping(data))) => {
                            let _ = ws_sink.send(Message::Pong(data)).await;
                        },
                        Some(Ok(Message::Close(_))) | None => {
                            return Ok(());
                        },
                        Some(Ok(_)) => {},
                        Some(Err(e)) => {
                            return Err(ncatbot_common::Error::message(format!("gateway read error: {e}")));
                        },
                    }
                },
                outgoing = write_rx.recv() => {
                    match outgoing {
                        Some(msg) => {
                            if let Err(e) = ws_sink.send(msg).await {
                                return Err(ncatbot_common::Error::message(format!("gateway write error: {e}")));
                            }
                        },
                        None => {
                            let _ = ws_sink.send(Message::Close(None)).await;
                            return Ok(());
                        },
                    }
                },
            }

            if !self.running.load(Ordering::SeqCst) {
                let _ = ws_sink.send(Message::Close(None)).await;
                return Ok(());
            }
        }
    }

    async fn handle_raw_frame(&self, text: &str) {
        let raw: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "dropping unparseable gateway frame");
                return;
            },
        };

        match InboundFrame::classify(raw) {
            Some(InboundFrame::Response(response)) => self.resolve(response),
            Some(InboundFrame::Event(payload)) => self.sink.handle_event(payload).await,
            None => warn!("dropping gateway frame with neither echo nor post_type"),
        }
    }

    fn resolve(&self, response: ResponseFrame) {
        if let Some((_, pending)) = self.pending.remove(&response.echo) {
            let _ = pending.tx.send(response);
        }
    }

    /// Drop every pending request's sender, failing its awaiting receiver
    /// with a closed-channel error (translated to `ConnectionLost` by the
    /// caller) — §4.8 "pending requests outstanding at disconnect fail with
    /// a connection-lost error".
    fn fail_all_pending(&self) {
        let keys: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.pending.remove(&key);
        }
    }

    /// Send an action and await its correlated response (§4.8). Suspends
    /// until the response arrives or `timeout` elapses; on timeout the
    /// pending entry is cleaned up and the call fails (§4.8, §7).
    pub async fn send(&self, action: &str, params: serde_json::Value, timeout: Duration) -> ncatbot_common::Result<serde_json::Value> {
        let frame = ActionFrame::new(action, params);
        let echo = frame.echo.clone();

        let write_tx = self
            .write_tx
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or(ncatbot_common::Error::ConnectionLost)?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(echo.clone(), Pending { tx });

        let text = serde_json::to_string(&frame)?;
        if write_tx.send(Message::Text(text.into())).is_err() {
            self.pending.remove(&echo);
            return Err(ncatbot_common::Error::ConnectionLost);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) if response.is_ok() => Ok(response.data),
            Ok(Ok(response)) => Err(ncatbot_common::Error::Api {
                retcode: response.retcode,
                message: response.message,
            }),
            Ok(Err(_)) => Err(ncatbot_common::Error::ConnectionLost),
            Err(_) => {
                self.pending.remove(&echo);
                Err(ncatbot_common::Error::Timeout(timeout))
            },
        }
    }

    /// Send with the router's configured default timeout.
    pub async fn send_default(&self, action: &str, params: serde_json::Value) -> ncatbot_common::Result<serde_json::Value> {
        self.send(action, params, self.config.action_timeout).await
    }

    /// Cooperative shutdown (§4.8, §5): stop the reconnect loop, close the
    /// socket, drain pending requests. Idempotent.
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(write_tx) = self.write_tx.lock().unwrap_or_else(|p| p.into_inner()).take() {
            drop(write_tx);
        }
        if let Some(handle) = self.task.lock().unwrap_or_else(|p| p.into_inner()).take() {
            handle.abort();
        }
        self.fail_all_pending();
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.write_tx.lock().unwrap_or_else(|p| p.into_inner()).is_some()
    }
}

#[async_trait]
impl ActionSender for MessageRouter {
    async fn call(&self, action: &str, params: serde_json::Value) -> ncatbot_common::Result<serde_json::Value> {
        self.send_default(action, params).await
    }
}
