//! Gateway wire protocol: JSON frames over WebSocket, modeled on OneBot 11
//! (§6). The core is agnostic to individual action semantics — it only needs
//! enough of the frame shape to correlate requests with responses and to
//! recognize event frames.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Canonical published event types (§6 "Event-type naming"). The dispatcher
/// (`ncatbot-events`) publishes exactly these five for inbound gateway
/// events, plus the two plugin-lifecycle events.
pub mod event_types {
    pub const MESSAGE: &str = "ncatbot.message_event";
    pub const MESSAGE_SENT: &str = "ncatbot.message_sent_event";
    pub const NOTICE: &str = "ncatbot.notice_event";
    pub const REQUEST: &str = "ncatbot.request_event";
    pub const META: &str = "ncatbot.meta_event";
    pub const PLUGIN_LOAD: &str = "ncatbot.plugin_load";
    pub const PLUGIN_UNLOAD: &str = "ncatbot.plugin_unload";
}

/// `post_type` values carried on every inbound event frame (§3, §6).
pub mod post_type {
    pub const MESSAGE: &str = "message";
    pub const MESSAGE_SENT: &str = "message_sent";
    pub const NOTICE: &str = "notice";
    pub const REQUEST: &str = "request";
    pub const META_EVENT: &str = "meta_event";

    pub const ALL: &[&str] = &[MESSAGE, MESSAGE_SENT, NOTICE, REQUEST, META_EVENT];
}

/// Outbound action frame: `{ "action": ..., "params": ..., "echo": ... }` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionFrame {
    pub action: String,
    pub params: serde_json::Value,
    pub echo: String,
}

impl ActionFrame {
    #[must_use]
    pub fn new(action: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            action: action.into(),
            params,
            echo: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// Inbound response frame, correlated to an outbound [`ActionFrame`] by `echo` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub echo: String,
    pub status: ResponseStatus,
    pub retcode: i64,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Failed,
}

impl ResponseFrame {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok && self.retcode == 0
    }
}

/// A raw inbound gateway frame is either a correlated response (carries
/// `echo`) or an event push (carries `post_type`). Distinguishing the two
/// only requires peeking at the top-level keys, so this is a thin enum over
/// the raw JSON rather than a `#[serde(untagged)]` struct — event payloads
/// vary too much by `post_type`/sub-key to model as one Rust type here (that
/// typing happens one layer up, in `ncatbot-events`).
#[derive(Debug, Clone)]
pub enum InboundFrame {
    Response(ResponseFrame),
    Event(serde_json::Value),
}

impl InboundFrame {
    /// Classify a raw JSON frame from the gateway (§6).
    #[must_use]
    pub fn classify(raw: serde_json::Value) -> Option<Self> {
        if raw.get("echo").is_some() {
            return serde_json::from_value::<ResponseFrame>(raw).ok().map(Self::Response);
        }
        if raw.get("post_type").is_some() {
            return Some(Self::Event(raw));
        }
        None
    }
}

/// Error shape surfaced by the outbound API facade when a gateway call fails
/// (`APIError` in §7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorShape {
    pub retcode: i64,
    pub message: String,
}

/// The one capability every action-issuing consumer needs: send an action,
/// get back the correlated response's `data`. `ncatbot-router` provides the
/// real implementation over a live gateway connection; pre-upload and the
/// outbound API facade hold only this trait object, not the router itself.
#[async_trait]
pub trait ActionSender: Send + Sync {
    async fn call(&self, action: &str, params: serde_json::Value) -> ncatbot_common::Result<serde_json::Value>;
}
