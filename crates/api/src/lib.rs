//! The outbound API facade (§6, `SPEC_FULL.md` §0): the handle a plugin
//! receives via `Event::api::<Api>()` for issuing actions back to the
//! gateway. The generic `call(action, params)` is the only operation this
//! crate actually needs to provide — the full OneBot action surface is out
//! of scope (spec.md §1), so what follows are a handful of named wrappers
//! around the actions used heavily enough to be worth naming.

use std::sync::Arc;

use async_trait::async_trait;
use ncatbot_common::Result;
use ncatbot_protocol::ActionSender;
use serde_json::{json, Value};

/// Thin wrapper over whatever [`ActionSender`] the kernel wired up
/// (`ncatbot-router`'s `MessageRouter` in production, a fake in tests).
/// Implements [`ActionSender`] itself so it can stand in anywhere a sender
/// is expected, and so `Event::bind_api` can hand it to plugins uniformly.
pub struct Api {
    sender: Arc<dyn ActionSender>,
}

impl Api {
    #[must_use]
    pub fn new(sender: Arc<dyn ActionSender>) -> Self {
        Self { sender }
    }

    /// Issue any action by name (§6). Every other method on this type is a
    /// named shortcut for this.
    pub async fn call(&self, action: &str, params: Value) -> Result<Value> {
        self.sender.call(action, params).await
    }

    pub async fn send_private_msg(&self, user_id: &str, message: Value) -> Result<Value> {
        self.call("send_private_msg", json!({ "user_id": user_id, "message": message })).await
    }

    pub async fn send_group_msg(&self, group_id: &str, message: Value) -> Result<Value> {
        self.call("send_group_msg", json!({ "group_id": group_id, "message": message })).await
    }

    pub async fn delete_msg(&self, message_id: &str) -> Result<Value> {
        self.call("delete_msg", json!({ "message_id": message_id })).await
    }

    pub async fn get_login_info(&self) -> Result<Value> {
        self.call("get_login_info", json!({})).await
    }

    pub async fn get_group_member_info(&self, group_id: &str, user_id: &str) -> Result<Value> {
        self.call("get_group_member_info", json!({ "group_id": group_id, "user_id": user_id, "no_cache": false })).await
    }

    pub async fn set_group_ban(&self, group_id: &str, user_id: &str, duration_secs: u64) -> Result<Value> {
        self.call("set_group_ban", json!({ "group_id": group_id, "user_id": user_id, "duration": duration_secs })).await
    }
}

#[async_trait]
impl ActionSender for Api {
    async fn call(&self, action: &str, params: Value) -> Result<Value> {
        self.sender.call(action, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSender {
        calls: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl ActionSender for RecordingSender {
        async fn call(&self, action: &str, params: Value) -> Result<Value> {
            self.calls.lock().unwrap().push((action.to_string(), params));
            Ok(json!({"ok": true}))
        }
    }

    #[tokio::test]
    async fn named_wrapper_forwards_to_call() {
        let sender = Arc::new(RecordingSender { calls: Mutex::new(Vec::new()) });
        let api = Api::new(sender.clone());

        api.send_group_msg("100", json!([{"type": "text", "data": {"text": "hi"}}])).await.unwrap();

        let calls = sender.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "send_group_msg");
        assert_eq!(calls[0].1["group_id"], json!("100"));
    }

    #[tokio::test]
    async fn generic_call_passes_action_name_through() {
        let sender = Arc::new(RecordingSender { calls: Mutex::new(Vec::new()) });
        let api = Api::new(sender.clone());

        api.call("get_status", json!({})).await.unwrap();

        assert_eq!(sender.calls.lock().unwrap()[0].0, "get_status");
    }
}
