//! `event.reply(...)` (§3 "an optional bound API handle used by helper
//! methods such as `reply`", §9 "per-event bound API handle"): a plugin
//! handler calls this without ever importing `ncatbot-api` directly, because
//! the dispatcher already bound an `Api` handle onto the event before
//! publish.

use ncatbot_api::Api;
use ncatbot_eventbus::Event;
use serde_json::Value;

/// Extension trait so `event.reply(...)` reads like a method on `Event`
/// itself, without `ncatbot-eventbus` needing to know `ncatbot-api` exists
/// (that dependency would be circular — see `EventDispatcher`'s doc comment).
#[async_trait::async_trait]
pub trait EventReplyExt {
    /// Reply to whichever message this event carries, inferring private vs.
    /// group send from the event's own `message_type`/`group_id`/`user_id`
    /// fields. Returns an error if the event has no bound API, isn't a
    /// message event, or is missing the id the chosen send action needs.
    async fn reply(&self, message: Value) -> ncatbot_common::Result<Value>;
}

#[async_trait::async_trait]
impl EventReplyExt for Event {
    async fn reply(&self, message: Value) -> ncatbot_common::Result<Value> {
        let api = self
            .api::<Api>()
            .ok_or_else(|| ncatbot_common::Error::message("event has no bound API handle"))?;

        match self.data.get("message_type").and_then(Value::as_str) {
            Some("group") => {
                let group_id = self
                    .data
                    .get("group_id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ncatbot_common::Error::message("group message event missing group_id"))?;
                api.send_group_msg(group_id, message).await
            },
            Some("private") => {
                let user_id = self
                    .data
                    .get("user_id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ncatbot_common::Error::message("private message event missing user_id"))?;
                api.send_private_msg(user_id, message).await
            },
            _ => Err(ncatbot_common::Error::message("reply is only valid on a message event")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ncatbot_protocol::ActionSender;
    use std::sync::{Arc, Mutex};

    struct RecordingSender {
        calls: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl ActionSender for RecordingSender {
        async fn call(&self, action: &str, params: Value) -> ncatbot_common::Result<Value> {
            self.calls.lock().unwrap().push((action.to_string(), params));
            Ok(serde_json::json!({"message_id": "1"}))
        }
    }

    #[tokio::test]
    async fn group_event_replies_via_send_group_msg() {
        let sender = Arc::new(RecordingSender { calls: Mutex::new(Vec::new()) });
        let api = Arc::new(Api::new(sender.clone()));
        let mut event = Event::new(
            "ncatbot.message_event",
            serde_json::json!({"message_type": "group", "group_id": "100", "user_id": "1"}),
        );
        event.bind_api(api);

        event.reply(serde_json::json!([{"type": "text", "data": {"text": "hi"}}])).await.unwrap();

        let calls = sender.calls.lock().unwrap();
        assert_eq!(calls[0].0, "send_group_msg");
        assert_eq!(calls[0].1["group_id"], serde_json::json!("100"));
    }

    #[tokio::test]
    async fn private_event_replies_via_send_private_msg() {
        let sender = Arc::new(RecordingSender { calls: Mutex::new(Vec::new()) });
        let api = Arc::new(Api::new(sender.clone()));
        let mut event = Event::new("ncatbot.message_event", serde_json::json!({"message_type": "private", "user_id": "42"}));
        event.bind_api(api);

        event.reply(serde_json::json!([{"type": "text", "data": {"text": "hi"}}])).await.unwrap();

        let calls = sender.calls.lock().unwrap();
        assert_eq!(calls[0].0, "send_private_msg");
        assert_eq!(calls[0].1["user_id"], serde_json::json!("42"));
    }

    #[tokio::test]
    async fn non_message_event_rejects_reply() {
        let sender = Arc::new(RecordingSender { calls: Mutex::new(Vec::new()) });
        let api = Arc::new(Api::new(sender));
        let mut event = Event::new("ncatbot.notice_event", serde_json::json!({"notice_type": "group_increase"}));
        event.bind_api(api);

        assert!(event.reply(serde_json::Value::Null).await.is_err());
    }

    #[tokio::test]
    async fn unbound_event_rejects_reply() {
        let event = Event::new("ncatbot.message_event", serde_json::json!({"message_type": "private", "user_id": "1"}));
        assert!(event.reply(serde_json::Value::Null).await.is_err());
    }
}
