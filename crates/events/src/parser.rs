//! `(post_type, sub_key) → concrete event variant` lookup and the payload
//! pre-validation that happens before publish (§4.2).

use serde_json::Value;

use crate::kind::EventKind;

pub struct ParsedEvent {
    pub event_type: &'static str,
    pub kind: EventKind,
    pub data: Value,
}

/// Derive `sub_key` by the fixed rule of §3: `message`/`message_sent` key on
/// `message_type`, `request` on `request_type`, `meta_event` on
/// `meta_event_type`, `notice` on `notice_type` — except `notice_type ==
/// "notify"`, which keys on `sub_type` instead.
fn sub_key(payload: &Value, post_type: &str) -> Option<String> {
    let field = match post_type {
        "message" | "message_sent" => "message_type",
        "request" => "request_type",
        "meta_event" => "meta_event_type",
        "notice" => {
            let notice_type = payload.get("notice_type").and_then(Value::as_str)?;
            if notice_type == "notify" {
                "sub_type"
            } else {
                return Some(notice_type.to_string());
            }
        },
        _ => return None,
    };
    payload.get(field).and_then(Value::as_str).map(str::to_string)
}

/// The canonical published type for a `post_type` value (§4.2.6, §6).
#[must_use]
pub fn canonical_event_type(post_type: &str) -> Option<&'static str> {
    match post_type {
        "message" => Some(ncatbot_protocol::event_types::MESSAGE),
        "message_sent" => Some(ncatbot_protocol::event_types::MESSAGE_SENT),
        "notice" => Some(ncatbot_protocol::event_types::NOTICE),
        "request" => Some(ncatbot_protocol::event_types::REQUEST),
        "meta_event" => Some(ncatbot_protocol::event_types::META),
        _ => None,
    }
}

/// Parse a raw gateway event payload (§4.2). Returns `None` when the
/// payload is missing `post_type`, carries an unregistered `(post_type,
/// sub_key)` combination, or names an unrecognized `post_type` — in every
/// case the caller logs and drops, it never errors (§4.2.3, §6 "Unknown
/// events are logged and dropped").
#[must_use]
pub fn parse(mut payload: Value) -> Option<ParsedEvent> {
    let post_type = payload.get("post_type")?.as_str()?.to_string();
    let event_type = canonical_event_type(&post_type)?;
    let key = sub_key(&payload, &post_type).unwrap_or_default();
    let kind = match EventKind::lookup(&post_type, &key) {
        Some(kind) => kind,
        None => {
            tracing::warn!(post_type = %post_type, sub_key = %key, "dropping event with unregistered (post_type, sub_key)");
            return None;
        },
    };

    ncatbot_common::normalize_id_fields(&mut payload, ncatbot_common::ID_FIELDS);

    Some(ParsedEvent {
        event_type,
        kind,
        data: payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_post_type_is_rejected() {
        assert!(parse(serde_json::json!({"message_type": "private"})).is_none());
    }

    #[test]
    fn unknown_post_type_is_rejected() {
        assert!(parse(serde_json::json!({"post_type": "unheard_of"})).is_none());
    }

    #[test]
    fn group_message_parses_with_normalized_ids() {
        let payload = serde_json::json!({
            "post_type": "message",
            "message_type": "group",
            "user_id": 123,
            "group_id": 456,
            "message_id": 789,
        });
        let parsed = parse(payload).expect("should parse");
        assert_eq!(parsed.event_type, "ncatbot.message_event");
        assert_eq!(parsed.kind, EventKind::MessageGroup);
        assert_eq!(parsed.data["user_id"], serde_json::json!("123"));
        assert_eq!(parsed.data["group_id"], serde_json::json!("456"));
        assert_eq!(parsed.data["message_id"], serde_json::json!("789"));
    }

    #[test]
    fn notify_poke_is_published_under_canonical_notice_type() {
        let payload = serde_json::json!({
            "post_type": "notice",
            "notice_type": "notify",
            "sub_type": "poke",
            "user_id": 1,
            "target_id": 2,
        });
        let parsed = parse(payload).expect("should parse");
        assert_eq!(parsed.event_type, "ncatbot.notice_event");
        assert_eq!(parsed.kind, EventKind::NoticePoke);
    }

    #[test]
    fn message_sent_parses_as_its_own_canonical_type() {
        let payload = serde_json::json!({
            "post_type": "message_sent",
            "message_type": "private",
            "user_id": 1,
        });
        let parsed = parse(payload).expect("should parse");
        assert_eq!(parsed.event_type, "ncatbot.message_sent_event");
        assert_eq!(parsed.kind, EventKind::MessageSentPrivate);
    }

    #[test]
    fn unregistered_sub_key_is_dropped_not_panicking() {
        let payload = serde_json::json!({"post_type": "message", "message_type": "channel"});
        assert!(parse(payload).is_none());
    }
}
