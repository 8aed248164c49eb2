//! Shared error type and small cross-crate helpers for the ncatbot kernel.

use std::error::Error as StdError;

/// The error taxonomy of §7, flattened into one enum so every crate in the
/// workspace can propagate through `?` without a pile of `From` impls at
/// each boundary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("gateway returned status=failed (retcode={retcode}): {message}")]
    Api { retcode: i64, message: String },

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("connection lost")]
    ConnectionLost,

    #[error("dependency cycle involving: {0:?}")]
    DependencyCycle(Vec<String>),

    #[error("unsatisfied dependency: {plugin} requires {dependency} {constraint}")]
    UnsatisfiedDependency {
        plugin: String,
        dependency: String,
        constraint: String,
    },

    #[error("failed to load plugin {plugin}: {source}")]
    PluginLoad {
        plugin: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("invalid permission path: {0}")]
    InvalidPermissionPath(String),

    #[error("circular role inheritance involving {0}")]
    CircularInheritance(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("internal error")]
    Other {
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn message(message: impl std::fmt::Display) -> Self {
        Self::Message(message.to_string())
    }

    #[must_use]
    pub fn other(source: impl StdError + Send + Sync + 'static) -> Self {
        Self::Other {
            source: Box::new(source),
        }
    }

    #[must_use]
    pub fn plugin_load(plugin: impl Into<String>, source: impl StdError + Send + Sync + 'static) -> Self {
        Self::PluginLoad {
            plugin: plugin.into(),
            source: Box::new(source),
        }
    }
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

impl From<&str> for Error {
    fn from(value: &str) -> Self {
        Self::Message(value.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Coerce a gateway identifier field (`user_id`, `group_id`, `message_id`,
/// `operator_id`, `target_id`, `self_id`, …) to a string regardless of
/// whether the wire payload carried it as an integer or a string (§3, §6).
#[must_use]
pub fn normalize_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Walk a JSON object in place, normalizing every key in `fields` found at
/// the top level to a string. Missing keys are left absent.
pub fn normalize_id_fields(value: &mut serde_json::Value, fields: &[&str]) {
    let Some(obj) = value.as_object_mut() else {
        return;
    };
    for field in fields {
        if let Some(v) = obj.get(*field) {
            if let Some(normalized) = normalize_id(v) {
                obj.insert((*field).to_string(), serde_json::Value::String(normalized));
            }
        }
    }
}

/// Standard gateway identifier fields normalized on every parsed event (§3, §6).
pub const ID_FIELDS: &[&str] = &[
    "user_id",
    "group_id",
    "message_id",
    "operator_id",
    "target_id",
    "self_id",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_integer_id() {
        let v = serde_json::json!(123456);
        assert_eq!(normalize_id(&v), Some("123456".to_string()));
    }

    #[test]
    fn normalizes_string_id_unchanged() {
        let v = serde_json::json!("123456");
        assert_eq!(normalize_id(&v), Some("123456".to_string()));
    }

    #[test]
    fn normalize_fields_coerces_integers_in_place() {
        let mut payload = serde_json::json!({
            "user_id": 111,
            "group_id": "222",
            "other": "untouched",
        });
        normalize_id_fields(&mut payload, ID_FIELDS);
        assert_eq!(payload["user_id"], serde_json::json!("111"));
        assert_eq!(payload["group_id"], serde_json::json!("222"));
        assert_eq!(payload["other"], serde_json::json!("untouched"));
    }
}
