//! Config item declarations and value coercion (§4.4).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The supported config value types (§4.4 "Typed: string | int | float |
/// bool | list | dict").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigValueType {
    String,
    Int,
    Float,
    Bool,
    List,
    Dict,
}

impl ConfigValueType {
    /// Coerce an incoming `set` value to this item's declared type. Mirrors
    /// the upstream `ConfigItem.parse_value` rules: containers accept a
    /// same-shaped value or a JSON string that parses to one, `bool` accepts
    /// common truthy/falsy string spellings, everything else goes through a
    /// direct numeric/string conversion.
    pub fn coerce(self, value: &Value) -> ncatbot_common::Result<Value> {
        match self {
            Self::List => coerce_container(value, Value::is_array),
            Self::Dict => coerce_container(value, Value::is_object),
            Self::Bool => coerce_bool(value),
            Self::String => Ok(Value::String(display_value(value))),
            Self::Int => coerce_number(value, true),
            Self::Float => coerce_number(value, false),
        }
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn coerce_container(value: &Value, matches: fn(&Value) -> bool) -> ncatbot_common::Result<Value> {
    if matches(value) {
        return Ok(value.clone());
    }
    if let Value::String(s) = value {
        if let Ok(parsed) = serde_json::from_str::<Value>(s) {
            if matches(&parsed) {
                return Ok(parsed);
            }
        }
    }
    Err(ncatbot_common::Error::Validation(format!("cannot convert {value:?} to a container value")))
}

fn coerce_bool(value: &Value) -> ncatbot_common::Result<Value> {
    match value {
        Value::Bool(_) => Ok(value.clone()),
        Value::String(s) => match s.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
            "false" | "0" | "no" | "off" => Ok(Value::Bool(false)),
            _ => Err(ncatbot_common::Error::Validation(format!("invalid boolean value: {s}"))),
        },
        _ => Err(ncatbot_common::Error::Validation(format!("invalid boolean value: {value:?}"))),
    }
}

fn coerce_number(value: &Value, as_int: bool) -> ncatbot_common::Result<Value> {
    let parsed: f64 = match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| ncatbot_common::Error::Validation("not a finite number".into()))?,
        Value::String(s) => s
            .parse()
            .map_err(|_| ncatbot_common::Error::Validation(format!("cannot parse `{s}` as a number")))?,
        _ => return Err(ncatbot_common::Error::Validation(format!("cannot convert {value:?} to a number"))),
    };
    if as_int {
        #[allow(clippy::cast_possible_truncation)]
        Ok(Value::from(parsed as i64))
    } else {
        Ok(serde_json::Number::from_f64(parsed).map(Value::Number).unwrap_or(Value::Null))
    }
}

/// Callback invoked after a successful `set`, with the old and new value.
pub type OnChange = Arc<dyn Fn(&Value, &Value) + Send + Sync>;

/// The declaration half of a registered config item (§4.4).
#[derive(Clone)]
pub struct ConfigItem {
    pub plugin_name: String,
    pub name: String,
    pub default: Value,
    pub description: String,
    pub value_type: ConfigValueType,
    pub metadata: Value,
    pub on_change: Option<OnChange>,
}

impl ConfigItem {
    pub fn parse_value(&self, value: &Value) -> ncatbot_common::Result<Value> {
        self.value_type.coerce(value)
    }
}
