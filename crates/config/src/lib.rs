//! Plugin config store (§4.4): per-plugin declared config items, typed
//! coercion on `set`, dirty-flag-driven whole-document YAML persistence.

mod item;
mod store;

pub use item::{ConfigItem, ConfigValueType, OnChange};
pub use store::PluginConfigStore;
