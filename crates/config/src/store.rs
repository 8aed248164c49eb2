//! The plugin config store (§4.4): two-level value/declaration maps over a
//! single whole-document YAML file, persisted under a `plugin_config` key
//! alongside whatever else lives in the main config document.

use std::{
    any::Any,
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error};

use crate::item::{ConfigItem, ConfigValueType, OnChange};

type PluginValues = HashMap<String, HashMap<String, Value>>;

pub struct PluginConfigStore {
    path: PathBuf,
    values: Mutex<PluginValues>,
    items: Mutex<HashMap<String, HashMap<String, ConfigItem>>>,
    dirty: AtomicBool,
}

impl PluginConfigStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            values: Mutex::new(HashMap::new()),
            items: Mutex::new(HashMap::new()),
            dirty: AtomicBool::new(false),
        }
    }

    /// Declare a config item, seeding the default value if none is stored
    /// yet (§4.4). Errors if `name` was already declared for `plugin` in
    /// this session.
    pub fn register_config(
        &self,
        plugin: &str,
        name: &str,
        default: Value,
        description: impl Into<String>,
        value_type: ConfigValueType,
        metadata: Value,
        on_change: Option<OnChange>,
    ) -> ncatbot_common::Result<()> {
        let mut items = self.items.lock().unwrap_or_else(|p| p.into_inner());
        let plugin_items = items.entry(plugin.to_string()).or_default();
        if plugin_items.contains_key(name) {
            return Err(ncatbot_common::Error::Validation(format!(
                "plugin `{plugin}` already declared config `{name}` this session"
            )));
        }

        let item = ConfigItem {
            plugin_name: plugin.to_string(),
            name: name.to_string(),
            default: default.clone(),
            description: description.into(),
            value_type,
            metadata,
            on_change,
        };
        plugin_items.insert(name.to_string(), item);
        drop(items);

        let mut values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        let plugin_values = values.entry(plugin.to_string()).or_default();
        if !plugin_values.contains_key(name) {
            plugin_values.insert(name.to_string(), default);
            self.dirty.store(true, Ordering::Relaxed);
        }
        Ok(())
    }

    #[must_use]
    pub fn get(&self, plugin: &str, name: &str) -> Option<Value> {
        self.values
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(plugin)
            .and_then(|m| m.get(name))
            .cloned()
    }

    /// Set a value, coercing through the item's declared type and running
    /// `on_change(old, new)` if the value actually changed. Marks dirty but
    /// does not persist (§4.4).
    pub fn set(&self, plugin: &str, name: &str, value: Value) -> ncatbot_common::Result<(Option<Value>, Value)> {
        let item = self
            .items
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(plugin)
            .and_then(|m| m.get(name))
            .cloned();

        let coerced = match &item {
            Some(item) => item.parse_value(&value)?,
            None => value,
        };

        let mut values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        let plugin_values = values.entry(plugin.to_string()).or_default();
        let old = plugin_values.insert(name.to_string(), coerced.clone());
        drop(values);

        if let Some(item) = item {
            if let Some(on_change) = &item.on_change {
                if old.as_ref() != Some(&coerced) {
                    (on_change)(old.as_ref().unwrap_or(&Value::Null), &coerced);
                }
            }
        }

        self.dirty.store(true, Ordering::Relaxed);
        Ok((old, coerced))
    }

    /// `set` followed by an immediate persist (§4.4).
    pub fn set_atomic(&self, plugin: &str, name: &str, value: Value) -> ncatbot_common::Result<(Option<Value>, Value)> {
        let result = self.set(plugin, name, value)?;
        self.schedule_persist();
        Ok(result)
    }

    #[must_use]
    pub fn plugin_config(&self, plugin: &str) -> HashMap<String, Value> {
        self.values.lock().unwrap_or_else(|p| p.into_inner()).get(plugin).cloned().unwrap_or_default()
    }

    pub fn set_plugin_config(&self, plugin: &str, config: HashMap<String, Value>) {
        let mut values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        values.entry(plugin.to_string()).or_default().extend(config);
        drop(values);
        self.dirty.store(true, Ordering::Relaxed);
    }

    /// Remove `plugin`'s config *declarations* so a subsequent load may
    /// freshly declare them, while leaving its stored values untouched
    /// (§4.7 "Unload" step 3: "values survive to preserve operator
    /// settings"; confirmed by the reload-idempotence scenario of §8 — a
    /// value written before unload is still there after the next load).
    pub fn delete_plugin_config(&self, plugin: &str) {
        self.items.lock().unwrap_or_else(|p| p.into_inner()).remove(plugin);
    }

    /// Force a persist even if nothing is dirty (§4.4's `force_save`).
    pub async fn force_save(&self) {
        self.dirty.store(true, Ordering::Relaxed);
        self.schedule_persist();
    }

    pub fn load_from_file(&self) -> ncatbot_common::Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let text = std::fs::read_to_string(&self.path)?;
        let doc: serde_yaml::Value = serde_yaml::from_str(&text).unwrap_or(serde_yaml::Value::Null);
        let loaded: PluginValues = doc
            .get("plugin_config")
            .and_then(|v| serde_yaml::from_value(v.clone()).ok())
            .unwrap_or_default();
        debug!(plugins = loaded.len(), "loaded plugin config from disk");
        *self.values.lock().unwrap_or_else(|p| p.into_inner()) = loaded;
        Ok(())
    }

    fn snapshot(&self) -> PluginValues {
        self.values.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Schedule a persist: onto a background blocking task if a tokio
    /// runtime is currently driving us, synchronously otherwise (§4.4
    /// "Concurrent persistence during active event loop ... in the absence
    /// of a running loop ... a synchronous equivalent is used").
    fn schedule_persist(&self) {
        if !self.dirty.swap(false, Ordering::Relaxed) {
            return;
        }
        let path = self.path.clone();
        let snapshot = self.snapshot();

        if tokio::runtime::Handle::try_current().is_ok() {
            tokio::spawn(async move {
                let result = tokio::task::spawn_blocking(move || persist_to_disk(&path, &snapshot)).await;
                match result {
                    Ok(Err(e)) => error!(error = %e, "failed to save plugin config"),
                    Err(e) => error!(error = %e, "plugin config save task panicked"),
                    Ok(Ok(())) => {},
                }
            });
        } else if let Err(e) = persist_to_disk(&path, &snapshot) {
            error!(error = %e, "failed to save plugin config synchronously");
        }
    }
}

fn persist_to_disk(path: &Path, snapshot: &PluginValues) -> ncatbot_common::Result<()> {
    let mut doc: serde_yaml::Value = if path.exists() {
        serde_yaml::from_str(&std::fs::read_to_string(path)?).unwrap_or(serde_yaml::Value::Null)
    } else {
        serde_yaml::Value::Null
    };
    if !matches!(doc, serde_yaml::Value::Mapping(_)) {
        doc = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
    }
    if let serde_yaml::Value::Mapping(map) = &mut doc {
        map.insert(
            serde_yaml::Value::String("plugin_config".to_string()),
            serde_yaml::to_value(snapshot).map_err(|e| ncatbot_common::Error::message(e.to_string()))?,
        );
    }

    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, serde_yaml::to_string(&doc).map_err(|e| ncatbot_common::Error::message(e.to_string()))?)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[async_trait]
impl ncatbot_service::Service for PluginConfigStore {
    async fn on_load(&self) -> ncatbot_common::Result<()> {
        self.load_from_file()
    }

    async fn on_close(&self) -> ncatbot_common::Result<()> {
        self.dirty.store(true, Ordering::Relaxed);
        let path = self.path.clone();
        let snapshot = self.snapshot();
        persist_to_disk(&path, &snapshot)
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn register_seeds_default_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = PluginConfigStore::new(dir.path().join("config.yaml"));
        store
            .register_config("demo", "greeting", Value::String("hi".into()), "", ConfigValueType::String, Value::Null, None)
            .unwrap();
        assert_eq!(store.get("demo", "greeting"), Some(Value::String("hi".into())));

        let err = store.register_config("demo", "greeting", Value::Null, "", ConfigValueType::String, Value::Null, None);
        assert!(err.is_err());
    }

    #[test]
    fn set_coerces_and_runs_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let store = PluginConfigStore::new(dir.path().join("config.yaml"));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        store
            .register_config(
                "demo",
                "enabled",
                Value::Bool(false),
                "",
                ConfigValueType::Bool,
                Value::Null,
                Some(Arc::new(move |_old, _new| {
                    calls2.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .unwrap();

        let (old, new) = store.set("demo", "enabled", Value::String("yes".into())).unwrap();
        assert_eq!(old, Some(Value::Bool(false)));
        assert_eq!(new, Value::Bool(true));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn persist_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let store = PluginConfigStore::new(&path);
        store
            .register_config("demo", "limit", Value::from(5), "", ConfigValueType::Int, Value::Null, None)
            .unwrap();
        store.set_atomic("demo", "limit", Value::from(9)).unwrap();

        assert!(path.exists());
        let reloaded = PluginConfigStore::new(&path);
        reloaded.load_from_file().unwrap();
        assert_eq!(reloaded.get("demo", "limit"), Some(Value::from(9)));
    }

    #[test]
    fn unload_clears_declaration_but_keeps_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = PluginConfigStore::new(dir.path().join("config.yaml"));
        store
            .register_config("demo", "x", Value::from(1), "", ConfigValueType::Int, Value::Null, None)
            .unwrap();
        store.set("demo", "x", Value::from(7)).unwrap();
        store.delete_plugin_config("demo");

        // Value survives unload (§4.7 "values survive to preserve operator settings")...
        assert_eq!(store.get("demo", "x"), Some(Value::from(7)));
        // ...but the declaration is gone, so re-registering the same name is fine...
        assert!(store
            .register_config("demo", "x", Value::from(2), "", ConfigValueType::Int, Value::Null, None)
            .is_ok());
        // ...and re-declaring does not stomp the surviving value (§8 reload-idempotence).
        assert_eq!(store.get("demo", "x"), Some(Value::from(7)));
    }
}
