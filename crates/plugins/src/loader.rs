//! The plugin loader (§4.7): discovery, dependency resolution, load,
//! unload, and hot reload, wired on top of `manifest`/`dependency`/
//! `sanitize`/`registry`/`abi`/`instance`.

use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    sync::{Arc, Mutex},
};

use ncatbot_common::{Error, Result};
use ncatbot_config::PluginConfigStore;
use ncatbot_eventbus::{Event, EventBus};
use ncatbot_protocol::event_types;
use ncatbot_rbac::RbacEngine;
use serde_json::json;
use tracing::{error, info, warn};

use crate::{
    abi::PluginLibrary,
    context::PluginContext,
    dependency::resolve_order,
    instance::{PluginInstance, PluginState},
    manifest::{self, DiscoveredPlugin},
    registry::CommandRegistry,
    sanitize::unique_sanitized_name,
};

/// Discovers, resolves, loads, unloads and hot-reloads plugins under one
/// plugin root directory.
pub struct PluginLoader {
    plugin_root: PathBuf,
    bus: Arc<EventBus>,
    config: Arc<PluginConfigStore>,
    rbac: Arc<RbacEngine>,
    commands: Arc<CommandRegistry>,
    instances: tokio::sync::Mutex<HashMap<String, PluginInstance>>,
    load_order: Mutex<Vec<String>>,
    dir_to_id: Mutex<HashMap<String, String>>,
}

impl PluginLoader {
    #[must_use]
    pub fn new(
        plugin_root: impl Into<PathBuf>,
        bus: Arc<EventBus>,
        config: Arc<PluginConfigStore>,
        rbac: Arc<RbacEngine>,
        commands: Arc<CommandRegistry>,
    ) -> Self {
        Self {
            plugin_root: plugin_root.into(),
            bus,
            config,
            rbac,
            commands,
            instances: tokio::sync::Mutex::new(HashMap::new()),
            load_order: Mutex::new(Vec::new()),
            dir_to_id: Mutex::new(HashMap::new()),
        }
    }

    /// Discover every plugin under the root, resolve load order (§4.7
    /// "Dependency resolution"), and load each in turn (§4.7 "Load"). Stops
    /// and propagates on the first failure, leaving whatever already loaded
    /// in place — the caller decides whether to unload those too.
    pub async fn load_all(&self) -> Result<()> {
        let discovered = manifest::discover(&self.plugin_root);
        let order = resolve_order(&discovered)?;
        let by_name: HashMap<String, DiscoveredPlugin> =
            discovered.into_iter().map(|p| (p.manifest.name.clone(), p)).collect();

        let mut taken: HashSet<String> = self.load_order.lock().unwrap_or_else(|p| p.into_inner()).iter().cloned().collect();
        let mut ids = HashMap::new();
        for name in &order {
            ids.insert(name.clone(), unique_sanitized_name(name, &mut taken));
        }

        for name in &order {
            let Some(discovered) = by_name.get(name) else {
                warn!(plugin = %name, "plugin missing from discovery set after resolution, skipping");
                continue;
            };
            let Some(id) = ids.get(name) else { continue };

            if let Some(dir_name) = discovered.dir.file_name() {
                self.dir_to_id
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .insert(dir_name.to_string_lossy().to_string(), id.clone());
            }

            self.load_one(discovered, id).await?;
        }
        Ok(())
    }

    /// Load a single discovered plugin under `id` (§4.7 "Load" steps 1-5,
    /// minus the module-search-path bookkeeping that only applies to an
    /// interpreted loader — this kernel's plugins are `cdylib`s, see
    /// `crate::abi`).
    async fn load_one(&self, discovered: &DiscoveredPlugin, id: &str) -> Result<()> {
        let mut instance =
            PluginInstance::discovered(&discovered.manifest.name, &discovered.manifest.version, discovered.dir.clone());
        instance.state = PluginState::Resolved;

        let Some(main_path) = discovered.main_path() else {
            instance.state = PluginState::Failed("main entry does not resolve to an existing file".to_string());
            self.instances.lock().await.insert(id.to_string(), instance);
            return Err(Error::plugin_load(id, ncatbot_common::Error::Validation("main entry not found".to_string())));
        };

        match self.construct_and_run(&mut instance, id, &main_path).await {
            Ok(()) => {
                self.load_order.lock().unwrap_or_else(|p| p.into_inner()).push(id.to_string());
                info!(plugin = %id, "plugin loaded");
                self.instances.lock().await.insert(id.to_string(), instance);
                Ok(())
            },
            Err(e) => {
                error!(plugin = %id, error = %e, "plugin load failed");
                instance.state = PluginState::Failed(e.to_string());
                self.instances.lock().await.insert(id.to_string(), instance);
                Err(e)
            },
        }
    }

    async fn construct_and_run(&self, instance: &mut PluginInstance, id: &str, main_path: &std::path::Path) -> Result<()> {
        let library = PluginLibrary::load(main_path).map_err(|e| Error::plugin_load(id, e))?;
        let mut plugin = library.construct().map_err(|e| Error::plugin_load(id, e))?;
        let context = PluginContext::new(
            id,
            instance.dir.clone(),
            self.bus.clone(),
            self.config.clone(),
            self.rbac.clone(),
            self.commands.clone(),
        );

        plugin.init(&context);
        instance.attach(library, plugin, context);

        if let (Some(plugin), Some(context)) = (instance.plugin.as_mut(), instance.context.as_ref()) {
            if let Err(e) = plugin.on_load(context).await {
                instance.release();
                return Err(Error::plugin_load(id, e));
            }
        }
        instance.state = PluginState::Loaded;

        let mut event = Event::new(event_types::PLUGIN_LOAD, json!({ "plugin": id }));
        self.bus.publish(&mut event).await;
        Ok(())
    }

    /// Unload `id` (§4.7 "Unload"): publish the lifecycle event, call async
    /// `on_close`, then tear down everything the registration mixin
    /// recorded. A plugin not currently loaded is a no-op, not an error —
    /// unload must be safe to call speculatively from the hot-reload path.
    pub async fn unload(&self, id: &str) -> Result<()> {
        let mut instances = self.instances.lock().await;
        let Some(instance) = instances.get_mut(id) else {
            return Ok(());
        };
        if !matches!(instance.state, PluginState::Loaded | PluginState::Failed(_)) {
            return Ok(());
        }
        instance.state = PluginState::Closing;
        drop(instances);

        let mut event = Event::new(event_types::PLUGIN_UNLOAD, json!({ "plugin": id }));
        self.bus.publish(&mut event).await;

        let mut instances = self.instances.lock().await;
        let Some(instance) = instances.get_mut(id) else {
            return Ok(());
        };

        let close_result = if let (Some(plugin), Some(context)) = (instance.plugin.as_mut(), instance.context.as_ref()) {
            plugin.on_close(context).await
        } else {
            Ok(())
        };
        if let Err(e) = &close_result {
            error!(plugin = %id, error = %e, "plugin on_close failed, unloading anyway");
        }

        instance.release();
        instance.state = PluginState::Unloaded;
        self.load_order.lock().unwrap_or_else(|p| p.into_inner()).retain(|n| n != id);
        info!(plugin = %id, "plugin unloaded");
        Ok(())
    }

    /// Unload every currently-loaded plugin, in reverse load order (§4.7
    /// "Unload" — "reverse the order within the dependency closure").
    pub async fn unload_all(&self) {
        let order: Vec<String> = self.load_order.lock().unwrap_or_else(|p| p.into_inner()).clone();
        for id in order.into_iter().rev() {
            if let Err(e) = self.unload(&id).await {
                error!(plugin = %id, error = %e, "plugin unload failed during shutdown, continuing");
            }
        }
    }

    /// Hot reload (§4.7 "Hot reload"): map a watched directory name back to
    /// a plugin id, then unload followed by a fresh discover-and-load of
    /// just that plugin. Returns `false` on failure — the file watcher logs
    /// that and keeps running, per `ncatbot-watcher`'s contract.
    pub async fn reload_dir(&self, dir_name: &str) -> bool {
        let Some(id) = self.dir_to_id.lock().unwrap_or_else(|p| p.into_inner()).get(dir_name).cloned() else {
            warn!(dir = %dir_name, "hot reload: no plugin known for this directory");
            return false;
        };

        if let Err(e) = self.unload(&id).await {
            error!(plugin = %id, error = %e, "hot reload: unload failed");
            return false;
        }

        let discovered = manifest::discover(&self.plugin_root);
        let Some(found) = discovered.into_iter().find(|p| p.dir.file_name().map(|n| n.to_string_lossy().to_string()) == Some(dir_name.to_string())) else {
            warn!(dir = %dir_name, "hot reload: plugin no longer discoverable, leaving unloaded");
            return true;
        };

        match self.load_one(&found, &id).await {
            Ok(()) => true,
            Err(e) => {
                error!(plugin = %id, error = %e, "hot reload: reload failed");
                false
            },
        }
    }

    /// Snapshot of each plugin's current state, keyed by its sanitized id,
    /// for introspection (e.g. a `plugins list` CLI subcommand).
    pub async fn states(&self) -> HashMap<String, String> {
        self.instances.lock().await.iter().map(|(id, inst)| (id.clone(), inst.state.to_string())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &std::path::Path) -> Arc<PluginConfigStore> {
        Arc::new(PluginConfigStore::new(dir.join("config.yaml")))
    }

    fn write_dylib_stub(dir: &std::path::Path, name: &str, main: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join("manifest.toml"), format!("name = \"{name}\"\nversion = \"0.1.0\"\nmain = \"{main}\"\n")).unwrap();
        std::fs::write(dir.join(format!("{main}.{}", std::env::consts::DLL_EXTENSION)), b"not actually a shared library").unwrap();
    }

    #[tokio::test]
    async fn load_all_on_empty_root_succeeds() {
        let root = tempfile::tempdir().unwrap();
        let loader = PluginLoader::new(
            root.path(),
            Arc::new(EventBus::default()),
            store(root.path()),
            Arc::new(RbacEngine::new("user")),
            Arc::new(CommandRegistry::new()),
        );
        assert!(loader.load_all().await.is_ok());
        assert!(loader.states().await.is_empty());
    }

    #[tokio::test]
    async fn load_one_on_unloadable_dylib_records_failed_state() {
        let root = tempfile::tempdir().unwrap();
        write_dylib_stub(&root.path().join("demo"), "demo", "lib");

        let loader = PluginLoader::new(
            root.path(),
            Arc::new(EventBus::default()),
            store(root.path()),
            Arc::new(RbacEngine::new("user")),
            Arc::new(CommandRegistry::new()),
        );

        assert!(loader.load_all().await.is_err());
        let states = loader.states().await;
        assert_eq!(states.get("demo").map(|s| s.starts_with("failed")), Some(true));
    }

    #[tokio::test]
    async fn unload_on_never_loaded_plugin_is_a_no_op() {
        let root = tempfile::tempdir().unwrap();
        let loader = PluginLoader::new(
            root.path(),
            Arc::new(EventBus::default()),
            store(root.path()),
            Arc::new(RbacEngine::new("user")),
            Arc::new(CommandRegistry::new()),
        );
        assert!(loader.unload("nope").await.is_ok());
    }

    #[tokio::test]
    async fn reload_dir_with_unknown_directory_returns_false() {
        let root = tempfile::tempdir().unwrap();
        let loader = PluginLoader::new(
            root.path(),
            Arc::new(EventBus::default()),
            store(root.path()),
            Arc::new(RbacEngine::new("user")),
            Arc::new(CommandRegistry::new()),
        );
        assert!(!loader.reload_dir("unknown").await);
    }
}
