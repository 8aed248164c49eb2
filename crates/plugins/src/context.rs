//! The registration mixin (§4.7 step 4): the capability object passed to a
//! plugin's `init`/`on_load`/`on_close`, bundling the host subsystems a
//! plugin may touch and recording everything it registers through it so
//! unload can tear down exactly what load added (§4.7 "Unload" step 3).

use std::{
    future::Future,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use ncatbot_common::Result;
use ncatbot_config::{ConfigValueType, OnChange, PluginConfigStore};
use ncatbot_eventbus::{EventBus, Handler, SubscriptionId};
use ncatbot_rbac::RbacEngine;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::registry::CommandRegistry;

pub struct PluginContext {
    plugin_name: String,
    workspace: PathBuf,
    bus: Arc<EventBus>,
    config: Arc<PluginConfigStore>,
    rbac: Arc<RbacEngine>,
    commands: Arc<CommandRegistry>,
    owned_subscriptions: Mutex<Vec<SubscriptionId>>,
    owned_tasks: Mutex<Vec<JoinHandle<()>>>,
    owned_permissions: Mutex<Vec<String>>,
}

impl PluginContext {
    pub(crate) fn new(
        plugin_name: impl Into<String>,
        workspace: PathBuf,
        bus: Arc<EventBus>,
        config: Arc<PluginConfigStore>,
        rbac: Arc<RbacEngine>,
        commands: Arc<CommandRegistry>,
    ) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            workspace,
            bus,
            config,
            rbac,
            commands,
            owned_subscriptions: Mutex::new(Vec::new()),
            owned_tasks: Mutex::new(Vec::new()),
            owned_permissions: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.plugin_name
    }

    #[must_use]
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    #[must_use]
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Subscribe `handler`, owned by this plugin so unload removes it
    /// automatically (§4.7 step 4 "Collect and retain all subscription ids").
    pub fn subscribe(
        &self,
        type_expr: &str,
        handler: Handler,
        priority: i32,
        timeout: Option<Duration>,
    ) -> Result<SubscriptionId> {
        let id = self.bus.subscribe(type_expr, handler, priority, timeout, Some(self.plugin_name.clone()))?;
        self.owned_subscriptions.lock().unwrap_or_else(|p| p.into_inner()).push(id);
        Ok(id)
    }

    /// Register a command (and its aliases) as owned by this plugin.
    pub fn register_command(&self, command: &str, aliases: &[String]) -> Result<()> {
        self.commands.register(&self.plugin_name, command, aliases)
    }

    /// Declare a config item, seeding its default if not already stored.
    #[allow(clippy::too_many_arguments)]
    pub fn register_config(
        &self,
        name: &str,
        default: Value,
        description: impl Into<String>,
        value_type: ConfigValueType,
        metadata: Value,
        on_change: Option<OnChange>,
    ) -> Result<()> {
        self.config.register_config(&self.plugin_name, name, default, description, value_type, metadata, on_change)
    }

    #[must_use]
    pub fn config_value(&self, name: &str) -> Option<Value> {
        self.config.get(&self.plugin_name, name)
    }

    pub fn set_config_value(&self, name: &str, value: Value) -> Result<(Option<Value>, Value)> {
        self.config.set_atomic(&self.plugin_name, name, value)
    }

    /// Declare a permission path as owned by this plugin (§4.5, §4.7).
    pub fn grant_permission(&self, path: &str) -> Result<()> {
        self.rbac.add_permission(path)?;
        self.owned_permissions.lock().unwrap_or_else(|p| p.into_inner()).push(path.to_string());
        Ok(())
    }

    /// Spawn a background task owned by this plugin; unload cancels it
    /// (§4.7 step 4 and "Unload" step 3 "cancel every scheduled task it owns").
    pub fn schedule<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.owned_tasks.lock().unwrap_or_else(|p| p.into_inner()).push(handle);
    }

    /// Unwind everything this plugin registered through the mixin (§4.7
    /// "Unload" step 3). Idempotent: draining an already-empty set is a
    /// no-op, so a second call (or a failed `on_close` followed by a retry)
    /// is harmless.
    pub(crate) fn teardown(&self) {
        for id in std::mem::take(&mut *self.owned_subscriptions.lock().unwrap_or_else(|p| p.into_inner())) {
            self.bus.unsubscribe(id);
        }
        for task in std::mem::take(&mut *self.owned_tasks.lock().unwrap_or_else(|p| p.into_inner())) {
            task.abort();
        }
        for path in std::mem::take(&mut *self.owned_permissions.lock().unwrap_or_else(|p| p.into_inner())) {
            self.rbac.remove_permission(&path);
        }
        self.commands.unregister_plugin(&self.plugin_name);
        self.config.delete_plugin_config(&self.plugin_name);
    }
}
