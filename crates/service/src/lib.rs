//! Service manager (§4.3): ordered initialization/shutdown and typed
//! access to the kernel's built-in subsystems.

use std::{
    any::Any,
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use tracing::error;

/// Well-known names for the built-in subsystems (§4.3).
pub mod builtin {
    pub const WEBSOCKET: &str = "websocket";
    pub const PREUPLOAD: &str = "preupload";
    pub const MESSAGE_ROUTER: &str = "message_router";
    pub const PLUGIN_CONFIG: &str = "plugin_config";
    pub const FILE_WATCHER: &str = "file_watcher";
    pub const UNIFIED_REGISTRY: &str = "unified_registry";
    pub const RBAC: &str = "rbac";
}

/// A managed subsystem. `on_load`/`on_close` are invoked exactly once, in
/// registration order / reverse registration order respectively (§4.3).
#[async_trait]
pub trait Service: Send + Sync + 'static {
    async fn on_load(&self) -> ncatbot_common::Result<()> {
        Ok(())
    }

    async fn on_close(&self) -> ncatbot_common::Result<()> {
        Ok(())
    }

    /// Object-safe upcast used by [`ServiceManager::get_as`] to recover the
    /// concrete type behind `Arc<dyn Service>`.
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

type Factory = dyn Fn(serde_json::Value) -> ncatbot_common::Result<Arc<dyn Service>> + Send + Sync;

struct Registration {
    factory: Arc<Factory>,
    config: serde_json::Value,
}

#[derive(Default)]
struct Registry {
    by_name: HashMap<String, Registration>,
    order: Vec<String>,
}

/// Owns the class-registration table and the live-instance table (§4.3).
pub struct ServiceManager {
    registry: Mutex<Registry>,
    instances: Mutex<HashMap<String, Arc<dyn Service>>>,
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Register a factory under `name`, re-registering in place if the name
    /// already exists (registration order is preserved on re-registration).
    pub fn register(
        &self,
        name: impl Into<String>,
        config: serde_json::Value,
        factory: impl Fn(serde_json::Value) -> ncatbot_common::Result<Arc<dyn Service>> + Send + Sync + 'static,
    ) {
        let name = name.into();
        let mut registry = self.registry.lock().unwrap_or_else(|p| p.into_inner());
        if !registry.by_name.contains_key(&name) {
            registry.order.push(name.clone());
        }
        registry.by_name.insert(
            name,
            Registration {
                factory: Arc::new(factory),
                config,
            },
        );
    }

    /// Instantiate and run `on_load` for `name`. Idempotent: a second call
    /// returns the already-loaded instance without re-instantiating.
    /// Failure propagates to the caller and leaves no instance registered.
    pub async fn load(&self, name: &str) -> ncatbot_common::Result<Arc<dyn Service>> {
        if let Some(existing) = self.instances.lock().unwrap_or_else(|p| p.into_inner()).get(name) {
            return Ok(existing.clone());
        }

        let registration = {
            let registry = self.registry.lock().unwrap_or_else(|p| p.into_inner());
            let reg = registry
                .by_name
                .get(name)
                .ok_or_else(|| ncatbot_common::Error::message(format!("no service registered under `{name}`")))?;
            (reg.factory.clone(), reg.config.clone())
        };

        let (factory, config) = registration;
        let instance = factory(config)?;
        instance.on_load().await?;

        self.instances
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(name.to_string(), instance.clone());
        Ok(instance)
    }

    /// Run `on_close` for `name` and forget the instance, if loaded.
    pub async fn unload(&self, name: &str) -> ncatbot_common::Result<()> {
        let instance = self.instances.lock().unwrap_or_else(|p| p.into_inner()).remove(name);
        if let Some(instance) = instance {
            instance.on_close().await?;
        }
        Ok(())
    }

    /// Load every registered service, in registration order. Stops and
    /// propagates on the first failure (§4.3).
    pub async fn load_all(&self) -> ncatbot_common::Result<()> {
        let names = self.registry.lock().unwrap_or_else(|p| p.into_inner()).order.clone();
        for name in names {
            self.load(&name).await?;
        }
        Ok(())
    }

    /// Close every loaded service, in reverse registration order. A single
    /// service's close failure is logged and swallowed so the rest still
    /// run (§4.3).
    pub async fn close_all(&self) {
        let names: Vec<String> = self.registry.lock().unwrap_or_else(|p| p.into_inner()).order.clone();
        for name in names.into_iter().rev() {
            if let Err(e) = self.unload(&name).await {
                error!(service = %name, error = %e, "service close failed, continuing shutdown");
            }
        }
    }

    /// Fetch a loaded instance as `Arc<dyn Service>`, without downcasting.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.instances.lock().unwrap_or_else(|p| p.into_inner()).get(name).cloned()
    }

    /// Typed accessor: fetch a loaded instance and downcast to its concrete
    /// type (§4.3 "typed accessors for built-in names").
    #[must_use]
    pub fn get_as<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.get(name)?.as_any_arc().downcast::<T>().ok()
    }
}
