//! Lifecycle manager (§4.3, `SPEC_FULL.md` §2 "Lifecycle background/
//! foreground split"): startup order, background run, graceful shutdown.
//! Wires every crate in the workspace together exactly once, mirroring the
//! construction order `lifecycle.py` uses — services before the plugin
//! loader, the plugin loader before the gateway connects, the watcher last.

use std::sync::Arc;

use async_trait::async_trait;
use ncatbot_api::Api;
use ncatbot_config::PluginConfigStore;
use ncatbot_eventbus::EventBus;
use ncatbot_events::EventDispatcher;
use ncatbot_plugins::{CommandRegistry, PluginLoader};
use ncatbot_preupload::{PreuploadService, UploadConfig};
use ncatbot_rbac::RbacEngine;
use ncatbot_router::{EventSink, MessageRouter, RouterConfig};
use ncatbot_service::{builtin, ServiceManager};
use ncatbot_watcher::FileWatcher;
use tracing::{error, info};

use crate::config::NcatbotConfig;

/// Forwards raw gateway event payloads from the router to the dispatcher.
/// A separate type (rather than implementing `EventSink` on `EventDispatcher`
/// directly) because the router must be constructed before the `Api` that
/// wraps it, and the dispatcher needs that `Api` — this breaks the cycle by
/// filling the dispatcher in after both exist.
struct DispatchSink {
    dispatcher: std::sync::OnceLock<Arc<EventDispatcher<Api>>>,
}

impl DispatchSink {
    fn new() -> Self {
        Self {
            dispatcher: std::sync::OnceLock::new(),
        }
    }

    fn attach(&self, dispatcher: Arc<EventDispatcher<Api>>) {
        let _ = self.dispatcher.set(dispatcher);
    }
}

#[async_trait]
impl EventSink for DispatchSink {
    async fn handle_event(&self, payload: serde_json::Value) {
        if let Some(dispatcher) = self.dispatcher.get() {
            dispatcher.dispatch(payload).await;
        }
    }
}

/// Every subsystem the kernel owns, wired together once at construction.
pub struct Lifecycle {
    config: NcatbotConfig,
    bus: Arc<EventBus>,
    router: Arc<MessageRouter>,
    dispatcher: Arc<EventDispatcher<Api>>,
    services: Arc<ServiceManager>,
    rbac: Arc<RbacEngine>,
    plugin_config: Arc<PluginConfigStore>,
    commands: Arc<CommandRegistry>,
    loader: Arc<PluginLoader>,
    watcher: Arc<FileWatcher>,
}

impl Lifecycle {
    #[must_use]
    pub fn new(config: NcatbotConfig) -> Self {
        let bus = Arc::new(EventBus::default());

        let sink = Arc::new(DispatchSink::new());
        let mut router_config = RouterConfig::new(config.gateway.ws_uri.clone());
        router_config.access_token = config.gateway.access_token.clone();
        let router = Arc::new(MessageRouter::new(router_config, sink.clone()));

        let api = Arc::new(Api::new(router.clone()));
        let dispatcher = Arc::new(EventDispatcher::new(bus.clone(), api.clone()));
        sink.attach(dispatcher.clone());

        let rbac = Arc::new(RbacEngine::new("user"));
        let plugin_config = Arc::new(PluginConfigStore::new(config.plugin_config_path.clone()));
        let commands = Arc::new(CommandRegistry::new());

        let loader = Arc::new(PluginLoader::new(
            config.plugin_dir.clone(),
            bus.clone(),
            plugin_config.clone(),
            rbac.clone(),
            commands.clone(),
        ));

        let watcher = Arc::new(FileWatcher::new(config.debug));
        watcher.add_watch_dir(&config.plugin_dir);
        {
            let loader = loader.clone();
            watcher.set_reload_callback(Arc::new(move |dir_name: String| {
                let loader = loader.clone();
                Box::pin(async move { loader.reload_dir(&dir_name).await })
            }));
        }

        let preupload = Arc::new(PreuploadService::new(api.clone(), UploadConfig::from(&config.preupload)));
        let services = Arc::new(ServiceManager::new());
        {
            let plugin_config = plugin_config.clone();
            services.register(builtin::PLUGIN_CONFIG, serde_json::Value::Null, move |_cfg| Ok(plugin_config.clone() as Arc<dyn ncatbot_service::Service>));
        }
        {
            let preupload = preupload.clone();
            services.register(builtin::PREUPLOAD, serde_json::Value::Null, move |_cfg| Ok(preupload.clone() as Arc<dyn ncatbot_service::Service>));
        }

        Self {
            config,
            bus,
            router,
            dispatcher,
            services,
            rbac,
            plugin_config,
            commands,
            loader,
            watcher,
        }
    }

    #[must_use]
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    #[must_use]
    pub fn rbac(&self) -> &Arc<RbacEngine> {
        &self.rbac
    }

    #[must_use]
    pub fn plugin_loader(&self) -> &Arc<PluginLoader> {
        &self.loader
    }

    #[must_use]
    pub fn commands(&self) -> &Arc<CommandRegistry> {
        &self.commands
    }

    /// Load persisted RBAC state from disk without starting services or
    /// plugins — used by CLI subcommands that only inspect permissions.
    pub fn restore_rbac(&self) {
        self.restore_rbac_state();
    }

    /// Non-blocking startup (`lifecycle.py`'s `run_backend_async`): load the
    /// service-managed subsystems, discover and load plugins, connect to the
    /// gateway, start the file watcher — then return. Returns once the API
    /// is usable; the gateway connection and listen loop continue running in
    /// the background regardless of whether the handshake has completed yet.
    pub async fn spawn(&self) -> ncatbot_common::Result<()> {
        self.restore_rbac_state();
        self.services.load_all().await?;

        if let Err(e) = self.loader.load_all().await {
            error!(error = %e, "one or more plugins failed to load during startup");
        }

        self.router.connect();
        self.watcher.start()?;

        info!("ncatbot startup complete");
        Ok(())
    }

    /// Blocking startup (`lifecycle.py`'s `run`, CLI foreground mode):
    /// `spawn`, then wait for Ctrl-C, then `shutdown`.
    pub async fn run(&self) -> ncatbot_common::Result<()> {
        self.spawn().await?;
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        self.shutdown().await;
        Ok(())
    }

    /// Cooperative shutdown, reverse of startup order: watcher, plugins,
    /// gateway, services, then persist RBAC state.
    pub async fn shutdown(&self) {
        self.watcher.stop();
        self.loader.unload_all().await;
        self.router.shutdown().await;
        self.services.close_all().await;
        self.persist_rbac_state();
    }

    fn restore_rbac_state(&self) {
        let path = &self.config.rbac_state_path;
        if !path.exists() {
            return;
        }
        match std::fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(state) => self.rbac.restore(state),
                Err(e) => error!(path = %path.display(), error = %e, "failed to parse RBAC state, starting empty"),
            },
            Err(e) => error!(path = %path.display(), error = %e, "failed to read RBAC state, starting empty"),
        }
    }

    fn persist_rbac_state(&self) {
        let path = &self.config.rbac_state_path;
        let state = self.rbac.save();
        match serde_json::to_string_pretty(&state) {
            Ok(text) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        let _ = std::fs::create_dir_all(parent);
                    }
                }
                if let Err(e) = std::fs::write(path, text) {
                    error!(path = %path.display(), error = %e, "failed to persist RBAC state");
                }
            },
            Err(e) => error!(error = %e, "failed to serialize RBAC state"),
        }
    }
}
