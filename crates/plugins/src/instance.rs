//! Per-plugin bookkeeping and the load/unload state machine (§4.7 "State
//! machine per plugin").

use std::path::PathBuf;

use crate::{
    abi::{Plugin, PluginLibrary},
    context::PluginContext,
};

/// `unknown → discovered → resolved → instantiated → loaded (running) →
/// closing → unloaded`, with `failed` terminal from any post-resolved state
/// on error (§4.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginState {
    Discovered,
    Resolved,
    Instantiated,
    Loaded,
    Closing,
    Unloaded,
    Failed(String),
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discovered => write!(f, "discovered"),
            Self::Resolved => write!(f, "resolved"),
            Self::Instantiated => write!(f, "instantiated"),
            Self::Loaded => write!(f, "loaded"),
            Self::Closing => write!(f, "closing"),
            Self::Unloaded => write!(f, "unloaded"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// One loaded plugin: its manifest identity, its dylib and constructed
/// trait object, its registration-mixin context, and its current lifecycle
/// state.
///
/// Field order matters here: `plugin` must drop before `library` (Rust
/// drops struct fields top to bottom), since the trait object's vtable
/// lives inside the mapped library.
pub struct PluginInstance {
    pub name: String,
    pub version: String,
    pub dir: PathBuf,
    pub state: PluginState,
    pub(crate) plugin: Option<Box<dyn Plugin>>,
    pub(crate) context: Option<PluginContext>,
    library: Option<PluginLibrary>,
}

impl PluginInstance {
    #[must_use]
    pub fn discovered(name: impl Into<String>, version: impl Into<String>, dir: PathBuf) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            dir,
            state: PluginState::Discovered,
            plugin: None,
            context: None,
            library: None,
        }
    }

    pub(crate) fn attach(&mut self, library: PluginLibrary, plugin: Box<dyn Plugin>, context: PluginContext) {
        self.library = Some(library);
        self.plugin = Some(plugin);
        self.context = Some(context);
        self.state = PluginState::Instantiated;
    }

    /// Run the registration mixin's teardown and drop the plugin object and
    /// its backing library, returning this instance to an unloaded shell
    /// that `PluginLoader::load_one` can re-attach to on the next load.
    pub(crate) fn release(&mut self) {
        if let Some(context) = &self.context {
            context.teardown();
        }
        self.plugin = None;
        self.context = None;
        self.library = None;
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == PluginState::Loaded
    }
}
