//! The plugin loader (§4.7): manifest discovery, dependency resolution,
//! dynamic-library load/unload, and hot reload, plus the supplemented
//! command/alias registry (`SPEC_FULL.md` §2) that makes reload-idempotence
//! testable.

mod abi;
mod context;
mod dependency;
mod instance;
mod loader;
mod manifest;
mod registry;
mod sanitize;

pub use abi::{Plugin, PluginConstructor, PluginLibrary, PLUGIN_CONSTRUCTOR_SYMBOL};
pub use context::PluginContext;
pub use dependency::resolve_order;
pub use instance::{PluginInstance, PluginState};
pub use loader::PluginLoader;
pub use manifest::{discover, DiscoveredPlugin, PluginManifest};
pub use registry::CommandRegistry;
pub use sanitize::{sanitize_name, unique_sanitized_name};
