//! Dynamic plugin ABI (§4.7): plugins compile to a `cdylib` exporting one
//! constructor symbol. Loading that library and calling its constructor is
//! the one place in this workspace where `unsafe` is unavoidable — see this
//! crate's `Cargo.toml` for the scoped lint override and `DESIGN.md` for why.
//!
//! This is a first-party plugin model, not a stable-ABI one: plugin dylibs
//! are assumed to be built by the same toolchain and Rust version as the
//! host (the hot-reload controller reacts to a rebuilt artifact appearing
//! on disk, not to a foreign compiler's output). The constructor therefore
//! returns a `Box<dyn Plugin>` directly rather than crossing an
//! `extern "C"` boundary with a `#[repr(C)]` vtable — that indirection earns
//! its keep when the caller and the plugin might be different languages or
//! compiler versions; here it would only add a layer of pointer-juggling
//! with no corresponding safety gain.

use std::path::Path;

use async_trait::async_trait;
use libloading::{Library, Symbol};

use crate::context::PluginContext;

/// The symbol every plugin `cdylib` must export via
/// `#[unsafe(no_mangle)] pub unsafe fn ncatbot_plugin_create() -> Box<dyn Plugin>`.
pub const PLUGIN_CONSTRUCTOR_SYMBOL: &[u8] = b"ncatbot_plugin_create";

/// Signature of the exported constructor symbol.
pub type PluginConstructor = unsafe fn() -> Box<dyn Plugin>;

/// The framework's plugin base (§4.7 "the concrete plugin class ... subclass
/// of the framework's plugin base"). `init` is the plugin's synchronous
/// initializer, run immediately after construction; `on_load`/`on_close` are
/// the async lifecycle hooks the loader awaits during load and unload.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Synchronous initializer, called once right after construction and
    /// before `on_load` (§4.7 step 4).
    fn init(&mut self, _ctx: &PluginContext) {}

    async fn on_load(&mut self, ctx: &PluginContext) -> ncatbot_common::Result<()>;

    async fn on_close(&mut self, _ctx: &PluginContext) -> ncatbot_common::Result<()> {
        Ok(())
    }
}

/// A mapped plugin dylib, kept alive for as long as the `Plugin` it
/// constructed is alive — dropping the library while the trait object's
/// vtable is still in use would be undefined behavior, so callers must keep
/// both together (`PluginInstance` does this by field order).
pub struct PluginLibrary {
    library: Library,
}

impl PluginLibrary {
    /// Map `path` into the process.
    ///
    /// # Safety-adjacent note
    /// This does not itself require an `unsafe` call site, but
    /// `libloading::Library::new` runs the target's static initializers
    /// unconditionally — callers must only ever point this at a `cdylib`
    /// built against this crate's `Plugin` trait, never at an arbitrary
    /// shared library.
    pub fn load(path: &Path) -> ncatbot_common::Result<Self> {
        // SAFETY: see the module- and function-level notes above; the
        // caller contract is "this path names a plugin cdylib built by us".
        let library = unsafe { Library::new(path) }.map_err(ncatbot_common::Error::other)?;
        Ok(Self { library })
    }

    /// Look up the exported constructor and call it.
    ///
    /// # Safety-adjacent note
    /// `libloading` cannot verify that the symbol it hands back actually has
    /// [`PluginConstructor`]'s signature — a plugin built against a
    /// different version of this crate's `Plugin` trait is undefined
    /// behavior, not a caught error. Matching versions are the caller's
    /// responsibility (in practice: rebuild plugins whenever the host
    /// rebuilds, which is exactly what the hot-reload path does).
    pub fn construct(&self) -> ncatbot_common::Result<Box<dyn Plugin>> {
        // SAFETY: symbol name and signature are the plugin cdylib's half of
        // the contract documented above.
        unsafe {
            let ctor: Symbol<PluginConstructor> =
                self.library.get(PLUGIN_CONSTRUCTOR_SYMBOL).map_err(ncatbot_common::Error::other)?;
            Ok(ctor())
        }
    }
}
