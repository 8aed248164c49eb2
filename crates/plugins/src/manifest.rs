//! Manifest discovery (§4.7): walk the plugin directory, find every
//! subdirectory carrying a `manifest.toml` with the required keys.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use tracing::warn;

/// `manifest.toml` (§6): `name`, `version`, `main` required; `dependencies`
/// optional.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    pub version: String,
    pub main: String,
    #[serde(default)]
    pub dependencies: HashMap<String, String>,
}

/// A manifest plus the directory it was discovered in.
#[derive(Debug, Clone)]
pub struct DiscoveredPlugin {
    pub manifest: PluginManifest,
    pub dir: PathBuf,
}

impl DiscoveredPlugin {
    /// Resolve `main` to an existing compiled plugin library, with or
    /// without its platform extension, relative to the plugin directory
    /// (§4.7, §6). Plugins in this kernel are loaded as dynamic libraries
    /// (`ncatbot-plugins::abi`), not interpreted source, so `main` names the
    /// `cdylib` artifact rather than a `.py`/`.rs` file.
    #[must_use]
    pub fn main_path(&self) -> Option<PathBuf> {
        let candidate = self.dir.join(&self.manifest.main);
        if candidate.is_file() {
            return Some(candidate);
        }
        let with_ext = self.dir.join(format!("{}.{}", self.manifest.main, std::env::consts::DLL_EXTENSION));
        with_ext.is_file().then_some(with_ext)
    }
}

/// Walk `plugin_root`, one level deep, for subdirectories containing a valid
/// `manifest.toml` (§4.7). Duplicate names are rejected: the first wins, the
/// rest are logged and skipped.
#[must_use]
pub fn discover(plugin_root: &Path) -> Vec<DiscoveredPlugin> {
    let mut found = Vec::new();
    let mut seen_names = std::collections::HashSet::new();

    let Ok(entries) = std::fs::read_dir(plugin_root) else {
        warn!(root = %plugin_root.display(), "plugin root does not exist or is not readable");
        return found;
    };

    for entry in entries.flatten() {
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        let manifest_path = dir.join("manifest.toml");
        if !manifest_path.is_file() {
            continue;
        }

        let text = match std::fs::read_to_string(&manifest_path) {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %manifest_path.display(), error = %e, "failed to read manifest.toml");
                continue;
            },
        };

        let manifest: PluginManifest = match toml::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %manifest_path.display(), error = %e, "invalid manifest.toml, skipping");
                continue;
            },
        };

        if !seen_names.insert(manifest.name.clone()) {
            warn!(name = %manifest.name, dir = %dir.display(), "duplicate plugin name, skipping");
            continue;
        }

        let discovered = DiscoveredPlugin { manifest, dir };
        if discovered.main_path().is_none() {
            warn!(
                name = %discovered.manifest.name,
                main = %discovered.manifest.main,
                "manifest's main entry does not resolve to an existing file, skipping"
            );
            continue;
        }

        found.push(discovered);
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dylib_name(stem: &str) -> String {
        format!("{stem}.{}", std::env::consts::DLL_EXTENSION)
    }

    fn write_manifest(dir: &Path, name: &str, main: &str, deps: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(
            dir.join("manifest.toml"),
            format!("name = \"{name}\"\nversion = \"0.1.0\"\nmain = \"{main}\"\n{deps}"),
        )
        .unwrap();
    }

    #[test]
    fn discovers_plugin_with_existing_main() {
        let root = tempfile::tempdir().unwrap();
        let plugin_dir = root.path().join("demo");
        write_manifest(&plugin_dir, "demo", "lib", "");
        std::fs::write(plugin_dir.join(dylib_name("lib")), "").unwrap();

        let found = discover(root.path());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].manifest.name, "demo");
    }

    #[test]
    fn main_without_extension_resolves() {
        let root = tempfile::tempdir().unwrap();
        let plugin_dir = root.path().join("demo");
        write_manifest(&plugin_dir, "demo", "lib", "");
        std::fs::write(plugin_dir.join(dylib_name("lib")), "").unwrap();

        let found = discover(root.path());
        assert_eq!(found[0].main_path(), Some(plugin_dir.join(dylib_name("lib"))));
    }

    #[test]
    fn missing_main_file_is_skipped() {
        let root = tempfile::tempdir().unwrap();
        let plugin_dir = root.path().join("demo");
        write_manifest(&plugin_dir, "demo", "nonexistent", "");

        assert!(discover(root.path()).is_empty());
    }

    #[test]
    fn duplicate_names_keep_first_and_skip_rest() {
        let root = tempfile::tempdir().unwrap();
        for sub in ["a", "b"] {
            let plugin_dir = root.path().join(sub);
            write_manifest(&plugin_dir, "dup", "lib", "");
            std::fs::write(plugin_dir.join(dylib_name("lib")), "").unwrap();
        }

        assert_eq!(discover(root.path()).len(), 1);
    }

    #[test]
    fn dependencies_table_is_parsed() {
        let root = tempfile::tempdir().unwrap();
        let plugin_dir = root.path().join("demo");
        write_manifest(&plugin_dir, "demo", "lib", "[dependencies]\nbase = \">=1.0.0\"\n");
        std::fs::write(plugin_dir.join(dylib_name("lib")), "").unwrap();

        let found = discover(root.path());
        assert_eq!(found[0].manifest.dependencies.get("base"), Some(&">=1.0.0".to_string()));
    }

    #[test]
    fn nonexistent_root_yields_empty() {
        assert!(discover(Path::new("/does/not/exist")).is_empty());
    }
}
