//! Command/alias registry (SPEC_FULL §2 supplement): tracks which plugin
//! owns which command name, so unload can remove exactly what load added and
//! a reload lands in the same state a fresh load would.

use std::collections::HashMap;

use dashmap::DashMap;
use ncatbot_common::{Error, Result};

/// One registered command: the plugin that owns it and its aliases.
#[derive(Debug, Clone)]
struct Entry {
    owner: String,
    aliases: Vec<String>,
}

/// Maps command and alias names to the plugin that registered them.
/// Registration is exclusive: a name already owned by another plugin is
/// rejected rather than silently overwritten.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: DashMap<String, Entry>,
    alias_index: DashMap<String, String>,
}

impl CommandRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `command` (with optional `aliases`) as owned by `plugin`.
    /// Errors if the command name or any alias is already taken by a
    /// different plugin.
    pub fn register(&self, plugin: &str, command: &str, aliases: &[String]) -> Result<()> {
        if let Some(existing) = self.commands.get(command) {
            if existing.owner != plugin {
                return Err(Error::Validation(format!(
                    "command {command:?} already registered by plugin {:?}",
                    existing.owner
                )));
            }
        }
        for alias in aliases {
            if let Some(owner) = self.alias_index.get(alias) {
                if owner.as_str() != plugin {
                    return Err(Error::Validation(format!(
                        "alias {alias:?} already registered by plugin {:?}",
                        owner.as_str()
                    )));
                }
            }
        }

        self.commands.insert(
            command.to_string(),
            Entry {
                owner: plugin.to_string(),
                aliases: aliases.to_vec(),
            },
        );
        for alias in aliases {
            self.alias_index.insert(alias.clone(), plugin.to_string());
        }
        Ok(())
    }

    /// Resolve a command or alias name to the plugin that owns it.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<String> {
        if let Some(entry) = self.commands.get(name) {
            return Some(entry.owner.clone());
        }
        self.alias_index.get(name).map(|o| o.clone())
    }

    /// Drop every command and alias owned by `plugin`. Idempotent: calling
    /// this twice, or on a plugin that never registered anything, is a no-op
    /// — required for reload to land in the same state a fresh load would.
    pub fn unregister_plugin(&self, plugin: &str) {
        let owned: Vec<String> = self
            .commands
            .iter()
            .filter(|e| e.value().owner == plugin)
            .map(|e| e.key().clone())
            .collect();

        for command in owned {
            if let Some((_, entry)) = self.commands.remove(&command) {
                for alias in entry.aliases {
                    self.alias_index.remove(&alias);
                }
            }
        }
    }

    /// All command names currently registered, grouped by owning plugin.
    #[must_use]
    pub fn names_by_plugin(&self) -> HashMap<String, Vec<String>> {
        let mut out: HashMap<String, Vec<String>> = HashMap::new();
        for entry in self.commands.iter() {
            out.entry(entry.value().owner.clone()).or_default().push(entry.key().clone());
        }
        for commands in out.values_mut() {
            commands.sort();
        }
        out
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_resolve_command() {
        let registry = CommandRegistry::new();
        registry.register("weather", "forecast", &["fc".to_string()]).unwrap();
        assert_eq!(registry.resolve("forecast").as_deref(), Some("weather"));
        assert_eq!(registry.resolve("fc").as_deref(), Some("weather"));
    }

    #[test]
    fn cross_plugin_collision_is_rejected() {
        let registry = CommandRegistry::new();
        registry.register("weather", "forecast", &[]).unwrap();
        let err = registry.register("other", "forecast", &[]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn same_plugin_reregistering_same_command_is_fine() {
        let registry = CommandRegistry::new();
        registry.register("weather", "forecast", &[]).unwrap();
        registry.register("weather", "forecast", &["fc".to_string()]).unwrap();
        assert_eq!(registry.resolve("fc").as_deref(), Some("weather"));
    }

    #[test]
    fn unregister_plugin_is_idempotent() {
        let registry = CommandRegistry::new();
        registry.register("weather", "forecast", &["fc".to_string()]).unwrap();
        registry.unregister_plugin("weather");
        registry.unregister_plugin("weather");
        assert!(registry.is_empty());
        assert_eq!(registry.resolve("forecast"), None);
        assert_eq!(registry.resolve("fc"), None);
    }

    #[test]
    fn reload_round_trip_restores_identical_state() {
        let registry = CommandRegistry::new();
        registry.register("weather", "forecast", &["fc".to_string()]).unwrap();
        let before = registry.names_by_plugin();

        registry.unregister_plugin("weather");
        registry.register("weather", "forecast", &["fc".to_string()]).unwrap();
        let after = registry.names_by_plugin();

        assert_eq!(before, after);
    }

    #[test]
    fn unrelated_plugin_unaffected_by_unregister() {
        let registry = CommandRegistry::new();
        registry.register("weather", "forecast", &[]).unwrap();
        registry.register("news", "headlines", &[]).unwrap();
        registry.unregister_plugin("weather");
        assert_eq!(registry.resolve("headlines").as_deref(), Some("news"));
    }
}
