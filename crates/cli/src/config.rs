//! Bot configuration: discovery, by-extension parsing, and persistence —
//! the same discover-then-parse-by-extension shape as `moltis-config::
//! loader`, with one simplification: `find_config_file`
//! only searches `./` and an explicit directory (`--config-dir` /
//! `NCATBOT_CONFIG_DIR`), not a platform XDG directory, since that would
//! need the `directories` crate and nothing else in this workspace needs
//! it (`DESIGN.md`).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const CONFIG_FILENAMES: &[&str] = &["ncatbot.toml", "ncatbot.yaml", "ncatbot.yml", "ncatbot.json"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub ws_uri: String,
    pub access_token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ws_uri: "ws://127.0.0.1:3001".to_string(),
            access_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreuploadConfig {
    pub chunk_size: usize,
    pub file_retention_ms: u64,
}

impl Default for PreuploadConfig {
    fn default() -> Self {
        let defaults = ncatbot_preupload::UploadConfig::default();
        Self {
            chunk_size: defaults.chunk_size,
            file_retention_ms: defaults.file_retention_ms,
        }
    }
}

impl From<&PreuploadConfig> for ncatbot_preupload::UploadConfig {
    fn from(cfg: &PreuploadConfig) -> Self {
        Self {
            chunk_size: cfg.chunk_size,
            file_retention_ms: cfg.file_retention_ms,
            ..Self::default()
        }
    }
}

/// The bot's configuration file (§1 of `SPEC_FULL.md`'s ambient stack):
/// gateway connection settings, plugin directory, RBAC state path,
/// pre-upload tuning, and the `plugin_config` section `ncatbot-config`'s
/// store persists into under the same file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NcatbotConfig {
    pub gateway: GatewayConfig,
    pub plugin_dir: PathBuf,
    pub rbac_state_path: PathBuf,
    pub plugin_config_path: PathBuf,
    pub preupload: PreuploadConfig,
    pub debug: bool,
}

impl Default for NcatbotConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            plugin_dir: PathBuf::from("plugins"),
            rbac_state_path: PathBuf::from("rbac_state.json"),
            plugin_config_path: PathBuf::from("ncatbot.toml"),
            preupload: PreuploadConfig::default(),
            debug: false,
        }
    }
}

/// Discover a config file under `explicit_dir` (if given) then `./`, load
/// and parse it by extension. Falls back to defaults if nothing is found or
/// parsing fails — a missing or broken config file must never stop the bot
/// from starting with sane defaults.
#[must_use]
pub fn discover_and_load(explicit_dir: Option<&Path>) -> NcatbotConfig {
    match find_config_file(explicit_dir) {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            match load_config(&path) {
                Ok(config) => config,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                    NcatbotConfig::default()
                },
            }
        },
        None => {
            debug!("no config file found, using defaults");
            NcatbotConfig::default()
        },
    }
}

fn find_config_file(explicit_dir: Option<&Path>) -> Option<PathBuf> {
    if let Some(dir) = explicit_dir {
        for name in CONFIG_FILENAMES {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    for name in CONFIG_FILENAMES {
        let candidate = PathBuf::from(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

pub fn load_config(path: &Path) -> anyhow::Result<NcatbotConfig> {
    let raw = std::fs::read_to_string(path)?;
    parse_config(&raw, path)
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<NcatbotConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        other => anyhow::bail!("unsupported config format: .{other}"),
    }
}

/// Serialize `config` to TOML at `path`, creating parent directories if
/// needed (mirrors `moltis-config::loader::save_config`'s always-TOML
/// output, regardless of what format was loaded).
pub fn save_config(config: &NcatbotConfig, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, toml::to_string_pretty(config)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = discover_and_load(Some(dir.path()));
        assert_eq!(config.gateway.ws_uri, "ws://127.0.0.1:3001");
    }

    #[test]
    fn toml_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ncatbot.toml");
        let mut config = NcatbotConfig::default();
        config.gateway.ws_uri = "ws://example.invalid:1234".to_string();
        save_config(&config, &path).unwrap();

        let reloaded = discover_and_load(Some(dir.path()));
        assert_eq!(reloaded.gateway.ws_uri, "ws://example.invalid:1234");
    }

    #[test]
    fn yaml_extension_is_parsed_as_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ncatbot.yaml");
        std::fs::write(&path, "plugin_dir: custom_plugins\ndebug: true\n").unwrap();

        let config = discover_and_load(Some(dir.path()));
        assert_eq!(config.plugin_dir, PathBuf::from("custom_plugins"));
        assert!(config.debug);
    }

    #[test]
    fn broken_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ncatbot.toml"), "not = [valid").unwrap();

        let config = discover_and_load(Some(dir.path()));
        assert_eq!(config.plugin_dir, PathBuf::from("plugins"));
    }
}
