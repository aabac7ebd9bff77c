//! Configuration loader with tier-based merging.

use super::types::Config;
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Configuration tier priority (lowest to highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigTier {
    Defaults = 0,
    Project = 1,
    User = 2,
    Environment = 3,
}

impl std::fmt::Display for ConfigTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigTier::Defaults => write!(f, "defaults"),
            ConfigTier::Project => write!(f, "project"),
            ConfigTier::User => write!(f, "user"),
            ConfigTier::Environment => write!(f, "environment"),
        }
    }
}

/// Directories searched for `config.yaml`.
#[derive(Debug, Clone, Default)]
pub struct ConfigPaths {
    pub project_dir: Option<PathBuf>,
    pub user_dir: Option<PathBuf>,
}

impl ConfigPaths {
    /// Discover directories from the environment and home directory.
    pub fn discover() -> Self {
        let project_dir = std::env::var("SWARM_PROJECT_DIR")
            .ok()
            .map(PathBuf::from)
            .or_else(|| Some(PathBuf::from(".swarm")));

        let user_dir = std::env::var("SWARM_USER_DIR")
            .ok()
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".swarm-coord")));

        Self {
            project_dir,
            user_dir,
        }
    }
}

/// Loaded configuration plus where it came from.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    pub paths: ConfigPaths,
    config: Config,
    /// Highest tier file that contributed, if any.
    source: Option<(ConfigTier, PathBuf)>,
}

impl ConfigLoader {
    /// Load from all tiers. `SWARM_CONFIG_PATH` names one explicit file instead.
    pub fn load() -> Result<Self> {
        if let Ok(explicit) = std::env::var("SWARM_CONFIG_PATH") {
            return Self::load_file(Path::new(&explicit));
        }
        Self::load_with_paths(ConfigPaths::discover())
    }

    /// Load a single explicit file on top of defaults, then apply env overrides.
    pub fn load_file(path: &Path) -> Result<Self> {
        let overlay = read_yaml(path)?
            .with_context(|| format!("config file {} not found", path.display()))?;
        let mut merged = serde_json::to_value(Config::default())?;
        deep_merge(&mut merged, overlay);

        let mut config: Config = serde_json::from_value(merged)
            .with_context(|| format!("invalid config in {}", path.display()))?;
        apply_env_overrides(&mut config);

        Ok(Self {
            paths: ConfigPaths::default(),
            config,
            source: Some((ConfigTier::Project, path.to_path_buf())),
        })
    }

    /// Load with explicit tier directories.
    pub fn load_with_paths(paths: ConfigPaths) -> Result<Self> {
        let mut merged = serde_json::to_value(Config::default())?;
        let mut source = None;

        let tiers = [
            (ConfigTier::Project, paths.project_dir.as_ref()),
            (ConfigTier::User, paths.user_dir.as_ref()),
        ];
        for (tier, dir) in tiers {
            let Some(dir) = dir else { continue };
            let file = dir.join("config.yaml");
            match read_yaml(&file) {
                Ok(Some(overlay)) => {
                    debug!(tier = %tier, path = %file.display(), "Merging config tier");
                    deep_merge(&mut merged, overlay);
                    source = Some((tier, file));
                }
                Ok(None) => {}
                Err(err) => warn!(tier = %tier, error = %err, "Skipping unreadable config"),
            }
        }

        let mut config: Config =
            serde_json::from_value(merged).context("invalid merged configuration")?;
        apply_env_overrides(&mut config);

        Ok(Self {
            paths,
            config,
            source,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn into_config(self) -> Config {
        self.config
    }

    /// The highest-priority config file that was applied.
    pub fn source(&self) -> Option<(ConfigTier, &Path)> {
        self.source.as_ref().map(|(tier, p)| (*tier, p.as_path()))
    }
}

/// Parse a YAML file into a JSON value; `Ok(None)` when the file is absent.
fn read_yaml(path: &Path) -> Result<Option<Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("failed to read {}", path.display())),
    };
    let value: Value = serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(value))
}

/// Merge `overlay` into `base` field by field.
///
/// Objects merge recursively, null keeps the base value, anything else replaces.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(dir) = std::env::var("SWARM_STATE_DIR") {
        config.store.state_dir = PathBuf::from(dir);
    }
    if let Some(ms) = env_parse("SWARM_LOCK_TIMEOUT_MS") {
        config.store.lock_timeout_ms = ms;
    }
    if let Some(ms) = env_parse("SWARM_LOCK_RETRY_MS") {
        config.store.lock_retry_ms = ms;
    }
    if let Some(max) = env_parse("SWARM_MAX_AGENTS") {
        config.agents.max_agents = max;
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var = name, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn merge_nested_objects_keeps_siblings() {
        let mut base = json!({"store": {"state_dir": ".swarm", "lock_timeout_ms": 10000}});
        deep_merge(&mut base, json!({"store": {"lock_timeout_ms": 250}}));
        assert_eq!(
            base,
            json!({"store": {"state_dir": ".swarm", "lock_timeout_ms": 250}})
        );
    }

    #[test]
    fn merge_null_preserves_and_arrays_replace() {
        let mut base = json!({"a": 1, "items": [1, 2, 3]});
        deep_merge(&mut base, json!({"a": null, "items": [4]}));
        assert_eq!(base, json!({"a": 1, "items": [4]}));
    }

    #[test]
    fn user_tier_overrides_project_tier() {
        let project = TempDir::new().unwrap();
        let user = TempDir::new().unwrap();
        std::fs::write(
            project.path().join("config.yaml"),
            "store:\n  lock_timeout_ms: 500\nsafety:\n  doom_loop_threshold: 4\n",
        )
        .unwrap();
        std::fs::write(
            user.path().join("config.yaml"),
            "store:\n  lock_timeout_ms: 750\n",
        )
        .unwrap();

        let loader = ConfigLoader::load_with_paths(ConfigPaths {
            project_dir: Some(project.path().to_path_buf()),
            user_dir: Some(user.path().to_path_buf()),
        })
        .unwrap();

        let config = loader.config();
        assert_eq!(config.safety.doom_loop_threshold, 4);
        assert_eq!(config.safety.max_consecutive_failures, 5);
        assert_eq!(loader.source().map(|(tier, _)| tier), Some(ConfigTier::User));
        // Env may override in CI; only assert the tier merge when it doesn't.
        if std::env::var("SWARM_LOCK_TIMEOUT_MS").is_err() {
            assert_eq!(config.store.lock_timeout_ms, 750);
        }
    }

    #[test]
    fn missing_tiers_yield_defaults() {
        let empty = TempDir::new().unwrap();
        let loader = ConfigLoader::load_with_paths(ConfigPaths {
            project_dir: Some(empty.path().join("nope")),
            user_dir: None,
        })
        .unwrap();
        assert!(loader.source().is_none());
        assert_eq!(loader.config().safety.log_cap, 1000);
    }

    #[test]
    fn explicit_file_must_exist() {
        let dir = TempDir::new().unwrap();
        assert!(ConfigLoader::load_file(&dir.path().join("absent.yaml")).is_err());
    }
}
