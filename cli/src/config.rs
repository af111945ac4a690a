// Configuration file for the shallot CLI
//
// Stored as JSON in:
// - Linux: ~/.config/shallot/config.json
// - macOS: ~/Library/Application Support/shallot/config.json
// - Windows: %APPDATA%\shallot\config.json

use anyhow::{Context, Result};
use shallot_core::ShallotConfig;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Config {
    path: PathBuf,
    pub settings: ShallotConfig,
}

impl Config {
    /// Default config file location (cross-platform)
    pub fn default_path() -> Result<PathBuf> {
        Ok(dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("shallot")
            .join("config.json"))
    }

    /// Load config from `path` (or the default location), creating the file
    /// with defaults if it does not exist
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => Self::default_path()?,
        };

        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let settings: ShallotConfig = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            settings.validate().context("Invalid configuration")?;
            Ok(Self { path, settings })
        } else {
            let config = Self {
                path,
                settings: ShallotConfig::default(),
            };
            config.save()?;
            Ok(config)
        }
    }

    /// Save config to its file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let contents =
            serde_json::to_string_pretty(&self.settings).context("Failed to serialize config")?;
        std::fs::write(&self.path, contents).context("Failed to write config file")?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All values as dotted keys, e.g. `relay.listen_addr`
    pub fn list(&self) -> Result<Vec<(String, String)>> {
        let value = serde_json::to_value(&self.settings).context("Failed to serialize config")?;
        let mut entries = Vec::new();
        flatten("", &value, &mut entries);
        Ok(entries)
    }
}

fn flatten(prefix: &str, value: &serde_json::Value, out: &mut Vec<(String, String)>) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten(&path, child, out);
            }
        }
        serde_json::Value::Null => out.push((prefix.to_string(), "(none)".to_string())),
        serde_json::Value::String(s) => out.push((prefix.to_string(), s.clone())),
        other => out.push((prefix.to_string(), other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = Config::load(Some(path.clone())).unwrap();
        assert!(path.exists());
        assert_eq!(config.settings, ShallotConfig::default());
        assert_eq!(config.path(), path.as_path());
    }

    #[test]
    fn test_load_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"chat": {"listen_addr": "127.0.0.1:7100"}}"#).unwrap();

        let config = Config::load(Some(path)).unwrap();
        assert_eq!(config.settings.chat.listen_addr, "127.0.0.1:7100");
        assert_eq!(config.settings.directory.circuit_length, 3);
    }

    #[test]
    fn test_invalid_file_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        std::fs::write(&path, "{ not json").unwrap();
        assert!(Config::load(Some(path.clone())).is_err());

        std::fs::write(&path, r#"{"network": {"call_timeout_ms": 0}}"#).unwrap();
        assert!(Config::load(Some(path)).is_err());
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::load(Some(path.clone())).unwrap();
        config.settings.proxy.renewal_interval_secs = 30;
        config.save().unwrap();

        let reloaded = Config::load(Some(path)).unwrap();
        assert_eq!(reloaded.settings.proxy.renewal_interval_secs, 30);
    }

    #[test]
    fn test_list_uses_dotted_keys() {
        let dir = tempdir().unwrap();
        let config = Config::load(Some(dir.path().join("config.json"))).unwrap();
        let entries = config.list().unwrap();

        assert!(entries.contains(&("relay.liveness_window_ms".to_string(), "1000".to_string())));
        assert!(entries.contains(&("proxy.trusted_directory_key".to_string(), "(none)".to_string())));
        assert!(entries.contains(&("chat.listen_addr".to_string(), "127.0.0.1:7000".to_string())));
    }
}
