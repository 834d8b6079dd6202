//! Persistent CLI configuration.

use std::path::{Path, PathBuf};

use qrtag_core::config::ClientConfig;
use qrtag_core::util::normalize_text_option;
use serde::{Deserialize, Serialize};

const CONFIG_FILE_NAME: &str = "cli-config.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,
    #[serde(default)]
    pub api_base_url: Option<String>,
}

const fn default_config_version() -> u32 {
    1
}

pub fn default_config_path() -> Result<PathBuf, String> {
    dirs::config_dir()
        .map(|dir| dir.join("qrtag").join(CONFIG_FILE_NAME))
        .ok_or_else(|| "Failed to resolve CLI config directory".to_string())
}

impl CliConfig {
    pub fn load() -> Result<Self, String> {
        Self::load_from_path(&default_config_path()?)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|error| format!("Failed to read config at {}: {}", path.display(), error))?;
        let mut config = serde_json::from_str::<Self>(&raw)
            .map_err(|error| format!("Failed to parse config at {}: {}", path.display(), error))?;
        config.normalize();
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf, String> {
        let path = default_config_path()?;
        self.save_to_path(&path)?;
        Ok(path)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    error
                )
            })?;
        }

        let mut normalized = self.clone();
        normalized.normalize();
        let serialized = serde_json::to_string_pretty(&normalized)
            .map_err(|error| format!("Failed to serialize config: {error}"))?;
        std::fs::write(path, serialized)
            .map_err(|error| format!("Failed to write config at {}: {}", path.display(), error))
    }

    /// Client config from the flag, then `QRTAG_API_URL`, then this file
    pub fn client_config(&self, explicit_api_url: Option<&str>) -> ClientConfig {
        ClientConfig {
            api_base_url: normalize_text_option(explicit_api_url.map(ToString::to_string)),
        }
        .or(ClientConfig::from_env())
        .or(ClientConfig {
            api_base_url: self.api_base_url.clone(),
        })
    }

    fn normalize(&mut self) {
        self.api_base_url = normalize_text_option(self.api_base_url.take())
            .map(|url| url.trim_end_matches('/').to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_roundtrip_normalizes_url() {
        let path = std::env::temp_dir().join(format!(
            "qrtag-cli-config-test-{}.json",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map_or(0, |duration| duration.as_nanos())
        ));

        let config = CliConfig {
            version: 1,
            api_base_url: Some(" https://qrtag.example.com/api/ ".to_string()),
        };
        config.save_to_path(&path).unwrap();
        let loaded = CliConfig::load_from_path(&path).unwrap();
        assert_eq!(
            loaded.api_base_url.as_deref(),
            Some("https://qrtag.example.com/api")
        );

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let path = std::env::temp_dir().join("qrtag-cli-config-does-not-exist.json");
        assert_eq!(CliConfig::load_from_path(&path).unwrap(), CliConfig::default());
    }

    #[test]
    fn explicit_url_wins_over_file() {
        let config = CliConfig {
            version: 1,
            api_base_url: Some("https://file.example.com".to_string()),
        };
        let client = config.client_config(Some("https://flag.example.com"));
        assert_eq!(
            client.api_base_url.as_deref(),
            Some("https://flag.example.com")
        );
    }
}
