//! Scene Configuration File
//!
//! Reads and writes `scene.toml`: the scene sections plus a `[bridge]` table
//! for the HTTP device bridge. A missing file is created with defaults.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

use cadence_runtime::{ConfigStore, StoreError};
use cadence_types::SceneConfig;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "scene.toml";

/// Error type for configuration file access
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("Failed to read file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("Failed to serialize TOML: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error("Configuration file already exists: {0}")]
    AlreadyExists(PathBuf),
}

impl From<ConfigFileError> for StoreError {
    fn from(e: ConfigFileError) -> Self {
        match e {
            ConfigFileError::ReadError(e) => StoreError::Io(e),
            ConfigFileError::TomlParseError(e) => StoreError::Parse(e.to_string()),
            ConfigFileError::TomlSerializeError(e) => StoreError::Serialize(e.to_string()),
            e @ ConfigFileError::AlreadyExists(_) => StoreError::Serialize(e.to_string()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File Layout
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP device bridge settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8085".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Everything stored in the configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub bridge: BridgeConfig,

    #[serde(flatten)]
    pub scene: SceneConfig,
}

impl AppConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigFileError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

/// [`ConfigStore`] backed by a TOML file
///
/// The bridge section is kept from the last load so saving the scene never
/// drops it.
pub struct TomlConfigStore {
    path: PathBuf,
    bridge: RwLock<BridgeConfig>,
}

impl TomlConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            bridge: RwLock::new(BridgeConfig::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the whole file, creating it with defaults when missing
    pub async fn load_app(&self) -> Result<AppConfig, ConfigFileError> {
        if !fs::try_exists(&self.path).await? {
            info!("No configuration at {}, writing defaults", self.path.display());
            let config = AppConfig::default();
            self.write(&config).await?;
            return Ok(config);
        }

        let content = fs::read_to_string(&self.path).await?;
        let config = AppConfig::from_toml(&content)?;
        *self.bridge.write() = config.bridge.clone();
        Ok(config)
    }

    /// Write a default configuration file
    pub async fn init(&self, force: bool) -> Result<AppConfig, ConfigFileError> {
        if !force && fs::try_exists(&self.path).await? {
            return Err(ConfigFileError::AlreadyExists(self.path.clone()));
        }
        let config = AppConfig::default();
        self.write(&config).await?;
        Ok(config)
    }

    async fn write(&self, config: &AppConfig) -> Result<(), ConfigFileError> {
        let content = config.to_toml()?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        // Write-then-rename so a crash never leaves a truncated file
        let tmp = self.path.with_extension("toml.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for TomlConfigStore {
    async fn load(&self) -> Result<SceneConfig, StoreError> {
        Ok(self.load_app().await?.scene)
    }

    async fn save(&self, config: &SceneConfig) -> Result<(), StoreError> {
        let app = AppConfig {
            bridge: self.bridge.read().clone(),
            scene: config.clone(),
        };
        if let Err(e) = self.write(&app).await {
            warn!("Failed to write {}: {}", self.path.display(), e);
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_types::{DeviceKey, ParameterSpec};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_created_with_defaults() {
        let dir = TempDir::new().unwrap();
        let store = TomlConfigStore::new(dir.path().join("scene.toml"));

        let config = store.load().await.unwrap();
        assert_eq!(config, SceneConfig::default());
        assert!(store.path().exists());

        // Second load reads the written file back
        assert_eq!(store.load().await.unwrap(), config);
    }

    #[tokio::test]
    async fn test_save_keeps_bridge_section() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scene.toml");
        fs::write(
            &path,
            r#"
[bridge]
base_url = "http://bridge.local:9000"

[scene]
duration = "120-180"
initial_delay_secs = 5

[[devices]]
class = "haptic"
slot = 1
interval = "oops"
"#,
        )
        .await
        .unwrap();

        let store = TomlConfigStore::new(&path);
        let mut config = store.load().await.unwrap();
        assert_eq!(config.scene.duration, ParameterSpec::Random { min: 120, max: 180 });
        assert_eq!(
            config.device(DeviceKey::haptic(1)).unwrap().interval,
            ParameterSpec::INTERVAL
        );

        config.device_mut(DeviceKey::haptic(1)).unwrap().enabled = true;
        tokio_test::assert_ok!(store.save(&config).await);

        let reloaded = store.load_app().await.unwrap();
        assert_eq!(reloaded.bridge.base_url, "http://bridge.local:9000");
        assert!(reloaded.scene.is_enabled(DeviceKey::haptic(1)));
    }

    #[tokio::test]
    async fn test_malformed_file_is_a_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scene.toml");
        fs::write(&path, "[scene\nduration = 5").await.unwrap();

        let err = TomlConfigStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, StoreError::Parse(_)));
    }

    #[tokio::test]
    async fn test_init_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let store = TomlConfigStore::new(dir.path().join("nested/scene.toml"));

        store.init(false).await.unwrap();
        assert!(matches!(
            store.init(false).await,
            Err(ConfigFileError::AlreadyExists(_))
        ));
        store.init(true).await.unwrap();
    }
}
