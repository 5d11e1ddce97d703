use super::{AppConfig, RunConfig, RunMode};
use crate::error::{common, BatchError, ErrorCode, Result};
use serde::de::DeserializeOwned;
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// Serialization format of a configuration file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
    Toml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("json") => Ok(ConfigFormat::Json),
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            _ => Err(BatchError::config_with_code(
                ErrorCode::CONFIG_UNSUPPORTED_FORMAT,
                "expected a .json, .yaml, .yml or .toml file",
                Some(path.to_path_buf()),
            )),
        }
    }

    /// Parse `content` into `T`
    pub fn parse<T: DeserializeOwned>(&self, content: &str) -> Result<T> {
        match self {
            ConfigFormat::Json => serde_json::from_str(content).map_err(|e| {
                BatchError::config_with_code(ErrorCode::CONFIG_INVALID_JSON, e.to_string(), None)
            }),
            ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(|e| {
                BatchError::config_with_code(ErrorCode::CONFIG_INVALID_YAML, e.to_string(), None)
            }),
            ConfigFormat::Toml => toml::from_str(content).map_err(|e| {
                BatchError::config_with_code(ErrorCode::CONFIG_INVALID_TOML, e.to_string(), None)
            }),
        }
    }
}

async fn read_config<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !fs::try_exists(path).await.unwrap_or(false) {
        return Err(common::config_not_found(path));
    }
    let format = ConfigFormat::from_path(path)?;
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| common::storage_io(path, "read", e))?;
    debug!(path = %path.display(), ?format, "Parsing configuration file");
    format.parse(&content).map_err(|e| e.with_path(path))
}

/// Load, env-override and validate the application config
pub async fn load_app_config(path: &Path) -> Result<AppConfig> {
    let mut config: AppConfig = read_config(path).await?;
    config.merge_env_vars();
    config.validate().map_err(|e| e.with_path(path))?;
    Ok(config)
}

/// Load and validate the run config for `mode`
pub async fn load_run_config(path: &Path, mode: RunMode) -> Result<RunConfig> {
    let config: RunConfig = read_config(path).await?;
    config.validate(mode).map_err(|e| e.with_path(path))?;
    Ok(config)
}
