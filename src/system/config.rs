// src/system/config.rs

use crate::{
    constants::{CONFIG_DIR_NAME, CONFIG_FILENAME},
    models::EngineConfig,
};
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Filesystem Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not find system config directory.")]
    ConfigDirNotFound,
    #[error("Failed to parse tessera.toml: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize engine config to TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Returns `<platform config dir>/tessera/tessera.toml`.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let dir = dirs::config_dir().ok_or(ConfigError::ConfigDirNotFound)?;
    Ok(dir.join(CONFIG_DIR_NAME).join(CONFIG_FILENAME))
}

/// Loads the engine configuration.
///
/// With no explicit path the platform default is used. A missing file is created from
/// [`EngineConfig::default`] and those defaults are returned.
pub fn load_engine_config(path: Option<&Path>) -> Result<EngineConfig, ConfigError> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };

    if !path.exists() {
        let default_config = EngineConfig::default();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let toml_string = toml::to_string_pretty(&default_config)?;
        fs::write(&path, toml_string)?;
        log::info!("Wrote default engine config to '{}'.", path.display());
        Ok(default_config)
    } else {
        let content = fs::read_to_string(&path)?;
        let config: EngineConfig = toml::from_str(&content)?;
        log::debug!("Loaded engine config from '{}': {:?}", path.display(), config);
        Ok(config)
    }
}
