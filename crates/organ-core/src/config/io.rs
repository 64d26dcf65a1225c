//! YAML configuration files
//!
//! Missing or broken files never stop the organ from starting: loading
//! falls back to defaults and reports where the values came from.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Where a loaded configuration came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    File,
    /// No file at the path
    Defaults,
    /// A file exists but could not be read or parsed
    DefaultsAfterError,
}

/// Load a configuration, falling back to `T::default()`
pub fn load_config<T>(path: &Path) -> (T, ConfigSource)
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        log::info!("[CONFIG] No config at {:?}, using defaults", path);
        return (T::default(), ConfigSource::Defaults);
    }

    let parsed = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {:?}", path))
        .and_then(|text| {
            serde_yaml::from_str::<T>(&text).with_context(|| format!("Failed to parse {:?}", path))
        });

    match parsed {
        Ok(config) => {
            log::info!("[CONFIG] Loaded {:?}", path);
            (config, ConfigSource::File)
        }
        Err(e) => {
            log::warn!("[CONFIG] {:#}, using defaults", e);
            (T::default(), ConfigSource::DefaultsAfterError)
        }
    }
}

/// Write a configuration as YAML, creating parent directories
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory {:?}", parent))?;
    }
    let yaml = serde_yaml::to_string(config).context("Failed to serialize config")?;
    std::fs::write(path, yaml).with_context(|| format!("Failed to write {:?}", path))?;
    log::info!("[CONFIG] Saved {:?}", path);
    Ok(())
}
