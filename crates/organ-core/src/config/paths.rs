//! Default locations and the storage root layout
//!
//! The storage root is handed to the organ before first use. Recomputed
//! wavetables live below it:
//!
//! ```text
//! <root>/
//!   stops/stops/    stop definitions
//!   stops/Aeolus/   instrument definitions
//!   waves/          wavetable cache
//! ```

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("No storage root configured")]
    NotConfigured,

    #[error("Storage root {0:?} does not exist or is not a directory")]
    InvalidRoot(PathBuf),

    #[error("Failed to prepare {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Default storage root: `<data dir>/organ`
pub fn default_storage_root() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("organ")
}

/// Default config file: `<config dir>/organ/config.yaml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("organ")
        .join("config.yaml")
}

/// Directories below a validated storage root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    pub root: PathBuf,
    pub stops: PathBuf,
    pub instruments: PathBuf,
    pub waves: PathBuf,
}

impl StorageLayout {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            stops: root.join("stops").join("stops"),
            instruments: root.join("stops").join("Aeolus"),
            waves: root.join("waves"),
        }
    }

    /// Check the root and create the subdirectories
    ///
    /// The root itself must already exist.
    pub fn prepare(root: Option<&Path>) -> Result<Self, StorageError> {
        let root = root.ok_or(StorageError::NotConfigured)?;
        if !root.is_dir() {
            return Err(StorageError::InvalidRoot(root.to_path_buf()));
        }
        let layout = Self::new(root);
        for dir in [&layout.stops, &layout.instruments, &layout.waves] {
            std::fs::create_dir_all(dir).map_err(|source| StorageError::Io {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(layout)
    }
}
