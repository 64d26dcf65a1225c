//! Organ configuration
//!
//! Stored as YAML; every field has a default so partial files load.
//!
//! ```yaml
//! storage_root: /home/me/.local/share/organ
//! audio:
//!   buffer_size: !Fixed 256
//!   sample_rate: 48000
//! tuning:
//!   temperament: 3
//!   base_frequency: 415.0
//! ```

mod io;
mod paths;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio::AudioConfig;
use crate::bridge::DEFAULT_OVERRUN_THRESHOLD;
use crate::instrument::tuning::{DEFAULT_BASE_FREQUENCY, DEFAULT_TEMPERAMENT};
use crate::instrument::Tuning;

pub use io::{load_config, save_config, ConfigSource};
pub use paths::{default_config_path, default_storage_root, StorageError, StorageLayout};

/// Root configuration of the organ core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganConfig {
    /// Storage root; without one the organ never becomes ready
    pub storage_root: Option<PathBuf>,
    pub audio: AudioConfig,
    pub queues: QueueConfig,
    pub tuning: TuningConfig,
    pub render: RenderConfig,
}

impl Default for OrganConfig {
    fn default() -> Self {
        Self {
            storage_root: Some(default_storage_root()),
            audio: AudioConfig::default(),
            queues: QueueConfig::default(),
            tuning: TuningConfig::default(),
            render: RenderConfig::default(),
        }
    }
}

/// Capacities of the lock-free event queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub note: usize,
    pub comm: usize,
    pub midi: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            note: 256,
            comm: 256,
            midi: 1024,
        }
    }
}

/// Tuning applied on startup
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    /// Index into the temperament table
    pub temperament: usize,
    /// Frequency of A4 in Hz
    pub base_frequency: f32,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            temperament: DEFAULT_TEMPERAMENT,
            base_frequency: DEFAULT_BASE_FREQUENCY,
        }
    }
}

impl TuningConfig {
    /// The configured tuning, or the default one if it is out of range
    pub fn resolve(&self) -> Tuning {
        Tuning::new(self.temperament, self.base_frequency).unwrap_or_else(|| {
            log::warn!(
                "[CONFIG] Invalid tuning (temperament {}, {} Hz), using default",
                self.temperament,
                self.base_frequency
            );
            Tuning::default()
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Callbacks slower than this are reported as overruns
    pub overrun_threshold_ms: u64,
    pub master_gain: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            overrun_threshold_ms: DEFAULT_OVERRUN_THRESHOLD.as_millis() as u64,
            master_gain: 0.5,
        }
    }
}

impl RenderConfig {
    pub fn overrun_threshold(&self) -> Duration {
        Duration::from_millis(self.overrun_threshold_ms.max(1))
    }
}
