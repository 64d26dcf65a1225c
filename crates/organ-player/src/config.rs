//! Player configuration
//!
//! One YAML file holds both the organ and the MIDI settings.
//! Default location: ~/.config/organ/config.yaml

use organ_core::OrganConfig;
use organ_midi::MidiConfig;
use serde::{Deserialize, Serialize};

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Storage, audio, queues, tuning and render settings
    pub organ: OrganConfig,
    /// MIDI input port selection
    pub midi: MidiConfig,
    /// Sound two Great ranks and a C major chord after startup
    pub self_test: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use organ_core::config::{load_config, save_config, ConfigSource};

    #[test]
    fn test_sections_default_independently() {
        let yaml = "midi:\n  port_match: Great\nself_test: true\n";
        let config: PlayerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.midi.port_match.as_deref(), Some("Great"));
        assert!(config.self_test);
        assert_eq!(config.organ.queues.note, OrganConfig::default().queues.note);
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("organ").join("config.yaml");
        let mut config = PlayerConfig::default();
        config.organ.storage_root = Some(dir.path().to_path_buf());
        config.midi.enabled = false;
        save_config(&config, &path).unwrap();

        let (loaded, source): (PlayerConfig, _) = load_config(&path);
        assert_eq!(source, ConfigSource::File);
        assert_eq!(loaded.organ.storage_root, config.organ.storage_root);
        assert!(!loaded.midi.enabled);
    }
}
