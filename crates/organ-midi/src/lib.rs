//! MIDI keyboard input for the organ
//!
//! # Architecture
//!
//! ```text
//! MIDI Device → midir callback → flume channel → ingestion thread → note queue
//! ```
//!
//! The midir callback runs on the driver's thread. It only classifies the
//! bytes and does a non-blocking send. Channel routing and controller
//! handling happen inside the organ.

mod connection;
mod input;

pub use connection::{list_input_ports, MidiConnectionError};
pub use input::{classify, MidiInputHandler};

use organ_core::Organ;
use serde::{Deserialize, Serialize};

/// MIDI section of the player configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiConfig {
    /// Connect at startup
    pub enabled: bool,
    /// Substring of the input port name; `None` takes the first port
    pub port_match: Option<String>,
    /// Client name shown to the MIDI system
    pub client_name: String,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port_match: None,
            client_name: "organ".to_string(),
        }
    }
}

/// Error type for MIDI input setup
#[derive(Debug, thiserror::Error)]
pub enum MidiError {
    #[error("MIDI input disabled in config")]
    Disabled,

    #[error("MIDI connection error: {0}")]
    ConnectionError(#[from] MidiConnectionError),
}

/// Connect the configured input port to a running organ
pub fn connect(config: &MidiConfig, organ: &Organ) -> Result<MidiInputHandler, MidiError> {
    if !config.enabled {
        return Err(MidiError::Disabled);
    }
    let handler = MidiInputHandler::connect(
        &config.client_name,
        config.port_match.as_deref(),
        organ.note_sender(),
    )?;
    Ok(handler)
}
