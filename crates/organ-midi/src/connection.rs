//! MIDI port discovery
//!
//! Uses midir for cross-platform MIDI input (ALSA on Linux, CoreMIDI on macOS, WinMM on Windows).

use midir::{MidiInput, MidiInputPort};

/// Error type for MIDI connection operations
#[derive(Debug, thiserror::Error)]
pub enum MidiConnectionError {
    #[error("Failed to initialize MIDI input: {0}")]
    InputInitError(String),

    #[error("No MIDI input ports available")]
    NoInputPorts,

    #[error("No MIDI port found matching pattern: {0}")]
    PortNotFound(String),

    #[error("Failed to connect to MIDI port: {0}")]
    ConnectionError(String),

    #[error("Failed to get port info: {0}")]
    PortInfoError(String),
}

/// Find an input port whose name contains `port_match`, case-insensitively
///
/// Returns the `MidiInput` so the caller can attach its own callback.
pub fn find_input_port(
    client_name: &str,
    port_match: Option<&str>,
) -> Result<(MidiInput, MidiInputPort, String), MidiConnectionError> {
    let midi_in = MidiInput::new(client_name)
        .map_err(|e| MidiConnectionError::InputInitError(e.to_string()))?;

    let in_ports = midi_in.ports();
    if in_ports.is_empty() {
        return Err(MidiConnectionError::NoInputPorts);
    }

    let names: Vec<String> = in_ports
        .iter()
        .map(|port| midi_in.port_name(port).unwrap_or_default())
        .collect();
    let index = match port_match {
        Some(pattern) => matching_port(&names, pattern)
            .ok_or_else(|| MidiConnectionError::PortNotFound(pattern.to_string()))?,
        None => 0,
    };

    let input_port = in_ports
        .into_iter()
        .nth(index)
        .ok_or(MidiConnectionError::NoInputPorts)?;
    let port_name = midi_in
        .port_name(&input_port)
        .map_err(|e| MidiConnectionError::PortInfoError(e.to_string()))?;

    log::info!("MIDI: Found input port: {}", port_name);

    Ok((midi_in, input_port, port_name))
}

/// Index of the first name containing `pattern`, ignoring case
fn matching_port(names: &[String], pattern: &str) -> Option<usize> {
    let pattern = pattern.to_lowercase();
    names
        .iter()
        .position(|name| name.to_lowercase().contains(&pattern))
}

/// List all available MIDI input ports
pub fn list_input_ports() -> Result<Vec<String>, MidiConnectionError> {
    let midi_in = MidiInput::new("organ-midi-list")
        .map_err(|e| MidiConnectionError::InputInitError(e.to_string()))?;

    let ports: Vec<String> = midi_in
        .ports()
        .iter()
        .filter_map(|port| midi_in.port_name(port).ok())
        .collect();

    Ok(ports)
}
