//! MIDI input handling
//!
//! Classifies raw bytes from the midir callback and forwards them to the
//! organ's ingestion thread as [`NoteCommand`]s.

use flume::Sender;
use midir::MidiInputConnection;
use organ_core::NoteCommand;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::connection::{find_input_port, MidiConnectionError};

/// Turn one raw MIDI message into something the organ understands
///
/// MIDI message format:
/// - Note Off: 0x8n nn vv (n=channel, nn=note, vv=velocity)
/// - Note On: 0x9n nn vv, velocity 0 meaning Note Off
/// - Control Change: 0xBn cc vv
/// - Program Change: 0xCn pp, padded to three bytes
pub fn classify(data: &[u8]) -> Option<NoteCommand> {
    let status = *data.first()?;
    let channel = status & 0x0F;

    match status & 0xF0 {
        0x80 if data.len() >= 3 => Some(NoteCommand::NoteOff {
            channel,
            note: data[1],
        }),
        0x90 if data.len() >= 3 => {
            if data[2] == 0 {
                Some(NoteCommand::NoteOff {
                    channel,
                    note: data[1],
                })
            } else {
                Some(NoteCommand::NoteOn {
                    channel,
                    note: data[1],
                    velocity: data[2],
                })
            }
        }
        0xB0 if data.len() >= 3 => Some(NoteCommand::Control([status, data[1], data[2]])),
        0xC0 if data.len() >= 2 => Some(NoteCommand::Control([status, data[1], 0])),
        // System messages, pitch bend, aftertouch
        _ => None,
    }
}

/// Callback data passed to midir
struct CallbackData {
    commands: Sender<NoteCommand>,
    dropped: Arc<AtomicU64>,
}

/// Owns the midir connection for as long as input should flow
pub struct MidiInputHandler {
    _connection: MidiInputConnection<CallbackData>,
    port_name: String,
    dropped: Arc<AtomicU64>,
}

impl MidiInputHandler {
    /// Connect to the first input port whose name contains `port_match`
    ///
    /// With no pattern the first available port is used.
    pub fn connect(
        client_name: &str,
        port_match: Option<&str>,
        commands: Sender<NoteCommand>,
    ) -> Result<Self, MidiConnectionError> {
        let (midi_in, port, port_name) = find_input_port(client_name, port_match)?;

        let dropped = Arc::new(AtomicU64::new(0));
        let callback_data = CallbackData {
            commands,
            dropped: dropped.clone(),
        };

        let connection = midi_in
            .connect(&port, "organ-midi-input", Self::midi_callback, callback_data)
            .map_err(|e| MidiConnectionError::ConnectionError(e.to_string()))?;

        log::info!("MIDI: Input handler connected to {}", port_name);

        Ok(Self {
            _connection: connection,
            port_name,
            dropped,
        })
    }

    /// Called from the MIDI driver thread. Must not block.
    fn midi_callback(_timestamp: u64, data: &[u8], callback_data: &mut CallbackData) {
        let Some(command) = classify(data) else {
            return;
        };
        if callback_data.commands.try_send(command).is_err() {
            callback_data.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Messages lost because the organ was no longer listening
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
