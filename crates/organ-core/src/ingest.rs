//! MIDI ingestion thread
//!
//! Several sources play notes: MIDI ports, the control surface, self-test.
//! The note queue has a single producer, so they all send [`NoteCommand`]s
//! over a flume channel to this thread, which owns the producing ends of
//! the note queue and the raw MIDI control queue.
//!
//! ```text
//!  midi port ──┐                     ┌─► note queue (u32) ──► render
//!  Organ     ──┼─flume─► ingestion ──┤
//!  self test ──┘                     └─► midi queue (u8) ──MidiPending──► model
//! ```

use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::event::{key_for_note, EventProducer, PackedEvent};
use crate::instrument::MidiMap;
use crate::itc::{Incoming, Mailbox, Message, Outbox, Tag};

/// How long the thread waits for commands before checking its mailbox
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Something to play or forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteCommand {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8 },
    /// Switch a rank on or off independent of its stops
    RankActivation { division: u8, rank: u8, on: bool },
    /// Controller or program change, forwarded to the model
    Control([u8; 3]),
}

pub struct Ingest {
    commands: flume::Receiver<NoteCommand>,
    mailbox: Mailbox,
    outbox: Outbox,
    notes: EventProducer<u32>,
    midi: EventProducer<u8>,
    midimap: MidiMap,
}

impl Ingest {
    pub fn new(
        commands: flume::Receiver<NoteCommand>,
        mailbox: Mailbox,
        outbox: Outbox,
        notes: EventProducer<u32>,
        midi: EventProducer<u8>,
    ) -> Self {
        Self {
            commands,
            mailbox,
            outbox,
            notes,
            midi,
            midimap: MidiMap::default(),
        }
    }

    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("organ-midi-in".to_string())
            .spawn(move || self.run())
    }

    fn run(mut self) {
        log::info!("[MIDI] Ingestion thread started");
        'outer: loop {
            while let Some(incoming) = self.mailbox.try_recv() {
                match incoming {
                    Incoming::Exit => break 'outer,
                    Incoming::Message {
                        message: Message::MidiChannelConfig(map),
                        ..
                    } => {
                        log::debug!("[MIDI] Channel map updated");
                        self.midimap = map;
                    }
                    Incoming::Message { source, message } => {
                        log::debug!("[MIDI] Ignoring {} from {}", message.kind(), source);
                    }
                }
            }

            match self.commands.recv_timeout(POLL_INTERVAL) {
                Ok(command) => {
                    self.apply(command);
                    // Handle bursts without going back through the mailbox
                    while let Ok(command) = self.commands.try_recv() {
                        self.apply(command);
                    }
                }
                Err(flume::RecvTimeoutError::Timeout) => {}
                Err(flume::RecvTimeoutError::Disconnected) => thread::sleep(POLL_INTERVAL),
            }
        }
        self.mailbox.discard_pending();
        log::info!("[MIDI] Ingestion thread stopped");
    }

    fn apply(&mut self, command: NoteCommand) {
        match command {
            NoteCommand::NoteOn {
                channel,
                note,
                velocity,
            } => self.key(channel, note, velocity > 0),
            NoteCommand::NoteOff { channel, note } => self.key(channel, note, false),
            NoteCommand::RankActivation { division, rank, on } => {
                self.push_note(PackedEvent::rank_activation(division, rank, on));
            }
            NoteCommand::Control(bytes) => match self.midi.write_all(&bytes) {
                Ok(()) => self.outbox.post(Tag::ToModel, Message::MidiPending),
                Err(e) => log::warn!("[MIDI] Dropping control {:02x?}: {}", bytes, e),
            },
        }
    }

    fn key(&mut self, channel: u8, note: u8, on: bool) {
        let mask = self.midimap.keyboard_mask(channel as usize);
        if mask == 0 {
            return;
        }
        let Some(key) = key_for_note(note) else {
            return;
        };
        let event = if on {
            PackedEvent::key_on(key, mask)
        } else {
            PackedEvent::key_off(key, mask)
        };
        self.push_note(event);
    }

    fn push_note(&mut self, event: PackedEvent) {
        if let Err(e) = self.notes.write_all(&[event.encode()]) {
            log::warn!("[MIDI] Dropping {:?}: {}", event.opcode, e);
        }
    }
}
