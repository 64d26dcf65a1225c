//! Endpoints, routing tags and the messages exchanged between threads

use std::sync::Arc;

use crate::engine::wavetable::TuningSet;
use crate::instrument::{Instrument, MidiMap, Tuning};

/// A thread (or thread-like component) attached to the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Host application calling into [`crate::Organ`]
    Control,
    /// MIDI ingestion thread
    Midi,
    /// Model thread (instrument state machine)
    Model,
    /// Background recompute thread
    Slave,
    /// Audio-control thread feeding the render bridge
    Audio,
    /// State observer thread
    Iface,
}

impl Endpoint {
    pub const ALL: [Endpoint; 6] = [
        Endpoint::Control,
        Endpoint::Midi,
        Endpoint::Model,
        Endpoint::Slave,
        Endpoint::Audio,
        Endpoint::Iface,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Endpoint::Control => "control",
            Endpoint::Midi => "midi",
            Endpoint::Model => "model",
            Endpoint::Slave => "slave",
            Endpoint::Audio => "audio",
            Endpoint::Iface => "iface",
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Routing tag chosen by the sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    ToModel,
    ToSlave,
    ToAudio,
    ToIface,
    ToMidi,
    /// Shutdown broadcast
    Exit,
}

/// Everything the observer needs to present the instrument
#[derive(Debug, Clone)]
pub struct InterfaceInit {
    pub instrument: Arc<Instrument>,
    pub tuning: Tuning,
    pub midimap: MidiMap,
}

/// Work order for the background thread
#[derive(Debug, Clone)]
pub struct RecomputeRequest {
    pub instrument: Arc<Instrument>,
    pub tuning: Tuning,
    pub sample_rate: u32,
}

/// Payload of one routed message
///
/// Messages move into the router on send and are dropped by the receiving
/// handler once processed.
#[derive(Debug)]
pub enum Message {
    /// Switch an interface element on
    IfelmSet { group: u8, ifelm: u8 },
    /// Switch an interface element off
    IfelmClear { group: u8, ifelm: u8 },
    /// Switch every element of a group off
    GroupClear { group: u8 },
    /// Request (towards the model) or announcement (towards the observer)
    /// of a new tuning
    Retune(Tuning),
    /// Recompute finished; `ok` is false when it failed and the previous
    /// tuning stays in use
    RetuningDone { tuning: Tuning, ok: bool },
    /// Route or unroute a MIDI channel to a division
    MidiRouting {
        channel: u8,
        division: u8,
        enabled: bool,
    },
    /// Current MIDI routing, broadcast by the model after every change
    MidiChannelConfig(MidiMap),
    /// Request or announcement of a division output gain
    DivisionGain { division: u8, gain: f32 },
    /// Raw MIDI control bytes are waiting in the MIDI queue
    MidiPending,
    /// Instrument description, sent once while loading
    Init(Box<InterfaceInit>),
    /// A consumer finished its part of loading: the observer took the
    /// layout from [`Message::Init`], audio control handed the first tables
    /// to the render thread. Each is sent once.
    Ack(Endpoint),
    /// The instrument is loaded and playable
    Ready,
    /// Rebuild wavetables for a tuning
    Recompute(Box<RecomputeRequest>),
    /// Freshly computed wavetables for the render thread
    Tables(Box<TuningSet>),
}

impl Message {
    /// Short name used in log lines
    pub fn kind(&self) -> &'static str {
        match self {
            Message::IfelmSet { .. } => "ifelm-set",
            Message::IfelmClear { .. } => "ifelm-clear",
            Message::GroupClear { .. } => "group-clear",
            Message::Retune(_) => "retune",
            Message::RetuningDone { .. } => "retuning-done",
            Message::MidiRouting { .. } => "midi-routing",
            Message::MidiChannelConfig(_) => "midi-config",
            Message::DivisionGain { .. } => "division-gain",
            Message::MidiPending => "midi-pending",
            Message::Init(_) => "init",
            Message::Ack(_) => "ack",
            Message::Ready => "ready",
            Message::Recompute(_) => "recompute",
            Message::Tables(_) => "tables",
        }
    }
}
