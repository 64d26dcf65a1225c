//! Instrument description: layout, tunings and MIDI routing

pub mod layout;
pub mod midimap;
pub mod tuning;

pub use layout::{
    DivisionSpec, ElementAction, ElementKind, Group, Ifelm, Instrument, InstrumentError, RankSpec,
    MAX_DIVISIONS, MAX_GROUP_ELEMENTS, MAX_KEYBOARDS, MAX_RANKS_PER_STOP,
};
pub use midimap::{MidiMap, NUM_MIDI_CHANNELS};
pub use tuning::{Temperament, Tuning, TEMPERAMENTS};
