//! Synthesis engine interface and the built-in pipe engine
//!
//! The render bridge drives any [`SynthEngine`] in the same fixed order
//! every callback:
//!
//! ```text
//! queued events ──► process_event() ──► update_keys() ──► render()
//! ```
//!
//! Implementations must not allocate, lock or block in any of these calls.

pub mod gc;
pub mod pipes;
pub mod wavetable;

use basedrop::Shared;
use thiserror::Error;

use crate::event::PackedEvent;

pub use gc::GcThread;
pub use pipes::PipeEngine;
pub use wavetable::{RankTable, TuningSet, TABLE_SIZE};

/// Failure to construct an engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    #[error("Instrument has {0} divisions, more than the engine supports")]
    TooManyDivisions(usize),
}

/// Realtime side of the synthesizer
pub trait SynthEngine: Send {
    fn sample_rate(&self) -> u32;

    /// Apply one note or control event
    fn process_event(&mut self, event: PackedEvent);

    /// Switch to new wavetables; the old set is dropped via the collector
    fn install_tables(&mut self, tables: Shared<TuningSet>);

    /// Turn held keys and rank masks into per-pipe targets
    fn update_keys(&mut self);

    /// Render one block into every channel buffer
    ///
    /// All buffers have the same length. Samples stay within [-1.0, 1.0].
    fn render(&mut self, outputs: &mut [Box<[f32]>]);
}
