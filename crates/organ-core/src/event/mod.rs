//! Fixed-width events and the lock-free queues that carry them
//!
//! - [`codec`]: 32-bit packed note/control words
//! - [`queue`]: two-phase SPSC queue used for note (`u32`), model-to-render
//!   communication (`u32`) and raw MIDI control (`u8`) traffic

pub mod codec;
pub mod queue;

pub use codec::{key_for_note, Opcode, PackedEvent, DIVISION_BIT, KEY_BASE, NUM_KEYS};
pub use queue::{event_queue, EventConsumer, EventProducer, QueueFull};
