//! Packed 32-bit event words
//!
//! Every note and control event that crosses into the render thread is one
//! `u32`, so the queues carrying them stay allocation-free and `Copy`:
//!
//! ```text
//!  31      24 23      16 15       8 7        0
//! ┌──────────┬──────────┬──────────┬──────────┐
//! │  opcode  │ division │  index   │   mask   │
//! └──────────┴──────────┴──────────┴──────────┘
//! ```
//!
//! `index` is a key number for key events and a rank number for rank events.

/// Number of playable keys (MIDI notes 36..=96)
pub const NUM_KEYS: usize = 61;

/// Lowest MIDI note mapped to key 0
pub const KEY_BASE: u8 = 36;

/// Mask bit meaning "through the division's own keyboard mask"
pub const DIVISION_BIT: u8 = 0x80;

/// Highest legal opcode value
pub const MAX_OPCODE: u8 = 15;

/// Operation carried by a packed event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    KeyOff = 0,
    KeyOn = 1,
    AllKeysOff = 2,
    RankMaskSet = 3,
    DivisionMaskClear = 4,
    DivisionMaskSet = 5,
    RankMaskClear = 6,
    /// Replace the whole rank mask (255 = sounds from every keyboard, 0 = off)
    RankActivate = 7,
    TremulantOff = 8,
    TremulantOn = 9,
    DivisionGain = 10,
}

impl Opcode {
    /// Decode the opcode byte, `None` for values with no meaning
    pub fn from_bits(bits: u8) -> Option<Self> {
        Some(match bits {
            0 => Opcode::KeyOff,
            1 => Opcode::KeyOn,
            2 => Opcode::AllKeysOff,
            3 => Opcode::RankMaskSet,
            4 => Opcode::DivisionMaskClear,
            5 => Opcode::DivisionMaskSet,
            6 => Opcode::RankMaskClear,
            7 => Opcode::RankActivate,
            8 => Opcode::TremulantOff,
            9 => Opcode::TremulantOn,
            10 => Opcode::DivisionGain,
            _ => return None,
        })
    }
}

/// One decoded event word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedEvent {
    pub opcode: Opcode,
    pub division: u8,
    pub index: u8,
    pub mask: u8,
}

impl PackedEvent {
    pub fn new(opcode: Opcode, division: u8, index: u8, mask: u8) -> Self {
        Self {
            opcode,
            division,
            index,
            mask,
        }
    }

    pub fn key_on(key: u8, keyboards: u8) -> Self {
        Self::new(Opcode::KeyOn, 0, key, keyboards)
    }

    pub fn key_off(key: u8, keyboards: u8) -> Self {
        Self::new(Opcode::KeyOff, 0, key, keyboards)
    }

    /// Set or clear the given bits of a rank's keyboard mask
    pub fn rank_mask(division: u8, rank: u8, mask: u8, on: bool) -> Self {
        let opcode = if on {
            Opcode::RankMaskSet
        } else {
            Opcode::RankMaskClear
        };
        Self::new(opcode, division, rank, mask)
    }

    /// Switch a rank fully on or off regardless of stops
    pub fn rank_activation(division: u8, rank: u8, on: bool) -> Self {
        Self::new(Opcode::RankActivate, division, rank, if on { 255 } else { 0 })
    }

    pub fn encode(self) -> u32 {
        ((self.opcode as u32) << 24)
            | ((self.division as u32) << 16)
            | ((self.index as u32) << 8)
            | self.mask as u32
    }

    /// Decode a word produced by [`PackedEvent::encode`]
    ///
    /// Returns `None` when the opcode byte is unknown, which the render
    /// thread treats as a skipped event.
    pub fn decode(word: u32) -> Option<Self> {
        let opcode = Opcode::from_bits((word >> 24) as u8)?;
        Some(Self {
            opcode,
            division: (word >> 16) as u8,
            index: (word >> 8) as u8,
            mask: word as u8,
        })
    }
}

/// Map a MIDI note number to a key index, `None` outside the compass
pub fn key_for_note(note: u8) -> Option<u8> {
    let key = note.checked_sub(KEY_BASE)?;
    ((key as usize) < NUM_KEYS).then_some(key)
}

/// Quantise a linear gain in `0.0..=1.0` into a mask byte
pub fn gain_to_byte(gain: f32) -> u8 {
    (gain.clamp(0.0, 1.0) * 255.0).round() as u8
}

pub fn byte_to_gain(byte: u8) -> f32 {
    byte as f32 / 255.0
}
