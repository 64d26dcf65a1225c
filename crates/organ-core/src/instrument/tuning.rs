//! Temperaments and per-key pitch tables

use crate::event::codec::{KEY_BASE, NUM_KEYS};

/// Default concert pitch for A4
pub const DEFAULT_BASE_FREQUENCY: f32 = 440.0;

/// Accepted range for the base frequency (Hz)
pub const BASE_FREQUENCY_RANGE: std::ops::RangeInclusive<f32> = 400.0..=480.0;

/// A historical temperament
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Temperament {
    pub label: &'static str,
    pub mnemonic: &'static str,
    /// Deviation from equal temperament in cents, C through B
    pub offsets: [f32; 12],
}

pub const TEMPERAMENTS: [Temperament; 6] = [
    Temperament {
        label: "Pythagorean",
        mnemonic: "Pyth",
        offsets: [0.0, 13.7, 3.9, -5.9, 7.8, -2.0, 11.7, 2.0, 15.6, 5.9, -3.9, 9.8],
    },
    Temperament {
        label: "Kirnberger III",
        mnemonic: "Kirn3",
        offsets: [0.0, -9.8, -6.8, -5.9, -13.7, -2.0, -9.8, -3.4, -7.8, -10.3, -3.9, -11.7],
    },
    Temperament {
        label: "Werckmeister III",
        mnemonic: "Werck3",
        offsets: [0.0, -9.8, -7.8, -5.9, -9.8, -2.0, -11.7, -3.9, -7.8, -11.7, -3.9, -7.8],
    },
    Temperament {
        label: "Vallotti",
        mnemonic: "Vall",
        offsets: [0.0, -5.9, -3.9, -2.0, -7.8, 2.0, -7.8, -2.0, -3.9, -5.9, 0.0, -9.8],
    },
    Temperament {
        label: "Meantone 1/4 comma",
        mnemonic: "Mean4",
        offsets: [0.0, -24.0, -6.8, 10.3, -13.7, 3.4, -20.5, -3.4, -27.4, -10.3, 6.8, -17.1],
    },
    Temperament {
        label: "Equally tempered",
        mnemonic: "Equal",
        offsets: [0.0; 12],
    },
];

/// Index of equal temperament in [`TEMPERAMENTS`]
pub const DEFAULT_TEMPERAMENT: usize = 5;

/// A temperament and a concert pitch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tuning {
    pub temperament: usize,
    pub base_frequency: f32,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            temperament: DEFAULT_TEMPERAMENT,
            base_frequency: DEFAULT_BASE_FREQUENCY,
        }
    }
}

impl Tuning {
    /// Checked constructor, `None` for an unknown temperament or a pitch
    /// outside [`BASE_FREQUENCY_RANGE`]
    pub fn new(temperament: usize, base_frequency: f32) -> Option<Self> {
        (temperament < TEMPERAMENTS.len() && BASE_FREQUENCY_RANGE.contains(&base_frequency))
            .then_some(Self {
                temperament,
                base_frequency,
            })
    }

    pub fn temperament(&self) -> &'static Temperament {
        &TEMPERAMENTS[self.temperament.min(TEMPERAMENTS.len() - 1)]
    }

    /// Frequency of an 8' pipe for a MIDI note
    ///
    /// Offsets are taken relative to A so that A4 always sounds at the base
    /// frequency.
    pub fn note_frequency(&self, note: u8) -> f32 {
        let offsets = &self.temperament().offsets;
        let cents = offsets[note as usize % 12] - offsets[9];
        let semitones = note as f32 - 69.0 + cents / 100.0;
        self.base_frequency * 2f32.powf(semitones / 12.0)
    }

    /// Frequencies of all keys of the compass
    pub fn key_frequencies(&self) -> [f32; NUM_KEYS] {
        let mut table = [0.0; NUM_KEYS];
        for (key, freq) in table.iter_mut().enumerate() {
            *freq = self.note_frequency(KEY_BASE + key as u8);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_a4_is_base_frequency_in_every_temperament() {
        for t in 0..TEMPERAMENTS.len() {
            let tuning = Tuning::new(t, 415.0).unwrap_or(Tuning {
                temperament: t,
                base_frequency: 415.0,
            });
            assert!((tuning.note_frequency(69) - 415.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_equal_temperament_octaves() {
        let tuning = Tuning::default();
        assert!((tuning.note_frequency(57) - 220.0).abs() < 1e-3);
        assert!((tuning.note_frequency(60) - 261.626).abs() < 1e-2);
    }

    #[test]
    fn test_meantone_thirds_are_pure() {
        let tuning = Tuning::new(4, 440.0).unwrap();
        let ratio = tuning.note_frequency(64) / tuning.note_frequency(60);
        assert!((ratio - 1.25).abs() < 1e-3);
    }

    #[test]
    fn test_rejects_out_of_range() {
        assert!(Tuning::new(6, 440.0).is_none());
        assert!(Tuning::new(0, 300.0).is_none());
        assert!(Tuning::new(0, 480.0).is_some());
    }

    #[test]
    fn test_key_table_spans_compass() {
        let table = Tuning::default().key_frequencies();
        assert!((table[0] - 65.406).abs() < 1e-2);
        assert!(table.windows(2).all(|w| w[1] > w[0]));
    }
}
