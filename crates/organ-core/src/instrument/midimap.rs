//! Per-channel MIDI routing
//!
//! Each of the 16 channels carries a 16-bit routing word:
//!
//! ```text
//! bit 14      instrument control (program change)
//! bit 13      division control,  bits 8..=10 = division index
//! bit 12      keyboard routing,  bits 0..=2  = keyboard index
//! ```

/// Number of MIDI channels
pub const NUM_MIDI_CHANNELS: usize = 16;

pub const KEYBOARD_FLAG: u16 = 0x1000;
pub const DIVISION_FLAG: u16 = 0x2000;
pub const INSTRUMENT_FLAG: u16 = 0x4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MidiMap {
    bits: [u16; NUM_MIDI_CHANNELS],
}

impl MidiMap {
    pub fn from_bits(bits: [u16; NUM_MIDI_CHANNELS]) -> Self {
        Self { bits }
    }

    /// Route channel k to keyboard k and division k for every keyboard,
    /// and accept instrument control on channel 0
    pub fn one_to_one(n_keyboards: usize, n_divisions: usize) -> Self {
        let mut map = Self::default();
        for channel in 0..n_keyboards.min(NUM_MIDI_CHANNELS) {
            map.bits[channel] |= KEYBOARD_FLAG | channel as u16 & 7;
        }
        for channel in 0..n_divisions.min(NUM_MIDI_CHANNELS) {
            map.bits[channel] |= DIVISION_FLAG | ((channel as u16 & 7) << 8);
        }
        map.bits[0] |= INSTRUMENT_FLAG;
        map
    }

    pub fn bits(&self) -> [u16; NUM_MIDI_CHANNELS] {
        self.bits
    }

    pub fn entry(&self, channel: usize) -> Option<u16> {
        self.bits.get(channel).copied()
    }

    /// Keyboard played by a channel
    pub fn keyboard(&self, channel: usize) -> Option<u8> {
        let b = self.entry(channel)?;
        (b & KEYBOARD_FLAG != 0).then_some((b & 7) as u8)
    }

    /// Division controlled by a channel
    pub fn division(&self, channel: usize) -> Option<u8> {
        let b = self.entry(channel)?;
        (b & DIVISION_FLAG != 0).then_some(((b >> 8) & 7) as u8)
    }

    pub fn instrument_control(&self, channel: usize) -> bool {
        self.entry(channel)
            .map(|b| b & INSTRUMENT_FLAG != 0)
            .unwrap_or(false)
    }

    /// Keyboard mask for note events arriving on a channel (0 = unrouted)
    pub fn keyboard_mask(&self, channel: usize) -> u8 {
        self.keyboard(channel).map(|k| 1u8 << k).unwrap_or(0)
    }

    /// Route or unroute a channel to a division and its keyboard
    ///
    /// Disabling only clears fields that currently point at this division.
    /// Returns `false` for an out-of-range channel.
    pub fn set_division_routing(
        &mut self,
        channel: usize,
        division: u8,
        keyboard: Option<u8>,
        enabled: bool,
    ) -> bool {
        let Some(b) = self.bits.get_mut(channel) else {
            return false;
        };
        if enabled {
            *b = (*b & !(DIVISION_FLAG | 0x0700)) | DIVISION_FLAG | ((division as u16 & 7) << 8);
            if let Some(k) = keyboard {
                *b = (*b & !(KEYBOARD_FLAG | 0x0007)) | KEYBOARD_FLAG | (k as u16 & 7);
            }
        } else {
            if *b & DIVISION_FLAG != 0 && ((*b >> 8) & 7) as u8 == division {
                *b &= !(DIVISION_FLAG | 0x0700);
            }
            if let Some(k) = keyboard {
                if *b & KEYBOARD_FLAG != 0 && (*b & 7) as u8 == k {
                    *b &= !(KEYBOARD_FLAG | 0x0007);
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_to_one_routing() {
        let map = MidiMap::one_to_one(3, 3);
        assert_eq!(map.keyboard(2), Some(2));
        assert_eq!(map.division(1), Some(1));
        assert_eq!(map.keyboard(3), None);
        assert_eq!(map.keyboard_mask(1), 0b10);
        assert!(map.instrument_control(0));
        assert!(!map.instrument_control(1));
        assert_eq!(map.entry(16), None);
    }

    #[test]
    fn test_set_and_clear_division_routing() {
        let mut map = MidiMap::default();
        assert!(map.set_division_routing(5, 2, Some(2), true));
        assert_eq!(map.entry(5), Some(0x3202));

        // Clearing another division leaves the route alone
        map.set_division_routing(5, 1, Some(1), false);
        assert_eq!(map.division(5), Some(2));

        map.set_division_routing(5, 2, Some(2), false);
        assert_eq!(map.entry(5), Some(0));
        assert!(!map.set_division_routing(16, 0, None, true));
    }
}
