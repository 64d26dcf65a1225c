//! Externally observable instrument state
//!
//! Written only by the observer thread, read lock-free by anyone. The
//! activation masks hold one bit per interface element, bit `i` being
//! element `i` of the division's group.

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use crate::instrument::{Instrument, MidiMap, Tuning, MAX_DIVISIONS, NUM_MIDI_CHANNELS};

pub struct ObserverState {
    instrument: OnceLock<Arc<Instrument>>,
    masks: [AtomicU32; MAX_DIVISIONS],
    initializing: AtomicBool,
    /// Temperament in the high half, base frequency bits in the low half
    tuning: AtomicU64,
    midimap: [AtomicU16; NUM_MIDI_CHANNELS],
    gains: [AtomicU32; MAX_DIVISIONS],
    retunes: AtomicU64,
}

impl Default for ObserverState {
    fn default() -> Self {
        Self::new()
    }
}

impl ObserverState {
    pub fn new() -> Self {
        let tuning = Tuning::default();
        Self {
            instrument: OnceLock::new(),
            masks: std::array::from_fn(|_| AtomicU32::new(0)),
            initializing: AtomicBool::new(true),
            tuning: AtomicU64::new(pack_tuning(tuning)),
            midimap: std::array::from_fn(|_| AtomicU16::new(0)),
            gains: std::array::from_fn(|_| AtomicU32::new(1.0f32.to_bits())),
            retunes: AtomicU64::new(0),
        }
    }

    /// Layout received with the init message, `None` while loading
    pub fn instrument(&self) -> Option<&Arc<Instrument>> {
        self.instrument.get()
    }

    /// True until the model announces readiness
    #[inline]
    pub fn is_initializing(&self) -> bool {
        self.initializing.load(Ordering::Acquire)
    }

    /// Activation mask of a division's group (0 for unknown divisions)
    #[inline]
    pub fn group_mask(&self, division: usize) -> u32 {
        self.masks
            .get(division)
            .map(|m| m.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn element_active(&self, division: usize, index: usize) -> bool {
        index < 32 && self.group_mask(division) & (1 << index) != 0
    }

    pub fn tuning(&self) -> Tuning {
        unpack_tuning(self.tuning.load(Ordering::Acquire))
    }

    pub fn midimap(&self) -> MidiMap {
        MidiMap::from_bits(std::array::from_fn(|ch| {
            self.midimap[ch].load(Ordering::Acquire)
        }))
    }

    pub fn division_gain(&self, division: usize) -> Option<f32> {
        self.gains
            .get(division)
            .map(|g| f32::from_bits(g.load(Ordering::Acquire)))
    }

    /// Completed retune cycles since start
    pub fn retunes(&self) -> u64 {
        self.retunes.load(Ordering::Acquire)
    }

    // Writers below are crate-private: only the observer thread calls them

    pub(crate) fn set_instrument(&self, instrument: Arc<Instrument>) -> bool {
        self.instrument.set(instrument).is_ok()
    }

    /// Returns true on the first call only
    pub(crate) fn finish_initializing(&self) -> bool {
        self.initializing.swap(false, Ordering::AcqRel)
    }

    /// Apply a mask update; returns the new mask if anything changed
    pub(crate) fn update_mask(&self, division: usize, f: impl FnOnce(u32) -> u32) -> Option<u32> {
        let slot = self.masks.get(division)?;
        let old = slot.load(Ordering::Acquire);
        let new = f(old);
        if new == old {
            return None;
        }
        slot.store(new, Ordering::Release);
        Some(new)
    }

    pub(crate) fn set_tuning(&self, tuning: Tuning) {
        self.tuning.store(pack_tuning(tuning), Ordering::Release);
    }

    pub(crate) fn count_retune(&self) {
        self.retunes.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn set_midimap(&self, map: &MidiMap) {
        for (slot, bits) in self.midimap.iter().zip(map.bits()) {
            slot.store(bits, Ordering::Release);
        }
    }

    pub(crate) fn set_division_gain(&self, division: usize, gain: f32) {
        if let Some(slot) = self.gains.get(division) {
            slot.store(gain.to_bits(), Ordering::Release);
        }
    }
}

fn pack_tuning(tuning: Tuning) -> u64 {
    ((tuning.temperament as u64) << 32) | tuning.base_frequency.to_bits() as u64
}

fn unpack_tuning(word: u64) -> Tuning {
    Tuning {
        temperament: (word >> 32) as usize,
        base_frequency: f32::from_bits(word as u32),
    }
}
