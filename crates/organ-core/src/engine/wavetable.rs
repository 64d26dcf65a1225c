//! Single-cycle rank wavetables and the tuning sets built from them
//!
//! A [`TuningSet`] is everything the render thread needs to sound the
//! instrument in one tuning: a wavetable per rank and a per-key phase
//! increment table. The slave builds them off the realtime path; the render
//! thread only swaps pointers.

use crate::event::codec::{KEY_BASE, NUM_KEYS};
use crate::instrument::{RankSpec, Tuning};

/// Samples per single-cycle table
pub const TABLE_SIZE: usize = 2048;

/// Wavetable and pitch data for one rank
#[derive(Debug, Clone, PartialEq)]
pub struct RankTable {
    pub division: u8,
    pub rank: u8,
    pub samples: Vec<f32>,
    /// Table positions advanced per output sample, per key
    pub increments: [f32; NUM_KEYS],
}

impl RankTable {
    /// Build the table for one rank
    ///
    /// Harmonics that would alias on the highest key are left out.
    pub fn generate(
        division: u8,
        rank: u8,
        spec: &RankSpec,
        tuning: &Tuning,
        sample_rate: u32,
    ) -> Self {
        let fs = sample_rate as f32;
        let top = tuning.note_frequency(KEY_BASE + NUM_KEYS as u8 - 1) * spec.pitch_ratio();
        let usable = ((fs * 0.5) / top).floor().max(1.0) as usize;
        let harmonics = &spec.harmonics[..spec.harmonics.len().min(usable)];

        let mut samples = vec![0.0f32; TABLE_SIZE];
        for (h, amp) in harmonics.iter().enumerate() {
            let n = (h + 1) as f32;
            for (i, s) in samples.iter_mut().enumerate() {
                let phase = std::f32::consts::TAU * n * i as f32 / TABLE_SIZE as f32;
                *s += amp * phase.sin();
            }
        }
        let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        if peak > 0.0 {
            let scale = spec.gain / peak;
            samples.iter_mut().for_each(|s| *s *= scale);
        }

        Self::with_samples(division, rank, samples, spec, tuning, sample_rate)
    }

    /// Wrap an existing single-cycle table, computing only the pitch data
    ///
    /// The table is truncated or zero-padded to [`TABLE_SIZE`].
    pub fn with_samples(
        division: u8,
        rank: u8,
        mut samples: Vec<f32>,
        spec: &RankSpec,
        tuning: &Tuning,
        sample_rate: u32,
    ) -> Self {
        samples.resize(TABLE_SIZE, 0.0);
        let ratio = spec.pitch_ratio();
        let mut increments = [0.0; NUM_KEYS];
        for (inc, freq) in increments.iter_mut().zip(tuning.key_frequencies().iter()) {
            *inc = freq * ratio * TABLE_SIZE as f32 / sample_rate as f32;
        }
        Self {
            division,
            rank,
            samples,
            increments,
        }
    }

    /// Table lookup with linear interpolation, `phase` in `0..TABLE_SIZE`
    #[inline]
    pub fn sample_at(&self, phase: f32) -> f32 {
        let i = phase as usize % TABLE_SIZE;
        let frac = phase - phase.floor();
        let a = self.samples[i];
        let b = self.samples[(i + 1) % TABLE_SIZE];
        a + (b - a) * frac
    }
}

/// All rank tables for one tuning, indexed `[division][rank]`
#[derive(Debug, Clone, PartialEq)]
pub struct TuningSet {
    pub tuning: Tuning,
    pub sample_rate: u32,
    pub divisions: Vec<Vec<RankTable>>,
}

impl TuningSet {
    pub fn rank(&self, division: usize, rank: usize) -> Option<&RankTable> {
        self.divisions.get(division)?.get(rank)
    }

    pub fn n_ranks(&self) -> usize {
        self.divisions.iter().map(Vec::len).sum()
    }
}
