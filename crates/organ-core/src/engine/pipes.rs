//! Additive pipe engine
//!
//! Plays single-cycle rank tables with a per-pipe attack/release envelope.
//! All state is allocated in [`PipeEngine::new`]; event handling and
//! rendering never allocate.

use basedrop::Shared;

use super::wavetable::{TuningSet, TABLE_SIZE};
use super::{EngineError, SynthEngine};
use crate::event::codec::{byte_to_gain, Opcode, PackedEvent, DIVISION_BIT, NUM_KEYS};
use crate::instrument::layout::MAX_DIVISIONS;
use crate::instrument::Instrument;

/// Pipe speech and release time constant (seconds)
const ENVELOPE_TIME: f32 = 0.02;

/// Tremulant rate (Hz) and depth (fraction of amplitude)
const TREMULANT_RATE: f32 = 5.6;
const TREMULANT_DEPTH: f32 = 0.3;

/// Levels below this are treated as silent
const SILENCE: f32 = 1e-4;

struct RankVoices {
    mask: u8,
    phase: [f32; NUM_KEYS],
    level: [f32; NUM_KEYS],
    target: [f32; NUM_KEYS],
}

impl RankVoices {
    fn new() -> Self {
        Self {
            mask: 0,
            phase: [0.0; NUM_KEYS],
            level: [0.0; NUM_KEYS],
            target: [0.0; NUM_KEYS],
        }
    }
}

struct DivisionVoices {
    keyboard_mask: u8,
    tremulant: bool,
    trem_phase: f32,
    gain: f32,
    ranks: Vec<RankVoices>,
}

impl DivisionVoices {
    fn tremulant_factor(&self) -> f32 {
        if self.tremulant {
            1.0 - TREMULANT_DEPTH * 0.5 * (1.0 + self.trem_phase.sin())
        } else {
            1.0
        }
    }
}

/// Built-in [`SynthEngine`]
pub struct PipeEngine {
    sample_rate: u32,
    /// Keyboard bits currently holding each key
    keys: [u8; NUM_KEYS],
    divisions: Vec<DivisionVoices>,
    tables: Option<Shared<TuningSet>>,
    master_gain: f32,
    envelope_coef: f32,
}

impl PipeEngine {
    pub fn new(instrument: &Instrument, sample_rate: u32) -> Result<Self, EngineError> {
        if sample_rate == 0 {
            return Err(EngineError::InvalidSampleRate(sample_rate));
        }
        if instrument.n_divisions() > MAX_DIVISIONS {
            return Err(EngineError::TooManyDivisions(instrument.n_divisions()));
        }

        let divisions = instrument
            .divisions
            .iter()
            .enumerate()
            .map(|(d, division)| DivisionVoices {
                keyboard_mask: instrument.division_mask(d),
                tremulant: false,
                trem_phase: 0.0,
                gain: 1.0,
                ranks: division.ranks.iter().map(|_| RankVoices::new()).collect(),
            })
            .collect();

        Ok(Self {
            sample_rate,
            keys: [0; NUM_KEYS],
            divisions,
            tables: None,
            master_gain: 0.5,
            envelope_coef: 1.0 - (-1.0 / (ENVELOPE_TIME * sample_rate as f32)).exp(),
        })
    }

    pub fn with_master_gain(mut self, gain: f32) -> Self {
        self.master_gain = gain.clamp(0.0, 1.0);
        self
    }

    fn rank_mut(&mut self, division: u8, rank: u8) -> Option<&mut RankVoices> {
        self.divisions
            .get_mut(division as usize)?
            .ranks
            .get_mut(rank as usize)
    }

    /// Number of pipes currently speaking or releasing
    pub fn active_pipes(&self) -> usize {
        self.divisions
            .iter()
            .flat_map(|d| d.ranks.iter())
            .map(|r| r.level.iter().filter(|&&l| l > SILENCE).count())
            .sum()
    }

    pub fn rank_mask(&self, division: usize, rank: usize) -> Option<u8> {
        Some(self.divisions.get(division)?.ranks.get(rank)?.mask)
    }

    pub fn division_mask(&self, division: usize) -> Option<u8> {
        self.divisions.get(division).map(|d| d.keyboard_mask)
    }

    pub fn tables(&self) -> Option<&TuningSet> {
        self.tables.as_deref()
    }
}

impl SynthEngine for PipeEngine {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn process_event(&mut self, event: PackedEvent) {
        let key = event.index as usize;
        match event.opcode {
            Opcode::KeyOn => {
                if let Some(k) = self.keys.get_mut(key) {
                    *k |= event.mask;
                }
            }
            Opcode::KeyOff => {
                if let Some(k) = self.keys.get_mut(key) {
                    *k &= !event.mask;
                }
            }
            Opcode::AllKeysOff => self.keys.iter_mut().for_each(|k| *k &= !event.mask),
            Opcode::RankMaskSet => {
                if let Some(r) = self.rank_mut(event.division, event.index) {
                    r.mask |= event.mask;
                }
            }
            Opcode::RankMaskClear => {
                if let Some(r) = self.rank_mut(event.division, event.index) {
                    r.mask &= !event.mask;
                }
            }
            Opcode::RankActivate => {
                if let Some(r) = self.rank_mut(event.division, event.index) {
                    r.mask = event.mask;
                }
            }
            Opcode::DivisionMaskSet | Opcode::DivisionMaskClear => {
                if let Some(d) = self.divisions.get_mut(event.division as usize) {
                    if event.opcode == Opcode::DivisionMaskSet {
                        d.keyboard_mask |= event.mask;
                    } else {
                        d.keyboard_mask &= !event.mask;
                    }
                }
            }
            Opcode::TremulantOn | Opcode::TremulantOff => {
                if let Some(d) = self.divisions.get_mut(event.division as usize) {
                    d.tremulant = event.opcode == Opcode::TremulantOn;
                }
            }
            Opcode::DivisionGain => {
                if let Some(d) = self.divisions.get_mut(event.division as usize) {
                    d.gain = byte_to_gain(event.mask);
                }
            }
        }
    }

    fn install_tables(&mut self, tables: Shared<TuningSet>) {
        // The previous set is released by the collector thread
        self.tables = Some(tables);
    }

    fn update_keys(&mut self) {
        let keys = &self.keys;
        for division in &mut self.divisions {
            let own = division.keyboard_mask;
            for rank in &mut division.ranks {
                let direct = rank.mask & !DIVISION_BIT;
                let via_division = if rank.mask & DIVISION_BIT != 0 { own } else { 0 };
                let playing = direct | via_division;
                for (target, &held) in rank.target.iter_mut().zip(keys.iter()) {
                    *target = if held & playing != 0 { 1.0 } else { 0.0 };
                }
            }
        }
    }

    fn render(&mut self, outputs: &mut [Box<[f32]>]) {
        let Some((first, rest)) = outputs.split_first_mut() else {
            return;
        };
        let out = &mut first[..];
        out.iter_mut().for_each(|s| *s = 0.0);
        let frames = out.len();

        if let Some(tables) = self.tables.as_deref() {
            let coef = self.envelope_coef;
            let trem_inc =
                std::f32::consts::TAU * TREMULANT_RATE * frames as f32 / self.sample_rate as f32;

            for (d, division) in self.divisions.iter_mut().enumerate() {
                let t0 = division.tremulant_factor();
                division.trem_phase = (division.trem_phase + trem_inc) % std::f32::consts::TAU;
                let t1 = division.tremulant_factor();
                let gain = division.gain;

                for (r, rank) in division.ranks.iter_mut().enumerate() {
                    let Some(table) = tables.rank(d, r) else {
                        continue;
                    };
                    for key in 0..NUM_KEYS {
                        let target = rank.target[key];
                        let mut level = rank.level[key];
                        if target == 0.0 && level <= SILENCE {
                            rank.level[key] = 0.0;
                            continue;
                        }
                        let inc = table.increments[key];
                        let mut phase = rank.phase[key];
                        for (i, s) in out.iter_mut().enumerate() {
                            level += (target - level) * coef;
                            let trem = t0 + (t1 - t0) * i as f32 / frames as f32;
                            *s += table.sample_at(phase) * level * gain * trem;
                            phase += inc;
                            if phase >= TABLE_SIZE as f32 {
                                phase -= TABLE_SIZE as f32;
                            }
                        }
                        rank.phase[key] = phase;
                        rank.level[key] = level;
                    }
                }
            }
        }

        let master = self.master_gain;
        for s in out.iter_mut() {
            *s = (*s * master).clamp(-1.0, 1.0);
        }
        for channel in rest {
            let n = channel.len().min(frames);
            channel[..n].copy_from_slice(&out[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::gc::GcThread;
    use crate::engine::wavetable::RankTable;
    use crate::instrument::Tuning;

    fn tables_for(instrument: &Instrument, sample_rate: u32) -> TuningSet {
        let tuning = Tuning::default();
        TuningSet {
            tuning,
            sample_rate,
            divisions: instrument
                .divisions
                .iter()
                .enumerate()
                .map(|(d, div)| {
                    div.ranks
                        .iter()
                        .enumerate()
                        .map(|(r, spec)| {
                            RankTable::generate(d as u8, r as u8, spec, &tuning, sample_rate)
                        })
                        .collect()
                })
                .collect(),
        }
    }

    fn buffers(frames: usize) -> Vec<Box<[f32]>> {
        vec![vec![0.0; frames].into_boxed_slice(); 2]
    }

    #[test]
    fn test_rejects_zero_sample_rate() {
        let organ = Instrument::default_organ();
        assert!(matches!(
            PipeEngine::new(&organ, 0),
            Err(EngineError::InvalidSampleRate(0))
        ));
    }

    #[test]
    fn test_silent_without_tables() {
        let organ = Instrument::default_organ();
        let mut engine = PipeEngine::new(&organ, 48000).unwrap();
        engine.process_event(PackedEvent::rank_activation(0, 0, true));
        engine.process_event(PackedEvent::key_on(24, 1));
        engine.update_keys();
        let mut out = buffers(64);
        engine.render(&mut out);
        assert!(out.iter().all(|c| c.iter().all(|&s| s == 0.0)));
    }

    #[test]
    fn test_stop_sounds_through_division_keyboard() {
        let gc = GcThread::spawn().unwrap();
        let organ = Instrument::default_organ();
        let mut engine = PipeEngine::new(&organ, 48000).unwrap();
        engine.install_tables(Shared::new(&gc.handle(), tables_for(&organ, 48000)));

        // Principal 8 on the Great, played from keyboard I
        engine.process_event(PackedEvent::rank_mask(0, 0, DIVISION_BIT, true));
        engine.process_event(PackedEvent::key_on(24, 0b001));
        engine.update_keys();
        let mut out = buffers(256);
        engine.render(&mut out);
        assert!(out[0].iter().any(|&s| s.abs() > 1e-3));
        assert_eq!(out[0], out[1]);
        assert!(out[0].iter().all(|s| (-1.0..=1.0).contains(s)));
        assert_eq!(engine.active_pipes(), 1);

        // Keyboard II does not reach the Great without the coupler
        engine.process_event(PackedEvent::key_off(24, 0b001));
        engine.process_event(PackedEvent::key_on(30, 0b010));
        engine.update_keys();
        for _ in 0..100 {
            engine.render(&mut out);
        }
        assert_eq!(engine.active_pipes(), 0);

        engine.process_event(PackedEvent::new(Opcode::DivisionMaskSet, 0, 0, 0b010));
        engine.update_keys();
        engine.render(&mut out);
        assert_eq!(engine.active_pipes(), 1);
    }

    #[test]
    fn test_rank_activation_replaces_mask() {
        let organ = Instrument::default_organ();
        let mut engine = PipeEngine::new(&organ, 48000).unwrap();
        engine.process_event(PackedEvent::rank_mask(1, 2, DIVISION_BIT, true));
        engine.process_event(PackedEvent::rank_activation(1, 2, true));
        assert_eq!(engine.rank_mask(1, 2), Some(255));
        engine.process_event(PackedEvent::rank_activation(1, 2, false));
        assert_eq!(engine.rank_mask(1, 2), Some(0));

        // Out of range ids are ignored
        engine.process_event(PackedEvent::rank_activation(9, 0, true));
        engine.process_event(PackedEvent::rank_activation(0, 99, true));
    }

    #[test]
    fn test_gain_and_tremulant_events() {
        let organ = Instrument::default_organ();
        let mut engine = PipeEngine::new(&organ, 48000).unwrap();
        engine.process_event(organ.gain_event(2, 0.0).unwrap());
        assert_eq!(engine.divisions[2].gain, 0.0);
        engine.process_event(PackedEvent::new(Opcode::TremulantOn, 1, 0, 0));
        assert!(engine.divisions[1].tremulant);
        assert_eq!(engine.division_mask(2), Some(0b100));
    }
}
