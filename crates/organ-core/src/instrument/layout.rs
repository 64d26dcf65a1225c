//! Instrument layout: keyboards, divisions, ranks and interface elements
//!
//! Each division owns one [`Group`] of interface elements (stops, keyboard
//! ranks, couplers, tremulant). The model translates element changes into
//! packed events for the render thread; the observer only needs labels and
//! positions, so the layout is immutable once built and shared via `Arc`.

use thiserror::Error;

use crate::event::codec::{gain_to_byte, Opcode, PackedEvent, DIVISION_BIT};

/// Maximum divisions an instrument may define
pub const MAX_DIVISIONS: usize = 8;

/// Maximum keyboards (bit 7 of a keyboard mask is reserved)
pub const MAX_KEYBOARDS: usize = 7;

/// Elements per group, bounded by the 32-bit activation mask
pub const MAX_GROUP_ELEMENTS: usize = 32;

/// Ranks a single stop may drive (mixtures)
pub const MAX_RANKS_PER_STOP: usize = 5;

/// Type tag of an interface element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    /// Stop drawing one or more ranks of its own division
    Stop,
    /// Rank played directly from a named keyboard
    KeyboardRank,
    Coupler,
    Tremulant,
}

/// What an element does when switched
#[derive(Debug, Clone, PartialEq)]
pub enum ElementAction {
    Stop { ranks: Vec<u8> },
    KeyboardRank { keyboard: u8, rank: u8 },
    /// Let `keyboard` play the owning division
    Coupler { keyboard: u8 },
    Tremulant,
}

/// One interface element ("ifelm")
#[derive(Debug, Clone, PartialEq)]
pub struct Ifelm {
    pub label: String,
    pub mnemonic: String,
    pub action: ElementAction,
}

impl Ifelm {
    pub fn kind(&self) -> ElementKind {
        match self.action {
            ElementAction::Stop { .. } => ElementKind::Stop,
            ElementAction::KeyboardRank { .. } => ElementKind::KeyboardRank,
            ElementAction::Coupler { .. } => ElementKind::Coupler,
            ElementAction::Tremulant => ElementKind::Tremulant,
        }
    }
}

/// Voicing of one rank of pipes
#[derive(Debug, Clone, PartialEq)]
pub struct RankSpec {
    pub label: String,
    /// Nominal pipe length in feet; 8' sounds at written pitch
    pub footage: f32,
    /// Relative amplitudes of harmonics 1, 2, 3, ...
    pub harmonics: Vec<f32>,
    pub gain: f32,
}

impl RankSpec {
    pub fn new(label: &str, footage: f32, harmonics: &[f32], gain: f32) -> Self {
        Self {
            label: label.to_string(),
            footage,
            harmonics: harmonics.to_vec(),
            gain,
        }
    }

    /// Frequency multiplier relative to 8' pitch
    pub fn pitch_ratio(&self) -> f32 {
        8.0 / self.footage
    }
}

/// Ordered interface elements of one division
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Group {
    pub label: String,
    pub elements: Vec<Ifelm>,
}

impl Group {
    /// Number of elements of the given type
    pub fn count(&self, kind: ElementKind) -> usize {
        self.elements.iter().filter(|e| e.kind() == kind).count()
    }

    /// Absolute position of the `nth` element of type `kind`
    ///
    /// Linear scan; groups are small and this only runs on control actions.
    pub fn resolve(&self, nth: usize, kind: ElementKind) -> Option<usize> {
        self.elements
            .iter()
            .enumerate()
            .filter(|(_, e)| e.kind() == kind)
            .nth(nth)
            .map(|(i, _)| i)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DivisionSpec {
    pub label: String,
    /// Keyboard that plays this division without couplers
    pub keyboard: Option<u8>,
    pub ranks: Vec<RankSpec>,
    pub group: Group,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InstrumentError {
    #[error("Instrument defines {0} divisions, at most 8 are supported")]
    TooManyDivisions(usize),

    #[error("Instrument defines {0} keyboards, at most 7 are supported")]
    TooManyKeyboards(usize),

    #[error("Division {division}: group has {count} elements, at most 32 fit the mask")]
    GroupTooLarge { division: usize, count: usize },

    #[error("Division {division}, element '{label}': {reason}")]
    BadElement {
        division: usize,
        label: String,
        reason: String,
    },
}

/// Validated instrument description
#[derive(Debug, Clone, PartialEq)]
pub struct Instrument {
    pub name: String,
    pub keyboards: Vec<String>,
    pub divisions: Vec<DivisionSpec>,
}

impl Instrument {
    /// Validate and build an instrument
    ///
    /// An instrument without divisions is accepted here; the model refuses
    /// to become ready with it.
    pub fn new(
        name: &str,
        keyboards: Vec<String>,
        divisions: Vec<DivisionSpec>,
    ) -> Result<Self, InstrumentError> {
        if divisions.len() > MAX_DIVISIONS {
            return Err(InstrumentError::TooManyDivisions(divisions.len()));
        }
        if keyboards.len() > MAX_KEYBOARDS {
            return Err(InstrumentError::TooManyKeyboards(keyboards.len()));
        }

        for (d, division) in divisions.iter().enumerate() {
            let count = division.group.elements.len();
            if count > MAX_GROUP_ELEMENTS {
                return Err(InstrumentError::GroupTooLarge { division: d, count });
            }
            for element in &division.group.elements {
                let bad = |reason: &str| InstrumentError::BadElement {
                    division: d,
                    label: element.label.clone(),
                    reason: reason.to_string(),
                };
                match &element.action {
                    ElementAction::Stop { ranks } => {
                        if ranks.is_empty() || ranks.len() > MAX_RANKS_PER_STOP {
                            return Err(bad("stop must drive 1 to 5 ranks"));
                        }
                        if ranks.iter().any(|&r| r as usize >= division.ranks.len()) {
                            return Err(bad("rank index out of range"));
                        }
                    }
                    ElementAction::KeyboardRank { keyboard, rank } => {
                        if *keyboard as usize >= keyboards.len() {
                            return Err(bad("keyboard index out of range"));
                        }
                        if *rank as usize >= division.ranks.len() {
                            return Err(bad("rank index out of range"));
                        }
                    }
                    ElementAction::Coupler { keyboard } => {
                        if *keyboard as usize >= keyboards.len() {
                            return Err(bad("keyboard index out of range"));
                        }
                    }
                    ElementAction::Tremulant => {}
                }
            }
        }

        Ok(Self {
            name: name.to_string(),
            keyboards,
            divisions,
        })
    }

    pub fn n_divisions(&self) -> usize {
        self.divisions.len()
    }

    pub fn group(&self, division: usize) -> Option<&Group> {
        self.divisions.get(division).map(|d| &d.group)
    }

    pub fn element(&self, division: usize, index: usize) -> Option<&Ifelm> {
        self.group(division)?.elements.get(index)
    }

    /// Resolve the `nth` element of `kind` in a division to its absolute index
    ///
    /// `None` when the division does not exist or has too few matching
    /// elements.
    pub fn resolve_element(&self, division: usize, nth: usize, kind: ElementKind) -> Option<usize> {
        self.group(division)?.resolve(nth, kind)
    }

    /// Initial keyboard mask of every division
    pub fn division_mask(&self, division: usize) -> u8 {
        self.divisions
            .get(division)
            .and_then(|d| d.keyboard)
            .map(|k| 1u8 << k)
            .unwrap_or(0)
    }

    /// Packed events that switch an element on or off
    pub fn element_events(&self, division: usize, index: usize, on: bool) -> Vec<PackedEvent> {
        let Some(element) = self.element(division, index) else {
            return Vec::new();
        };
        let d = division as u8;
        match &element.action {
            ElementAction::Stop { ranks } => ranks
                .iter()
                .map(|&r| PackedEvent::rank_mask(d, r, DIVISION_BIT, on))
                .collect(),
            ElementAction::KeyboardRank { keyboard, rank } => {
                vec![PackedEvent::rank_mask(d, *rank, 1 << keyboard, on)]
            }
            ElementAction::Coupler { keyboard } => {
                let opcode = if on {
                    Opcode::DivisionMaskSet
                } else {
                    Opcode::DivisionMaskClear
                };
                vec![PackedEvent::new(opcode, d, 0, 1 << keyboard)]
            }
            ElementAction::Tremulant => {
                let opcode = if on {
                    Opcode::TremulantOn
                } else {
                    Opcode::TremulantOff
                };
                vec![PackedEvent::new(opcode, d, 0, 0)]
            }
        }
    }

    /// Event that sets a division's output gain
    pub fn gain_event(&self, division: usize, gain: f32) -> Option<PackedEvent> {
        (division < self.n_divisions()).then(|| {
            PackedEvent::new(Opcode::DivisionGain, division as u8, 0, gain_to_byte(gain))
        })
    }

    /// A small three-division organ used when no other instrument is supplied
    pub fn default_organ() -> Self {
        fn stop(label: &str, mnemonic: &str, ranks: &[u8]) -> Ifelm {
            Ifelm {
                label: label.to_string(),
                mnemonic: mnemonic.to_string(),
                action: ElementAction::Stop {
                    ranks: ranks.to_vec(),
                },
            }
        }
        fn coupler(label: &str, mnemonic: &str, keyboard: u8) -> Ifelm {
            Ifelm {
                label: label.to_string(),
                mnemonic: mnemonic.to_string(),
                action: ElementAction::Coupler { keyboard },
            }
        }
        fn tremulant() -> Ifelm {
            Ifelm {
                label: "Tremulant".to_string(),
                mnemonic: "Trem".to_string(),
                action: ElementAction::Tremulant,
            }
        }

        let principal = [1.0, 0.45, 0.25, 0.15, 0.08, 0.05];
        let flute = [1.0, 0.05, 0.3, 0.02, 0.1];
        let string = [1.0, 0.7, 0.55, 0.45, 0.35, 0.3, 0.25, 0.2];

        let great = DivisionSpec {
            label: "Great".to_string(),
            keyboard: Some(0),
            ranks: vec![
                RankSpec::new("Principal 8", 8.0, &principal, 0.5),
                RankSpec::new("Octave 4", 4.0, &principal, 0.4),
                RankSpec::new("Rohrflute 8", 8.0, &flute, 0.5),
                RankSpec::new("Quint 2 2/3", 8.0 / 3.0, &principal, 0.25),
                RankSpec::new("Superoctave 2", 2.0, &principal, 0.25),
                RankSpec::new("Tierce 1 3/5", 1.6, &principal, 0.2),
            ],
            group: Group {
                label: "Great".to_string(),
                elements: vec![
                    stop("Principal 8", "P8", &[0]),
                    stop("Octave 4", "O4", &[1]),
                    stop("Rohrflute 8", "RF8", &[2]),
                    stop("Mixture III", "MixIII", &[3, 4, 5]),
                    coupler("Swell to Great", "II+I", 1),
                    tremulant(),
                ],
            },
        };

        let swell = DivisionSpec {
            label: "Swell".to_string(),
            keyboard: Some(1),
            ranks: vec![
                RankSpec::new("Gedackt 8", 8.0, &flute, 0.5),
                RankSpec::new("Salicional 8", 8.0, &string, 0.35),
                RankSpec::new("Flute 4", 4.0, &flute, 0.4),
                RankSpec::new("Nazard 2 2/3", 8.0 / 3.0, &flute, 0.25),
            ],
            group: Group {
                label: "Swell".to_string(),
                elements: vec![
                    stop("Gedackt 8", "G8", &[0]),
                    stop("Salicional 8", "S8", &[1]),
                    stop("Flute 4", "F4", &[2]),
                    stop("Nazard 2 2/3", "N2", &[3]),
                    tremulant(),
                ],
            },
        };

        let pedal = DivisionSpec {
            label: "Pedal".to_string(),
            keyboard: Some(2),
            ranks: vec![
                RankSpec::new("Subbass 16", 16.0, &flute, 0.6),
                RankSpec::new("Octave 8", 8.0, &principal, 0.4),
            ],
            group: Group {
                label: "Pedal".to_string(),
                elements: vec![
                    stop("Subbass 16", "SB16", &[0]),
                    stop("Octave 8", "O8", &[1]),
                    coupler("Great to Pedal", "I+P", 0),
                ],
            },
        };

        Self {
            name: "Default organ".to_string(),
            keyboards: vec!["I".to_string(), "II".to_string(), "Pedal".to_string()],
            divisions: vec![great, swell, pedal],
        }
    }
}
