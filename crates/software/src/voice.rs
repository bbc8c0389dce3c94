//! The patch data structure shared by the parser, the router, the NRPN mapper and the favourites store.
//!
//! A [`Voice`] mirrors one `@:` block of an OPM patch file: an LFO line, a channel line and four operator
//! lines (`M1`, `C1`, `M2`, `C2`, in that order). Every value is a small register-range integer.

use crate::nrpn::{Nrpn, OperatorParameter};

/// Number of values on the `LFO:` line.
pub const LFO_PARAMS: usize = 5;
/// Number of values on the `CH:` line.
pub const CHANNEL_PARAMS: usize = 7;
/// Number of values on each operator line.
pub const OPERATOR_PARAMS: usize = 11;
/// Number of FM operators per voice.
pub const OPERATORS: usize = 4;
/// Upper bound on the voices loaded from a single patch file.
pub const MAX_PATCHES: usize = 32;

/// Value stored in the AMS-EN field when amplitude modulation is enabled.
const AMS_ENABLED: u8 = 128;

/// Position of each field on an operator line.
pub mod operator {
    /// Attack rate.
    pub const AR: usize = 0;
    /// First decay rate.
    pub const D1R: usize = 1;
    /// Second decay rate.
    pub const D2R: usize = 2;
    /// Release rate.
    pub const RR: usize = 3;
    /// First decay level.
    pub const D1L: usize = 4;
    /// Total level.
    pub const TL: usize = 5;
    /// Key (rate) scaling.
    pub const KS: usize = 6;
    /// Frequency multiplier.
    pub const MUL: usize = 7;
    /// Detune.
    pub const DT1: usize = 8;
    /// Second detune (unused by the FM chip, carried for fidelity with the file format).
    pub const DT2: usize = 9;
    /// Amplitude modulation enable.
    pub const AMS_EN: usize = 10;
}

/// One synthesizer patch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Voice {
    /// LFO parameter set.
    pub lfo: [u8; LFO_PARAMS],
    /// Channel/algorithm parameter set.
    pub channel: [u8; CHANNEL_PARAMS],
    /// Operator parameter sets, in file order (`M1`, `C1`, `M2`, `C2`).
    pub operators: [[u8; OPERATOR_PARAMS]; OPERATORS],
}

impl Voice {
    /// Number of bytes [`Voice::to_bytes`] produces.
    pub const ENCODED_LEN: usize = LFO_PARAMS + CHANNEL_PARAMS + OPERATORS * OPERATOR_PARAMS;

    /// Writes a live NRPN edit into the matching operator field.
    ///
    /// Edits addressing an operator outside the voice are ignored; the NRPN decoder never produces them.
    pub fn apply(&mut self, edit: &Nrpn) {
        let Some(op) = self.operators.get_mut(edit.operator as usize) else {
            return;
        };
        let value = u8::try_from(edit.value).unwrap_or(u8::MAX);
        match edit.parameter {
            OperatorParameter::Detune => op[operator::DT1] = value,
            OperatorParameter::Multiplier => op[operator::MUL] = value,
            OperatorParameter::TotalLevel => op[operator::TL] = value,
            OperatorParameter::AttackRate => op[operator::AR] = value,
            OperatorParameter::Decay1Rate => op[operator::D1R] = value,
            OperatorParameter::Decay1Level => op[operator::D1L] = value,
            OperatorParameter::Decay2Rate => op[operator::D2R] = value,
            OperatorParameter::ReleaseRate => op[operator::RR] = value,
            OperatorParameter::RateScaling => op[operator::KS] = value,
            OperatorParameter::AmplitudeModulation => {
                op[operator::AMS_EN] = if edit.amplitude_modulation_enabled() {
                    AMS_ENABLED
                } else {
                    0
                }
            }
        }
    }

    /// Serializes the voice in line order: LFO, channel, then each operator.
    pub fn to_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut bytes = [0; Self::ENCODED_LEN];
        let (lfo, rest) = bytes.split_at_mut(LFO_PARAMS);
        lfo.copy_from_slice(&self.lfo);
        let (channel, rest) = rest.split_at_mut(CHANNEL_PARAMS);
        channel.copy_from_slice(&self.channel);
        for (chunk, op) in rest.chunks_exact_mut(OPERATOR_PARAMS).zip(&self.operators) {
            chunk.copy_from_slice(op);
        }
        bytes
    }

    /// Inverse of [`Voice::to_bytes`].
    pub fn from_bytes(bytes: &[u8; Self::ENCODED_LEN]) -> Self {
        let mut voice = Self::default();
        let (lfo, rest) = bytes.split_at(LFO_PARAMS);
        voice.lfo.copy_from_slice(lfo);
        let (channel, rest) = rest.split_at(CHANNEL_PARAMS);
        voice.channel.copy_from_slice(channel);
        for (op, chunk) in voice.operators.iter_mut().zip(rest.chunks_exact(OPERATOR_PARAMS)) {
            op.copy_from_slice(chunk);
        }
        voice
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Voice {
    fn format(&self, fmt: defmt::Formatter) {
        const LABELS: [&str; OPERATORS] = ["M1", "C1", "M2", "C2"];
        defmt::write!(fmt, "LFO: {}\nCH: {}", self.lfo, self.channel);
        for (label, op) in LABELS.iter().zip(&self.operators) {
            defmt::write!(fmt, "\n{}: {}", label, op);
        }
    }
}

/// The voices loaded from the current patch file.
///
/// Overwritten wholesale by [`crate::patch::parse`] each time a file is loaded.
#[derive(Clone, Debug, PartialEq)]
pub struct PatchBank {
    voices: [Voice; MAX_PATCHES],
    valid: u8,
}

impl Default for PatchBank {
    fn default() -> Self {
        Self::new()
    }
}

impl PatchBank {
    /// Constructs an empty bank.
    pub const fn new() -> Self {
        Self {
            voices: [Voice {
                lfo: [0; LFO_PARAMS],
                channel: [0; CHANNEL_PARAMS],
                operators: [[0; OPERATOR_PARAMS]; OPERATORS],
            }; MAX_PATCHES],
            valid: 0,
        }
    }

    /// Number of usable voices.
    pub fn valid_count(&self) -> u8 {
        self.valid
    }

    /// Whether the last load produced at least one voice.
    pub fn is_valid(&self) -> bool {
        self.valid > 0
    }

    /// Returns the voice at `index`, if it is within the valid range.
    pub fn get(&self, index: u8) -> Option<&Voice> {
        if index < self.valid {
            self.voices.get(index as usize)
        } else {
            None
        }
    }

    pub(crate) fn clear(&mut self) {
        *self = Self::new();
    }

    pub(crate) fn slot_mut(&mut self, index: usize) -> Option<&mut Voice> {
        self.voices.get_mut(index)
    }

    pub(crate) fn set_valid_count(&mut self, count: u8) {
        self.valid = count.min(MAX_PATCHES as u8);
    }
}
