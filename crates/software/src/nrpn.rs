//! Decoding of NRPN (non-registered parameter number) Control Change sequences into live FM operator edits.
//!
//! A complete edit takes four Control Change messages:
//!
//! | CC | Meaning                         |
//! |----|---------------------------------|
//! | 99 | parameter number, coarse (MSB)  |
//! | 98 | parameter number, fine (LSB)    |
//! | 6  | data entry, coarse (MSB)        |
//! | 38 | data entry, fine (LSB), commits |
//!
//! The parameter number encodes the operator in its tens digit (1-4) and the [`OperatorParameter`] in its units
//! digit, so parameter `12` is the total level of the first operator.

use crate::engine::FmEngine;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

/// CC number selecting the coarse half of the parameter number.
pub const PARAMETER_MSB: u8 = 99;
/// CC number selecting the fine half of the parameter number.
pub const PARAMETER_LSB: u8 = 98;
/// CC number carrying the coarse half of the value.
pub const VALUE_MSB: u8 = 6;
/// CC number carrying the fine half of the value; receiving it commits the edit.
pub const VALUE_LSB: u8 = 38;

/// Values above this threshold switch amplitude modulation on.
const AMPLITUDE_MODULATION_THRESHOLD: u16 = 63;

/// The operator setting an NRPN edit targets, keyed by the units digit of the parameter number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OperatorParameter {
    /// DT1.
    Detune = 0,
    /// MUL.
    Multiplier = 1,
    /// TL.
    TotalLevel = 2,
    /// AR.
    AttackRate = 3,
    /// D1R.
    Decay1Rate = 4,
    /// D1L.
    Decay1Level = 5,
    /// D2R.
    Decay2Rate = 6,
    /// RR.
    ReleaseRate = 7,
    /// KS.
    RateScaling = 8,
    /// AMS-EN; any value above 63 enables it.
    AmplitudeModulation = 9,
}

/// A fully decoded edit, ready to be applied to the FM engine and the live voice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Nrpn {
    /// FM channel the edit targets.
    pub channel: u8,
    /// Operator index, 0-3.
    pub operator: u8,
    /// Which operator setting changes.
    pub parameter: OperatorParameter,
    /// The 14-bit data value.
    pub value: u16,
}

impl Nrpn {
    /// Decodes a committed parameter number/value pair.
    ///
    /// `midi_channel` is the one-based channel number the sequence arrived on; it is shifted to the zero-based
    /// numbering of the FM engine unless it already is zero. Returns `None` (after logging) when the operator
    /// digit is outside 1-4.
    pub fn decode(midi_channel: u8, parameter: u16, value: u16) -> Option<Self> {
        let channel = if midi_channel != 0 {
            midi_channel - 1
        } else {
            midi_channel
        };

        let operator = ((parameter / 10) % 10).wrapping_sub(1);
        let Some(kind) = OperatorParameter::from_u16(parameter % 10) else {
            warn!("Dropping NRPN {}: unknown parameter kind", parameter);
            return None;
        };
        if operator > 3 {
            warn!("Dropping NRPN {}: operator out of range", parameter);
            return None;
        }

        Some(Self {
            channel,
            operator: operator as u8,
            parameter: kind,
            value,
        })
    }

    /// Interprets the value as a switch, as the amplitude modulation enable does.
    pub fn amplitude_modulation_enabled(&self) -> bool {
        self.value > AMPLITUDE_MODULATION_THRESHOLD
    }

    /// Forwards the edit to the matching per-operator setter.
    pub fn apply_to<F: FmEngine>(&self, fm: &mut F) {
        let Self {
            channel,
            operator,
            value,
            ..
        } = *self;
        match self.parameter {
            OperatorParameter::Detune => fm.set_detune(channel, operator, value),
            OperatorParameter::Multiplier => fm.set_multiplier(channel, operator, value),
            OperatorParameter::TotalLevel => fm.set_total_level(channel, operator, value),
            OperatorParameter::AttackRate => fm.set_attack_rate(channel, operator, value),
            OperatorParameter::Decay1Rate => fm.set_decay1_rate(channel, operator, value),
            OperatorParameter::Decay1Level => fm.set_decay1_level(channel, operator, value),
            OperatorParameter::Decay2Rate => fm.set_decay2_rate(channel, operator, value),
            OperatorParameter::ReleaseRate => fm.set_release_rate(channel, operator, value),
            OperatorParameter::RateScaling => fm.set_rate_scaling(channel, operator, value),
            OperatorParameter::AmplitudeModulation => {
                fm.set_amplitude_modulation(channel, operator, self.amplitude_modulation_enabled())
            }
        }
    }
}

/// Accumulates the four Control Change messages of an NRPN sequence.
///
/// Nothing is emitted until the fine data byte (CC 38) arrives, so a partial sequence never touches voice state.
/// A new coarse parameter byte simply overwrites the previous selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NrpnAccumulator {
    parameter: u16,
    value: u16,
}

impl NrpnAccumulator {
    /// Constructs an empty accumulator.
    pub const fn new() -> Self {
        Self {
            parameter: 0,
            value: 0,
        }
    }

    /// Returns true for the Control Change numbers this accumulator consumes.
    pub fn handles(control: u8) -> bool {
        matches!(
            control,
            PARAMETER_MSB | PARAMETER_LSB | VALUE_MSB | VALUE_LSB
        )
    }

    /// Feeds one Control Change. Returns the committed edit when `control` is the fine data byte and the
    /// accumulated parameter number decodes to a valid operator setting.
    pub fn accept(&mut self, midi_channel: u8, control: u8, value: u8) -> Option<Nrpn> {
        let value = u16::from(value);
        match control {
            PARAMETER_MSB => self.parameter = value << 7,
            PARAMETER_LSB => self.parameter = self.parameter.wrapping_add(value),
            VALUE_MSB => self.value = value << 7,
            VALUE_LSB => {
                self.value = self.value.wrapping_add(value);
                info!("NRPN param: {}, value: {}", self.parameter, self.value);
                return Nrpn::decode(midi_channel, self.parameter, self.value);
            }
            _ => {}
        }
        None
    }
}
