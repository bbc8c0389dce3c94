//! In-memory stand-ins for the collaborators, shared by the unit tests.

use crate::engine::{FmEngine, PsgEngine};
use crate::favorites::NonVolatileStore;
use crate::navigator::{Directory, FileName};
use crate::voice::Voice;
use std::string::{String, ToString};
use std::vec::Vec;
use wmidi::{Note, U7};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    Missing,
    Refused,
}

/// A flat directory of text files.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    entries: Vec<(String, String)>,
    cursor: usize,
    unreadable: Vec<String>,
    pub reads: usize,
}

impl MemoryDirectory {
    pub fn new(entries: &[(&str, &str)]) -> Self {
        Self {
            entries: entries
                .iter()
                .map(|(name, text)| (name.to_string(), text.to_string()))
                .collect(),
            ..Self::default()
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn fail_open(&mut self, name: &str) {
        self.unreadable.push(name.to_string());
    }
}

impl Directory for MemoryDirectory {
    type Error = StorageError;
    type File<'a> = core::str::Lines<'a>;

    fn rewind(&mut self) -> Result<(), Self::Error> {
        self.cursor = 0;
        Ok(())
    }

    fn next_entry(&mut self, name: &mut FileName) -> Result<bool, Self::Error> {
        let Some((entry, _)) = self.entries.get(self.cursor) else {
            return Ok(false);
        };
        self.cursor += 1;
        self.reads += 1;
        name.clear();
        name.push_str(entry).map_err(|_| StorageError::Refused)?;
        Ok(true)
    }

    fn open(&mut self, name: &str) -> Result<Self::File<'_>, Self::Error> {
        if self.unreadable.iter().any(|n| n == name) {
            return Err(StorageError::Refused);
        }
        self.entries
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, text)| text.lines())
            .ok_or(StorageError::Missing)
    }

    fn remove(&mut self, name: &str) -> Result<(), Self::Error> {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| entry != name);
        if self.entries.len() == before {
            Err(StorageError::Missing)
        } else {
            Ok(())
        }
    }
}

/// Byte-addressed store, erased to `0xFF` like a fresh EEPROM.
#[derive(Debug)]
pub struct MemoryStore {
    pub bytes: [u8; 1024],
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self { bytes: [0xFF; 1024] }
    }
}

impl NonVolatileStore for MemoryStore {
    type Error = StorageError;

    fn get(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), Self::Error> {
        let src = self
            .bytes
            .get(offset..offset + buf.len())
            .ok_or(StorageError::Missing)?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn put(&mut self, offset: usize, bytes: &[u8]) -> Result<(), Self::Error> {
        let dst = self
            .bytes
            .get_mut(offset..offset + bytes.len())
            .ok_or(StorageError::Missing)?;
        dst.copy_from_slice(bytes);
        Ok(())
    }
}

/// Every call the router can make on the FM engine.
#[derive(Debug, Clone, PartialEq)]
pub enum FmCall {
    Activate(Note, u8, bool),
    Deactivate(Note),
    SetVoice(Voice),
    AdjustPitch(u8, i16),
    SetLfo(u8),
    ToggleLfo,
    ShiftOctave(i8),
    SetOctaveShift(i8),
    Operator(&'static str, u8, u8, u16),
    AmplitudeModulation(u8, u8, bool),
    ClampSustained,
    ReleaseSustained,
    Reset,
}

#[derive(Debug, Default)]
pub struct MockFm {
    pub calls: Vec<FmCall>,
    pub octave: i8,
}

impl MockFm {
    pub fn take(&mut self) -> Vec<FmCall> {
        core::mem::take(&mut self.calls)
    }

    pub fn last_voice(&self) -> Option<Voice> {
        self.calls.iter().rev().find_map(|call| match call {
            FmCall::SetVoice(voice) => Some(*voice),
            _ => None,
        })
    }
}

impl FmEngine for MockFm {
    const CHANNELS: u8 = 6;

    fn activate(&mut self, key: Note, velocity: U7, velocity_sensitive: bool) {
        self.calls
            .push(FmCall::Activate(key, u8::from(velocity), velocity_sensitive));
    }
    fn deactivate(&mut self, key: Note) {
        self.calls.push(FmCall::Deactivate(key));
    }
    fn set_voice(&mut self, voice: &Voice) {
        self.calls.push(FmCall::SetVoice(*voice));
    }
    fn adjust_pitch(&mut self, channel: u8, bend: i16) {
        self.calls.push(FmCall::AdjustPitch(channel, bend));
    }
    fn set_lfo(&mut self, depth: U7) {
        self.calls.push(FmCall::SetLfo(u8::from(depth)));
    }
    fn toggle_lfo(&mut self) {
        self.calls.push(FmCall::ToggleLfo);
    }
    fn shift_octave(&mut self, direction: i8) {
        self.octave += direction;
        self.calls.push(FmCall::ShiftOctave(direction));
    }
    fn octave_shift(&self) -> i8 {
        self.octave
    }
    fn set_octave_shift(&mut self, shift: i8) {
        self.octave = shift;
        self.calls.push(FmCall::SetOctaveShift(shift));
    }
    fn set_detune(&mut self, channel: u8, operator: u8, value: u16) {
        self.calls.push(FmCall::Operator("DT", channel, operator, value));
    }
    fn set_multiplier(&mut self, channel: u8, operator: u8, value: u16) {
        self.calls.push(FmCall::Operator("MUL", channel, operator, value));
    }
    fn set_total_level(&mut self, channel: u8, operator: u8, value: u16) {
        self.calls.push(FmCall::Operator("TL", channel, operator, value));
    }
    fn set_attack_rate(&mut self, channel: u8, operator: u8, value: u16) {
        self.calls.push(FmCall::Operator("AR", channel, operator, value));
    }
    fn set_decay1_rate(&mut self, channel: u8, operator: u8, value: u16) {
        self.calls.push(FmCall::Operator("D1R", channel, operator, value));
    }
    fn set_decay1_level(&mut self, channel: u8, operator: u8, value: u16) {
        self.calls.push(FmCall::Operator("D1L", channel, operator, value));
    }
    fn set_decay2_rate(&mut self, channel: u8, operator: u8, value: u16) {
        self.calls.push(FmCall::Operator("D2R", channel, operator, value));
    }
    fn set_release_rate(&mut self, channel: u8, operator: u8, value: u16) {
        self.calls.push(FmCall::Operator("RR", channel, operator, value));
    }
    fn set_rate_scaling(&mut self, channel: u8, operator: u8, value: u16) {
        self.calls.push(FmCall::Operator("KS", channel, operator, value));
    }
    fn set_amplitude_modulation(&mut self, channel: u8, operator: u8, enabled: bool) {
        self.calls
            .push(FmCall::AmplitudeModulation(channel, operator, enabled));
    }
    fn clamp_sustained(&mut self) {
        self.calls.push(FmCall::ClampSustained);
    }
    fn release_sustained(&mut self) {
        self.calls.push(FmCall::ReleaseSustained);
    }
    fn reset(&mut self) {
        self.calls.push(FmCall::Reset);
    }
}

/// Every call the router can make on the PSG engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsgCall {
    Activate(Note, u8, bool),
    Deactivate(Note),
    ActivateNoise(Note, u8, u8),
    DeactivateNoise(Note),
    PitchChange(u8, i16),
    NoiseControl(u8, u8),
    ClampSustained,
    ReleaseSustained,
    Reset,
}

#[derive(Debug, Default)]
pub struct MockPsg {
    pub calls: Vec<PsgCall>,
}

impl MockPsg {
    pub fn take(&mut self) -> Vec<PsgCall> {
        core::mem::take(&mut self.calls)
    }
}

impl PsgEngine for MockPsg {
    const CHANNELS: u8 = 3;

    fn activate(&mut self, key: Note, velocity: U7, velocity_sensitive: bool) {
        self.calls
            .push(PsgCall::Activate(key, u8::from(velocity), velocity_sensitive));
    }
    fn deactivate(&mut self, key: Note) {
        self.calls.push(PsgCall::Deactivate(key));
    }
    fn activate_noise(&mut self, key: Note, velocity: U7, mode: u8) {
        self.calls
            .push(PsgCall::ActivateNoise(key, u8::from(velocity), mode));
    }
    fn deactivate_noise(&mut self, key: Note) {
        self.calls.push(PsgCall::DeactivateNoise(key));
    }
    fn pitch_change(&mut self, channel: u8, bend: i16) {
        self.calls.push(PsgCall::PitchChange(channel, bend));
    }
    fn set_noise_control(&mut self, control: u8, value: U7) {
        self.calls.push(PsgCall::NoiseControl(control, u8::from(value)));
    }
    fn clamp_sustained(&mut self) {
        self.calls.push(PsgCall::ClampSustained);
    }
    fn release_sustained(&mut self) {
        self.calls.push(PsgCall::ReleaseSustained);
    }
    fn reset(&mut self) {
        self.calls.push(PsgCall::Reset);
    }
}
