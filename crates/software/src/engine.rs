//! Interfaces to the two sound chips.
//!
//! The register-level drivers live outside this crate; the core only ever calls the setters below. Both adapters
//! allocate hardware channels for notes themselves, so note calls carry no channel. Channel-addressed calls
//! (pitch bend, operator edits) use zero-based channel numbers.

use crate::voice::Voice;
use wmidi::{Note, U7};

/// The four-operator FM chip.
pub trait FmEngine {
    /// Number of FM channels the chip exposes.
    const CHANNELS: u8;

    /// Sounds `key` on a free channel.
    fn activate(&mut self, key: Note, velocity: U7, velocity_sensitive: bool);
    /// Silences the channel sounding `key`, if any.
    fn deactivate(&mut self, key: Note);
    /// Loads a patch into every channel.
    fn set_voice(&mut self, voice: &Voice);
    /// Applies a signed pitch bend (`-8192..=8191`) to one channel.
    fn adjust_pitch(&mut self, channel: u8, bend: i16);
    /// Sets the LFO depth from the modulation wheel.
    fn set_lfo(&mut self, depth: U7);
    /// Switches the LFO on or off.
    fn toggle_lfo(&mut self);
    /// Moves the keyboard by one octave; `direction` is `1` or `-1`.
    fn shift_octave(&mut self, direction: i8);
    /// Current octave shift.
    fn octave_shift(&self) -> i8;
    /// Restores an octave shift, e.g. from a favourite.
    fn set_octave_shift(&mut self, shift: i8);

    /// DT1 of one operator.
    fn set_detune(&mut self, channel: u8, operator: u8, value: u16);
    /// MUL of one operator.
    fn set_multiplier(&mut self, channel: u8, operator: u8, value: u16);
    /// TL of one operator.
    fn set_total_level(&mut self, channel: u8, operator: u8, value: u16);
    /// AR of one operator.
    fn set_attack_rate(&mut self, channel: u8, operator: u8, value: u16);
    /// D1R of one operator.
    fn set_decay1_rate(&mut self, channel: u8, operator: u8, value: u16);
    /// D1L of one operator.
    fn set_decay1_level(&mut self, channel: u8, operator: u8, value: u16);
    /// D2R of one operator.
    fn set_decay2_rate(&mut self, channel: u8, operator: u8, value: u16);
    /// RR of one operator.
    fn set_release_rate(&mut self, channel: u8, operator: u8, value: u16);
    /// KS of one operator.
    fn set_rate_scaling(&mut self, channel: u8, operator: u8, value: u16);
    /// AMS-EN of one operator.
    fn set_amplitude_modulation(&mut self, channel: u8, operator: u8, enabled: bool);

    /// Called when the sustain pedal goes down.
    fn clamp_sustained(&mut self);
    /// Called when the sustain pedal comes up, after the router has released the held keys.
    fn release_sustained(&mut self);
    /// Silences everything and restores power-on register state.
    fn reset(&mut self);
}

/// The square-wave/noise chip.
pub trait PsgEngine {
    /// Number of tone channels (the noise channel is addressed separately).
    const CHANNELS: u8;

    /// Sounds `key` on a free tone channel.
    fn activate(&mut self, key: Note, velocity: U7, velocity_sensitive: bool);
    /// Silences the tone channel sounding `key`, if any.
    fn deactivate(&mut self, key: Note);
    /// Sounds the noise channel.
    fn activate_noise(&mut self, key: Note, velocity: U7, mode: u8);
    /// Silences the noise channel if it is sounding `key`.
    fn deactivate_noise(&mut self, key: Note);
    /// Applies a signed pitch bend (`-8192..=8191`) to one tone channel.
    fn pitch_change(&mut self, channel: u8, bend: i16);
    /// Forwards a Control Change addressed to the noise channel.
    fn set_noise_control(&mut self, control: u8, value: U7);

    /// Called when the sustain pedal goes down.
    fn clamp_sustained(&mut self);
    /// Called when the sustain pedal comes up, after the router has released the held keys.
    fn release_sustained(&mut self);
    /// Silences everything.
    fn reset(&mut self);
}
