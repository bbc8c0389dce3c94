//! Sound chip adapters.
//!
//! These stand in for the register drivers: they keep the shadow state the core reads back (octave shift, LFO
//! switch, channel allocation) and log every call so a session can be followed over RTT.

use defmt::*;
use mega_midi_lib::{
    engine::{FmEngine, PsgEngine},
    voice::Voice,
};
use wmidi::{Note, U7};

const FM_CHANNELS: usize = 6;
const PSG_CHANNELS: usize = 3;
const MAX_OCTAVE_SHIFT: i8 = 3;

/// Round-robin channel allocation over `N` voices.
struct Channels<const N: usize> {
    keys: [Option<Note>; N],
    next: usize,
}

impl<const N: usize> Channels<N> {
    const fn new() -> Self {
        Self {
            keys: [None; N],
            next: 0,
        }
    }

    /// Picks a free channel, stealing the oldest allocation when all are busy.
    fn allocate(&mut self, key: Note) -> usize {
        let channel = self
            .keys
            .iter()
            .position(Option::is_none)
            .unwrap_or(self.next);
        self.keys[channel] = Some(key);
        self.next = (channel + 1) % N;
        channel
    }

    fn release(&mut self, key: Note) -> Option<usize> {
        let channel = self.keys.iter().position(|&k| k == Some(key))?;
        self.keys[channel] = None;
        Some(channel)
    }
}

/// The FM chip.
pub struct Ym2612 {
    channels: Channels<FM_CHANNELS>,
    octave_shift: i8,
    lfo_enabled: bool,
    sustain: bool,
}

impl Ym2612 {
    pub const fn new() -> Self {
        Self {
            channels: Channels::new(),
            octave_shift: 0,
            lfo_enabled: true,
            sustain: false,
        }
    }
}

impl FmEngine for Ym2612 {
    const CHANNELS: u8 = FM_CHANNELS as u8;

    fn activate(&mut self, key: Note, velocity: U7, velocity_sensitive: bool) {
        let channel = self.channels.allocate(key);
        debug!(
            "FM key on: {} on channel {}, velocity {} ({})",
            key.to_str(),
            channel,
            u8::from(velocity),
            velocity_sensitive
        );
    }

    fn deactivate(&mut self, key: Note) {
        if let Some(channel) = self.channels.release(key) {
            debug!("FM key off: {} on channel {}", key.to_str(), channel);
        }
    }

    fn set_voice(&mut self, voice: &Voice) {
        debug!("FM voice:\n{}", voice);
    }

    fn adjust_pitch(&mut self, channel: u8, bend: i16) {
        trace!("FM channel {} bend {}", channel, bend);
    }

    fn set_lfo(&mut self, depth: U7) {
        debug!("FM LFO depth {}", u8::from(depth));
    }

    fn toggle_lfo(&mut self) {
        self.lfo_enabled = !self.lfo_enabled;
        info!("FM LFO {}", if self.lfo_enabled { "on" } else { "off" });
    }

    fn shift_octave(&mut self, direction: i8) {
        self.set_octave_shift(self.octave_shift.saturating_add(direction));
    }

    fn octave_shift(&self) -> i8 {
        self.octave_shift
    }

    fn set_octave_shift(&mut self, shift: i8) {
        self.octave_shift = shift.clamp(-MAX_OCTAVE_SHIFT, MAX_OCTAVE_SHIFT);
        info!("FM octave shift {}", self.octave_shift);
    }

    fn set_detune(&mut self, channel: u8, operator: u8, value: u16) {
        debug!("FM ch {} op {} DT1 {}", channel, operator, value);
    }

    fn set_multiplier(&mut self, channel: u8, operator: u8, value: u16) {
        debug!("FM ch {} op {} MUL {}", channel, operator, value);
    }

    fn set_total_level(&mut self, channel: u8, operator: u8, value: u16) {
        debug!("FM ch {} op {} TL {}", channel, operator, value);
    }

    fn set_attack_rate(&mut self, channel: u8, operator: u8, value: u16) {
        debug!("FM ch {} op {} AR {}", channel, operator, value);
    }

    fn set_decay1_rate(&mut self, channel: u8, operator: u8, value: u16) {
        debug!("FM ch {} op {} D1R {}", channel, operator, value);
    }

    fn set_decay1_level(&mut self, channel: u8, operator: u8, value: u16) {
        debug!("FM ch {} op {} D1L {}", channel, operator, value);
    }

    fn set_decay2_rate(&mut self, channel: u8, operator: u8, value: u16) {
        debug!("FM ch {} op {} D2R {}", channel, operator, value);
    }

    fn set_release_rate(&mut self, channel: u8, operator: u8, value: u16) {
        debug!("FM ch {} op {} RR {}", channel, operator, value);
    }

    fn set_rate_scaling(&mut self, channel: u8, operator: u8, value: u16) {
        debug!("FM ch {} op {} KS {}", channel, operator, value);
    }

    fn set_amplitude_modulation(&mut self, channel: u8, operator: u8, enabled: bool) {
        debug!("FM ch {} op {} AMS-EN {}", channel, operator, enabled);
    }

    fn clamp_sustained(&mut self) {
        self.sustain = true;
        debug!("FM sustain on");
    }

    fn release_sustained(&mut self) {
        self.sustain = false;
        debug!("FM sustain off");
    }

    fn reset(&mut self) {
        *self = Self::new();
        info!("FM reset");
    }
}

/// The PSG chip.
pub struct Sn76489 {
    channels: Channels<PSG_CHANNELS>,
    noise: Option<Note>,
    sustain: bool,
}

impl Sn76489 {
    pub const fn new() -> Self {
        Self {
            channels: Channels::new(),
            noise: None,
            sustain: false,
        }
    }
}

impl PsgEngine for Sn76489 {
    const CHANNELS: u8 = PSG_CHANNELS as u8;

    fn activate(&mut self, key: Note, velocity: U7, velocity_sensitive: bool) {
        let channel = self.channels.allocate(key);
        debug!(
            "PSG key on: {} on channel {}, velocity {} ({})",
            key.to_str(),
            channel,
            u8::from(velocity),
            velocity_sensitive
        );
    }

    fn deactivate(&mut self, key: Note) {
        if let Some(channel) = self.channels.release(key) {
            debug!("PSG key off: {} on channel {}", key.to_str(), channel);
        }
    }

    fn activate_noise(&mut self, key: Note, velocity: U7, mode: u8) {
        self.noise = Some(key);
        debug!(
            "PSG noise on: {}, velocity {}, mode {}",
            key.to_str(),
            u8::from(velocity),
            mode
        );
    }

    fn deactivate_noise(&mut self, key: Note) {
        if self.noise == Some(key) {
            self.noise = None;
            debug!("PSG noise off");
        }
    }

    fn pitch_change(&mut self, channel: u8, bend: i16) {
        trace!("PSG channel {} bend {}", channel, bend);
    }

    fn set_noise_control(&mut self, control: u8, value: U7) {
        debug!("PSG noise control {} = {}", control, u8::from(value));
    }

    fn clamp_sustained(&mut self) {
        self.sustain = true;
        debug!("PSG sustain on");
    }

    fn release_sustained(&mut self) {
        self.sustain = false;
        debug!("PSG sustain off");
    }

    fn reset(&mut self) {
        *self = Self::new();
        info!("PSG reset");
    }
}
