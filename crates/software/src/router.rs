//! Mapping of MIDI channels onto the two sound engines.
//!
//! | Channel | Engine | Velocity-sensitive | Noise |
//! |---------|--------|--------------------|-------|
//! | 1       | FM     | no                 | no    |
//! | 2       | PSG    | no                 | no    |
//! | 3       | FM     | yes                | no    |
//! | 4       | PSG    | yes                | no    |
//! | 5       | PSG    | n/a                | yes   |
//!
//! Channels 6-16 reach no engine.

use wmidi::{Channel, Note, U7, U14};

/// Mode passed to the PSG when a note sounds on the noise channel.
pub const NOISE_MODE: u8 = 1;

/// Control Change carrying LFO depth (FM) or noise control (noise channel).
pub const MODULATION: u8 = 1;
/// Control Change carrying the sustain pedal.
pub const SUSTAIN: u8 = 64;
/// Sustain values at or above this press the pedal.
const PEDAL_DOWN: u8 = 64;

/// Sentinel program number selecting the last valid voice.
pub const LAST_PROGRAM: u8 = 255;

/// The two sound chips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Engine {
    /// The four-operator FM chip.
    Fm,
    /// The square-wave/noise chip.
    Psg,
}

/// Where messages on a channel go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Route {
    /// FM tone channels.
    Fm {
        /// Whether velocity scales the output level.
        velocity_sensitive: bool,
    },
    /// PSG tone channels.
    Psg {
        /// Whether velocity scales the output level.
        velocity_sensitive: bool,
    },
    /// The PSG noise channel.
    Noise,
}

impl Route {
    /// Looks up the route for `channel`.
    pub fn of(channel: Channel) -> Option<Self> {
        match channel {
            Channel::Ch1 => Some(Route::Fm {
                velocity_sensitive: false,
            }),
            Channel::Ch2 => Some(Route::Psg {
                velocity_sensitive: false,
            }),
            Channel::Ch3 => Some(Route::Fm {
                velocity_sensitive: true,
            }),
            Channel::Ch4 => Some(Route::Psg {
                velocity_sensitive: true,
            }),
            Channel::Ch5 => Some(Route::Noise),
            _ => None,
        }
    }

    /// The chip behind this route.
    pub fn engine(self) -> Engine {
        match self {
            Route::Fm { .. } => Engine::Fm,
            Route::Psg { .. } | Route::Noise => Engine::Psg,
        }
    }
}

/// Shifts `key` by `semitones`, or `None` if that leaves the MIDI range.
pub fn transpose(key: Note, semitones: i8) -> Option<Note> {
    let shifted = i16::from(key as u8) + i16::from(semitones);
    match u8::try_from(shifted).ok().and_then(|k| U7::try_from(k).ok()) {
        Some(u7) => Some(Note::from(u7)),
        None => {
            warn!("Key {} transposed by {} is out of range", key as u8, semitones);
            None
        }
    }
}

/// Converts a pitch bend value to a signed offset from centre.
pub fn bend_offset(value: U14) -> i16 {
    u16::from(value) as i16 - 0x2000
}

/// Whether a sustain Control Change value presses the pedal.
pub fn pedal_down(value: u8) -> bool {
    value >= PEDAL_DOWN
}

/// Resolves a Program Change number against the number of valid voices.
///
/// [`LAST_PROGRAM`] selects the last voice; anything else wraps. Returns `None` when there are no voices.
pub fn resolve_program(program: u8, valid_count: u8) -> Option<u8> {
    if valid_count == 0 {
        return None;
    }
    if program == LAST_PROGRAM {
        Some(valid_count - 1)
    } else {
        Some(program % valid_count)
    }
}
