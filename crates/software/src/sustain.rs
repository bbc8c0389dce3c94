//! Provides a struct [`Sustain`] which tracks one engine's sustain pedal and the keys released while it was down.
//! Those keys keep sounding until the pedal lifts, at which point the router deactivates them in the order they
//! were released.

use tinyvec::{ArrayVec, array_vec};
use wmidi::{Note, U7};

/// Keys one engine can hold under a single press of the pedal.
const HELD_KEYS: usize = 32;

/// Sustain pedal state of a single engine.
///
/// Internally, keys are stored as [`U7`] because [`tinyvec`] requires that items implement [`Default`]; public
/// interfaces deal with [`Note`] instead.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sustain<const N: usize = HELD_KEYS> {
    pedal: bool,
    /// Keys whose NoteOff arrived while the pedal was down.
    held: ArrayVec<[U7; N]>,
}

impl Default for Sustain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "defmt")]
impl<const N: usize> defmt::Format for Sustain<N> {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "Sustain {{ pedal: {}, held: [", self.pedal);
        for (i, &key) in self.held.iter().enumerate() {
            if i != 0 {
                defmt::write!(fmt, ", ");
            }
            defmt::write!(fmt, "{}", Note::from(key).to_str());
        }
        defmt::write!(fmt, "] }}");
    }
}

impl Sustain {
    /// Construct a new `Sustain` with the pedal up.
    pub fn new() -> Self {
        Self {
            pedal: false,
            held: array_vec!(),
        }
    }
}

impl<const N: usize> Sustain<N> {
    /// Whether the pedal is down.
    pub fn is_engaged(&self) -> bool {
        self.pedal
    }

    /// Records a pedal position. Returns `true` if this was an edge (the position changed).
    pub fn set_pedal(&mut self, down: bool) -> bool {
        let edge = self.pedal != down;
        self.pedal = down;
        edge
    }

    /// Handles a key release. Returns `true` when the key should be silenced now, `false` when it is held by the
    /// pedal.
    ///
    /// If the held list is full, the key is silenced rather than dropped so it can never hang.
    pub fn release(&mut self, key: Note) -> bool {
        if !self.pedal {
            return true;
        }
        let u7 = U7::from_u8_lossy(key as u8);
        if self.held.contains(&u7) {
            return false;
        }
        if self.held.len() == self.held.capacity() {
            return true;
        }
        self.held.push(u7);
        false
    }

    /// Forgets a held key because it was struck again. Returns `true` if the key was being held, in which case
    /// the old note still sounds and must be silenced before the new one starts.
    pub fn restrike(&mut self, key: Note) -> bool {
        let before = self.held.len();
        self.held.retain(|&k| k != U7::from_u8_lossy(key as u8));
        self.held.len() != before
    }

    /// Empties the held list, yielding the keys to silence in release order.
    pub fn drain(&mut self) -> impl Iterator<Item = Note> + '_ {
        self.held.drain(..).map(Note::from)
    }

    /// Determine if any keys are being held by the pedal.
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}
