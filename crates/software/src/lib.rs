//! This crate contains architecture-agnostic logic for Mega MIDI, a hardware synthesizer pairing a four-operator
//! [FM](https://en.wikipedia.org/wiki/Frequency_modulation_synthesis) chip with a square-wave/noise
//! [PSG](https://en.wikipedia.org/wiki/Programmable_sound_generator) chip. It routes
//! [MIDI](https://midi.org/midi-1-0) messages to the two chips, edits FM operators live via NRPN, loads OPM patch
//! files from removable storage and keeps a handful of favourite patches in non-volatile memory.
//!
//! The chip register drivers, the storage and the non-volatile memory are reached through the traits in
//! [`engine`], [`navigator`] and [`favorites`]; [`synth::Synth`] ties everything together for the control loop.

#![deny(missing_docs)]
#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod configuration;
pub mod din;
pub mod engine;
pub mod favorites;
pub mod navigator;
pub mod nrpn;
pub mod patch;
pub mod router;
pub mod sustain;
pub mod synth;
pub mod ui;
pub mod voice;

#[cfg(test)]
mod test_support;
