//! This module contains both user-selectable settings (implemented as enums) and the device tunables, plus a trait
//! to make cycling through the former easier.

use embassy_time::Duration;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};

/// A trait which allows infinite cycling of an enum's variants.
///
/// Useful for pushbutton user interfaces, allowing presses to advance from the current to the next variant,
/// cycling back to the beginning when all variants have been exhausted.
pub trait CycleConfig {
    /// Return the next variant, cycling back to the beginning as needed.
    fn cycle(self) -> Self
    where
        Self: FromPrimitive + ToPrimitive + Sized + Copy,
    {
        let index = self.to_u8().unwrap_or(0);
        match <Self as FromPrimitive>::from_u8(index.wrapping_add(1)) {
            Some(new_selection) => new_selection,
            None => FromPrimitive::from_u8(0).unwrap_or(self),
        }
    }
}

/// What the rotary encoder currently navigates.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, ToPrimitive, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SelectionMode {
    /// Rotation steps through the patch files on the card.
    #[default]
    File,
    /// Rotation steps through the voices of the loaded file.
    Voice,
    /// Rotation shifts the FM keyboard by octaves.
    Octave,
}
impl CycleConfig for SelectionMode {}

impl SelectionMode {
    /// Label shown on the display's mode line.
    pub fn label(self) -> &'static str {
        match self {
            SelectionMode::File => "File",
            SelectionMode::Voice => "Voice",
            SelectionMode::Octave => "Octave",
        }
    }
}

/// Fixed settings of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceConfig {
    /// Semitones added to every key routed to the FM engine.
    pub fm_transpose: i8,
    /// Semitones added to every key routed to the PSG engine.
    pub psg_transpose: i8,
    /// How long a favourite button must be held to program the slot.
    pub long_press: Duration,
    /// Delay between scroll steps of a file name too wide for the display.
    pub scroll_interval: Duration,
    /// Multiple of `scroll_interval` the scroll rests for after wrapping.
    pub scroll_pause_factor: u32,
    /// Raw quadrature counts per mechanical detent of the encoder.
    pub counts_per_detent: i32,
    /// Characters per display line.
    pub display_width: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            fm_transpose: 0,
            psg_transpose: 0,
            long_press: Duration::from_millis(2000),
            scroll_interval: Duration::from_millis(500),
            scroll_pause_factor: 5,
            counts_per_detent: 4,
            display_width: 20,
        }
    }
}
