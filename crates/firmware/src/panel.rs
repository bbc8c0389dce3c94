//! Front panel hardware: the rotary encoder, the favourite and LFO buttons, the favourite LEDs and the display.

use crate::Device;
use core::fmt::Write as _;
use defmt::*;
use embassy_stm32::{
    gpio::{Input, Output},
    peripherals::TIM4,
    timer::qei::Qei,
};
use embassy_time::{Duration, Instant};
use heapless::String;
use mega_midi_lib::{configuration::SelectionMode, favorites::FAVORITE_SLOTS, ui};

const DEBOUNCE: Duration = Duration::from_millis(50);
const CONFIRM_BLINK: Duration = Duration::from_millis(100);
const CONFIRM_BLINKS: u64 = 4;

/// The rotary encoder, counted by TIM4 in quadrature mode.
pub struct Encoder {
    qei: Qei<'static, TIM4>,
    last_raw: u16,
    count: i32,
}

impl Encoder {
    pub fn new(qei: Qei<'static, TIM4>) -> Self {
        let last_raw = qei.count();
        Self {
            qei,
            last_raw,
            count: 0,
        }
    }

    /// The count since start up, unwrapped from the timer's 16-bit counter.
    pub fn read(&mut self) -> i32 {
        let raw = self.qei.count();
        self.count = self
            .count
            .wrapping_add(i32::from(raw.wrapping_sub(self.last_raw) as i16));
        self.last_raw = raw;
        self.count
    }
}

/// What the button row did since the last poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum ButtonEvent {
    Lfo,
    Reset,
    FavoritePressed(u8),
    FavoriteHeld,
    FavoriteReleased,
}

/// A debounced set of active-low buttons, one bit per button.
struct Debounced {
    stable: u8,
    candidate: u8,
    since: Instant,
}

impl Debounced {
    fn new() -> Self {
        Self {
            stable: 0,
            candidate: 0,
            since: Instant::MIN,
        }
    }

    /// Returns the previous stable state if `sample` just became stable.
    fn update(&mut self, sample: u8, now: Instant) -> Option<u8> {
        if sample != self.candidate {
            self.candidate = sample;
            self.since = now;
            return None;
        }
        if self.candidate == self.stable || now.saturating_duration_since(self.since) < DEBOUNCE {
            return None;
        }
        let previous = self.stable;
        self.stable = self.candidate;
        Some(previous)
    }
}

/// The eight favourite buttons, the LFO button and the chip reset button.
pub struct Buttons {
    favorites: [Input<'static>; FAVORITE_SLOTS as usize],
    lfo: Input<'static>,
    reset: Input<'static>,
    switches_down: u16,
    state: Debounced,
}

const LFO_BIT: u16 = 1 << FAVORITE_SLOTS;
const RESET_BIT: u16 = LFO_BIT << 1;

impl Buttons {
    pub fn new(
        favorites: [Input<'static>; FAVORITE_SLOTS as usize],
        lfo: Input<'static>,
        reset: Input<'static>,
    ) -> Self {
        Self {
            favorites,
            lfo,
            reset,
            switches_down: 0,
            state: Debounced::new(),
        }
    }

    fn sample(&self) -> u16 {
        let favorites = self
            .favorites
            .iter()
            .enumerate()
            .filter(|(_, input)| input.is_low())
            .fold(0u16, |bits, (i, _)| bits | 1 << i);
        [(&self.lfo, LFO_BIT), (&self.reset, RESET_BIT)]
            .into_iter()
            .filter(|(input, _)| input.is_low())
            .fold(favorites, |bits, (_, bit)| bits | bit)
    }

    /// Samples the buttons. At most one favourite press is reported per poll; the lowest wins.
    pub fn poll(&mut self, now: Instant, events: &mut impl FnMut(ButtonEvent)) {
        let sample = self.sample();
        let switches_down = sample & (LFO_BIT | RESET_BIT);
        let favorites = sample as u8;

        if let Some(previous) = self.state.update(favorites, now) {
            let pressed = favorites & !previous;
            if pressed != 0 {
                events(ButtonEvent::FavoritePressed(pressed.trailing_zeros() as u8));
            } else if favorites == 0 {
                events(ButtonEvent::FavoriteReleased);
            }
        } else if self.state.stable != 0 {
            events(ButtonEvent::FavoriteHeld);
        }

        // these act on press only and need no hold timing
        let pressed = switches_down & !self.switches_down;
        if pressed & LFO_BIT != 0 {
            events(ButtonEvent::Lfo);
        }
        if pressed & RESET_BIT != 0 {
            events(ButtonEvent::Reset);
        }
        self.switches_down = switches_down;
    }
}

/// One LED per favourite slot.
pub struct FavoriteLeds {
    leds: [Output<'static>; FAVORITE_SLOTS as usize],
    confirming: Option<(u8, Instant)>,
}

impl FavoriteLeds {
    pub fn new(leds: [Output<'static>; FAVORITE_SLOTS as usize]) -> Self {
        Self {
            leds,
            confirming: None,
        }
    }

    /// Blinks `slot` to confirm it was programmed.
    pub fn confirm(&mut self, slot: u8, now: Instant) {
        self.confirming = Some((slot, now));
    }

    /// Lights the active favourite, or plays the confirmation blink.
    pub fn refresh(&mut self, favorite: Option<u8>, now: Instant) {
        let mut lit = favorite;
        if let Some((slot, since)) = self.confirming {
            let frame = now.saturating_duration_since(since).as_millis() / CONFIRM_BLINK.as_millis();
            if frame < CONFIRM_BLINKS * 2 {
                lit = (frame % 2 == 0).then_some(slot);
            } else {
                self.confirming = None;
            }
        }
        for (i, led) in self.leds.iter_mut().enumerate() {
            if lit == Some(i as u8) {
                led.set_high();
            } else {
                led.set_low();
            }
        }
    }
}

type Line = String<32>;

/// The character display.
///
/// The display controller's driver sits outside this firmware; lines are rendered here and written to the log.
pub struct Screen {
    width: usize,
}

impl Screen {
    pub fn new(width: usize) -> Self {
        Self { width }
    }

    /// Redraws everything from the device state.
    pub fn draw(&self, device: &Device) {
        let navigation = device.navigation();
        let mut top = Line::new();
        let mut bottom = Line::new();

        let name = ui::visible(navigation.file_name(), 0, self.width.saturating_sub(1));
        let _ = core::write!(top, "{}", name);
        let _ = match device.mode() {
            SelectionMode::File => core::write!(
                bottom,
                "{} {}/{}",
                SelectionMode::File.label(),
                navigation.position() + 1,
                navigation.total()
            ),
            SelectionMode::Voice if navigation.is_file_valid() => core::write!(
                bottom,
                "{} {}/{}",
                SelectionMode::Voice.label(),
                navigation.active_patch(),
                device.bank().valid_count().saturating_sub(1)
            ),
            SelectionMode::Voice => core::write!(bottom, "No voices"),
            SelectionMode::Octave => core::write!(
                bottom,
                "{} {}",
                SelectionMode::Octave.label(),
                device.octave_shift()
            ),
        };
        if let Some(record) = device.favorite_record() {
            let _ = core::write!(bottom, " *{}", record.slot + 1);
        }
        info!("| {} |", top.as_str());
        info!("| {} |", bottom.as_str());
    }

    /// Replaces the file name line while scrolling.
    pub fn scroll(&self, window: &str) {
        info!("| {} |", window);
    }

    pub fn no_favorite(&self) {
        info!("| No favorite set |");
    }
}
