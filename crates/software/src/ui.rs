//! State behind the front panel: the selection mode shared with the mode button's interrupt, encoder detent
//! tracking, the file name scroll and the favourite button press in progress.

use crate::configuration::{CycleConfig, DeviceConfig, SelectionMode};
use crate::navigator::Step;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use embassy_time::{Duration, Instant};
use num_traits::{FromPrimitive, ToPrimitive};

/// The only state written outside the control loop.
///
/// The mode button's edge handler advances the mode and raises the redraw flag; the control loop reads the mode
/// and consumes the flag. Both are plain atomics, so either side may be interrupted at any point.
#[derive(Debug)]
pub struct SharedUi {
    mode: AtomicU8,
    redraw: AtomicBool,
}

impl Default for SharedUi {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedUi {
    /// Starts in [`SelectionMode::File`] with a redraw pending.
    pub const fn new() -> Self {
        Self {
            mode: AtomicU8::new(SelectionMode::File as u8),
            redraw: AtomicBool::new(true),
        }
    }

    /// Moves to the next selection mode and requests a redraw.
    pub fn advance_mode(&self) {
        // single writer: only the mode button handler calls this
        let next = self.mode().cycle();
        self.mode.store(next.to_u8().unwrap_or(0), Ordering::Release);
        self.redraw.store(true, Ordering::Release);
    }

    /// The current selection mode.
    pub fn mode(&self) -> SelectionMode {
        SelectionMode::from_u8(self.mode.load(Ordering::Acquire)).unwrap_or_default()
    }

    /// Asks for the display to be redrawn on the next loop iteration.
    pub fn request_redraw(&self) {
        self.redraw.store(true, Ordering::Release);
    }

    /// Consumes a pending redraw request.
    pub fn take_redraw(&self) -> bool {
        self.redraw.swap(false, Ordering::AcqRel)
    }
}

/// Turns the encoder's raw quadrature count into detent steps.
///
/// The encoder produces several counts per mechanical click; a step is reported only when the count lands on a
/// detent boundary it was not already resting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EncoderDetents {
    last: i32,
    counts_per_detent: i32,
}

impl EncoderDetents {
    /// Starts tracking from `count`.
    pub fn new(count: i32, counts_per_detent: i32) -> Self {
        Self {
            last: count,
            counts_per_detent: counts_per_detent.max(1),
        }
    }

    /// Feeds the latest raw count.
    pub fn update(&mut self, count: i32) -> Option<Step> {
        if count == self.last || count % self.counts_per_detent != 0 {
            return None;
        }
        let step = if count > self.last {
            Step::Next
        } else {
            Step::Previous
        };
        self.last = count;
        Some(step)
    }
}

/// Scrolls a file name that does not fit beside the selection arrow.
///
/// Each step moves the window one character; after the window reaches the end it jumps back to the start and
/// rests for a few intervals before moving again. Playing a note pauses the scroll until the next file loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FileNameScroll {
    offset: usize,
    paused: bool,
    due: Option<Instant>,
    delay: Duration,
}

impl Default for FileNameScroll {
    fn default() -> Self {
        Self::new(&DeviceConfig::default())
    }
}

impl FileNameScroll {
    /// Constructs a scroll at the start of the name.
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            offset: 0,
            paused: false,
            due: None,
            delay: config.scroll_interval,
        }
    }

    /// Returns to the start of the name and resumes scrolling.
    pub fn restart(&mut self, config: &DeviceConfig) {
        *self = Self::new(config);
    }

    /// Stops scrolling until the next [`FileNameScroll::restart`].
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Whether the scroll is paused.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Returns the offset to draw from when a step is due.
    pub fn poll(&mut self, now: Instant, name_len: usize, config: &DeviceConfig) -> Option<usize> {
        let window = config.display_width.saturating_sub(1);
        if self.paused || name_len <= window {
            return None;
        }
        let due = *self.due.get_or_insert(now + self.delay);
        if now < due {
            return None;
        }

        let drawn = self.offset;
        self.offset += 1;
        if self.offset + window.saturating_sub(1) >= name_len {
            self.offset = 0;
            self.delay = config.scroll_interval * config.scroll_pause_factor;
        } else {
            self.delay = config.scroll_interval;
        }
        self.due = Some(now + self.delay);
        Some(drawn)
    }
}

/// The part of `name` visible from `offset` in a window `width` characters wide.
pub fn visible(name: &str, offset: usize, width: usize) -> &str {
    let start = name.char_indices().nth(offset).map_or(name.len(), |(i, _)| i);
    let rest = &name[start..];
    let end = rest.char_indices().nth(width).map_or(rest.len(), |(i, _)| i);
    &rest[..end]
}

/// How a favourite button press ended up, once it has been decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PressOutcome {
    /// Still undecided: releasing now recalls the selection.
    Pending,
    /// The hold programmed a favourite.
    Programmed,
    /// The hold reached the threshold but nothing could be programmed.
    Abandoned,
}

/// A favourite button held down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FavoritePress {
    /// Favourite that was active before the press toggled the selection.
    pub previous: Option<u8>,
    /// When the button went down.
    pub since: Instant,
    /// What the press has done so far.
    pub outcome: PressOutcome,
}

impl FavoritePress {
    /// Starts timing a press.
    pub fn new(previous: Option<u8>, since: Instant) -> Self {
        Self {
            previous,
            since,
            outcome: PressOutcome::Pending,
        }
    }

    /// Whether the press has been held long enough to program and has not been decided yet.
    pub fn is_long(&self, now: Instant, threshold: Duration) -> bool {
        self.outcome == PressOutcome::Pending && now.saturating_duration_since(self.since) >= threshold
    }
}
