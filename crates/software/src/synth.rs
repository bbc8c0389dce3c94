//! The device state record and every operation the control loop performs on it.
//!
//! [`Synth`] owns both engine adapters, the patch storage, the favourites store and all main-loop state. The
//! control loop feeds it MIDI messages and front panel input; each call returns the [`Update`]s the display and
//! favourite indicators need. Nothing in here is touched from interrupt context except through [`SharedUi`].

use crate::configuration::{DeviceConfig, SelectionMode};
use crate::engine::{FmEngine, PsgEngine};
use crate::favorites::{self, FAVORITE_SLOTS, FavoriteError, FavoriteRecord, NonVolatileStore, Recall};
use crate::navigator::{self, Directory, Navigation, NavigationError, Step};
use crate::nrpn::NrpnAccumulator;
use crate::router::{self, Engine, Route};
use crate::sustain::Sustain;
use crate::ui::{self, EncoderDetents, FavoritePress, FileNameScroll, PressOutcome, SharedUi};
use crate::voice::{PatchBank, Voice};
use bitmask_enum::bitmask;
use embassy_time::Instant;
use wmidi::{Channel, MidiMessage, Note, U7, U14};

/// What changed as a result of an operation.
#[bitmask(u8)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Update {
    /// The display content changed.
    Redraw,
    /// The active favourite changed; the indicator LEDs need refreshing.
    Favorite,
    /// A favourite was recalled from a slot that was never programmed.
    NoFavorite,
}

/// The synthesizer's state, and the collaborators it drives.
pub struct Synth<'a, F, P, D, S> {
    fm: F,
    psg: P,
    dir: D,
    store: S,
    ui: &'a SharedUi,
    config: DeviceConfig,
    bank: PatchBank,
    navigation: Navigation,
    /// The voice currently on the FM chip, including live NRPN edits.
    voice: Voice,
    nrpn: NrpnAccumulator,
    fm_sustain: Sustain,
    psg_sustain: Sustain,
    favorite: Option<u8>,
    favorite_record: Option<FavoriteRecord>,
    press: Option<FavoritePress>,
    detents: EncoderDetents,
    scroll: FileNameScroll,
}

impl<'a, F, P, D, S> Synth<'a, F, P, D, S>
where
    F: FmEngine,
    P: PsgEngine,
    D: Directory,
    S: NonVolatileStore,
{
    /// Assembles the device. Nothing is loaded until [`Synth::mount`].
    pub fn new(fm: F, psg: P, dir: D, store: S, ui: &'a SharedUi, config: DeviceConfig) -> Self {
        Self {
            fm,
            psg,
            dir,
            store,
            ui,
            config,
            bank: PatchBank::new(),
            navigation: Navigation::new(),
            voice: Voice::default(),
            nrpn: NrpnAccumulator::new(),
            fm_sustain: Sustain::new(),
            psg_sustain: Sustain::new(),
            favorite: None,
            favorite_record: None,
            press: None,
            detents: EncoderDetents::new(0, config.counts_per_detent),
            scroll: FileNameScroll::new(&config),
        }
    }

    /// Cleans host metadata off the storage, counts the patch files and loads the first one.
    ///
    /// An error here leaves nothing to play; the caller decides how to fail.
    pub fn mount(&mut self) -> Result<(), NavigationError<D::Error>> {
        navigator::sweep_hidden_entries(&mut self.dir)?;
        self.navigation.first(&mut self.dir, &mut self.bank)?;
        self.file_loaded();
        Ok(())
    }

    /// Loads a file by name. On [`NavigationError::FileNotFound`] the loaded file and voices are kept.
    pub fn load_file(&mut self, name: &str) -> Result<Update, NavigationError<D::Error>> {
        self.navigation.find(&mut self.dir, &mut self.bank, name)?;
        self.file_loaded();
        Ok(Update::Redraw | Update::Favorite)
    }

    fn file_loaded(&mut self) {
        self.favorite = None;
        self.favorite_record = None;
        self.scroll.restart(&self.config);
        if let Some(voice) = self.bank.get(0) {
            self.voice = *voice;
            self.fm.set_voice(&self.voice);
        }
    }

    /// Handles a buffer of USB-MIDI event packets.
    pub fn receive_packets(&mut self, data: &[u8]) -> Update {
        let mut update = Update::none();
        for packet in data.chunks(4) {
            if packet.len() != 4 {
                error!("USB-MIDI Event Packets must always be 32 bits long");
                continue;
            }
            // byte 0 is the packet header; the MIDI event follows
            match MidiMessage::from_bytes(&packet[1..]) {
                Ok(message) => update |= self.receive_midi(&message),
                Err(_) => warn!("Malformed USB-MIDI Event Packet"),
            }
        }
        update
    }

    /// Routes one MIDI message to the engines.
    pub fn receive_midi(&mut self, message: &MidiMessage) -> Update {
        match *message {
            MidiMessage::NoteOn(channel, key, velocity) if u8::from(velocity) == 0 => {
                self.note_off(channel, key);
                Update::none()
            }
            MidiMessage::NoteOn(channel, key, velocity) => {
                self.note_on(channel, key, velocity);
                Update::none()
            }
            MidiMessage::NoteOff(channel, key, _) => {
                self.note_off(channel, key);
                Update::none()
            }
            MidiMessage::PitchBendChange(channel, value) => {
                self.pitch_bend(channel, value);
                Update::none()
            }
            MidiMessage::ProgramChange(channel, program) => match Route::of(channel) {
                Some(Route::Fm { .. }) => self.select_program(u8::from(program)),
                _ => Update::none(),
            },
            MidiMessage::ControlChange(channel, control, value) => {
                self.control_change(channel, u8::from(control), value);
                Update::none()
            }
            MidiMessage::SysEx(data) => {
                info!("SysEx: {} bytes", data.len());
                Update::none()
            }
            _ => {
                debug!("Ignoring unsupported MIDI message");
                Update::none()
            }
        }
    }

    fn note_on(&mut self, channel: Channel, key: Note, velocity: U7) {
        self.scroll.pause();
        let Some(route) = Route::of(channel) else {
            return;
        };
        trace!("NoteOn: channel {}, key {}", channel.number(), key as u8);
        match route {
            Route::Fm { velocity_sensitive } => {
                if !self.navigation.is_file_valid() && self.favorite.is_none() {
                    debug!("No voice loaded; ignoring key {}", key as u8);
                    return;
                }
                let Some(key) = router::transpose(key, self.config.fm_transpose) else {
                    return;
                };
                if self.fm_sustain.restrike(key) {
                    self.fm.deactivate(key);
                }
                self.fm.activate(key, velocity, velocity_sensitive);
            }
            Route::Psg { velocity_sensitive } => {
                let Some(key) = router::transpose(key, self.config.psg_transpose) else {
                    return;
                };
                if self.psg_sustain.restrike(key) {
                    self.psg.deactivate(key);
                }
                self.psg.activate(key, velocity, velocity_sensitive);
            }
            Route::Noise => self.psg.activate_noise(key, velocity, router::NOISE_MODE),
        }
    }

    fn note_off(&mut self, channel: Channel, key: Note) {
        let Some(route) = Route::of(channel) else {
            return;
        };
        trace!("NoteOff: channel {}, key {}", channel.number(), key as u8);
        match route {
            Route::Fm { .. } => {
                let Some(key) = router::transpose(key, self.config.fm_transpose) else {
                    return;
                };
                if self.fm_sustain.release(key) {
                    self.fm.deactivate(key);
                }
            }
            Route::Psg { .. } => {
                let Some(key) = router::transpose(key, self.config.psg_transpose) else {
                    return;
                };
                if self.psg_sustain.release(key) {
                    self.psg.deactivate(key);
                }
            }
            Route::Noise => self.psg.deactivate_noise(key),
        }
    }

    fn pitch_bend(&mut self, channel: Channel, value: U14) {
        let Some(route) = Route::of(channel) else {
            return;
        };
        let bend = router::bend_offset(value);
        match route.engine() {
            Engine::Fm => (0..F::CHANNELS).for_each(|ch| self.fm.adjust_pitch(ch, bend)),
            Engine::Psg => (0..P::CHANNELS).for_each(|ch| self.psg.pitch_change(ch, bend)),
        }
    }

    fn control_change(&mut self, channel: Channel, control: u8, value: U7) {
        if NrpnAccumulator::handles(control) {
            if let Some(edit) = self.nrpn.accept(channel.number(), control, u8::from(value)) {
                edit.apply_to(&mut self.fm);
                self.voice.apply(&edit);
            }
            return;
        }

        match (control, Route::of(channel)) {
            (router::MODULATION, Some(Route::Fm { .. })) => self.fm.set_lfo(value),
            (router::MODULATION, Some(Route::Noise)) => self.psg.set_noise_control(control, value),
            (router::SUSTAIN, Some(route)) => self.sustain(route.engine(), router::pedal_down(u8::from(value))),
            _ => debug!(
                "Ignoring Control Change {} on channel {}",
                control,
                channel.number()
            ),
        }
    }

    fn sustain(&mut self, engine: Engine, down: bool) {
        match engine {
            Engine::Fm => {
                if !self.fm_sustain.set_pedal(down) {
                    return;
                }
                if down {
                    self.fm.clamp_sustained();
                } else {
                    for key in self.fm_sustain.drain() {
                        self.fm.deactivate(key);
                    }
                    self.fm.release_sustained();
                }
            }
            Engine::Psg => {
                if !self.psg_sustain.set_pedal(down) {
                    return;
                }
                if down {
                    self.psg.clamp_sustained();
                } else {
                    for key in self.psg_sustain.drain() {
                        self.psg.deactivate(key);
                    }
                    self.psg.release_sustained();
                }
            }
        }
    }

    /// Loads a voice of the current file onto the FM chip.
    ///
    /// `255` selects the last valid voice; other values wrap modulo the number of valid voices.
    pub fn select_program(&mut self, program: u8) -> Update {
        let count = self.bank.valid_count();
        let Some(index) = router::resolve_program(program, count) else {
            warn!("No voices to select program {} from", program);
            return Update::none();
        };
        self.navigation.set_active_patch(index);
        if let Some(voice) = self.bank.get(index) {
            self.voice = *voice;
        }
        self.fm.set_voice(&self.voice);
        info!("Current Voice Number: {}/{}", index, count - 1);
        debug!("{}", self.voice);
        Update::Redraw
    }

    /// Feeds the encoder's raw count, acting on each completed detent.
    pub fn poll_encoder(&mut self, count: i32) -> Result<Update, NavigationError<D::Error>> {
        match self.detents.update(count) {
            Some(step) => self.rotate(step),
            None => Ok(Update::none()),
        }
    }

    /// One detent of the encoder, interpreted by the current selection mode.
    pub fn rotate(&mut self, step: Step) -> Result<Update, NavigationError<D::Error>> {
        match self.ui.mode() {
            SelectionMode::File => {
                self.navigation.step(&mut self.dir, &mut self.bank, step)?;
                self.file_loaded();
                Ok(Update::Redraw | Update::Favorite)
            }
            SelectionMode::Voice => {
                let current = self.navigation.active_patch();
                let program = match step {
                    Step::Next => current.wrapping_add(1),
                    Step::Previous => current.wrapping_sub(1),
                };
                let update = self.select_program(program);
                self.favorite = None;
                self.favorite_record = None;
                Ok(update | Update::Redraw | Update::Favorite)
            }
            SelectionMode::Octave => {
                self.fm.shift_octave(match step {
                    Step::Next => 1,
                    Step::Previous => -1,
                });
                Ok(Update::Redraw)
            }
        }
    }

    /// The LFO button.
    pub fn toggle_lfo(&mut self) {
        self.fm.toggle_lfo();
    }

    /// Silences both chips, restores their power-on state and reloads the live voice.
    pub fn reset_engines(&mut self) {
        self.fm.reset();
        self.psg.reset();
        self.fm_sustain = Sustain::new();
        self.psg_sustain = Sustain::new();
        self.fm.set_voice(&self.voice);
        info!("Sound chips reset");
    }

    /// A favourite button went down. Selecting the active favourite again deselects it.
    pub fn favorite_pressed(&mut self, slot: u8, now: Instant) -> Update {
        if slot >= FAVORITE_SLOTS {
            warn!("No favorite button {}", slot);
            return Update::none();
        }
        let previous = self.favorite;
        self.favorite = if previous == Some(slot) { None } else { Some(slot) };
        self.press = Some(FavoritePress::new(previous, now));
        Update::Favorite
    }

    /// Called every loop iteration while a favourite button stays down. Programs the slot once the hold is long
    /// enough, capturing the live voice, the file it came from and the octave shift.
    pub fn favorite_held(&mut self, now: Instant) -> Result<Update, FavoriteError<S::Error>> {
        let Some(press) = self.press.as_mut() else {
            return Ok(Update::none());
        };
        if !press.is_long(now, self.config.long_press) {
            return Ok(Update::none());
        }
        if !self.navigation.is_file_valid() {
            warn!("Cannot program a favorite from a file without voices");
            press.outcome = PressOutcome::Abandoned;
            // the press only toggled the selection; nothing was recalled for it
            self.favorite = press.previous;
            return Ok(Update::Favorite);
        }
        // holding the active favourite's button deselected it; program that slot anyway
        if self.favorite.is_none() {
            self.favorite = press.previous;
        }
        let Some(slot) = self.favorite else {
            press.outcome = PressOutcome::Abandoned;
            return Ok(Update::Favorite);
        };
        press.outcome = PressOutcome::Programmed;

        let record = FavoriteRecord::new(
            slot,
            self.voice,
            self.navigation.file_name(),
            self.navigation.active_patch(),
            self.fm.octave_shift(),
        );
        favorites::save(&mut self.store, &record)?;
        match favorites::load(&mut self.store, slot)? {
            Recall::Set(stored) if stored == record => {}
            _ => {
                error!("Favorite {} failed verification", slot);
                return Err(FavoriteError::VerifyFailed(slot));
            }
        }
        self.favorite_record = Some(record);
        Ok(Update::Redraw | Update::Favorite)
    }

    /// A favourite button came up. Unless the hold programmed the slot, recalls the selected favourite or, with
    /// none selected, returns to the loaded file's voice.
    pub fn favorite_released(&mut self) -> Result<Update, FavoriteError<S::Error>> {
        let Some(press) = self.press.take() else {
            return Ok(Update::none());
        };
        if press.outcome != PressOutcome::Pending {
            return Ok(Update::Favorite);
        }

        let Some(slot) = self.favorite else {
            self.restore_file_voice();
            return Ok(Update::Redraw | Update::Favorite);
        };
        match favorites::load(&mut self.store, slot)? {
            Recall::Set(record) => {
                info!("Recalled favorite {}", record);
                self.fm.set_octave_shift(record.octave_shift);
                self.voice = record.voice;
                self.fm.set_voice(&self.voice);
                self.favorite_record = Some(record);
                Ok(Update::Redraw | Update::Favorite)
            }
            Recall::Unset => {
                warn!("No favorite set in slot {}", slot);
                self.favorite = None;
                self.restore_file_voice();
                Ok(Update::Redraw | Update::Favorite | Update::NoFavorite)
            }
        }
    }

    fn restore_file_voice(&mut self) {
        self.favorite_record = None;
        if let Some(voice) = self.bank.get(self.navigation.active_patch()) {
            self.voice = *voice;
        }
        self.fm.set_voice(&self.voice);
    }

    /// Advances the file name scroll. Returns the visible part of the name when it moved.
    ///
    /// Only scrolls in [`SelectionMode::File`].
    pub fn poll_scroll(&mut self, now: Instant) -> Option<&str> {
        if self.ui.mode() != SelectionMode::File {
            return None;
        }
        let name = self.navigation.file_name();
        let offset = self.scroll.poll(now, name.len(), &self.config)?;
        Some(ui::visible(name, offset, self.config.display_width.saturating_sub(1)))
    }

    /// The current selection mode.
    pub fn mode(&self) -> SelectionMode {
        self.ui.mode()
    }

    /// File navigation state.
    pub fn navigation(&self) -> &Navigation {
        &self.navigation
    }

    /// The voices of the loaded file.
    pub fn bank(&self) -> &PatchBank {
        &self.bank
    }

    /// The voice currently on the FM chip.
    pub fn voice(&self) -> &Voice {
        &self.voice
    }

    /// The active favourite slot.
    pub fn favorite(&self) -> Option<u8> {
        self.favorite
    }

    /// The record behind the active favourite, once programmed or recalled.
    pub fn favorite_record(&self) -> Option<&FavoriteRecord> {
        self.favorite_record.as_ref()
    }

    /// The FM engine's octave shift.
    pub fn octave_shift(&self) -> i8 {
        self.fm.octave_shift()
    }

    /// Whether the sustain pedal of `engine` is down.
    pub fn is_sustained(&self, engine: Engine) -> bool {
        match engine {
            Engine::Fm => self.fm_sustain.is_engaged(),
            Engine::Psg => self.psg_sustain.is_engaged(),
        }
    }

    /// Device settings.
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FmCall, MemoryDirectory, MemoryStore, MockFm, MockPsg, PsgCall};
    use crate::voice::operator;
    use std::string::String;
    use std::vec;
    use wmidi::ControlFunction;

    type TestSynth<'a> = Synth<'a, MockFm, MockPsg, MemoryDirectory, MemoryStore>;

    fn block(index: usize, tl: u8) -> String {
        std::format!(
            "@:{index} Voice\nLFO: 0 0 0 0 0\nCH: 64 6 0 0 0 120 0\nM1: 31 10 0 6 2 {tl} 0 1 3 0 0\nC1: 31 10 0 6 2 0 0 1 3 0 0\nM2: 31 10 0 6 2 30 0 1 7 0 0\nC2: 31 10 0 6 2 0 0 1 7 0 0\n"
        )
    }

    /// A file of `count` voices whose first operator's TL equals the voice index plus ten.
    fn patches(count: usize) -> String {
        (0..count).map(|i| block(i, 10 + i as u8)).collect()
    }

    fn mounted<'a>(ui: &'a SharedUi, files: &[(&str, &str)], config: DeviceConfig) -> TestSynth<'a> {
        let mut synth = Synth::new(
            MockFm::default(),
            MockPsg::default(),
            MemoryDirectory::new(files),
            MemoryStore::default(),
            ui,
            config,
        );
        synth.mount().expect("mount should succeed");
        synth.fm.take();
        synth
    }

    fn standard(ui: &SharedUi) -> TestSynth<'_> {
        let four = patches(4);
        let two = patches(2);
        mounted(
            ui,
            &[
                ("brass.opm", four.as_str()),
                ("a_rather_long_patch_file_name.opm", two.as_str()),
                ("empty.opm", "// nothing\n"),
            ],
            DeviceConfig::default(),
        )
    }

    fn note_on(channel: Channel, key: Note, velocity: u8) -> MidiMessage<'static> {
        MidiMessage::NoteOn(channel, key, U7::from_u8_lossy(velocity))
    }

    fn note_off(channel: Channel, key: Note) -> MidiMessage<'static> {
        MidiMessage::NoteOff(channel, key, U7::MIN)
    }

    fn cc(channel: Channel, control: u8, value: u8) -> MidiMessage<'static> {
        MidiMessage::ControlChange(
            channel,
            ControlFunction(U7::from_u8_lossy(control)),
            U7::from_u8_lossy(value),
        )
    }

    fn tl(voice: &Voice) -> u8 {
        voice.operators[0][operator::TL]
    }

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    #[test]
    fn mount_sweeps_and_loads_first_voice() {
        let ui = SharedUi::new();
        let four = patches(4);
        let mut synth = Synth::new(
            MockFm::default(),
            MockPsg::default(),
            MemoryDirectory::new(&[("._brass.opm", ""), ("brass.opm", four.as_str())]),
            MemoryStore::default(),
            &ui,
            DeviceConfig::default(),
        );
        synth.mount().unwrap();
        assert_eq!("brass.opm", synth.navigation().file_name(), "Expected left but got right");
        assert_eq!(1, synth.navigation().total(), "Hidden entry should be gone before counting");
        assert_eq!(Some(10), synth.fm.last_voice().as_ref().map(tl), "Voice 0 should be on the chip");
    }

    #[test]
    fn notes_follow_the_channel_table() {
        let ui = SharedUi::new();
        let mut synth = standard(&ui);
        for channel in [Channel::Ch1, Channel::Ch2, Channel::Ch3, Channel::Ch4, Channel::Ch5, Channel::Ch6] {
            synth.receive_midi(&note_on(channel, Note::C4, 100));
        }
        assert_eq!(
            vec![
                FmCall::Activate(Note::C4, 100, false),
                FmCall::Activate(Note::C4, 100, true)
            ],
            synth.fm.take(),
            "Expected left but got right"
        );
        assert_eq!(
            vec![
                PsgCall::Activate(Note::C4, 100, false),
                PsgCall::Activate(Note::C4, 100, true),
                PsgCall::ActivateNoise(Note::C4, 100, router::NOISE_MODE),
            ],
            synth.psg.take(),
            "Expected left but got right"
        );

        synth.receive_midi(&note_off(Channel::Ch3, Note::C4));
        synth.receive_midi(&note_off(Channel::Ch5, Note::C4));
        assert_eq!(vec![FmCall::Deactivate(Note::C4)], synth.fm.take(), "Expected left but got right");
        assert_eq!(vec![PsgCall::DeactivateNoise(Note::C4)], synth.psg.take(), "Expected left but got right");
    }

    #[test]
    fn zero_velocity_note_on_releases() {
        let ui = SharedUi::new();
        let mut synth = standard(&ui);
        synth.receive_midi(&note_on(Channel::Ch2, Note::A4, 0));
        assert_eq!(vec![PsgCall::Deactivate(Note::A4)], synth.psg.take(), "Expected left but got right");
    }

    #[test]
    fn keys_are_transposed_per_engine() {
        let ui = SharedUi::new();
        let four = patches(4);
        let config = DeviceConfig {
            fm_transpose: 12,
            psg_transpose: -12,
            ..DeviceConfig::default()
        };
        let mut synth = mounted(&ui, &[("brass.opm", four.as_str())], config);
        synth.receive_midi(&note_on(Channel::Ch1, Note::C4, 90));
        synth.receive_midi(&note_on(Channel::Ch2, Note::C4, 90));
        synth.receive_midi(&note_on(Channel::Ch1, Note::G9, 90));
        assert_eq!(vec![FmCall::Activate(Note::C5, 90, false)], synth.fm.take(), "Out of range keys are dropped");
        assert_eq!(vec![PsgCall::Activate(Note::C3, 90, false)], synth.psg.take(), "Expected left but got right");
    }

    #[test]
    fn fm_needs_a_voice_or_favorite() {
        let ui = SharedUi::new();
        let mut synth = mounted(&ui, &[("empty.opm", "")], DeviceConfig::default());
        synth.receive_midi(&note_on(Channel::Ch1, Note::C4, 100));
        synth.receive_midi(&note_off(Channel::Ch1, Note::C4));
        synth.receive_midi(&note_on(Channel::Ch2, Note::C4, 100));
        assert_eq!(
            vec![FmCall::Deactivate(Note::C4)],
            synth.fm.take(),
            "Only the release should reach the FM engine"
        );
        assert_eq!(vec![PsgCall::Activate(Note::C4, 100, false)], synth.psg.take(), "PSG is unaffected");
    }

    #[test]
    fn pitch_bend_reaches_every_channel() {
        let ui = SharedUi::new();
        let mut synth = standard(&ui);
        synth.receive_midi(&MidiMessage::PitchBendChange(Channel::Ch3, U14::try_from(0x2100u16).unwrap()));
        synth.receive_midi(&MidiMessage::PitchBendChange(Channel::Ch4, U14::MIN));
        let expected: std::vec::Vec<FmCall> = (0..6).map(|ch| FmCall::AdjustPitch(ch, 256)).collect();
        assert_eq!(expected, synth.fm.take(), "Expected left but got right");
        let expected: std::vec::Vec<PsgCall> = (0..3).map(|ch| PsgCall::PitchChange(ch, -8192)).collect();
        assert_eq!(expected, synth.psg.take(), "Expected left but got right");
    }

    #[test]
    fn program_change_wraps_and_selects_last() {
        let ui = SharedUi::new();
        let mut synth = standard(&ui);
        let update = synth.receive_midi(&MidiMessage::ProgramChange(Channel::Ch1, U7::from_u8_lossy(7)));
        assert_eq!(Update::Redraw, update, "Expected left but got right");
        assert_eq!(3, synth.navigation().active_patch(), "7 modulo 4 voices");
        assert_eq!(Some(13), synth.fm.last_voice().as_ref().map(tl), "Expected left but got right");

        synth.select_program(0);
        synth.select_program(router::LAST_PROGRAM);
        assert_eq!(3, synth.navigation().active_patch(), "255 selects the last voice");

        synth.receive_midi(&MidiMessage::ProgramChange(Channel::Ch2, U7::from_u8_lossy(1)));
        assert_eq!(3, synth.navigation().active_patch(), "PSG channels do not change programs");
    }

    #[test]
    fn program_change_without_voices_is_ignored() {
        let ui = SharedUi::new();
        let mut synth = mounted(&ui, &[("empty.opm", "")], DeviceConfig::default());
        assert_eq!(Update::none(), synth.select_program(2), "Expected left but got right");
        assert!(synth.fm.take().is_empty(), "Nothing should reach the chip");
    }

    #[test]
    fn nrpn_edits_live_voice_and_chip() {
        let ui = SharedUi::new();
        let mut synth = standard(&ui);
        for (control, value) in [(99, 0), (98, 12), (6, 1)] {
            synth.receive_midi(&cc(Channel::Ch1, control, value));
        }
        assert!(synth.fm.take().is_empty(), "Partial sequences must not edit anything");
        assert_eq!(10, tl(synth.voice()), "Expected left but got right");

        synth.receive_midi(&cc(Channel::Ch1, 38, 0));
        assert_eq!(
            vec![FmCall::Operator("TL", 0, 0, 128)],
            synth.fm.take(),
            "Expected left but got right"
        );
        assert_eq!(128, tl(synth.voice()), "Live voice should carry the edit");
        assert_eq!(10, tl(synth.bank().get(0).unwrap()), "The loaded file is untouched");
    }

    #[test]
    fn modulation_and_unknown_controls() {
        let ui = SharedUi::new();
        let mut synth = standard(&ui);
        synth.receive_midi(&cc(Channel::Ch3, 1, 40));
        synth.receive_midi(&cc(Channel::Ch5, 1, 41));
        synth.receive_midi(&cc(Channel::Ch2, 1, 42));
        synth.receive_midi(&cc(Channel::Ch1, 7, 100));
        assert_eq!(vec![FmCall::SetLfo(40)], synth.fm.take(), "Expected left but got right");
        assert_eq!(vec![PsgCall::NoiseControl(1, 41)], synth.psg.take(), "Expected left but got right");
    }

    #[test]
    fn sustain_holds_released_keys_until_pedal_lifts() {
        let ui = SharedUi::new();
        let mut synth = standard(&ui);
        synth.receive_midi(&cc(Channel::Ch1, 64, 127));
        assert!(synth.is_sustained(Engine::Fm), "Pedal should be down");
        assert!(!synth.is_sustained(Engine::Psg), "Sustain is tracked per engine");
        synth.receive_midi(&note_on(Channel::Ch1, Note::C4, 100));
        synth.receive_midi(&note_on(Channel::Ch1, Note::E4, 100));
        synth.receive_midi(&note_off(Channel::Ch1, Note::C4));
        synth.receive_midi(&note_off(Channel::Ch1, Note::E4));
        assert_eq!(
            vec![
                FmCall::ClampSustained,
                FmCall::Activate(Note::C4, 100, false),
                FmCall::Activate(Note::E4, 100, false),
            ],
            synth.fm.take(),
            "Released keys should keep sounding"
        );

        synth.receive_midi(&cc(Channel::Ch1, 64, 0));
        assert_eq!(
            vec![
                FmCall::Deactivate(Note::C4),
                FmCall::Deactivate(Note::E4),
                FmCall::ReleaseSustained,
            ],
            synth.fm.take(),
            "Lifting the pedal should release the held keys"
        );
    }

    #[test]
    fn restruck_sustained_key_is_silenced_first() {
        let ui = SharedUi::new();
        let mut synth = standard(&ui);
        synth.receive_midi(&cc(Channel::Ch2, 64, 64));
        synth.receive_midi(&note_on(Channel::Ch2, Note::D4, 100));
        synth.receive_midi(&note_off(Channel::Ch2, Note::D4));
        synth.receive_midi(&note_on(Channel::Ch2, Note::D4, 80));
        synth.receive_midi(&cc(Channel::Ch2, 64, 0));
        assert_eq!(
            vec![
                PsgCall::ClampSustained,
                PsgCall::Activate(Note::D4, 100, false),
                PsgCall::Deactivate(Note::D4),
                PsgCall::Activate(Note::D4, 80, false),
                PsgCall::ReleaseSustained,
            ],
            synth.psg.take(),
            "Expected left but got right"
        );
    }

    #[test]
    fn usb_packets_are_routed() {
        let ui = SharedUi::new();
        let mut synth = standard(&ui);
        synth.receive_packets(&[0x09, 0x90, 60, 100, 0x08, 0x80, 60, 0, 0x09]);
        assert_eq!(
            vec![FmCall::Activate(Note::C4, 100, false), FmCall::Deactivate(Note::C4)],
            synth.fm.take(),
            "Expected left but got right"
        );
    }

    #[test]
    fn rotation_in_file_mode_changes_file() {
        let ui = SharedUi::new();
        let mut synth = standard(&ui);
        let update = synth.rotate(Step::Next).unwrap();
        assert_eq!(Update::Redraw | Update::Favorite, update, "Expected left but got right");
        assert_eq!(
            "a_rather_long_patch_file_name.opm",
            synth.navigation().file_name(),
            "Expected left but got right"
        );
        synth.rotate(Step::Previous).unwrap();
        synth.rotate(Step::Previous).unwrap();
        assert_eq!("empty.opm", synth.navigation().file_name(), "Previous should wrap to the last file");
    }

    #[test]
    fn rotation_in_voice_mode_changes_program() {
        let ui = SharedUi::new();
        ui.advance_mode();
        let mut synth = standard(&ui);
        synth.rotate(Step::Previous).unwrap();
        assert_eq!(3, synth.navigation().active_patch(), "Stepping back from 0 selects the last voice");
        synth.rotate(Step::Next).unwrap();
        assert_eq!(0, synth.navigation().active_patch(), "Stepping past the last voice wraps");
    }

    #[test]
    fn rotation_in_octave_mode_shifts() {
        let ui = SharedUi::new();
        ui.advance_mode();
        ui.advance_mode();
        let mut synth = standard(&ui);
        synth.poll_encoder(4).unwrap();
        synth.poll_encoder(8).unwrap();
        synth.poll_encoder(6).unwrap();
        synth.poll_encoder(4).unwrap();
        assert_eq!(
            vec![FmCall::ShiftOctave(1), FmCall::ShiftOctave(1), FmCall::ShiftOctave(-1)],
            synth.fm.take(),
            "Expected left but got right"
        );
        assert_eq!(1, synth.octave_shift(), "Expected left but got right");
    }

    #[test]
    fn load_missing_file_changes_nothing() {
        let ui = SharedUi::new();
        let mut synth = standard(&ui);
        synth.select_program(2);
        let (navigation, bank) = (synth.navigation().clone(), synth.bank().clone());
        assert_eq!(
            Err(NavigationError::FileNotFound),
            synth.load_file("nope.opm"),
            "Expected left but got right"
        );
        assert_eq!(&navigation, synth.navigation(), "Expected left but got right");
        assert_eq!(&bank, synth.bank(), "Expected left but got right");

        synth.load_file("empty.opm").unwrap();
        assert!(!synth.navigation().is_file_valid(), "Expected an invalid file");
    }

    #[test]
    fn long_press_programs_and_short_press_recalls() {
        let ui = SharedUi::new();
        let mut synth = standard(&ui);
        synth.select_program(2);
        synth.fm.set_octave_shift(-1);

        synth.favorite_pressed(3, at(0));
        assert_eq!(Ok(Update::none()), synth.favorite_held(at(1999)), "Not held long enough");
        assert_eq!(
            Ok(Update::Redraw | Update::Favorite),
            synth.favorite_held(at(2000)),
            "Expected left but got right"
        );
        assert_eq!(Ok(Update::none()), synth.favorite_held(at(3000)), "Programs only once per hold");
        synth.favorite_released().unwrap();
        let record = synth.favorite_record().expect("favorite should be recorded").clone();
        assert_eq!("brass.opm", record.file_name.as_str(), "Expected left but got right");
        assert_eq!(2, record.patch_index, "Expected left but got right");
        assert_eq!(-1, record.octave_shift, "Expected left but got right");
        assert_eq!(12, tl(&record.voice), "Expected left but got right");

        // move elsewhere, then recall
        synth.rotate(Step::Next).unwrap();
        synth.fm.set_octave_shift(0);
        synth.fm.take();
        synth.favorite_pressed(3, at(10_000));
        synth.favorite_released().unwrap();
        assert_eq!(Some(3), synth.favorite(), "Expected left but got right");
        assert_eq!(
            vec![FmCall::SetOctaveShift(-1), FmCall::SetVoice(record.voice)],
            synth.fm.take(),
            "Recall should restore octave and voice"
        );
    }

    #[test]
    fn reselecting_active_favorite_clears_it() {
        let ui = SharedUi::new();
        let mut synth = standard(&ui);
        synth.favorite_pressed(1, at(0));
        synth.favorite_held(at(2500)).unwrap();
        synth.favorite_released().unwrap();
        synth.select_program(1);
        synth.fm.take();

        synth.favorite_pressed(1, at(5000));
        let update = synth.favorite_released().unwrap();
        assert_eq!(None, synth.favorite(), "Pressing the active slot again deselects it");
        assert_eq!(Update::Redraw | Update::Favorite, update, "Expected left but got right");
        assert_eq!(
            Some(11),
            synth.fm.last_voice().as_ref().map(tl),
            "The loaded file's active voice should come back"
        );
    }

    #[test]
    fn holding_active_favorite_reprograms_it() {
        let ui = SharedUi::new();
        let mut synth = standard(&ui);
        synth.favorite_pressed(4, at(0));
        synth.favorite_held(at(2000)).unwrap();
        synth.favorite_released().unwrap();
        synth.select_program(3);

        synth.favorite_pressed(4, at(3000));
        assert_eq!(None, synth.favorite(), "Press alone toggles off");
        synth.favorite_held(at(5000)).unwrap();
        synth.favorite_released().unwrap();
        assert_eq!(Some(4), synth.favorite(), "The hold should program the slot it deselected");
        match favorites::load(&mut synth.store, 4) {
            Ok(Recall::Set(record)) => assert_eq!(3, record.patch_index, "Expected left but got right"),
            other => panic!("Slot 4 should be programmed, got {:?}", other),
        }
    }

    #[test]
    fn unset_slot_reports_no_favorite() {
        let ui = SharedUi::new();
        let mut synth = standard(&ui);
        synth.favorite_pressed(6, at(0));
        let update = synth.favorite_released().unwrap();
        assert!(update.contains(Update::NoFavorite), "Expected the no favorite notice");
        assert_eq!(None, synth.favorite(), "Expected left but got right");
        assert_eq!(None, synth.favorite_record(), "Expected left but got right");
        assert_eq!(Some(10), synth.fm.last_voice().as_ref().map(tl), "File voice should be restored");
    }

    #[test]
    fn invalid_file_cannot_be_programmed() {
        let ui = SharedUi::new();
        let mut synth = mounted(&ui, &[("empty.opm", "")], DeviceConfig::default());
        synth.favorite_pressed(2, at(0));
        assert_eq!(Ok(Update::Favorite), synth.favorite_held(at(2000)), "Expected left but got right");
        synth.favorite_released().unwrap();
        assert_eq!(
            Ok(Recall::Unset),
            favorites::load(&mut synth.store, 2),
            "Nothing should have been written"
        );
    }

    #[test]
    fn abandoned_hold_keeps_fm_silent_on_invalid_file() {
        let ui = SharedUi::new();
        let mut synth = mounted(&ui, &[("empty.opm", "")], DeviceConfig::default());
        synth.favorite_pressed(2, at(0));
        synth.favorite_held(at(2000)).unwrap();
        synth.favorite_released().unwrap();
        assert_eq!(None, synth.favorite(), "The abandoned press should not leave a selection behind");
        assert_eq!(None, synth.favorite_record(), "Expected left but got right");

        synth.fm.take();
        synth.receive_midi(&note_on(Channel::Ch1, Note::C4, 100));
        assert_eq!(Vec::<FmCall>::new(), synth.fm.take(), "No voice, so the FM engine stays silent");
    }

    #[test]
    fn abandoned_hold_restores_recalled_favorite() {
        let ui = SharedUi::new();
        let mut synth = standard(&ui);
        synth.favorite_pressed(0, at(0));
        synth.favorite_held(at(2000)).unwrap();
        synth.favorite_released().unwrap();
        synth.load_file("empty.opm").unwrap();
        synth.favorite_pressed(0, at(3000));
        synth.favorite_released().unwrap();

        synth.favorite_pressed(6, at(4000));
        synth.favorite_held(at(6000)).unwrap();
        synth.favorite_released().unwrap();
        assert_eq!(Some(0), synth.favorite(), "The favorite recalled before the press should stay active");
    }

    #[test]
    fn favorite_enables_fm_on_invalid_file() {
        let ui = SharedUi::new();
        let mut synth = standard(&ui);
        synth.favorite_pressed(0, at(0));
        synth.favorite_held(at(2000)).unwrap();
        synth.favorite_released().unwrap();
        synth.load_file("empty.opm").unwrap();
        synth.favorite_pressed(0, at(3000));
        synth.favorite_released().unwrap();
        synth.fm.take();

        synth.receive_midi(&note_on(Channel::Ch1, Note::C4, 100));
        assert_eq!(
            vec![FmCall::Activate(Note::C4, 100, false)],
            synth.fm.take(),
            "An active favorite should make the FM engine playable"
        );
    }

    #[test]
    fn rotation_clears_favorite() {
        let ui = SharedUi::new();
        ui.advance_mode();
        let mut synth = standard(&ui);
        synth.favorite_pressed(5, at(0));
        synth.favorite_held(at(2000)).unwrap();
        synth.favorite_released().unwrap();
        synth.rotate(Step::Next).unwrap();
        assert_eq!(None, synth.favorite(), "Expected left but got right");
    }

    #[test]
    fn scroll_pauses_on_note_and_resumes_on_file_change() {
        let ui = SharedUi::new();
        let mut synth = standard(&ui);
        synth.rotate(Step::Next).unwrap();
        assert_eq!(None, synth.poll_scroll(at(0)), "First poll arms the timer");
        assert_eq!(Some("a_rather_long_patch"), synth.poll_scroll(at(500)), "Expected left but got right");
        assert_eq!(Some("_rather_long_patch_"), synth.poll_scroll(at(1000)), "Expected left but got right");

        synth.receive_midi(&note_on(Channel::Ch2, Note::C4, 100));
        assert_eq!(None, synth.poll_scroll(at(1500)), "Playing should pause the scroll");

        synth.rotate(Step::Previous).unwrap();
        synth.rotate(Step::Next).unwrap();
        synth.poll_scroll(at(2000));
        assert_eq!(Some("a_rather_long_patch"), synth.poll_scroll(at(2500)), "Loading a file restarts it");
    }

    #[test]
    fn scroll_only_in_file_mode() {
        let ui = SharedUi::new();
        let mut synth = standard(&ui);
        synth.rotate(Step::Next).unwrap();
        ui.advance_mode();
        assert_eq!(None, synth.poll_scroll(at(0)), "Expected left but got right");
        assert_eq!(None, synth.poll_scroll(at(5000)), "Expected left but got right");
    }

    #[test]
    fn reset_reloads_live_voice() {
        let ui = SharedUi::new();
        let mut synth = standard(&ui);
        synth.select_program(1);
        synth.fm.take();
        synth.reset_engines();
        assert_eq!(
            vec![FmCall::Reset, FmCall::SetVoice(*synth.voice())],
            synth.fm.take(),
            "Expected left but got right"
        );
        assert_eq!(vec![PsgCall::Reset], synth.psg.take(), "Expected left but got right");
    }
}
