//! The patch directory on the SD card.
//!
//! The card sits on SPI1 and is read through a FAT volume manager. Only the root directory of the first partition
//! is used; sub-directories, the volume label and hidden or system entries are skipped when walking it.

use core::fmt::Write as _;
use defmt::*;
use embassy_stm32::{gpio::Output, mode::Blocking, spi::Spi};
use embassy_time::Delay;
use embedded_hal_bus::spi::ExclusiveDevice;
use embedded_sdmmc::{
    DirEntry, Mode, RawDirectory, RawFile, SdCard, SdCardError, TimeSource, Timestamp, VolumeIdx,
    VolumeManager,
};
use heapless::Vec;
use mega_midi_lib::{
    navigator::{Directory, FileName},
    patch::LineSource,
};

type SpiDevice = ExclusiveDevice<Spi<'static, Blocking>, Output<'static>, Delay>;
type Card = SdCard<SpiDevice, Delay>;
type Volumes = VolumeManager<Card, FixedClock>;

/// Errors from the card or the file system on it.
pub type Error = embedded_sdmmc::Error<SdCardError>;

/// Longest line kept from a patch file; anything past it is dropped.
const LINE_CAPACITY: usize = 128;
const CHUNK: usize = 64;

/// The device has no RTC; files it writes (it never does) would carry this date.
pub struct FixedClock;

impl TimeSource for FixedClock {
    fn get_timestamp(&self) -> Timestamp {
        Timestamp {
            year_since_1970: 55,
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

/// Root directory of the card, walked with a cursor.
pub struct PatchDirectory {
    volumes: Volumes,
    root: RawDirectory,
    cursor: u32,
}

impl PatchDirectory {
    /// Initialises the card and opens the root directory of its first partition.
    pub fn mount(spi: SpiDevice) -> Result<Self, Error> {
        let card = SdCard::new(spi, Delay);
        info!("SD card of {} bytes", card.num_bytes().map_err(embedded_sdmmc::Error::DeviceError)?);

        let mut volumes = VolumeManager::new(card, FixedClock);
        let volume = volumes.open_raw_volume(VolumeIdx(0))?;
        let root = volumes.open_root_dir(volume)?;
        Ok(Self {
            volumes,
            root,
            cursor: 0,
        })
    }
}

/// Whether an entry is something the navigator should see.
///
/// Only 8.3 short names are visible here, so a host's `._name` metadata shows up under a mangled name the
/// navigator's sweep cannot recognise. Those files carry the hidden or system attribute, which is checked instead.
fn is_file(entry: &DirEntry) -> bool {
    let attributes = &entry.attributes;
    !(attributes.is_directory() || attributes.is_volume() || attributes.is_hidden() || attributes.is_system())
}

impl Directory for PatchDirectory {
    type Error = Error;
    type File<'a> = PatchFile<'a>;

    fn rewind(&mut self) -> Result<(), Error> {
        self.cursor = 0;
        Ok(())
    }

    fn next_entry(&mut self, name: &mut FileName) -> Result<bool, Error> {
        let wanted = self.cursor;
        let mut seen = 0;
        let mut found = false;
        name.clear();
        self.volumes.iterate_dir(self.root, |entry| {
            if found || !is_file(entry) {
                return;
            }
            if seen == wanted {
                // a short name always fits
                let _ = core::write!(name, "{}", entry.name);
                found = true;
            }
            seen += 1;
        })?;

        if found {
            self.cursor += 1;
        }
        Ok(found)
    }

    fn open(&mut self, name: &str) -> Result<PatchFile<'_>, Error> {
        let file = self.volumes.open_file_in_dir(self.root, name, Mode::ReadOnly)?;
        Ok(PatchFile {
            volumes: &mut self.volumes,
            file,
            chunk: [0; CHUNK],
            position: 0,
            filled: 0,
            line: Vec::new(),
        })
    }

    fn remove(&mut self, name: &str) -> Result<(), Error> {
        self.volumes.delete_file_in_dir(self.root, name)
    }
}

/// An open patch file, read line by line.
pub struct PatchFile<'a> {
    volumes: &'a mut Volumes,
    file: RawFile,
    chunk: [u8; CHUNK],
    position: usize,
    filled: usize,
    line: Vec<u8, LINE_CAPACITY>,
}

impl PatchFile<'_> {
    /// Next byte of the file, or `None` at its end. Read errors end the file early.
    fn next_byte(&mut self) -> Option<u8> {
        if self.position == self.filled {
            self.filled = match self.volumes.read(self.file, &mut self.chunk) {
                Ok(n) => n,
                Err(e) => {
                    warn!("Read failed: {}", Debug2Format(&e));
                    0
                }
            };
            self.position = 0;
            if self.filled == 0 {
                return None;
            }
        }
        let byte = self.chunk[self.position];
        self.position += 1;
        Some(byte)
    }
}

impl LineSource for PatchFile<'_> {
    fn next_line(&mut self) -> Option<&str> {
        self.line.clear();
        let mut any = false;
        while let Some(byte) = self.next_byte() {
            any = true;
            match byte {
                b'\n' => break,
                b'\r' => {}
                _ => {
                    let _ = self.line.push(byte);
                }
            }
        }
        if !any {
            return None;
        }
        // non-UTF-8 lines can't hold anything the parser looks for
        Some(core::str::from_utf8(&self.line).unwrap_or(""))
    }
}

impl Drop for PatchFile<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.volumes.close_file(self.file) {
            warn!("Closing file failed: {}", Debug2Format(&e));
        }
    }
}
