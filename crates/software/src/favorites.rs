//! Favourite patches persisted in non-volatile memory.
//!
//! Eight fixed-size records sit back to back at `RECORD_SIZE * slot`. Each record starts with its own slot number,
//! so a slot that was never programmed (erased or garbage bytes) is recognised by its tag not matching the address
//! it was read from.
//!
//! ```text
//! offset  size  field
//!      0     1  slot tag
//!      1    56  voice (LFO, CH, M1, C1, M2, C2)
//!     57    21  source file name, NUL padded (20 significant bytes)
//!     78     1  patch index within the file
//!     79     1  octave shift (two's complement)
//! ```

use crate::voice::Voice;
use core::fmt;

/// Number of favourite slots.
pub const FAVORITE_SLOTS: u8 = 8;
/// Significant bytes of the stored file name.
pub const FILE_NAME_WIDTH: usize = 20;
/// Size of one persisted record.
pub const RECORD_SIZE: usize = 80;

const TAG: usize = 0;
const VOICE: usize = TAG + 1;
const FILE_NAME: usize = VOICE + Voice::ENCODED_LEN;
const PATCH_INDEX: usize = FILE_NAME + FILE_NAME_WIDTH + 1;
const OCTAVE_SHIFT: usize = PATCH_INDEX + 1;
const _: () = assert!(OCTAVE_SHIFT + 1 == RECORD_SIZE);

/// File name as captured in a favourite.
pub type FavoriteName = heapless::String<FILE_NAME_WIDTH>;

/// Byte-addressed non-volatile memory (EEPROM, or a flash sector emulating one).
pub trait NonVolatileStore {
    /// Store error.
    type Error;

    /// Fills `buf` with the bytes starting at `offset`.
    fn get(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), Self::Error>;
    /// Writes `bytes` starting at `offset`. Must have completed by the time it returns.
    fn put(&mut self, offset: usize, bytes: &[u8]) -> Result<(), Self::Error>;
}

/// Errors from the favourites store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FavoriteError<E> {
    /// Slot outside `0..FAVORITE_SLOTS`.
    InvalidSlot(u8),
    /// The record read back after saving does not match what was written.
    VerifyFailed(u8),
    /// Underlying store error.
    Store(E),
}

impl<E> From<E> for FavoriteError<E> {
    fn from(error: E) -> Self {
        FavoriteError::Store(error)
    }
}

impl<E: fmt::Debug> fmt::Display for FavoriteError<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FavoriteError::InvalidSlot(slot) => write!(f, "Invalid favorite slot {} (must be 0-7)", slot),
            FavoriteError::VerifyFailed(slot) => write!(f, "Favorite slot {} did not read back", slot),
            FavoriteError::Store(e) => write!(f, "Store error: {:?}", e),
        }
    }
}

/// A captured patch together with where it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FavoriteRecord {
    /// Slot the record belongs to; doubles as the validity tag.
    pub slot: u8,
    /// The captured voice.
    pub voice: Voice,
    /// Name of the file the voice was loaded from, truncated to [`FILE_NAME_WIDTH`].
    pub file_name: FavoriteName,
    /// Index of the voice within that file.
    pub patch_index: u8,
    /// Octave shift active when the favourite was programmed.
    pub octave_shift: i8,
}

#[cfg(feature = "defmt")]
impl defmt::Format for FavoriteRecord {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(
            fmt,
            "FavoriteRecord {{ slot: {}, file_name: {}, patch_index: {}, octave_shift: {} }}",
            self.slot,
            self.file_name.as_str(),
            self.patch_index,
            self.octave_shift
        );
    }
}

impl FavoriteRecord {
    /// Builds a record, truncating `file_name` on a character boundary.
    pub fn new(slot: u8, voice: Voice, file_name: &str, patch_index: u8, octave_shift: i8) -> Self {
        let mut name = FavoriteName::new();
        for c in file_name.chars() {
            if name.push(c).is_err() {
                break;
            }
        }
        Self {
            slot,
            voice,
            file_name: name,
            patch_index,
            octave_shift,
        }
    }

    /// Serializes the record in its persisted layout.
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut bytes = [0; RECORD_SIZE];
        bytes[TAG] = self.slot;
        bytes[VOICE..FILE_NAME].copy_from_slice(&self.voice.to_bytes());
        let name = self.file_name.as_bytes();
        bytes[FILE_NAME..FILE_NAME + name.len()].copy_from_slice(name);
        bytes[PATCH_INDEX] = self.patch_index;
        bytes[OCTAVE_SHIFT] = self.octave_shift as u8;
        bytes
    }

    /// Reads a record in its persisted layout without judging the tag.
    pub fn from_bytes(bytes: &[u8; RECORD_SIZE]) -> Self {
        let mut voice = [0; Voice::ENCODED_LEN];
        voice.copy_from_slice(&bytes[VOICE..FILE_NAME]);

        let raw_name = &bytes[FILE_NAME..FILE_NAME + FILE_NAME_WIDTH];
        let len = raw_name.iter().position(|&b| b == 0).unwrap_or(FILE_NAME_WIDTH);
        let name = match core::str::from_utf8(&raw_name[..len]) {
            Ok(name) => name,
            Err(e) => core::str::from_utf8(&raw_name[..e.valid_up_to()]).unwrap_or_default(),
        };

        Self::new(
            bytes[TAG],
            Voice::from_bytes(&voice),
            name,
            bytes[PATCH_INDEX],
            bytes[OCTAVE_SHIFT] as i8,
        )
    }
}

/// Outcome of reading a slot.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Recall {
    /// The slot holds a programmed favourite.
    Set(FavoriteRecord),
    /// The slot was never programmed.
    Unset,
}

fn offset(slot: u8) -> Result<usize, u8> {
    if slot < FAVORITE_SLOTS {
        Ok(RECORD_SIZE * slot as usize)
    } else {
        Err(slot)
    }
}

/// Writes `record` into the slot it is tagged with.
pub fn save<S: NonVolatileStore>(store: &mut S, record: &FavoriteRecord) -> Result<(), FavoriteError<S::Error>> {
    let at = offset(record.slot).map_err(FavoriteError::InvalidSlot)?;
    info!("New favorite: {}", record.slot);
    store.put(at, &record.to_bytes())?;
    Ok(())
}

/// Reads `slot`, reporting [`Recall::Unset`] when the stored tag does not match.
pub fn load<S: NonVolatileStore>(store: &mut S, slot: u8) -> Result<Recall, FavoriteError<S::Error>> {
    let at = offset(slot).map_err(FavoriteError::InvalidSlot)?;
    let mut bytes = [0; RECORD_SIZE];
    store.get(at, &mut bytes)?;
    if bytes[TAG] != slot {
        warn!("Favorite index mismatch: wanted {}, got {}", slot, bytes[TAG]);
        return Ok(Recall::Unset);
    }
    Ok(Recall::Set(FavoriteRecord::from_bytes(&bytes)))
}
