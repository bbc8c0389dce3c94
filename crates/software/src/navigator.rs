//! Sequential navigation over the flat directory of patch files.
//!
//! Storage only offers forward reads through the directory, so reaching ordinal `k` means rewinding and reading
//! `k + 1` entries. With a handful of patch files on a card this is cheap enough that no index is cached beyond
//! the total count, which is taken once at mount.

use crate::patch::{self, LineSource};
use crate::voice::PatchBank;
use core::fmt;

/// Longest file name the navigator keeps.
pub const MAX_FILE_NAME_SIZE: usize = 128;

/// Entries starting with this are metadata left by other operating systems.
const HIDDEN_MARKER: char = '.';
/// Folder some hosts create on every volume.
const SYSTEM_VOLUME: &str = "System Volume Information";
/// How many doomed entries a single sweep pass collects before deleting them.
const SWEEP_BATCH: usize = 8;

/// A file name as stored by the navigator.
pub type FileName = heapless::String<MAX_FILE_NAME_SIZE>;

/// The removable storage the patch files live on.
pub trait Directory {
    /// Storage error.
    type Error;
    /// An open file, readable line by line.
    type File<'a>: LineSource
    where
        Self: 'a;

    /// Moves the directory cursor back to the first entry.
    fn rewind(&mut self) -> Result<(), Self::Error>;
    /// Reads the entry under the cursor into `name` and advances. Returns `false` past the last entry.
    fn next_entry(&mut self, name: &mut FileName) -> Result<bool, Self::Error>;
    /// Opens a file in the directory for reading.
    fn open(&mut self, name: &str) -> Result<Self::File<'_>, Self::Error>;
    /// Deletes an entry.
    fn remove(&mut self, name: &str) -> Result<(), Self::Error>;
}

/// Errors the navigator reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NavigationError<E> {
    /// No entry matched the requested name.
    FileNotFound,
    /// The directory holds no patch files.
    EmptyDirectory,
    /// Underlying storage error.
    Storage(E),
}

impl<E> From<E> for NavigationError<E> {
    fn from(error: E) -> Self {
        NavigationError::Storage(error)
    }
}

impl<E: fmt::Debug> fmt::Display for NavigationError<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NavigationError::FileNotFound => write!(f, "File not found"),
            NavigationError::EmptyDirectory => write!(f, "No files on storage"),
            NavigationError::Storage(e) => write!(f, "Storage error: {:?}", e),
        }
    }
}

/// Which way to move through the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Step {
    /// The entry after the current one, wrapping to the first.
    Next,
    /// The entry before the current one, wrapping to the last.
    Previous,
}

/// Where the navigator stands: the loaded file and the patch selected within it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Navigation {
    file_name: FileName,
    position: u32,
    total: u32,
    file_valid: bool,
    active_patch: u8,
}

impl Navigation {
    /// Constructs an unmounted navigation state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the loaded file.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Zero-based ordinal of the loaded file.
    pub fn position(&self) -> u32 {
        self.position
    }

    /// Number of entries counted at mount.
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Whether the loaded file produced any voices.
    pub fn is_file_valid(&self) -> bool {
        self.file_valid
    }

    /// Index of the selected patch within the loaded file.
    pub fn active_patch(&self) -> u8 {
        self.active_patch
    }

    pub(crate) fn set_active_patch(&mut self, patch: u8) {
        self.active_patch = patch;
    }

    /// Counts the directory, then loads its first entry.
    pub fn first<D: Directory>(
        &mut self,
        dir: &mut D,
        bank: &mut PatchBank,
    ) -> Result<(), NavigationError<D::Error>> {
        dir.rewind()?;
        let mut total = 0;
        let mut scratch = FileName::new();
        while dir.next_entry(&mut scratch)? {
            total += 1;
        }
        info!("{} files on storage", total);
        if total == 0 {
            return Err(NavigationError::EmptyDirectory);
        }

        let name = entry_at(dir, 0)?;
        self.load(dir, bank, name, 0)?;
        self.total = total;
        Ok(())
    }

    /// Moves one entry forward or back, wrapping at either end, and loads it.
    pub fn step<D: Directory>(
        &mut self,
        dir: &mut D,
        bank: &mut PatchBank,
        step: Step,
    ) -> Result<(), NavigationError<D::Error>> {
        if self.total == 0 {
            return Err(NavigationError::EmptyDirectory);
        }
        let position = match step {
            Step::Next if self.position + 1 >= self.total => 0,
            Step::Next => self.position + 1,
            Step::Previous if self.position == 0 => self.total - 1,
            Step::Previous => self.position - 1,
        };
        let name = entry_at(dir, position)?;
        self.load(dir, bank, name, position)
    }

    /// Loads the entry whose trimmed name equals the trimmed `request`.
    ///
    /// On [`NavigationError::FileNotFound`] neither this state nor `bank` is touched.
    pub fn find<D: Directory>(
        &mut self,
        dir: &mut D,
        bank: &mut PatchBank,
        request: &str,
    ) -> Result<(), NavigationError<D::Error>> {
        info!("Request: {}", request);
        let request = request.trim();
        dir.rewind()?;
        let mut name = FileName::new();
        for position in 0..self.total {
            if !dir.next_entry(&mut name)? {
                break;
            }
            if name.trim() == request {
                return self.load(dir, bank, name, position);
            }
        }
        warn!("File not found: {}", request);
        Err(NavigationError::FileNotFound)
    }

    /// Opens `name`, parses it into `bank`, and only then commits the new position.
    fn load<D: Directory>(
        &mut self,
        dir: &mut D,
        bank: &mut PatchBank,
        name: FileName,
        position: u32,
    ) -> Result<(), NavigationError<D::Error>> {
        let mut file = match dir.open(&name) {
            Ok(file) => file,
            Err(e) => {
                error!("Failed to read file {}", name.as_str());
                return Err(e.into());
            }
        };
        info!("Loading {}", name.as_str());
        let count = patch::parse(&mut file, bank);

        self.file_valid = count > 0;
        self.file_name = name;
        self.position = position;
        self.active_patch = 0;
        Ok(())
    }
}

/// Rewinds and reads forward to the entry at `position`.
fn entry_at<D: Directory>(dir: &mut D, position: u32) -> Result<FileName, NavigationError<D::Error>> {
    dir.rewind()?;
    let mut name = FileName::new();
    for _ in 0..=position {
        if !dir.next_entry(&mut name)? {
            return Err(NavigationError::FileNotFound);
        }
    }
    Ok(name)
}

/// Whether an entry is host metadata rather than a patch file.
pub fn is_hidden_entry(name: &str) -> bool {
    name.starts_with(HIDDEN_MARKER) || name == SYSTEM_VOLUME
}

/// Deletes hidden and system entries so they never show up as patch files. Run once at mount.
///
/// Entries that fail to delete are logged and left behind.
pub fn sweep_hidden_entries<D: Directory>(dir: &mut D) -> Result<(), D::Error> {
    loop {
        let mut doomed: heapless::Vec<FileName, SWEEP_BATCH> = heapless::Vec::new();
        let mut skipped = 0;
        let mut name = FileName::new();
        dir.rewind()?;
        while dir.next_entry(&mut name)? {
            if !is_hidden_entry(&name) {
                continue;
            }
            if doomed.push(name.clone()).is_err() {
                skipped += 1;
            }
        }

        let mut removed = 0;
        for name in &doomed {
            match dir.remove(name) {
                Ok(()) => {
                    info!("Removed meta file {}", name.as_str());
                    removed += 1;
                }
                Err(_) => warn!("Failed to delete meta file {}", name.as_str()),
            }
        }
        // another pass only helps if this one made room
        if skipped == 0 || removed == 0 {
            break;
        }
    }
    dir.rewind()
}
