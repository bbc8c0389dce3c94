//! Favourite records in the last flash sector.
//!
//! The F767 has no EEPROM, so sector 11 stands in for one. Flash can only be written after an erase, and the
//! smallest erase is a whole sector, so every write rewrites the full favourites region.

use defmt::*;
use embassy_stm32::flash::{Blocking, Error, Flash};
use mega_midi_lib::favorites::{FAVORITE_SLOTS, NonVolatileStore, RECORD_SIZE};

/// Offset of sector 11 from the start of flash.
const SECTOR_OFFSET: u32 = 0x1C_0000;
const SECTOR_SIZE: u32 = 0x4_0000;
const REGION_SIZE: usize = FAVORITE_SLOTS as usize * RECORD_SIZE;

pub struct FlashStore {
    flash: Flash<'static, Blocking>,
}

impl FlashStore {
    pub fn new(flash: Flash<'static, Blocking>) -> Self {
        Self { flash }
    }
}

impl NonVolatileStore for FlashStore {
    type Error = Error;

    fn get(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), Error> {
        if offset + buf.len() > REGION_SIZE {
            return Err(Error::Size);
        }
        self.flash.blocking_read(SECTOR_OFFSET + offset as u32, buf)
    }

    fn put(&mut self, offset: usize, bytes: &[u8]) -> Result<(), Error> {
        if offset + bytes.len() > REGION_SIZE {
            return Err(Error::Size);
        }

        let mut region = [0u8; REGION_SIZE];
        self.flash.blocking_read(SECTOR_OFFSET, &mut region)?;
        let target = &mut region[offset..offset + bytes.len()];
        if target == bytes {
            debug!("Flash already holds these {} bytes", bytes.len());
            return Ok(());
        }
        target.copy_from_slice(bytes);

        info!("Rewriting favourites sector");
        self.flash
            .blocking_erase(SECTOR_OFFSET, SECTOR_OFFSET + SECTOR_SIZE)?;
        self.flash.blocking_write(SECTOR_OFFSET, &region)
    }
}
