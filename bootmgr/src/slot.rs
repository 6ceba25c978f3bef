// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Slot identity and streamed slot programming.

use embedded_storage::nor_flash::NorFlash;

use crate::config::Region;
use crate::error::Error;

/// Buffered program unit. Must be a multiple of the flash write size.
pub const PROGRAM_CHUNK: usize = 256;

/// One of the two firmware slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotId {
    A = 0,
    B = 1,
}

impl SlotId {
    pub const fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    pub fn from_index(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::A),
            1 => Some(Self::B),
            _ => None,
        }
    }
}

/// Erase a whole slot region.
pub fn erase_region<F: NorFlash>(flash: &mut F, region: Region) -> Result<(), Error> {
    flash
        .erase(region.offset, region.end())
        .map_err(|_| Error::FlashEraseFailed)
}

/// Append-only writer streaming bytes into a slot.
///
/// Bytes are buffered into [`PROGRAM_CHUNK`]-sized programs so arbitrarily
/// small input chunks still produce aligned flash writes. The final partial
/// program unit is padded with 0xFF (the erased state) by
/// [`flush`](Self::flush).
pub struct SlotWriter {
    region: Region,
    written: u32,
    page: [u8; PROGRAM_CHUNK],
    page_len: usize,
}

impl SlotWriter {
    pub fn new(region: Region) -> Self {
        Self {
            region,
            written: 0,
            page: [0xFF; PROGRAM_CHUNK],
            page_len: 0,
        }
    }

    /// Total bytes accepted, flushed or not.
    pub fn bytes_written(&self) -> u32 {
        self.written + self.page_len as u32
    }

    pub fn program<F: NorFlash>(&mut self, flash: &mut F, mut data: &[u8]) -> Result<(), Error> {
        if self.bytes_written() as usize + data.len() > self.region.len as usize {
            return Err(Error::StorageExhausted);
        }
        while !data.is_empty() {
            let take = (PROGRAM_CHUNK - self.page_len).min(data.len());
            self.page[self.page_len..self.page_len + take].copy_from_slice(&data[..take]);
            self.page_len += take;
            data = &data[take..];

            if self.page_len == PROGRAM_CHUNK {
                self.write_page(flash, PROGRAM_CHUNK)?;
            }
        }
        Ok(())
    }

    /// Program the final partial unit, padded to the flash write size.
    pub fn flush<F: NorFlash>(&mut self, flash: &mut F) -> Result<(), Error> {
        if self.page_len == 0 {
            return Ok(());
        }
        let padded = self.page_len.next_multiple_of(F::WRITE_SIZE);
        self.page[self.page_len..padded].fill(0xFF);
        let len = self.page_len;
        self.write_page(flash, padded)?;
        // Padding is not payload.
        self.written -= (padded - len) as u32;
        Ok(())
    }

    fn write_page<F: NorFlash>(&mut self, flash: &mut F, len: usize) -> Result<(), Error> {
        flash
            .write(self.region.offset + self.written, &self.page[..len])
            .map_err(|_| Error::FlashProgramFailed)?;
        self.written += len as u32;
        self.page_len = 0;
        Ok(())
    }
}
