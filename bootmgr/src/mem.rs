// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! In-memory NOR flash simulator.
//!
//! Behaves like real NOR: erase sets whole sectors to 0xFF, programming can
//! only clear bits, reads and writes are bounds- and alignment-checked.
//! Lets the full update pipeline run on the host, in tests and tooling.

use core::fmt;

use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemFlashError {
    NotAligned,
    OutOfBounds,
}

impl fmt::Display for MemFlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAligned => write!(f, "unaligned flash access"),
            Self::OutOfBounds => write!(f, "flash access out of bounds"),
        }
    }
}

impl NorFlashError for MemFlashError {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            Self::NotAligned => NorFlashErrorKind::NotAligned,
            Self::OutOfBounds => NorFlashErrorKind::OutOfBounds,
        }
    }
}

/// A `SIZE`-byte simulated NOR device with 4 KiB sectors and word writes.
pub struct MemFlash<const SIZE: usize> {
    pub mem: [u8; SIZE],
}

impl<const SIZE: usize> MemFlash<SIZE> {
    pub const fn new() -> Self {
        Self { mem: [0xFF; SIZE] }
    }
}

impl<const SIZE: usize> Default for MemFlash<SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const SIZE: usize> ErrorType for MemFlash<SIZE> {
    type Error = MemFlashError;
}

impl<const SIZE: usize> ReadNorFlash for MemFlash<SIZE> {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let offset = offset as usize;
        let end = offset
            .checked_add(bytes.len())
            .ok_or(MemFlashError::OutOfBounds)?;
        if end > SIZE {
            return Err(MemFlashError::OutOfBounds);
        }
        bytes.copy_from_slice(&self.mem[offset..end]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        SIZE
    }
}

impl<const SIZE: usize> NorFlash for MemFlash<SIZE> {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = 4096;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        let (from, to) = (from as usize, to as usize);
        if from % Self::ERASE_SIZE != 0 || to % Self::ERASE_SIZE != 0 {
            return Err(MemFlashError::NotAligned);
        }
        if from > to || to > SIZE {
            return Err(MemFlashError::OutOfBounds);
        }
        self.mem[from..to].fill(0xFF);
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        let offset = offset as usize;
        if offset % Self::WRITE_SIZE != 0 || bytes.len() % Self::WRITE_SIZE != 0 {
            return Err(MemFlashError::NotAligned);
        }
        let end = offset
            .checked_add(bytes.len())
            .ok_or(MemFlashError::OutOfBounds)?;
        if end > SIZE {
            return Err(MemFlashError::OutOfBounds);
        }
        // NOR programming can only clear bits.
        for (cell, byte) in self.mem[offset..end].iter_mut().zip(bytes) {
            *cell &= byte;
        }
        Ok(())
    }
}
