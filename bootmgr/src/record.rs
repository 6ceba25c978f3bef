// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Crash-safe slot-state records.
//!
//! A single logical record describes the update state of the device. It is
//! stored twice, in two dedicated sectors written alternately with a
//! monotonically increasing generation; the copy with a valid CRC and the
//! greater generation is authoritative. A torn write can only ever corrupt
//! the older copy, which is ignored.

use crc::{Crc, CRC_32_ISCSI};
use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};

use crate::config::Region;
use crate::error::Error;
use crate::slot::SlotId;

/// Record magic (`b"RSBO"` on the wire).
pub const RECORD_MAGIC: u32 = 0x4F42_5352;

/// Serialized record length. The rest of the sector stays erased.
pub const RECORD_LEN: usize = 48;

/// `boot_tries` value meaning the active image has been confirmed good and
/// is no longer on probation.
pub const BOOT_CONFIRMED: u8 = 0xFF;

const CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// State of the slot currently receiving (or last having received) an
/// update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Empty,
    Writing,
    Valid,
    Active,
    Rejected,
}

impl SlotStatus {
    fn from_wire(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Empty),
            1 => Some(Self::Writing),
            2 => Some(Self::Valid),
            3 => Some(Self::Active),
            4 => Some(Self::Rejected),
            _ => None,
        }
    }

    const fn to_wire(self) -> u8 {
        match self {
            Self::Empty => 0,
            Self::Writing => 1,
            Self::Valid => 2,
            Self::Active => 3,
            Self::Rejected => 4,
        }
    }
}

/// The slot-state record.
///
/// ```text
/// 0..4   magic      4..8   generation   8  status   9  activeSlot
/// 10..42 imageHash  42     bootTries    43 pad      44..48 crc32
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRecord {
    pub generation: u32,
    /// Status of the non-active (update) slot.
    pub status: SlotStatus,
    pub active_slot: SlotId,
    /// Integrity digest of the last verified image, zero-padded to 32
    /// bytes. An identity, not a trust decision.
    pub image_hash: [u8; 32],
    /// Boots attempted since the last swap, or [`BOOT_CONFIRMED`].
    pub boot_tries: u8,
}

impl SlotRecord {
    /// State of a device that has never taken an update.
    pub const fn initial() -> Self {
        Self {
            generation: 0,
            status: SlotStatus::Empty,
            active_slot: SlotId::A,
            image_hash: [0u8; 32],
            boot_tries: BOOT_CONFIRMED,
        }
    }

    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut buf = [0u8; RECORD_LEN];
        buf[0..4].copy_from_slice(&RECORD_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&self.generation.to_le_bytes());
        buf[8] = self.status.to_wire();
        buf[9] = self.active_slot as u8;
        buf[10..42].copy_from_slice(&self.image_hash);
        buf[42] = self.boot_tries;
        // buf[43] pad, zero
        let crc = CRC.checksum(&buf[..44]);
        buf[44..48].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decode one stored copy. Returns `None` for anything that is not a
    /// well-formed record: erased sectors, torn writes, foreign data.
    pub fn decode(buf: &[u8; RECORD_LEN]) -> Option<Self> {
        let magic = u32::from_le_bytes(buf[0..4].try_into().expect("4 bytes"));
        if magic != RECORD_MAGIC {
            return None;
        }
        let crc = u32::from_le_bytes(buf[44..48].try_into().expect("4 bytes"));
        if crc != CRC.checksum(&buf[..44]) {
            return None;
        }
        Some(Self {
            generation: u32::from_le_bytes(buf[4..8].try_into().expect("4 bytes")),
            status: SlotStatus::from_wire(buf[8])?,
            active_slot: SlotId::from_index(buf[9])?,
            image_hash: buf[10..42].try_into().expect("32 bytes"),
            boot_tries: buf[42],
        })
    }
}

/// The two-sector ping-pong store.
pub struct RecordStore {
    sectors: [Region; 2],
    /// Which sector holds the authoritative copy, once known.
    current: Option<(SlotRecord, usize)>,
}

impl RecordStore {
    pub const fn new(record_a: Region, record_b: Region) -> Self {
        Self {
            sectors: [record_a, record_b],
            current: None,
        }
    }

    /// Read both copies and remember the authoritative one.
    pub fn load<F: ReadNorFlash>(&mut self, flash: &mut F) -> Result<Option<SlotRecord>, Error> {
        let mut best: Option<(SlotRecord, usize)> = None;
        for (idx, sector) in self.sectors.iter().enumerate() {
            let mut buf = [0u8; RECORD_LEN];
            if flash.read(sector.offset, &mut buf).is_err() {
                continue;
            }
            let Some(record) = SlotRecord::decode(&buf) else {
                continue;
            };
            match best {
                Some((current, _)) if current.generation >= record.generation => {}
                _ => best = Some((record, idx)),
            }
        }
        self.current = best;
        Ok(best.map(|(record, _)| record))
    }

    /// Authoritative record as of the last [`load`](Self::load) or
    /// [`commit`](Self::commit).
    pub fn current(&self) -> Option<SlotRecord> {
        self.current.map(|(record, _)| record)
    }

    /// Persist `record` with the next generation, alternating sectors.
    ///
    /// The currently authoritative sector is never touched, so power loss
    /// mid-commit leaves the previous generation intact. The write is read
    /// back before the new copy is trusted.
    pub fn commit<F: NorFlash>(
        &mut self,
        flash: &mut F,
        mut record: SlotRecord,
    ) -> Result<(), Error> {
        let (generation, target) = match self.current {
            Some((current, idx)) => (current.generation.wrapping_add(1), idx ^ 1),
            None => (1, 0),
        };
        record.generation = generation;

        let sector = self.sectors[target];
        flash
            .erase(sector.offset, sector.end())
            .map_err(|_| Error::FlashEraseFailed)?;
        let encoded = record.encode();
        flash
            .write(sector.offset, &encoded)
            .map_err(|_| Error::FlashProgramFailed)?;

        let mut readback = [0u8; RECORD_LEN];
        flash
            .read(sector.offset, &mut readback)
            .map_err(|_| Error::FlashProgramFailed)?;
        if readback != encoded {
            return Err(Error::FlashProgramFailed);
        }

        log::debug!(
            "slot record gen {} committed to sector {}",
            generation,
            target
        );
        self.current = Some((record, target));
        Ok(())
    }
}
