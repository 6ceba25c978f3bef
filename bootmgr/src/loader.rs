// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Boot-time slot selection.
//!
//! Runs before anything else trusts flash contents: picks the
//! authoritative slot record, applies the fallback policy for images that
//! never confirmed a healthy boot, sanity-checks the chosen slot and hands
//! back everything the MCU handoff needs.

use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};
use fwcrypto::{HashStream, MAX_DIGEST_LEN};
use fwimage::{AppDescriptor, Flags, Header, DESCRIPTOR_LEN, HEADER_LEN};

use crate::config::{Layout, Region, MAX_BOOT_TRIES};
use crate::error::Error;
use crate::record::{RecordStore, SlotRecord, SlotStatus, BOOT_CONFIRMED};
use crate::slot::SlotId;

/// The loader's boot decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootChoice {
    pub slot: SlotId,
    pub header: Header,
    pub descriptor: AppDescriptor,
    /// MCU address of the application vector table inside the slot.
    pub vector_table: u32,
}

/// Pick the slot to boot and account for the attempt.
///
/// An active image still on probation gets [`MAX_BOOT_TRIES`] resets to
/// confirm itself via `mark_boot_successful`; after that the previous slot
/// becomes active again and the failed one is rejected.
///
/// The stored image hash comparison is a quick identity check against
/// corruption, not a security decision; real validation happened when the
/// image was received. Encrypted bodies are not persisted as digested, so
/// for them the check is limited to the header and descriptor.
pub fn select_boot_slot<F: NorFlash>(flash: &mut F, layout: &Layout) -> Result<BootChoice, Error> {
    let mut records = RecordStore::new(layout.record_a, layout.record_b);
    let mut record = records.load(flash)?.unwrap_or(SlotRecord::initial());

    if record.boot_tries != BOOT_CONFIRMED && record.boot_tries >= MAX_BOOT_TRIES {
        let failed = record.active_slot;
        record.active_slot = failed.other();
        record.status = SlotStatus::Rejected;
        record.boot_tries = BOOT_CONFIRMED;
        record.image_hash = [0u8; 32];
        records.commit(flash, record)?;
        log::warn!("image in {:?} never confirmed, falling back", failed);
    }

    let slot = record.active_slot;
    let region = layout.slot(slot);
    let (header, descriptor) = read_stored(flash, region)?;

    // Identity check of the stored bytes. Meaningful only while the record
    // hash describes the active slot (post-swap) and only for plaintext
    // bodies.
    if record.status == SlotStatus::Rejected
        && record.image_hash != [0u8; 32]
        && !header.flags.contains(Flags::ENCRYPTED)
    {
        verify_stored_identity(flash, region, &header, &record.image_hash)?;
    }

    if record.boot_tries != BOOT_CONFIRMED {
        record.boot_tries += 1;
        records.commit(flash, record)?;
    }

    Ok(BootChoice {
        slot,
        header,
        descriptor,
        vector_table: layout.xip_base + region.offset + HEADER_LEN as u32 + header.body_app_offset(),
    })
}

/// Read and parse the header and descriptor of a stored image.
pub(crate) fn read_stored<F: ReadNorFlash>(
    flash: &mut F,
    region: Region,
) -> Result<(Header, AppDescriptor), Error> {
    let mut buf = [0u8; HEADER_LEN];
    flash
        .read(region.offset, &mut buf)
        .map_err(|_| Error::FlashProgramFailed)?;
    let header = Header::parse(&buf)?;

    let mut buf = [0u8; DESCRIPTOR_LEN];
    flash
        .read(region.offset + HEADER_LEN as u32, &mut buf)
        .map_err(|_| Error::FlashProgramFailed)?;
    let descriptor = AppDescriptor::parse(&buf)?;
    if descriptor.image_size != header.plain_len {
        return Err(Error::InconsistentHeader);
    }
    Ok((header, descriptor))
}

fn verify_stored_identity<F: ReadNorFlash>(
    flash: &mut F,
    region: Region,
    header: &Header,
    expected: &[u8; 32],
) -> Result<(), Error> {
    let mut hash = HashStream::new(header.hash_algo).ok_or(Error::InconsistentHeader)?;
    let total = HEADER_LEN as u32 + header.plain_len;
    let mut offset = 0u32;
    let mut buf = [0u8; 256];
    while offset < total {
        let take = ((total - offset) as usize).min(buf.len());
        flash
            .read(region.offset + offset, &mut buf[..take])
            .map_err(|_| Error::FlashProgramFailed)?;
        hash.update(&buf[..take]);
        offset += take as u32;
    }

    let mut digest = [0u8; MAX_DIGEST_LEN];
    let digest_len = hash.finalize(&mut digest);
    let mut padded = [0u8; 32];
    let id_len = digest_len.min(32);
    padded[..id_len].copy_from_slice(&digest[..id_len]);
    if !fwcrypto::ct_eq(&padded, expected) {
        log::error!("stored image does not match its recorded identity");
        return Err(Error::IntegrityMismatch);
    }
    Ok(())
}
