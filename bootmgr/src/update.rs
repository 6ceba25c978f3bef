// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! The update session state machine.
//!
//! ```text
//! IDLE ──begin──► RECEIVING ──feed*──► RECEIVING ──finish──► VERIFIED
//!                     │ error: slot erased, back to IDLE
//! VERIFIED ──arm_swap──► SWAP_ARMED ──reset──► loader boots the new slot
//! ```
//!
//! One [`UpdateManager`] value owns the flash, the layout, the trust
//! anchors and the session; the transport drives it with exactly three
//! calls plus `arm_swap`. There is no global state and no second session:
//! `begin_update` outside IDLE fails with [`Error::Busy`].

use embedded_storage::nor_flash::NorFlash;
use fwimage::Version;

use crate::config::{Layout, TrustAnchors};
use crate::error::Error;
use crate::loader;
use crate::record::{RecordStore, SlotRecord, SlotStatus, BOOT_CONFIRMED};
use crate::slot::{self, SlotId, SlotWriter};
use crate::verify::{AcceptedImage, VerifyEngine};

/// Externally visible session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    Idle,
    Receiving,
    Verified,
    SwapArmed,
}

enum Session<'k> {
    Idle,
    Receiving {
        engine: VerifyEngine<'k>,
        writer: SlotWriter,
        target: SlotId,
    },
    Verified {
        target: SlotId,
        accepted: AcceptedImage,
    },
    SwapArmed {
        target: SlotId,
    },
}

/// The owned update context.
pub struct UpdateManager<'k, F> {
    flash: F,
    layout: Layout,
    anchors: TrustAnchors<'k>,
    records: RecordStore,
    running_version: Version,
    session: Session<'k>,
    last_error: Option<Error>,
}

impl<'k, F: NorFlash> UpdateManager<'k, F> {
    /// Build the context and pick up where a previous session left off: a
    /// slot already verified but not yet armed (reset between the two)
    /// resumes in [`UpdateState::Verified`].
    pub fn new(
        mut flash: F,
        layout: Layout,
        anchors: TrustAnchors<'k>,
        running_version: Version,
    ) -> Result<Self, Error> {
        let mut records = RecordStore::new(layout.record_a, layout.record_b);
        let record = records.load(&mut flash)?;

        let mut session = Session::Idle;
        if let Some(record) = record {
            if record.status == SlotStatus::Valid {
                let target = record.active_slot.other();
                match loader::read_stored(&mut flash, layout.slot(target)) {
                    Ok((header, descriptor)) => {
                        log::info!("resuming verified image {} in {:?}", header.fw_version, target);
                        session = Session::Verified {
                            target,
                            accepted: AcceptedImage {
                                version: header.fw_version,
                                image_hash: record.image_hash,
                                descriptor,
                            },
                        };
                    }
                    Err(e) => log::warn!("stored image unreadable, dropping VALID state: {}", e),
                }
            }
        }

        Ok(Self {
            flash,
            layout,
            anchors,
            records,
            running_version,
            session,
            last_error: None,
        })
    }

    pub fn state(&self) -> UpdateState {
        match self.session {
            Session::Idle => UpdateState::Idle,
            Session::Receiving { .. } => UpdateState::Receiving,
            Session::Verified { .. } => UpdateState::Verified,
            Session::SwapArmed { .. } => UpdateState::SwapArmed,
        }
    }

    /// Start a session targeting `slot_hint` or the inactive slot. The
    /// target is erased and marked WRITING before any byte is accepted.
    pub fn begin_update(&mut self, slot_hint: Option<SlotId>) -> Result<(), Error> {
        if !matches!(self.session, Session::Idle) {
            return Err(Error::Busy);
        }

        let active = self.active_slot();
        let target = slot_hint.unwrap_or(active.other());
        if target == active {
            // The running slot is never written.
            return Err(Error::Busy);
        }

        let region = self.layout.slot(target);
        slot::erase_region(&mut self.flash, region)?;

        let mut record = self.current_record();
        record.status = SlotStatus::Writing;
        record.image_hash = [0u8; 32];
        self.records.commit(&mut self.flash, record)?;

        self.session = Session::Receiving {
            engine: VerifyEngine::new(self.anchors, self.running_version, region.len),
            writer: SlotWriter::new(region),
            target,
        };
        log::info!("update session started, writing {:?}", target);
        Ok(())
    }

    /// Stream a chunk of image bytes. Consumed whole, or the session is
    /// rejected with the write slot erased.
    pub fn feed_bytes(&mut self, chunk: &[u8]) -> Result<usize, Error> {
        let result = match &mut self.session {
            Session::Receiving { engine, writer, .. } => {
                engine.feed(&mut self.flash, writer, chunk)
            }
            _ => return Err(Error::Busy),
        };
        match result {
            Ok(()) => Ok(chunk.len()),
            Err(e) => {
                self.fail_session(e);
                Err(e)
            }
        }
    }

    /// Validate the trailer; on success the slot transitions
    /// WRITING → VALID with the image identity recorded.
    pub fn finish_update(&mut self) -> Result<(), Error> {
        let (result, target) = match &mut self.session {
            Session::Receiving {
                engine,
                writer,
                target,
            } => (engine.finish(&mut self.flash, writer), *target),
            _ => return Err(Error::Busy),
        };

        let accepted = match result {
            Ok(accepted) => accepted,
            Err(e) => {
                self.fail_session(e);
                return Err(e);
            }
        };

        let mut record = self.current_record();
        record.status = SlotStatus::Valid;
        record.image_hash = accepted.image_hash;
        if let Err(e) = self.records.commit(&mut self.flash, record) {
            self.fail_session(e);
            return Err(e);
        }

        self.session = Session::Verified { target, accepted };
        Ok(())
    }

    /// Atomically make the verified slot the boot choice for the next
    /// reset. Idempotent and crash-safe: the record commit either lands as
    /// one new generation or the previous record stays authoritative.
    pub fn arm_swap(&mut self) -> Result<(), Error> {
        match self.session {
            Session::Verified { target, accepted } => {
                let mut record = self.current_record();
                record.active_slot = target;
                // The previously active slot is now the rejected one.
                record.status = SlotStatus::Rejected;
                record.image_hash = accepted.image_hash;
                record.boot_tries = 0;
                self.records.commit(&mut self.flash, record)?;
                self.session = Session::SwapArmed { target };
                log::info!("swap armed: {:?} boots next", target);
                Ok(())
            }
            Session::SwapArmed { .. } => Ok(()),
            _ => Err(Error::Busy),
        }
    }

    /// Drop the session and erase the write slot. Not a failure: the last
    /// error is left untouched. A swap that is already armed stays armed.
    pub fn abort_update(&mut self) {
        match self.session {
            Session::Receiving { target, .. } | Session::Verified { target, .. } => {
                self.teardown(target);
                log::info!("update aborted");
            }
            Session::Idle | Session::SwapArmed { .. } => {}
        }
    }

    /// Clear the new image's probation counter. The application calls this
    /// once it considers itself healthy; without it the loader falls back
    /// after [`crate::config::MAX_BOOT_TRIES`] boots.
    pub fn mark_boot_successful(&mut self) -> Result<(), Error> {
        let mut record = self.current_record();
        if record.boot_tries == BOOT_CONFIRMED {
            return Ok(());
        }
        record.boot_tries = BOOT_CONFIRMED;
        self.records.commit(&mut self.flash, record)
    }

    pub fn current_version(&self) -> Version {
        self.running_version
    }

    /// Last session-terminating error, for diagnostics.
    pub fn last_error(&self) -> Option<Error> {
        self.last_error
    }

    pub fn active_slot(&self) -> SlotId {
        self.records
            .current()
            .map(|record| record.active_slot)
            .unwrap_or(SlotId::A)
    }

    /// Hand the flash back, e.g. ahead of the jump to the application.
    pub fn into_flash(self) -> F {
        self.flash
    }

    fn current_record(&self) -> SlotRecord {
        self.records.current().unwrap_or(SlotRecord::initial())
    }

    fn fail_session(&mut self, error: Error) {
        match self.session {
            Session::Receiving { target, .. } | Session::Verified { target, .. } => {
                log::warn!("update rejected: {}", error);
                self.teardown(target);
            }
            _ => {}
        }
        self.last_error = Some(error);
    }

    /// Erase the write slot and return to IDLE. The record transitions
    /// back to EMPTY so a later session starts from a clean state.
    fn teardown(&mut self, target: SlotId) {
        if slot::erase_region(&mut self.flash, self.layout.slot(target)).is_err() {
            log::warn!("failed to erase write slot {:?}", target);
        }
        let mut record = self.current_record();
        record.status = SlotStatus::Empty;
        record.image_hash = [0u8; 32];
        if self.records.commit(&mut self.flash, record).is_err() {
            log::warn!("failed to persist slot record");
        }
        self.session = Session::Idle;
    }
}
