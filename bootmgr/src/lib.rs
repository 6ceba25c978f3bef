// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! On-device half of the firmware update pipeline.
//!
//! This crate ingests update images in a streaming manner, validates every
//! cryptographic invariant before a byte is trusted, and swaps the running
//! application across a reset:
//!
//! - [`update::UpdateManager`] — the session context the transport drives
//!   with `begin_update` / `feed_bytes` / `finish_update` / `arm_swap`.
//! - [`verify::VerifyEngine`] — the single-pass streaming validator.
//! - [`record`] / [`slot`] — crash-safe slot-state records (two-sector
//!   ping-pong) and streamed slot programming.
//! - [`loader`] — boot-time slot selection with fallback.
//! - `handoff` — the Cortex-M jump into the selected application
//!   (Cortex-M targets only).
//!
//! Flash access goes through the `embedded-storage` NorFlash traits; all
//! blocking is the caller's concern. [`mem::MemFlash`] provides an
//! in-memory NOR simulator so the whole stack runs on the host.

#![no_std]

#[cfg(test)]
extern crate std;

pub mod config;
pub mod error;
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod handoff;
pub mod loader;
pub mod mem;
pub mod record;
pub mod slot;
pub mod update;
pub mod verify;

#[cfg(test)]
mod tests;

pub use config::{Layout, Region, TrustAnchors};
pub use error::Error;
pub use loader::{select_boot_slot, BootChoice};
pub use record::{RecordStore, SlotRecord, SlotStatus};
pub use slot::SlotId;
pub use update::{UpdateManager, UpdateState};
pub use verify::VerifyEngine;
