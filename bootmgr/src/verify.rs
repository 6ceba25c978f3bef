// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Single-pass streaming image verification.
//!
//! Bytes arrive in arbitrary chunks and move through three phases:
//!
//! ```text
//! AWAIT_HEADER ──► AWAIT_BODY ──► AWAIT_TRAILER ──► complete
//! ```
//!
//! The integrity digest and the MAC run over the ciphertext, so one pass
//! suffices: every body byte enters the running digests before it is
//! decrypted, and only the resulting plaintext is programmed into the
//! write slot. The decryptor withholds the final cipher block until
//! [`finish`](VerifyEngine::finish) so the PKCS#7 padding is stripped
//! before anything reaches flash; no programmed byte is ever rewritten.
//!
//! Memory use is bounded by one header, one decrypt chunk and one
//! trailer's worth of buffer.

use embedded_storage::nor_flash::NorFlash;
use fwcrypto::{HashStream, MacStream, SigVerifier, StreamDecryptor, MAX_DIGEST_LEN, MAX_TAG_LEN};
use fwimage::{
    AppDescriptor, Header, TrailerLayout, Version, CIPHER_BLOCK_LEN, DESCRIPTOR_LEN, HEADER_LEN,
};

use crate::config::TrustAnchors;
use crate::error::Error;
use crate::slot::SlotWriter;

/// Largest possible trailer: SHA-512 digest, HMAC-SHA512 tag, RSA-2048
/// signature.
pub const MAX_TRAILER_LEN: usize = 64 + 64 + 256;

/// Ciphertext is decrypted through a stack buffer in units of this size.
const DECRYPT_CHUNK: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitHeader,
    AwaitBody,
    AwaitTrailer,
    Complete,
}

/// Outcome of a fully verified image.
#[derive(Debug, Clone, Copy)]
pub struct AcceptedImage {
    pub version: Version,
    /// Finalized integrity digest, zero-padded to 32 bytes. Recorded as
    /// the slot's image identity.
    pub image_hash: [u8; 32],
    pub descriptor: AppDescriptor,
}

/// The streaming verification state machine.
///
/// One instance per update session. Every chunk handed to
/// [`feed`](Self::feed) is either consumed in full or the session is
/// rejected; there is no partial acceptance.
pub struct VerifyEngine<'k> {
    anchors: TrustAnchors<'k>,
    running_version: Version,
    slot_capacity: u32,

    phase: Phase,
    header_buf: [u8; HEADER_LEN],
    header_len: usize,
    header: Option<Header>,
    layout: TrailerLayout,

    hash: Option<HashStream>,
    mac: Option<MacStream>,
    sig: Option<SigVerifier>,
    decryptor: Option<StreamDecryptor>,

    body_consumed: u32,
    desc_buf: [u8; DESCRIPTOR_LEN],
    desc_len: usize,

    trailer_buf: [u8; MAX_TRAILER_LEN],
    trailer_len: usize,
}

impl<'k> VerifyEngine<'k> {
    pub fn new(anchors: TrustAnchors<'k>, running_version: Version, slot_capacity: u32) -> Self {
        Self {
            anchors,
            running_version,
            slot_capacity,
            phase: Phase::AwaitHeader,
            header_buf: [0u8; HEADER_LEN],
            header_len: 0,
            header: None,
            layout: TrailerLayout {
                integrity_off: 0,
                integrity_len: 0,
                auth_off: 0,
                auth_len: 0,
                sig_off: 0,
                sig_len: 0,
                total_len: 0,
            },
            hash: None,
            mac: None,
            sig: None,
            decryptor: None,
            body_consumed: 0,
            desc_buf: [0u8; DESCRIPTOR_LEN],
            desc_len: 0,
            trailer_buf: [0u8; MAX_TRAILER_LEN],
            trailer_len: 0,
        }
    }

    /// Consume one chunk. A chunk may span phase boundaries; it is either
    /// consumed whole or the error rejects the session.
    pub fn feed<F: NorFlash>(
        &mut self,
        flash: &mut F,
        writer: &mut SlotWriter,
        mut chunk: &[u8],
    ) -> Result<(), Error> {
        while !chunk.is_empty() {
            match self.phase {
                Phase::AwaitHeader => {
                    let take = (HEADER_LEN - self.header_len).min(chunk.len());
                    self.header_buf[self.header_len..self.header_len + take]
                        .copy_from_slice(&chunk[..take]);
                    self.header_len += take;
                    chunk = &chunk[take..];
                    if self.header_len == HEADER_LEN {
                        self.accept_header(flash, writer)?;
                    }
                }
                Phase::AwaitBody => {
                    let header = self.header.ok_or(Error::InconsistentHeader)?;
                    let remaining = (header.cipher_len - self.body_consumed) as usize;
                    let take = remaining.min(chunk.len());
                    self.consume_body(flash, writer, &chunk[..take])?;
                    chunk = &chunk[take..];
                    if self.body_consumed == header.cipher_len {
                        self.phase = Phase::AwaitTrailer;
                    }
                }
                Phase::AwaitTrailer => {
                    let take = (self.layout.total_len - self.trailer_len).min(chunk.len());
                    self.trailer_buf[self.trailer_len..self.trailer_len + take]
                        .copy_from_slice(&chunk[..take]);
                    self.trailer_len += take;
                    chunk = &chunk[take..];
                    if !chunk.is_empty() {
                        // Bytes beyond the declared image length.
                        return Err(Error::SizeOutOfBounds);
                    }
                }
                Phase::Complete => return Err(Error::SizeOutOfBounds),
            }
        }
        Ok(())
    }

    /// Validate the trailer and commit the final plaintext block.
    ///
    /// Order matters: the integrity digest is checked first, then the MAC
    /// (which also covers the integrity section), then the signature
    /// (which covers both), and only then is the decryptor finalized and
    /// its padding judged. All comparisons are constant-time.
    pub fn finish<F: NorFlash>(
        &mut self,
        flash: &mut F,
        writer: &mut SlotWriter,
    ) -> Result<AcceptedImage, Error> {
        let header = self.header.ok_or(Error::SizeOutOfBounds)?;
        if self.phase != Phase::AwaitTrailer || self.trailer_len != self.layout.total_len {
            return Err(Error::SizeOutOfBounds);
        }

        let mut digest = [0u8; MAX_DIGEST_LEN];
        let hash = self.hash.take().ok_or(Error::InternalCryptoFailure)?;
        let digest_len = hash.finalize(&mut digest);
        let received_integrity = &self.trailer_buf[self.layout.integrity_range()];
        if !fwcrypto::ct_eq(&digest[..digest_len], received_integrity) {
            return Err(Error::IntegrityMismatch);
        }

        if let Some(mut mac) = self.mac.take() {
            mac.update(received_integrity);
            let mut tag = [0u8; MAX_TAG_LEN];
            let tag_len = mac.finalize(&mut tag);
            if !fwcrypto::ct_eq(&tag[..tag_len], &self.trailer_buf[self.layout.auth_range()]) {
                return Err(Error::AuthMismatch);
            }
        }

        if let Some(mut sig) = self.sig.take() {
            sig.update(&self.trailer_buf[..self.layout.sig_off]);
            if !sig.verify(&self.trailer_buf[self.layout.sig_range()]) {
                return Err(Error::SignatureInvalid);
            }
        }

        if let Some(decryptor) = self.decryptor.take() {
            let mut last = [0u8; CIPHER_BLOCK_LEN];
            let last_len = decryptor.finalize(&mut last)?;
            self.stage_plain(flash, writer, &last[..last_len])?;
        }

        // Exactly the declared plaintext must have reached the slot.
        if writer.bytes_written() != HEADER_LEN as u32 + header.plain_len {
            return Err(Error::InconsistentHeader);
        }

        // The descriptor is judged only now, once every trailer section
        // vouches for the bytes it was assembled from.
        if self.desc_len != DESCRIPTOR_LEN {
            return Err(Error::InconsistentHeader);
        }
        let descriptor = AppDescriptor::parse(&self.desc_buf)?;
        if descriptor.image_size != header.plain_len {
            return Err(Error::InconsistentHeader);
        }

        writer.flush(flash)?;

        let mut image_hash = [0u8; 32];
        let id_len = digest_len.min(32);
        image_hash[..id_len].copy_from_slice(&digest[..id_len]);

        self.phase = Phase::Complete;
        log::info!("image {} verified", header.fw_version);
        Ok(AcceptedImage {
            version: header.fw_version,
            image_hash,
            descriptor,
        })
    }

    fn accept_header<F: NorFlash>(
        &mut self,
        flash: &mut F,
        writer: &mut SlotWriter,
    ) -> Result<(), Error> {
        let header = Header::parse(&self.header_buf)?;

        // Anti-rollback: strictly greater than the running version.
        if header.fw_version <= self.running_version {
            return Err(Error::Rollback);
        }

        // The stored image is the header plus the plaintext body.
        if HEADER_LEN as u32 + header.plain_len > self.slot_capacity {
            return Err(Error::SizeOutOfBounds);
        }

        let mut hash = HashStream::new(header.hash_algo).ok_or(Error::InconsistentHeader)?;
        let mut mac = match header.auth_algo.is_none() {
            true => None,
            false => {
                let key = self.anchors.mac_key.ok_or(Error::InternalCryptoFailure)?;
                MacStream::new(header.auth_algo, key)?
            }
        };
        let mut sig = match header.sig_algo.is_none() {
            true => None,
            false => {
                let key = self.anchors.sig_pubkey.ok_or(Error::InternalCryptoFailure)?;
                SigVerifier::new(header.sig_algo, key)?
            }
        };
        let decryptor = match header.enc_algo.is_none() {
            true => None,
            false => {
                let key = self.anchors.cipher_key.ok_or(Error::InternalCryptoFailure)?;
                StreamDecryptor::new(header.enc_algo, key, &header.iv)?
            }
        };

        // Every stream covers the header bytes.
        hash.update(&self.header_buf);
        if let Some(mac) = mac.as_mut() {
            mac.update(&self.header_buf);
        }
        if let Some(sig) = sig.as_mut() {
            sig.update(&self.header_buf);
        }

        // The header is persisted ahead of the plaintext body.
        writer.program(flash, &self.header_buf)?;

        log::info!(
            "receiving image {}, {} body bytes",
            header.fw_version,
            header.cipher_len
        );

        self.layout = TrailerLayout::for_header(&header);
        self.hash = Some(hash);
        self.mac = mac;
        self.sig = sig;
        self.decryptor = decryptor;
        self.header = Some(header);
        self.phase = Phase::AwaitBody;
        Ok(())
    }

    fn consume_body<F: NorFlash>(
        &mut self,
        flash: &mut F,
        writer: &mut SlotWriter,
        data: &[u8],
    ) -> Result<(), Error> {
        // Ciphertext enters the running digests before anything else
        // happens to it.
        if let Some(hash) = self.hash.as_mut() {
            hash.update(data);
        }
        if let Some(mac) = self.mac.as_mut() {
            mac.update(data);
        }
        if let Some(sig) = self.sig.as_mut() {
            sig.update(data);
        }

        let mut decryptor = self.decryptor.take();
        let result = match decryptor.as_mut() {
            Some(decryptor) => {
                let mut out = [0u8; DECRYPT_CHUNK + CIPHER_BLOCK_LEN];
                let mut rest = data;
                loop {
                    if rest.is_empty() {
                        break Ok(());
                    }
                    let sub = &rest[..rest.len().min(DECRYPT_CHUNK)];
                    rest = &rest[sub.len()..];
                    let released = decryptor.update(sub, &mut out)?;
                    self.stage_plain(flash, writer, &out[..released])?;
                }
            }
            None => self.stage_plain(flash, writer, data),
        };
        self.decryptor = decryptor;
        result?;

        self.body_consumed += data.len() as u32;
        Ok(())
    }

    /// Route plaintext to the slot, capturing the descriptor on the way.
    fn stage_plain<F: NorFlash>(
        &mut self,
        flash: &mut F,
        writer: &mut SlotWriter,
        bytes: &[u8],
    ) -> Result<(), Error> {
        if self.desc_len < DESCRIPTOR_LEN {
            let take = (DESCRIPTOR_LEN - self.desc_len).min(bytes.len());
            self.desc_buf[self.desc_len..self.desc_len + take].copy_from_slice(&bytes[..take]);
            self.desc_len += take;
        }
        writer.program(flash, bytes)
    }
}
