//! The image build pipeline: compose, encrypt, append trailers, write out.

use std::io::Write;
use std::path::Path;

use fwcrypto::{encrypt_padded, HashStream, MacStream, MAX_DIGEST_LEN, MAX_TAG_LEN};
use fwimage::{
    AppDescriptor, Header, TrailerLayout, DESCRIPTOR_LEN, IV_LEN, MAX_IMAGE_SIZE, VTOR_ALIGNMENT,
};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Digest;

use crate::args::CreateArgs;
use crate::keys::Signer;
use crate::Error;

/// One pass over the input binary, producing the complete wire image.
///
/// Trailer sections are computed in an order such that each later section
/// covers all earlier ones, so the on-device verifier can finalize each
/// primitive at its own boundary in a single pass.
pub fn build_image(
    binary: &[u8],
    opts: &CreateArgs,
    signer: Option<&Signer>,
    build_time: u64,
) -> Result<Vec<u8>, Error> {
    if binary.len() < 8 {
        return Err(Error::InputTooSmall(binary.len()));
    }

    // Plaintext body: descriptor, optional vector-table alignment padding,
    // application binary.
    let app_offset = if opts.vtor_align {
        (DESCRIPTOR_LEN as u32).next_multiple_of(VTOR_ALIGNMENT) as usize
    } else {
        DESCRIPTOR_LEN
    };
    let plain_len = app_offset + binary.len();
    if plain_len as u64 > MAX_IMAGE_SIZE as u64 {
        return Err(Error::InputTooLarge {
            len: plain_len,
            max: MAX_IMAGE_SIZE,
        });
    }

    let descriptor =
        AppDescriptor::from_binary(binary, plain_len as u32, opts.version, build_time)?;
    let mut plain = vec![0u8; plain_len];
    plain[..DESCRIPTOR_LEN].copy_from_slice(&descriptor.to_bytes());
    plain[app_offset..].copy_from_slice(binary);
    tracing::debug!(
        plain_len,
        app_offset,
        version = %opts.version,
        "composed plaintext body"
    );

    // Encrypt with a fresh IV; a failing RNG is a hard error, never a
    // fixed IV.
    let mut iv = [0u8; IV_LEN];
    if !opts.enc_algo.is_none() {
        OsRng
            .try_fill_bytes(&mut iv)
            .map_err(|_| Error::IvGeneration)?;
    }
    let mut body = vec![0u8; plain.len() + 16];
    let body_len = encrypt_padded(opts.enc_algo, &opts.enc_key, &iv, &plain, &mut body)?;
    body.truncate(body_len);

    let header = Header::compose(
        opts.enc_algo,
        opts.hash_algo,
        opts.auth_algo,
        opts.sign_algo,
        opts.version,
        opts.anti_rollback,
        opts.vtor_align,
        plain.len() as u32,
        iv,
    )?;
    let layout = TrailerLayout::for_header(&header);

    let mut image = Vec::with_capacity(fwimage::HEADER_LEN + body.len() + layout.total_len);
    image.extend_from_slice(&header.to_bytes());
    image.extend_from_slice(&body);

    // Integrity digest over header and body.
    let mut hash = HashStream::new(opts.hash_algo).ok_or(Error::Format(
        fwimage::Error::InconsistentHeader,
    ))?;
    hash.update(&image);
    let mut digest = [0u8; MAX_DIGEST_LEN];
    let digest_len = hash.finalize(&mut digest);
    image.extend_from_slice(&digest[..digest_len]);

    // MAC over header, body and integrity.
    if let Some(mut mac) = MacStream::new(opts.auth_algo, &opts.auth_key)? {
        mac.update(&image);
        let mut tag = [0u8; MAX_TAG_LEN];
        let tag_len = mac.finalize(&mut tag);
        image.extend_from_slice(&tag[..tag_len]);
    }

    // Signature over everything before it.
    if let Some(signer) = signer {
        let mut digest = sha2::Sha256::new();
        digest.update(&image);
        let signature = signer.sign_digest(digest)?;
        image.extend_from_slice(&signature);
    }

    tracing::debug!(image_len = image.len(), "image assembled");
    Ok(image)
}

/// Write through a temp file in the target directory, then atomically
/// rename into place. The temp file is removed on any failure.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), Error> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let mut temp = match dir {
        Some(dir) => tempfile::NamedTempFile::new_in(dir),
        None => tempfile::NamedTempFile::new(),
    }
    .map_err(Error::CreateTempFile)?;
    temp.write_all(bytes).map_err(Error::WriteOutputFile)?;
    temp.persist(path).map_err(|e| Error::PersistOutputFile(e.error))?;
    Ok(())
}
