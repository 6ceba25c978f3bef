use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, StreamCipher};
use aes::{Aes128, Aes256};
use fwimage::{EncAlgo, CIPHER_BLOCK_LEN, IV_LEN};

use crate::CryptoError;

type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;

enum DecryptKind {
    Aes128Cbc(Aes128CbcDec),
    Aes256Cbc(Aes256CbcDec),
    Aes128Ctr(Aes128Ctr),
    Aes256Ctr(Aes256Ctr),
}

impl DecryptKind {
    fn decrypt_block(&mut self, block: &mut [u8; CIPHER_BLOCK_LEN]) {
        match self {
            Self::Aes128Cbc(c) => c.decrypt_block_mut(GenericArray::from_mut_slice(block)),
            Self::Aes256Cbc(c) => c.decrypt_block_mut(GenericArray::from_mut_slice(block)),
            Self::Aes128Ctr(c) => c.apply_keystream(block),
            Self::Aes256Ctr(c) => c.apply_keystream(block),
        }
    }
}

/// Streaming block-cipher decryptor with PKCS#7 stripping.
///
/// Ciphertext arrives in arbitrary chunks. The decryptor always withholds
/// the most recent plaintext block: it is the candidate carrier of the
/// PKCS#7 padding and is only released, unpadded, by [`finalize`]. The
/// consumer can therefore program every released byte to flash immediately
/// and never has to rewrite one.
///
/// [`finalize`]: StreamDecryptor::finalize
pub struct StreamDecryptor {
    kind: DecryptKind,
    staged: [u8; CIPHER_BLOCK_LEN],
    staged_len: usize,
    held: [u8; CIPHER_BLOCK_LEN],
    has_held: bool,
}

impl StreamDecryptor {
    /// Returns `Ok(None)` for [`EncAlgo::None`]. The key length must match
    /// the cipher variant.
    pub fn new(algo: EncAlgo, key: &[u8], iv: &[u8; IV_LEN]) -> Result<Option<Self>, CryptoError> {
        if key.len() != algo.key_len() {
            return Err(CryptoError::InvalidKeyLength);
        }
        let kind = match algo {
            EncAlgo::None => return Ok(None),
            EncAlgo::Aes128Cbc => Aes128CbcDec::new_from_slices(key, iv)
                .map(DecryptKind::Aes128Cbc)
                .map_err(|_| CryptoError::InvalidKeyLength)?,
            EncAlgo::Aes256Cbc => Aes256CbcDec::new_from_slices(key, iv)
                .map(DecryptKind::Aes256Cbc)
                .map_err(|_| CryptoError::InvalidKeyLength)?,
            EncAlgo::Aes128Ctr => Aes128Ctr::new_from_slices(key, iv)
                .map(DecryptKind::Aes128Ctr)
                .map_err(|_| CryptoError::InvalidKeyLength)?,
            EncAlgo::Aes256Ctr => Aes256Ctr::new_from_slices(key, iv)
                .map(DecryptKind::Aes256Ctr)
                .map_err(|_| CryptoError::InvalidKeyLength)?,
        };
        Ok(Some(Self {
            kind,
            staged: [0u8; CIPHER_BLOCK_LEN],
            staged_len: 0,
            held: [0u8; CIPHER_BLOCK_LEN],
            has_held: false,
        }))
    }

    /// Feed ciphertext, receive released plaintext in `out`.
    ///
    /// `out` must hold at least `input.len() + CIPHER_BLOCK_LEN - 1` bytes;
    /// the number of bytes written is returned.
    pub fn update(&mut self, mut input: &[u8], out: &mut [u8]) -> Result<usize, CryptoError> {
        let mut written = 0;
        while !input.is_empty() {
            let take = (CIPHER_BLOCK_LEN - self.staged_len).min(input.len());
            self.staged[self.staged_len..self.staged_len + take].copy_from_slice(&input[..take]);
            self.staged_len += take;
            input = &input[take..];

            if self.staged_len == CIPHER_BLOCK_LEN {
                self.kind.decrypt_block(&mut self.staged);
                if self.has_held {
                    let end = written + CIPHER_BLOCK_LEN;
                    if end > out.len() {
                        return Err(CryptoError::BufferTooSmall);
                    }
                    out[written..end].copy_from_slice(&self.held);
                    written = end;
                }
                self.held = self.staged;
                self.has_held = true;
                self.staged_len = 0;
            }
        }
        Ok(written)
    }

    /// Validate and strip the PKCS#7 padding of the withheld final block.
    ///
    /// Writes the unpadded remainder into `out` and returns its length
    /// (0..=15). The ciphertext must have been a whole number of blocks.
    pub fn finalize(self, out: &mut [u8; CIPHER_BLOCK_LEN]) -> Result<usize, CryptoError> {
        if self.staged_len != 0 || !self.has_held {
            return Err(CryptoError::InvalidPadding);
        }
        let pad = self.held[CIPHER_BLOCK_LEN - 1] as usize;
        if pad == 0 || pad > CIPHER_BLOCK_LEN {
            return Err(CryptoError::InvalidPadding);
        }
        if self.held[CIPHER_BLOCK_LEN - pad..]
            .iter()
            .any(|&b| b != pad as u8)
        {
            return Err(CryptoError::InvalidPadding);
        }
        let len = CIPHER_BLOCK_LEN - pad;
        out[..len].copy_from_slice(&self.held[..len]);
        Ok(len)
    }
}

/// Encrypt `plain` with PKCS#7 padding into `out`, returning the ciphertext
/// length. With [`EncAlgo::None`] the plaintext is copied unpadded.
///
/// Producer-side counterpart of [`StreamDecryptor`]; the image body is
/// padded uniformly in both cipher modes so `cipher_len` always lands on a
/// block boundary.
pub fn encrypt_padded(
    algo: EncAlgo,
    key: &[u8],
    iv: &[u8; IV_LEN],
    plain: &[u8],
    out: &mut [u8],
) -> Result<usize, CryptoError> {
    if key.len() != algo.key_len() {
        return Err(CryptoError::InvalidKeyLength);
    }
    let total = fwimage::padded_len(algo, plain.len() as u32) as usize;
    if out.len() < total {
        return Err(CryptoError::BufferTooSmall);
    }

    out[..plain.len()].copy_from_slice(plain);
    if algo.is_none() {
        return Ok(total);
    }

    let pad = total - plain.len();
    out[plain.len()..total].fill(pad as u8);

    match algo {
        EncAlgo::None => unreachable!("handled above"),
        EncAlgo::Aes128Cbc => {
            let mut enc = Aes128CbcEnc::new_from_slices(key, iv)
                .map_err(|_| CryptoError::InvalidKeyLength)?;
            for block in out[..total].chunks_exact_mut(CIPHER_BLOCK_LEN) {
                enc.encrypt_block_mut(GenericArray::from_mut_slice(block));
            }
        }
        EncAlgo::Aes256Cbc => {
            let mut enc = Aes256CbcEnc::new_from_slices(key, iv)
                .map_err(|_| CryptoError::InvalidKeyLength)?;
            for block in out[..total].chunks_exact_mut(CIPHER_BLOCK_LEN) {
                enc.encrypt_block_mut(GenericArray::from_mut_slice(block));
            }
        }
        EncAlgo::Aes128Ctr => {
            let mut enc =
                Aes128Ctr::new_from_slices(key, iv).map_err(|_| CryptoError::InvalidKeyLength)?;
            enc.apply_keystream(&mut out[..total]);
        }
        EncAlgo::Aes256Ctr => {
            let mut enc =
                Aes256Ctr::new_from_slices(key, iv).map_err(|_| CryptoError::InvalidKeyLength)?;
            enc.apply_keystream(&mut out[..total]);
        }
    }
    Ok(total)
}
