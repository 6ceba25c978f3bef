use fwimage::AuthAlgo;
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};

use crate::CryptoError;

/// Largest tag any supported MAC produces (HMAC-SHA512).
pub const MAX_TAG_LEN: usize = 64;

/// Streaming MAC over the image's auth algorithm set.
pub enum MacStream {
    HmacSha256(Hmac<Sha256>),
    HmacSha512(Hmac<Sha512>),
}

impl MacStream {
    /// Returns `Ok(None)` for [`AuthAlgo::None`]. Keys shorter than the
    /// algorithm's tag length are rejected.
    pub fn new(algo: AuthAlgo, key: &[u8]) -> Result<Option<Self>, CryptoError> {
        if key.len() < algo.min_key_len() {
            return Err(CryptoError::KeyTooShort);
        }
        match algo {
            AuthAlgo::None => Ok(None),
            AuthAlgo::HmacSha256 => Hmac::<Sha256>::new_from_slice(key)
                .map(|m| Some(Self::HmacSha256(m)))
                .map_err(|_| CryptoError::KeyTooShort),
            AuthAlgo::HmacSha512 => Hmac::<Sha512>::new_from_slice(key)
                .map(|m| Some(Self::HmacSha512(m)))
                .map_err(|_| CryptoError::KeyTooShort),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::HmacSha256(m) => m.update(data),
            Self::HmacSha512(m) => m.update(data),
        }
    }

    /// Write the tag into `out` and return its length.
    pub fn finalize(self, out: &mut [u8; MAX_TAG_LEN]) -> usize {
        match self {
            Self::HmacSha256(m) => {
                let tag = m.finalize().into_bytes();
                out[..32].copy_from_slice(&tag);
                32
            }
            Self::HmacSha512(m) => {
                let tag = m.finalize().into_bytes();
                out[..64].copy_from_slice(&tag);
                64
            }
        }
    }
}
