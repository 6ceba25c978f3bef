#![no_std]

//! Streaming crypto façade for the firmware image pipeline.
//!
//! Every primitive the image format names is represented as a closed tagged
//! variant carrying its state inline: [`HashStream`], [`MacStream`],
//! [`StreamDecryptor`] and [`SigVerifier`]. The verify engine stays a flat
//! state machine over these; nothing else in the workspace touches a
//! concrete algorithm crate. Hardware-accelerated backends substitute here,
//! behind the same surface.

#[cfg(test)]
extern crate std;

use core::fmt;

use subtle::ConstantTimeEq;

mod cipher;
mod hash;
mod mac;
mod sig;


pub use cipher::{encrypt_padded, StreamDecryptor};
pub use hash::{HashStream, MAX_DIGEST_LEN};
pub use mac::{MacStream, MAX_TAG_LEN};
pub use sig::SigVerifier;

/// Constant-time byte comparison.
///
/// The comparison time is independent of the position of the first
/// differing byte. Slices of different lengths compare unequal.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// Output buffer cannot hold the padded ciphertext.
    BufferTooSmall,
    /// Key length does not match the cipher variant.
    InvalidKeyLength,
    /// Trailing PKCS#7 bytes are malformed.
    InvalidPadding,
    /// Public key bytes do not decode for the selected algorithm.
    InvalidPublicKey,
    /// MAC key is shorter than the algorithm minimum.
    KeyTooShort,
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferTooSmall => write!(f, "output buffer too small"),
            Self::InvalidKeyLength => write!(f, "invalid cipher key length"),
            Self::InvalidPadding => write!(f, "invalid PKCS#7 padding"),
            Self::InvalidPublicKey => write!(f, "invalid public key"),
            Self::KeyTooShort => write!(f, "MAC key too short"),
        }
    }
}
