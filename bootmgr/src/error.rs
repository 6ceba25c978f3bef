// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

use core::fmt;

use fwcrypto::CryptoError;

/// Update pipeline error taxonomy. Each kind is final; nothing wraps.
///
/// Every error returned while a session is receiving aborts that session
/// and erases the write slot before control returns to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Caller invoked `abort_update`; not a failure.
    Aborted,
    /// Trailer MAC does not match.
    AuthMismatch,
    /// An update session is already in progress (or none is, for
    /// session-only operations).
    Busy,
    /// PKCS#7 padding of the decrypted body is malformed.
    DecryptPadInvalid,
    /// Flash erase failed.
    FlashEraseFailed,
    /// Flash program failed.
    FlashProgramFailed,
    /// Header fields, flags or the descriptor disagree with each other.
    InconsistentHeader,
    /// Trailer integrity digest does not match.
    IntegrityMismatch,
    /// A cryptographic primitive could not be set up, e.g. a required
    /// trust anchor is not provisioned or has the wrong shape.
    InternalCryptoFailure,
    /// Image or descriptor magic is wrong.
    InvalidMagic,
    /// Image version is not strictly greater than the running version.
    Rollback,
    /// Trailer signature does not verify.
    SignatureInvalid,
    /// A length is zero, truncated, oversized or exceeds the slot.
    SizeOutOfBounds,
    /// The image does not fit the write slot.
    StorageExhausted,
    /// An algorithm selector is not understood.
    UnknownAlgorithm,
    /// The container format version is not understood.
    UnsupportedVersion,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aborted => write!(f, "update aborted by caller"),
            Self::AuthMismatch => write!(f, "authentication tag mismatch"),
            Self::Busy => write!(f, "update session busy"),
            Self::DecryptPadInvalid => write!(f, "invalid decryption padding"),
            Self::FlashEraseFailed => write!(f, "flash erase failed"),
            Self::FlashProgramFailed => write!(f, "flash program failed"),
            Self::InconsistentHeader => write!(f, "inconsistent header"),
            Self::IntegrityMismatch => write!(f, "integrity digest mismatch"),
            Self::InternalCryptoFailure => write!(f, "internal crypto failure"),
            Self::InvalidMagic => write!(f, "invalid magic"),
            Self::Rollback => write!(f, "version rollback rejected"),
            Self::SignatureInvalid => write!(f, "signature invalid"),
            Self::SizeOutOfBounds => write!(f, "size out of bounds"),
            Self::StorageExhausted => write!(f, "write slot exhausted"),
            Self::UnknownAlgorithm => write!(f, "unknown algorithm"),
            Self::UnsupportedVersion => write!(f, "unsupported container version"),
        }
    }
}

impl From<fwimage::Error> for Error {
    fn from(e: fwimage::Error) -> Self {
        match e {
            fwimage::Error::InconsistentHeader => Self::InconsistentHeader,
            fwimage::Error::InvalidMagic => Self::InvalidMagic,
            fwimage::Error::SizeOutOfBounds => Self::SizeOutOfBounds,
            fwimage::Error::UnknownAlgorithm => Self::UnknownAlgorithm,
            fwimage::Error::UnsupportedVersion => Self::UnsupportedVersion,
        }
    }
}

impl From<CryptoError> for Error {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::InvalidPadding => Self::DecryptPadInvalid,
            CryptoError::BufferTooSmall
            | CryptoError::InvalidKeyLength
            | CryptoError::InvalidPublicKey
            | CryptoError::KeyTooShort => Self::InternalCryptoFailure,
        }
    }
}
