#![no_std]

//! On-wire firmware update image container.
//!
//! An image is the concatenation of a fixed 64-byte [`Header`], a body of
//! `cipher_len` bytes (the [`AppDescriptor`] followed by the application
//! binary, possibly encrypted and PKCS#7 padded), and a trailer whose
//! sections are described by [`TrailerLayout`].
//!
//! This crate only reads and writes bytes. It performs no cryptographic
//! work and no I/O; the producer and the on-device verifier both build on
//! top of it.

use core::fmt;
use core::str::FromStr;

mod descriptor;
mod header;
mod trailer;


pub use descriptor::AppDescriptor;
pub use header::Header;
pub use trailer::TrailerLayout;

/// Image container magic (`b"ITBO"` on the wire).
pub const IMAGE_MAGIC: u32 = 0x4F42_5449;

/// Application descriptor magic.
pub const DESCRIPTOR_MAGIC: u32 = 0x4150_4400;

/// Container format version understood by this crate.
pub const HEADER_VERSION: u16 = 1;

/// Size of the serialized header in bytes.
pub const HEADER_LEN: usize = 64;

/// Size of the serialized application descriptor in bytes.
pub const DESCRIPTOR_LEN: usize = 64;

/// AES block size; the unit `cipher_len` is padded to.
pub const CIPHER_BLOCK_LEN: usize = 16;

/// Length of the initialization vector field.
pub const IV_LEN: usize = 16;

/// Upper bound on the plaintext body length accepted by the codec. Devices
/// additionally bound images by their slot capacity.
pub const MAX_IMAGE_SIZE: u32 = 8 * 1024 * 1024;

/// Alignment required for the in-slot vector table when the
/// [`Flags::VTOR_ALIGNED`] flag is set.
pub const VTOR_ALIGNMENT: u32 = 256;

/// Header flag bits.
///
/// The first three bits mirror the algorithm selector bytes and must agree
/// with them; the last two are builder policy flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u16);

impl Flags {
    /// Body is encrypted (`enc_algo` is non-NONE).
    pub const ENCRYPTED: Flags = Flags(1 << 0);
    /// Trailer carries a MAC (`auth_algo` is non-NONE).
    pub const HAS_MAC: Flags = Flags(1 << 1);
    /// Trailer carries a signature (`sig_algo` is non-NONE).
    pub const HAS_SIGNATURE: Flags = Flags(1 << 2);
    /// Image was built with anti-rollback intent.
    pub const ANTIROLLBACK: Flags = Flags(1 << 3);
    /// Application payload starts at a [`VTOR_ALIGNMENT`] boundary.
    pub const VTOR_ALIGNED: Flags = Flags(1 << 4);

    const KNOWN: u16 = 0x001F;

    pub const fn empty() -> Self {
        Flags(0)
    }

    /// Decode from the wire, rejecting unknown bits.
    pub fn from_bits(bits: u16) -> Result<Self, Error> {
        if bits & !Self::KNOWN != 0 {
            return Err(Error::InconsistentHeader);
        }
        Ok(Flags(bits))
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Flags) {
        self.0 |= other.0;
    }
}

/// Body encryption algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncAlgo {
    #[default]
    None,
    Aes128Cbc,
    Aes256Cbc,
    Aes128Ctr,
    Aes256Ctr,
}

impl EncAlgo {
    pub fn from_wire(b: u8) -> Result<Self, Error> {
        match b {
            0 => Ok(Self::None),
            1 => Ok(Self::Aes128Cbc),
            2 => Ok(Self::Aes256Cbc),
            3 => Ok(Self::Aes128Ctr),
            4 => Ok(Self::Aes256Ctr),
            _ => Err(Error::UnknownAlgorithm),
        }
    }

    pub const fn to_wire(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Aes128Cbc => 1,
            Self::Aes256Cbc => 2,
            Self::Aes128Ctr => 3,
            Self::Aes256Ctr => 4,
        }
    }

    /// Required key length in bytes, 0 for `None`.
    pub const fn key_len(self) -> usize {
        match self {
            Self::None => 0,
            Self::Aes128Cbc | Self::Aes128Ctr => 16,
            Self::Aes256Cbc | Self::Aes256Ctr => 32,
        }
    }

    pub const fn is_none(self) -> bool {
        matches!(self, Self::None)
    }
}

/// Integrity digest algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlgo {
    #[default]
    None,
    Crc32,
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgo {
    pub fn from_wire(b: u8) -> Result<Self, Error> {
        match b {
            0 => Ok(Self::None),
            1 => Ok(Self::Crc32),
            2 => Ok(Self::Md5),
            3 => Ok(Self::Sha1),
            4 => Ok(Self::Sha224),
            5 => Ok(Self::Sha256),
            6 => Ok(Self::Sha384),
            7 => Ok(Self::Sha512),
            _ => Err(Error::UnknownAlgorithm),
        }
    }

    pub const fn to_wire(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Crc32 => 1,
            Self::Md5 => 2,
            Self::Sha1 => 3,
            Self::Sha224 => 4,
            Self::Sha256 => 5,
            Self::Sha384 => 6,
            Self::Sha512 => 7,
        }
    }

    /// Length of the digest this algorithm contributes to the trailer.
    pub const fn digest_len(self) -> usize {
        match self {
            Self::None => 0,
            Self::Crc32 => 4,
            Self::Md5 => 16,
            Self::Sha1 => 20,
            Self::Sha224 => 28,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    pub const fn is_none(self) -> bool {
        matches!(self, Self::None)
    }
}

/// Authentication (MAC) algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthAlgo {
    #[default]
    None,
    HmacSha256,
    HmacSha512,
}

impl AuthAlgo {
    pub fn from_wire(b: u8) -> Result<Self, Error> {
        match b {
            0 => Ok(Self::None),
            1 => Ok(Self::HmacSha256),
            2 => Ok(Self::HmacSha512),
            _ => Err(Error::UnknownAlgorithm),
        }
    }

    pub const fn to_wire(self) -> u8 {
        match self {
            Self::None => 0,
            Self::HmacSha256 => 1,
            Self::HmacSha512 => 2,
        }
    }

    /// Length of the tag this algorithm contributes to the trailer.
    pub const fn tag_len(self) -> usize {
        match self {
            Self::None => 0,
            Self::HmacSha256 => 32,
            Self::HmacSha512 => 64,
        }
    }

    /// Smallest key accepted for this MAC.
    pub const fn min_key_len(self) -> usize {
        self.tag_len()
    }

    pub const fn is_none(self) -> bool {
        matches!(self, Self::None)
    }
}

/// Signature algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SigAlgo {
    #[default]
    None,
    EcdsaP256Sha256,
    Rsa2048Sha256,
}

impl SigAlgo {
    pub fn from_wire(b: u8) -> Result<Self, Error> {
        match b {
            0 => Ok(Self::None),
            1 => Ok(Self::EcdsaP256Sha256),
            2 => Ok(Self::Rsa2048Sha256),
            _ => Err(Error::UnknownAlgorithm),
        }
    }

    pub const fn to_wire(self) -> u8 {
        match self {
            Self::None => 0,
            Self::EcdsaP256Sha256 => 1,
            Self::Rsa2048Sha256 => 2,
        }
    }

    /// Length of the signature this algorithm contributes to the trailer.
    /// ECDSA signatures are raw `r || s`, RSA signatures are PKCS#1 v1.5.
    pub const fn sig_len(self) -> usize {
        match self {
            Self::None => 0,
            Self::EcdsaP256Sha256 => 64,
            Self::Rsa2048Sha256 => 256,
        }
    }

    pub const fn is_none(self) -> bool {
        matches!(self, Self::None)
    }
}

/// Firmware version triple, ordered lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

impl Version {
    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub fn to_wire(self) -> [u8; 6] {
        let mut out = [0u8; 6];
        out[0..2].copy_from_slice(&self.major.to_le_bytes());
        out[2..4].copy_from_slice(&self.minor.to_le_bytes());
        out[4..6].copy_from_slice(&self.patch.to_le_bytes());
        out
    }

    pub fn from_wire(bytes: &[u8; 6]) -> Self {
        Self {
            major: u16::from_le_bytes([bytes[0], bytes[1]]),
            minor: u16::from_le_bytes([bytes[2], bytes[3]]),
            patch: u16::from_le_bytes([bytes[4], bytes[5]]),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Error returned when a version string is not `MAJOR.MINOR.PATCH` with
/// components fitting in u16.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseVersionError;

impl fmt::Display for ParseVersionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "version is not of the form MAJOR.MINOR.PATCH")
    }
}

impl FromStr for Version {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let mut next = || {
            parts
                .next()
                .and_then(|p| p.parse::<u16>().ok())
                .ok_or(ParseVersionError)
        };
        let version = Version {
            major: next()?,
            minor: next()?,
            patch: next()?,
        };
        if parts.next().is_some() {
            return Err(ParseVersionError);
        }
        Ok(version)
    }
}

/// Smallest ciphertext length for `plain_len` bytes of plaintext under the
/// given encryption algorithm: identity when not encrypting, otherwise the
/// next multiple of the cipher block size that leaves room for at least one
/// PKCS#7 pad byte.
pub const fn padded_len(algo: EncAlgo, plain_len: u32) -> u32 {
    if algo.is_none() {
        plain_len
    } else {
        let block = CIPHER_BLOCK_LEN as u32;
        (plain_len / block + 1) * block
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Flags, algorithm selectors, lengths or reserved bytes disagree.
    InconsistentHeader,
    /// The header or descriptor magic is wrong.
    InvalidMagic,
    /// A length field is zero, too small or above the accepted bound.
    SizeOutOfBounds,
    /// An algorithm selector byte has no known meaning.
    UnknownAlgorithm,
    /// The container format version is not understood.
    UnsupportedVersion,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InconsistentHeader => write!(f, "inconsistent header fields"),
            Self::InvalidMagic => write!(f, "invalid magic"),
            Self::SizeOutOfBounds => write!(f, "length field out of bounds"),
            Self::UnknownAlgorithm => write!(f, "unknown algorithm selector"),
            Self::UnsupportedVersion => write!(f, "unsupported container version"),
        }
    }
}
