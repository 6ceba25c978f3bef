use crc::{Crc, CRC_32_ISO_HDLC};
use digest::Digest;
use fwimage::HashAlgo;
use md5::Md5;
use sha1::Sha1;
use sha2::{Sha224, Sha256, Sha384, Sha512};

/// Largest digest any supported algorithm produces (SHA-512).
pub const MAX_DIGEST_LEN: usize = 64;

static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Streaming integrity digest over the image's hash algorithm set.
pub enum HashStream {
    Crc32(crc::Digest<'static, u32>),
    Md5(Md5),
    Sha1(Sha1),
    Sha224(Sha224),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl HashStream {
    /// Returns `None` for [`HashAlgo::None`].
    pub fn new(algo: HashAlgo) -> Option<Self> {
        match algo {
            HashAlgo::None => None,
            HashAlgo::Crc32 => Some(Self::Crc32(CRC32.digest())),
            HashAlgo::Md5 => Some(Self::Md5(Md5::new())),
            HashAlgo::Sha1 => Some(Self::Sha1(Sha1::new())),
            HashAlgo::Sha224 => Some(Self::Sha224(Sha224::new())),
            HashAlgo::Sha256 => Some(Self::Sha256(Sha256::new())),
            HashAlgo::Sha384 => Some(Self::Sha384(Sha384::new())),
            HashAlgo::Sha512 => Some(Self::Sha512(Sha512::new())),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Crc32(d) => d.update(data),
            Self::Md5(d) => d.update(data),
            Self::Sha1(d) => d.update(data),
            Self::Sha224(d) => d.update(data),
            Self::Sha256(d) => d.update(data),
            Self::Sha384(d) => d.update(data),
            Self::Sha512(d) => d.update(data),
        }
    }

    /// Write the digest into `out` and return its length.
    pub fn finalize(self, out: &mut [u8; MAX_DIGEST_LEN]) -> usize {
        match self {
            Self::Crc32(d) => {
                out[..4].copy_from_slice(&d.finalize().to_le_bytes());
                4
            }
            Self::Md5(d) => {
                let digest = d.finalize();
                out[..16].copy_from_slice(&digest);
                16
            }
            Self::Sha1(d) => {
                let digest = d.finalize();
                out[..20].copy_from_slice(&digest);
                20
            }
            Self::Sha224(d) => {
                let digest = d.finalize();
                out[..28].copy_from_slice(&digest);
                28
            }
            Self::Sha256(d) => {
                let digest = d.finalize();
                out[..32].copy_from_slice(&digest);
                32
            }
            Self::Sha384(d) => {
                let digest = d.finalize();
                out[..48].copy_from_slice(&digest);
                48
            }
            Self::Sha512(d) => {
                let digest = d.finalize();
                out[..64].copy_from_slice(&digest);
                64
            }
        }
    }
}
