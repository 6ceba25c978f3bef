use crate::{
    padded_len, AuthAlgo, EncAlgo, Error, Flags, HashAlgo, SigAlgo, Version, DESCRIPTOR_LEN,
    HEADER_LEN, HEADER_VERSION, IMAGE_MAGIC, IV_LEN, MAX_IMAGE_SIZE, VTOR_ALIGNMENT,
};

/// Parsed image header.
///
/// All integers little-endian on the wire. The serialized layout is:
///
/// ```text
/// 0..4   magic        4..6   headerVer    6..8   flags
/// 8      encAlgo      9      hashAlgo     10     authAlgo    11  sigAlgo
/// 12..18 fwVersion    18..40 reserved (zero)
/// 40..44 plainLen     44..48 cipherLen    48..64 iv
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub flags: Flags,
    pub enc_algo: EncAlgo,
    pub hash_algo: HashAlgo,
    pub auth_algo: AuthAlgo,
    pub sig_algo: SigAlgo,
    pub fw_version: Version,
    pub plain_len: u32,
    pub cipher_len: u32,
    pub iv: [u8; IV_LEN],
}

impl Header {
    /// Compose a header from builder options, deriving the algorithm flag
    /// bits and `cipher_len` from `plain_len`.
    #[allow(clippy::too_many_arguments)]
    pub fn compose(
        enc_algo: EncAlgo,
        hash_algo: HashAlgo,
        auth_algo: AuthAlgo,
        sig_algo: SigAlgo,
        fw_version: Version,
        anti_rollback: bool,
        vtor_aligned: bool,
        plain_len: u32,
        iv: [u8; IV_LEN],
    ) -> Result<Self, Error> {
        let mut flags = Flags::empty();
        if !enc_algo.is_none() {
            flags.insert(Flags::ENCRYPTED);
        }
        if !auth_algo.is_none() {
            flags.insert(Flags::HAS_MAC);
        }
        if !sig_algo.is_none() {
            flags.insert(Flags::HAS_SIGNATURE);
        }
        if anti_rollback {
            flags.insert(Flags::ANTIROLLBACK);
        }
        if vtor_aligned {
            flags.insert(Flags::VTOR_ALIGNED);
        }

        let header = Header {
            flags,
            enc_algo,
            hash_algo,
            auth_algo,
            sig_algo,
            fw_version,
            plain_len,
            cipher_len: padded_len(enc_algo, plain_len),
            iv,
        };
        header.validate()?;
        Ok(header)
    }

    /// Serialize to the fixed 64-byte wire form.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&IMAGE_MAGIC.to_le_bytes());
        buf[4..6].copy_from_slice(&HEADER_VERSION.to_le_bytes());
        buf[6..8].copy_from_slice(&self.flags.bits().to_le_bytes());
        buf[8] = self.enc_algo.to_wire();
        buf[9] = self.hash_algo.to_wire();
        buf[10] = self.auth_algo.to_wire();
        buf[11] = self.sig_algo.to_wire();
        buf[12..18].copy_from_slice(&self.fw_version.to_wire());
        // 18..40 reserved, zero
        buf[40..44].copy_from_slice(&self.plain_len.to_le_bytes());
        buf[44..48].copy_from_slice(&self.cipher_len.to_le_bytes());
        buf[48..64].copy_from_slice(&self.iv);
        buf
    }

    /// Parse and validate the fixed 64-byte wire form.
    pub fn parse(buf: &[u8; HEADER_LEN]) -> Result<Self, Error> {
        let magic = u32::from_le_bytes(buf[0..4].try_into().expect("4 bytes"));
        if magic != IMAGE_MAGIC {
            return Err(Error::InvalidMagic);
        }
        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version != HEADER_VERSION {
            return Err(Error::UnsupportedVersion);
        }
        let flags = Flags::from_bits(u16::from_le_bytes([buf[6], buf[7]]))?;
        let enc_algo = EncAlgo::from_wire(buf[8])?;
        let hash_algo = HashAlgo::from_wire(buf[9])?;
        let auth_algo = AuthAlgo::from_wire(buf[10])?;
        let sig_algo = SigAlgo::from_wire(buf[11])?;
        let fw_version = Version::from_wire(buf[12..18].try_into().expect("6 bytes"));
        if buf[18..40].iter().any(|&b| b != 0) {
            return Err(Error::InconsistentHeader);
        }
        let plain_len = u32::from_le_bytes(buf[40..44].try_into().expect("4 bytes"));
        let cipher_len = u32::from_le_bytes(buf[44..48].try_into().expect("4 bytes"));
        let iv = buf[48..64].try_into().expect("16 bytes");

        let header = Header {
            flags,
            enc_algo,
            hash_algo,
            auth_algo,
            sig_algo,
            fw_version,
            plain_len,
            cipher_len,
            iv,
        };
        header.validate()?;
        Ok(header)
    }

    /// Check every header invariant that does not require body bytes.
    pub fn validate(&self) -> Result<(), Error> {
        // Each algorithm flag bit set iff the selector is non-NONE.
        if self.flags.contains(Flags::ENCRYPTED) == self.enc_algo.is_none() {
            return Err(Error::InconsistentHeader);
        }
        if self.flags.contains(Flags::HAS_MAC) == self.auth_algo.is_none() {
            return Err(Error::InconsistentHeader);
        }
        if self.flags.contains(Flags::HAS_SIGNATURE) == self.sig_algo.is_none() {
            return Err(Error::InconsistentHeader);
        }

        // An image with no integrity section cannot be validated at all.
        if self.hash_algo.is_none() {
            return Err(Error::InconsistentHeader);
        }

        if self.plain_len < DESCRIPTOR_LEN as u32 || self.plain_len > MAX_IMAGE_SIZE {
            return Err(Error::SizeOutOfBounds);
        }
        if self.cipher_len == 0 {
            return Err(Error::SizeOutOfBounds);
        }
        if self.cipher_len != padded_len(self.enc_algo, self.plain_len) {
            return Err(Error::InconsistentHeader);
        }

        // The IV carries entropy exactly when the body is encrypted.
        let iv_zero = self.iv.iter().all(|&b| b == 0);
        if self.enc_algo.is_none() != iv_zero {
            return Err(Error::InconsistentHeader);
        }

        // An aligned application payload must still fit behind the
        // descriptor.
        if self.plain_len <= self.body_app_offset() {
            return Err(Error::SizeOutOfBounds);
        }

        Ok(())
    }

    /// Offset of the application payload within the plaintext body: right
    /// after the descriptor, or at the next vector-table boundary when the
    /// image was built aligned.
    pub fn body_app_offset(&self) -> u32 {
        let descriptor = DESCRIPTOR_LEN as u32;
        if self.flags.contains(Flags::VTOR_ALIGNED) {
            descriptor.next_multiple_of(VTOR_ALIGNMENT)
        } else {
            descriptor
        }
    }
}
