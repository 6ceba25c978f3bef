use crate::{Error, Version, DESCRIPTOR_LEN, DESCRIPTOR_MAGIC};

/// Application descriptor, the first 64 bytes of the plaintext body.
///
/// ```text
/// 0..4   magic        4..8   entryPoint   8..12  stackTop
/// 12..16 imageSize    16..22 appVersion   22..30 buildTime
/// 30..64 reserved (zero)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppDescriptor {
    /// Address of the application reset handler.
    pub entry_point: u32,
    /// Initial stack pointer value.
    pub stack_top: u32,
    /// Plaintext body size, descriptor included.
    pub image_size: u32,
    pub app_version: Version,
    /// Build timestamp, seconds since the Unix epoch.
    pub build_time: u64,
}

impl AppDescriptor {
    /// Compose a descriptor for a raw Cortex-M binary.
    ///
    /// The binary starts with its vector table: the initial main stack
    /// pointer at offset 0 and the reset vector at offset 4. `image_size`
    /// is the final plaintext body length including this descriptor and any
    /// alignment padding.
    pub fn from_binary(
        binary: &[u8],
        image_size: u32,
        app_version: Version,
        build_time: u64,
    ) -> Result<Self, Error> {
        if binary.len() < 8 {
            return Err(Error::SizeOutOfBounds);
        }
        Ok(Self {
            stack_top: u32::from_le_bytes(binary[0..4].try_into().expect("4 bytes")),
            entry_point: u32::from_le_bytes(binary[4..8].try_into().expect("4 bytes")),
            image_size,
            app_version,
            build_time,
        })
    }

    pub fn to_bytes(&self) -> [u8; DESCRIPTOR_LEN] {
        let mut buf = [0u8; DESCRIPTOR_LEN];
        buf[0..4].copy_from_slice(&DESCRIPTOR_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&self.entry_point.to_le_bytes());
        buf[8..12].copy_from_slice(&self.stack_top.to_le_bytes());
        buf[12..16].copy_from_slice(&self.image_size.to_le_bytes());
        buf[16..22].copy_from_slice(&self.app_version.to_wire());
        buf[22..30].copy_from_slice(&self.build_time.to_le_bytes());
        // 30..64 reserved, zero
        buf
    }

    pub fn parse(buf: &[u8; DESCRIPTOR_LEN]) -> Result<Self, Error> {
        let magic = u32::from_le_bytes(buf[0..4].try_into().expect("4 bytes"));
        if magic != DESCRIPTOR_MAGIC {
            return Err(Error::InvalidMagic);
        }
        if buf[30..].iter().any(|&b| b != 0) {
            return Err(Error::InconsistentHeader);
        }
        Ok(Self {
            entry_point: u32::from_le_bytes(buf[4..8].try_into().expect("4 bytes")),
            stack_top: u32::from_le_bytes(buf[8..12].try_into().expect("4 bytes")),
            image_size: u32::from_le_bytes(buf[12..16].try_into().expect("4 bytes")),
            app_version: Version::from_wire(buf[16..22].try_into().expect("6 bytes")),
            build_time: u64::from_le_bytes(buf[22..30].try_into().expect("8 bytes")),
        })
    }
}
