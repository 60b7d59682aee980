//! CRC-32 (IEEE) checksum utilities.

use crc::{Crc, CRC_32_ISO_HDLC};

/// IEEE 802.3 CRC-32, the common "crc32" polynomial.
pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Compute the CRC-32 checksum of a byte slice.
pub fn checksum(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// Incremental CRC-32 digest.
pub struct Digest {
    digest: crc::Digest<'static, u32>,
}

impl Digest {
    pub fn new() -> Self {
        Self {
            digest: CRC32.digest(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.digest.update(data);
    }

    pub fn finalize(self) -> u32 {
        self.digest.finalize()
    }
}

impl Default for Digest {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_basic() {
        let csum = checksum(b"hello world");
        assert_ne!(csum, 0);
    }

    #[test]
    fn crc32_incremental_matches_one_shot() {
        let data = b"hello world";
        let mut digest = Digest::new();
        digest.update(&data[..5]);
        digest.update(&data[5..]);
        assert_eq!(digest.finalize(), checksum(data));
    }
}
