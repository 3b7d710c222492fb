//! Radio-tap header prefixed to every captured beacon.
//!
//! ```text
//! timestamp:  u32  (4)   mactime, 1 µs per count
//! channel:    u16  (2)
//! rssi:       i8   (1)   dBm
//! reserved:   u8   (1)
//! ```

use crate::error::WipryError;

pub type RadioTapBytes = [u8; RadioTap::SIZE];

/// Per-beacon capture metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RadioTap {
    pub timestamp: u32,
    pub channel: u16,
    pub rssi: i8,
    pub reserved: [u8; 1],
}

impl RadioTap {
    /// Encoded size on the wire.
    pub const SIZE: usize = 8;

    pub fn new(timestamp: u32, channel: u16, rssi: i8) -> Self {
        Self {
            timestamp,
            channel,
            rssi,
            reserved: [0; 1],
        }
    }

    /// Serialize to bytes (little-endian).
    pub fn to_bytes(&self) -> RadioTapBytes {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[4..6].copy_from_slice(&self.channel.to_le_bytes());
        buf[6] = self.rssi as u8;
        buf[7] = self.reserved[0];
        buf
    }

    /// Deserialize from the first [`Self::SIZE`] bytes of `data`.
    pub fn from_bytes(data: &[u8]) -> Result<Self, WipryError> {
        let bytes: &RadioTapBytes = data
            .get(..Self::SIZE)
            .and_then(|b| b.try_into().ok())
            .ok_or(WipryError::Truncated {
                structure: "RadioTap",
                expected: Self::SIZE,
                actual: data.len(),
            })?;

        Ok(Self {
            timestamp: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            channel: u16::from_le_bytes([bytes[4], bytes[5]]),
            rssi: bytes[6] as i8,
            reserved: [bytes[7]],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_packed_little_endian() {
        let tap = RadioTap::new(0x0403_0201, 0x0605, -42);
        let bytes = tap.to_bytes();
        assert_eq!(bytes, [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0xD6, 0x00]);
    }

    #[test]
    fn decode_reads_negative_rssi() {
        let tap = RadioTap::from_bytes(&[0x10, 0, 0, 0, 11, 0, 0x9C, 0]).unwrap();
        assert_eq!(tap.timestamp, 16);
        assert_eq!(tap.channel, 11);
        assert_eq!(tap.rssi, -100);
    }

    #[test]
    fn decode_too_short() {
        let err = RadioTap::from_bytes(&[0u8; 7]).unwrap_err();
        assert!(matches!(err, WipryError::Truncated { actual: 7, .. }));
    }
}
