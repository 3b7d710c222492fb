//! Fixed-resolution RSSI sweep frames.
//!
//! ## Wire format
//!
//! ```text
//! sync:          [u8; 4] = "RSSI"
//! data_type:     u8
//! reserved:      u8
//! sample_count:  u16
//! samples:       [f32; sample_count]   dBm, little-endian
//! ```
//!
//! `sample_count` always equals the data type's native resolution,
//! so the frame length is fixed for a given stream.

use std::time::Instant;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::WipryError;
use crate::message::{DataType, FrequencyBoundary};

/// Marks a sample that carries no measurement (outside the zoom window).
///
/// The accessory leaves those samples undefined on the wire, so their
/// bytes may even spell the sync word; the codec only treats a complete
/// matching header inside a frame as the start of the next one.
pub const INVALID_SAMPLE: f32 = f32::NAN;

/// Bytes per encoded sample.
pub const SAMPLE_SIZE: usize = 4;

// ── RssiHeader ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RssiHeader {
    pub data_type: u8,
    pub sample_count: u16,
}

impl RssiHeader {
    pub const SIZE: usize = 8;
    pub const SYNC: [u8; 4] = *b"RSSI";

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&Self::SYNC);
        buf[4] = self.data_type;
        buf[6..8].copy_from_slice(&self.sample_count.to_le_bytes());
        buf
    }

    /// Parse a header; the sync word must already be at `data[0]`.
    pub fn decode(data: &[u8]) -> Result<Self, WipryError> {
        if data.len() < Self::SIZE {
            return Err(WipryError::Truncated {
                structure: "RssiHeader",
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        if data[0..4] != Self::SYNC {
            return Err(WipryError::InvalidHeader("missing RSSI sync word"));
        }
        Ok(Self {
            data_type: data[4],
            sample_count: u16::from_le_bytes([data[6], data[7]]),
        })
    }

    /// Full frame length for `resolution` samples.
    pub fn frame_len(resolution: usize) -> usize {
        Self::SIZE + resolution * SAMPLE_SIZE
    }
}

// ── RssiFrame ────────────────────────────────────────────────────

/// One decoded RSSI sweep.
#[derive(Debug, Clone)]
pub struct RssiFrame {
    data_type: DataType,
    samples: Vec<f32>,
    timestamp: Instant,
}

impl RssiFrame {
    pub fn new(data_type: DataType, samples: Vec<f32>, timestamp: Instant) -> Self {
        Self {
            data_type,
            samples,
            timestamp,
        }
    }

    /// Decode a complete frame of `expected` type.
    pub fn decode(
        frame: &[u8],
        expected: DataType,
        timestamp: Instant,
    ) -> Result<Self, WipryError> {
        let resolution = expected
            .resolution()
            .ok_or(WipryError::UnstreamableDataType(expected))?;
        let header = RssiHeader::decode(frame)?;
        if header.data_type != expected as u8 {
            return Err(WipryError::InvalidHeader("data type does not match stream"));
        }
        if header.sample_count as usize != resolution {
            return Err(WipryError::LengthMismatch {
                structure: "RssiFrame samples",
                declared: header.sample_count as usize,
                actual: resolution,
            });
        }
        let expected_len = RssiHeader::frame_len(resolution);
        if frame.len() != expected_len {
            return Err(WipryError::LengthMismatch {
                structure: "RssiFrame",
                declared: expected_len,
                actual: frame.len(),
            });
        }

        let samples = frame[RssiHeader::SIZE..]
            .chunks_exact(SAMPLE_SIZE)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(Self::new(expected, samples, timestamp))
    }

    /// Serialize a sweep in accessory wire format.
    pub fn encode(data_type: DataType, samples: &[f32]) -> Result<Bytes, WipryError> {
        if samples.len() > u16::MAX as usize {
            return Err(WipryError::PayloadTooLarge {
                size: samples.len(),
                max: u16::MAX as usize,
            });
        }
        let mut buf = BytesMut::with_capacity(RssiHeader::frame_len(samples.len()));
        let header = RssiHeader {
            data_type: data_type as u8,
            sample_count: samples.len() as u16,
        };
        buf.put_slice(&header.encode());
        for sample in samples {
            buf.put_f32_le(*sample);
        }
        Ok(buf.freeze())
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// All samples; length equals the data type's resolution.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// When the bytes completing this frame were read off the transport.
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    /// Whether the sample at `index` carries a measurement.
    pub fn is_populated(&self, index: usize) -> bool {
        self.samples.get(index).is_some_and(|s| !s.is_nan())
    }

    /// `(index, dBm)` for every populated sample.
    pub fn populated(&self) -> impl Iterator<Item = (usize, f32)> + '_ {
        self.samples
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, s)| !s.is_nan())
    }

    /// Frequency in MHz of the sample at `index`, spreading the frame
    /// evenly over `boundary`.
    pub fn frequency_of(&self, index: usize, boundary: &FrequencyBoundary) -> f32 {
        if self.samples.is_empty() {
            return boundary.min_mhz;
        }
        let step = boundary.span_mhz() / self.samples.len() as f32;
        boundary.min_mhz + index as f32 * step
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sweep(data_type: DataType) -> Vec<f32> {
        let n = data_type.resolution().unwrap();
        (0..n).map(|i| -90.0 + (i % 50) as f32 * 0.5).collect()
    }

    #[test]
    fn frame_len_is_fixed_per_type() {
        assert_eq!(RssiHeader::frame_len(1000), 4008);
        let bytes = RssiFrame::encode(DataType::Rssi2_4Ghz, &sweep(DataType::Rssi2_4Ghz)).unwrap();
        assert_eq!(bytes.len(), 4008);
    }

    #[test]
    fn decode_recovers_samples() {
        let samples = sweep(DataType::Rssi5Ghz);
        let bytes = RssiFrame::encode(DataType::Rssi5Ghz, &samples).unwrap();
        let frame = RssiFrame::decode(&bytes, DataType::Rssi5Ghz, Instant::now()).unwrap();
        assert_eq!(frame.data_type(), DataType::Rssi5Ghz);
        assert_eq!(frame.samples(), &samples[..]);
    }

    #[test]
    fn decode_rejects_wrong_type() {
        let bytes = RssiFrame::encode(DataType::Rssi2_4Ghz, &sweep(DataType::Rssi2_4Ghz)).unwrap();
        assert!(RssiFrame::decode(&bytes, DataType::Rssi5Ghz, Instant::now()).is_err());
    }

    #[test]
    fn decode_rejects_wrong_count() {
        let bytes = RssiFrame::encode(DataType::Rssi2_4Ghz, &[-50.0; 10]).unwrap();
        assert!(matches!(
            RssiFrame::decode(&bytes, DataType::Rssi2_4Ghz, Instant::now()),
            Err(WipryError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn populated_skips_invalid_samples() {
        let frame = RssiFrame::new(
            DataType::Rssi2_4Ghz,
            vec![INVALID_SAMPLE, -60.0, INVALID_SAMPLE, -61.5],
            Instant::now(),
        );
        assert!(!frame.is_populated(0));
        assert!(frame.is_populated(1));
        assert!(!frame.is_populated(99));
        let points: Vec<_> = frame.populated().collect();
        assert_eq!(points, vec![(1, -60.0), (3, -61.5)]);
    }

    #[test]
    fn frequency_spreads_over_boundary() {
        let frame = RssiFrame::new(DataType::Rssi2_4Ghz, vec![0.0; 100], Instant::now());
        let band = FrequencyBoundary {
            min_mhz: 2400.0,
            max_mhz: 2500.0,
        };
        assert_eq!(frame.frequency_of(0, &band), 2400.0);
        assert_eq!(frame.frequency_of(50, &band), 2450.0);
    }
}
