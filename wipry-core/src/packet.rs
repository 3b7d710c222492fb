//! Beacon-capture records and the container that carries them.
//!
//! ## Wire format
//!
//! **Record** (12 byte header + payload):
//! ```text
//! radiotap:     RadioTap (8)
//! data_length:  u16      (2)
//! reserved:     [u8; 2]  (2)
//! data:         [u8]     (data_length)
//! ```
//!
//! **Container** (4 byte header + records):
//! ```text
//! total_length: u32      (4)
//! records:      [Record] (total_length)
//! ```
//!
//! Payloads are held as [`Bytes`] slices of the received buffer; every
//! accessor stays inside the declared length.

use std::fmt::Debug;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::WipryError;
use crate::header::RadioTap;

// ── BeaconCaptureRecord ──────────────────────────────────────────

/// One observed beacon frame with its radio-tap metadata.
#[derive(Clone, PartialEq, Eq)]
pub struct BeaconCaptureRecord {
    radiotap: RadioTap,
    reserved: [u8; 2],
    data: Bytes,
}

impl BeaconCaptureRecord {
    /// Size of the fixed part preceding the beacon bytes.
    pub const HEADER_LEN: usize = RadioTap::SIZE + 4;

    pub fn new(radiotap: RadioTap, data: impl Into<Bytes>) -> Result<Self, WipryError> {
        let data = data.into();
        if data.len() > u16::MAX as usize {
            return Err(WipryError::PayloadTooLarge {
                size: data.len(),
                max: u16::MAX as usize,
            });
        }
        Ok(Self {
            radiotap,
            reserved: [0; 2],
            data,
        })
    }

    pub fn radiotap(&self) -> &RadioTap {
        &self.radiotap
    }

    /// The captured beacon bytes, exactly `data_length` long.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_length(&self) -> u16 {
        self.data.len() as u16
    }

    /// Header plus payload length.
    pub fn encoded_len(&self) -> usize {
        Self::HEADER_LEN + self.data.len()
    }

    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_slice(&self.radiotap.to_bytes());
        dst.put_u16_le(self.data_length());
        dst.put_slice(&self.reserved);
        dst.put_slice(&self.data);
    }

    /// Parse the record starting at `offset` in `buf`, returning it and
    /// the offset of the next record.
    pub fn parse_at(buf: &Bytes, offset: usize) -> Result<(Self, usize), WipryError> {
        let data_length = Self::declared_len_at(buf, offset)?;
        let start = offset + Self::HEADER_LEN;
        let end = start + data_length;
        let radiotap = RadioTap::from_bytes(&buf[offset..])?;
        let reserved = [buf[offset + RadioTap::SIZE + 2], buf[offset + RadioTap::SIZE + 3]];
        Ok((
            Self {
                radiotap,
                reserved,
                data: buf.slice(start..end),
            },
            end,
        ))
    }

    /// Validate the record header at `offset` and return its payload length.
    fn declared_len_at(buf: &[u8], offset: usize) -> Result<usize, WipryError> {
        let remaining = buf.len().saturating_sub(offset);
        if remaining < Self::HEADER_LEN {
            return Err(WipryError::Truncated {
                structure: "BeaconCaptureRecord header",
                expected: Self::HEADER_LEN,
                actual: remaining,
            });
        }
        let len_at = offset + RadioTap::SIZE;
        let data_length = u16::from_le_bytes([buf[len_at], buf[len_at + 1]]) as usize;
        if data_length > remaining - Self::HEADER_LEN {
            return Err(WipryError::LengthMismatch {
                structure: "BeaconCaptureRecord",
                declared: data_length,
                actual: remaining - Self::HEADER_LEN,
            });
        }
        Ok(data_length)
    }
}

impl Debug for BeaconCaptureRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeaconCaptureRecord")
            .field("radiotap", &self.radiotap)
            .field("data_length", &self.data.len())
            .finish()
    }
}

// ── BeaconCaptureContainer ───────────────────────────────────────

/// A validated batch of packed [`BeaconCaptureRecord`]s.
///
/// Construction walks the records, so a container that exists always
/// satisfies `sum(record lengths) == total_length`.
#[derive(Clone, PartialEq, Eq)]
pub struct BeaconCaptureContainer {
    payload: Bytes,
    record_count: usize,
}

impl BeaconCaptureContainer {
    /// Size of the `total_length` prefix.
    pub const HEADER_LEN: usize = 4;

    /// Validate a record payload (without the length prefix).
    pub fn from_payload(payload: Bytes) -> Result<Self, WipryError> {
        if payload.len() > u32::MAX as usize {
            return Err(WipryError::PayloadTooLarge {
                size: payload.len(),
                max: u32::MAX as usize,
            });
        }
        let record_count = Self::walk(&payload)?;
        Ok(Self {
            payload,
            record_count,
        })
    }

    pub fn from_records(records: &[BeaconCaptureRecord]) -> Result<Self, WipryError> {
        let mut buf = BytesMut::with_capacity(records.iter().map(|r| r.encoded_len()).sum());
        for record in records {
            record.write_to(&mut buf);
        }
        Self::from_payload(buf.freeze())
    }

    /// Decode one complete container frame, length prefix included.
    pub fn decode(frame: &[u8]) -> Result<Self, WipryError> {
        if frame.len() < Self::HEADER_LEN {
            return Err(WipryError::Truncated {
                structure: "BeaconCaptureContainer header",
                expected: Self::HEADER_LEN,
                actual: frame.len(),
            });
        }
        let declared = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        let body = &frame[Self::HEADER_LEN..];
        if body.len() != declared {
            return Err(WipryError::LengthMismatch {
                structure: "BeaconCaptureContainer",
                declared,
                actual: body.len(),
            });
        }
        Self::from_payload(Bytes::copy_from_slice(body))
    }

    /// Serialize with the length prefix.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::HEADER_LEN + self.payload.len());
        buf.put_u32_le(self.total_length());
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    pub fn total_length(&self) -> u32 {
        self.payload.len() as u32
    }

    /// The packed records exactly as received.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Number of records in the container.
    pub fn len(&self) -> usize {
        self.record_count
    }

    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }

    pub fn records(&self) -> Records<'_> {
        Records {
            payload: &self.payload,
            offset: 0,
        }
    }

    /// Count the records in `payload`, failing unless they tile it exactly.
    fn walk(payload: &[u8]) -> Result<usize, WipryError> {
        let mut offset = 0;
        let mut count = 0;
        while offset < payload.len() {
            let data_length = BeaconCaptureRecord::declared_len_at(payload, offset)?;
            offset += BeaconCaptureRecord::HEADER_LEN + data_length;
            count += 1;
        }
        Ok(count)
    }
}

impl Debug for BeaconCaptureContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeaconCaptureContainer")
            .field("total_length", &self.payload.len())
            .field("records", &self.record_count)
            .finish()
    }
}

/// Iterator over the records of a validated container.
pub struct Records<'a> {
    payload: &'a Bytes,
    offset: usize,
}

impl Iterator for Records<'_> {
    type Item = BeaconCaptureRecord;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.payload.len() {
            return None;
        }
        // The payload was walked at construction, parsing cannot fail here.
        let (record, next) = BeaconCaptureRecord::parse_at(self.payload, self.offset).ok()?;
        self.offset = next;
        Some(record)
    }
}
