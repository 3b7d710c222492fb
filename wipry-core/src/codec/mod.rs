//! Stream decoder turning raw transport bytes into [`Frame`]s.
//!
//! The accessory sends one kind of frame per stream, so the codec is
//! built for either RSSI sweeps of a given [`DataType`] or beacon
//! capture containers. Malformed input never fails the decoder: the
//! offending bytes are discarded with a diagnostic and decoding resumes
//! at the next candidate boundary.

pub mod rssi;

use std::time::Instant;

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::{trace, warn};

use crate::error::WipryError;
use crate::message::DataType;
use crate::header::RadioTap;
use crate::packet::{BeaconCaptureContainer, BeaconCaptureRecord};

pub use rssi::{INVALID_SAMPLE, RssiFrame, RssiHeader};

/// Containers longer than this are treated as corrupt length fields.
pub const DEFAULT_MAX_CONTAINER_LEN: usize = 1024 * 1024;

// ── Frame ────────────────────────────────────────────────────────

/// One complete unit of the wire protocol.
#[derive(Debug, Clone)]
pub enum Frame {
    Rssi(RssiFrame),
    BeaconCapture(BeaconCaptureContainer),
}

/// Which frame layout the current stream carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Rssi {
        data_type: DataType,
        resolution: usize,
    },
    BeaconCapture,
}

/// Running totals kept by the codec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodecStats {
    pub frames: u64,
    pub malformed: u64,
    pub skipped_bytes: u64,
}

enum Step {
    Frame(Frame),
    NeedMore,
    /// Advance `skip` bytes and look for the next boundary.
    Resync {
        skip: usize,
        malformed: bool,
        reason: &'static str,
    },
    /// A complete frame was consumed but failed validation.
    Dropped,
}

/// What the bytes at the front of the buffer look like as a container.
enum Candidate {
    /// A whole container of this many bytes, length prefix included,
    /// whose records tile `total_length` exactly.
    Complete(usize),
    /// Consistent so far; more bytes are needed to decide.
    Partial,
    /// Cannot be a container boundary.
    Invalid(&'static str),
}

// ── FrameCodec ───────────────────────────────────────────────────

pub struct FrameCodec {
    kind: FrameKind,
    max_container_len: usize,
    captured_at: Instant,
    stats: CodecStats,
    /// Set after a malformed container until the next one decodes.
    hunting: bool,
}

impl FrameCodec {
    /// Codec for an RSSI stream of `data_type`.
    pub fn rssi(data_type: DataType) -> Result<Self, WipryError> {
        let resolution = data_type
            .resolution()
            .ok_or(WipryError::UnstreamableDataType(data_type))?;
        Ok(Self::new(FrameKind::Rssi {
            data_type,
            resolution,
        }))
    }

    /// Codec for a beacon capture stream.
    pub fn beacon_capture(max_container_len: usize) -> Self {
        let mut codec = Self::new(FrameKind::BeaconCapture);
        codec.max_container_len = max_container_len;
        codec
    }

    fn new(kind: FrameKind) -> Self {
        Self {
            kind,
            max_container_len: DEFAULT_MAX_CONTAINER_LEN,
            captured_at: Instant::now(),
            stats: CodecStats::default(),
            hunting: false,
        }
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Record the read time of the most recently appended bytes; frames
    /// completed afterwards carry this timestamp.
    pub fn mark_capture(&mut self, at: Instant) {
        self.captured_at = at;
    }

    /// The next bytes do not continue the previous ones; stop trusting
    /// container boundaries until one is confirmed.
    pub fn resync(&mut self) {
        self.hunting = true;
    }

    pub fn stats(&self) -> CodecStats {
        self.stats
    }

    fn step_rssi(&mut self, src: &mut BytesMut, data_type: DataType, resolution: usize) -> Step {
        let Some(pos) = find_sync(src) else {
            // Keep a tail that could be the start of a split sync word.
            let keep = RssiHeader::SYNC.len() - 1;
            return if src.len() > keep {
                Step::Resync {
                    skip: src.len() - keep,
                    malformed: false,
                    reason: "no RSSI sync word",
                }
            } else {
                Step::NeedMore
            };
        };
        if pos > 0 {
            return Step::Resync {
                skip: pos,
                malformed: false,
                reason: "bytes before RSSI sync word",
            };
        }
        if src.len() < RssiHeader::SIZE {
            return Step::NeedMore;
        }
        let header = match RssiHeader::decode(src) {
            Ok(h) => h,
            Err(_) => {
                return Step::Resync {
                    skip: 1,
                    malformed: true,
                    reason: "unreadable RSSI header",
                };
            }
        };
        if header.data_type != data_type as u8 || header.sample_count as usize != resolution {
            return Step::Resync {
                skip: 1,
                malformed: true,
                reason: "RSSI header does not match stream",
            };
        }

        let frame_len = RssiHeader::frame_len(resolution);
        if src.len() < frame_len {
            return Step::NeedMore;
        }
        // A complete header matching this stream inside the body means this
        // frame was cut short and the next one has begun. A bare sync word
        // is not enough: samples outside a zoom window are arbitrary bytes.
        if let Some(next) = find_header(&src[1..], frame_len - 1, data_type, resolution) {
            return Step::Resync {
                skip: next + 1,
                malformed: true,
                reason: "RSSI frame interrupted by next frame",
            };
        }
        let bytes = src.split_to(frame_len);
        match RssiFrame::decode(&bytes, data_type, self.captured_at) {
            Ok(frame) => Step::Frame(Frame::Rssi(frame)),
            Err(e) => {
                warn!("discarding RSSI frame: {e}");
                self.stats.malformed += 1;
                self.stats.skipped_bytes += frame_len as u64;
                Step::Dropped
            }
        }
    }

    fn step_beacon(&mut self, src: &mut BytesMut) -> Step {
        match container_candidate(src, self.max_container_len, self.hunting) {
            Candidate::Complete(frame_len) => {
                let frame = src.split_to(frame_len).freeze();
                match BeaconCaptureContainer::from_payload(
                    frame.slice(BeaconCaptureContainer::HEADER_LEN..),
                ) {
                    Ok(container) => {
                        self.hunting = false;
                        Step::Frame(Frame::BeaconCapture(container))
                    }
                    Err(e) => {
                        warn!("discarding beacon capture container: {e}");
                        self.stats.malformed += 1;
                        self.stats.skipped_bytes += frame_len as u64;
                        self.hunting = true;
                        Step::Dropped
                    }
                }
            }
            Candidate::Invalid(reason) => {
                // Only the first bad boundary counts; the scan after it does not.
                let malformed = !self.hunting;
                self.hunting = true;
                Step::Resync {
                    skip: 1,
                    malformed,
                    reason,
                }
            }
            Candidate::Partial if self.hunting => {
                // Not yet trusted: jump to a later container that is already
                // complete rather than wait on a length read from garbage.
                match (1..src.len()).find(|&pos| {
                    matches!(
                        container_candidate(&src[pos..], self.max_container_len, true),
                        Candidate::Complete(_)
                    )
                }) {
                    Some(pos) => Step::Resync {
                        skip: pos,
                        malformed: false,
                        reason: "unconfirmed beacon container boundary",
                    },
                    None => Step::NeedMore,
                }
            }
            Candidate::Partial => Step::NeedMore,
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = WipryError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let step = match self.kind {
                FrameKind::Rssi {
                    data_type,
                    resolution,
                } => self.step_rssi(src, data_type, resolution),
                FrameKind::BeaconCapture => self.step_beacon(src),
            };
            match step {
                Step::Frame(frame) => {
                    self.stats.frames += 1;
                    return Ok(Some(frame));
                }
                Step::NeedMore => return Ok(None),
                Step::Dropped => continue,
                Step::Resync {
                    skip,
                    malformed,
                    reason,
                } => {
                    if malformed {
                        warn!("malformed frame, resynchronising: {reason}");
                        self.stats.malformed += 1;
                    } else {
                        trace!("resync: skipping {skip} bytes ({reason})");
                    }
                    self.stats.skipped_bytes += skip as u64;
                    src.advance(skip);
                }
            }
        }
    }
}

fn find_sync(src: &[u8]) -> Option<usize> {
    src.windows(RssiHeader::SYNC.len())
        .position(|w| w == RssiHeader::SYNC)
}

/// First offset below `limit` where a whole header for this stream starts.
fn find_header(src: &[u8], limit: usize, data_type: DataType, resolution: usize) -> Option<usize> {
    let mut from = 0;
    while from < limit {
        let pos = from + find_sync(&src[from..])?;
        if pos >= limit {
            return None;
        }
        if let Ok(header) = RssiHeader::decode(&src[pos..]) {
            if header.data_type == data_type as u8 && header.sample_count as usize == resolution {
                return Some(pos);
            }
        }
        from = pos + 1;
    }
    None
}

/// Check the container starting at `src[0]` against its own records.
///
/// Each record header is read as soon as it is buffered, so a bad
/// `total_length` is usually refuted long before the full payload
/// arrives. While `hunting`, an empty container is not accepted since
/// it cannot be told apart from zero padding.
fn container_candidate(src: &[u8], max_len: usize, hunting: bool) -> Candidate {
    let header_len = BeaconCaptureContainer::HEADER_LEN;
    if src.len() < header_len {
        return Candidate::Partial;
    }
    let declared = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
    if declared > max_len {
        return Candidate::Invalid("implausible beacon container length");
    }
    if declared == 0 && hunting {
        return Candidate::Invalid("empty beacon container while resynchronising");
    }

    let body = &src[header_len..];
    let mut offset = 0;
    while offset < declared {
        let len_at = offset + RadioTap::SIZE;
        if body.len() < offset + BeaconCaptureRecord::HEADER_LEN {
            return Candidate::Partial;
        }
        let data_length = u16::from_le_bytes([body[len_at], body[len_at + 1]]) as usize;
        offset += BeaconCaptureRecord::HEADER_LEN + data_length;
        if offset > declared {
            return Candidate::Invalid("beacon records overrun total_length");
        }
    }
    if body.len() < declared {
        Candidate::Partial
    } else {
        Candidate::Complete(header_len + declared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn rssi_bytes(data_type: DataType, level: f32) -> BytesMut {
        let n = data_type.resolution().unwrap();
        BytesMut::from(&RssiFrame::encode(data_type, &vec![level; n]).unwrap()[..])
    }

    fn container(channels: &[u16]) -> BeaconCaptureContainer {
        let records: Vec<_> = channels
            .iter()
            .map(|&ch| {
                BeaconCaptureRecord::new(RadioTap::new(ch as u32 * 10, ch, -50), vec![ch as u8; 20])
                    .unwrap()
            })
            .collect();
        BeaconCaptureContainer::from_records(&records).unwrap()
    }

    fn drain(codec: &mut FrameCodec, buf: &mut BytesMut) -> Vec<Frame> {
        let mut out = Vec::new();
        while let Some(frame) = codec.decode(buf).unwrap() {
            out.push(frame);
        }
        out
    }

    #[test]
    fn rssi_frame_split_across_reads() {
        let mut codec = FrameCodec::rssi(DataType::Rssi2_4Ghz).unwrap();
        let wire = rssi_bytes(DataType::Rssi2_4Ghz, -70.0);
        let mut buf = BytesMut::new();

        for piece in wire.chunks(333) {
            assert!(drain(&mut codec, &mut buf).is_empty());
            buf.extend_from_slice(piece);
        }
        let frames = drain(&mut codec, &mut buf);
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            Frame::Rssi(f) => {
                assert_eq!(f.len(), 1000);
                assert!(f.samples().iter().all(|&s| s == -70.0));
            }
            other => panic!("unexpected frame {other:?}"),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn rssi_resyncs_after_garbage() {
        let mut codec = FrameCodec::rssi(DataType::Rssi2_4Ghz).unwrap();
        let mut buf = BytesMut::new();
        buf.put_slice(b"\x00\x01RSS");
        buf.put_slice(&rssi_bytes(DataType::Rssi2_4Ghz, -80.0)[..100]); // truncated frame
        buf.extend_from_slice(&rssi_bytes(DataType::Rssi2_4Ghz, -55.0));

        let frames = drain(&mut codec, &mut buf);
        assert_eq!(frames.len(), 1);
        let Frame::Rssi(frame) = &frames[0] else {
            panic!("expected RSSI frame");
        };
        assert_eq!(frame.samples()[0], -55.0);
        assert!(codec.stats().skipped_bytes > 0);
    }

    #[test]
    fn sample_bytes_spelling_sync_word_are_kept() {
        let mut codec = FrameCodec::rssi(DataType::Rssi2_4Ghz).unwrap();
        let lookalike = f32::from_le_bytes(RssiHeader::SYNC);
        let mut samples = vec![-60.0; 1000];
        samples[10] = lookalike;
        samples[500] = lookalike;
        let mut buf = BytesMut::from(&RssiFrame::encode(DataType::Rssi2_4Ghz, &samples).unwrap()[..]);

        let frames = drain(&mut codec, &mut buf);
        assert_eq!(frames.len(), 1);
        let Frame::Rssi(frame) = &frames[0] else {
            panic!("expected RSSI frame");
        };
        assert_eq!(frame.samples()[10].to_bits(), lookalike.to_bits());
        assert_eq!(codec.stats().malformed, 0);
    }

    #[test]
    fn rssi_frame_of_other_type_is_skipped() {
        let mut codec = FrameCodec::rssi(DataType::Rssi2_4Ghz).unwrap();
        let mut buf = rssi_bytes(DataType::Rssi5Ghz, -30.0);
        buf.extend_from_slice(&rssi_bytes(DataType::Rssi2_4Ghz, -31.0));

        let frames = drain(&mut codec, &mut buf);
        assert_eq!(frames.len(), 1);
        assert_eq!(codec.stats().malformed, 1);
    }

    #[test]
    fn beacon_container_waits_for_full_payload() {
        let mut codec = FrameCodec::beacon_capture(DEFAULT_MAX_CONTAINER_LEN);
        let wire = container(&[1, 6, 11]).encode();
        let mut buf = BytesMut::from(&wire[..wire.len() - 1]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.put_u8(wire[wire.len() - 1]);

        let frames = drain(&mut codec, &mut buf);
        assert_eq!(frames.len(), 1);
        let Frame::BeaconCapture(c) = &frames[0] else {
            panic!("expected beacon capture");
        };
        assert_eq!(c.len(), 3);
    }

    #[test]
    fn mismatched_container_dropped_next_one_decoded() {
        let mut codec = FrameCodec::beacon_capture(DEFAULT_MAX_CONTAINER_LEN);
        let good = container(&[3]).encode();

        // total_length says 4 more bytes than the records account for.
        let bad_records = container(&[1, 2]);
        let mut buf = BytesMut::new();
        buf.put_u32_le(bad_records.total_length() + 4);
        buf.put_slice(bad_records.payload());
        buf.put_slice(&[0xEE; 4]);
        buf.extend_from_slice(&good);

        let frames = drain(&mut codec, &mut buf);
        assert_eq!(frames.len(), 1);
        let Frame::BeaconCapture(c) = &frames[0] else {
            panic!("expected beacon capture");
        };
        assert_eq!(c.records().next().unwrap().radiotap().channel, 3);
        assert_eq!(codec.stats().malformed, 1);
    }

    #[test]
    fn short_total_length_does_not_swallow_following_containers() {
        let mut codec = FrameCodec::beacon_capture(DEFAULT_MAX_CONTAINER_LEN);
        let bad = container(&[1, 2]);
        let mut buf = BytesMut::new();
        buf.put_u32_le(bad.total_length() - 4);
        buf.put_slice(bad.payload());
        for ch in [3, 4, 5] {
            buf.extend_from_slice(&container(&[ch]).encode());
        }

        let frames = drain(&mut codec, &mut buf);
        let channels: Vec<u16> = frames
            .iter()
            .map(|f| match f {
                Frame::BeaconCapture(c) => c.records().next().unwrap().radiotap().channel,
                other => panic!("unexpected frame {other:?}"),
            })
            .collect();
        assert_eq!(channels, vec![3, 4, 5]);
        assert_eq!(codec.stats().malformed, 1);
        assert!(buf.is_empty());
    }

    #[test]
    fn large_container_waits_while_in_sync() {
        let mut codec = FrameCodec::beacon_capture(DEFAULT_MAX_CONTAINER_LEN);
        let wire = container(&[1, 2, 3, 4]).encode();
        let mut buf = BytesMut::from(&wire[..40]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 40);
        buf.extend_from_slice(&wire[40..]);
        assert_eq!(drain(&mut codec, &mut buf).len(), 1);
        assert_eq!(codec.stats().malformed, 0);
    }

    #[test]
    fn resync_skips_partial_container_at_gap() {
        let mut codec = FrameCodec::beacon_capture(DEFAULT_MAX_CONTAINER_LEN);
        codec.resync();
        // Tail of a container whose start was lost, read as a 4 KiB length.
        let mut buf = BytesMut::from(&[0x00, 0x10, 0x00, 0x00, 0x2A, 0x00, 0x00][..]);
        buf.extend_from_slice(&container(&[7]).encode());

        let frames = drain(&mut codec, &mut buf);
        assert_eq!(frames.len(), 1);
        assert!(buf.is_empty());
        assert_eq!(codec.stats().skipped_bytes, 7);
    }

    #[test]
    fn implausible_length_scans_forward() {
        let mut codec = FrameCodec::beacon_capture(1024);
        let good = container(&[9]).encode();
        let mut buf = BytesMut::new();
        buf.put_u32_le(0xFFFF_FFF0);
        buf.extend_from_slice(&good);

        let frames = drain(&mut codec, &mut buf);
        assert_eq!(frames.len(), 1);
        assert_eq!(codec.stats().skipped_bytes, 4);
    }

    #[test]
    fn dual_band_codec_is_refused() {
        assert!(FrameCodec::rssi(DataType::RssiDual25).is_err());
    }
}
