//! Frame parser thread body.
//!
//! Pops raw chunks, reassembles them with [`FrameCodec`], masks RSSI
//! frames to the zoom window and posts the results for dispatch.

use std::time::Duration;

use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::codec::{Frame, FrameCodec};
use crate::dispatch::EventSink;
use crate::transport::ChunkReceiver;
use crate::zoom::ZoomMask;

/// Totals logged when the parser stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParserStats {
    pub chunks: u64,
    pub frames: u64,
    pub malformed: u64,
    pub skipped_bytes: u64,
    /// Sequence breaks caused by evicted chunks.
    pub gaps: u64,
}

pub struct FrameParser {
    queue: ChunkReceiver,
    codec: FrameCodec,
    mask: ZoomMask,
    sink: EventSink,
    generation: u64,
    cancel: CancellationToken,
    poll_interval: Duration,
}

impl FrameParser {
    pub fn new(
        queue: ChunkReceiver,
        codec: FrameCodec,
        sink: EventSink,
        generation: u64,
        cancel: CancellationToken,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            codec,
            mask: ZoomMask::Full,
            sink,
            generation,
            cancel,
            poll_interval,
        }
    }

    pub fn with_mask(mut self, mask: ZoomMask) -> Self {
        self.mask = mask;
        self
    }

    /// Run until cancelled or the reader has gone and the queue is empty.
    pub fn run(mut self) -> ParserStats {
        let mut stats = ParserStats::default();
        let mut buf = BytesMut::new();
        let mut expected_seq = 0u64;

        while !self.cancel.is_cancelled() {
            let chunk = match self.queue.pop(self.poll_interval) {
                Ok(Some(chunk)) => chunk,
                Ok(None) => continue,
                Err(_) => break,
            };
            stats.chunks += 1;
            if chunk.seq != expected_seq {
                stats.gaps += 1;
                debug!(
                    "chunk gap {}..{}; discarding {} partial bytes",
                    expected_seq,
                    chunk.seq,
                    buf.len()
                );
                buf.clear();
                self.codec.resync();
            }
            expected_seq = chunk.seq + 1;

            buf.extend_from_slice(&chunk.data);
            self.codec.mark_capture(chunk.captured_at);
            loop {
                match self.codec.decode(&mut buf) {
                    Ok(Some(frame)) => self.deliver(frame),
                    Ok(None) => break,
                    Err(e) => {
                        warn!("frame decoder failed, dropping buffer: {e}");
                        buf.clear();
                        break;
                    }
                }
            }
        }

        let codec = self.codec.stats();
        stats.frames = codec.frames;
        stats.malformed = codec.malformed;
        stats.skipped_bytes = codec.skipped_bytes;
        debug!(
            "parser stopped: {} chunks, {} frames, {} malformed, {} bytes skipped, {} gaps, {} evicted",
            stats.chunks,
            stats.frames,
            stats.malformed,
            stats.skipped_bytes,
            stats.gaps,
            self.queue.dropped()
        );
        stats
    }

    fn deliver(&self, frame: Frame) {
        match frame {
            Frame::Rssi(mut frame) => {
                self.mask.apply(frame.samples_mut());
                self.sink.post_rssi(self.generation, frame);
            }
            Frame::BeaconCapture(container) => self.sink.post_beacon(self.generation, container),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RssiFrame;
    use crate::dispatch::{EventDispatch, Subscriber};
    use crate::message::DataType;
    use crate::transport::{RawChunk, chunk_queue};
    use crate::zoom::RssiStreamConfig;
    use bytes::Bytes;
    use crossbeam_channel::{Sender, unbounded};
    use std::sync::Arc;
    use std::time::Instant;

    const WAIT: Duration = Duration::from_secs(2);

    struct Frames(Sender<RssiFrame>);

    impl Subscriber for Frames {
        fn on_rssi(&self, frame: RssiFrame) {
            self.0.send(frame).ok();
        }
    }

    fn raw(seq: u64, data: Bytes) -> RawChunk {
        RawChunk {
            seq,
            data,
            captured_at: Instant::now(),
        }
    }

    #[test]
    fn masks_and_posts_frames() {
        let dispatch = EventDispatch::new();
        let (tx, rx) = unbounded();
        dispatch.set_subscriber(Arc::new(Frames(tx)));
        let sink = dispatch.start(WAIT).unwrap();
        let generation = dispatch.advance_generation();

        let config = RssiStreamConfig::zoomed(DataType::Rssi2_4Ghz, 100, 200);
        let mask = ZoomMask::validate(&config).unwrap();
        let wire = RssiFrame::encode(DataType::Rssi2_4Ghz, &[-60.0; 1000]).unwrap();

        let (queue_tx, queue_rx) = chunk_queue(8);
        queue_tx.push(raw(0, wire.slice(..500)));
        queue_tx.push(raw(1, wire.slice(500..)));
        drop(queue_tx);

        let parser = FrameParser::new(
            queue_rx,
            FrameCodec::rssi(DataType::Rssi2_4Ghz).unwrap(),
            sink,
            generation,
            CancellationToken::new(),
            Duration::from_millis(5),
        )
        .with_mask(mask);
        let stats = parser.run();
        assert_eq!(stats.frames, 1);
        assert_eq!(stats.gaps, 0);

        let frame = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(frame.len(), 1000);
        assert!(frame.samples()[99].is_nan());
        assert_eq!(frame.samples()[100], -60.0);
        assert_eq!(frame.samples()[299], -60.0);
        assert!(frame.samples()[300].is_nan());
        dispatch.stop(WAIT);
    }

    #[test]
    fn gap_discards_partial_frame() {
        let dispatch = EventDispatch::new();
        let (tx, rx) = unbounded();
        dispatch.set_subscriber(Arc::new(Frames(tx)));
        let sink = dispatch.start(WAIT).unwrap();
        let generation = dispatch.advance_generation();

        let first = RssiFrame::encode(DataType::Rssi2_4Ghz, &[-70.0; 1000]).unwrap();
        let second = RssiFrame::encode(DataType::Rssi2_4Ghz, &[-40.0; 1000]).unwrap();

        let (queue_tx, queue_rx) = chunk_queue(8);
        queue_tx.push(raw(0, first.slice(..1000)));
        // Seq 1 (rest of the first frame) was evicted.
        queue_tx.push(raw(2, second.clone()));
        drop(queue_tx);

        let stats = FrameParser::new(
            queue_rx,
            FrameCodec::rssi(DataType::Rssi2_4Ghz).unwrap(),
            sink,
            generation,
            CancellationToken::new(),
            Duration::from_millis(5),
        )
        .run();
        assert_eq!(stats.gaps, 1);
        assert_eq!(stats.frames, 1);
        assert_eq!(rx.recv_timeout(WAIT).unwrap().samples()[0], -40.0);
        dispatch.stop(WAIT);
    }

    #[test]
    fn cancelled_parser_exits_promptly() {
        let dispatch = EventDispatch::new();
        let sink = dispatch.start(WAIT).unwrap();
        let (_queue_tx, queue_rx) = chunk_queue(1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let started = Instant::now();
        let stats = FrameParser::new(
            queue_rx,
            FrameCodec::beacon_capture(1024),
            sink,
            0,
            cancel,
            Duration::from_secs(10),
        )
        .run();
        assert_eq!(stats, ParserStats::default());
        assert!(started.elapsed() < Duration::from_secs(1));
        dispatch.stop(WAIT);
    }
}
