//! Transport read loop and the raw chunk queue.
//!
//! The reader owns the stream endpoint for the lifetime of one stream
//! and pushes each read onto a bounded queue shared with the frame
//! parser. When the parser falls behind, the oldest queued chunk is
//! evicted so live acquisition never stalls on stale samples.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::error::WipryError;
use crate::transport::Transport;

// ── RawChunk ─────────────────────────────────────────────────────

/// One read's worth of stream bytes.
#[derive(Debug, Clone)]
pub struct RawChunk {
    /// Consecutive per stream; a gap means chunks were evicted.
    pub seq: u64,
    pub data: Bytes,
    pub captured_at: Instant,
}

// ── Chunk queue ──────────────────────────────────────────────────

/// Producer half of the raw chunk queue.
pub struct ChunkSender {
    tx: Sender<RawChunk>,
    // Lets the producer evict the oldest chunk when the queue is full.
    evict: Receiver<RawChunk>,
    dropped: Arc<AtomicU64>,
}

/// Consumer half of the raw chunk queue.
pub struct ChunkReceiver {
    rx: Receiver<RawChunk>,
    dropped: Arc<AtomicU64>,
}

/// Create a drop-oldest queue holding at most `capacity` chunks.
pub fn chunk_queue(capacity: usize) -> (ChunkSender, ChunkReceiver) {
    let (tx, rx) = bounded(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    (
        ChunkSender {
            tx,
            evict: rx.clone(),
            dropped: dropped.clone(),
        },
        ChunkReceiver { rx, dropped },
    )
}

impl ChunkSender {
    /// Enqueue `chunk`, evicting the oldest unread chunk if full.
    pub fn push(&self, mut chunk: RawChunk) {
        loop {
            match self.tx.try_send(chunk) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    chunk = back;
                    if let Ok(stale) = self.evict.try_recv() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        trace!("queue full, evicted chunk {}", stale.seq);
                    }
                }
                // Unreachable while `evict` is alive.
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl ChunkReceiver {
    /// Wait up to `timeout` for the next chunk.
    ///
    /// `Ok(None)` on timeout, `Err` once the producer is gone and the
    /// queue is drained.
    pub fn pop(&self, timeout: Duration) -> Result<Option<RawChunk>, WipryError> {
        match self.rx.recv_timeout(timeout) {
            Ok(chunk) => Ok(Some(chunk)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(WipryError::Other("chunk queue closed".into()))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Chunks evicted so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// ── TransportReader ──────────────────────────────────────────────

/// Totals reported when the read loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub chunks: u64,
    pub bytes: u64,
    pub dropped: u64,
}

type ErrorHandler = Box<dyn FnOnce(WipryError) + Send>;

/// Blocking read loop feeding a [`ChunkSender`].
pub struct TransportReader {
    transport: Arc<dyn Transport>,
    queue: ChunkSender,
    cancel: CancellationToken,
    chunk_size: usize,
    read_timeout: Duration,
    on_error: Option<ErrorHandler>,
}

impl TransportReader {
    pub fn new(
        transport: Arc<dyn Transport>,
        queue: ChunkSender,
        cancel: CancellationToken,
        chunk_size: usize,
        read_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            queue,
            cancel,
            chunk_size: chunk_size.max(1),
            read_timeout,
            on_error: None,
        }
    }

    /// Called once, from the reader thread, if a read fails while the
    /// stream is still live.
    pub fn on_error(mut self, handler: impl FnOnce(WipryError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(handler));
        self
    }

    /// Run until cancelled or the transport fails.
    pub fn run(mut self) -> ReaderStats {
        let mut stats = ReaderStats::default();
        let mut seq = 0u64;

        while !self.cancel.is_cancelled() {
            let mut buf = BytesMut::zeroed(self.chunk_size);
            match self.transport.read_stream(&mut buf, self.read_timeout) {
                Ok(0) => continue,
                Ok(n) => {
                    buf.truncate(n);
                    stats.chunks += 1;
                    stats.bytes += n as u64;
                    self.queue.push(RawChunk {
                        seq,
                        data: buf.freeze(),
                        captured_at: Instant::now(),
                    });
                    seq += 1;
                }
                Err(e) => {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    error!("stream read failed: {e}");
                    self.cancel.cancel();
                    if let Some(handler) = self.on_error.take() {
                        handler(WipryError::Io(e));
                    }
                    break;
                }
            }
        }

        stats.dropped = self.queue.dropped();
        debug!(
            "reader stopped: {} chunks, {} bytes, {} evicted",
            stats.chunks, stats.bytes, stats.dropped
        );
        stats
    }
}
