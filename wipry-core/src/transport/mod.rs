//! The accessory link, seen from the core.
//!
//! A [`Transport`] exposes the two halves of the USB link the core
//! needs: a synchronous control channel for requests and a blocking
//! stream endpoint for sweep and capture data. Only the
//! [`TransportReader`](reader::TransportReader) thread calls
//! [`Transport::read_stream`]; control requests come from the
//! handshake thread and from stream start/stop.

pub mod reader;
pub mod replay;

use std::sync::Arc;
use std::time::Duration;

use crate::error::WipryError;
use crate::message::{ControlRequest, ControlResponse};

pub use reader::{ChunkReceiver, ChunkSender, RawChunk, ReaderStats, TransportReader, chunk_queue};
pub use replay::{AccessoryProfile, ReplayTransport};

/// An open link to one accessory.
pub trait Transport: Send + Sync {
    /// Perform one control round trip.
    ///
    /// Requests issued for a caller (stream start and stop) run on a
    /// helper thread; the caller waits at most the configured join
    /// timeout and a request that overruns it is abandoned to finish on
    /// its own.
    fn control(&self, request: &ControlRequest) -> Result<ControlResponse, WipryError>;

    /// Read stream bytes into `buf`, waiting at most `timeout`.
    ///
    /// Returns `Ok(0)` when no data arrived before the timeout. Any
    /// error ends the stream and fails the connection.
    fn read_stream(&self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize>;
}

/// Opens a [`Transport`] at the start of each connection attempt.
pub trait Connector: Send + Sync {
    fn open(&self) -> Result<Arc<dyn Transport>, WipryError>;
}

impl<F> Connector for F
where
    F: Fn() -> Result<Arc<dyn Transport>, WipryError> + Send + Sync,
{
    fn open(&self) -> Result<Arc<dyn Transport>, WipryError> {
        self()
    }
}
