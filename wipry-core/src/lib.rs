//! # wipry-core
//!
//! Acquisition core for WiPry Clarity class USB RF spectrum analyzers.
//!
//! This crate contains:
//! - **Wire types**: `RadioTap`, `BeaconCaptureRecord`, `BeaconCaptureContainer`, `RssiFrame`
//! - **Codec**: `FrameCodec`, a `tokio_util` decoder with resynchronisation
//! - **Transport**: the `Transport` seam, the reader thread and its drop-oldest queue
//! - **Parser**: frame reassembly, zoom masking and event posting
//! - **Dispatch**: latest-wins mailbox and the single `Subscriber`
//! - **Manager**: `ConnectionManager`, the connect/stream state machine
//! - **Error**: `WipryError` internally, `ErrorCode` at the callback boundary

pub mod auth;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod flags;
pub mod header;
pub mod logging;
pub mod manager;
pub mod message;
pub mod packet;
pub mod parser;
pub mod state;
pub mod task;
pub mod transport;
pub mod zoom;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::{Frame, FrameCodec, INVALID_SAMPLE, RssiFrame};
pub use config::CoreConfig;
pub use dispatch::{EventDispatch, Subscriber};
pub use error::{ErrorCode, WipryError};
pub use flags::DataTypeSupport;
pub use header::RadioTap;
pub use manager::{ConnectionManager, StreamConfig};
pub use message::{Band, CalibrationLimits, DataType, FrequencyBoundary, SampleClass};
pub use packet::{BeaconCaptureContainer, BeaconCaptureRecord};
pub use state::{AccessoryInfo, ConnectionState};
pub use transport::{AccessoryProfile, Connector, ReplayTransport, Transport};
pub use zoom::{RssiStreamConfig, ZoomMask};

/// Version of this library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
