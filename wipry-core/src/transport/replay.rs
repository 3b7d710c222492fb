//! In-memory accessory for offline analysis and tests.
//!
//! [`ReplayTransport`] answers control requests from an
//! [`AccessoryProfile`] and serves stream bytes that were fed to it,
//! either a recording loaded from disk or data pushed in at runtime.
//! Bytes are only handed out while a stream is started; `StopStream`
//! discards whatever the stopped stream had left.

use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::auth;
use crate::config::{DEFAULT_PRODUCT_ID, DEFAULT_SHARED_SECRET};
use crate::error::WipryError;
use crate::flags::DataTypeSupport;
use crate::message::{
    Band, CalibrationLimits, ControlRequest, ControlResponse, FrequencyBoundary, SampleClass,
};
use crate::transport::Transport;

// ── AccessoryProfile ─────────────────────────────────────────────

/// Identity and calibration data the replayed accessory reports.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessoryProfile {
    pub product_id: u16,
    pub firmware: String,
    pub serial_number: String,
    pub capabilities: DataTypeSupport,
    pub odd_limits: CalibrationLimits,
    pub even_limits: CalibrationLimits,
    pub boundary_2_4ghz: FrequencyBoundary,
    pub boundary_5ghz: FrequencyBoundary,
    pub boundary_6e: FrequencyBoundary,
    /// Secret the accessory signs challenges with.
    pub shared_secret: String,
}

impl Default for AccessoryProfile {
    fn default() -> Self {
        Self {
            product_id: DEFAULT_PRODUCT_ID,
            firmware: "2.1.0".into(),
            serial_number: "WPC-0000001".into(),
            capabilities: DataTypeSupport::RSSI_2_4GHZ
                | DataTypeSupport::RSSI_5GHZ
                | DataTypeSupport::RSSI_6E
                | DataTypeSupport::BEACON_CAPTURE,
            odd_limits: CalibrationLimits {
                min: -110.0,
                max: -20.0,
                noise_floor: -95.0,
            },
            even_limits: CalibrationLimits {
                min: -110.0,
                max: -20.0,
                noise_floor: -96.5,
            },
            boundary_2_4ghz: FrequencyBoundary {
                min_mhz: 2400.0,
                max_mhz: 2500.0,
            },
            boundary_5ghz: FrequencyBoundary {
                min_mhz: 5150.0,
                max_mhz: 5895.0,
            },
            boundary_6e: FrequencyBoundary {
                min_mhz: 5925.0,
                max_mhz: 7125.0,
            },
            shared_secret: DEFAULT_SHARED_SECRET.into(),
        }
    }
}

impl AccessoryProfile {
    fn answer(&self, request: &ControlRequest) -> ControlResponse {
        match request {
            ControlRequest::Identify => ControlResponse::Identity {
                product_id: self.product_id,
                firmware: self.firmware.clone(),
            },
            ControlRequest::Challenge(challenge) => ControlResponse::ChallengeResponse(
                auth::challenge_response(&self.shared_secret, challenge),
            ),
            ControlRequest::ReadSerialNumber => {
                ControlResponse::SerialNumber(self.serial_number.clone())
            }
            ControlRequest::ReadCapabilities => ControlResponse::Capabilities(self.capabilities),
            ControlRequest::ReadLimits(SampleClass::Odd) => ControlResponse::Limits(self.odd_limits),
            ControlRequest::ReadLimits(SampleClass::Even) => {
                ControlResponse::Limits(self.even_limits)
            }
            ControlRequest::ReadBoundary(band) => ControlResponse::Boundary(match band {
                Band::Ghz2_4 => self.boundary_2_4ghz,
                Band::Ghz5 => self.boundary_5ghz,
                Band::Ghz6E => self.boundary_6e,
            }),
            ControlRequest::StartRssi { .. }
            | ControlRequest::StartBeaconCapture
            | ControlRequest::StopStream => ControlResponse::Ack,
        }
    }
}

// ── ReplayTransport ──────────────────────────────────────────────

#[derive(Default)]
struct ReplayState {
    pending: VecDeque<Bytes>,
    streaming: bool,
    unplugged: bool,
    requests: Vec<ControlRequest>,
}

pub struct ReplayTransport {
    profile: AccessoryProfile,
    // Largest slice handed out per read, like a USB bulk packet.
    chunk_size: usize,
    state: Mutex<ReplayState>,
    readable: Condvar,
}

impl ReplayTransport {
    pub fn new(profile: AccessoryProfile) -> Self {
        Self {
            profile,
            chunk_size: usize::MAX,
            state: Mutex::new(ReplayState::default()),
            readable: Condvar::new(),
        }
    }

    /// Replay a raw stream capture stored at `path`.
    pub fn from_recording(profile: AccessoryProfile, path: impl AsRef<Path>) -> Result<Self, WipryError> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        debug!("loaded {} byte recording from {}", data.len(), path.display());
        let transport = Self::new(profile);
        transport.feed(data);
        Ok(transport)
    }

    /// Limit how many bytes a single read returns.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn profile(&self) -> &AccessoryProfile {
        &self.profile
    }

    /// Queue stream bytes for the current or next stream.
    pub fn feed(&self, data: impl Into<Bytes>) {
        let data = data.into();
        if data.is_empty() {
            return;
        }
        self.state.lock().pending.push_back(data);
        self.readable.notify_all();
    }

    /// Simulate the accessory being disconnected: every later call fails.
    pub fn unplug(&self) {
        self.state.lock().unplugged = true;
        self.readable.notify_all();
    }

    pub fn is_streaming(&self) -> bool {
        self.state.lock().streaming
    }

    /// Bytes fed but not yet read.
    pub fn pending_bytes(&self) -> usize {
        self.state.lock().pending.iter().map(Bytes::len).sum()
    }

    /// Every control request received so far, in order.
    pub fn requests(&self) -> Vec<ControlRequest> {
        self.state.lock().requests.clone()
    }
}

fn unplugged() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "accessory disconnected")
}

impl Transport for ReplayTransport {
    fn control(&self, request: &ControlRequest) -> Result<ControlResponse, WipryError> {
        let mut state = self.state.lock();
        if state.unplugged {
            return Err(unplugged().into());
        }
        trace!("replay control request {request}");
        state.requests.push(request.clone());
        match request {
            ControlRequest::StartRssi { .. } | ControlRequest::StartBeaconCapture => {
                state.streaming = true;
            }
            ControlRequest::StopStream => {
                state.streaming = false;
                state.pending.clear();
            }
            _ => {}
        }
        drop(state);
        self.readable.notify_all();
        Ok(self.profile.answer(request))
    }

    fn read_stream(&self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.unplugged {
                return Err(unplugged());
            }
            if state.streaming {
                if let Some(front) = state.pending.front_mut() {
                    let n = front.len().min(buf.len()).min(self.chunk_size);
                    buf[..n].copy_from_slice(&front[..n]);
                    front.advance(n);
                    if front.is_empty() {
                        state.pending.pop_front();
                    }
                    return Ok(n);
                }
            }
            if self.readable.wait_until(&mut state, deadline).timed_out() {
                return Ok(0);
            }
        }
    }
}
