//! Public entry point of the acquisition core.
//!
//! [`ConnectionManager`] orchestrates the whole pipeline:
//!
//! 1. [`start`](ConnectionManager::start) spawns the dispatcher and a
//!    handshake thread that opens the [`Transport`], identifies and
//!    authenticates the accessory and caches its calibration.
//! 2. A stream request validates its parameters, stops the previous
//!    stream, and spawns a [`TransportReader`] and a [`FrameParser`].
//! 3. Decoded events reach the [`Subscriber`] through [`EventDispatch`].
//!
//! No public method panics or blocks longer than the configured join
//! timeout, and every one of them may be called from inside a
//! subscriber callback.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec::FrameCodec;
use crate::config::CoreConfig;
use crate::dispatch::{EventDispatch, EventSink, Subscriber};
use crate::error::{ErrorCode, WipryError};
use crate::message::{
    CalibrationLimits, ControlRequest, ControlResponse, DataType, FrequencyBoundary,
};
use crate::parser::FrameParser;
use crate::state::{AccessoryInfo, ConnectionShared, ConnectionState, handshake};
use crate::task::{self, Worker};
use crate::transport::{Connector, Transport, TransportReader, chunk_queue};
use crate::zoom::{RssiStreamConfig, ZoomMask};

// ── StreamConfig ─────────────────────────────────────────────────

/// The stream currently requested from the accessory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamConfig {
    Rssi(RssiStreamConfig),
    BeaconCapture,
}

impl std::fmt::Display for StreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamConfig::Rssi(cfg) if cfg.zoom_enabled => write!(
                f,
                "{} stream zoomed to {}+{}",
                cfg.data_type, cfg.start_index, cfg.width
            ),
            StreamConfig::Rssi(cfg) => write!(f, "{} stream", cfg.data_type),
            StreamConfig::BeaconCapture => write!(f, "beacon capture"),
        }
    }
}

/// Everything derived from a [`StreamConfig`] before the old stream is
/// touched.
struct StreamPlan {
    codec: FrameCodec,
    mask: ZoomMask,
    request: ControlRequest,
}

impl StreamPlan {
    fn new(config: &StreamConfig, info: &AccessoryInfo, core: &CoreConfig) -> Result<Self, WipryError> {
        match config {
            StreamConfig::Rssi(rssi) => {
                let mask = ZoomMask::validate(rssi)?;
                if !info.supports(rssi.data_type) {
                    return Err(WipryError::UnsupportedDataType(rssi.data_type));
                }
                Ok(Self {
                    codec: FrameCodec::rssi(rssi.data_type)?,
                    mask,
                    request: ControlRequest::StartRssi {
                        data_type: rssi.data_type,
                        zoom: mask.as_request(),
                    },
                })
            }
            StreamConfig::BeaconCapture => {
                if !info.supports_beacon_capture() {
                    return Err("accessory does not support beacon capture".into());
                }
                Ok(Self {
                    codec: FrameCodec::beacon_capture(core.parser.max_container_len),
                    mask: ZoomMask::Full,
                    request: ControlRequest::StartBeaconCapture,
                })
            }
        }
    }
}

struct StreamSession {
    config: StreamConfig,
    cancel: CancellationToken,
    workers: Vec<Worker>,
}

// ── ConnectionManager ────────────────────────────────────────────

pub struct ConnectionManager {
    config: CoreConfig,
    connector: Arc<dyn Connector>,
    shared: Arc<ConnectionShared>,
    dispatch: EventDispatch,
    // Lock order: `lifecycle`, then `session`, then the connection record.
    lifecycle: Mutex<()>,
    session: Mutex<Option<StreamSession>>,
    handshake: Mutex<Option<Worker>>,
}

impl ConnectionManager {
    pub fn new(config: CoreConfig, connector: impl Connector + 'static) -> Self {
        Self {
            config,
            connector: Arc::new(connector),
            shared: Arc::new(ConnectionShared::new()),
            dispatch: EventDispatch::new(),
            lifecycle: Mutex::new(()),
            session: Mutex::new(None),
            handshake: Mutex::new(None),
        }
    }

    /// Manager with [`CoreConfig::default`].
    pub fn with_defaults(connector: impl Connector + 'static) -> Self {
        Self::new(CoreConfig::default(), connector)
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Library version string.
    pub fn version() -> &'static str {
        crate::version()
    }

    fn join_timeout(&self) -> Duration {
        self.config.shutdown.join_timeout()
    }

    // ── Subscriber ───────────────────────────────────────────────

    pub fn set_subscriber(&self, subscriber: Arc<dyn Subscriber>) {
        self.dispatch.set_subscriber(subscriber);
    }

    pub fn clear_subscriber(&self) {
        self.dispatch.clear_subscriber();
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Begin connecting to the accessory.
    ///
    /// Returns immediately; the outcome arrives through
    /// [`Subscriber::on_connect`] or [`Subscriber::on_failure`].
    /// Returns `false` without side effects if a connection is already
    /// in progress or established, or if the last one failed and has not
    /// been ended yet.
    pub fn start(&self) -> bool {
        let _lifecycle = self.lifecycle.lock();
        let epoch = match self.shared.begin_attempt() {
            Ok(epoch) => epoch,
            Err(e) => {
                debug!("start rejected: {e}");
                return false;
            }
        };
        info!("connecting to accessory (attempt {epoch})");

        let previous = self.handshake.lock().take();
        if let Some(previous) = previous {
            previous.join_timeout(self.join_timeout());
        }

        let sink = match self.dispatch.start(self.join_timeout()) {
            Ok(sink) => sink,
            Err(e) => {
                error!("cannot start dispatcher: {e}");
                self.shared.escalate(epoch, ErrorCode::UnknownError);
                return true;
            }
        };

        let connector = self.connector.clone();
        let shared = self.shared.clone();
        let auth = self.config.auth.clone();
        let handshake_sink = sink.clone();
        let spawned = Worker::spawn("wipry-handshake", move || {
            run_handshake(epoch, connector.as_ref(), &shared, &auth, &handshake_sink)
        });
        match spawned {
            Ok(worker) => *self.handshake.lock() = Some(worker),
            Err(e) => {
                error!("{e}");
                if self.shared.escalate(epoch, ErrorCode::UnknownError) {
                    sink.post_failure(ErrorCode::UnknownError);
                }
            }
        }
        true
    }

    /// Tear the connection down and return to idle.
    ///
    /// Stops any stream, joins every worker thread within the configured
    /// timeout and releases the transport. Returns `false` and does
    /// nothing if already idle.
    pub fn end(&self) -> bool {
        let _lifecycle = self.lifecycle.lock();
        let (session, transport) = {
            let mut session = self.session.lock();
            let transport = match self.shared.reset() {
                Ok(transport) => transport,
                Err(_) => {
                    debug!("end ignored: connection already idle");
                    return false;
                }
            };
            (session.take(), transport)
        };

        if let Some(session) = session {
            self.stop_session(session, transport.clone());
        }
        let handshake = self.handshake.lock().take();
        if let Some(worker) = handshake {
            worker.join_timeout(self.join_timeout());
        }
        self.dispatch.stop(self.join_timeout());
        drop(transport);
        info!("connection ended");
        true
    }

    /// `true` while connecting or connected.
    pub fn is_active(&self) -> bool {
        self.shared.state().is_active()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Block until a pending connection attempt succeeds or fails, or
    /// `timeout` elapses. Returns the state at that point.
    pub fn wait_for_connection(&self, timeout: Duration) -> ConnectionState {
        self.shared.wait_settled(timeout)
    }

    // ── Accessory queries ────────────────────────────────────────

    /// Snapshot of the connected accessory, or `None` unless connected.
    pub fn accessory_info(&self) -> Option<AccessoryInfo> {
        self.shared.info()
    }

    pub fn serial_number(&self) -> Option<String> {
        self.shared.info().map(|info| info.serial_number)
    }

    pub fn odd_limits(&self) -> Option<CalibrationLimits> {
        self.shared.info().map(|info| info.odd_limits)
    }

    pub fn even_limits(&self) -> Option<CalibrationLimits> {
        self.shared.info().map(|info| info.even_limits)
    }

    pub fn boundary_2_4ghz(&self) -> Option<FrequencyBoundary> {
        self.shared.info().map(|info| info.boundary_2_4ghz)
    }

    pub fn boundary_5ghz(&self) -> Option<FrequencyBoundary> {
        self.shared.info().map(|info| info.boundary_5ghz)
    }

    pub fn boundary_6e(&self) -> Option<FrequencyBoundary> {
        self.shared.info().map(|info| info.boundary_6e)
    }

    pub fn supports_data_type(&self, data_type: DataType) -> bool {
        self.shared
            .info()
            .is_some_and(|info| info.supports(data_type))
    }

    // ── Streams ──────────────────────────────────────────────────

    /// Start streaming RSSI sweeps of `data_type`, replacing any active
    /// stream.
    ///
    /// With `zoom_enabled`, only indices `start_index ..
    /// start_index + width` are swept and every other sample of each
    /// frame reads [`INVALID_SAMPLE`](crate::codec::INVALID_SAMPLE).
    /// Returns `false` if not connected or the parameters are invalid;
    /// an invalid request leaves the current stream running.
    pub fn start_rssi_stream(
        &self,
        data_type: DataType,
        zoom_enabled: bool,
        start_index: u32,
        width: u8,
    ) -> bool {
        self.start_stream(StreamConfig::Rssi(RssiStreamConfig {
            data_type,
            zoom_enabled,
            start_index,
            width,
        }))
    }

    /// Start streaming beacon capture containers, replacing any active
    /// stream.
    pub fn start_beacon_capture(&self) -> bool {
        self.start_stream(StreamConfig::BeaconCapture)
    }

    /// Stop the active stream. Returns `false` if none was running.
    pub fn stop_stream(&self) -> bool {
        let mut session = self.session.lock();
        let Some(current) = session.take() else {
            return false;
        };
        let transport = self.shared.connected_transport().map(|(_, t)| t);
        self.stop_session(current, transport);
        info!("stream stopped");
        true
    }

    /// The running stream, if any.
    pub fn active_stream(&self) -> Option<StreamConfig> {
        self.session
            .lock()
            .as_ref()
            .filter(|s| !s.cancel.is_cancelled())
            .map(|s| s.config)
    }

    pub fn start_stream(&self, config: StreamConfig) -> bool {
        match self.try_start_stream(config) {
            Ok(()) => {
                info!("started {config}");
                true
            }
            Err(e) => {
                warn!("cannot start {config}: {e}");
                false
            }
        }
    }

    fn try_start_stream(&self, config: StreamConfig) -> Result<(), WipryError> {
        let info = self.shared.info().ok_or(WipryError::NotConnected)?;
        let plan = StreamPlan::new(&config, &info, &self.config)?;

        let mut session = self.session.lock();
        let (epoch, transport) = self
            .shared
            .connected_transport()
            .ok_or(WipryError::NotConnected)?;
        let sink = self.dispatch.sink().ok_or(WipryError::NotConnected)?;

        if let Some(previous) = session.take() {
            self.stop_session(previous, Some(transport.clone()));
        }
        let generation = self.dispatch.advance_generation();

        if let Err(e) = self.control_within(&transport, plan.request.clone()) {
            error!("accessory rejected {}: {e}", plan.request);
            if self.shared.escalate(epoch, ErrorCode::UnableToCommunicateWithAccessory) {
                sink.post_failure(ErrorCode::UnableToCommunicateWithAccessory);
            }
            return Err(e);
        }

        let cancel = CancellationToken::new();
        let (queue_tx, queue_rx) = chunk_queue(self.config.transport.queue_capacity);
        let reader = {
            let shared = self.shared.clone();
            let sink = sink.clone();
            TransportReader::new(
                transport.clone(),
                queue_tx,
                cancel.clone(),
                self.config.transport.read_chunk_size,
                self.config.transport.read_timeout(),
            )
            .on_error(move |e| {
                error!("stream failed: {e}");
                let code = ErrorCode::UnableToCommunicateWithAccessory;
                if shared.escalate(epoch, code) {
                    sink.post_failure(code);
                }
            })
        };
        let parser = FrameParser::new(
            queue_rx,
            plan.codec,
            sink,
            generation,
            cancel.clone(),
            self.config.parser.poll_interval(),
        )
        .with_mask(plan.mask);

        let mut workers = Vec::with_capacity(2);
        let spawned = Worker::spawn("wipry-reader", move || {
            reader.run();
        })
        .and_then(|reader| {
            workers.push(reader);
            Worker::spawn("wipry-parser", move || {
                parser.run();
            })
        });
        match spawned {
            Ok(parser) => workers.push(parser),
            Err(e) => {
                self.stop_session(
                    StreamSession {
                        config,
                        cancel,
                        workers,
                    },
                    Some(transport.clone()),
                );
                return Err(e);
            }
        }

        *session = Some(StreamSession {
            config,
            cancel,
            workers,
        });
        Ok(())
    }

    /// Issue a control request on behalf of a caller, waiting at most the
    /// join timeout for the accessory to answer.
    fn control_within(
        &self,
        transport: &Arc<dyn Transport>,
        request: ControlRequest,
    ) -> Result<ControlResponse, WipryError> {
        let transport = transport.clone();
        task::call_within("wipry-control", self.join_timeout(), move || {
            transport.control(&request)
        })
    }

    /// Cancel a stream's workers, tell the accessory to stop sending and
    /// join the workers, all within one join timeout. Events the stream
    /// still had queued are discarded.
    fn stop_session(&self, session: StreamSession, transport: Option<Arc<dyn Transport>>) {
        let deadline = Instant::now() + self.join_timeout();
        session.cancel.cancel();
        self.dispatch.advance_generation();
        if let Some(transport) = transport {
            if let Err(e) = self.control_within(&transport, ControlRequest::StopStream) {
                debug!("stop request failed: {e}");
            }
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if !task::join_all(session.workers, remaining) {
            warn!("{} workers detached", session.config);
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if self.shared.state() != ConnectionState::Idle {
            self.end();
        }
    }
}

/// Handshake thread body.
fn run_handshake(
    epoch: u64,
    connector: &dyn Connector,
    shared: &ConnectionShared,
    auth: &crate::config::AuthConfig,
    sink: &EventSink,
) {
    let result = connector
        .open()
        .map_err(|e| {
            warn!("cannot open accessory: {e}");
            ErrorCode::UnableToCommunicateWithAccessory
        })
        .and_then(|transport| {
            handshake(transport.as_ref(), auth)
                .map(|info| (transport, info))
                .map_err(|e| {
                    warn!("handshake failed: {e}");
                    e.error_code()
                })
        });

    match result {
        Ok((transport, info)) => {
            if !shared.complete(epoch, transport, info, |info| sink.post_connect(info.clone())) {
                debug!("handshake {epoch} superseded");
            }
        }
        Err(code) => {
            if shared.escalate(epoch, code) {
                sink.post_failure(code);
            } else {
                debug!("handshake {epoch} superseded");
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{AccessoryProfile, ReplayTransport};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(Arc<AtomicUsize>);

    impl Subscriber for Counting {
        fn on_connect(&self, _info: &AccessoryInfo) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        fn on_failure(&self, _code: ErrorCode) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn end_while_idle_touches_nothing() {
        let opens = Arc::new(AtomicUsize::new(0));
        let counter = opens.clone();
        let manager = ConnectionManager::with_defaults(
            move || -> Result<Arc<dyn Transport>, WipryError> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(ReplayTransport::new(AccessoryProfile::default())))
            },
        );
        let callbacks = Arc::new(AtomicUsize::new(0));
        manager.set_subscriber(Arc::new(Counting(callbacks.clone())));

        assert!(!manager.end());
        assert!(!manager.stop_stream());
        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(manager.state(), ConnectionState::Idle);
        assert!(manager.dispatch.sink().is_none(), "dispatcher started");
        assert!(manager.handshake.lock().is_none(), "handshake started");
        assert!(manager.session.lock().is_none());
        assert_eq!(opens.load(Ordering::SeqCst), 0);
        assert_eq!(callbacks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failed_connection_must_be_ended_before_restart() {
        let manager = ConnectionManager::with_defaults(
            || -> Result<Arc<dyn Transport>, WipryError> { Err("no accessory".into()) },
        );
        assert!(manager.start());
        assert_eq!(
            manager.wait_for_connection(Duration::from_secs(3)),
            ConnectionState::Failed(ErrorCode::UnableToCommunicateWithAccessory)
        );

        assert!(!manager.start());
        assert!(manager.handshake.lock().is_some());
        assert!(manager.end());
        assert!(manager.dispatch.sink().is_none());
        assert!(manager.start());
        assert!(manager.end());
    }
}
