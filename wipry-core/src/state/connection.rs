//! Connection state machine and the shared connection record.
//!
//! Provides a `ConnectionState` enum with validated transitions that
//! return `Result` instead of panicking, and [`ConnectionShared`], the
//! one mutex-guarded record every thread of a manager agrees on.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::{ErrorCode, WipryError};
use crate::state::AccessoryInfo;
use crate::transport::Transport;

// ── ConnectionState ──────────────────────────────────────────────

/// Lifecycle of the accessory connection.
///
/// ```text
///  Idle ──► Connecting ──► Connected
///   ▲            │              │
///   │            ▼              ▼
///   ├── end ── Failed ◄─────────┘
///   └──────────────────── end ──┘
/// ```
///
/// `Failed` is left only through `end()`; a new attempt starts from `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection. Initial state, and the state after `end()`.
    #[default]
    Idle,
    /// Handshake running on its own thread.
    Connecting,
    /// Authenticated; queries and streams are available.
    Connected,
    /// The attempt or the established link failed with this code.
    Failed(ErrorCode),
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Failed(code) => write!(f, "Failed({code})"),
        }
    }
}

impl ConnectionState {
    /// `true` while Connecting or Connected.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Idle`.
    pub fn begin_connect(&mut self) -> Result<(), WipryError> {
        match self {
            Self::Idle => {
                *self = Self::Connecting;
                Ok(())
            }
            Self::Failed(code) => Err(WipryError::Other(format!(
                "connection failed with {code}; end it before starting again"
            ))),
            _ => Err(WipryError::AlreadyActive),
        }
    }

    /// Valid from: `Connecting`.
    pub fn complete_connect(&mut self) -> Result<(), WipryError> {
        match self {
            Self::Connecting => {
                *self = Self::Connected;
                Ok(())
            }
            _ => Err(WipryError::Other(format!("cannot complete connect from {self}"))),
        }
    }

    /// Valid from: `Connecting`, `Connected`.
    pub fn fail(&mut self, code: ErrorCode) -> Result<(), WipryError> {
        match self {
            Self::Connecting | Self::Connected => {
                *self = Self::Failed(code);
                Ok(())
            }
            _ => Err(WipryError::Other(format!("cannot fail from {self}"))),
        }
    }

    /// Force-reset to `Idle` regardless of current state.
    pub fn reset(&mut self) {
        *self = Self::Idle;
    }
}

// ── Connection ───────────────────────────────────────────────────

/// Everything known about the current connection attempt.
#[derive(Default)]
pub struct Connection {
    pub state: ConnectionState,
    /// Incremented by every `start()` and `end()`; work tagged with an
    /// older epoch must not change state.
    pub epoch: u64,
    pub transport: Option<Arc<dyn Transport>>,
    pub info: Option<AccessoryInfo>,
    pub connected_at: Option<Instant>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("epoch", &self.epoch)
            .field("transport", &self.transport.is_some())
            .field("info", &self.info)
            .finish()
    }
}

// ── ConnectionShared ─────────────────────────────────────────────

/// The connection record plus a condvar signalled on every state change.
#[derive(Debug, Default)]
pub struct ConnectionShared {
    conn: Mutex<Connection>,
    changed: Condvar,
}

impl ConnectionShared {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    pub fn state(&self) -> ConnectionState {
        self.conn.lock().state
    }

    /// Enter `Connecting` and open a new epoch.
    pub fn begin_attempt(&self) -> Result<u64, WipryError> {
        let mut conn = self.conn.lock();
        conn.state.begin_connect()?;
        conn.epoch += 1;
        conn.transport = None;
        conn.info = None;
        conn.connected_at = None;
        let epoch = conn.epoch;
        drop(conn);
        self.changed.notify_all();
        Ok(epoch)
    }

    /// Finish the handshake of `epoch`.
    ///
    /// `notify` runs under the lock so the connect notice is posted
    /// before any stream can start. Returns `false` if that attempt was
    /// superseded in the meantime.
    pub fn complete(
        &self,
        epoch: u64,
        transport: Arc<dyn Transport>,
        info: AccessoryInfo,
        notify: impl FnOnce(&AccessoryInfo),
    ) -> bool {
        let mut conn = self.conn.lock();
        if conn.epoch != epoch || conn.state.complete_connect().is_err() {
            return false;
        }
        notify(&info);
        conn.transport = Some(transport);
        conn.info = Some(info);
        conn.connected_at = Some(Instant::now());
        drop(conn);
        self.changed.notify_all();
        true
    }

    /// Move the `epoch` attempt to `Failed(code)` and release the link.
    ///
    /// Returns `true` only for the call that made the transition, so a
    /// failure is reported once per attempt.
    pub fn escalate(&self, epoch: u64, code: ErrorCode) -> bool {
        let mut conn = self.conn.lock();
        if conn.epoch != epoch || conn.state.fail(code).is_err() {
            return false;
        }
        conn.transport = None;
        conn.info = None;
        conn.connected_at = None;
        drop(conn);
        self.changed.notify_all();
        true
    }

    /// Return to `Idle`, invalidating any in-flight work.
    ///
    /// Returns the transport that was held, or `Err` if already idle.
    pub fn reset(&self) -> Result<Option<Arc<dyn Transport>>, WipryError> {
        let mut conn = self.conn.lock();
        if conn.state == ConnectionState::Idle {
            return Err(WipryError::NotConnected);
        }
        conn.state.reset();
        conn.epoch += 1;
        conn.info = None;
        conn.connected_at = None;
        let transport = conn.transport.take();
        drop(conn);
        self.changed.notify_all();
        Ok(transport)
    }

    /// Transport and epoch of an established connection.
    pub fn connected_transport(&self) -> Option<(u64, Arc<dyn Transport>)> {
        let conn = self.conn.lock();
        match (&conn.state, &conn.transport) {
            (ConnectionState::Connected, Some(t)) => Some((conn.epoch, t.clone())),
            _ => None,
        }
    }

    /// Accessory details, available only while connected.
    pub fn info(&self) -> Option<AccessoryInfo> {
        let conn = self.conn.lock();
        conn.state.is_connected().then(|| conn.info.clone()).flatten()
    }

    /// Block until the state leaves `Connecting` or `timeout` elapses.
    pub fn wait_settled(&self, timeout: Duration) -> ConnectionState {
        let deadline = Instant::now() + timeout;
        let mut conn = self.conn.lock();
        while conn.state == ConnectionState::Connecting {
            if self.changed.wait_until(&mut conn, deadline).timed_out() {
                break;
            }
        }
        conn.state
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{AccessoryProfile, ReplayTransport};
    use std::thread;

    fn transport() -> Arc<dyn Transport> {
        Arc::new(ReplayTransport::new(AccessoryProfile::default()))
    }

    #[test]
    fn happy_path_lifecycle() {
        let mut state = ConnectionState::Idle;
        state.begin_connect().unwrap();
        assert_eq!(state, ConnectionState::Connecting);
        assert!(state.is_active());

        state.complete_connect().unwrap();
        assert!(state.is_connected());

        state.reset();
        assert_eq!(state, ConnectionState::Idle);
        assert!(!state.is_active());
    }

    #[test]
    fn invalid_transition_connect_when_connected() {
        let mut state = ConnectionState::Connected;
        assert!(matches!(state.begin_connect(), Err(WipryError::AlreadyActive)));
        let mut state = ConnectionState::Connecting;
        assert!(state.begin_connect().is_err());
    }

    #[test]
    fn failed_requires_reset_before_reconnect() {
        let mut state = ConnectionState::Connecting;
        state.fail(ErrorCode::UnsupportedAccessory).unwrap();
        assert!(!state.is_active());
        assert!(state.fail(ErrorCode::UnknownError).is_err());
        assert!(state.begin_connect().is_err());
        assert_eq!(state, ConnectionState::Failed(ErrorCode::UnsupportedAccessory));

        state.reset();
        state.begin_connect().unwrap();
    }

    #[test]
    fn failed_attempt_keeps_epoch_until_reset() {
        let shared = ConnectionShared::new();
        let epoch = shared.begin_attempt().unwrap();
        assert!(shared.escalate(epoch, ErrorCode::UnsupportedAccessory));
        assert!(shared.begin_attempt().is_err());
        assert_eq!(shared.lock().epoch, epoch);

        assert!(shared.reset().unwrap().is_none());
        assert!(shared.begin_attempt().unwrap() > epoch);
    }

    #[test]
    fn display_format() {
        assert_eq!(ConnectionState::Idle.to_string(), "Idle");
        assert!(
            ConnectionState::Failed(ErrorCode::UnknownError)
                .to_string()
                .starts_with("Failed(")
        );
    }

    #[test]
    fn stale_epoch_cannot_complete() {
        let shared = ConnectionShared::new();
        let first = shared.begin_attempt().unwrap();
        shared.reset().unwrap();
        let second = shared.begin_attempt().unwrap();
        assert_ne!(first, second);

        assert!(!shared.complete(first, transport(), AccessoryInfo::default(), |_| {}));
        assert_eq!(shared.state(), ConnectionState::Connecting);
        assert!(shared.complete(second, transport(), AccessoryInfo::default(), |_| {}));
        assert!(shared.info().is_some());
    }

    #[test]
    fn escalate_reports_once() {
        let shared = ConnectionShared::new();
        let epoch = shared.begin_attempt().unwrap();
        shared.complete(epoch, transport(), AccessoryInfo::default(), |_| {});

        let code = ErrorCode::UnableToCommunicateWithAccessory;
        assert!(shared.escalate(epoch, code));
        assert!(!shared.escalate(epoch, code));
        assert_eq!(shared.state(), ConnectionState::Failed(code));
        assert!(shared.connected_transport().is_none());
        assert!(shared.info().is_none());
    }

    #[test]
    fn reset_from_idle_is_rejected() {
        assert!(ConnectionShared::new().reset().is_err());
    }

    #[test]
    fn wait_settled_wakes_on_completion() {
        let shared = Arc::new(ConnectionShared::new());
        let epoch = shared.begin_attempt().unwrap();
        let remote = shared.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.complete(epoch, transport(), AccessoryInfo::default(), |_| {});
        });
        assert_eq!(
            shared.wait_settled(Duration::from_secs(2)),
            ConnectionState::Connected
        );
        handle.join().unwrap();
    }
}
