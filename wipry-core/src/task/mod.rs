//! Named worker threads with bounded joins.
//!
//! Every long-running loop in the core (handshake, transport reader,
//! frame parser, dispatcher) runs on a dedicated OS thread spawned
//! through [`Worker::spawn`]. Shutdown is cooperative: the owner cancels
//! the worker's `CancellationToken` and then calls
//! [`Worker::join_timeout`], which never waits longer than asked.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use tracing::{debug, warn};

use crate::error::WipryError;

pub struct Worker {
    name: &'static str,
    handle: JoinHandle<()>,
    // Disconnects when the thread body returns or unwinds.
    done: Receiver<()>,
}

impl Worker {
    /// Spawn `f` on a new thread called `name`.
    pub fn spawn<F>(name: &'static str, f: F) -> Result<Self, WipryError>
    where
        F: FnOnce() + Send + 'static,
    {
        let (done_tx, done) = bounded::<()>(0);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _done = done_tx;
                f();
            })
            .map_err(|source| WipryError::Spawn { name, source })?;
        Ok(Self { name, handle, done })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait up to `timeout` for the thread to exit.
    ///
    /// Returns `true` if the thread was joined. A thread that is still
    /// running at the deadline, or the calling thread itself, is
    /// detached instead.
    pub fn join_timeout(self, timeout: Duration) -> bool {
        if self.handle.thread().id() == thread::current().id() {
            debug!("{} joining itself; detaching", self.name);
            return false;
        }
        match self.done.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) | Ok(()) => {
                if self.handle.join().is_err() {
                    warn!("{} thread panicked", self.name);
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("{} did not stop within {timeout:?}; detaching", self.name);
                false
            }
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Join several workers against one shared deadline.
///
/// Returns `true` only if every worker was joined.
pub fn join_all(workers: impl IntoIterator<Item = Worker>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    let mut all_joined = true;
    for worker in workers {
        let remaining = deadline.saturating_duration_since(Instant::now());
        all_joined &= worker.join_timeout(remaining);
    }
    all_joined
}

/// Run `f` on a thread called `name`, waiting at most `timeout` for
/// its result.
///
/// A call still running at the deadline yields [`WipryError::Timeout`];
/// its thread is detached and finishes on its own.
pub fn call_within<T, F>(name: &'static str, timeout: Duration, f: F) -> Result<T, WipryError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, WipryError> + Send + 'static,
{
    let (result_tx, result_rx) = bounded(1);
    let worker = Worker::spawn(name, move || {
        result_tx.send(f()).ok();
    })?;
    match result_rx.recv_timeout(timeout) {
        Ok(result) => {
            worker.join_timeout(timeout);
            result
        }
        Err(RecvTimeoutError::Timeout) => {
            warn!("{name} gave no answer within {timeout:?}; detaching");
            Err(WipryError::Timeout(timeout))
        }
        Err(RecvTimeoutError::Disconnected) => {
            worker.join_timeout(timeout);
            Err(format!("{name} thread exited without a result").into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn joins_finished_worker() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let worker = Worker::spawn("test-worker", move || flag.store(true, Ordering::SeqCst)).unwrap();
        assert_eq!(worker.name(), "test-worker");
        assert!(worker.join_timeout(Duration::from_secs(2)));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn detaches_worker_past_deadline() {
        let release = Arc::new(AtomicBool::new(false));
        let flag = release.clone();
        let worker = Worker::spawn("slow-worker", move || {
            while !flag.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(5));
            }
        })
        .unwrap();

        let started = Instant::now();
        assert!(!worker.join_timeout(Duration::from_millis(50)));
        assert!(started.elapsed() < Duration::from_secs(1));
        release.store(true, Ordering::SeqCst);
    }

    #[test]
    fn panicking_worker_still_joins() {
        let worker = Worker::spawn("panicky", || panic!("boom")).unwrap();
        assert!(worker.join_timeout(Duration::from_secs(2)));
    }

    #[test]
    fn call_within_returns_result() {
        let value = call_within("quick-call", Duration::from_secs(2), || Ok(7)).unwrap();
        assert_eq!(value, 7);
        let err = call_within::<(), _>("failing-call", Duration::from_secs(2), || {
            Err(WipryError::NotConnected)
        })
        .unwrap_err();
        assert!(matches!(err, WipryError::NotConnected));
    }

    #[test]
    fn call_within_gives_up_on_hung_call() {
        let started = Instant::now();
        let err = call_within("hung-call", Duration::from_millis(50), || {
            thread::sleep(Duration::from_secs(2));
            Ok(())
        })
        .unwrap_err();
        assert!(matches!(err, WipryError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn call_within_survives_panic() {
        let err = call_within::<(), _>("panicky-call", Duration::from_secs(2), || panic!("boom"))
            .unwrap_err();
        assert!(matches!(err, WipryError::Other(_)));
    }

    #[test]
    fn join_all_shares_deadline() {
        let workers = (0..3)
            .map(|_| Worker::spawn("quick", || {}).unwrap())
            .collect::<Vec<_>>();
        assert!(join_all(workers, Duration::from_secs(2)));
    }
}
