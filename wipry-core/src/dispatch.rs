//! Event delivery to the registered subscriber.
//!
//! Producers post into a [`Mailbox`]: connect and failure notifications
//! queue in order and are never dropped, while stream events occupy one
//! latest-wins slot per kind. A single dispatcher thread per connection
//! drains the mailbox, oldest post first, and invokes the subscriber
//! synchronously. Stream events carry the generation of the stream that
//! produced them and are discarded once a newer stream has started.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, trace};

use crate::codec::RssiFrame;
use crate::error::{ErrorCode, WipryError};
use crate::packet::BeaconCaptureContainer;
use crate::state::AccessoryInfo;
use crate::task::Worker;

// ── Subscriber ───────────────────────────────────────────────────

/// Receives connection and stream events.
///
/// All methods run on the dispatcher thread, one at a time. A slow
/// callback delays later events, and any stream event that arrives in
/// the meantime replaces the undelivered one of its kind.
pub trait Subscriber: Send + Sync {
    /// The handshake succeeded.
    fn on_connect(&self, _info: &AccessoryInfo) {}

    /// The connection attempt, or an established connection, failed.
    fn on_failure(&self, _code: ErrorCode) {}

    fn on_rssi(&self, _frame: RssiFrame) {}

    fn on_beacon_capture(&self, _container: BeaconCaptureContainer) {}
}

// ── Mailbox ──────────────────────────────────────────────────────

enum Notice {
    Connected(AccessoryInfo),
    Failed(ErrorCode),
}

struct Posted<T> {
    seq: u64,
    generation: u64,
    item: T,
}

enum Delivery {
    Notice(Notice),
    Rssi(u64, RssiFrame),
    Beacon(u64, BeaconCaptureContainer),
}

/// Totals reported when a dispatcher stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: u64,
    pub overwritten: u64,
    pub stale: u64,
}

#[derive(Default)]
struct Slots {
    notices: VecDeque<Posted<Notice>>,
    rssi: Option<Posted<RssiFrame>>,
    beacon: Option<Posted<BeaconCaptureContainer>>,
    next_seq: u64,
    closed: bool,
    stats: DispatchStats,
}

impl Slots {
    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Remove the pending item with the lowest post sequence.
    fn pop_oldest(&mut self) -> Option<Delivery> {
        let notice = self.notices.front().map(|p| p.seq);
        let rssi = self.rssi.as_ref().map(|p| p.seq);
        let beacon = self.beacon.as_ref().map(|p| p.seq);
        let oldest = [notice, rssi, beacon].into_iter().flatten().min()?;

        if notice == Some(oldest) {
            self.notices.pop_front().map(|p| Delivery::Notice(p.item))
        } else if rssi == Some(oldest) {
            self.rssi.take().map(|p| Delivery::Rssi(p.generation, p.item))
        } else {
            self.beacon.take().map(|p| Delivery::Beacon(p.generation, p.item))
        }
    }
}

/// Hand-off point between producers and one dispatcher thread.
pub struct Mailbox {
    slots: Mutex<Slots>,
    ready: Condvar,
}

impl Mailbox {
    fn new() -> Self {
        Self {
            slots: Mutex::new(Slots::default()),
            ready: Condvar::new(),
        }
    }

    fn post_notice(&self, notice: Notice) {
        let mut slots = self.slots.lock();
        if slots.closed {
            return;
        }
        let seq = slots.next_seq();
        slots.notices.push_back(Posted {
            seq,
            generation: 0,
            item: notice,
        });
        drop(slots);
        self.ready.notify_one();
    }

    fn post_rssi(&self, generation: u64, frame: RssiFrame) {
        let mut slots = self.slots.lock();
        if slots.closed {
            return;
        }
        let seq = slots.next_seq();
        if let Some(old) = slots.rssi.replace(Posted {
            seq,
            generation,
            item: frame,
        }) {
            slots.stats.overwritten += 1;
            trace!("RSSI frame {} overwritten before delivery", old.seq);
        }
        drop(slots);
        self.ready.notify_one();
    }

    fn post_beacon(&self, generation: u64, container: BeaconCaptureContainer) {
        let mut slots = self.slots.lock();
        if slots.closed {
            return;
        }
        let seq = slots.next_seq();
        if let Some(old) = slots.beacon.replace(Posted {
            seq,
            generation,
            item: container,
        }) {
            slots.stats.overwritten += 1;
            trace!("beacon container {} overwritten before delivery", old.seq);
        }
        drop(slots);
        self.ready.notify_one();
    }

    /// Block until something is pending. `None` once closed and drained.
    fn next(&self) -> Option<Delivery> {
        let mut slots = self.slots.lock();
        loop {
            if let Some(delivery) = slots.pop_oldest() {
                return Some(delivery);
            }
            if slots.closed {
                return None;
            }
            self.ready.wait(&mut slots);
        }
    }

    /// Stop accepting posts and drop undelivered stream events. Queued
    /// notices are still delivered.
    fn close(&self) {
        let mut slots = self.slots.lock();
        slots.closed = true;
        slots.rssi = None;
        slots.beacon = None;
        drop(slots);
        self.ready.notify_all();
    }

    fn record(&self, f: impl FnOnce(&mut DispatchStats)) {
        f(&mut self.slots.lock().stats);
    }

    fn stats(&self) -> DispatchStats {
        self.slots.lock().stats
    }
}

// ── EventSink ────────────────────────────────────────────────────

/// Producer handle for one dispatcher run.
#[derive(Clone)]
pub struct EventSink {
    mailbox: Arc<Mailbox>,
    generation: Arc<AtomicU64>,
}

impl EventSink {
    pub fn post_connect(&self, info: AccessoryInfo) {
        self.mailbox.post_notice(Notice::Connected(info));
    }

    pub fn post_failure(&self, code: ErrorCode) {
        self.mailbox.post_notice(Notice::Failed(code));
    }

    /// Post a frame produced by the stream of `generation`.
    pub fn post_rssi(&self, generation: u64, frame: RssiFrame) {
        if self.is_stale(generation) {
            trace!("dropping RSSI frame of superseded stream {generation}");
            return;
        }
        self.mailbox.post_rssi(generation, frame);
    }

    pub fn post_beacon(&self, generation: u64, container: BeaconCaptureContainer) {
        if self.is_stale(generation) {
            trace!("dropping beacon container of superseded stream {generation}");
            return;
        }
        self.mailbox.post_beacon(generation, container);
    }

    fn is_stale(&self, generation: u64) -> bool {
        generation != self.generation.load(Ordering::Acquire)
    }
}

// ── EventDispatch ────────────────────────────────────────────────

struct DispatchRun {
    mailbox: Arc<Mailbox>,
    worker: Worker,
}

/// The subscriber slot, the stream generation and the dispatcher thread.
pub struct EventDispatch {
    subscriber: Arc<RwLock<Option<Arc<dyn Subscriber>>>>,
    generation: Arc<AtomicU64>,
    run: Mutex<Option<DispatchRun>>,
}

impl Default for EventDispatch {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatch {
    pub fn new() -> Self {
        Self {
            subscriber: Arc::new(RwLock::new(None)),
            generation: Arc::new(AtomicU64::new(0)),
            run: Mutex::new(None),
        }
    }

    /// Replace the registered subscriber. Takes effect from the next
    /// delivered event.
    pub fn set_subscriber(&self, subscriber: Arc<dyn Subscriber>) {
        *self.subscriber.write() = Some(subscriber);
    }

    pub fn clear_subscriber(&self) {
        *self.subscriber.write() = None;
    }

    pub fn has_subscriber(&self) -> bool {
        self.subscriber.read().is_some()
    }

    /// Supersede the current stream. Returns the new generation.
    pub fn advance_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Start a fresh dispatcher thread with an empty mailbox, retiring
    /// any previous one.
    pub fn start(&self, join_timeout: Duration) -> Result<EventSink, WipryError> {
        self.stop(join_timeout);

        let mailbox = Arc::new(Mailbox::new());
        let sink = EventSink {
            mailbox: mailbox.clone(),
            generation: self.generation.clone(),
        };
        let worker = {
            let mailbox = mailbox.clone();
            let subscriber = self.subscriber.clone();
            let generation = self.generation.clone();
            Worker::spawn("wipry-dispatch", move || {
                dispatch_loop(&mailbox, &subscriber, &generation)
            })?
        };
        *self.run.lock() = Some(DispatchRun { mailbox, worker });
        Ok(sink)
    }

    /// Producer handle for the running dispatcher, if any.
    pub fn sink(&self) -> Option<EventSink> {
        self.run.lock().as_ref().map(|run| EventSink {
            mailbox: run.mailbox.clone(),
            generation: self.generation.clone(),
        })
    }

    /// Close the mailbox and join the dispatcher. Pending notices are
    /// delivered first; pending stream events are dropped.
    ///
    /// Called from inside a callback, the dispatcher finishes once that
    /// callback returns.
    pub fn stop(&self, join_timeout: Duration) -> bool {
        let Some(run) = self.run.lock().take() else {
            return true;
        };
        run.mailbox.close();
        run.worker.join_timeout(join_timeout)
    }
}

impl Drop for EventDispatch {
    fn drop(&mut self) {
        if let Some(run) = self.run.get_mut().take() {
            run.mailbox.close();
        }
    }
}

fn dispatch_loop(
    mailbox: &Mailbox,
    subscriber: &RwLock<Option<Arc<dyn Subscriber>>>,
    generation: &AtomicU64,
) {
    while let Some(delivery) = mailbox.next() {
        let stale = match &delivery {
            Delivery::Notice(_) => false,
            Delivery::Rssi(g, _) | Delivery::Beacon(g, _) => *g != generation.load(Ordering::Acquire),
        };
        if stale {
            mailbox.record(|s| s.stale += 1);
            continue;
        }
        // Clone out so a callback may replace the subscriber.
        let Some(target) = subscriber.read().clone() else {
            trace!("no subscriber registered; event dropped");
            continue;
        };
        match delivery {
            Delivery::Notice(Notice::Connected(info)) => target.on_connect(&info),
            Delivery::Notice(Notice::Failed(code)) => target.on_failure(code),
            Delivery::Rssi(_, frame) => target.on_rssi(frame),
            Delivery::Beacon(_, container) => target.on_beacon_capture(container),
        }
        mailbox.record(|s| s.delivered += 1);
    }
    let stats = mailbox.stats();
    debug!(
        "dispatcher stopped: {} delivered, {} overwritten, {} stale",
        stats.delivered, stats.overwritten, stats.stale
    );
}
