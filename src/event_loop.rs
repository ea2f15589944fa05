//! Single-threaded event loop: timers, delays and completions posted from
//! other threads.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::rc::{Rc, Weak};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::future::Future;
use core::pin::pin;
use core::sync::atomic::Ordering;
use core::task::{Context, Poll};

use futures::task::{ArcWake, waker};
use log::{trace, warn};
use portable_atomic::AtomicBool;

use crate::environment::Environment;
use crate::error::{DEFAULT_CANCEL_CODE, Error, Fault};
use crate::promise::{Outcome, Promise};
use crate::sync::mailbox::Mailbox;
use crate::time::{Duration, Instant};
use crate::value::Value;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

enum Callback {
    Once(Box<dyn FnOnce()>),
    Periodic(Rc<dyn Fn()>),
}

struct Timer {
    due: Instant,
    interval: Duration,
    callback: Callback,
}

// Raised by wakers and remote handles, consumed by the idle wait.
struct Signal {
    raised: AtomicBool,
}

impl Signal {
    fn raise(&self) {
        self.raised.store(true, Ordering::Release);
    }

    fn clear(&self) {
        self.raised.store(false, Ordering::Release);
    }
}

impl ArcWake for Signal {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.raise();
    }
}

struct RemoteSlot {
    mailbox: Mailbox<Outcome>,
    signal: Arc<Signal>,
}

/// Sending half of [`EventLoop::remote`]. Can be moved to another thread.
///
/// Dropping it without settling rejects the loop-side promise.
pub struct Remote {
    slot: Arc<RemoteSlot>,
}

impl Remote {
    pub fn resolve(self, value: impl Into<Value>) {
        self.settle(Ok(value.into()));
    }

    pub fn reject(self, fault: Fault) {
        self.settle(Err(fault));
    }

    pub fn settle(self, outcome: Outcome) {
        self.slot.mailbox.post(outcome);
        // Drop closes the mailbox and wakes the loop.
    }
}

impl Drop for Remote {
    fn drop(&mut self) {
        self.slot.mailbox.close();
        self.slot.signal.raise();
    }
}

impl core::fmt::Debug for Remote {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Remote")
            .field("mailbox", &self.slot.mailbox)
            .finish()
    }
}

struct PendingRemote {
    slot: Arc<RemoteSlot>,
    promise: Promise,
}

/// Handle to a single-threaded event loop. Clones share the loop.
#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<Inner>,
}

struct Inner {
    env: Rc<dyn Environment>,
    timers: RefCell<BTreeMap<TimerId, Timer>>,
    next_timer: Cell<u64>,
    running: Cell<bool>,
    signal: Arc<Signal>,
    remotes: RefCell<Vec<PendingRemote>>,
}

struct Running<'a>(&'a Cell<bool>);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl EventLoop {
    pub fn new(env: Rc<dyn Environment>) -> Self {
        Self {
            inner: Rc::new(Inner {
                env,
                timers: RefCell::new(BTreeMap::new()),
                next_timer: Cell::new(0),
                running: Cell::new(false),
                signal: Arc::new(Signal {
                    raised: AtomicBool::new(false),
                }),
                remotes: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn now(&self) -> Instant {
        self.inner.env.ticks()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.get()
    }

    /// Whether any timer or remote completion is outstanding.
    pub fn has_pending_work(&self) -> bool {
        !self.inner.timers.borrow().is_empty() || !self.inner.remotes.borrow().is_empty()
    }

    /// Runs `callback` once, `after` from now.
    pub fn add_timer(&self, after: Duration, callback: impl FnOnce() + 'static) -> TimerId {
        self.insert_timer(after, Duration::ZERO, Callback::Once(Box::new(callback)))
    }

    /// Runs `callback` every `interval` until cancelled. A zero interval
    /// fires on every loop turn.
    pub fn add_periodic_timer(&self, interval: Duration, callback: impl Fn() + 'static) -> TimerId {
        self.insert_timer(interval, interval, Callback::Periodic(Rc::new(callback)))
    }

    fn insert_timer(&self, after: Duration, interval: Duration, callback: Callback) -> TimerId {
        let id = TimerId(self.inner.next_timer.get());
        self.inner.next_timer.set(id.0 + 1);

        let due = self.now() + after;
        trace!("timer {:?} armed for {}", id, due);
        self.inner.timers.borrow_mut().insert(
            id,
            Timer {
                due,
                interval,
                callback,
            },
        );
        id
    }

    /// Returns false if the timer already fired or was cancelled.
    pub fn cancel_timer(&self, id: TimerId) -> bool {
        let removed = self.inner.timers.borrow_mut().remove(&id);
        // Callbacks may own loop handles, drop outside the borrow.
        removed.is_some()
    }

    pub fn is_timer_active(&self, id: TimerId) -> bool {
        self.inner.timers.borrow().contains_key(&id)
    }

    /// Promise fulfilled with `Value::Unit` once `duration` elapsed.
    /// Cancelling it clears the timer and rejects it.
    pub fn delay(&self, duration: Duration) -> Promise {
        let timer = Rc::new(Cell::new(None));
        let weak: Weak<Inner> = Rc::downgrade(&self.inner);

        let slot = timer.clone();
        let promise = Promise::with_canceller(move |p| {
            if let (Some(inner), Some(id)) = (weak.upgrade(), slot.get()) {
                EventLoop { inner }.cancel_timer(id);
            }
            p.reject(Fault::cancel("timer cancelled", DEFAULT_CANCEL_CODE));
        });

        let resolver = promise.clone();
        timer.set(Some(self.add_timer(duration, move || {
            resolver.resolve(());
        })));

        promise
    }

    /// Creates a promise settled through a [`Remote`] from any thread.
    pub fn remote(&self) -> (Remote, Promise) {
        let slot = Arc::new(RemoteSlot {
            mailbox: Mailbox::new(),
            signal: self.inner.signal.clone(),
        });
        let promise = Promise::with_canceller(|p| {
            p.reject(Fault::cancel("remote completion cancelled", DEFAULT_CANCEL_CODE));
        });

        self.inner.remotes.borrow_mut().push(PendingRemote {
            slot: slot.clone(),
            promise: promise.clone(),
        });

        (Remote { slot }, promise)
    }

    /// Runs until no timers and no remote completions are left.
    pub fn run(&self) -> Result<(), Error> {
        let _running = self.enter()?;

        while self.has_pending_work() {
            self.turn(None);
        }

        Ok(())
    }

    /// Fires due timers and drains remote completions without waiting.
    /// Returns how many callbacks ran.
    pub fn run_once(&self) -> Result<usize, Error> {
        let _running = self.enter()?;
        Ok(self.dispatch())
    }

    /// Drives the loop until `future` completes or `deadline` passes.
    ///
    /// Returns `Ok(None)` at the deadline and [`Error::Stalled`] when the
    /// loop has nothing left that could complete the future.
    pub fn block_on<F: Future>(
        &self,
        future: F,
        deadline: Option<Instant>,
    ) -> Result<Option<F::Output>, Error> {
        let _running = self.enter()?;

        let waker = waker(self.inner.signal.clone());
        let mut context = Context::from_waker(&waker);
        let mut future = pin!(future);

        loop {
            if let Poll::Ready(output) = future.as_mut().poll(&mut context) {
                return Ok(Some(output));
            }
            if deadline.is_some_and(|deadline| self.now() >= deadline) {
                return Ok(None);
            }
            if !self.has_pending_work() && !self.inner.signal.raised.load(Ordering::Acquire) {
                return Err(Error::Stalled);
            }

            self.turn(deadline);
        }
    }

    fn enter(&self) -> Result<Running<'_>, Error> {
        if self.inner.running.replace(true) {
            return Err(Error::LoopRunning);
        }
        Ok(Running(&self.inner.running))
    }

    fn turn(&self, limit: Option<Instant>) {
        if self.dispatch() > 0 {
            return;
        }

        let until = match (self.next_due(), limit) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.inner
            .env
            .wait_for_event_with_deadline(&self.inner.signal.raised, until);
    }

    fn dispatch(&self) -> usize {
        self.inner.signal.clear();
        self.fire_due_timers() + self.poll_remotes()
    }

    fn next_due(&self) -> Option<Instant> {
        self.inner.timers.borrow().values().map(|t| t.due).min()
    }

    fn fire_due_timers(&self) -> usize {
        let now = self.now();
        let mut due: Vec<(Instant, TimerId)> = self
            .inner
            .timers
            .borrow()
            .iter()
            .filter(|(_, timer)| timer.due <= now)
            .map(|(id, timer)| (timer.due, *id))
            .collect();
        due.sort_unstable();

        due.into_iter().filter(|(_, id)| self.fire(*id, now)).count()
    }

    fn fire(&self, id: TimerId, now: Instant) -> bool {
        let mut timers = self.inner.timers.borrow_mut();

        let periodic = match timers.get_mut(&id) {
            // Cancelled by an earlier callback in this turn.
            None => return false,
            Some(timer) => match &timer.callback {
                Callback::Periodic(callback) => {
                    let callback = callback.clone();
                    timer.due = now + timer.interval;
                    Some(callback)
                }
                Callback::Once(_) => None,
            },
        };

        match periodic {
            Some(callback) => {
                drop(timers);
                callback();
            }
            None => {
                let Some(Timer {
                    callback: Callback::Once(callback),
                    ..
                }) = timers.remove(&id)
                else {
                    return false;
                };
                drop(timers);
                callback();
            }
        }

        true
    }

    fn poll_remotes(&self) -> usize {
        let pending = core::mem::take(&mut *self.inner.remotes.borrow_mut());
        let mut settled = 0;
        let mut keep = Vec::new();

        for entry in pending {
            if entry.promise.is_settled() {
                continue;
            }

            // Check closed first: a close observed here implies the post is visible.
            let closed = entry.slot.mailbox.is_closed();
            if let Some(outcome) = entry.slot.mailbox.try_read() {
                entry.promise.settle(outcome);
                settled += 1;
            } else if closed {
                warn!("remote handle dropped without settling");
                entry
                    .promise
                    .reject(Fault::cancel("remote handle dropped", DEFAULT_CANCEL_CODE));
                settled += 1;
            } else {
                keep.push(entry);
            }
        }

        // Callbacks above may have registered new remotes.
        self.inner.remotes.borrow_mut().extend(keep);
        settled
    }
}

#[cfg(feature = "std")]
impl Default for EventLoop {
    fn default() -> Self {
        Self::new(Rc::new(crate::environment::SystemEnvironment::new()))
    }
}

impl core::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventLoop")
            .field("timers", &self.inner.timers.borrow().len())
            .field("remotes", &self.inner.remotes.borrow().len())
            .field("running", &self.inner.running.get())
            .finish()
    }
}
