//! Tick-driven cooperative scheduler.
//!
//! Every runnable coroutine is visited once per tick, in spawn order. A tick
//! is a zero-interval periodic timer on the event loop, armed while at least
//! one coroutine is runnable and cleared once the set drains. During a visit
//! the scheduler pulls the coroutine's next yield and acts on it:
//!
//! | yielded      | action                                                 |
//! |--------------|--------------------------------------------------------|
//! | future       | suspend until it settles                               |
//! | task         | spawn as a child, suspend until the child settles      |
//! | collection   | join all members, suspend until the join settles       |
//! | opcode       | execute it against the coroutine                       |
//! | value, fault | resume right away, raising faults at the yield point   |

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};

use log::{debug, trace, warn};

use crate::coroutine::{Coroutine, CoroutineId, CoroutineKind, Standard, State};
use crate::error::{Error, Fault};
use crate::event_loop::{EventLoop, TimerId};
use crate::join::join;
use crate::opcode::Opcode;
use crate::promise::{Outcome, Promise};
use crate::steps::{Generator, Resume, Step, Yielded};
use crate::time::Duration;
use crate::value::Value;

/// Code of the fault every coroutine is cancelled with on [`Scheduler::shutdown`].
pub const SHUTDOWN_CODE: i64 = 503;

#[derive(Clone)]
struct Entry {
    id: CoroutineId,
    coroutine: Rc<dyn Coroutine>,
    /// Kind children of this coroutine are created with.
    kind: Rc<dyn CoroutineKind>,
}

struct Inner {
    event_loop: EventLoop,
    default_kind: Rc<dyn CoroutineKind>,
    runnable: RefCell<BTreeMap<CoroutineId, Entry>>,
    next_id: Cell<u64>,
    ticker: Cell<Option<TimerId>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            self.event_loop.cancel_timer(ticker);
        }
    }
}

/// Handle to a scheduler. Clones share the runnable set.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<Inner>,
}

impl Scheduler {
    pub fn new(event_loop: EventLoop) -> Self {
        Self::with_kind(event_loop, Rc::new(Standard))
    }

    /// Scheduler creating submitted coroutines with `kind` unless told
    /// otherwise.
    pub fn with_kind(event_loop: EventLoop, kind: Rc<dyn CoroutineKind>) -> Self {
        Self {
            inner: Rc::new(Inner {
                event_loop,
                default_kind: kind,
                runnable: RefCell::new(BTreeMap::new()),
                next_id: Cell::new(1),
                ticker: Cell::new(None),
            }),
        }
    }

    pub fn event_loop(&self) -> &EventLoop {
        &self.inner.event_loop
    }

    /// Number of runnable coroutines.
    pub fn len(&self) -> usize {
        self.inner.runnable.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.runnable.borrow().is_empty()
    }

    /// Whether the tick timer is armed.
    pub fn is_ticking(&self) -> bool {
        self.inner.ticker.get().is_some()
    }

    /// Runs the event loop until no work is left.
    pub fn run(&self) -> Result<(), Error> {
        self.inner.event_loop.run()
    }

    /// Runs `task` and returns a promise of its outcome.
    ///
    /// A task producing a generator becomes a coroutine. A promise is
    /// returned as is, a plain value or fault settles the returned promise
    /// right away. Anything else is awaited by a one-step coroutine.
    pub fn submit<F, Y>(&self, task: F) -> Promise
    where
        F: FnOnce() -> Result<Y, Fault>,
        Y: Into<Yielded>,
    {
        self.submit_with(self.inner.default_kind.clone(), task)
    }

    /// Like [`Scheduler::submit`], creating the coroutine and all of its
    /// children with `kind`.
    pub fn submit_with<F, Y>(&self, kind: Rc<dyn CoroutineKind>, task: F) -> Promise
    where
        F: FnOnce() -> Result<Y, Fault>,
        Y: Into<Yielded>,
    {
        let yielded = match task() {
            Ok(yielded) => yielded.into(),
            Err(fault) => {
                debug!("task failed before it was scheduled: {}", fault);
                return Promise::rejected(fault);
            }
        };

        match yielded {
            Yielded::Task(generator) => self.spawn(generator, kind).result(),
            Yielded::Future(promise) => promise,
            Yielded::Value(value) => settled(value.into_result()),
            Yielded::Fault(fault) => Promise::rejected(fault),
            other => self.spawn(Generator::once(other), kind).result(),
        }
    }

    /// Runs `task` without handing out its promise.
    pub fn submit_fire_and_forget<F, Y>(&self, task: F)
    where
        F: FnOnce() -> Result<Y, Fault>,
        Y: Into<Yielded>,
    {
        let _ = self.submit(task);
    }

    /// Runs `task` once `delay` elapsed.
    ///
    /// The returned promise follows the task's outcome. Cancelling it before
    /// the delay elapsed means `task` never runs.
    pub fn submit_delayed<F, Y>(&self, delay: Duration, task: F) -> Promise
    where
        F: FnOnce() -> Result<Y, Fault> + 'static,
        Y: Into<Yielded> + 'static,
    {
        let scheduler = Rc::downgrade(&self.inner);
        let kind = self.inner.default_kind.clone();
        let mut task = Some(task);

        let generator = Generator::from_fn(move |input| match input {
            Resume::Start => Ok(Step::yielding(crate::opcode::pause(delay))),
            resumed => {
                resumed.into_value()?;
                let task = task
                    .take()
                    .ok_or_else(|| Fault::raised("delayed task resumed twice"))?;
                let inner = scheduler
                    .upgrade()
                    .ok_or_else(|| Fault::cancel("scheduler dropped", SHUTDOWN_CODE))?;
                let promise = Scheduler { inner }.submit_with(kind.clone(), task);
                Ok(Step::returning(promise))
            }
        });

        self.spawn(generator, self.inner.default_kind.clone()).result()
    }

    /// Runs `task` and drives the event loop until it settles.
    ///
    /// With a `timeout`, a task still pending when it elapses is cancelled
    /// and a timeout fault is returned.
    pub fn submit_blocking<F, Y>(&self, task: F, timeout: Option<Duration>) -> Result<Value, Error>
    where
        F: FnOnce() -> Result<Y, Fault>,
        Y: Into<Yielded>,
    {
        let event_loop = &self.inner.event_loop;
        if event_loop.is_running() {
            return Err(Error::LoopRunning);
        }

        let promise = self.submit(task);
        let deadline = timeout.map(|timeout| event_loop.now() + timeout);

        match event_loop.block_on(promise.clone(), deadline)? {
            Some(outcome) => Ok(outcome?),
            None => {
                let timeout = timeout.unwrap_or_default();
                warn!("blocking task did not settle within {}, cancelling", timeout);
                promise.cancel();
                self.purge();
                Err(Fault::timeout(format!("task did not settle within {}", timeout)).into())
            }
        }
    }

    /// Cancels every runnable coroutine and clears the tick timer.
    pub fn shutdown(&self) {
        let entries: Vec<Entry> = {
            let mut runnable = self.inner.runnable.borrow_mut();
            core::mem::take(&mut *runnable).into_values().collect()
        };
        debug!("shutting down, cancelling {} coroutines", entries.len());

        for entry in entries {
            entry
                .coroutine
                .cancel(Fault::cancel("scheduler shut down", SHUTDOWN_CODE));
        }
        self.disarm();
    }

    /// Visits every coroutine runnable when the tick starts.
    ///
    /// Coroutines spawned during the tick are first visited by the next one.
    pub fn tick(&self) {
        let entries: Vec<Entry> = self.inner.runnable.borrow().values().cloned().collect();
        if entries.is_empty() {
            self.disarm();
            return;
        }

        let now = self.inner.event_loop.now();
        for entry in entries {
            if entry.coroutine.is_settled() {
                self.detach(entry.id);
                continue;
            }

            // An expired deadline wins over anything the coroutine awaits.
            if entry.coroutine.is_expired(now) {
                let duration = entry.coroutine.deadline_duration().unwrap_or_default();
                warn!("coroutine {} exceeded its deadline of {}", entry.id, duration);
                self.cancel_coroutine(
                    &entry,
                    Fault::timeout(format!("coroutine is timeout: {}", duration)),
                );
                continue;
            }

            if entry.coroutine.state() == State::Progress {
                continue;
            }

            match entry.coroutine.next_yield() {
                Ok(yielded) => self.dispatch(&entry, yielded),
                Err(fault) => self.cancel_coroutine(&entry, fault),
            }
        }
    }

    fn spawn(&self, generator: Generator, kind: Rc<dyn CoroutineKind>) -> Rc<dyn Coroutine> {
        let id = CoroutineId::new(self.inner.next_id.get());
        self.inner.next_id.set(id.get() + 1);

        let coroutine = kind.create(id, generator);
        debug_assert_eq!(coroutine.id(), id, "coroutine kind ignored the allocated id");
        debug!("spawned coroutine {}", id);

        self.inner.runnable.borrow_mut().insert(
            id,
            Entry {
                id,
                coroutine: coroutine.clone(),
                kind,
            },
        );
        self.arm();
        coroutine
    }

    fn dispatch(&self, entry: &Entry, yielded: Yielded) {
        trace!("coroutine {} yielded a {}", entry.id, yielded.kind_name());

        match yielded {
            Yielded::Future(promise) => entry.coroutine.suspend_on(promise),
            Yielded::Task(generator) => {
                let child = self.spawn(generator, entry.kind.clone());
                entry.coroutine.suspend_on(child.result());
            }
            Yielded::Collection(members) => {
                let members = members.map(|_, member| self.normalize(member, &entry.kind));
                entry.coroutine.suspend_on(join(members));
            }
            Yielded::Op(op) => match self.execute(entry, op) {
                Ok(Some(next)) => self.dispatch(entry, next),
                Ok(None) => entry.coroutine.resume(Value::Unit),
                Err(fault) => entry.coroutine.suspend_on(Promise::rejected(fault)),
            },
            Yielded::Value(value) => entry.coroutine.resume(value),
            Yielded::Fault(fault) => entry.coroutine.resume(Value::Fault(fault)),
        }
    }

    fn execute(&self, entry: &Entry, op: Opcode) -> Result<Option<Yielded>, Fault> {
        let coroutine = &*entry.coroutine;

        match op {
            Opcode::Pause(duration) => {
                check_duration(duration)?;
                Ok(Some(Yielded::Future(self.inner.event_loop.delay(duration))))
            }
            Opcode::Deadline(duration) => {
                check_duration(duration)?;
                coroutine.set_deadline(self.inner.event_loop.now(), duration);
                Ok(None)
            }
            Opcode::Cancel { message, code } => {
                self.cancel_coroutine(entry, Fault::cancel(message, code));
                Ok(None)
            }
            Opcode::Return(value) => {
                coroutine.force_settle(value);
                Ok(None)
            }
            Opcode::Call(call) => {
                trace!("coroutine {} calls {}", entry.id, call.name());
                call.invoke(coroutine)
            }
        }
    }

    /// Turns a collection member into something awaitable.
    fn normalize(&self, member: Yielded, kind: &Rc<dyn CoroutineKind>) -> Promise {
        match member {
            Yielded::Future(promise) => promise,
            Yielded::Task(generator) => self.spawn(generator, kind.clone()).result(),
            Yielded::Value(value) => settled(value.into_result()),
            Yielded::Fault(fault) => Promise::rejected(fault),
            nested @ (Yielded::Collection(_) | Yielded::Op(_)) => {
                self.spawn(Generator::once(nested), kind.clone()).result()
            }
        }
    }

    fn cancel_coroutine(&self, entry: &Entry, fault: Fault) {
        entry.coroutine.cancel(fault);
        self.detach(entry.id);
    }

    fn detach(&self, id: CoroutineId) {
        // Dropping the entry may drop the coroutine, do it outside the borrow.
        let removed = self.inner.runnable.borrow_mut().remove(&id);
        if removed.is_some() {
            trace!("coroutine {} detached", id);
        }
    }

    /// Detaches settled coroutines without waiting for the next tick.
    fn purge(&self) {
        let settled: Vec<CoroutineId> = self
            .inner
            .runnable
            .borrow()
            .values()
            .filter(|entry| entry.coroutine.is_settled())
            .map(|entry| entry.id)
            .collect();

        for id in settled {
            self.detach(id);
        }
        if self.is_empty() {
            self.disarm();
        }
    }

    fn arm(&self) {
        if self.inner.ticker.get().is_some() {
            return;
        }

        let weak: Weak<Inner> = Rc::downgrade(&self.inner);
        let ticker = self.inner.event_loop.add_periodic_timer(Duration::ZERO, move || {
            if let Some(inner) = weak.upgrade() {
                Scheduler { inner }.tick();
            }
        });
        debug!("tick timer armed");
        self.inner.ticker.set(Some(ticker));
    }

    fn disarm(&self) {
        if let Some(ticker) = self.inner.ticker.take() {
            debug!("no runnable coroutines, tick timer cleared");
            self.inner.event_loop.cancel_timer(ticker);
        }
    }
}

impl core::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Scheduler")
            .field("runnable", &self.len())
            .field("ticking", &self.is_ticking())
            .finish_non_exhaustive()
    }
}

fn settled(outcome: Outcome) -> Promise {
    match outcome {
        Ok(value) => Promise::resolved(value),
        Err(fault) => Promise::rejected(fault),
    }
}

fn check_duration(duration: Duration) -> Result<(), Fault> {
    if duration.is_negative() {
        return Err(Fault::raised(format!("negative duration: {}", duration)));
    }
    Ok(())
}
