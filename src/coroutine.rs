//! Per-task state machine.
//!
//! ```text
//! Working --suspend_on--> Progress --promise settled--> Working
//!    \                       |
//!     `-----> Settled <------'   (return, fault, cancel, force_settle)
//! ```

use alloc::rc::{Rc, Weak};
use core::cell::{Cell, RefCell};

use log::{debug, trace};

use crate::error::{DEFAULT_CANCEL_CODE, Fault};
use crate::promise::{Outcome, Promise};
use crate::steps::{Generator, Yielded};
use crate::time::{Duration, Instant};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Never entered, kept for completeness of the lifecycle.
    Idle,
    Working,
    Progress,
    Settled,
}

/// Identifier allocated by the scheduler, increasing in spawn order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CoroutineId(u64);

impl CoroutineId {
    pub(crate) const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for CoroutineId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Fault used when a coroutine's result promise is cancelled by its holder.
pub fn cancelled_by_promise() -> Fault {
    Fault::cancel(
        "coroutine cancelled by promise cancellation",
        DEFAULT_CANCEL_CODE,
    )
}

/// Contract between the scheduler and a running task.
///
/// All operations take `&self`: coroutines are shared with the promise
/// callbacks that resume them.
pub trait Coroutine {
    fn id(&self) -> CoroutineId;

    fn state(&self) -> State;

    /// Promise settled with the task's outcome.
    fn result(&self) -> Promise;

    /// Value yielded at the current step, or the final return value once
    /// the body finished.
    fn next_yield(&self) -> Result<Yielded, Fault>;

    /// Pushes `value` into the body, raising it when it is a fault.
    /// Settles the coroutine once the body is finished.
    fn resume(&self, value: Value);

    /// Waits for `promise` and resumes with its outcome.
    /// Ignored unless the coroutine is [`State::Working`].
    fn suspend_on(&self, promise: Promise);

    fn cancel(&self, fault: Fault);

    /// Settles with `value` without touching the body.
    fn force_settle(&self, value: Value);

    fn set_deadline(&self, now: Instant, duration: Duration);

    fn is_expired(&self, now: Instant) -> bool;

    fn deadline_duration(&self) -> Option<Duration>;

    fn is_settled(&self) -> bool {
        self.state() == State::Settled
    }
}

/// Builds the coroutines of one submission, children included.
pub trait CoroutineKind {
    /// The returned coroutine must report `id` from [`Coroutine::id`].
    fn create(&self, id: CoroutineId, generator: Generator) -> Rc<dyn Coroutine>;
}

/// Builds plain [`Task`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct Standard;

impl CoroutineKind for Standard {
    fn create(&self, id: CoroutineId, generator: Generator) -> Rc<dyn Coroutine> {
        Task::new(id, generator)
    }
}

/// Default coroutine.
pub struct Task {
    id: CoroutineId,
    me: Weak<Task>,
    generator: RefCell<Generator>,
    state: Cell<State>,
    result: Promise,
    suspended_on: RefCell<Option<Promise>>,
    deadline: Cell<Option<(Instant, Duration)>>,
}

impl Task {
    pub fn new(id: CoroutineId, generator: Generator) -> Rc<Task> {
        let task = Rc::new_cyclic(|me: &Weak<Task>| {
            let holder = me.clone();
            let result = Promise::with_canceller(move |_| {
                if let Some(task) = holder.upgrade() {
                    task.cancel(cancelled_by_promise());
                }
            });

            Task {
                id,
                me: me.clone(),
                generator: RefCell::new(generator),
                state: Cell::new(State::Working),
                result,
                suspended_on: RefCell::new(None),
                deadline: Cell::new(None),
            }
        });

        // No subscription may outlive the task's outcome.
        let weak = Rc::downgrade(&task);
        task.result.on_settle(move |_| {
            if let Some(task) = weak.upgrade() {
                task.release_suspension();
            }
        });

        task
    }

    fn release_suspension(&self) {
        let pending = self.suspended_on.borrow_mut().take();
        if let Some(promise) = pending {
            trace!("coroutine {} cancels the promise it awaited", self.id);
            promise.cancel();
        }
    }

    fn wake(&self, outcome: Outcome) {
        self.suspended_on.borrow_mut().take();
        if self.state.get() == State::Progress {
            self.state.set(State::Working);
        }
        self.resume(Value::from(outcome));
    }

    fn settle(&self, value: Value) {
        debug_assert!(
            self.state.get() != State::Settled,
            "coroutine {} settled twice",
            self.id
        );
        self.state.set(State::Settled);

        match value {
            Value::Fault(fault) => {
                debug!("coroutine {} rejected: {}", self.id, fault);
                self.result.reject(fault);
            }
            value => {
                debug!("coroutine {} fulfilled", self.id);
                self.result.resolve(value);
            }
        }
    }
}

impl Coroutine for Task {
    fn id(&self) -> CoroutineId {
        self.id
    }

    fn state(&self) -> State {
        self.state.get()
    }

    fn result(&self) -> Promise {
        self.result.clone()
    }

    fn next_yield(&self) -> Result<Yielded, Fault> {
        let mut generator = self
            .generator
            .try_borrow_mut()
            .map_err(|_| Fault::raised("coroutine stepped while already running"))?;

        if generator.valid()? {
            Ok(generator.current()?.unwrap_or_default())
        } else {
            Ok(generator.take_return().unwrap_or_default())
        }
    }

    fn resume(&self, value: Value) {
        if self.is_settled() {
            trace!("coroutine {} already settled, dropping resumption", self.id);
            return;
        }

        let pushed = match self.generator.try_borrow_mut() {
            Err(_) => Err(Fault::raised("coroutine resumed while already running")),
            Ok(mut generator) => match generator.valid() {
                Ok(true) => generator.send(value).map(|()| None),
                Ok(false) => Ok(Some(value)),
                Err(fault) => Err(fault),
            },
        };

        match pushed {
            Ok(None) => {}
            Ok(Some(value)) => self.settle(value),
            Err(fault) => {
                // The body may have settled itself before raising.
                if !self.is_settled() {
                    self.settle(Value::Fault(fault));
                }
            }
        }
    }

    fn suspend_on(&self, promise: Promise) {
        if self.state.get() != State::Working {
            return;
        }

        self.state.set(State::Progress);
        *self.suspended_on.borrow_mut() = Some(promise.clone());

        let me = self.me.clone();
        promise.on_settle(move |outcome| {
            if let Some(task) = me.upgrade() {
                task.wake(outcome);
            }
        });
    }

    fn cancel(&self, fault: Fault) {
        if self.is_settled() {
            return;
        }
        debug!("coroutine {} cancelled: {}", self.id, fault);
        self.settle(Value::Fault(fault));
    }

    fn force_settle(&self, value: Value) {
        if self.is_settled() {
            return;
        }
        self.settle(value);
    }

    fn set_deadline(&self, now: Instant, duration: Duration) {
        self.deadline.set(Some((now + duration, duration)));
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.deadline.get().is_some_and(|(at, _)| now > at)
    }

    fn deadline_duration(&self) -> Option<Duration> {
        self.deadline.get().map(|(_, duration)| duration)
    }
}

impl core::fmt::Debug for Task {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("state", &self.state.get())
            .field("deadline", &self.deadline.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use alloc::rc::Rc;
    use core::cell::Cell;

    use super::*;
    use crate::steps::{Resume, Step};

    fn task(generator: Generator) -> Rc<Task> {
        Task::new(CoroutineId::new(1), generator)
    }

    // Yields `first`, then returns whatever it receives.
    fn echo(first: impl Into<Yielded>) -> Generator {
        Generator::once(first)
    }

    #[test]
    fn yields_then_settles_with_return_value() {
        let task = task(echo("hello"));
        assert_eq!(task.state(), State::Working);

        assert!(matches!(task.next_yield(), Ok(Yielded::Value(Value::Str(s))) if s == "hello"));
        task.resume(Value::from("world"));
        assert_eq!(task.state(), State::Working);

        // Finished: the return value is the next "yield".
        let Ok(Yielded::Value(value)) = task.next_yield() else {
            panic!("expected the return value");
        };
        task.resume(value);

        assert_eq!(task.state(), State::Settled);
        assert_eq!(task.result().outcome(), Some(Ok(Value::from("world"))));
    }

    #[test]
    fn unhandled_fault_rejects() {
        let task = task(echo(()));
        task.next_yield().unwrap();

        task.resume(Value::Fault(Fault::raised("boom")));

        assert!(task.is_settled());
        assert_eq!(task.result().outcome(), Some(Err(Fault::raised("boom"))));
    }

    #[test]
    fn fault_while_stepping_is_returned() {
        let task = task(Generator::from_fn(|_| Err(Fault::raised("early"))));
        assert_eq!(task.next_yield().unwrap_err(), Fault::raised("early"));
        assert_eq!(task.state(), State::Working);
    }

    #[test]
    fn suspends_until_promise_settles() {
        let task = task(echo(()));
        task.next_yield().unwrap();

        let promise = Promise::new();
        task.suspend_on(promise.clone());
        assert_eq!(task.state(), State::Progress);

        // Only one outstanding suspension.
        let other = Promise::new();
        task.suspend_on(other.clone());
        other.resolve("ignored");
        assert_eq!(task.state(), State::Progress);

        promise.resolve("value");
        assert_eq!(task.state(), State::Working);

        let Ok(Yielded::Value(value)) = task.next_yield() else {
            panic!("expected the return value");
        };
        assert_eq!(value, Value::from("value"));
    }

    #[test]
    fn already_settled_promise_resumes_immediately() {
        let task = task(echo(()));
        task.next_yield().unwrap();

        task.suspend_on(Promise::rejected(Fault::raised("nope")));

        assert!(task.is_settled());
        assert_eq!(task.result().outcome(), Some(Err(Fault::raised("nope"))));
    }

    #[test]
    fn cancel_releases_awaited_promise() {
        let cancelled = Rc::new(Cell::new(false));
        let flag = cancelled.clone();
        let awaited = Promise::with_canceller(move |_| flag.set(true));

        let task = task(echo(()));
        task.next_yield().unwrap();
        task.suspend_on(awaited.clone());

        task.cancel(Fault::cancel("stop", 409));

        assert!(cancelled.get());
        assert!(task.is_settled());
        assert_eq!(task.result().outcome(), Some(Err(Fault::cancel("stop", 409))));
    }

    #[test]
    fn cancelling_result_cancels_task() {
        let task = task(echo(()));
        task.next_yield().unwrap();

        task.result().cancel();

        assert!(task.is_settled());
        assert_eq!(task.result().outcome(), Some(Err(cancelled_by_promise())));
    }

    #[test]
    fn settled_task_ignores_everything() {
        let task = task(echo(()));
        task.force_settle(Value::from("early"));

        task.resume(Value::from("late"));
        task.cancel(Fault::cancel("late", 500));
        task.force_settle(Value::from("later"));
        let promise = Promise::new();
        task.suspend_on(promise.clone());
        promise.resolve(());

        assert_eq!(task.state(), State::Settled);
        assert_eq!(task.result().outcome(), Some(Ok(Value::from("early"))));
    }

    #[test]
    fn resume_while_stepping_is_a_fault() {
        let holder: Rc<Cell<Option<Rc<Task>>>> = Rc::new(Cell::new(None));
        let inner = holder.clone();
        let generator = Generator::from_fn(move |input| match input {
            Resume::Start => Ok(Step::yielding(())),
            _ => {
                if let Some(task) = inner.take() {
                    task.resume(Value::Unit);
                }
                Ok(Step::returning(()))
            }
        });

        let task = task(generator);
        holder.set(Some(task.clone()));
        task.next_yield().unwrap();
        task.resume(Value::Unit);

        assert!(matches!(task.result().outcome(), Some(Err(Fault::Raised { .. }))));
    }

    #[test]
    fn deadline() {
        let task = task(echo(()));
        let now = Instant::new(1_000);
        assert!(!task.is_expired(now));
        assert_eq!(task.deadline_duration(), None);

        task.set_deadline(now, Duration::from_millis(5));

        assert_eq!(task.deadline_duration(), Some(Duration::from_millis(5)));
        assert!(!task.is_expired(now + Duration::from_millis(5)));
        assert!(task.is_expired(now + Duration::from_millis(6)));
    }
}
