use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::vec::Vec;

use portable_atomic::AtomicBool;

use crate::environment::Environment;
use crate::event_loop::EventLoop;
use crate::promise::{Outcome, Promise};
use crate::scheduler::Scheduler;
use crate::steps::{Generator, Resume, Step, Yielded};
use crate::time::{Duration, Instant};
use crate::value::Value;

/// Virtual clock. Every reading advances time by `step`, idle waits jump
/// straight to their deadline.
#[derive(Debug)]
pub struct TestEnvironment {
    tick: Cell<Instant>,
    step: Duration,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self::with_step(Duration::from_micros(100))
    }

    pub fn with_step(step: Duration) -> Self {
        Self {
            tick: Cell::new(Instant::new(0)),
            step,
        }
    }

    /// Reads the clock without advancing it.
    pub fn now(&self) -> Instant {
        self.tick.get()
    }
}

impl Environment for TestEnvironment {
    fn ticks(&self) -> Instant {
        let now = self.tick.get();
        self.tick.set(now + self.step);
        now
    }

    fn wait_for_event_with_deadline(&self, event: &AtomicBool, deadline: Option<Instant>) {
        if event.load(core::sync::atomic::Ordering::Acquire) {
            return;
        }
        if let Some(deadline) = deadline {
            if deadline > self.tick.get() {
                self.tick.set(deadline);
            }
        }
    }
}

pub fn test_loop() -> (Rc<TestEnvironment>, EventLoop) {
    let env = Rc::new(TestEnvironment::new());
    let event_loop = EventLoop::new(env.clone());
    (env, event_loop)
}

pub fn test_scheduler() -> (Rc<TestEnvironment>, Scheduler) {
    let (env, event_loop) = test_loop();
    (env, Scheduler::new(event_loop))
}

/// Resumptions a [`script`] task received, in order.
pub type Received = Rc<RefCell<Vec<Outcome>>>;

/// Task yielding `items` in order and returning the last value it was
/// resumed with. A raised fault ends the task.
pub fn script(items: Vec<Yielded>) -> (Generator, Received) {
    build_script(items, false)
}

/// Like [`script`], but raised faults are caught and the task carries on.
pub fn catching_script(items: Vec<Yielded>) -> (Generator, Received) {
    build_script(items, true)
}

fn build_script(items: Vec<Yielded>, catch: bool) -> (Generator, Received) {
    let received = Received::default();
    let log = received.clone();
    let mut items = VecDeque::from(items);
    let mut last = Value::Unit;

    let generator = Generator::from_fn(move |input| {
        if input != Resume::Start {
            let outcome = input.into_value();
            log.borrow_mut().push(outcome.clone());
            match outcome {
                Ok(value) => last = value,
                Err(fault) if !catch => return Err(fault),
                Err(_) => last = Value::Unit,
            }
        }

        match items.pop_front() {
            Some(item) => Ok(Step::Yield(item)),
            None => Ok(Step::Return(last.clone().into())),
        }
    });

    (generator, received)
}

/// Records the virtual time at which `promise` settles.
pub fn settle_time(env: &Rc<TestEnvironment>, promise: &Promise) -> Rc<Cell<Option<Instant>>> {
    let at = Rc::new(Cell::new(None));
    let slot = at.clone();
    let env = env.clone();
    promise.on_settle(move |_| slot.set(Some(env.now())));
    at
}
