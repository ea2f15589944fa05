//! Step-generators: resumable task bodies driven one step at a time.
//!
//! A task body implements [`Steps`] as an explicit state machine. Each call to
//! [`Steps::resume`] runs the body up to its next suspension point and reports
//! what it yielded, or what it returned once finished. [`Generator`] wraps a
//! body and tracks where it currently stands.

use alloc::boxed::Box;
use alloc::string::String;

use crate::error::Fault;
use crate::opcode::Opcode;
use crate::promise::Promise;
use crate::value::{Keyed, Value};

/// What a body is resumed with.
#[derive(Debug, Clone, PartialEq)]
pub enum Resume {
    /// First step, nothing was yielded yet.
    Start,
    /// Value the previous yield evaluated to.
    Send(Value),
    /// Fault raised at the previous yield.
    Throw(Fault),
}

impl Resume {
    /// Value of the previous yield, re-raising a thrown fault.
    pub fn into_value(self) -> Result<Value, Fault> {
        match self {
            Resume::Start => Ok(Value::Unit),
            Resume::Send(value) => Ok(value),
            Resume::Throw(fault) => Err(fault),
        }
    }
}

/// Outcome of one step.
#[derive(Debug)]
pub enum Step {
    Yield(Yielded),
    Return(Yielded),
}

impl Step {
    pub fn yielding(yielded: impl Into<Yielded>) -> Self {
        Step::Yield(yielded.into())
    }

    pub fn returning(yielded: impl Into<Yielded>) -> Self {
        Step::Return(yielded.into())
    }
}

/// Resumable task body.
pub trait Steps {
    /// Runs the body to its next suspension point.
    ///
    /// An `Err` is an unhandled fault: the body is finished and the fault
    /// settles its coroutine.
    fn resume(&mut self, input: Resume) -> Result<Step, Fault>;
}

/// Anything a task can yield (or return) to the scheduler.
#[derive(Debug)]
pub enum Yielded {
    /// Suspend until the promise settles.
    Future(Promise),
    /// Run as a child task and suspend until it settles.
    Task(Generator),
    /// Await every member, see [`crate::join`].
    Collection(Keyed<Yielded>),
    /// Control request interpreted by the scheduler.
    Op(Opcode),
    /// Resume immediately with this value.
    Value(Value),
    /// Resume immediately by raising this fault.
    Fault(Fault),
}

impl Yielded {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Yielded::Future(_) => "future",
            Yielded::Task(_) => "task",
            Yielded::Collection(_) => "collection",
            Yielded::Op(_) => "opcode",
            Yielded::Value(_) => "value",
            Yielded::Fault(_) => "fault",
        }
    }
}

impl Default for Yielded {
    fn default() -> Self {
        Yielded::Value(Value::Unit)
    }
}

impl From<Value> for Yielded {
    fn from(value: Value) -> Self {
        match value {
            Value::Fault(fault) => Yielded::Fault(fault),
            value => Yielded::Value(value),
        }
    }
}

impl From<Fault> for Yielded {
    fn from(value: Fault) -> Self {
        Yielded::Fault(value)
    }
}

impl From<Promise> for Yielded {
    fn from(value: Promise) -> Self {
        Yielded::Future(value)
    }
}

impl From<Generator> for Yielded {
    fn from(value: Generator) -> Self {
        Yielded::Task(value)
    }
}

impl From<Opcode> for Yielded {
    fn from(value: Opcode) -> Self {
        Yielded::Op(value)
    }
}

impl From<Keyed<Yielded>> for Yielded {
    fn from(value: Keyed<Yielded>) -> Self {
        Yielded::Collection(value)
    }
}

macro_rules! yielded_from_value {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Yielded {
                fn from(value: $ty) -> Self {
                    Yielded::Value(value.into())
                }
            }
        )*
    };
}

yielded_from_value!((), bool, i32, i64, f64, &str, String);

// Boxed: a yielded task holds a generator itself.
enum Phase {
    Fresh,
    Suspended(Option<Box<Yielded>>),
    Returned(Option<Box<Yielded>>),
    Failed,
}

/// A task body together with its position.
///
/// The body starts lazily, on the first query.
pub struct Generator {
    steps: Box<dyn Steps>,
    phase: Phase,
}

impl Generator {
    pub fn new(steps: impl Steps + 'static) -> Self {
        Self {
            steps: Box::new(steps),
            phase: Phase::Fresh,
        }
    }

    /// Body from a closure called once per step.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnMut(Resume) -> Result<Step, Fault> + 'static,
    {
        Self::new(FromFn(f))
    }

    /// Yields `yielded` once, then returns what the yield evaluated to.
    pub fn once(yielded: impl Into<Yielded>) -> Self {
        Self::new(Once(Some(yielded.into())))
    }

    /// Whether the body is suspended at a yield.
    pub fn valid(&mut self) -> Result<bool, Fault> {
        self.start()?;
        Ok(matches!(self.phase, Phase::Suspended(_)))
    }

    /// Takes the value yielded at the current suspension point.
    pub fn current(&mut self) -> Result<Option<Yielded>, Fault> {
        self.start()?;
        match &mut self.phase {
            Phase::Suspended(yielded) => Ok(yielded.take().map(|yielded| *yielded)),
            _ => Ok(None),
        }
    }

    /// Takes the value the body returned, once finished.
    pub fn take_return(&mut self) -> Option<Yielded> {
        match &mut self.phase {
            Phase::Returned(returned) => returned.take().map(|returned| *returned),
            _ => None,
        }
    }

    /// Resumes the body from its current yield. Fault values are raised at
    /// the yield instead of being sent.
    pub fn send(&mut self, value: Value) -> Result<(), Fault> {
        if !self.valid()? {
            return Ok(());
        }

        let input = match value {
            Value::Fault(fault) => Resume::Throw(fault),
            value => Resume::Send(value),
        };
        self.advance(input)
    }

    fn start(&mut self) -> Result<(), Fault> {
        match self.phase {
            Phase::Fresh => self.advance(Resume::Start),
            _ => Ok(()),
        }
    }

    fn advance(&mut self, input: Resume) -> Result<(), Fault> {
        match self.steps.resume(input) {
            Ok(Step::Yield(yielded)) => {
                self.phase = Phase::Suspended(Some(Box::new(yielded)));
                Ok(())
            }
            Ok(Step::Return(returned)) => {
                self.phase = Phase::Returned(Some(Box::new(returned)));
                Ok(())
            }
            Err(fault) => {
                self.phase = Phase::Failed;
                Err(fault)
            }
        }
    }
}

impl core::fmt::Debug for Generator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let phase = match self.phase {
            Phase::Fresh => "fresh",
            Phase::Suspended(_) => "suspended",
            Phase::Returned(_) => "returned",
            Phase::Failed => "failed",
        };
        f.debug_struct("Generator").field("phase", &phase).finish()
    }
}

struct FromFn<F>(F);

impl<F> Steps for FromFn<F>
where
    F: FnMut(Resume) -> Result<Step, Fault>,
{
    fn resume(&mut self, input: Resume) -> Result<Step, Fault> {
        (self.0)(input)
    }
}

struct Once(Option<Yielded>);

impl Steps for Once {
    fn resume(&mut self, input: Resume) -> Result<Step, Fault> {
        match self.0.take() {
            Some(yielded) => Ok(Step::Yield(yielded)),
            None => Ok(Step::Return(input.into_value()?.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;
    use alloc::vec::Vec;

    use super::*;

    fn counter(limit: i64) -> Generator {
        let mut next = 0;
        let mut total = 0;
        Generator::from_fn(move |input| {
            if let Value::Int(received) = input.into_value()? {
                total += received;
            }
            if next == limit {
                return Ok(Step::returning(total));
            }
            next += 1;
            Ok(Step::yielding(next))
        })
    }

    fn value_of(yielded: Option<Yielded>) -> Option<Value> {
        match yielded {
            Some(Yielded::Value(value)) => Some(value),
            _ => None,
        }
    }

    #[test]
    fn drives_to_return() {
        let mut generator = counter(3);
        let mut seen = Vec::new();

        while generator.valid().unwrap() {
            let value = value_of(generator.current().unwrap()).unwrap();
            seen.push(value.clone());
            generator.send(value).unwrap();
        }

        assert_eq!(seen, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(value_of(generator.take_return()), Some(Value::Int(6)));
        assert_eq!(value_of(generator.take_return()), None);
    }

    #[test]
    fn starts_lazily() {
        let mut started = false;
        let mut generator = Generator::from_fn(move |_| {
            assert!(!started, "body started twice");
            started = true;
            Ok(Step::yielding("first"))
        });

        assert!(generator.valid().unwrap());
        assert!(generator.valid().unwrap());
        assert_eq!(value_of(generator.current().unwrap()), Some(Value::from("first")));
        assert!(generator.current().unwrap().is_none());
    }

    #[test]
    fn unhandled_fault_finishes_body() {
        let mut generator = counter(5);
        assert!(generator.valid().unwrap());

        let fault = Fault::raised("boom");
        assert_eq!(generator.send(Value::Fault(fault.clone())), Err(fault));
        assert!(!generator.valid().unwrap());
        assert!(generator.take_return().is_none());
    }

    #[test]
    fn handled_fault_resumes_body() {
        let mut generator = Generator::from_fn(|input| match input {
            Resume::Start => Ok(Step::yielding(Fault::raised("boom"))),
            Resume::Throw(fault) => Ok(Step::returning(Value::from(fault.message()))),
            Resume::Send(_) => Err(Fault::raised("expected a fault")),
        });

        assert!(matches!(generator.current(), Ok(Some(Yielded::Fault(_)))));
        generator.send(Value::Fault(Fault::raised("boom"))).unwrap();
        assert_eq!(value_of(generator.take_return()), Some(Value::from("boom")));
    }

    #[test]
    fn fault_on_start() {
        let mut generator = Generator::from_fn(|_| Err(Fault::raised("early")));
        assert_eq!(generator.valid(), Err(Fault::raised("early")));
        assert_eq!(generator.valid(), Ok(false));
    }

    #[test]
    fn once_returns_what_it_receives() {
        let mut generator = Generator::once(Promise::new());

        assert!(matches!(generator.current(), Ok(Some(Yielded::Future(_)))));
        generator.send(Value::from("result")).unwrap();

        assert!(!generator.valid().unwrap());
        assert_eq!(value_of(generator.take_return()), Some(Value::from("result")));
    }

    #[test]
    fn yields_and_returns_nested_generators() {
        let mut generator = Generator::from_fn(|input| match input {
            Resume::Start => Ok(Step::yielding(Generator::once("child"))),
            _ => Ok(Step::returning(counter(2))),
        });

        let Ok(Some(Yielded::Task(mut child))) = generator.current() else {
            panic!("expected a nested generator");
        };
        assert_eq!(value_of(child.current().unwrap()), Some(Value::from("child")));

        generator.send(Value::Unit).unwrap();
        let Some(Yielded::Task(mut returned)) = generator.take_return() else {
            panic!("expected a returned generator");
        };
        assert_eq!(value_of(returned.current().unwrap()), Some(Value::Int(1)));
    }

    #[test]
    fn fault_values_convert_to_fault_yields() {
        let yielded = Yielded::from(Value::Fault(Fault::raised("x")));
        assert_eq!(yielded.kind_name(), "fault");
        assert_eq!(Yielded::from("text").kind_name(), "value");
        assert_eq!(Yielded::from(Keyed::<Yielded>::new()).kind_name(), "collection");
    }
}
