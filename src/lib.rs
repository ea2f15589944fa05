#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

pub mod coroutine;
pub mod environment;
pub mod error;
pub mod event_loop;
pub mod join;
pub mod opcode;
pub mod promise;
pub mod scheduler;
pub mod steps;
pub mod time;
pub mod value;

pub mod sync {
    pub mod mailbox;
}

#[cfg(test)]
mod test_utils;

pub use coroutine::{Coroutine, CoroutineId, CoroutineKind, Standard, State, Task};
pub use environment::Environment;
#[cfg(feature = "std")]
pub use environment::SystemEnvironment;
pub use error::{Error, Fault};
pub use event_loop::{EventLoop, Remote, TimerId};
pub use opcode::Opcode;
pub use promise::{Outcome, Promise};
pub use scheduler::Scheduler;
pub use steps::{Generator, Resume, Step, Steps, Yielded};
pub use time::{Duration, Instant};
pub use value::{Key, Keyed, Value};
