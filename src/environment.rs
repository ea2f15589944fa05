use portable_atomic::AtomicBool;

use crate::time::Instant;

/// Host services the event loop depends on: a clock and a way to idle.
pub trait Environment {
    /// Current time.
    fn ticks(&self) -> Instant;

    /// Blocks until `event` is raised or `deadline` passes.
    /// `None` waits for the event only.
    /// Spurious returns are allowed, the loop re-checks its state.
    fn wait_for_event_with_deadline(&self, event: &AtomicBool, deadline: Option<Instant>);
}

#[cfg(feature = "std")]
pub use system::SystemEnvironment;

#[cfg(feature = "std")]
mod system {
    use core::sync::atomic::Ordering;

    use portable_atomic::AtomicBool;

    use super::Environment;
    use crate::time::{Duration, Instant};

    // Longest uninterrupted sleep, bounds the latency of remote wakeups.
    const MAX_IDLE_SLICE: Duration = Duration::from_millis(1);

    /// Monotonic wall clock backed by `std::time`.
    #[derive(Debug)]
    pub struct SystemEnvironment {
        origin: std::time::Instant,
    }

    impl SystemEnvironment {
        pub fn new() -> Self {
            Self {
                origin: std::time::Instant::now(),
            }
        }
    }

    impl Default for SystemEnvironment {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Environment for SystemEnvironment {
        fn ticks(&self) -> Instant {
            let micros = self.origin.elapsed().as_micros();
            Instant::new(i64::try_from(micros).unwrap_or(i64::MAX))
        }

        fn wait_for_event_with_deadline(&self, event: &AtomicBool, deadline: Option<Instant>) {
            loop {
                if event.load(Ordering::Acquire) {
                    return;
                }

                let slice = match deadline {
                    Some(deadline) => {
                        let remaining = deadline - self.ticks();
                        if remaining <= Duration::ZERO {
                            return;
                        }
                        remaining.min(MAX_IDLE_SLICE)
                    }
                    None => MAX_IDLE_SLICE,
                };

                std::thread::sleep(slice.into());
            }
        }
    }

}
