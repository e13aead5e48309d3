use std::thread;
use std::time::{Duration, Instant};

/// Time source for tick pacing and echo timing.
///
/// Pipeline code never calls `Instant::now()` directly, so a run can be
/// replayed against [`test_clock::TestClock`] without real sleeps.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);

    /// Whole milliseconds since `epoch`; 0 if `epoch` is in the future.
    fn ms_since(&self, epoch: Instant) -> u64 {
        let dur = self.now().saturating_duration_since(epoch);
        u64::try_from(dur.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Wall-time clock over `std::time::Instant`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl MonotonicClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    /// A zero duration yields a spin hint instead of a syscall.
    #[inline]
    fn sleep(&self, d: Duration) {
        if d.is_zero() {
            std::hint::spin_loop();
        } else {
            thread::sleep(d);
        }
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn sleep(&self, d: Duration) {
        (**self).sleep(d);
    }
}

pub mod test_clock {
    use super::{Clock, Duration, Instant};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Clock that only moves when slept on or advanced.
    ///
    /// Clones share one timeline, so a simulated echo line holding a clone
    /// sees the same instant as the sensor polling it.
    #[derive(Debug, Clone)]
    pub struct TestClock {
        origin: Instant,
        nanos: Arc<AtomicU64>,
    }

    impl Default for TestClock {
        fn default() -> Self {
            Self::new()
        }
    }

    fn to_nanos(d: Duration) -> u64 {
        u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
    }

    impl TestClock {
        pub fn new() -> Self {
            Self {
                origin: Instant::now(),
                nanos: Arc::new(AtomicU64::new(0)),
            }
        }

        pub fn advance(&self, d: Duration) {
            let step = to_nanos(d);
            let _ = self
                .nanos
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    Some(n.saturating_add(step))
                });
        }

        /// Jump to an absolute position on the timeline.
        pub fn set_offset(&self, d: Duration) {
            self.nanos.store(to_nanos(d), Ordering::SeqCst);
        }

        pub fn elapsed(&self) -> Duration {
            Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> Instant {
            self.origin + self.elapsed()
        }

        fn sleep(&self, d: Duration) {
            self.advance(d);
        }
    }
}
