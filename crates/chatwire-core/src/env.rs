//! Environment abstraction for deterministic testing.
//!
//! Decouples the messaging core from system resources (time, randomness).
//! Production drivers plug in real clocks and OS entropy; tests use
//! [`test_utils::MockEnv`] for fully deterministic runs.

use std::time::Duration;

/// Abstract environment providing time and randomness.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `random_bytes()` uses cryptographically secure entropy in production
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production environments use `std::time::Instant`; test environments
    /// use a controllable clock.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Current wall-clock time in unix milliseconds, for message timestamps
    /// and lock leases.
    fn unix_millis(&self) -> u64;

    /// Sleeps for the specified duration.
    ///
    /// The only async method in the trait; used by driver code only, never
    /// by protocol logic.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u128`, e.g. for message ids.
    fn random_u128(&self) -> u128 {
        let mut bytes = [0u8; 16];
        self.random_bytes(&mut bytes);
        u128::from_be_bytes(bytes)
    }
}

/// Deterministic environment for tests and simulation.
pub mod test_utils {
    #![allow(clippy::expect_used, reason = "mutex poisoning acceptable in test code")]

    use std::{
        sync::{Arc, Mutex},
        time::{Duration, Instant},
    };

    use super::Environment;

    struct MockEnvInner {
        now: Instant,
        unix_millis: u64,
        counter: u8,
    }

    /// Controllable clock and deterministic randomness.
    ///
    /// Clones share state, so a router under test and the test itself can
    /// advance the same clock.
    #[derive(Clone)]
    pub struct MockEnv {
        inner: Arc<Mutex<MockEnvInner>>,
    }

    impl MockEnv {
        /// Create a mock environment starting at an arbitrary epoch.
        pub fn new() -> Self {
            Self {
                inner: Arc::new(Mutex::new(MockEnvInner {
                    now: Instant::now(),
                    unix_millis: 1_700_000_000_000,
                    counter: 0,
                })),
            }
        }

        /// Advance both the monotonic and wall clocks.
        pub fn advance(&self, duration: Duration) {
            let mut inner = self.inner.lock().expect("mutex poisoned");
            inner.now += duration;
            inner.unix_millis += duration.as_millis() as u64;
        }
    }

    impl Default for MockEnv {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Environment for MockEnv {
        type Instant = Instant;

        fn now(&self) -> Instant {
            self.inner.lock().expect("mutex poisoned").now
        }

        fn unix_millis(&self) -> u64 {
            self.inner.lock().expect("mutex poisoned").unix_millis
        }

        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            async {}
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            let mut inner = self.inner.lock().expect("mutex poisoned");
            for byte in buffer.iter_mut() {
                // Deterministic, never all-zero for non-empty buffers.
                inner.counter = inner.counter.wrapping_add(1);
                if inner.counter == 0 {
                    inner.counter = 1;
                }
                *byte = inner.counter;
            }
        }
    }
}
