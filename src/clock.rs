// =============================================================================
// Clock — monotonic + wall-clock time seam
// =============================================================================
//
// The rest of the engine calls `Instant::now()`/`Utc::now()` directly, same
// as the teacher. This trait exists only where the spec's testable
// properties (day rollover, heartbeat timeout) need deterministic time
// injected in tests instead of real wall-clock.

use chrono::{DateTime, Utc};
use std::time::Instant;

pub trait Clock: Send + Sync {
    fn now_monotonic(&self) -> Instant;
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Production clock — delegates straight to the standard library / chrono.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_monotonic(&self) -> Instant {
        Instant::now()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use parking_lot::RwLock;
    use std::time::Duration;

    /// Deterministic clock for tests — `advance()` moves both the monotonic
    /// and UTC readings forward together.
    pub struct FakeClock {
        monotonic_base: Instant,
        elapsed: RwLock<Duration>,
        utc_base: DateTime<Utc>,
    }

    impl FakeClock {
        pub fn new(utc_base: DateTime<Utc>) -> Self {
            Self {
                monotonic_base: Instant::now(),
                elapsed: RwLock::new(Duration::ZERO),
                utc_base,
            }
        }

        pub fn advance(&self, by: Duration) {
            let mut elapsed = self.elapsed.write();
            *elapsed += by;
        }
    }

    impl Clock for FakeClock {
        fn now_monotonic(&self) -> Instant {
            self.monotonic_base + *self.elapsed.read()
        }

        fn now_utc(&self) -> DateTime<Utc> {
            self.utc_base + chrono::Duration::from_std(*self.elapsed.read()).unwrap_or_default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::FakeClock;
    use super::*;
    use std::time::Duration;

    #[test]
    fn fake_clock_advances_monotonic_and_utc_together() {
        let base = Utc::now();
        let clock = FakeClock::new(base);
        let m0 = clock.now_monotonic();
        let u0 = clock.now_utc();

        clock.advance(Duration::from_secs(60));

        assert!(clock.now_monotonic() > m0);
        assert!(clock.now_utc() > u0);
    }

    #[test]
    fn system_clock_is_monotonic_non_decreasing() {
        let clock = SystemClock;
        let a = clock.now_monotonic();
        let b = clock.now_monotonic();
        assert!(b >= a);
    }
}
