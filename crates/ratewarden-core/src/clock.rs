use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};

/// Injected time source (spec §9: "Global Date.now coupling in the source:
/// inject a clock abstraction so tests can advance time deterministically").
/// Every cooldown/backoff/TTL computation in `ratewarden-engine` reads the
/// current time through this trait instead of calling `Utc::now()` directly.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock — delegates to the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Deterministic clock for tests. Starts at a fixed instant and only moves
/// when [`TestClock::advance`] is called.
#[derive(Clone)]
pub struct TestClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl TestClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, duration: chrono::Duration) {
        let mut guard = self.current.lock().unwrap();
        *guard += duration;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.current.lock().unwrap() = at;
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock().unwrap()
    }
}
