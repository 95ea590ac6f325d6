//! Injectable clock abstraction.
//!
//! Time is read from a single injectable clock abstraction (real clock by
//! default) so tests can advance time deterministically. The tracker's
//! correctness properties are boundary-sensitive in a way that can't be
//! tested honestly against real wall-clock time without flaky sleeps.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

/// A source of the current time. `SystemClock` is the production default;
/// `TestClock` lets tests advance time in discrete steps.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Reads the real wall clock. Used by [`crate::RouterBuilder::default`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock tests can set and advance explicitly.
///
/// Cloning a `TestClock` shares the same underlying instant — advancing one
/// handle advances every clone, which is what lets a test hold a `TestClock`
/// and a `Router` built from it at the same time.
#[derive(Debug, Clone)]
pub struct TestClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl TestClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Advance the clock by `duration`, returning the new time.
    pub fn advance(&self, duration: chrono::Duration) -> DateTime<Utc> {
        let mut guard = self.now.lock().expect("test clock lock poisoned");
        *guard += duration;
        *guard
    }

    /// Jump directly to `at`.
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().expect("test clock lock poisoned") = at;
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("test clock lock poisoned")
    }
}
