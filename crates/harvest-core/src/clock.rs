use chrono::{DateTime, Duration, Utc};
use std::{fmt, sync::Mutex};

/// Source of wall-clock instants for checkpoint and staging timestamps.
///
/// Production code uses [`SystemClock`]. Tests inject a [`ManualClock`] to
/// place staged batches and commits at exact instants.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to, or by a fixed step per reading.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    step: Duration,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self::ticking(start, Duration::zero())
    }

    /// Every call to [`Clock::now`] returns the current instant and then
    /// moves the clock forward by `step`.
    pub fn ticking(start: DateTime<Utc>, step: Duration) -> Self {
        Self {
            now: Mutex::new(start),
            step,
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        let current = *now;
        *now += self.step;
        current
    }
}
