//! Time source and the reschedulable diff timer.
//!
//! The engine owns no thread. A timer is just a deadline plus the baseline
//! captured when its burst began; whoever drives the engine checks the
//! deadline against a `Clock`.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::confirm::{IdMapping, Rekey};
use super::snapshot::Snapshot;

pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A scheduled diff. Extending it moves the deadline but never the captured
/// burst baseline.
#[derive(Debug, Clone)]
pub struct DiffTimer {
    deadline: Instant,
    burst_baseline: Arc<Snapshot>,
}

impl DiffTimer {
    pub fn start(now: Instant, delay: Duration, burst_baseline: Arc<Snapshot>) -> Self {
        Self {
            deadline: now + delay,
            burst_baseline,
        }
    }

    pub fn extend(&mut self, now: Instant, delay: Duration) {
        self.deadline = now + delay;
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    pub fn burst_baseline(&self) -> &Snapshot {
        &self.burst_baseline
    }
}

impl Rekey for DiffTimer {
    fn rekey(&mut self, mapping: &IdMapping) {
        self.burst_baseline = Arc::new(self.burst_baseline.rekeyed(mapping));
    }
}
