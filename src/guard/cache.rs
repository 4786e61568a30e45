//! Time-bounded, single-flight usage cache.
//!
//! Holds at most one measurement. A miss runs the scanner on the caller's
//! thread; callers that miss while that scan is running wait for it and share
//! its outcome instead of starting their own. Failures are handed to everyone
//! waiting on the scan but never stored.

#![allow(missing_docs)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::core::errors::{DsgError, Result};
use crate::scanner::walker::{UsageMeasurement, UsageScanner};

/// Monotonic time source, injectable so expiry can be tested without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    measurement: Arc<UsageMeasurement>,
    /// `None` when `computed + ttl` does not fit in an `Instant`; such an
    /// entry only leaves through `invalidate`.
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|expires_at| now < expires_at)
    }
}

/// One scan in progress and the callers waiting on it.
struct Flight {
    generation: u64,
    outcome: Mutex<Option<Result<Arc<UsageMeasurement>>>>,
    done: Condvar,
}

impl Flight {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            outcome: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn complete(&self, outcome: Result<Arc<UsageMeasurement>>) {
        *self.outcome.lock() = Some(outcome);
        self.done.notify_all();
    }

    fn wait(&self) -> Result<Arc<UsageMeasurement>> {
        let mut guard = self.outcome.lock();
        loop {
            if let Some(outcome) = guard.as_ref() {
                return outcome.clone();
            }
            self.done.wait(&mut guard);
        }
    }
}

#[derive(Default)]
struct Slot {
    entry: Option<CacheEntry>,
    in_flight: Option<Arc<Flight>>,
    /// Bumped by every invalidation; scans started under an older generation
    /// are never memoized.
    generation: u64,
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub scans: u64,
    pub hits: u64,
    pub joined: u64,
    pub invalidations: u64,
}

/// In-memory, process-lifetime cache of the latest usage measurement.
pub struct UsageCache {
    slot: Mutex<Slot>,
    clock: Arc<dyn Clock>,
    scans: AtomicU64,
    hits: AtomicU64,
    joined: AtomicU64,
    invalidations: AtomicU64,
}

impl Default for UsageCache {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageCache {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            slot: Mutex::new(Slot::default()),
            clock,
            scans: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            joined: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    /// Return the memoized measurement if it is still fresh; otherwise scan
    /// `root` (or wait for the scan already running) and memoize the result
    /// for `ttl`.
    pub fn get(
        &self,
        scanner: &dyn UsageScanner,
        root: &Path,
        ttl: Duration,
    ) -> Result<Arc<UsageMeasurement>> {
        let flight = loop {
            let mut slot = self.slot.lock();
            if let Some(entry) = &slot.entry {
                if entry.is_fresh(self.clock.now()) {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Arc::clone(&entry.measurement));
                }
                slot.entry = None;
            }

            match slot.in_flight.as_ref().map(Arc::clone) {
                Some(flight) if flight.generation == slot.generation => {
                    drop(slot);
                    self.joined.fetch_add(1, Ordering::Relaxed);
                    return flight.wait();
                }
                Some(stale) => {
                    // Started before an invalidation: let it drain, then look again.
                    drop(slot);
                    let _ = stale.wait();
                }
                None => {
                    let flight = Arc::new(Flight::new(slot.generation));
                    slot.in_flight = Some(Arc::clone(&flight));
                    break flight;
                }
            }
        };

        let mut leader = FlightLeader {
            cache: self,
            flight,
            root,
            ttl,
            finished: false,
        };
        self.scans.fetch_add(1, Ordering::Relaxed);
        let outcome = scanner.scan(root).map(Arc::new);
        leader.finish(outcome)
    }

    /// Fresh measurement, if any, without ever scanning.
    #[must_use]
    pub fn peek(&self) -> Option<Arc<UsageMeasurement>> {
        let slot = self.slot.lock();
        slot.entry
            .as_ref()
            .filter(|entry| entry.is_fresh(self.clock.now()))
            .map(|entry| Arc::clone(&entry.measurement))
    }

    /// Discard the memoized measurement so the next `get` rescans.
    pub fn invalidate(&self) {
        let mut slot = self.slot.lock();
        slot.entry = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            scans: self.scans.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            joined: self.joined.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

/// Completes the flight exactly once, even if the scanner unwinds.
struct FlightLeader<'a> {
    cache: &'a UsageCache,
    flight: Arc<Flight>,
    root: &'a Path,
    ttl: Duration,
    finished: bool,
}

impl FlightLeader<'_> {
    fn finish(&mut self, outcome: Result<Arc<UsageMeasurement>>) -> Result<Arc<UsageMeasurement>> {
        {
            let mut slot = self.cache.slot.lock();
            if slot
                .in_flight
                .as_ref()
                .is_some_and(|f| Arc::ptr_eq(f, &self.flight))
            {
                slot.in_flight = None;
            }
            if let Ok(measurement) = &outcome
                && slot.generation == self.flight.generation
            {
                slot.entry = Some(CacheEntry {
                    measurement: Arc::clone(measurement),
                    expires_at: self.cache.clock.now().checked_add(self.ttl),
                });
            }
        }
        self.flight.complete(outcome.clone());
        // Only now: if anything above unwinds, `drop` still releases the waiters.
        self.finished = true;
        outcome
    }
}

impl Drop for FlightLeader<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.finish(Err(DsgError::ScanAborted {
                root: self.root.to_path_buf(),
            }));
        }
    }
}
