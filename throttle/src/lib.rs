//! Admission gates for bounding concurrent FTP work
//!
//! An FTP server only tolerates a limited number of simultaneous connections, and every
//! transfer, listing or delete request holds one. This crate provides the counting gate the
//! engine uses to bound them.
//!
//! # Overview
//!
//! An [`AdmissionGate`] hands out [`GatePermit`]s. A permit occupies one slot until it is
//! dropped, so the slot is released on every exit path of the unit of work holding it: normal
//! completion, an error return, a panic unwinding through the task, or the task being aborted.
//!
//! Acquisition suspends the caller while all slots are taken. The transfer scheduler relies on
//! this for backpressure: it does not spawn the next unit until a slot frees up.
//!
//! # Usage
//!
//! ```rust,no_run
//! use throttle::AdmissionGate;
//!
//! # async fn example() {
//! let gate = AdmissionGate::new(10);
//! let permit = gate.acquire().await;
//! tokio::spawn(async move {
//!     let _permit = permit;
//!     // talk to the server here - the slot is released when `_permit` goes out of scope
//! });
//! # }
//! ```
//!
//! # Unbounded gates
//!
//! A gate created with a limit of 0 never blocks. This is used for the listing fan-out cap,
//! which is a tunable that may be switched off.
//!
//! # Instrumentation
//!
//! The gate keeps a count of permits currently held and the highest count observed. Tests use
//! [`AdmissionGate::peak_in_flight`] to assert that the configured limit was never exceeded.

mod semaphore;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak.fetch_max(now, Ordering::AcqRel);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Counting gate limiting the number of simultaneously admitted units of work.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    sem: Arc<semaphore::Semaphore>,
    in_flight: Arc<InFlight>,
}

impl AdmissionGate {
    /// Create a gate with `limit` slots, 0 means no limit.
    pub fn new(limit: usize) -> Self {
        Self {
            sem: Arc::new(semaphore::Semaphore::new(limit)),
            in_flight: Arc::new(InFlight::default()),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(0)
    }

    pub fn limit(&self) -> usize {
        self.sem.limit()
    }

    /// Wait until a slot is free and take it.
    pub async fn acquire(&self) -> GatePermit {
        let permit = self.sem.acquire().await;
        self.in_flight.enter();
        tracing::trace!(
            "admitted, in flight: {}",
            self.in_flight.current.load(Ordering::Acquire)
        );
        GatePermit {
            _permit: permit,
            in_flight: self.in_flight.clone(),
        }
    }

    /// Number of permits currently held.
    pub fn in_flight(&self) -> usize {
        self.in_flight.current.load(Ordering::Acquire)
    }

    /// Highest number of permits held at the same time since the gate was created.
    pub fn peak_in_flight(&self) -> usize {
        self.in_flight.peak.load(Ordering::Acquire)
    }

    /// Number of free slots, `None` for an unbounded gate.
    pub fn available(&self) -> Option<usize> {
        if self.sem.is_enabled() {
            Some(self.sem.available_permits())
        } else {
            None
        }
    }
}

/// One occupied slot of an [`AdmissionGate`], released on drop.
#[derive(Debug)]
pub struct GatePermit {
    _permit: Option<tokio::sync::OwnedSemaphorePermit>,
    in_flight: Arc<InFlight>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.in_flight.leave();
    }
}
