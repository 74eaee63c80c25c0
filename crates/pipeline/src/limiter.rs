//! Concurrency Limiter and VRAM Ledger.
//!
//! GPU-bound stage calls are admitted through a FIFO semaphore with `N`
//! slots. Each admission returns a [`SlotPermit`]; dropping the permit is
//! the only way to release a slot, so a slot is returned exactly once on
//! every exit path, including panics and cancelled futures.
//!
//! The [`VramLedger`] mirrors the semaphore with counters so tests and
//! logs can observe how many stage calls are in flight.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::LimiterError;

/// Slot sizing and admission timeout.
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Configured worker count.
    pub concurrency: usize,
    /// Total GPU memory available to the service, if known.
    pub vram_total_mb: Option<u64>,
    /// Measured peak memory of one stage call, if known.
    pub vram_per_worker_mb: Option<u64>,
    pub acquire_timeout: Duration,
}

impl LimiterConfig {
    /// `N`: the configured concurrency, further capped by how many
    /// workers fit in VRAM when both memory figures are set. Never 0.
    pub fn effective_slots(&self) -> usize {
        let by_vram = match (self.vram_total_mb, self.vram_per_worker_mb) {
            (Some(total), Some(per)) if per > 0 => (total / per) as usize,
            _ => usize::MAX,
        };
        self.concurrency.min(by_vram).max(1)
    }
}

/// Counted GPU headroom. Mutated only by the limiter.
#[derive(Debug)]
pub struct VramLedger {
    capacity: usize,
    outstanding: AtomicUsize,
    peak: AtomicUsize,
    admitted: AtomicU64,
    timeouts: AtomicU64,
}

/// Point-in-time copy of the ledger counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub capacity: usize,
    pub outstanding: usize,
    pub peak: usize,
    pub admitted: u64,
    pub timeouts: u64,
}

impl VramLedger {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            outstanding: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            admitted: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        }
    }

    fn admit(&self) {
        let now = self.outstanding.fetch_add(1, Ordering::AcqRel) + 1;
        debug_assert!(now <= self.capacity, "ledger over capacity: {now}");
        self.peak.fetch_max(now, Ordering::AcqRel);
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    fn release(&self) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            capacity: self.capacity,
            outstanding: self.outstanding.load(Ordering::Acquire),
            peak: self.peak.load(Ordering::Acquire),
            admitted: self.admitted.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    ledger: Arc<VramLedger>,
    acquire_timeout: Duration,
}

impl ConcurrencyLimiter {
    pub fn new(config: &LimiterConfig) -> Self {
        let slots = config.effective_slots();
        tracing::info!(
            slots,
            configured = config.concurrency,
            vram_total_mb = ?config.vram_total_mb,
            vram_per_worker_mb = ?config.vram_per_worker_mb,
            "GPU concurrency limiter ready",
        );
        Self {
            semaphore: Arc::new(Semaphore::new(slots)),
            ledger: Arc::new(VramLedger::new(slots)),
            acquire_timeout: config.acquire_timeout,
        }
    }

    pub fn capacity(&self) -> usize {
        self.ledger.capacity
    }

    pub fn ledger(&self) -> LedgerSnapshot {
        self.ledger.snapshot()
    }

    /// Wait for a free slot, in arrival order, for at most the configured
    /// acquisition timeout. Dropping the returned future while it waits
    /// admits nothing.
    pub async fn acquire(&self) -> Result<SlotPermit, LimiterError> {
        let wait = Arc::clone(&self.semaphore).acquire_owned();
        match tokio::time::timeout(self.acquire_timeout, wait).await {
            Ok(Ok(permit)) => {
                self.ledger.admit();
                Ok(SlotPermit {
                    ledger: Arc::clone(&self.ledger),
                    _permit: permit,
                })
            }
            Ok(Err(_)) => Err(LimiterError::Closed),
            Err(_) => {
                self.ledger.timeouts.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    timeout_ms = self.acquire_timeout.as_millis() as u64,
                    "GPU slot acquisition timed out",
                );
                Err(LimiterError::Timeout(self.acquire_timeout))
            }
        }
    }

    /// Refuse all further admissions. Held permits stay valid.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

/// One admitted unit of GPU work. The slot is released when this drops.
#[derive(Debug)]
#[must_use = "dropping the permit releases the slot immediately"]
pub struct SlotPermit {
    ledger: Arc<VramLedger>,
    _permit: OwnedSemaphorePermit,
}

impl SlotPermit {
    /// Release the slot now.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        // Ledger first, then the semaphore slot (field drop), so the
        // outstanding count never exceeds capacity.
        self.ledger.release();
    }
}
