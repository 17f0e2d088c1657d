// src/admission.rs - Single-slot admission control for the printer
use crate::session::PrinterSession;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Single-slot admission lock guarding the `PrinterSession`.
///
/// Backed by a `tokio::sync::Mutex`, which is semaphore based and not tied to
/// the identity of the acquiring thread: an `AdmissionPermit` is `Send` and
/// may be released from any thread or task, including a driver's completion
/// thread or the watchdog. Waiters are served in FIFO order.
#[derive(Debug, Clone)]
pub struct AdmissionLock {
    session: Arc<Mutex<PrinterSession>>,
    counters: Arc<LockCounters>,
}

#[derive(Debug, Default)]
struct LockCounters {
    acquired: AtomicU64,
    released: AtomicU64,
}

/// Snapshot of acquire/release counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockStats {
    pub acquired: u64,
    pub released: u64,
}

impl LockStats {
    pub fn outstanding(&self) -> u64 {
        self.acquired.saturating_sub(self.released)
    }
}

impl AdmissionLock {
    pub fn new() -> Self {
        Self {
            session: Arc::new(Mutex::new(PrinterSession::new())),
            counters: Arc::new(LockCounters::default()),
        }
    }

    /// Waits at most `wait` for the permit. `None` means the device is busy.
    pub async fn acquire(&self, wait: Duration) -> Option<AdmissionPermit> {
        match tokio::time::timeout(wait, self.session.clone().lock_owned()).await {
            Ok(guard) => Some(self.grant(guard)),
            Err(_) => None,
        }
    }

    pub fn try_acquire(&self) -> Option<AdmissionPermit> {
        self.session.clone().try_lock_owned().ok().map(|guard| self.grant(guard))
    }

    /// Reads `released` first so a concurrent acquire/release pair cannot
    /// make it exceed `acquired`.
    pub fn stats(&self) -> LockStats {
        let released = self.counters.released.load(Ordering::SeqCst);
        let acquired = self.counters.acquired.load(Ordering::SeqCst);
        LockStats { acquired, released }
    }

    fn grant(&self, guard: OwnedMutexGuard<PrinterSession>) -> AdmissionPermit {
        self.counters.acquired.fetch_add(1, Ordering::SeqCst);
        AdmissionPermit {
            guard,
            counters: self.counters.clone(),
        }
    }
}

impl Default for AdmissionLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive access to the session. Released exactly once, on `release` or
/// drop, whichever thread that happens on.
#[derive(Debug)]
pub struct AdmissionPermit {
    guard: OwnedMutexGuard<PrinterSession>,
    counters: Arc<LockCounters>,
}

impl AdmissionPermit {
    pub fn release(self) {
        drop(self);
    }
}

impl Deref for AdmissionPermit {
    type Target = PrinterSession;

    fn deref(&self) -> &PrinterSession {
        &self.guard
    }
}

impl DerefMut for AdmissionPermit {
    fn deref_mut(&mut self) -> &mut PrinterSession {
        &mut self.guard
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
        tracing::trace!("Admission permit released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_times_out_while_held() {
        let lock = AdmissionLock::new();
        let permit = lock.acquire(Duration::from_millis(50)).await;
        assert!(permit.is_some());
        assert!(lock.acquire(Duration::from_millis(50)).await.is_none());
        assert!(lock.try_acquire().is_none());
        drop(permit);
        assert!(lock.try_acquire().is_some());
    }

    #[tokio::test]
    async fn permit_can_be_released_from_a_foreign_thread() {
        let lock = AdmissionLock::new();
        let permit = lock.acquire(Duration::from_millis(50)).await.unwrap();
        std::thread::spawn(move || permit.release()).join().unwrap();
        let again = lock.acquire(Duration::from_millis(50)).await;
        assert!(again.is_some());
        drop(again);
        let stats = lock.stats();
        assert_eq!(stats, LockStats { acquired: 2, released: 2 });
        assert_eq!(stats.outstanding(), 0);
    }

    #[tokio::test]
    async fn permit_gives_exclusive_access_to_the_session() {
        let lock = AdmissionLock::new();
        {
            let mut permit = lock.try_acquire().unwrap();
            permit.connected = true;
        }
        let permit = lock.try_acquire().unwrap();
        assert!(permit.is_connected());
    }

    #[test]
    fn outstanding_never_underflows() {
        let stats = LockStats { acquired: 3, released: 4 };
        assert_eq!(stats.outstanding(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stats_stay_ordered_under_churn() {
        let lock = AdmissionLock::new();
        let churn = {
            let lock = lock.clone();
            tokio::spawn(async move {
                for _ in 0..2_000 {
                    if let Some(permit) = lock.try_acquire() {
                        permit.release();
                    }
                    tokio::task::yield_now().await;
                }
            })
        };
        while !churn.is_finished() {
            let stats = lock.stats();
            assert!(stats.released <= stats.acquired, "{:?}", stats);
        }
        churn.await.unwrap();
        assert_eq!(lock.stats().outstanding(), 0);
    }
}
