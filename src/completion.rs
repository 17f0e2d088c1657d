// src/completion.rs - Device callback vs. watchdog race with exactly-once resolution
//
// A dispatched send is accepted synchronously but completed later, through a
// callback on a thread the driver owns, or never. Each dispatched job gets a
// `CompletionTicket`; whichever of {device callback, watchdog, submitting
// task} claims it first runs teardown, releases the admission permit and
// notifies the caller. Every later claim is inert.

use crate::admission::AdmissionPermit;
use crate::connection::fault_info;
use crate::transaction::Teardown;
use receipt_shared::{
    CompletionHandler, ErrorCode, ErrorInfo, JobId, JobPhase, JobReceipt, ResultSink, SendOutcome,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Who resolved a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolver {
    DeviceCallback,
    Watchdog,
    /// The submitting task: a rejected send, or dispatch-only mode.
    Dispatch,
}

/// What the winning resolver takes ownership of.
#[derive(Debug)]
pub struct Resolution {
    pub permit: AdmissionPermit,
    pub sink: ResultSink,
}

/// Single-resolution cell correlating one dispatched send with its outcome.
#[derive(Debug)]
pub struct CompletionTicket {
    job_id: JobId,
    resolved: AtomicBool,
    watchdog: Mutex<Option<JoinHandle<()>>>,
    holder: Mutex<Option<Resolution>>,
}

impl CompletionTicket {
    pub fn new(job_id: JobId, permit: AdmissionPermit, sink: ResultSink) -> Arc<Self> {
        Arc::new(Self {
            job_id,
            resolved: AtomicBool::new(false),
            watchdog: Mutex::new(None),
            holder: Mutex::new(Some(Resolution { permit, sink })),
        })
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }

    /// First caller wins the permit and sink; everyone else gets `None`.
    /// A non-watchdog winner cancels the watchdog.
    pub fn claim(&self, by: Resolver) -> Option<Resolution> {
        if self
            .resolved
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(job_id = %self.job_id, ?by, "Ticket already resolved");
            return None;
        }
        if by != Resolver::Watchdog {
            if let Some(handle) = lock(&self.watchdog).take() {
                handle.abort();
            }
        }
        tracing::debug!(job_id = %self.job_id, ?by, "Ticket resolved");
        lock(&self.holder).take()
    }

    fn set_watchdog(&self, handle: JoinHandle<()>) {
        let mut slot = lock(&self.watchdog);
        if self.is_resolved() {
            // Resolved before the timer was stored; nobody else will cancel it.
            handle.abort();
        } else {
            *slot = Some(handle);
        }
    }
}

/// Dedicated single-thread timer scheduler for completion watchdogs, so a
/// saturated worker pool cannot delay a timeout.
#[derive(Debug)]
pub struct Watchdog {
    handle: Handle,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Watchdog {
    pub fn start() -> std::io::Result<Self> {
        let runtime: Runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        let handle = runtime.handle().clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        std::thread::Builder::new()
            .name("printer-watchdog".to_string())
            .spawn(move || {
                runtime.block_on(async {
                    let _ = shutdown_rx.await;
                });
                tracing::debug!("Watchdog scheduler stopped");
            })?;
        Ok(Self {
            handle,
            shutdown: Some(shutdown_tx),
        })
    }

    pub fn schedule<F>(&self, after: Duration, fire: F) -> JoinHandle<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.spawn(async move {
            tokio::time::sleep(after).await;
            fire();
        })
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Pending tickets plus the two resolution paths that race over them.
#[derive(Debug)]
pub struct CompletionRace {
    pending: Mutex<HashMap<JobId, Arc<CompletionTicket>>>,
    teardown: Teardown,
    watchdog: Watchdog,
    recovery_timeout: Duration,
    forced_recoveries: AtomicU64,
}

impl CompletionRace {
    pub fn new(teardown: Teardown, recovery_timeout: Duration) -> std::io::Result<Self> {
        Ok(Self {
            pending: Mutex::new(HashMap::new()),
            teardown,
            watchdog: Watchdog::start()?,
            recovery_timeout,
            forced_recoveries: AtomicU64::new(0),
        })
    }

    /// The session-scoped handler a driver reports completions through.
    /// Outcomes are correlated to tickets by job id. Must be called from
    /// within a tokio runtime.
    pub fn handler(self: &Arc<Self>) -> CompletionHandler {
        let race = Arc::downgrade(self);
        let runtime = Handle::current();
        Arc::new(move |outcome: SendOutcome| {
            let Some(race) = race.upgrade() else {
                return;
            };
            runtime.spawn(async move {
                race.on_device_callback(outcome).await;
            });
        })
    }

    /// Makes the ticket visible to the device callback. Done before the send
    /// is dispatched so a fast callback cannot miss it.
    pub fn register(&self, ticket: Arc<CompletionTicket>) {
        lock(&self.pending).insert(ticket.job_id(), ticket);
    }

    /// Starts the watchdog for an accepted send.
    pub fn arm(self: &Arc<Self>, ticket: &Arc<CompletionTicket>, after: Duration) {
        let runtime = Handle::current();
        let race = self.clone();
        let fired = ticket.clone();
        let handle = self.watchdog.schedule(after, move || {
            runtime.spawn(async move {
                race.on_watchdog_fire(fired).await;
            });
        });
        ticket.set_watchdog(handle);
    }

    /// Resolves the ticket from the submitting task.
    pub fn withdraw(&self, ticket: &CompletionTicket) -> Option<Resolution> {
        let resolution = ticket.claim(Resolver::Dispatch)?;
        self.forget(ticket.job_id());
        Some(resolution)
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn forced_recoveries(&self) -> u64 {
        self.forced_recoveries.load(Ordering::SeqCst)
    }

    pub async fn on_device_callback(&self, outcome: SendOutcome) {
        let ticket = lock(&self.pending).get(&outcome.job_id).cloned();
        let Some(ticket) = ticket else {
            tracing::debug!(job_id = %outcome.job_id, "Ignoring completion for unknown or finished job");
            return;
        };
        let Some(Resolution { mut permit, sink }) = ticket.claim(Resolver::DeviceCallback) else {
            return;
        };
        self.forget(ticket.job_id());

        if let Some(e) = self.teardown.run(&mut permit).await {
            tracing::warn!(job_id = %outcome.job_id, "Teardown after completion failed: {}", e);
        }
        let result = match outcome.result {
            Ok(()) => {
                tracing::info!(job_id = %outcome.job_id, "Print completed");
                Ok(JobReceipt::printed(outcome.job_id))
            }
            Err(fault) => {
                tracing::error!(job_id = %outcome.job_id, "Printer reported failure: {}", fault);
                Err(fault_info(fault, JobPhase::PrintCallback))
            }
        };
        permit.release();
        sink.deliver(result);
    }

    pub async fn on_watchdog_fire(&self, ticket: Arc<CompletionTicket>) {
        let Some(Resolution { mut permit, sink }) = ticket.claim(Resolver::Watchdog) else {
            return;
        };
        let job_id = ticket.job_id();
        self.forget(job_id);
        tracing::error!(%job_id, "No completion from printer, forcing recovery");

        // Only reachable when the device stopped responding entirely.
        if let Some(device) = permit.device.clone() {
            self.forced_recoveries.fetch_add(1, Ordering::SeqCst);
            match tokio::time::timeout(self.recovery_timeout, device.force_recover(self.recovery_timeout)).await {
                Ok(Ok(())) => tracing::info!(%job_id, "Forced recovery completed"),
                Ok(Err(e)) => tracing::warn!(%job_id, "Forced recovery failed: {}", e),
                Err(_) => tracing::warn!(%job_id, "Forced recovery timed out"),
            }
        }
        if let Some(e) = self.teardown.run(&mut permit).await {
            tracing::warn!(%job_id, "Teardown after timeout failed: {}", e);
        }
        permit.tainted = true;
        permit.release();
        sink.deliver(Err(ErrorInfo::new(ErrorCode::Timeout, JobPhase::CallbackTimeout)
            .with_detail("no completion callback from printer; output may need checking")));
    }

    fn forget(&self, job_id: JobId) {
        lock(&self.pending).remove(&job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmissionLock;

    #[tokio::test]
    async fn only_the_first_claim_wins() {
        let lock = AdmissionLock::new();
        let permit = lock.try_acquire().unwrap();
        let (sink, _rx) = ResultSink::channel();
        let ticket = CompletionTicket::new(JobId::new(), permit, sink);

        let first = ticket.claim(Resolver::DeviceCallback);
        assert!(first.is_some());
        assert!(ticket.claim(Resolver::Watchdog).is_none());
        assert!(ticket.claim(Resolver::Dispatch).is_none());
        assert!(ticket.is_resolved());
        drop(first);
        assert_eq!(lock.stats().outstanding(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_produce_exactly_one_winner() {
        for _ in 0..50 {
            let lock = AdmissionLock::new();
            let (sink, _rx) = ResultSink::channel();
            let ticket = CompletionTicket::new(JobId::new(), lock.try_acquire().unwrap(), sink);
            let racers: Vec<_> = [Resolver::DeviceCallback, Resolver::Watchdog, Resolver::Dispatch]
                .into_iter()
                .map(|by| {
                    let ticket = ticket.clone();
                    std::thread::spawn(move || ticket.claim(by).is_some())
                })
                .collect();
            let wins = racers.into_iter().map(|r| r.join().unwrap()).filter(|&won| won).count() as u32;
            assert_eq!(wins, 1);
            assert_eq!(lock.stats().outstanding(), 0);
        }
    }

    #[tokio::test]
    async fn watchdog_scheduler_fires_on_its_own_thread() {
        let watchdog = Watchdog::start().unwrap();
        let (tx, rx) = oneshot::channel();
        watchdog.schedule(Duration::from_millis(10), move || {
            let name = std::thread::current().name().map(str::to_string);
            let _ = tx.send(name);
        });
        let name = rx.await.unwrap();
        assert_eq!(name.as_deref(), Some("printer-watchdog"));
    }

    #[tokio::test]
    async fn cancelled_watchdog_never_fires() {
        let watchdog = Watchdog::start().unwrap();
        let (tx, mut rx) = oneshot::channel::<()>();
        let handle = watchdog.schedule(Duration::from_millis(30), move || {
            let _ = tx.send(());
        });
        handle.abort();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(rx.try_recv().is_err());
    }
}
