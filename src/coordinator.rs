// src/coordinator.rs - Admission-controlled front door to the printer
//
// Per job: acquire lock -> initialize -> connect -> prepare transaction ->
// send -> await completion -> done. Every early exit tears the session down,
// releases the lock and notifies the caller; once a send is accepted those
// duties pass to whichever side of the completion race resolves first.

use crate::admission::{AdmissionLock, LockStats};
use crate::completion::{CompletionRace, CompletionTicket, Resolution};
use crate::connection::{ConnectionManager, fault_info};
use crate::diagnostics::{DiagnosticsCollector, NoDiagnostics};
use crate::render::{CommandRenderer, PlainTextRenderer};
use crate::session::PrinterSession;
use crate::transaction::{Teardown, TransactionController};
use crate::HostError;
use async_trait::async_trait;
use receipt_shared::api_models::{Availability, PrintRequest};
use receipt_shared::config::{Config, PrinterConfig, SessionConfig};
use receipt_shared::{
    DeviceFactory, DeviceFault, DrawCommand, ErrorCode, ErrorInfo, Job, JobId, JobPhase,
    JobReceipt, PrinterDevice, ResultSink,
};
use std::sync::Arc;
use tracing::Instrument;

/// The two operations exposed to callers.
#[async_trait]
pub trait PrinterService: Send + Sync {
    /// Queues a job and returns at once; the outcome goes to `sink`. Must be
    /// called from within a tokio runtime.
    fn submit_print_job(&self, request: PrintRequest, sink: ResultSink) -> JobId;

    /// `Busy` is a status, not an error.
    async fn query_availability(&self) -> Result<Availability, ErrorInfo>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    AcquiringLock,
    Initializing,
    Connecting,
    PreparingTransaction,
    Sending,
    AwaitingCompletion,
    Done,
}

pub struct SessionCoordinatorBuilder {
    config: Config,
    factory: Arc<dyn DeviceFactory>,
    renderer: Arc<dyn CommandRenderer>,
    diagnostics: Arc<dyn DiagnosticsCollector>,
}

impl SessionCoordinatorBuilder {
    pub fn renderer(mut self, renderer: Arc<dyn CommandRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn diagnostics(mut self, diagnostics: Arc<dyn DiagnosticsCollector>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn build(self) -> Result<SessionCoordinator, HostError> {
        self.config.validate()?;
        let settings = self.config.session.clone();
        let connection = ConnectionManager::new(self.config.printer.target.clone(), &settings);
        let transaction = TransactionController::new();
        let teardown = Teardown::new(transaction.clone(), connection.clone());
        let race = Arc::new(CompletionRace::new(teardown.clone(), settings.recovery_timeout())?);
        Ok(SessionCoordinator {
            inner: Arc::new(Inner {
                printer: self.config.printer,
                settings,
                lock: AdmissionLock::new(),
                connection,
                transaction,
                teardown,
                race,
                factory: self.factory,
                renderer: self.renderer,
                diagnostics: self.diagnostics,
            }),
        })
    }
}

#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    printer: PrinterConfig,
    settings: SessionConfig,
    lock: AdmissionLock,
    connection: ConnectionManager,
    transaction: TransactionController,
    teardown: Teardown,
    race: Arc<CompletionRace>,
    factory: Arc<dyn DeviceFactory>,
    renderer: Arc<dyn CommandRenderer>,
    diagnostics: Arc<dyn DiagnosticsCollector>,
}

impl SessionCoordinator {
    pub fn builder(config: Config, factory: Arc<dyn DeviceFactory>) -> SessionCoordinatorBuilder {
        SessionCoordinatorBuilder {
            config,
            factory,
            renderer: Arc::new(PlainTextRenderer::default()),
            diagnostics: Arc::new(NoDiagnostics),
        }
    }

    pub fn new(config: Config, factory: Arc<dyn DeviceFactory>) -> Result<Self, HostError> {
        Self::builder(config, factory).build()
    }

    /// Spawns the job onto the runtime and returns its id immediately.
    pub fn submit(&self, job: Job) -> JobId {
        let id = job.id;
        let inner = self.inner.clone();
        let span = tracing::info_span!("job", job_id = %id);
        tokio::spawn(async move { inner.run_job(job).await }.instrument(span));
        id
    }

    /// Runs a job up to dispatch on the calling task.
    pub async fn process(&self, job: Job) {
        let span = tracing::info_span!("job", job_id = %job.id);
        self.inner.clone().run_job(job).instrument(span).await
    }

    pub async fn availability(&self) -> Result<Availability, ErrorInfo> {
        self.inner.probe().await
    }

    /// Releases the device handle. Waits for the in-flight job, if any, up to
    /// the lock timeout.
    pub async fn shutdown(&self) {
        match self.inner.lock.acquire(self.inner.settings.lock_timeout()).await {
            Some(mut permit) => {
                if permit.is_initialized() {
                    self.inner.connection.reset(&mut permit).await;
                }
                permit.release();
                tracing::info!("Printer session shut down");
            }
            None => tracing::warn!("Printer still busy at shutdown; leaving session as is"),
        }
    }

    pub fn lock_stats(&self) -> LockStats {
        self.inner.lock.stats()
    }

    pub fn pending_completions(&self) -> usize {
        self.inner.race.pending_count()
    }

    pub fn forced_recoveries(&self) -> u64 {
        self.inner.race.forced_recoveries()
    }
}

#[async_trait]
impl PrinterService for SessionCoordinator {
    fn submit_print_job(&self, request: PrintRequest, sink: ResultSink) -> JobId {
        self.submit(Job::new(request.text, sink))
    }

    async fn query_availability(&self) -> Result<Availability, ErrorInfo> {
        self.availability().await
    }
}

impl Inner {
    fn enter(&self, stage: JobStage) {
        tracing::debug!(?stage, "Job stage");
    }

    async fn run_job(self: Arc<Self>, job: Job) {
        let Job { id, payload, sink, submitted_at } = job;
        tracing::info!(queued_ms = (chrono::Utc::now() - submitted_at).num_milliseconds(), "Print job received");

        let commands = match self.renderer.render(&payload) {
            Ok(commands) => commands,
            Err(e) => {
                tracing::error!("Rendering failed: {}", e);
                sink.deliver(Err(e));
                return;
            }
        };

        self.enter(JobStage::AcquiringLock);
        let Some(mut permit) = self.lock.acquire(self.settings.lock_timeout()).await else {
            tracing::warn!("Printer busy, rejecting job");
            self.enter(JobStage::Done);
            sink.deliver(Err(ErrorInfo::busy()));
            return;
        };

        let device = match self.prepare(&mut permit, &commands).await {
            Ok(device) => device,
            Err(e) => {
                tracing::error!("Print job failed: {}", e);
                self.enter(JobStage::Done);
                permit.release();
                sink.deliver(Err(e));
                return;
            }
        };

        self.enter(JobStage::Sending);
        let ticket = CompletionTicket::new(id, permit, sink);
        self.race.register(ticket.clone());
        let send_timeout = self.settings.send_timeout();
        let sent = match tokio::time::timeout(send_timeout, device.send_data(id, send_timeout)).await {
            Ok(result) => result,
            Err(_) => Err(DeviceFault::with_detail(ErrorCode::Timeout, "send was not acknowledged")),
        };

        match sent {
            Err(fault) => {
                tracing::error!("Printer rejected data: {}", fault);
                self.resolve_here(&ticket, Err(fault_info(fault, JobPhase::SendData))).await;
            }
            Ok(()) if self.settings.wait_for_completion => {
                self.enter(JobStage::AwaitingCompletion);
                self.race.arm(&ticket, self.settings.completion_timeout());
                tracing::info!("Print data accepted, awaiting completion");
            }
            Ok(()) => {
                tracing::info!("Print data accepted");
                self.resolve_here(&ticket, Ok(JobReceipt::sent(id))).await;
            }
        }
    }

    /// Resolves the ticket from the submitting task, unless the device
    /// callback already did.
    async fn resolve_here(&self, ticket: &CompletionTicket, result: Result<JobReceipt, ErrorInfo>) {
        let Some(Resolution { mut permit, sink }) = self.race.withdraw(ticket) else {
            return;
        };
        if let Some(e) = self.teardown.run(&mut permit).await {
            tracing::warn!("Teardown failed: {}", e);
        }
        self.enter(JobStage::Done);
        permit.release();
        sink.deliver(result);
    }

    /// Initialize, connect, check readiness, open the transaction and buffer
    /// the commands. Tears down on failure.
    async fn prepare(
        &self,
        session: &mut PrinterSession,
        commands: &[DrawCommand],
    ) -> Result<Arc<dyn PrinterDevice>, ErrorInfo> {
        self.enter(JobStage::Initializing);
        if session.is_inconsistent() {
            self.connection.reset(session).await;
        }
        let device = self.ensure_device(session)?;

        self.enter(JobStage::Connecting);
        if let Err(e) = self.connection.connect(session).await {
            self.connection.reset(session).await;
            return Err(e.with_diagnostics(self.diagnostics.collect()));
        }

        self.enter(JobStage::PreparingTransaction);
        if let Err(e) = self.transaction.clear_buffer(session, JobPhase::ClearBuffer).await {
            return Err(self.abandon(session, e).await);
        }
        self.check_ready(session, &device).await?;

        if let Err(e) = self.transaction.begin(session).await {
            return Err(self.abandon(session, e).await);
        }
        if let Err(fault) = device.add_commands(commands).await {
            return Err(self.abandon(session, fault_info(fault, JobPhase::AddCommands)).await);
        }
        Ok(device)
    }

    /// Not-ready is reported without forced recovery; that is reserved for
    /// a device that stopped answering.
    async fn check_ready(&self, session: &mut PrinterSession, device: &Arc<dyn PrinterDevice>) -> Result<(), ErrorInfo> {
        match device.status().await {
            Ok(status) if status.connected && status.online => Ok(()),
            Ok(status) if !status.connected => {
                tracing::warn!("Printer dropped the connection after connect");
                self.connection.reset(session).await;
                Err(ErrorInfo::new(ErrorCode::Connect, JobPhase::CheckStatus)
                    .with_diagnostics(self.diagnostics.collect()))
            }
            Ok(_) => {
                tracing::warn!("Printer is not ready");
                let e = ErrorInfo::not_ready(JobPhase::CheckStatus).with_diagnostics(self.diagnostics.collect());
                Err(self.abandon(session, e).await)
            }
            Err(fault) => {
                let e = fault_info(fault, JobPhase::CheckStatus).with_diagnostics(self.diagnostics.collect());
                Err(self.abandon(session, e).await)
            }
        }
    }

    /// Runs teardown after an error and hands back the original error.
    async fn abandon(&self, session: &mut PrinterSession, error: ErrorInfo) -> ErrorInfo {
        if let Some(e) = self.teardown.run(session).await {
            tracing::warn!("Teardown after '{}' also failed: {}", error.context, e);
        }
        error
    }

    fn ensure_device(&self, session: &mut PrinterSession) -> Result<Arc<dyn PrinterDevice>, ErrorInfo> {
        if let Some(device) = &session.device {
            return Ok(device.clone());
        }
        let device = self.factory.create(&self.printer).map_err(|fault| {
            tracing::error!("Printer initialization failed: {}", fault);
            fault_info(fault, JobPhase::Initialize).with_diagnostics(self.diagnostics.collect())
        })?;
        device.set_completion_handler(Some(self.race.handler()));
        session.device = Some(device.clone());
        tracing::info!("Printer handle initialized ({})", self.printer.model);
        Ok(device)
    }

    async fn probe(&self) -> Result<Availability, ErrorInfo> {
        let Some(mut permit) = self.lock.acquire(self.settings.probe_lock_timeout()).await else {
            tracing::debug!("Availability probe: printer busy");
            return Ok(Availability::Busy);
        };
        // The permit is released on every path, including cancellation.
        let result = self.probe_device(&mut permit).await;
        permit.release();
        result
    }

    async fn probe_device(&self, session: &mut PrinterSession) -> Result<Availability, ErrorInfo> {
        if session.is_inconsistent() {
            self.connection.reset(session).await;
        }
        let device = self.ensure_device(session)?;
        if let Err(e) = self.connection.connect(session).await {
            self.connection.reset(session).await;
            return Err(e.with_diagnostics(self.diagnostics.collect()));
        }
        let status = device.status().await;
        if let Some(e) = self.teardown.run(session).await {
            tracing::warn!("Availability probe teardown failed: {}", e);
        }
        match status {
            Ok(status) if status.connected && status.online => Ok(Availability::Online),
            Ok(_) => Err(ErrorInfo::not_ready(JobPhase::CheckStatus).with_diagnostics(self.diagnostics.collect())),
            Err(fault) => Err(fault_info(fault, JobPhase::CheckStatus).with_diagnostics(self.diagnostics.collect())),
        }
    }
}
