// src/connection.rs - Connect/disconnect/reset of the session's device handle
use crate::session::PrinterSession;
use receipt_shared::config::SessionConfig;
use receipt_shared::{DeviceFault, ErrorCode, ErrorInfo, JobPhase};
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// Connect policy: timeout per attempt, bounded attempts, fixed backoff.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    target: String,
    connect_timeout: Duration,
    attempts: u32,
    backoff: Duration,
}

impl ConnectionManager {
    pub fn new(target: impl Into<String>, config: &SessionConfig) -> Self {
        Self {
            target: target.into(),
            connect_timeout: config.connect_timeout(),
            attempts: config.connect_attempts.max(1),
            backoff: config.connect_backoff(),
        }
    }

    /// Connects the session's device, re-verifying a connection the session
    /// already believes it has.
    pub async fn connect(&self, session: &mut PrinterSession) -> Result<(), ErrorInfo> {
        let device = session.device(JobPhase::Connect)?;

        if session.connected {
            match device.status().await {
                Ok(status) if status.connected => {
                    tracing::debug!("Printer already connected, reusing connection");
                    return Ok(());
                }
                Ok(_) => tracing::warn!("Stale connected flag: printer reports disconnected"),
                Err(e) => tracing::warn!("Status check on connected session failed: {}", e),
            }
            session.connected = false;
            session.transaction_open = false;
        }

        let mut attempt = 1;
        loop {
            tracing::info!("Connecting to printer at {} (attempt {}/{})", self.target, attempt, self.attempts);
            let result = match timeout(self.connect_timeout, device.connect(&self.target, self.connect_timeout)).await {
                Ok(result) => result,
                Err(_) => Err(DeviceFault::with_detail(ErrorCode::Timeout, "connect did not return in time")),
            };
            match result {
                Ok(()) => {
                    session.connected = true;
                    tracing::info!("Connected to printer");
                    return Ok(());
                }
                Err(fault) if fault.code == ErrorCode::AlreadyOpened => {
                    session.connected = true;
                    tracing::info!("Printer connection already open, treating as connected");
                    return Ok(());
                }
                Err(fault) if fault.code.is_retryable_on_connect() && attempt < self.attempts => {
                    tracing::warn!("Connect attempt {} failed: {}; retrying in {:?}", attempt, fault, self.backoff);
                    attempt += 1;
                    sleep(self.backoff).await;
                }
                Err(fault) => {
                    tracing::error!("Connect failed after {} attempt(s): {}", attempt, fault);
                    return Err(fault_info(fault, JobPhase::Connect));
                }
            }
        }
    }

    /// Best effort. The flag is cleared even when the device reports a failure,
    /// since the handle may already be torn down.
    pub async fn disconnect(&self, session: &mut PrinterSession) -> Result<(), ErrorInfo> {
        let result = match session.device.clone() {
            Some(device) => device.disconnect().await.map_err(|e| fault_info(e, JobPhase::Cleanup)),
            None => Ok(()),
        };
        session.connected = false;
        session.transaction_open = false;
        if let Err(e) = &result {
            tracing::warn!("Disconnect failed: {}", e);
            session.tainted = true;
        }
        result
    }

    /// Full teardown of an inconsistent session. Every step runs regardless
    /// of earlier failures: clear buffer, end transaction, disconnect, release
    /// the handle.
    pub async fn reset(&self, session: &mut PrinterSession) {
        tracing::warn!("Resetting printer session: {:?}", session);
        if let Some(device) = session.device.clone() {
            if let Err(e) = device.clear_command_buffer().await {
                tracing::warn!("Reset: clear buffer failed: {}", e);
            }
            if session.transaction_open {
                if let Err(e) = device.end_transaction().await {
                    tracing::warn!("Reset: end transaction failed: {}", e);
                }
            }
            if let Err(e) = device.disconnect().await {
                tracing::warn!("Reset: disconnect failed: {}", e);
            }
            device.set_completion_handler(None);
        }
        *session = PrinterSession::new();
    }
}

/// Translates a driver fault into the error record for `phase`.
pub(crate) fn fault_info(fault: DeviceFault, phase: JobPhase) -> ErrorInfo {
    let info = ErrorInfo::new(fault.code, phase);
    match fault.detail {
        Some(detail) => info.with_detail(detail),
        None => info,
    }
}
