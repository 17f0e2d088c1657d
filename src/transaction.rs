// src/transaction.rs - Transaction bracketing and the fixed teardown sequence
use crate::connection::{ConnectionManager, fault_info};
use crate::session::PrinterSession;
use receipt_shared::{ErrorCode, ErrorInfo, JobPhase};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Open,
}

/// Opens and closes the device transaction around a job. The state itself
/// lives in the session so it travels with the admission permit.
#[derive(Debug, Clone, Default)]
pub struct TransactionController;

impl TransactionController {
    pub fn new() -> Self {
        Self
    }

    pub fn state(&self, session: &PrinterSession) -> TransactionState {
        if session.transaction_open {
            TransactionState::Open
        } else {
            TransactionState::Idle
        }
    }

    pub async fn begin(&self, session: &mut PrinterSession) -> Result<(), ErrorInfo> {
        if !session.connected {
            return Err(ErrorInfo::new(ErrorCode::Illegal, JobPhase::BeginTransaction)
                .with_detail("printer not connected"));
        }
        if session.transaction_open {
            tracing::debug!("Transaction already open");
            return Ok(());
        }
        let device = session.device(JobPhase::BeginTransaction)?;
        device
            .begin_transaction()
            .await
            .map_err(|e| fault_info(e, JobPhase::BeginTransaction))?;
        session.transaction_open = true;
        session.check_invariant();
        tracing::debug!("Transaction opened");
        Ok(())
    }

    /// No-op when idle. The flag is cleared even if the device call fails.
    pub async fn end(&self, session: &mut PrinterSession) -> Result<(), ErrorInfo> {
        if !session.transaction_open {
            return Ok(());
        }
        let result = match session.device.clone() {
            Some(device) => device.end_transaction().await.map_err(|e| fault_info(e, JobPhase::Cleanup)),
            None => Ok(()),
        };
        session.transaction_open = false;
        tracing::debug!("Transaction closed");
        result
    }

    pub async fn clear_buffer(&self, session: &mut PrinterSession, phase: JobPhase) -> Result<(), ErrorInfo> {
        let device = session.device(phase)?;
        device.clear_command_buffer().await.map_err(|e| fault_info(e, phase))
    }
}

/// The terminal cleanup every job runs: end transaction, disconnect, clear
/// buffer, in that order. Reordering leaves some devices in a state that
/// surfaces as a connect failure on the next job.
#[derive(Debug, Clone)]
pub struct Teardown {
    transaction: TransactionController,
    connection: ConnectionManager,
}

impl Teardown {
    pub fn new(transaction: TransactionController, connection: ConnectionManager) -> Self {
        Self { transaction, connection }
    }

    /// Runs every step even when an earlier one fails and returns the first
    /// failure, if any. A failing step taints the session so the next job
    /// resets it.
    pub async fn run(&self, session: &mut PrinterSession) -> Option<ErrorInfo> {
        let mut first_error = None;

        if let Err(e) = self.transaction.end(session).await {
            tracing::warn!("Teardown: end transaction failed: {}", e);
            first_error.get_or_insert(e);
        }
        if let Err(e) = self.connection.disconnect(session).await {
            first_error.get_or_insert(e);
        }
        if session.device.is_some() {
            if let Err(e) = self.transaction.clear_buffer(session, JobPhase::Cleanup).await {
                tracing::warn!("Teardown: clear buffer failed: {}", e);
                first_error.get_or_insert(e);
            }
        }

        if first_error.is_some() {
            session.tainted = true;
        }
        session.check_invariant();
        first_error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::simulated::{DeviceOp, SimulatedPrinter};
    use receipt_shared::config::SessionConfig;

    fn teardown() -> Teardown {
        let connection = ConnectionManager::new("USB:", &SessionConfig::default());
        Teardown::new(TransactionController::new(), connection)
    }

    async fn open_session(printer: &std::sync::Arc<SimulatedPrinter>) -> PrinterSession {
        let mut session = PrinterSession { device: Some(printer.clone()), ..PrinterSession::default() };
        ConnectionManager::new("USB:", &SessionConfig::default())
            .connect(&mut session)
            .await
            .unwrap();
        TransactionController::new().begin(&mut session).await.unwrap();
        printer.clear_calls();
        session
    }

    #[tokio::test]
    async fn begin_requires_a_connection() {
        let printer = SimulatedPrinter::new();
        let mut session = PrinterSession { device: Some(printer.clone()), ..PrinterSession::default() };
        let err = TransactionController::new().begin(&mut session).await.unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::Illegal);
        assert_eq!(printer.count(DeviceOp::BeginTransaction), 0);
    }

    #[tokio::test]
    async fn begin_twice_opens_one_transaction() {
        let printer = SimulatedPrinter::new();
        let mut session = open_session(&printer).await;
        let controller = TransactionController::new();
        controller.begin(&mut session).await.unwrap();
        assert_eq!(controller.state(&session), TransactionState::Open);
        assert_eq!(printer.count(DeviceOp::BeginTransaction), 0);
    }

    #[tokio::test]
    async fn end_on_idle_session_touches_nothing() {
        let printer = SimulatedPrinter::new();
        let mut session = PrinterSession { device: Some(printer.clone()), ..PrinterSession::default() };
        TransactionController::new().end(&mut session).await.unwrap();
        assert!(printer.calls().is_empty());
    }

    #[tokio::test]
    async fn teardown_runs_in_fixed_order() {
        let printer = SimulatedPrinter::new();
        let mut session = open_session(&printer).await;

        assert!(teardown().run(&mut session).await.is_none());
        assert_eq!(
            printer.calls(),
            vec![DeviceOp::EndTransaction, DeviceOp::Disconnect, DeviceOp::ClearBuffer]
        );
        assert!(!session.is_inconsistent());
        assert!(session.is_initialized());
    }

    #[tokio::test]
    async fn failing_step_does_not_stop_later_steps() {
        for failing in [DeviceOp::EndTransaction, DeviceOp::Disconnect, DeviceOp::ClearBuffer] {
            let printer = SimulatedPrinter::new();
            let mut session = open_session(&printer).await;
            printer.fail(failing, ErrorCode::Failure);

            let err = teardown().run(&mut session).await.expect("teardown error");
            assert_eq!(err.context, JobPhase::Cleanup);
            assert_eq!(
                printer.calls(),
                vec![DeviceOp::EndTransaction, DeviceOp::Disconnect, DeviceOp::ClearBuffer]
            );
            assert!(!session.is_connected());
            assert!(!session.is_transaction_open());
            assert!(session.is_inconsistent(), "{:?} failure must taint the session", failing);
        }
    }

    #[tokio::test]
    async fn first_failure_is_reported() {
        let printer = SimulatedPrinter::new();
        let mut session = open_session(&printer).await;
        printer.fail(DeviceOp::EndTransaction, ErrorCode::Illegal);
        printer.fail(DeviceOp::ClearBuffer, ErrorCode::Failure);

        let err = teardown().run(&mut session).await.expect("teardown error");
        assert_eq!(err.error_code(), ErrorCode::Illegal);
    }
}
