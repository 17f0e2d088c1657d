// src/session.rs - Coordinator's view of the device connection
use receipt_shared::{ErrorCode, ErrorInfo, JobPhase, PrinterDevice};
use std::fmt;
use std::sync::Arc;

/// Device handle plus the connection/transaction flags.
///
/// Only reachable through an `AdmissionPermit`, so whoever holds the admission
/// lock is the sole reader and writer. Invariant: `transaction_open` implies
/// `connected`.
#[derive(Default)]
pub struct PrinterSession {
    pub(crate) device: Option<Arc<dyn PrinterDevice>>,
    pub(crate) connected: bool,
    pub(crate) transaction_open: bool,
    /// Set when a teardown step failed or the completion watchdog fired; the
    /// handle can no longer be trusted.
    pub(crate) tainted: bool,
}

impl PrinterSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.device.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_transaction_open(&self) -> bool {
        self.transaction_open
    }

    /// Leftovers from a prior job that did not finish its teardown: an open
    /// transaction, a connection that was never closed, or a handle whose
    /// teardown failed.
    pub fn is_inconsistent(&self) -> bool {
        self.transaction_open || self.connected || (self.device.is_some() && self.tainted)
    }

    pub(crate) fn device(&self, phase: JobPhase) -> Result<Arc<dyn PrinterDevice>, ErrorInfo> {
        self.device
            .clone()
            .ok_or_else(|| ErrorInfo::new(ErrorCode::Illegal, phase).with_detail("printer not initialized"))
    }

    pub(crate) fn check_invariant(&self) {
        debug_assert!(
            !self.transaction_open || self.connected,
            "transaction open on a disconnected session"
        );
    }
}

impl fmt::Debug for PrinterSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrinterSession")
            .field("initialized", &self.device.is_some())
            .field("connected", &self.connected)
            .field("transaction_open", &self.transaction_open)
            .field("tainted", &self.tainted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_session_is_consistent() {
        let session = PrinterSession::new();
        assert!(!session.is_initialized());
        assert!(!session.is_inconsistent());
    }

    #[test]
    fn leftover_flags_mark_the_session_inconsistent() {
        let mut session = PrinterSession::new();
        session.connected = true;
        assert!(session.is_inconsistent());
        session.transaction_open = true;
        assert!(session.is_inconsistent());
    }

    #[test]
    fn missing_device_is_an_illegal_state() {
        let session = PrinterSession::new();
        let err = session.device(JobPhase::Connect).err().unwrap();
        assert_eq!(err.error_code(), ErrorCode::Illegal);
        assert_eq!(err.context, JobPhase::Connect);
    }
}
