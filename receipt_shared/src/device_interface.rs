// Trait-based seam between the session core and a concrete printer driver.

use crate::config::PrinterConfig;
use crate::error_catalog::ErrorCode;
use crate::print_job::JobId;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A fault reported by the driver. Translated to an `ErrorInfo` by the
/// session layer at the point where it occurs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}{}", detail_suffix(.detail))]
pub struct DeviceFault {
    pub code: ErrorCode,
    pub detail: Option<String>,
}

impl DeviceFault {
    pub fn new(code: ErrorCode) -> Self {
        Self { code, detail: None }
    }

    pub fn with_detail(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self { code, detail: Some(detail.into()) }
    }
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail.as_deref().map(|d| format!(": {}", d)).unwrap_or_default()
}

impl From<ErrorCode> for DeviceFault {
    fn from(code: ErrorCode) -> Self {
        DeviceFault::new(code)
    }
}

/// Live status as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStatus {
    pub connected: bool,
    /// Ready to print: paper loaded, cover closed, no error latched.
    pub online: bool,
}

impl DeviceStatus {
    pub fn ready() -> Self {
        Self { connected: true, online: true }
    }

    pub fn disconnected() -> Self {
        Self { connected: false, online: false }
    }
}

/// Drawing commands as produced by the markup renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrawCommand {
    Text(String),
    Bold(bool),
    Feed(u8),
    Cut,
}

/// Asynchronous completion of a dispatched send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub job_id: JobId,
    pub result: Result<(), DeviceFault>,
}

/// Session-scoped completion handler. Drivers may invoke it from any thread,
/// including threads they own.
pub type CompletionHandler = Arc<dyn Fn(SendOutcome) + Send + Sync + 'static>;

#[async_trait]
pub trait PrinterDevice: Send + Sync {
    async fn connect(&self, target: &str, timeout: Duration) -> Result<(), DeviceFault>;
    async fn disconnect(&self) -> Result<(), DeviceFault>;
    async fn status(&self) -> Result<DeviceStatus, DeviceFault>;
    async fn begin_transaction(&self) -> Result<(), DeviceFault>;
    async fn end_transaction(&self) -> Result<(), DeviceFault>;
    async fn clear_command_buffer(&self) -> Result<(), DeviceFault>;
    async fn add_commands(&self, commands: &[DrawCommand]) -> Result<(), DeviceFault>;
    /// Accepts or rejects the buffered data synchronously. Completion is
    /// reported later through the registered `CompletionHandler`.
    async fn send_data(&self, job_id: JobId, timeout: Duration) -> Result<(), DeviceFault>;
    /// Vendor escape hatch for a device that stopped responding entirely.
    async fn force_recover(&self, timeout: Duration) -> Result<(), DeviceFault>;
    fn set_completion_handler(&self, handler: Option<CompletionHandler>);
}

/// Creates device handles ("initialize").
pub trait DeviceFactory: Send + Sync {
    fn create(&self, config: &PrinterConfig) -> Result<Arc<dyn PrinterDevice>, DeviceFault>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_display_includes_detail_when_present() {
        let fault = DeviceFault::with_detail(ErrorCode::Connect, "port busy");
        assert_eq!(fault.to_string(), "Failed to connect to the printer (2): port busy");
        let bare = DeviceFault::from(ErrorCode::Timeout);
        assert_eq!(bare.to_string(), "Printer communication timed out (3)");
    }
}
