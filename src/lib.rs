// receipt-rs: session coordinator for a single receipt printer
pub mod admission;
pub mod completion;
pub mod connection;
pub mod coordinator;
pub mod diagnostics;
pub mod hardware;
pub mod render;
pub mod session;
pub mod transaction;
pub mod web;

pub use coordinator::{PrinterService, SessionCoordinator, SessionCoordinatorBuilder};
pub use receipt_shared::config::{Config, ConfigError};
pub use receipt_shared::{ErrorCode, ErrorInfo, JobId, JobReceipt, JobResult, ResultSink};

use thiserror::Error;

/// Errors surfaced outside a job: startup, configuration and the CLI.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Print job failed: {0}")]
    Job(#[from] ErrorInfo),
    #[error("Job finished without delivering a result")]
    ResultDropped,
}
