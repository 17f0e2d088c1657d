// receipt_shared: shared types for the printer host, its drivers, and the web bridge

pub mod api_models;
pub mod config;
pub mod device_interface;
pub mod error_catalog;
pub mod print_job;

pub use device_interface::{
    CompletionHandler, DeviceFactory, DeviceFault, DeviceStatus, DrawCommand, PrinterDevice,
    SendOutcome,
};
pub use error_catalog::{ErrorClass, ErrorCode, describe};
pub use print_job::{ErrorInfo, Job, JobId, JobPhase, JobReceipt, JobResult, JobStatus, ResultSink};
