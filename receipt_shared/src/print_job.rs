use crate::error_catalog::{self, ErrorCode, NOT_READY_CODE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;
use tokio::sync::oneshot;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// The step of a job (or probe) in which an error was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobPhase {
    AcquireLock,
    Render,
    Initialize,
    Connect,
    ClearBuffer,
    CheckStatus,
    BeginTransaction,
    AddCommands,
    SendData,
    PrintCallback,
    CallbackTimeout,
    Cleanup,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::AcquireLock => "acquireLock",
            JobPhase::Render => "render",
            JobPhase::Initialize => "initialize",
            JobPhase::Connect => "connect",
            JobPhase::ClearBuffer => "clearBuffer",
            JobPhase::CheckStatus => "checkStatus",
            JobPhase::BeginTransaction => "beginTransaction",
            JobPhase::AddCommands => "addCommands",
            JobPhase::SendData => "sendData",
            JobPhase::PrintCallback => "printCallback",
            JobPhase::CallbackTimeout => "callbackTimeout",
            JobPhase::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level fields of a serialized `ErrorInfo`.
const RESERVED_KEYS: [&str; 3] = ["code", "message", "context"];

/// Error record delivered to a caller. Device faults never cross the job
/// boundary in any other shape.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{context}: {message} (code {code})")]
pub struct ErrorInfo {
    pub code: i32,
    pub message: String,
    pub context: JobPhase,
    /// Opaque attachment from the diagnostics collaborator, merged into the
    /// record as-is.
    #[serde(flatten)]
    pub diagnostics: Map<String, Value>,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, context: JobPhase) -> Self {
        Self {
            code: code.code(),
            message: code.describe(),
            context,
            diagnostics: Map::new(),
        }
    }

    pub fn not_ready(context: JobPhase) -> Self {
        Self {
            code: NOT_READY_CODE,
            message: error_catalog::describe(NOT_READY_CODE),
            context,
            diagnostics: Map::new(),
        }
    }

    pub fn busy() -> Self {
        Self::new(ErrorCode::Processing, JobPhase::AcquireLock)
    }

    pub fn with_detail(mut self, detail: impl fmt::Display) -> Self {
        self.message = format!("{}: {}", self.message, detail);
        self
    }

    /// Merges `diagnostics` into the record. Keys that would shadow the
    /// record's own fields are dropped.
    pub fn with_diagnostics(mut self, diagnostics: Map<String, Value>) -> Self {
        for (key, value) in diagnostics {
            if RESERVED_KEYS.contains(&key.as_str()) {
                tracing::debug!("Dropping diagnostics key '{}': reserved by the error record", key);
                continue;
            }
            self.diagnostics.insert(key, value);
        }
        self
    }

    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::from_code(self.code)
    }

    pub fn is_busy(&self) -> bool {
        self.context == JobPhase::AcquireLock && self.code == ErrorCode::Processing.code()
    }

    /// A completion-race timeout: forced recovery ran and physical output
    /// should be re-verified.
    pub fn is_completion_timeout(&self) -> bool {
        self.context == JobPhase::CallbackTimeout
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// The device confirmed completion.
    Printed,
    /// The device accepted the data; completion was not awaited.
    Sent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReceipt {
    pub status: JobStatus,
    pub message: String,
    pub job_id: JobId,
}

impl JobReceipt {
    pub fn printed(job_id: JobId) -> Self {
        Self { status: JobStatus::Printed, message: "Print completed".to_string(), job_id }
    }

    pub fn sent(job_id: JobId) -> Self {
        Self { status: JobStatus::Sent, message: "Print data sent".to_string(), job_id }
    }
}

pub type JobResult = Result<JobReceipt, ErrorInfo>;

/// Where a job's terminal result goes. Consumed on delivery, so a sink can
/// be notified at most once.
pub struct ResultSink {
    deliver: Box<dyn FnOnce(JobResult) + Send + 'static>,
}

impl ResultSink {
    pub fn new<F>(deliver: F) -> Self
    where
        F: FnOnce(JobResult) + Send + 'static,
    {
        Self { deliver: Box::new(deliver) }
    }

    pub fn channel() -> (Self, oneshot::Receiver<JobResult>) {
        let (tx, rx) = oneshot::channel();
        let sink = Self::new(move |result| {
            if tx.send(result).is_err() {
                tracing::debug!("Result receiver dropped before delivery");
            }
        });
        (sink, rx)
    }

    pub fn deliver(self, result: JobResult) {
        (self.deliver)(result)
    }
}

impl fmt::Debug for ResultSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultSink").finish_non_exhaustive()
    }
}

/// One print request as consumed by the session coordinator.
#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    pub payload: String,
    pub sink: ResultSink,
    pub submitted_at: DateTime<Utc>,
}

impl Job {
    pub fn new(payload: impl Into<String>, sink: ResultSink) -> Self {
        Self {
            id: JobId::new(),
            payload: payload.into(),
            sink,
            submitted_at: Utc::now(),
        }
    }
}
