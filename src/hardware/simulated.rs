// src/hardware/simulated.rs - Fault-injecting stand-in for a receipt printer
//
// Completions are delivered from a plain OS thread, the way a vendor driver
// reports them from a thread the host does not own.

use async_trait::async_trait;
use rand::Rng;
use receipt_shared::config::PrinterConfig;
use receipt_shared::{
    CompletionHandler, DeviceFactory, DeviceFault, DeviceStatus, DrawCommand, ErrorCode, JobId,
    PrinterDevice, SendOutcome,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Operations recorded in the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceOp {
    Create,
    Connect,
    Disconnect,
    Status,
    BeginTransaction,
    EndTransaction,
    ClearBuffer,
    AddCommands,
    SendData,
    ForceRecover,
}

/// How the device reports completion of an accepted send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionBehavior {
    /// Report `code` after `after`. `ErrorCode::Success` reports success.
    Complete { after: Duration, code: ErrorCode },
    /// Report after a random delay in `min..max`.
    Jittered { min: Duration, max: Duration },
    /// Hang: never report.
    Never,
}

#[derive(Debug)]
struct SimState {
    connected: bool,
    in_transaction: bool,
    online: bool,
    buffer: Vec<DrawCommand>,
    printed: Vec<Vec<DrawCommand>>,
    calls: Vec<DeviceOp>,
    faults: HashMap<DeviceOp, ErrorCode>,
    connect_script: VecDeque<ErrorCode>,
    completion: CompletionBehavior,
    open_transactions: usize,
    max_open_transactions: usize,
    last_job: Option<JobId>,
}

pub struct SimulatedPrinter {
    state: Mutex<SimState>,
    handler: Mutex<Option<CompletionHandler>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimulatedPrinter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SimState {
                connected: false,
                in_transaction: false,
                online: true,
                buffer: Vec::new(),
                printed: Vec::new(),
                calls: Vec::new(),
                faults: HashMap::new(),
                connect_script: VecDeque::new(),
                completion: CompletionBehavior::Complete {
                    after: Duration::from_millis(20),
                    code: ErrorCode::Success,
                },
                open_transactions: 0,
                max_open_transactions: 0,
                last_job: None,
            }),
            handler: Mutex::new(None),
        })
    }

    /// Every future call of `op` fails with `code`.
    pub fn fail(&self, op: DeviceOp, code: ErrorCode) {
        lock(&self.state).faults.insert(op, code);
    }

    pub fn clear_faults(&self) {
        lock(&self.state).faults.clear();
    }

    /// Outcomes of the next connect attempts, consumed one per attempt.
    pub fn script_connect(&self, outcomes: impl IntoIterator<Item = ErrorCode>) {
        lock(&self.state).connect_script.extend(outcomes);
    }

    pub fn set_online(&self, online: bool) {
        lock(&self.state).online = online;
    }

    pub fn set_completion(&self, completion: CompletionBehavior) {
        lock(&self.state).completion = completion;
    }

    pub fn calls(&self) -> Vec<DeviceOp> {
        lock(&self.state).calls.clone()
    }

    pub fn count(&self, op: DeviceOp) -> usize {
        lock(&self.state).calls.iter().filter(|c| **c == op).count()
    }

    pub fn clear_calls(&self) {
        lock(&self.state).calls.clear();
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    pub fn in_transaction(&self) -> bool {
        lock(&self.state).in_transaction
    }

    /// Highest number of transactions that were open at the same time.
    pub fn max_open_transactions(&self) -> usize {
        lock(&self.state).max_open_transactions
    }

    pub fn printed(&self) -> Vec<Vec<DrawCommand>> {
        lock(&self.state).printed.clone()
    }

    pub fn last_job(&self) -> Option<JobId> {
        lock(&self.state).last_job
    }

    pub fn has_handler(&self) -> bool {
        lock(&self.handler).is_some()
    }

    /// Delivers a completion by hand, e.g. a late callback after a timeout.
    pub fn fire_completion(&self, outcome: SendOutcome) {
        let handler = lock(&self.handler).clone();
        if let Some(handler) = handler {
            handler(outcome);
        }
    }

    /// Records the call and returns the injected fault for it, if any.
    fn enter(&self, op: DeviceOp) -> Result<MutexGuard<'_, SimState>, DeviceFault> {
        let mut state = lock(&self.state);
        state.calls.push(op);
        if let Some(code) = state.faults.get(&op).copied() {
            return Err(DeviceFault::with_detail(code, format!("injected {:?} fault", op)));
        }
        Ok(state)
    }
}

#[async_trait]
impl PrinterDevice for SimulatedPrinter {
    async fn connect(&self, target: &str, _timeout: Duration) -> Result<(), DeviceFault> {
        let mut state = self.enter(DeviceOp::Connect)?;
        if let Some(code) = state.connect_script.pop_front() {
            if code != ErrorCode::Success {
                return Err(DeviceFault::with_detail(code, "scripted connect failure"));
            }
        }
        if state.connected {
            return Err(DeviceFault::new(ErrorCode::AlreadyOpened));
        }
        state.connected = true;
        tracing::debug!("Simulated printer connected at {}", target);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DeviceFault> {
        let mut state = self.enter(DeviceOp::Disconnect)?;
        state.connected = false;
        state.in_transaction = false;
        state.open_transactions = 0;
        Ok(())
    }

    async fn status(&self) -> Result<DeviceStatus, DeviceFault> {
        let state = self.enter(DeviceOp::Status)?;
        Ok(DeviceStatus {
            connected: state.connected,
            online: state.connected && state.online,
        })
    }

    async fn begin_transaction(&self) -> Result<(), DeviceFault> {
        let mut state = self.enter(DeviceOp::BeginTransaction)?;
        if !state.connected {
            return Err(DeviceFault::new(ErrorCode::Illegal));
        }
        state.in_transaction = true;
        state.open_transactions += 1;
        state.max_open_transactions = state.max_open_transactions.max(state.open_transactions);
        Ok(())
    }

    async fn end_transaction(&self) -> Result<(), DeviceFault> {
        let mut state = self.enter(DeviceOp::EndTransaction)?;
        state.in_transaction = false;
        state.open_transactions = state.open_transactions.saturating_sub(1);
        Ok(())
    }

    async fn clear_command_buffer(&self) -> Result<(), DeviceFault> {
        let mut state = self.enter(DeviceOp::ClearBuffer)?;
        state.buffer.clear();
        Ok(())
    }

    async fn add_commands(&self, commands: &[DrawCommand]) -> Result<(), DeviceFault> {
        let mut state = self.enter(DeviceOp::AddCommands)?;
        state.buffer.extend_from_slice(commands);
        Ok(())
    }

    async fn send_data(&self, job_id: JobId, _timeout: Duration) -> Result<(), DeviceFault> {
        let completion = {
            let mut state = self.enter(DeviceOp::SendData)?;
            if !state.connected {
                return Err(DeviceFault::new(ErrorCode::Illegal));
            }
            let data = std::mem::take(&mut state.buffer);
            state.printed.push(data);
            state.last_job = Some(job_id);
            state.completion
        };

        let (after, result) = match completion {
            CompletionBehavior::Never => return Ok(()),
            CompletionBehavior::Complete { after, code } => {
                let result = if code == ErrorCode::Success {
                    Ok(())
                } else {
                    Err(DeviceFault::new(code))
                };
                (after, result)
            }
            CompletionBehavior::Jittered { min, max } => {
                let millis = rand::rng().random_range(min.as_millis() as u64..=max.as_millis() as u64);
                (Duration::from_millis(millis), Ok(()))
            }
        };
        if let Some(handler) = lock(&self.handler).clone() {
            std::thread::spawn(move || {
                std::thread::sleep(after);
                handler(SendOutcome { job_id, result });
            });
        }
        Ok(())
    }

    async fn force_recover(&self, _timeout: Duration) -> Result<(), DeviceFault> {
        let mut state = self.enter(DeviceOp::ForceRecover)?;
        state.buffer.clear();
        Ok(())
    }

    fn set_completion_handler(&self, handler: Option<CompletionHandler>) {
        *lock(&self.handler) = handler;
    }
}

/// Hands out the same simulated printer on every `create`, so tests can
/// inspect it across session resets.
pub struct SimulatedFactory {
    device: Arc<SimulatedPrinter>,
    create_fault: Mutex<Option<ErrorCode>>,
}

impl SimulatedFactory {
    pub fn new(device: Arc<SimulatedPrinter>) -> Arc<Self> {
        Arc::new(Self {
            device,
            create_fault: Mutex::new(None),
        })
    }

    pub fn device(&self) -> Arc<SimulatedPrinter> {
        self.device.clone()
    }

    pub fn fail_create(&self, code: Option<ErrorCode>) {
        *lock(&self.create_fault) = code;
    }
}

impl DeviceFactory for SimulatedFactory {
    fn create(&self, config: &PrinterConfig) -> Result<Arc<dyn PrinterDevice>, DeviceFault> {
        lock(&self.device.state).calls.push(DeviceOp::Create);
        if let Some(code) = *lock(&self.create_fault) {
            return Err(DeviceFault::with_detail(code, format!("cannot create {}", config.model)));
        }
        Ok(self.device.clone())
    }
}
