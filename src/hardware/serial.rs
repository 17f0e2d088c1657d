// src/hardware/serial.rs - ESC/POS receipt printer on a point-to-point serial link
//
// Thin transport: the port is the connection, drawing commands are encoded
// into a local buffer, and `send_data` writes that buffer from a background
// task which reports completion through the session's handler.

use async_trait::async_trait;
use receipt_shared::config::PrinterConfig;
use receipt_shared::{
    CompletionHandler, DeviceFactory, DeviceFault, DeviceStatus, DrawCommand, ErrorCode, JobId,
    PrinterDevice, SendOutcome,
};
use serial2_tokio::SerialPort;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::timeout;

const ESC: u8 = 0x1B;
const GS: u8 = 0x1D;
const DLE: u8 = 0x10;
/// DLE EOT 1: real-time printer status.
const STATUS_REQUEST: [u8; 3] = [DLE, 0x04, 0x01];
/// Bit 3 of the printer status byte: offline.
const STATUS_OFFLINE: u8 = 0x08;
/// DLE ENQ 2: recover from a recoverable error and clear the receive buffer.
const RECOVER_REQUEST: [u8; 3] = [DLE, 0x05, 0x02];
/// ESC @: initialize printer.
const INITIALIZE: [u8; 2] = [ESC, b'@'];
const STATUS_TIMEOUT: Duration = Duration::from_millis(500);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Encodes drawing commands as ESC/POS bytes.
pub fn encode(commands: &[DrawCommand], out: &mut Vec<u8>) {
    for command in commands {
        match command {
            DrawCommand::Text(text) => out.extend_from_slice(text.as_bytes()),
            DrawCommand::Bold(on) => out.extend_from_slice(&[ESC, b'E', u8::from(*on)]),
            DrawCommand::Feed(lines) => out.extend_from_slice(&[ESC, b'd', *lines]),
            DrawCommand::Cut => out.extend_from_slice(&[GS, b'V', 0x42, 0x00]),
        }
    }
}

fn io_fault(e: io::Error, fallback: ErrorCode) -> DeviceFault {
    let code = match e.kind() {
        io::ErrorKind::NotFound => ErrorCode::NotFound,
        io::ErrorKind::PermissionDenied => ErrorCode::InUse,
        io::ErrorKind::TimedOut => ErrorCode::Timeout,
        _ => fallback,
    };
    DeviceFault::with_detail(code, e.to_string())
}

async fn write_all(port: &SerialPort, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        let n = port.write(data).await?;
        if n == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }
        data = &data[n..];
    }
    Ok(())
}

pub struct SerialPrinter {
    path: String,
    baud: u32,
    port: Mutex<Option<Arc<SerialPort>>>,
    buffer: Mutex<Vec<u8>>,
    in_transaction: AtomicBool,
    handler: Mutex<Option<CompletionHandler>>,
}

impl SerialPrinter {
    pub fn new(path: impl Into<String>, baud: u32) -> Self {
        Self {
            path: path.into(),
            baud,
            port: Mutex::new(None),
            buffer: Mutex::new(Vec::new()),
            in_transaction: AtomicBool::new(false),
            handler: Mutex::new(None),
        }
    }

    fn port(&self) -> Result<Arc<SerialPort>, DeviceFault> {
        lock(&self.port)
            .clone()
            .ok_or_else(|| DeviceFault::with_detail(ErrorCode::Illegal, "serial port not open"))
    }
}

#[async_trait]
impl PrinterDevice for SerialPrinter {
    async fn connect(&self, target: &str, timeout_after: Duration) -> Result<(), DeviceFault> {
        if lock(&self.port).is_some() {
            return Err(DeviceFault::new(ErrorCode::AlreadyOpened));
        }
        tracing::info!("Opening {} at {} baud (target {})", self.path, self.baud, target);
        let port = Arc::new(SerialPort::open(&self.path, self.baud).map_err(|e| io_fault(e, ErrorCode::Connect))?);
        match timeout(timeout_after, write_all(&port, &INITIALIZE)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(io_fault(e, ErrorCode::Connect)),
            Err(_) => return Err(DeviceFault::with_detail(ErrorCode::Timeout, "printer did not accept initialize")),
        }
        *lock(&self.port) = Some(port);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DeviceFault> {
        self.in_transaction.store(false, Ordering::SeqCst);
        if lock(&self.port).take().is_some() {
            tracing::debug!("Closed {}", self.path);
        }
        Ok(())
    }

    async fn status(&self) -> Result<DeviceStatus, DeviceFault> {
        let Ok(port) = self.port() else {
            return Ok(DeviceStatus::disconnected());
        };
        let request = async {
            write_all(&port, &STATUS_REQUEST).await?;
            let mut byte = [0u8; 1];
            let n = port.read(&mut byte).await?;
            if n == 0 {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
            }
            Ok::<u8, io::Error>(byte[0])
        };
        match timeout(STATUS_TIMEOUT, request).await {
            Ok(Ok(status)) => Ok(DeviceStatus {
                connected: true,
                online: status & STATUS_OFFLINE == 0,
            }),
            Ok(Err(e)) => Err(io_fault(e, ErrorCode::Failure)),
            Err(_) => Err(DeviceFault::with_detail(ErrorCode::Timeout, "no status reply")),
        }
    }

    async fn begin_transaction(&self) -> Result<(), DeviceFault> {
        self.port()?;
        self.in_transaction.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn end_transaction(&self) -> Result<(), DeviceFault> {
        self.in_transaction.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn clear_command_buffer(&self) -> Result<(), DeviceFault> {
        lock(&self.buffer).clear();
        Ok(())
    }

    async fn add_commands(&self, commands: &[DrawCommand]) -> Result<(), DeviceFault> {
        encode(commands, &mut lock(&self.buffer));
        Ok(())
    }

    async fn send_data(&self, job_id: JobId, timeout_after: Duration) -> Result<(), DeviceFault> {
        let port = self.port()?;
        if !self.in_transaction.load(Ordering::SeqCst) {
            return Err(DeviceFault::with_detail(ErrorCode::Illegal, "no open transaction"));
        }
        let data = std::mem::take(&mut *lock(&self.buffer));
        if data.is_empty() {
            return Err(DeviceFault::with_detail(ErrorCode::Param, "nothing to send"));
        }
        let handler = lock(&self.handler).clone();
        tokio::spawn(async move {
            let result = match timeout(timeout_after, write_all(&port, &data)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(io_fault(e, ErrorCode::Failure)),
                Err(_) => Err(DeviceFault::with_detail(ErrorCode::Timeout, "write timed out")),
            };
            match handler {
                Some(handler) => handler(SendOutcome { job_id, result }),
                None => tracing::warn!(%job_id, "Send finished with no completion handler"),
            }
        });
        Ok(())
    }

    async fn force_recover(&self, timeout_after: Duration) -> Result<(), DeviceFault> {
        let port = self.port()?;
        match timeout(timeout_after, write_all(&port, &RECOVER_REQUEST)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(io_fault(e, ErrorCode::Failure)),
            Err(_) => Err(DeviceFault::new(ErrorCode::Timeout)),
        }
    }

    fn set_completion_handler(&self, handler: Option<CompletionHandler>) {
        *lock(&self.handler) = handler;
    }
}

#[derive(Debug, Clone, Default)]
pub struct SerialFactory;

impl DeviceFactory for SerialFactory {
    fn create(&self, config: &PrinterConfig) -> Result<Arc<dyn PrinterDevice>, DeviceFault> {
        if config.serial_port.is_empty() {
            return Err(DeviceFault::with_detail(ErrorCode::Param, "no serial port configured"));
        }
        Ok(Arc::new(SerialPrinter::new(config.serial_port.clone(), config.baud)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_text_emphasis_feed_and_cut() {
        let mut out = Vec::new();
        encode(
            &[
                DrawCommand::Bold(true),
                DrawCommand::Text("Hi\n".to_string()),
                DrawCommand::Bold(false),
                DrawCommand::Feed(3),
                DrawCommand::Cut,
            ],
            &mut out,
        );
        assert_eq!(
            out,
            vec![ESC, b'E', 1, b'H', b'i', b'\n', ESC, b'E', 0, ESC, b'd', 3, GS, b'V', 0x42, 0]
        );
    }

    #[tokio::test]
    async fn missing_port_maps_to_not_found() {
        let printer = SerialPrinter::new("/dev/does-not-exist-receipt", 38400);
        let err = printer.connect("USB:", Duration::from_millis(100)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
        assert_eq!(printer.status().await.unwrap(), DeviceStatus::disconnected());
    }

    #[test]
    fn factory_requires_a_port() {
        let config = PrinterConfig { serial_port: String::new(), ..PrinterConfig::default() };
        let err = SerialFactory.create(&config).err().unwrap();
        assert_eq!(err.code, ErrorCode::Param);
    }
}
