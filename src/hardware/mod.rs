// src/hardware/mod.rs - Printer drivers and transport selection
pub mod serial;
pub mod simulated;

use crate::diagnostics::{DiagnosticsCollector, NoDiagnostics, SerialPortDiagnostics};
use crate::hardware::serial::SerialFactory;
use crate::hardware::simulated::{CompletionBehavior, SimulatedFactory, SimulatedPrinter};
use receipt_shared::config::{PrinterConfig, Transport};
use receipt_shared::DeviceFactory;
use std::sync::Arc;
use std::time::Duration;

/// Picks the driver for the configured transport.
pub fn device_factory(config: &PrinterConfig) -> Arc<dyn DeviceFactory> {
    match config.transport {
        Transport::Serial => {
            tracing::info!("Using serial printer on {} @ {} baud", config.serial_port, config.baud);
            Arc::new(SerialFactory)
        }
        Transport::Simulated => {
            tracing::info!("Using simulated printer");
            let printer = SimulatedPrinter::new();
            printer.set_completion(CompletionBehavior::Jittered {
                min: Duration::from_millis(50),
                max: Duration::from_millis(400),
            });
            SimulatedFactory::new(printer)
        }
    }
}

/// Environment diagnostics matching the configured transport.
pub fn diagnostics_for(config: &PrinterConfig) -> Arc<dyn DiagnosticsCollector> {
    match config.transport {
        Transport::Serial => Arc::new(SerialPortDiagnostics::new(config.serial_port.clone())),
        Transport::Simulated => Arc::new(NoDiagnostics),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_transport_builds_a_working_device() {
        let factory = device_factory(&PrinterConfig::default());
        assert!(factory.create(&PrinterConfig::default()).is_ok());
        assert!(diagnostics_for(&PrinterConfig::default()).collect().is_empty());
    }
}
