// src/diagnostics.rs - Optional attachment merged into connection-phase errors
use serde_json::{Map, Value, json};

/// Collects device presence/permission details. The coordinator merges the
/// result into error records verbatim and never interprets it.
pub trait DiagnosticsCollector: Send + Sync {
    fn collect(&self) -> Map<String, Value>;
}

#[derive(Debug, Clone, Default)]
pub struct NoDiagnostics;

impl DiagnosticsCollector for NoDiagnostics {
    fn collect(&self) -> Map<String, Value> {
        Map::new()
    }
}

/// Reports which serial ports exist and whether the configured one is among them.
#[derive(Debug, Clone)]
pub struct SerialPortDiagnostics {
    configured_port: String,
}

impl SerialPortDiagnostics {
    pub fn new(configured_port: impl Into<String>) -> Self {
        Self { configured_port: configured_port.into() }
    }
}

impl DiagnosticsCollector for SerialPortDiagnostics {
    fn collect(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("configuredPort".to_string(), json!(self.configured_port));
        match serial2_tokio::SerialPort::available_ports() {
            Ok(ports) => {
                let ports: Vec<String> = ports.iter().map(|p| p.display().to_string()).collect();
                let present = ports.iter().any(|p| p == &self.configured_port);
                map.insert("portPresent".to_string(), json!(present));
                map.insert("availablePorts".to_string(), json!(ports));
            }
            Err(e) => {
                map.insert("enumerationError".to_string(), json!(e.to_string()));
            }
        }
        map
    }
}
