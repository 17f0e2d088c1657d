// src/main.rs - printer-host entry point
use clap::{Parser, Subcommand};
use receipt_rs::hardware::{device_factory, diagnostics_for};
use receipt_rs::{HostError, ResultSink, SessionCoordinator};
use receipt_shared::api_models::{AvailabilityResponse, PrintRequest};
use receipt_shared::config::{self, Config, Transport};
use std::path::Path;
use std::sync::Arc;

/// Receipt printer host
#[derive(Parser, Debug)]
#[command(name = "printer-host", about = "Serializes print jobs onto a single receipt printer.")]
struct Cli {
    /// Path to a TOML config file; defaults apply when it does not exist
    #[arg(short, long, global = true, default_value = "printer.toml")]
    config: String,

    /// Use the simulated printer regardless of the configured transport
    #[arg(long, global = true)]
    simulate: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API
    Serve,
    /// Print one receipt and wait for the result
    Print { text: String },
    /// Probe printer availability
    Status,
}

fn load(cli: &Cli) -> Result<Config, HostError> {
    let mut config = if Path::new(&cli.config).exists() {
        tracing::info!("Loading configuration from: {}", cli.config);
        config::load_config(&cli.config)?
    } else {
        tracing::info!("No config at '{}', using defaults", cli.config);
        Config::default()
    };
    if cli.simulate {
        config.printer.transport = Transport::Simulated;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = load(&cli)?;
    tracing::info!(
        "Printer: {} ({} at {})",
        config.printer.name.as_deref().unwrap_or("Unknown"),
        config.printer.model,
        config.printer.target
    );

    let coordinator = SessionCoordinator::builder(config.clone(), device_factory(&config.printer))
        .diagnostics(diagnostics_for(&config.printer))
        .build()?;

    let outcome = match cli.command {
        Command::Serve => receipt_rs::web::serve(&config.web.listen, Arc::new(coordinator.clone()))
            .await
            .map_err(HostError::from),
        Command::Print { text } => print_once(&coordinator, text).await,
        Command::Status => match coordinator.availability().await {
            Ok(status) => {
                println!("{}", serde_json::to_string(&AvailabilityResponse::from(status))?);
                Ok(())
            }
            Err(e) => Err(HostError::Job(e)),
        },
    };
    coordinator.shutdown().await;
    outcome?;
    Ok(())
}

async fn print_once(coordinator: &SessionCoordinator, text: String) -> Result<(), HostError> {
    let (sink, result) = ResultSink::channel();
    let job_id = receipt_rs::PrinterService::submit_print_job(coordinator, PrintRequest { text }, sink);
    tracing::debug!(%job_id, "Submitted");
    let receipt = result.await.map_err(|_| HostError::ResultDropped)??;
    match serde_json::to_string_pretty(&receipt) {
        Ok(json) => println!("{}", json),
        Err(e) => tracing::warn!("Cannot render receipt: {}", e),
    }
    Ok(())
}
