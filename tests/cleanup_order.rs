//! Teardown ordering and recovery from a failed teardown.

use receipt_rs::hardware::simulated::{CompletionBehavior, DeviceOp, SimulatedFactory, SimulatedPrinter};
use receipt_rs::SessionCoordinator;
use receipt_shared::config::Config;
use receipt_shared::{DeviceFactory, ErrorCode, Job, JobStatus, ResultSink, SendOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

fn coordinator(printer: &Arc<SimulatedPrinter>) -> SessionCoordinator {
    let mut config = Config::default();
    config.session.connect_backoff_ms = 5;
    config.session.completion_timeout_ms = 5_000;
    let factory: Arc<dyn DeviceFactory> = SimulatedFactory::new(printer.clone());
    SessionCoordinator::new(config, factory).unwrap()
}

#[tokio::test]
async fn teardown_step_failure_still_runs_the_rest_and_resets_next_job() {
    for failing in [DeviceOp::EndTransaction, DeviceOp::Disconnect, DeviceOp::ClearBuffer] {
        let printer = SimulatedPrinter::new();
        printer.set_completion(CompletionBehavior::Never);
        let coordinator = coordinator(&printer);

        let (sink, rx) = ResultSink::channel();
        let id = coordinator.submit(Job::new("receipt", sink));
        while printer.last_job().is_none() {
            sleep(Duration::from_millis(2)).await;
        }

        // Only teardown sees the fault; preparation already succeeded.
        printer.fail(failing, ErrorCode::Failure);
        printer.clear_calls();
        printer.fire_completion(SendOutcome { job_id: id, result: Ok(()) });
        let receipt = timeout(Duration::from_secs(5), rx).await.unwrap().unwrap().unwrap();
        assert_eq!(receipt.status, JobStatus::Printed);
        assert_eq!(
            printer.calls(),
            vec![DeviceOp::EndTransaction, DeviceOp::Disconnect, DeviceOp::ClearBuffer],
            "teardown order with {:?} failing",
            failing
        );
        assert_eq!(coordinator.lock_stats().outstanding(), 0);

        // A handle whose teardown failed is reset before it is used again.
        printer.clear_faults();
        printer.clear_calls();
        printer.set_completion(CompletionBehavior::Complete {
            after: Duration::from_millis(5),
            code: ErrorCode::Success,
        });
        let (sink, rx) = ResultSink::channel();
        coordinator.submit(Job::new("after reset", sink));
        timeout(Duration::from_secs(5), rx).await.unwrap().unwrap().unwrap();
        let calls = printer.calls();
        let create = calls.iter().position(|op| *op == DeviceOp::Create).unwrap();
        assert!(calls[..create].contains(&DeviceOp::Disconnect), "{:?}", calls);
        assert_eq!(calls[create + 1], DeviceOp::Connect);
    }
}
