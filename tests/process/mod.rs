//! Process module tests.

mod controller_test;

/// Verify the public process types are exported from the library.
#[test]
fn test_all_process_types_exported() {
    use cli_driver::process::{
        ByteSink, ControllerState, LaunchConfig, ProcessController, ProcessExit, RunEvent,
        RunHandlers, RunRequest, SinkPair, SpawnError, StreamKind, TerminationReason,
        DEFAULT_DRAIN_WINDOW, DEFAULT_TERMINATE_GRACE, PUMP_BUFFER_SIZE,
    };

    let controller = ProcessController::new(LaunchConfig::new("/bin/true"));
    assert_eq!(controller.state(), ControllerState::Idle);
    assert_eq!(controller.launch().terminate_grace, DEFAULT_TERMINATE_GRACE);
    assert_eq!(controller.launch().drain_window, DEFAULT_DRAIN_WINDOW);

    let _ = RunHandlers::default();
    let _ = RunRequest::default();
    let _ = SinkPair::default();
    let _ = ByteSink::new();
    let _: fn() -> SpawnError = || SpawnError::NotFound;
    let _ = RunEvent::Closed {
        stream: StreamKind::Stdout,
    };
    assert_eq!(ProcessExit::abnormal().reason, TerminationReason::UncaughtSignal);
    assert!(PUMP_BUFFER_SIZE > 0);
}
