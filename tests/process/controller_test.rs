//! Tests for the process controller lifecycle and output delivery.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cli_driver::process::{
    ControllerState, LaunchConfig, ProcessController, ProcessExit, RunHandlers, RunOutput,
    RunRequest, SpawnError, TerminationReason,
};
use tokio::sync::oneshot;

/// Owned copy of what the completion callback saw.
#[derive(Debug)]
struct Finished {
    exit: ProcessExit,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    owner_dropped: bool,
}

fn shell() -> ProcessController {
    ProcessController::new(LaunchConfig::new("/bin/sh"))
}

fn script(body: &str) -> RunRequest {
    RunRequest {
        arguments: vec!["-c".to_string(), body.to_string()],
        ..RunRequest::default()
    }
}

fn on_finish(handlers: RunHandlers) -> (RunHandlers, oneshot::Receiver<Finished>) {
    let (tx, rx) = oneshot::channel();
    let handlers = RunHandlers {
        on_completion: Some(Box::new(move |output: RunOutput<'_>| {
            let _ = tx.send(Finished {
                exit: output.exit,
                stdout: output.stdout.to_vec(),
                stderr: output.stderr.to_vec(),
                owner_dropped: output.owner_dropped,
            });
        })),
        ..handlers
    };
    (handlers, rx)
}

async fn wait(rx: oneshot::Receiver<Finished>) -> Finished {
    tokio::time::timeout(Duration::from_secs(10), rx)
        .await
        .expect("completion did not arrive in time")
        .expect("completion callback was dropped")
}

#[tokio::test]
async fn sinks_equal_concatenated_chunks() {
    let mut controller = shell();
    let out_chunks = Arc::new(Mutex::new(Vec::new()));
    let err_chunks = Arc::new(Mutex::new(Vec::new()));

    let out = Arc::clone(&out_chunks);
    let err = Arc::clone(&err_chunks);
    let seen_out = Arc::clone(&out_chunks);
    let seen_err = Arc::clone(&err_chunks);

    let (tx, rx) = oneshot::channel();
    let handlers = RunHandlers {
        on_stdout: Some(Box::new(move |bytes: &[u8]| {
            out.lock().unwrap().extend_from_slice(bytes);
        })),
        on_stderr: Some(Box::new(move |bytes: &[u8]| {
            err.lock().unwrap().extend_from_slice(bytes);
        })),
        on_completion: Some(Box::new(move |output: RunOutput<'_>| {
            // Everything delivered as chunks must already be in the sinks.
            let delivered_out = seen_out.lock().unwrap().clone();
            let delivered_err = seen_err.lock().unwrap().clone();
            let _ = tx.send((
                output.stdout == delivered_out.as_slice(),
                output.stderr == delivered_err.as_slice(),
                output.stdout.to_vec(),
                output.stderr.to_vec(),
            ));
        })),
    };

    controller
        .send(
            script("for i in 1 2 3 4 5; do echo out$i; echo err$i >&2; done"),
            handlers,
        )
        .await
        .unwrap();

    let (out_matches, err_matches, stdout, stderr) =
        tokio::time::timeout(Duration::from_secs(10), rx)
            .await
            .unwrap()
            .unwrap();

    assert!(out_matches);
    assert!(err_matches);
    assert_eq!(stdout, b"out1\nout2\nout3\nout4\nout5\n");
    assert_eq!(stderr, b"err1\nerr2\nerr3\nerr4\nerr5\n");
}

#[tokio::test]
async fn completion_fires_exactly_once() {
    let mut controller = shell();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let (tx, rx) = oneshot::channel();
    let handlers = RunHandlers {
        on_completion: Some(Box::new(move |_: RunOutput<'_>| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(());
        })),
        ..RunHandlers::default()
    };

    controller.send(script("echo once"), handlers).await.unwrap();
    tokio::time::timeout(Duration::from_secs(10), rx)
        .await
        .unwrap()
        .unwrap();

    controller.shutdown().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(controller.state(), ControllerState::Idle);
}

#[tokio::test]
async fn output_written_just_before_exit_is_not_lost() {
    let mut controller = shell();
    let (handlers, rx) = on_finish(RunHandlers::default());

    controller
        .send(script("printf tail; printf last >&2; exit 3"), handlers)
        .await
        .unwrap();
    let finished = wait(rx).await;

    assert_eq!(finished.stdout, b"tail");
    assert_eq!(finished.stderr, b"last");
    assert_eq!(finished.exit.status, 3);
    assert_eq!(finished.exit.reason, TerminationReason::Exit);
    assert!(!finished.owner_dropped);
}

#[tokio::test]
async fn large_output_is_fully_drained() {
    let mut controller = shell();
    let (handlers, rx) = on_finish(RunHandlers::default());

    controller
        .send(script("head -c 262144 /dev/zero; echo done >&2"), handlers)
        .await
        .unwrap();
    let finished = wait(rx).await;

    assert_eq!(finished.stdout.len(), 262_144);
    assert!(finished.stdout.iter().all(|b| *b == 0));
    assert_eq!(finished.stderr, b"done\n");
    assert_eq!(finished.exit.status, 0);
}

#[tokio::test]
async fn second_send_terminates_first_run() {
    let mut controller = shell();

    let (first, mut first_rx) = on_finish(RunHandlers::default());
    controller.send(script("exec sleep 5"), first).await.unwrap();
    assert!(controller.is_running());
    assert_eq!(controller.state(), ControllerState::Running);

    let (second, second_rx) = on_finish(RunHandlers::default());
    let started = std::time::Instant::now();
    controller.send(script("echo second"), second).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(4));

    // The first run was stopped and drained before the second spawned.
    let first = first_rx.try_recv().expect("first run should have completed");
    assert_eq!(first.exit.reason, TerminationReason::UncaughtSignal);
    assert_eq!(first.exit.status, 15);

    let second = wait(second_rx).await;
    assert_eq!(second.stdout, b"second\n");
    assert!(second.stderr.is_empty());
    assert_eq!(controller.run_count(), 2);
}

#[tokio::test]
async fn sinks_are_reset_between_runs() {
    let mut controller = shell();

    let (handlers, rx) = on_finish(RunHandlers::default());
    controller.send(script("echo first"), handlers).await.unwrap();
    assert_eq!(wait(rx).await.stdout, b"first\n");

    let (handlers, rx) = on_finish(RunHandlers::default());
    controller.send(script("echo again"), handlers).await.unwrap();
    assert_eq!(wait(rx).await.stdout, b"again\n");
}

#[tokio::test]
async fn terminate_when_idle_is_noop() {
    let controller = shell();
    controller.terminate();
    controller.terminate();
    assert_eq!(controller.state(), ControllerState::Idle);
    assert!(!controller.is_running());
}

#[tokio::test]
async fn terminate_funnels_through_completion() {
    let mut controller = shell();
    let (handlers, rx) = on_finish(RunHandlers::default());

    controller.send(script("exec sleep 5"), handlers).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = std::time::Instant::now();
    controller.terminate();
    let finished = wait(rx).await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(finished.exit.reason, TerminationReason::UncaughtSignal);
    assert_eq!(finished.exit.status, 15);
}

#[tokio::test]
async fn ignored_sigterm_escalates_to_kill() {
    let mut launch = LaunchConfig::new("/bin/sh");
    launch.terminate_grace = Duration::from_millis(200);
    let mut controller = ProcessController::new(launch);
    let (handlers, rx) = on_finish(RunHandlers::default());

    controller
        .send(script("trap '' TERM; exec sleep 5"), handlers)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    controller.terminate();
    controller.shutdown().await;
    let finished = wait(rx).await;

    assert_eq!(finished.exit.reason, TerminationReason::UncaughtSignal);
    assert_eq!(finished.exit.status, 9);
}

#[tokio::test]
async fn spawn_failure_reports_synchronously() {
    let mut controller = ProcessController::new(LaunchConfig::new("/nonexistent/cli-driver-bin"));
    let (handlers, rx) = on_finish(RunHandlers::default());

    let result = controller.send(RunRequest::default(), handlers).await;

    assert!(matches!(result, Err(SpawnError::NotFound)));
    assert_eq!(controller.state(), ControllerState::Idle);
    assert_eq!(controller.run_count(), 0);
    assert!(!controller.is_running());
    // The completion callback was dropped without being called.
    assert!(rx.await.is_err());
}

#[tokio::test]
async fn state_transitions_are_observable() {
    let mut controller = shell();
    let mut states = controller.subscribe_state();
    assert_eq!(*states.borrow(), ControllerState::Idle);

    let (handlers, rx) = on_finish(RunHandlers::default());
    controller.send(script("exec sleep 5"), handlers).await.unwrap();
    assert_eq!(*states.borrow_and_update(), ControllerState::Running);

    controller.terminate();
    wait(rx).await;
    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|state| *state == ControllerState::Idle),
    )
    .await
    .unwrap()
    .unwrap();
}

#[tokio::test]
async fn dropping_controller_reports_owner_dropped() {
    let mut controller = shell();
    let (handlers, rx) = on_finish(RunHandlers::default());
    controller.send(script("exec sleep 5"), handlers).await.unwrap();

    drop(controller);
    let finished = wait(rx).await;

    assert!(finished.owner_dropped);
    assert_eq!(finished.exit.reason, TerminationReason::UncaughtSignal);
}

#[tokio::test]
async fn grandchild_holding_pipes_does_not_delay_completion() {
    let mut launch = LaunchConfig::new("/bin/sh");
    launch.drain_window = Duration::from_millis(200);
    let mut controller = ProcessController::new(launch);
    let (handlers, rx) = on_finish(RunHandlers::default());

    // Not exec'd: the shell forks `sleep`, which inherits both pipes.
    controller
        .send(script("echo before; sleep 5; echo after"), handlers)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = std::time::Instant::now();
    controller.terminate();
    let finished = wait(rx).await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(finished.exit.reason, TerminationReason::UncaughtSignal);
    assert_eq!(finished.exit.status, 15);
    assert_eq!(finished.stdout, b"before\n");
    assert_eq!(controller.state(), ControllerState::Idle);
}

#[tokio::test]
async fn background_job_output_before_exit_is_kept() {
    let mut launch = LaunchConfig::new("/bin/sh");
    launch.drain_window = Duration::from_millis(200);
    let mut controller = ProcessController::new(launch);

    let started = std::time::Instant::now();
    let (handlers, rx) = on_finish(RunHandlers::default());
    controller
        .send(script("sleep 3 & echo started; echo warn >&2"), handlers)
        .await
        .unwrap();
    let finished = wait(rx).await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(finished.exit.reason, TerminationReason::Exit);
    assert_eq!(finished.exit.status, 0);
    assert_eq!(finished.stdout, b"started\n");
    assert_eq!(finished.stderr, b"warn\n");

    // The slot is free again right away.
    let (handlers, rx) = on_finish(RunHandlers::default());
    controller.send(script("echo next"), handlers).await.unwrap();
    assert_eq!(wait(rx).await.stdout, b"next\n");
    assert!(started.elapsed() < Duration::from_secs(2));
}
