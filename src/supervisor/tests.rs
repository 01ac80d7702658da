#![cfg(unix)]

use super::*;
use crate::config::SupervisorConfig;
use crate::error::LameduckError;
use crate::events::ShutdownEvent;
use async_trait::async_trait;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};

fn fast_config(timeout_seconds: u64) -> SupervisorConfig {
    SupervisorConfig {
        timeout_seconds,
        poll_interval_ms: 20,
        progress_interval_seconds: 1,
        kill_grace_seconds: 2,
        force_kill: true,
        ..SupervisorConfig::default()
    }
}

fn sh(script: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.to_string()]
}

/// Worker that ignores SIGTERM and otherwise sleeps
fn stubborn(secs: u32) -> Vec<String> {
    sh(&format!("trap '' TERM; exec sleep {}", secs))
}

struct FixedCount(usize);

#[async_trait]
impl OutstandingProbe for FixedCount {
    async fn outstanding(&self) -> Option<usize> {
        Some(self.0)
    }
}

#[tokio::test]
async fn test_cooperative_worker_exits_gracefully() {
    let (_tx, rx) = mpsc::channel(4);
    let command = vec!["sleep".to_string(), "30".to_string()];
    let mut supervisor = Supervisor::start_with_signals(&command, fast_config(5), rx).unwrap();

    assert_eq!(supervisor.state(), SupervisorState::Active);
    supervisor.on_signal(TermSignal::Term);
    assert_eq!(supervisor.state(), SupervisorState::Waiting);
    assert_eq!(
        supervisor.state_history(),
        &[
            SupervisorState::Active,
            SupervisorState::SignalReceived,
            SupervisorState::Waiting
        ]
    );

    let started = Instant::now();
    match supervisor.wait_for_exit(Duration::from_secs(5)).await {
        WaitOutcome::Exited(Some(status)) => assert_eq!(status.signal(), Some(15)),
        other => panic!("unexpected wait outcome: {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_run_reports_graceful_exit() {
    let (tx, rx) = mpsc::channel(4);
    let command = vec!["sleep".to_string(), "30".to_string()];
    let supervisor = Supervisor::start_with_signals(&command, fast_config(5), rx).unwrap();

    tx.send(TermSignal::Int).await.unwrap();
    let outcome = supervisor.run().await;

    match outcome {
        ExitOutcome::Graceful { status, elapsed } => {
            assert_eq!(status.and_then(|s| s.signal()), Some(2));
            assert!(elapsed < Duration::from_secs(2));
        }
        other => panic!("expected graceful exit, got {:?}", other),
    }
    assert_eq!(outcome.exit_code(), 0);
}

#[tokio::test]
async fn test_stubborn_worker_is_force_killed() {
    let (tx, rx) = mpsc::channel(4);
    let supervisor = Supervisor::start_with_signals(&stubborn(30), fast_config(1), rx).unwrap();
    let pid = supervisor.pid();
    let mut events = supervisor.events().subscribe();

    // Let the shell install its trap before signalling
    sleep(Duration::from_millis(300)).await;
    tx.send(TermSignal::Term).await.unwrap();

    let outcome = supervisor.run().await;
    match outcome {
        ExitOutcome::Forced {
            terminated,
            elapsed,
        } => {
            assert!(terminated);
            assert!(elapsed >= Duration::from_secs(1));
            assert!(elapsed < Duration::from_secs(3));
        }
        other => panic!("expected forced exit, got {:?}", other),
    }
    assert_eq!(outcome.exit_code(), 0);

    let mut saw_kill = false;
    while let Ok(event) = events.try_recv() {
        if event == (ShutdownEvent::ForcedKillTriggered { pid }) {
            saw_kill = true;
        }
    }
    assert!(saw_kill);
}

#[tokio::test]
async fn test_repeated_signal_does_not_extend_window() {
    let (tx, rx) = mpsc::channel(4);
    let supervisor = Supervisor::start_with_signals(&stubborn(30), fast_config(2), rx).unwrap();

    sleep(Duration::from_millis(300)).await;
    let run = tokio::spawn(supervisor.run());

    tx.send(TermSignal::Term).await.unwrap();
    sleep(Duration::from_secs(1)).await;
    tx.send(TermSignal::Term).await.unwrap();

    match run.await.unwrap() {
        ExitOutcome::Forced { elapsed, .. } => {
            assert!(elapsed >= Duration::from_secs(2));
            assert!(elapsed < Duration::from_millis(2800), "window was extended: {:?}", elapsed);
        }
        other => panic!("expected forced exit, got {:?}", other),
    }
}

#[tokio::test]
async fn test_force_kill_disabled_keeps_waiting() {
    let (tx, rx) = mpsc::channel(4);
    let config = SupervisorConfig {
        force_kill: false,
        ..fast_config(1)
    };
    let supervisor =
        Supervisor::start_with_signals(&sh("trap '' TERM; sleep 2"), config, rx).unwrap();

    sleep(Duration::from_millis(300)).await;
    tx.send(TermSignal::Term).await.unwrap();

    match supervisor.run().await {
        ExitOutcome::Graceful { status, elapsed } => {
            assert_eq!(status.and_then(|s| s.code()), Some(0));
            assert!(elapsed >= Duration::from_secs(1));
        }
        other => panic!("expected graceful exit, got {:?}", other),
    }
}

#[tokio::test]
async fn test_worker_exit_before_signal_passes_code_through() {
    let (_tx, rx) = mpsc::channel(4);
    let supervisor = Supervisor::start_with_signals(&sh("exit 3"), fast_config(5), rx).unwrap();

    let outcome = supervisor.run().await;
    assert!(matches!(outcome, ExitOutcome::WorkerExited { .. }));
    assert_eq!(outcome.exit_code(), 3);
}

#[tokio::test]
async fn test_closed_signal_source_keeps_supervising() {
    let (tx, rx) = mpsc::channel(4);
    drop(tx);
    let supervisor = Supervisor::start_with_signals(&sh("sleep 0.3"), fast_config(5), rx).unwrap();

    let outcome = supervisor.run().await;
    assert_eq!(outcome.exit_code(), 0);
    assert!(matches!(outcome, ExitOutcome::WorkerExited { .. }));
}

#[tokio::test]
async fn test_progress_reports_outstanding_count() {
    let (tx, rx) = mpsc::channel(4);
    let supervisor =
        Supervisor::start_with_signals(&sh("trap '' TERM; sleep 2"), fast_config(10), rx)
            .unwrap()
            .with_probe(FixedCount(3));
    let mut events = supervisor.events().subscribe();

    sleep(Duration::from_millis(300)).await;
    tx.send(TermSignal::Term).await.unwrap();
    let outcome = supervisor.run().await;
    assert!(matches!(outcome, ExitOutcome::Graceful { .. }));

    let mut progress = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ShutdownEvent::ShutdownProgress {
            outstanding,
            remaining,
            ..
        } = event
        {
            progress.push((outstanding, remaining));
        }
    }

    assert!(!progress.is_empty());
    assert!(progress.iter().all(|(outstanding, _)| *outstanding == Some(3)));
    assert!(progress
        .iter()
        .all(|(_, remaining)| *remaining < Duration::from_secs(10)));
}

struct StalledCount;

#[async_trait]
impl OutstandingProbe for StalledCount {
    async fn outstanding(&self) -> Option<usize> {
        std::future::pending::<()>().await;
        None
    }
}

#[tokio::test]
async fn test_slow_status_lookup_cannot_delay_deadline() {
    let (_tx, rx) = mpsc::channel(4);
    let mut supervisor = Supervisor::start_with_signals(&stubborn(30), fast_config(5), rx)
        .unwrap()
        .with_probe(StalledCount);

    sleep(Duration::from_millis(300)).await;
    supervisor.on_signal(TermSignal::Term);

    // Progress fires at 1s, leaving 0.5s before the deadline
    let started = Instant::now();
    let outcome = supervisor.wait_for_exit(Duration::from_millis(1500)).await;
    assert_eq!(outcome, WaitOutcome::TimedOut);
    assert!(
        started.elapsed() < Duration::from_millis(1800),
        "deadline missed: {:?}",
        started.elapsed()
    );

    assert!(matches!(
        supervisor.escalate().await,
        ExitOutcome::Forced {
            terminated: true,
            ..
        }
    ));
}

#[tokio::test]
async fn test_zero_intervals_do_not_stall_supervision() {
    let (tx, rx) = mpsc::channel(4);
    let config = SupervisorConfig {
        poll_interval_ms: 0,
        progress_interval_seconds: 0,
        ..fast_config(5)
    };
    let command = vec!["sleep".to_string(), "30".to_string()];
    let supervisor = Supervisor::start_with_signals(&command, config, rx).unwrap();

    tx.send(TermSignal::Term).await.unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(5), supervisor.run())
        .await
        .expect("supervisor stalled");
    assert!(matches!(outcome, ExitOutcome::Graceful { .. }));
}

#[tokio::test]
async fn test_relay_to_exited_worker_is_noop() {
    let mut handle = ProcessHandle::spawn(&["true".to_string()]).unwrap();
    let status = handle.wait().await;
    assert_eq!(status.and_then(|s| s.code()), Some(0));
    assert_eq!(handle.liveness(), Liveness::Exited(status));

    assert!(!handle.is_alive());
    assert!(!handle.relay(TermSignal::Term).unwrap());
    assert!(!handle.force_kill().unwrap());
}

#[tokio::test]
async fn test_spawn_failures() {
    let missing = ProcessHandle::spawn(&["/nonexistent/lameduck-worker".to_string()]);
    assert!(matches!(missing, Err(LameduckError::Spawn { .. })));

    let empty = ProcessHandle::spawn(&[]);
    assert!(matches!(empty, Err(LameduckError::System { .. })));
}

#[test]
fn test_exit_codes() {
    assert_eq!(status_code(ExitStatus::from_raw(3 << 8)), 3);
    assert_eq!(status_code(ExitStatus::from_raw(9)), 137);

    let forced = ExitOutcome::Forced {
        terminated: false,
        elapsed: Duration::from_secs(35),
    };
    assert_eq!(forced.exit_code(), 0);

    let unknown = ExitOutcome::WorkerExited { status: None };
    assert_eq!(unknown.exit_code(), 1);
}

#[test]
fn test_signal_names() {
    assert_eq!(TermSignal::Term.to_string(), "SIGTERM");
    assert_eq!(TermSignal::Quit.name(), "SIGQUIT");
    assert_eq!(
        TermSignal::Hup.to_nix(),
        nix::sys::signal::Signal::SIGHUP
    );
}
