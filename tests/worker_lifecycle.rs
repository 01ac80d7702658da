#![cfg(all(unix, feature = "http"))]

use lameduck::supervisor::{ExitOutcome, HttpStatusProbe, OutstandingProbe, Supervisor, TermSignal};
use lameduck::LameduckConfig;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_until_ready(status: &HttpStatusProbe) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while status.outstanding().await.is_none() {
        assert!(Instant::now() < deadline, "worker never came up");
        sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn test_worker_shuts_down_inside_supervisor_window() {
    let config = LameduckConfig::default();
    config.validate().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("lameduck.toml");
    std::fs::write(&config_path, config.to_toml().unwrap()).unwrap();

    let port = free_port();
    let command = vec![
        env!("CARGO_BIN_EXE_lameduck-worker").to_string(),
        "--quiet".to_string(),
        "--config".to_string(),
        config_path.to_string_lossy().to_string(),
        "--port".to_string(),
        port.to_string(),
    ];

    let status_url = format!("http://127.0.0.1:{}/readyz", port);
    let status = HttpStatusProbe::new(status_url.clone()).unwrap();

    let mut supervisor_config = config.supervisor.clone();
    supervisor_config.poll_interval_ms = 50;

    let (tx, rx) = mpsc::channel(4);
    let supervisor = Supervisor::start_with_signals(&command, supervisor_config, rx)
        .unwrap()
        .with_probe(HttpStatusProbe::new(status_url).unwrap());

    wait_until_ready(&status).await;
    assert_eq!(status.outstanding().await, Some(0));

    tx.send(TermSignal::Term).await.unwrap();
    let outcome = supervisor.run().await;

    match outcome {
        ExitOutcome::Graceful { status, elapsed } => {
            assert_eq!(status.and_then(|s| s.code()), Some(0));
            // Idle drain plus three short cleanup steps
            assert!(elapsed < Duration::from_secs(5), "took {:?}", elapsed);
        }
        other => panic!("expected graceful exit, got {:?}", other),
    }
    assert_eq!(outcome.exit_code(), 0);

    // Listener is gone once the worker has exited
    assert_eq!(status.outstanding().await, None);
}
