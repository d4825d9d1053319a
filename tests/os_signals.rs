//! Process signal tests. Kept in their own test binary: signals are delivered
//! to the whole process.
#![cfg(unix)]

use nix::sys::signal::{self, Signal};
use std::sync::Arc;
use std::time::Duration;

use tubeworker::{handler_fn, Client, ClientConfig, Connection, MemoryBroker};

/// Run a client with the default OS signal trigger, raise `sig` after 100ms
/// and return the run's result.
async fn run_until_signal(sig: Signal) -> tubeworker::Error {
    let broker = MemoryBroker::new();
    let config = ClientConfig::default().with_poll_interval(Duration::from_millis(20));
    let client = Client::new(config, handler_fn(|_job| async {})).unwrap();
    let conn: Arc<dyn Connection> = Arc::new(broker.connect());

    let sender = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        signal::raise(sig).unwrap();
    });

    let err = tokio::time::timeout(Duration::from_secs(5), client.work(conn))
        .await
        .unwrap();
    sender.await.unwrap();
    err
}

#[tokio::test]
async fn test_sigterm_and_sigint_stop_the_run() {
    // Sequential: both runs share the process signal handlers.
    let err = run_until_signal(Signal::SIGTERM).await;
    assert!(err.is_quit(), "SIGTERM: got {err:?}");

    let err = run_until_signal(Signal::SIGINT).await;
    assert!(err.is_quit(), "SIGINT: got {err:?}");
}
