//! Wire-level tests: the client against a scripted beanstalkd over TCP.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tubeworker::conn::{Cause, Op};
use tubeworker::{
    connect_and_work, handler_fn, BeanstalkConn, Client, ClientConfig, Connection, Error, Network,
    WorkMux, DEFAULT_TTR,
};

/// Helper: a one-connection fake broker that hands out `job` once, then
/// reports every reservation as timed out. Returns the bound address and a
/// task yielding every command line received.
async fn start_fake_broker(job: Option<(u64, &'static str)>) -> (String, tokio::task::JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        let mut pending = job;
        let mut seen = Vec::new();

        while let Ok(Some(line)) = lines.next_line().await {
            seen.push(line.clone());
            let reply = match line.split_whitespace().next().unwrap_or("") {
                "watch" | "ignore" => "WATCHING 1\r\n".to_string(),
                "use" => format!("USING {}\r\n", line.trim_start_matches("use ")),
                "reserve-with-timeout" => match pending.take() {
                    Some((id, body)) => format!("RESERVED {} {}\r\n{}\r\n", id, body.len(), body),
                    None => "TIMED_OUT\r\n".to_string(),
                },
                "delete" => "DELETED\r\n".to_string(),
                "release" => "RELEASED\r\n".to_string(),
                "put" => {
                    // Body line follows the command.
                    let _ = lines.next_line().await;
                    "INSERTED 42\r\n".to_string()
                }
                "quit" => break,
                _ => "UNKNOWN_COMMAND\r\n".to_string(),
            };
            write.write_all(reply.as_bytes()).await.unwrap();
        }
        seen
    });

    (addr, handle)
}

#[tokio::test]
async fn test_work_reserves_and_deletes_over_tcp() {
    let (addr, broker) = start_fake_broker(Some((7, "hello"))).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut mux = WorkMux::new();
    mux.handle_fn("emails", move |job| {
        let tx = tx.clone();
        async move {
            job.delete().await.unwrap();
            let _ = tx.send((job.id().get(), job.body().clone()));
        }
    })
    .unwrap();

    let config = ClientConfig::new(Network::Tcp, addr).with_poll_interval(Duration::from_millis(20));
    let client = Arc::new(
        Client::new(config, mux)
            .unwrap()
            .with_shutdown_trigger(CancellationToken::new()),
    );
    let task = {
        let client = client.clone();
        tokio::spawn(async move { client.connect_and_work().await })
    };

    let (id, body) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(id, 7);
    assert_eq!(&body[..], b"hello");

    client.stop().unwrap();
    assert!(task.await.unwrap().is_quit());

    let seen = broker.await.unwrap();
    assert_eq!(seen[0], "watch emails");
    assert_eq!(seen[1], "ignore default");
    assert_eq!(seen[2], "reserve-with-timeout 0");
    assert!(seen.contains(&"delete 7".to_string()));
    assert_eq!(seen.last().map(String::as_str), Some("quit"));
    // The watch list is settled once for a single tube.
    assert_eq!(seen.iter().filter(|l| l.starts_with("watch")).count(), 1);
}

#[tokio::test]
async fn test_put_over_tcp() {
    let (addr, broker) = start_fake_broker(None).await;

    let conn = BeanstalkConn::connect(Network::Tcp, &addr).await.unwrap();
    let id = conn
        .put("emails", b"payload", 10, Duration::from_secs(2), DEFAULT_TTR)
        .await
        .unwrap();
    assert_eq!(id.get(), 42);
    conn.close().await.unwrap();

    let seen = broker.await.unwrap();
    assert_eq!(seen, vec!["use emails", "put 10 2 60 7", "quit"]);
}

#[tokio::test]
async fn test_broker_hangup_is_fatal() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);
    });

    let config = ClientConfig::new(Network::Tcp, addr);
    let client = Client::new(config, handler_fn(|_job| async {}))
        .unwrap()
        .with_shutdown_trigger(CancellationToken::new());

    let err = tokio::time::timeout(Duration::from_secs(5), client.connect_and_work())
        .await
        .unwrap();
    server.await.unwrap();
    match err {
        Error::Conn(e) => {
            assert_eq!(e.op, Op::Reserve);
            assert!(matches!(e.cause, Cause::Io(_)));
        }
        other => panic!("expected connection error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_connect_failure_is_returned() {
    // Bind then drop to get a port nobody listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let err = connect_and_work(
        Network::Tcp,
        &addr,
        Duration::from_millis(10),
        1,
        handler_fn(|_job| async {}),
    )
    .await;
    assert!(matches!(err, Error::Io(_)), "got {err:?}");
}
