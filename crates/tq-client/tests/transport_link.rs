use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tq_client::{ClientConfig, ConnectionStatus, Subscription, Transport};
use tq_core::status::StatusToken;

const WAIT: Duration = Duration::from_secs(5);

async fn read_frame(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> Value {
    let line = timeout(WAIT, lines.next_line())
        .await
        .expect("frame in time")
        .expect("read frame")
        .expect("peer still open");
    serde_json::from_str(&line).expect("frame is json")
}

async fn next<T>(subscription: &mut Subscription<T>) -> T {
    timeout(WAIT, subscription.recv())
        .await
        .expect("notification in time")
        .expect("registry alive")
}

#[tokio::test]
async fn link_greets_relays_and_reconnects() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let transport = Transport::new(ClientConfig {
        socket_addr: addr.to_string(),
        ..ClientConfig::default()
    });
    let mut connection = transport.connection().subscribe();
    let mut progress = transport.progress().subscribe();
    let mut pauses = transport.pauses().subscribe();

    transport.identify("u-1");
    transport.join_batch("B1");
    transport.pause_processing("B1");
    assert!(!transport.is_connected());

    transport.connect().expect("connect");
    transport.connect().expect("second connect is a no-op");

    let (socket, _) = timeout(WAIT, listener.accept())
        .await
        .expect("dial in time")
        .expect("accept");
    let (read_half, mut write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let hello = read_frame(&mut lines).await;
    assert_eq!(hello["type"], "user_identified");
    assert_eq!(hello["payload"]["userId"], "u-1");
    assert_eq!(hello["version"], 1);
    let join = read_frame(&mut lines).await;
    assert_eq!(join["type"], "join_batch");
    assert_eq!(join["payload"]["batchId"], "B1");
    assert_eq!(next(&mut connection).await, ConnectionStatus::Connected);

    transport.start_processing("B1", vec!["r1".to_string()], 37.0);
    let start = read_frame(&mut lines).await;
    assert_eq!(start["type"], "start_taqeem_processing");
    assert_eq!(start["payload"]["numTabs"], 10);

    let inbound = concat!(
        r#"{"type":"processing_progress","payload":{"batchId":"B1","current":"2","total":5}}"#,
        "\n",
        r#"{"type":"processing_teleported","payload":{}}"#,
        "\n",
        r#"{"version":9,"type":"processing_stopped","payload":{"batchId":"B1"}}"#,
        "\n",
        r#"{"type":"processing_paused","payload":{"batchId":"B1"}}"#,
        "\n",
    );
    write_half
        .write_all(inbound.as_bytes())
        .await
        .expect("write events");

    let first = next(&mut progress).await;
    assert_eq!(first.current, Some(2));
    assert_eq!(first.total, Some(5));
    let second = next(&mut progress).await;
    assert_eq!(second.status, Some(StatusToken::Paused));
    assert!(progress.try_recv().is_none());
    let signal = next(&mut pauses).await;
    assert_eq!(signal.batch_id, "B1");
    assert!(signal.is_paused);

    drop(lines);
    drop(write_half);
    assert_eq!(next(&mut connection).await, ConnectionStatus::Disconnected);
    transport.resume_processing("B1");

    let (socket, _) = timeout(WAIT, listener.accept())
        .await
        .expect("redial in time")
        .expect("accept again");
    let (read_half, _write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();
    assert_eq!(read_frame(&mut lines).await["type"], "user_identified");
    assert_eq!(read_frame(&mut lines).await["type"], "join_batch");
    assert_eq!(next(&mut connection).await, ConnectionStatus::Connected);

    transport.stop_processing("B1");
    let stop = read_frame(&mut lines).await;
    assert_eq!(stop["type"], "stop_processing");
    assert_eq!(stop["payload"]["batchId"], "B1");

    transport.disconnect().await;
    assert_eq!(next(&mut connection).await, ConnectionStatus::Disconnected);
    assert!(!transport.is_connected());
    transport.disconnect().await;
}

#[tokio::test]
async fn unreachable_hub_keeps_retrying_quietly() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let transport = Transport::new(ClientConfig {
        socket_addr: addr.to_string(),
        ..ClientConfig::default()
    });
    let mut connection = transport.connection().subscribe();
    transport.connect().expect("connect");
    tokio::time::sleep(Duration::from_millis(100)).await;
    transport.stop_processing("B1");
    assert!(!transport.is_connected());
    assert!(connection.try_recv().is_none());
    transport.disconnect().await;
}
