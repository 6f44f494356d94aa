use super::*;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc::unbounded_channel;

type ServerReader = BufReader<ReadHalf<DuplexStream>>;
type ServerWriter = WriteHalf<DuplexStream>;

struct Pipes {
    client_read: ReadHalf<DuplexStream>,
    client_write: WriteHalf<DuplexStream>,
    server_read: ServerReader,
    server_write: ServerWriter,
}

fn pipes() -> Pipes {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (client_read, client_write) = tokio::io::split(client);
    let (server_read, server_write) = tokio::io::split(server);
    Pipes {
        client_read,
        client_write,
        server_read: BufReader::new(server_read),
        server_write,
    }
}

async fn next_message(reader: &mut ServerReader) -> Value {
    let body = read_message(reader).await.unwrap().unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn reply(writer: &mut ServerWriter, id: Value, result: Value) {
    write_message(writer, &JsonRpcResponse::success(id, result))
        .await
        .unwrap();
}

async fn serve_handshake(reader: &mut ServerReader, writer: &mut ServerWriter) -> Value {
    let init = next_message(reader).await;
    assert_eq!(init["method"], "initialize");
    reply(writer, init["id"].clone(), json!({"capabilities": {}})).await;
    let initialized = next_message(reader).await;
    assert_eq!(initialized["method"], "initialized");
    assert!(initialized.get("id").is_none());
    init
}

#[tokio::test]
async fn test_handshake_then_request_round_trip() {
    let Pipes {
        client_read,
        client_write,
        mut server_read,
        mut server_write,
    } = pipes();
    let (events_tx, _events_rx) = unbounded_channel();

    let server = tokio::spawn(async move {
        let init = serve_handshake(&mut server_read, &mut server_write).await;
        let call = next_message(&mut server_read).await;
        assert_eq!(call["method"], "workspace/executeCommand");
        assert_eq!(call["params"]["command"], "zenml-python.fetchStacks");
        reply(&mut server_write, call["id"].clone(), json!({"stacks": []})).await;
        (init, server_read, server_write)
    });

    let options = json!({"globalSettings": {"interpreter": ["/usr/bin/python3"]}});
    let (connection, _reader) = attach(
        client_read,
        client_write,
        events_tx,
        options.clone(),
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    let result = connection
        .call(
            "workspace/executeCommand",
            json!({"command": "zenml-python.fetchStacks", "arguments": [1, 10]}),
        )
        .await
        .unwrap();
    assert_eq!(result, json!({"stacks": []}));

    let (init, _r, _w) = server.await.unwrap();
    assert_eq!(init["params"]["initializationOptions"], options);
}

#[tokio::test]
async fn test_responses_route_to_their_callers() {
    let Pipes {
        client_read,
        client_write,
        mut server_read,
        mut server_write,
    } = pipes();
    let (events_tx, _events_rx) = unbounded_channel();

    let server = tokio::spawn(async move {
        serve_handshake(&mut server_read, &mut server_write).await;
        let first = next_message(&mut server_read).await;
        let second = next_message(&mut server_read).await;
        reply(&mut server_write, second["id"].clone(), second["params"].clone()).await;
        reply(&mut server_write, first["id"].clone(), first["params"].clone()).await;
        (server_read, server_write)
    });

    let (connection, _reader) = attach(
        client_read,
        client_write,
        events_tx,
        json!({}),
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    let (a, b) = tokio::join!(
        connection.call("echo", json!("a")),
        connection.call("echo", json!("b"))
    );
    assert_eq!(a.unwrap(), json!("a"));
    assert_eq!(b.unwrap(), json!("b"));
    let _keep = server.await.unwrap();
}

#[tokio::test]
async fn test_notifications_are_forwarded() {
    let Pipes {
        client_read,
        client_write,
        mut server_read,
        mut server_write,
    } = pipes();
    let (events_tx, mut events_rx) = unbounded_channel();

    let server = tokio::spawn(async move {
        serve_handshake(&mut server_read, &mut server_write).await;
        write_message(
            &mut server_write,
            &JsonRpcRequest::notification("zenml/ready", Some(json!({"ready": true}))),
        )
        .await
        .unwrap();
        (server_read, server_write)
    });

    let (_connection, _reader) = attach(
        client_read,
        client_write,
        events_tx,
        json!({}),
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    assert_eq!(
        events_rx.recv().await.unwrap(),
        TransportEvent::Notification {
            method: "zenml/ready".to_string(),
            params: json!({"ready": true}),
        }
    );
    let _keep = server.await.unwrap();
}

#[tokio::test]
async fn test_server_requests_are_acknowledged() {
    let Pipes {
        client_read,
        client_write,
        mut server_read,
        mut server_write,
    } = pipes();
    let (events_tx, _events_rx) = unbounded_channel();

    let server = tokio::spawn(async move {
        serve_handshake(&mut server_read, &mut server_write).await;
        write_message(
            &mut server_write,
            &json!({
                "jsonrpc": "2.0",
                "id": "progress-1",
                "method": "window/workDoneProgress/create",
                "params": {},
            }),
        )
        .await
        .unwrap();
        let ack = next_message(&mut server_read).await;
        (ack, server_read, server_write)
    });

    let (_connection, _reader) = attach(
        client_read,
        client_write,
        events_tx,
        json!({}),
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    let (ack, _r, _w) = server.await.unwrap();
    assert_eq!(ack["id"], "progress-1");
    assert_eq!(ack["result"], Value::Null);
}

#[tokio::test]
async fn test_stream_close_rejects_pending_and_reports_exit() {
    let Pipes {
        client_read,
        client_write,
        mut server_read,
        mut server_write,
    } = pipes();
    let (events_tx, mut events_rx) = unbounded_channel();

    let server = tokio::spawn(async move {
        serve_handshake(&mut server_read, &mut server_write).await;
        let _unanswered = next_message(&mut server_read).await;
        drop(server_read);
        drop(server_write);
    });

    let (connection, _reader) = attach(
        client_read,
        client_write,
        events_tx,
        json!({}),
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    let result = connection.call("workspace/executeCommand", json!({})).await;
    assert_eq!(result.unwrap_err(), TransportError::Closed);
    server.await.unwrap();

    assert!(matches!(
        events_rx.recv().await.unwrap(),
        TransportEvent::Exited { .. }
    ));
    assert!(connection.is_closed());
    assert_eq!(
        connection.call("anything", json!({})).await.unwrap_err(),
        TransportError::Closed
    );
}

#[tokio::test(start_paused = true)]
async fn test_handshake_timeout() {
    let Pipes {
        client_read,
        client_write,
        server_read,
        server_write,
    } = pipes();
    let (events_tx, _events_rx) = unbounded_channel();

    let result = attach(
        client_read,
        client_write,
        events_tx,
        json!({}),
        Duration::from_secs(3),
    )
    .await;
    assert!(matches!(result, Err(TransportError::HandshakeTimeout)));
    drop((server_read, server_write));
}

#[tokio::test]
async fn test_request_before_start_is_not_started() {
    let transport = StdioTransport::new(StdioTransportConfig::new("python3", vec![]));
    assert_eq!(
        transport.request("x", json!({})).await.unwrap_err(),
        TransportError::NotStarted
    );
    assert!(transport.stop().await.is_ok());
}

#[tokio::test]
async fn test_spawn_failure_is_reported() {
    let transport = StdioTransport::new(StdioTransportConfig::new(
        "/nonexistent/zenml-sidecar-binary",
        vec![],
    ));
    let (events_tx, _events_rx) = unbounded_channel();
    assert!(matches!(
        transport.start(events_tx).await,
        Err(TransportError::Spawn { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_requests_racing_close_are_all_rejected() {
    // Writes keep succeeding, as when the sidecar closes only its stdout.
    let connection = Arc::new(Connection::new(Box::new(tokio::io::sink())));
    let calls: Vec<_> = (0..64)
        .map(|i| {
            let connection = Arc::clone(&connection);
            tokio::spawn(async move { connection.call("echo", json!(i)).await })
        })
        .collect();
    tokio::task::yield_now().await;
    connection.fail_all();

    for call in calls {
        let result = tokio::time::timeout(Duration::from_secs(5), call)
            .await
            .expect("request left pending after close")
            .unwrap();
        assert_eq!(result.unwrap_err(), TransportError::Closed);
    }
    assert_eq!(connection.fail_all(), 0);
}
