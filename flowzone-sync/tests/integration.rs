//! End-to-end tests against an in-process engine stand-in.
//!
//! Each test binds a real WebSocket listener, points a `RemoteClient` at it
//! and drives the engine side by hand.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use flowzone_sync::{
    ClientConfig, Command, ConnectionConfig, ConnectionState, Delivery, Node, RemoteClient, Replica,
};

type EngineSocket = WebSocketStream<TcpStream>;

const WAIT: Duration = Duration::from_secs(3);

/// Accepts client connections and hands each socket to the test.
struct FakeEngine {
    port: u16,
    connections: mpsc::UnboundedReceiver<EngineSocket>,
}

impl FakeEngine {
    async fn start() -> Self {
        // The listener stays bound for the whole test, so the port cannot be
        // taken by anyone else between lookup and connect.
        Self::start_on(0).await
    }

    async fn start_on(port: u16) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, connections) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                if let Ok(ws) = tokio_tungstenite::accept_async(tcp).await {
                    if tx.send(ws).is_err() {
                        break;
                    }
                }
            }
        });

        Self { port, connections }
    }

    fn url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port)
    }

    async fn accept(&mut self) -> EngineSocket {
        timeout(WAIT, self.connections.recv())
            .await
            .expect("client never connected")
            .expect("listener stopped")
    }
}

fn client_for(engine: &FakeEngine, floor_ms: u64) -> RemoteClient {
    RemoteClient::new(ClientConfig {
        connection: ConnectionConfig {
            backoff_floor: Duration::from_millis(floor_ms),
            backoff_ceiling: Duration::from_millis(floor_ms * 4),
            ..ConnectionConfig::new(engine.url())
        },
        ..ClientConfig::default()
    })
}

async fn send_json(socket: &mut EngineSocket, value: Value) {
    socket
        .send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

async fn next_text(socket: &mut EngineSocket) -> Value {
    loop {
        let frame = timeout(WAIT, socket.next())
            .await
            .expect("no frame from client")
            .expect("client closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn wait_for_replica<F>(client: &RemoteClient, mut predicate: F) -> Replica
where
    F: FnMut(&Replica) -> bool,
{
    let mut rx = client.subscribe();
    let replica = timeout(WAIT, rx.wait_for(|r| r.as_ref().is_some_and(&mut predicate)))
        .await
        .expect("replica never matched")
        .unwrap()
        .clone();
    replica.expect("replica present")
}

async fn wait_for_log<F>(client: &RemoteClient, mut predicate: F) -> Vec<String>
where
    F: FnMut(&[String]) -> bool,
{
    timeout(WAIT, async {
        loop {
            let messages: Vec<String> =
                client.diagnostics().entries().into_iter().map(|e| e.message).collect();
            if predicate(&messages) {
                return messages;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("diagnostic log never matched")
}

async fn wait_for_state(client: &RemoteClient, state: ConnectionState) {
    let mut rx = client.subscribe_connection();
    timeout(WAIT, rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("never reached {state}"))
        .unwrap();
}

fn bpm(replica: &Replica) -> Option<f64> {
    replica.document.pointer("/transport/bpm").and_then(Node::as_f64)
}

#[tokio::test]
async fn test_full_snapshot_then_patch() {
    let mut engine = FakeEngine::start().await;
    let mut client = client_for(&engine, 50);
    client.start();

    let mut socket = engine.accept().await;
    send_json(
        &mut socket,
        json!({
            "type": "STATE_FULL",
            "revisionId": 1,
            "data": { "transport": { "bpm": 120, "isPlaying": false }, "slots": ["kick", "snare"] }
        }),
    )
    .await;
    send_json(
        &mut socket,
        json!({
            "type": "STATE_PATCH",
            "revisionId": 2,
            "ops": [
                { "op": "replace", "path": "/transport/bpm", "value": 128 },
                { "op": "add", "path": "/slots/-", "value": "hat" }
            ]
        }),
    )
    .await;

    let replica = wait_for_replica(&client, |r| r.version == 2).await;
    assert_eq!(bpm(&replica), Some(128.0));
    assert_eq!(
        replica.document.pointer("/transport/isPlaying").and_then(Node::as_bool),
        Some(false)
    );
    assert_eq!(replica.document.to_value()["slots"], json!(["kick", "snare", "hat"]));

    client.shutdown();
}

#[tokio::test]
async fn test_legacy_untyped_snapshot() {
    let mut engine = FakeEngine::start().await;
    let mut client = client_for(&engine, 50);
    client.start();

    let mut socket = engine.accept().await;
    send_json(&mut socket, json!({ "transport": { "bpm": 97 } })).await;

    let replica = wait_for_replica(&client, |_| true).await;
    assert_eq!(bpm(&replica), Some(97.0));

    client.shutdown();
}

#[tokio::test]
async fn test_malformed_frame_is_dropped() {
    let mut engine = FakeEngine::start().await;
    let mut client = client_for(&engine, 50);
    client.start();

    let mut socket = engine.accept().await;
    socket
        .send(Message::Text("{ definitely not json".to_string().into()))
        .await
        .unwrap();
    send_json(
        &mut socket,
        json!({ "type": "STATE_FULL", "data": { "transport": { "bpm": 110 } } }),
    )
    .await;

    let replica = wait_for_replica(&client, |_| true).await;
    assert_eq!(replica.version, 1);
    assert_eq!(bpm(&replica), Some(110.0));
    assert_eq!(client.connection_state(), ConnectionState::Open);
    assert!(client
        .diagnostics()
        .entries()
        .iter()
        .any(|e| e.message.starts_with("malformed message")));

    client.shutdown();
}

#[tokio::test]
async fn test_binary_json_frame_is_accepted() {
    let mut engine = FakeEngine::start().await;
    let mut client = client_for(&engine, 50);
    client.start();

    let mut socket = engine.accept().await;
    let frame = json!({ "type": "STATE_FULL", "data": { "transport": { "bpm": 84 } } }).to_string();
    socket.send(Message::Binary(frame.into_bytes().into())).await.unwrap();

    let replica = wait_for_replica(&client, |_| true).await;
    assert_eq!(bpm(&replica), Some(84.0));

    client.shutdown();
}

#[tokio::test]
async fn test_command_reaches_engine() {
    let mut engine = FakeEngine::start().await;
    let mut client = client_for(&engine, 50);
    client.start();

    let mut socket = engine.accept().await;
    wait_for_state(&client, ConnectionState::Open).await;

    assert_eq!(client.send(&Command::SetBpm { bpm: 128.0 }).unwrap(), Delivery::Sent);
    assert_eq!(client.send(&json!({ "cmd": "PANIC" })).unwrap(), Delivery::Sent);

    assert_eq!(next_text(&mut socket).await, json!({ "cmd": "SET_BPM", "bpm": 128.0 }));
    assert_eq!(next_text(&mut socket).await, json!({ "cmd": "PANIC" }));

    client.shutdown();
}

#[tokio::test]
async fn test_reconnect_replaces_replica() {
    let mut engine = FakeEngine::start().await;
    let mut client = client_for(&engine, 50);
    client.start();

    let mut first = engine.accept().await;
    send_json(&mut first, json!({ "type": "STATE_FULL", "data": { "a": 1 } })).await;
    wait_for_replica(&client, |r| r.document.pointer("/a").is_some()).await;
    first.close(None).await.unwrap();

    let mut second = engine.accept().await;
    send_json(&mut second, json!({ "type": "STATE_FULL", "data": { "b": 2 } })).await;

    let replica = wait_for_replica(&client, |r| r.document.pointer("/b").is_some()).await;
    assert!(replica.document.pointer("/a").is_none());
    assert_eq!(client.connection_state(), ConnectionState::Open);

    client.shutdown();
}

#[tokio::test]
async fn test_command_while_disconnected_not_retransmitted() {
    let mut engine = FakeEngine::start().await;
    let mut client = client_for(&engine, 300);
    client.start();

    let mut first = engine.accept().await;
    wait_for_state(&client, ConnectionState::Open).await;
    first.close(None).await.unwrap();
    wait_for_state(&client, ConnectionState::AwaitingRetry).await;

    assert_eq!(client.send(&Command::TogglePlay).unwrap(), Delivery::Dropped);

    let mut second = engine.accept().await;
    wait_for_state(&client, ConnectionState::Open).await;
    assert_eq!(client.send(&Command::Panic).unwrap(), Delivery::Sent);

    // The first frame on the new transport is the fresh command.
    assert_eq!(next_text(&mut second).await, json!({ "cmd": "PANIC" }));

    client.shutdown();
}

#[tokio::test]
async fn test_restart_does_not_open_second_transport() {
    let mut engine = FakeEngine::start().await;
    let mut client = client_for(&engine, 50);
    client.start();

    let _socket = engine.accept().await;
    wait_for_state(&client, ConnectionState::Open).await;

    client.start();
    let extra = timeout(Duration::from_millis(300), engine.connections.recv()).await;
    assert!(extra.is_err(), "a second transport was opened");
    assert_eq!(client.connection_state(), ConnectionState::Open);

    client.shutdown();
}

#[tokio::test]
async fn test_backoff_resets_after_open() {
    // Reserve a port and leave it closed so the first attempts are refused.
    let port = {
        let reserved = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        reserved.local_addr().unwrap().port()
    };
    let mut client = RemoteClient::new(ClientConfig {
        connection: ConnectionConfig {
            backoff_floor: Duration::from_millis(20),
            backoff_ceiling: Duration::from_millis(320),
            ..ConnectionConfig::new(format!("ws://127.0.0.1:{port}"))
        },
        ..ClientConfig::default()
    });
    client.start();

    // Three refusals push the pending delay well past the floor.
    let grown = wait_for_log(&client, |m| {
        m.iter().filter(|line| line.contains("failed")).count() >= 3
    })
    .await;
    assert!(grown.iter().any(|line| line == "reconnecting in 80 ms"), "{grown:?}");

    let mut engine = FakeEngine::start_on(port).await;
    let mut socket = engine.accept().await;
    wait_for_state(&client, ConnectionState::Open).await;
    socket.close(None).await.unwrap();

    let after_drop = |m: &[String]| -> Option<String> {
        let closed_at = m.iter().position(|line| line.starts_with("disconnected"))?;
        m[closed_at..]
            .iter()
            .find(|line| line.starts_with("reconnecting in"))
            .cloned()
    };
    let messages = wait_for_log(&client, |m| after_drop(m).is_some()).await;
    assert_eq!(
        after_drop(&messages).as_deref(),
        Some("reconnecting in 20 ms"),
        "{messages:?}"
    );

    client.shutdown();
}

#[tokio::test]
async fn test_every_inbound_frame_is_recorded() {
    let mut engine = FakeEngine::start().await;
    let mut client = RemoteClient::new(ClientConfig {
        connection: ConnectionConfig::new(engine.url()),
        ..ClientConfig::default()
    });
    client.start();

    let mut socket = engine.accept().await;
    for i in 1..=10 {
        send_json(
            &mut socket,
            json!({ "type": "STATE_FULL", "revisionId": i, "data": { "transport": { "bpm": i } } }),
        )
        .await;
    }
    wait_for_replica(&client, |r| r.version == 10).await;

    let inbound = client
        .diagnostics()
        .entries()
        .iter()
        .filter(|e| e.message.starts_with("inbound"))
        .count();
    assert_eq!(inbound, 10);

    client.shutdown();
}
