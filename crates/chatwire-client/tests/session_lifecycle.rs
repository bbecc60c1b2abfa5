//! Session driver lifecycle against real in-process servers: a minimal
//! health endpoint and a WebSocket backend.

#![allow(clippy::unwrap_used, reason = "test code")]

use std::time::Duration;

use chatwire_client::{session, ConnectionState, ProbeConfig, SessionConfig, SupervisorConfig};
use chatwire_core::{ClientRole, MemoryStore, RouterConfig, RouterEvent, SinkUpdate};
use chatwire_proto::{ClientBound, ParticipantId, RoomId, ServerBound, SessionId};
use futures::{SinkExt, StreamExt};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
    sync::mpsc,
};
use tokio_tungstenite::tungstenite::Message;

/// Always-200 health endpoint. Returns its URL.
async fn spawn_healthz() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else { break };
            tokio::spawn(async move {
                let mut buf = [0u8; 2048];
                let _ = stream.read(&mut buf).await;
                let _ = stream
                    .write_all(
                        b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                    )
                    .await;
            });
        }
    });

    format!("http://{addr}/healthz")
}

/// WebSocket backend that greets with `agent-connected` and forwards every
/// decoded client event to the given channel. Returns its URL.
async fn spawn_backend(events: mpsc::Sender<ServerBound>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { break };
            let events = events.clone();

            tokio::spawn(async move {
                let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();

                let greeting = ClientBound::AgentConnected { past_room_ids: vec![] };
                socket.send(Message::Text(greeting.encode().unwrap())).await.unwrap();

                while let Some(Ok(frame)) = socket.next().await {
                    match frame {
                        Message::Text(raw) => {
                            let event = ServerBound::decode(&raw).unwrap();
                            if events.send(event).await.is_err() {
                                break;
                            }
                        },
                        Message::Ping(payload) => {
                            let _ = socket.send(Message::Pong(payload)).await;
                        },
                        Message::Close(_) => break,
                        _ => {},
                    }
                }
            });
        }
    });

    format!("ws://{addr}/socket")
}

fn config(ws_url: String, healthz_url: String) -> SessionConfig {
    SessionConfig {
        ws_url,
        probe: ProbeConfig {
            healthz_url: healthz_url.clone(),
            auth_token: "probe-token".to_string(),
            reachability_url: healthz_url,
            timeout: Duration::from_millis(500),
            min_interval: Duration::from_millis(10),
        },
        role: ClientRole::Agent,
        identity: ParticipantId::new("agent-1"),
        session_id: SessionId::new("session-it"),
        tab_id: "tab-1".to_string(),
        router: RouterConfig::default(),
        supervisor: SupervisorConfig {
            retry_delay: Duration::from_millis(100),
            probe_interval: Duration::from_millis(100),
            ..SupervisorConfig::default()
        },
    }
}

async fn wait_for_state(
    state: &mut tokio::sync::watch::Receiver<ConnectionState>,
    wanted: ConnectionState,
) {
    tokio::time::timeout(Duration::from_secs(15), async {
        loop {
            if *state.borrow() == wanted {
                return;
            }
            state.changed().await.unwrap();
        }
    })
    .await
    .unwrap_or_else(|_| panic!("never reached {wanted:?}"));
}

#[tokio::test(flavor = "multi_thread")]
async fn messages_reach_the_backend_in_order() {
    let healthz = spawn_healthz().await;
    let (backend_events, mut received) = mpsc::channel(64);
    let ws_url = spawn_backend(backend_events).await;

    let mut handle = session::spawn(config(ws_url, healthz), MemoryStore::new()).unwrap();

    // Sends may race the connection being established; either way they must
    // all arrive, in order.
    for n in 1..=3 {
        handle
            .commands
            .send(RouterEvent::SendMessage {
                room_id: RoomId::new("r1"),
                content: format!("message {n}"),
                attachment: None,
            })
            .await
            .unwrap();
    }

    wait_for_state(&mut handle.state, ConnectionState::Open).await;

    let mut contents = Vec::new();
    while contents.len() < 3 {
        let event = tokio::time::timeout(Duration::from_secs(15), received.recv())
            .await
            .unwrap()
            .unwrap();

        if let ServerBound::AgentMessage(out) = event {
            contents.push(out.message);
        }
    }
    assert_eq!(contents, vec!["message 1", "message 2", "message 3"]);

    // The greeting produced a handshake-complete sink update along the way.
    let saw_handshake = async {
        while let Some(update) = handle.sink.recv().await {
            if matches!(update, SinkUpdate::HandshakeComplete { .. }) {
                return true;
            }
        }
        false
    };
    assert!(tokio::time::timeout(Duration::from_secs(15), saw_handshake).await.unwrap());

    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn inbound_messages_are_acked_and_surfaced() {
    let healthz = spawn_healthz().await;

    // Backend that pushes one visitor message after the greeting.
    let (backend_events, mut received) = mpsc::channel::<ServerBound>(64);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ws_url = format!("ws://{}/socket", listener.local_addr().unwrap());

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();

        let greeting = ClientBound::AgentConnected { past_room_ids: vec![RoomId::new("r1")] };
        socket.send(Message::Text(greeting.encode().unwrap())).await.unwrap();

        let push = ClientBound::NewMessage(chatwire_proto::InboundMessage {
            message_id: chatwire_proto::MessageId::new("srv-1"),
            content: "hello from the visitor".to_string(),
            room_id: RoomId::new("r1"),
            sender_id: ParticipantId::new("visitor-9"),
            sender_type: chatwire_proto::SenderType::Visitor,
            is_encrypted: false,
            encrypted_data: None,
            attachment: None,
            message_type: chatwire_proto::MessageType::Text,
            created_at: 1_700_000_000_000,
        });
        socket.send(Message::Text(push.encode().unwrap())).await.unwrap();

        while let Some(Ok(frame)) = socket.next().await {
            match frame {
                Message::Text(raw) => {
                    let event = ServerBound::decode(&raw).unwrap();
                    if backend_events.send(event).await.is_err() {
                        break;
                    }
                },
                Message::Ping(payload) => {
                    let _ = socket.send(Message::Pong(payload)).await;
                },
                Message::Close(_) => break,
                _ => {},
            }
        }
    });

    let mut handle = session::spawn(config(ws_url, healthz), MemoryStore::new()).unwrap();
    wait_for_state(&mut handle.state, ConnectionState::Open).await;

    // The message lands in the sink.
    let appended = tokio::time::timeout(Duration::from_secs(15), async {
        loop {
            if let Some(SinkUpdate::AppendMessage(message)) = handle.sink.recv().await {
                return message;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(appended.content, "hello from the visitor");

    // And the backend sees the automatic delivery ack.
    let ack = tokio::time::timeout(Duration::from_secs(15), async {
        loop {
            match received.recv().await.unwrap() {
                ServerBound::MessageDelivered { messages, room_id } => return (messages, room_id),
                _ => {},
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(ack.1, RoomId::new("r1"));
    assert_eq!(ack.0[0].message_id, chatwire_proto::MessageId::new("srv-1"));

    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn dial_failures_exhaust_the_budget_into_terminal_error() {
    let healthz = spawn_healthz().await;

    // Reserve a port, then free it: dials will be refused.
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ws_url = format!("ws://{}/socket", dead.local_addr().unwrap());
    drop(dead);

    // Keep the reachability endpoint dead too, so the terminal state is not
    // reset under the test's feet.
    let mut config = config(ws_url, healthz);
    config.probe.reachability_url = "http://127.0.0.1:1/".to_string();

    let mut handle = session::spawn(config, MemoryStore::new()).unwrap();

    wait_for_state(&mut handle.state, ConnectionState::Error).await;

    // Fail-stop: commands still queue without panicking, but the state
    // stays terminal.
    handle
        .commands
        .send(RouterEvent::SendMessage {
            room_id: RoomId::new("r1"),
            content: "buffered while terminal".to_string(),
            attachment: None,
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(*handle.state.borrow(), ConnectionState::Error);

    handle.shutdown().await;
}
