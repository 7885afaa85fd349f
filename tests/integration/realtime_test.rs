//! Integration tests for the realtime websocket channel.
//!
//! Runs the full service on ephemeral ports and talks to it over real sockets.

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use racehub::api::Coordinator;
use racehub::coordinator::{
    CoordinatorSettings, GameMode, JoinRequest, PhysicsMode, PlayerIdentity, RoomDescriptor,
    SessionSpec,
};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Running {
    coordinator: Arc<Coordinator>,
    http_addr: SocketAddr,
    realtime_addr: SocketAddr,
    stop: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

async fn start() -> Running {
    let coordinator = Arc::new(Coordinator::new(CoordinatorSettings::default(), 5056));
    let http = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let realtime = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let http_addr = http.local_addr().unwrap();
    let realtime_addr = realtime.local_addr().unwrap();

    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(Arc::clone(&coordinator).serve(http, realtime, async {
        let _ = stopped.await;
    }));

    Running {
        coordinator,
        http_addr,
        realtime_addr,
        stop,
        task,
    }
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr))
        .await
        .unwrap();
    client
}

/// Next JSON text frame, skipping control frames.
async fn next_frame(client: &mut Client) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for frame")
            .expect("connection closed")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

fn spec(host: &str) -> SessionSpec {
    SessionSpec::new(
        PlayerIdentity::new(host, host),
        RoomDescriptor {
            name: format!("{} room", host),
            map_id: "MP-forest".to_string(),
            track_id: String::new(),
            is_custom_track: false,
            game_mode: GameMode::Race,
            laps: 3,
            physics_mode: PhysicsMode::Sim,
        },
    )
}

/// Test the initial snapshot followed by ordered session events
#[tokio::test]
async fn test_initial_snapshot_then_events() {
    let running = start().await;
    let existing = running.coordinator.create_session(spec("early")).await.unwrap();

    let mut client = connect(running.realtime_addr).await;
    let initial = next_frame(&mut client).await;
    assert_eq!(initial["type"], "initial");
    assert_eq!(initial["sessions"][0]["id"], existing.session_id.to_string());

    let created = running.coordinator.create_session(spec("late")).await.unwrap();
    let id = created.session_id;
    running
        .coordinator
        .join(id, JoinRequest::pilot(PlayerIdentity::new("p1", "p1")))
        .await
        .unwrap();
    running.coordinator.close_session(id, &created.host_token).await.unwrap();

    let frame = next_frame(&mut client).await;
    assert_eq!(frame["type"], "session_created");
    assert_eq!(frame["session"]["id"], id.to_string());
    assert_eq!(frame["revision"], 1);

    let frame = next_frame(&mut client).await;
    assert_eq!(frame["type"], "session_updated");
    assert_eq!(frame["session"]["capacity"]["current_pilots"], 1);
    assert_eq!(frame["revision"], 2);

    let frame = next_frame(&mut client).await;
    assert_eq!(frame["type"], "session_closed");
    assert_eq!(frame["session_id"], id.to_string());
    assert_eq!(frame["reason"], "host_teardown");
    assert_eq!(frame["revision"], 3);

    running.stop.send(()).unwrap();
    running.task.await.unwrap().unwrap();
}

/// Test that ping frames are answered
#[tokio::test]
async fn test_ping_pong() {
    let running = start().await;
    let mut client = connect(running.realtime_addr).await;
    assert_eq!(next_frame(&mut client).await["type"], "initial");

    client
        .send(Message::Text(json!({ "type": "ping" }).to_string()))
        .await
        .unwrap();
    assert_eq!(next_frame(&mut client).await["type"], "pong");

    running.stop.send(()).unwrap();
    running.task.await.unwrap().unwrap();
}

/// Test that every connected observer sees the same events
#[tokio::test]
async fn test_events_fan_out_to_all_clients() {
    let running = start().await;
    let mut a = connect(running.realtime_addr).await;
    let mut b = connect(running.realtime_addr).await;
    next_frame(&mut a).await;
    next_frame(&mut b).await;

    let created = running.coordinator.create_session(spec("host")).await.unwrap();

    for client in [&mut a, &mut b] {
        let frame = next_frame(client).await;
        assert_eq!(frame["type"], "session_created");
        assert_eq!(frame["session"]["id"], created.session_id.to_string());
    }

    running.stop.send(()).unwrap();
    running.task.await.unwrap().unwrap();
}

/// Test that the HTTP API served alongside feeds the realtime channel
#[tokio::test]
async fn test_http_mutation_reaches_realtime_client() {
    let running = start().await;
    let mut client = connect(running.realtime_addr).await;
    next_frame(&mut client).await;

    let body = json!({
        "host": { "player_id": "h1", "display_name": "Host" },
        "room": { "name": "Over HTTP", "map_id": "MP-1" }
    })
    .to_string();

    let mut stream = TcpStream::connect(running.http_addr).await.unwrap();
    let request = format!(
        "POST /sessions HTTP/1.1\r\nHost: {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        running.http_addr,
        body.len(),
        body
    );
    tokio::io::AsyncWriteExt::write_all(&mut stream, request.as_bytes())
        .await
        .unwrap();
    let mut response = String::new();
    tokio::io::AsyncReadExt::read_to_string(&mut stream, &mut response)
        .await
        .unwrap();
    assert!(response.starts_with("HTTP/1.1 201"), "{}", response);
    // Peer address becomes the host candidate when none is given.
    assert!(response.contains("127.0.0.1"));

    let frame = next_frame(&mut client).await;
    assert_eq!(frame["type"], "session_created");
    assert_eq!(frame["session"]["room"]["name"], "Over HTTP");

    running.stop.send(()).unwrap();
    running.task.await.unwrap().unwrap();
}
