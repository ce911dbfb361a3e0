//! End-to-end tests for the bridge
//!
//! Each test spins the full service stack — file index, registry, router,
//! transport server — on an ephemeral loopback port and talks to it with a
//! real WebSocket client, the way the editor UI does.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use flowbridge::config::FileConfig;
use flowbridge::handlers::{FileHandler, ResourceHandler};
use flowbridge::index::FileIndexService;
use flowbridge::protocol::{self, Message};
use flowbridge::router::{Handler, Router};
use flowbridge::server::{ConnectionRegistry, TransportServer};
use flowbridge::{supervisor, PROTOCOL_VERSION};

struct Bridge {
    port: u16,
    quit_rx: mpsc::Receiver<()>,
    registry: Arc<ConnectionRegistry>,
    index: Arc<FileIndexService>,
    serve: tokio::task::JoinHandle<()>,
}

impl Bridge {
    async fn spawn(root: &Path) -> Self {
        let cfg = FileConfig {
            root: root.to_path_buf(),
            ..FileConfig::default()
        };
        let index = FileIndexService::new(&cfg).unwrap();
        index.start().unwrap();

        let registry = ConnectionRegistry::new();
        let file_handler = FileHandler::new(Arc::clone(&index), Arc::clone(&registry));
        file_handler.start_pushers();
        let resource_handler = ResourceHandler::new(index.root().to_path_buf(), cfg.exclude);

        let mut router = Router::new();
        router.register(file_handler as Arc<dyn Handler>).unwrap();
        router.register(resource_handler as Arc<dyn Handler>).unwrap();

        let (quit_tx, quit_rx) = mpsc::channel(1);
        let server = TransportServer::bind(
            "127.0.0.1",
            0,
            Arc::clone(&registry),
            Arc::new(router),
            quit_tx,
        )
        .await
        .unwrap();
        let port = server.local_port().unwrap();
        let serve = tokio::spawn(server.serve());

        Self {
            port,
            quit_rx,
            registry,
            index,
            serve,
        }
    }

    fn stop(self) {
        self.serve.abort();
        self.index.stop();
    }
}

type WsClient = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn connect(port: u16) -> WsClient {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{}/", port))
        .await
        .expect("websocket connect");
    ws
}

async fn send(ws: &mut WsClient, msg: &Message) {
    ws.send(WsMessage::Text(serde_json::to_string(msg).unwrap()))
        .await
        .unwrap();
}

/// Receive frames until one arrives on `route`, skipping unrelated pushes.
async fn recv_route(ws: &mut WsClient, route: &str) -> Message {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("connection closed")
            .expect("websocket error");
        if let WsMessage::Text(text) = frame {
            let msg: Message = serde_json::from_str(&text).unwrap();
            if msg.route == route {
                return msg;
            }
        }
    }
}

#[tokio::test]
async fn file_list_is_pushed_on_connect() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.json"), "{}").unwrap();
    let bridge = Bridge::spawn(dir.path()).await;

    let mut ws = connect(bridge.port).await;
    let list = recv_route(&mut ws, protocol::ROUTE_PUSH_FILE_LIST).await;
    assert_eq!(list.data["files"].as_array().unwrap().len(), 1);

    bridge.stop();
}

#[tokio::test]
async fn mismatched_handshake_still_gets_served() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = Bridge::spawn(dir.path()).await;
    let mut ws = connect(bridge.port).await;

    send(
        &mut ws,
        &Message::new(
            protocol::ROUTE_HANDSHAKE,
            serde_json::json!({"protocol_version": "v0"}),
        ),
    )
    .await;
    let response = recv_route(&mut ws, protocol::ROUTE_HANDSHAKE_RESPONSE).await;
    assert_eq!(response.data["success"], false);
    assert_eq!(response.data["server_version"], PROTOCOL_VERSION);

    // Compatibility is advisory: the same connection keeps working
    send(
        &mut ws,
        &Message::new(protocol::ROUTE_FILE_LIST, serde_json::json!({})),
    )
    .await;
    let list = recv_route(&mut ws, protocol::ROUTE_PUSH_FILE_LIST).await;
    assert!(list.data["files"].is_array());

    bridge.stop();
}

#[tokio::test]
async fn create_then_open_round_trip_over_the_wire() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = Bridge::spawn(dir.path()).await;
    let mut ws = connect(bridge.port).await;

    send(
        &mut ws,
        &Message::new(
            protocol::ROUTE_FILE_CREATE,
            serde_json::json!({
                "directory": dir.path().display().to_string(),
                "file_name": "a.json",
                "content": {"x": 1},
            }),
        ),
    )
    .await;
    let ack = recv_route(&mut ws, protocol::ROUTE_ACK_FILE_CREATED).await;
    let created = ack.data["file_path"].as_str().unwrap().to_string();

    send(
        &mut ws,
        &Message::new(
            protocol::ROUTE_FILE_OPEN,
            serde_json::json!({"file_path": created}),
        ),
    )
    .await;
    let content = recv_route(&mut ws, protocol::ROUTE_PUSH_FILE_CONTENT).await;
    assert_eq!(content.data["content"], serde_json::json!({"x": 1}));

    bridge.stop();
}

#[tokio::test]
async fn unknown_route_returns_error_to_sender_only() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = Bridge::spawn(dir.path()).await;
    let mut ws = connect(bridge.port).await;

    send(&mut ws, &Message::new("/bogus/route", serde_json::json!({}))).await;
    let err = recv_route(&mut ws, protocol::ROUTE_ERROR).await;
    assert_eq!(err.data["code"], "INVALID_REQUEST");

    bridge.stop();
}

#[tokio::test]
async fn external_file_change_is_broadcast() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = Bridge::spawn(dir.path()).await;
    let mut ws_a = connect(bridge.port).await;
    let mut ws_b = connect(bridge.port).await;

    // Both clients registered before the change happens
    recv_route(&mut ws_a, protocol::ROUTE_PUSH_FILE_LIST).await;
    recv_route(&mut ws_b, protocol::ROUTE_PUSH_FILE_LIST).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    std::fs::write(dir.path().join("external.json"), "{}").unwrap();

    for ws in [&mut ws_a, &mut ws_b] {
        let change = recv_route(ws, protocol::ROUTE_PUSH_FILE_CHANGED).await;
        assert_eq!(change.data["kind"], "created");
        assert!(change.data["file_path"]
            .as_str()
            .unwrap()
            .ends_with("external.json"));
    }
    assert_eq!(bridge.registry.connection_count(), 2);

    bridge.stop();
}

#[tokio::test]
async fn disconnect_shrinks_the_registry() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = Bridge::spawn(dir.path()).await;

    let mut ws = connect(bridge.port).await;
    recv_route(&mut ws, protocol::ROUTE_PUSH_FILE_LIST).await;
    assert_eq!(bridge.registry.connection_count(), 1);

    ws.close(None).await.unwrap();
    for _ in 0..50 {
        if bridge.registry.connection_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(bridge.registry.connection_count(), 0);

    bridge.stop();
}

#[tokio::test]
async fn health_probe_and_quit_share_the_port() {
    let dir = tempfile::tempdir().unwrap();
    let mut bridge = Bridge::spawn(dir.path()).await;
    let client = reqwest::Client::new();

    let health = client
        .get(format!("http://127.0.0.1:{}/health", bridge.port))
        .send()
        .await
        .unwrap();
    assert!(health.status().is_success());

    let quit = client
        .post(format!("http://127.0.0.1:{}/quit", bridge.port))
        .send()
        .await
        .unwrap();
    assert!(quit.status().is_success());

    tokio::time::timeout(Duration::from_secs(5), bridge.quit_rx.recv())
        .await
        .expect("quit was never signalled");

    bridge.stop();
}

#[tokio::test]
async fn supervisor_runs_the_real_bridge_binary() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.json"), "{}").unwrap();

    let port = supervisor::ports::allocate_in(23000, 23999, 23100).unwrap();
    let cfg = supervisor::SupervisorConfig::new(
        std::path::PathBuf::from(env!("CARGO_BIN_EXE_flowbridge")),
        dir.path().to_path_buf(),
        dir.path().join("logs"),
        port,
    );
    let sup = supervisor::ProcessSupervisor::new(cfg);

    sup.start().await.unwrap();
    sup.wait_for_healthy(Duration::from_secs(20)).await.unwrap();
    assert!(sup.is_running().await);
    let handle = sup.process_handle().await.unwrap();
    assert!(handle.pid.is_some());

    // A client can reach the supervised bridge
    let mut ws = connect(port).await;
    recv_route(&mut ws, protocol::ROUTE_PUSH_FILE_LIST).await;
    drop(ws);

    sup.stop().await.unwrap();
    assert_eq!(sup.state().await, supervisor::SupervisorState::Stopped);
    let handle = sup.process_handle().await.unwrap();
    assert!(!handle.running);
    assert!(handle.stopped_at.is_some());
}
