//! Transport server: WebSocket accept loop plus the two plain-HTTP probes
//!
//! All client traffic is WebSocket on a single loopback port. The same
//! listener also answers `GET /health` (readiness probe) and `POST /quit`
//! (orderly shutdown trigger) — the request head is peeked before the
//! upgrade and anything that is not one of the two probes falls through to
//! the WebSocket handshake.

pub mod connection;
pub mod registry;

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::protocol::Message;
use crate::router::Router;
use crate::{BridgeError, Result};

pub use connection::{Connection, OUTBOUND_QUEUE_SIZE};
pub use registry::{ConnectionRegistry, RegistryEvent};

/// WebSocket transport server
pub struct TransportServer {
    listener: TcpListener,
    registry: Arc<ConnectionRegistry>,
    router: Arc<Router>,
    quit_tx: mpsc::Sender<()>,
}

impl TransportServer {
    /// Bind the loopback listener.
    pub async fn bind(
        host: &str,
        port: u16,
        registry: Arc<ConnectionRegistry>,
        router: Arc<Router>,
        quit_tx: mpsc::Sender<()>,
    ) -> Result<Self> {
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|e| BridgeError::ConnectionFailed {
                message: format!("cannot bind {}:{}: {}", host, port, e),
            })?;
        tracing::info!("listening on ws://{}:{}", host, port);
        Ok(Self {
            listener,
            registry,
            router,
            quit_tx,
        })
    }

    pub fn local_port(&self) -> Result<u16> {
        Ok(self
            .listener
            .local_addr()
            .map_err(BridgeError::internal)?
            .port())
    }

    /// Accept connections until the task is cancelled.
    pub async fn serve(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    tracing::debug!("accepted connection from {}", addr);
                    let registry = Arc::clone(&self.registry);
                    let router = Arc::clone(&self.router);
                    let quit_tx = self.quit_tx.clone();
                    tokio::spawn(async move {
                        handle_socket(stream, registry, router, quit_tx).await;
                    });
                }
                Err(e) => {
                    tracing::error!("failed to accept connection: {}", e);
                }
            }
        }
    }
}

async fn handle_socket(
    mut stream: TcpStream,
    registry: Arc<ConnectionRegistry>,
    router: Arc<Router>,
    quit_tx: mpsc::Sender<()>,
) {
    let mut head = [0u8; 256];
    let peeked = match stream.peek(&mut head).await {
        Ok(n) => n,
        Err(e) => {
            tracing::debug!("peek failed: {}", e);
            return;
        }
    };
    let head = String::from_utf8_lossy(&head[..peeked]);

    if head.starts_with("GET /health") {
        respond_http(&mut stream, "200 OK", r#"{"status":"ok"}"#).await;
        return;
    }
    if head.starts_with("POST /quit") {
        respond_http(&mut stream, "200 OK", r#"{"status":"quitting"}"#).await;
        tracing::info!("quit requested over HTTP");
        let _ = quit_tx.send(()).await;
        return;
    }

    // Everything else is expected to be a WebSocket upgrade.
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            // Transport-level failure: log and abandon, no retry
            tracing::error!("websocket handshake failed: {}", e);
            return;
        }
    };

    let id = format!(
        "cli_{}",
        uuid::Uuid::new_v4()
            .to_string()
            .split('-')
            .next()
            .unwrap_or("anon")
    );
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (out_tx, mut out_rx) = mpsc::channel::<WsMessage>(OUTBOUND_QUEUE_SIZE);
    let conn = Arc::new(Connection::new(id.clone(), out_tx));
    registry.register(Arc::clone(&conn));

    // Writer: single drain point per connection, frames leave in enqueue
    // order. Ends when the queue closes (connection unregistered).
    let writer_id = id.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if let Err(e) = ws_tx.send(frame).await {
                tracing::debug!("write to {} failed: {}", writer_id, e);
                return;
            }
        }
        let _ = ws_tx.send(WsMessage::Close(None)).await;
    });

    // Reader: decode frames and hand them to the router synchronously.
    while let Some(res) = ws_rx.next().await {
        match res {
            Ok(WsMessage::Text(text)) => match serde_json::from_str::<Message>(&text) {
                Ok(msg) => router.route(&msg, &conn),
                Err(e) => conn.send_error(&BridgeError::invalid_payload(e)),
            },
            Ok(WsMessage::Ping(data)) => conn.enqueue(WsMessage::Pong(data)),
            Ok(WsMessage::Close(_)) => {
                tracing::debug!("client {} requested close", id);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("read from {} failed: {}", id, e);
                break;
            }
        }
    }

    // Unregistering drops the registry's sender; with the reader's clone
    // gone too the queue closes and the writer stops on its own.
    registry.unregister(&id);
    drop(conn);
    let _ = writer.await;
}

/// Drain the request head and write a minimal HTTP/1.1 response.
async fn respond_http(stream: &mut TcpStream, status: &str, body: &str) {
    // Consume the request so the peer sees a clean exchange; bounded read,
    // the probes carry no body worth parsing.
    let mut sink = [0u8; 1024];
    let _ = tokio::time::timeout(
        std::time::Duration::from_millis(250),
        stream.read(&mut sink),
    )
    .await;

    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        tracing::debug!("http response failed: {}", e);
    }
    let _ = stream.shutdown().await;
}
