//! Client connection with a bounded outbound queue
//!
//! Each accepted WebSocket gets one reader task and one writer task. The
//! writer drains the outbound queue in enqueue order; enqueuing never
//! blocks the caller — when the queue is full the message is dropped and a
//! back-pressure warning is recorded.

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::protocol::Message;
use crate::{BridgeError, Result};

/// Outbound queue capacity per connection.
pub const OUTBOUND_QUEUE_SIZE: usize = 256;

/// A live client connection, owned by the registry.
pub struct Connection {
    id: String,
    outbound: mpsc::Sender<WsMessage>,
}

impl Connection {
    pub(crate) fn new(id: String, outbound: mpsc::Sender<WsMessage>) -> Self {
        Self { id, outbound }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Serialize and enqueue a message. Best-effort: a full queue drops the
    /// message with a warning, a closed queue (connection going away) is a
    /// no-op.
    pub fn send(&self, msg: &Message) -> Result<()> {
        let text = serde_json::to_string(msg).map_err(BridgeError::internal)?;
        self.enqueue(WsMessage::Text(text));
        Ok(())
    }

    /// Report an error to this connection only.
    pub fn send_error(&self, err: &BridgeError) {
        let envelope = Message::error(err.to_error_data());
        if let Err(e) = self.send(&envelope) {
            tracing::error!("failed to send error to {}: {}", self.id, e);
        }
    }

    pub(crate) fn enqueue(&self, frame: WsMessage) {
        match self.outbound.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    "outbound queue full for {}, dropping message (slow client?)",
                    self.id
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("connection {} already closed, dropping message", self.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol;

    fn test_connection(capacity: usize) -> (Connection, mpsc::Receiver<WsMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Connection::new("cli_test".into(), tx), rx)
    }

    #[tokio::test]
    async fn send_enqueues_serialized_envelope() {
        let (conn, mut rx) = test_connection(4);
        conn.send(&Message::new(protocol::ROUTE_PUSH_FILE_CHANGED, serde_json::json!({"kind": "created"})))
            .unwrap();

        let frame = rx.recv().await.unwrap();
        let text = match frame {
            WsMessage::Text(text) => text,
            other => panic!("unexpected frame {:?}", other),
        };
        let msg: Message = serde_json::from_str(&text).unwrap();
        assert_eq!(msg.route, protocol::ROUTE_PUSH_FILE_CHANGED);
    }

    #[tokio::test]
    async fn full_queue_drops_without_error() {
        let (conn, mut rx) = test_connection(1);
        let msg = Message::new(protocol::ROUTE_PUSH_FILE_LIST, serde_json::json!({}));
        conn.send(&msg).unwrap();
        // Queue full now; the second send is dropped, not an error
        conn.send(&msg).unwrap();

        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn ordering_is_preserved() {
        let (conn, mut rx) = test_connection(8);
        for i in 0..5 {
            conn.send(&Message::new("/push/seq", serde_json::json!({ "i": i })))
                .unwrap();
        }
        for i in 0..5 {
            match rx.recv().await.unwrap() {
                WsMessage::Text(text) => {
                    let msg: Message = serde_json::from_str(&text).unwrap();
                    assert_eq!(msg.data["i"], i);
                }
                other => panic!("unexpected frame {:?}", other),
            }
        }
    }
}
