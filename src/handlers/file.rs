//! File capability handler
//!
//! Serves list/open/save/create requests against the file index, pushes
//! the current file list to every client on connect, and relays effective
//! file-change events as broadcasts.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;

use crate::index::FileIndexService;
use crate::protocol::{
    self, CreateFileRequest, FileChangedData, FileContentData, FileInfo, FileListData, Message,
    OpenFileRequest, PairSavedAckData, SaveAckData, SaveFileRequest, SavePairRequest,
};
use crate::router::Handler;
use crate::server::{Connection, ConnectionRegistry, RegistryEvent};
use crate::BridgeError;

use super::parse_data;

/// Handler for the `/file/` route prefix
pub struct FileHandler {
    index: Arc<FileIndexService>,
    registry: Arc<ConnectionRegistry>,
}

impl FileHandler {
    pub fn new(index: Arc<FileIndexService>, registry: Arc<ConnectionRegistry>) -> Arc<Self> {
        Arc::new(Self { index, registry })
    }

    /// Spawn the two push loops: file list on connect, change broadcast on
    /// effective index changes.
    pub fn start_pushers(self: &Arc<Self>) {
        let handler = Arc::clone(self);
        let mut events = self.registry.subscribe_events();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(RegistryEvent::Connected(_)) => handler.push_file_list(),
                    Ok(RegistryEvent::Disconnected(_)) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("registry event stream lagged by {}", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let handler = Arc::clone(self);
        let mut changes = self.index.subscribe();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(event) => {
                        let data = FileChangedData {
                            kind: event.kind.as_str().to_string(),
                            file_path: event.path.display().to_string(),
                        };
                        tracing::info!(
                            "pushing file change: {} {}",
                            data.kind,
                            data.file_path
                        );
                        handler
                            .registry
                            .broadcast(&Message::new(protocol::ROUTE_PUSH_FILE_CHANGED, data));
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("change event stream lagged by {}", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    /// Broadcast the current file list to every connection.
    pub fn push_file_list(&self) {
        let data = self.file_list_data();
        tracing::info!("pushing file list with {} files", data.files.len());
        self.registry
            .broadcast(&Message::new(protocol::ROUTE_PUSH_FILE_LIST, data));
    }

    fn file_list_data(&self) -> FileListData {
        let files: Vec<FileInfo> = self
            .index
            .file_list()
            .iter()
            .map(FileInfo::from)
            .collect();
        FileListData {
            root: self.index.root().display().to_string(),
            files,
        }
    }

    fn handle_open(&self, msg: &Message) -> crate::Result<Message> {
        let req: OpenFileRequest = parse_data(&msg.data)?;
        let (content, shadow_config, config_path) = self.index.read_file(&req.file_path)?;
        Ok(Message::new(
            protocol::ROUTE_PUSH_FILE_CONTENT,
            FileContentData {
                file_path: req.file_path,
                content,
                shadow_config,
                config_path: config_path.map(|p| p.display().to_string()),
            },
        ))
    }

    fn handle_save(&self, msg: &Message) -> crate::Result<Message> {
        let req: SaveFileRequest = parse_data(&msg.data)?;
        self.index.save_file(&req.file_path, &req.content, req.indent)?;
        Ok(Message::new(
            protocol::ROUTE_ACK_FILE_SAVED,
            SaveAckData {
                file_path: req.file_path,
                status: "ok".to_string(),
            },
        ))
    }

    fn handle_save_pair(&self, msg: &Message) -> crate::Result<Message> {
        let req: SavePairRequest = parse_data(&msg.data)?;
        let config_path =
            self.index
                .save_pair(&req.pipeline_path, &req.pipeline, &req.config, req.indent)?;
        Ok(Message::new(
            protocol::ROUTE_ACK_PAIR_SAVED,
            PairSavedAckData {
                pipeline_path: req.pipeline_path,
                config_path: config_path.display().to_string(),
                status: "ok".to_string(),
            },
        ))
    }

    fn handle_create(&self, msg: &Message) -> crate::Result<Message> {
        let req: CreateFileRequest = parse_data(&msg.data)?;
        let created = self
            .index
            .create_file(&req.directory, &req.file_name, req.content.as_ref())?;
        // New file: every client gets the refreshed list
        self.push_file_list();
        Ok(Message::new(
            protocol::ROUTE_ACK_FILE_CREATED,
            SaveAckData {
                file_path: created.display().to_string(),
                status: "ok".to_string(),
            },
        ))
    }
}

impl Handler for FileHandler {
    fn route_prefixes(&self) -> Vec<&'static str> {
        vec!["/file/"]
    }

    fn handle(&self, msg: &Message, conn: &Arc<Connection>) -> Option<Message> {
        let result = match msg.route.as_str() {
            protocol::ROUTE_FILE_LIST => Ok(Message::new(
                protocol::ROUTE_PUSH_FILE_LIST,
                self.file_list_data(),
            )),
            protocol::ROUTE_FILE_OPEN => self.handle_open(msg),
            protocol::ROUTE_FILE_SAVE => self.handle_save(msg),
            protocol::ROUTE_FILE_SAVE_PAIR => self.handle_save_pair(msg),
            protocol::ROUTE_FILE_CREATE => self.handle_create(msg),
            other => Err(BridgeError::InvalidRequest {
                reason: format!("unknown file route: {}", other),
            }),
        };

        match result {
            Ok(response) => Some(response),
            Err(err) => {
                tracing::error!("file request {} failed: {}", msg.route, err);
                conn.send_error(&err);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FileConfig;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    fn setup(dir: &std::path::Path) -> (Arc<FileHandler>, Arc<Connection>, mpsc::Receiver<WsMessage>)
    {
        let cfg = FileConfig {
            root: dir.to_path_buf(),
            ..FileConfig::default()
        };
        let index = FileIndexService::new(&cfg).unwrap();
        index.start().unwrap();
        let registry = ConnectionRegistry::new();
        let handler = FileHandler::new(index, registry);
        let (tx, rx) = mpsc::channel(16);
        let conn = Arc::new(Connection::new("cli_test".into(), tx));
        (handler, conn, rx)
    }

    fn text_of(frame: WsMessage) -> Message {
        match frame {
            WsMessage::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[tokio::test]
    async fn create_then_open_round_trips_content() {
        let dir = tempfile::tempdir().unwrap();
        let (handler, conn, _rx) = setup(dir.path());

        let create = Message::new(
            protocol::ROUTE_FILE_CREATE,
            serde_json::json!({
                "directory": dir.path().display().to_string(),
                "file_name": "a.json",
                "content": {"x": 1},
            }),
        );
        let ack = handler.handle(&create, &conn).expect("create ack");
        assert_eq!(ack.route, protocol::ROUTE_ACK_FILE_CREATED);
        let created_path = ack.data["file_path"].as_str().unwrap().to_string();

        let open = Message::new(
            protocol::ROUTE_FILE_OPEN,
            serde_json::json!({"file_path": created_path}),
        );
        let content = handler.handle(&open, &conn).expect("file content");
        assert_eq!(content.route, protocol::ROUTE_PUSH_FILE_CONTENT);
        assert_eq!(content.data["content"], serde_json::json!({"x": 1}));
    }

    #[tokio::test]
    async fn open_missing_file_sends_error_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let (handler, conn, mut rx) = setup(dir.path());

        let open = Message::new(
            protocol::ROUTE_FILE_OPEN,
            serde_json::json!({"file_path": dir.path().join("ghost.json").display().to_string()}),
        );
        assert!(handler.handle(&open, &conn).is_none());
        let err = text_of(rx.try_recv().unwrap());
        assert_eq!(err.route, protocol::ROUTE_ERROR);
        assert_eq!(err.data["code"], "FILE_NOT_FOUND");
    }

    #[tokio::test]
    async fn malformed_payload_is_invalid_payload() {
        let dir = tempfile::tempdir().unwrap();
        let (handler, conn, mut rx) = setup(dir.path());

        let open = Message::new(protocol::ROUTE_FILE_OPEN, serde_json::json!({"bogus": true}));
        assert!(handler.handle(&open, &conn).is_none());
        let err = text_of(rx.try_recv().unwrap());
        assert_eq!(err.data["code"], "INVALID_PAYLOAD");
    }

    #[tokio::test]
    async fn file_list_is_sorted_and_scoped_to_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.json"), "{}").unwrap();
        std::fs::write(dir.path().join("a.json"), "{}").unwrap();
        let (handler, conn, _rx) = setup(dir.path());

        let list = handler
            .handle(&Message::new(protocol::ROUTE_FILE_LIST, serde_json::json!({})), &conn)
            .expect("list");
        let files = list.data["files"].as_array().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0]["file_name"], "a.json");
        assert_eq!(files[1]["file_name"], "b.json");
    }
}
