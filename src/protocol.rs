//! Wire protocol: message envelope, routes and typed payloads
//!
//! All traffic is JSON over a persistent WebSocket. Every frame is a
//! [`Message`] envelope `{"route": "...", "data": ...}`; the route is a
//! hierarchical string used for handshake detection and prefix dispatch.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version answered during the handshake.
pub const PROTOCOL_VERSION: &str = "0.4.0";

// Reserved system routes
pub const ROUTE_HANDSHAKE: &str = "/system/handshake";
pub const ROUTE_HANDSHAKE_RESPONSE: &str = "/system/handshake/response";
pub const ROUTE_ERROR: &str = "/error";

// Client -> server routes
pub const ROUTE_FILE_LIST: &str = "/file/list";
pub const ROUTE_FILE_OPEN: &str = "/file/open";
pub const ROUTE_FILE_SAVE: &str = "/file/save";
pub const ROUTE_FILE_SAVE_PAIR: &str = "/file/save_pair";
pub const ROUTE_FILE_CREATE: &str = "/file/create";
pub const ROUTE_RESOURCE_LIST: &str = "/resource/list";
pub const ROUTE_RESOURCE_GET_IMAGE: &str = "/resource/get_image";
pub const ROUTE_RESOURCE_GET_IMAGES: &str = "/resource/get_images";
pub const ROUTE_RESOURCE_REFRESH: &str = "/resource/refresh";

// Server -> client routes
pub const ROUTE_PUSH_FILE_LIST: &str = "/push/file_list";
pub const ROUTE_PUSH_FILE_CONTENT: &str = "/push/file_content";
pub const ROUTE_PUSH_FILE_CHANGED: &str = "/push/file_changed";
pub const ROUTE_PUSH_RESOURCE_LIST: &str = "/push/resource_list";
pub const ROUTE_PUSH_IMAGE: &str = "/push/image";
pub const ROUTE_PUSH_IMAGES: &str = "/push/images";
pub const ROUTE_ACK_FILE_SAVED: &str = "/ack/file_saved";
pub const ROUTE_ACK_PAIR_SAVED: &str = "/ack/pair_saved";
pub const ROUTE_ACK_FILE_CREATED: &str = "/ack/file_created";

/// WebSocket message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Route path
    pub route: String,
    /// Message data
    #[serde(default)]
    pub data: Value,
}

impl Message {
    /// Build an envelope from any serializable payload.
    ///
    /// Serialization of payload types defined in this module cannot fail;
    /// a failure is reported as a null-data message rather than a panic.
    pub fn new(route: &str, data: impl Serialize) -> Self {
        let data = serde_json::to_value(data).unwrap_or(Value::Null);
        Self {
            route: route.to_string(),
            data,
        }
    }

    /// Error envelope on the reserved error route.
    pub fn error(data: ErrorData) -> Self {
        Self::new(ROUTE_ERROR, data)
    }
}

/// Error payload carried on [`ROUTE_ERROR`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorData {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

/// Version handshake request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub protocol_version: String,
}

/// Version handshake response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeResponse {
    pub success: bool,
    pub server_version: String,
    pub required_version: String,
    pub message: String,
}

/// File entry as published to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub file_path: String,
    pub file_name: String,
    pub relative_path: String,
    pub last_modified: u64,
}

/// Payload of [`ROUTE_PUSH_FILE_LIST`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileListData {
    pub root: String,
    pub files: Vec<FileInfo>,
}

/// Payload of [`ROUTE_PUSH_FILE_CONTENT`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileContentData {
    pub file_path: String,
    pub content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shadow_config: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
}

/// Payload of [`ROUTE_PUSH_FILE_CHANGED`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChangedData {
    pub kind: String,
    pub file_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenFileRequest {
    pub file_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveFileRequest {
    pub file_path: String,
    pub content: Value,
    #[serde(default)]
    pub indent: Option<usize>,
}

/// Save a pipeline file together with its sibling shadow config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavePairRequest {
    pub pipeline_path: String,
    pub pipeline: Value,
    pub config: Value,
    #[serde(default)]
    pub indent: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFileRequest {
    pub directory: String,
    pub file_name: String,
    #[serde(default)]
    pub content: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveAckData {
    pub file_path: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairSavedAckData {
    pub pipeline_path: String,
    pub config_path: String,
    pub status: String,
}

/// Resource bundle as discovered under the project root.
///
/// Bundle contents are passed through as data; the bridge never interprets
/// them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceBundle {
    pub name: String,
    pub abs_path: String,
    pub rel_path: String,
    pub has_pipeline: bool,
    pub has_image: bool,
    pub has_model: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceListData {
    pub root: String,
    pub bundles: Vec<ResourceBundle>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetImageRequest {
    pub relative_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetImagesRequest {
    pub relative_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageData {
    pub relative_path: String,
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub absolute_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagesData {
    pub images: Vec<ImageData>,
}
