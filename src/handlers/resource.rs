//! Resource capability handler
//!
//! Discovers resource bundles under the project root and serves their
//! image assets to clients. Bundle contents are passed through as data;
//! nothing in here interprets them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use parking_lot::RwLock;

use crate::protocol::{
    self, GetImageRequest, GetImagesRequest, ImageData, ImagesData, Message, ResourceBundle,
    ResourceListData,
};
use crate::router::Handler;
use crate::server::Connection;
use crate::BridgeError;

use super::parse_data;

/// Bundle discovery never descends past this depth.
const MAX_BUNDLE_DEPTH: usize = 2;

/// Handler for the `/resource/` route prefix
pub struct ResourceHandler {
    root: PathBuf,
    exclude: Vec<String>,
    bundles: RwLock<Vec<ResourceBundle>>,
    image_dirs: RwLock<Vec<PathBuf>>,
}

impl ResourceHandler {
    pub fn new(root: PathBuf, exclude: Vec<String>) -> Arc<Self> {
        let handler = Arc::new(Self {
            root,
            exclude,
            bundles: RwLock::new(Vec::new()),
            image_dirs: RwLock::new(Vec::new()),
        });
        let found = handler.scan();
        tracing::info!("resource scan found {} bundles", found);
        handler
    }

    /// Rescan the root for bundles; returns how many were found.
    pub fn scan(&self) -> usize {
        let mut bundles = Vec::new();
        let mut image_dirs = Vec::new();

        if let Some(bundle) = check_bundle(&self.root, "") {
            if let Some(dir) = &bundle.image_dir {
                image_dirs.push(PathBuf::from(dir));
            }
            bundles.push(bundle);
        }
        self.scan_dir(&self.root, "", 0, &mut bundles, &mut image_dirs);

        let count = bundles.len();
        *self.bundles.write() = bundles;
        *self.image_dirs.write() = image_dirs;
        count
    }

    fn scan_dir(
        &self,
        abs: &Path,
        rel: &str,
        depth: usize,
        bundles: &mut Vec<ResourceBundle>,
        image_dirs: &mut Vec<PathBuf>,
    ) {
        if depth >= MAX_BUNDLE_DEPTH {
            return;
        }
        let entries = match std::fs::read_dir(abs) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || self.exclude.iter().any(|e| *e == name) {
                continue;
            }
            let sub_abs = entry.path();
            let sub_rel = if rel.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", rel, name)
            };

            if let Some(bundle) = check_bundle(&sub_abs, &sub_rel) {
                if !bundles.iter().any(|b| b.abs_path == bundle.abs_path) {
                    if let Some(dir) = &bundle.image_dir {
                        image_dirs.push(PathBuf::from(dir));
                    }
                    bundles.push(bundle);
                }
            }
            self.scan_dir(&sub_abs, &sub_rel, depth + 1, bundles, image_dirs);
        }
    }

    fn list_data(&self) -> ResourceListData {
        ResourceListData {
            root: self.root.display().to_string(),
            bundles: self.bundles.read().clone(),
        }
    }

    /// Look an image up across every discovered `image/` directory.
    fn find_image(&self, relative_path: &str) -> Option<PathBuf> {
        let rel = Path::new(relative_path);
        if rel.is_absolute() || rel.components().any(|c| c.as_os_str() == "..") {
            return None;
        }
        self.image_dirs
            .read()
            .iter()
            .map(|dir| dir.join(rel))
            .find(|candidate| candidate.is_file())
    }

    fn image_data(&self, relative_path: &str) -> ImageData {
        let Some(abs) = self.find_image(relative_path) else {
            return ImageData {
                relative_path: relative_path.to_string(),
                found: false,
                absolute_path: None,
                mime_type: None,
                data: None,
            };
        };
        match std::fs::read(&abs) {
            Ok(bytes) => ImageData {
                relative_path: relative_path.to_string(),
                found: true,
                absolute_path: Some(abs.display().to_string()),
                mime_type: Some(mime_for(&abs).to_string()),
                data: Some(BASE64.encode(bytes)),
            },
            Err(e) => {
                tracing::warn!("cannot read image {}: {}", abs.display(), e);
                ImageData {
                    relative_path: relative_path.to_string(),
                    found: false,
                    absolute_path: Some(abs.display().to_string()),
                    mime_type: None,
                    data: None,
                }
            }
        }
    }
}

impl Handler for ResourceHandler {
    fn route_prefixes(&self) -> Vec<&'static str> {
        vec!["/resource/"]
    }

    fn handle(&self, msg: &Message, conn: &Arc<Connection>) -> Option<Message> {
        let result = match msg.route.as_str() {
            protocol::ROUTE_RESOURCE_LIST => Ok(Message::new(
                protocol::ROUTE_PUSH_RESOURCE_LIST,
                self.list_data(),
            )),
            protocol::ROUTE_RESOURCE_REFRESH => {
                let found = self.scan();
                tracing::info!("resource rescan found {} bundles", found);
                Ok(Message::new(
                    protocol::ROUTE_PUSH_RESOURCE_LIST,
                    self.list_data(),
                ))
            }
            protocol::ROUTE_RESOURCE_GET_IMAGE => {
                parse_data::<GetImageRequest>(&msg.data).map(|req| {
                    Message::new(protocol::ROUTE_PUSH_IMAGE, self.image_data(&req.relative_path))
                })
            }
            protocol::ROUTE_RESOURCE_GET_IMAGES => {
                parse_data::<GetImagesRequest>(&msg.data).map(|req| {
                    let images = req
                        .relative_paths
                        .iter()
                        .map(|rel| self.image_data(rel))
                        .collect();
                    Message::new(protocol::ROUTE_PUSH_IMAGES, ImagesData { images })
                })
            }
            other => Err(BridgeError::InvalidRequest {
                reason: format!("unknown resource route: {}", other),
            }),
        };

        match result {
            Ok(response) => Some(response),
            Err(err) => {
                tracing::error!("resource request {} failed: {}", msg.route, err);
                conn.send_error(&err);
                None
            }
        }
    }
}

/// A directory is a bundle when it carries at least one of the marker
/// entries.
fn check_bundle(abs: &Path, rel: &str) -> Option<ResourceBundle> {
    let has_pipeline = abs.join("pipeline").is_dir();
    let has_image = abs.join("image").is_dir();
    let has_model = abs.join("model").is_dir();
    let has_default = abs.join("default_pipeline.json").is_file();
    if !has_pipeline && !has_image && !has_model && !has_default {
        return None;
    }

    let name = if rel.is_empty() {
        "(root)".to_string()
    } else {
        abs.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| rel.to_string())
    };
    let image_dir = has_image.then(|| abs.join("image").display().to_string());

    Some(ResourceBundle {
        name,
        abs_path: abs.display().to_string(),
        rel_path: rel.to_string(),
        has_pipeline,
        has_image,
        has_model,
        image_dir,
    })
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tokio::sync::mpsc;

    fn conn() -> Arc<Connection> {
        let (tx, _rx) = mpsc::channel(16);
        Arc::new(Connection::new("cli_test".into(), tx))
    }

    #[tokio::test]
    async fn bundles_are_discovered_by_markers() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("bundle_a/pipeline")).unwrap();
        fs::create_dir_all(dir.path().join("bundle_a/image")).unwrap();
        fs::create_dir_all(dir.path().join("plain")).unwrap();
        fs::create_dir_all(dir.path().join("bundle_b")).unwrap();
        fs::write(dir.path().join("bundle_b/default_pipeline.json"), "{}").unwrap();

        let handler = ResourceHandler::new(dir.path().to_path_buf(), vec![]);
        let msg = Message::new(protocol::ROUTE_RESOURCE_LIST, serde_json::json!({}));
        let response = handler.handle(&msg, &conn()).unwrap();
        let bundles = response.data["bundles"].as_array().unwrap();
        let names: Vec<_> = bundles.iter().map(|b| b["name"].as_str().unwrap()).collect();
        assert!(names.contains(&"bundle_a"));
        assert!(names.contains(&"bundle_b"));
        assert!(!names.contains(&"plain"));
    }

    #[tokio::test]
    async fn image_fetch_returns_base64_payload() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("image")).unwrap();
        fs::write(dir.path().join("image/icon.png"), [0x89, 0x50, 0x4e, 0x47]).unwrap();

        let handler = ResourceHandler::new(dir.path().to_path_buf(), vec![]);
        let msg = Message::new(
            protocol::ROUTE_RESOURCE_GET_IMAGE,
            serde_json::json!({"relative_path": "icon.png"}),
        );
        let response = handler.handle(&msg, &conn()).unwrap();
        assert_eq!(response.route, protocol::ROUTE_PUSH_IMAGE);
        assert_eq!(response.data["found"], true);
        assert_eq!(response.data["mime_type"], "image/png");
        assert_eq!(response.data["data"], BASE64.encode([0x89u8, 0x50, 0x4e, 0x47]));
    }

    #[tokio::test]
    async fn missing_image_reports_not_found_without_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("image")).unwrap();
        let handler = ResourceHandler::new(dir.path().to_path_buf(), vec![]);

        let msg = Message::new(
            protocol::ROUTE_RESOURCE_GET_IMAGE,
            serde_json::json!({"relative_path": "nope.png"}),
        );
        let response = handler.handle(&msg, &conn()).unwrap();
        assert_eq!(response.data["found"], false);
    }

    #[tokio::test]
    async fn image_lookup_rejects_path_escapes() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("image")).unwrap();
        let handler = ResourceHandler::new(dir.path().to_path_buf(), vec![]);
        assert!(handler.find_image("../../etc/passwd").is_none());
        assert!(handler.find_image("/etc/passwd").is_none());
    }
}
