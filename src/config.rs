//! Configuration loading with serde defaults and CLI overrides
//!
//! The config file is JSON (JSON5 accepted, so comments and trailing commas
//! survive hand editing). Every field has a default; a missing file yields
//! the default configuration unless a path was given explicitly.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{BridgeError, Result};

/// Server section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Loopback host; the bridge never binds a non-local interface.
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9066,
        }
    }
}

/// File index section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Project root to scan and watch
    pub root: PathBuf,
    /// Directory names pruned from the walk (bare names, not paths)
    pub exclude: Vec<String>,
    /// Extension allow-list, with leading dot
    pub extensions: Vec<String>,
    /// Maximum scan depth, 0 = unlimited
    pub max_depth: usize,
    /// Maximum indexed files, 0 = unlimited
    pub max_files: usize,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            exclude: [
                "node_modules",
                ".git",
                "dist",
                "build",
                ".cache",
                ".venv",
                "__pycache__",
                ".idea",
                ".vscode",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            extensions: vec![".json".to_string(), ".jsonc".to_string()],
            max_depth: 10,
            max_files: 10_000,
        }
    }
}

/// Logging section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Full bridge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub file: FileConfig,
    pub log: LogConfig,
}

impl Config {
    /// Load configuration.
    ///
    /// With an explicit path the file must exist and parse; with `None` a
    /// missing default file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (crate::paths::default_config_file(), false),
        };

        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(BridgeError::FileRead {
                    path: path.display().to_string(),
                    source: e,
                });
            }
        };

        json5::from_str(&raw).map_err(|e| BridgeError::InvalidPayload {
            message: format!("config {}: {}", path.display(), e),
        })
    }

    /// Apply non-empty CLI flags over the loaded file.
    pub fn apply_overrides(
        &mut self,
        root: Option<PathBuf>,
        port: Option<u16>,
        log_level: Option<String>,
    ) {
        if let Some(root) = root {
            self.file.root = root;
        }
        if let Some(port) = port {
            self.server.port = port;
        }
        if let Some(level) = log_level {
            self.log.level = level;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_contract() {
        let cfg = Config::default();
        assert_eq!(cfg.server.port, 9066);
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert!(cfg.file.exclude.iter().any(|e| e == "node_modules"));
        assert_eq!(cfg.file.extensions, vec![".json", ".jsonc"]);
        assert_eq!(cfg.file.max_depth, 10);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut f = std::fs::File::create(&path).unwrap();
        // comments are fine, the file is parsed as JSON5
        writeln!(f, "{{ server: {{ port: 9100 }}, /* rest defaulted */ }}").unwrap();

        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.server.port, 9100);
        assert_eq!(cfg.file.extensions, vec![".json", ".jsonc"]);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/flowbridge.json"))).unwrap_err();
        assert_eq!(err.code(), "FILE_READ_ERROR");
    }

    #[test]
    fn overrides_win() {
        let mut cfg = Config::default();
        cfg.apply_overrides(Some(PathBuf::from("/tmp/p")), Some(9188), Some("debug".into()));
        assert_eq!(cfg.server.port, 9188);
        assert_eq!(cfg.file.root, PathBuf::from("/tmp/p"));
        assert_eq!(cfg.log.level, "debug");
    }
}
