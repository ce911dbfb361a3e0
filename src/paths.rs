//! Default filesystem locations for flowbridge data

use std::path::{Path, PathBuf};

use crate::{BridgeError, Result};

/// Application data directory (`~/.local/share/flowbridge` or platform
/// equivalent), falling back to the current directory when the platform
/// offers no data dir.
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("flowbridge"))
        .unwrap_or_else(|| PathBuf::from(".flowbridge"))
}

/// Default directory for bridge log files.
pub fn default_log_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Default config file location.
pub fn default_config_file() -> PathBuf {
    data_dir().join("config.json")
}

/// Resolve a path string, treating relative paths as relative to CWD.
pub fn resolve_path_or_cwd(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        let cwd = std::env::current_dir().map_err(|e| BridgeError::Internal {
            message: format!("cannot determine current directory: {}", e),
        })?;
        Ok(cwd.join(path))
    }
}

/// Lexically normalize a path: resolve `.` and `..` components without
/// touching the filesystem, so containment checks work for paths that do
/// not exist yet.
pub fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(Component::ParentDir.as_os_str());
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
