//! Flowbridge: local bridge between a pipeline editor UI and the filesystem
//!
//! The bridge keeps a remote editor client's view of a project's pipeline
//! files synchronized in near-real-time and routes typed requests between
//! the client and capability handlers, all over a single loopback
//! WebSocket port. A companion launcher binary supervises the bridge
//! process itself.
//!
//! # Architecture
//!
//! ```text
//! flowbridge-launcher (parent shell)
//!   ├── port allocator        pick a free loopback port
//!   └── process supervisor    spawn, health-check, restart, stop
//!         │
//!         ▼
//! flowbridge (daemon)
//!   ├── file index service    scan + watch + debounce project files
//!   ├── transport server      WebSocket accept loop, /health, /quit
//!   ├── connection registry   live connection set, send/broadcast
//!   └── router                handshake + prefix dispatch to handlers
//! ```
//!
//! # Protocol
//!
//! JSON envelopes over the socket:
//!
//! ```json
//! // Client -> Server
//! {"route": "/system/handshake", "data": {"protocol_version": "0.4.0"}}
//! {"route": "/file/open", "data": {"file_path": "/project/tasks.json"}}
//!
//! // Server -> Client
//! {"route": "/push/file_changed", "data": {"kind": "modified", "file_path": "..."}}
//! {"route": "/error", "data": {"code": "FILE_NOT_FOUND", "message": "..."}}
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod index;
pub mod paths;
pub mod protocol;
pub mod router;
pub mod server;
pub mod supervisor;

// Re-export commonly used types
pub use config::Config;
pub use error::{BridgeError, Result};
pub use index::{FileChangeEvent, FileIndexService, FileRecord};
pub use protocol::{Message, PROTOCOL_VERSION};
pub use router::{Handler, Router};
pub use server::{Connection, ConnectionRegistry, TransportServer};
pub use supervisor::{ProcessSupervisor, SupervisorConfig, SupervisorState};
