//! Message router: version handshake plus prefix dispatch
//!
//! The dispatch table is built once at startup; registration rejects
//! overlapping prefixes so resolution (exact match first, then longest
//! prefix) is unambiguous. Unroutable messages earn an `INVALID_REQUEST`
//! envelope sent to the originating connection only.
//!
//! The handshake is advisory: a client declaring a mismatched protocol
//! version gets a negative response but is not disconnected, and every
//! other route keeps being served. This is intentional — compatibility is
//! the client's decision to act on, per-message errors cover the rest.

use std::sync::Arc;

use crate::protocol::{
    HandshakeRequest, HandshakeResponse, Message, PROTOCOL_VERSION, ROUTE_HANDSHAKE,
    ROUTE_HANDSHAKE_RESPONSE,
};
use crate::server::Connection;
use crate::{BridgeError, Result};

/// Capability handler bound to a set of route prefixes
pub trait Handler: Send + Sync {
    /// Route prefixes this handler serves
    fn route_prefixes(&self) -> Vec<&'static str>;

    /// Handle one message; a returned message goes back to the
    /// originating connection. Handlers may also send or broadcast
    /// directly through the registry.
    fn handle(&self, msg: &Message, conn: &Arc<Connection>) -> Option<Message>;
}

/// Route dispatcher
pub struct Router {
    routes: Vec<(String, Arc<dyn Handler>)>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Register a handler under its declared prefixes. Overlapping
    /// prefixes are a startup configuration error.
    pub fn register(&mut self, handler: Arc<dyn Handler>) -> Result<()> {
        for prefix in handler.route_prefixes() {
            for (existing, _) in &self.routes {
                if existing == prefix
                    || existing.starts_with(prefix)
                    || prefix.starts_with(existing.as_str())
                {
                    return Err(BridgeError::Internal {
                        message: format!(
                            "route prefix {:?} overlaps registered prefix {:?}",
                            prefix, existing
                        ),
                    });
                }
            }
            tracing::info!("registered route handler: {}", prefix);
            self.routes.push((prefix.to_string(), Arc::clone(&handler)));
        }
        Ok(())
    }

    /// Dispatch one inbound message.
    pub fn route(&self, msg: &Message, conn: &Arc<Connection>) {
        if msg.route == ROUTE_HANDSHAKE {
            self.handle_handshake(msg, conn);
            return;
        }

        let handler = match self.find_handler(&msg.route) {
            Some(handler) => handler,
            None => {
                tracing::warn!("no handler for route {}", msg.route);
                conn.send_error(&BridgeError::InvalidRequest {
                    reason: format!("unknown route: {}", msg.route),
                });
                return;
            }
        };

        if let Some(response) = handler.handle(msg, conn) {
            if let Err(e) = conn.send(&response) {
                tracing::error!("failed to send response to {}: {}", conn.id(), e);
            }
        }
    }

    fn find_handler(&self, route: &str) -> Option<&Arc<dyn Handler>> {
        // Exact match first
        if let Some((_, handler)) = self.routes.iter().find(|(prefix, _)| prefix == route) {
            return Some(handler);
        }
        // Longest applicable prefix
        self.routes
            .iter()
            .filter(|(prefix, _)| route.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, handler)| handler)
    }

    fn handle_handshake(&self, msg: &Message, conn: &Arc<Connection>) {
        let response = match serde_json::from_value::<HandshakeRequest>(msg.data.clone()) {
            Ok(req) if req.protocol_version == PROTOCOL_VERSION => HandshakeResponse {
                success: true,
                server_version: PROTOCOL_VERSION.to_string(),
                required_version: PROTOCOL_VERSION.to_string(),
                message: "protocol versions match".to_string(),
            },
            Ok(req) => {
                tracing::warn!(
                    "protocol version mismatch: client {} vs server {}",
                    req.protocol_version,
                    PROTOCOL_VERSION
                );
                HandshakeResponse {
                    success: false,
                    server_version: PROTOCOL_VERSION.to_string(),
                    required_version: PROTOCOL_VERSION.to_string(),
                    message: format!(
                        "client protocol {} does not match server {}",
                        req.protocol_version, PROTOCOL_VERSION
                    ),
                }
            }
            Err(e) => HandshakeResponse {
                success: false,
                server_version: PROTOCOL_VERSION.to_string(),
                required_version: PROTOCOL_VERSION.to_string(),
                message: format!("malformed handshake payload: {}", e),
            },
        };

        let msg = Message::new(ROUTE_HANDSHAKE_RESPONSE, response);
        if let Err(e) = conn.send(&msg) {
            tracing::error!("failed to send handshake response: {}", e);
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}
