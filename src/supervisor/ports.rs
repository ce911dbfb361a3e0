//! Loopback port allocation for the bridge process

use std::net::TcpListener;

use crate::{BridgeError, Result};

/// Inclusive port range reserved for bridge instances.
pub const MIN_PORT: u16 = 9066;
pub const MAX_PORT: u16 = 9199;

/// Allocate a free port, preferring `preferred`.
///
/// The preferred port is clamped into the range, then ports are probed
/// upward to the maximum; if none is free the search wraps and probes from
/// the minimum up to (but excluding) the preferred port.
pub fn allocate(preferred: u16) -> Result<u16> {
    allocate_in(MIN_PORT, MAX_PORT, preferred)
}

/// Range-parameterized variant of [`allocate`].
pub fn allocate_in(min: u16, max: u16, preferred: u16) -> Result<u16> {
    let preferred = if preferred < min || preferred > max {
        min
    } else {
        preferred
    };

    for port in preferred..=max {
        if is_free(port) {
            return Ok(port);
        }
    }
    for port in min..preferred {
        if is_free(port) {
            return Ok(port);
        }
    }

    Err(BridgeError::NoAvailablePort { min, max })
}

/// Liveness test: bind on loopback and release immediately.
pub fn is_free(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}
