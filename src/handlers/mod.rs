//! Capability handlers dispatched by the router

pub mod file;
pub mod resource;

pub use file::FileHandler;
pub use resource::ResourceHandler;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{BridgeError, Result};

/// Decode a message payload into a typed request.
pub(crate) fn parse_data<T: DeserializeOwned>(data: &Value) -> Result<T> {
    serde_json::from_value(data.clone()).map_err(BridgeError::invalid_payload)
}
