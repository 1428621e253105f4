//! Registered subscription model

use serde::{Deserialize, Serialize};

use super::Method;

/// A subscription registered by the caller
///
/// `params` is opaque to the client: it is copied verbatim into the bucket of
/// `method` when the merged request is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Stream category
    pub method: Method,
    /// Filter parameters for the category
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Subscription {
    pub fn new(method: Method, params: serde_json::Value) -> Self {
        Self { method, params }
    }
}
