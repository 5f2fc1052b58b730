//! The wire-transport seam.
//!
//! The admission-control core never talks HTTP itself; it hands an
//! [`ApiRequest`] to whatever [`Transport`] the application wires in and
//! gets back a decoded [`ApiResponse`] with the raw response headers,
//! from which the owning bucket reads its quota signals.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use corvid_core::Method;

use crate::error::TransportError;

/// One logical REST request, fully resolved.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// Concrete endpoint path, e.g. `/channels/42/messages`.
    pub endpoint: String,
    pub method: Method,
    /// JSON body: a mapping, a list, or absent.
    pub body: Option<Value>,
    /// Multipart file attachments.
    pub files: Vec<AttachedFile>,
}

impl ApiRequest {
    pub fn new(endpoint: impl Into<String>, method: Method) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            body: None,
            files: Vec::new(),
        }
    }
}

/// A file attached to a multipart request.
#[derive(Debug, Clone)]
pub struct AttachedFile {
    pub name: String,
    pub data: Vec<u8>,
}

/// A decoded response from the transport.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    /// Raw response headers; the bucket parses its quota signals here.
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Serializes one logical request into a wire call.
///
/// Implementations must be safe to call concurrently; the buckets issue
/// overlapping requests whenever quota allows.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError>;
}
