//! Request-execution seam toward the remote store.
//!
//! The engine never talks HTTP itself; it consumes this trait. Frontends
//! supply an implementation that attaches base URLs and auth tokens.

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::models::{Emne, Entity, EntityKind};

/// HTTP verbs the engine issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
            Method::Put => write!(f, "PUT"),
            Method::Patch => write!(f, "PATCH"),
            Method::Delete => write!(f, "DELETE"),
        }
    }
}

/// A completed server response: parsed JSON body plus status code.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub data: Value,
    pub status: u16,
}

/// Errors surfaced by the request-execution capability.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),
}

impl TransportError {
    /// The HTTP status code, if the failure carried one.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Http { status, .. } => Some(*status),
            TransportError::Network(_) => None,
        }
    }
}

/// Core trait for request execution
///
/// One required method does the work; the verb-specific helpers exist so call
/// sites read like the operation they perform. Implementations own route
/// prefixes, headers, and token attachment.
pub trait Transport: Send + Sync {
    /// Executes a request and returns the parsed response.
    fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<ApiResponse, TransportError>;

    fn get(&self, path: &str) -> Result<ApiResponse, TransportError> {
        self.execute(Method::Get, path, None)
    }

    fn post(&self, path: &str, body: &Value) -> Result<ApiResponse, TransportError> {
        self.execute(Method::Post, path, Some(body))
    }

    fn put(&self, path: &str, body: &Value) -> Result<ApiResponse, TransportError> {
        self.execute(Method::Put, path, Some(body))
    }

    fn patch(&self, path: &str, body: &Value) -> Result<ApiResponse, TransportError> {
        self.execute(Method::Patch, path, Some(body))
    }

    fn delete(&self, path: &str) -> Result<ApiResponse, TransportError> {
        self.execute(Method::Delete, path, None)
    }
}

/// Keys under which list responses may be wrapped.
const LIST_WRAPPER_KEYS: [&str; 4] = ["content", "items", "data", "results"];

/// Extracts the element array from a list response, tolerating both a bare
/// array and an object wrapping one under a well-known key.
pub fn value_list_from(value: &Value) -> Vec<Value> {
    if let Some(items) = value.as_array() {
        return items.clone();
    }
    if let Some(obj) = value.as_object() {
        for key in LIST_WRAPPER_KEYS {
            if let Some(items) = obj.get(key).and_then(Value::as_array) {
                return items.clone();
            }
        }
    }
    debug!("unrecognized list response shape, treating as empty");
    Vec::new()
}

/// Unwraps a single-record response that may be nested under "data".
pub fn single_value_from(value: &Value) -> &Value {
    match value.get("data") {
        Some(inner) if inner.is_object() => inner,
        _ => value,
    }
}

/// Parses a list response into entities. Elements that fail to parse are
/// skipped; for single-kind lists the scope's kind overrides whatever the
/// wire carried.
pub fn entity_list_from(value: &Value, kind_override: Option<EntityKind>) -> Vec<Entity> {
    value_list_from(value)
        .iter()
        .filter_map(|item| match serde_json::from_value::<Entity>(item.clone()) {
            Ok(mut entity) => {
                if let Some(kind) = kind_override {
                    entity.kind = kind;
                }
                Some(entity)
            }
            Err(err) => {
                debug!(%err, "skipping unparseable entity record");
                None
            }
        })
        .collect()
}

/// Parses a list response into topics, skipping unparseable elements.
pub fn topic_list_from(value: &Value) -> Vec<Emne> {
    value_list_from(value)
        .iter()
        .filter_map(|item| match serde_json::from_value::<Emne>(item.clone()) {
            Ok(topic) => Some(topic),
            Err(err) => {
                debug!(%err, "skipping unparseable topic record");
                None
            }
        })
        .collect()
}
