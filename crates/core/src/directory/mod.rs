//! Access to the remote group directory.
//!
//! Everything that crosses the network goes through [`DirectoryTransport`].
//! The production implementation is [`DirectoryClient`]; tests substitute an
//! in-memory transport.

pub mod client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::DirectoryError;

pub use client::DirectoryClient;

/// HTTP verb of a directory request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verb {
    Get,
    Post,
    Put,
    Delete,
}

impl Verb {
    /// Whether the verb changes directory state.
    pub fn is_mutating(self) -> bool {
        !matches!(self, Self::Get)
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
            Self::Put => write!(f, "PUT"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

/// Which API surface a path belongs to. Invitations live on the versioned
/// REST API; everything else on the v1 API.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ApiSurface {
    #[default]
    V1,
    Rest,
}

/// A single HTTP-shaped request against the directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectoryRequest {
    pub verb: Verb,
    #[serde(default)]
    pub api: ApiSurface,
    /// Path relative to the API surface base URL, query string included.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

impl DirectoryRequest {
    pub fn get(api: ApiSurface, path: impl Into<String>) -> Self {
        Self {
            verb: Verb::Get,
            api,
            path: path.into(),
            body: None,
        }
    }

    pub fn post(api: ApiSurface, path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            verb: Verb::Post,
            api,
            path: path.into(),
            body: Some(body),
        }
    }

    pub fn put(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            verb: Verb::Put,
            api: ApiSurface::V1,
            path: path.into(),
            body: Some(body),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            verb: Verb::Delete,
            api: ApiSurface::V1,
            path: path.into(),
            body: None,
        }
    }
}

impl std::fmt::Display for DirectoryRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.verb, self.path)
    }
}

/// The network boundary. Implementations own authentication, retries and
/// rate limiting; callers see one response or one error per request.
#[async_trait]
pub trait DirectoryTransport: Send + Sync {
    async fn request(&self, request: &DirectoryRequest)
        -> Result<serde_json::Value, DirectoryError>;
}
