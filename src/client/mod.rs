//! # Admin API Client
//!
//! The remote boundary of the engine. [`AdminApi`] is the narrow, object-safe
//! interface every adapter talks to; [`AdminClient`] implements it over HTTP with
//! `reqwest`. Tests substitute an in-memory implementation.
//!
//! ## Conventions
//! - Paths are relative to the API root (`/services`, `/consumers/alice/key-auth`)
//!   with every path segment already percent-encoded
//! - List endpoints answer `{data: [...], offset: TOKEN|null}` and are followed
//!   until `offset` is null; the token is opaque
//! - 404 becomes [`SyncError::NotFound`]; any other non-2xx becomes
//!   [`SyncError::Api`] carrying the response body verbatim

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::trace;

use crate::core::error::SyncResult;

pub mod http;

pub use http::AdminClient;

/// One page of a list endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub data: Vec<Value>,
    /// Token for the next page, absent on the last one
    #[serde(default)]
    pub offset: Option<String>,
}

/// Object-safe interface to the gateway's REST admin API
#[async_trait]
pub trait AdminApi: Send + Sync {
    async fn get(&self, path: &str) -> SyncResult<Value>;

    /// Fetch one page; `tags` restricts results to entities carrying all of them
    async fn list_page(&self, path: &str, offset: Option<&str>, tags: &[String]) -> SyncResult<Page>;

    async fn post(&self, path: &str, body: &Value) -> SyncResult<Value>;

    async fn put(&self, path: &str, body: &Value) -> SyncResult<Value>;

    async fn patch(&self, path: &str, body: &Value) -> SyncResult<Value>;

    async fn delete(&self, path: &str) -> SyncResult<()>;

    /// Every item of a list endpoint, following offset tokens
    async fn list_all(&self, path: &str, tags: &[String]) -> SyncResult<Vec<Value>> {
        let mut items = Vec::new();
        let mut offset: Option<String> = None;
        loop {
            let page = self.list_page(path, offset.as_deref(), tags).await?;
            trace!(path = %path, items = page.data.len(), more = page.offset.is_some(), "fetched page");
            items.extend(page.data);
            match page.offset {
                Some(next) if !next.is_empty() => offset = Some(next),
                _ => return Ok(items),
            }
        }
    }
}
