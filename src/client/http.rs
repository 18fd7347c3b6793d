//! HTTP implementation of [`AdminApi`] on top of `reqwest`.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

use super::{AdminApi, Page};
use crate::core::config::{AdminConfig, KonnectConfig};
use crate::core::error::{SyncError, SyncResult};
use crate::observability::redact_headers;
use crate::config_error;

pub struct AdminClient {
    client: Client,
    base_url: Url,
    /// Prepended to every path, e.g. `/team-a` for a workspace
    prefix: String,
    page_size: u32,
    headers: HashMap<String, String>,
}

impl std::fmt::Debug for AdminClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminClient")
            .field("base_url", &self.base_url.as_str())
            .field("prefix", &self.prefix)
            .field("page_size", &self.page_size)
            .field("headers", &redact_headers(&self.headers))
            .finish()
    }
}

impl AdminClient {
    /// Client for a gateway admin API
    pub fn new(config: &AdminConfig) -> SyncResult<Self> {
        let prefix = match config.workspace.as_deref() {
            Some(ws) if !ws.is_empty() => format!("/{}", urlencoding::encode(ws)),
            _ => String::new(),
        };
        Self::build(&config.url, prefix, config.page_size, config.headers.clone(), config.timeout)
    }

    /// Client for the hosted control plane, authenticated with a bearer token
    pub fn konnect(config: &KonnectConfig) -> SyncResult<Self> {
        let mut headers = HashMap::new();
        headers.insert(AUTHORIZATION.to_string(), format!("Bearer {}", config.token));
        Self::build(&config.url, String::new(), 1000, headers, config.timeout)
    }

    fn build(
        url: &str,
        prefix: String,
        page_size: u32,
        headers: HashMap<String, String>,
        timeout: Duration,
    ) -> SyncResult<Self> {
        let base_url = Url::parse(url)?;

        let mut default_headers = HeaderMap::new();
        default_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        default_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in &headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| config_error!("invalid header name '{}': {}", name, e))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| config_error!("invalid value for header '{}': {}", name, e))?;
            default_headers.insert(name, value);
        }

        let client = Client::builder()
            .default_headers(default_headers)
            .timeout(timeout)
            .build()
            .map_err(|e| config_error!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            client,
            base_url,
            prefix,
            page_size,
            headers,
        })
    }

    fn url(&self, path: &str) -> SyncResult<Url> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{}{}{}", base, self.prefix, path))?)
    }

    async fn send(&self, method: Method, url: Url, body: Option<&Value>) -> SyncResult<Value> {
        debug!(method = %method, url = %url, "admin API request");
        let mut request = self.client.request(method.clone(), url.clone());
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        trace!(status = %status, bytes = text.len(), "admin API response");

        if status == StatusCode::NOT_FOUND {
            return Err(SyncError::NotFound {
                entity_type: "resource".to_string(),
                key: url.path().to_string(),
            });
        }
        if !status.is_success() {
            return Err(SyncError::Api {
                status: status.as_u16(),
                method: method.to_string(),
                url: url.to_string(),
                message: text,
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl AdminApi for AdminClient {
    async fn get(&self, path: &str) -> SyncResult<Value> {
        self.send(Method::GET, self.url(path)?, None).await
    }

    async fn list_page(&self, path: &str, offset: Option<&str>, tags: &[String]) -> SyncResult<Page> {
        let mut url = self.url(path)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("size", &self.page_size.to_string());
            if let Some(offset) = offset {
                query.append_pair("offset", offset);
            }
            if !tags.is_empty() {
                query.append_pair("tags", &tags.join(","));
            }
        }
        let value = self.send(Method::GET, url, None).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn post(&self, path: &str, body: &Value) -> SyncResult<Value> {
        self.send(Method::POST, self.url(path)?, Some(body)).await
    }

    async fn put(&self, path: &str, body: &Value) -> SyncResult<Value> {
        self.send(Method::PUT, self.url(path)?, Some(body)).await
    }

    async fn patch(&self, path: &str, body: &Value) -> SyncResult<Value> {
        self.send(Method::PATCH, self.url(path)?, Some(body)).await
    }

    async fn delete(&self, path: &str) -> SyncResult<()> {
        self.send(Method::DELETE, self.url(path)?, None).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_prefix() {
        let config = AdminConfig {
            url: "http://localhost:8001/".to_string(),
            workspace: Some("team a".to_string()),
            ..Default::default()
        };
        let client = AdminClient::new(&config).unwrap();
        assert_eq!(
            client.url("/services/svc1").unwrap().as_str(),
            "http://localhost:8001/team%20a/services/svc1"
        );
    }

    #[test]
    fn test_invalid_header_is_config_error() {
        let mut config = AdminConfig::default();
        config.headers.insert("bad header".to_string(), "x".to_string());
        let err = AdminClient::new(&config).unwrap_err();
        assert!(matches!(err, SyncError::Configuration { .. }));
    }

    #[test]
    fn test_debug_redacts_token() {
        let konnect = KonnectConfig {
            token: "kpat_secret".to_string(),
            ..Default::default()
        };
        let client = AdminClient::konnect(&konnect).unwrap();
        let debug = format!("{:?}", client);
        assert!(!debug.contains("kpat_secret"));
    }
}
