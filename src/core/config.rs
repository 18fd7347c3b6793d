//! # Configuration Module
//!
//! Tool configuration: where the admin API lives, how to talk to it, which
//! entities a sync run covers and how logs are emitted.
//!
//! ## Key Features
//! - YAML/JSON configuration parsing with serde
//! - Environment variable overrides (`GATEWAY_SYNC_<SECTION>_<FIELD>`)
//! - Validation that reports every problem at once
//! - Defaults for every section, so an empty file is a valid configuration

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::core::error::{SyncError, SyncResult};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Gateway admin API connection
    pub admin: AdminConfig,

    /// Hosted control plane connection, only needed for package/version/document entities
    pub konnect: Option<KonnectConfig>,

    /// Which entities a run covers
    pub sync: SyncSettings,

    /// Log level and output format
    pub logging: LoggingConfig,
}

impl SyncConfig {
    /// Load configuration from a YAML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> SyncResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SyncError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: SyncConfig = serde_yaml::from_str(&content)
            .map_err(|e| SyncError::config(format!("Failed to parse config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from JSON
    pub async fn load_from_json<P: AsRef<Path>>(path: P) -> SyncResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SyncError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: SyncConfig = serde_json::from_str(&content)
            .map_err(|e| SyncError::config(format!("Failed to parse JSON config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load by extension: `.json` is JSON, anything else YAML
    pub async fn load<P: AsRef<Path>>(path: P) -> SyncResult<Self> {
        let is_json = path
            .as_ref()
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::load_from_json(path).await
        } else {
            Self::load_from_file(path).await
        }
    }

    /// Apply environment variable overrides to configuration
    ///
    /// Environment variables follow the pattern: GATEWAY_SYNC_<SECTION>_<FIELD>
    /// For example: GATEWAY_SYNC_ADMIN_URL=http://kong:8001
    pub fn apply_env_overrides(&mut self) -> SyncResult<()> {
        use std::env;

        if let Ok(url) = env::var("GATEWAY_SYNC_ADMIN_URL") {
            self.admin.url = url;
        }

        if let Ok(timeout) = env::var("GATEWAY_SYNC_ADMIN_TIMEOUT") {
            self.admin.timeout = humantime::parse_duration(&timeout)
                .map_err(|e| SyncError::config(format!("Invalid GATEWAY_SYNC_ADMIN_TIMEOUT: {}", e)))?;
        }

        if let Ok(size) = env::var("GATEWAY_SYNC_ADMIN_PAGE_SIZE") {
            self.admin.page_size = size
                .parse()
                .map_err(|e| SyncError::config(format!("Invalid GATEWAY_SYNC_ADMIN_PAGE_SIZE: {}", e)))?;
        }

        if let Ok(workspace) = env::var("GATEWAY_SYNC_ADMIN_WORKSPACE") {
            self.admin.workspace = Some(workspace).filter(|w| !w.is_empty());
        }

        if let Ok(token) = env::var("GATEWAY_SYNC_KONNECT_TOKEN") {
            self.konnect.get_or_insert_with(KonnectConfig::default).token = token;
        }

        if let Ok(url) = env::var("GATEWAY_SYNC_KONNECT_URL") {
            self.konnect.get_or_insert_with(KonnectConfig::default).url = url;
        }

        if let Ok(tags) = env::var("GATEWAY_SYNC_SYNC_SELECT_TAGS") {
            self.sync.select_tags = tags
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Ok(skip) = env::var("GATEWAY_SYNC_SYNC_SKIP_CONSUMERS") {
            self.sync.skip_consumers = skip
                .parse()
                .map_err(|e| SyncError::config(format!("Invalid GATEWAY_SYNC_SYNC_SKIP_CONSUMERS: {}", e)))?;
        }

        if let Ok(dry_run) = env::var("GATEWAY_SYNC_SYNC_DRY_RUN") {
            self.sync.dry_run = dry_run
                .parse()
                .map_err(|e| SyncError::config(format!("Invalid GATEWAY_SYNC_SYNC_DRY_RUN: {}", e)))?;
        }

        if let Ok(level) = env::var("GATEWAY_SYNC_LOGGING_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(format) = env::var("GATEWAY_SYNC_LOGGING_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Configuration validation; every problem found is reported in one error
    pub fn validate(&self) -> SyncResult<()> {
        let mut errors = Vec::new();

        match Url::parse(&self.admin.url) {
            Ok(url) if url.scheme() != "http" && url.scheme() != "https" => {
                errors.push(format!("admin.url must be http(s), got scheme '{}'", url.scheme()));
            }
            Ok(_) => {}
            Err(e) => errors.push(format!("admin.url '{}' is invalid: {}", self.admin.url, e)),
        }

        if self.admin.page_size == 0 || self.admin.page_size > 1000 {
            errors.push(format!(
                "admin.page_size must be between 1 and 1000, got {}",
                self.admin.page_size
            ));
        }

        if self.admin.timeout.is_zero() {
            errors.push("admin.timeout must be greater than 0".to_string());
        }

        for name in self.admin.headers.keys() {
            if name.trim().is_empty() {
                errors.push("admin.headers contains an empty header name".to_string());
            }
        }

        if let Some(konnect) = &self.konnect {
            if let Err(e) = Url::parse(&konnect.url) {
                errors.push(format!("konnect.url '{}' is invalid: {}", konnect.url, e));
            }
            if konnect.token.is_empty() {
                errors.push("konnect.token cannot be empty".to_string());
            }
            if konnect.timeout.is_zero() {
                errors.push("konnect.timeout must be greater than 0".to_string());
            }
        }

        if self.sync.select_tags.iter().any(|t| t.trim().is_empty()) {
            errors.push("sync.select_tags cannot contain empty tags".to_string());
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => errors.push(format!("Invalid log level: {}", self.logging.level)),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" => {}
            _ => errors.push(format!("Invalid log format: {}", self.logging.format)),
        }

        if !errors.is_empty() {
            return Err(SyncError::config(format!(
                "Configuration validation failed:\n{}",
                errors.join("\n")
            )));
        }

        Ok(())
    }
}

/// Admin API connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Base URL of the admin API
    pub url: String,

    /// Extra headers sent with every request (e.g. an admin token)
    pub headers: HashMap<String, String>,

    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// `size` used for paginated list calls
    pub page_size: u32,

    /// Workspace prefix for enterprise gateways
    pub workspace: Option<String>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8001".to_string(),
            headers: HashMap::new(),
            timeout: Duration::from_secs(30),
            page_size: 1000,
            workspace: None,
        }
    }
}

/// Hosted control plane connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KonnectConfig {
    pub url: String,

    /// Personal access token, sent as a bearer token
    pub token: String,

    pub control_plane_id: Option<String>,

    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for KonnectConfig {
    fn default() -> Self {
        Self {
            url: "https://us.api.konghq.com/konnect-api".to_string(),
            token: String::new(),
            control_plane_id: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Scope of a sync run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Only entities carrying all of these tags are dumped; declared entities get them appended
    pub select_tags: Vec<String>,

    /// Leave consumers and everything scoped to them untouched
    pub skip_consumers: bool,

    /// Compute and report changes without calling the admin API
    pub dry_run: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_validation() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_config_from_yaml_file() {
        let yaml = r#"
admin:
  url: "http://kong-admin:8001"
  timeout: "5s"
  page_size: 100
  headers:
    Kong-Admin-Token: "secret"
sync:
  select_tags: ["team-a"]
  skip_consumers: true
logging:
  level: "debug"
  format: "json"
"#;
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let config = SyncConfig::load_from_file(file.path()).await.unwrap();
        assert_eq!(config.admin.url, "http://kong-admin:8001");
        assert_eq!(config.admin.timeout, Duration::from_secs(5));
        assert_eq!(config.admin.page_size, 100);
        assert_eq!(config.admin.headers.get("Kong-Admin-Token").unwrap(), "secret");
        assert_eq!(config.sync.select_tags, vec!["team-a"]);
        assert!(config.sync.skip_consumers);
        assert_eq!(config.logging.format, "json");
        assert!(config.konnect.is_none());
    }

    #[tokio::test]
    async fn test_load_config_from_json_file() {
        let json = r#"{
            "admin": {"url": "https://kong.internal:8444"},
            "konnect": {"token": "kpat_123", "control_plane_id": "cp-1"}
        }"#;
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let config = SyncConfig::load(file.path()).await.unwrap();
        assert_eq!(config.admin.url, "https://kong.internal:8444");
        assert_eq!(config.admin.page_size, 1000);
        let konnect = config.konnect.unwrap();
        assert_eq!(konnect.token, "kpat_123");
        assert_eq!(konnect.control_plane_id.as_deref(), Some("cp-1"));
    }

    #[test]
    fn test_environment_variable_overrides() {
        env::set_var("GATEWAY_SYNC_ADMIN_URL", "http://10.0.0.1:8001");
        env::set_var("GATEWAY_SYNC_SYNC_SELECT_TAGS", "a, b,,c");
        env::set_var("GATEWAY_SYNC_LOGGING_LEVEL", "trace");

        let mut config = SyncConfig::default();
        config.apply_env_overrides().unwrap();

        assert_eq!(config.admin.url, "http://10.0.0.1:8001");
        assert_eq!(config.sync.select_tags, vec!["a", "b", "c"]);
        assert_eq!(config.logging.level, "trace");

        env::remove_var("GATEWAY_SYNC_ADMIN_URL");
        env::remove_var("GATEWAY_SYNC_SYNC_SELECT_TAGS");
        env::remove_var("GATEWAY_SYNC_LOGGING_LEVEL");
    }

    #[test]
    fn test_invalid_environment_variables() {
        env::set_var("GATEWAY_SYNC_ADMIN_PAGE_SIZE", "lots");

        let mut config = SyncConfig::default();
        let result = config.apply_env_overrides();

        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Invalid GATEWAY_SYNC_ADMIN_PAGE_SIZE"));

        env::remove_var("GATEWAY_SYNC_ADMIN_PAGE_SIZE");
    }

    #[test]
    fn test_config_validation_errors() {
        let mut config = SyncConfig::default();
        config.admin.url = "not a url".to_string();
        config.admin.page_size = 0;
        config.logging.level = "loud".to_string();
        config.konnect = Some(KonnectConfig::default());

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("admin.url"));
        assert!(err.contains("admin.page_size"));
        assert!(err.contains("Invalid log level"));
        assert!(err.contains("konnect.token"));
    }
}
