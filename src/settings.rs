// Settings loading

use courier_audit::AuditConfig;
use courier_http_client::{
    HttpClientConfig, Method, PoolConfig, RetryConfig, RouteIdempotency, header::HeaderName,
};
use courier_log::LogConfig;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse settings: {0}")]
    Parse(String),

    #[error("Unsupported settings format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid settings: {}", .0.join("; "))]
    Validation(Vec<String>),
}

/// Supported settings file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Toml,
}

impl FileFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "json" => Some(FileFormat::Json),
            "toml" => Some(FileFormat::Toml),
            _ => None,
        }
    }
}

/// One `[[http_client.idempotent_routes]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RouteSettings {
    #[serde(default)]
    pub method: Option<String>,
    pub path_prefix: String,
    pub idempotent: bool,
}

/// `[http_client]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HttpClientSettings {
    pub base_url: Option<String>,
    pub connect_timeout_ms: u64,
    pub timeout_ms: u64,
    pub request_deadline_ms: u64,
    pub correlation_header: String,
    pub user_agent: Option<String>,
    pub default_headers: BTreeMap<String, String>,
    pub idempotent_routes: Vec<RouteSettings>,
}

impl Default for HttpClientSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            connect_timeout_ms: 5_000,
            timeout_ms: 30_000,
            request_deadline_ms: 60_000,
            correlation_header: courier_core::headers::CORRELATION_ID.to_string(),
            user_agent: None,
            default_headers: BTreeMap::new(),
            idempotent_routes: Vec::new(),
        }
    }
}

/// `[retry]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

/// `[pool]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 100,
        }
    }
}

/// Everything Courier reads from configuration.
///
/// Every field has a default, so an empty file is valid.
///
/// ```
/// use courier::Settings;
///
/// let settings = Settings::from_toml_str(r#"
///     [retry]
///     max_attempts = 5
///
///     [[http_client.idempotent_routes]]
///     method = "POST"
///     path_prefix = "/payments"
///     idempotent = true
/// "#).unwrap();
///
/// assert_eq!(settings.retry.max_attempts, 5);
/// assert_eq!(settings.pool.workers, 4);
/// settings.validate().unwrap();
/// ```
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub http_client: HttpClientSettings,
    pub retry: RetrySettings,
    pub audit: AuditConfig,
    pub pool: PoolSettings,
    pub logging: LogConfig,
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, SettingsError> {
    value
        .trim()
        .parse()
        .map_err(|_| SettingsError::Parse(format!("{key}: invalid value {value:?}")))
}

impl Settings {
    /// Load settings from a TOML or JSON file, chosen by extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| SettingsError::UnsupportedFormat(path.display().to_string()))?;
        let format = FileFormat::from_extension(ext)
            .ok_or_else(|| SettingsError::UnsupportedFormat(ext.to_string()))?;

        let content = std::fs::read_to_string(path)?;
        match format {
            FileFormat::Toml => Self::from_toml_str(&content),
            FileFormat::Json => Self::from_json_str(&content),
        }
    }

    /// Parse TOML settings.
    pub fn from_toml_str(content: &str) -> Result<Self, SettingsError> {
        toml::from_str(content).map_err(|e| SettingsError::Parse(format!("TOML: {e}")))
    }

    /// Parse JSON settings.
    pub fn from_json_str(content: &str) -> Result<Self, SettingsError> {
        serde_json::from_str(content).map_err(|e| SettingsError::Parse(format!("JSON: {e}")))
    }

    /// Apply `COURIER_*` overrides from the process environment and a `.env` file.
    pub fn apply_process_env(self) -> Result<Self, SettingsError> {
        let _ = dotenvy::dotenv();
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Apply `COURIER_*` overrides read through `lookup`.
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let http = &mut self.http_client;
        if let Some(v) = lookup("COURIER_BASE_URL") {
            http.base_url = Some(v);
        }
        if let Some(v) = lookup("COURIER_CONNECT_TIMEOUT_MS") {
            http.connect_timeout_ms = parse_env("COURIER_CONNECT_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("COURIER_TIMEOUT_MS") {
            http.timeout_ms = parse_env("COURIER_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("COURIER_REQUEST_DEADLINE_MS") {
            http.request_deadline_ms = parse_env("COURIER_REQUEST_DEADLINE_MS", &v)?;
        }
        if let Some(v) = lookup("COURIER_CORRELATION_HEADER") {
            http.correlation_header = v;
        }

        if let Some(v) = lookup("COURIER_RETRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = parse_env("COURIER_RETRY_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("COURIER_RETRY_BASE_DELAY_MS") {
            self.retry.base_delay_ms = parse_env("COURIER_RETRY_BASE_DELAY_MS", &v)?;
        }
        if let Some(v) = lookup("COURIER_RETRY_MAX_DELAY_MS") {
            self.retry.max_delay_ms = parse_env("COURIER_RETRY_MAX_DELAY_MS", &v)?;
        }

        if let Some(v) = lookup("COURIER_AUDIT_ENABLED") {
            self.audit.enabled = parse_env("COURIER_AUDIT_ENABLED", &v)?;
        }
        if let Some(v) = lookup("COURIER_AUDIT_MAX_BODY_LENGTH") {
            self.audit.max_body_length = parse_env("COURIER_AUDIT_MAX_BODY_LENGTH", &v)?;
        }

        if let Some(v) = lookup("COURIER_POOL_WORKERS") {
            self.pool.workers = parse_env("COURIER_POOL_WORKERS", &v)?;
        }
        if let Some(v) = lookup("COURIER_POOL_QUEUE_CAPACITY") {
            self.pool.queue_capacity = parse_env("COURIER_POOL_QUEUE_CAPACITY", &v)?;
        }

        self.logging = self.logging.with_overrides(&lookup);
        Ok(self)
    }

    /// Check semantic constraints, reporting every violation at once.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let mut errors = Vec::new();

        if self.retry.max_attempts < 1 {
            errors.push("retry.max_attempts must be at least 1".to_string());
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            errors.push("retry.base_delay_ms must not exceed retry.max_delay_ms".to_string());
        }
        if self.http_client.timeout_ms == 0 {
            errors.push("http_client.timeout_ms must be greater than 0".to_string());
        }
        if self.http_client.request_deadline_ms == 0 {
            errors.push("http_client.request_deadline_ms must be greater than 0".to_string());
        }
        if HeaderName::try_from(self.http_client.correlation_header.as_str()).is_err() {
            errors.push(format!(
                "http_client.correlation_header {:?} is not a valid header name",
                self.http_client.correlation_header
            ));
        }
        for route in &self.http_client.idempotent_routes {
            if let Some(method) = &route.method
                && Method::from_bytes(method.as_bytes()).is_err()
            {
                errors.push(format!("http_client.idempotent_routes: invalid method {method:?}"));
            }
        }
        if self.pool.workers < 1 {
            errors.push("pool.workers must be at least 1".to_string());
        }
        if self.pool.queue_capacity < 1 {
            errors.push("pool.queue_capacity must be at least 1".to_string());
        }
        if self.audit.max_body_length == 0 {
            errors.push("audit.max_body_length must be greater than 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SettingsError::Validation(errors))
        }
    }

    /// Retry policy.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::exponential(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.base_delay_ms),
        )
        .with_max_delay(Duration::from_millis(self.retry.max_delay_ms))
    }

    /// Worker pool configuration.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::new(self.pool.workers, self.pool.queue_capacity)
    }

    /// Client configuration. Fails on the same inputs as [`validate`](Self::validate).
    pub fn http_client_config(&self) -> Result<HttpClientConfig, SettingsError> {
        self.validate()?;
        let http = &self.http_client;

        let header = HeaderName::try_from(http.correlation_header.as_str())
            .map_err(|e| SettingsError::Validation(vec![e.to_string()]))?;

        let mut builder = HttpClientConfig::builder()
            .connect_timeout(Duration::from_millis(http.connect_timeout_ms))
            .timeout(Duration::from_millis(http.timeout_ms))
            .request_deadline(Duration::from_millis(http.request_deadline_ms))
            .retry(self.retry_config())
            .correlation_header(header);

        if let Some(base_url) = &http.base_url {
            builder = builder.base_url(base_url);
        }
        if let Some(user_agent) = &http.user_agent {
            builder = builder.user_agent(user_agent);
        }
        for (name, value) in &http.default_headers {
            builder = builder.default_header(name, value);
        }
        for route in &http.idempotent_routes {
            let mut rule = RouteIdempotency::new(&route.path_prefix, route.idempotent);
            if let Some(method) = &route.method {
                let method = Method::from_bytes(method.as_bytes())
                    .map_err(|e| SettingsError::Validation(vec![e.to_string()]))?;
                rule = rule.for_method(method);
            }
            builder = builder.idempotent_route(rule);
        }

        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.http_client.connect_timeout_ms, 5_000);
        assert_eq!(settings.http_client.timeout_ms, 30_000);
        assert_eq!(settings.http_client.request_deadline_ms, 60_000);
        assert_eq!(settings.http_client.correlation_header, "X-Correlation-ID");
        assert_eq!(settings.retry, RetrySettings::default());
        assert_eq!(settings.pool.workers, 4);
        assert_eq!(settings.pool.queue_capacity, 100);
        assert_eq!(settings.audit.max_body_length, 1000);
        assert!(settings.audit.masked_fields.contains(&"creditCard".to_string()));
        settings.validate().unwrap();
    }

    #[test]
    fn test_empty_documents() {
        assert_eq!(Settings::from_toml_str("").unwrap(), Settings::default());
        assert_eq!(Settings::from_json_str("{}").unwrap(), Settings::default());
    }

    #[test]
    fn test_json_sections() {
        let settings = Settings::from_json_str(
            r#"{
                "http_client": {"timeout_ms": 2500, "default_headers": {"x-tenant": "acme"}},
                "audit": {"masked_fields": ["secret"], "log_response_body": false},
                "logging": {"level": "debug", "format": "compact"}
            }"#,
        )
        .unwrap();

        assert_eq!(settings.http_client.timeout_ms, 2500);
        assert_eq!(settings.audit.masked_fields, vec!["secret"]);
        assert!(!settings.audit.log_response_body);
        assert_eq!(settings.logging.level, courier_log::Level::Debug);

        let config = settings.http_client_config().unwrap();
        assert_eq!(config.timeout, Duration::from_millis(2500));
        assert_eq!(
            config.default_headers,
            vec![("x-tenant".to_string(), "acme".to_string())]
        );
    }

    #[test]
    fn test_env_overrides() {
        let settings = Settings::default()
            .apply_env(lookup(&[
                ("COURIER_RETRY_MAX_ATTEMPTS", "5"),
                ("COURIER_POOL_WORKERS", "8"),
                ("COURIER_AUDIT_ENABLED", "false"),
                ("COURIER_LOG_LEVEL", "warn"),
            ]))
            .unwrap();

        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.pool.workers, 8);
        assert!(!settings.audit.enabled);
        assert_eq!(settings.logging.level, courier_log::Level::Warn);
    }

    #[test]
    fn test_env_bad_number() {
        let err = Settings::default()
            .apply_env(lookup(&[("COURIER_TIMEOUT_MS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, SettingsError::Parse(ref m) if m.contains("COURIER_TIMEOUT_MS")));
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut settings = Settings::default();
        settings.retry.max_attempts = 0;
        settings.retry.base_delay_ms = 60_000;
        settings.pool.workers = 0;
        settings.http_client.correlation_header = "bad header".to_string();

        match settings.validate() {
            Err(SettingsError::Validation(errors)) => assert_eq!(errors.len(), 4),
            other => panic!("expected validation errors, got {other:?}"),
        }
        assert!(settings.http_client_config().is_err());
    }

    #[test]
    fn test_route_rules_convert() {
        let settings = Settings::from_toml_str(
            r#"
            [[http_client.idempotent_routes]]
            method = "POST"
            path_prefix = "/payments"
            idempotent = true

            [[http_client.idempotent_routes]]
            path_prefix = "/reports"
            idempotent = false
            "#,
        )
        .unwrap();

        let config = settings.http_client_config().unwrap();
        assert_eq!(config.idempotent_routes.len(), 2);
        assert_eq!(config.idempotent_routes[0].method, Some(Method::POST));
        assert_eq!(config.idempotent_routes[1].method, None);
    }

    #[test]
    fn test_load_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("courier.toml");
        std::fs::write(&toml_path, "[pool]\nworkers = 2\n").unwrap();
        assert_eq!(Settings::load(&toml_path).unwrap().pool.workers, 2);

        let json_path = dir.path().join("courier.json");
        std::fs::write(&json_path, r#"{"pool": {"workers": 3}}"#).unwrap();
        assert_eq!(Settings::load(&json_path).unwrap().pool.workers, 3);

        let yaml_path = dir.path().join("courier.yaml");
        std::fs::write(&yaml_path, "pool: {}").unwrap();
        assert!(matches!(
            Settings::load(&yaml_path),
            Err(SettingsError::UnsupportedFormat(_))
        ));
    }
}
