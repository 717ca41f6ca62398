//! Configuration for the base station exporter.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Paths served by the HTTP server besides the metrics endpoint.
pub const RESERVED_PATHS: [&str; 3] = ["/", "/health", "/ready"];

/// Characters the router treats as path parameter or wildcard syntax.
const ROUTE_SYNTAX_CHARS: [char; 4] = ['*', ':', '{', '}'];

/// Upper bound for `max_message_size` (16 MiB).
pub const MAX_MESSAGE_SIZE_LIMIT: usize = 16 * 1024 * 1024;

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// TCP ingestion settings.
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// TCP ingestion listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Address the base station connects to (default: "localhost:8080").
    #[serde(default = "default_ingest_listen")]
    pub listen: String,

    /// Maximum concurrently handled connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum size of one telemetry document in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Read timeout per connection. Unset means wait forever.
    #[serde(default)]
    pub read_timeout_secs: Option<u64>,
}

fn default_ingest_listen() -> String {
    "localhost:8080".to_string()
}

fn default_max_connections() -> usize {
    1024
}

fn default_max_message_size() -> usize {
    64 * 1024
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            listen: default_ingest_listen(),
            max_connections: default_max_connections(),
            max_message_size: default_max_message_size(),
            read_timeout_secs: None,
        }
    }
}

/// Prometheus HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Address to listen on (default: "localhost:9091").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,

    /// Metric namespace (default: "BaseStation").
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_listen() -> String {
    "localhost:9091".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

fn default_namespace() -> String {
    "BaseStation".to_string()
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            namespace: default_namespace(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply positional command line overrides, in order:
    /// TCP address, HTTP listen address, metrics path.
    ///
    /// Values beyond the third are ignored.
    pub fn apply_overrides<S: AsRef<str>>(&mut self, positional: &[S]) {
        let mut values = positional.iter().map(|s| s.as_ref().to_string());

        if let Some(tcp) = values.next() {
            self.ingest.listen = tcp;
        }
        if let Some(listen) = values.next() {
            self.prometheus.listen = listen;
        }
        if let Some(path) = values.next() {
            self.prometheus.path = path;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_address("ingest.listen", &self.ingest.listen)?;
        validate_address("prometheus.listen", &self.prometheus.listen)?;

        if self.ingest.max_connections == 0 {
            return Err(ConfigError::Validation(
                "max_connections must be > 0".to_string(),
            ));
        }

        if self.ingest.max_message_size == 0 {
            return Err(ConfigError::Validation(
                "max_message_size must be > 0".to_string(),
            ));
        }

        if self.ingest.max_message_size > MAX_MESSAGE_SIZE_LIMIT {
            return Err(ConfigError::Validation(format!(
                "max_message_size must be <= {}",
                MAX_MESSAGE_SIZE_LIMIT
            )));
        }

        if self.ingest.read_timeout_secs == Some(0) {
            return Err(ConfigError::Validation(
                "read_timeout_secs must be > 0 when set".to_string(),
            ));
        }

        // Validate path starts with /
        if !self.prometheus.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        if self.prometheus.path.contains(ROUTE_SYNTAX_CHARS) {
            return Err(ConfigError::Validation(format!(
                "Metrics path {} must not contain any of * : {{ }}",
                self.prometheus.path
            )));
        }

        if RESERVED_PATHS.contains(&self.prometheus.path.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Metrics path {} is reserved",
                self.prometheus.path
            )));
        }

        if !is_valid_namespace(&self.prometheus.namespace) {
            return Err(ConfigError::Validation(format!(
                "Invalid metric namespace: {:?}",
                self.prometheus.namespace
            )));
        }

        Ok(())
    }
}

/// Check a `host:port` address without resolving the host.
fn validate_address(name: &str, addr: &str) -> Result<(), ConfigError> {
    let valid = match addr.rsplit_once(':') {
        Some((_, port)) => port.parse::<u16>().is_ok(),
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!(
            "Invalid {} address: {}",
            name, addr
        )))
    }
}

/// Namespaces must match `[a-zA-Z_:][a-zA-Z0-9_:]*` (empty means no namespace).
fn is_valid_namespace(namespace: &str) -> bool {
    let mut chars = namespace.chars();
    match chars.next() {
        None => true,
        Some(first) if first.is_ascii_alphabetic() || first == '_' || first == ':' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
        }
        Some(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_minimal_config() {
        let json = "{}";
        let config = ExporterConfig::parse(json).unwrap();

        assert_eq!(config.ingest.listen, "localhost:8080");
        assert_eq!(config.ingest.max_connections, 1024);
        assert_eq!(config.ingest.read_timeout_secs, None);
        assert_eq!(config.prometheus.listen, "localhost:9091");
        assert_eq!(config.prometheus.path, "/metrics");
        assert_eq!(config.prometheus.namespace, "BaseStation");
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            ingest: {
                listen: "0.0.0.0:7000",
                max_connections: 16,
                max_message_size: 4096,
                read_timeout_secs: 30
            },
            prometheus: {
                listen: "127.0.0.1:9100",
                path: "/prometheus/metrics",
                namespace: "station"
            },
            logging: {
                level: "debug",
                format: "json"
            }
        }"#;

        let config = ExporterConfig::parse(json).unwrap();

        assert_eq!(config.ingest.listen, "0.0.0.0:7000");
        assert_eq!(config.ingest.max_connections, 16);
        assert_eq!(config.ingest.max_message_size, 4096);
        assert_eq!(config.ingest.read_timeout_secs, Some(30));
        assert_eq!(config.prometheus.listen, "127.0.0.1:9100");
        assert_eq!(config.prometheus.path, "/prometheus/metrics");
        assert_eq!(config.prometheus.namespace, "station");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{ prometheus: {{ path: \"/scrape\" }} }}").unwrap();

        let config = ExporterConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.prometheus.path, "/scrape");
    }

    #[test]
    fn test_load_missing_file() {
        let result = ExporterConfig::load_from_file("/nonexistent/exporter.json5");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = ExporterConfig::default();
        config.apply_overrides(&["10.0.0.1:8080"]);
        assert_eq!(config.ingest.listen, "10.0.0.1:8080");
        assert_eq!(config.prometheus.listen, "localhost:9091");

        let mut config = ExporterConfig::default();
        config.apply_overrides(&["a:1", "b:2", "/m", "ignored", "also-ignored"]);
        assert_eq!(config.ingest.listen, "a:1");
        assert_eq!(config.prometheus.listen, "b:2");
        assert_eq!(config.prometheus.path, "/m");

        let mut config = ExporterConfig::default();
        config.apply_overrides::<&str>(&[]);
        assert_eq!(config.ingest.listen, "localhost:8080");
    }

    #[test]
    fn test_validate_invalid_listen() {
        let json = r#"{
            prometheus: { listen: "not-an-address" }
        }"#;

        let result = ExporterConfig::parse(json);
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Invalid prometheus.listen address")
        );
    }

    #[test]
    fn test_validate_hostname_address() {
        let json = r#"{ ingest: { listen: "basestation.local:8080" } }"#;
        assert!(ExporterConfig::parse(json).is_ok());

        let json = r#"{ ingest: { listen: "localhost:http" } }"#;
        assert!(ExporterConfig::parse(json).is_err());
    }

    #[test]
    fn test_validate_invalid_path() {
        let json = r#"{
            prometheus: { path: "no-leading-slash" }
        }"#;

        let result = ExporterConfig::parse(json);
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("must start with /")
        );
    }

    #[test]
    fn test_validate_reserved_path() {
        for path in RESERVED_PATHS {
            let mut config = ExporterConfig::default();
            config.prometheus.path = path.to_string();
            assert!(config.validate().is_err(), "{} should be rejected", path);
        }
    }

    #[test]
    fn test_validate_route_syntax_in_path() {
        for path in ["/metrics/*", "/metrics/*rest", "/:name", "/{name}", "/metrics}"] {
            let mut config = ExporterConfig::default();
            config.apply_overrides(&["localhost:8080", "localhost:9091", path]);

            let result = config.validate();
            assert!(
                matches!(result, Err(ConfigError::Validation(_))),
                "{} should be rejected",
                path
            );
        }

        let mut config = ExporterConfig::default();
        config.apply_overrides(&["localhost:8080", "localhost:9091", "/base-station/metrics"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_namespace() {
        let mut config = ExporterConfig::default();
        config.prometheus.namespace = "base-station".to_string();
        assert!(config.validate().is_err());

        config.prometheus.namespace = "9lives".to_string();
        assert!(config.validate().is_err());

        config.prometheus.namespace = String::new();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_limits() {
        let json = r#"{ ingest: { max_connections: 0 } }"#;
        assert!(ExporterConfig::parse(json).is_err());

        let json = r#"{ ingest: { max_message_size: 0 } }"#;
        assert!(ExporterConfig::parse(json).is_err());

        let json = r#"{ ingest: { read_timeout_secs: 0 } }"#;
        assert!(ExporterConfig::parse(json).is_err());
    }

    #[test]
    fn test_validate_max_message_size_limit() {
        let json = r#"{ ingest: { max_message_size: 18446744073709551615 } }"#;
        let result = ExporterConfig::parse(json);
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("max_message_size must be <=")
        );

        let mut config = ExporterConfig::default();
        config.ingest.max_message_size = MAX_MESSAGE_SIZE_LIMIT;
        assert!(config.validate().is_ok());
    }
}
