//! Service configuration for the reconnecting clients
//!
//! One TOML file may carry an `[mqtt]` section, a `[link]` section, and the
//! `[logger]` section. Credentials can be given inline or through environment
//! variables; the latter are resolved when a client is built, not at load time.

use crate::backoff::BackoffConfig;
use crate::client::ClientOptions;
use crate::mqtt::Subscription;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Top-level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    #[serde(default)]
    pub mqtt: Option<MqttSection>,
    #[serde(default)]
    pub link: Option<LinkSection>,
    #[serde(default)]
    pub logger: LoggerSection,
}

/// Retry delay bounds, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackoffSection {
    #[serde(default = "default_backoff_min_ms")]
    pub min_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub max_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub factor: f64,
}

fn default_backoff_min_ms() -> u64 {
    1000
}

fn default_backoff_max_ms() -> u64 {
    300_000 // 5 minutes
}

fn default_backoff_factor() -> f64 {
    1.6
}

impl Default for BackoffSection {
    fn default() -> Self {
        Self {
            min_ms: default_backoff_min_ms(),
            max_ms: default_backoff_max_ms(),
            factor: default_backoff_factor(),
        }
    }
}

impl BackoffSection {
    pub fn to_config(&self) -> BackoffConfig {
        BackoffConfig {
            min: Duration::from_millis(self.min_ms),
            max: Duration::from_millis(self.max_ms),
            factor: self.factor,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "backoff min_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_ms < self.min_ms {
            return Err(ConfigError::InvalidConfig(format!(
                "backoff max_ms ({}) must not be below min_ms ({})",
                self.max_ms, self.min_ms
            )));
        }
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err(ConfigError::InvalidConfig(format!(
                "backoff factor must be at least 1.0, got {}",
                self.factor
            )));
        }
        Ok(())
    }
}

/// TLS material as PEM file paths
///
/// `cert` and `key` enable client authentication and must be set together.
/// Without `ca` the server is verified against the bundled web PKI roots.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CertificateSection {
    pub ca: Option<String>,
    pub cert: Option<String>,
    pub key: Option<String>,
    /// Expected server name
    pub name: Option<String>,
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

impl CertificateSection {
    /// Whether any TLS material was configured
    pub fn is_enabled(&self) -> bool {
        self.cert.is_some() || self.key.is_some() || self.ca.is_some()
    }
}

/// Username and password, each inline or read from an environment variable
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
}

impl Credentials {
    /// Inline values win; a named environment variable must exist
    pub fn username(&self) -> Result<Option<String>, ConfigError> {
        resolve(self.username.as_ref(), self.username_env.as_ref())
    }

    pub fn password(&self) -> Result<Option<String>, ConfigError> {
        resolve(self.password.as_ref(), self.password_env.as_ref())
    }
}

fn resolve(inline: Option<&String>, env_name: Option<&String>) -> Result<Option<String>, ConfigError> {
    if let Some(value) = inline {
        return Ok(Some(value.clone()));
    }
    env_name.map(|name| get_env_var_required(name)).transpose()
}

fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
    std::env::var(env_var_name).map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
}

/// `[mqtt]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker URL, e.g. `tcp://127.0.0.1:1883`
    pub address: String,
    #[serde(default = "generate_client_id")]
    pub client_id: String,
    #[serde(flatten)]
    pub credentials: Credentials,
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,
    /// Keep-alive in seconds, zero disables it
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u16,
    /// Bound on one dial plus handshake
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
    #[serde(default)]
    pub backoff: BackoffSection,
    pub certificate: Option<CertificateSection>,
}

fn generate_client_id() -> String {
    format!("brokerlink-{}", uuid::Uuid::new_v4().simple())
}

fn default_clean_session() -> bool {
    true
}

fn default_keep_alive_secs() -> u16 {
    30
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_buffer_size() -> usize {
    10
}

fn default_max_message_size() -> usize {
    4 * 1024 * 1024
}

impl MqttSection {
    /// Section with every optional field at its default
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            client_id: generate_client_id(),
            credentials: Credentials::default(),
            clean_session: default_clean_session(),
            keep_alive_secs: default_keep_alive_secs(),
            timeout_ms: default_timeout_ms(),
            buffer_size: default_buffer_size(),
            max_message_size: default_max_message_size(),
            subscriptions: Vec::new(),
            backoff: BackoffSection::default(),
            certificate: None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_address(&self.address)?;
        if self.client_id.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "mqtt client_id must not be empty".to_string(),
            ));
        }
        validate_capacity("mqtt buffer_size", self.buffer_size)?;
        validate_capacity("mqtt max_message_size", self.max_message_size)?;
        self.backoff.validate()
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(u64::from(self.keep_alive_secs))
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            buffer_size: self.buffer_size,
            max_message_size: self.max_message_size,
            timeout: Duration::from_millis(self.timeout_ms),
            keep_alive: self.keep_alive(),
            backoff: self.backoff.to_config(),
        }
    }
}

/// `[link]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkSection {
    /// Server URL, e.g. `tcp://127.0.0.1:8273`
    pub address: String,
    #[serde(flatten)]
    pub credentials: Credentials,
    /// Outbound queue capacity
    #[serde(default = "default_buffer_size")]
    pub max_cache_messages: usize,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub backoff: BackoffSection,
    pub certificate: Option<CertificateSection>,
}

impl LinkSection {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            credentials: Credentials::default(),
            max_cache_messages: default_buffer_size(),
            max_message_size: default_max_message_size(),
            timeout_ms: default_timeout_ms(),
            backoff: BackoffSection::default(),
            certificate: None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_address(&self.address)?;
        validate_capacity("link max_cache_messages", self.max_cache_messages)?;
        validate_capacity("link max_message_size", self.max_message_size)?;
        self.backoff.validate()
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            buffer_size: self.max_cache_messages,
            max_message_size: self.max_message_size,
            timeout: Duration::from_millis(self.timeout_ms),
            keep_alive: Duration::ZERO,
            backoff: self.backoff.to_config(),
        }
    }
}

/// `[logger]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggerSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `json`, `pretty`, `compact` or `console`
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub spans: bool,
    /// Log file path; unset logs to stdout
    #[serde(default)]
    pub filename: Option<String>,
    /// `minutely`, `hourly`, `daily` or `never`
    #[serde(default = "default_log_rotation")]
    pub rotation: String,
    /// Rotated files kept on disk; unset keeps all of them
    #[serde(default)]
    pub max_backups: Option<usize>,
}

fn default_log_rotation() -> String {
    "daily".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggerSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            spans: false,
            filename: None,
            rotation: default_log_rotation(),
            max_backups: None,
        }
    }
}

impl LoggerSection {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(
            self.rotation.to_lowercase().as_str(),
            "minutely" | "hourly" | "daily" | "never"
        ) {
            return Err(ConfigError::InvalidConfig(format!(
                "unknown log rotation '{}'",
                self.rotation
            )));
        }
        if self.max_backups == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "logger max_backups must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ServiceConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(mqtt) = &self.mqtt {
            mqtt.validate()?;
        }
        if let Some(link) = &self.link {
            link.validate()?;
        }
        self.logger.validate()
    }
}

/// An address must be a URL with a host
fn validate_address(address: &str) -> Result<(), ConfigError> {
    let url = Url::parse(address)
        .map_err(|e| ConfigError::InvalidConfig(format!("invalid address '{address}': {e}")))?;
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ConfigError::InvalidConfig(format!(
            "address '{address}' has no host"
        )));
    }
    Ok(())
}

fn validate_capacity(name: &str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidConfig(format!(
            "{name} must be at least 1"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::QoS;

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[mqtt]
address = "tcp://127.0.0.1:1883"
client_id = "device-1"
username = "user"
password = "secret"
clean_session = false
keep_alive_secs = 10
timeout_ms = 5000
buffer_size = 20
max_message_size = 1024
subscriptions = [{ topic = "a/b", qos = 1 }, { topic = "c", qos = 0 }]

[mqtt.backoff]
min_ms = 500
max_ms = 10000
factor = 2.0

[link]
address = "tcp://127.0.0.1:8273"
max_cache_messages = 5

[logger]
level = "debug"
format = "pretty"
spans = true
"#;

        let config = ServiceConfig::parse(toml_content).unwrap();
        let mqtt = config.mqtt.unwrap();
        assert_eq!(mqtt.client_id, "device-1");
        assert_eq!(mqtt.credentials.username().unwrap().as_deref(), Some("user"));
        assert!(!mqtt.clean_session);
        assert_eq!(mqtt.subscriptions.len(), 2);
        assert_eq!(mqtt.subscriptions[0].qos, QoS::AtLeastOnce);

        let options = mqtt.client_options();
        assert_eq!(options.buffer_size, 20);
        assert_eq!(options.keep_alive, Duration::from_secs(10));
        assert_eq!(options.timeout, Duration::from_millis(5000));
        assert_eq!(options.backoff.min, Duration::from_millis(500));
        assert_eq!(options.backoff.factor, 2.0);

        let link = config.link.unwrap();
        assert_eq!(link.max_cache_messages, 5);
        assert_eq!(link.backoff, BackoffSection::default());
        assert!(link.client_options().keep_alive.is_zero());

        assert_eq!(config.logger.level, "debug");
        assert!(config.logger.spans);
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = ServiceConfig::parse("[mqtt]\naddress = \"mqtt://broker\"\n").unwrap();
        let mqtt = config.mqtt.unwrap();
        assert!(mqtt.client_id.starts_with("brokerlink-"));
        assert!(mqtt.clean_session);
        assert_eq!(mqtt.keep_alive_secs, 30);
        assert_eq!(mqtt.buffer_size, 10);
        assert!(config.link.is_none());
        assert_eq!(config.logger, LoggerSection::default());
    }

    #[test]
    fn test_generated_client_ids_differ() {
        let a = MqttSection::new("tcp://localhost:1883");
        let b = MqttSection::new("tcp://localhost:1883");
        assert_ne!(a.client_id, b.client_id);
    }

    #[test]
    fn test_invalid_address_rejected() {
        let result = ServiceConfig::parse("[link]\naddress = \"not a url\"\n");
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));

        let result = ServiceConfig::parse("[link]\naddress = \"unix:/tmp/sock\"\n");
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_backoff_validation() {
        let mut backoff = BackoffSection::default();
        assert!(backoff.validate().is_ok());

        backoff.min_ms = 0;
        assert!(backoff.validate().is_err());

        backoff = BackoffSection {
            min_ms: 2000,
            max_ms: 1000,
            factor: 1.6,
        };
        assert!(backoff.validate().is_err());

        backoff = BackoffSection {
            min_ms: 1000,
            max_ms: 2000,
            factor: 0.5,
        };
        assert!(backoff.validate().is_err());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut section = LinkSection::new("tcp://localhost:8273");
        section.max_cache_messages = 0;
        assert!(matches!(
            section.validate(),
            Err(ConfigError::InvalidConfig(msg)) if msg.contains("max_cache_messages")
        ));
    }

    #[test]
    fn test_missing_env_credentials() {
        let credentials = Credentials {
            username_env: Some("BROKERLINK_TEST_SURELY_UNSET_USER".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            credentials.username(),
            Err(ConfigError::EnvVarNotFound(name)) if name == "BROKERLINK_TEST_SURELY_UNSET_USER"
        ));
        assert_eq!(credentials.password().unwrap(), None);
    }

    #[test]
    fn test_inline_credentials_win_over_env() {
        let credentials = Credentials {
            password: Some("inline".to_string()),
            password_env: Some("BROKERLINK_TEST_SURELY_UNSET_PASS".to_string()),
            ..Default::default()
        };
        assert_eq!(credentials.password().unwrap().as_deref(), Some("inline"));
    }

    #[test]
    fn test_certificate_enabled() {
        assert!(!CertificateSection::default().is_enabled());
        let cert = CertificateSection {
            cert: Some("client.pem".to_string()),
            ..Default::default()
        };
        assert!(cert.is_enabled());
        let ca_only = CertificateSection {
            ca: Some("ca.pem".to_string()),
            ..Default::default()
        };
        assert!(ca_only.is_enabled());
        let verify_only = CertificateSection {
            insecure_skip_verify: true,
            ..Default::default()
        };
        assert!(!verify_only.is_enabled());
    }
}
