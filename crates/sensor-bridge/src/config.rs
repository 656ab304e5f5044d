// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge configuration.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! bridge that talks to a local broker on `localhost:8883` and a local Lambda
//! emulator on `http://localhost:4566`.

use crate::tls::TlsVersion;
use rumqttc::QoS;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Topic the bridge subscribes to unless configured otherwise.
pub const DEFAULT_TOPIC: &str = "sensor/data";

/// Function invoked for every message unless configured otherwise.
pub const DEFAULT_FUNCTION_NAME: &str = "iot_processor";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Statistics reporting interval (seconds, 0 to disable).
    #[serde(default)]
    pub stats_interval_secs: u64,

    /// Log level (trace, debug, info, warn, error) or an `EnvFilter` directive.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// MQTT broker connection.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// TLS material.
    #[serde(default)]
    pub tls: TlsConfig,

    /// Function invocation endpoint.
    #[serde(default)]
    pub function: FunctionConfig,

    /// Reconnection policy after an established connection is lost.
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Settings for the `publish` subcommand.
    #[serde(default)]
    pub publisher: PublisherConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            stats_interval_secs: 0,
            log_level: default_log_level(),
            broker: BrokerConfig::default(),
            tls: TlsConfig::default(),
            function: FunctionConfig::default(),
            reconnect: ReconnectConfig::default(),
            publisher: PublisherConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file.
    ///
    /// Relative TLS paths are resolved against the directory holding the file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;

        let base = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        config.tls.resolve_relative_to(&base);

        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as pretty TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.broker.validate()?;
        self.function.validate()?;
        self.reconnect.validate()?;
        self.publisher.validate()?;
        Ok(())
    }
}

/// MQTT broker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Broker host name; also used as the TLS server name.
    #[serde(default = "default_host")]
    pub host: String,

    /// Broker port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// MQTT client identifier.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Keepalive interval in seconds.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// Topic filter to subscribe to.
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Subscription QoS (0, 1 or 2).
    #[serde(default)]
    pub qos: u8,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8883
}

fn default_client_id() -> String {
    "sensor-bridge".to_string()
}

fn default_keep_alive() -> u64 {
    60
}

fn default_topic() -> String {
    DEFAULT_TOPIC.to_string()
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_id: default_client_id(),
            keep_alive_secs: default_keep_alive(),
            topic: default_topic(),
            qos: 0,
        }
    }
}

impl BrokerConfig {
    /// Keepalive as a duration.
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// Subscription QoS.
    pub fn qos(&self) -> Result<QoS, ConfigError> {
        qos_from_level(self.qos)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("Broker host is empty".into()));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid("Broker port must be non-zero".into()));
        }
        if self.client_id.is_empty() || self.client_id.starts_with(' ') {
            return Err(ConfigError::Invalid(format!(
                "Broker client_id is invalid: {:?}",
                self.client_id
            )));
        }
        if self.keep_alive_secs > u64::from(u16::MAX) {
            return Err(ConfigError::Invalid(format!(
                "Broker keep_alive_secs too large: {}",
                self.keep_alive_secs
            )));
        }
        if !is_valid_topic_filter(&self.topic) {
            return Err(ConfigError::Invalid(format!(
                "Invalid topic filter: {:?}",
                self.topic
            )));
        }
        self.qos()?;
        Ok(())
    }
}

/// Paths to the PEM-encoded TLS material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// CA certificate used to verify the broker.
    #[serde(default = "default_ca_cert")]
    pub ca_cert: PathBuf,

    /// Client certificate presented to the broker.
    #[serde(default = "default_client_cert")]
    pub client_cert: PathBuf,

    /// Private key matching `client_cert`.
    #[serde(default = "default_client_key")]
    pub client_key: PathBuf,

    /// Minimum negotiated protocol version.
    #[serde(default)]
    pub min_version: TlsVersion,
}

const CERT_DIR: &str = "docker/mosquitto-certs";

fn default_ca_cert() -> PathBuf {
    Path::new(CERT_DIR).join("ca.crt")
}

fn default_client_cert() -> PathBuf {
    Path::new(CERT_DIR).join("server.crt")
}

fn default_client_key() -> PathBuf {
    Path::new(CERT_DIR).join("server.key")
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            ca_cert: default_ca_cert(),
            client_cert: default_client_cert(),
            client_key: default_client_key(),
            min_version: TlsVersion::default(),
        }
    }
}

impl TlsConfig {
    /// Make relative paths relative to `base` instead of the working directory.
    pub fn resolve_relative_to(&mut self, base: &Path) {
        for path in [
            &mut self.ca_cert,
            &mut self.client_cert,
            &mut self.client_key,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

/// Function invocation endpoint and target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionConfig {
    /// Function name.
    #[serde(default = "default_function_name")]
    pub name: String,

    /// Endpoint URL override (e.g. a local emulator). An empty string in the
    /// file (`None` here) uses the regional endpoint.
    #[serde(
        default = "default_endpoint_url",
        deserialize_with = "deserialize_endpoint_url",
        serialize_with = "serialize_endpoint_url"
    )]
    pub endpoint_url: Option<String>,

    /// Region identifier.
    #[serde(default = "default_region")]
    pub region: String,

    /// Static access key id.
    #[serde(default = "default_static_credential")]
    pub access_key_id: String,

    /// Static secret access key.
    #[serde(default = "default_static_credential")]
    pub secret_access_key: String,

    /// Upper bound on a single invocation (seconds, 0 for none).
    #[serde(default = "default_invoke_timeout")]
    pub timeout_secs: u64,
}

fn default_function_name() -> String {
    DEFAULT_FUNCTION_NAME.to_string()
}

fn default_endpoint_url() -> Option<String> {
    Some("http://localhost:4566".to_string())
}

fn deserialize_endpoint_url<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let url = String::deserialize(deserializer)?;
    Ok((!url.trim().is_empty()).then_some(url))
}

fn serialize_endpoint_url<S>(url: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(url.as_deref().unwrap_or(""))
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_static_credential() -> String {
    "test".to_string()
}

fn default_invoke_timeout() -> u64 {
    30
}

impl Default for FunctionConfig {
    fn default() -> Self {
        Self {
            name: default_function_name(),
            endpoint_url: default_endpoint_url(),
            region: default_region(),
            access_key_id: default_static_credential(),
            secret_access_key: default_static_credential(),
            timeout_secs: default_invoke_timeout(),
        }
    }
}

impl FunctionConfig {
    /// Invocation timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("Function name is empty".into()));
        }
        if self.region.trim().is_empty() {
            return Err(ConfigError::Invalid("Function region is empty".into()));
        }
        if let Some(ref url) = self.endpoint_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!(
                    "Endpoint URL must be http(s): {}",
                    url
                )));
            }
        }
        Ok(())
    }
}

/// Exponential backoff applied after a lost connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// First delay (milliseconds).
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Delay cap (milliseconds).
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Consecutive failed attempts before giving up (0 = never give up).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_initial_delay() -> u64 {
    1_000
}

fn default_max_delay() -> u64 {
    60_000
}

fn default_max_attempts() -> u32 {
    10
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl ReconnectConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "reconnect.initial_delay_ms must be non-zero".into(),
            ));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "reconnect.max_delay_ms ({}) is below initial_delay_ms ({})",
                self.max_delay_ms, self.initial_delay_ms
            )));
        }
        Ok(())
    }
}

/// Demo publisher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// MQTT client identifier of the publisher.
    #[serde(default = "default_publisher_client_id")]
    pub client_id: String,

    /// Payload published on every tick.
    #[serde(default = "default_publisher_payload")]
    pub payload: String,

    /// Seconds between publications.
    #[serde(default = "default_publish_interval")]
    pub interval_secs: u64,

    /// Publish QoS.
    #[serde(default = "default_publisher_qos")]
    pub qos: u8,

    /// Keepalive interval in seconds.
    #[serde(default = "default_publisher_keep_alive")]
    pub keep_alive_secs: u64,
}

fn default_publisher_client_id() -> String {
    "sensor-publisher".to_string()
}

fn default_publisher_payload() -> String {
    serde_json::json!({
        "device_id": "sensor-publisher-01",
        "temperature": 24.5,
        "status": "OK",
    })
    .to_string()
}

fn default_publish_interval() -> u64 {
    30
}

fn default_publisher_qos() -> u8 {
    1
}

fn default_publisher_keep_alive() -> u64 {
    20
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            client_id: default_publisher_client_id(),
            payload: default_publisher_payload(),
            interval_secs: default_publish_interval(),
            qos: default_publisher_qos(),
            keep_alive_secs: default_publisher_keep_alive(),
        }
    }
}

impl PublisherConfig {
    /// Publish QoS.
    pub fn qos(&self) -> Result<QoS, ConfigError> {
        qos_from_level(self.qos)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.is_empty() || self.client_id.starts_with(' ') {
            return Err(ConfigError::Invalid(format!(
                "Publisher client_id is invalid: {:?}",
                self.client_id
            )));
        }
        if self.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "publisher.interval_secs must be non-zero".into(),
            ));
        }
        self.qos()?;
        Ok(())
    }
}

fn qos_from_level(level: u8) -> Result<QoS, ConfigError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(ConfigError::Invalid(format!(
            "QoS must be 0, 1 or 2 (got {})",
            other
        ))),
    }
}

/// Check an MQTT topic filter: `+` and `#` must fill a whole level, `#` only last.
pub fn is_valid_topic_filter(filter: &str) -> bool {
    if filter.is_empty() || filter.contains('\0') {
        return false;
    }
    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;
    levels.iter().enumerate().all(|(i, level)| match *level {
        "#" => i == last,
        "+" => true,
        other => !other.contains(['#', '+']),
    })
}

/// Check an MQTT topic name used for publishing (no wildcards).
pub fn is_valid_topic_name(topic: &str) -> bool {
    !topic.is_empty() && !topic.contains(['#', '+', '\0'])
}
