//! DNS client configuration.
//!
//! Chromium mapping: net/dns/dns_config.h
//!
//! A [`DnsConfig`] is an immutable value once handed to a
//! [`DnsSession`](super::DnsSession); a configuration change produces a new
//! session rather than mutating the old one.

use crate::base::networkchange::ConnectionType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Default per-attempt timeout before any RTT has been observed.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Default number of attempts per server.
pub const DEFAULT_ATTEMPTS: usize = 2;

/// Errors raised while loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read DNS config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse DNS config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid DoH server template: {0}")]
    InvalidDohTemplate(String),
    #[error("invalid timeout override: {0}")]
    InvalidTimeoutOverride(String),
}

/// Secure DNS (DoH) usage policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecureDnsMode {
    /// Never use DoH.
    #[default]
    Off,
    /// Use DoH servers that passed a background probe, fall back to insecure.
    Automatic,
    /// Use configured DoH servers unconditionally.
    Secure,
}

/// A single DoH server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDohServerConfig")]
pub struct DohServerConfig {
    server_template: String,
    use_post: bool,
}

#[derive(Deserialize)]
struct RawDohServerConfig {
    server_template: String,
    #[serde(default)]
    use_post: bool,
}

impl TryFrom<RawDohServerConfig> for DohServerConfig {
    type Error = ConfigError;

    fn try_from(raw: RawDohServerConfig) -> Result<Self, Self::Error> {
        DohServerConfig::new(raw.server_template, raw.use_post)
    }
}

impl DohServerConfig {
    /// Create a DoH server entry from a URI template such as
    /// `https://dns.example/dns-query{?dns}`.
    pub fn new(server_template: impl Into<String>, use_post: bool) -> Result<Self, ConfigError> {
        let server_template = server_template.into();
        let url = Self::parse_template(&server_template)?;
        if url.scheme() != "https" || url.host_str().is_none() {
            return Err(ConfigError::InvalidDohTemplate(server_template));
        }
        Ok(Self { server_template, use_post })
    }

    fn parse_template(template: &str) -> Result<Url, ConfigError> {
        // Drop the RFC 6570 expression, the rest must be a plain URL.
        let base = match template.find('{') {
            Some(pos) => &template[..pos],
            None => template,
        };
        Url::parse(base).map_err(|_| ConfigError::InvalidDohTemplate(template.to_string()))
    }

    pub fn server_template(&self) -> &str {
        &self.server_template
    }

    pub fn use_post(&self) -> bool {
        self.use_post
    }

    /// Host of the DoH endpoint.
    pub fn host(&self) -> Option<String> {
        Self::parse_template(&self.server_template)
            .ok()
            .and_then(|url| url.host_str().map(str::to_owned))
    }
}

/// Per-connection-type timeout overrides.
///
/// Chromium sources these from field trials; here they are plain config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutOverrides {
    #[serde(default, with = "millis_map")]
    pub initial_timeout: HashMap<ConnectionType, Duration>,
    #[serde(default, with = "millis_map")]
    pub max_timeout: HashMap<ConnectionType, Duration>,
}

impl TimeoutOverrides {
    /// Parse a colon-separated list of milliseconds indexed by connection
    /// type, e.g. `"1000:500:800"`. Missing trailing entries fall back to
    /// the first entry. An empty string yields no overrides.
    pub fn parse_millis_list(list: &str) -> Result<HashMap<ConnectionType, Duration>, ConfigError> {
        let mut map = HashMap::new();
        if list.trim().is_empty() {
            return Ok(map);
        }

        let values = list
            .split(':')
            .map(|part| {
                part.trim()
                    .parse::<u64>()
                    .map(Duration::from_millis)
                    .map_err(|_| ConfigError::InvalidTimeoutOverride(list.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        for ty in ConnectionType::ALL {
            let value = values.get(ty.index()).unwrap_or(&values[0]);
            map.insert(ty, *value);
        }
        Ok(map)
    }

    pub fn initial_timeout_for(&self, ty: ConnectionType, default: Duration) -> Duration {
        self.initial_timeout.get(&ty).copied().unwrap_or(default)
    }

    pub fn max_timeout_for(&self, ty: ConnectionType, default: Duration) -> Duration {
        self.max_timeout.get(&ty).copied().unwrap_or(default)
    }
}

/// DNS client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsConfig {
    /// Insecure nameservers, in preference order.
    pub nameservers: Vec<SocketAddr>,
    /// DoH servers, in preference order.
    pub dns_over_https_servers: Vec<DohServerConfig>,
    /// Rotate the first server used across queries.
    pub rotate: bool,
    /// Consecutive failures tolerated per server before it is skipped.
    pub attempts: usize,
    /// Base per-attempt timeout.
    #[serde(with = "millis")]
    pub timeout: Duration,
    /// Secure DNS policy.
    pub secure_dns_mode: SecureDnsMode,
    /// Timeout overrides by connection type.
    pub timeout_overrides: TimeoutOverrides,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            nameservers: Vec::new(),
            dns_over_https_servers: Vec::new(),
            rotate: false,
            attempts: DEFAULT_ATTEMPTS,
            timeout: DEFAULT_TIMEOUT,
            secure_dns_mode: SecureDnsMode::Off,
            timeout_overrides: TimeoutOverrides::default(),
        }
    }
}

impl DnsConfig {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// A config is usable if it names at least one server.
    pub fn is_valid(&self) -> bool {
        !self.nameservers.is_empty() || !self.dns_over_https_servers.is_empty()
    }

    /// Set insecure nameservers.
    pub fn nameservers(mut self, nameservers: Vec<SocketAddr>) -> Self {
        self.nameservers = nameservers;
        self
    }

    /// Set DoH servers.
    pub fn dns_over_https_servers(mut self, servers: Vec<DohServerConfig>) -> Self {
        self.dns_over_https_servers = servers;
        self
    }

    /// Enable or disable rotation.
    pub fn rotate(mut self, rotate: bool) -> Self {
        self.rotate = rotate;
        self
    }

    /// Set attempts per server.
    pub fn attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts;
        self
    }

    /// Set base timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set secure DNS mode.
    pub fn secure_dns_mode(mut self, mode: SecureDnsMode) -> Self {
        self.secure_dns_mode = mode;
        self
    }

    /// Set timeout overrides.
    pub fn timeout_overrides(mut self, overrides: TimeoutOverrides) -> Self {
        self.timeout_overrides = overrides;
        self
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod millis_map {
    use crate::base::networkchange::ConnectionType;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::HashMap;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &HashMap<ConnectionType, Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let millis: HashMap<ConnectionType, u64> =
            value.iter().map(|(k, v)| (*k, v.as_millis() as u64)).collect();
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<HashMap<ConnectionType, Duration>, D::Error> {
        let millis = HashMap::<ConnectionType, u64>::deserialize(deserializer)?;
        Ok(millis.into_iter().map(|(k, v)| (k, Duration::from_millis(v))).collect())
    }
}
