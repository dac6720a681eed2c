//! Configuration types for nova-dns.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use crate::error::DnsError;

/// Environment variable prefix for configuration overrides
/// (e.g. `NOVA_DNS__DNS__TTL=30`).
pub const ENV_PREFIX: &str = "NOVA_DNS";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// DNS listener, upstream and answer configuration.
    #[serde(default)]
    pub dns: DnsConfig,

    /// Compute inventory cache configuration.
    #[serde(default)]
    pub inventory: InventoryConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Load configuration from an optional TOML file, then `NOVA_DNS__*` environment
    /// variables. A missing file is not an error.
    ///
    /// The result is not validated: callers layer their own overrides on top
    /// and call [`Config::validate`] once the final values are known.
    pub fn load(path: &Path) -> Result<Self, DnsError> {
        let config: Config = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| DnsError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Reject values that would make the resolver misbehave.
    pub fn validate(&self) -> Result<(), DnsError> {
        if self.dns.ttl == 0 {
            return Err(DnsError::Config("dns.ttl must be greater than zero".into()));
        }
        if self.dns.upstream_timeout_ms == 0 {
            return Err(DnsError::Config(
                "dns.upstream_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.dns.domain_suffix.is_empty() || self.dns.domain_suffix.contains('.') {
            return Err(DnsError::Config(format!(
                "dns.domain_suffix must be a single label, got {:?}",
                self.dns.domain_suffix
            )));
        }
        self.dns.upstream_addr()?;

        if self.inventory.stale_after_secs == 0 {
            return Err(DnsError::Config(
                "inventory.stale_after_secs must be greater than zero".into(),
            ));
        }
        if self.inventory.provider_timeout_ms == 0 {
            return Err(DnsError::Config(
                "inventory.provider_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.inventory.page_size == 0 {
            return Err(DnsError::Config(
                "inventory.page_size must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// DNS server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Address for the DNS server to listen on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Also serve DNS over TCP on `listen_addr` (UDP is always served).
    #[serde(default)]
    pub tcp: bool,

    /// Upstream DNS server for every query this server does not answer itself.
    /// `host:port`, or a bare IP meaning port 53.
    #[serde(default = "default_upstream")]
    pub upstream: String,

    /// Upstream query timeout in milliseconds.
    #[serde(default = "default_upstream_timeout_ms")]
    pub upstream_timeout_ms: u64,

    /// TTL for synthesized records in seconds.
    #[serde(default = "default_ttl")]
    pub ttl: u32,

    /// Reserved suffix label identifying instance names (e.g. `web1.novalocal`).
    #[serde(default = "default_domain_suffix")]
    pub domain_suffix: String,
}

impl DnsConfig {
    /// Parse `upstream` into a socket address.
    pub fn upstream_addr(&self) -> Result<SocketAddr, DnsError> {
        parse_upstream(&self.upstream)
    }

    /// Upstream query timeout.
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            tcp: false,
            upstream: default_upstream(),
            upstream_timeout_ms: default_upstream_timeout_ms(),
            ttl: default_ttl(),
            domain_suffix: default_domain_suffix(),
        }
    }
}

/// Compute inventory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryConfig {
    /// Age in seconds after which the cached inventory is refetched.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    /// Upper bound in milliseconds for one inventory fetch (auth + all pages).
    #[serde(default = "default_provider_timeout_ms")]
    pub provider_timeout_ms: u64,

    /// Servers requested per page from the compute API.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Region used to pick the compute endpoint from the service catalog.
    /// Falls back to `OS_REGION_NAME` when unset.
    #[serde(default)]
    pub region: Option<String>,

    /// Endpoint interface to use from the service catalog.
    #[serde(default = "default_interface")]
    pub interface: String,
}

impl InventoryConfig {
    /// Staleness threshold for the inventory cache.
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    /// Bound on a single provider fetch.
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after_secs(),
            provider_timeout_ms: default_provider_timeout_ms(),
            page_size: default_page_size(),
            region: None,
            interface: default_interface(),
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "nova_dns=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,

    /// OpenTelemetry configuration.
    #[serde(default)]
    pub opentelemetry: Option<OpenTelemetryConfig>,
}

/// OpenTelemetry exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenTelemetryConfig {
    /// OTLP endpoint (e.g., "http://localhost:4317").
    pub endpoint: String,

    /// Service name for traces.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
            opentelemetry: None,
        }
    }
}

/// Parse an upstream address: `1.2.3.4:5353`, `[::1]:53` or a bare IP (port 53).
pub fn parse_upstream(upstream: &str) -> Result<SocketAddr, DnsError> {
    if let Ok(addr) = upstream.parse::<SocketAddr>() {
        return Ok(addr);
    }
    upstream
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, 53))
        .map_err(|_| DnsError::InvalidAddress(format!("upstream {upstream:?}")))
}

/// Parse a time span such as `60`, `60s`, `5m`, `2h`, `1d` or `1w` into
/// seconds. A bare number is seconds; the unit letter is case-insensitive.
pub fn parse_time(value: &str) -> Result<u32, DnsError> {
    let value = value.trim();
    let invalid = || DnsError::Config(format!("invalid time value {value:?}"));

    let (digits, unit) = match value.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => (&value[..idx], c.to_ascii_lowercase()),
        Some(_) => (value, 's'),
        None => return Err(invalid()),
    };
    let multiplier: u32 = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3_600,
        'd' => 86_400,
        'w' => 604_800,
        _ => return Err(invalid()),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    digits
        .parse::<u32>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(invalid)
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 53))
}

fn default_upstream() -> String {
    "8.8.8.8:53".to_string()
}

fn default_upstream_timeout_ms() -> u64 {
    5000
}

fn default_ttl() -> u32 {
    60
}

fn default_domain_suffix() -> String {
    "novalocal".to_string()
}

fn default_stale_after_secs() -> u64 {
    60
}

fn default_provider_timeout_ms() -> u64 {
    10_000
}

fn default_page_size() -> u32 {
    1000
}

fn default_interface() -> String {
    "public".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "nova-dns".to_string()
}
