//! Configuration types for virt-dns.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::DnsError;
use crate::hypervisor::AddressSource;
use crate::session::DisconnectPolicy;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// DNS resolver configuration.
    #[serde(default)]
    pub dns: DnsConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// DNS resolver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Address for DNS server to listen on (UDP and TCP).
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Domain suffix served by the resolver (e.g. "virt" for `web1.virt.`).
    #[serde(default = "default_suffix")]
    pub suffix: String,

    /// libvirt socket path. Empty uses the libvirt default socket.
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// libvirt connection URI.
    #[serde(default = "default_connect_uri")]
    pub connect_uri: String,

    /// Whether to close the hypervisor session after every query.
    #[serde(default)]
    pub disconnect: DisconnectPolicy,

    /// TTL for synthesized records in seconds.
    #[serde(default)]
    pub ttl: u32,

    /// Timeout for establishing the hypervisor session, in seconds.
    #[serde(default = "default_dial_timeout_secs")]
    pub dial_timeout_secs: u64,

    /// Source of interface addresses.
    #[serde(default)]
    pub address_source: AddressSource,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            suffix: default_suffix(),
            socket_path: default_socket_path(),
            connect_uri: default_connect_uri(),
            disconnect: DisconnectPolicy::default(),
            ttl: 0,
            dial_timeout_secs: default_dial_timeout_secs(),
            address_source: AddressSource::default(),
        }
    }
}

impl DnsConfig {
    /// The suffix with exactly one leading and one trailing dot.
    pub fn normalized_suffix(&self) -> Result<String, DnsError> {
        normalize_suffix(&self.suffix)
    }

    /// Socket to dial, falling back to the libvirt default when unset.
    pub fn socket(&self) -> PathBuf {
        if self.socket_path.is_empty() {
            PathBuf::from(LIBVIRT_DEFAULT_SOCKET)
        } else {
            PathBuf::from(&self.socket_path)
        }
    }

    /// Dial timeout as a duration.
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }
}

/// Socket libvirt listens on when no path is configured.
pub const LIBVIRT_DEFAULT_SOCKET: &str = "/var/run/libvirt/libvirt-sock";

/// Normalize a configured suffix to `.label[.label...].`, lowercased.
pub fn normalize_suffix(suffix: &str) -> Result<String, DnsError> {
    let trimmed = suffix.trim().trim_matches('.');
    if trimmed.is_empty() {
        return Err(DnsError::Config(format!(
            "suffix must contain at least one label, got {suffix:?}"
        )));
    }
    Ok(format!(".{}.", trimmed.to_ascii_lowercase()))
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "virt_dns=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5353))
}

fn default_suffix() -> String {
    "virt".to_string()
}

fn default_socket_path() -> String {
    "/run/libvirt/libvirt-sock-ro".to_string()
}

fn default_connect_uri() -> String {
    "qemu:///system".to_string()
}

fn default_dial_timeout_secs() -> u64 {
    5
}
