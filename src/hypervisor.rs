//! Hypervisor client interface consumed by the resolver.
//!
//! The resolver only needs a handful of calls from the management channel:
//! session open/close, domain lookup by name, interface address enumeration
//! and the domain run state. [`Hypervisor`] captures exactly that contract so
//! the front-end can be driven by the libvirt client in production and by a
//! mock in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// libvirt error code reported when a domain does not exist.
pub const ERR_NO_DOMAIN: i32 = 42;

/// Errors returned by a hypervisor client.
#[derive(Debug, Error)]
pub enum HypervisorError {
    /// A call was made without an established session.
    #[error("not connected to hypervisor")]
    NotConnected,

    /// Establishing the session took longer than the dial timeout.
    #[error("timed out dialing hypervisor after {0:?}")]
    Timeout(std::time::Duration),

    /// Socket level failure.
    #[error("hypervisor I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The named domain does not exist.
    #[error("domain not found: {0}")]
    NoDomain(String),

    /// The hypervisor answered with an error.
    #[error("hypervisor error {code}: {message}")]
    Remote {
        /// libvirt error code.
        code: i32,
        /// Human readable message.
        message: String,
    },

    /// The peer sent something we could not decode.
    #[error("hypervisor protocol error: {0}")]
    Protocol(String),
}

impl HypervisorError {
    /// True when the error means the domain is simply unknown.
    pub fn is_no_domain(&self) -> bool {
        matches!(self, HypervisorError::NoDomain(_))
            || matches!(self, HypervisorError::Remote { code, .. } if *code == ERR_NO_DOMAIN)
    }
}

/// Handle to a named virtual machine, valid for one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    /// Domain name as known to the hypervisor.
    pub name: String,
    /// Domain UUID.
    pub uuid: [u8; 16],
    /// Runtime id, `-1` when the domain is not running.
    pub id: i32,
}

/// A network interface attached to a domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    /// Interface name (e.g. `vnet0` or the guest name `eth0`).
    pub name: String,
    /// MAC address, when reported.
    pub hwaddr: Option<String>,
    /// Addresses in the order the hypervisor returned them.
    pub addrs: Vec<InterfaceAddress>,
}

/// One address on an interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddress {
    /// Textual address, exactly as reported.
    pub addr: String,
    /// Prefix length.
    pub prefix: u32,
}

/// Where the hypervisor should take interface addresses from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressSource {
    /// DHCP leases of libvirt managed networks.
    #[default]
    Lease,
    /// The QEMU guest agent.
    Agent,
    /// The host ARP table.
    Arp,
}

impl AddressSource {
    /// Wire value of the source.
    pub fn code(self) -> u32 {
        match self {
            AddressSource::Lease => 0,
            AddressSource::Agent => 1,
            AddressSource::Arp => 2,
        }
    }
}

/// Coarse run state of a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainState {
    /// No state.
    NoState,
    /// Running.
    Running,
    /// Blocked on a resource.
    Blocked,
    /// Paused by the user.
    Paused,
    /// Being shut down.
    Shutdown,
    /// Shut off.
    Shutoff,
    /// Crashed.
    Crashed,
    /// Suspended by guest power management.
    PmSuspended,
    /// State could not be determined.
    Unknown,
}

impl DomainState {
    /// Decode a libvirt `virDomainState` value.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => DomainState::NoState,
            1 => DomainState::Running,
            2 => DomainState::Blocked,
            3 => DomainState::Paused,
            4 => DomainState::Shutdown,
            5 => DomainState::Shutoff,
            6 => DomainState::Crashed,
            7 => DomainState::PmSuspended,
            _ => DomainState::Unknown,
        }
    }

    /// Name used in `state.` TXT records.
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainState::NoState => "no-state",
            DomainState::Running => "running",
            DomainState::Blocked => "blocked",
            DomainState::Paused => "paused",
            DomainState::Shutdown => "shutdown",
            DomainState::Shutoff => "shutoff",
            DomainState::Crashed => "crashed",
            DomainState::PmSuspended => "pm-suspended",
            DomainState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DomainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client for the hypervisor management channel.
///
/// Implementations must be safe to call concurrently once connected; the
/// persistent session policy issues calls from many queries at once without
/// taking any lock of its own.
#[async_trait]
pub trait Hypervisor: Send + Sync + 'static {
    /// Whether a session is currently established.
    fn is_connected(&self) -> bool;

    /// Open a session to `uri`. Callers check [`Hypervisor::is_connected`]
    /// first; calling this on a live session is not supported.
    async fn connect(&self, uri: &str) -> Result<(), HypervisorError>;

    /// Close the current session.
    async fn disconnect(&self) -> Result<(), HypervisorError>;

    /// Look up a domain by name.
    async fn lookup_domain(&self, name: &str) -> Result<Domain, HypervisorError>;

    /// Enumerate interfaces and their addresses.
    async fn interface_addresses(
        &self,
        domain: &Domain,
        source: AddressSource,
    ) -> Result<Vec<Interface>, HypervisorError>;

    /// Current run state.
    async fn domain_state(&self, domain: &Domain) -> Result<DomainState, HypervisorError>;
}
