//! virt-dns - A DNS resolver for libvirt virtual machine hostnames.
//!
//! This crate answers DNS queries for `<vm>.<suffix>` by asking the local
//! libvirt daemon about the domain named `<vm>`. Address queries return the
//! addresses libvirt reports for the domain's interfaces; TXT queries return
//! per-address metadata and the domain's run state.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                           virt-dns                             │
//! │                                                                │
//! │  UDP/TCP ──▶ ┌──────────────┐  not ours  ┌──────────────────┐  │
//! │    :53       │ VirtHandler  │───────────▶│  next handler    │  │
//! │              └──────┬───────┘            └──────────────────┘  │
//! │                     │ ensure / release                        │
//! │                     ▼                                          │
//! │              ┌──────────────┐   RPC     ┌──────────────────┐   │
//! │              │SessionManager│──────────▶│ libvirtd socket  │   │
//! │              └──────────────┘           └──────────────────┘   │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## DNS Resolution
//!
//! ```text
//! web1.virt.        A     → IPv4 addresses of domain "web1"
//! web1.virt.        AAAA  → IPv6 addresses of domain "web1"
//! web1.virt.        TXT   → mask.web1.virt. "10.0.0.5/24"
//!                           if.web1.virt.   "eth0"
//!                           state.web1.virt. "running"
//! ```
//!
//! Queries outside the suffix, for other record types, for unknown domains,
//! or failing on the hypervisor side are passed to the next handler.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use virt_dns::{DnsConfig, DnsServer};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = DnsConfig {
//!         listen_addr: "127.0.0.1:5353".parse().unwrap(),
//!         suffix: "virt".to_string(),
//!         ..DnsConfig::default()
//!     };
//!
//!     let server = DnsServer::new(config);
//!     server.run(CancellationToken::new()).await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

pub mod chain;
pub mod config;
pub mod error;
pub mod handler;
pub mod hypervisor;
pub mod libvirt;
pub mod metrics;
pub mod records;
pub mod server;
pub mod session;
pub mod telemetry;

// Re-export main types
pub use config::{Config, DnsConfig, TelemetryConfig};
pub use error::DnsError;
pub use handler::VirtHandler;
pub use hypervisor::{Hypervisor, HypervisorError};
pub use server::DnsServer;
pub use session::{DisconnectPolicy, SessionManager};
