//! DNS server setup and lifecycle management.

use hickory_server::ServerFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::chain::ServFail;
use crate::config::DnsConfig;
use crate::error::DnsError;
use crate::handler::VirtHandler;
use crate::libvirt::LibvirtClient;

/// Idle timeout for TCP connections.
const TCP_TIMEOUT: Duration = Duration::from_secs(30);

/// DNS server resolving VM names through libvirt.
pub struct DnsServer {
    config: DnsConfig,
}

impl DnsServer {
    /// Create a new DNS server with the given configuration.
    pub fn new(config: DnsConfig) -> Self {
        Self { config }
    }

    /// Build the request handler chain for this server.
    pub fn handler(&self) -> Result<VirtHandler<LibvirtClient, ServFail>, DnsError> {
        let client = Arc::new(LibvirtClient::from_config(&self.config));
        VirtHandler::new(&self.config, client, ServFail)
    }

    /// Run the DNS server until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), DnsError> {
        let handler = self.handler()?;

        info!(
            listen_addr = %self.config.listen_addr,
            suffix = %handler.suffix(),
            socket = %self.config.socket().display(),
            connect_uri = %self.config.connect_uri,
            disconnect = ?self.config.disconnect,
            "Starting virt-dns server"
        );

        let mut server = ServerFuture::new(handler);

        // Bind UDP
        let udp_socket = UdpSocket::bind(self.config.listen_addr).await?;
        info!(addr = %self.config.listen_addr, "DNS UDP listening");
        server.register_socket(udp_socket);

        // Bind TCP
        let tcp_listener = TcpListener::bind(self.config.listen_addr).await?;
        info!(addr = %self.config.listen_addr, "DNS TCP listening");
        server.register_listener(tcp_listener, TCP_TIMEOUT);

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("DNS server shutdown requested");
            }
            result = server.block_until_done() => {
                if let Err(e) = result {
                    error!("DNS server error: {}", e);
                    return Err(e.into());
                }
            }
        }

        info!("DNS server stopped");
        Ok(())
    }
}
