//! libvirt client speaking the remote protocol over the local daemon socket.
//!
//! Calls are serialized on the single socket by an internal lock, so one
//! client can be shared by every query once the session is open. Any transport
//! failure drops the socket and marks the client disconnected; the next
//! [`Hypervisor::connect`] dials a fresh one.

pub mod protocol;
pub mod xdr;

use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::config::DnsConfig;
use crate::hypervisor::{
    AddressSource, Domain, DomainState, Hypervisor, HypervisorError, Interface,
};
use protocol::{message_type, status, Header, Procedure};
use xdr::XdrReader;

/// Hypervisor client for a local libvirt daemon.
pub struct LibvirtClient {
    socket: PathBuf,
    dial_timeout: Duration,
    connected: AtomicBool,
    serial: AtomicU32,
    stream: Mutex<Option<UnixStream>>,
}

impl LibvirtClient {
    /// Client dialing `socket`, giving up on the dial after `dial_timeout`.
    pub fn new(socket: impl Into<PathBuf>, dial_timeout: Duration) -> Self {
        Self {
            socket: socket.into(),
            dial_timeout,
            connected: AtomicBool::new(false),
            serial: AtomicU32::new(1),
            stream: Mutex::new(None),
        }
    }

    /// Client for the socket and timeout in `config`.
    pub fn from_config(config: &DnsConfig) -> Self {
        Self::new(config.socket(), config.dial_timeout())
    }

    /// Issue one call and return the reply body.
    async fn call(&self, procedure: Procedure, args: &[u8]) -> Result<Bytes, HypervisorError> {
        let mut slot = self.stream.lock().await;
        self.call_on(&mut slot, procedure, args).await
    }

    async fn call_on(
        &self,
        slot: &mut Option<UnixStream>,
        procedure: Procedure,
        args: &[u8],
    ) -> Result<Bytes, HypervisorError> {
        let Some(stream) = slot.as_mut() else {
            return Err(HypervisorError::NotConnected);
        };

        let serial = self.serial.fetch_add(1, Ordering::Relaxed);
        match exchange(stream, Header::call(procedure, serial), args).await {
            Ok((header, body)) if header.status == status::OK => Ok(body),
            Ok((_, body)) => Err(protocol::remote_error(&mut XdrReader::new(&body))),
            Err(e) => {
                debug!(error = %e, ?procedure, "libvirt transport failed, dropping connection");
                *slot = None;
                self.connected.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }
}

/// Send one call and wait for its reply, skipping unrelated packets.
async fn exchange(
    stream: &mut UnixStream,
    call: Header,
    args: &[u8],
) -> Result<(Header, Bytes), HypervisorError> {
    stream.write_all(&protocol::encode_packet(&call, args)).await?;

    loop {
        let (header, body) = read_packet(stream).await?;
        if header.kind == message_type::REPLY
            && header.serial == call.serial
            && header.procedure == call.procedure
        {
            return Ok((header, body));
        }
        trace!(
            procedure = header.procedure,
            kind = header.kind,
            serial = header.serial,
            "skipping unrelated libvirt packet"
        );
    }
}

/// Read one packet, returning its header and body.
pub async fn read_packet(stream: &mut UnixStream) -> Result<(Header, Bytes), HypervisorError> {
    let len = protocol::check_packet_len(stream.read_u32().await?)?;
    let mut buf = vec![0u8; len - 4];
    stream.read_exact(&mut buf).await?;

    let mut reader = XdrReader::new(&buf);
    let header = protocol::decode_header(&mut reader)?;
    let body = Bytes::copy_from_slice(&buf[protocol::HEADER_LEN - 4..]);
    Ok((header, body))
}

#[async_trait]
impl Hypervisor for LibvirtClient {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self, uri: &str) -> Result<(), HypervisorError> {
        let mut slot = self.stream.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let stream = tokio::time::timeout(self.dial_timeout, UnixStream::connect(&self.socket))
            .await
            .map_err(|_| HypervisorError::Timeout(self.dial_timeout))??;
        *slot = Some(stream);

        let args = protocol::connect_open_args(uri);
        if let Err(e) = self.call_on(&mut slot, Procedure::ConnectOpen, &args).await {
            *slot = None;
            return Err(e);
        }

        debug!(socket = %self.socket.display(), uri, "libvirt session open");
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), HypervisorError> {
        let mut slot = self.stream.lock().await;
        let result = self.call_on(&mut slot, Procedure::ConnectClose, &[]).await;

        if let Some(mut stream) = slot.take() {
            let _ = stream.shutdown().await;
        }
        self.connected.store(false, Ordering::SeqCst);
        result.map(|_| ())
    }

    async fn lookup_domain(&self, name: &str) -> Result<Domain, HypervisorError> {
        let body = self
            .call(Procedure::DomainLookupByName, &protocol::lookup_by_name_args(name))
            .await?;
        protocol::get_domain(&mut XdrReader::new(&body))
    }

    async fn interface_addresses(
        &self,
        domain: &Domain,
        source: AddressSource,
    ) -> Result<Vec<Interface>, HypervisorError> {
        let args = protocol::interface_addresses_args(domain, source.code());
        let body = self.call(Procedure::DomainInterfaceAddresses, &args).await?;
        protocol::interface_addresses_ret(&mut XdrReader::new(&body))
    }

    async fn domain_state(&self, domain: &Domain) -> Result<DomainState, HypervisorError> {
        let body = self
            .call(Procedure::DomainGetState, &protocol::get_state_args(domain))
            .await?;
        protocol::get_state_ret(&mut XdrReader::new(&body))
    }
}
