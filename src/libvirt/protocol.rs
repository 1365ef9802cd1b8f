//! libvirt remote protocol framing and message bodies.
//!
//! Every packet is a big-endian `u32` length (covering the whole packet,
//! length word included) followed by a fixed header and an XDR body.

use bytes::{BufMut, BytesMut};

use super::xdr::{XdrReader, XdrWriter};
use crate::hypervisor::{Domain, DomainState, HypervisorError, Interface, InterfaceAddress};

/// `REMOTE_PROGRAM`.
pub const PROGRAM: u32 = 0x2000_8086;
/// `REMOTE_PROTOCOL_VERSION`.
pub const PROTOCOL_VERSION: u32 = 1;
/// Length word plus six header words.
pub const HEADER_LEN: usize = 28;
/// Largest packet accepted from the daemon.
pub const MAX_PACKET_LEN: usize = 32 * 1024 * 1024;

/// `REMOTE_DOMAIN_INTERFACE_MAX`.
const INTERFACE_MAX: usize = 2048;
/// `REMOTE_DOMAIN_IP_ADDR_MAX`.
const IP_ADDR_MAX: usize = 2048;

/// Remote procedures used by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Procedure {
    /// `REMOTE_PROC_CONNECT_OPEN`
    ConnectOpen = 1,
    /// `REMOTE_PROC_CONNECT_CLOSE`
    ConnectClose = 2,
    /// `REMOTE_PROC_DOMAIN_LOOKUP_BY_NAME`
    DomainLookupByName = 23,
    /// `REMOTE_PROC_DOMAIN_GET_STATE`
    DomainGetState = 212,
    /// `REMOTE_PROC_DOMAIN_INTERFACE_ADDRESSES`
    DomainInterfaceAddresses = 353,
}

impl Procedure {
    /// Decode a procedure number.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Procedure::ConnectOpen),
            2 => Some(Procedure::ConnectClose),
            23 => Some(Procedure::DomainLookupByName),
            212 => Some(Procedure::DomainGetState),
            353 => Some(Procedure::DomainInterfaceAddresses),
            _ => None,
        }
    }
}

/// `virNetMessageType`.
pub mod message_type {
    /// Client request.
    pub const CALL: u32 = 0;
    /// Daemon response to a call.
    pub const REPLY: u32 = 1;
    /// Asynchronous event.
    pub const MESSAGE: u32 = 2;
}

/// `virNetMessageStatus`.
pub mod status {
    /// Success.
    pub const OK: u32 = 0;
    /// Body is a `remote_error`.
    pub const ERROR: u32 = 1;
}

/// Packet header following the length word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// RPC program.
    pub program: u32,
    /// Program version.
    pub version: u32,
    /// Procedure number.
    pub procedure: i32,
    /// Message type.
    pub kind: u32,
    /// Request serial echoed in the reply.
    pub serial: u32,
    /// Reply status.
    pub status: u32,
}

impl Header {
    /// Header for a call.
    pub fn call(procedure: Procedure, serial: u32) -> Self {
        Self {
            program: PROGRAM,
            version: PROTOCOL_VERSION,
            procedure: procedure as i32,
            kind: message_type::CALL,
            serial,
            status: status::OK,
        }
    }

    /// Header for a reply to `call`.
    pub fn reply_to(call: &Header, status: u32) -> Self {
        Self {
            kind: message_type::REPLY,
            status,
            ..*call
        }
    }
}

/// Frame a header and body into a packet.
pub fn encode_packet(header: &Header, body: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
    buf.put_u32((HEADER_LEN + body.len()) as u32);
    buf.put_u32(header.program);
    buf.put_u32(header.version);
    buf.put_i32(header.procedure);
    buf.put_u32(header.kind);
    buf.put_u32(header.serial);
    buf.put_u32(header.status);
    buf.put_slice(body);
    buf
}

/// Validate a packet length word.
pub fn check_packet_len(len: u32) -> Result<usize, HypervisorError> {
    let len = len as usize;
    if !(HEADER_LEN..=MAX_PACKET_LEN).contains(&len) {
        return Err(HypervisorError::Protocol(format!("invalid packet length {len}")));
    }
    Ok(len)
}

/// Decode the header of a packet whose length word was already consumed.
pub fn decode_header(reader: &mut XdrReader<'_>) -> Result<Header, HypervisorError> {
    let header = Header {
        program: reader.get_u32()?,
        version: reader.get_u32()?,
        procedure: reader.get_i32()?,
        kind: reader.get_u32()?,
        serial: reader.get_u32()?,
        status: reader.get_u32()?,
    };
    if header.program != PROGRAM || header.version != PROTOCOL_VERSION {
        return Err(HypervisorError::Protocol(format!(
            "unexpected program {:#x} version {}",
            header.program, header.version
        )));
    }
    Ok(header)
}

/// Body of `REMOTE_PROC_CONNECT_OPEN`.
pub fn connect_open_args(uri: &str) -> BytesMut {
    let mut w = XdrWriter::new();
    w.put_optional_string(Some(uri)).put_u32(0);
    w.finish()
}

/// Body of `REMOTE_PROC_DOMAIN_LOOKUP_BY_NAME`.
pub fn lookup_by_name_args(name: &str) -> BytesMut {
    let mut w = XdrWriter::new();
    w.put_string(name);
    w.finish()
}

/// Body of `REMOTE_PROC_DOMAIN_GET_STATE`.
pub fn get_state_args(domain: &Domain) -> BytesMut {
    let mut w = XdrWriter::new();
    put_domain(&mut w, domain);
    w.put_u32(0);
    w.finish()
}

/// Body of `REMOTE_PROC_DOMAIN_INTERFACE_ADDRESSES`.
pub fn interface_addresses_args(domain: &Domain, source: u32) -> BytesMut {
    let mut w = XdrWriter::new();
    put_domain(&mut w, domain);
    w.put_u32(source).put_u32(0);
    w.finish()
}

/// Encode a `remote_nonnull_domain`.
pub fn put_domain(w: &mut XdrWriter, domain: &Domain) {
    w.put_string(&domain.name)
        .put_fixed(&domain.uuid)
        .put_i32(domain.id);
}

/// Decode a `remote_nonnull_domain`.
pub fn get_domain(r: &mut XdrReader<'_>) -> Result<Domain, HypervisorError> {
    let name = r.get_string()?;
    let mut uuid = [0u8; 16];
    r.get_fixed(&mut uuid)?;
    let id = r.get_i32()?;
    Ok(Domain { name, uuid, id })
}

/// Decode the reply of `REMOTE_PROC_DOMAIN_GET_STATE`.
pub fn get_state_ret(r: &mut XdrReader<'_>) -> Result<DomainState, HypervisorError> {
    let state = r.get_i32()?;
    let _reason = r.get_i32()?;
    Ok(DomainState::from_code(state))
}

/// Decode the reply of `REMOTE_PROC_DOMAIN_INTERFACE_ADDRESSES`.
pub fn interface_addresses_ret(r: &mut XdrReader<'_>) -> Result<Vec<Interface>, HypervisorError> {
    let count = r.get_array_len(INTERFACE_MAX)?;
    let mut interfaces = Vec::with_capacity(count);
    for _ in 0..count {
        let name = r.get_string()?;
        let hwaddr = r.get_optional_string()?;
        let addr_count = r.get_array_len(IP_ADDR_MAX)?;
        let mut addrs = Vec::with_capacity(addr_count);
        for _ in 0..addr_count {
            let _kind = r.get_i32()?;
            let addr = r.get_string()?;
            let prefix = r.get_u32()?;
            addrs.push(InterfaceAddress { addr, prefix });
        }
        interfaces.push(Interface { name, hwaddr, addrs });
    }
    Ok(interfaces)
}

/// Decode the leading fields of a `remote_error` into an error value.
pub fn remote_error(r: &mut XdrReader<'_>) -> HypervisorError {
    match decode_remote_error(r) {
        Ok(err) | Err(err) => err,
    }
}

fn decode_remote_error(r: &mut XdrReader<'_>) -> Result<HypervisorError, HypervisorError> {
    let code = r.get_i32()?;
    let _domain = r.get_i32()?;
    let message = r.get_optional_string()?;
    Ok(HypervisorError::Remote {
        code,
        message: message.unwrap_or_else(|| "unknown error".to_string()),
    })
}
