//! Mapping of hypervisor data into DNS resource records.

use hickory_proto::rr::rdata::{A, AAAA, TXT};
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use std::net::IpAddr;
use tracing::{info, warn};

use crate::hypervisor::{DomainState, Interface};

/// Query types this resolver answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// IPv4 address records.
    A,
    /// IPv6 address records.
    Aaaa,
    /// Metadata text records.
    Txt,
}

impl QueryKind {
    /// Classify a record type, `None` when the resolver does not serve it.
    pub fn from_record_type(rtype: RecordType) -> Option<Self> {
        match rtype {
            RecordType::A => Some(QueryKind::A),
            RecordType::AAAA => Some(QueryKind::Aaaa),
            RecordType::TXT => Some(QueryKind::Txt),
            _ => None,
        }
    }

    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::A => "A",
            QueryKind::Aaaa => "AAAA",
            QueryKind::Txt => "TXT",
        }
    }
}

/// Build the answer set for one query.
///
/// `state` is only consulted for TXT queries.
pub fn synthesize(
    kind: QueryKind,
    qname: &Name,
    interfaces: &[Interface],
    state: DomainState,
    ttl: u32,
) -> Vec<Record> {
    let mut answers = Vec::new();

    for iface in interfaces {
        for addr in &iface.addrs {
            info!(address = %addr.addr, interface = %iface.name, "Replying with address");
            match kind {
                QueryKind::A => {
                    if let Some(IpAddr::V4(v4)) = parse_ip(&addr.addr) {
                        answers.push(record(qname.clone(), ttl, RData::A(A::from(v4))));
                    }
                }
                QueryKind::Aaaa => {
                    if let Some(IpAddr::V6(v6)) = parse_ip(&addr.addr) {
                        answers.push(record(qname.clone(), ttl, RData::AAAA(AAAA::from(v6))));
                    }
                }
                QueryKind::Txt => {
                    let mask = format!("{}/{}", addr.addr, addr.prefix);
                    answers.extend(txt_record(qname, "mask", mask, ttl));
                    answers.extend(txt_record(qname, "if", iface.name.clone(), ttl));
                }
            }
        }
    }

    if kind == QueryKind::Txt {
        answers.extend(txt_record(qname, "state", state.as_str().to_string(), ttl));
    }

    answers
}

/// Parse an address literal, folding IPv4-mapped IPv6 into IPv4.
fn parse_ip(addr: &str) -> Option<IpAddr> {
    match addr.parse::<IpAddr>().ok()? {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => Some(IpAddr::V4(v4)),
            None => Some(IpAddr::V6(v6)),
        },
        v4 => Some(v4),
    }
}

fn txt_record(qname: &Name, label: &str, value: String, ttl: u32) -> Option<Record> {
    match qname.prepend_label(label) {
        Ok(name) => Some(record(name, ttl, RData::TXT(TXT::new(vec![value])))),
        Err(e) => {
            warn!(name = %qname, label, error = %e, "Unable to build TXT owner name");
            None
        }
    }
}

fn record(name: Name, ttl: u32, rdata: RData) -> Record {
    let mut record = Record::from_rdata(name, ttl, rdata);
    record.set_dns_class(DNSClass::IN);
    record
}
