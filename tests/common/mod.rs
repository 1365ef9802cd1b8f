//! Shared test infrastructure for resolver integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::{Header, Message, MessageType, OpCode, Query};
use hickory_proto::rr::rdata::TXT;
use hickory_proto::rr::{DNSClass, Name, RData, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncoder};
use hickory_server::authority::{MessageRequest, MessageResponse, MessageResponseBuilder};
use hickory_server::proto::rr::Record;
use hickory_server::proto::xfer::Protocol;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};

use virt_dns::config::DnsConfig;
use virt_dns::handler::VirtHandler;
use virt_dns::hypervisor::{
    AddressSource, Domain, DomainState, Hypervisor, HypervisorError, Interface, InterfaceAddress,
};
use virt_dns::session::DisconnectPolicy;

// --- Constants ---

pub const SUFFIX: &str = "virt";
pub const MARKER_TEXT: &str = "downstream-marker";

// --- Mock hypervisor ---

/// One call observed by [`MockHypervisor`], in global order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect,
    Disconnect,
    Lookup(String),
    Interfaces(String),
    State(String),
}

impl Call {
    /// Domain a data call was made for.
    pub fn domain(&self) -> Option<&str> {
        match self {
            Call::Lookup(name) | Call::Interfaces(name) | Call::State(name) => Some(name),
            Call::Connect | Call::Disconnect => None,
        }
    }
}

#[derive(Debug, Clone)]
struct MockDomain {
    interfaces: Vec<Interface>,
    state: DomainState,
}

/// Scriptable in-memory hypervisor that records every call.
#[derive(Debug, Default)]
pub struct MockHypervisor {
    connected: AtomicBool,
    domains: Mutex<HashMap<String, MockDomain>>,
    calls: Mutex<Vec<Call>>,
    delay: Option<Duration>,
    fail_connect: AtomicBool,
    fail_interfaces: AtomicBool,
    fail_state: AtomicBool,
}

impl MockHypervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn add_domain(&self, name: &str, interfaces: Vec<Interface>, state: DomainState) {
        self.domains
            .lock()
            .unwrap()
            .insert(name.to_string(), MockDomain { interfaces, state });
    }

    pub fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn fail_interfaces(&self, fail: bool) {
        self.fail_interfaces.store(fail, Ordering::SeqCst);
    }

    pub fn fail_state(&self, fail: bool) {
        self.fail_state.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    pub fn connects(&self) -> usize {
        self.count(&Call::Connect)
    }

    pub fn disconnects(&self) -> usize {
        self.count(&Call::Disconnect)
    }

    async fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
        match self.delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }
    }

    fn domain(&self, name: &str) -> Option<MockDomain> {
        self.domains.lock().unwrap().get(name).cloned()
    }
}

#[async_trait]
impl Hypervisor for MockHypervisor {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self, _uri: &str) -> Result<(), HypervisorError> {
        self.record(Call::Connect).await;
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(HypervisorError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "mock dial refused",
            )));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), HypervisorError> {
        self.record(Call::Disconnect).await;
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn lookup_domain(&self, name: &str) -> Result<Domain, HypervisorError> {
        self.record(Call::Lookup(name.to_string())).await;
        if !self.is_connected() {
            return Err(HypervisorError::NotConnected);
        }
        match self.domain(name) {
            Some(_) => Ok(Domain {
                name: name.to_string(),
                uuid: [0; 16],
                id: 1,
            }),
            None => Err(HypervisorError::NoDomain(name.to_string())),
        }
    }

    async fn interface_addresses(
        &self,
        domain: &Domain,
        _source: AddressSource,
    ) -> Result<Vec<Interface>, HypervisorError> {
        self.record(Call::Interfaces(domain.name.clone())).await;
        if self.fail_interfaces.load(Ordering::SeqCst) {
            return Err(HypervisorError::Protocol("mock interface failure".into()));
        }
        self.domain(&domain.name)
            .map(|d| d.interfaces)
            .ok_or_else(|| HypervisorError::NoDomain(domain.name.clone()))
    }

    async fn domain_state(&self, domain: &Domain) -> Result<DomainState, HypervisorError> {
        self.record(Call::State(domain.name.clone())).await;
        if self.fail_state.load(Ordering::SeqCst) {
            return Err(HypervisorError::Protocol("mock state failure".into()));
        }
        self.domain(&domain.name)
            .map(|d| d.state)
            .ok_or_else(|| HypervisorError::NoDomain(domain.name.clone()))
    }
}

/// Build an interface with `(address, prefix)` pairs.
pub fn iface(name: &str, addrs: &[(&str, u32)]) -> Interface {
    Interface {
        name: name.to_string(),
        hwaddr: Some("52:54:00:12:34:56".to_string()),
        addrs: addrs
            .iter()
            .map(|(addr, prefix)| InterfaceAddress {
                addr: addr.to_string(),
                prefix: *prefix,
            })
            .collect(),
    }
}

// --- Downstream handler ---

/// Next handler in the chain; answers every query with a marker TXT record.
#[derive(Clone, Default)]
pub struct MarkerHandler {
    hits: Arc<AtomicUsize>,
}

impl MarkerHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RequestHandler for MarkerHandler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> ResponseInfo {
        self.hits.fetch_add(1, Ordering::SeqCst);

        let name = request
            .request_info()
            .map(|info| Name::from(info.query.name().clone()))
            .unwrap_or_else(|_| Name::root());
        let rdata = RData::TXT(TXT::new(vec![MARKER_TEXT.to_string()]));
        let record = Record::from_rdata(name, 0, rdata);

        let header = Header::response_from_request(request.header());
        let response = MessageResponseBuilder::from_message_request(request)
            .build(header, std::iter::once(&record), [], [], []);
        response_handle
            .send_response(response)
            .await
            .unwrap_or_else(|_| header.into())
    }
}

// --- TestResponseHandler ---

/// Captures the serialized DNS response for inspection in tests.
#[derive(Clone)]
pub struct TestResponseHandler {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl TestResponseHandler {
    pub fn new() -> Self {
        Self {
            buf: Arc::new(Mutex::new(Vec::with_capacity(512))),
        }
    }

    /// Parse the captured wire bytes into a `Message` for assertions.
    pub fn into_message(self) -> Message {
        let buf = self.buf.lock().unwrap();
        assert!(!buf.is_empty(), "no response was captured");
        Message::from_vec(&buf).expect("failed to parse captured DNS response")
    }
}

#[async_trait]
impl ResponseHandler for TestResponseHandler {
    async fn send_response<'a>(
        &mut self,
        response: MessageResponse<
            '_,
            'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
        >,
    ) -> io::Result<ResponseInfo> {
        let mut buf = self.buf.lock().unwrap();
        buf.clear();
        let mut encoder = BinEncoder::new(&mut *buf);
        encoder.set_max_size(u16::MAX);
        let info = response
            .destructive_emit(&mut encoder)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(info)
    }
}

// --- Handler construction ---

pub type TestHandler = VirtHandler<MockHypervisor, MarkerHandler>;

pub fn test_dns_config(policy: DisconnectPolicy) -> DnsConfig {
    DnsConfig {
        suffix: SUFFIX.to_string(),
        disconnect: policy,
        ..DnsConfig::default()
    }
}

/// Handler over `client`, plus the downstream marker to observe forwards.
pub fn build_handler(
    client: Arc<MockHypervisor>,
    policy: DisconnectPolicy,
) -> (TestHandler, MarkerHandler) {
    let next = MarkerHandler::new();
    let handler = VirtHandler::new(&test_dns_config(policy), client, next.clone())
        .expect("failed to create VirtHandler");
    (handler, next)
}

/// Mock with `web1` holding one interface `eth0` at `10.0.0.5/24`, running.
pub fn web1_hypervisor() -> MockHypervisor {
    let client = MockHypervisor::new();
    client.add_domain("web1", vec![iface("eth0", &[("10.0.0.5", 24)])], DomainState::Running);
    client
}

// --- Query/Request construction ---

/// Build wire-format bytes for a DNS query.
pub fn build_query_bytes(name: &str, record_type: RecordType, id: u16) -> Vec<u8> {
    let mut msg = Message::new();
    msg.set_id(id);
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.set_recursion_desired(true);
    let mut query = Query::new();
    query.set_name(Name::from_ascii(name).unwrap());
    query.set_query_type(record_type);
    query.set_query_class(DNSClass::IN);
    msg.add_query(query);
    msg.to_vec().unwrap()
}

/// Build a full `Request` from a loopback source.
pub fn build_request(name: &str, record_type: RecordType, id: u16) -> Request {
    let bytes = build_query_bytes(name, record_type, id);
    let mut decoder = BinDecoder::new(&bytes);
    let msg = MessageRequest::read(&mut decoder).expect("failed to parse MessageRequest");
    let src: SocketAddr = "127.0.0.1:12345".parse().unwrap();
    Request::new(msg, src, Protocol::Udp)
}

/// Execute a query through `handler` and return the parsed response.
pub async fn execute_query<H: RequestHandler>(
    handler: &H,
    name: &str,
    record_type: RecordType,
    id: u16,
) -> Message {
    let request = build_request(name, record_type, id);
    let response = TestResponseHandler::new();
    handler.handle_request(&request, response.clone()).await;
    response.into_message()
}

// --- Response helpers ---

/// True when the response came from [`MarkerHandler`].
pub fn is_forwarded(msg: &Message) -> bool {
    txt_answers(msg).iter().any(|(_, text)| text == MARKER_TEXT)
}

/// `(owner, text)` of every TXT answer.
pub fn txt_answers(msg: &Message) -> Vec<(String, String)> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::TXT(txt) => Some((
                r.name().to_string(),
                txt.iter()
                    .map(|b| String::from_utf8_lossy(b).into_owned())
                    .collect::<String>(),
            )),
            _ => None,
        })
        .collect()
}

/// Assert an authoritative NOERROR reply from the resolver itself.
pub fn assert_authoritative(msg: &Message) {
    assert_eq!(msg.header().response_code(), hickory_proto::op::ResponseCode::NoError);
    assert!(msg.header().authoritative(), "expected AA flag");
    assert!(msg.header().recursion_available(), "expected RA flag");
    assert!(!is_forwarded(msg), "query was forwarded");
}
