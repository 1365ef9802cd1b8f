//! Request handler resolving VM hostnames against the hypervisor.
//!
//! [`VirtHandler`] is one link in a chain of hickory `RequestHandler`s. Queries
//! outside the configured suffix or for types other than A, AAAA and TXT are
//! handed to the next handler untouched, as are names the hypervisor does not
//! know and queries for which the hypervisor could not be reached. Everything
//! else gets an authoritative reply, even when the answer set is empty.

use hickory_proto::op::{Header, ResponseCode};
use hickory_proto::rr::{Name, Record, RecordType};
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, trace, warn, Instrument, Span};

use crate::config::DnsConfig;
use crate::error::DnsError;
use crate::hypervisor::{AddressSource, DomainState, Hypervisor, Interface};
use crate::metrics::{self, QueryResult, Timer};
use crate::records::{self, QueryKind};
use crate::session::SessionManager;

enum Resolution {
    Answer(Vec<Record>),
    Forward(QueryResult),
}

/// Resolver front-end for one suffix.
pub struct VirtHandler<H, N> {
    suffix: String,
    ttl: u32,
    address_source: AddressSource,
    sessions: SessionManager<H>,
    next: N,
    span: Span,
}

impl<H: Hypervisor, N: RequestHandler> VirtHandler<H, N> {
    /// Create a handler resolving names under `config.suffix` through
    /// `client`, forwarding everything else to `next`.
    pub fn new(config: &DnsConfig, client: Arc<H>, next: N) -> Result<Self, DnsError> {
        let suffix = config.normalized_suffix()?;
        let span = info_span!("virt", suffix = %suffix);
        let sessions = SessionManager::new(client, config.connect_uri.clone(), config.disconnect);

        Ok(Self {
            suffix,
            ttl: config.ttl,
            address_source: config.address_source,
            sessions,
            next,
            span,
        })
    }

    /// Replace the span all handler events are recorded in.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// The normalized suffix (`.virt.`).
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Session manager shared by all queries.
    pub fn sessions(&self) -> &SessionManager<H> {
        &self.sessions
    }

    /// Decide whether a query belongs to this resolver.
    ///
    /// Returns the hypervisor domain name (the query name with the suffix
    /// stripped) and the query kind.
    pub fn claim<'q>(&self, qname: &'q str, rtype: RecordType) -> Option<(&'q str, QueryKind)> {
        let kind = QueryKind::from_record_type(rtype)?;
        let domain_name = qname.strip_suffix(self.suffix.as_str())?;
        if domain_name.is_empty() {
            return None;
        }
        Some((domain_name, kind))
    }

    async fn resolve(&self, domain_name: &str, kind: QueryKind, qname: &Name) -> Resolution {
        let session = self.sessions.ensure_session().await;

        let outcome = if session.is_connected() {
            self.fetch(domain_name, kind).await
        } else {
            warn!(domain = domain_name, "No hypervisor session, passing query on");
            Err(QueryResult::Unavailable)
        };

        self.sessions.release_session(session).await;

        match outcome {
            Ok((interfaces, state)) => {
                Resolution::Answer(records::synthesize(kind, qname, &interfaces, state, self.ttl))
            }
            Err(result) => Resolution::Forward(result),
        }
    }

    async fn fetch(
        &self,
        domain_name: &str,
        kind: QueryKind,
    ) -> Result<(Vec<Interface>, DomainState), QueryResult> {
        let client = self.sessions.client();

        let domain = match client.lookup_domain(domain_name).await {
            Ok(domain) => domain,
            Err(e) if e.is_no_domain() => {
                info!(domain = domain_name, error = %e, "Domain doesn't exist");
                return Err(QueryResult::NotFound);
            }
            Err(e) => {
                warn!(domain = domain_name, error = %e, "Error looking up domain");
                return Err(QueryResult::Unavailable);
            }
        };

        let interfaces = client
            .interface_addresses(&domain, self.address_source)
            .await
            .map_err(|e| {
                warn!(domain = domain_name, error = %e, "Error fetching interface addresses");
                QueryResult::Unavailable
            })?;

        let state = if kind == QueryKind::Txt {
            client.domain_state(&domain).await.unwrap_or_else(|e| {
                debug!(domain = domain_name, error = %e, "Error fetching domain state");
                DomainState::Unknown
            })
        } else {
            DomainState::Unknown
        };

        Ok((interfaces, state))
    }

    async fn reply<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
        answers: Vec<Record>,
    ) -> Result<ResponseInfo, ResponseInfo> {
        let mut header = Header::response_from_request(request.header());
        header.set_authoritative(true);
        header.set_recursion_available(true);
        header.set_response_code(ResponseCode::NoError);

        let response = MessageResponseBuilder::from_message_request(request)
            .build(header, answers.iter(), [], [], []);

        response_handle.send_response(response).await.map_err(|e| {
            error!(error = %e, "Failed to send response");
            header.set_response_code(ResponseCode::ServFail);
            header.into()
        })
    }
}

#[async_trait::async_trait]
impl<H: Hypervisor, N: RequestHandler> RequestHandler for VirtHandler<H, N> {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> ResponseInfo {
        let Ok(request_info) = request.request_info() else {
            return self.next.handle_request(request, response_handle).await;
        };

        let qname = request_info.query.name().to_string();
        let rtype = request_info.query.query_type();

        let Some((domain_name, kind)) = self.claim(&qname, rtype) else {
            trace!(parent: &self.span, name = %qname, rtype = ?rtype, "Not ours, passing on");
            metrics::record_passthrough();
            return self.next.handle_request(request, response_handle).await;
        };

        let timer = Timer::start();
        let name = Name::from(request_info.query.name().clone());
        let resolution = self
            .resolve(domain_name, kind, &name)
            .instrument(self.span.clone())
            .await;

        match resolution {
            Resolution::Forward(result) => {
                metrics::record_query(kind.as_str(), result, timer.elapsed());
                self.next.handle_request(request, response_handle).await
            }
            Resolution::Answer(answers) => {
                let count = answers.len();
                match self.reply(request, response_handle, answers).await {
                    Ok(info) => {
                        debug!(parent: &self.span, name = %qname, rtype = kind.as_str(), count, "Answered");
                        metrics::record_answers(count);
                        metrics::record_query(kind.as_str(), QueryResult::Answered, timer.elapsed());
                        info
                    }
                    Err(info) => {
                        metrics::record_query(kind.as_str(), QueryResult::Error, timer.elapsed());
                        info
                    }
                }
            }
        }
    }
}
