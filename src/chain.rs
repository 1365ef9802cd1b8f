//! End of the handler chain.

use hickory_proto::op::{Header, ResponseCode};
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use tracing::{debug, error};

/// Handler placed after the resolver when nothing else follows it.
///
/// Every request that reaches it is answered with SERVFAIL.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServFail;

#[async_trait::async_trait]
impl RequestHandler for ServFail {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> ResponseInfo {
        debug!(src = %request.src(), "No handler left in chain, answering SERVFAIL");

        let mut header = Header::response_from_request(request.header());
        header.set_response_code(ResponseCode::ServFail);
        let response = MessageResponseBuilder::from_message_request(request).build_no_records(header);

        response_handle.send_response(response).await.unwrap_or_else(|e| {
            error!(error = %e, "Failed to send SERVFAIL response");
            header.into()
        })
    }
}
