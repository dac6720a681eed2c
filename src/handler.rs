//! Hickory request handler that feeds decoded queries to the [`NameResolver`].

use async_trait::async_trait;
use hickory_proto::op::{Edns, Message};
use hickory_proto::rr::Record;
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use std::sync::Arc;
use tracing::error;

use crate::resolver::{NameResolver, RequestContext};

/// Largest UDP payload we advertise when the client speaks EDNS.
const MAX_PAYLOAD: u16 = 4096;

/// Adapter between hickory's server loop and [`NameResolver`].
#[derive(Clone)]
pub struct NovaRequestHandler {
    resolver: Arc<NameResolver>,
}

impl NovaRequestHandler {
    /// Wrap a resolver.
    pub fn new(resolver: Arc<NameResolver>) -> Self {
        Self { resolver }
    }
}

/// Rebuild a plain message (header, questions as sent, EDNS) from a decoded request.
fn request_message(request: &Request) -> Message {
    let mut message = Message::new();
    message.set_header(*request.header());
    for query in request.queries() {
        message.add_query(query.original().clone());
    }
    if let Some(edns) = request.edns() {
        message.set_edns(edns.clone());
    }
    message
}

#[async_trait]
impl RequestHandler for NovaRequestHandler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> ResponseInfo {
        let context = RequestContext {
            src: request.src(),
            protocol: request.protocol(),
        };
        let reply = self
            .resolver
            .resolve(&request_message(request), &context)
            .await;

        let mut builder = MessageResponseBuilder::from_message_request(request);
        if let Some(req_edns) = request.edns() {
            let mut edns = Edns::new();
            edns.set_max_payload(req_edns.max_payload().clamp(512, MAX_PAYLOAD));
            builder.edns(edns);
        }

        let response = builder.build(
            *reply.header(),
            reply.answers().iter(),
            reply.name_servers().iter(),
            &[] as &[Record],
            reply.additionals().iter(),
        );

        match response_handle.send_response(response).await {
            Ok(info) => info,
            Err(e) => {
                error!(src = %context.src, error = %e, "failed to send response");
                ResponseInfo::from(*request.header())
            }
        }
    }
}
