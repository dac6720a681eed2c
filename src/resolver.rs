//! Query resolution for instance names, with fallback to a delegate resolver.
//!
//! ```text
//! query ──▶ in scope? ──no──▶ delegate (reply returned verbatim)
//!              │yes
//!              ▼
//!         valid name? ──no──▶ empty reply
//!              │yes
//!              ▼
//!         inventory ──cold failure──▶ delegate
//!              │
//!              ▼
//!         A records for every matching address
//! ```
//!
//! Every in-scope query finishes within the upstream timeout. A stale
//! snapshot may wait the whole budget for a refresh; a cold cache waits half
//! of it so the delegate has the rest.

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, ResponseCode};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use hickory_proto::xfer::Protocol;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::cache::InventoryCache;
use crate::config::DnsConfig;
use crate::inventory::AddressEntry;
use crate::metrics::{self, QueryResult, Timer};
use crate::name::{parse_query_name, QueryName};

/// Record types answered from the inventory. Only `A` produces records;
/// `AAAA` and `MX` are claimed so they are never forwarded, and resolve empty.
const INTERCEPTED_TYPES: [RecordType; 3] = [RecordType::A, RecordType::AAAA, RecordType::MX];

/// Where a query came from.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext {
    /// Client address.
    pub src: SocketAddr,
    /// Transport the query arrived on.
    pub protocol: Protocol,
}

/// Resolver for everything outside the instance namespace.
#[async_trait]
pub trait DelegateResolver: Send + Sync {
    /// Produce a complete reply for `request`. Failures are expressed in the
    /// reply (e.g. SERVFAIL), never as an error.
    async fn resolve(&self, request: &Message, context: &RequestContext) -> Message;
}

/// Build a reply skeleton for `request`: same id, opcode, RD flag and
/// question, marked authoritative, no records.
pub fn reply_to(request: &Message) -> Message {
    let mut reply = Message::new();
    reply
        .set_id(request.id())
        .set_message_type(MessageType::Response)
        .set_op_code(request.op_code())
        .set_recursion_desired(request.recursion_desired())
        .set_recursion_available(true)
        .set_authoritative(true)
        .set_response_code(ResponseCode::NoError);
    reply.add_queries(request.queries().iter().cloned());
    reply
}

/// SERVFAIL for `request`, echoing its question.
pub fn servfail(request: &Message) -> Message {
    let mut reply = reply_to(request);
    reply
        .set_authoritative(false)
        .set_response_code(ResponseCode::ServFail);
    reply
}

/// Answers `<instance>.<suffix>` and `<role>.<instance>.<suffix>` from the
/// inventory cache; hands everything else to the delegate.
pub struct NameResolver {
    cache: InventoryCache,
    delegate: std::sync::Arc<dyn DelegateResolver>,
    ttl: u32,
    suffix: String,
    upstream_timeout: Duration,
}

impl NameResolver {
    /// Create a resolver answering from `cache` and falling back to `delegate`.
    pub fn new(
        cache: InventoryCache,
        delegate: std::sync::Arc<dyn DelegateResolver>,
        config: &DnsConfig,
    ) -> Self {
        Self {
            cache,
            delegate,
            ttl: config.ttl,
            suffix: config.domain_suffix.clone(),
            upstream_timeout: config.upstream_timeout(),
        }
    }

    /// The inventory cache backing this resolver.
    pub fn cache(&self) -> &InventoryCache {
        &self.cache
    }

    /// Resolve one request.
    pub async fn resolve(&self, request: &Message, context: &RequestContext) -> Message {
        let timer = Timer::start();
        let deadline = Instant::now() + self.upstream_timeout;

        let Some(query) = request.queries().first() else {
            trace!("request without a question, delegating");
            return self.delegate.resolve(request, context).await;
        };
        let qtype = query.query_type();
        let rtype_str = qtype.to_string();
        let name = query.name().to_ascii();
        let intercepted = INTERCEPTED_TYPES.contains(&qtype);

        let target = match parse_query_name(&name, &self.suffix) {
            QueryName::Instance(target) if intercepted => target,
            QueryName::Invalid(reason) if intercepted => {
                debug!(name = %name, reason = ?reason, "invalid instance name, empty reply");
                metrics::record_query(&rtype_str, QueryResult::InvalidName, timer.elapsed());
                return reply_to(request);
            }
            _ => {
                trace!(name = %name, rtype = %rtype_str, "not an instance query, delegating");
                metrics::record_query(&rtype_str, QueryResult::Delegated, timer.elapsed());
                return self.delegate.resolve(request, context).await;
            }
        };

        let snapshot = match self.cache.get_within(self.inventory_budget()).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(name = %name, error = %e, "no inventory available, delegating");
                metrics::record_query(
                    &rtype_str,
                    QueryResult::InventoryUnavailable,
                    timer.elapsed(),
                );
                return self.delegate_until(deadline, request, context).await;
            }
        };

        let mut reply = reply_to(request);
        if qtype == RecordType::A {
            let matches = snapshot.matching_addresses(target.instance, target.role);
            for record in self.build_a_records(query.name(), matches) {
                reply.add_answer(record);
            }
        }

        let count = reply.answers().len();
        debug!(
            name = %name,
            instance = target.instance,
            role = %target.role,
            rtype = %rtype_str,
            count,
            "instance lookup"
        );
        if count > 0 {
            metrics::record_answers_returned(count);
            metrics::record_query(&rtype_str, QueryResult::Answered, timer.elapsed());
        } else {
            metrics::record_query(&rtype_str, QueryResult::Empty, timer.elapsed());
        }
        reply
    }

    /// How long a query may wait on the inventory.
    fn inventory_budget(&self) -> Duration {
        if self.cache.peek().is_some() {
            self.upstream_timeout
        } else {
            self.upstream_timeout / 2
        }
    }

    /// Delegate, answering SERVFAIL if the delegate is still busy at `deadline`.
    async fn delegate_until(
        &self,
        deadline: Instant,
        request: &Message,
        context: &RequestContext,
    ) -> Message {
        match tokio::time::timeout_at(deadline, self.delegate.resolve(request, context)).await {
            Ok(reply) => reply,
            Err(_) => {
                warn!(timeout = ?self.upstream_timeout, "delegate missed the query deadline");
                servfail(request)
            }
        }
    }

    /// One A record per IPv4 entry, owned by the name exactly as queried.
    fn build_a_records<'a>(
        &self,
        name: &Name,
        entries: impl Iterator<Item = &'a AddressEntry>,
    ) -> Vec<Record> {
        entries
            .filter_map(|entry| match entry.address {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            })
            .map(|v4| {
                let mut record = Record::from_rdata(name.clone(), self.ttl, RData::A(A(v4)));
                record.set_dns_class(DNSClass::IN);
                record
            })
            .collect()
    }
}
