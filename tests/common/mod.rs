//! Shared test infrastructure for nova-dns integration tests.

#![allow(dead_code)]

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::{Edns, Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncoder};
use hickory_proto::xfer::Protocol;
use hickory_server::authority::{MessageRequest, MessageResponse};
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};

use nova_dns::cache::InventoryCache;
use nova_dns::config::DnsConfig;
use nova_dns::error::DnsError;
use nova_dns::handler::NovaRequestHandler;
use nova_dns::inventory::{
    AddressEntry, AddressRole, InventoryProvider, InventoryRecord, NetworkInterface,
};
use nova_dns::resolver::{reply_to, DelegateResolver, NameResolver, RequestContext};

// --- Constants ---

pub const SUFFIX: &str = "novalocal";

/// Address every delegated A query resolves to.
pub const DELEGATE_ADDR: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 53);

// --- TestResponseHandler ---

/// Captures the serialized DNS response for inspection in tests.
///
/// The response is serialized via `MessageResponse::destructive_emit()` and stored
/// as raw wire-format bytes, which can then be parsed with `Message::from_vec()`.
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

// --- Inventory ---

/// Provider serving a fixed inventory; can be switched to failing.
pub struct FakeProvider {
    records: Mutex<Vec<InventoryRecord>>,
    fail: AtomicBool,
    calls: AtomicUsize,
}

impl FakeProvider {
    pub fn new(records: Vec<InventoryRecord>) -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(records),
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_records(&self, records: Vec<InventoryRecord>) {
        *self.records.lock().unwrap() = records;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InventoryProvider for FakeProvider {
    async fn list_instances(&self) -> Result<Vec<InventoryRecord>, DnsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(DnsError::Provider("compute API unreachable".into()));
        }
        Ok(self.records.lock().unwrap().clone())
    }
}

/// Build an instance with one interface per `(network, [(addr, role)])`.
pub fn instance(name: &str, interfaces: &[(&str, &[(&str, AddressRole)])]) -> InventoryRecord {
    InventoryRecord {
        name: name.to_string(),
        interfaces: interfaces
            .iter()
            .map(|(network, addrs)| NetworkInterface {
                name: network.to_string(),
                addresses: addrs
                    .iter()
                    .map(|(addr, role)| AddressEntry {
                        address: addr.parse().unwrap(),
                        role: *role,
                    })
                    .collect(),
            })
            .collect(),
    }
}

/// The inventory most tests run against.
pub fn sample_inventory() -> Vec<InventoryRecord> {
    vec![
        instance(
            "web1",
            &[(
                "private",
                &[
                    ("10.0.0.5", AddressRole::Fixed),
                    ("172.24.4.10", AddressRole::Floating),
                ],
            )],
        ),
        instance(
            "db1",
            &[
                ("private", &[("10.0.0.7", AddressRole::Fixed)]),
                (
                    "storage",
                    &[
                        ("fd00::7", AddressRole::Fixed),
                        ("10.2.0.7", AddressRole::Fixed),
                    ],
                ),
            ],
        ),
    ]
}

// --- Delegate ---

/// Delegate that records what it was asked and answers A with [`DELEGATE_ADDR`].
#[derive(Default)]
pub struct RecordingDelegate {
    seen: Mutex<Vec<(Message, RequestContext)>>,
}

impl RecordingDelegate {
    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<Message> {
        self.seen.lock().unwrap().last().map(|(msg, _)| msg.clone())
    }

    pub fn last_protocol(&self) -> Option<Protocol> {
        self.seen.lock().unwrap().last().map(|(_, ctx)| ctx.protocol)
    }
}

#[async_trait]
impl DelegateResolver for RecordingDelegate {
    async fn resolve(&self, request: &Message, context: &RequestContext) -> Message {
        self.seen
            .lock()
            .unwrap()
            .push((request.clone(), *context));
        let mut reply = reply_to(request);
        reply.set_authoritative(false);
        if let Some(query) = request.queries().first() {
            if query.query_type() == RecordType::A {
                reply.add_answer(Record::from_rdata(
                    query.name().clone(),
                    300,
                    RData::A(A(DELEGATE_ADDR)),
                ));
            }
        }
        reply
    }
}

// --- Handler construction ---

pub struct Harness {
    pub handler: NovaRequestHandler,
    pub provider: Arc<FakeProvider>,
    pub delegate: Arc<RecordingDelegate>,
}

pub fn harness(records: Vec<InventoryRecord>) -> Harness {
    harness_with(records, DnsConfig::default())
}

pub fn harness_with(records: Vec<InventoryRecord>, config: DnsConfig) -> Harness {
    let provider = FakeProvider::new(records);
    let delegate = Arc::new(RecordingDelegate::default());
    let cache = InventoryCache::new(
        provider.clone(),
        Duration::from_secs(60),
        Duration::from_secs(5),
    );
    let resolver = Arc::new(NameResolver::new(cache, delegate.clone(), &config));
    Harness {
        handler: NovaRequestHandler::new(resolver),
        provider,
        delegate,
    }
}

// --- Query/Request construction ---

/// Build a query message.
pub fn build_query(name: &str, record_type: RecordType, id: u16) -> Message {
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
    msg
}

/// Build wire-format bytes for a DNS query.
pub fn build_query_bytes(name: &str, record_type: RecordType, id: u16) -> Vec<u8> {
    build_query(name, record_type, id).to_vec().unwrap()
}

/// Parse wire bytes into a MessageRequest.
pub fn parse_message_request(bytes: &[u8]) -> MessageRequest {
    let mut decoder = BinDecoder::new(bytes);
    MessageRequest::read(&mut decoder).expect("failed to parse MessageRequest")
}

pub fn client_src() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 12345)
}

/// Build a full `Request` as if received over `protocol`.
pub fn build_request(name: &str, record_type: RecordType, id: u16, protocol: Protocol) -> Request {
    let bytes = build_query_bytes(name, record_type, id);
    let msg = parse_message_request(&bytes);
    Request::new(msg, client_src(), protocol)
}

/// Build a UDP request carrying an EDNS OPT record.
pub fn build_edns_request(name: &str, record_type: RecordType, id: u16, payload: u16) -> Request {
    let mut msg = build_query(name, record_type, id);
    let mut edns = Edns::new();
    edns.set_max_payload(payload);
    msg.set_edns(edns);
    let bytes = msg.to_vec().unwrap();
    Request::new(parse_message_request(&bytes), client_src(), Protocol::Udp)
}

// --- Response helpers ---

/// Run a request through the handler and return the parsed response.
pub async fn handle(handler: &NovaRequestHandler, request: &Request) -> Message {
    let response = TestResponseHandler::new();
    handler.handle_request(request, response.clone()).await;
    response.into_message()
}

/// Execute a UDP query through the handler and return the parsed response.
pub async fn execute_query(
    handler: &NovaRequestHandler,
    name: &str,
    record_type: RecordType,
    id: u16,
) -> Message {
    let request = build_request(name, record_type, id, Protocol::Udp);
    handle(handler, &request).await
}

/// Extract A addresses from a response, in answer order.
pub fn extract_a_ips(msg: &Message) -> Vec<Ipv4Addr> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::A(a) => Some(a.0),
            _ => None,
        })
        .collect()
}

/// Assert response code.
pub fn assert_response_code(msg: &Message, expected: ResponseCode) {
    assert_eq!(
        msg.response_code(),
        expected,
        "expected {:?}, got {:?}",
        expected,
        msg.response_code()
    );
}

/// Assert response is successful with exactly the expected IPs, in order.
pub fn assert_a_response(msg: &Message, expected_ips: &[Ipv4Addr]) {
    assert_response_code(msg, ResponseCode::NoError);
    let actual = extract_a_ips(msg);
    assert_eq!(
        actual, expected_ips,
        "A records mismatch.\nactual:   {:?}\nexpected: {:?}",
        actual, expected_ips
    );
}
