//! Plain DNS forwarding to a single upstream server.

use async_trait::async_trait;
use hickory_proto::op::Message;
use hickory_proto::xfer::Protocol;
use std::borrow::Cow;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, warn};

use crate::error::DnsError;
use crate::resolver::{servfail, DelegateResolver, RequestContext};

/// Largest UDP response we accept from upstream (EDNS0 sized).
const MAX_UDP_RESPONSE_SIZE: usize = 4096;

/// Forwards queries to one upstream server over the transport the client used.
#[derive(Debug, Clone)]
pub struct UpstreamForwarder {
    upstream: SocketAddr,
    timeout: Duration,
}

impl UpstreamForwarder {
    /// Create a forwarder for `upstream`, giving up on each query after `timeout`.
    pub fn new(upstream: SocketAddr, timeout: Duration) -> Self {
        Self { upstream, timeout }
    }

    /// Upstream server address.
    pub fn upstream(&self) -> SocketAddr {
        self.upstream
    }

    async fn forward(&self, request: &Message, protocol: Protocol) -> Result<Message, DnsError> {
        let response = if protocol == Protocol::Tcp {
            self.exchange_tcp(&request.to_vec()?).await?
        } else {
            self.exchange_udp(&fit_udp_payload(request).to_vec()?).await?
        };

        let reply = Message::from_vec(&response)?;
        if reply.id() != request.id() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "upstream answered id {} for query id {}",
                    reply.id(),
                    request.id()
                ),
            )
            .into());
        }
        Ok(reply)
    }

    async fn exchange_udp(&self, bytes: &[u8]) -> Result<Vec<u8>, DnsError> {
        let bind_addr: SocketAddr = if self.upstream.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(bind_addr).await?;
        // Connected socket: datagrams from other sources are dropped by the kernel.
        socket.connect(self.upstream).await?;
        socket.send(bytes).await?;

        let mut buf = vec![0u8; MAX_UDP_RESPONSE_SIZE];
        let len = socket.recv(&mut buf).await?;
        buf.truncate(len);

        debug!(upstream = %self.upstream, sent = bytes.len(), received = len, "UDP exchange");
        Ok(buf)
    }

    async fn exchange_tcp(&self, bytes: &[u8]) -> Result<Vec<u8>, DnsError> {
        let len = u16::try_from(bytes.len()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "query too large for TCP framing")
        })?;

        let mut stream = TcpStream::connect(self.upstream).await?;
        stream.set_nodelay(true)?;
        stream.write_all(&len.to_be_bytes()).await?;
        stream.write_all(bytes).await?;
        stream.flush().await?;

        let response_len = stream.read_u16().await? as usize;
        let mut buf = vec![0u8; response_len];
        stream.read_exact(&mut buf).await?;

        debug!(
            upstream = %self.upstream,
            sent = bytes.len(),
            received = response_len,
            "TCP exchange"
        );
        Ok(buf)
    }
}

#[async_trait]
impl DelegateResolver for UpstreamForwarder {
    async fn resolve(&self, request: &Message, context: &RequestContext) -> Message {
        match tokio::time::timeout(self.timeout, self.forward(request, context.protocol)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                warn!(upstream = %self.upstream, error = %e, "upstream query failed");
                servfail(request)
            }
            Err(_) => {
                warn!(upstream = %self.upstream, timeout = ?self.timeout, "upstream query timed out");
                servfail(request)
            }
        }
    }
}

/// The request as sent upstream over UDP: an EDNS payload size above what we
/// can receive is lowered to [`MAX_UDP_RESPONSE_SIZE`], so the upstream
/// truncates instead of overrunning the buffer.
fn fit_udp_payload(request: &Message) -> Cow<'_, Message> {
    match request.extensions() {
        Some(edns) if usize::from(edns.max_payload()) > MAX_UDP_RESPONSE_SIZE => {
            let mut edns = edns.clone();
            edns.set_max_payload(MAX_UDP_RESPONSE_SIZE as u16);
            let mut clamped = request.clone();
            clamped.set_edns(edns);
            Cow::Owned(clamped)
        }
        _ => Cow::Borrowed(request),
    }
}
