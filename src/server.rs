//! DNS server setup and lifecycle management.

use hickory_server::ServerFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::InventoryCache;
use crate::config::Config;
use crate::error::DnsError;
use crate::forwarder::UpstreamForwarder;
use crate::handler::NovaRequestHandler;
use crate::inventory::InventoryProvider;
use crate::nova::{NovaClient, NovaCredentials};
use crate::resolver::NameResolver;

/// Interval for emitting inventory metrics.
const METRICS_INTERVAL: Duration = Duration::from_secs(10);

/// Idle timeout for TCP client connections.
const TCP_TIMEOUT: Duration = Duration::from_secs(30);

/// Periodically emit inventory metrics.
async fn metrics_loop(cache: InventoryCache, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(METRICS_INTERVAL);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                cache.emit_metrics();
                if let Some(snapshot) = cache.peek() {
                    debug!(
                        instances = snapshot.records().len(),
                        age_secs = snapshot.age().as_secs(),
                        "emitted inventory metrics"
                    );
                }
            }
            _ = shutdown.cancelled() => {
                debug!("metrics loop shutting down");
                return;
            }
        }
    }
}

/// DNS server answering instance names from the compute inventory.
pub struct DnsServer {
    config: Config,
}

impl DnsServer {
    /// Create a new DNS server with the given configuration.
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Configuration this server runs with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Bind the configured sockets and serve against the compute API until
    /// `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), DnsError> {
        let dns = &self.config.dns;
        info!(
            listen_addr = %dns.listen_addr,
            upstream = %dns.upstream,
            tcp = dns.tcp,
            suffix = %dns.domain_suffix,
            "Starting nova-dns server"
        );

        let credentials = NovaCredentials::from_env()?;
        let provider = Arc::new(NovaClient::new(credentials, &self.config.inventory)?);

        let udp_socket = UdpSocket::bind(dns.listen_addr).await?;
        info!(addr = %dns.listen_addr, "DNS UDP listening");

        let tcp_listener = if dns.tcp {
            let listener = TcpListener::bind(dns.listen_addr).await?;
            info!(addr = %dns.listen_addr, "DNS TCP listening");
            Some(listener)
        } else {
            None
        };

        self.serve(provider, udp_socket, tcp_listener, shutdown).await
    }

    /// Serve on already-bound sockets with the given inventory provider.
    pub async fn serve(
        self,
        provider: Arc<dyn InventoryProvider>,
        udp_socket: UdpSocket,
        tcp_listener: Option<TcpListener>,
        shutdown: CancellationToken,
    ) -> Result<(), DnsError> {
        let dns = &self.config.dns;
        let inventory = &self.config.inventory;

        let cache = InventoryCache::new(
            provider,
            inventory.stale_after(),
            inventory.provider_timeout(),
        );
        let forwarder = Arc::new(UpstreamForwarder::new(
            dns.upstream_addr()?,
            dns.upstream_timeout(),
        ));
        let resolver = Arc::new(NameResolver::new(cache.clone(), forwarder, dns));

        // Warm the cache; queries retry on their own if this fails.
        match cache.force_refresh().await {
            Ok(snapshot) => info!(instances = snapshot.records().len(), "Initial inventory loaded"),
            Err(e) => warn!(error = %e, "Initial inventory fetch failed, will retry on demand"),
        }

        let mut server = ServerFuture::new(NovaRequestHandler::new(resolver));
        server.register_socket(udp_socket);
        if let Some(listener) = tcp_listener {
            server.register_listener(listener, TCP_TIMEOUT);
        }

        info!(suffix = %dns.domain_suffix, "DNS server ready to serve queries");

        let metrics_shutdown = shutdown.child_token();
        let metrics_handle = tokio::spawn(metrics_loop(cache.clone(), metrics_shutdown.clone()));
        cache.emit_metrics();

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("DNS server shutdown requested");
            }
            result = server.block_until_done() => {
                if let Err(e) = result {
                    error!("DNS server error: {}", e);
                }
            }
        }

        metrics_shutdown.cancel();
        let _ = metrics_handle.await;

        info!("DNS server stopped");
        Ok(())
    }
}
