//! nova-dns binary entry point.

use clap::Parser;
use nova_dns::config::parse_time;
use nova_dns::{telemetry, Config, DnsServer};
use std::net::IpAddr;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// DNS proxy answering <instance>.novalocal from the OpenStack compute inventory.
#[derive(Parser, Debug)]
#[command(name = "nova-dns")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML). Optional.
    #[arg(short, long, default_value = "nova-dns.toml")]
    config: PathBuf,

    /// Local listen port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Local listen address.
    #[arg(short, long)]
    address: Option<IpAddr>,

    /// Upstream DNS server (ip or ip:port).
    #[arg(short, long)]
    upstream: Option<String>,

    /// Also serve DNS over TCP.
    #[arg(long)]
    tcp: bool,

    /// TTL of synthesized records (e.g. 60, 60s, 5m, 1h).
    #[arg(short, long, value_parser = parse_time)]
    ttl: Option<u32>,

    /// Upstream timeout, in seconds.
    #[arg(short = 'o', long)]
    timeout: Option<f64>,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.dns.listen_addr.set_port(port);
        }
        if let Some(address) = self.address {
            config.dns.listen_addr.set_ip(address);
        }
        if let Some(ref upstream) = self.upstream {
            config.dns.upstream = upstream.clone();
        }
        if self.tcp {
            config.dns.tcp = true;
        }
        if let Some(ttl) = self.ttl {
            config.dns.ttl = ttl;
        }
        if let Some(timeout) = self.timeout {
            config.dns.upstream_timeout_ms = (timeout * 1000.0).round().max(0.0) as u64;
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Validated once, after flags have had their say.
    let mut config = Config::load(&args.config)?;
    args.apply(&mut config);
    config.validate()?;

    telemetry::init(&config.telemetry).map_err(|e| e as Box<dyn std::error::Error>)?;

    info!(
        config_file = %args.config.display(),
        listen_addr = %config.dns.listen_addr,
        upstream = %config.dns.upstream,
        tcp = config.dns.tcp,
        "Starting nova-dns"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    let server = DnsServer::new(config);
    let result = server.run(shutdown).await;

    telemetry::shutdown();

    if let Err(e) = result {
        error!("DNS server error: {}", e);
        return Err(e.into());
    }

    info!("nova-dns shutdown complete");
    Ok(())
}
