//! Nova DNS - a DNS responder for OpenStack instance names.
//!
//! Names under the reserved `novalocal` suffix are answered from a cached
//! listing of compute instances; everything else is proxied to an upstream
//! resolver unchanged.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                            nova-dns                               │
//! │                                                                   │
//! │  UDP/TCP ──▶ ┌────────────────┐    ┌──────────────────┐           │
//! │   :53        │ Hickory server │───▶│   NameResolver   │           │
//! │              └────────────────┘    └───┬──────────┬───┘           │
//! │                                        │          │ out of scope  │
//! │                              in scope  ▼          ▼               │
//! │                       ┌────────────────┐   ┌──────────────────┐   │
//! │                       │ InventoryCache │   │ UpstreamForwarder│──▶ upstream DNS
//! │                       └───────┬────────┘   └──────────────────┘   │
//! │                               │ stale? refetch                    │
//! │                               ▼                                   │
//! │                       ┌────────────────┐                          │
//! │                       │  NovaClient    │──▶ Keystone + Nova API   │
//! │                       └────────────────┘                          │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## DNS Resolution
//!
//! ```text
//! web1.novalocal           A → fixed IPv4 addresses of instance "web1"
//! fixed.web1.novalocal     A → same as above
//! floating.web1.novalocal  A → floating IPv4 addresses of "web1"
//! AAAA / MX in novalocal     → empty answer
//! anything else              → forwarded upstream
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use nova_dns::{Config, DnsServer};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut config = Config::default();
//!     config.dns.listen_addr = "127.0.0.1:5353".parse().unwrap();
//!     config.dns.upstream = "9.9.9.9".to_string();
//!
//!     let shutdown = CancellationToken::new();
//!     DnsServer::new(config).run(shutdown).await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

pub mod cache;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod handler;
pub mod inventory;
pub mod metrics;
pub mod name;
pub mod nova;
pub mod resolver;
pub mod server;
pub mod telemetry;

// Re-export main types
pub use cache::InventoryCache;
pub use config::{Config, DnsConfig, InventoryConfig, TelemetryConfig};
pub use error::DnsError;
pub use inventory::{InventoryProvider, InventoryRecord};
pub use resolver::{DelegateResolver, NameResolver, RequestContext};
pub use server::DnsServer;
