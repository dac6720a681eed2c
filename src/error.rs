//! Error types for nova-dns.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in the DNS server.
#[derive(Debug, Error)]
pub enum DnsError {
    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error talking to the identity or compute API
    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    /// Malformed JSON from the inventory provider
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A required credential variable is missing from the environment
    #[error("Missing credential: environment variable {0} is not set")]
    MissingCredential(&'static str),

    /// The identity service rejected our credentials or returned no usable catalog
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The inventory provider returned an error
    #[error("Inventory provider error: {0}")]
    Provider(String),

    /// The inventory provider did not answer within the configured bound
    #[error("Inventory provider timed out after {0:?}")]
    ProviderTimeout(Duration),

    /// No snapshot has ever been fetched and the refresh that would produce one failed
    #[error("Inventory unavailable - no snapshot has been fetched yet")]
    InventoryUnavailable,

    /// DNS protocol error
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),

    /// Failed to parse address
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}
