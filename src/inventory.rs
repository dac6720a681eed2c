//! Compute-instance inventory records and the provider seam that produces them.

use async_trait::async_trait;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::error::DnsError;

/// Role an address plays on an instance, as tagged by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressRole {
    /// Address intrinsic to the instance (tenant network).
    Fixed,
    /// Externally reachable address associated with the instance.
    Floating,
}

impl AddressRole {
    /// Wire/label spelling of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressRole::Fixed => "fixed",
            AddressRole::Floating => "floating",
        }
    }
}

impl fmt::Display for AddressRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AddressRole {
    type Err = ();

    /// Exact, case-sensitive match on `fixed` / `floating`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed" => Ok(AddressRole::Fixed),
            "floating" => Ok(AddressRole::Floating),
            _ => Err(()),
        }
    }
}

/// One address on one interface of an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressEntry {
    /// IPv4 or IPv6 address; the family is the variant.
    pub address: IpAddr,
    /// Provider-supplied role tag.
    pub role: AddressRole,
}

/// A named network attachment holding addresses in provider order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterface {
    /// Network name as reported by the provider.
    pub name: String,
    /// Addresses in provider order.
    pub addresses: Vec<AddressEntry>,
}

/// One compute instance as reported by the inventory provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryRecord {
    /// Instance name. Not guaranteed unique.
    pub name: String,
    /// Interfaces in provider order.
    pub interfaces: Vec<NetworkInterface>,
}

impl InventoryRecord {
    /// All address entries, interface by interface, in provider order.
    pub fn addresses(&self) -> impl Iterator<Item = &AddressEntry> {
        self.interfaces.iter().flat_map(|i| i.addresses.iter())
    }
}

/// Source of the full current instance list.
///
/// Implementations own authentication and transport; the cache only ever
/// asks for the whole list.
#[async_trait]
pub trait InventoryProvider: Send + Sync {
    /// Fetch every instance visible to this deployment.
    async fn list_instances(&self) -> Result<Vec<InventoryRecord>, DnsError>;
}
