//! OpenStack compute inventory provider.
//!
//! Authenticates against Keystone v3 with password credentials from the
//! standard `OS_*` environment, finds the compute endpoint in the service
//! catalog, and pages through `servers/detail`.

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::net::IpAddr;
use tracing::{debug, info};

use crate::config::InventoryConfig;
use crate::error::DnsError;
use crate::inventory::{
    AddressEntry, AddressRole, InventoryProvider, InventoryRecord, NetworkInterface,
};

/// Password credentials for the identity service.
#[derive(Clone)]
pub struct NovaCredentials {
    /// Keystone v3 base URL (always ends in `/v3`).
    pub auth_url: String,
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
    /// Project (tenant) to scope the token to.
    pub project_name: String,
    /// Domain of the user.
    pub user_domain_name: String,
    /// Domain of the project.
    pub project_domain_name: String,
    /// Region to pick endpoints from, if any.
    pub region: Option<String>,
}

impl std::fmt::Debug for NovaCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NovaCredentials")
            .field("auth_url", &self.auth_url)
            .field("username", &self.username)
            .field("project_name", &self.project_name)
            .field("user_domain_name", &self.user_domain_name)
            .field("project_domain_name", &self.project_domain_name)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl NovaCredentials {
    /// Read credentials from the process environment.
    pub fn from_env() -> Result<Self, DnsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read credentials through `lookup` (an environment accessor).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, DnsError> {
        let get = |key: &'static str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or(DnsError::MissingCredential(key))
        };

        let project_name = get("OS_PROJECT_NAME").or_else(|_| get("OS_TENANT_NAME"))?;

        Ok(Self {
            auth_url: normalize_auth_url(&get("OS_AUTH_URL")?),
            username: get("OS_USERNAME")?,
            password: get("OS_PASSWORD")?,
            project_name,
            user_domain_name: get("OS_USER_DOMAIN_NAME").unwrap_or_else(|_| "Default".into()),
            project_domain_name: get("OS_PROJECT_DOMAIN_NAME")
                .unwrap_or_else(|_| "Default".into()),
            region: get("OS_REGION_NAME").ok(),
        })
    }
}

fn normalize_auth_url(url: &str) -> String {
    let url = url.trim_end_matches('/');
    if url.ends_with("/v3") {
        url.to_string()
    } else {
        format!("{url}/v3")
    }
}

/// Token and endpoint from one successful authentication.
#[derive(Debug, Clone)]
struct Session {
    token: String,
    compute_url: String,
}

/// Compute API client implementing [`InventoryProvider`].
pub struct NovaClient {
    http: reqwest::Client,
    credentials: NovaCredentials,
    interface: String,
    region: Option<String>,
    page_size: u32,
    session: Mutex<Option<Session>>,
}

impl NovaClient {
    /// Create a client. No network traffic happens until the first listing.
    pub fn new(credentials: NovaCredentials, config: &InventoryConfig) -> Result<Self, DnsError> {
        let http = reqwest::Client::builder()
            .timeout(config.provider_timeout())
            .user_agent(concat!("nova-dns/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let region = config.region.clone().or_else(|| credentials.region.clone());

        Ok(Self {
            http,
            credentials,
            interface: config.interface.clone(),
            region,
            page_size: config.page_size,
            session: Mutex::new(None),
        })
    }

    async fn session(&self, renew: bool) -> Result<Session, DnsError> {
        let cached = if renew { None } else { self.session.lock().clone() };
        if let Some(session) = cached {
            return Ok(session);
        }

        let session = self.authenticate().await?;
        *self.session.lock() = Some(session.clone());
        Ok(session)
    }

    async fn authenticate(&self) -> Result<Session, DnsError> {
        let creds = &self.credentials;
        let url = format!("{}/auth/tokens", creds.auth_url);
        let body = json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": creds.username,
                            "domain": { "name": creds.user_domain_name },
                            "password": creds.password,
                        }
                    }
                },
                "scope": {
                    "project": {
                        "name": creds.project_name,
                        "domain": { "name": creds.project_domain_name },
                    }
                }
            }
        });

        let response = self.http.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DnsError::Auth(format!("identity service returned {status}")));
        }

        let token = response
            .headers()
            .get("X-Subject-Token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .ok_or_else(|| DnsError::Auth("response carried no X-Subject-Token".into()))?;

        let body: TokenResponse = response.json().await?;
        let compute_url =
            select_endpoint(&body.token.catalog, &self.interface, self.region.as_deref())
                .ok_or_else(|| {
                    DnsError::Auth(format!(
                        "no {} compute endpoint in service catalog{}",
                        self.interface,
                        self.region
                            .as_deref()
                            .map(|r| format!(" for region {r}"))
                            .unwrap_or_default()
                    ))
                })?;

        info!(username = %creds.username, project = %creds.project_name, compute_url = %compute_url, "authenticated to identity service");
        Ok(Session { token, compute_url })
    }

    async fn fetch_servers(&self, session: &Session) -> Result<Fetch, DnsError> {
        let mut url = format!(
            "{}/servers/detail?limit={}",
            session.compute_url.trim_end_matches('/'),
            self.page_size
        );
        let mut servers = Vec::new();

        loop {
            let response = self
                .http
                .get(&url)
                .header("X-Auth-Token", &session.token)
                .header("Accept", "application/json")
                .send()
                .await?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED {
                return Ok(Fetch::Unauthorized);
            }
            if !status.is_success() {
                return Err(DnsError::Provider(format!(
                    "compute API returned {status} for {url}"
                )));
            }

            let page: ServerPage = response.json().await?;
            let page_len = page.servers.len();
            let next = page.next_link().map(str::to_owned);
            servers.extend(page.servers);
            debug!(page_len, total = servers.len(), "fetched servers page");

            match next {
                Some(next) if page_len > 0 && next != url => url = next,
                _ => break,
            }
        }

        Ok(Fetch::Servers(servers))
    }
}

enum Fetch {
    Servers(Vec<ServerBody>),
    Unauthorized,
}

#[async_trait]
impl InventoryProvider for NovaClient {
    async fn list_instances(&self) -> Result<Vec<InventoryRecord>, DnsError> {
        let session = self.session(false).await?;
        let servers = match self.fetch_servers(&session).await? {
            Fetch::Servers(servers) => servers,
            Fetch::Unauthorized => {
                debug!("token rejected by compute API, re-authenticating");
                let session = self.session(true).await?;
                match self.fetch_servers(&session).await? {
                    Fetch::Servers(servers) => servers,
                    Fetch::Unauthorized => {
                        return Err(DnsError::Auth(
                            "compute API rejected a freshly issued token".into(),
                        ))
                    }
                }
            }
        };

        Ok(servers.into_iter().map(ServerBody::into_record).collect())
    }
}

// --- Identity API bodies ---

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: TokenBody,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    endpoints: Vec<Endpoint>,
}

#[derive(Debug, Deserialize)]
struct Endpoint {
    interface: String,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    region_id: Option<String>,
    url: String,
}

/// Pick the compute endpoint for `interface`, restricted to `region` if given.
fn select_endpoint(catalog: &[CatalogEntry], interface: &str, region: Option<&str>) -> Option<String> {
    catalog
        .iter()
        .filter(|entry| entry.service_type == "compute")
        .flat_map(|entry| entry.endpoints.iter())
        .find(|ep| {
            ep.interface == interface
                && region.map_or(true, |r| {
                    ep.region.as_deref() == Some(r) || ep.region_id.as_deref() == Some(r)
                })
        })
        .map(|ep| ep.url.clone())
}

// --- Compute API bodies ---

#[derive(Debug, Deserialize)]
struct ServerPage {
    #[serde(default)]
    servers: Vec<ServerBody>,
    #[serde(default)]
    servers_links: Vec<Link>,
}

impl ServerPage {
    fn next_link(&self) -> Option<&str> {
        self.servers_links
            .iter()
            .find(|link| link.rel == "next")
            .map(|link| link.href.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct Link {
    rel: String,
    href: String,
}

#[derive(Debug, Deserialize)]
struct ServerBody {
    name: String,
    /// network name -> addresses; key order is the provider's.
    #[serde(default)]
    addresses: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct AddressBody {
    addr: String,
    #[serde(rename = "OS-EXT-IPS:type", default)]
    role: Option<String>,
}

impl ServerBody {
    fn into_record(self) -> InventoryRecord {
        let name = self.name;
        let interfaces = self
            .addresses
            .into_iter()
            .map(|(network, value)| {
                let bodies: Vec<AddressBody> = serde_json::from_value(value).unwrap_or_else(|e| {
                    debug!(server = %name, network = %network, error = %e, "unreadable address list");
                    Vec::new()
                });
                let addresses = bodies
                    .into_iter()
                    .filter_map(|body| parse_address(&name, body))
                    .collect();
                NetworkInterface {
                    name: network,
                    addresses,
                }
            })
            .collect();

        InventoryRecord { name, interfaces }
    }
}

/// Convert one provider address; entries we could never match are dropped.
fn parse_address(server: &str, body: AddressBody) -> Option<AddressEntry> {
    let address: IpAddr = match body.addr.parse() {
        Ok(address) => address,
        Err(_) => {
            debug!(server, addr = %body.addr, "skipping unparseable address");
            return None;
        }
    };
    let role = match body.role.as_deref().map(str::parse::<AddressRole>) {
        Some(Ok(role)) => role,
        _ => {
            debug!(server, addr = %body.addr, role = ?body.role, "skipping address without fixed/floating role");
            return None;
        }
    };
    Some(AddressEntry { address, role })
}
