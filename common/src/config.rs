//! Configuration types for sync runs, endpoints and output

use serde::{Deserialize, Serialize};

use crate::entry;
use crate::error::Error;
use crate::mask::Mask;

pub const DEFAULT_PORT: u16 = 21;
pub const ANONYMOUS_USER: &str = "anonymous";
pub const DEFAULT_MAX_CONCURRENT_TRANSFERS: usize = 10;
pub const DEFAULT_MAX_CONCURRENT_LISTINGS: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    #[default]
    Binary,
    Ascii,
}

impl std::fmt::Display for TransferMode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            TransferMode::Binary => write!(f, "Binary"),
            TransferMode::Ascii => write!(f, "ASCII"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferBehavior {
    #[default]
    Passive,
    Active,
}

/// Connection values set on the operation itself. Each one wins over the stored defaults.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for EndpointOverrides {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("EndpointOverrides")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Stored server resource: where the server lives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceDefaults {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Stored credentials: who to log in as.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialDefaults {
    pub user: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for CredentialDefaults {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("CredentialDefaults")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Fully resolved connection parameters handed to the transport.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|value| !value.trim().is_empty())
}

/// Merge operation overrides with the stored resource and credentials.
///
/// Every value comes from the override if set, else from the stored default, else from the
/// fallback (`anonymous`, port 21, no password). Empty strings count as unset. There is no
/// fallback host.
pub fn resolve_endpoint(
    overrides: &EndpointOverrides,
    resource: Option<&ResourceDefaults>,
    credentials: Option<&CredentialDefaults>,
) -> Result<Endpoint, Error> {
    let host = non_empty(&overrides.host)
        .or_else(|| resource.and_then(|resource| non_empty(&resource.host)))
        .ok_or_else(|| Error::Config(anyhow::anyhow!("FTP server not specified.")))?;
    let port = overrides
        .port
        .or_else(|| resource.and_then(|resource| resource.port))
        .unwrap_or(DEFAULT_PORT);
    let user = non_empty(&overrides.user)
        .or_else(|| credentials.and_then(|credentials| non_empty(&credentials.user)))
        .unwrap_or(ANONYMOUS_USER);
    let password = overrides
        .password
        .as_deref()
        .or_else(|| credentials.and_then(|credentials| credentials.password.as_deref()))
        .map(str::to_string);
    Ok(Endpoint {
        host: host.trim().to_string(),
        port,
        user: user.to_string(),
        password,
    })
}

/// Settings of one put, get or delete run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub endpoint: EndpointOverrides,
    /// remote root of the tree, normalized to start with `/`
    #[serde(deserialize_with = "deserialize_server_path")]
    pub server_path: String,
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
    pub transfer_mode: TransferMode,
    pub transfer_behavior: TransferBehavior,
    pub verbose: bool,
    /// skip files whose destination copy is strictly newer
    pub only_newer: bool,
    /// substitute the current time for listing timestamps that cannot be parsed
    pub tolerate_date_errors: bool,
    /// cap on transfers, directory creations and deletions in flight, 0 = no cap
    pub max_concurrent_transfers: usize,
    /// cap on directory listings in flight per tree level, 0 = no cap
    pub max_concurrent_listings: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointOverrides::default(),
            server_path: "/".to_string(),
            includes: Vec::new(),
            excludes: Vec::new(),
            transfer_mode: TransferMode::default(),
            transfer_behavior: TransferBehavior::default(),
            verbose: false,
            only_newer: false,
            tolerate_date_errors: false,
            max_concurrent_transfers: DEFAULT_MAX_CONCURRENT_TRANSFERS,
            max_concurrent_listings: DEFAULT_MAX_CONCURRENT_LISTINGS,
        }
    }
}

fn deserialize_server_path<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> Result<String, D::Error> {
    let path = String::deserialize(deserializer)?;
    Ok(entry::normalize_root(&path))
}

impl SyncConfig {
    pub fn with_server_path(mut self, path: &str) -> Self {
        self.server_path = entry::normalize_root(path);
        self
    }

    pub fn mask(&self) -> Result<Mask, Error> {
        Mask::new(&self.includes, &self.excludes).map_err(Error::Config)
    }

    /// Validate configuration and return errors if invalid
    pub fn validate(&self) -> Result<(), Error> {
        self.mask()?;
        Ok(())
    }
}

/// Output and logging configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Suppress error output
    pub quiet: bool,
    /// Verbosity level: 0=ERROR, 1=INFO, 2=DEBUG, 3=TRACE
    pub verbose: u8,
    /// Print summary statistics at the end
    pub print_summary: bool,
}
