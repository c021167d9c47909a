use crate::errors::ConfigurationError;
use crate::sharding::ShardingConfig;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Querier path prefix must start with '/': {0}")]
    InvalidPathPrefix(String),

    #[error("Querier timeout cannot be 0")]
    ZeroTimeout,

    #[error("Default org id cannot be empty")]
    EmptyDefaultOrgId,

    #[error("Invalid sharding configuration: {0}")]
    Sharding(#[from] ConfigurationError),
}

/// Query frontend configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Main listener for incoming requests
    pub listener: Listener,
    /// Admin listener for health checks and status pages
    pub admin_listener: Listener,
    /// Querier that serves the individual shard requests
    pub querier: QuerierConfig,
    #[serde(default)]
    pub sharding: ShardingConfig,
    #[serde(default)]
    pub tenant: TenantConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;
        self.querier.validate()?;
        self.sharding.validate()?;
        self.tenant.validate()?;
        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

fn default_path_prefix() -> String {
    "/querier".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct QuerierConfig {
    /// Base URL of the querier. Only scheme and authority are used.
    pub url: Url,
    /// Prepended to the inbound path of every shard request
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,
    /// Applies to each shard request separately, body included
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl QuerierConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.path_prefix.starts_with('/') {
            return Err(ValidationError::InvalidPathPrefix(self.path_prefix.clone()));
        }
        if self.timeout_secs == 0 {
            return Err(ValidationError::ZeroTimeout);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct TenantConfig {
    /// Tenant assumed for requests that carry no X-Scope-OrgID header.
    /// When unset such requests are rejected.
    #[serde(default)]
    pub default_org_id: Option<String>,
}

impl TenantConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match &self.default_org_id {
            Some(org_id) if org_id.trim().is_empty() => Err(ValidationError::EmptyDefaultOrgId),
            _ => Ok(()),
        }
    }
}
