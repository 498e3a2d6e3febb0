//! Client configuration

use std::time::Duration;

use crate::{ClientError, Result};

/// REST API version used by the registry and SSE query endpoints
pub const API_VERSION: &str = "v1beta2";
/// REST API version used by the websocket query endpoint
pub const API_V1_VERSION: &str = "v1beta1";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base address, e.g. `https://us.timeplus.cloud`
    pub address: String,
    /// Workspace / tenant id, empty for single-tenant deployments
    pub tenant: String,
    pub api_key: String,
    /// Timeout for singular request/response calls
    pub request_timeout: Duration,
    /// Connect timeout, applies to streaming queries as well
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: "http://localhost:8000".to_string(),
            tenant: String::new(),
            api_key: String::new(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    pub fn new(address: impl Into<String>, tenant: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            tenant: tenant.into(),
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            address: std::env::var("TIMEPLUS_ADDRESS").unwrap_or(defaults.address),
            tenant: std::env::var("TIMEPLUS_TENANT").unwrap_or_default(),
            api_key: std::env::var("TIMEPLUS_API_KEY").unwrap_or_default(),
            request_timeout: secs_from_env("TIMEPLUS_TIMEOUT_SECS", defaults.request_timeout)?,
            connect_timeout: secs_from_env("TIMEPLUS_CONNECT_TIMEOUT_SECS", defaults.connect_timeout)?,
        })
    }

    /// `{address}[/{tenant}]/api/v1beta2`
    pub fn base_url(&self) -> String {
        self.versioned_url(API_VERSION)
    }

    /// `{address}[/{tenant}]/api/v1beta1`
    pub fn base_url_v1(&self) -> String {
        self.versioned_url(API_V1_VERSION)
    }

    /// Websocket endpoint of a v1 query
    pub fn query_ws_url(&self, query_id: &str) -> String {
        let http = format!("{}/ws/queries/{}", self.tenant_root(), query_id);
        match http.strip_prefix("http") {
            Some(rest) => format!("ws{}", rest),
            None => http,
        }
    }

    fn versioned_url(&self, version: &str) -> String {
        format!("{}/api/{}", self.tenant_root(), version)
    }

    fn tenant_root(&self) -> String {
        let address = self.address.trim_end_matches('/');
        if self.tenant.is_empty() {
            address.to_string()
        } else {
            format!("{}/{}", address, self.tenant)
        }
    }
}

fn secs_from_env(var: &str, default: Duration) -> Result<Duration> {
    match std::env::var(var) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| ClientError::Config(format!("Invalid {}: {}", var, e))),
        Err(_) => Ok(default),
    }
}
