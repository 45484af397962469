use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// One fronting rule as written in the config file.
///
/// `logical_host` is what the Host header carries; `front_host` is what the
/// TLS handshake (SNI and certificate check) presents.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FrontConfig {
    pub logical_host: String,
    pub front_host: String,
    #[serde(default = "default_front_port")]
    pub front_port: u16,
    /// Connect to this address instead of resolving `front_host`.
    #[serde(default)]
    pub front_addr: Option<IpAddr>,
    /// PEM file with the only certificate authority trusted for this front.
    #[serde(default)]
    pub ca_certificate: Option<String>,
    #[serde(default = "default_true")]
    pub verify_certificates: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DohConfig {
    #[serde(default = "default_doh_front")]
    pub front_host: String,
    #[serde(default = "default_doh_logical")]
    pub logical_host: String,
    #[serde(default = "default_doh_path")]
    pub path: String,
    /// Host patterns resolved through DoH instead of the system resolver.
    #[serde(default = "default_doh_hosts")]
    pub hosts: Vec<String>,
}

impl Default for DohConfig {
    fn default() -> Self {
        Self {
            front_host: default_doh_front(),
            logical_host: default_doh_logical(),
            path: default_doh_path(),
            hosts: default_doh_hosts(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TransportConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_true")]
    pub allow_direct: bool,
    #[serde(default = "default_routing_error_statuses")]
    pub routing_error_statuses: Vec<u16>,
    #[serde(default = "default_fronts")]
    pub fronts: Vec<FrontConfig>,
    #[serde(default)]
    pub doh: Option<DohConfig>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            user_agent: default_user_agent(),
            allow_direct: true,
            routing_error_statuses: default_routing_error_statuses(),
            fronts: default_fronts(),
            doh: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_front_port() -> u16 {
    443
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    250
}

fn default_backoff_max_ms() -> u64 {
    4_000
}

fn default_user_agent() -> String {
    crate::common::http::DEFAULT_USER_AGENT.to_string()
}

fn default_routing_error_statuses() -> Vec<u16> {
    vec![421]
}

fn default_doh_front() -> String {
    "www.google.com".to_string()
}

fn default_doh_logical() -> String {
    "dns.google".to_string()
}

fn default_doh_path() -> String {
    "/resolve".to_string()
}

fn default_doh_hosts() -> Vec<String> {
    vec!["*.googlevideo.com".to_string()]
}

fn default_fronts() -> Vec<FrontConfig> {
    ["www.youtube.com", "youtube.com", "m.youtube.com", "youtubei.googleapis.com"]
        .into_iter()
        .map(|logical| FrontConfig {
            logical_host: logical.to_string(),
            front_host: "www.google.com".to_string(),
            front_port: default_front_port(),
            front_addr: None,
            ca_certificate: None,
            verify_certificates: true,
        })
        .collect()
}
