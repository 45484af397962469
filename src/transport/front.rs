use std::{
    fmt,
    net::{IpAddr, SocketAddr},
    path::PathBuf,
};

use crate::{
    common::errors::{Error, Result},
    configs::FrontConfig,
};

/// Host matcher used to pick a front: an exact name or a `*.suffix` wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostPattern {
    Exact(String),
    /// Stored with its leading dot, e.g. `.googlevideo.com`.
    Suffix(String),
}

impl HostPattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        let pattern = pattern.trim().to_ascii_lowercase();
        if let Some(suffix) = pattern.strip_prefix("*.") {
            if suffix.is_empty() || suffix.contains('*') {
                return Err(Error::Config(format!("invalid host pattern: {}", pattern)));
            }
            return Ok(Self::Suffix(format!(".{}", suffix)));
        }
        if pattern.is_empty() || pattern.contains('*') || pattern.contains('/') {
            return Err(Error::Config(format!("invalid host pattern: {}", pattern)));
        }
        Ok(Self::Exact(pattern))
    }

    pub fn matches(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        match self {
            Self::Exact(name) => host == *name,
            Self::Suffix(suffix) => host.len() > suffix.len() && host.ends_with(suffix.as_str()),
        }
    }
}

impl fmt::Display for HostPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(name) => f.write_str(name),
            Self::Suffix(suffix) => write!(f, "*{}", suffix),
        }
    }
}

/// Pairs a logical destination with the front whose identity the TLS layer
/// presents.
///
/// The connection identity (`front_host`, `front_port`, `front_addr`, trust
/// settings) and the application address (logical host and request path)
/// are kept apart: the SNI and certificate check use `front_host`, while the
/// Host header always carries the logical host so the origin routes the
/// request correctly.
#[derive(Debug, Clone)]
pub struct FrontSpec {
    pub logical_host: HostPattern,
    pub front_host: String,
    pub front_port: u16,
    pub front_addr: Option<IpAddr>,
    pub ca_certificate: Option<PathBuf>,
    pub verify_certificates: bool,
}

impl FrontSpec {
    pub fn new(logical_host: &str, front_host: &str) -> Result<Self> {
        Ok(Self {
            logical_host: HostPattern::parse(logical_host)?,
            front_host: front_host.trim().to_ascii_lowercase(),
            front_port: 443,
            front_addr: None,
            ca_certificate: None,
            verify_certificates: true,
        })
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.front_port = port;
        self
    }

    pub fn with_addr(mut self, addr: IpAddr) -> Self {
        self.front_addr = Some(addr);
        self
    }

    pub fn with_ca_certificate(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_certificate = Some(path.into());
        self
    }

    pub fn without_certificate_verification(mut self) -> Self {
        self.verify_certificates = false;
        self
    }

    pub fn from_config(config: &FrontConfig) -> Result<Self> {
        let mut spec = Self::new(&config.logical_host, &config.front_host)?.with_port(config.front_port);
        spec.front_addr = config.front_addr;
        spec.ca_certificate = config.ca_certificate.as_ref().map(PathBuf::from);
        spec.verify_certificates = config.verify_certificates;
        Ok(spec)
    }

    pub fn matches(&self, logical_host: &str) -> bool {
        self.logical_host.matches(logical_host)
    }

    /// The URL the HTTP client dials. Its host is the front, so the TLS
    /// handshake never names the logical destination.
    pub fn front_url(&self, path: &str) -> String {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };

        if self.front_port == 443 {
            format!("https://{}{}", self.front_host, path)
        } else {
            format!("https://{}:{}{}", self.front_host, self.front_port, path)
        }
    }

    /// Pinned socket address for the front, if one is configured.
    pub fn pinned_socket(&self) -> Option<SocketAddr> {
        self.front_addr
            .map(|addr| SocketAddr::new(addr, self.front_port))
    }
}
