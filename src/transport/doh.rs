use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use dashmap::DashMap;
use reqwest::{
    Client,
    dns::{Addrs, Name, Resolve, Resolving},
    header::{ACCEPT, HOST},
};
use serde_json::Value;
use tracing::debug;

use crate::{
    common::errors::{Error, Result},
    configs::DohConfig,
    transport::front::HostPattern,
};

/// Resolves selected host names through a fronted DNS-over-HTTPS JSON API,
/// so lookups for blocked media hosts never hit the local resolver.
#[derive(Clone)]
pub struct DohResolver {
    client: Client,
    front_host: String,
    logical_host: String,
    path: String,
    hosts: Arc<Vec<HostPattern>>,
    cache: Arc<DashMap<String, Vec<IpAddr>>>,
}

impl DohResolver {
    pub fn new(config: &DohConfig, user_agent: &str, timeout: Duration) -> Result<Self> {
        let hosts = config
            .hosts
            .iter()
            .map(|h| HostPattern::parse(h))
            .collect::<Result<Vec<_>>>()?;

        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            front_host: config.front_host.clone(),
            logical_host: config.logical_host.clone(),
            path: config.path.clone(),
            hosts: Arc::new(hosts),
            cache: Arc::new(DashMap::new()),
        })
    }

    /// Whether lookups for `host` go through DoH.
    pub fn handles(&self, host: &str) -> bool {
        self.hosts.iter().any(|p| p.matches(host))
    }

    pub async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>> {
        let key = host.trim_end_matches('.').to_ascii_lowercase();
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached.clone());
        }

        let url = format!(
            "https://{}{}?name={}&type=A",
            self.front_host,
            self.path,
            urlencoding::encode(&key)
        );

        let res = self
            .client
            .get(&url)
            .header(HOST, &self.logical_host)
            .header(ACCEPT, "application/dns-json")
            .send()
            .await
            .map_err(|e| Error::FrontRejected {
                front: self.front_host.clone(),
                logical: self.logical_host.clone(),
                detail: e.to_string(),
            })?;

        if !res.status().is_success() {
            return Err(Error::HttpStatus {
                status: res.status().as_u16(),
                host: self.logical_host.clone(),
                path: self.path.clone(),
            });
        }

        let body: Value = res.json().await?;
        let addrs = read_answer(&body);
        if addrs.is_empty() {
            return Err(Error::Connectivity {
                host: key,
                attempts: 1,
                detail: "DoH answer carried no addresses".to_string(),
            });
        }

        debug!("DoH resolved {} -> {:?}", key, addrs);
        self.cache.insert(key, addrs.clone());
        Ok(addrs)
    }
}

impl Resolve for DohResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let resolver = self.clone();
        Box::pin(async move {
            let host = name.as_str().to_string();
            let addrs: Vec<SocketAddr> = if resolver.handles(&host) {
                resolver
                    .lookup(&host)
                    .await?
                    .into_iter()
                    .map(|ip| SocketAddr::new(ip, 0))
                    .collect()
            } else {
                tokio::net::lookup_host((host.as_str(), 0)).await?.collect()
            };
            let addrs: Addrs = Box::new(addrs.into_iter());
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(addrs)
        })
    }
}

/// Follows the CNAME chain starting at the question name and returns the
/// addresses recorded for its final target.
pub fn read_answer(body: &Value) -> Vec<IpAddr> {
    let Some(answers) = body.get("Answer").and_then(|a| a.as_array()) else {
        return Vec::new();
    };

    let mut name = body
        .get("Question")
        .and_then(|q| q.get(0))
        .and_then(|q| q.get("name"))
        .and_then(|n| n.as_str())
        .map(normalize)
        .unwrap_or_default();

    // Each hop consumes one answer, so the chain is bounded by its length.
    for _ in 0..answers.len() {
        let next = answers.iter().find_map(|a| {
            let owner = a.get("name").and_then(|n| n.as_str()).map(normalize)?;
            let data = a.get("data").and_then(|d| d.as_str())?;
            (owner == name && data.parse::<IpAddr>().is_err()).then(|| normalize(data))
        });
        match next {
            Some(target) if target != name => name = target,
            _ => break,
        }
    }

    answers
        .iter()
        .filter(|a| a.get("name").and_then(|n| n.as_str()).map(normalize).as_deref() == Some(name.as_str()))
        .filter_map(|a| a.get("data").and_then(|d| d.as_str()))
        .filter_map(|d| d.parse::<IpAddr>().ok())
        .collect()
}

fn normalize(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}
