use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use reqwest::{
    Client, Method, Response, StatusCode,
    header::{CONTENT_TYPE, HOST, HeaderMap, HeaderName, HeaderValue, LOCATION},
    redirect::Policy,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::{
    common::{
        errors::{Error, Result},
        http::split_url,
    },
    configs::TransportConfig,
    transport::{doh::DohResolver, front::FrontSpec, retry::RetryPolicy},
};

const MAX_REDIRECTS: usize = 5;

/// A request addressed to a logical host; the transport decides which
/// connection actually carries it.
#[derive(Debug, Clone)]
pub struct FrontedRequest {
    pub logical_host: String,
    /// Path plus query, starting with `/`.
    pub path: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl FrontedRequest {
    pub fn new(method: Method, logical_host: impl Into<String>, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            logical_host: logical_host.into().to_ascii_lowercase(),
            path: if path.starts_with('/') { path } else { format!("/{}", path) },
            method,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
            cancel: None,
        }
    }

    pub fn get(url: &str) -> Result<Self> {
        Self::from_url(Method::GET, url)
    }

    pub fn from_url(method: Method, url: &str) -> Result<Self> {
        let (host, path) = split_url(url)?;
        Ok(Self::new(method, host, path))
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryPolicy,
    pub user_agent: String,
    pub allow_direct: bool,
    /// Statuses that mean the front refused to route to the logical host.
    pub routing_error_statuses: Vec<u16>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self::from(&TransportConfig::default())
    }
}

impl From<&TransportConfig> for TransportOptions {
    fn from(config: &TransportConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            retry: RetryPolicy {
                max_retries: config.max_retries,
                base_delay: Duration::from_millis(config.backoff_base_ms),
                max_delay: Duration::from_millis(config.backoff_max_ms),
            },
            user_agent: config.user_agent.clone(),
            allow_direct: config.allow_direct,
            routing_error_statuses: config.routing_error_statuses.clone(),
        }
    }
}

struct Route {
    spec: FrontSpec,
    client: Client,
}

/// HTTPS client that reaches blocked hosts through permitted fronts.
///
/// Each [`FrontSpec`] gets its own connection pool so trust settings and
/// pinned addresses never leak between fronts.
pub struct FrontedTransport {
    routes: Vec<Route>,
    direct: Option<Client>,
    options: TransportOptions,
}

impl FrontedTransport {
    pub fn new(
        fronts: Vec<FrontSpec>,
        options: TransportOptions,
        doh: Option<DohResolver>,
    ) -> Result<Self> {
        let routes = fronts
            .into_iter()
            .map(|spec| {
                let client = build_client(Some(&spec), &options, None)?;
                Ok(Route { spec, client })
            })
            .collect::<Result<Vec<_>>>()?;

        let direct = if options.allow_direct {
            Some(build_client(None, &options, doh)?)
        } else {
            None
        };

        Ok(Self {
            routes,
            direct,
            options,
        })
    }

    pub fn from_config(config: &TransportConfig) -> Result<Self> {
        let options = TransportOptions::from(config);
        let fronts = config
            .fronts
            .iter()
            .map(FrontSpec::from_config)
            .collect::<Result<Vec<_>>>()?;
        let doh = config
            .doh
            .as_ref()
            .map(|doh| DohResolver::new(doh, &options.user_agent, options.timeout))
            .transpose()?;

        Self::new(fronts, options, doh)
    }

    /// The front that carries requests for `logical_host`, if any.
    pub fn front_for(&self, logical_host: &str) -> Option<&FrontSpec> {
        self.route_for(logical_host).map(|r| &r.spec)
    }

    fn route_for(&self, logical_host: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.spec.matches(logical_host))
    }

    /// Sends the request, following redirects through the same routing
    /// rules, and fails on any non-success status.
    pub async fn request(&self, mut req: FrontedRequest) -> Result<Response> {
        let mut last_status = StatusCode::OK;

        for _ in 0..=MAX_REDIRECTS {
            let res = self.execute(&req).await?;
            let status = res.status();
            if !status.is_redirection() {
                return Ok(res);
            }

            let Some(location) = res.headers().get(LOCATION).and_then(|v| v.to_str().ok()) else {
                return Ok(res);
            };

            let base = Url::parse(&format!("https://{}{}", req.logical_host, req.path))?;
            let (host, path) = split_url(base.join(location)?.as_str())?;
            debug!("Redirect {} {}{} -> {}{}", status, req.logical_host, req.path, host, path);

            let downgrade = status == StatusCode::SEE_OTHER
                || (req.method == Method::POST
                    && matches!(status, StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND));
            if downgrade {
                req.method = Method::GET;
                req.body = None;
                req.headers.remove(CONTENT_TYPE);
            }
            req.logical_host = host.to_ascii_lowercase();
            req.path = path;
            last_status = status;
        }

        Err(Error::HttpStatus {
            status: last_status.as_u16(),
            host: req.logical_host,
            path: req.path,
        })
    }

    async fn execute(&self, req: &FrontedRequest) -> Result<Response> {
        let route = self.route_for(&req.logical_host);
        if route.is_none() && self.direct.is_none() {
            return Err(Error::NoFrontForHost(req.logical_host.clone()));
        }

        let policy = &self.options.retry;
        let mut attempt = 0u32;
        loop {
            let result = match &req.cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(Error::Cancelled),
                    res = self.send_once(route, req) => res,
                },
                None => self.send_once(route, req).await,
            };

            let err = match result {
                Ok(res) => return Ok(res),
                Err(err) => err,
            };

            if !err.is_retryable() || attempt >= policy.max_retries {
                return Err(exhausted(err, attempt + 1));
            }

            let delay = policy.delay_for(attempt);
            attempt += 1;
            warn!(
                "Attempt {}/{} for {}{} failed: {}; retrying in {:?}",
                attempt,
                policy.max_retries + 1,
                req.logical_host,
                req.path,
                err,
                delay
            );

            match &req.cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                },
                None => tokio::time::sleep(delay).await,
            }
        }
    }

    async fn send_once(&self, route: Option<&Route>, req: &FrontedRequest) -> Result<Response> {
        let (client, url) = match (route, &self.direct) {
            (Some(route), _) => (&route.client, route.spec.front_url(&req.path)),
            (None, Some(direct)) => (direct, format!("https://{}{}", req.logical_host, req.path)),
            (None, None) => return Err(Error::NoFrontForHost(req.logical_host.clone())),
        };

        let mut builder = client
            .request(req.method.clone(), &url)
            .headers(req.headers.clone());
        if route.is_some() {
            builder = builder.header(HOST, req.logical_host.as_str());
        }
        if let Some(body) = &req.body {
            builder = builder.body(body.clone());
        }
        if let Some(timeout) = req.timeout {
            builder = builder.timeout(timeout);
        }

        match route {
            Some(r) => debug!("{} {}{} via front {}", req.method, req.logical_host, req.path, r.spec.front_host),
            None => debug!("{} {}{} direct", req.method, req.logical_host, req.path),
        }

        let res = builder
            .send()
            .await
            .map_err(|e| classify_send_error(e, route, &req.logical_host))?;

        let status = res.status();
        if let Some(route) = route {
            if self.options.routing_error_statuses.contains(&status.as_u16()) {
                return Err(Error::FrontRejected {
                    front: route.spec.front_host.clone(),
                    logical: req.logical_host.clone(),
                    detail: format!("status {}", status.as_u16()),
                });
            }
        }

        if status.is_success() || status.is_redirection() {
            return Ok(res);
        }

        Err(Error::HttpStatus {
            status: status.as_u16(),
            host: req.logical_host.clone(),
            path: req.path.clone(),
        })
    }

    pub async fn get(&self, url: &str) -> Result<Response> {
        self.request(FrontedRequest::get(url)?).await
    }

    pub async fn get_text(&self, url: &str) -> Result<String> {
        Ok(self.get(url).await?.text().await?)
    }

    pub async fn head(&self, url: &str) -> Result<Response> {
        self.request(FrontedRequest::from_url(Method::HEAD, url)?).await
    }

    pub async fn post_json(&self, url: &str, body: &Value) -> Result<Value> {
        let req = FrontedRequest::from_url(Method::POST, url)?
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(serde_json::to_vec(body)?);
        Ok(self.request(req).await?.json().await?)
    }
}

fn build_client(
    spec: Option<&FrontSpec>,
    options: &TransportOptions,
    doh: Option<DohResolver>,
) -> Result<Client> {
    let mut builder = Client::builder()
        .use_rustls_tls()
        .user_agent(options.user_agent.as_str())
        .timeout(options.timeout)
        .connect_timeout(options.connect_timeout)
        .redirect(Policy::none());

    if let Some(spec) = spec {
        if let Some(addr) = spec.pinned_socket() {
            builder = builder.resolve(&spec.front_host, addr);
        }
        if let Some(path) = &spec.ca_certificate {
            let pem = std::fs::read(path).map_err(|e| {
                Error::Config(format!("cannot read CA certificate {}: {}", path.display(), e))
            })?;
            builder = builder
                .add_root_certificate(reqwest::Certificate::from_pem(&pem)?)
                .tls_built_in_root_certs(false);
        }
        if !spec.verify_certificates {
            warn!("Certificate verification disabled for front {}", spec.front_host);
            builder = builder.danger_accept_invalid_certs(true);
        }
    } else if let Some(doh) = doh {
        builder = builder.dns_resolver(Arc::new(doh));
    }

    Ok(builder.build()?)
}

fn classify_send_error(err: reqwest::Error, route: Option<&Route>, logical_host: &str) -> Error {
    if err.is_connect() && !err.is_timeout() {
        if let Some(route) = route {
            return Error::FrontRejected {
                front: route.spec.front_host.clone(),
                logical: logical_host.to_string(),
                detail: err.to_string(),
            };
        }
    }

    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        return Error::Connectivity {
            host: route
                .map(|r| r.spec.front_host.clone())
                .unwrap_or_else(|| logical_host.to_string()),
            attempts: 1,
            detail: err.to_string(),
        };
    }

    Error::Http(err)
}

/// Stamps the attempt count onto a transport error that ends the retry loop.
fn exhausted(err: Error, attempts: u32) -> Error {
    match err {
        Error::Connectivity { host, detail, .. } => Error::Connectivity {
            host,
            attempts,
            detail,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(allow_direct: bool) -> FrontedTransport {
        let fronts = vec![
            FrontSpec::new("blocked.example.com", "cdn.example.com").unwrap(),
            FrontSpec::new("*.media.example.com", "static.example.com")
                .unwrap()
                .with_port(8443),
        ];
        let options = TransportOptions {
            allow_direct,
            ..TransportOptions::default()
        };
        FrontedTransport::new(fronts, options, None).unwrap()
    }

    #[test]
    fn request_from_url_splits_host_and_path() {
        let req = FrontedRequest::get("https://Blocked.Example.com/watch?v=abc123").unwrap();
        assert_eq!(req.logical_host, "blocked.example.com");
        assert_eq!(req.path, "/watch?v=abc123");
        assert_eq!(req.method, Method::GET);
        assert!(req.body.is_none());
    }

    #[test]
    fn first_matching_front_wins() {
        let transport = transport(true);
        assert_eq!(
            transport.front_for("blocked.example.com").map(|f| f.front_host.as_str()),
            Some("cdn.example.com")
        );
        assert_eq!(
            transport.front_for("rr1.media.example.com").map(|f| f.front_port),
            Some(8443)
        );
        assert!(transport.front_for("open.example.org").is_none());
    }

    #[tokio::test]
    async fn unmatched_host_without_direct_is_refused() {
        let transport = transport(false);
        let err = transport
            .get("https://open.example.org/")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoFrontForHost(host) if host == "open.example.org"));
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_sending() {
        let transport = transport(true);
        let token = CancellationToken::new();
        token.cancel();

        let req = FrontedRequest::get("https://blocked.example.com/")
            .unwrap()
            .cancel(token);
        assert!(matches!(transport.request(req).await, Err(Error::Cancelled)));
    }

    #[test]
    fn exhausted_connectivity_reports_attempts() {
        let err = exhausted(
            Error::Connectivity {
                host: "cdn.example.com".into(),
                attempts: 1,
                detail: "timed out".into(),
            },
            4,
        );
        assert!(matches!(err, Error::Connectivity { attempts: 4, .. }));
    }

    #[test]
    fn options_follow_config() {
        let config = TransportConfig {
            max_retries: 7,
            backoff_base_ms: 10,
            routing_error_statuses: vec![421, 403],
            ..TransportConfig::default()
        };
        let options = TransportOptions::from(&config);
        assert_eq!(options.retry.max_retries, 7);
        assert_eq!(options.retry.base_delay, Duration::from_millis(10));
        assert_eq!(options.routing_error_statuses, vec![421, 403]);
    }
}
