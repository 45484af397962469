use url::Url;

use crate::common::errors::{Error, Result};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36";

pub const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en";

/// Splits an absolute https URL into the logical host and the path plus query.
///
/// Fronted requests address the origin by host and path separately, so
/// callers holding a full URL go through here first.
pub fn split_url(url: &str) -> Result<(String, String)> {
    let parsed = Url::parse(url)?;
    let host = parsed
        .host_str()
        .ok_or_else(|| Error::InvalidReference(format!("url without host: {}", url)))?
        .to_string();

    let mut path = parsed.path().to_string();
    if let Some(query) = parsed.query() {
        path.push('?');
        path.push_str(query);
    }
    Ok((host, path))
}
