use std::{path::Path, sync::Arc};

use bytes::Bytes;
use futures::StreamExt;
use regex::bytes::Regex;
use reqwest::{Response, StatusCode, header::CONTENT_LENGTH};
use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    common::{
        errors::{Error, Result},
        types::now_secs,
    },
    configs::DownloadConfig,
    sources::youtube::ResolvedStream,
    transport::{FrontedRequest, FrontedTransport},
};

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Bytes requested per ranged request.
    pub chunk_size: u64,
    /// Consecutive failed chunks tolerated before giving up.
    pub max_retries: u32,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self::from(&DownloadConfig::default())
    }
}

impl From<&DownloadConfig> for DownloadOptions {
    fn from(config: &DownloadConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            max_retries: config.max_retries,
        }
    }
}

/// Writes resolved streams to disk in ranged chunks through the fronted
/// transport.
pub struct Downloader {
    transport: Arc<FrontedTransport>,
    options: DownloadOptions,
}

impl Downloader {
    pub fn new(transport: Arc<FrontedTransport>, options: DownloadOptions) -> Self {
        Self { transport, options }
    }

    /// Size reported by a HEAD request, if the media host sends one.
    pub async fn filesize(&self, url: &str) -> Result<Option<u64>> {
        let res = self.transport.head(url).await.map_err(|e| media_error(e, None))?;
        Ok(res
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok()))
    }

    /// Downloads `stream` into `path` and returns the final file size. A
    /// partial file already at `path` is continued from its current length.
    pub async fn download(
        &self,
        stream: &ResolvedStream,
        path: impl AsRef<Path>,
        cancel: CancellationToken,
    ) -> Result<u64> {
        let path = path.as_ref();
        let itag = stream.itag();
        if stream.is_expired_at(now_secs()) {
            return Err(Error::StreamExpired { itag: Some(itag) });
        }

        let total = match stream.descriptor().content_length {
            Some(len) => Some(len),
            None => self
                .filesize(stream.url())
                .await
                .map_err(|e| media_error(e, Some(itag)))?,
        };

        let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
        let mut offset = file.metadata().await?.len();

        let Some(total) = total else {
            if offset > 0 {
                warn!("{}: size unknown, restarting partial download", path.display());
                file.set_len(0).await?;
            }
            return self.download_whole(stream, &mut file, &cancel).await;
        };

        if offset > total {
            warn!(
                "{} is larger than the stream ({} > {}), starting over",
                path.display(),
                offset,
                total
            );
            file.set_len(0).await?;
            offset = 0;
        } else if offset > 0 {
            info!("Resuming itag {} at {}/{} bytes", itag, offset, total);
        }

        let mut failures = 0u32;
        while offset < total {
            let end = (offset + self.options.chunk_size).min(total) - 1;
            let before = offset;

            let err = match self
                .fetch_range(stream, before, end, &mut offset, &mut file, &cancel)
                .await
            {
                Ok(()) if offset > before => {
                    failures = 0;
                    debug!("itag {}: {}/{} bytes", itag, offset, total);
                    continue;
                }
                Ok(()) => Error::Connectivity {
                    host: host_of(stream.url()),
                    attempts: 1,
                    detail: format!("empty response for range {}-{}", before, end),
                },
                Err(e) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };

            failures += 1;
            if failures > self.options.max_retries {
                warn!("itag {}: giving up after {} failed chunks: {}", itag, failures, err);
                return Err(Error::MaxRetriesExceeded { attempts: failures });
            }
            warn!("itag {}: chunk at {} failed ({}), retrying", itag, offset, err);
        }

        file.flush().await?;
        if offset != total {
            return Err(Error::Connectivity {
                host: host_of(stream.url()),
                attempts: failures + 1,
                detail: format!("wrote {} bytes of a {} byte stream", offset, total),
            });
        }
        info!("Downloaded itag {} to {} ({} bytes)", itag, path.display(), offset);
        Ok(offset)
    }

    async fn fetch_range(
        &self,
        stream: &ResolvedStream,
        start: u64,
        end: u64,
        offset: &mut u64,
        file: &mut File,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let url = ranged_url(stream.url(), start, end)?;
        let res = self
            .transport
            .request(FrontedRequest::get(&url)?.cancel(cancel.clone()))
            .await
            .map_err(|e| media_error(e, Some(stream.itag())))?;

        // A host that ignores `range` answers 200 with the whole body, which
        // must not land at `start`.
        let expected = end - start + 1;
        let host = host_of(stream.url());
        if res.status() != StatusCode::PARTIAL_CONTENT && res.content_length() != Some(expected) {
            return Err(Error::Connectivity {
                host,
                attempts: 1,
                detail: format!(
                    "range {}-{} answered with status {} and length {:?}",
                    start,
                    end,
                    res.status().as_u16(),
                    res.content_length()
                ),
            });
        }
        write_body(res, &host, offset, file, cancel, Some(expected)).await
    }

    async fn download_whole(
        &self,
        stream: &ResolvedStream,
        file: &mut File,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        debug!("itag {}: size unknown, fetching in one request", stream.itag());
        let res = self
            .transport
            .request(FrontedRequest::get(stream.url())?.cancel(cancel.clone()))
            .await
            .map_err(|e| media_error(e, Some(stream.itag())))?;

        let mut written = 0;
        write_body(res, &host_of(stream.url()), &mut written, file, cancel, None).await?;
        file.flush().await?;
        Ok(written)
    }

    /// Downloads a segmented stream, addressed by the `sq` query parameter.
    /// Segment 0 holds the container headers and a `Segment-Count` line;
    /// segments `1..=count` follow in order. Always starts from scratch.
    pub async fn download_sequential(
        &self,
        stream: &ResolvedStream,
        path: impl AsRef<Path>,
        cancel: CancellationToken,
    ) -> Result<u64> {
        let path = path.as_ref();
        let itag = stream.itag();
        if stream.is_expired_at(now_secs()) {
            return Err(Error::StreamExpired { itag: Some(itag) });
        }

        let mut file = File::create(path).await?;
        let header = self.fetch_segment(stream, 0, &cancel).await?;
        let count = segment_count(&header)?;
        file.write_all(&header).await?;
        let mut written = header.len() as u64;
        debug!("itag {}: {} segments after the header", itag, count);

        for sq in 1..=count {
            let segment = self.fetch_segment(stream, sq, &cancel).await?;
            file.write_all(&segment).await?;
            written += segment.len() as u64;
            debug!("itag {}: segment {}/{} ({} bytes)", itag, sq, count, written);
        }

        file.flush().await?;
        info!(
            "Downloaded itag {} to {} ({} segments, {} bytes)",
            itag,
            path.display(),
            count + 1,
            written
        );
        Ok(written)
    }

    /// Size of a segmented stream: the header segment's length plus the
    /// HEAD-reported length of every following segment.
    pub async fn sequential_filesize(&self, url: &str) -> Result<u64> {
        let res = self
            .transport
            .get(&segment_url(url, 0)?)
            .await
            .map_err(|e| media_error(e, None))?;
        let header = res.bytes().await?;
        let count = segment_count(&header)?;

        let mut total = header.len() as u64;
        for sq in 1..=count {
            let len = self.filesize(&segment_url(url, sq)?).await?.ok_or_else(|| {
                Error::ManifestParse(format!("segment {} has no content-length", sq))
            })?;
            total += len;
        }
        Ok(total)
    }

    async fn fetch_segment(
        &self,
        stream: &ResolvedStream,
        sq: u64,
        cancel: &CancellationToken,
    ) -> Result<Bytes> {
        let url = segment_url(stream.url(), sq)?;
        let mut failures = 0u32;
        loop {
            let attempt = async {
                let res = self
                    .transport
                    .request(FrontedRequest::get(&url)?.cancel(cancel.clone()))
                    .await
                    .map_err(|e| media_error(e, Some(stream.itag())))?;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(Error::Cancelled),
                    body = res.bytes() => body.map_err(|e| Error::Connectivity {
                        host: host_of(stream.url()),
                        attempts: 1,
                        detail: e.to_string(),
                    }),
                }
            };

            match attempt.await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() => {
                    failures += 1;
                    if failures > self.options.max_retries {
                        warn!("itag {}: giving up on segment {}: {}", stream.itag(), sq, e);
                        return Err(Error::MaxRetriesExceeded { attempts: failures });
                    }
                    warn!("itag {}: segment {} failed ({}), retrying", stream.itag(), sq, e);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

async fn write_body(
    res: Response,
    host: &str,
    offset: &mut u64,
    file: &mut File,
    cancel: &CancellationToken,
    limit: Option<u64>,
) -> Result<()> {
    let mut body = res.bytes_stream();
    let mut written = 0u64;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            next = body.next() => next,
        };
        let Some(chunk) = next else {
            return Ok(());
        };
        let chunk = chunk.map_err(|e| Error::Connectivity {
            host: host.to_string(),
            attempts: 1,
            detail: e.to_string(),
        })?;

        let take = match limit {
            Some(limit) => (limit - written).min(chunk.len() as u64) as usize,
            None => chunk.len(),
        };
        file.write_all(&chunk[..take]).await?;
        written += take as u64;
        *offset += take as u64;

        if take < chunk.len() {
            warn!("{} sent more than the {} bytes requested, discarding the rest", host, written);
            return Ok(());
        }
    }
}

/// Media hosts answer stale or mis-signed URLs with 403 or 410.
fn media_error(err: Error, itag: Option<u32>) -> Error {
    match err {
        Error::HttpStatus {
            status: 403 | 410, ..
        } => Error::StreamExpired { itag },
        Error::StreamExpired { itag: None } => Error::StreamExpired { itag },
        other => other,
    }
}

/// Sets the `range=<start>-<end>` query parameter the media host expects.
pub fn ranged_url(url: &str, start: u64, end: u64) -> Result<String> {
    with_query_param(url, "range", &format!("{}-{}", start, end))
}

/// Addresses segment `sq` of a segmented stream.
pub fn segment_url(url: &str, sq: u64) -> Result<String> {
    with_query_param(url, "sq", &sq.to_string())
}

fn with_query_param(url: &str, name: &str, value: &str) -> Result<String> {
    let mut url = Url::parse(url)?;
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != name)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(name, value);
    Ok(url.to_string())
}

/// Reads `Segment-Count: N` from the header segment.
pub fn segment_count(header: &[u8]) -> Result<u64> {
    let re = Regex::new(r"Segment-Count: (\d+)")?;
    re.captures(header)
        .and_then(|c| c.get(1))
        .and_then(|m| std::str::from_utf8(m.as_bytes()).ok())
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| Error::ManifestParse("header segment has no Segment-Count".into()))
}

fn host_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}
