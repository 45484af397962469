use std::{future::Future, sync::Arc};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::common::errors::{Error, Result};

pub mod cache;
pub mod cipher;
pub mod extractor;
pub mod fetcher;
pub mod manifest;
pub mod reference;
pub mod streams;

pub use cache::{PlayerProgram, PlayerProgramCache};
pub use cipher::{DecipherProcedure, SignatureDecipherDeriver};
pub use extractor::{PlaylistInfo, VideoMetadata};
pub use fetcher::{PageFetcher, PageSource, PlayerProgramSource};
pub use manifest::{Manifest, ManifestParser, PageDocument};
pub use reference::{Reference, VideoReference};
pub use streams::{ResolvedStream, SortKey, StreamDescriptor, StreamQuery, StreamResolver};

/// Everything needed to pick and fetch a stream of one video.
#[derive(Debug, Clone)]
pub struct VideoResolution {
    pub reference: VideoReference,
    pub metadata: VideoMetadata,
    pub player_version: Option<String>,
    pub streams: Vec<ResolvedStream>,
}

impl VideoResolution {
    pub fn streams(&self) -> StreamQuery<'_> {
        StreamQuery::new(&self.streams)
    }
}

pub struct YouTube {
    pages: Arc<dyn PageSource>,
    programs: Arc<PlayerProgramCache>,
}

impl YouTube {
    pub fn new(pages: Arc<dyn PageSource>, programs: Arc<PlayerProgramCache>) -> Self {
        Self { pages, programs }
    }

    pub fn programs(&self) -> &Arc<PlayerProgramCache> {
        &self.programs
    }

    pub async fn resolve(&self, reference: &VideoReference) -> Result<VideoResolution> {
        self.resolve_with_cancel(reference, &CancellationToken::new()).await
    }

    /// Resolves `reference`, giving up with [`Error::Cancelled`] as soon as
    /// `cancel` fires, whichever request is in flight.
    pub async fn resolve_with_cancel(
        &self,
        reference: &VideoReference,
        cancel: &CancellationToken,
    ) -> Result<VideoResolution> {
        let video_id = reference.video_id();
        info!("Resolving {}", video_id);

        let watch_html = until_cancelled(cancel, self.pages.fetch_watch_page(video_id, cancel)).await?;
        let version = manifest::find_player_js_path(&watch_html)?
            .as_deref()
            .and_then(manifest::player_version_from_path);

        // Only ciphered streams need the program; here it merely supplies the
        // signature timestamp, so a failed fetch is not fatal.
        let signature_timestamp = match version.as_deref() {
            Some(v) => match until_cancelled(cancel, self.programs.get_or_fetch(v)).await {
                Ok(program) => program.signature_timestamp,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!("Player program {} unavailable, requesting without timestamp: {}", v, e);
                    None
                }
            },
            None => None,
        };

        let player_response = match until_cancelled(
            cancel,
            self.pages.fetch_player_response(video_id, signature_timestamp, cancel),
        )
        .await
        {
            Ok(body) => Some(body),
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                warn!("Player document for {} failed, using watch page: {}", video_id, e);
                None
            }
        };

        let manifest = ManifestParser::parse(&PageDocument {
            video_id: video_id.to_string(),
            watch_html: Some(watch_html),
            player_response,
        })?;

        let procedure = if manifest.needs_decipher() {
            let version = manifest.player_version.as_deref().ok_or_else(|| {
                Error::ManifestParse(format!(
                    "{}: ciphered streams but no player program reference",
                    video_id
                ))
            })?;
            until_cancelled(cancel, self.programs.get_decipher(version)).await?
        } else {
            debug!("{}: no ciphered streams", video_id);
            Arc::new(DecipherProcedure::identity())
        };

        let streams = StreamResolver::resolve_all(&manifest.streams, &procedure)?;
        info!(
            "Resolved {} ({}): {} streams",
            video_id,
            manifest.metadata.title,
            streams.len()
        );

        Ok(VideoResolution {
            reference: reference.clone(),
            metadata: manifest.metadata,
            player_version: manifest.player_version,
            streams,
        })
    }

    pub async fn playlist(&self, playlist_id: &str) -> Result<PlaylistInfo> {
        self.playlist_with_cancel(playlist_id, &CancellationToken::new()).await
    }

    pub async fn playlist_with_cancel(
        &self,
        playlist_id: &str,
        cancel: &CancellationToken,
    ) -> Result<PlaylistInfo> {
        let html = until_cancelled(cancel, self.pages.fetch_playlist_page(playlist_id, cancel)).await?;
        let info = extractor::extract_playlist(&html, playlist_id)?;
        info!("Playlist {} ({}): {} videos", playlist_id, info.title, info.video_ids.len());
        Ok(info)
    }
}

async fn until_cancelled<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        res = fut => res,
    }
}
