use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{
    Method,
    header::{ACCEPT_LANGUAGE, CONTENT_TYPE, HeaderName, HeaderValue},
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    common::{errors::Result, http::DEFAULT_ACCEPT_LANGUAGE},
    sources::youtube::cache::PlayerProgram,
    transport::{FrontedRequest, FrontedTransport},
};

/// Platform endpoints. These change with the platform and are kept here so
/// an update touches one place.
pub mod endpoints {
    pub const ORIGIN: &str = "https://www.youtube.com";
    pub const INNERTUBE_API: &str = "https://youtubei.googleapis.com";

    pub const CLIENT_NAME: &str = "WEB";
    pub const CLIENT_ID: &str = "1";
    pub const CLIENT_VERSION: &str = "2.20260114.01.00";

    pub fn watch_page(video_id: &str) -> String {
        format!(
            "{}/watch?v={}&bpctr=9999999999&has_verified=1",
            ORIGIN,
            urlencoding::encode(video_id)
        )
    }

    pub fn player_program(version: &str) -> String {
        format!(
            "{}/s/player/{}/player_ias.vflset/en_US/base.js",
            ORIGIN,
            urlencoding::encode(version)
        )
    }

    pub fn player_document() -> String {
        format!("{}/youtubei/v1/player?prettyPrint=false", INNERTUBE_API)
    }

    pub fn playlist_page(playlist_id: &str) -> String {
        format!("{}/playlist?list={}", ORIGIN, urlencoding::encode(playlist_id))
    }
}

/// Pages and documents the pipeline reads about a video. Implementations
/// should give up with [`crate::Error::Cancelled`] once `cancel` fires.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_watch_page(&self, video_id: &str, cancel: &CancellationToken) -> Result<String>;

    /// The structured player document, as raw JSON text.
    async fn fetch_player_response(
        &self,
        video_id: &str,
        signature_timestamp: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<String>;

    async fn fetch_playlist_page(
        &self,
        playlist_id: &str,
        cancel: &CancellationToken,
    ) -> Result<String>;
}

#[async_trait]
pub trait PlayerProgramSource: Send + Sync {
    async fn fetch_program(&self, version: &str) -> Result<PlayerProgram>;
}

/// Fetches platform pages through the fronted transport.
pub struct PageFetcher {
    transport: Arc<FrontedTransport>,
}

impl PageFetcher {
    pub fn new(transport: Arc<FrontedTransport>) -> Self {
        Self { transport }
    }

    fn page_request(url: &str, cancel: &CancellationToken) -> Result<FrontedRequest> {
        Ok(FrontedRequest::get(url)?
            .header(
                ACCEPT_LANGUAGE,
                HeaderValue::from_static(DEFAULT_ACCEPT_LANGUAGE),
            )
            .cancel(cancel.clone()))
    }

    fn build_context() -> Value {
        json!({
            "client": {
                "clientName": endpoints::CLIENT_NAME,
                "clientVersion": endpoints::CLIENT_VERSION,
                "platform": "DESKTOP",
                "hl": "en",
                "gl": "US"
            },
            "user": { "lockedSafetyMode": false },
            "request": { "useSsl": true }
        })
    }
}

#[async_trait]
impl PageSource for PageFetcher {
    async fn fetch_watch_page(&self, video_id: &str, cancel: &CancellationToken) -> Result<String> {
        let url = endpoints::watch_page(video_id);
        debug!("Fetching watch page {}", url);
        let res = self.transport.request(Self::page_request(&url, cancel)?).await?;
        Ok(res.text().await?)
    }

    async fn fetch_player_response(
        &self,
        video_id: &str,
        signature_timestamp: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let mut body = json!({
            "context": Self::build_context(),
            "videoId": video_id,
            "contentCheckOk": true,
            "racyCheckOk": true
        });
        if let Some(sts) = signature_timestamp {
            body["playbackContext"] = json!({
                "contentPlaybackContext": {
                    "signatureTimestamp": sts,
                    "html5Preference": "HTML5_PREF_WANTS"
                }
            });
        }

        let req = FrontedRequest::from_url(Method::POST, &endpoints::player_document())?
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header(
                HeaderName::from_static("x-youtube-client-name"),
                HeaderValue::from_static(endpoints::CLIENT_ID),
            )
            .header(
                HeaderName::from_static("x-youtube-client-version"),
                HeaderValue::from_static(endpoints::CLIENT_VERSION),
            )
            .body(serde_json::to_vec(&body)?)
            .cancel(cancel.clone());

        debug!("Player request for {} (sts {:?})", video_id, signature_timestamp);
        let res = self.transport.request(req).await?;
        Ok(res.text().await?)
    }

    async fn fetch_playlist_page(
        &self,
        playlist_id: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let url = endpoints::playlist_page(playlist_id);
        debug!("Fetching playlist page {}", url);
        let res = self.transport.request(Self::page_request(&url, cancel)?).await?;
        Ok(res.text().await?)
    }
}

#[async_trait]
impl PlayerProgramSource for PageFetcher {
    async fn fetch_program(&self, version: &str) -> Result<PlayerProgram> {
        let text = self
            .transport
            .get_text(&endpoints::player_program(version))
            .await?;
        Ok(PlayerProgram::new(version, text))
    }
}
