use regex::Regex;
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    common::{
        errors::{Error, Result, UnavailableReason},
        types::Container,
    },
    sources::youtube::{
        extractor::{VideoMetadata, extract_metadata, find_json_object},
        streams::{StreamDescriptor, StreamKind, StreamSource},
    },
};

/// What was fetched for one video: the watch page, the structured player
/// document, or both.
#[derive(Debug, Clone, Default)]
pub struct PageDocument {
    pub video_id: String,
    pub watch_html: Option<String>,
    pub player_response: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Manifest {
    pub player_version: Option<String>,
    pub player_js_path: Option<String>,
    pub metadata: VideoMetadata,
    pub streams: Vec<StreamDescriptor>,
}

impl Manifest {
    pub fn needs_decipher(&self) -> bool {
        self.streams.iter().any(StreamDescriptor::is_ciphered)
    }
}

pub struct ManifestParser;

impl ManifestParser {
    pub fn parse(doc: &PageDocument) -> Result<Manifest> {
        let (player_js_path, player_version) = match doc.watch_html.as_deref() {
            Some(html) => {
                let path = find_player_js_path(html)?;
                let version = path.as_deref().and_then(player_version_from_path);
                (path, version)
            }
            None => (None, None),
        };

        let response = select_player_response(doc)?;
        check_playability(&doc.video_id, &response)?;

        let streaming_data = response.get("streamingData").ok_or_else(|| {
            Error::ManifestParse(format!("{}: playable response without streamingData", doc.video_id))
        })?;

        let mut streams = Vec::new();
        for (key, kind) in [("formats", StreamKind::Progressive), ("adaptiveFormats", StreamKind::Adaptive)] {
            let Some(formats) = streaming_data.get(key).and_then(|f| f.as_array()) else {
                continue;
            };
            for format in formats {
                if let Some(descriptor) = parse_format(format, kind)? {
                    streams.push(descriptor);
                }
            }
        }

        debug!(
            "Manifest for {}: {} streams, player {:?}",
            doc.video_id,
            streams.len(),
            player_version
        );

        Ok(Manifest {
            player_version,
            player_js_path,
            metadata: extract_metadata(&response, &doc.video_id),
            streams,
        })
    }
}

pub fn find_player_js_path(html: &str) -> Result<Option<String>> {
    let re = Regex::new(r#""(?:jsUrl|PLAYER_JS_URL)"\s*:\s*"([^"]+)""#)?;
    Ok(re
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().replace("\\/", "/")))
}

/// `/s/player/<version>/...` -> `<version>`
pub fn player_version_from_path(path: &str) -> Option<String> {
    let rest = path.split("/s/player/").nth(1)?;
    let version = rest.split('/').next()?;
    (!version.is_empty() && version.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-'))
        .then(|| version.to_string())
}

/// Prefers the structured document when it carries a playability status,
/// otherwise falls back to the response embedded in the watch page. A gated
/// structured document loses to a playable inline response.
fn select_player_response(doc: &PageDocument) -> Result<Value> {
    let structured = doc.player_response.as_deref().and_then(|raw| {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) if value.get("playabilityStatus").is_some() => Some(value),
            Ok(_) => {
                debug!("{}: structured document has no playabilityStatus", doc.video_id);
                None
            }
            Err(e) => {
                debug!("{}: structured document is not JSON: {}", doc.video_id, e);
                None
            }
        }
    });

    let Some(structured) = structured else {
        return inline_player_response(doc);
    };
    if is_playable(&structured) {
        return Ok(structured);
    }

    match inline_player_response(doc) {
        Ok(inline) if is_playable(&inline) => {
            info!(
                "{}: structured document is gated ({}), using the watch page response",
                doc.video_id,
                playability_status(&structured)
            );
            Ok(inline)
        }
        _ => Ok(structured),
    }
}

fn inline_player_response(doc: &PageDocument) -> Result<Value> {
    let html = doc.watch_html.as_deref().ok_or_else(|| {
        Error::ManifestParse(format!("{}: no usable player response", doc.video_id))
    })?;
    let raw = find_json_object(html, "ytInitialPlayerResponse").ok_or_else(|| {
        Error::ManifestParse(format!("{}: watch page has no ytInitialPlayerResponse", doc.video_id))
    })?;
    serde_json::from_str(raw)
        .map_err(|e| Error::ManifestParse(format!("{}: invalid ytInitialPlayerResponse: {}", doc.video_id, e)))
}

fn playability_status(response: &Value) -> &str {
    response
        .pointer("/playabilityStatus/status")
        .and_then(|s| s.as_str())
        .unwrap_or("")
}

fn is_playable(response: &Value) -> bool {
    playability_status(response) == "OK" && response.get("streamingData").is_some()
}

fn check_playability(video_id: &str, response: &Value) -> Result<()> {
    let Some(playability) = response.get("playabilityStatus") else {
        return Err(Error::ManifestParse(format!("{}: missing playabilityStatus", video_id)));
    };

    let status = playability_status(response);
    if status == "OK" {
        return Ok(());
    }

    let message = playability
        .get("reason")
        .and_then(|r| r.as_str())
        .map(str::to_string)
        .or_else(|| {
            playability
                .get("messages")
                .and_then(|m| m.as_array())
                .and_then(|m| m.first())
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_default();

    let reason = classify_unavailable(status, &message, playability);
    debug!("{} unplayable: status={} reason={}", video_id, status, reason);

    Err(Error::ManifestUnavailable {
        video_id: video_id.to_string(),
        reason,
        message: if message.is_empty() { status.to_string() } else { message },
    })
}

pub fn classify_unavailable(status: &str, message: &str, playability: &Value) -> UnavailableReason {
    let msg = message.to_lowercase();
    let has_offer = playability
        .get("errorScreen")
        .and_then(|e| e.get("playerLegacyDesktopYpcOfferRenderer"))
        .is_some();

    match status {
        "LOGIN_REQUIRED" if msg.contains("private") => UnavailableReason::Private,
        "LOGIN_REQUIRED" if msg.contains("bot") => UnavailableReason::BotDetection,
        "LOGIN_REQUIRED" if msg.contains("age") => UnavailableReason::AgeRestricted,
        "LOGIN_REQUIRED" => UnavailableReason::LoginRequired,
        "AGE_CHECK_REQUIRED" | "AGE_VERIFICATION_REQUIRED" => UnavailableReason::AgeRestricted,
        "LIVE_STREAM_OFFLINE" => UnavailableReason::LiveStreamOffline,
        "UNPLAYABLE" if msg.contains("members") || msg.contains("join this channel") || has_offer => {
            UnavailableReason::MembersOnly
        }
        "UNPLAYABLE" if msg.contains("country") || msg.contains("region") => {
            UnavailableReason::RegionBlocked
        }
        "UNPLAYABLE" if msg.contains("recording is not available") => {
            UnavailableReason::RecordingUnavailable
        }
        "UNPLAYABLE" if msg.contains("age") => UnavailableReason::AgeRestricted,
        "UNPLAYABLE" => UnavailableReason::Unplayable,
        "ERROR" => UnavailableReason::Removed,
        _ => UnavailableReason::Unknown,
    }
}

fn parse_format(format: &Value, kind: StreamKind) -> Result<Option<StreamDescriptor>> {
    let itag = format
        .get("itag")
        .and_then(|v| v.as_u64())
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| Error::ManifestParse("stream descriptor without itag".into()))?;
    let mime_type = format
        .get("mimeType")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::ManifestParse(format!("itag {} without mimeType", itag)))?
        .to_string();

    let source = if let Some(url) = format.get("url").and_then(|v| v.as_str()) {
        StreamSource::Direct(url.to_string())
    } else if let Some(cipher) = format
        .get("signatureCipher")
        .or_else(|| format.get("cipher"))
        .and_then(|v| v.as_str())
    {
        decode_signature_cipher(cipher)
            .ok_or_else(|| Error::ManifestParse(format!("itag {}: malformed signatureCipher", itag)))?
    } else {
        debug!("Skipping itag {}: no url or cipher", itag);
        return Ok(None);
    };

    let (essence, codecs) = parse_mime(&mime_type);
    let (has_audio, has_video) = match kind {
        StreamKind::Progressive => (true, true),
        StreamKind::Adaptive => (essence.starts_with("audio/"), essence.starts_with("video/")),
    };

    let number = |key: &str| {
        format.get(key).and_then(|v| {
            v.as_u64()
                .or_else(|| v.as_str().and_then(|s| s.parse::<u64>().ok()))
        })
    };
    let small = |key: &str| number(key).and_then(|v| u32::try_from(v).ok());
    let text = |key: &str| format.get(key).and_then(|v| v.as_str()).map(str::to_string);

    Ok(Some(StreamDescriptor {
        itag,
        container: Container::from_mime(&mime_type),
        mime_type,
        codecs,
        kind,
        has_audio,
        has_video,
        bitrate: number("bitrate"),
        width: small("width"),
        height: small("height"),
        fps: small("fps"),
        content_length: number("contentLength"),
        audio_quality: text("audioQuality"),
        quality_label: text("qualityLabel"),
        source,
    }))
}

/// `video/mp4; codecs="avc1.64001F, mp4a.40.2"` -> (`video/mp4`, [`avc1.64001F`, `mp4a.40.2`])
pub fn parse_mime(mime: &str) -> (String, Vec<String>) {
    let mut parts = mime.split(';');
    let essence = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
    let codecs = parts
        .filter_map(|p| p.trim().strip_prefix("codecs="))
        .flat_map(|c| c.trim_matches('"').split(','))
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    (essence, codecs)
}

/// Decodes a `signatureCipher` query string into a ciphered source.
pub fn decode_signature_cipher(cipher: &str) -> Option<StreamSource> {
    let mut url = None;
    let mut ciphertext = None;
    let mut signature_param = None;

    for part in cipher.split('&') {
        if let Some((k, v)) = part.split_once('=') {
            let decoded = urlencoding::decode(&v.replace('+', " ")).ok()?.into_owned();
            match k {
                "url" => url = Some(decoded),
                "s" => ciphertext = Some(decoded),
                "sp" => signature_param = Some(decoded),
                _ => {}
            }
        }
    }

    Some(StreamSource::Ciphered {
        url: url?,
        ciphertext: ciphertext?,
        signature_param: signature_param.unwrap_or_else(|| "signature".to_string()),
    })
}
