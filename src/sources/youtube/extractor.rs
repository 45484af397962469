use serde::Serialize;
use serde_json::Value;

use crate::common::errors::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VideoMetadata {
    pub video_id: String,
    pub title: String,
    pub author: String,
    pub channel_id: Option<String>,
    pub length_seconds: u64,
    pub view_count: Option<u64>,
    pub is_live: bool,
    pub keywords: Vec<String>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaylistInfo {
    pub playlist_id: String,
    pub title: String,
    pub video_ids: Vec<String>,
}

pub fn extract_metadata(body: &Value, fallback_id: &str) -> VideoMetadata {
    let Some(details) = body.get("videoDetails") else {
        return VideoMetadata {
            video_id: fallback_id.to_string(),
            ..Default::default()
        };
    };

    let str_field = |key: &str| details.get(key).and_then(|v| v.as_str()).map(str::to_string);
    let num_field = |key: &str| {
        details.get(key).and_then(|v| {
            v.as_u64()
                .or_else(|| v.as_str().and_then(|s| s.parse::<u64>().ok()))
        })
    };

    VideoMetadata {
        video_id: str_field("videoId").unwrap_or_else(|| fallback_id.to_string()),
        title: str_field("title").unwrap_or_default(),
        author: str_field("author").unwrap_or_default(),
        channel_id: str_field("channelId"),
        length_seconds: num_field("lengthSeconds").unwrap_or(0),
        view_count: num_field("viewCount"),
        is_live: details
            .get("isLive")
            .or_else(|| details.get("isLiveContent"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        keywords: details
            .get("keywords")
            .and_then(|k| k.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|k| k.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default(),
        description: str_field("shortDescription").unwrap_or_default(),
    }
}

/// Finds `<name> = {...}` in a page and returns the object text, matching
/// braces while skipping over JSON strings.
pub fn find_json_object<'a>(html: &'a str, name: &str) -> Option<&'a str> {
    let mut search_from = 0;
    while let Some(found) = html[search_from..].find(name) {
        let after = search_from + found + name.len();
        search_from = after;

        let rest = html[after..].trim_start_matches(|c: char| c == '"' || c == ']' || c.is_whitespace());
        let Some(rest) = rest.strip_prefix('=') else {
            continue;
        };
        let rest = rest.trim_start();
        if !rest.starts_with('{') {
            continue;
        }

        let start = html.len() - rest.len();
        if let Some(len) = balanced_object_len(rest) {
            return Some(&html[start..start + len]);
        }
    }
    None
}

fn balanced_object_len(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, b) in s.bytes().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

pub fn extract_playlist(html: &str, playlist_id: &str) -> Result<PlaylistInfo> {
    let raw = find_json_object(html, "ytInitialData")
        .ok_or_else(|| Error::ManifestParse(format!("playlist {}: no ytInitialData", playlist_id)))?;
    let data: Value = serde_json::from_str(raw)?;

    let title = data
        .get("metadata")
        .and_then(|m| m.get("playlistMetadataRenderer"))
        .and_then(|r| r.get("title"))
        .and_then(get_text)
        .or_else(|| {
            data.get("header")
                .and_then(|h| h.get("playlistHeaderRenderer"))
                .and_then(|h| h.get("title"))
                .and_then(get_text)
        })
        .unwrap_or_else(|| "Unknown Playlist".to_string());

    let mut video_ids: Vec<String> = Vec::new();
    if let Some(section_list) = find_section_list(&data) {
        if let Some(contents) = section_list.get("contents").and_then(|c| c.as_array()) {
            for section in contents {
                let Some(list) = section
                    .get("itemSectionRenderer")
                    .and_then(|i| i.get("contents"))
                    .and_then(|c| c.as_array())
                    .and_then(|arr| arr.first())
                    .and_then(|first| first.get("playlistVideoListRenderer"))
                    .and_then(|p| p.get("contents"))
                    .and_then(|c| c.as_array())
                else {
                    continue;
                };

                for item in list {
                    if let Some(id) = item
                        .get("playlistVideoRenderer")
                        .and_then(|r| r.get("videoId"))
                        .and_then(|v| v.as_str())
                    {
                        if !video_ids.iter().any(|v| v == id) {
                            video_ids.push(id.to_string());
                        }
                    }
                }
            }
        }
    }

    Ok(PlaylistInfo {
        playlist_id: playlist_id.to_string(),
        title,
        video_ids,
    })
}

pub fn find_section_list(value: &Value) -> Option<&Value> {
    if let Some(list) = value.get("sectionListRenderer") {
        return Some(list);
    }
    if let Some(contents) = value.get("contents") {
        if let Some(list) = find_section_list(contents) {
            return Some(list);
        }
    }
    if let Some(browse) = value.get("twoColumnBrowseResultsRenderer") {
        if let Some(list) = find_section_list(browse) {
            return Some(list);
        }
    }
    if let Some(arr) = value.as_array() {
        for item in arr {
            if let Some(list) = find_section_list(item) {
                return Some(list);
            }
        }
    }
    if let Some(tabs) = value.get("tabs").and_then(|t| t.as_array()) {
        for tab in tabs {
            if let Some(content) = tab.get("tabRenderer").and_then(|tr| tr.get("content")) {
                if let Some(list) = find_section_list(content) {
                    return Some(list);
                }
            }
        }
    }
    None
}

fn get_text(obj: &Value) -> Option<String> {
    if let Some(s) = obj.as_str() {
        return Some(s.to_string());
    }
    if let Some(simple_text) = obj.get("simpleText").and_then(|v| v.as_str()) {
        return Some(simple_text.to_string());
    }
    if let Some(runs) = obj.get("runs").and_then(|v| v.as_array()) {
        let mut text = String::new();
        for run in runs {
            if let Some(t) = run.get("text").and_then(|v| v.as_str()) {
                text.push_str(t);
            }
        }
        return Some(text);
    }
    None
}
