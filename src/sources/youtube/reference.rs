use std::fmt;

use url::Url;

use crate::common::errors::{Error, Result};

const HOSTS: &[&str] = &[
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "youtube-nocookie.com",
    "www.youtube-nocookie.com",
];

/// Path prefixes whose next segment is the video id.
const ID_PATH_PREFIXES: &[&str] = &["embed", "shorts", "live", "v"];

/// A video id plus the playlist it was opened from, if any.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VideoReference {
    video_id: String,
    playlist_id: Option<String>,
}

impl VideoReference {
    pub fn new(video_id: &str) -> Result<Self> {
        if !is_id(video_id) {
            return Err(Error::InvalidReference(format!("malformed video id: {:?}", video_id)));
        }
        Ok(Self {
            video_id: video_id.to_string(),
            playlist_id: None,
        })
    }

    /// Accepts a bare 11 character id or any of the known URL shapes.
    pub fn parse(input: &str) -> Result<Self> {
        match Reference::parse(input)? {
            Reference::Video(video) => Ok(video),
            Reference::Playlist(id) => Err(Error::InvalidReference(format!(
                "{} names playlist {} but no video",
                input, id
            ))),
        }
    }

    pub fn with_playlist(mut self, playlist_id: &str) -> Result<Self> {
        if !is_id(playlist_id) {
            return Err(Error::InvalidReference(format!(
                "malformed playlist id: {:?}",
                playlist_id
            )));
        }
        self.playlist_id = Some(playlist_id.to_string());
        Ok(self)
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn playlist_id(&self) -> Option<&str> {
        self.playlist_id.as_deref()
    }

    pub fn watch_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.video_id)
    }
}

impl fmt::Display for VideoReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.video_id)
    }
}

/// What a user-supplied string points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Video(VideoReference),
    Playlist(String),
}

impl Reference {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.len() == 11 && is_id(input) {
            return Ok(Self::Video(VideoReference::new(input)?));
        }

        let with_scheme = if input.contains("://") {
            input.to_string()
        } else {
            format!("https://{}", input)
        };
        let url = Url::parse(&with_scheme)
            .map_err(|_| Error::InvalidReference(format!("not a video url or id: {}", input)))?;
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();

        let query = |key: &str| {
            url.query_pairs()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.into_owned())
        };
        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|p| !p.is_empty()).collect())
            .unwrap_or_default();

        let video_id = if host == "youtu.be" || host == "www.youtu.be" {
            segments.first().map(|s| s.to_string())
        } else if HOSTS.contains(&host.as_str()) {
            match segments.as_slice() {
                ["watch"] => query("v"),
                [prefix, id, ..] if ID_PATH_PREFIXES.contains(prefix) => Some(id.to_string()),
                ["playlist"] => None,
                _ => {
                    return Err(Error::InvalidReference(format!(
                        "unrecognized url shape: {}",
                        input
                    )));
                }
            }
        } else {
            return Err(Error::InvalidReference(format!("not a YouTube url: {}", input)));
        };

        let playlist_id = query("list");
        match (video_id, playlist_id) {
            (Some(id), playlist) => {
                let video = VideoReference::new(&id)?;
                match playlist {
                    Some(list) => Ok(Self::Video(video.with_playlist(&list)?)),
                    None => Ok(Self::Video(video)),
                }
            }
            (None, Some(list)) if is_id(&list) => Ok(Self::Playlist(list)),
            _ => Err(Error::InvalidReference(format!("no video or playlist id in {}", input))),
        }
    }
}

fn is_id(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 64
        && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_known_shapes() {
        let cases = [
            "dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ?t=42",
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "youtube.com/watch?feature=share&v=dQw4w9WgXcQ",
            "https://m.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://music.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://www.youtube-nocookie.com/embed/dQw4w9WgXcQ?autoplay=1",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
            "https://www.youtube.com/live/dQw4w9WgXcQ?si=x",
            "https://www.youtube.com/v/dQw4w9WgXcQ",
        ];
        for case in cases {
            let reference = VideoReference::parse(case).unwrap_or_else(|e| panic!("{}: {}", case, e));
            assert_eq!(reference.video_id(), "dQw4w9WgXcQ", "{}", case);
            assert_eq!(reference.playlist_id(), None);
        }
    }

    #[test]
    fn watch_url_keeps_playlist() {
        let reference =
            VideoReference::parse("https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=PL590L5WQmH8fJ54F369BLDSqIwcs-TCfs")
                .unwrap();
        assert_eq!(reference.playlist_id(), Some("PL590L5WQmH8fJ54F369BLDSqIwcs-TCfs"));
    }

    #[test]
    fn playlist_only_url() {
        let parsed = Reference::parse("https://www.youtube.com/playlist?list=PLabc_123").unwrap();
        assert_eq!(parsed, Reference::Playlist("PLabc_123".into()));
        assert!(VideoReference::parse("https://www.youtube.com/playlist?list=PLabc_123").is_err());
    }

    #[test]
    fn rejects_malformed_input() {
        let cases = [
            "",
            "short",
            "https://vimeo.com/12345",
            "https://www.youtube.com/watch",
            "https://www.youtube.com/watch?v=bad id!",
            "https://www.youtube.com/channel/UC123",
            "https://youtu.be/",
        ];
        for case in cases {
            assert!(
                matches!(VideoReference::parse(case), Err(Error::InvalidReference(_))),
                "{}",
                case
            );
        }
    }

    #[test]
    fn new_checks_charset_only() {
        assert_eq!(VideoReference::new("abc123").unwrap().video_id(), "abc123");
        assert!(VideoReference::new("abc 123").is_err());
    }
}
