use crate::common::errors::{Error, Result};

/// Media container of a stream, derived from its mime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Container {
    Mp4,
    Webm,
    ThreeGp,
    Unknown,
}

impl Container {
    pub fn as_ext(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Webm => "webm",
            Self::ThreeGp => "3gp",
            Self::Unknown => "bin",
        }
    }

    pub fn from_ext(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "mp4" | "m4a" => Self::Mp4,
            "webm" | "weba" => Self::Webm,
            "3gp" | "3gpp" => Self::ThreeGp,
            _ => Self::Unknown,
        }
    }

    /// Like [`Container::from_ext`], but an unrecognized extension is an error.
    pub fn parse_ext(ext: &str) -> Result<Self> {
        match Self::from_ext(ext) {
            Self::Unknown => Err(Error::UnsupportedContainer(ext.to_string())),
            container => Ok(container),
        }
    }

    /// Parses the subtype of a mime string such as `video/mp4; codecs="avc1.4d401f"`.
    pub fn from_mime(mime: &str) -> Self {
        let essence = mime.split(';').next().unwrap_or(mime).trim();
        match essence.split_once('/') {
            Some((_, subtype)) => Self::from_ext(subtype),
            None => Self::Unknown,
        }
    }
}

impl std::fmt::Display for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ext())
    }
}

/// Milliseconds since the unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Seconds since the unix epoch.
pub fn now_secs() -> u64 {
    now_ms() / 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_from_mime() {
        assert_eq!(
            Container::from_mime("video/mp4; codecs=\"avc1.64001F, mp4a.40.2\""),
            Container::Mp4
        );
        assert_eq!(Container::from_mime("audio/webm; codecs=\"opus\""), Container::Webm);
        assert_eq!(Container::from_mime("video/3gpp"), Container::ThreeGp);
        assert_eq!(Container::from_mime("garbage"), Container::Unknown);
    }

    #[test]
    fn unknown_extension_is_rejected_as_input() {
        assert_eq!(Container::parse_ext("WEBM").unwrap(), Container::Webm);
        let err = Container::parse_ext("mkv").unwrap_err();
        assert!(matches!(err, Error::UnsupportedContainer(ref ext) if ext == "mkv"));
        assert_eq!(err.category(), crate::common::errors::ErrorCategory::InvalidInput);
        assert!(!err.to_string().contains("video reference"));
    }
}
