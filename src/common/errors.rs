use std::fmt;

use thiserror::Error;

/// Why the platform refused to hand out a playable manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    AgeRestricted,
    Private,
    RegionBlocked,
    MembersOnly,
    LoginRequired,
    BotDetection,
    LiveStreamOffline,
    RecordingUnavailable,
    Removed,
    Unplayable,
    Unknown,
}

impl UnavailableReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgeRestricted => "age restricted",
            Self::Private => "private video",
            Self::RegionBlocked => "not available in this region",
            Self::MembersOnly => "members-only video",
            Self::LoginRequired => "login required",
            Self::BotDetection => "request flagged as automated",
            Self::LiveStreamOffline => "live stream offline",
            Self::RecordingUnavailable => "live recording unavailable",
            Self::Removed => "video removed",
            Self::Unplayable => "unplayable",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse grouping of failures by the remediation they need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The platform changed its client program or document layout.
    PlatformChanged,
    /// The video itself cannot be served (gated, removed, blocked).
    ContentUnavailable,
    /// The manifest is stale; resolve the video again.
    StreamExpired,
    /// The fronting path is broken or blocked.
    NetworkBlocked,
    /// Ordinary network trouble (timeouts, resets).
    Connectivity,
    InvalidInput,
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlatformChanged => "platform changed",
            Self::ContentUnavailable => "content unavailable",
            Self::StreamExpired => "stream expired",
            Self::NetworkBlocked => "network/fronting blocked",
            Self::Connectivity => "connectivity",
            Self::InvalidInput => "invalid input",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid video reference: {0}")]
    InvalidReference(String),

    #[error("unsupported container {0:?}")]
    UnsupportedContainer(String),

    #[error("unrecognized player program format (version {version}, stage {stage}): {detail}")]
    UnrecognizedProgramFormat {
        version: String,
        stage: &'static str,
        detail: String,
    },

    #[error("{video_id} is unavailable ({reason}): {message}")]
    ManifestUnavailable {
        video_id: String,
        reason: UnavailableReason,
        message: String,
    },

    #[error("manifest parse error: {0}")]
    ManifestParse(String),

    #[error("stream expired (itag {itag:?}); resolve the video again")]
    StreamExpired { itag: Option<u32> },

    #[error("front {front} rejected request for {logical}: {detail}")]
    FrontRejected {
        front: String,
        logical: String,
        detail: String,
    },

    #[error("connectivity error reaching {host} after {attempts} attempt(s): {detail}")]
    Connectivity {
        host: String,
        attempts: u32,
        detail: String,
    },

    #[error("http status {status} from {host}{path}")]
    HttpStatus {
        status: u16,
        host: String,
        path: String,
    },

    #[error("no front configured for host {0} and direct requests are disabled")]
    NoFrontForHost(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("maximum number of retries exceeded ({attempts} attempts)")]
    MaxRetriesExceeded { attempts: u32 },

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("url error: {0}")]
    Url(#[from] url::ParseError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("pattern error: {0}")]
    Pattern(#[from] regex::Error),
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnrecognizedProgramFormat { .. } | Self::ManifestParse(_) => {
                ErrorCategory::PlatformChanged
            }
            Self::ManifestUnavailable { .. } => ErrorCategory::ContentUnavailable,
            Self::StreamExpired { .. } => ErrorCategory::StreamExpired,
            Self::FrontRejected { .. } | Self::NoFrontForHost(_) => ErrorCategory::NetworkBlocked,
            Self::Connectivity { .. }
            | Self::HttpStatus { .. }
            | Self::MaxRetriesExceeded { .. }
            | Self::Http(_) => ErrorCategory::Connectivity,
            Self::InvalidReference(_) | Self::UnsupportedContainer(_) | Self::Config(_) => {
                ErrorCategory::InvalidInput
            }
            Self::Cancelled
            | Self::Io(_)
            | Self::Json(_)
            | Self::Url(_)
            | Self::Pattern(_) => ErrorCategory::Internal,
        }
    }

    /// Whether the transport may try the same request again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::FrontRejected { .. } | Self::Connectivity { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_keep_remediations_apart() {
        let changed = Error::UnrecognizedProgramFormat {
            version: "abcd1234".into(),
            stage: "entry",
            detail: "no call site".into(),
        };
        let gated = Error::ManifestUnavailable {
            video_id: "abc123".into(),
            reason: UnavailableReason::RegionBlocked,
            message: "blocked".into(),
        };
        let blocked = Error::FrontRejected {
            front: "cdn.example.com".into(),
            logical: "blocked.example.com".into(),
            detail: "421".into(),
        };

        assert_eq!(changed.category(), ErrorCategory::PlatformChanged);
        assert_eq!(gated.category(), ErrorCategory::ContentUnavailable);
        assert_eq!(blocked.category(), ErrorCategory::NetworkBlocked);
        assert_ne!(changed.category(), gated.category());
    }

    #[test]
    fn only_transport_failures_are_retryable() {
        assert!(
            Error::Connectivity {
                host: "h".into(),
                attempts: 1,
                detail: "reset".into()
            }
            .is_retryable()
        );
        assert!(!Error::StreamExpired { itag: Some(18) }.is_retryable());
        assert!(
            !Error::HttpStatus {
                status: 404,
                host: "h".into(),
                path: "/".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn unrecognized_format_message_carries_version() {
        let err = Error::UnrecognizedProgramFormat {
            version: "9f2c1e7a".into(),
            stage: "helper",
            detail: "x".into(),
        };
        assert!(err.to_string().contains("9f2c1e7a"));
    }
}
