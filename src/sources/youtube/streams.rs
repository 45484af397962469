use std::cmp::Reverse;

use url::Url;

use crate::{
    common::{
        errors::{Error, Result},
        types::{Container, now_secs},
    },
    sources::youtube::cipher::DecipherProcedure,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Audio and video muxed together.
    Progressive,
    /// Audio or video alone.
    Adaptive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSource {
    Direct(String),
    Ciphered {
        url: String,
        ciphertext: String,
        /// Query parameter that receives the deciphered signature.
        signature_param: String,
    },
}

/// One format entry of a manifest, valid only for the fetch that produced
/// it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub itag: u32,
    pub mime_type: String,
    pub container: Container,
    pub codecs: Vec<String>,
    pub kind: StreamKind,
    pub has_audio: bool,
    pub has_video: bool,
    pub bitrate: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
    pub content_length: Option<u64>,
    pub audio_quality: Option<String>,
    pub quality_label: Option<String>,
    pub source: StreamSource,
}

impl StreamDescriptor {
    pub fn is_ciphered(&self) -> bool {
        matches!(self.source, StreamSource::Ciphered { .. })
    }
}

/// A descriptor with a URL the media host will accept. Only
/// [`StreamResolver`] builds these, so a ciphered URL never escapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStream {
    descriptor: StreamDescriptor,
    url: String,
    expires_at: Option<u64>,
}

impl ResolvedStream {
    pub fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Unix time after which the URL stops working, when the URL says.
    pub fn expires_at(&self) -> Option<u64> {
        self.expires_at
    }

    pub fn itag(&self) -> u32 {
        self.descriptor.itag
    }

    pub fn is_progressive(&self) -> bool {
        self.descriptor.kind == StreamKind::Progressive
    }

    pub fn resolution(&self) -> Option<u32> {
        self.descriptor.height
    }

    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }

    /// `<title>.<ext>` with characters that are unsafe in file names removed.
    pub fn default_filename(&self, title: &str) -> String {
        let stem: String = title
            .chars()
            .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '~' | '#' | '%' | '&' | '+' | '{' | '}' | ',' | '.' | '\''))
            .filter(|c| !c.is_control())
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        let stem = if stem.is_empty() {
            format!("stream-{}", self.itag())
        } else {
            stem.chars().take(200).collect()
        };
        format!("{}.{}", stem, self.descriptor.container.as_ext())
    }
}

/// Turns descriptors into fetchable URLs by applying the decipher procedure.
pub struct StreamResolver;

impl StreamResolver {
    pub fn resolve(descriptor: &StreamDescriptor, procedure: &DecipherProcedure) -> Result<ResolvedStream> {
        Self::resolve_at(descriptor, procedure, now_secs())
    }

    pub fn resolve_all(
        descriptors: &[StreamDescriptor],
        procedure: &DecipherProcedure,
    ) -> Result<Vec<ResolvedStream>> {
        let now = now_secs();
        descriptors
            .iter()
            .map(|d| Self::resolve_at(d, procedure, now))
            .collect()
    }

    pub fn resolve_at(
        descriptor: &StreamDescriptor,
        procedure: &DecipherProcedure,
        now: u64,
    ) -> Result<ResolvedStream> {
        let url = match &descriptor.source {
            StreamSource::Direct(url) => Url::parse(url)?,
            StreamSource::Ciphered {
                url,
                ciphertext,
                signature_param,
            } => {
                let mut url = Url::parse(url)?;
                let signature = procedure.apply(ciphertext);
                let kept: Vec<(String, String)> = url
                    .query_pairs()
                    .filter(|(k, _)| k != signature_param.as_str())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect();
                url.query_pairs_mut()
                    .clear()
                    .extend_pairs(kept)
                    .append_pair(signature_param, &signature);
                url
            }
        };

        let expires_at = url
            .query_pairs()
            .find(|(k, _)| k == "expire")
            .and_then(|(_, v)| v.parse::<u64>().ok());

        let resolved = ResolvedStream {
            descriptor: descriptor.clone(),
            url: url.to_string(),
            expires_at,
        };
        if resolved.is_expired_at(now) {
            return Err(Error::StreamExpired {
                itag: Some(descriptor.itag),
            });
        }
        Ok(resolved)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Resolution,
    Bitrate,
}

impl SortKey {
    fn value(&self, stream: &ResolvedStream) -> Option<u64> {
        match self {
            Self::Resolution => stream.descriptor.height.map(u64::from),
            Self::Bitrate => stream.descriptor.bitrate,
        }
    }
}

/// Filter and ordering chain over resolved streams. Every step returns a new
/// query and never touches the network.
#[derive(Debug, Clone)]
pub struct StreamQuery<'a> {
    streams: Vec<&'a ResolvedStream>,
    key: Option<SortKey>,
}

impl<'a> StreamQuery<'a> {
    pub fn new(streams: &'a [ResolvedStream]) -> Self {
        Self {
            streams: streams.iter().collect(),
            key: None,
        }
    }

    fn filter(mut self, keep: impl Fn(&ResolvedStream) -> bool) -> Self {
        self.streams.retain(|s| keep(*s));
        self
    }

    pub fn progressive(self, progressive: bool) -> Self {
        self.filter(|s| s.is_progressive() == progressive)
    }

    pub fn adaptive(self) -> Self {
        self.progressive(false)
    }

    pub fn only_audio(self) -> Self {
        self.filter(|s| s.descriptor.has_audio && !s.descriptor.has_video)
    }

    pub fn only_video(self) -> Self {
        self.filter(|s| s.descriptor.has_video && !s.descriptor.has_audio)
    }

    pub fn container(self, container: Container) -> Self {
        self.filter(|s| s.descriptor.container == container)
    }

    /// Keeps streams with a codec starting with `codec`, e.g. `avc1` or `opus`.
    pub fn codec(self, codec: &str) -> Self {
        let codec = codec.to_ascii_lowercase();
        self.filter(|s| {
            s.descriptor
                .codecs
                .iter()
                .any(|c| c.to_ascii_lowercase().starts_with(&codec))
        })
    }

    pub fn itag(self, itag: u32) -> Self {
        self.filter(|s| s.itag() == itag)
    }

    /// Exact resolution such as `720p` or `720`.
    pub fn resolution(self, resolution: &str) -> Self {
        let height = parse_resolution(resolution);
        self.filter(|s| height.is_some() && s.resolution() == height)
    }

    pub fn min_resolution(self, height: u32) -> Self {
        self.filter(|s| s.resolution().is_some_and(|h| h >= height))
    }

    /// Sorts ascending by `key`, dropping streams that lack it.
    pub fn order_by(mut self, key: SortKey) -> Self {
        self.streams.retain(|s| key.value(s).is_some());
        self.streams.sort_by_key(|s| key.value(s));
        self.key = Some(key);
        self
    }

    pub fn ascending(mut self) -> Self {
        if let Some(key) = self.key {
            self.streams.sort_by_key(|s| key.value(s));
        }
        self
    }

    pub fn descending(mut self) -> Self {
        match self.key {
            Some(key) => self.streams.sort_by_key(|s| Reverse(key.value(s))),
            None => self.streams.reverse(),
        }
        self
    }

    pub fn first(&self) -> Option<&'a ResolvedStream> {
        self.streams.first().copied()
    }

    pub fn last(&self) -> Option<&'a ResolvedStream> {
        self.streams.last().copied()
    }

    pub fn collect(self) -> Vec<&'a ResolvedStream> {
        self.streams
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Highest resolution progressive stream.
    pub fn highest_resolution(self) -> Option<&'a ResolvedStream> {
        self.progressive(true).order_by(SortKey::Resolution).last()
    }

    /// Audio-only stream with the highest bitrate.
    pub fn best_audio(self) -> Option<&'a ResolvedStream> {
        self.only_audio().order_by(SortKey::Bitrate).last()
    }
}

fn parse_resolution(resolution: &str) -> Option<u32> {
    resolution
        .trim()
        .trim_end_matches(|c: char| c.is_ascii_alphabetic())
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::youtube::cipher::{DecipherStep, Primitive};

    fn descriptor(itag: u32, kind: StreamKind, height: Option<u32>, bitrate: u64, mime: &str) -> StreamDescriptor {
        let has_audio = kind == StreamKind::Progressive || mime.starts_with("audio/");
        let has_video = kind == StreamKind::Progressive || mime.starts_with("video/");
        StreamDescriptor {
            itag,
            mime_type: mime.to_string(),
            container: Container::from_mime(mime),
            codecs: vec![if has_video { "avc1.64001F".into() } else { "opus".into() }],
            kind,
            has_audio,
            has_video,
            bitrate: Some(bitrate),
            width: None,
            height,
            fps: None,
            content_length: None,
            audio_quality: None,
            quality_label: height.map(|h| format!("{}p", h)),
            source: StreamSource::Direct(format!(
                "https://rr1---sn-abc.googlevideo.com/videoplayback?itag={}&expire=2000000000",
                itag
            )),
        }
    }

    fn streams() -> Vec<ResolvedStream> {
        let descriptors = vec![
            descriptor(18, StreamKind::Progressive, Some(360), 500_000, "video/mp4"),
            descriptor(137, StreamKind::Adaptive, Some(1080), 4_000_000, "video/mp4"),
            descriptor(22, StreamKind::Progressive, Some(720), 1_500_000, "video/mp4"),
            descriptor(251, StreamKind::Adaptive, None, 160_000, "audio/webm"),
            descriptor(250, StreamKind::Adaptive, None, 70_000, "audio/webm"),
        ];
        StreamResolver::resolve_all(&descriptors, &DecipherProcedure::identity()).unwrap()
    }

    #[test]
    fn ciphered_signature_is_substituted() {
        let mut d = descriptor(18, StreamKind::Progressive, Some(360), 1, "video/mp4");
        d.source = StreamSource::Ciphered {
            url: "https://media.example.com/videoplayback?itag=18&sig=stale&expire=2000000000".into(),
            ciphertext: "abcdef".into(),
            signature_param: "sig".into(),
        };
        let procedure = DecipherProcedure::new(vec![DecipherStep {
            primitive: Primitive::Reverse,
            argument: 0,
        }]);

        let resolved = StreamResolver::resolve_at(&d, &procedure, 1_000).unwrap();
        let url = Url::parse(&resolved.url).unwrap();
        let sigs: Vec<String> = url
            .query_pairs()
            .filter(|(k, _)| k == "sig")
            .map(|(_, v)| v.into_owned())
            .collect();
        assert_eq!(sigs, vec!["fedcba".to_string()]);
        assert_eq!(resolved.expires_at, Some(2_000_000_000));
    }

    #[test]
    fn expired_url_is_rejected() {
        let mut d = descriptor(18, StreamKind::Progressive, Some(360), 1, "video/mp4");
        d.source = StreamSource::Direct("https://media.example.com/videoplayback?expire=100".into());
        let err = StreamResolver::resolve_at(&d, &DecipherProcedure::identity(), 101).unwrap_err();
        assert!(matches!(err, Error::StreamExpired { itag: Some(18) }));
    }

    #[test]
    fn queries_are_repeatable() {
        let streams = streams();
        let pick = || {
            StreamQuery::new(&streams)
                .progressive(true)
                .order_by(SortKey::Resolution)
                .descending()
                .collect()
                .iter()
                .map(|s| s.itag())
                .collect::<Vec<_>>()
        };
        assert_eq!(pick(), vec![22, 18]);
        assert_eq!(pick(), pick());
        assert_eq!(streams.len(), 5);
    }

    #[test]
    fn filters_and_helpers() {
        let streams = streams();
        assert_eq!(StreamQuery::new(&streams).adaptive().len(), 3);
        assert_eq!(StreamQuery::new(&streams).only_video().first().map(|s| s.itag()), Some(137));
        assert_eq!(StreamQuery::new(&streams).resolution("720p").first().map(|s| s.itag()), Some(22));
        assert_eq!(StreamQuery::new(&streams).min_resolution(720).len(), 2);
        assert_eq!(StreamQuery::new(&streams).codec("opus").len(), 2);
        assert_eq!(StreamQuery::new(&streams).container(Container::Webm).len(), 2);
        assert_eq!(StreamQuery::new(&streams).highest_resolution().map(|s| s.itag()), Some(22));
        assert_eq!(StreamQuery::new(&streams).best_audio().map(|s| s.itag()), Some(251));
        assert_eq!(
            StreamQuery::new(&streams)
                .order_by(SortKey::Bitrate)
                .ascending()
                .first()
                .map(|s| s.itag()),
            Some(250)
        );
    }

    #[test]
    fn filename_is_sanitized() {
        let streams = streams();
        let name = streams[0].default_filename("Rick: Never / Gonna?  Give");
        assert_eq!(name, "Rick Never Gonna Give.mp4");
    }
}
