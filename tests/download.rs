mod support;

use std::{
    net::{IpAddr, Ipv4Addr},
    sync::Arc,
    time::Duration,
};

use frontube::{
    Error,
    common::types::Container,
    download::{DownloadOptions, Downloader},
    sources::youtube::{
        DecipherProcedure, ResolvedStream, StreamDescriptor, StreamResolver,
        streams::{StreamKind, StreamSource},
    },
    transport::{FrontSpec, FrontedTransport, RetryPolicy, TransportOptions},
};
use support::{FRONT_HOST, FrontDouble, Reply, fixture, query_value};
use tokio_util::sync::CancellationToken;

const MEDIA_URL: &str = "https://media.example.com/videoplayback?itag=22&expire=4102444800";

fn payload() -> Vec<u8> {
    (0..10_000u32).map(|i| (i % 251) as u8).collect()
}

fn serve_ranges(data: Vec<u8>) -> impl Fn(&support::Recorded) -> Reply + Send + Sync + 'static {
    move |req| {
        if req.method == "HEAD" {
            return Reply::ok(data.clone());
        }
        let Some(range) = query_value(&req.path, "range") else {
            return Reply::ok(data.clone());
        };
        let (start, end) = range.split_once('-').unwrap();
        let start: usize = start.parse().unwrap();
        let end: usize = end.parse::<usize>().unwrap().min(data.len() - 1);
        Reply::ok(data[start..=end].to_vec())
    }
}

fn downloader(double: &FrontDouble, chunk_size: u64) -> Downloader {
    let spec = FrontSpec::new("media.example.com", FRONT_HOST)
        .unwrap()
        .with_port(double.port())
        .with_addr(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .with_ca_certificate(fixture("tls/ca.pem"));
    let options = TransportOptions {
        retry: RetryPolicy {
            max_retries: 0,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(10),
        },
        allow_direct: false,
        ..TransportOptions::default()
    };
    let transport = Arc::new(FrontedTransport::new(vec![spec], options, None).unwrap());
    Downloader::new(
        transport,
        DownloadOptions {
            chunk_size,
            max_retries: 1,
        },
    )
}

fn descriptor(url: &str, content_length: Option<u64>) -> StreamDescriptor {
    StreamDescriptor {
        itag: 22,
        mime_type: "video/mp4".into(),
        container: Container::Mp4,
        codecs: vec!["avc1.64001F".into(), "mp4a.40.2".into()],
        kind: StreamKind::Progressive,
        has_audio: true,
        has_video: true,
        bitrate: None,
        width: Some(1280),
        height: Some(720),
        fps: Some(30),
        content_length,
        audio_quality: None,
        quality_label: Some("720p".into()),
        source: StreamSource::Direct(url.into()),
    }
}

fn stream(content_length: Option<u64>) -> ResolvedStream {
    StreamResolver::resolve(&descriptor(MEDIA_URL, content_length), &DecipherProcedure::identity())
        .unwrap()
}

#[tokio::test]
async fn downloads_in_ranged_chunks() {
    let data = payload();
    let double = FrontDouble::spawn(serve_ranges(data.clone())).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.mp4");

    let written = downloader(&double, 4096)
        .download(&stream(Some(10_000)), &path, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(written, 10_000);
    assert_eq!(std::fs::read(&path).unwrap(), data);

    let ranges: Vec<String> = double
        .requests()
        .iter()
        .filter_map(|r| query_value(&r.path, "range"))
        .collect();
    assert_eq!(ranges, vec!["0-4095", "4096-8191", "8192-9999"]);
}

#[tokio::test]
async fn partial_file_is_resumed() {
    let data = payload();
    let double = FrontDouble::spawn(serve_ranges(data.clone())).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.mp4");
    std::fs::write(&path, &data[..6000]).unwrap();

    let written = downloader(&double, 9 * 1024 * 1024)
        .download(&stream(Some(10_000)), &path, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(written, 10_000);
    assert_eq!(std::fs::read(&path).unwrap(), data);

    let requests = double.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(query_value(&requests[0].path, "range").as_deref(), Some("6000-9999"));
}

#[tokio::test]
async fn forbidden_media_means_the_stream_expired() {
    let double = FrontDouble::spawn(|_| Reply::status(403)).await;
    let dir = tempfile::tempdir().unwrap();

    let err = downloader(&double, 4096)
        .download(&stream(Some(10_000)), dir.path().join("x.mp4"), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StreamExpired { itag: Some(22) }), "{:?}", err);
}

#[tokio::test]
async fn size_comes_from_a_head_request_when_unknown() {
    let data = payload();
    let double = FrontDouble::spawn(serve_ranges(data.clone())).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.mp4");

    let written = downloader(&double, 4096)
        .download(&stream(None), &path, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(written, 10_000);
    assert_eq!(std::fs::read(&path).unwrap(), data);

    let methods: Vec<String> = double.requests().iter().map(|r| r.method.clone()).collect();
    assert_eq!(methods, vec!["HEAD", "GET", "GET", "GET"]);
}

#[tokio::test]
async fn already_expired_stream_is_not_requested() {
    let double = FrontDouble::spawn(|_| Reply::ok("")).await;
    let dir = tempfile::tempdir().unwrap();
    // Valid when resolved, stale by the time it is downloaded.
    let expired = StreamResolver::resolve_at(
        &descriptor("https://media.example.com/videoplayback?itag=22&expire=1", Some(10)),
        &DecipherProcedure::identity(),
        0,
    )
    .unwrap();

    let err = downloader(&double, 4096)
        .download(&expired, dir.path().join("x.mp4"), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StreamExpired { .. }));
    assert!(double.requests().is_empty());
}

#[tokio::test]
async fn ignored_range_does_not_corrupt_a_partial_file() {
    let data = payload();
    let whole = data.clone();
    let double = FrontDouble::spawn(move |_| Reply::ok(whole.clone())).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.mp4");
    std::fs::write(&path, &data[..6000]).unwrap();

    let err = downloader(&double, 9 * 1024 * 1024)
        .download(&stream(Some(10_000)), &path, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MaxRetriesExceeded { attempts: 2 }), "{:?}", err);
    assert_eq!(std::fs::read(&path).unwrap(), &data[..6000]);
    assert_eq!(double.requests().len(), 2);
}

#[tokio::test]
async fn oversized_partial_reply_is_capped_to_the_range() {
    let data = payload();
    let served = data.clone();
    let double = FrontDouble::spawn(move |req| {
        let start: usize = query_value(&req.path, "range")
            .and_then(|r| r.split_once('-').map(|(a, _)| a.parse().unwrap()))
            .unwrap_or(0);
        Reply::status(206).body(served[start..].to_vec())
    })
    .await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.mp4");

    let written = downloader(&double, 4096)
        .download(&stream(Some(10_000)), &path, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(written, 10_000);
    assert_eq!(std::fs::read(&path).unwrap(), data);
    assert_eq!(double.requests().len(), 3);
}

fn segments() -> Vec<Vec<u8>> {
    vec![
        b"\x1aE\xdf\xa3Sequence-Number: 0\r\nSegment-Count: 2\r\n\r\n".to_vec(),
        vec![1u8; 3000],
        vec![2u8; 1500],
    ]
}

fn serve_segments(req: &support::Recorded) -> Reply {
    let sq: usize = query_value(&req.path, "sq").and_then(|v| v.parse().ok()).unwrap_or(99);
    match segments().get(sq) {
        Some(body) => Reply::ok(body.clone()),
        None => Reply::status(404),
    }
}

#[tokio::test]
async fn segmented_stream_is_fetched_in_order() {
    let double = FrontDouble::spawn(serve_segments).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.webm");

    let written = downloader(&double, 4096)
        .download_sequential(&stream(None), &path, CancellationToken::new())
        .await
        .unwrap();

    let expected = segments().concat();
    assert_eq!(written, expected.len() as u64);
    assert_eq!(std::fs::read(&path).unwrap(), expected);

    let order: Vec<String> = double
        .requests()
        .iter()
        .filter_map(|r| query_value(&r.path, "sq"))
        .collect();
    assert_eq!(order, vec!["0", "1", "2"]);
}

#[tokio::test]
async fn segmented_size_adds_up_every_segment() {
    let double = FrontDouble::spawn(serve_segments).await;

    let size = downloader(&double, 4096)
        .sequential_filesize(MEDIA_URL)
        .await
        .unwrap();
    assert_eq!(size, segments().concat().len() as u64);

    let methods: Vec<String> = double.requests().iter().map(|r| r.method.clone()).collect();
    assert_eq!(methods, vec!["GET", "HEAD", "HEAD"]);
}
