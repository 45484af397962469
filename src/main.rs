use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use frontube::{
    Error, Result,
    common::{logger, types::Container},
    configs::Config,
    download::{DownloadOptions, Downloader},
    sources::youtube::{
        PageFetcher, PlayerProgramCache, ResolvedStream, SortKey, StreamQuery, VideoReference,
        VideoResolution, YouTube, reference::Reference,
    },
    transport::FrontedTransport,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Resolve and download videos over a domain-fronted connection.
#[derive(Parser, Debug)]
#[command(name = "frontube", version, about, long_about = None)]
struct Args {
    /// Video or playlist URL, or a bare video id
    url: String,

    /// Directory to write downloads to
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// List matching streams instead of downloading
    #[arg(long)]
    list: bool,

    /// Only streams with audio and video muxed together
    #[arg(long, conflicts_with = "adaptive")]
    progressive: bool,

    /// Only audio-only or video-only streams
    #[arg(long)]
    adaptive: bool,

    /// Only audio-only streams, best bitrate first
    #[arg(long)]
    audio_only: bool,

    /// Container extension, e.g. mp4 or webm
    #[arg(long)]
    container: Option<String>,

    /// Exact resolution, e.g. 720p
    #[arg(long)]
    resolution: Option<String>,

    /// Pick one stream by itag, ignoring the other filters
    #[arg(long)]
    itag: Option<u32>,

    /// Fetch the stream as numbered segments, as live recordings are served
    #[arg(long)]
    sequential: bool,

    /// Configuration file (defaults to config.toml, then config.default.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} [{}]", e, e.category());
            std::process::exit(2);
        }
    };

    logger::init(config.logging.as_ref());
    if let Some(path) = &config.source {
        info!("Loaded configuration from {}", path.display());
    }

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            signal_token.cancel();
        }
    });

    if let Err(e) = run(args, config, cancel).await {
        error!("{}", e);
        eprintln!("error: {} [{}]", e, e.category());
        std::process::exit(1);
    }
}

async fn run(args: Args, config: Config, cancel: CancellationToken) -> Result<()> {
    let transport = Arc::new(FrontedTransport::from_config(&config.transport)?);
    let fetcher = Arc::new(PageFetcher::new(transport.clone()));
    let cache = Arc::new(PlayerProgramCache::new(fetcher.clone())?);
    let youtube = YouTube::new(fetcher, cache);
    let downloader = Downloader::new(transport, DownloadOptions::from(&config.download));

    let videos = match Reference::parse(&args.url)? {
        Reference::Video(video) => vec![video],
        Reference::Playlist(playlist_id) => {
            let playlist = youtube.playlist_with_cancel(&playlist_id, &cancel).await?;
            println!("{} ({} videos)", playlist.title, playlist.video_ids.len());
            playlist
                .video_ids
                .iter()
                .map(|id| VideoReference::new(id).and_then(|v| v.with_playlist(&playlist_id)))
                .collect::<Result<Vec<_>>>()?
        }
    };

    let container = args.container.as_deref().map(Container::parse_ext).transpose()?;

    if !args.list {
        tokio::fs::create_dir_all(&args.output).await?;
    }

    for video in &videos {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let resolution = youtube.resolve_with_cancel(video, &cancel).await?;
        let candidates = select(&resolution, &args, container);

        if args.list {
            println!("{} - {}", resolution.reference, resolution.metadata.title);
            for stream in &candidates {
                println!("  {}", describe(stream));
            }
            continue;
        }

        let Some(stream) = candidates.first() else {
            warn!("No stream of {} matches the given filters", video);
            continue;
        };

        let path = args.output.join(stream.default_filename(&resolution.metadata.title));
        println!("{} -> {}", describe(stream), path.display());
        let size = if args.sequential {
            downloader.download_sequential(stream, &path, cancel.clone()).await?
        } else {
            downloader.download(stream, &path, cancel.clone()).await?
        };
        println!("{} bytes written", size);
    }

    Ok(())
}

/// Streams matching the command-line filters, preferred stream first.
fn select<'a>(
    resolution: &'a VideoResolution,
    args: &Args,
    container: Option<Container>,
) -> Vec<&'a ResolvedStream> {
    let mut query: StreamQuery<'a> = resolution.streams();

    if let Some(itag) = args.itag {
        return query.itag(itag).collect();
    }

    if args.progressive {
        query = query.progressive(true);
    }
    if args.adaptive {
        query = query.adaptive();
    }
    if let Some(container) = container {
        query = query.container(container);
    }
    if let Some(resolution) = &args.resolution {
        query = query.resolution(resolution);
    }

    if args.audio_only {
        return query
            .only_audio()
            .order_by(SortKey::Bitrate)
            .descending()
            .collect();
    }

    // Without explicit filters prefer muxed streams, since adaptive video has
    // no audio track.
    if !args.adaptive && !args.progressive && args.resolution.is_none() {
        let progressive = query.clone().progressive(true);
        if !progressive.is_empty() {
            query = progressive;
        }
    }

    query
        .order_by(SortKey::Resolution)
        .descending()
        .collect()
}

fn describe(stream: &ResolvedStream) -> String {
    let d = stream.descriptor();
    let quality = d
        .quality_label
        .clone()
        .or_else(|| d.audio_quality.clone())
        .unwrap_or_default();
    format!(
        "itag={} {} {} [{}]{}",
        d.itag,
        d.mime_type.split(';').next().unwrap_or_default(),
        quality,
        d.codecs.join(", "),
        if stream.is_progressive() { " progressive" } else { "" }
    )
}
