use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vast_video::cache::FileDiskCache;
use vast_video::document::VastDocument;
use vast_video::fetch::{HttpFetcher, fetch_input};
use vast_video::selector::ScreenMetrics;
use vast_video::tracking::{HttpTrackingClient, LoggingTrackingClient, TrackingClient};
use vast_video::{VastManager, VastSettings};

/// VAST video ad resolver
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// JSON settings file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarise the ads of a VAST file or URL without following redirects
    Parse {
        /// Path to the VAST file or URL
        #[arg(short, long)]
        input: String,

        /// Pretty print the output
        #[arg(short, long)]
        pretty: bool,
    },

    /// Follow wrappers to a playable ad and print the resulting video config
    Resolve {
        /// Path to the VAST file or URL
        #[arg(short, long)]
        input: String,

        /// Pretty print the output
        #[arg(short, long)]
        pretty: bool,

        /// Screen width in pixels
        #[arg(long)]
        width: Option<u32>,

        /// Screen height in pixels
        #[arg(long)]
        height: Option<u32>,

        /// Screen density (pixels per dp)
        #[arg(long)]
        density: Option<f32>,

        /// Do not download the selected media file
        #[arg(long)]
        no_precache: bool,

        /// Send error and impression requests instead of logging them
        #[arg(long)]
        fire_trackers: bool,

        /// Creative id reported by the demand source
        #[arg(long)]
        dsp_creative_id: Option<String>,
    },
}

#[derive(Serialize)]
struct AdSummary {
    id: Option<String>,
    sequence: Option<String>,
    kind: &'static str,
    vast_ad_tag_uri: Option<String>,
    impressions: usize,
    media_files: Vec<MediaSummary>,
    companions: usize,
    icons: usize,
}

#[derive(Serialize)]
struct MediaSummary {
    mime_type: Option<String>,
    width: Option<i32>,
    height: Option<i32>,
    url: Option<String>,
}

fn summarise(document: &VastDocument) -> Vec<AdSummary> {
    document
        .ads()
        .into_iter()
        .map(|ad| {
            let (kind, body, uri) = match (ad.in_line(), ad.wrapper()) {
                (Some(body), _) => ("InLine", Some(body), None),
                (None, Some(wrapper)) => ("Wrapper", Some(*wrapper.body()), wrapper.vast_ad_tag_uri()),
                (None, None) => ("Empty", None, None),
            };
            let linears = body.map(|body| body.linears()).unwrap_or_default();

            AdSummary {
                id: ad.id().map(str::to_string),
                sequence: ad.sequence().map(str::to_string),
                kind,
                vast_ad_tag_uri: uri.map(str::to_string),
                impressions: body.map_or(0, |body| body.impression_trackers().len()),
                media_files: linears
                    .iter()
                    .flat_map(|linear| linear.media_files())
                    .map(|media| MediaSummary {
                        mime_type: media.mime_type().map(str::to_string),
                        width: media.width(),
                        height: media.height(),
                        url: media.url().map(str::to_string),
                    })
                    .collect(),
                companions: body.map_or(0, |body| body.companions().len()),
                icons: linears.iter().map(|linear| linear.icons().len()).sum(),
            }
        })
        .collect()
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<(), serde_json::Error> {
    let output = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", output);
    Ok(())
}

async fn read_input(input: &str, settings: &VastSettings) -> vast_video::Result<String> {
    let fetcher = HttpFetcher::new(settings.fetch_timeout())?;
    let bytes = fetch_input(input, &fetcher).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vast_video=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut settings = match &cli.config {
        Some(path) => VastSettings::from_json_file(path)?,
        None => VastSettings::default(),
    };

    match cli.command {
        Commands::Parse { input, pretty } => {
            let content = read_input(&input, &settings).await?;
            let document = VastDocument::parse(&content)?;
            print_json(&summarise(&document), pretty)?;
        }
        Commands::Resolve {
            input,
            pretty,
            width,
            height,
            density,
            no_precache,
            fire_trackers,
            dsp_creative_id,
        } => {
            settings.screen = ScreenMetrics::new(
                width.unwrap_or(settings.screen.width_px),
                height.unwrap_or(settings.screen.height_px),
                density.unwrap_or(settings.screen.density),
            );
            if no_precache {
                settings.precache = false;
            }
            settings.validate()?;

            let content = read_input(&input, &settings).await?;
            let tracking: Arc<dyn TrackingClient> = if fire_trackers {
                Arc::new(HttpTrackingClient::new(settings.fetch_timeout())?)
            } else {
                Arc::new(LoggingTrackingClient)
            };
            let manager = VastManager::new(
                &settings,
                Arc::new(HttpFetcher::new(settings.fetch_timeout())?),
                Arc::new(FileDiskCache::new(&settings.cache_dir)),
                tracking,
            )?;

            match manager.resolve_video_config(&content, dsp_creative_id).await {
                Some(config) => print_json(&config, pretty)?,
                None => return Err("No playable ad found".into()),
            }
        }
    }

    Ok(())
}
