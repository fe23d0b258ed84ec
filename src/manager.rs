use crate::cache::{DiskCache, FileDiskCache};
use crate::config::VastSettings;
use crate::downloader::VideoDownloader;
use crate::error::{Result, VastError};
use crate::fetch::{Fetcher, HttpFetcher};
use crate::models::VideoConfig;
use crate::selector::AssetSelector;
use crate::tracking::{HttpTrackingClient, TrackingClient, TrackingDispatcher};
use crate::unwrap::{RedirectResolver, ResolveSession};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// Public entry point: resolve a VAST document, pre-cache its media file and hand the
/// finished [`VideoConfig`] to a callback
///
/// Only one resolution runs at a time. Cancelling it delivers `None` to its callback.
pub struct VastManager {
    pipeline: Pipeline,
    in_flight: Arc<Mutex<Option<CancellationToken>>>,
    runtime: Handle,
}

#[derive(Clone)]
struct Pipeline {
    resolver: RedirectResolver,
    downloader: VideoDownloader,
    max_redirects: u32,
    precache: bool,
}

impl VastManager {
    /// Build a manager from explicit collaborators. Must be called inside a tokio runtime.
    pub fn new(
        settings: &VastSettings,
        fetcher: Arc<dyn Fetcher>,
        cache: Arc<dyn DiskCache>,
        tracking: Arc<dyn TrackingClient>,
    ) -> Result<Self> {
        settings.validate()?;
        let runtime = Handle::try_current()
            .map_err(|e| VastError::Other(format!("No tokio runtime for VAST manager: {}", e)))?;

        let resolver = RedirectResolver::new(
            fetcher.clone(),
            TrackingDispatcher::new(tracking),
            AssetSelector::new(settings.screen),
        );
        let downloader = VideoDownloader::new(fetcher, cache, settings.max_video_size_bytes);

        Ok(VastManager {
            pipeline: Pipeline {
                resolver,
                downloader,
                max_redirects: settings.max_redirects,
                precache: settings.precache,
            },
            in_flight: Arc::new(Mutex::new(None)),
            runtime,
        })
    }

    /// Build a manager that fetches and tracks over HTTP and caches under
    /// `settings.cache_dir`
    pub fn from_settings(settings: &VastSettings) -> Result<Self> {
        let fetcher = Arc::new(HttpFetcher::new(settings.fetch_timeout())?);
        let cache = Arc::new(FileDiskCache::new(&settings.cache_dir));
        let tracking = Arc::new(HttpTrackingClient::new(settings.fetch_timeout())?);
        VastManager::new(settings, fetcher, cache, tracking)
    }

    pub fn is_preparing(&self) -> bool {
        self.in_flight.lock().is_some()
    }

    /// Start resolving `xml` in the background.
    ///
    /// Returns `false` without doing anything when a resolution is already running.
    pub fn prepare_video_config<F>(
        &self,
        xml: String,
        dsp_creative_id: Option<String>,
        callback: F,
    ) -> bool
    where
        F: FnOnce(Option<VideoConfig>) + Send + 'static,
    {
        let token = {
            let mut slot = self.in_flight.lock();
            if slot.is_some() {
                debug!("VAST resolution already in progress, ignoring new request");
                return false;
            }
            let token = CancellationToken::new();
            *slot = Some(token.clone());
            token
        };

        let pipeline = self.pipeline.clone();
        let in_flight = self.in_flight.clone();
        self.runtime.spawn(async move {
            let config = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                config = pipeline.run(&xml, dsp_creative_id, &token) => config,
            };

            let config = {
                let mut slot = in_flight.lock();
                if token.is_cancelled() {
                    None
                } else {
                    *slot = None;
                    config
                }
            };
            callback(config);
        });
        true
    }

    /// Resolve `xml` on the current task without the in-flight bookkeeping
    pub async fn resolve_video_config(
        &self,
        xml: &str,
        dsp_creative_id: Option<String>,
    ) -> Option<VideoConfig> {
        self.pipeline
            .run(xml, dsp_creative_id, &CancellationToken::new())
            .await
    }

    /// Stop the running resolution. Its callback receives `None`.
    pub fn cancel(&self) {
        if let Some(token) = self.in_flight.lock().take() {
            info!("Cancelling VAST resolution");
            token.cancel();
        }
    }
}

impl Drop for VastManager {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl Pipeline {
    async fn run(
        &self,
        xml: &str,
        dsp_creative_id: Option<String>,
        cancel: &CancellationToken,
    ) -> Option<VideoConfig> {
        let mut session = ResolveSession::new(self.max_redirects, cancel.clone());
        let mut config = self.resolver.resolve(xml, Vec::new(), &mut session).await?;
        config.set_dsp_creative_id(dsp_creative_id);
        info!(
            "Resolved VAST ad after {} redirect(s)",
            session.redirects_followed()
        );

        if !self.precache {
            return Some(config);
        }

        let url = config.network_media_url.clone()?;
        match self.downloader.ensure_cached(&url, cancel).await {
            Ok(path) => {
                config.disk_media_path = Some(path.to_string_lossy().into_owned());
                Some(config)
            }
            Err(e) => {
                warn!("Failed to pre-cache video {}: {}", url, e);
                None
            }
        }
    }
}
