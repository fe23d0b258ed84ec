use crate::cache::DiskCache;
use crate::error::{Result, VastError};
use crate::fetch::Fetcher;
use log::{debug, info};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Downloads media files into a [`DiskCache`]
#[derive(Clone)]
pub struct VideoDownloader {
    fetcher: Arc<dyn Fetcher>,
    cache: Arc<dyn DiskCache>,
    max_video_size: u64,
}

impl VideoDownloader {
    pub fn new(fetcher: Arc<dyn Fetcher>, cache: Arc<dyn DiskCache>, max_video_size: u64) -> Self {
        VideoDownloader {
            fetcher,
            cache,
            max_video_size,
        }
    }

    pub fn cache(&self) -> &Arc<dyn DiskCache> {
        &self.cache
    }

    /// Make sure `url` is in the cache and return its local path.
    ///
    /// Files that are already cached are not downloaded again. Files larger than the
    /// configured maximum are rejected.
    pub async fn ensure_cached(&self, url: &str, cancel: &CancellationToken) -> Result<PathBuf> {
        if self.cache.contains_key(url).await {
            debug!("Video already cached: {}", url);
            return Ok(self.cache.path_for(url));
        }

        let data = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(VastError::Cancelled),
            data = self.fetcher.fetch(url) => data?,
        };

        if data.len() as u64 > self.max_video_size {
            return Err(VastError::CacheError(format!(
                "Video larger than disk cap ({} bytes / {} maximum)",
                data.len(),
                self.max_video_size
            )));
        }

        let path = self.cache.put(url, &data).await?;
        info!("Downloaded {} bytes from {}", data.len(), url);
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FileDiskCache;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedFetcher {
        body: Vec<u8>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for FixedFetcher {
        async fn fetch(&self, _url: &str) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.body.clone())
        }
    }

    fn downloader(body: &[u8], max: u64) -> (VideoDownloader, Arc<FixedFetcher>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(FixedFetcher {
            body: body.to_vec(),
            calls: AtomicUsize::new(0),
        });
        let downloader = VideoDownloader::new(
            fetcher.clone(),
            Arc::new(FileDiskCache::new(dir.path())),
            max,
        );
        (downloader, fetcher, dir)
    }

    #[tokio::test]
    async fn downloads_once_then_reuses_the_cache() {
        let (downloader, fetcher, _dir) = downloader(b"0123456789", 100);
        let cancel = CancellationToken::new();

        let first = downloader.ensure_cached("https://cdn/v.mp4", &cancel).await.unwrap();
        let second = downloader.ensure_cached("https://cdn/v.mp4", &cancel).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejects_oversized_videos() {
        let (downloader, _, _dir) = downloader(b"0123456789", 5);
        let result = downloader
            .ensure_cached("https://cdn/v.mp4", &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(VastError::CacheError(_))));
        assert!(!downloader.cache().contains_key("https://cdn/v.mp4").await);
    }

    #[tokio::test]
    async fn cancelled_download_fails() {
        let (downloader, _, _dir) = downloader(b"0123456789", 100);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = downloader.ensure_cached("https://cdn/v.mp4", &cancel).await;
        assert!(matches!(result, Err(VastError::Cancelled)));
    }
}
