use crate::error::{Result, VastError};
use async_trait::async_trait;
use log::{debug, info};
use rand::distributions::Alphanumeric;
use rand::{Rng, thread_rng};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Retrieves the bytes behind a URL
///
/// Used for VAST redirects and for downloading video files. Implementations decide
/// what schemes they support.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Fetch VAST documents and media over HTTP(S)
///
/// Other schemes are refused: URLs found inside ad markup must never reach the local
/// filesystem.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VastError::Other(format!("Failed to build HTTP client: {}", e)))?;
        Ok(HttpFetcher { client })
    }

    async fn fetch_url(&self, url: &str) -> Result<Vec<u8>> {
        // Random request id to correlate log lines
        let req_id: String = thread_rng()
            .sample_iter(&Alphanumeric)
            .take(6)
            .map(char::from)
            .collect();

        let url = url::Url::parse(url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(VastError::Other(format!(
                "Unsupported URL scheme '{}' in {}",
                url.scheme(),
                url
            )));
        }
        debug!("[{}] Fetching from URL: {}", req_id, url);

        let start_time = Instant::now();
        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            debug!("[{}] Request failed after {:?}", req_id, start_time.elapsed());
            VastError::HttpError(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(VastError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        debug!(
            "[{}] Received {} bytes in {:?}",
            req_id,
            body.len(),
            start_time.elapsed()
        );
        Ok(body.to_vec())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.fetch_url(url).await
    }
}

/// Read a document named on the command line: a `file://` URL or an existing path is
/// read from disk, anything else goes through `fetcher`
pub async fn fetch_input(url_or_path: &str, fetcher: &dyn Fetcher) -> Result<Vec<u8>> {
    if let Some(path) = local_path(url_or_path) {
        info!("Reading from local file: {}", path.display());
        return Ok(tokio::fs::read(path).await?);
    }
    fetcher.fetch(url_or_path).await
}

/// Map `file://` URLs and existing paths to a local path
fn local_path(url_or_path: &str) -> Option<PathBuf> {
    if let Some(path) = url_or_path.strip_prefix("file://") {
        #[cfg(target_os = "windows")]
        let path = path.trim_start_matches('/');
        return Some(PathBuf::from(path));
    }

    let path = Path::new(url_or_path);
    path.exists().then(|| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn file_urls_map_to_paths() {
        assert_eq!(
            local_path("file:///tmp/vast.xml"),
            Some(PathBuf::from("/tmp/vast.xml"))
        );
        assert_eq!(local_path("https://ads.example.com/vast"), None);
    }

    #[tokio::test]
    async fn input_may_be_a_local_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"<VAST/>").unwrap();

        let fetcher = HttpFetcher::new(Duration::from_secs(1)).unwrap();
        let path = file.path().to_str().unwrap().to_string();
        assert_eq!(fetch_input(&path, &fetcher).await.unwrap(), b"<VAST/>");
        assert_eq!(
            fetch_input(&format!("file://{}", path), &fetcher).await.unwrap(),
            b"<VAST/>"
        );
    }

    #[tokio::test]
    async fn http_fetcher_never_reads_local_files() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"<VAST/>").unwrap();

        let fetcher = HttpFetcher::new(Duration::from_secs(1)).unwrap();
        let path = file.path().to_str().unwrap().to_string();
        assert!(matches!(
            fetcher.fetch(&path).await,
            Err(VastError::UrlError(_))
        ));
        assert!(matches!(
            fetcher.fetch(&format!("file://{}", path)).await,
            Err(VastError::Other(_))
        ));
        assert!(matches!(
            fetcher.fetch("ftp://ads.example.com/vast.xml").await,
            Err(VastError::Other(_))
        ));
    }

    #[tokio::test]
    async fn rejects_invalid_urls() {
        let fetcher = HttpFetcher::new(Duration::from_secs(1)).unwrap();
        let err = fetcher.fetch("not a url at all").await.unwrap_err();
        assert!(matches!(err, VastError::UrlError(_)));
    }
}
