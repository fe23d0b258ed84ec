use crate::error::{Result, VastError, VastErrorCode};
use crate::macros::MacroSubstitutor;
use crate::models::Tracker;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

/// Sends tracking requests
///
/// `send` must not block: tracking is fire-and-forget and is called from playback
/// callbacks.
pub trait TrackingClient: Send + Sync {
    fn send(&self, url: &str);
}

/// Fire tracking GETs with reqwest on the tokio runtime
#[derive(Debug, Clone)]
pub struct HttpTrackingClient {
    client: reqwest::Client,
    runtime: Handle,
}

impl HttpTrackingClient {
    /// Must be called from inside a tokio runtime
    pub fn new(timeout: Duration) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| VastError::Other(format!("No tokio runtime for tracking: {}", e)))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VastError::Other(format!("Failed to build HTTP client: {}", e)))?;
        Ok(HttpTrackingClient { client, runtime })
    }
}

impl TrackingClient for HttpTrackingClient {
    fn send(&self, url: &str) {
        let request = self.client.get(url);
        let url = url.to_string();
        self.runtime.spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("Tracked {}", url);
                }
                Ok(response) => warn!("Tracking request to {} returned {}", url, response.status()),
                Err(e) => warn!("Tracking request to {} failed: {}", url, e),
            }
        });
    }
}

/// Log tracking URLs instead of sending them
#[derive(Debug, Clone, Default)]
pub struct LoggingTrackingClient;

impl TrackingClient for LoggingTrackingClient {
    fn send(&self, url: &str) {
        info!("Would track {}", url);
    }
}

/// Keep every sent URL in memory
#[derive(Debug, Clone, Default)]
pub struct RecordingTrackingClient {
    sent: Arc<Mutex<Vec<String>>>,
}

impl RecordingTrackingClient {
    pub fn new() -> Self {
        RecordingTrackingClient::default()
    }

    /// URLs sent so far, in order
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

impl TrackingClient for RecordingTrackingClient {
    fn send(&self, url: &str) {
        self.sent.lock().push(url.to_string());
    }
}

/// Values substituted into tracker URLs when they fire
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackingContext<'a> {
    pub error_code: Option<VastErrorCode>,
    pub content_playhead_ms: Option<u32>,
    pub asset_uri: Option<&'a str>,
}

impl<'a> TrackingContext<'a> {
    pub fn error(error_code: VastErrorCode, asset_uri: Option<&'a str>) -> Self {
        TrackingContext {
            error_code: Some(error_code),
            content_playhead_ms: None,
            asset_uri,
        }
    }

    pub fn playback(content_playhead_ms: u32, asset_uri: Option<&'a str>) -> Self {
        TrackingContext {
            error_code: None,
            content_playhead_ms: Some(content_playhead_ms),
            asset_uri,
        }
    }
}

/// Marks trackers as fired and hands their expanded URLs to a [`TrackingClient`]
#[derive(Clone)]
pub struct TrackingDispatcher {
    client: Arc<dyn TrackingClient>,
}

impl TrackingDispatcher {
    pub fn new(client: Arc<dyn TrackingClient>) -> Self {
        TrackingDispatcher { client }
    }

    /// Fire every tracker that may still fire. Returns how many URLs were sent.
    pub fn fire<'t, I>(&self, trackers: I, context: TrackingContext<'_>) -> usize
    where
        I: IntoIterator<Item = &'t mut Tracker>,
    {
        let mut urls = Vec::new();
        for tracker in trackers {
            if !tracker.is_fireable() {
                continue;
            }
            // Marked before the request goes out so a re-entrant poll never resends
            tracker.mark_fired();
            urls.push(tracker.url.clone());
        }
        self.send_urls(urls, context)
    }

    /// Fire plain URLs that carry no fired state
    pub fn send_urls<I, S>(&self, urls: I, context: TrackingContext<'_>) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let uris = MacroSubstitutor::new(urls)
            .with_error_code(context.error_code)
            .with_content_playhead(context.content_playhead_ms)
            .with_asset_uri(context.asset_uri)
            .uris();
        for uri in &uris {
            self.client.send(uri);
        }
        uris.len()
    }
}

impl std::fmt::Debug for TrackingDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingDispatcher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher() -> (TrackingDispatcher, RecordingTrackingClient) {
        let client = RecordingTrackingClient::new();
        (TrackingDispatcher::new(Arc::new(client.clone())), client)
    }

    #[test]
    fn non_repeatable_trackers_fire_once() {
        let (dispatcher, client) = dispatcher();
        let mut trackers = vec![Tracker::new("https://t/a"), Tracker::repeatable("https://t/b")];

        dispatcher.fire(trackers.iter_mut(), TrackingContext::default());
        dispatcher.fire(trackers.iter_mut(), TrackingContext::default());

        assert_eq!(client.sent(), vec!["https://t/a", "https://t/b", "https://t/b"]);
        assert!(trackers.iter().all(|t| t.fired));
    }

    #[test]
    fn error_code_is_substituted() {
        let (dispatcher, client) = dispatcher();
        let mut trackers = vec![Tracker::repeatable("https://t/err?c=[ERRORCODE]")];
        dispatcher.fire(
            trackers.iter_mut(),
            TrackingContext::error(VastErrorCode::XmlParsingError, None),
        );
        assert_eq!(client.sent(), vec!["https://t/err?c=100"]);
    }

    #[test]
    fn playhead_and_asset_are_substituted() {
        let (dispatcher, client) = dispatcher();
        let sent = dispatcher.send_urls(
            ["https://t/p?at=[CONTENTPLAYHEAD]&a=[ASSETURI]"],
            TrackingContext::playback(2500, Some("v.mp4")),
        );
        assert_eq!(sent, 1);
        assert_eq!(client.sent(), vec!["https://t/p?at=00:00:02.500&a=v.mp4"]);
    }

    #[test]
    fn empty_tracker_urls_are_marked_but_not_sent() {
        let (dispatcher, client) = dispatcher();
        let mut trackers = vec![Tracker::new("")];
        assert_eq!(dispatcher.fire(trackers.iter_mut(), TrackingContext::default()), 0);
        assert!(trackers[0].fired);
        assert!(client.sent().is_empty());
    }
}
