use crate::config::MAX_TIMES_TO_FOLLOW_VAST_REDIRECT;
use crate::document::{AdBody, Linear, VastDocument};
use crate::error::VastErrorCode;
use crate::fetch::Fetcher;
use crate::models::{Orientation, Tracker, VideoConfig};
use crate::selector::AssetSelector;
use crate::tracking::{TrackingContext, TrackingDispatcher};
use log::{debug, info, warn};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

type ResolveFuture<'a> = Pin<Box<dyn Future<Output = Option<VideoConfig>> + Send + 'a>>;

/// State shared by every step of one resolution
///
/// Owns the redirect counter so that the hop limit covers the whole wrapper tree, and
/// the token used to abandon the resolution.
#[derive(Debug, Clone)]
pub struct ResolveSession {
    redirects_followed: u32,
    max_redirects: u32,
    cancel: CancellationToken,
}

impl Default for ResolveSession {
    fn default() -> Self {
        ResolveSession::new(MAX_TIMES_TO_FOLLOW_VAST_REDIRECT, CancellationToken::new())
    }
}

impl ResolveSession {
    pub fn new(max_redirects: u32, cancel: CancellationToken) -> Self {
        ResolveSession {
            redirects_followed: 0,
            max_redirects: max_redirects.min(MAX_TIMES_TO_FOLLOW_VAST_REDIRECT),
            cancel,
        }
    }

    pub fn redirects_followed(&self) -> u32 {
        self.redirects_followed
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn can_follow_redirect(&self) -> bool {
        self.redirects_followed < self.max_redirects
    }
}

/// Resolve a VAST document into a [`VideoConfig`] by following `Wrapper` redirects
/// until an `InLine` ad with a playable media file is found
///
/// Resolution never fails with an error. Problems are reported to the VAST error
/// trackers collected so far and the affected branch is dropped.
#[derive(Clone)]
pub struct RedirectResolver {
    fetcher: Arc<dyn Fetcher>,
    tracking: TrackingDispatcher,
    selector: AssetSelector,
}

impl RedirectResolver {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        tracking: TrackingDispatcher,
        selector: AssetSelector,
    ) -> Self {
        RedirectResolver {
            fetcher,
            tracking,
            selector,
        }
    }

    /// Resolve `xml`, reporting failures to `inherited_error_trackers` as well as the
    /// error trackers found along the way
    pub async fn resolve(
        &self,
        xml: &str,
        inherited_error_trackers: Vec<Tracker>,
        session: &mut ResolveSession,
    ) -> Option<VideoConfig> {
        self.evaluate(xml.to_string(), inherited_error_trackers, session)
            .await
    }

    fn evaluate<'a>(
        &'a self,
        xml: String,
        mut error_trackers: Vec<Tracker>,
        session: &'a mut ResolveSession,
    ) -> ResolveFuture<'a> {
        Box::pin(async move {
            // Bounds the recursion depth even if a caller hands in a spent session
            if session.redirects_followed > session.max_redirects || session.is_cancelled() {
                return None;
            }

            let document = match VastDocument::parse(&xml) {
                Ok(document) => document,
                Err(e) => {
                    debug!("Failed to parse VAST XML: {}", e);
                    self.fire_errors(&mut error_trackers, VastErrorCode::XmlParsingError);
                    return None;
                }
            };

            let ads = document.ads();
            if ads.is_empty() {
                if let Some(mut tracker) = document.error_tracker() {
                    let code = if session.redirects_followed > 0 {
                        VastErrorCode::NoAdsVastResponse
                    } else {
                        VastErrorCode::UndefinedError
                    };
                    self.tracking
                        .fire([&mut tracker], TrackingContext::error(code, None));
                }
                return None;
            }

            for ad in ads {
                if !ad.has_playable_sequence() {
                    debug!("Skipping ad {:?} with sequence {:?}", ad.id(), ad.sequence());
                    continue;
                }

                if let Some(in_line) = ad.in_line() {
                    if let Some(mut config) = self.evaluate_in_line(&in_line, &error_trackers) {
                        populate_custom_elements(&document, &mut config);
                        return Some(config);
                    }
                }

                let Some(wrapper) = ad.wrapper() else {
                    continue;
                };
                let Some(redirect_uri) = wrapper.vast_ad_tag_uri() else {
                    debug!("Wrapper without VASTAdTagURI, trying next ad");
                    continue;
                };

                let mut wrapper_error_trackers = error_trackers.clone();
                wrapper_error_trackers.extend(wrapper.body().error_trackers());

                if !session.can_follow_redirect() {
                    info!(
                        "Not following {}: {} redirects already followed",
                        redirect_uri, session.redirects_followed
                    );
                    continue;
                }
                session.redirects_followed += 1;

                let fetched = tokio::select! {
                    biased;
                    _ = session.cancel.cancelled() => {
                        info!("VAST resolution cancelled while fetching {}", redirect_uri);
                        return None;
                    }
                    result = self.fetcher.fetch(redirect_uri) => result,
                };
                let redirect_xml = match fetched {
                    Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                    Err(e) => {
                        warn!("Failed to follow VAST redirect {}: {}", redirect_uri, e);
                        self.fire_errors(&mut wrapper_error_trackers, VastErrorCode::WrapperTimeout);
                        continue;
                    }
                };

                let Some(mut config) = self
                    .evaluate(redirect_xml, wrapper_error_trackers, &mut *session)
                    .await
                else {
                    if session.is_cancelled() {
                        return None;
                    }
                    continue;
                };

                self.merge_wrapper(wrapper.body(), &mut config);
                populate_custom_elements(&document, &mut config);
                return Some(config);
            }

            None
        })
    }

    /// Build a config from the first `Linear` with a playable media file
    fn evaluate_in_line(&self, in_line: &AdBody<'_>, error_trackers: &[Tracker]) -> Option<VideoConfig> {
        for linear in in_line.linears() {
            let Some(media_url) = self.selector.best_media_url(&linear.media_files()) else {
                continue;
            };

            let mut config = VideoConfig::new();
            config.impression_trackers.extend(in_line.impression_trackers());
            self.populate_linear_trackers_and_icon(&linear, &mut config);

            // Only InLine creatives carry a click-through and media
            config.click_through_url = linear.click_through_url().map(str::to_string);
            config.network_media_url = Some(media_url);

            let companions = in_line.companions();
            config.set_companion_ads(
                self.selector.best_companion(&companions, Orientation::Landscape),
                self.selector.best_companion(&companions, Orientation::Portrait),
            );

            config.error_trackers.extend(error_trackers.iter().cloned());
            config.error_trackers.extend(in_line.error_trackers());
            return Some(config);
        }
        None
    }

    /// Add a wrapper's trackers to a config resolved further down the chain
    fn merge_wrapper(&self, wrapper: &AdBody<'_>, config: &mut VideoConfig) {
        config.impression_trackers.extend(wrapper.impression_trackers());
        for linear in wrapper.linears() {
            self.populate_linear_trackers_and_icon(&linear, config);
        }

        let companions = wrapper.companions();
        if !config.has_companion_ad() {
            config.set_companion_ads(
                self.selector.best_companion(&companions, Orientation::Landscape),
                self.selector.best_companion(&companions, Orientation::Portrait),
            );
            return;
        }

        // Resource-less wrapper companions only carry tracking for the deeper companion
        for companion in companions.iter().filter(|c| !c.resources().has_any()) {
            for orientation in [Orientation::Landscape, Orientation::Portrait] {
                if let Some(companion_config) = config.companion_ad_mut(orientation) {
                    companion_config
                        .click_trackers
                        .extend(companion.click_trackers());
                    companion_config
                        .creative_view_trackers
                        .extend(companion.creative_view_trackers());
                }
            }
        }
    }

    fn populate_linear_trackers_and_icon(&self, linear: &Linear<'_>, config: &mut VideoConfig) {
        config.add_absolute_trackers(linear.absolute_progress_trackers());
        config.add_fractional_trackers(linear.fractional_progress_trackers());
        config.pause_trackers.extend(linear.pause_trackers());
        config.resume_trackers.extend(linear.resume_trackers());
        config.complete_trackers.extend(linear.complete_trackers());
        config.close_trackers.extend(linear.close_trackers());
        config.skip_trackers.extend(linear.skip_trackers());
        config.click_trackers.extend(linear.click_trackers());

        config.set_skip_offset(linear.skip_offset().map(str::to_string));
        if config.icon().is_none() {
            config.set_icon(self.selector.best_icon(&linear.icons()));
        }
    }

    fn fire_errors(&self, trackers: &mut [Tracker], code: VastErrorCode) {
        if trackers.is_empty() {
            return;
        }
        self.tracking
            .fire(trackers.iter_mut(), TrackingContext::error(code, None));
    }
}

/// Apply the custom extensions of one document. Values found deeper in the wrapper
/// chain win.
fn populate_custom_elements(document: &VastDocument, config: &mut VideoConfig) {
    config
        .impression_trackers
        .extend(document.mopub_impression_trackers());
    config.set_custom_cta_text(document.custom_cta_text());
    config.set_custom_skip_text(document.custom_skip_text());
    config.set_custom_close_icon_url(document.custom_close_icon_url());
    config.set_force_orientation(document.custom_force_orientation());
    config.set_viewability_tracker(document.viewability_tracker());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, VastError};
    use crate::selector::ScreenMetrics;
    use crate::tracking::RecordingTrackingClient;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MapFetcher {
        documents: HashMap<String, String>,
        requests: Mutex<Vec<String>>,
    }

    impl MapFetcher {
        fn with(mut self, url: &str, xml: &str) -> Self {
            self.documents.insert(url.to_string(), xml.to_string());
            self
        }

        fn requests(&self) -> Vec<String> {
            self.requests.lock().clone()
        }
    }

    #[async_trait]
    impl Fetcher for MapFetcher {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            self.requests.lock().push(url.to_string());
            self.documents
                .get(url)
                .map(|xml| xml.clone().into_bytes())
                .ok_or_else(|| VastError::HttpStatus {
                    url: url.to_string(),
                    status: 404,
                })
        }
    }

    fn new_resolver(fetcher: Arc<MapFetcher>) -> (RedirectResolver, RecordingTrackingClient) {
        let client = RecordingTrackingClient::new();
        let resolver = RedirectResolver::new(
            fetcher,
            TrackingDispatcher::new(Arc::new(client.clone())),
            AssetSelector::new(ScreenMetrics::new(1280, 720, 1.0)),
        );
        (resolver, client)
    }

    fn in_line(extra: &str) -> String {
        format!(
            r#"<VAST version="3.0"><Ad><InLine>
                 <Impression>https://t/inline-imp</Impression>
                 <Error>https://t/inline-err?c=[ERRORCODE]</Error>
                 <Creatives><Creative><Linear skipoffset="00:00:05">
                   <TrackingEvents><Tracking event="pause">https://t/inline-pause</Tracking></TrackingEvents>
                   <VideoClicks><ClickThrough>https://advertiser</ClickThrough></VideoClicks>
                   <MediaFiles><MediaFile type="video/mp4" width="1280" height="720">https://cdn/video.mp4</MediaFile></MediaFiles>
                 </Linear></Creative>{}</Creatives>
               </InLine></Ad></VAST>"#,
            extra
        )
    }

    fn wrapper(uri: &str, name: &str) -> String {
        format!(
            r#"<VAST version="3.0"><Ad><Wrapper>
                 <VASTAdTagURI><![CDATA[{uri}]]></VASTAdTagURI>
                 <Impression>https://t/{name}-imp</Impression>
                 <Error>https://t/{name}-err?c=[ERRORCODE]</Error>
                 <Creatives><Creative><Linear skipoffset="00:00:09">
                   <TrackingEvents><Tracking event="pause">https://t/{name}-pause</Tracking></TrackingEvents>
                 </Linear></Creative></Creatives>
               </Wrapper></Ad></VAST>"#
        )
    }

    #[tokio::test]
    async fn resolves_inline_document() {
        let (resolver, client) = new_resolver(Arc::new(MapFetcher::default()));
        let mut session = ResolveSession::default();

        let config = resolver
            .resolve(&in_line(""), Vec::new(), &mut session)
            .await
            .unwrap();

        assert_eq!(config.network_media_url.as_deref(), Some("https://cdn/video.mp4"));
        assert_eq!(config.click_through_url.as_deref(), Some("https://advertiser"));
        assert_eq!(config.skip_offset(), Some("00:00:05"));
        assert_eq!(config.impression_trackers.len(), 1);
        assert_eq!(config.error_trackers.len(), 1);
        assert!(config.error_trackers[0].repeatable);
        assert!(config.pause_trackers[0].repeatable);
        assert!(client.sent().is_empty());
    }

    #[tokio::test]
    async fn merges_wrapper_trackers_on_the_way_out() {
        let fetcher = Arc::new(MapFetcher::default().with("https://ads/inline", &in_line("")));
        let (resolver, _) = new_resolver(fetcher.clone());
        let mut session = ResolveSession::default();

        let config = resolver
            .resolve(&wrapper("https://ads/inline", "outer"), Vec::new(), &mut session)
            .await
            .unwrap();

        let impressions: Vec<&str> = config.impression_trackers.iter().map(|t| t.url.as_str()).collect();
        assert_eq!(impressions, vec!["https://t/inline-imp", "https://t/outer-imp"]);
        let pauses: Vec<&str> = config.pause_trackers.iter().map(|t| t.url.as_str()).collect();
        assert_eq!(pauses, vec!["https://t/inline-pause", "https://t/outer-pause"]);
        // The deepest skip offset wins
        assert_eq!(config.skip_offset(), Some("00:00:05"));
        // Inherited wrapper error trackers come first
        let errors: Vec<&str> = config.error_trackers.iter().map(|t| t.url.as_str()).collect();
        assert_eq!(
            errors,
            vec!["https://t/outer-err?c=[ERRORCODE]", "https://t/inline-err?c=[ERRORCODE]"]
        );
        assert_eq!(session.redirects_followed(), 1);
        assert_eq!(fetcher.requests(), vec!["https://ads/inline"]);
    }

    #[tokio::test]
    async fn parse_failure_fires_inherited_error_trackers() {
        let (resolver, client) = new_resolver(Arc::new(MapFetcher::default()));
        let mut session = ResolveSession::default();

        let config = resolver
            .resolve(
                "<VAST><Ad>",
                vec![Tracker::repeatable("https://t/err?c=[ERRORCODE]")],
                &mut session,
            )
            .await;

        assert!(config.is_none());
        assert_eq!(client.sent(), vec!["https://t/err?c=100"]);
    }

    #[tokio::test]
    async fn no_ads_fires_document_error() {
        let no_ads = "<VAST><Error>https://t/noads?c=[ERRORCODE]</Error></VAST>";

        let (resolver, client) = new_resolver(Arc::new(MapFetcher::default()));
        assert!(resolver
            .resolve(no_ads, Vec::new(), &mut ResolveSession::default())
            .await
            .is_none());
        assert_eq!(client.sent(), vec!["https://t/noads?c=900"]);

        let fetcher = Arc::new(MapFetcher::default().with("https://ads/empty", no_ads));
        let (resolver, client) = new_resolver(fetcher);
        assert!(resolver
            .resolve(&wrapper("https://ads/empty", "outer"), Vec::new(), &mut ResolveSession::default())
            .await
            .is_none());
        assert_eq!(client.sent(), vec!["https://t/noads?c=303"]);
    }

    #[tokio::test]
    async fn failed_redirect_fires_wrapper_timeout_and_tries_next_ad() {
        let xml = format!(
            r#"<VAST>
                 <Ad><Wrapper><VASTAdTagURI>https://ads/missing</VASTAdTagURI>
                   <Error>https://t/w-err?c=[ERRORCODE]</Error></Wrapper></Ad>
                 {}
               </VAST>"#,
            in_line("")
                .replace(r#"<VAST version="3.0">"#, "")
                .replace("</VAST>", "")
        );
        let (resolver, client) = new_resolver(Arc::new(MapFetcher::default()));
        let config = resolver
            .resolve(&xml, Vec::new(), &mut ResolveSession::default())
            .await
            .unwrap();

        assert_eq!(client.sent(), vec!["https://t/w-err?c=301"]);
        assert_eq!(config.network_media_url.as_deref(), Some("https://cdn/video.mp4"));
    }

    #[tokio::test]
    async fn local_path_redirect_is_a_failed_redirect() {
        use crate::fetch::HttpFetcher;
        use std::io::Write;
        use std::time::Duration;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(in_line("").as_bytes()).unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let client = RecordingTrackingClient::new();
        let resolver = RedirectResolver::new(
            Arc::new(HttpFetcher::new(Duration::from_secs(1)).unwrap()),
            TrackingDispatcher::new(Arc::new(client.clone())),
            AssetSelector::new(ScreenMetrics::new(1280, 720, 1.0)),
        );

        for uri in [path.clone(), format!("file://{}", path)] {
            let config = resolver
                .resolve(&wrapper(&uri, "w"), Vec::new(), &mut ResolveSession::default())
                .await;
            assert!(config.is_none());
        }
        assert_eq!(client.sent(), vec!["https://t/w-err?c=301", "https://t/w-err?c=301"]);
    }

    #[tokio::test]
    async fn wrapper_without_redirect_is_skipped_silently() {
        let xml = r#"<VAST><Ad><Wrapper><Error>https://t/w-err</Error></Wrapper></Ad></VAST>"#;
        let (resolver, client) = new_resolver(Arc::new(MapFetcher::default()));
        assert!(resolver
            .resolve(xml, Vec::new(), &mut ResolveSession::default())
            .await
            .is_none());
        assert!(client.sent().is_empty());
    }

    #[tokio::test]
    async fn cyclic_wrappers_stop_after_ten_fetches() {
        let fetcher = Arc::new(
            MapFetcher::default()
                .with("https://ads/a", &wrapper("https://ads/b", "a"))
                .with("https://ads/b", &wrapper("https://ads/a", "b")),
        );
        let (resolver, _) = new_resolver(fetcher.clone());
        let mut session = ResolveSession::default();

        let config = resolver
            .resolve(&wrapper("https://ads/a", "root"), Vec::new(), &mut session)
            .await;

        assert!(config.is_none());
        assert_eq!(fetcher.requests().len(), 10);
        assert_eq!(session.redirects_followed(), 10);
    }

    #[tokio::test]
    async fn pod_ads_after_the_first_are_skipped() {
        let xml = in_line("").replace("<Ad>", r#"<Ad sequence="2">"#);
        let (resolver, _) = new_resolver(Arc::new(MapFetcher::default()));
        assert!(resolver
            .resolve(&xml, Vec::new(), &mut ResolveSession::default())
            .await
            .is_none());

        let xml = in_line("").replace("<Ad>", r#"<Ad sequence="abc">"#);
        assert!(resolver
            .resolve(&xml, Vec::new(), &mut ResolveSession::default())
            .await
            .is_some());
    }

    #[tokio::test]
    async fn wrapper_companion_trackers_attach_to_deeper_companions() {
        let companion = r#"<Creative><CompanionAds>
              <Companion width="300" height="250"><HTMLResource>hi</HTMLResource></Companion>
            </CompanionAds></Creative>"#;
        let outer = r#"<VAST><Ad><Wrapper>
              <VASTAdTagURI>https://ads/inline</VASTAdTagURI>
              <Creatives><Creative><CompanionAds>
                <Companion width="300" height="250">
                  <TrackingEvents><Tracking event="creativeView">https://t/w-cv</Tracking></TrackingEvents>
                  <CompanionClickTracking>https://t/w-click</CompanionClickTracking>
                </Companion>
              </CompanionAds></Creative></Creatives>
            </Wrapper></Ad></VAST>"#;
        let fetcher = Arc::new(MapFetcher::default().with("https://ads/inline", &in_line(companion)));
        let (resolver, _) = new_resolver(fetcher);

        let config = resolver
            .resolve(outer, Vec::new(), &mut ResolveSession::default())
            .await
            .unwrap();

        assert!(config.has_companion_ad());
        for orientation in [Orientation::Landscape, Orientation::Portrait] {
            let companion = config.companion_ad(orientation).unwrap();
            assert_eq!(companion.creative_view_trackers[0].url, "https://t/w-cv");
            assert_eq!(companion.click_trackers[0].url, "https://t/w-click");
        }
    }

    #[tokio::test]
    async fn custom_extensions_prefer_deeper_documents() {
        let inner = format!("{}<MoPubCtaText>Inner</MoPubCtaText>", in_line(""));
        let outer = format!(
            "{}<MoPubCtaText>Outer</MoPubCtaText><MoPubSkipText>Go</MoPubSkipText>\
             <MP_TRACKING_URL>https://t/mp</MP_TRACKING_URL>\
             <MoPubForceOrientation>device</MoPubForceOrientation>",
            wrapper("https://ads/inline", "outer")
        );
        let fetcher = Arc::new(MapFetcher::default().with("https://ads/inline", &inner));
        let (resolver, _) = new_resolver(fetcher);

        let config = resolver
            .resolve(&outer, Vec::new(), &mut ResolveSession::default())
            .await
            .unwrap();

        assert_eq!(config.custom_cta_text(), Some("Inner"));
        assert_eq!(config.custom_skip_text(), Some("Go"));
        assert!(config.impression_trackers.iter().any(|t| t.url == "https://t/mp"));
        assert_eq!(config.force_orientation(), crate::models::ForceOrientation::Device);
    }

    #[tokio::test]
    async fn cancelled_session_fetches_nothing() {
        let fetcher = Arc::new(MapFetcher::default().with("https://ads/inline", &in_line("")));
        let (resolver, _) = new_resolver(fetcher.clone());
        let cancel = CancellationToken::new();
        let mut session = ResolveSession::new(10, cancel.clone());
        cancel.cancel();

        let config = resolver
            .resolve(&wrapper("https://ads/inline", "outer"), Vec::new(), &mut session)
            .await;

        assert!(config.is_none());
        assert!(fetcher.requests().is_empty());
    }
}
