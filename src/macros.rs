use crate::error::VastErrorCode;
use crate::timecode;
use rand::Rng;

const ERROR_CODE: &str = "[ERRORCODE]";
const CONTENT_PLAYHEAD: &str = "[CONTENTPLAYHEAD]";
const CACHE_BUSTING: &str = "[CACHEBUSTING]";
const ASSET_URI: &str = "[ASSETURI]";

/// Substitutes VAST macros in tracker URLs
///
/// Values that were never supplied substitute as the empty string. The cache buster is
/// generated fresh for every call to [`MacroSubstitutor::uris`].
#[derive(Debug, Clone)]
pub struct MacroSubstitutor {
    urls: Vec<String>,
    error_code: Option<VastErrorCode>,
    content_playhead_ms: Option<u32>,
    asset_uri: Option<String>,
}

impl MacroSubstitutor {
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MacroSubstitutor {
            urls: urls.into_iter().map(Into::into).collect(),
            error_code: None,
            content_playhead_ms: None,
            asset_uri: None,
        }
    }

    pub fn with_error_code(mut self, error_code: Option<VastErrorCode>) -> Self {
        self.error_code = error_code;
        self
    }

    pub fn with_content_playhead(mut self, position_ms: Option<u32>) -> Self {
        self.content_playhead_ms = position_ms;
        self
    }

    pub fn with_asset_uri(mut self, asset_uri: Option<&str>) -> Self {
        self.asset_uri = asset_uri.map(str::to_string);
        self
    }

    /// The substituted URLs, with empty ones dropped
    pub fn uris(&self) -> Vec<String> {
        let error_code = self.error_code.map(|code| code.code()).unwrap_or_default();
        let playhead = self
            .content_playhead_ms
            .map(timecode::format_playhead)
            .unwrap_or_default();
        let asset_uri = self
            .asset_uri
            .as_deref()
            .map(|uri| url::form_urlencoded::byte_serialize(uri.as_bytes()).collect::<String>())
            .unwrap_or_default();

        let mut rng = rand::thread_rng();
        self.urls
            .iter()
            .filter(|url| !url.trim().is_empty())
            .map(|url| {
                let cache_buster = format!("{:08}", rng.gen_range(0..100_000_000u32));
                url.replace(ERROR_CODE, error_code)
                    .replace(CONTENT_PLAYHEAD, &playhead)
                    .replace(CACHE_BUSTING, &cache_buster)
                    .replace(ASSET_URI, &asset_uri)
            })
            .filter(|url| !url.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_supplied_values() {
        let uris = MacroSubstitutor::new(["https://t.example.com/e?code=[ERRORCODE]&at=[CONTENTPLAYHEAD]"])
            .with_error_code(Some(VastErrorCode::WrapperTimeout))
            .with_content_playhead(Some(61_250))
            .uris();
        assert_eq!(uris, vec!["https://t.example.com/e?code=301&at=00:01:01.250"]);
    }

    #[test]
    fn missing_values_become_empty() {
        let uris = MacroSubstitutor::new(["https://t.example.com/e?code=[ERRORCODE]&a=[ASSETURI]"]).uris();
        assert_eq!(uris, vec!["https://t.example.com/e?code=&a="]);
    }

    #[test]
    fn asset_uri_is_form_encoded() {
        let uris = MacroSubstitutor::new(["https://t.example.com/?a=[ASSETURI]"])
            .with_asset_uri(Some("https://cdn.example.com/v.mp4?x=1 2"))
            .uris();
        assert_eq!(
            uris,
            vec!["https://t.example.com/?a=https%3A%2F%2Fcdn.example.com%2Fv.mp4%3Fx%3D1+2"]
        );
    }

    #[test]
    fn cache_buster_is_eight_digits() {
        let uris = MacroSubstitutor::new(["[CACHEBUSTING]"]).uris();
        assert_eq!(uris[0].len(), 8);
        assert!(uris[0].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn empty_urls_are_dropped() {
        let uris = MacroSubstitutor::new(["", "   ", "https://a"]).uris();
        assert_eq!(uris, vec!["https://a"]);
    }
}
