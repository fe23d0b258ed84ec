use crate::registry::ProgressTrackers;
use crate::timecode;
use log::debug;
use serde::{Deserialize, Serialize};

/// A URL that must be requested when a playback event happens
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Tracker {
    /// The tracking URL, possibly containing VAST macros
    pub url: String,

    /// Whether the tracker has been fired
    pub fired: bool,

    /// Repeatable trackers may fire every time their event happens
    pub repeatable: bool,
}

impl Tracker {
    pub fn new(url: impl Into<String>) -> Self {
        Tracker {
            url: url.into(),
            fired: false,
            repeatable: false,
        }
    }

    pub fn repeatable(url: impl Into<String>) -> Self {
        Tracker {
            repeatable: true,
            ..Tracker::new(url)
        }
    }

    /// Whether the tracker may be fired now
    pub fn is_fireable(&self) -> bool {
        self.repeatable || !self.fired
    }

    /// Record that the tracker fired. Irreversible.
    pub fn mark_fired(&mut self) {
        self.fired = true;
    }
}

/// A tracker fired once playback passes an absolute position
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct AbsoluteProgressTracker {
    pub tracker: Tracker,

    /// Playback position in milliseconds
    pub threshold_ms: u32,
}

impl AbsoluteProgressTracker {
    pub fn new(url: impl Into<String>, threshold_ms: u32) -> Self {
        AbsoluteProgressTracker {
            tracker: Tracker::new(url),
            threshold_ms,
        }
    }
}

/// A tracker fired once playback passes a fraction of the duration
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct FractionalProgressTracker {
    pub tracker: Tracker,

    /// Fraction of the duration in `[0, 1]`
    pub fraction: f32,
}

impl FractionalProgressTracker {
    pub fn new(url: impl Into<String>, fraction: f32) -> Self {
        FractionalProgressTracker {
            tracker: Tracker::new(url),
            fraction,
        }
    }
}

/// Resource kinds in selection priority order
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
pub enum ResourceType {
    Static,
    Html,
    IFrame,
}

impl ResourceType {
    /// All kinds, most preferred first
    pub const PRIORITY: [ResourceType; 3] =
        [ResourceType::Static, ResourceType::Html, ResourceType::IFrame];
}

/// Creative type of a static resource
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
pub enum CreativeType {
    Image,
    JavaScript,
}

impl CreativeType {
    const IMAGE_TYPES: [&'static str; 4] = ["image/jpeg", "image/png", "image/bmp", "image/gif"];
    const JAVASCRIPT_TYPES: [&'static str; 1] = ["application/x-javascript"];

    /// Classify a `creativeType` attribute, case-insensitively
    pub fn from_mime(mime: &str) -> Option<CreativeType> {
        let mime = mime.trim().to_ascii_lowercase();
        if Self::IMAGE_TYPES.contains(&mime.as_str()) {
            Some(CreativeType::Image)
        } else if Self::JAVASCRIPT_TYPES.contains(&mime.as_str()) {
            Some(CreativeType::JavaScript)
        } else {
            None
        }
    }
}

/// The displayable payload of a companion ad or icon
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub enum VastResource {
    Static {
        resource: String,
        creative_type: CreativeType,
    },
    Html {
        resource: String,
    },
    IFrame {
        resource: String,
    },
}

impl VastResource {
    pub fn resource_type(&self) -> ResourceType {
        match self {
            VastResource::Static { .. } => ResourceType::Static,
            VastResource::Html { .. } => ResourceType::Html,
            VastResource::IFrame { .. } => ResourceType::IFrame,
        }
    }

    pub fn resource(&self) -> &str {
        match self {
            VastResource::Static { resource, .. }
            | VastResource::Html { resource }
            | VastResource::IFrame { resource } => resource,
        }
    }

    /// HTML to load into a web surface of the given size
    pub fn to_html(&self, width_dp: u32, height_dp: u32) -> String {
        match self {
            VastResource::IFrame { resource } => format!(
                "<iframe frameborder=\"0\" scrolling=\"no\" marginheight=\"0\" marginwidth=\"0\" \
                 style=\"border: 0px; margin: 0px;\" width=\"{}\" height=\"{}\" src=\"{}\"></iframe>",
                width_dp, height_dp, resource
            ),
            VastResource::Html { resource } => resource.clone(),
            VastResource::Static {
                resource,
                creative_type: CreativeType::Image,
            } => format!(
                "<html><head></head><body style=\"margin:0;padding:0\">\
                 <img src=\"{}\" width=\"100%\" style=\"max-width:100%;max-height:100%;\" />\
                 </body></html>",
                resource
            ),
            VastResource::Static {
                resource,
                creative_type: CreativeType::JavaScript,
            } => format!("<script src=\"{}\"></script>", resource),
        }
    }

    /// Pick the click-through for a click on this resource.
    ///
    /// Static images use the URL from the VAST document; everything rendered as
    /// markup navigates to whatever the web surface asked for.
    pub fn click_through_url<'a>(
        &self,
        vast_click_through: Option<&'a str>,
        surface_click_through: Option<&'a str>,
    ) -> Option<&'a str> {
        match self {
            VastResource::Static {
                creative_type: CreativeType::Image,
                ..
            } => vast_click_through,
            _ => surface_click_through,
        }
    }
}

/// Screen orientation used to pick a companion ad
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
pub enum Orientation {
    Landscape,
    Portrait,
}

/// Orientation the player should lock to, from the `MoPubForceOrientation` extension
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
pub enum ForceOrientation {
    Portrait,
    #[default]
    Landscape,
    Device,
    Undefined,
}

impl ForceOrientation {
    pub fn from_key(key: Option<&str>) -> ForceOrientation {
        match key.map(|key| key.trim().to_ascii_lowercase()).as_deref() {
            Some("portrait") => ForceOrientation::Portrait,
            Some("landscape") => ForceOrientation::Landscape,
            Some("device") => ForceOrientation::Device,
            _ => ForceOrientation::Undefined,
        }
    }
}

/// A companion ad shown alongside or after the video
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct CompanionAdConfig {
    pub width_dp: u32,
    pub height_dp: u32,
    pub resource: VastResource,
    pub click_through_url: Option<String>,
    pub click_trackers: Vec<Tracker>,
    pub creative_view_trackers: Vec<Tracker>,
}

/// An industry icon (e.g. AdChoices) overlaid on the video
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct IconConfig {
    pub width_dp: u32,
    pub height_dp: u32,

    /// When the icon appears, in milliseconds
    pub offset_ms: u32,

    /// How long the icon stays, forever when absent
    pub duration_ms: Option<u32>,

    pub resource: VastResource,
    pub click_trackers: Vec<Tracker>,
    pub click_through_url: Option<String>,
    pub view_trackers: Vec<Tracker>,
}

/// Viewability measurement requirements from the `MoPubViewabilityTracker` extension
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct VideoViewabilityTracker {
    pub viewable_playtime_ms: u32,
    pub percent_viewable: u32,
    pub tracker: Tracker,
}

/// The fully resolved video ad
///
/// Created empty, populated while the wrapper chain is resolved (fields are appended,
/// optional fields are set at most once), then handed to the playback controller.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct VideoConfig {
    pub impression_trackers: Vec<Tracker>,
    pub pause_trackers: Vec<Tracker>,
    pub resume_trackers: Vec<Tracker>,
    pub complete_trackers: Vec<Tracker>,
    pub close_trackers: Vec<Tracker>,
    pub skip_trackers: Vec<Tracker>,
    pub click_trackers: Vec<Tracker>,
    pub error_trackers: Vec<Tracker>,
    pub progress_trackers: ProgressTrackers,

    pub click_through_url: Option<String>,
    pub network_media_url: Option<String>,
    pub disk_media_path: Option<String>,

    landscape_companion: Option<CompanionAdConfig>,
    portrait_companion: Option<CompanionAdConfig>,
    icon: Option<IconConfig>,
    skip_offset: Option<String>,

    custom_cta_text: Option<String>,
    custom_skip_text: Option<String>,
    custom_close_icon_url: Option<String>,
    force_orientation: ForceOrientation,
    force_orientation_set: bool,
    viewability_tracker: Option<VideoViewabilityTracker>,
    dsp_creative_id: Option<String>,
}

impl VideoConfig {
    pub fn new() -> Self {
        VideoConfig::default()
    }

    pub fn add_absolute_trackers(&mut self, trackers: Vec<AbsoluteProgressTracker>) {
        self.progress_trackers.add_absolute(trackers);
    }

    pub fn add_fractional_trackers(&mut self, trackers: Vec<FractionalProgressTracker>) {
        self.progress_trackers.add_fractional(trackers);
    }

    /// Store the companion pair. Both orientations must be present, otherwise
    /// nothing is stored.
    pub fn set_companion_ads(
        &mut self,
        landscape: Option<CompanionAdConfig>,
        portrait: Option<CompanionAdConfig>,
    ) {
        if let (Some(landscape), Some(portrait)) = (landscape, portrait) {
            self.landscape_companion = Some(landscape);
            self.portrait_companion = Some(portrait);
        }
    }

    /// True only when both a landscape and a portrait companion are set
    pub fn has_companion_ad(&self) -> bool {
        self.landscape_companion.is_some() && self.portrait_companion.is_some()
    }

    pub fn companion_ad(&self, orientation: Orientation) -> Option<&CompanionAdConfig> {
        match orientation {
            Orientation::Landscape => self.landscape_companion.as_ref(),
            Orientation::Portrait => self.portrait_companion.as_ref(),
        }
    }

    pub fn companion_ad_mut(&mut self, orientation: Orientation) -> Option<&mut CompanionAdConfig> {
        match orientation {
            Orientation::Landscape => self.landscape_companion.as_mut(),
            Orientation::Portrait => self.portrait_companion.as_mut(),
        }
    }

    pub fn icon(&self) -> Option<&IconConfig> {
        self.icon.as_ref()
    }

    pub fn icon_mut(&mut self) -> Option<&mut IconConfig> {
        self.icon.as_mut()
    }

    /// Set the icon unless one is already set
    pub fn set_icon(&mut self, icon: Option<IconConfig>) {
        if self.icon.is_none() {
            self.icon = icon;
        }
    }

    pub fn skip_offset(&self) -> Option<&str> {
        self.skip_offset.as_deref()
    }

    /// Set the skip offset unless one is already set
    pub fn set_skip_offset(&mut self, skip_offset: Option<String>) {
        if self.skip_offset.is_none() {
            self.skip_offset = skip_offset;
        }
    }

    pub fn custom_cta_text(&self) -> Option<&str> {
        self.custom_cta_text.as_deref()
    }

    pub fn set_custom_cta_text(&mut self, text: Option<String>) {
        if self.custom_cta_text.is_none() {
            self.custom_cta_text = text;
        }
    }

    pub fn custom_skip_text(&self) -> Option<&str> {
        self.custom_skip_text.as_deref()
    }

    pub fn set_custom_skip_text(&mut self, text: Option<String>) {
        if self.custom_skip_text.is_none() {
            self.custom_skip_text = text;
        }
    }

    pub fn custom_close_icon_url(&self) -> Option<&str> {
        self.custom_close_icon_url.as_deref()
    }

    pub fn set_custom_close_icon_url(&mut self, url: Option<String>) {
        if self.custom_close_icon_url.is_none() {
            self.custom_close_icon_url = url;
        }
    }

    pub fn force_orientation(&self) -> ForceOrientation {
        self.force_orientation
    }

    pub fn is_force_orientation_set(&self) -> bool {
        self.force_orientation_set
    }

    /// Lock orientation, ignoring `Undefined` and repeat attempts
    pub fn set_force_orientation(&mut self, orientation: ForceOrientation) {
        if self.force_orientation_set || orientation == ForceOrientation::Undefined {
            return;
        }
        self.force_orientation = orientation;
        self.force_orientation_set = true;
    }

    pub fn viewability_tracker(&self) -> Option<&VideoViewabilityTracker> {
        self.viewability_tracker.as_ref()
    }

    pub fn set_viewability_tracker(&mut self, tracker: Option<VideoViewabilityTracker>) {
        if self.viewability_tracker.is_none() {
            self.viewability_tracker = tracker;
        }
    }

    pub fn dsp_creative_id(&self) -> Option<&str> {
        self.dsp_creative_id.as_deref()
    }

    pub fn set_dsp_creative_id(&mut self, id: Option<String>) {
        self.dsp_creative_id = id.filter(|id| !id.is_empty());
    }

    /// Local file when the media was pre-cached, otherwise the network URL
    pub fn media_source(&self) -> Option<&str> {
        self.disk_media_path
            .as_deref()
            .or(self.network_media_url.as_deref())
    }

    /// Resolve the skip offset against a video duration.
    ///
    /// Absolute offsets and rounded percentage offsets are only honoured when they
    /// land strictly before the end of the video.
    pub fn skip_offset_millis(&self, duration_ms: u32) -> Option<u32> {
        let skip_offset = self.skip_offset.as_deref()?;

        if timecode::is_absolute_offset(skip_offset) {
            timecode::parse_absolute_offset(skip_offset).filter(|offset| *offset < duration_ms)
        } else if let Some(fraction) = timecode::parse_percentage(skip_offset) {
            let offset = (duration_ms as f64 * fraction as f64).round() as u32;
            (offset < duration_ms).then_some(offset)
        } else {
            debug!("Invalid VAST skipoffset format: {}", skip_offset);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn companion(width: u32) -> CompanionAdConfig {
        CompanionAdConfig {
            width_dp: width,
            height_dp: 250,
            resource: VastResource::Html {
                resource: "<p>hi</p>".to_string(),
            },
            click_through_url: None,
            click_trackers: Vec::new(),
            creative_view_trackers: Vec::new(),
        }
    }

    #[test]
    fn companion_pair_is_atomic() {
        let mut config = VideoConfig::new();
        config.set_companion_ads(Some(companion(300)), None);
        assert!(!config.has_companion_ad());
        assert!(config.companion_ad(Orientation::Landscape).is_none());

        config.set_companion_ads(Some(companion(300)), Some(companion(320)));
        assert!(config.has_companion_ad());
        assert_eq!(config.companion_ad(Orientation::Portrait).unwrap().width_dp, 320);
    }

    #[test]
    fn skip_offset_percentage_resolves_against_duration() {
        let mut config = VideoConfig::new();
        config.set_skip_offset(Some("50%".to_string()));
        assert_eq!(config.skip_offset_millis(20_000), Some(10_000));
    }

    #[test]
    fn skip_offset_past_duration_is_rejected() {
        let mut config = VideoConfig::new();
        config.set_skip_offset(Some("00:00:25".to_string()));
        assert_eq!(config.skip_offset_millis(20_000), None);
        assert_eq!(config.skip_offset_millis(30_000), Some(25_000));
    }

    #[test]
    fn skip_offset_is_set_once() {
        let mut config = VideoConfig::new();
        config.set_skip_offset(Some("00:00:05".to_string()));
        config.set_skip_offset(Some("00:00:09".to_string()));
        assert_eq!(config.skip_offset(), Some("00:00:05"));
    }

    #[test]
    fn garbage_skip_offset_is_ignored() {
        let mut config = VideoConfig::new();
        config.set_skip_offset(Some("soon".to_string()));
        assert_eq!(config.skip_offset_millis(20_000), None);
        config = VideoConfig::new();
        config.set_skip_offset(Some("100%".to_string()));
        assert_eq!(config.skip_offset_millis(20_000), None);
    }

    #[test]
    fn force_orientation_ignores_undefined_and_sets_once() {
        let mut config = VideoConfig::new();
        assert_eq!(config.force_orientation(), ForceOrientation::Landscape);
        config.set_force_orientation(ForceOrientation::from_key(Some("sideways")));
        assert!(!config.is_force_orientation_set());
        config.set_force_orientation(ForceOrientation::from_key(Some("PORTRAIT")));
        config.set_force_orientation(ForceOrientation::Device);
        assert_eq!(config.force_orientation(), ForceOrientation::Portrait);
        assert!(config.is_force_orientation_set());
    }

    #[test]
    fn creative_types_are_case_insensitive() {
        assert_eq!(CreativeType::from_mime("ImAge/JpEg"), Some(CreativeType::Image));
        assert_eq!(
            CreativeType::from_mime("application/x-javascript"),
            Some(CreativeType::JavaScript)
        );
        assert_eq!(CreativeType::from_mime("video/mp4"), None);
    }

    #[test]
    fn resources_render_by_kind() {
        let iframe = VastResource::IFrame {
            resource: "https://frame.example.com".to_string(),
        };
        assert!(iframe.to_html(300, 250).contains("width=\"300\" height=\"250\""));

        let script = VastResource::Static {
            resource: "https://js.example.com/a.js".to_string(),
            creative_type: CreativeType::JavaScript,
        };
        assert_eq!(
            script.to_html(1, 1),
            "<script src=\"https://js.example.com/a.js\"></script>"
        );
        assert_eq!(
            script.click_through_url(Some("vast"), Some("surface")),
            Some("surface")
        );

        let image = VastResource::Static {
            resource: "https://img.example.com/a.png".to_string(),
            creative_type: CreativeType::Image,
        };
        assert!(image.to_html(1, 1).contains("<img src=\"https://img.example.com/a.png\""));
        assert_eq!(image.click_through_url(Some("vast"), Some("surface")), Some("vast"));
    }

    #[test]
    fn repeatable_trackers_stay_fireable() {
        let mut once = Tracker::new("https://a");
        let mut always = Tracker::repeatable("https://b");
        once.mark_fired();
        always.mark_fired();
        assert!(!once.is_fireable());
        assert!(always.is_fireable());
    }
}
