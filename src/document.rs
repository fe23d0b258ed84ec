//! Typed read-only views over a parsed VAST document.
//!
//! Each view borrows an [`Element`] and exposes the values VAST processing needs.
//! Missing or malformed values come back as `None` or an empty list.

use crate::error::Result;
use crate::models::{
    AbsoluteProgressTracker, CreativeType, ForceOrientation, FractionalProgressTracker,
    ResourceType, Tracker, VastResource, VideoViewabilityTracker,
};
use crate::parser::{self, Document, Element};
use crate::timecode;
use log::debug;

// Custom extensions that ad servers append next to the VAST element
const MP_IMPRESSION_TRACKER: &str = "MP_TRACKING_URL";
const CUSTOM_CTA_TEXT: &str = "MoPubCtaText";
const CUSTOM_SKIP_TEXT: &str = "MoPubSkipText";
const CUSTOM_CLOSE_ICON: &str = "MoPubCloseIcon";
const CUSTOM_FORCE_ORIENTATION: &str = "MoPubForceOrientation";
const CUSTOM_VIEWABILITY_TRACKER: &str = "MoPubViewabilityTracker";

const MAX_CTA_TEXT_LENGTH: usize = 15;
const MAX_SKIP_TEXT_LENGTH: usize = 8;

const START_TRACKER_THRESHOLD_MS: u32 = 2000;
const CREATIVE_VIEW_TRACKER_THRESHOLD_MS: u32 = 0;
const FIRST_QUARTILE: f32 = 0.25;
const MIDPOINT: f32 = 0.5;
const THIRD_QUARTILE: f32 = 0.75;

fn trackers<'a>(elements: impl Iterator<Item = &'a Element>) -> Vec<Tracker> {
    elements.filter_map(Element::text).map(Tracker::new).collect()
}

fn repeatable_trackers<'a>(elements: impl Iterator<Item = &'a Element>) -> Vec<Tracker> {
    elements
        .filter_map(Element::text)
        .map(Tracker::repeatable)
        .collect()
}

/// A parsed VAST response
#[derive(Debug, Clone)]
pub struct VastDocument {
    document: Document,
}

impl VastDocument {
    pub fn parse(xml: &str) -> Result<VastDocument> {
        Ok(VastDocument {
            document: parser::parse_document(xml)?,
        })
    }

    /// Every `Ad` element, wherever it sits in the document
    pub fn ads(&self) -> Vec<Ad<'_>> {
        self.document
            .elements("Ad")
            .into_iter()
            .map(|element| Ad { element })
            .collect()
    }

    /// The first non-empty `Error` URL in the document
    pub fn error_tracker(&self) -> Option<Tracker> {
        self.document.first_text("Error").map(Tracker::repeatable)
    }

    pub fn mopub_impression_trackers(&self) -> Vec<Tracker> {
        self.document
            .texts(MP_IMPRESSION_TRACKER)
            .into_iter()
            .map(Tracker::new)
            .collect()
    }

    pub fn custom_cta_text(&self) -> Option<String> {
        self.document
            .first_text(CUSTOM_CTA_TEXT)
            .filter(|text| text.chars().count() <= MAX_CTA_TEXT_LENGTH)
            .map(str::to_string)
    }

    pub fn custom_skip_text(&self) -> Option<String> {
        self.document
            .first_text(CUSTOM_SKIP_TEXT)
            .filter(|text| text.chars().count() <= MAX_SKIP_TEXT_LENGTH)
            .map(str::to_string)
    }

    pub fn custom_close_icon_url(&self) -> Option<String> {
        self.document
            .first_text(CUSTOM_CLOSE_ICON)
            .map(str::to_string)
    }

    pub fn custom_force_orientation(&self) -> ForceOrientation {
        ForceOrientation::from_key(self.document.first_text(CUSTOM_FORCE_ORIENTATION))
    }

    /// The viewability tracker extension, when its URL and both attributes are valid
    pub fn viewability_tracker(&self) -> Option<VideoViewabilityTracker> {
        let element = self
            .document
            .elements(CUSTOM_VIEWABILITY_TRACKER)
            .into_iter()
            .next()?;
        let url = element.text()?;
        let viewable_playtime_ms = parse_viewable_playtime(element.attribute("viewablePlaytime")?)?;
        let percent_viewable = parse_percent_viewable(element.attribute("percentViewable")?)?;

        Some(VideoViewabilityTracker {
            viewable_playtime_ms,
            percent_viewable,
            tracker: Tracker::new(url),
        })
    }
}

/// `HH:MM:SS[.mmm]` or a plain number of seconds
fn parse_viewable_playtime(value: &str) -> Option<u32> {
    let value = value.trim();
    if timecode::is_absolute_offset(value) {
        return timecode::parse_absolute_offset(value);
    }
    match value.parse::<f64>() {
        Ok(seconds) if seconds.is_finite() && seconds >= 0.0 => Some((seconds * 1000.0) as u32),
        _ => {
            debug!("Invalid VAST viewablePlaytime format: {}", value);
            None
        }
    }
}

/// `N` or `N%`, in `[0, 100]`
fn parse_percent_viewable(value: &str) -> Option<u32> {
    match value.replace('%', "").trim().parse::<f64>() {
        Ok(percent) if (0.0..=100.0).contains(&percent) => Some(percent as u32),
        _ => {
            debug!("Invalid VAST percentViewable format: {}", value);
            None
        }
    }
}

/// An `Ad` element
#[derive(Debug, Clone, Copy)]
pub struct Ad<'a> {
    element: &'a Element,
}

impl<'a> Ad<'a> {
    pub fn id(&self) -> Option<&'a str> {
        self.element.attribute("id")
    }

    pub fn sequence(&self) -> Option<&'a str> {
        self.element.attribute("sequence")
    }

    /// Ad pods are not supported: only stand-alone ads and the first ad of a pod
    /// play. A sequence that is not an integer counts as stand-alone.
    pub fn has_playable_sequence(&self) -> bool {
        self.sequence()
            .and_then(|sequence| sequence.parse::<i32>().ok())
            .map_or(true, |sequence| sequence < 2)
    }

    pub fn in_line(&self) -> Option<AdBody<'a>> {
        self.element
            .first_child("InLine")
            .map(|element| AdBody { element })
    }

    pub fn wrapper(&self) -> Option<Wrapper<'a>> {
        self.element.first_child("Wrapper").map(|element| Wrapper {
            body: AdBody { element },
        })
    }
}

/// Content shared by `InLine` and `Wrapper` elements
#[derive(Debug, Clone, Copy)]
pub struct AdBody<'a> {
    element: &'a Element,
}

impl<'a> AdBody<'a> {
    pub fn impression_trackers(&self) -> Vec<Tracker> {
        trackers(self.element.children_named("Impression"))
    }

    pub fn error_trackers(&self) -> Vec<Tracker> {
        repeatable_trackers(self.element.children_named("Error"))
    }

    fn creatives(self) -> impl Iterator<Item = &'a Element> {
        self.element
            .first_child("Creatives")
            .into_iter()
            .flat_map(|creatives| creatives.children_named("Creative"))
    }

    pub fn linears(&self) -> Vec<Linear<'a>> {
        self.creatives()
            .filter_map(|creative| creative.first_child("Linear"))
            .map(|element| Linear { element })
            .collect()
    }

    pub fn companions(&self) -> Vec<Companion<'a>> {
        self.creatives()
            .filter_map(|creative| creative.first_child("CompanionAds"))
            .flat_map(|companion_ads| companion_ads.children_named("Companion"))
            .map(|element| Companion {
                element,
                resources: Resources { element },
            })
            .collect()
    }
}

/// A `Wrapper` element pointing at another VAST document
#[derive(Debug, Clone, Copy)]
pub struct Wrapper<'a> {
    body: AdBody<'a>,
}

impl<'a> Wrapper<'a> {
    pub fn body(&self) -> &AdBody<'a> {
        &self.body
    }

    pub fn vast_ad_tag_uri(&self) -> Option<&'a str> {
        self.body.element.child_text("VASTAdTagURI")
    }
}

/// A `Linear` creative
#[derive(Debug, Clone, Copy)]
pub struct Linear<'a> {
    element: &'a Element,
}

impl<'a> Linear<'a> {
    fn tracking_events<'e>(self, events: &'e [&'e str]) -> impl Iterator<Item = &'a Element> {
        self.element
            .first_child("TrackingEvents")
            .into_iter()
            .flat_map(move |tracking| tracking.children_with_attribute("Tracking", "event", events))
    }

    fn event_urls(self, events: &[&str]) -> Vec<&'a str> {
        self.tracking_events(events).filter_map(Element::text).collect()
    }

    /// Start trackers at 2s, creativeView trackers at 0 and `progress` trackers with an
    /// absolute offset
    pub fn absolute_progress_trackers(&self) -> Vec<AbsoluteProgressTracker> {
        let mut trackers: Vec<AbsoluteProgressTracker> = self
            .event_urls(&["start"])
            .into_iter()
            .map(|url| AbsoluteProgressTracker::new(url, START_TRACKER_THRESHOLD_MS))
            .collect();

        for progress in self.tracking_events(&["progress"]) {
            let (Some(offset), Some(url)) = (progress.attribute("offset"), progress.text()) else {
                continue;
            };
            let offset = offset.trim();
            if !timecode::is_absolute_offset(offset) {
                continue;
            }
            match timecode::parse_absolute_offset(offset) {
                Some(threshold) => trackers.push(AbsoluteProgressTracker::new(url, threshold)),
                None => debug!("Failed to parse VAST progress tracker {}", offset),
            }
        }

        trackers.extend(
            self.event_urls(&["creativeView"])
                .into_iter()
                .map(|url| AbsoluteProgressTracker::new(url, CREATIVE_VIEW_TRACKER_THRESHOLD_MS)),
        );
        trackers.sort_by_key(|tracker| tracker.threshold_ms);
        trackers
    }

    /// Quartile trackers and `progress` trackers with a percentage offset
    pub fn fractional_progress_trackers(&self) -> Vec<FractionalProgressTracker> {
        let mut trackers = Vec::new();
        for (event, fraction) in [
            ("firstQuartile", FIRST_QUARTILE),
            ("midpoint", MIDPOINT),
            ("thirdQuartile", THIRD_QUARTILE),
        ] {
            for url in self.tracking_events(&[event]).filter_map(Element::text) {
                trackers.push(FractionalProgressTracker::new(url, fraction));
            }
        }

        for progress in self.tracking_events(&["progress"]) {
            let (Some(offset), Some(url)) = (progress.attribute("offset"), progress.text()) else {
                continue;
            };
            if let Some(fraction) = timecode::parse_percentage(offset.trim()) {
                trackers.push(FractionalProgressTracker::new(url, fraction));
            }
        }

        trackers.sort_by(|a, b| a.fraction.total_cmp(&b.fraction));
        trackers
    }

    pub fn pause_trackers(&self) -> Vec<Tracker> {
        repeatable_trackers(self.tracking_events(&["pause"]))
    }

    pub fn resume_trackers(&self) -> Vec<Tracker> {
        repeatable_trackers(self.tracking_events(&["resume"]))
    }

    pub fn complete_trackers(&self) -> Vec<Tracker> {
        trackers(self.tracking_events(&["complete"]))
    }

    /// `close` trackers followed by `closeLinear` trackers
    pub fn close_trackers(&self) -> Vec<Tracker> {
        let mut close = trackers(self.tracking_events(&["close"]));
        close.extend(trackers(self.tracking_events(&["closeLinear"])));
        close
    }

    pub fn skip_trackers(&self) -> Vec<Tracker> {
        trackers(self.tracking_events(&["skip"]))
    }

    pub fn click_through_url(&self) -> Option<&'a str> {
        self.element.first_child("VideoClicks")?.child_text("ClickThrough")
    }

    pub fn click_trackers(&self) -> Vec<Tracker> {
        self.element
            .first_child("VideoClicks")
            .map(|clicks| trackers(clicks.children_named("ClickTracking")))
            .unwrap_or_default()
    }

    pub fn skip_offset(&self) -> Option<&'a str> {
        self.element
            .attribute("skipoffset")
            .map(str::trim)
            .filter(|offset| !offset.is_empty())
    }

    pub fn media_files(&self) -> Vec<MediaFile<'a>> {
        self.element
            .first_child("MediaFiles")
            .into_iter()
            .flat_map(|files| files.children_named("MediaFile"))
            .map(|element| MediaFile { element })
            .collect()
    }

    pub fn icons(&self) -> Vec<Icon<'a>> {
        self.element
            .first_child("Icons")
            .into_iter()
            .flat_map(|icons| icons.children_named("Icon"))
            .map(|element| Icon {
                element,
                resources: Resources { element },
            })
            .collect()
    }
}

/// A `MediaFile` candidate
#[derive(Debug, Clone, Copy)]
pub struct MediaFile<'a> {
    element: &'a Element,
}

impl<'a> MediaFile<'a> {
    pub fn mime_type(&self) -> Option<&'a str> {
        self.element.attribute("type")
    }

    pub fn url(&self) -> Option<&'a str> {
        self.element.text()
    }

    pub fn width(&self) -> Option<i32> {
        self.element.attribute_as_int("width")
    }

    pub fn height(&self) -> Option<i32> {
        self.element.attribute_as_int("height")
    }
}

/// The `StaticResource`, `HTMLResource` and `IFrameResource` children of a companion or
/// icon
#[derive(Debug, Clone, Copy)]
pub struct Resources<'a> {
    element: &'a Element,
}

impl<'a> Resources<'a> {
    pub fn static_resource(&self) -> Option<&'a str> {
        self.element.child_text("StaticResource")
    }

    /// Lower-cased `creativeType` of the static resource
    pub fn static_creative_type(&self) -> Option<String> {
        self.element
            .first_child("StaticResource")?
            .attribute("creativeType")
            .map(|mime| mime.trim().to_ascii_lowercase())
    }

    pub fn html_resource(&self) -> Option<&'a str> {
        self.element.child_text("HTMLResource")
    }

    pub fn iframe_resource(&self) -> Option<&'a str> {
        self.element.child_text("IFrameResource")
    }

    pub fn has_any(&self) -> bool {
        self.static_resource().is_some()
            || self.html_resource().is_some()
            || self.iframe_resource().is_some()
    }

    /// Build a resource of the requested kind, if the element carries a usable one
    pub fn resource(&self, kind: ResourceType) -> Option<VastResource> {
        match kind {
            ResourceType::Static => {
                let resource = self.static_resource()?;
                let creative_type = CreativeType::from_mime(&self.static_creative_type()?)?;
                Some(VastResource::Static {
                    resource: resource.to_string(),
                    creative_type,
                })
            }
            ResourceType::Html => self.html_resource().map(|resource| VastResource::Html {
                resource: resource.to_string(),
            }),
            ResourceType::IFrame => self.iframe_resource().map(|resource| VastResource::IFrame {
                resource: resource.to_string(),
            }),
        }
    }
}

/// A `Companion` element
#[derive(Debug, Clone, Copy)]
pub struct Companion<'a> {
    element: &'a Element,
    resources: Resources<'a>,
}

impl<'a> Companion<'a> {
    pub fn width(&self) -> Option<i32> {
        self.element.attribute_as_int("width")
    }

    pub fn height(&self) -> Option<i32> {
        self.element.attribute_as_int("height")
    }

    pub fn ad_slot_id(&self) -> Option<&'a str> {
        self.element.attribute("adSlotID")
    }

    pub fn resources(&self) -> &Resources<'a> {
        &self.resources
    }

    pub fn click_through_url(&self) -> Option<&'a str> {
        self.element.child_text("CompanionClickThrough")
    }

    pub fn click_trackers(&self) -> Vec<Tracker> {
        trackers(self.element.children_named("CompanionClickTracking"))
    }

    pub fn creative_view_trackers(&self) -> Vec<Tracker> {
        self.element
            .first_child("TrackingEvents")
            .map(|tracking| {
                trackers(tracking.children_with_attribute("Tracking", "event", &["creativeView"]))
            })
            .unwrap_or_default()
    }
}

/// An `Icon` element
#[derive(Debug, Clone, Copy)]
pub struct Icon<'a> {
    element: &'a Element,
    resources: Resources<'a>,
}

impl<'a> Icon<'a> {
    pub fn width(&self) -> Option<i32> {
        self.element.attribute_as_int("width")
    }

    pub fn height(&self) -> Option<i32> {
        self.element.attribute_as_int("height")
    }

    pub fn offset_ms(&self) -> Option<u32> {
        self.time_attribute("offset")
    }

    pub fn duration_ms(&self) -> Option<u32> {
        self.time_attribute("duration")
    }

    fn time_attribute(&self, name: &str) -> Option<u32> {
        let value = self.element.attribute(name)?;
        let parsed = timecode::parse_absolute_offset(value);
        if parsed.is_none() {
            debug!("Invalid VAST icon {} format: {}", name, value);
        }
        parsed
    }

    pub fn resources(&self) -> &Resources<'a> {
        &self.resources
    }

    pub fn click_trackers(&self) -> Vec<Tracker> {
        self.element
            .first_child("IconClicks")
            .map(|clicks| trackers(clicks.children_named("IconClickTracking")))
            .unwrap_or_default()
    }

    pub fn click_through_url(&self) -> Option<&'a str> {
        self.element.first_child("IconClicks")?.child_text("IconClickThrough")
    }

    pub fn view_trackers(&self) -> Vec<Tracker> {
        trackers(self.element.children_named("IconViewTracking"))
    }
}
