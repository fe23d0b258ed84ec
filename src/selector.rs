use crate::document::{Companion, Icon, MediaFile};
use crate::models::{CompanionAdConfig, IconConfig, Orientation, ResourceType};
use log::debug;
use serde::{Deserialize, Serialize};

const ASPECT_RATIO_WEIGHT: f64 = 70.0;
const AREA_WEIGHT: f64 = 30.0;
const VIDEO_MIME_TYPES: [&str; 2] = ["video/mp4", "video/3gpp"];
const MINIMUM_COMPANION_WIDTH: i32 = 300;
const MINIMUM_COMPANION_HEIGHT: i32 = 250;
const MAXIMUM_ICON_SIZE: i32 = 300;

/// Padding a web surface adds around its content, in pixels
pub const WEBVIEW_PADDING: i32 = 16;

/// Physical screen size and pixel density
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenMetrics {
    pub width_px: u32,
    pub height_px: u32,
    pub density: f32,
}

impl Default for ScreenMetrics {
    fn default() -> Self {
        ScreenMetrics {
            width_px: 1920,
            height_px: 1080,
            density: 2.0,
        }
    }
}

impl ScreenMetrics {
    pub fn new(width_px: u32, height_px: u32, density: f32) -> Self {
        ScreenMetrics {
            width_px,
            height_px,
            density,
        }
    }

    /// Density used for conversions, 1 when the reported value is unusable
    pub fn effective_density(&self) -> f32 {
        if self.density > 0.0 && self.density.is_finite() {
            self.density
        } else {
            1.0
        }
    }

    /// Width and height with the landscape convention of width ≥ height
    pub fn landscape_px(&self) -> (u32, u32) {
        (
            self.width_px.max(self.height_px),
            self.width_px.min(self.height_px),
        )
    }

    pub fn aspect_ratio(&self) -> f64 {
        let (long, short) = self.landscape_px();
        long.max(1) as f64 / short.max(1) as f64
    }

    pub fn area_dp(&self) -> u32 {
        let (long, short) = self.landscape_px();
        let density = self.effective_density();
        ((long as f32 / density) * (short as f32 / density)) as u32
    }

    pub fn dips_to_pixels(&self, dips: i32) -> i32 {
        (dips as f32 * self.effective_density()).round() as i32
    }

    pub fn pixels_to_dips(&self, pixels: i32) -> i32 {
        (pixels as f32 / self.effective_density()).round() as i32
    }
}

/// Picks the media file, companion ads and icon that best fit the screen
#[derive(Debug, Clone, Copy)]
pub struct AssetSelector {
    screen: ScreenMetrics,
    aspect_ratio: f64,
    area_dp: f64,
}

impl AssetSelector {
    pub fn new(screen: ScreenMetrics) -> Self {
        AssetSelector {
            screen,
            aspect_ratio: screen.aspect_ratio(),
            area_dp: screen.area_dp().max(1) as f64,
        }
    }

    pub fn screen(&self) -> &ScreenMetrics {
        &self.screen
    }

    /// How far an asset is from the screen shape and size; 0 is a perfect match
    pub fn fitness(&self, width_dp: i32, height_dp: i32) -> f64 {
        let aspect_ratio = width_dp as f64 / height_dp as f64;
        let area = width_dp as f64 * height_dp as f64;
        ASPECT_RATIO_WEIGHT * (aspect_ratio / self.aspect_ratio).ln().abs()
            + AREA_WEIGHT * (area / self.area_dp).ln().abs()
    }

    /// URL of the playable media file with the best fitness
    pub fn best_media_url(&self, media_files: &[MediaFile<'_>]) -> Option<String> {
        let mut best: Option<(f64, &str)> = None;

        for media in media_files {
            let (Some(mime_type), Some(url)) = (media.mime_type(), media.url()) else {
                continue;
            };
            if !VIDEO_MIME_TYPES.contains(&mime_type) {
                continue;
            }
            let (Some(width), Some(height)) = (media.width(), media.height()) else {
                continue;
            };
            if width <= 0 || height <= 0 {
                continue;
            }

            let fitness = self.fitness(width, height);
            if best.is_none_or(|(best_fitness, _)| fitness < best_fitness) {
                best = Some((fitness, url));
            }
        }

        best.map(|(_, url)| url.to_string())
    }

    /// The best companion ad for an orientation
    ///
    /// Resource kinds are tried in priority order and the first kind that yields any
    /// candidate decides, even if a lower priority kind would fit better.
    pub fn best_companion(
        &self,
        companions: &[Companion<'_>],
        orientation: Orientation,
    ) -> Option<CompanionAdConfig> {
        for kind in ResourceType::PRIORITY {
            let mut best: Option<(f64, CompanionAdConfig)> = None;

            for companion in companions {
                let (Some(width), Some(height)) = (companion.width(), companion.height()) else {
                    continue;
                };
                if width < MINIMUM_COMPANION_WIDTH || height < MINIMUM_COMPANION_HEIGHT {
                    continue;
                }

                let Some(resource) = companion.resources().resource(kind) else {
                    continue;
                };
                let (scaled_width, scaled_height) = self.scaled_dimensions(width, height);

                let fitness = match orientation {
                    Orientation::Portrait => self.fitness(height, width),
                    Orientation::Landscape => self.fitness(width, height),
                };
                if best
                    .as_ref()
                    .is_none_or(|(best_fitness, _)| fitness < *best_fitness)
                {
                    let config = CompanionAdConfig {
                        width_dp: scaled_width.max(0) as u32,
                        height_dp: scaled_height.max(0) as u32,
                        resource,
                        click_through_url: companion.click_through_url().map(str::to_string),
                        click_trackers: companion.click_trackers(),
                        creative_view_trackers: companion.creative_view_trackers(),
                    };
                    best = Some((fitness, config));
                }
            }

            if let Some((_, config)) = best {
                return Some(config);
            }
        }

        debug!("No usable {:?} companion ad", orientation);
        None
    }

    /// The first icon with a usable size and resource, resource kinds in priority order
    pub fn best_icon(&self, icons: &[Icon<'_>]) -> Option<IconConfig> {
        for kind in ResourceType::PRIORITY {
            for icon in icons {
                let (Some(width), Some(height)) = (icon.width(), icon.height()) else {
                    continue;
                };
                if !(1..=MAXIMUM_ICON_SIZE).contains(&width)
                    || !(1..=MAXIMUM_ICON_SIZE).contains(&height)
                {
                    continue;
                }

                let Some(resource) = icon.resources().resource(kind) else {
                    continue;
                };

                return Some(IconConfig {
                    width_dp: width as u32,
                    height_dp: height as u32,
                    offset_ms: icon.offset_ms().unwrap_or(0),
                    duration_ms: icon.duration_ms(),
                    resource,
                    click_trackers: icon.click_trackers(),
                    click_through_url: icon.click_through_url().map(str::to_string),
                    view_trackers: icon.view_trackers(),
                });
            }
        }
        None
    }

    /// Shrink a resource that does not fit on the screen, keeping its aspect ratio and
    /// leaving room for the web surface padding
    pub fn scaled_dimensions(&self, width_dp: i32, height_dp: i32) -> (i32, i32) {
        let (screen_width, screen_height) = self.screen.landscape_px();
        let (screen_width, screen_height) = (screen_width as i32, screen_height as i32);

        let width_px = self.screen.dips_to_pixels(width_dp);
        let height_px = self.screen.dips_to_pixels(height_dp);
        if width_px <= screen_width && height_px <= screen_height {
            return (width_dp, height_dp);
        }

        let width_ratio = width_px as f32 / screen_width.max(1) as f32;
        let height_ratio = height_px as f32 / screen_height.max(1) as f32;

        let (x, y) = if width_ratio >= height_ratio {
            (
                screen_width - WEBVIEW_PADDING,
                (height_px as f32 / width_ratio) as i32 - WEBVIEW_PADDING,
            )
        } else {
            (
                (width_px as f32 / height_ratio) as i32 - WEBVIEW_PADDING,
                screen_height - WEBVIEW_PADDING,
            )
        };

        if x < 0 || y < 0 {
            return (width_dp, height_dp);
        }

        (self.screen.pixels_to_dips(x), self.screen.pixels_to_dips(y))
    }
}
