use crate::error::{Result, VastError};
use crate::selector::ScreenMetrics;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Maximum number of VAST redirects followed while resolving one ad
pub const MAX_TIMES_TO_FOLLOW_VAST_REDIRECT: u32 = 10;

/// Settings for resolving and pre-caching VAST ads
///
/// Every field has a default, so a settings file only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VastSettings {
    pub screen: ScreenMetrics,

    /// Redirects followed per resolution before giving up
    pub max_redirects: u32,

    /// Timeout for each fetch, in milliseconds
    pub fetch_timeout_ms: u64,

    /// Download the chosen media file before reporting the video config
    pub precache: bool,

    /// Largest media file that will be pre-cached, in bytes
    pub max_video_size_bytes: u64,

    /// Where pre-cached media files are stored
    pub cache_dir: PathBuf,

    pub playback: PlaybackSettings,
}

impl Default for VastSettings {
    fn default() -> Self {
        VastSettings {
            screen: ScreenMetrics::default(),
            max_redirects: MAX_TIMES_TO_FOLLOW_VAST_REDIRECT,
            fetch_timeout_ms: 3000,
            precache: true,
            max_video_size_bytes: 25 * 1024 * 1024,
            cache_dir: std::env::temp_dir().join("vast-video-cache"),
            playback: PlaybackSettings::default(),
        }
    }
}

impl VastSettings {
    /// Load settings from a JSON file and validate them
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let settings: VastSettings = serde_json::from_str(&contents)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.screen.width_px == 0 || self.screen.height_px == 0 {
            return Err(VastError::InvalidSettings(
                "screen dimensions must be positive".to_string(),
            ));
        }
        if self.max_redirects > MAX_TIMES_TO_FOLLOW_VAST_REDIRECT {
            return Err(VastError::InvalidSettings(format!(
                "max_redirects must be at most {}",
                MAX_TIMES_TO_FOLLOW_VAST_REDIRECT
            )));
        }
        if self.fetch_timeout_ms == 0 {
            return Err(VastError::InvalidSettings(
                "fetch_timeout_ms must be positive".to_string(),
            ));
        }
        self.playback.validate()
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

/// Timing of the playback controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    /// How often progress trackers are checked, in milliseconds
    pub progress_interval_ms: u64,

    /// How often the skip countdown is updated, in milliseconds
    pub countdown_interval_ms: u64,

    /// Videos at least this long become skippable after this many milliseconds.
    ///
    /// Defaults to 16 seconds. Shorter videos stay unskippable until they finish, and a
    /// valid `skipoffset` overrides both.
    pub max_skip_delay_ms: u32,

    /// How many times a failing video is retried before giving up
    pub max_media_retries: u32,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        PlaybackSettings {
            progress_interval_ms: 50,
            countdown_interval_ms: 250,
            max_skip_delay_ms: 16_000,
            max_media_retries: 1,
        }
    }
}

impl PlaybackSettings {
    pub fn validate(&self) -> Result<()> {
        if self.progress_interval_ms == 0 || self.countdown_interval_ms == 0 {
            return Err(VastError::InvalidSettings(
                "playback intervals must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn countdown_interval(&self) -> Duration {
        Duration::from_millis(self.countdown_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let settings = VastSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.max_redirects, 10);
        assert_eq!(settings.fetch_timeout(), Duration::from_secs(3));
        assert_eq!(settings.playback.progress_interval(), Duration::from_millis(50));
        assert_eq!(settings.playback.countdown_interval(), Duration::from_millis(250));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"precache": false, "screen": {{"width_px": 720, "height_px": 1280, "density": 3.0}}}}"#
        )
        .unwrap();

        let settings = VastSettings::from_json_file(file.path()).unwrap();
        assert!(!settings.precache);
        assert_eq!(settings.screen.height_px, 1280);
        assert_eq!(settings.max_video_size_bytes, 25 * 1024 * 1024);
        assert_eq!(settings.playback, PlaybackSettings::default());
    }

    #[test]
    fn rejects_invalid_values() {
        let settings = VastSettings {
            max_redirects: 11,
            ..VastSettings::default()
        };
        assert!(matches!(settings.validate(), Err(VastError::InvalidSettings(_))));

        let mut settings = VastSettings::default();
        settings.playback.progress_interval_ms = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn malformed_file_is_a_decode_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            VastSettings::from_json_file(file.path()),
            Err(VastError::SettingsDecode(_))
        ));
    }
}
