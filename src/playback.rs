use crate::config::PlaybackSettings;
use crate::error::{Result, VastError, VastErrorCode};
use crate::models::{ForceOrientation, Orientation, VideoConfig};
use crate::timer::RepeatingTimer;
use crate::tracking::{TrackingContext, TrackingDispatcher};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;

/// The video player driven by a [`PlaybackController`]
///
/// Positions and durations are in milliseconds.
pub trait VideoSurface: Send + Sync {
    fn set_source(&self, source: &str);
    fn start(&self);
    fn pause(&self);
    fn seek_to(&self, position_ms: u32);
    fn current_position(&self) -> u32;
    fn duration(&self) -> u32;

    /// Reload `source` after a playback error. Returns whether playback restarted.
    fn retry(&self, _source: &str) -> bool {
        false
    }
}

/// Something the UI around the video should react to
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    /// The ad was shown and its impressions fired
    Shown,
    RequestOrientation(Orientation),
    Progress { position_ms: u32, duration_ms: u32 },
    /// Time left until the ad can be skipped
    Countdown { remaining_ms: u32 },
    Skippable,
    IconShown,
    IconHidden,
    CompanionShown(Orientation),
    Completed,
    Failed,
    /// Open this URL for the user
    ClickThrough(String),
    Closed,
    Dismissed,
}

pub trait PlaybackListener: Send + Sync {
    fn on_event(&self, event: PlaybackEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Preparing,
    Playing,
    Paused,
    Completed,
    Error,
}

/// How long the user must watch before the ad can be skipped.
///
/// A valid skip offset from the ad wins. Otherwise short videos must be watched to the
/// end and longer ones for `max_skip_delay_ms`.
pub fn skip_delay_millis(config: &VideoConfig, duration_ms: u32, max_skip_delay_ms: u32) -> u32 {
    config
        .skip_offset_millis(duration_ms)
        .unwrap_or_else(|| duration_ms.min(max_skip_delay_ms))
}

/// Drives a [`VideoSurface`] through the life of one video ad and fires its trackers
///
/// While playing, a progress poller fires progress trackers and shows the icon, and a
/// countdown poller decides when the ad becomes skippable. The pollers only hold a weak
/// reference to the controller state, so dropping the controller stops them. Both
/// polls are also public so an embedder without a tokio runtime can drive them.
pub struct PlaybackController {
    inner: Arc<Mutex<PlaybackInner>>,
    listener: Arc<dyn PlaybackListener>,
    progress_timer: RepeatingTimer,
    countdown_timer: RepeatingTimer,
}

struct PlaybackInner {
    config: VideoConfig,
    source: String,
    surface: Arc<dyn VideoSurface>,
    tracking: TrackingDispatcher,
    max_skip_delay_ms: u32,
    max_media_retries: u32,

    state: PlaybackState,
    orientation: Orientation,
    duration_ms: u32,
    skip_delay_ms: u32,
    has_skip_offset: bool,
    calibrated: bool,
    skippable: bool,
    finished: bool,
    closing: bool,
    closed: bool,
    video_error: bool,
    complete_fired: bool,
    media_retries: u32,
    paused_at: Option<u32>,
    icon_visible: bool,

    events: Vec<PlaybackEvent>,
}

impl PlaybackController {
    pub fn new(
        config: VideoConfig,
        surface: Arc<dyn VideoSurface>,
        listener: Arc<dyn PlaybackListener>,
        tracking: TrackingDispatcher,
        settings: &PlaybackSettings,
        orientation: Orientation,
    ) -> Result<Self> {
        settings.validate()?;
        let source = config
            .media_source()
            .ok_or(VastError::MissingMediaSource)?
            .to_string();

        let inner = PlaybackInner {
            config,
            source,
            surface,
            tracking,
            max_skip_delay_ms: settings.max_skip_delay_ms,
            max_media_retries: settings.max_media_retries,
            state: PlaybackState::Idle,
            orientation,
            duration_ms: 0,
            skip_delay_ms: settings.max_skip_delay_ms,
            has_skip_offset: false,
            calibrated: false,
            skippable: false,
            finished: false,
            closing: false,
            closed: false,
            video_error: false,
            complete_fired: false,
            media_retries: 0,
            paused_at: None,
            icon_visible: false,
            events: Vec::new(),
        };

        Ok(PlaybackController {
            inner: Arc::new(Mutex::new(inner)),
            listener,
            progress_timer: RepeatingTimer::new(settings.progress_interval()),
            countdown_timer: RepeatingTimer::new(settings.countdown_interval()),
        })
    }

    /// Show the ad: fire impressions and hand the media source to the surface
    pub fn start(&mut self) {
        self.update(PlaybackInner::start);
    }

    /// The surface finished loading the media and knows its duration
    pub fn on_prepared(&mut self) {
        if self.update(PlaybackInner::prepared) {
            self.start_timers();
        }
    }

    pub fn pause(&mut self) {
        if self.update(PlaybackInner::pause) {
            self.stop_timers();
        }
    }

    pub fn resume(&mut self) {
        if self.update(PlaybackInner::resume) {
            self.start_timers();
        }
    }

    pub fn on_completion(&mut self) {
        self.stop_timers();
        self.update(PlaybackInner::complete);
    }

    /// The surface reported a playback error.
    ///
    /// Returns `true` when the surface is retrying and playback continues.
    pub fn on_error(&mut self) -> bool {
        let retried = self.update(PlaybackInner::error);
        if !retried {
            self.stop_timers();
        }
        retried
    }

    /// The user tapped the video. Only honoured once the ad is skippable.
    pub fn click_through(&mut self) -> Option<String> {
        self.update(PlaybackInner::click_through)
    }

    /// The user closed (or skipped) the ad
    pub fn close(&mut self) {
        self.stop_timers();
        self.update(PlaybackInner::close);
    }

    pub fn on_orientation_changed(&mut self, orientation: Orientation) {
        self.update(|inner| inner.orientation_changed(orientation));
    }

    /// The user tapped the companion ad. `surface_url` is the URL the web surface
    /// navigated to, if any.
    pub fn on_companion_clicked(&mut self, surface_url: Option<&str>) -> Option<String> {
        self.update(|inner| inner.companion_clicked(surface_url))
    }

    /// The user tapped the icon. `surface_url` is the URL the web surface navigated to,
    /// if any.
    pub fn on_icon_clicked(&mut self, surface_url: Option<&str>) -> Option<String> {
        self.update(|inner| inner.icon_clicked(surface_url))
    }

    pub fn destroy(&mut self) {
        self.stop_timers();
        self.update(|inner| inner.events.push(PlaybackEvent::Dismissed));
    }

    /// Run one progress poll. Returns `false` once the video is no longer playing.
    pub fn poll_progress(&self) -> bool {
        dispatch(&self.inner, self.listener.as_ref(), PlaybackInner::poll_progress)
    }

    /// Run one countdown poll. Returns `false` once the video is no longer playing.
    pub fn poll_countdown(&self) -> bool {
        dispatch(&self.inner, self.listener.as_ref(), PlaybackInner::poll_countdown)
    }

    pub fn state(&self) -> PlaybackState {
        self.inner.lock().state
    }

    pub fn is_skippable(&self) -> bool {
        self.inner.lock().skippable
    }

    pub fn skip_delay_ms(&self) -> u32 {
        self.inner.lock().skip_delay_ms
    }

    pub fn has_skip_offset(&self) -> bool {
        self.inner.lock().has_skip_offset
    }

    pub fn is_icon_visible(&self) -> bool {
        self.inner.lock().icon_visible
    }

    pub fn is_polling(&self) -> bool {
        self.progress_timer.is_running() || self.countdown_timer.is_running()
    }

    /// Copy of the video config with the current fired state of its trackers
    pub fn config(&self) -> VideoConfig {
        self.inner.lock().config.clone()
    }

    fn update<R>(&self, f: impl FnOnce(&mut PlaybackInner) -> R) -> R {
        dispatch(&self.inner, self.listener.as_ref(), f)
    }

    fn start_timers(&mut self) {
        let inner = Arc::downgrade(&self.inner);
        let listener = self.listener.clone();
        self.progress_timer.start(move || match inner.upgrade() {
            Some(inner) => dispatch(&inner, listener.as_ref(), PlaybackInner::poll_progress),
            None => false,
        });

        let inner = Arc::downgrade(&self.inner);
        let listener = self.listener.clone();
        self.countdown_timer.start(move || match inner.upgrade() {
            Some(inner) => dispatch(&inner, listener.as_ref(), PlaybackInner::poll_countdown),
            None => false,
        });
    }

    fn stop_timers(&mut self) {
        self.progress_timer.stop();
        self.countdown_timer.stop();
    }
}

/// Run `f` under the lock, then deliver the events it produced with the lock released
fn dispatch<R>(
    inner: &Mutex<PlaybackInner>,
    listener: &dyn PlaybackListener,
    f: impl FnOnce(&mut PlaybackInner) -> R,
) -> R {
    let (result, events) = {
        let mut inner = inner.lock();
        let result = f(&mut inner);
        (result, std::mem::take(&mut inner.events))
    };
    for event in events {
        listener.on_event(event);
    }
    result
}

impl PlaybackInner {
    fn start(&mut self) {
        if self.state != PlaybackState::Idle {
            debug!("Ignoring start in state {:?}", self.state);
            return;
        }

        match self.config.force_orientation() {
            ForceOrientation::Portrait => self
                .events
                .push(PlaybackEvent::RequestOrientation(Orientation::Portrait)),
            ForceOrientation::Landscape => self
                .events
                .push(PlaybackEvent::RequestOrientation(Orientation::Landscape)),
            ForceOrientation::Device | ForceOrientation::Undefined => {}
        }

        let position = self.surface.current_position();
        let asset = self.config.network_media_url.as_deref();
        self.tracking.fire(
            &mut self.config.impression_trackers,
            TrackingContext::playback(position, asset),
        );
        self.events.push(PlaybackEvent::Shown);

        self.surface.set_source(&self.source);
        self.state = PlaybackState::Preparing;
    }

    fn prepared(&mut self) -> bool {
        if self.state != PlaybackState::Preparing {
            debug!("Ignoring prepared in state {:?}", self.state);
            return false;
        }

        self.duration_ms = self.surface.duration();
        self.has_skip_offset = self.config.skip_offset_millis(self.duration_ms).is_some();
        self.skip_delay_ms = skip_delay_millis(&self.config, self.duration_ms, self.max_skip_delay_ms);
        self.calibrated = true;
        info!(
            "Video prepared: {}ms long, skippable after {}ms",
            self.duration_ms, self.skip_delay_ms
        );

        self.surface.start();
        self.state = PlaybackState::Playing;
        true
    }

    fn pause(&mut self) -> bool {
        if self.state != PlaybackState::Playing {
            return false;
        }

        let position = self.surface.current_position();
        self.paused_at = Some(position);
        if !self.finished && !self.closing {
            let asset = self.config.network_media_url.as_deref();
            self.tracking.fire(
                &mut self.config.pause_trackers,
                TrackingContext::playback(position, asset),
            );
        }

        self.surface.pause();
        self.state = PlaybackState::Paused;
        true
    }

    fn resume(&mut self) -> bool {
        if self.state != PlaybackState::Paused {
            return false;
        }

        let position = self.paused_at.unwrap_or(0);
        if position > 0 {
            self.surface.seek_to(position);
        }
        self.surface.start();

        let asset = self.config.network_media_url.as_deref();
        self.tracking.fire(
            &mut self.config.resume_trackers,
            TrackingContext::playback(position, asset),
        );
        self.state = PlaybackState::Playing;
        true
    }

    fn complete(&mut self) {
        if matches!(self.state, PlaybackState::Completed | PlaybackState::Error) {
            return;
        }

        self.make_skippable();
        self.finished = true;
        self.state = PlaybackState::Completed;

        let remaining = self.config.progress_trackers.remaining_count();
        if !self.video_error && remaining == 0 && !self.complete_fired {
            self.complete_fired = true;
            let position = self.surface.current_position();
            let asset = self.config.network_media_url.as_deref();
            self.tracking.fire(
                &mut self.config.complete_trackers,
                TrackingContext::playback(position, asset),
            );
        } else if remaining > 0 {
            debug!("Not firing complete trackers, {} progress trackers never fired", remaining);
        }

        self.show_companion();
        self.events.push(PlaybackEvent::Completed);
    }

    fn error(&mut self) -> bool {
        if matches!(self.state, PlaybackState::Completed | PlaybackState::Error) {
            return false;
        }

        if self.media_retries < self.max_media_retries && self.surface.retry(&self.source) {
            self.media_retries += 1;
            warn!("Video playback failed, retry {} of {}", self.media_retries, self.max_media_retries);
            return true;
        }

        warn!("Video playback failed");
        self.make_skippable();
        self.video_error = true;
        self.state = PlaybackState::Error;

        let position = self.surface.current_position();
        let asset = self.config.network_media_url.as_deref();
        let context = TrackingContext {
            content_playhead_ms: Some(position),
            ..TrackingContext::error(VastErrorCode::GeneralLinearAdError, asset)
        };
        self.tracking.fire(&mut self.config.error_trackers, context);
        self.events.push(PlaybackEvent::Failed);
        false
    }

    fn click_through(&mut self) -> Option<String> {
        if !self.skippable {
            debug!("Ignoring click before the ad is skippable");
            return None;
        }

        self.closing = true;
        let position = self.playhead();
        let asset = self.config.network_media_url.as_deref();
        self.tracking.fire(
            &mut self.config.click_trackers,
            TrackingContext::playback(position, asset),
        );

        let url = self
            .config
            .click_through_url
            .clone()
            .filter(|url| !url.is_empty())?;
        self.events.push(PlaybackEvent::ClickThrough(url.clone()));
        Some(url)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closing = true;
        self.closed = true;

        let position = self.playhead();
        let asset = self.config.network_media_url.as_deref();
        let context = TrackingContext::playback(position, asset);
        self.tracking.fire(&mut self.config.close_trackers, context);
        if !self.finished {
            self.tracking.fire(&mut self.config.skip_trackers, context);
        }
        self.events.push(PlaybackEvent::Closed);
    }

    fn orientation_changed(&mut self, orientation: Orientation) {
        if self.orientation == orientation {
            return;
        }
        self.orientation = orientation;
        if self.finished {
            self.show_companion();
        }
    }

    fn companion_clicked(&mut self, surface_url: Option<&str>) -> Option<String> {
        let duration = self.duration_ms;
        let companion = self.config.companion_ad_mut(self.orientation)?;
        self.tracking.fire(
            &mut companion.click_trackers,
            TrackingContext::playback(duration, None),
        );

        let url = companion
            .resource
            .click_through_url(companion.click_through_url.as_deref(), surface_url)?
            .to_string();
        self.events.push(PlaybackEvent::ClickThrough(url.clone()));
        Some(url)
    }

    fn icon_clicked(&mut self, surface_url: Option<&str>) -> Option<String> {
        let position = self.surface.current_position();
        let asset = self.config.network_media_url.clone();
        let icon = self.config.icon_mut()?;
        self.tracking.fire(
            &mut icon.click_trackers,
            TrackingContext::playback(position, asset.as_deref()),
        );

        let url = icon
            .resource
            .click_through_url(icon.click_through_url.as_deref(), surface_url)?
            .to_string();
        self.events.push(PlaybackEvent::ClickThrough(url.clone()));
        Some(url)
    }

    fn poll_progress(&mut self) -> bool {
        if self.state != PlaybackState::Playing {
            return false;
        }

        let position = self.surface.current_position();
        let duration = self.surface.duration();
        self.events.push(PlaybackEvent::Progress {
            position_ms: position,
            duration_ms: duration,
        });

        let asset = self.config.network_media_url.as_deref();
        let due = self.config.progress_trackers.untriggered_before(position, duration);
        if !due.is_empty() {
            let sent = self
                .tracking
                .fire(due, TrackingContext::playback(position, asset));
            debug!("Fired {} progress tracker(s) at {}ms", sent, position);
        }

        self.update_icon(position);
        true
    }

    fn poll_countdown(&mut self) -> bool {
        if self.state != PlaybackState::Playing {
            return false;
        }

        let position = self.surface.current_position();
        if !self.skippable && position >= self.skip_delay_ms {
            self.make_skippable();
        }
        if self.calibrated && !self.skippable {
            self.events.push(PlaybackEvent::Countdown {
                remaining_ms: self.skip_delay_ms.saturating_sub(position),
            });
        }
        true
    }

    fn update_icon(&mut self, position: u32) {
        let asset = self.config.network_media_url.clone();
        let Some(icon) = self.config.icon_mut() else {
            return;
        };
        if position < icon.offset_ms {
            return;
        }

        self.tracking.fire(
            &mut icon.view_trackers,
            TrackingContext::playback(position, asset.as_deref()),
        );

        let expired = icon
            .duration_ms
            .is_some_and(|duration| position >= icon.offset_ms.saturating_add(duration));
        if expired == self.icon_visible {
            self.icon_visible = !expired;
            self.events.push(if expired {
                PlaybackEvent::IconHidden
            } else {
                PlaybackEvent::IconShown
            });
        }
    }

    fn show_companion(&mut self) {
        let orientation = self.orientation;
        let duration = self.duration_ms;
        if let Some(companion) = self.config.companion_ad_mut(orientation) {
            self.tracking.fire(
                &mut companion.creative_view_trackers,
                TrackingContext::playback(duration, None),
            );
            self.events.push(PlaybackEvent::CompanionShown(orientation));
        }
    }

    fn make_skippable(&mut self) {
        if !self.skippable {
            self.skippable = true;
            self.events.push(PlaybackEvent::Skippable);
        }
    }

    fn playhead(&self) -> u32 {
        if self.finished {
            self.duration_ms
        } else {
            self.surface.current_position()
        }
    }
}
