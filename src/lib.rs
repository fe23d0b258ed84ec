pub mod cache;
pub mod config;
pub mod document;
pub mod downloader;
pub mod error;
pub mod fetch;
pub mod macros;
pub mod manager;
pub mod models;
pub mod parser;
pub mod playback;
pub mod registry;
pub mod selector;
pub mod timecode;
pub mod timer;
pub mod tracking;
pub mod unwrap;

pub use config::{PlaybackSettings, VastSettings};
pub use error::{Result, VastError, VastErrorCode};
pub use manager::VastManager;
pub use models::{Tracker, VideoConfig};
pub use playback::{PlaybackController, PlaybackEvent, PlaybackListener, PlaybackState, VideoSurface};
pub use unwrap::{RedirectResolver, ResolveSession};
