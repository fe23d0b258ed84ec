use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur while resolving or playing a VAST ad
#[derive(Error, Debug)]
pub enum VastError {
    #[error("Failed to parse XML: {0}")]
    XmlParseError(#[from] quick_xml::Error),

    #[error("Malformed XML document: {0}")]
    MalformedXml(String),

    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("URL error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("HTTP status {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Failed to decode settings: {0}")]
    SettingsDecode(#[from] serde_json::Error),

    #[error("Disk cache error: {0}")]
    CacheError(String),

    #[error("Video config has no playable media")]
    MissingMediaSource,

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Unknown error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, VastError>;

/// VAST error codes substituted into the `[ERRORCODE]` macro of error trackers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VastErrorCode {
    XmlParsingError,
    WrapperTimeout,
    NoAdsVastResponse,
    GeneralLinearAdError,
    GeneralCompanionAdError,
    UndefinedError,
}

impl VastErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            VastErrorCode::XmlParsingError => "100",
            VastErrorCode::WrapperTimeout => "301",
            VastErrorCode::NoAdsVastResponse => "303",
            VastErrorCode::GeneralLinearAdError => "400",
            VastErrorCode::GeneralCompanionAdError => "600",
            VastErrorCode::UndefinedError => "900",
        }
    }
}

impl fmt::Display for VastErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
