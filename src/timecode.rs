//! Parsing and formatting of the time offsets used by VAST attributes.
//!
//! VAST expresses offsets either as an absolute timestamp (`HH:MM:SS` or
//! `HH:MM:SS.mmm`) or as a percentage of the creative duration (`N%`).

use regex::Regex;
use std::sync::LazyLock;

static ABSOLUTE_OFFSET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{2}:\d{2}:\d{2}(\.\d{3})?$").expect("valid regex"));

static PERCENTAGE_OFFSET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^((\d{1,2})|(100))%$").expect("valid regex"));

/// Whether the value looks like `HH:MM:SS[.mmm]`
pub fn is_absolute_offset(value: &str) -> bool {
    ABSOLUTE_OFFSET.is_match(value)
}

/// Whether the value looks like `N%` with N in 0..=100
pub fn is_percentage_offset(value: &str) -> bool {
    PERCENTAGE_OFFSET.is_match(value)
}

/// Parse a colon separated offset into milliseconds.
///
/// Accepts any `H:M:S[.fff]` triple, the strict shape check is left to
/// [`is_absolute_offset`] so that icon offsets with loose formatting still parse.
pub fn parse_absolute_offset(value: &str) -> Option<u32> {
    let parts: Vec<&str> = value.trim().split(':').collect();
    if parts.len() != 3 {
        return None;
    }

    let hours: u64 = parts[0].parse().ok()?;
    let minutes: u64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }

    let second_millis = (seconds * 1000.0).round();
    if second_millis > u32::MAX as f64 {
        return None;
    }

    let millis = hours
        .checked_mul(3_600_000)?
        .checked_add(minutes.checked_mul(60_000)?)?
        .checked_add(second_millis as u64)?;
    u32::try_from(millis).ok()
}

/// Parse `N%` into a fraction in `[0, 1]`
pub fn parse_percentage(value: &str) -> Option<f32> {
    if !is_percentage_offset(value) {
        return None;
    }
    value
        .trim_end_matches('%')
        .parse::<f32>()
        .ok()
        .map(|percent| percent / 100.0)
}

/// Format a playhead position as `HH:MM:SS.mmm`
pub fn format_playhead(position_ms: u32) -> String {
    let hours = position_ms / 3_600_000;
    let minutes = (position_ms / 60_000) % 60;
    let seconds = (position_ms / 1000) % 60;
    let millis = position_ms % 1000;
    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis)
}
