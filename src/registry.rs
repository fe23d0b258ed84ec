use crate::models::{AbsoluteProgressTracker, FractionalProgressTracker, Tracker};
use serde::{Deserialize, Serialize};

/// Progress trackers of a video, kept sorted by threshold
///
/// Absolute and fractional trackers live in separate ascending lists so a poll can stop
/// scanning at the first threshold that has not been reached yet.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct ProgressTrackers {
    absolute: Vec<AbsoluteProgressTracker>,
    fractional: Vec<FractionalProgressTracker>,
}

impl ProgressTrackers {
    pub fn add_absolute(&mut self, trackers: Vec<AbsoluteProgressTracker>) {
        self.absolute.extend(trackers);
        self.absolute.sort_by_key(|tracker| tracker.threshold_ms);
    }

    pub fn add_fractional(&mut self, trackers: Vec<FractionalProgressTracker>) {
        self.fractional.extend(trackers);
        self.fractional
            .sort_by(|a, b| a.fraction.total_cmp(&b.fraction));
    }

    pub fn absolute(&self) -> &[AbsoluteProgressTracker] {
        &self.absolute
    }

    pub fn fractional(&self) -> &[FractionalProgressTracker] {
        &self.fractional
    }

    /// Unfired trackers whose threshold is at or before the playback position.
    ///
    /// Nothing is returned for a non-positive duration. The trackers are not marked;
    /// callers mark each one as they dispatch it.
    pub fn untriggered_before(&mut self, position_ms: u32, duration_ms: u32) -> Vec<&mut Tracker> {
        if duration_ms == 0 {
            return Vec::new();
        }
        let progress = position_ms as f32 / duration_ms as f32;

        let absolute = self
            .absolute
            .iter_mut()
            .take_while(|tracker| tracker.threshold_ms <= position_ms)
            .map(|tracker| &mut tracker.tracker);

        let fractional = self
            .fractional
            .iter_mut()
            .take_while(|tracker| tracker.fraction <= progress)
            .map(|tracker| &mut tracker.tracker);

        absolute
            .chain(fractional)
            .filter(|tracker| !tracker.fired)
            .collect()
    }

    /// Number of progress trackers that have not fired yet
    pub fn remaining_count(&self) -> usize {
        let absolute = self.absolute.iter().filter(|t| !t.tracker.fired).count();
        let fractional = self.fractional.iter().filter(|t| !t.tracker.fired).count();
        absolute + fractional
    }

    pub fn is_empty(&self) -> bool {
        self.absolute.is_empty() && self.fractional.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ProgressTrackers {
        let mut trackers = ProgressTrackers::default();
        trackers.add_absolute(vec![
            AbsoluteProgressTracker::new("https://t/start", 2000),
            AbsoluteProgressTracker::new("https://t/view", 0),
        ]);
        trackers.add_fractional(vec![
            FractionalProgressTracker::new("https://t/third", 0.75),
            FractionalProgressTracker::new("https://t/first", 0.25),
            FractionalProgressTracker::new("https://t/mid", 0.5),
        ]);
        trackers
    }

    fn urls(trackers: &[&mut Tracker]) -> Vec<String> {
        trackers.iter().map(|t| t.url.clone()).collect()
    }

    #[test]
    fn lists_are_sorted_on_insert() {
        let trackers = registry();
        let thresholds: Vec<u32> = trackers.absolute().iter().map(|t| t.threshold_ms).collect();
        assert_eq!(thresholds, vec![0, 2000]);
        let fractions: Vec<f32> = trackers.fractional().iter().map(|t| t.fraction).collect();
        assert_eq!(fractions, vec![0.25, 0.5, 0.75]);
    }

    #[test]
    fn returns_trackers_whose_threshold_passed() {
        let mut trackers = registry();
        let due = trackers.untriggered_before(5000, 10_000);
        assert_eq!(
            urls(&due),
            vec!["https://t/view", "https://t/start", "https://t/first", "https://t/mid"]
        );
    }

    #[test]
    fn fired_trackers_are_not_returned_again() {
        let mut trackers = registry();
        for tracker in trackers.untriggered_before(2500, 10_000) {
            tracker.mark_fired();
        }
        assert_eq!(trackers.remaining_count(), 3);
        let due = trackers.untriggered_before(7600, 10_000);
        assert_eq!(
            urls(&due),
            vec!["https://t/first", "https://t/mid", "https://t/third"]
        );
    }

    #[test]
    fn later_positions_never_return_fewer_unfired_trackers() {
        let mut trackers = registry();
        let mut previous = 0;
        for position in (0..=10_000).step_by(500) {
            let count = trackers.untriggered_before(position, 10_000).len();
            assert!(count >= previous);
            previous = count;
        }
    }

    #[test]
    fn zero_duration_yields_nothing() {
        let mut trackers = registry();
        assert!(trackers.untriggered_before(5000, 0).is_empty());
        assert_eq!(trackers.remaining_count(), 5);
    }
}
