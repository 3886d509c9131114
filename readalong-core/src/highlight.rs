//! Mapping a playback position to the word that should be highlighted.

use crate::timing::WordTiming;
use std::sync::Arc;

/// Tolerances for [`resolve_highlight`], in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HighlightWindows {
    /// How early a word may light up before its start
    pub lead: f64,
    /// How long a word stays lit after its end
    pub trail: f64,
    /// Reach towards the next word when between words
    pub lookahead: f64,
    /// Reach back to the previous word when between words
    pub lookbehind: f64,
    /// Cut-off for the nearest-midpoint fallback
    pub max_midpoint_distance: f64,
}

impl Default for HighlightWindows {
    fn default() -> Self {
        Self {
            lead: 0.15,
            trail: 0.25,
            lookahead: 0.3,
            lookbehind: 0.2,
            max_midpoint_distance: 1.0,
        }
    }
}

/// Resolve the word index for playback position `t`.
///
/// Rules, first match wins:
/// 1. the first word whose window `[start - lead, end + trail]` contains `t`
/// 2. the nearest upcoming word within `lookahead`, else the latest past word
///    within `lookbehind`
/// 3. the word with the closest midpoint, if within `max_midpoint_distance`
///
/// Returns `None` when no rule applies.
#[must_use]
pub fn resolve_highlight(timings: &[WordTiming], t: f64, windows: &HighlightWindows) -> Option<usize> {
    if !t.is_finite() {
        return None;
    }

    if let Some(index) = timings
        .iter()
        .position(|w| t >= w.start - windows.lead && t <= w.end + windows.trail)
    {
        return Some(index);
    }

    let mut nearby = None;
    for (index, w) in timings.iter().enumerate() {
        if w.start > t && w.start - t <= windows.lookahead {
            nearby = Some(index);
            break;
        }
        if w.end < t && t - w.end <= windows.lookbehind {
            nearby = Some(index);
        }
    }
    if nearby.is_some() {
        return nearby;
    }

    timings
        .iter()
        .enumerate()
        .map(|(index, w)| (index, (w.midpoint() - t).abs()))
        .filter(|(_, distance)| *distance <= windows.max_midpoint_distance)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(index, _)| index)
}

/// Highlight cursor for one playback session.
///
/// Tracks the current index and reports only actual changes.
#[derive(Debug, Clone)]
pub struct HighlightTracker {
    timings: Arc<[WordTiming]>,
    windows: HighlightWindows,
    current: Option<usize>,
}

impl HighlightTracker {
    #[must_use]
    pub const fn new(timings: Arc<[WordTiming]>, windows: HighlightWindows) -> Self {
        Self {
            timings,
            windows,
            current: None,
        }
    }

    #[must_use]
    pub const fn current(&self) -> Option<usize> {
        self.current
    }

    #[must_use]
    pub fn timings(&self) -> &Arc<[WordTiming]> {
        &self.timings
    }

    /// Feed a position tick. Returns the new index when it changed.
    ///
    /// When no rule matches, the highlight is left where it is.
    pub fn update(&mut self, position: f64) -> Option<usize> {
        let resolved = resolve_highlight(&self.timings, position, &self.windows)?;
        if self.current == Some(resolved) {
            return None;
        }
        self.current = Some(resolved);
        Some(resolved)
    }

    /// Swap in new timings (e.g. after falling back to local speech) and clear the cursor
    pub fn reset(&mut self, timings: Arc<[WordTiming]>) {
        self.timings = timings;
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::{estimate_word_timings, EstimateParams};

    fn words() -> Vec<WordTiming> {
        vec![
            WordTiming::new("Pip", 0.0, 0.4),
            WordTiming::new("felt", 0.5, 0.9),
            // long pause
            WordTiming::new("scared.", 2.5, 3.0),
        ]
    }

    fn resolve(t: f64) -> Option<usize> {
        resolve_highlight(&words(), t, &HighlightWindows::default())
    }

    #[test]
    fn test_window_match() {
        assert_eq!(resolve(0.2), Some(0));
        assert_eq!(resolve(0.7), Some(1));
        assert_eq!(resolve(2.8), Some(2));
    }

    #[test]
    fn test_window_prefers_earlier_word_in_overlap() {
        // 0.45 is inside both "Pip" (trail) and "felt" (lead)
        assert_eq!(resolve(0.45), Some(0));
    }

    #[test]
    fn test_lead_tolerance() {
        assert_eq!(resolve(2.36), Some(2));
    }

    #[test]
    fn test_lookahead_to_upcoming_word() {
        // outside every window, "scared." starts 0.25s ahead
        assert_eq!(resolve(2.25), Some(2));
    }

    #[test]
    fn test_lookbehind_to_past_word() {
        let timings = vec![WordTiming::new("a", 0.0, 1.0), WordTiming::new("b", 5.0, 6.0)];
        let windows = HighlightWindows {
            trail: 0.0,
            ..HighlightWindows::default()
        };
        assert_eq!(resolve_highlight(&timings, 1.1, &windows), Some(0));
    }

    #[test]
    fn test_midpoint_fallback() {
        // 1.6 is 0.7 past "felt"'s end and 0.9 before "scared." starts
        assert_eq!(resolve(1.6), Some(1));
    }

    #[test]
    fn test_no_match_far_away() {
        assert_eq!(resolve(10.0), None);
        assert_eq!(resolve(-5.0), None);
        assert_eq!(resolve(f64::NAN), None);
        assert_eq!(resolve_highlight(&[], 0.5, &HighlightWindows::default()), None);
    }

    #[test]
    fn test_tracker_reports_changes_only() {
        let mut tracker = HighlightTracker::new(words().into(), HighlightWindows::default());
        assert_eq!(tracker.update(0.1), Some(0));
        assert_eq!(tracker.update(0.2), None);
        // Still inside "Pip"'s trail window
        assert_eq!(tracker.update(0.6), None);
        assert_eq!(tracker.update(0.7), Some(1));
        assert_eq!(tracker.current(), Some(1));
    }

    #[test]
    fn test_tracker_keeps_index_when_unresolved() {
        let mut tracker = HighlightTracker::new(words().into(), HighlightWindows::default());
        assert_eq!(tracker.update(2.7), Some(2));
        assert_eq!(tracker.update(10.0), None);
        assert_eq!(tracker.current(), Some(2));
    }

    #[test]
    fn test_tracker_reset() {
        let mut tracker = HighlightTracker::new(words().into(), HighlightWindows::default());
        tracker.update(0.1);
        tracker.reset(vec![WordTiming::new("new", 0.0, 1.0)].into());
        assert_eq!(tracker.current(), None);
        assert_eq!(tracker.timings().len(), 1);
    }

    #[test]
    fn test_index_is_non_decreasing_over_time() {
        let text = "That evening the forest animals talked about the word neighbor. \
                    A neighbor is anyone near you who needs kindness or help.";
        let timings: Arc<[WordTiming]> = estimate_word_timings(text, EstimateParams::new(2.5)).into();
        let end = timings.last().unwrap().end + 1.5;
        let mut tracker = HighlightTracker::new(timings.clone(), HighlightWindows::default());

        let mut last = None;
        let mut t = 0.0;
        while t < end {
            tracker.update(t);
            assert!(tracker.current() >= last, "highlight went backwards at {t}");
            last = tracker.current();
            t += 0.01;
        }
        assert_eq!(last, Some(timings.len() - 1));
    }
}
