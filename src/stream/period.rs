//! Loaded period tracking
//!
//! The server replays cards for a requested business period. The client
//! remembers one contiguous window that is known to be loaded and, for each
//! new request, asks only for what is missing:
//!
//! ```text
//!   loaded:            [=========]
//!   request:      [--------------------]   -> fetch whole request
//!   request:      [-------]                -> fetch [start, loaded.start]
//!   request:                 [-------]     -> fetch [loaded.end, end]
//!   request:             [---]             -> nothing to fetch
//! ```

use serde::{Deserialize, Serialize};

/// A fetch to issue, tied to the window generation it was computed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodRequest {
    pub start: i64,
    pub end: i64,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    start: i64,
    end: i64,
}

/// Single loaded interval plus the last requested one
#[derive(Debug, Default, Clone)]
pub struct SubscriptionPeriod {
    requested: Option<Window>,
    loaded: Option<Window>,
    generation: u64,
}

impl SubscriptionPeriod {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a requested window and compute the minimal fetch for it
    pub fn request(&mut self, start: i64, end: i64) -> Option<PeriodRequest> {
        let requested = Window { start, end };
        if self.requested == Some(requested) {
            return None;
        }
        self.requested = Some(requested);

        let (start, end) = match self.loaded {
            None => (start, end),
            Some(loaded) if start < loaded.start && end > loaded.end => (start, end),
            Some(loaded) if start < loaded.start => (start, loaded.start),
            Some(loaded) if end > loaded.end => (loaded.end, end),
            Some(_) => return None,
        };

        Some(PeriodRequest {
            start,
            end,
            generation: self.generation,
        })
    }

    /// Extend the loaded window with a successful fetch.
    ///
    /// Returns false, leaving the window untouched, when the request was
    /// issued before the last reset.
    pub fn mark_loaded(&mut self, request: &PeriodRequest) -> bool {
        if request.generation != self.generation {
            return false;
        }
        self.loaded = Some(match self.loaded {
            None => Window {
                start: request.start,
                end: request.end,
            },
            Some(loaded) => Window {
                start: loaded.start.min(request.start),
                end: loaded.end.max(request.end),
            },
        });
        true
    }

    /// Forget the last requested window after `request` failed, so that
    /// asking for the same window again issues a new fetch.
    ///
    /// Completions from before the last reset are ignored.
    pub fn clear_requested(&mut self, request: &PeriodRequest) {
        if request.generation == self.generation {
            self.requested = None;
        }
    }

    /// Forget everything and invalidate in-flight fetches
    pub fn reset(&mut self) {
        self.requested = None;
        self.loaded = None;
        self.generation += 1;
    }

    pub fn loaded(&self) -> Option<(i64, i64)> {
        self.loaded.map(|w| (w.start, w.end))
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(request: Option<PeriodRequest>) -> Option<(i64, i64)> {
        request.map(|r| (r.start, r.end))
    }

    #[test]
    fn test_widening_fetches_only_the_delta() {
        let mut period = SubscriptionPeriod::new();

        let first = period.request(100, 200).unwrap();
        assert_eq!((first.start, first.end), (100, 200));
        assert!(period.mark_loaded(&first));

        let prefix = period.request(50, 200).unwrap();
        assert_eq!((prefix.start, prefix.end), (50, 100));
        assert!(period.mark_loaded(&prefix));
        assert_eq!(period.loaded(), Some((50, 200)));

        assert_eq!(period.request(50, 200), None);
    }

    #[test]
    fn test_suffix_superset_and_contained() {
        let mut period = SubscriptionPeriod::new();
        let first = period.request(100, 200).unwrap();
        period.mark_loaded(&first);

        assert_eq!(span(period.request(150, 300)), Some((200, 300)));
        assert_eq!(span(period.request(0, 400)), Some((0, 400)));
        assert_eq!(span(period.request(120, 180)), None);
        // Exact loaded bounds are already covered
        assert_eq!(span(period.request(100, 200)), None);
    }

    #[test]
    fn test_failed_fetch_is_retried() {
        let mut period = SubscriptionPeriod::new();
        let failed = period.request(100, 200).unwrap();
        period.clear_requested(&failed);

        assert_eq!(span(period.request(100, 200)), Some((100, 200)));
        assert_eq!(period.loaded(), None);
    }

    #[test]
    fn test_duplicate_skipped_while_in_flight() {
        let mut period = SubscriptionPeriod::new();
        assert!(period.request(100, 200).is_some());
        assert_eq!(period.request(100, 200), None);
    }

    #[test]
    fn test_stale_failure_keeps_requested_window() {
        let mut period = SubscriptionPeriod::new();
        let stale = period.request(100, 200).unwrap();
        period.reset();
        let fresh = period.request(300, 400).unwrap();

        period.clear_requested(&stale);
        assert_eq!(period.request(300, 400), None);
        assert!(period.mark_loaded(&fresh));
    }

    #[test]
    fn test_reset_discards_stale_completion() {
        let mut period = SubscriptionPeriod::new();
        let stale = period.request(100, 200).unwrap();
        period.reset();

        assert!(!period.mark_loaded(&stale));
        assert_eq!(period.loaded(), None);

        let fresh = period.request(100, 200).unwrap();
        assert_eq!(fresh.generation, 1);
        assert!(period.mark_loaded(&fresh));
    }
}
