use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AiSuggestion {
    pub code: String,
    pub confidence: f32,
    pub first_seen_at: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) first_seen: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    Inserted,
    AlreadyPresent,
    /// Offered within the window already (then accepted, rejected or evicted).
    RecentlySeen,
}

/// Bounded, time-windowed set of AI candidates awaiting an operator decision.
#[derive(Debug)]
pub struct SuggestionSet {
    entries: Vec<AiSuggestion>,
    recent: VecDeque<(String, Instant)>,
    window: Duration,
    capacity: usize,
    memory: usize,
}

impl SuggestionSet {
    pub fn new(window: Duration, capacity: usize, memory: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Vec::with_capacity(capacity),
            recent: VecDeque::new(),
            window,
            capacity,
            memory: memory.max(capacity),
        }
    }

    fn expired(&self, seen: Instant, now: Instant) -> bool {
        now.saturating_duration_since(seen) >= self.window
    }

    fn prune(&mut self, now: Instant) {
        let window = self.window;
        self.entries
            .retain(|entry| now.saturating_duration_since(entry.first_seen) < window);
        self.recent
            .retain(|(_, seen)| now.saturating_duration_since(*seen) < window);
    }

    pub fn offer(&mut self, code: &str, confidence: f32, now: Instant) -> OfferOutcome {
        self.prune(now);

        if let Some(existing) = self.entries.iter_mut().find(|entry| entry.code == code) {
            existing.confidence = existing.confidence.max(confidence);
            return OfferOutcome::AlreadyPresent;
        }
        if self
            .recent
            .iter()
            .any(|(seen_code, seen)| seen_code == code && !self.expired(*seen, now))
        {
            return OfferOutcome::RecentlySeen;
        }

        if self.entries.len() >= self.capacity {
            // Oldest first: the freshest reads are the ones worth a tap.
            self.entries.remove(0);
        }
        self.entries.push(AiSuggestion {
            code: code.to_string(),
            confidence,
            first_seen_at: Utc::now(),
            first_seen: now,
        });

        if self.recent.len() >= self.memory {
            self.recent.pop_front();
        }
        self.recent.push_back((code.to_string(), now));
        OfferOutcome::Inserted
    }

    /// Removes and returns a live entry (operator accepted it).
    pub fn take(&mut self, code: &str, now: Instant) -> Option<AiSuggestion> {
        self.prune(now);
        let index = self.entries.iter().position(|entry| entry.code == code)?;
        Some(self.entries.remove(index))
    }

    /// Drops a live entry (operator rejected it). Returns whether it was there.
    pub fn remove(&mut self, code: &str, now: Instant) -> bool {
        self.take(code, now).is_some()
    }

    pub fn entries(&mut self, now: Instant) -> Vec<AiSuggestion> {
        self.prune(now);
        self.entries.clone()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.recent.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set() -> SuggestionSet {
        SuggestionSet::new(Duration::from_secs(10), 3, 5)
    }

    #[test]
    fn same_code_twice_is_one_entry() {
        let mut suggestions = set();
        let now = Instant::now();
        assert_eq!(suggestions.offer("4006381333931", 0.81, now), OfferOutcome::Inserted);
        assert_eq!(
            suggestions.offer("4006381333931", 0.85, now + Duration::from_secs(3)),
            OfferOutcome::AlreadyPresent
        );

        let entries = suggestions.entries(now + Duration::from_secs(4));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].confidence, 0.85);
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut suggestions = set();
        let now = Instant::now();
        for (i, code) in ["11111111", "22222222", "33333333", "44444444"].iter().enumerate() {
            suggestions.offer(code, 0.9, now + Duration::from_millis(i as u64 * 100));
        }
        let entries = suggestions.entries(now + Duration::from_secs(1));
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].code, "22222222");
        assert_eq!(entries[2].code, "44444444");
    }

    #[test]
    fn entries_expire_after_window() {
        let mut suggestions = set();
        let now = Instant::now();
        suggestions.offer("11111111", 0.9, now);
        suggestions.offer("22222222", 0.9, now + Duration::from_secs(6));

        let later = suggestions.entries(now + Duration::from_secs(10));
        assert_eq!(later.len(), 1);
        assert_eq!(later[0].code, "22222222");
        assert!(suggestions.entries(now + Duration::from_secs(17)).is_empty());
    }

    #[test]
    fn rejected_code_stays_quiet_for_the_window() {
        let mut suggestions = set();
        let now = Instant::now();
        suggestions.offer("11111111", 0.9, now);
        assert!(suggestions.remove("11111111", now + Duration::from_secs(1)));
        assert!(!suggestions.remove("11111111", now + Duration::from_secs(1)));

        assert_eq!(
            suggestions.offer("11111111", 0.9, now + Duration::from_secs(2)),
            OfferOutcome::RecentlySeen
        );
        assert_eq!(
            suggestions.offer("11111111", 0.9, now + Duration::from_secs(11)),
            OfferOutcome::Inserted
        );
    }

    #[test]
    fn take_returns_the_entry() {
        let mut suggestions = set();
        let now = Instant::now();
        suggestions.offer("4006381333931", 0.8, now);
        let taken = suggestions.take("4006381333931", now).unwrap();
        assert_eq!(taken.code, "4006381333931");
        assert!(suggestions.is_empty());
    }

    #[test]
    fn clear_forgets_recent_codes() {
        let mut suggestions = set();
        let now = Instant::now();
        suggestions.offer("11111111", 0.9, now);
        suggestions.clear();
        assert_eq!(suggestions.offer("11111111", 0.9, now), OfferOutcome::Inserted);
    }
}
