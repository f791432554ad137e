//! Per-client session cache for expanded sub-resources.
//!
//! Entries are only ever added during a session; [`SessionCache::clear`] is the
//! single way to drop them. Nothing here is persisted.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use serde_json::Value;

/// Keyed raw records fetched during the lifetime of one client.
#[derive(Debug, Default)]
pub struct SessionCache {
    speakers: HashMap<String, Value>,
    submission_types: HashMap<i64, Value>,
    tracks: HashMap<i64, Value>,
    /// `None` marks an answer that exists but may not be read with the current token.
    answers: HashMap<i64, Option<Value>>,
    questions: HashMap<i64, Value>,
    populated_events: HashSet<String>,
}

/// Entry counts, for logging and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub speakers: usize,
    pub submission_types: usize,
    pub tracks: usize,
    pub answers: usize,
    pub unauthorized_answers: usize,
    pub questions: usize,
    pub populated_events: usize,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn speaker(&self, code: &str) -> Option<&Value> {
        self.speakers.get(code)
    }

    pub fn insert_speaker(&mut self, code: String, record: Value) {
        self.speakers.entry(code).or_insert(record);
    }

    pub fn submission_type(&self, id: i64) -> Option<&Value> {
        self.submission_types.get(&id)
    }

    pub fn insert_submission_type(&mut self, id: i64, record: Value) {
        self.submission_types.entry(id).or_insert(record);
    }

    pub fn track(&self, id: i64) -> Option<&Value> {
        self.tracks.get(&id)
    }

    pub fn insert_track(&mut self, id: i64, record: Value) {
        self.tracks.entry(id).or_insert(record);
    }

    /// `Some(None)` means the answer was fetched before and turned out unreadable.
    pub fn answer(&self, id: i64) -> Option<Option<&Value>> {
        self.answers.get(&id).map(Option::as_ref)
    }

    pub fn insert_answer(&mut self, id: i64, record: Option<Value>) {
        self.answers.entry(id).or_insert(record);
    }

    pub fn question(&self, id: i64) -> Option<&Value> {
        self.questions.get(&id)
    }

    pub fn insert_question(&mut self, id: i64, record: Value) {
        self.questions.entry(id).or_insert(record);
    }

    pub fn is_populated(&self, event_slug: &str) -> bool {
        self.populated_events.contains(event_slug)
    }

    pub fn mark_populated(&mut self, event_slug: &str) {
        self.populated_events.insert(event_slug.to_string());
    }

    /// Drop every entry and forget which events were pre-populated.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            speakers: self.speakers.len(),
            submission_types: self.submission_types.len(),
            tracks: self.tracks.len(),
            answers: self.answers.values().filter(|a| a.is_some()).count(),
            unauthorized_answers: self.answers.values().filter(|a| a.is_none()).count(),
            questions: self.questions.len(),
            populated_events: self.populated_events.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_insert_wins() {
        let mut cache = SessionCache::new();
        cache.insert_speaker("S1".to_string(), json!({"code": "S1", "name": "Ada"}));
        cache.insert_speaker("S1".to_string(), json!({"code": "S1", "name": "Grace"}));
        assert_eq!(cache.speaker("S1"), Some(&json!({"code": "S1", "name": "Ada"})));
    }

    #[test]
    fn test_unauthorized_answers_are_remembered() {
        let mut cache = SessionCache::new();
        cache.insert_answer(9, None);
        cache.insert_answer(10, Some(json!({"id": 10})));
        assert_eq!(cache.answer(9), Some(None));
        assert_eq!(cache.answer(10), Some(Some(&json!({"id": 10}))));
        assert_eq!(cache.answer(11), None);

        let stats = cache.stats();
        assert_eq!(stats.answers, 1);
        assert_eq!(stats.unauthorized_answers, 1);
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut cache = SessionCache::new();
        cache.insert_speaker("S1".to_string(), json!({}));
        cache.insert_submission_type(42, json!({}));
        cache.insert_track(7, json!({}));
        cache.insert_question(3, json!({}));
        cache.insert_answer(9, None);
        cache.mark_populated("pyconde");
        assert!(cache.is_populated("pyconde"));

        cache.clear();

        assert_eq!(cache.stats(), CacheStats::default());
        assert!(!cache.is_populated("pyconde"));
        assert!(cache.track(7).is_none());
    }
}
