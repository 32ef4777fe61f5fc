//! §4.1 EventStore — an append-only, time-indexed store queryable by topic
//! pattern and time range, with bounded retention.

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// An immutable event record (§3).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: String,
    pub topic: String,
    #[serde(default)]
    pub data: serde_json::Value,
    pub timestamp: i64,
    pub source: String,
}

impl Event {
    pub fn new(
        id: impl Into<String>,
        topic: impl Into<String>,
        data: serde_json::Value,
        timestamp: i64,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            topic: topic.into(),
            data,
            timestamp,
            source: source.into(),
        }
    }
}

/// Segment-wise topic matching: `*` matches exactly one segment, `**`
/// matches one or more segments (greedy), everything else matches literally.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let pattern_segments: Vec<&str> = pattern.split('.').collect();
    let topic_segments: Vec<&str> = topic.split('.').collect();
    matches_segments(&pattern_segments, &topic_segments)
}

fn matches_segments(pattern: &[&str], topic: &[&str]) -> bool {
    match pattern.first() {
        None => topic.is_empty(),
        Some(&"**") => {
            if topic.is_empty() {
                return false;
            }
            // Greedy: prefer consuming as many segments as possible, backtrack on failure.
            (1..=topic.len())
                .rev()
                .any(|consumed| matches_segments(&pattern[1..], &topic[consumed..]))
        }
        Some(&"*") => !topic.is_empty() && matches_segments(&pattern[1..], &topic[1..]),
        Some(segment) => {
            topic.first() == Some(segment) && matches_segments(&pattern[1..], &topic[1..])
        }
    }
}

/// Deep-equal filter match against `event.data` (§4.1). `serde_json::Value`'s
/// derived `PartialEq` already recurses through nested objects and arrays.
pub fn matches_filter(data: &serde_json::Value, filter: Option<&serde_json::Value>) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    let Some(filter_map) = filter.as_object() else {
        return true;
    };
    filter_map
        .iter()
        .all(|(key, expected)| data.get(key) == Some(expected))
}

/// Null-safe dotted-path lookup, returning the segment's canonical string form.
/// A missing intermediate segment yields the empty string, never a fault.
pub fn extract_dotted_string(data: &serde_json::Value, path: &str) -> String {
    let mut current = data;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(value) => current = value,
            None => return String::new(),
        }
    }
    value_to_group_string(current)
}

/// Same dotted lookup, but returning the raw numeric value for aggregate functions.
/// Non-numeric values (including null, strings, booleans, missing paths) yield `None`.
pub fn extract_dotted_number(data: &serde_json::Value, path: &str) -> Option<f64> {
    let mut current = data;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    current.as_f64()
}

fn value_to_group_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

struct StoreState {
    events: Vec<Event>,
    retention_ms: u64,
}

/// Append-only event log. Retention is bounded by wall-clock age relative to
/// the newest stored event, wide enough to cover the largest active window.
pub struct EventStore {
    state: RwLock<StoreState>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::with_retention(u64::MAX)
    }

    pub fn with_retention(retention_ms: u64) -> Self {
        Self {
            state: RwLock::new(StoreState {
                events: Vec::new(),
                retention_ms,
            }),
        }
    }

    pub async fn store(&self, event: Event) {
        let mut state = self.state.write().await;
        state.events.push(event);
        let retention_ms = state.retention_ms;
        if retention_ms != u64::MAX {
            if let Some(newest) = state.events.last().map(|e| e.timestamp) {
                let cutoff = newest - retention_ms as i64;
                state.events.retain(|e| e.timestamp >= cutoff);
            }
        }
    }

    pub async fn get_in_time_range(
        &self,
        topic_pattern: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> Vec<Event> {
        let state = self.state.read().await;
        state
            .events
            .iter()
            .filter(|event| {
                event.timestamp >= from_ms
                    && event.timestamp <= to_ms
                    && topic_matches(topic_pattern, &event.topic)
            })
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.events.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}
