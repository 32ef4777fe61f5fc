//! §4.3 pattern family shapes, shared by the four CEP matchers.

use serde::{Deserialize, Serialize};

use crate::duration::DurationMs;
use crate::event_store::{matches_filter, topic_matches, Event};

/// §4.3.5 event matcher: topic (with wildcards) plus an optional filter.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EventMatcher {
    pub topic: String,
    #[serde(default)]
    pub filter: Option<serde_json::Value>,
}

impl EventMatcher {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            filter: None,
        }
    }

    pub fn with_filter(topic: impl Into<String>, filter: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            filter: Some(filter),
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        topic_matches(&self.topic, &event.topic) && matches_filter(&event.data, self.filter.as_ref())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    #[default]
    Gte,
    Lte,
    Eq,
}

impl Comparison {
    pub fn compare_i64(self, value: i64, threshold: i64) -> bool {
        match self {
            Comparison::Gte => value >= threshold,
            Comparison::Lte => value <= threshold,
            Comparison::Eq => value == threshold,
        }
    }

    pub fn compare_f64(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Gte => value >= threshold,
            Comparison::Lte => value <= threshold,
            Comparison::Eq => (value - threshold).abs() < f64::EPSILON,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

/// §4.3.1–§4.3.4: the closed set of pattern shapes. `type` discriminates at
/// the wire/config boundary (§6 rule shape); the processor does an exhaustive
/// match on this tag (§9 design notes).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Pattern {
    Sequence {
        matchers: Vec<EventMatcher>,
        within: DurationMs,
        #[serde(default)]
        group_by: Option<String>,
        #[serde(default)]
        strict: bool,
    },
    Absence {
        after: EventMatcher,
        expected: EventMatcher,
        within: DurationMs,
        #[serde(default)]
        group_by: Option<String>,
    },
    Count {
        matcher: EventMatcher,
        threshold: i64,
        #[serde(default)]
        comparison: Comparison,
        window: DurationMs,
        #[serde(default)]
        group_by: Option<String>,
    },
    Aggregate {
        matcher: EventMatcher,
        field: String,
        function: AggregateFunction,
        threshold: f64,
        #[serde(default)]
        comparison: Comparison,
        window: DurationMs,
        #[serde(default)]
        group_by: Option<String>,
    },
}

impl Pattern {
    pub fn group_by(&self) -> Option<&str> {
        match self {
            Pattern::Sequence { group_by, .. }
            | Pattern::Absence { group_by, .. }
            | Pattern::Count { group_by, .. }
            | Pattern::Aggregate { group_by, .. } => group_by.as_deref(),
        }
    }
}
