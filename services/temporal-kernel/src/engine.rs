//! Wires `TimerManager` and `TemporalProcessor` together. The processor
//! holds a plain clone of the `TimerManager` to schedule/cancel its own
//! `temporal:<instanceId>` timers directly (§3 invariant d, §8 invariant 3) —
//! that is a reference, not a handle, so it creates no ownership cycle. The
//! reverse path, timer expiration resolving a pattern instance, is wired
//! through `TimerManager::set_on_expire`: the callback runs in-line inside
//! the firing task itself, so `handle_timeout` completes before that timer's
//! fire task moves on (§5 single-threaded engine-loop guarantee).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::TimerError;
use crate::event_store::Event;
use crate::processor::{Match, TemporalProcessor};
use crate::rule::Rule;
use crate::storage::SharedStorageAdapter;
use crate::timer::{TimerFired, TimerManager};

pub const TIMEOUT_TOPIC: &str = "temporal.timeout";

#[derive(Clone, Debug, Serialize, Deserialize)]
struct TimeoutPayload {
    #[serde(rename = "instanceId")]
    instance_id: Uuid,
}

pub struct Engine {
    pub timers: TimerManager,
    pub processor: TemporalProcessor,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let timers = TimerManager::new(config.timer);
        let processor = TemporalProcessor::with_retention(timers.clone(), config.retention_ms);
        wire_timeout_dispatch(&timers, &processor);
        Self { timers, processor }
    }

    pub async fn with_storage(config: EngineConfig, storage: SharedStorageAdapter) -> Result<Self, TimerError> {
        let timers = TimerManager::with_storage(config.timer, storage).await?;
        let processor = TemporalProcessor::with_retention(timers.clone(), config.retention_ms);
        wire_timeout_dispatch(&timers, &processor);
        Ok(Self { timers, processor })
    }

    pub async fn register_rule(&self, rule: Rule) -> Result<(), crate::error::ProcessorError> {
        self.processor.register_rule(rule).await
    }

    pub async fn unregister_rule(&self, rule_id: &str) -> bool {
        self.processor.unregister_rule(rule_id).await
    }

    pub async fn process_event(&self, event: Event) {
        self.processor.process_event(event).await;
    }

    pub fn subscribe_matches(&self) -> tokio::sync::broadcast::Receiver<Match> {
        self.processor.subscribe()
    }

    pub fn subscribe_timer_fired(&self) -> tokio::sync::broadcast::Receiver<TimerFired> {
        self.timers.subscribe()
    }

    pub async fn shutdown(&self) {
        self.timers.stop().await;
    }
}

/// Registers the processor's timeout handler on the shared `TimerManager`
/// (§5): every `temporal:<instanceId>` fire routes back into
/// `TemporalProcessor::handle_timeout` synchronously, before the firing
/// task reschedules or persists.
fn wire_timeout_dispatch(timers: &TimerManager, processor: &TemporalProcessor) {
    let processor = processor.clone();
    timers.set_on_expire(move |fired: TimerFired| {
        let processor = processor.clone();
        async move {
            if fired.topic != TIMEOUT_TOPIC {
                return;
            }
            let Ok(payload) = serde_json::from_value::<TimeoutPayload>(fired.data.clone()) else {
                tracing::warn!(timer = %fired.name, "malformed timeout payload, dropping");
                return;
            };
            processor.handle_timeout(payload.instance_id).await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{EventMatcher, Pattern};
    use crate::rule::Trigger;
    use std::time::Duration;

    #[tokio::test]
    async fn absence_pattern_times_out_through_the_full_engine_loop() {
        let engine = Engine::new(EngineConfig::default());
        let rule = Rule {
            id: "r1".to_string(),
            enabled: true,
            trigger: Trigger::Temporal {
                pattern: Pattern::Absence {
                    after: EventMatcher::new("cart.created"),
                    expected: EventMatcher::new("order.placed"),
                    within: crate::duration::DurationMs(30),
                    group_by: None,
                },
            },
        };
        engine.register_rule(rule).await.unwrap();
        let mut matches = engine.subscribe_matches();

        engine
            .process_event(Event::new("1", "cart.created", serde_json::json!({}), 0, "test"))
            .await;
        assert_eq!(engine.processor.get_active_instances("r1").await, 1);

        let matched = tokio::time::timeout(Duration::from_millis(500), matches.recv())
            .await
            .expect("timer fired and the processor handled the timeout")
            .unwrap();
        assert_eq!(matched.rule_id, "r1");
        assert_eq!(matched.matched_events[0].id, "1");
        assert_eq!(engine.processor.get_active_instances("r1").await, 0);
    }

    #[tokio::test]
    async fn unregister_rule_removes_its_live_instances() {
        let engine = Engine::new(EngineConfig::default());
        let rule = Rule {
            id: "r2".to_string(),
            enabled: true,
            trigger: Trigger::Temporal {
                pattern: Pattern::Sequence {
                    matchers: vec![EventMatcher::new("order.created"), EventMatcher::new("payment.received")],
                    within: crate::duration::DurationMs(60_000),
                    group_by: None,
                    strict: false,
                },
            },
        };
        engine.register_rule(rule).await.unwrap();
        engine
            .process_event(Event::new("1", "order.created", serde_json::json!({}), 0, "test"))
            .await;
        assert_eq!(engine.processor.get_active_instances("r2").await, 1);

        assert!(engine.unregister_rule("r2").await);
        assert_eq!(engine.processor.get_active_instances("r2").await, 0);
        assert!(engine.timers.get_all().await.is_empty());
    }
}
