//! §4.2 TimerManager — named, optionally durable scheduler with one-shot,
//! interval-repeat, and cron modes.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tokio::time as tokio_time;
use tracing::Instrument;
use uuid::Uuid;

use crate::cron;
use crate::duration::DurationMs;
use crate::error::TimerError;
use crate::storage::SharedStorageAdapter;

const METADATA_KEY: &str = "timer-manager:metadata";
const SCHEMA_VERSION: u32 = 1;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OnExpire {
    pub topic: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RepeatConfig {
    pub interval: DurationMs,
    #[serde(default)]
    pub max_count: Option<u32>,
}

/// Input to `TimerManager::set_timer` (§4.2). Exactly one of `duration`/`cron`
/// must be set; `repeat` is mutually exclusive with `cron`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TimerConfig {
    pub name: String,
    #[serde(default)]
    pub duration: Option<DurationMs>,
    #[serde(default)]
    pub cron: Option<String>,
    pub on_expire: OnExpire,
    #[serde(default)]
    pub repeat: Option<RepeatConfig>,
    /// Cron-only fire limit (§4.2 "if maxCount reached, delete"). `repeat`
    /// carries the equivalent for duration timers; the two never coexist
    /// since `cron` and `duration` are themselves mutually exclusive.
    #[serde(default)]
    pub max_count: Option<u32>,
}

impl TimerConfig {
    fn validate(&self) -> Result<(), TimerError> {
        match (&self.duration, &self.cron) {
            (Some(_), None) | (None, Some(_)) => {}
            _ => return Err(TimerError::AmbiguousSchedule),
        }
        if self.cron.is_some() && self.repeat.is_some() {
            return Err(TimerError::RepeatWithCron);
        }
        if let Some(expression) = &self.cron {
            cron::validate(expression)?;
        }
        Ok(())
    }
}

/// Public snapshot of a live timer (§3).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Timer {
    pub id: Uuid,
    pub name: String,
    pub expires_at: DateTime<Utc>,
    pub on_expire: OnExpire,
    pub repeat: Option<RepeatConfig>,
    pub cron: Option<String>,
    pub correlation_id: Option<String>,
}

/// Persisted sidecar (§3, §6). `expires_at` is carried in addition to the
/// fields spec.md enumerates — recovery step 3 needs `storedFireAt` to
/// compute remaining time, and there is no separate durable-service record
/// in this implementation to source it from (see DESIGN.md).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TimerMetadata {
    pub name: String,
    pub durable_timer_id: String,
    pub timer_id: Uuid,
    pub on_expire: OnExpire,
    pub fire_count: u64,
    pub max_count: Option<u32>,
    pub repeat_interval_ms: Option<u64>,
    pub cron_expression: Option<String>,
    pub correlation_id: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Delivered when a named timer expires; `topic`/`data` come from the
/// timer's `on_expire` payload (§6 timer expiration event convention).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimerFired {
    pub name: String,
    pub topic: String,
    pub data: serde_json::Value,
    pub correlation_id: Option<String>,
    pub fire_count: u64,
}

#[derive(Clone, Debug)]
pub struct TimerManagerConfig {
    pub server_id: String,
}

impl Default for TimerManagerConfig {
    fn default() -> Self {
        Self {
            server_id: "temporal-kernel".to_string(),
        }
    }
}

struct LiveTimer {
    timer: Timer,
    metadata: TimerMetadata,
    generation: u64,
}

/// A single synchronous handler invoked in-line inside the firing task,
/// before that task reschedules (§5: callbacks run synchronously within
/// the engine loop — the next input waits for this one to complete).
type ExpireCallback = Arc<dyn Fn(TimerFired) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

struct Inner {
    timers: RwLock<HashMap<String, LiveTimer>>,
    generation: AtomicU64,
    fired_tx: broadcast::Sender<TimerFired>,
    storage: Option<SharedStorageAdapter>,
    config: TimerManagerConfig,
    metadata_stale: AtomicBool,
    on_expire: StdRwLock<Option<ExpireCallback>>,
}

#[derive(Clone)]
pub struct TimerManager {
    inner: Arc<Inner>,
}

impl TimerManager {
    pub fn new(config: TimerManagerConfig) -> Self {
        let (fired_tx, _rx) = broadcast::channel(1024);
        Self {
            inner: Arc::new(Inner {
                timers: RwLock::new(HashMap::new()),
                generation: AtomicU64::new(0),
                fired_tx,
                storage: None,
                config,
                metadata_stale: AtomicBool::new(false),
                on_expire: StdRwLock::new(None),
            }),
        }
    }

    /// Starts in durable mode: loads persisted metadata and replays the
    /// recovery protocol (§4.2) before returning.
    pub async fn with_storage(
        config: TimerManagerConfig,
        storage: SharedStorageAdapter,
    ) -> Result<Self, TimerError> {
        let (fired_tx, _rx) = broadcast::channel(1024);
        let manager = Self {
            inner: Arc::new(Inner {
                timers: RwLock::new(HashMap::new()),
                generation: AtomicU64::new(0),
                fired_tx,
                storage: Some(storage),
                config,
                metadata_stale: AtomicBool::new(false),
                on_expire: StdRwLock::new(None),
            }),
        };
        manager.recover().await?;
        Ok(manager)
    }

    async fn recover(&self) -> Result<(), TimerError> {
        let Some(storage) = &self.inner.storage else {
            return Ok(());
        };
        let loaded = storage
            .load(METADATA_KEY)
            .await
            .map_err(TimerError::Storage)?;
        let Some(envelope) = loaded else {
            return Ok(());
        };
        let entries: Vec<TimerMetadata> = envelope
            .get("state")
            .and_then(|state| state.get("entries"))
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| TimerError::Storage(anyhow::anyhow!(e)))?
            .unwrap_or_default();

        let now = Utc::now();
        let mut timers = self.inner.timers.write().await;
        for mut metadata in entries {
            let remaining = if let Some(cron_expression) = &metadata.cron_expression {
                cron::next_fire_after(cron_expression, now).map_err(TimerError::InvalidCron)?
            } else {
                let remaining_ms = (metadata.expires_at - now).num_milliseconds().max(0);
                now + chrono::Duration::milliseconds(remaining_ms)
            };

            let timer_id = Uuid::new_v4();
            metadata.durable_timer_id = timer_id.to_string();
            metadata.expires_at = remaining;

            let timer = Timer {
                id: timer_id,
                name: metadata.name.clone(),
                expires_at: remaining,
                on_expire: metadata.on_expire.clone(),
                repeat: metadata.repeat_interval_ms.map(|interval| RepeatConfig {
                    interval: DurationMs(interval),
                    max_count: metadata.max_count,
                }),
                cron: metadata.cron_expression.clone(),
                correlation_id: metadata.correlation_id.clone(),
            };

            let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst);
            timers.insert(
                metadata.name.clone(),
                LiveTimer {
                    timer: timer.clone(),
                    metadata,
                    generation,
                },
            );
            self.spawn_fire_task(timer.name.clone(), generation, remaining);
        }
        drop(timers);
        self.persist_metadata().await;
        Ok(())
    }

    pub async fn set_timer(
        &self,
        config: TimerConfig,
        correlation_id: Option<String>,
    ) -> Result<Timer, TimerError> {
        config.validate()?;
        self.cancel_timer(&config.name).await;

        let now = Utc::now();
        let expires_at = match (&config.duration, &config.cron) {
            (Some(duration), None) => now + chrono::Duration::milliseconds(duration.0 as i64),
            (None, Some(expression)) => {
                cron::next_fire_after(expression, now).map_err(TimerError::InvalidCron)?
            }
            _ => unreachable!("validated above"),
        };

        let timer_id = Uuid::new_v4();
        let timer = Timer {
            id: timer_id,
            name: config.name.clone(),
            expires_at,
            on_expire: config.on_expire.clone(),
            repeat: config.repeat.clone(),
            cron: config.cron.clone(),
            correlation_id: correlation_id.clone(),
        };

        let metadata = TimerMetadata {
            name: config.name.clone(),
            durable_timer_id: timer_id.to_string(),
            timer_id,
            on_expire: config.on_expire,
            fire_count: 0,
            max_count: if config.cron.is_some() {
                config.max_count
            } else {
                config.repeat.as_ref().and_then(|r| r.max_count)
            },
            repeat_interval_ms: config.repeat.as_ref().map(|r| r.interval.0),
            cron_expression: config.cron,
            correlation_id,
            expires_at,
        };

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst);
        {
            let mut timers = self.inner.timers.write().await;
            timers.insert(
                config.name.clone(),
                LiveTimer {
                    timer: timer.clone(),
                    metadata,
                    generation,
                },
            );
        }

        self.spawn_fire_task(config.name, generation, expires_at);
        self.persist_metadata().await;
        Ok(timer)
    }

    pub async fn cancel_timer(&self, name: &str) -> bool {
        let removed = self.inner.timers.write().await.remove(name).is_some();
        if removed {
            self.persist_metadata().await;
        }
        removed
    }

    pub async fn get_timer(&self, name: &str) -> Option<Timer> {
        self.inner
            .timers
            .read()
            .await
            .get(name)
            .map(|live| live.timer.clone())
    }

    pub async fn get_all(&self) -> Vec<Timer> {
        self.inner
            .timers
            .read()
            .await
            .values()
            .map(|live| live.timer.clone())
            .collect()
    }

    pub async fn size(&self) -> usize {
        self.inner.timers.read().await.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TimerFired> {
        self.inner.fired_tx.subscribe()
    }

    /// Registers the engine's single expiration handler. Unlike `subscribe`
    /// (a fan-out broadcast for independent external observers), this
    /// callback is awaited synchronously inside the firing task itself
    /// (§5) — replaces any previously registered handler.
    pub fn set_on_expire<F, Fut>(&self, callback: F)
    where
        F: Fn(TimerFired) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: ExpireCallback = Arc::new(move |fired| Box::pin(callback(fired)));
        *self.inner.on_expire.write().unwrap() = Some(boxed);
    }

    pub async fn is_metadata_stale(&self) -> bool {
        self.inner.metadata_stale.load(Ordering::SeqCst)
    }

    /// Cancels every live timer handle; idempotent.
    pub async fn stop(&self) {
        self.inner.timers.write().await.clear();
    }

    fn spawn_fire_task(&self, name: String, generation: u64, fire_at: DateTime<Utc>) {
        let inner = self.inner.clone();
        let span = tracing::info_span!("timer_fire_task", timer = %name);
        tokio::spawn(
            async move {
                let remaining = remaining_duration(fire_at);
                if !remaining.is_zero() {
                    tokio_time::sleep(remaining).await;
                }
                Self::on_fire(&inner, &name, generation).await;
            }
            .instrument(span),
        );
    }

    async fn on_fire(inner: &Arc<Inner>, name: &str, generation: u64) {
        let fired = {
            let mut timers = inner.timers.write().await;
            let Some(live) = timers.get_mut(name) else {
                return;
            };
            if live.generation != generation {
                // Cancelled-and-replaced before this fire; the replacement owns the name now.
                return;
            }

            live.metadata.fire_count += 1;
            let fired = TimerFired {
                name: name.to_string(),
                topic: live.timer.on_expire.topic.clone(),
                data: live.timer.on_expire.data.clone(),
                correlation_id: live.timer.correlation_id.clone(),
                fire_count: live.metadata.fire_count,
            };

            let reached_max = live
                .metadata
                .max_count
                .is_some_and(|max| live.metadata.fire_count >= max as u64);

            if live.timer.cron.is_some() {
                if reached_max {
                    timers.remove(name);
                } else if let Ok(next) = cron::next_fire_after(
                    live.timer.cron.as_ref().unwrap(),
                    Utc::now(),
                ) {
                    live.timer.expires_at = next;
                    live.metadata.expires_at = next;
                } else {
                    timers.remove(name);
                }
            } else if live.timer.repeat.is_some() {
                if reached_max {
                    timers.remove(name);
                } else {
                    let interval = live.timer.repeat.as_ref().unwrap().interval.0;
                    let next = live.timer.expires_at + chrono::Duration::milliseconds(interval as i64);
                    live.timer.expires_at = next;
                    live.metadata.expires_at = next;
                }
            } else {
                timers.remove(name);
            }

            fired
        };

        let _ = inner.fired_tx.send(fired.clone());
        let callback = inner.on_expire.read().unwrap().clone();
        if let Some(callback) = callback {
            callback(fired).await;
        }
        Self::persist_metadata_static(inner).await;

        // Reschedule the next occurrence, if the entry is still present under
        // the same generation (not cancelled out from under us meanwhile).
        let next_fire = {
            let timers = inner.timers.read().await;
            timers
                .get(name)
                .filter(|live| live.generation == generation)
                .map(|live| live.timer.expires_at)
        };
        if let Some(next_fire) = next_fire {
            let inner = inner.clone();
            let name = name.to_string();
            let span = tracing::info_span!("timer_fire_task", timer = %name);
            tokio::spawn(
                async move {
                    let remaining = remaining_duration(next_fire);
                    if !remaining.is_zero() {
                        tokio_time::sleep(remaining).await;
                    }
                    Self::on_fire(&inner, &name, generation).await;
                }
                .instrument(span),
            );
        }
    }

    async fn persist_metadata(&self) {
        Self::persist_metadata_static(&self.inner).await;
    }

    async fn persist_metadata_static(inner: &Arc<Inner>) {
        let Some(storage) = &inner.storage else {
            return;
        };
        let entries: Vec<TimerMetadata> = inner
            .timers
            .read()
            .await
            .values()
            .map(|live| live.metadata.clone())
            .collect();
        let envelope = serde_json::json!({
            "state": {"entries": entries},
            "metadata": {
                "persistedAt": Utc::now(),
                "serverId": inner.config.server_id,
                "schemaVersion": SCHEMA_VERSION,
            },
        });
        match storage.save(METADATA_KEY, envelope).await {
            Ok(()) => inner.metadata_stale.store(false, Ordering::SeqCst),
            Err(error) => {
                tracing::warn!(?error, "failed to persist timer metadata; snapshot is stale");
                inner.metadata_stale.store(true, Ordering::SeqCst);
            }
        }
    }
}

fn remaining_duration(fire_at: DateTime<Utc>) -> StdDuration {
    let now = Utc::now();
    if fire_at <= now {
        return StdDuration::from_millis(0);
    }
    (fire_at - now).to_std().unwrap_or(StdDuration::from_millis(0))
}
