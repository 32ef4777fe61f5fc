//! Runtime configuration for the engine's two subsystems. Loaded from
//! environment variables by the `kernel` binary; library callers can
//! construct these directly.

use crate::timer::TimerManagerConfig;

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// How long the event store and processor windows retain events, in
    /// milliseconds. Must be at least as large as the widest pattern window
    /// a caller intends to register, or count/aggregate queries will under-count.
    pub retention_ms: u64,
    pub timer: TimerManagerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retention_ms: 24 * 60 * 60 * 1000,
            timer: TimerManagerConfig::default(),
        }
    }
}
