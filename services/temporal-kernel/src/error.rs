use thiserror::Error;

/// Errors raised at `TimerManager` call sites (§7 InvalidConfiguration / StorageFailure).
#[derive(Debug, Error)]
pub enum TimerError {
    #[error("exactly one of duration or cron must be set")]
    AmbiguousSchedule,
    #[error("repeat is mutually exclusive with cron")]
    RepeatWithCron,
    #[error("invalid duration: {0}")]
    InvalidDuration(#[from] crate::duration::DurationError),
    #[error("invalid cron expression: {0}")]
    InvalidCron(#[from] crate::cron::CronError),
    #[error("storage failure: {0}")]
    Storage(#[source] anyhow::Error),
}

/// Errors raised by `TemporalProcessor::register_rule` (§7 InvalidConfiguration).
/// `Trigger` (see `rule.rs`) currently has only the `Temporal` variant, so
/// there is no non-temporal-trigger case to reject here.
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("rule '{0}' is already registered")]
    DuplicateRule(String),
}
