//! Lock metrics.
//!
//! Counters are emitted through the `metrics` facade; installing a recorder
//! and exporter is left to the embedding application.

use metrics::{counter, describe_counter};

/// Lock acquisition attempts, labelled by lock and outcome.
pub const LOCK_ATTEMPTS: &str = "shedlock_lock_attempts_total";

/// Lock extensions, labelled by lock and outcome.
pub const LOCK_EXTENSIONS: &str = "shedlock_lock_extensions_total";

/// Outcome label of a lock attempt or extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The lock was acquired or extended.
    Acquired,
    /// The lock is held elsewhere, or ownership was lost.
    Rejected,
    /// The backend failed; the outcome is unknown.
    Error,
}

impl Outcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Acquired => "acquired",
            Self::Rejected => "rejected",
            Self::Error => "error",
        }
    }
}

/// Registers the metric descriptions.
///
/// Call this once at application startup after initializing the metrics recorder.
pub fn register_metrics() {
    describe_counter!(LOCK_ATTEMPTS, "Total lock acquisition attempts");
    describe_counter!(LOCK_EXTENSIONS, "Total lock extension attempts");
}

/// Records one acquisition attempt.
pub fn record_attempt(lock: &str, outcome: Outcome) {
    counter!(LOCK_ATTEMPTS, "lock" => lock.to_string(), "outcome" => outcome.as_str()).increment(1);
}

/// Records one extension attempt.
pub fn record_extension(lock: &str, outcome: Outcome) {
    counter!(LOCK_EXTENSIONS, "lock" => lock.to_string(), "outcome" => outcome.as_str())
        .increment(1);
}
