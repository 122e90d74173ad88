//! Metrics emitted by the core.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! embedding binary installs a recorder.

use metrics::{counter, gauge};

/// Metric names.
pub mod names {
    pub const MESSAGES_PERSISTED: &str = "chorus_messages_persisted_total";
    pub const PERSIST_FAILURES: &str = "chorus_persist_failures_total";
    pub const DELIVERIES: &str = "chorus_deliveries_total";
    pub const SUBSCRIBERS_DROPPED: &str = "chorus_subscribers_dropped_total";
    pub const SUBSCRIBERS_ACTIVE: &str = "chorus_subscribers_active";
}

/// Describe the core metrics.
pub fn describe() {
    metrics::describe_counter!(
        names::MESSAGES_PERSISTED,
        "Messages appended to the store and broadcast"
    );
    metrics::describe_counter!(
        names::PERSIST_FAILURES,
        "Messages dropped because the store rejected them"
    );
    metrics::describe_counter!(names::DELIVERIES, "Successful deliveries to subscribers");
    metrics::describe_counter!(
        names::SUBSCRIBERS_DROPPED,
        "Subscribers unregistered after a failed delivery"
    );
    metrics::describe_gauge!(
        names::SUBSCRIBERS_ACTIVE,
        "Current number of registered subscribers"
    );
}

pub(crate) fn record_persisted() {
    counter!(names::MESSAGES_PERSISTED).increment(1);
}

pub(crate) fn record_persist_failure() {
    counter!(names::PERSIST_FAILURES).increment(1);
}

pub(crate) fn record_fanout(delivered: usize, dropped: usize) {
    counter!(names::DELIVERIES).increment(delivered as u64);
    if dropped > 0 {
        counter!(names::SUBSCRIBERS_DROPPED).increment(dropped as u64);
    }
}

pub(crate) fn set_active_subscribers(count: usize) {
    gauge!(names::SUBSCRIBERS_ACTIVE).set(count as f64);
}
