//! Metrics instrumentation for the node.
//!
//! Uses the `metrics` facade; installing an exporter is the embedding
//! application's responsibility.

use metrics::{counter, gauge};

/// Metric names.
pub mod names {
    pub const MESSAGES_SENT_TOTAL: &str = "surge_node_messages_sent_total";
    pub const MESSAGES_RECEIVED_TOTAL: &str = "surge_node_messages_received_total";
    pub const ACTIONS_TOTAL: &str = "surge_node_actions_total";
    pub const NUM_CLIENTS: &str = "surge_node_num_clients";
    pub const NUM_USERS: &str = "surge_node_num_users";
    pub const NUM_CHANNELS: &str = "surge_node_num_channels";
}

/// Describe the node metrics to the installed recorder.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::MESSAGES_SENT_TOTAL,
        "Number of messages sent to the engine, by type"
    );
    metrics::describe_counter!(
        names::MESSAGES_RECEIVED_TOTAL,
        "Number of messages received from the engine, by type"
    );
    metrics::describe_counter!(names::ACTIONS_TOTAL, "Number of node actions called");
    metrics::describe_gauge!(names::NUM_CLIENTS, "Number of clients connected");
    metrics::describe_gauge!(names::NUM_USERS, "Number of unique users connected");
    metrics::describe_gauge!(
        names::NUM_CHANNELS,
        "Number of channels with one or more subscribers"
    );
}

/// Record an outbound engine message.
pub(crate) fn record_message_sent(kind: &'static str) {
    counter!(names::MESSAGES_SENT_TOTAL, "type" => kind).increment(1);
}

/// Record an inbound engine message.
pub(crate) fn record_message_received(kind: &'static str) {
    counter!(names::MESSAGES_RECEIVED_TOTAL, "type" => kind).increment(1);
}

/// Record a node action.
pub(crate) fn record_action(action: &'static str) {
    counter!(names::ACTIONS_TOTAL, "action" => action).increment(1);
}

/// Refresh the connection gauges from hub counters.
pub(crate) fn update_node_gauges(clients: usize, users: usize, channels: usize) {
    gauge!(names::NUM_CLIENTS).set(clients as f64);
    gauge!(names::NUM_USERS).set(users as f64);
    gauge!(names::NUM_CHANNELS).set(channels as f64);
}
