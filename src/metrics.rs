/// Metrics and telemetry for the Courier backend
///
/// Prometheus-compatible metrics for monitoring:
/// - Message sends and push relay outcomes
/// - Delivery receipts
/// - Claim workflow transitions
/// - Expiry sweeps
use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec,
    TextEncoder,
};

lazy_static! {
    /// Messages accepted for relay
    pub static ref MESSAGES_SENT_TOTAL: IntCounter = register_int_counter!(
        "messages_sent_total",
        "Total number of messages accepted for relay"
    )
    .unwrap();

    /// Push relay attempts by outcome
    pub static ref PUSH_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "push_attempts_total",
        "Total number of push relay attempts",
        &["outcome"]
    )
    .unwrap();

    /// Delivery receipts by status
    pub static ref RECEIPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "receipts_total",
        "Total number of delivery receipts applied",
        &["status"]
    )
    .unwrap();

    /// Claim workflow transitions
    pub static ref CLAIM_TRANSITIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "claim_transitions_total",
        "Total number of phone claim transitions",
        &["transition"]
    )
    .unwrap();

    /// Delivery records removed by the expiry sweeper
    pub static ref DELIVERIES_EXPIRED_TOTAL: IntCounter = register_int_counter!(
        "deliveries_expired_total",
        "Total number of delivery records removed after expiry"
    )
    .unwrap();
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Record a message accepted for relay
pub fn record_message_sent() {
    MESSAGES_SENT_TOTAL.inc();
}

/// Record a push relay attempt
pub fn record_push_attempt(success: bool) {
    PUSH_ATTEMPTS_TOTAL
        .with_label_values(&[if success { "success" } else { "failure" }])
        .inc();
}

/// Record an applied delivery receipt
pub fn record_receipt(status: &str) {
    RECEIPTS_TOTAL.with_label_values(&[status]).inc();
}

/// Record a claim workflow transition
pub fn record_claim_transition(transition: &str) {
    CLAIM_TRANSITIONS_TOTAL
        .with_label_values(&[transition])
        .inc();
}

/// Record an expiry sweep
pub fn record_expiry_sweep(purged: u64) {
    DELIVERIES_EXPIRED_TOTAL.inc_by(purged);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_message_and_push() {
        record_message_sent();
        record_push_attempt(true);
        record_push_attempt(false);

        let metrics = render_metrics();
        assert!(metrics.contains("messages_sent_total"));
        assert!(metrics.contains("push_attempts_total"));
    }

    #[test]
    fn test_record_claim_transition() {
        record_claim_transition("approved");
        let metrics = render_metrics();
        assert!(metrics.contains("claim_transitions_total"));
    }
}
