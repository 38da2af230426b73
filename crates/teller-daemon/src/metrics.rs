//! Prometheus metrics for the action daemon.
//!
//! Counters only: creations, redemption attempts by outcome, fraud-gate
//! blocks, and sweep reaps. The registry is owned by [`TellerMetrics`]
//! rather than the process-global default so tests can build isolated
//! instances.

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Upper bound on outcome label values; anything longer is truncated so a
/// caller cannot grow label cardinality payloads unboundedly.
pub const MAX_LABEL_VALUE_LEN: usize = 32;

/// Errors from metrics registration or encoding.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Metric registration failed (duplicate or invalid descriptor).
    #[error("failed to register metric: {0}")]
    Registration(#[from] prometheus::Error),

    /// Text encoding failed.
    #[error("failed to encode metrics: {0}")]
    Encoding(String),
}

/// Daemon metrics backed by an owned Prometheus registry.
#[derive(Debug)]
pub struct TellerMetrics {
    registry: Registry,
    actions_created_total: IntCounter,
    redemptions_total: IntCounterVec,
    fraud_blocked_total: IntCounter,
    actions_reaped_total: IntCounter,
}

impl TellerMetrics {
    /// Creates and registers the metric families.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let actions_created_total = IntCounter::with_opts(Opts::new(
            "teller_actions_created_total",
            "Pre-configured actions created",
        ))?;
        let redemptions_total = IntCounterVec::new(
            Opts::new(
                "teller_redemptions_total",
                "Redemption attempts by outcome",
            ),
            &["outcome"],
        )?;
        let fraud_blocked_total = IntCounter::with_opts(Opts::new(
            "teller_fraud_blocked_total",
            "Flagged transfers blocked by the approved-recipient gate",
        ))?;
        let actions_reaped_total = IntCounter::with_opts(Opts::new(
            "teller_actions_reaped_total",
            "Expired actions removed by sweeps and reaps",
        ))?;

        registry.register(Box::new(actions_created_total.clone()))?;
        registry.register(Box::new(redemptions_total.clone()))?;
        registry.register(Box::new(fraud_blocked_total.clone()))?;
        registry.register(Box::new(actions_reaped_total.clone()))?;

        Ok(Self {
            registry,
            actions_created_total,
            redemptions_total,
            fraud_blocked_total,
            actions_reaped_total,
        })
    }

    /// Records a successful action creation.
    pub fn action_created(&self) {
        self.actions_created_total.inc();
    }

    /// Records a redemption attempt outcome (`success` or a failure
    /// code).
    pub fn redemption(&self, outcome: &str) {
        let outcome = truncate_label(outcome);
        self.redemptions_total.with_label_values(&[outcome]).inc();
    }

    /// Records a fraud-gate block.
    pub fn fraud_blocked(&self) {
        self.fraud_blocked_total.inc();
    }

    /// Records `count` reaped expired actions.
    pub fn actions_reaped(&self, count: usize) {
        self.actions_reaped_total.inc_by(count as u64);
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode_text(&self) -> Result<String, MetricsError> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buf)
            .map_err(|e| MetricsError::Encoding(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| MetricsError::Encoding(e.to_string()))
    }
}

fn truncate_label(value: &str) -> &str {
    if value.len() > MAX_LABEL_VALUE_LEN {
        &value[..MAX_LABEL_VALUE_LEN]
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_appear_in_text_export() {
        let metrics = TellerMetrics::new().unwrap();
        metrics.action_created();
        metrics.redemption("success");
        metrics.redemption("fraud_blocked");
        metrics.fraud_blocked();
        metrics.actions_reaped(3);

        let text = metrics.encode_text().unwrap();
        assert!(text.contains("teller_actions_created_total 1"));
        assert!(text.contains("teller_redemptions_total{outcome=\"success\"} 1"));
        assert!(text.contains("teller_fraud_blocked_total 1"));
        assert!(text.contains("teller_actions_reaped_total 3"));
    }

    #[test]
    fn test_long_outcome_labels_are_truncated() {
        let metrics = TellerMetrics::new().unwrap();
        let long = "x".repeat(200);
        metrics.redemption(&long);
        let text = metrics.encode_text().unwrap();
        assert!(text.contains(&"x".repeat(MAX_LABEL_VALUE_LEN)));
        assert!(!text.contains(&"x".repeat(MAX_LABEL_VALUE_LEN + 1)));
    }
}
