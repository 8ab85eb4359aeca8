use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide gateway counters
///
/// Thread-safe atomic counters; the per-model table is a [`DashMap`] so
/// concurrent requests never contend on a single lock.
#[derive(Default)]
pub struct GatewayMetrics {
    /// Routed `/v1/messages` calls
    pub requests: AtomicU64,

    /// Routed calls answered as SSE
    pub streamed_requests: AtomicU64,

    /// Calls relayed untouched while routing was disabled
    pub forwarded_requests: AtomicU64,

    /// Requests rejected because the model could not be routed
    pub unresolved_models: AtomicU64,

    /// Non-2xx or transport failures from a backend
    pub upstream_errors: AtomicU64,

    /// Upstream calls that hit the timeout ceiling
    pub timeouts: AtomicU64,

    /// Content blocks or schemas dropped or normalized during translation
    pub degraded_translations: AtomicU64,

    /// Requests whose max_tokens exceeded the backend ceiling
    pub clamped_max_tokens: AtomicU64,

    /// Tool calls carried across in either direction
    pub tool_calls_translated: AtomicU64,

    per_model: DashMap<String, u64>,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, qualified_model: &str, streamed: bool) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if streamed {
            self.streamed_requests.fetch_add(1, Ordering::Relaxed);
        }
        *self.per_model.entry(qualified_model.to_string()).or_insert(0) += 1;
    }

    pub fn record_forward(&self) {
        self.forwarded_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unresolved(&self) {
        self.unresolved_models.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upstream_error(&self) {
        self.upstream_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_degraded(&self) {
        self.degraded_translations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_clamp(&self) {
        self.clamped_max_tokens.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tool_calls(&self, count: usize) {
        self.tool_calls_translated
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Get snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            streamed_requests: self.streamed_requests.load(Ordering::Relaxed),
            forwarded_requests: self.forwarded_requests.load(Ordering::Relaxed),
            unresolved_models: self.unresolved_models.load(Ordering::Relaxed),
            upstream_errors: self.upstream_errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            degraded_translations: self.degraded_translations.load(Ordering::Relaxed),
            clamped_max_tokens: self.clamped_max_tokens.load(Ordering::Relaxed),
            tool_calls_translated: self.tool_calls_translated.load(Ordering::Relaxed),
            per_model: self
                .per_model
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
        }
    }

    /// Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.requests,
            &self.streamed_requests,
            &self.forwarded_requests,
            &self.unresolved_models,
            &self.upstream_errors,
            &self.timeouts,
            &self.degraded_translations,
            &self.clamped_max_tokens,
            &self.tool_calls_translated,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.per_model.clear();
    }
}

/// Immutable snapshot of metrics at a point in time
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub streamed_requests: u64,
    pub forwarded_requests: u64,
    pub unresolved_models: u64,
    pub upstream_errors: u64,
    pub timeouts: u64,
    pub degraded_translations: u64,
    pub clamped_max_tokens: u64,
    pub tool_calls_translated: u64,
    pub per_model: BTreeMap<String, u64>,
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Gateway Metrics: {} requests ({} streamed, {} forwarded), {} unresolved, {} upstream errors, {} timeouts, {} degraded",
            self.requests,
            self.streamed_requests,
            self.forwarded_requests,
            self.unresolved_models,
            self.upstream_errors,
            self.timeouts,
            self.degraded_translations
        )
    }
}

lazy_static::lazy_static! {
    /// Global metrics instance
    pub static ref METRICS: GatewayMetrics = GatewayMetrics::new();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_record_requests() {
        let metrics = GatewayMetrics::new();

        metrics.record_request("openai/gpt-4.1", false);
        metrics.record_request("openai/gpt-4.1", true);
        metrics.record_request("gemini/gemini-2.5-flash", true);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests, 3);
        assert_eq!(snapshot.streamed_requests, 2);
        assert_eq!(snapshot.per_model["openai/gpt-4.1"], 2);
        assert_eq!(snapshot.per_model["gemini/gemini-2.5-flash"], 1);
    }

    #[test]
    fn test_reset() {
        let metrics = GatewayMetrics::new();

        metrics.record_request("openai/gpt-4.1", false);
        metrics.record_degraded();
        metrics.record_tool_calls(3);
        assert_eq!(metrics.tool_calls_translated.load(Ordering::Relaxed), 3);

        metrics.reset();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests, 0);
        assert_eq!(snapshot.degraded_translations, 0);
        assert!(snapshot.per_model.is_empty());
    }

    #[test]
    fn test_thread_safety() {
        let metrics = Arc::new(GatewayMetrics::new());

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let m = Arc::clone(&metrics);
                thread::spawn(move || {
                    m.record_request("anthropic/claude-sonnet-4-20250514", true);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests, 10);
        assert_eq!(snapshot.per_model["anthropic/claude-sonnet-4-20250514"], 10);
    }

    #[test]
    fn test_display_format() {
        let metrics = GatewayMetrics::new();
        metrics.record_request("openai/gpt-4.1", true);
        metrics.record_forward();
        metrics.record_unresolved();

        let output = format!("{}", metrics.snapshot());
        assert!(output.contains("1 requests"));
        assert!(output.contains("1 streamed"));
        assert!(output.contains("1 forwarded"));
        assert!(output.contains("1 unresolved"));
    }
}
