use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub const LLM_CALLS: &str = "briefing_llm_calls_total";
pub const LLM_FAILURES: &str = "briefing_llm_failures_total";
pub const LLM_CALL_MS: &str = "briefing_llm_call_ms";
pub const ONELINER_CACHE_HITS: &str = "briefing_oneliner_cache_hits_total";
pub const ONELINER_CACHE_MISSES: &str = "briefing_oneliner_cache_misses_total";
pub const FOCUS_RETRIES: &str = "briefing_focus_retries_total";
pub const GUARDRAIL_MASKED: &str = "briefing_guardrail_masked_total";
pub const GUARDRAIL_ROWS_DROPPED: &str = "briefing_guardrail_rows_dropped_total";
pub const GENERATED: &str = "briefing_generated_total";
pub const EMPTY: &str = "briefing_empty_total";

/// Register descriptions once per process; safe to call from every entry point.
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(LLM_CALLS, "LLM calls issued, labelled by purpose.");
        describe_counter!(LLM_FAILURES, "LLM calls that failed or timed out.");
        describe_histogram!(LLM_CALL_MS, "LLM call latency in milliseconds.");
        describe_counter!(ONELINER_CACHE_HITS, "One-liner results served from the store.");
        describe_counter!(ONELINER_CACHE_MISSES, "Articles that needed a fresh one-liner.");
        describe_counter!(FOCUS_RETRIES, "Focus draft retries, labelled by reason.");
        describe_counter!(GUARDRAIL_MASKED, "Sensitive phrase replacements.");
        describe_counter!(
            GUARDRAIL_ROWS_DROPPED,
            "by_the_numbers rows dropped as unsupported."
        );
        describe_counter!(GENERATED, "Briefings produced.");
        describe_counter!(EMPTY, "Requests that produced no briefing.");
        describe_gauge!(
            "briefing_hotspots_window_days",
            "Configured hotspot window in days."
        );
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Fails if one is already installed.
    pub fn init(window_days: u32) -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder()?;
        ensure_metrics_described();
        gauge!("briefing_hotspots_window_days").set(window_days as f64);
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
