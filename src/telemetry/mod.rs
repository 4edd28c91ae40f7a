//! 遥测模块：执行计数、耗时直方图、Token/成本累计与在途执行数。
//!
//! Execution metrics.
//!
//! Counters and histograms are keyed by label tuples and kept in process
//! memory; [`ExecutionMetrics::render_prometheus`] renders them in the text
//! exposition format for whatever collector scrapes the host process.
//!
//! | Metric | Kind | Labels |
//! |--------|------|--------|
//! | `prompt_executions_total` | counter | `prompt_id`, `llm_provider`, `status` |
//! | `prompt_execution_duration_seconds` | histogram | `prompt_id`, `llm_provider` |
//! | `llm_tokens_used_total` | counter | `llm_provider`, `model` |
//! | `llm_cost_total_usd` | counter | `llm_provider`, `model` |
//! | `active_executions` | gauge | |

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::ledger::ExecutionStatus;
use crate::PromptId;

/// Upper bounds (seconds) of the duration histogram buckets.
pub const DURATION_BUCKETS: [f64; 10] = [0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

#[derive(Debug, Clone, Default)]
struct Histogram {
    buckets: [u64; DURATION_BUCKETS.len()],
    count: u64,
    sum: f64,
}

impl Histogram {
    fn observe(&mut self, value: f64) {
        for (i, bound) in DURATION_BUCKETS.iter().enumerate() {
            if value <= *bound {
                self.buckets[i] += 1;
            }
        }
        self.count += 1;
        self.sum += value;
    }
}

type ExecKey = (String, String, ExecutionStatus);
type PairKey = (String, String);

/// Shared execution metrics. All updates are safe under concurrent access.
#[derive(Debug, Default)]
pub struct ExecutionMetrics {
    active: AtomicI64,
    executions: RwLock<HashMap<ExecKey, u64>>,
    durations: RwLock<HashMap<PairKey, Histogram>>,
    tokens: RwLock<HashMap<PairKey, u64>>,
    cost: RwLock<HashMap<PairKey, f64>>,
}

// A panic while holding one of these locks leaves plain counters behind;
// the data is still usable.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl ExecutionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the in-flight gauge; the returned guard decrements it on drop.
    pub fn inflight(self: &Arc<Self>) -> InflightGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        InflightGuard {
            metrics: Arc::clone(self),
        }
    }

    pub fn active_executions(&self) -> i64 {
        self.active.load(Ordering::SeqCst)
    }

    pub fn record_execution(&self, prompt_id: PromptId, provider: &str, status: ExecutionStatus) {
        *write(&self.executions)
            .entry((prompt_id.to_string(), provider.to_string(), status))
            .or_insert(0) += 1;
    }

    pub fn observe_duration(&self, prompt_id: PromptId, provider: &str, seconds: f64) {
        write(&self.durations)
            .entry((prompt_id.to_string(), provider.to_string()))
            .or_default()
            .observe(seconds);
    }

    pub fn record_usage(&self, provider: &str, model: &str, tokens: u64, cost_usd: f64) {
        let key = (provider.to_string(), model.to_string());
        *write(&self.tokens).entry(key.clone()).or_insert(0) += tokens;
        *write(&self.cost).entry(key).or_insert(0.0) += cost_usd;
    }

    pub fn executions_total(&self, prompt_id: PromptId, provider: &str, status: ExecutionStatus) -> u64 {
        read(&self.executions)
            .get(&(prompt_id.to_string(), provider.to_string(), status))
            .copied()
            .unwrap_or(0)
    }

    /// Number of duration observations for a (prompt, provider) pair.
    pub fn duration_count(&self, prompt_id: PromptId, provider: &str) -> u64 {
        read(&self.durations)
            .get(&(prompt_id.to_string(), provider.to_string()))
            .map(|h| h.count)
            .unwrap_or(0)
    }

    pub fn tokens_total(&self, provider: &str, model: &str) -> u64 {
        read(&self.tokens)
            .get(&(provider.to_string(), model.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn cost_total(&self, provider: &str, model: &str) -> f64 {
        read(&self.cost)
            .get(&(provider.to_string(), model.to_string()))
            .copied()
            .unwrap_or(0.0)
    }

    /// Prometheus text exposition, series sorted by labels.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();

        out.push_str("# HELP prompt_executions_total Total prompt executions\n");
        out.push_str("# TYPE prompt_executions_total counter\n");
        let executions: BTreeMap<_, _> = read(&self.executions)
            .iter()
            .map(|((p, l, s), v)| ((p.clone(), l.clone(), s.as_str()), *v))
            .collect();
        for ((prompt, provider, status), v) in executions {
            let _ = writeln!(
                out,
                "prompt_executions_total{{prompt_id=\"{}\",llm_provider=\"{}\",status=\"{}\"}} {}",
                prompt, provider, status, v
            );
        }

        out.push_str("# HELP prompt_execution_duration_seconds Prompt execution duration\n");
        out.push_str("# TYPE prompt_execution_duration_seconds histogram\n");
        let durations: BTreeMap<_, _> = read(&self.durations)
            .iter()
            .map(|(k, h)| (k.clone(), h.clone()))
            .collect();
        for ((prompt, provider), h) in durations {
            let labels = format!("prompt_id=\"{}\",llm_provider=\"{}\"", prompt, provider);
            for (bound, n) in DURATION_BUCKETS.iter().zip(h.buckets.iter()) {
                let _ = writeln!(
                    out,
                    "prompt_execution_duration_seconds_bucket{{{},le=\"{}\"}} {}",
                    labels, bound, n
                );
            }
            let _ = writeln!(
                out,
                "prompt_execution_duration_seconds_bucket{{{},le=\"+Inf\"}} {}",
                labels, h.count
            );
            let _ = writeln!(out, "prompt_execution_duration_seconds_sum{{{}}} {}", labels, h.sum);
            let _ = writeln!(out, "prompt_execution_duration_seconds_count{{{}}} {}", labels, h.count);
        }

        out.push_str("# HELP llm_tokens_used_total Total tokens used\n");
        out.push_str("# TYPE llm_tokens_used_total counter\n");
        let tokens: BTreeMap<_, _> = read(&self.tokens).clone().into_iter().collect();
        for ((provider, model), v) in tokens {
            let _ = writeln!(
                out,
                "llm_tokens_used_total{{llm_provider=\"{}\",model=\"{}\"}} {}",
                provider, model, v
            );
        }

        out.push_str("# HELP llm_cost_total_usd Total LLM cost in USD\n");
        out.push_str("# TYPE llm_cost_total_usd counter\n");
        let cost: BTreeMap<_, _> = read(&self.cost).clone().into_iter().collect();
        for ((provider, model), v) in cost {
            let _ = writeln!(
                out,
                "llm_cost_total_usd{{llm_provider=\"{}\",model=\"{}\"}} {}",
                provider, model, v
            );
        }

        out.push_str("# HELP active_executions Number of active executions\n");
        out.push_str("# TYPE active_executions gauge\n");
        let _ = writeln!(out, "active_executions {}", self.active_executions());

        out
    }
}

/// Holds one unit of the in-flight gauge.
#[derive(Debug)]
pub struct InflightGuard {
    metrics: Arc<ExecutionMetrics>,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.metrics.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inflight_guard_is_symmetric() {
        let metrics = Arc::new(ExecutionMetrics::new());
        {
            let _a = metrics.inflight();
            let _b = metrics.inflight();
            assert_eq!(metrics.active_executions(), 2);
        }
        assert_eq!(metrics.active_executions(), 0);
    }

    #[test]
    fn test_guard_released_on_panic() {
        let metrics = Arc::new(ExecutionMetrics::new());
        let m = metrics.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _g = m.inflight();
            panic!("boom");
        }));
        assert!(result.is_err());
        assert_eq!(metrics.active_executions(), 0);
    }

    #[test]
    fn test_counters_accumulate() {
        let m = ExecutionMetrics::new();
        m.record_execution(1, "openai", ExecutionStatus::Success);
        m.record_execution(1, "openai", ExecutionStatus::Success);
        m.record_execution(1, "openai", ExecutionStatus::Error);
        m.record_usage("openai", "gpt-4", 1000, 0.0375);
        m.record_usage("openai", "gpt-4", 500, 0.01875);
        m.observe_duration(1, "openai", 0.3);

        assert_eq!(m.executions_total(1, "openai", ExecutionStatus::Success), 2);
        assert_eq!(m.executions_total(1, "openai", ExecutionStatus::Error), 1);
        assert_eq!(m.tokens_total("openai", "gpt-4"), 1500);
        assert!((m.cost_total("openai", "gpt-4") - 0.05625).abs() < 1e-12);
        assert_eq!(m.duration_count(1, "openai"), 1);
        assert_eq!(m.duration_count(2, "openai"), 0);
    }

    #[test]
    fn test_prometheus_rendering() {
        let m = Arc::new(ExecutionMetrics::new());
        m.record_execution(3, "claude", ExecutionStatus::Error);
        m.observe_duration(3, "claude", 0.3);
        let _g = m.inflight();
        let text = m.render_prometheus();
        assert!(text.contains(
            "prompt_executions_total{prompt_id=\"3\",llm_provider=\"claude\",status=\"error\"} 1"
        ));
        assert!(text.contains(
            "prompt_execution_duration_seconds_bucket{prompt_id=\"3\",llm_provider=\"claude\",le=\"0.25\"} 0"
        ));
        assert!(text.contains(
            "prompt_execution_duration_seconds_bucket{prompt_id=\"3\",llm_provider=\"claude\",le=\"0.5\"} 1"
        ));
        assert!(text.contains("active_executions 1"));
    }
}
