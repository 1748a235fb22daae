//! In-process counters: which auto-fixes fire, how many attempts questions
//! take, token spend and request outcomes. Served raw by the API layer.

use crate::providers::TokenUsage;
use crate::validator::ValidationRule;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::collections::BTreeMap;

#[derive(Default)]
pub struct PipelineTelemetry {
    auto_fixes: DashMap<&'static str, u64>,
    attempts: DashMap<u8, u64>,
    tokens: DashMap<&'static str, u64>,
    requests: DashMap<&'static str, u64>,
}

impl PipelineTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_fixes(&self, fixes: &[ValidationRule]) {
        for fix in fixes {
            *self.auto_fixes.entry(fix.as_str()).or_insert(0) += 1;
        }
    }

    /// Count a finished question under the number of attempts it took.
    pub fn record_attempts(&self, attempts: u8) {
        if attempts == 0 {
            return;
        }
        *self.attempts.entry(attempts).or_insert(0) += 1;
    }

    pub fn record_usage(&self, usage: &TokenUsage) {
        if usage.is_zero() {
            return;
        }
        *self.tokens.entry("input").or_insert(0) += usage.input_tokens;
        *self.tokens.entry("output").or_insert(0) += usage.output_tokens;
        *self.tokens.entry("total").or_insert(0) += usage.total_tokens;
    }

    pub fn record_outcome(&self, success: bool, rate_limited: bool) {
        *self.requests.entry("total").or_insert(0) += 1;
        let bucket = if success { "succeeded" } else { "failed" };
        *self.requests.entry(bucket).or_insert(0) += 1;
        if rate_limited {
            *self.requests.entry("rate_limited").or_insert(0) += 1;
        }
    }

    /// Point-in-time view with stable key order.
    pub fn snapshot(&self) -> Value {
        let auto_fixes: BTreeMap<String, u64> = self
            .auto_fixes
            .iter()
            .map(|e| (e.key().to_string(), *e.value()))
            .collect();
        let attempts: BTreeMap<String, u64> = self
            .attempts
            .iter()
            .map(|e| (format!("attempt_{}", e.key()), *e.value()))
            .collect();
        let tokens: BTreeMap<String, u64> = self
            .tokens
            .iter()
            .map(|e| (e.key().to_string(), *e.value()))
            .collect();
        let requests: BTreeMap<String, u64> = self
            .requests
            .iter()
            .map(|e| (e.key().to_string(), *e.value()))
            .collect();
        json!({
            "auto_fixes": auto_fixes,
            "attempts": attempts,
            "tokens": tokens,
            "requests": requests,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate_into_snapshot() {
        let telemetry = PipelineTelemetry::new();
        telemetry.record_fixes(&[ValidationRule::RootAlias, ValidationRule::PlaceholderFill]);
        telemetry.record_fixes(&[ValidationRule::RootAlias]);
        telemetry.record_attempts(1);
        telemetry.record_attempts(1);
        telemetry.record_attempts(3);
        telemetry.record_attempts(0);
        telemetry.record_usage(&TokenUsage {
            input_tokens: 100,
            output_tokens: 20,
            total_tokens: 120,
        });
        telemetry.record_outcome(true, false);
        telemetry.record_outcome(false, true);

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot["auto_fixes"]["root_alias"], 2);
        assert_eq!(snapshot["auto_fixes"]["placeholder_fill"], 1);
        assert_eq!(snapshot["attempts"]["attempt_1"], 2);
        assert_eq!(snapshot["attempts"]["attempt_3"], 1);
        assert!(snapshot["attempts"].get("attempt_0").is_none());
        assert_eq!(snapshot["tokens"]["total"], 120);
        assert_eq!(snapshot["requests"]["total"], 2);
        assert_eq!(snapshot["requests"]["succeeded"], 1);
        assert_eq!(snapshot["requests"]["failed"], 1);
        assert_eq!(snapshot["requests"]["rate_limited"], 1);
    }
}
