// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Usage/telemetry accumulation.
//!
//! Folds per-call usage reports into an execution record. This is the only
//! writer of execution telemetry fields and is invoked synchronously from
//! the call site that receives the report, so no locking is involved. The
//! operation performs no I/O and cannot fail.

use tracing::warn;

use crate::domain::execution::Execution;
use crate::domain::llm::UsageDelta;

/// Apply one usage report to an execution record.
///
/// Token counters are additive so repeated calls within one execution
/// accumulate. Currency, total price and the unit-price/price-unit fields
/// are last-write-wins: they describe the most recent pricing context, not
/// a running sum. Latency arrives in milliseconds and is stored in seconds;
/// a missing latency yields zero.
///
/// Counters freeze once the execution is terminal; late reports are dropped.
pub fn apply_usage(execution: &mut Execution, delta: &UsageDelta) {
    if execution.is_terminal() {
        warn!(
            execution_id = %execution.id,
            status = ?execution.status,
            "Dropping usage report for terminal execution"
        );
        return;
    }

    execution.input_tokens += delta.prompt_tokens;
    execution.output_tokens += delta.completion_tokens;
    execution.tokens += delta.total_tokens;

    execution.input_price = delta.prompt_price;
    execution.output_price = delta.completion_price;
    execution.total_price = delta.total_price;
    execution.input_unit_price = delta.prompt_unit_price;
    execution.input_price_unit = delta.prompt_price_unit;
    execution.output_unit_price = delta.completion_unit_price;
    execution.output_price_unit = delta.completion_price_unit;
    execution.currency = delta.currency.clone();

    execution.response_latency = delta.latency.map(|ms| ms / 1000.0).unwrap_or(0.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_execution() -> Execution {
        let mut execution = Execution::new("agent", serde_json::Value::Null);
        execution.start();
        execution
    }

    #[test]
    fn test_tokens_accumulate_latency_overwrites() {
        let mut execution = running_execution();

        apply_usage(
            &mut execution,
            &UsageDelta {
                total_tokens: 15,
                latency: Some(500.0),
                ..Default::default()
            },
        );
        apply_usage(
            &mut execution,
            &UsageDelta {
                total_tokens: 7,
                latency: Some(300.0),
                ..Default::default()
            },
        );

        assert_eq!(execution.tokens, 22);
        assert_eq!(execution.response_latency, 0.3);
    }

    #[test]
    fn test_missing_latency_yields_zero() {
        let mut execution = running_execution();
        apply_usage(
            &mut execution,
            &UsageDelta {
                total_tokens: 5,
                latency: Some(250.0),
                ..Default::default()
            },
        );
        assert_eq!(execution.response_latency, 0.25);

        apply_usage(
            &mut execution,
            &UsageDelta {
                total_tokens: 1,
                latency: None,
                ..Default::default()
            },
        );
        assert_eq!(execution.response_latency, 0.0);
        assert_eq!(execution.tokens, 6);
    }

    #[test]
    fn test_pricing_context_is_last_write_wins() {
        let mut execution = running_execution();
        apply_usage(
            &mut execution,
            &UsageDelta {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
                prompt_unit_price: 0.002,
                total_price: 0.1,
                currency: Some("USD".to_string()),
                ..Default::default()
            },
        );
        apply_usage(
            &mut execution,
            &UsageDelta {
                prompt_tokens: 4,
                completion_tokens: 2,
                total_tokens: 6,
                prompt_unit_price: 0.004,
                total_price: 0.05,
                currency: Some("EUR".to_string()),
                ..Default::default()
            },
        );

        assert_eq!(execution.input_tokens, 14);
        assert_eq!(execution.output_tokens, 7);
        assert_eq!(execution.tokens, 21);
        // Pricing context reflects the latest report only.
        assert_eq!(execution.input_unit_price, 0.004);
        assert_eq!(execution.total_price, 0.05);
        assert_eq!(execution.currency, Some("EUR".to_string()));
    }

    #[test]
    fn test_terminal_execution_is_frozen() {
        let mut execution = running_execution();
        apply_usage(
            &mut execution,
            &UsageDelta {
                total_tokens: 9,
                ..Default::default()
            },
        );
        execution.succeed(serde_json::Value::Null);

        apply_usage(
            &mut execution,
            &UsageDelta {
                total_tokens: 100,
                ..Default::default()
            },
        );
        assert_eq!(execution.tokens, 9);
    }
}
