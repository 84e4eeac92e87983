//! Per-run aggregate metrics fed to the report materializer.
//!
//! Groups spans by model and by category and sums ok/error/total counts,
//! accumulating into a struct the HTML report serializes directly.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::span::{Span, SpanCategory, SpanStatus};

#[derive(Clone, Debug, Default, Serialize)]
pub struct ModelTally {
    pub ok_count: u64,
    pub error_count: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct RunAggregate {
    pub span_count_by_category: BTreeMap<String, u64>,
    pub by_model: BTreeMap<String, ModelTally>,
    pub total_cost_usd: f64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_duration_ms: f64,
    pub api_latency_ms_avg: f64,
}

impl RunAggregate {
    pub fn compute(spans: &[Span], root: Option<&Span>) -> Self {
        let mut agg = RunAggregate::default();
        let mut api_latency_sum = 0.0;
        let mut api_count = 0u64;

        for span in spans {
            let category = span.category();
            let key = category_label(category).to_string();
            *agg.span_count_by_category.entry(key).or_insert(0) += 1;

            if category == SpanCategory::Api {
                let model = attr_str(span, "ai.model").unwrap_or_else(|| "unknown".to_string());
                let tally = agg.by_model.entry(model).or_default();
                match span.status {
                    SpanStatus::Ok => tally.ok_count += 1,
                    SpanStatus::Error => tally.error_count += 1,
                    SpanStatus::Unset => {}
                }
                let input = attr_u64(span, "ai.tokens.input").unwrap_or(0);
                let output = attr_u64(span, "ai.tokens.output").unwrap_or(0);
                let cost = attr_f64(span, "ai.cost.usd").unwrap_or(0.0);
                tally.input_tokens += input;
                tally.output_tokens += output;
                tally.cost_usd += cost;

                agg.total_input_tokens += input;
                agg.total_output_tokens += output;
                agg.total_cost_usd += cost;

                api_latency_sum += span.duration_ms();
                api_count += 1;
            }
        }

        if api_count > 0 {
            agg.api_latency_ms_avg = api_latency_sum / api_count as f64;
        }
        if let Some(root) = root {
            agg.total_duration_ms = root.duration_ms();
        }

        agg
    }
}

fn category_label(category: SpanCategory) -> &'static str {
    match category {
        SpanCategory::Api => "api",
        SpanCategory::Tool => "tool",
        SpanCategory::Hook => "hook",
        SpanCategory::File => "file",
        SpanCategory::Test => "test",
        SpanCategory::Other => "other",
    }
}

fn attr_str(span: &Span, key: &str) -> Option<String> {
    match span.attributes.get(key)? {
        crate::span::AttrValue::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn attr_u64(span: &Span, key: &str) -> Option<u64> {
    match span.attributes.get(key)? {
        crate::span::AttrValue::Int(i) => Some((*i).max(0) as u64),
        crate::span::AttrValue::Double(d) => Some(*d as u64),
        _ => None,
    }
}

fn attr_f64(span: &Span, key: &str) -> Option<f64> {
    match span.attributes.get(key)? {
        crate::span::AttrValue::Double(d) => Some(*d),
        crate::span::AttrValue::Int(i) => Some(*i as f64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{SpanKind, TraceId};

    #[test]
    fn sums_cost_and_tokens_across_api_spans() {
        let trace = TraceId::new();
        let mut a = Span::new(trace, "API POST x", SpanKind::Client);
        a.set_attr("ai.model", "claude-sonnet-4-5");
        a.set_attr("ai.tokens.input", 100i64);
        a.set_attr("ai.tokens.output", 50i64);
        a.set_attr("ai.cost.usd", 0.001f64);
        a.set_status(SpanStatus::Ok, None);

        let mut b = a.clone();
        b.set_status(SpanStatus::Error, None);

        let agg = RunAggregate::compute(&[a, b], None);
        assert_eq!(agg.total_input_tokens, 200);
        assert_eq!(agg.total_output_tokens, 100);
        assert!((agg.total_cost_usd - 0.002).abs() < 1e-9);
        let tally = &agg.by_model["claude-sonnet-4-5"];
        assert_eq!(tally.ok_count, 1);
        assert_eq!(tally.error_count, 1);
    }
}
