//! Static per-million-token pricing table and cost calculator, reshaped
//! around the four token kinds this system tracks: input, output, cache
//! read, and cache write.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_write: u64,
}

#[derive(Clone, Copy, Debug)]
pub struct ModelRates {
    pub per_million_input: f64,
    pub per_million_output: f64,
    pub per_million_cache_read: f64,
    pub per_million_cache_write: f64,
}

#[derive(Clone, Copy, Debug)]
pub struct CostResult {
    pub cost_usd: f64,
    pub known: bool,
}

/// A small static lookup table. Model names are matched by prefix so that
/// dated snapshots (`claude-sonnet-4-5-20250929`) resolve to their family's
/// rate without enumerating every release.
const RATE_TABLE: &[(&str, ModelRates)] = &[
    (
        "claude-opus-4",
        ModelRates {
            per_million_input: 15.0,
            per_million_output: 75.0,
            per_million_cache_read: 1.5,
            per_million_cache_write: 18.75,
        },
    ),
    (
        "claude-sonnet-4",
        ModelRates {
            per_million_input: 3.0,
            per_million_output: 15.0,
            per_million_cache_read: 0.3,
            per_million_cache_write: 3.75,
        },
    ),
    (
        "claude-3-7-sonnet",
        ModelRates {
            per_million_input: 3.0,
            per_million_output: 15.0,
            per_million_cache_read: 0.3,
            per_million_cache_write: 3.75,
        },
    ),
    (
        "claude-3-5-haiku",
        ModelRates {
            per_million_input: 0.8,
            per_million_output: 4.0,
            per_million_cache_read: 0.08,
            per_million_cache_write: 1.0,
        },
    ),
    (
        "claude-3-haiku",
        ModelRates {
            per_million_input: 0.25,
            per_million_output: 1.25,
            per_million_cache_read: 0.03,
            per_million_cache_write: 0.3,
        },
    ),
];

fn lookup_rates(model: &str) -> Option<ModelRates> {
    RATE_TABLE
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, rates)| *rates)
}

/// Computes cost for a single API span's usage.
///
/// An unknown model does not fall back to a
/// default rate: it reports `cost_usd = 0.0` and `known = false` so
/// downstream aggregates are never silently inflated by a guessed rate.
pub fn calculate_cost(model: &str, usage: &TokenUsage) -> CostResult {
    match lookup_rates(model) {
        Some(rates) => {
            let cost = usage.input as f64 * rates.per_million_input / 1_000_000.0
                + usage.output as f64 * rates.per_million_output / 1_000_000.0
                + usage.cache_read as f64 * rates.per_million_cache_read / 1_000_000.0
                + usage.cache_write as f64 * rates.per_million_cache_write / 1_000_000.0;
            CostResult {
                cost_usd: cost,
                known: true,
            }
        }
        None => CostResult {
            cost_usd: 0.0,
            known: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_computes_exact_cost() {
        let usage = TokenUsage {
            input: 100,
            output: 50,
            cache_read: 0,
            cache_write: 0,
        };
        let result = calculate_cost("claude-sonnet-4-5-20250929", &usage);
        assert!(result.known);
        let expected = 100.0 * 3.0 / 1e6 + 50.0 * 15.0 / 1e6;
        assert!((result.cost_usd - expected).abs() < 1e-12);
    }

    #[test]
    fn unknown_model_reports_zero_cost_and_unknown() {
        let usage = TokenUsage {
            input: 10,
            output: 10,
            cache_read: 0,
            cache_write: 0,
        };
        let result = calculate_cost("some-future-model", &usage);
        assert_eq!(result.cost_usd, 0.0);
        assert!(!result.known);
    }

    #[test]
    fn cache_tokens_use_their_own_rates() {
        let usage = TokenUsage {
            input: 0,
            output: 0,
            cache_read: 1_000_000,
            cache_write: 1_000_000,
        };
        let result = calculate_cost("claude-opus-4-1", &usage);
        assert!((result.cost_usd - (1.5 + 18.75)).abs() < 1e-9);
    }
}
