//! Token usage extraction and the SSE usage-merge policy.
//!
//! The merge is field-wise "last non-null wins", with one exception:
//! `input_tokens`, once observed, is sticky — `message_start` reports it
//! once and later `message_delta` events never carry it again, so a naive
//! last-write-wins would silently zero it out.

use serde::Deserialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize)]
pub struct RawUsage {
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
    #[serde(default)]
    pub cache_read_input_tokens: Option<u64>,
    #[serde(default)]
    pub cache_creation_input_tokens: Option<u64>,
}

impl RawUsage {
    /// Merges `update` into `self` in place, applying the sticky-input,
    /// last-write-wins policy.
    pub fn merge(&mut self, update: &RawUsage) {
        if self.input_tokens.is_none() {
            self.input_tokens = update.input_tokens;
        }
        if let Some(v) = update.output_tokens {
            self.output_tokens = Some(v);
        }
        if let Some(v) = update.cache_read_input_tokens {
            self.cache_read_input_tokens = Some(v);
        }
        if let Some(v) = update.cache_creation_input_tokens {
            self.cache_creation_input_tokens = Some(v);
        }
    }

    pub fn to_token_usage(self) -> cc_trace_core::pricing::TokenUsage {
        cc_trace_core::pricing::TokenUsage {
            input: self.input_tokens.unwrap_or(0),
            output: self.output_tokens.unwrap_or(0),
            cache_read: self.cache_read_input_tokens.unwrap_or(0),
            cache_write: self.cache_creation_input_tokens.unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_tokens_are_sticky_across_merges() {
        let mut usage = RawUsage {
            input_tokens: Some(200),
            ..Default::default()
        };
        usage.merge(&RawUsage {
            output_tokens: Some(1),
            ..Default::default()
        });
        usage.merge(&RawUsage {
            output_tokens: Some(3),
            ..Default::default()
        });
        assert_eq!(usage.input_tokens, Some(200));
        assert_eq!(usage.output_tokens, Some(3));
    }

    #[test]
    fn later_non_null_output_tokens_override_earlier() {
        let mut usage = RawUsage::default();
        usage.merge(&RawUsage {
            output_tokens: Some(1),
            ..Default::default()
        });
        usage.merge(&RawUsage {
            output_tokens: Some(5),
            ..Default::default()
        });
        assert_eq!(usage.output_tokens, Some(5));
    }

    #[test]
    fn null_update_does_not_clear_a_previously_observed_field() {
        let mut usage = RawUsage {
            cache_read_input_tokens: Some(10),
            ..Default::default()
        };
        usage.merge(&RawUsage::default());
        assert_eq!(usage.cache_read_input_tokens, Some(10));
    }
}
