// Keel Core - Token accounting

use serde::{Deserialize, Serialize};

/// Token usage triple reported by model calls and aggregated per query
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.total_tokens == 0 && self.prompt_tokens == 0 && self.completion_tokens == 0
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }

    /// Component-wise `self - other`; saturating, for before/after deltas
    pub fn delta_from(&self, earlier: TokenUsage) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens.saturating_sub(earlier.prompt_tokens),
            completion_tokens: self
                .completion_tokens
                .saturating_sub(earlier.completion_tokens),
            total_tokens: self.total_tokens.saturating_sub(earlier.total_tokens),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_delta() {
        let mut total = TokenUsage::new(10, 5);
        let before = total;
        total.add(TokenUsage::new(3, 2));

        assert_eq!(total.total_tokens, 20);
        let delta = total.delta_from(before);
        assert_eq!(delta, TokenUsage::new(3, 2));
    }

    #[test]
    fn test_camel_case_serialization() {
        let usage = TokenUsage::new(1, 2);
        let json = serde_json::to_value(usage).unwrap();
        assert_eq!(json["promptTokens"], 1);
        assert_eq!(json["completionTokens"], 2);
        assert_eq!(json["totalTokens"], 3);
    }
}
