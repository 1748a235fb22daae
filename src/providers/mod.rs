//! Generative capability behind the pipeline: text generation for intent
//! extraction and SQL synthesis, embeddings for schema context retrieval.

pub mod gemini;
pub mod openai;

pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Token accounting reported by a provider, when available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn merge(&mut self, other: Option<TokenUsage>) {
        if let Some(other) = other {
            self.input_tokens += other.input_tokens;
            self.output_tokens += other.output_tokens;
            self.total_tokens += other.total_tokens;
        }
    }

    pub fn is_zero(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0 && self.total_tokens == 0
    }
}

/// One completed generation call.
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

/// A model backend. Selected once at startup and injected; no code path
/// branches on provider identity after construction.
#[async_trait]
pub trait GenerativeProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<Generation>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_merge() {
        let mut usage = TokenUsage::default();
        assert!(usage.is_zero());
        usage.merge(Some(TokenUsage { input_tokens: 10, output_tokens: 5, total_tokens: 15 }));
        usage.merge(None);
        usage.merge(Some(TokenUsage { input_tokens: 1, output_tokens: 2, total_tokens: 3 }));
        assert_eq!(usage.input_tokens, 11);
        assert_eq!(usage.output_tokens, 7);
        assert_eq!(usage.total_tokens, 18);
        assert!(!usage.is_zero());
    }
}
