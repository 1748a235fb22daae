//! Provider selection from the environment. LLM_PROVIDER forces a backend;
//! otherwise the first API key found decides.

use crate::error::{PipelineError, Result};
use crate::providers::{GeminiProvider, GenerativeProvider, OpenAiProvider};
use std::env;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Gemini,
    OpenAi,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub kind: ProviderKind,
    pub api_key: String,
    pub model: String,
}

impl LlmConfig {
    pub fn from_env() -> Result<Self> {
        let forced = env::var("LLM_PROVIDER").ok().map(|v| v.to_lowercase());
        let kind = match forced.as_deref() {
            Some("gemini") => ProviderKind::Gemini,
            Some("openai") => ProviderKind::OpenAi,
            Some(other) => {
                return Err(PipelineError::MissingCredential(format!(
                    "unknown LLM_PROVIDER '{}', expected 'gemini' or 'openai'",
                    other
                )))
            }
            None => {
                if env::var("GEMINI_API_KEY").is_ok() {
                    ProviderKind::Gemini
                } else if env::var("OPENAI_API_KEY").is_ok() {
                    ProviderKind::OpenAi
                } else {
                    return Err(PipelineError::MissingCredential(
                        "set GEMINI_API_KEY or OPENAI_API_KEY".to_string(),
                    ));
                }
            }
        };

        let (key_var, default_model) = match kind {
            ProviderKind::Gemini => ("GEMINI_API_KEY", "gemini-1.5-flash"),
            ProviderKind::OpenAi => ("OPENAI_API_KEY", "gpt-4o-mini"),
        };
        let api_key = env::var(key_var)
            .map_err(|_| PipelineError::MissingCredential(format!("{} is not set", key_var)))?;
        let model = env::var("LLM_MODEL").unwrap_or_else(|_| default_model.to_string());

        Ok(Self {
            kind,
            api_key,
            model,
        })
    }

    pub fn build_provider(&self) -> Arc<dyn GenerativeProvider> {
        match self.kind {
            ProviderKind::Gemini => Arc::new(GeminiProvider::new(
                self.api_key.clone(),
                self.model.clone(),
            )),
            ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(
                self.api_key.clone(),
                self.model.clone(),
            )),
        }
    }
}
