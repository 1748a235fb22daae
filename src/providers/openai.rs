use crate::error::{PipelineError, Result};
use crate::providers::{Generation, GenerativeProvider, TokenUsage};
use async_trait::async_trait;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    embedding_model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }
}

#[async_trait]
impl GenerativeProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, prompt: &str) -> Result<Generation> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "You are a precise SQL and JSON generator. Follow the instructions exactly and return no commentary."},
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.1,
            "max_tokens": 1000
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::Llm(format!("OpenAI request failed: {}", e)))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(PipelineError::RateLimited("OpenAI returned 429".to_string()));
        }
        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(PipelineError::Llm(format!("OpenAI returned {}: {}", status, detail)));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PipelineError::Llm(format!("Failed to parse OpenAI response: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| PipelineError::Llm("No content in OpenAI response".to_string()))?;

        Ok(Generation {
            text: content.to_string(),
            usage: parse_usage(&response_json["usage"]),
        })
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.embedding_model,
            "input": text
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::Llm(format!("OpenAI embedding request failed: {}", e)))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(PipelineError::RateLimited("OpenAI returned 429".to_string()));
        }
        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(PipelineError::Llm(format!(
                "OpenAI embedding returned {}: {}",
                status, detail
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PipelineError::Llm(format!("Failed to parse embedding response: {}", e)))?;

        let values = response_json["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| PipelineError::Llm("No embedding in OpenAI response".to_string()))?;

        Ok(values
            .iter()
            .filter_map(|v| v.as_f64())
            .map(|v| v as f32)
            .collect())
    }
}

fn parse_usage(value: &serde_json::Value) -> Option<TokenUsage> {
    let input = value.get("prompt_tokens")?.as_u64()?;
    let output = value
        .get("completion_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let total = value
        .get("total_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(input + output);
    Some(TokenUsage {
        input_tokens: input,
        output_tokens: output,
        total_tokens: total,
    })
}
