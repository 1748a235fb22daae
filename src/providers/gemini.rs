use crate::error::{PipelineError, Result};
use crate::providers::{Generation, GenerativeProvider, TokenUsage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-004";

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Option<Vec<CandidatePart>>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<u64>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<u64>,
    #[serde(rename = "totalTokenCount")]
    total_token_count: Option<u64>,
}

#[derive(Debug, Serialize)]
struct EmbedContentRequest {
    model: String,
    content: Content,
}

#[derive(Debug, Deserialize)]
struct EmbedContentResponse {
    embedding: Option<EmbeddingValues>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    embedding_model: String,
}

impl GeminiProvider {
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
impl GenerativeProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, prompt: &str) -> Result<Generation> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt.to_string() }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.1,
                max_output_tokens: 1000,
            },
        };

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::Llm(format!("Gemini request failed: {}", e)))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(PipelineError::RateLimited("Gemini returned 429".to_string()));
        }
        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(PipelineError::Llm(format!("Gemini returned {}: {}", status, detail)));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Llm(format!("Failed to parse Gemini response: {}", e)))?;

        let text = extract_text(&parsed)
            .ok_or_else(|| PipelineError::Llm("No content in Gemini response".to_string()))?;

        Ok(Generation {
            text,
            usage: parsed.usage_metadata.as_ref().map(to_usage),
        })
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbedContentRequest {
            model: format!("models/{}", self.embedding_model),
            content: Content {
                parts: vec![Part { text: text.to_string() }],
            },
        };

        let url = format!(
            "{}/models/{}:embedContent?key={}",
            self.base_url, self.embedding_model, self.api_key
        );
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::Llm(format!("Gemini embedding request failed: {}", e)))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(PipelineError::RateLimited("Gemini returned 429".to_string()));
        }
        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(PipelineError::Llm(format!(
                "Gemini embedding returned {}: {}",
                status, detail
            )));
        }

        let parsed: EmbedContentResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Llm(format!("Failed to parse embedding response: {}", e)))?;

        parsed
            .embedding
            .map(|e| e.values)
            .ok_or_else(|| PipelineError::Llm("No embedding in Gemini response".to_string()))
    }
}

fn extract_text(response: &GenerateContentResponse) -> Option<String> {
    let candidates = response.candidates.as_ref()?;
    let content = candidates.first()?.content.as_ref()?;
    let parts = content.parts.as_ref()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.text.as_deref())
        .collect::<Vec<_>>()
        .join("");
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn to_usage(metadata: &UsageMetadata) -> TokenUsage {
    let input = metadata.prompt_token_count.unwrap_or(0);
    let output = metadata.candidates_token_count.unwrap_or(0);
    TokenUsage {
        input_tokens: input,
        output_tokens: output,
        total_tokens: metadata.total_token_count.unwrap_or(input + output),
    }
}
