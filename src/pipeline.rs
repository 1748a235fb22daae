//! End-to-end pipeline: intent extraction and schema context in parallel,
//! deterministic build with generative fallback, then the bounded
//! execute-and-repair loop.

use crate::builder;
use crate::correction::{Attempt, CandidateQuery, CorrectionLoop, Provenance};
use crate::error::Result;
use crate::executor::{ensure_read_only, ExecutionGateway, Row};
use crate::intent::{ExtractedIntent, IntentExtractor, QueryShape};
use crate::providers::{GenerativeProvider, TokenUsage};
use crate::schema_context::SchemaContextProvider;
use crate::synthesizer::QuerySynthesizer;
use crate::telemetry::PipelineTelemetry;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Wire shape of one answered (or failed) question.
#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub success: bool,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Row>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_intent: Option<ExtractedIntent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub rate_limited: bool,
    pub attempts: Vec<Attempt>,
}

pub struct QueryPipeline {
    provider: Arc<dyn GenerativeProvider>,
    context: Arc<SchemaContextProvider>,
    gateway: Arc<dyn ExecutionGateway>,
    telemetry: Arc<PipelineTelemetry>,
    extractor: IntentExtractor,
    synthesizer: QuerySynthesizer,
    correction: CorrectionLoop,
}

impl QueryPipeline {
    /// Wire the pipeline with a fresh, unembedded schema context. Retrieval
    /// serves the static block until the context is initialized.
    pub fn new(provider: Arc<dyn GenerativeProvider>, gateway: Arc<dyn ExecutionGateway>) -> Self {
        let context = Arc::new(SchemaContextProvider::new(provider.clone()));
        Self::with_context(provider, gateway, context)
    }

    pub fn with_context(
        provider: Arc<dyn GenerativeProvider>,
        gateway: Arc<dyn ExecutionGateway>,
        context: Arc<SchemaContextProvider>,
    ) -> Self {
        let extractor = IntentExtractor::new(provider.clone());
        let synthesizer = QuerySynthesizer::new(provider.clone());
        let correction = CorrectionLoop::new(synthesizer.clone(), gateway.clone());
        Self {
            provider,
            context,
            gateway,
            telemetry: Arc::new(PipelineTelemetry::new()),
            extractor,
            synthesizer,
            correction,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn telemetry_snapshot(&self) -> serde_json::Value {
        self.telemetry.snapshot()
    }

    /// Answer one natural-language question.
    pub async fn answer(&self, question: &str) -> QueryResponse {
        let request_id = Uuid::new_v4().to_string();
        let question = question.trim();
        let shape = QueryShape::detect(question);
        info!("[{}] question: {:?} ({:?})", request_id, question, shape);

        let (extraction, context_result) = tokio::join!(
            self.extractor.extract(question),
            self.context.retrieve(question)
        );
        let (intent, intent_usage) = extraction;
        let mut usage = TokenUsage::default();
        usage.merge(intent_usage);
        info!("[{}] extracted {} filters", request_id, intent.len());

        // No meaningful query can be built without schema context.
        let context = match context_result {
            Ok(block) => block,
            Err(e) => {
                let rate_limited = e.is_rate_limited();
                warn!("[{}] context retrieval failed: {}", request_id, e);
                self.telemetry.record_usage(&usage);
                self.telemetry.record_outcome(false, rate_limited);
                return self.failure(
                    request_id,
                    intent,
                    usage,
                    Vec::new(),
                    None,
                    e.to_string(),
                    rate_limited,
                );
            }
        };

        let initial = match builder::build_query(&intent, shape) {
            Ok(sql) => {
                info!("[{}] built query deterministically", request_id);
                CandidateQuery {
                    sql,
                    provenance: Provenance::BuiltDeterministically,
                    attempt: 0,
                }
            }
            Err(reason) => {
                info!("[{}] falling back to generation: {}", request_id, reason);
                match self
                    .synthesizer
                    .synthesize(question, &intent, shape, &context)
                    .await
                {
                    Ok((sql, synthesis_usage)) => {
                        usage.merge(synthesis_usage);
                        CandidateQuery {
                            sql,
                            provenance: Provenance::Generated,
                            attempt: 0,
                        }
                    }
                    Err(e) => {
                        let rate_limited = e.is_rate_limited();
                        self.telemetry.record_usage(&usage);
                        self.telemetry.record_outcome(false, rate_limited);
                        return self.failure(
                            request_id,
                            intent,
                            usage,
                            Vec::new(),
                            None,
                            e.to_string(),
                            rate_limited,
                        );
                    }
                }
            }
        };

        let outcome = self
            .correction
            .run(question, &intent, shape, &context, initial, &self.telemetry)
            .await;
        usage.merge(Some(outcome.usage));
        self.telemetry.record_usage(&usage);

        match outcome.rows {
            Some(rows) => {
                self.telemetry.record_outcome(true, false);
                info!(
                    "[{}] answered with {} rows after {} attempt(s)",
                    request_id,
                    rows.len(),
                    outcome.attempts.len()
                );
                QueryResponse {
                    success: true,
                    request_id,
                    generated_sql: Some(outcome.sql),
                    row_count: Some(rows.len()),
                    data: Some(rows),
                    // A successful answer always carries the intent, empty
                    // or not.
                    extracted_intent: Some(intent),
                    token_usage: some_usage(usage),
                    error: None,
                    rate_limited: false,
                    attempts: outcome.attempts,
                }
            }
            None => {
                let rate_limited = outcome
                    .error
                    .as_ref()
                    .map_or(false, |e| e.is_rate_limited());
                let message = outcome
                    .error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "query could not be repaired".to_string());
                warn!("[{}] giving up: {}", request_id, message);
                self.telemetry.record_outcome(false, rate_limited);
                self.failure(
                    request_id,
                    intent,
                    usage,
                    outcome.attempts,
                    Some(outcome.sql),
                    message,
                    rate_limited,
                )
            }
        }
    }

    /// Execute caller-supplied SQL through the read-only gateway.
    pub async fn run_raw(&self, sql: &str) -> Result<Vec<Row>> {
        ensure_read_only(sql)?;
        self.gateway.execute(sql).await
    }

    #[allow(clippy::too_many_arguments)]
    fn failure(
        &self,
        request_id: String,
        intent: ExtractedIntent,
        usage: TokenUsage,
        attempts: Vec<Attempt>,
        sql: Option<String>,
        error: String,
        rate_limited: bool,
    ) -> QueryResponse {
        QueryResponse {
            success: false,
            request_id,
            generated_sql: sql.filter(|s| !s.is_empty()),
            data: None,
            row_count: None,
            extracted_intent: some_intent(intent),
            token_usage: some_usage(usage),
            error: Some(error),
            rate_limited,
            attempts,
        }
    }
}

fn some_intent(intent: ExtractedIntent) -> Option<ExtractedIntent> {
    if intent.is_empty() {
        None
    } else {
        Some(intent)
    }
}

fn some_usage(usage: TokenUsage) -> Option<TokenUsage> {
    if usage.is_zero() {
        None
    } else {
        Some(usage)
    }
}
