//! Bounded execute-and-repair loop. Every candidate passes through the
//! validator, then the gateway; a failure turns into a targeted repair
//! instruction and one regeneration, up to the attempt cap.

use crate::error::PipelineError;
use crate::executor::{ExecutionGateway, Row};
use crate::intent::{ExtractedIntent, QueryShape};
use crate::providers::TokenUsage;
use crate::synthesizer::QuerySynthesizer;
use crate::telemetry::PipelineTelemetry;
use crate::validator;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Hard cap on validate-execute-regenerate rounds per question.
pub const MAX_ATTEMPTS: u8 = 3;

/// How the current candidate query came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    BuiltDeterministically,
    Generated,
    Corrected,
}

#[derive(Debug, Clone)]
pub struct CandidateQuery {
    pub sql: String,
    pub provenance: Provenance,
    pub attempt: u8,
}

/// One round of the loop, as reported back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct Attempt {
    pub attempt: u8,
    pub sql: String,
    pub provenance: Provenance,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct LoopResult {
    pub rows: Option<Vec<Row>>,
    pub sql: String,
    pub attempts: Vec<Attempt>,
    pub usage: TokenUsage,
    pub error: Option<PipelineError>,
}

/// Failure text fragments mapped to repair instructions. Order matters:
/// "ambiguous" must win over "column", "invalid input" over "syntax",
/// "unknown table alias" over "join".
static REPAIR_HINTS: &[(&str, &str)] = &[
    (
        "placeholder",
        "Replace every placeholder token with a literal value taken from the mandatory filters.",
    ),
    (
        "unknown table alias",
        "Use only the canonical table aliases: p, c, l, e, ls, pa.",
    ),
    (
        "ambiguous",
        "Qualify every column reference with its table alias.",
    ),
    (
        "operator does not exist",
        "Compare numeric columns to unquoted numbers and text columns to quoted strings.",
    ),
    (
        "invalid input",
        "Use a literal matching the column type; numbers must be unquoted.",
    ),
    (
        "age value",
        "Translate the age wording into a numeric range on EXTRACT(YEAR FROM AGE(CURRENT_DATE, p.date_of_birth)).",
    ),
    (
        "column",
        "Use only columns listed in the schema context, qualified with their table aliases.",
    ),
    (
        "relation",
        "Use only the tables profiles, careers, locations, educations, lifestyles and physical_attributes.",
    ),
    (
        "from profiles",
        "Start from the profiles table aliased p and join child tables onto it.",
    ),
    (
        "join",
        "Join every child table as JOIN <table> <alias> ON p.id = <alias>.profile_id.",
    ),
    (
        "permission denied",
        "Write a plain read-only SELECT over the allowed tables.",
    ),
    (
        "timed out",
        "Simplify the query: fewer joins and simpler predicates.",
    ),
    (
        "timeout",
        "Simplify the query: fewer joins and simpler predicates.",
    ),
    (
        "syntax",
        "Return exactly one syntactically valid PostgreSQL SELECT statement.",
    ),
];

const DEFAULT_REPAIR_INSTRUCTION: &str =
    "Regenerate a single valid PostgreSQL SELECT that satisfies every mandatory filter.";

/// First matching repair instruction for a failure message.
pub fn repair_instruction(error_text: &str) -> &'static str {
    let lowered = error_text.to_lowercase();
    for (needle, hint) in REPAIR_HINTS {
        if lowered.contains(needle) {
            return hint;
        }
    }
    DEFAULT_REPAIR_INSTRUCTION
}

pub struct CorrectionLoop {
    synthesizer: QuerySynthesizer,
    gateway: Arc<dyn ExecutionGateway>,
}

impl CorrectionLoop {
    pub fn new(synthesizer: QuerySynthesizer, gateway: Arc<dyn ExecutionGateway>) -> Self {
        Self { synthesizer, gateway }
    }

    /// Drive the candidate to rows or exhaust the attempt budget. Rate
    /// limiting aborts immediately so a throttled provider is not hammered
    /// with regeneration prompts.
    pub async fn run(
        &self,
        question: &str,
        intent: &ExtractedIntent,
        shape: QueryShape,
        schema_context: &str,
        initial: CandidateQuery,
        telemetry: &PipelineTelemetry,
    ) -> LoopResult {
        let mut candidate = initial;
        let mut attempts: Vec<Attempt> = Vec::new();
        let mut usage = TokenUsage::default();
        let mut last_error: Option<PipelineError> = None;

        for attempt in 1..=MAX_ATTEMPTS {
            candidate.attempt = attempt;
            let result = validator::validate(&candidate.sql, intent);
            telemetry.record_fixes(&result.applied_fixes);
            if result.fixed {
                let applied: Vec<&str> =
                    result.applied_fixes.iter().map(|r| r.as_str()).collect();
                info!("Attempt {}: validator applied {:?}", attempt, applied);
            }

            let failure: PipelineError = if result.valid {
                match self.gateway.execute(&result.query).await {
                    Ok(rows) => {
                        attempts.push(Attempt {
                            attempt,
                            sql: result.query.clone(),
                            provenance: candidate.provenance,
                            error: None,
                        });
                        telemetry.record_attempts(attempt);
                        return LoopResult {
                            rows: Some(rows),
                            sql: result.query,
                            attempts,
                            usage,
                            error: None,
                        };
                    }
                    Err(e) => e,
                }
            } else {
                result.error.unwrap_or_else(|| PipelineError::Validation {
                    rule: "unknown".to_string(),
                    message: "validation rejected the query".to_string(),
                })
            };

            let error_text = failure.to_string();
            warn!("Attempt {} failed: {}", attempt, error_text);
            attempts.push(Attempt {
                attempt,
                sql: result.query.clone(),
                provenance: candidate.provenance,
                error: Some(error_text.clone()),
            });

            let rate_limited = failure.is_rate_limited();
            last_error = Some(failure);
            if rate_limited || attempt == MAX_ATTEMPTS {
                break;
            }

            let instruction = repair_instruction(&error_text);
            match self
                .synthesizer
                .resynthesize(
                    question,
                    intent,
                    shape,
                    schema_context,
                    &result.query,
                    &error_text,
                    instruction,
                )
                .await
            {
                Ok((sql, attempt_usage)) => {
                    usage.merge(attempt_usage);
                    candidate = CandidateQuery {
                        sql,
                        provenance: Provenance::Corrected,
                        attempt,
                    };
                }
                Err(e) => {
                    warn!("Regeneration after attempt {} failed: {}", attempt, e);
                    last_error = Some(e);
                    break;
                }
            }
        }

        telemetry.record_attempts(attempts.len() as u8);
        let sql = attempts.last().map(|a| a.sql.clone()).unwrap_or_default();
        LoopResult {
            rows: None,
            sql,
            attempts,
            usage,
            error: last_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repair_instruction_specificity() {
        assert!(repair_instruction("column reference \"id\" is ambiguous")
            .contains("Qualify every column"));
        assert!(repair_instruction("column \"cityy\" does not exist")
            .contains("columns listed in the schema context"));
        assert!(repair_instruction("invalid input syntax for type integer")
            .contains("must be unquoted"));
        assert!(repair_instruction("syntax error at or near \")\"")
            .contains("syntactically valid"));
    }

    #[test]
    fn test_repair_instruction_validator_errors() {
        assert!(repair_instruction(
            "Join incomplete: alias 'c' is used without the canonical join on careers"
        )
        .contains("ON p.id"));
        assert!(repair_instruction(
            "Validation error (join_completeness): unknown table alias 'u'"
        )
        .contains("canonical table aliases"));
        assert!(repair_instruction(
            "Validation error (base_table): query does not select FROM profiles p"
        )
        .contains("profiles table aliased p"));
        assert!(
            repair_instruction("Validation error (placeholder_residue): unresolved placeholder <city>")
                .contains("literal value")
        );
    }

    #[test]
    fn test_repair_instruction_default() {
        assert_eq!(
            repair_instruction("something entirely unexpected"),
            DEFAULT_REPAIR_INSTRUCTION
        );
        assert!(repair_instruction("query timed out after 15s").contains("fewer joins"));
        assert!(
            repair_instruction("canceling statement due to statement timeout")
                .contains("fewer joins")
        );
    }
}
