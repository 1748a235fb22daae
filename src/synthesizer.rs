//! Generative SQL synthesis for questions the deterministic builder cannot
//! cover, plus the corrective regeneration used by the repair loop.

use crate::catalog;
use crate::error::{PipelineError, Result};
use crate::intent::{ExtractedIntent, QueryShape};
use crate::providers::{GenerativeProvider, TokenUsage};
use std::sync::Arc;

#[derive(Clone)]
pub struct QuerySynthesizer {
    provider: Arc<dyn GenerativeProvider>,
}

impl QuerySynthesizer {
    pub fn new(provider: Arc<dyn GenerativeProvider>) -> Self {
        Self { provider }
    }

    /// Generate a fresh candidate query for the question.
    pub async fn synthesize(
        &self,
        question: &str,
        intent: &ExtractedIntent,
        shape: QueryShape,
        schema_context: &str,
    ) -> Result<(String, Option<TokenUsage>)> {
        let prompt = build_prompt(question, intent, shape, schema_context);
        self.complete(prompt).await
    }

    /// Regenerate after a failure, leading with the failing query, the error
    /// and a targeted fix instruction.
    #[allow(clippy::too_many_arguments)]
    pub async fn resynthesize(
        &self,
        question: &str,
        intent: &ExtractedIntent,
        shape: QueryShape,
        schema_context: &str,
        failing_sql: &str,
        error_text: &str,
        instruction: &str,
    ) -> Result<(String, Option<TokenUsage>)> {
        let prompt = format!(
            "The previous query failed and must be corrected.\n\
             Previous query: {}\n\
             Error: {}\n\
             Fix: {}\n\n{}",
            failing_sql,
            error_text,
            instruction,
            build_prompt(question, intent, shape, schema_context)
        );
        self.complete(prompt).await
    }

    async fn complete(&self, prompt: String) -> Result<(String, Option<TokenUsage>)> {
        let generation = self.provider.generate(&prompt).await?;
        let sql = clean_sql_response(&generation.text);
        if sql.is_empty() {
            return Err(PipelineError::Llm("model returned no SQL".to_string()));
        }
        Ok((sql, generation.usage))
    }
}

fn build_prompt(
    question: &str,
    intent: &ExtractedIntent,
    shape: QueryShape,
    schema_context: &str,
) -> String {
    let filters = if intent.is_empty() {
        "(none)".to_string()
    } else {
        intent
            .iter()
            .map(|f| format!("- {} = {}", f.attribute, f.value))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let shape_rule = match shape {
        QueryShape::Listing => {
            "Select p.id, p.first_name, p.last_name plus the columns the filters touch, and end with LIMIT 50"
        }
        QueryShape::Count => {
            "Select COUNT(DISTINCT p.id) AS match_count and nothing else, with no LIMIT"
        }
    };

    format!(
        r#"You are a PostgreSQL query generator for a matrimonial profile database.

Schema context:
{}

Canonical joins, use these exact forms when a child table is needed:
{}

User question: "{}"

Mandatory filters:
{}

Rules:
- Write a single SELECT over the base table profiles aliased p
- Express every mandatory filter as one predicate, combined with AND only
- Never combine different filters with OR
- Join only the child tables that a predicate or selected column needs
- {}
- Use literal values, never placeholders
- Return only the SQL statement, no explanation and no markdown"#,
        schema_context,
        catalog::canonical_join_block(),
        question,
        filters,
        shape_rule
    )
}

/// Peel the model response down to bare SQL: markdown fences, a JSON
/// response wrapper carrying a "sql" field, comment lines and a trailing
/// semicolon all go, and the statement collapses onto one line.
fn clean_sql_response(raw: &str) -> String {
    let unfenced = strip_fences(raw);
    let body = if unfenced.starts_with('{') {
        serde_json::from_str::<serde_json::Value>(unfenced)
            .ok()
            .and_then(|v| v.get("sql").and_then(|s| s.as_str()).map(|s| s.to_string()))
            .unwrap_or_else(|| unfenced.to_string())
    } else {
        unfenced.to_string()
    };
    normalize_sql_text(&body)
}

fn strip_fences(text: &str) -> &str {
    let mut t = text.trim();
    for prefix in ["```sql", "```SQL", "```json", "```"] {
        if let Some(stripped) = t.strip_prefix(prefix) {
            t = stripped;
            break;
        }
    }
    t = t.trim_end();
    if let Some(stripped) = t.strip_suffix("```") {
        t = stripped;
    }
    t.trim()
}

fn normalize_sql_text(text: &str) -> String {
    let text = text.trim();
    let text = text.strip_prefix("SQL:").unwrap_or(text);
    let without_comments = text
        .lines()
        .map(|line| match line.find("--") {
            Some(at) => &line[..at],
            None => line,
        })
        .collect::<Vec<_>>()
        .join(" ");
    let collapsed = without_comments
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    collapsed.trim_end_matches(';').trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::IntentFilter;

    #[test]
    fn test_clean_plain_sql() {
        assert_eq!(
            clean_sql_response("SELECT p.id FROM profiles p LIMIT 50;"),
            "SELECT p.id FROM profiles p LIMIT 50"
        );
    }

    #[test]
    fn test_clean_fenced_sql() {
        let raw = "```sql\nSELECT p.id\nFROM profiles p\nLIMIT 50\n```";
        assert_eq!(
            clean_sql_response(raw),
            "SELECT p.id FROM profiles p LIMIT 50"
        );
    }

    #[test]
    fn test_clean_json_wrapped_sql() {
        let raw = r#"```json
{"sql": "SELECT p.id FROM profiles p WHERE LOWER(p.religion) = 'hindu' LIMIT 50"}
```"#;
        assert_eq!(
            clean_sql_response(raw),
            "SELECT p.id FROM profiles p WHERE LOWER(p.religion) = 'hindu' LIMIT 50"
        );
    }

    #[test]
    fn test_clean_prefixed_and_commented_sql() {
        let raw = "SQL: SELECT p.id -- identity\nFROM profiles p -- base table\nLIMIT 50";
        assert_eq!(
            clean_sql_response(raw),
            "SELECT p.id FROM profiles p LIMIT 50"
        );
    }

    #[test]
    fn test_clean_empty_response() {
        assert_eq!(clean_sql_response("```\n```"), "");
        assert_eq!(clean_sql_response("   "), "");
    }

    #[test]
    fn test_prompt_carries_filters_and_joins() {
        let intent = vec![
            IntentFilter {
                attribute: "profession".to_string(),
                value: "doctor".to_string(),
            },
            IntentFilter {
                attribute: "annual_income".to_string(),
                value: "well settled".to_string(),
            },
        ];
        let prompt = build_prompt(
            "well settled doctor",
            &intent,
            QueryShape::Listing,
            "Table careers (alias c): employment details",
        );
        assert!(prompt.contains("- profession = doctor"));
        assert!(prompt.contains("- annual_income = well settled"));
        assert!(prompt.contains("JOIN careers c ON p.id = c.profile_id"));
        assert!(prompt.contains("LIMIT 50"));
        assert!(prompt.contains("never placeholders"));
    }

    #[test]
    fn test_count_prompt_forbids_limit() {
        let prompt = build_prompt(
            "how many doctors",
            &Vec::new(),
            QueryShape::Count,
            "context",
        );
        assert!(prompt.contains("COUNT(DISTINCT p.id) AS match_count"));
        assert!(prompt.contains("no LIMIT"));
        assert!(prompt.contains("(none)"));
    }
}
