//! Read-only execution gateway. The Postgres implementation enforces the
//! statement allowlist, applies a wall-clock timeout and flattens rows to
//! JSON objects for the API layer.

use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row as SqlxRow};
use std::collections::HashMap;
use std::time::Duration;

/// A result row flattened to column name -> JSON value.
pub type Row = HashMap<String, Value>;

pub const QUERY_TIMEOUT_SECS: u64 = 15;

#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<Vec<Row>>;
}

const FORBIDDEN_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "drop", "alter", "create", "truncate", "grant", "revoke",
    "copy", "vacuum", "merge", "call",
];

/// Reject anything but a read-only SELECT. The keyword scan runs over the
/// masked text, so values like 'Dropadi' never trip it, while a second
/// statement smuggled in after a semicolon does.
pub fn ensure_read_only(sql: &str) -> Result<()> {
    let masked = crate::validator::mask_string_literals(sql);
    let lowered = masked.to_lowercase();
    let mut tokens = lowered
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty());

    match tokens.next() {
        Some("select") | Some("with") => {}
        Some(other) => {
            return Err(PipelineError::UnsupportedStatement(format!(
                "only SELECT statements are allowed, got '{}'",
                other
            )))
        }
        None => {
            return Err(PipelineError::UnsupportedStatement(
                "empty statement".to_string(),
            ))
        }
    }
    for token in tokens {
        if FORBIDDEN_KEYWORDS.contains(&token) {
            return Err(PipelineError::UnsupportedStatement(format!(
                "statement contains forbidden keyword '{}'",
                token
            )));
        }
    }
    Ok(())
}

pub struct PostgresGateway {
    pool: PgPool,
    timeout: Duration,
}

impl PostgresGateway {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| PipelineError::Execution(format!("database connection failed: {}", e)))?;
        Ok(Self {
            pool,
            timeout: Duration::from_secs(QUERY_TIMEOUT_SECS),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ExecutionGateway for PostgresGateway {
    async fn execute(&self, sql: &str) -> Result<Vec<Row>> {
        ensure_read_only(sql)?;
        let fetch = sqlx::query(sql).fetch_all(&self.pool);
        let rows = match tokio::time::timeout(self.timeout, fetch).await {
            Ok(Ok(rows)) => rows,
            Ok(Err(e)) => return Err(PipelineError::Execution(e.to_string())),
            Err(_) => {
                return Err(PipelineError::Execution(format!(
                    "query timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
        };
        Ok(rows.iter().map(row_to_json).collect())
    }
}

fn row_to_json(row: &PgRow) -> Row {
    let mut out = Row::new();
    for column in row.columns() {
        out.insert(
            column.name().to_string(),
            extract_column_value(row, column.ordinal()),
        );
    }
    out
}

/// Decode one column by trying the types the profile schema uses, most
/// common first. Anything undecodable becomes null rather than an error.
fn extract_column_value(row: &PgRow, index: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return v.map(Value::String).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return v.map(|n| Value::Number(n.into())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(index) {
        return v.map(|n| Value::Number(n.into())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return v
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
        return v.map(Value::Bool).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<DateTime<Utc>>, _>(index) {
        return v
            .map(|d| Value::String(d.to_rfc3339()))
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<NaiveDate>, _>(index) {
        return v.map(|d| Value::String(d.to_string())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<NaiveDateTime>, _>(index) {
        return v.map(|d| Value::String(d.to_string())).unwrap_or(Value::Null);
    }
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_and_with_allowed() {
        assert!(ensure_read_only("SELECT p.id FROM profiles p LIMIT 50").is_ok());
        assert!(ensure_read_only(
            "WITH young AS (SELECT id FROM profiles) SELECT * FROM young"
        )
        .is_ok());
        assert!(ensure_read_only("  select 1").is_ok());
    }

    #[test]
    fn test_writes_rejected() {
        for sql in [
            "UPDATE profiles SET caste = 'x'",
            "DELETE FROM profiles",
            "DROP TABLE profiles",
            "INSERT INTO profiles VALUES (1)",
            "TRUNCATE profiles",
        ] {
            let err = ensure_read_only(sql).unwrap_err();
            assert!(
                matches!(err, PipelineError::UnsupportedStatement(_)),
                "accepted: {}",
                sql
            );
        }
    }

    #[test]
    fn test_piggybacked_statement_rejected() {
        let err = ensure_read_only("SELECT 1; DROP TABLE profiles").unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedStatement(_)));
    }

    #[test]
    fn test_keywords_inside_literals_allowed() {
        assert!(ensure_read_only(
            "SELECT p.id FROM profiles p WHERE LOWER(p.first_name) LIKE '%dropadi%'"
        )
        .is_ok());
        assert!(ensure_read_only(
            "SELECT p.id FROM profiles p WHERE LOWER(l.city) LIKE '%delete this%'"
        )
        .is_ok());
    }

    #[test]
    fn test_identifiers_containing_keywords_allowed() {
        // created_at tokenizes with its underscore and must not match create
        assert!(
            ensure_read_only("SELECT p.id, p.created_at FROM profiles p LIMIT 5").is_ok()
        );
    }

    #[test]
    fn test_empty_statement_rejected() {
        assert!(ensure_read_only("   ").is_err());
    }
}
