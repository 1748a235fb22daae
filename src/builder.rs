//! Deterministic SQL assembly from extracted intent. Every filter the
//! builder accepts renders through the catalog, so its output needs no
//! model round trip and no repair.

use crate::catalog::{self, ROOT_ALIAS, ROOT_TABLE};
use crate::intent::{ExtractedIntent, QueryShape};
use itertools::Itertools;
use std::collections::HashSet;
use std::fmt;

/// Row cap applied to every listing query.
pub const ROW_LIMIT: usize = 50;

/// Why a filter set cannot be built deterministically. The caller falls
/// back to generative synthesis on every variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    EmptyIntent,
    Unmapped { attribute: String },
    Unparseable { attribute: String, value: String },
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::EmptyIntent => write!(f, "no filters to build from"),
            BuildError::Unmapped { attribute } => {
                write!(f, "no catalog mapping for attribute '{}'", attribute)
            }
            BuildError::Unparseable { attribute, value } => {
                write!(f, "cannot render '{}' for attribute '{}'", value, attribute)
            }
        }
    }
}

impl std::error::Error for BuildError {}

/// Build a complete single-line query for the intent, or report the first
/// filter that cannot be rendered. An empty intent is never built: only the
/// synthesizer may answer a question with no recognized filters.
pub fn build_query(
    intent: &ExtractedIntent,
    shape: QueryShape,
) -> std::result::Result<String, BuildError> {
    if intent.is_empty() {
        return Err(BuildError::EmptyIntent);
    }
    let filters: Vec<_> = intent.iter().unique_by(|f| f.attribute.as_str()).collect();

    let mut predicates: Vec<String> = Vec::new();
    let mut join_aliases: HashSet<&'static str> = HashSet::new();
    let mut display_columns: Vec<&'static str> = Vec::new();

    for filter in &filters {
        let mapping = catalog::mapping_for(&filter.attribute).ok_or_else(|| {
            BuildError::Unmapped {
                attribute: filter.attribute.clone(),
            }
        })?;
        let predicate =
            catalog::render_predicate(mapping, &filter.value).ok_or_else(|| {
                BuildError::Unparseable {
                    attribute: mapping.attribute.to_string(),
                    value: filter.value.clone(),
                }
            })?;
        predicates.push(predicate);
        if let Some(join) = mapping.join {
            join_aliases.insert(join.alias);
        }
        if let Some(column) = mapping.display {
            if !display_columns.contains(&column) {
                display_columns.push(column);
            }
        }
    }

    let mut sql = String::new();
    match shape {
        QueryShape::Count => {
            sql.push_str(&format!("SELECT COUNT(DISTINCT {}.id) AS match_count", ROOT_ALIAS));
        }
        QueryShape::Listing => {
            let mut columns = vec![
                format!("{}.id", ROOT_ALIAS),
                format!("{}.first_name", ROOT_ALIAS),
                format!("{}.last_name", ROOT_ALIAS),
            ];
            for column in display_columns {
                if !columns.iter().any(|c| c == column) {
                    columns.push(column.to_string());
                }
            }
            sql.push_str("SELECT ");
            sql.push_str(&columns.join(", "));
        }
    }

    sql.push_str(&format!(" FROM {} {}", ROOT_TABLE, ROOT_ALIAS));

    // Declaration order in the catalog fixes the join order.
    for join in catalog::JOINS {
        if join_aliases.contains(join.alias) {
            sql.push(' ');
            sql.push_str(&join.clause());
        }
    }

    if !predicates.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&predicates.join(" AND "));
    }

    if matches!(shape, QueryShape::Listing) {
        sql.push_str(&format!(" LIMIT {}", ROW_LIMIT));
    }

    Ok(sql)
}
