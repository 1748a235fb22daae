//! Rule-based query validation and repair. Each rule either rewrites the
//! query in place, passes it through untouched, or rejects it with an
//! error the correction loop can act on. The pass is pure and idempotent:
//! running it on its own output applies no further fixes.

use crate::catalog::{self, ValueTransform};
use crate::error::PipelineError;
use crate::intent::{ExtractedIntent, IntentFilter};
use lazy_static::lazy_static;
use regex::Regex;

/// Identifies which repair a validation pass applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationRule {
    RootAlias,
    PlaceholderFill,
    TrailingSyntax,
    BaseTable,
    PlaceholderResidue,
    NameFilter,
    AgeFilter,
    JoinCompleteness,
}

impl ValidationRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationRule::RootAlias => "root_alias",
            ValidationRule::PlaceholderFill => "placeholder_fill",
            ValidationRule::TrailingSyntax => "trailing_syntax",
            ValidationRule::BaseTable => "base_table",
            ValidationRule::PlaceholderResidue => "placeholder_residue",
            ValidationRule::NameFilter => "name_filter",
            ValidationRule::AgeFilter => "age_filter",
            ValidationRule::JoinCompleteness => "join_completeness",
        }
    }
}

/// Outcome of a validation pass over one candidate query.
#[derive(Debug)]
pub struct ValidationResult {
    pub valid: bool,
    pub query: String,
    pub error: Option<PipelineError>,
    pub fixed: bool,
    pub applied_fixes: Vec<ValidationRule>,
}

lazy_static! {
    static ref FROM_RE: Regex = Regex::new(
        r"(?i)\bFROM\s+([A-Za-z_][A-Za-z0-9_]*)(?:\s+(?:AS\s+)?([A-Za-z_][A-Za-z0-9_]*))?"
    )
    .unwrap();
    static ref BASE_TABLE_RE: Regex =
        Regex::new(r"(?i)\bFROM\s+profiles\s+(?:AS\s+)?p\b").unwrap();
    static ref WHERE_RE: Regex = Regex::new(r"(?i)\bWHERE\b").unwrap();
    static ref SECTION_TAIL_RE: Regex =
        Regex::new(r"(?i)\b(?:GROUP\s+BY|ORDER\s+BY|LIMIT)\b").unwrap();
    static ref FROM_TAIL_RE: Regex =
        Regex::new(r"(?i)\b(?:WHERE|GROUP\s+BY|ORDER\s+BY|LIMIT)\b").unwrap();
    static ref ANGLE_PLACEHOLDER_RE: Regex =
        Regex::new(r"'?<[A-Za-z_][A-Za-z0-9_]*>'?").unwrap();
    static ref LITERAL_PLACEHOLDER_RE: Regex =
        Regex::new(r#"(?i)'value'|"value"|:value\b|\{value\}"#).unwrap();
    static ref AGE_EXPR_RE: Regex = Regex::new(r"(?i)\bAGE\s*\(").unwrap();
    static ref ALIAS_REF_RE: Regex =
        Regex::new(r"(?i)\b([A-Za-z_][A-Za-z0-9_]*)\s*\.").unwrap();
}

const RESERVED_AFTER_TABLE: &[&str] = &[
    "where", "join", "inner", "left", "right", "full", "cross", "group", "order", "limit", "on",
    "having",
];

/// Run the full rule sequence over a candidate query. Intent filters drive
/// placeholder filling and the coverage rules.
pub fn validate(sql: &str, intent: &ExtractedIntent) -> ValidationResult {
    let mut fixes: Vec<ValidationRule> = Vec::new();
    let mut current = sql.trim().to_string();

    // Rule 1: the root table must be aliased p.
    current = normalize_root_alias(&current, &mut fixes);

    // Rule 2: fill placeholder tokens from the intent.
    current = match fill_placeholders(&current, intent, &mut fixes) {
        Ok(filled) => filled,
        Err(e) => return failure(current, fixes, e),
    };

    // Rule 3: stray semicolons and unbalanced closing parens.
    current = repair_trailing_syntax(&current, &mut fixes);

    // Rule 4: the query must select from the root table at all.
    let masked = mask_string_literals(&current);
    if !BASE_TABLE_RE.is_match(&masked) {
        return failure(
            current,
            fixes,
            PipelineError::Validation {
                rule: ValidationRule::BaseTable.as_str().to_string(),
                message: "query does not select FROM profiles p".to_string(),
            },
        );
    }

    // Rule 5: anything rule 2 could not resolve is a hard failure.
    if let Some(token) = find_placeholder(&current) {
        return failure(
            current,
            fixes,
            PipelineError::Validation {
                rule: ValidationRule::PlaceholderResidue.as_str().to_string(),
                message: format!("unresolved placeholder {}", token),
            },
        );
    }

    // Rule 6: a requested name filter must constrain the name columns.
    if let Some(filter) = find_filter(intent, "name") {
        let where_text = where_section_lower(&current);
        if !where_text.contains("first_name") && !where_text.contains("last_name") {
            let predicate = catalog::name_predicate(&filter.value);
            current = and_into_where(&current, &predicate);
            fixes.push(ValidationRule::NameFilter);
        }
    }

    // Rule 7: a requested age filter must constrain a derived age. A raw
    // birth date bound does not count.
    if let Some(filter) = find_filter(intent, "age") {
        let where_text = where_section_lower(&current);
        if !AGE_EXPR_RE.is_match(&where_text) {
            match catalog::age_predicate(&filter.value) {
                Some(predicate) => {
                    current = and_into_where(&current, &predicate);
                    fixes.push(ValidationRule::AgeFilter);
                }
                None => {
                    return failure(
                        current,
                        fixes,
                        PipelineError::Validation {
                            rule: ValidationRule::AgeFilter.as_str().to_string(),
                            message: format!("age value '{}' has no numeric bounds", filter.value),
                        },
                    )
                }
            }
        }
    }

    // Rule 8: every referenced alias needs its canonical join. Never fixed
    // automatically, a missing join means the query misstates the schema.
    let masked = mask_string_literals(&current);
    if let Err(e) = check_join_completeness(&masked) {
        return failure(current, fixes, e);
    }

    ValidationResult {
        valid: true,
        query: current,
        error: None,
        fixed: !fixes.is_empty(),
        applied_fixes: fixes,
    }
}

fn failure(query: String, fixes: Vec<ValidationRule>, error: PipelineError) -> ValidationResult {
    ValidationResult {
        valid: false,
        query,
        error: Some(error),
        fixed: !fixes.is_empty(),
        applied_fixes: fixes,
    }
}

fn find_filter<'a>(intent: &'a ExtractedIntent, attribute: &str) -> Option<&'a IntentFilter> {
    intent.iter().find(|f| f.attribute == attribute)
}

/// Blank out single-quoted literal contents byte for byte, so the rule
/// regexes never match inside values. Quote characters stay, offsets into
/// the original string stay valid.
pub(crate) fn mask_string_literals(sql: &str) -> String {
    let bytes = sql.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut in_string = false;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            if b == b'\'' {
                if i + 1 < bytes.len() && bytes[i + 1] == b'\'' {
                    out.push(b' ');
                    out.push(b' ');
                    i += 2;
                    continue;
                }
                in_string = false;
                out.push(b'\'');
            } else {
                out.push(b' ');
            }
        } else {
            if b == b'\'' {
                in_string = true;
            }
            out.push(b);
        }
        i += 1;
    }
    String::from_utf8(out).unwrap_or_else(|_| sql.to_string())
}

/// The FROM clause naming the base table, skipping the FROM inside
/// EXTRACT(... FROM AGE(...)) and similar function forms.
fn root_from_captures(masked: &str) -> Option<regex::Captures<'_>> {
    for caps in FROM_RE.captures_iter(masked) {
        if let Some(base) = caps.get(1) {
            if masked[base.end()..].starts_with('(') {
                continue;
            }
            return Some(caps);
        }
    }
    None
}

fn normalize_root_alias(sql: &str, fixes: &mut Vec<ValidationRule>) -> String {
    let masked = mask_string_literals(sql);
    let caps = match root_from_captures(&masked) {
        Some(c) => c,
        None => return sql.to_string(),
    };
    let base_match = match caps.get(1) {
        Some(m) => m,
        None => return sql.to_string(),
    };
    let base = base_match.as_str().to_lowercase();
    let alias = caps
        .get(2)
        .filter(|m| !RESERVED_AFTER_TABLE.contains(&m.as_str().to_lowercase().as_str()));

    if base == catalog::ROOT_TABLE {
        match alias {
            None => {
                let mut out = sql.to_string();
                out.insert_str(base_match.end(), &format!(" {}", catalog::ROOT_ALIAS));
                fixes.push(ValidationRule::RootAlias);
                out
            }
            Some(m) if m.as_str().eq_ignore_ascii_case(catalog::ROOT_ALIAS) => sql.to_string(),
            Some(m) => {
                let out = rename_alias(sql, &masked, m, catalog::ROOT_ALIAS);
                fixes.push(ValidationRule::RootAlias);
                out
            }
        }
    } else if let Some(base_join) = catalog::join_for_table(&base) {
        let out = rebuild_from_section(sql, &masked, base_join, alias);
        fixes.push(ValidationRule::RootAlias);
        out
    } else {
        sql.to_string()
    }
}

/// Replace an alias token and every `alias.` reference with a new alias.
/// Reference positions come from the masked text so literals stay intact.
fn rename_alias(sql: &str, masked: &str, alias: regex::Match<'_>, new_alias: &str) -> String {
    let mut spans: Vec<(usize, usize, String)> =
        vec![(alias.start(), alias.end(), new_alias.to_string())];
    let pattern = format!(r"(?i)\b{}\.", regex::escape(alias.as_str()));
    if let Ok(re) = Regex::new(&pattern) {
        for m in re.find_iter(masked) {
            spans.push((m.start(), m.end(), format!("{}.", new_alias)));
        }
    }
    splice(sql, spans)
}

/// The model selected a child table as the base. Rewrite references to
/// canonical aliases, then rebuild the whole FROM section as the root table
/// plus canonical joins for every alias the query still uses.
fn rebuild_from_section(
    sql: &str,
    masked: &str,
    base_join: catalog::JoinSpec,
    given_alias: Option<regex::Match<'_>>,
) -> String {
    let mut spans: Vec<(usize, usize, String)> = Vec::new();
    if let Some(alias) = given_alias {
        if !alias.as_str().eq_ignore_ascii_case(base_join.alias) {
            let pattern = format!(r"(?i)\b{}\.", regex::escape(alias.as_str()));
            if let Ok(re) = Regex::new(&pattern) {
                for m in re.find_iter(masked) {
                    spans.push((m.start(), m.end(), format!("{}.", base_join.alias)));
                }
            }
        }
    }
    for table in catalog::TABLES {
        if table.name == table.alias {
            continue;
        }
        let pattern = format!(r"(?i)\b{}\.", regex::escape(table.name));
        if let Ok(re) = Regex::new(&pattern) {
            for m in re.find_iter(masked) {
                spans.push((m.start(), m.end(), format!("{}.", table.alias)));
            }
        }
    }
    let rewritten = splice(sql, spans);

    let masked = mask_string_literals(&rewritten);
    let caps = match root_from_captures(&masked) {
        Some(c) => c,
        None => return rewritten,
    };
    let from_start = match caps.get(0) {
        Some(m) => m.start(),
        None => return rewritten,
    };
    let base_end = match caps.get(1) {
        Some(m) => m.end(),
        None => return rewritten,
    };
    let tail_start = FROM_TAIL_RE
        .find_at(&masked, base_end)
        .map(|m| m.start());

    let kept = match tail_start {
        Some(t) => format!("{}{}", &masked[..from_start], &masked[t..]),
        None => masked[..from_start].to_string(),
    };
    let mut needed: Vec<&str> = vec![base_join.alias];
    for caps in ALIAS_REF_RE.captures_iter(&kept) {
        let alias = caps[1].to_lowercase();
        if let Some(join) = catalog::join_for_alias(&alias) {
            if !needed.contains(&join.alias) {
                needed.push(join.alias);
            }
        }
    }

    let mut from_section = format!("FROM {} {}", catalog::ROOT_TABLE, catalog::ROOT_ALIAS);
    for join in catalog::JOINS {
        if needed.contains(&join.alias) {
            from_section.push(' ');
            from_section.push_str(&join.clause());
        }
    }

    match tail_start {
        Some(t) => format!("{}{} {}", &rewritten[..from_start], from_section, &rewritten[t..]),
        None => format!("{}{}", &rewritten[..from_start], from_section),
    }
}

fn splice(sql: &str, mut spans: Vec<(usize, usize, String)>) -> String {
    if spans.is_empty() {
        return sql.to_string();
    }
    spans.sort_by_key(|s| s.0);
    let mut out = String::with_capacity(sql.len());
    let mut last = 0;
    for (start, end, replacement) in spans {
        if start < last {
            continue;
        }
        out.push_str(&sql[last..start]);
        out.push_str(&replacement);
        last = end;
    }
    out.push_str(&sql[last..]);
    out
}

struct PlaceholderHit {
    start: usize,
    end: usize,
    attribute: Option<String>,
}

fn collect_placeholders(sql: &str) -> Vec<PlaceholderHit> {
    let mut hits: Vec<PlaceholderHit> = Vec::new();
    for m in ANGLE_PLACEHOLDER_RE.find_iter(sql) {
        let inner = m
            .as_str()
            .trim_matches('\'')
            .trim_start_matches('<')
            .trim_end_matches('>');
        hits.push(PlaceholderHit {
            start: m.start(),
            end: m.end(),
            attribute: Some(inner.to_string()),
        });
    }
    for m in LITERAL_PLACEHOLDER_RE.find_iter(sql) {
        hits.push(PlaceholderHit {
            start: m.start(),
            end: m.end(),
            attribute: None,
        });
    }
    hits.sort_by_key(|h| h.start);
    hits
}

fn find_placeholder(sql: &str) -> Option<String> {
    collect_placeholders(sql)
        .into_iter()
        .next()
        .map(|h| sql[h.start..h.end].to_string())
}

/// Render an intent value the way its transform expects: numeric transforms
/// become bare numbers, everything else a quoted lowercase literal. None
/// means the value has no usable rendering.
fn replacement_for(filter: &IntentFilter) -> Option<String> {
    let transform = catalog::mapping_for(&filter.attribute).map(|m| m.transform);
    match transform {
        Some(ValueTransform::NumericGe) => {
            catalog::parse_income(&filter.value).map(catalog::format_number)
        }
        Some(ValueTransform::NumericBetween) | Some(ValueTransform::DateAgeBetween) => {
            catalog::parse_numbers(&filter.value)
                .into_iter()
                .next()
                .map(catalog::format_number)
        }
        _ => {
            let lowered = filter.value.trim().to_lowercase();
            match lowered.as_str() {
                "true" | "yes" => Some("TRUE".to_string()),
                "false" | "no" => Some("FALSE".to_string()),
                _ => Some(format!("'{}'", catalog::escape(&lowered))),
            }
        }
    }
}

/// Named placeholders bind to the matching intent filter; anonymous ones
/// consume the remaining filters in order. Unfillable placeholders are left
/// in place for the residue rule to report.
fn fill_placeholders(
    sql: &str,
    intent: &ExtractedIntent,
    fixes: &mut Vec<ValidationRule>,
) -> crate::error::Result<String> {
    let hits = collect_placeholders(sql);
    if hits.is_empty() {
        return Ok(sql.to_string());
    }
    if intent.is_empty() {
        return Err(PipelineError::Validation {
            rule: ValidationRule::PlaceholderFill.as_str().to_string(),
            message: "query has placeholders but no filters to fill them with".to_string(),
        });
    }

    let mut used = vec![false; intent.len()];
    let mut spans: Vec<(usize, usize, String)> = Vec::new();
    let mut anonymous: Vec<usize> = Vec::new();

    for (index, hit) in hits.iter().enumerate() {
        let bound = hit.attribute.as_deref().and_then(|raw| {
            let mapping = catalog::mapping_for(raw)?;
            intent.iter().position(|f| f.attribute == mapping.attribute)
        });
        match bound {
            Some(filter_index) => {
                if let Some(replacement) = replacement_for(&intent[filter_index]) {
                    used[filter_index] = true;
                    spans.push((hit.start, hit.end, replacement));
                }
            }
            None => anonymous.push(index),
        }
    }
    for index in anonymous {
        let filter_index = match used.iter().position(|u| !*u) {
            Some(i) => i,
            None => break,
        };
        used[filter_index] = true;
        if let Some(replacement) = replacement_for(&intent[filter_index]) {
            spans.push((hits[index].start, hits[index].end, replacement));
        }
    }

    if spans.is_empty() {
        return Ok(sql.to_string());
    }
    fixes.push(ValidationRule::PlaceholderFill);
    Ok(splice(sql, spans))
}

fn repair_trailing_syntax(sql: &str, fixes: &mut Vec<ValidationRule>) -> String {
    let mut current = sql.to_string();
    let mut touched = false;
    loop {
        let masked = mask_string_literals(&current);
        if let Some(pos) = masked.find(';') {
            current.remove(pos);
            touched = true;
            continue;
        }
        let open = masked.matches('(').count();
        let close = masked.matches(')').count();
        if close > open {
            if let Some(pos) = masked.rfind(')') {
                current.remove(pos);
                touched = true;
                continue;
            }
        }
        break;
    }
    if touched {
        fixes.push(ValidationRule::TrailingSyntax);
        current.trim().to_string()
    } else {
        current
    }
}

/// The WHERE section of the masked query, lowercased. Coverage checks look
/// here only: listing SELECT lists always name the identity columns, so a
/// whole-query scan would never report a missing name filter.
fn where_section_lower(sql: &str) -> String {
    let masked = mask_string_literals(sql);
    let start = match WHERE_RE.find(&masked) {
        Some(m) => m.end(),
        None => return String::new(),
    };
    let rest = &masked[start..];
    let section = match SECTION_TAIL_RE.find(rest) {
        Some(m) => &rest[..m.start()],
        None => rest,
    };
    section.to_lowercase()
}

/// Insert a predicate into the WHERE clause, creating the clause if the
/// query has none, always ahead of GROUP BY / ORDER BY / LIMIT.
fn and_into_where(sql: &str, predicate: &str) -> String {
    let masked = mask_string_literals(sql);
    match WHERE_RE.find(&masked) {
        Some(w) => match SECTION_TAIL_RE.find(&masked[w.end()..]) {
            Some(tail) => {
                let at = w.end() + tail.start();
                format!("{}AND {} {}", &sql[..at], predicate, &sql[at..])
            }
            None => format!("{} AND {}", sql, predicate),
        },
        None => match SECTION_TAIL_RE.find(&masked) {
            Some(tail) => {
                let at = tail.start();
                format!("{}WHERE {} {}", &sql[..at], predicate, &sql[at..])
            }
            None => format!("{} WHERE {}", sql, predicate),
        },
    }
}

fn has_canonical_join(lowered: &str, table: &str, reference: &str) -> bool {
    let pattern = format!(
        r"join\s+{}(?:\s+(?:as\s+)?{})?\s+on\s+(?:p\.id\s*=\s*{}\.profile_id|{}\.profile_id\s*=\s*p\.id)",
        regex::escape(table),
        regex::escape(reference),
        regex::escape(reference),
        regex::escape(reference)
    );
    Regex::new(&pattern)
        .map(|re| re.is_match(lowered))
        .unwrap_or(false)
}

fn check_join_completeness(masked: &str) -> crate::error::Result<()> {
    let lowered = masked.to_lowercase();
    for caps in ALIAS_REF_RE.captures_iter(&lowered) {
        let reference = caps[1].to_string();
        if reference == catalog::ROOT_ALIAS || reference == catalog::ROOT_TABLE {
            continue;
        }
        if let Some(join) = catalog::join_for_alias(&reference) {
            if !has_canonical_join(&lowered, join.table, join.alias) {
                return Err(PipelineError::JoinIncomplete {
                    alias: join.alias.to_string(),
                    table: join.table.to_string(),
                });
            }
        } else if let Some(join) = catalog::join_for_table(&reference) {
            // Table name used as the reference, so the join must not alias it.
            if !has_canonical_join(&lowered, join.table, join.table) {
                return Err(PipelineError::JoinIncomplete {
                    alias: join.table.to_string(),
                    table: join.table.to_string(),
                });
            }
        } else {
            return Err(PipelineError::Validation {
                rule: ValidationRule::JoinCompleteness.as_str().to_string(),
                message: format!("unknown table alias '{}'", reference),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder;
    use crate::intent::{IntentFilter, QueryShape};

    fn filter(attribute: &str, value: &str) -> IntentFilter {
        IntentFilter {
            attribute: attribute.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn test_mask_preserves_offsets() {
        let sql = "WHERE LOWER(l.city) LIKE '%; drop table%' AND p.id = 1";
        let masked = mask_string_literals(sql);
        assert_eq!(masked.len(), sql.len());
        assert!(!masked.contains("drop"));
        assert!(masked.contains("AND p.id = 1"));
        // Escaped quote stays inside the literal
        let escaped = mask_string_literals("x = 'd''souza' AND y = 2");
        assert!(escaped.contains("AND y = 2"));
        assert!(!escaped.contains("souza"));
    }

    #[test]
    fn test_canonical_query_passes_untouched() {
        let intent = vec![filter("gender", "female"), filter("city", "Pune")];
        let sql = builder::build_query(&intent, QueryShape::Listing).unwrap();
        let result = validate(&sql, &intent);
        assert!(result.valid);
        assert!(!result.fixed);
        assert!(result.applied_fixes.is_empty());
        assert_eq!(result.query, sql);
    }

    #[test]
    fn test_missing_root_alias_inserted() {
        let sql = "SELECT p.id FROM profiles WHERE p.gender = 'female' LIMIT 50";
        let result = validate(sql, &vec![filter("gender", "female")]);
        assert!(result.valid);
        assert!(result.fixed);
        assert!(result.query.contains("FROM profiles p WHERE"));
        assert_eq!(result.applied_fixes, vec![ValidationRule::RootAlias]);
    }

    #[test]
    fn test_wrong_root_alias_renamed_everywhere() {
        let sql = "SELECT pr.id, pr.first_name FROM profiles pr WHERE LOWER(pr.gender) = 'female' LIMIT 50";
        let result = validate(sql, &vec![filter("gender", "female")]);
        assert!(result.valid);
        assert!(result.query.contains("FROM profiles p WHERE"));
        assert!(result.query.contains("SELECT p.id, p.first_name"));
        assert!(result.query.contains("LOWER(p.gender)"));
        assert!(!result.query.contains("pr."));

        // Second pass applies nothing further
        let again = validate(&result.query, &vec![filter("gender", "female")]);
        assert!(again.valid);
        assert!(!again.fixed);
        assert_eq!(again.query, result.query);
    }

    #[test]
    fn test_child_base_table_rebuilt_onto_root() {
        let sql = "SELECT c.profession FROM careers c WHERE LOWER(c.profession) LIKE '%doctor%' LIMIT 50";
        let result = validate(sql, &Vec::new());
        assert!(result.valid, "error: {:?}", result.error);
        assert!(result
            .query
            .contains("FROM profiles p JOIN careers c ON p.id = c.profile_id WHERE"));
        assert!(result.applied_fixes.contains(&ValidationRule::RootAlias));
    }

    #[test]
    fn test_child_base_with_table_name_references() {
        let sql =
            "SELECT careers.profession FROM careers WHERE careers.profession LIKE '%doctor%' LIMIT 10";
        let result = validate(sql, &Vec::new());
        assert!(result.valid, "error: {:?}", result.error);
        assert!(result.query.contains("FROM profiles p JOIN careers c"));
        assert!(result.query.contains("c.profession"));
        assert!(!result.query.contains("careers.profession"));
    }

    #[test]
    fn test_named_placeholder_filled() {
        let sql =
            "SELECT p.id FROM profiles p WHERE LOWER(p.religion) = '<religion>' LIMIT 50";
        let intent = vec![filter("religion", "Hindu")];
        let result = validate(sql, &intent);
        assert!(result.valid);
        assert!(result.query.contains("LOWER(p.religion) = 'hindu'"));
        assert!(result.applied_fixes.contains(&ValidationRule::PlaceholderFill));
    }

    #[test]
    fn test_anonymous_placeholder_filled_positionally() {
        let sql = "SELECT p.id FROM profiles p WHERE LOWER(p.religion) = 'value' LIMIT 50";
        let intent = vec![filter("religion", "Jain")];
        let result = validate(sql, &intent);
        assert!(result.valid);
        assert!(result.query.contains("= 'jain'"));
    }

    #[test]
    fn test_numeric_placeholder_gets_bare_number() {
        let sql =
            "SELECT p.id FROM profiles p JOIN careers c ON p.id = c.profile_id WHERE c.annual_income >= <annual_income> LIMIT 50";
        let intent = vec![filter("annual_income", "15 LPA")];
        let result = validate(sql, &intent);
        assert!(result.valid);
        assert!(result.query.contains("c.annual_income >= 1500000"));
    }

    #[test]
    fn test_placeholders_without_intent_fail() {
        let sql = "SELECT p.id FROM profiles p WHERE p.religion = '<religion>' LIMIT 50";
        let result = validate(sql, &Vec::new());
        assert!(!result.valid);
        match result.error {
            Some(PipelineError::Validation { ref rule, .. }) => {
                assert_eq!(rule, "placeholder_fill")
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_unfillable_placeholder_reported_as_residue() {
        // The only filter has no numeric rendering, so the token stays.
        let sql = "SELECT p.id FROM profiles p JOIN careers c ON p.id = c.profile_id WHERE c.annual_income >= :value LIMIT 50";
        let intent = vec![filter("annual_income", "well settled")];
        let result = validate(sql, &intent);
        assert!(!result.valid);
        match result.error {
            Some(PipelineError::Validation { ref rule, .. }) => {
                assert_eq!(rule, "placeholder_residue")
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_trailing_semicolon_and_paren_removed() {
        let sql = "SELECT p.id FROM profiles p WHERE LOWER(p.gender) = 'male') LIMIT 50;";
        let result = validate(sql, &vec![filter("gender", "male")]);
        assert!(result.valid, "error: {:?}", result.error);
        assert!(!result.query.contains(';'));
        assert!(result.query.ends_with("LIMIT 50"));
        assert_eq!(
            result.query.matches('(').count(),
            result.query.matches(')').count()
        );
        assert!(result.applied_fixes.contains(&ValidationRule::TrailingSyntax));
    }

    #[test]
    fn test_stray_semicolon_and_paren_removed_mid_query() {
        // Strays sitting before the tail are swept too, not only trailing ones.
        let sql = "SELECT p.id FROM profiles p \
                   WHERE (LOWER(p.gender) = 'male')) AND p.has_photo = TRUE; LIMIT 50";
        let result = validate(sql, &vec![filter("gender", "male")]);
        assert!(result.valid, "error: {:?}", result.error);
        assert!(result
            .query
            .contains("(LOWER(p.gender) = 'male') AND p.has_photo = TRUE LIMIT 50"));
        assert_eq!(result.applied_fixes, vec![ValidationRule::TrailingSyntax]);
    }

    #[test]
    fn test_semicolon_inside_literal_kept() {
        let sql = "SELECT p.id FROM profiles p WHERE LOWER(l.city) LIKE '%;%'";
        // The join is missing, but the point here is the literal survives rule 3.
        let result = validate(sql, &Vec::new());
        assert!(result.query.contains("'%;%'"));
    }

    #[test]
    fn test_unknown_base_table_fails() {
        let sql = "SELECT u.id FROM users u WHERE u.active = TRUE";
        let result = validate(sql, &Vec::new());
        assert!(!result.valid);
        match result.error {
            Some(PipelineError::Validation { ref rule, .. }) => assert_eq!(rule, "base_table"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_name_filter_injected_into_where() {
        // SELECT already names the identity columns; only WHERE counts.
        let sql = "SELECT p.id, p.first_name, p.last_name FROM profiles p WHERE LOWER(p.religion) = 'hindu' LIMIT 50";
        let intent = vec![filter("name", "Priya"), filter("religion", "hindu")];
        let result = validate(sql, &intent);
        assert!(result.valid);
        assert!(result.query.contains(
            "AND (LOWER(p.first_name) LIKE '%priya%' OR LOWER(p.last_name) LIKE '%priya%') LIMIT 50"
        ));
        assert_eq!(result.applied_fixes, vec![ValidationRule::NameFilter]);
    }

    #[test]
    fn test_age_filter_injected_before_limit() {
        let sql = "SELECT p.id, p.first_name, p.last_name FROM profiles p LIMIT 50";
        let intent = vec![filter("age", "25-30")];
        let result = validate(sql, &intent);
        assert!(result.valid);
        assert!(result.query.contains(
            "WHERE EXTRACT(YEAR FROM AGE(CURRENT_DATE, p.date_of_birth)) BETWEEN 25 AND 30 LIMIT 50"
        ));
        assert_eq!(result.applied_fixes, vec![ValidationRule::AgeFilter]);
    }

    #[test]
    fn test_raw_birthdate_bound_still_gets_age_predicate() {
        // A literal date window is not an age computation.
        let sql = "SELECT p.id, p.first_name, p.last_name FROM profiles p \
                   WHERE p.date_of_birth BETWEEN '1996-01-01' AND '2001-12-31' LIMIT 50";
        let intent = vec![filter("age", "25-30")];
        let result = validate(sql, &intent);
        assert!(result.valid, "error: {:?}", result.error);
        assert!(result.query.contains(
            "AND EXTRACT(YEAR FROM AGE(CURRENT_DATE, p.date_of_birth)) BETWEEN 25 AND 30 LIMIT 50"
        ));
        assert_eq!(result.applied_fixes, vec![ValidationRule::AgeFilter]);

        let again = validate(&result.query, &intent);
        assert!(!again.fixed);
        assert_eq!(again.query, result.query);
    }

    #[test]
    fn test_unparseable_age_fails() {
        let sql = "SELECT p.id FROM profiles p LIMIT 50";
        let intent = vec![filter("age", "young and fun")];
        let result = validate(sql, &intent);
        assert!(!result.valid);
        match result.error {
            Some(PipelineError::Validation { ref rule, .. }) => assert_eq!(rule, "age_filter"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_missing_join_is_not_auto_fixed() {
        let sql =
            "SELECT p.id, c.profession FROM profiles p WHERE LOWER(c.profession) LIKE '%doctor%' LIMIT 50";
        let result = validate(sql, &Vec::new());
        assert!(!result.valid);
        match result.error {
            Some(PipelineError::JoinIncomplete { ref alias, ref table }) => {
                assert_eq!(alias, "c");
                assert_eq!(table, "careers");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_join_on_wrong_key_rejected() {
        let sql = "SELECT p.id FROM profiles p JOIN careers c ON c.id = p.id WHERE c.annual_income >= 1000000 LIMIT 50";
        let result = validate(sql, &Vec::new());
        assert!(!result.valid);
        assert!(matches!(
            result.error,
            Some(PipelineError::JoinIncomplete { .. })
        ));
    }

    #[test]
    fn test_reversed_join_key_accepted() {
        let sql = "SELECT p.id FROM profiles p JOIN careers c ON c.profile_id = p.id WHERE c.annual_income >= 1000000 LIMIT 50";
        let result = validate(sql, &Vec::new());
        assert!(result.valid, "error: {:?}", result.error);
        assert!(!result.fixed);
    }

    #[test]
    fn test_unknown_alias_rejected() {
        let sql = "SELECT p.id, x.thing FROM profiles p LIMIT 50";
        let result = validate(sql, &Vec::new());
        assert!(!result.valid);
        match result.error {
            Some(PipelineError::Validation { ref rule, .. }) => {
                assert_eq!(rule, "join_completeness")
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_compound_repair_is_idempotent() {
        let sql = "SELECT pr.id, pr.first_name FROM profiles pr WHERE LOWER(pr.religion) = '<religion>' LIMIT 50;";
        let intent = vec![filter("religion", "Sikh"), filter("age", "25-30")];
        let first = validate(sql, &intent);
        assert!(first.valid, "error: {:?}", first.error);
        assert!(first.applied_fixes.contains(&ValidationRule::RootAlias));
        assert!(first.applied_fixes.contains(&ValidationRule::PlaceholderFill));
        assert!(first.applied_fixes.contains(&ValidationRule::TrailingSyntax));
        assert!(first.applied_fixes.contains(&ValidationRule::AgeFilter));

        let second = validate(&first.query, &intent);
        assert!(second.valid);
        assert!(!second.fixed);
        assert_eq!(second.query, first.query);
    }

    #[test]
    fn test_built_queries_always_revalidate_clean() {
        let intents: Vec<Vec<IntentFilter>> = vec![
            vec![filter("gender", "female"), filter("age", "25-30")],
            vec![filter("profession", "doctor"), filter("city", "Pune")],
            vec![filter("name", "Priya")],
            vec![
                filter("religion", "hindu"),
                filter("annual_income", "15 LPA"),
                filter("diet", "vegetarian"),
            ],
        ];
        for intent in intents {
            for shape in [QueryShape::Listing, QueryShape::Count] {
                let sql = builder::build_query(&intent, shape).unwrap();
                let result = validate(&sql, &intent);
                assert!(result.valid, "rejected {:?}: {:?}", sql, result.error);
                assert!(!result.fixed, "modified {:?} into {:?}", sql, result.query);
            }
        }
    }
}
