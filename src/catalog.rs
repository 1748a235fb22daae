use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use strsim::jaro_winkler;

pub const ROOT_TABLE: &str = "profiles";
pub const ROOT_ALIAS: &str = "p";
pub const ROOT_KEY: &str = "p.id";

/// A table in the fixed profile schema.
#[derive(Debug, Clone)]
pub struct TableEntry {
    pub name: &'static str,
    pub alias: &'static str,
    pub columns: &'static [&'static str],
    pub description: &'static str,
}

impl TableEntry {
    /// Text block used for prompts and for schema context embedding.
    pub fn describe(&self) -> String {
        format!(
            "Table {} (alias {}): {}. Columns: {}",
            self.name,
            self.alias,
            self.description,
            self.columns.join(", ")
        )
    }
}

/// A child table joined to the root, always keyed on the root primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinSpec {
    pub table: &'static str,
    pub alias: &'static str,
}

impl JoinSpec {
    pub fn clause(&self) -> String {
        format!(
            "JOIN {} {} ON p.id = {}.profile_id",
            self.table, self.alias, self.alias
        )
    }
}

/// How a raw filter value is turned into a SQL predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueTransform {
    Exact,
    Substring,
    NumericGe,
    NumericBetween,
    DateAgeBetween,
}

/// Binding from a search attribute to columns, join and transform.
#[derive(Debug, Clone)]
pub struct AttributeMapping {
    pub attribute: &'static str,
    pub columns: &'static [&'static str],
    pub join: Option<JoinSpec>,
    pub transform: ValueTransform,
    /// Column surfaced in listing output alongside the identity columns.
    pub display: Option<&'static str>,
}

pub static TABLES: &[TableEntry] = &[
    TableEntry {
        name: "profiles",
        alias: "p",
        columns: &[
            "id",
            "first_name",
            "last_name",
            "gender",
            "date_of_birth",
            "marital_status",
            "religion",
            "caste",
            "mother_tongue",
            "has_photo",
            "is_verified",
            "created_at",
        ],
        description: "root table, one row per member: identity, gender, birth date, marital status, religion, caste, mother tongue and verification flags",
    },
    TableEntry {
        name: "careers",
        alias: "c",
        columns: &["profile_id", "profession", "company", "annual_income", "employment_type"],
        description: "employment details: profession, employer, annual income in rupees, employment type",
    },
    TableEntry {
        name: "locations",
        alias: "l",
        columns: &["profile_id", "city", "state", "country", "native_place", "residency_status"],
        description: "current residence (city, state, country, residency status) and native place of origin",
    },
    TableEntry {
        name: "educations",
        alias: "e",
        columns: &["profile_id", "degree", "field_of_study", "institution"],
        description: "education history: degrees, fields of study and institutions",
    },
    TableEntry {
        name: "lifestyles",
        alias: "ls",
        columns: &["profile_id", "diet", "smoking", "drinking"],
        description: "lifestyle habits: diet, smoking and drinking",
    },
    TableEntry {
        name: "physical_attributes",
        alias: "pa",
        columns: &["profile_id", "height_cm", "weight_kg", "body_type", "complexion"],
        description: "physical attributes: height in centimetres, weight, body type, complexion",
    },
];

const CAREERS: JoinSpec = JoinSpec { table: "careers", alias: "c" };
const LOCATIONS: JoinSpec = JoinSpec { table: "locations", alias: "l" };
const EDUCATIONS: JoinSpec = JoinSpec { table: "educations", alias: "e" };
const LIFESTYLES: JoinSpec = JoinSpec { table: "lifestyles", alias: "ls" };
const PHYSICAL: JoinSpec = JoinSpec { table: "physical_attributes", alias: "pa" };

/// Declaration order here fixes the join order in built queries.
pub static JOINS: &[JoinSpec] = &[CAREERS, LOCATIONS, EDUCATIONS, LIFESTYLES, PHYSICAL];

pub static MAPPINGS: &[AttributeMapping] = &[
    AttributeMapping {
        attribute: "name",
        columns: &["p.first_name", "p.last_name"],
        join: None,
        transform: ValueTransform::Substring,
        display: None,
    },
    AttributeMapping {
        attribute: "gender",
        columns: &["p.gender"],
        join: None,
        transform: ValueTransform::Exact,
        display: Some("p.gender"),
    },
    AttributeMapping {
        attribute: "age",
        columns: &["p.date_of_birth"],
        join: None,
        transform: ValueTransform::DateAgeBetween,
        display: Some("p.date_of_birth"),
    },
    AttributeMapping {
        attribute: "marital_status",
        columns: &["p.marital_status"],
        join: None,
        transform: ValueTransform::Exact,
        display: Some("p.marital_status"),
    },
    AttributeMapping {
        attribute: "religion",
        columns: &["p.religion"],
        join: None,
        transform: ValueTransform::Exact,
        display: Some("p.religion"),
    },
    AttributeMapping {
        attribute: "caste",
        columns: &["p.caste"],
        join: None,
        transform: ValueTransform::Substring,
        display: Some("p.caste"),
    },
    AttributeMapping {
        attribute: "mother_tongue",
        columns: &["p.mother_tongue"],
        join: None,
        transform: ValueTransform::Exact,
        display: Some("p.mother_tongue"),
    },
    AttributeMapping {
        attribute: "has_photo",
        columns: &["p.has_photo"],
        join: None,
        transform: ValueTransform::Exact,
        display: None,
    },
    AttributeMapping {
        attribute: "verified",
        columns: &["p.is_verified"],
        join: None,
        transform: ValueTransform::Exact,
        display: None,
    },
    AttributeMapping {
        attribute: "profession",
        columns: &["c.profession"],
        join: Some(CAREERS),
        transform: ValueTransform::Substring,
        display: Some("c.profession"),
    },
    AttributeMapping {
        attribute: "company",
        columns: &["c.company"],
        join: Some(CAREERS),
        transform: ValueTransform::Substring,
        display: Some("c.company"),
    },
    AttributeMapping {
        attribute: "annual_income",
        columns: &["c.annual_income"],
        join: Some(CAREERS),
        transform: ValueTransform::NumericGe,
        display: Some("c.annual_income"),
    },
    AttributeMapping {
        attribute: "employment_type",
        columns: &["c.employment_type"],
        join: Some(CAREERS),
        transform: ValueTransform::Exact,
        display: Some("c.employment_type"),
    },
    AttributeMapping {
        attribute: "city",
        columns: &["l.city"],
        join: Some(LOCATIONS),
        transform: ValueTransform::Substring,
        display: Some("l.city"),
    },
    AttributeMapping {
        attribute: "state",
        columns: &["l.state"],
        join: Some(LOCATIONS),
        transform: ValueTransform::Substring,
        display: Some("l.state"),
    },
    AttributeMapping {
        attribute: "country",
        columns: &["l.country"],
        join: Some(LOCATIONS),
        transform: ValueTransform::Substring,
        display: Some("l.country"),
    },
    AttributeMapping {
        attribute: "native_place",
        columns: &["l.native_place"],
        join: Some(LOCATIONS),
        transform: ValueTransform::Substring,
        display: Some("l.native_place"),
    },
    AttributeMapping {
        attribute: "degree",
        columns: &["e.degree"],
        join: Some(EDUCATIONS),
        transform: ValueTransform::Substring,
        display: Some("e.degree"),
    },
    AttributeMapping {
        attribute: "field_of_study",
        columns: &["e.field_of_study"],
        join: Some(EDUCATIONS),
        transform: ValueTransform::Substring,
        display: Some("e.field_of_study"),
    },
    AttributeMapping {
        attribute: "institution",
        columns: &["e.institution"],
        join: Some(EDUCATIONS),
        transform: ValueTransform::Substring,
        display: Some("e.institution"),
    },
    AttributeMapping {
        attribute: "diet",
        columns: &["ls.diet"],
        join: Some(LIFESTYLES),
        transform: ValueTransform::Exact,
        display: Some("ls.diet"),
    },
    AttributeMapping {
        attribute: "smoking",
        columns: &["ls.smoking"],
        join: Some(LIFESTYLES),
        transform: ValueTransform::Exact,
        display: None,
    },
    AttributeMapping {
        attribute: "drinking",
        columns: &["ls.drinking"],
        join: Some(LIFESTYLES),
        transform: ValueTransform::Exact,
        display: None,
    },
    AttributeMapping {
        attribute: "height",
        columns: &["pa.height_cm"],
        join: Some(PHYSICAL),
        transform: ValueTransform::NumericBetween,
        display: Some("pa.height_cm"),
    },
    AttributeMapping {
        attribute: "body_type",
        columns: &["pa.body_type"],
        join: Some(PHYSICAL),
        transform: ValueTransform::Exact,
        display: None,
    },
    AttributeMapping {
        attribute: "complexion",
        columns: &["pa.complexion"],
        join: Some(PHYSICAL),
        transform: ValueTransform::Exact,
        display: None,
    },
];

lazy_static! {
    static ref SYNONYMS: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("income", "annual_income");
        m.insert("salary", "annual_income");
        m.insert("annual_salary", "annual_income");
        m.insert("package", "annual_income");
        m.insert("earnings", "annual_income");
        m.insert("origin", "native_place");
        m.insert("hometown", "native_place");
        m.insert("home_town", "native_place");
        m.insert("native", "native_place");
        m.insert("language", "mother_tongue");
        m.insert("tongue", "mother_tongue");
        m.insert("occupation", "profession");
        m.insert("job", "profession");
        m.insert("job_title", "profession");
        m.insert("work", "profession");
        m.insert("education", "degree");
        m.insert("qualification", "degree");
        m.insert("college", "institution");
        m.insert("university", "institution");
        m.insert("school", "institution");
        m.insert("field", "field_of_study");
        m.insert("stream", "field_of_study");
        m.insert("specialization", "field_of_study");
        m.insert("surname", "name");
        m.insert("full_name", "name");
        m.insert("first_name", "name");
        m.insert("last_name", "name");
        m.insert("community", "caste");
        m.insert("sub_caste", "caste");
        m.insert("subcaste", "caste");
        m.insert("faith", "religion");
        m.insert("sex", "gender");
        m.insert("food", "diet");
        m.insert("food_habit", "diet");
        m.insert("current_city", "city");
        m.insert("location", "city");
        m.insert("place", "city");
        m.insert("residence", "city");
        m.insert("employer", "company");
        m.insert("organisation", "company");
        m.insert("organization", "company");
        m.insert("photo", "has_photo");
        m.insert("profile_photo", "has_photo");
        m.insert("is_verified", "verified");
        m.insert("verification", "verified");
        m
    };
    static ref NUMBER_RE: Regex = Regex::new(r"\d+(?:\.\d+)?").unwrap();
}

/// Similarity floor for near-miss attribute names from model output.
const FUZZY_THRESHOLD: f64 = 0.88;

/// Resolve a raw attribute name to its mapping. Normalizes, then tries the
/// synonym table, then a Jaro-Winkler pass for near misses.
pub fn mapping_for(raw: &str) -> Option<&'static AttributeMapping> {
    let mut key = normalize_attribute(raw);
    if let Some(canonical) = SYNONYMS.get(key.as_str()) {
        key = (*canonical).to_string();
    }
    if let Some(mapping) = MAPPINGS.iter().find(|m| m.attribute == key) {
        return Some(mapping);
    }
    fuzzy_mapping(&key)
}

fn normalize_attribute(raw: &str) -> String {
    let mut key = raw.trim().to_lowercase();
    // "location.city" -> "city"
    if let Some((_, rest)) = key.split_once('.') {
        key = rest.to_string();
    }
    key.replace([' ', '-'], "_")
}

fn fuzzy_mapping(key: &str) -> Option<&'static AttributeMapping> {
    let mut best: Option<(&'static AttributeMapping, f64)> = None;
    for mapping in MAPPINGS {
        let score = jaro_winkler(key, mapping.attribute);
        if score >= FUZZY_THRESHOLD && best.map_or(true, |(_, s)| score > s) {
            best = Some((mapping, score));
        }
    }
    best.map(|(mapping, _)| mapping)
}

pub fn table_for_alias(alias: &str) -> Option<&'static TableEntry> {
    TABLES.iter().find(|t| t.alias == alias)
}

pub fn join_for_alias(alias: &str) -> Option<JoinSpec> {
    JOINS.iter().copied().find(|j| j.alias == alias)
}

pub fn join_for_table(table: &str) -> Option<JoinSpec> {
    JOINS.iter().copied().find(|j| j.table == table)
}

/// SQL expression deriving age in years from the birth date column.
pub fn age_expression() -> &'static str {
    "EXTRACT(YEAR FROM AGE(CURRENT_DATE, p.date_of_birth))"
}

/// Escape a literal for inclusion in single quotes.
pub fn escape(value: &str) -> String {
    value.replace('\'', "''")
}

pub fn parse_numbers(value: &str) -> Vec<f64> {
    NUMBER_RE
        .find_iter(value)
        .filter_map(|m| m.as_str().parse().ok())
        .collect()
}

/// Parse an income amount in rupees. "15 LPA" and "15 lakhs" scale by 1e5,
/// crores by 1e7; a bare number is taken as rupees.
pub fn parse_income(value: &str) -> Option<f64> {
    let lowered = value.to_lowercase();
    let amount = parse_numbers(&lowered).into_iter().next()?;
    if lowered.contains("lpa") || lowered.contains("lakh") || lowered.contains("lac") {
        Some(amount * 100_000.0)
    } else if lowered.contains("crore") || lowered.contains("cr ") || lowered.ends_with("cr") {
        Some(amount * 10_000_000.0)
    } else {
        Some(amount)
    }
}

pub(crate) fn format_number(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Canonical name predicate: substring match over both name columns.
pub fn name_predicate(value: &str) -> String {
    let needle = escape(&value.trim().to_lowercase());
    format!(
        "(LOWER(p.first_name) LIKE '%{}%' OR LOWER(p.last_name) LIKE '%{}%')",
        needle, needle
    )
}

/// Canonical age predicate. Two numeric tokens give an inclusive BETWEEN,
/// one gives an equality; no tokens means the value is unparseable.
pub fn age_predicate(value: &str) -> Option<String> {
    let numbers = parse_numbers(value);
    match numbers.as_slice() {
        [] => None,
        [n] => Some(format!("{} = {}", age_expression(), format_number(*n))),
        [a, b, ..] => {
            let (lo, hi) = if a <= b { (*a, *b) } else { (*b, *a) };
            Some(format!(
                "{} BETWEEN {} AND {}",
                age_expression(),
                format_number(lo),
                format_number(hi)
            ))
        }
    }
}

fn render_exact(column: &str, value: &str) -> String {
    let lowered = value.trim().to_lowercase();
    match lowered.as_str() {
        "true" | "yes" => return format!("{} = TRUE", column),
        "false" | "no" => return format!("{} = FALSE", column),
        _ => {}
    }
    if !lowered.is_empty() && lowered.chars().all(|c| c.is_ascii_digit()) {
        return format!("{} = {}", column, lowered);
    }
    format!("LOWER({}) = '{}'", column, escape(&lowered))
}

/// Render the SQL predicate for one filter. Returns None when a numeric or
/// date transform finds no usable tokens in the value.
pub fn render_predicate(mapping: &AttributeMapping, value: &str) -> Option<String> {
    let value = value.trim();
    match mapping.transform {
        ValueTransform::Exact => Some(render_exact(mapping.columns[0], value)),
        ValueTransform::Substring => {
            let needle = escape(&value.to_lowercase());
            let parts: Vec<String> = mapping
                .columns
                .iter()
                .map(|column| format!("LOWER({}) LIKE '%{}%'", column, needle))
                .collect();
            if parts.len() == 1 {
                Some(parts.join(""))
            } else {
                Some(format!("({})", parts.join(" OR ")))
            }
        }
        ValueTransform::NumericGe => {
            let amount = parse_income(value)?;
            Some(format!("{} >= {}", mapping.columns[0], format_number(amount)))
        }
        ValueTransform::NumericBetween => {
            let numbers = parse_numbers(value);
            match numbers.as_slice() {
                [] => None,
                [n] => Some(format!("{} >= {}", mapping.columns[0], format_number(*n))),
                [a, b, ..] => {
                    let (lo, hi) = if a <= b { (*a, *b) } else { (*b, *a) };
                    Some(format!(
                        "{} BETWEEN {} AND {}",
                        mapping.columns[0],
                        format_number(lo),
                        format_number(hi)
                    ))
                }
            }
        }
        ValueTransform::DateAgeBetween => age_predicate(value),
    }
}

/// Attribute vocabulary block for the intent extraction prompt.
pub fn vocabulary_block() -> String {
    MAPPINGS
        .iter()
        .map(|m| format!("- {} ({})", m.attribute, transform_hint(m.transform)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn transform_hint(transform: ValueTransform) -> &'static str {
    match transform {
        ValueTransform::Exact => "exact value",
        ValueTransform::Substring => "partial text match",
        ValueTransform::NumericGe => "minimum amount, supports LPA/lakh",
        ValueTransform::NumericBetween => "number or range",
        ValueTransform::DateAgeBetween => "age in years, single or range like 25-30",
    }
}

/// Canonical join lines for synthesis prompts.
pub fn canonical_join_block() -> String {
    JOINS
        .iter()
        .map(|j| j.clause())
        .collect::<Vec<_>>()
        .join("\n")
}
