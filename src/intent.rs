//! Intent extraction: turn a natural-language question into ordered
//! attribute/value filters. The model path is primary; a keyword and
//! pattern fallback takes over whenever it degrades.

use crate::catalog;
use crate::error::{PipelineError, Result};
use crate::providers::{GenerativeProvider, TokenUsage};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// One extracted filter, attribute canonicalized against the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentFilter {
    pub attribute: String,
    pub value: String,
}

/// Ordered filter list; duplicates resolve first-wins downstream.
pub type ExtractedIntent = Vec<IntentFilter>;

/// Whether the question asks for rows or for a count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryShape {
    Listing,
    Count,
}

lazy_static! {
    static ref COUNT_RE: Regex =
        Regex::new(r"(?i)\b(how many|count|number of|total number)\b").unwrap();
}

impl QueryShape {
    pub fn detect(question: &str) -> Self {
        if COUNT_RE.is_match(question) {
            QueryShape::Count
        } else {
            QueryShape::Listing
        }
    }
}

pub struct IntentExtractor {
    provider: Arc<dyn GenerativeProvider>,
}

impl IntentExtractor {
    pub fn new(provider: Arc<dyn GenerativeProvider>) -> Self {
        Self { provider }
    }

    /// Extract filters from the question. Never fails: a degraded model path
    /// hands over to the deterministic recognizers.
    pub async fn extract(&self, question: &str) -> (ExtractedIntent, Option<TokenUsage>) {
        match self.extract_with_model(question).await {
            Ok((intent, usage)) if !intent.is_empty() => (intent, usage),
            Ok((_, usage)) => {
                warn!("Model returned no usable filters, using keyword extraction");
                (extract_with_rules(question), usage)
            }
            Err(e) => {
                warn!("Intent extraction degraded ({}), using keyword extraction", e);
                (extract_with_rules(question), None)
            }
        }
    }

    async fn extract_with_model(
        &self,
        question: &str,
    ) -> Result<(ExtractedIntent, Option<TokenUsage>)> {
        let prompt = build_intent_prompt(question);
        let generation = self.provider.generate(&prompt).await?;
        let pairs = parse_intent_response(&generation.text)?;

        let mut intent: ExtractedIntent = Vec::new();
        for pair in pairs {
            match catalog::mapping_for(&pair.attribute) {
                Some(mapping) => push_filter(&mut intent, mapping.attribute, pair.value),
                None => warn!("Dropping unknown attribute '{}' from model output", pair.attribute),
            }
        }
        Ok((intent, generation.usage))
    }
}

fn build_intent_prompt(question: &str) -> String {
    format!(
        r#"You are a filter extractor for a matrimonial profile search engine.
Extract the search filters from the user question and return ONLY a JSON array.

Allowed attributes:
{}

Rules:
- Each element must be {{"attribute": "<name>", "value": "<text from the question>"}}
- Use only the allowed attribute names
- Keep values as they appear in the question (e.g. "15 LPA", "25-30")
- Do not invent filters that are not asked for
- Return [] if the question has no filters

User question: "{}"

Only return the JSON array, no other text."#,
        catalog::vocabulary_block(),
        question
    )
}

/// Slice the outermost JSON array out of the response and parse it. Works
/// with or without markdown fences around the payload.
fn parse_intent_response(raw: &str) -> Result<Vec<IntentFilter>> {
    let start = raw.find('[');
    let end = raw.rfind(']');
    let body = match (start, end) {
        (Some(s), Some(e)) if e > s => &raw[s..=e],
        _ => {
            return Err(PipelineError::Llm(
                "No JSON array in intent response".to_string(),
            ))
        }
    };
    serde_json::from_str(body)
        .map_err(|e| PipelineError::Llm(format!("Failed to parse intent response: {}", e)))
}

fn push_filter(intent: &mut ExtractedIntent, attribute: &str, value: String) {
    let value = value.trim().to_string();
    if value.is_empty() {
        return;
    }
    if intent.iter().any(|f| f.attribute == attribute) {
        return;
    }
    intent.push(IntentFilter {
        attribute: attribute.to_string(),
        value,
    });
}

const PROFESSION_KEYWORDS: &[&str] = &[
    "software engineer",
    "chartered accountant",
    "data scientist",
    "civil engineer",
    "doctor",
    "engineer",
    "teacher",
    "lawyer",
    "architect",
    "nurse",
    "pilot",
    "professor",
    "scientist",
    "banker",
    "dentist",
    "pharmacist",
    "journalist",
    "designer",
    "consultant",
    "entrepreneur",
    "businessman",
];

const RELIGION_KEYWORDS: &[&str] = &[
    "hindu", "muslim", "christian", "sikh", "jain", "buddhist", "parsi", "jewish",
];

const CASTE_KEYWORDS: &[&str] = &[
    "brahmin", "rajput", "maratha", "agarwal", "iyer", "iyengar", "nair", "reddy", "kayastha",
    "khatri", "kshatriya", "vaishya", "lingayat", "vokkaliga", "ezhava", "menon", "jat",
];

const LANGUAGE_KEYWORDS: &[&str] = &[
    "hindi", "tamil", "telugu", "kannada", "malayalam", "marathi", "gujarati", "punjabi",
    "bengali", "odia", "urdu", "konkani", "assamese", "sindhi", "tulu",
];

lazy_static! {
    static ref PROFESSION_RE: Regex = Regex::new(
        r"(?i)\b(software engineers?|chartered accountants?|data scientists?|civil engineers?|doctors?|engineers?|teachers?|lawyers?|architects?|nurses?|pilots?|professors?|scientists?|bankers?|dentists?|pharmacists?|journalists?|designers?|consultants?|entrepreneurs?|businessman)\b"
    )
    .unwrap();
    static ref RELIGION_RE: Regex =
        Regex::new(r"(?i)\b(hindu|muslim|christian|sikh|jain|buddhist|parsi|jewish)\b").unwrap();
    static ref CASTE_RE: Regex = Regex::new(
        r"(?i)\b(brahmin|rajput|maratha|agarwal|iyer|iyengar|nair|reddy|kayastha|khatri|kshatriya|vaishya|lingayat|vokkaliga|ezhava|menon|jat)\b"
    )
    .unwrap();
    static ref LANGUAGE_RE: Regex = Regex::new(
        r"(?i)\b(hindi|tamil|telugu|kannada|malayalam|marathi|gujarati|punjabi|bengali|odia|urdu|konkani|assamese|sindhi|tulu)\b"
    )
    .unwrap();
    static ref SPEAKS_RE: Regex =
        Regex::new(r"(?i)\bspeaks\s+([a-z]+)|([a-z]+)[- ]speaking\b").unwrap();
    static ref FEMALE_RE: Regex =
        Regex::new(r"(?i)\b(brides?|girls?|woman|women|female)\b").unwrap();
    static ref MALE_RE: Regex = Regex::new(r"(?i)\b(grooms?|boys?|man|men|male)\b").unwrap();
    static ref MARITAL_RE: Regex = Regex::new(
        r"(?i)\b(never married|unmarried|divorced|divorcee|widowed|widower|widow|separated)\b"
    )
    .unwrap();
    static ref DIET_RE: Regex = Regex::new(
        r"(?i)\b(non[- ]?vegetarian|pure vegetarian|vegetarian|eggetarian|vegan|non[- ]?veg)\b"
    )
    .unwrap();
    static ref INCOME_RE: Regex =
        Regex::new(r"(?i)\b\d+(?:\.\d+)?\s*(?:lpa|lakhs?|lacs?)(?:\s*(?:per annum|p\.?a\.?))?\b")
            .unwrap();
    static ref ORIGIN_RE: Regex = Regex::new(
        r"\b(?:originally from|hails from|hailing from|native of|belongs to)\s+([A-Z][A-Za-z]+(?:\s+[A-Z][A-Za-z]+)?)"
    )
    .unwrap();
    static ref CITY_RE: Regex = Regex::new(
        r"\b(?:living in|settled in|based in|staying in|residing in|in|at|from)\s+([A-Z][a-z]+(?:\s+[A-Z][a-z]+)?)"
    )
    .unwrap();
    static ref NAME_RE: Regex = Regex::new(r"([A-Z][a-z]+)'s\s+profile").unwrap();
    static ref AGE_KEYWORD_RE: Regex = Regex::new(
        r"(?i)\baged?\s+(?:between\s+)?(\d{1,2})\s*(?:-|to|and)\s*(\d{1,2})\b"
    )
    .unwrap();
    static ref AGE_BARE_BETWEEN_RE: Regex =
        Regex::new(r"(?i)\bbetween\s+(\d{1,2})\s+and\s+(\d{1,2})\b").unwrap();
    static ref AGE_RANGE_YEARS_RE: Regex =
        Regex::new(r"(?i)\b(\d{1,2})\s*(?:-|to)\s*(\d{1,2})\s*(?:years?|yrs?)\b").unwrap();
    static ref AGE_SINGLE_RE: Regex =
        Regex::new(r"(?i)\b(\d{1,2})[\s-]*(?:years?|yrs?)[\s-]*old\b").unwrap();
    static ref PHOTO_RE: Regex = Regex::new(r"(?i)\bwith\s+(?:a\s+)?photos?\b").unwrap();
    static ref VERIFIED_RE: Regex = Regex::new(r"(?i)\bverified\b").unwrap();
}

fn is_domain_word(word: &str) -> bool {
    let lowered = word.to_lowercase();
    PROFESSION_KEYWORDS.contains(&lowered.as_str())
        || RELIGION_KEYWORDS.contains(&lowered.as_str())
        || CASTE_KEYWORDS.contains(&lowered.as_str())
        || LANGUAGE_KEYWORDS.contains(&lowered.as_str())
        || matches!(
            lowered.as_str(),
            "bride" | "brides" | "groom" | "grooms" | "male" | "female" | "vegetarian" | "profiles"
        )
}

/// Deterministic fallback extraction. Keyword and pattern recognizers, one
/// filter per attribute, first recognizer wins. Never errors.
pub fn extract_with_rules(question: &str) -> ExtractedIntent {
    let mut intent: ExtractedIntent = Vec::new();

    if let Some(caps) = NAME_RE.captures(question) {
        push_filter(&mut intent, "name", caps[1].to_string());
    }

    if FEMALE_RE.is_match(question) {
        push_filter(&mut intent, "gender", "female".to_string());
    } else if MALE_RE.is_match(question) {
        push_filter(&mut intent, "gender", "male".to_string());
    }

    extract_age(question, &mut intent);

    if let Some(caps) = MARITAL_RE.captures(question) {
        let status = match caps[1].to_lowercase().as_str() {
            "divorcee" => "divorced".to_string(),
            "widow" | "widower" => "widowed".to_string(),
            "unmarried" => "never married".to_string(),
            other => other.to_string(),
        };
        push_filter(&mut intent, "marital_status", status);
    }

    if let Some(caps) = RELIGION_RE.captures(question) {
        push_filter(&mut intent, "religion", caps[1].to_lowercase());
    }
    if let Some(caps) = CASTE_RE.captures(question) {
        push_filter(&mut intent, "caste", caps[1].to_lowercase());
    }

    if let Some(caps) = SPEAKS_RE.captures(question) {
        let language = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_lowercase());
        if let Some(language) = language {
            if LANGUAGE_KEYWORDS.contains(&language.as_str()) {
                push_filter(&mut intent, "mother_tongue", language);
            }
        }
    }
    if let Some(caps) = LANGUAGE_RE.captures(question) {
        push_filter(&mut intent, "mother_tongue", caps[1].to_lowercase());
    }

    if let Some(caps) = PROFESSION_RE.captures(question) {
        push_filter(&mut intent, "profession", singularize(&caps[1].to_lowercase()));
    }

    if let Some(m) = INCOME_RE.find(question) {
        push_filter(&mut intent, "annual_income", m.as_str().trim().to_string());
    }

    let origin = ORIGIN_RE.captures(question).map(|caps| caps[1].to_string());
    if let Some(ref place) = origin {
        push_filter(&mut intent, "native_place", place.clone());
    }

    for caps in CITY_RE.captures_iter(question) {
        let place = caps[1].to_string();
        if origin.as_deref() == Some(place.as_str()) || is_domain_word(&place) {
            continue;
        }
        push_filter(&mut intent, "city", place);
        break;
    }

    if let Some(caps) = DIET_RE.captures(question) {
        let diet = caps[1].to_lowercase();
        let diet = match diet.as_str() {
            "non-veg" | "non veg" | "nonveg" | "non vegetarian" => "non-vegetarian".to_string(),
            "pure vegetarian" => "vegetarian".to_string(),
            other => other.replace("non vegetarian", "non-vegetarian"),
        };
        push_filter(&mut intent, "diet", diet);
    }

    if PHOTO_RE.is_match(question) {
        push_filter(&mut intent, "has_photo", "true".to_string());
    }
    if VERIFIED_RE.is_match(question) {
        push_filter(&mut intent, "verified", "true".to_string());
    }

    intent
}

fn extract_age(question: &str, intent: &mut ExtractedIntent) {
    if let Some(caps) = AGE_KEYWORD_RE.captures(question) {
        push_filter(intent, "age", format!("{}-{}", &caps[1], &caps[2]));
        return;
    }
    if let Some(caps) = AGE_RANGE_YEARS_RE.captures(question) {
        push_filter(intent, "age", format!("{}-{}", &caps[1], &caps[2]));
        return;
    }
    if let Some(caps) = AGE_BARE_BETWEEN_RE.captures(question) {
        // "between 10 and 15 LPA" is an income range, not an age
        let tail = question[caps.get(0).map(|m| m.end()).unwrap_or(0)..]
            .trim_start()
            .to_lowercase();
        if !(tail.starts_with("lpa") || tail.starts_with("lakh") || tail.starts_with("lac")) {
            push_filter(intent, "age", format!("{}-{}", &caps[1], &caps[2]));
        }
        return;
    }
    if let Some(caps) = AGE_SINGLE_RE.captures(question) {
        push_filter(intent, "age", caps[1].to_string());
    }
}

fn singularize(word: &str) -> String {
    if word.ends_with('s') && !word.ends_with("ss") {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}
