//! Core domain types for WineLens profiles.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, WineLensError};

/// Fields every summarized profile must carry.
pub const REQUIRED_PROFILE_FIELDS: [&str; 11] = [
    "wine",
    "region",
    "grape_varieties",
    "appearance",
    "nose",
    "palate",
    "aging",
    "average_price",
    "quality",
    "analysis",
    "reference_source",
];

/// Aroma cluster name → descriptors in that cluster.
pub type ClusterMap = BTreeMap<String, Vec<String>>;

// ---------------------------------------------------------------------------
// FetchedDocument / SourceCorpus
// ---------------------------------------------------------------------------

/// A fetched page that survived screening, extraction and relevance checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedDocument {
    /// The URL that was requested.
    pub url: String,
    /// Cleaned plain text extracted from the page.
    pub text: String,
    /// Declared `Content-Type` of the response.
    pub content_type: String,
    /// When the page was fetched.
    pub fetched_at: DateTime<Utc>,
}

/// All accepted documents for one aggregation call, plus their merged text.
#[derive(Debug, Clone)]
pub struct SourceCorpus {
    pub entity_name: String,
    pub documents: Vec<FetchedDocument>,
    pub merged_text: String,
}

impl SourceCorpus {
    /// Build the corpus, joining the non-empty document texts.
    pub fn merge(entity_name: &str, documents: Vec<FetchedDocument>) -> Self {
        let documents: Vec<FetchedDocument> = documents
            .into_iter()
            .filter(|d| !d.text.trim().is_empty())
            .collect();

        let merged_text = documents
            .iter()
            .map(|d| d.text.trim())
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string();

        Self {
            entity_name: entity_name.to_string(),
            documents,
            merged_text,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.merged_text.is_empty()
    }

    /// URLs of the accepted documents, in corpus order.
    pub fn urls(&self) -> Vec<String> {
        self.documents.iter().map(|d| d.url.clone()).collect()
    }
}

// ---------------------------------------------------------------------------
// EntityProfile
// ---------------------------------------------------------------------------

/// A validated wine profile produced by the summarization provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityProfile {
    pub wine: String,
    pub region: String,
    pub grape_varieties: String,
    pub appearance: String,
    pub nose: String,
    pub palate: String,
    pub aging: String,
    pub average_price: String,
    /// Quality as stated by the summarizer (the rule engine computes its own).
    pub quality: String,
    pub analysis: String,
    pub reference_source: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nose_intensity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub palate_intensity: Option<String>,
    /// Pre-classified aroma clusters, when the summarizer supplied them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aroma: Option<ClusterMap>,
    /// Fields outside the known schema, kept verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl EntityProfile {
    /// Validate a raw summarizer map into a profile.
    ///
    /// Every field in [`REQUIRED_PROFILE_FIELDS`] must be present. Missing
    /// fields reject the whole profile; nothing is patched in except
    /// `region: null`, which becomes `"Unknown"`.
    pub fn from_raw(mut raw: Map<String, Value>) -> Result<Self> {
        let missing: Vec<&str> = REQUIRED_PROFILE_FIELDS
            .iter()
            .copied()
            .filter(|field| !raw.contains_key(*field))
            .collect();

        if !missing.is_empty() {
            return Err(WineLensError::validation(format!(
                "profile is missing required fields: {}",
                missing.join(", ")
            )));
        }

        let mut take_text = |field: &str| raw.remove(field).map(value_to_text).unwrap_or_default();

        let wine = take_text("wine");
        let grape_varieties = take_text("grape_varieties");
        let appearance = take_text("appearance");
        let nose = take_text("nose");
        let palate = take_text("palate");
        let aging = take_text("aging");
        let average_price = take_text("average_price");
        let quality = take_text("quality");
        let analysis = take_text("analysis");

        let region = match raw.remove("region") {
            Some(Value::Null) | None => "Unknown".to_string(),
            Some(v) => value_to_text(v),
        };

        let reference_source = raw
            .remove("reference_source")
            .map(coerce_string_list)
            .unwrap_or_default();

        let nose_intensity = raw.remove("nose_intensity").and_then(optional_text);
        let palate_intensity = raw.remove("palate_intensity").and_then(optional_text);

        let aroma = match raw.remove("aroma") {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) => Some(clean_aroma_clusters(map)),
            Some(other) => {
                return Err(WineLensError::validation(format!(
                    "aroma must be an object of clusters, got {}",
                    json_type_name(&other)
                )));
            }
        };

        Ok(Self {
            wine,
            region,
            grape_varieties,
            appearance,
            nose,
            palate,
            aging,
            average_price,
            quality,
            analysis,
            reference_source,
            nose_intensity,
            palate_intensity,
            aroma,
            extra: raw.into_iter().collect(),
        })
    }

    /// Nose text plus any separately reported nose intensity.
    pub fn nose_text(&self) -> String {
        join_present(&self.nose, self.nose_intensity.as_deref())
    }

    /// Palate text plus any separately reported palate intensity.
    pub fn palate_text(&self) -> String {
        join_present(&self.palate, self.palate_intensity.as_deref())
    }
}

fn join_present(base: &str, extra: Option<&str>) -> String {
    match extra {
        Some(e) if !e.trim().is_empty() => format!("{base} {e}"),
        _ => base.to_string(),
    }
}

/// Render a JSON value as display text. Lists are joined with ", ".
fn value_to_text(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        Value::Array(items) => items
            .into_iter()
            .map(value_to_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

fn optional_text(value: Value) -> Option<String> {
    let text = value_to_text(value);
    (!text.trim().is_empty()).then_some(text)
}

/// A string becomes a one-element list; lists keep their string items.
pub fn coerce_string_list(value: Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s],
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Drop aroma clusters that carry no descriptors.
fn clean_aroma_clusters(raw: Map<String, Value>) -> ClusterMap {
    raw.into_iter()
        .filter_map(|(cluster, descriptors)| {
            let descriptors: Vec<String> = coerce_string_list(descriptors)
                .into_iter()
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty())
                .collect();
            (!descriptors.is_empty()).then_some((cluster, descriptors))
        })
        .collect()
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Scoring output
// ---------------------------------------------------------------------------

/// One of the four quality rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Criterion {
    Balance,
    Length,
    Intensity,
    Complexity,
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Balance => "Balance",
            Self::Length => "Length",
            Self::Intensity => "Intensity",
            Self::Complexity => "Complexity",
        };
        f.write_str(label)
    }
}

/// Ordinal quality grade derived from the rule score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quality {
    Poor,
    Acceptable,
    Good,
    #[serde(rename = "Very Good")]
    VeryGood,
    Outstanding,
    Unknown,
}

impl Quality {
    /// Map a rule score to its grade. Scores above 4 are `Unknown`.
    pub fn from_score(score: u8) -> Self {
        match score {
            0 => Self::Poor,
            1 => Self::Acceptable,
            2 => Self::Good,
            3 => Self::VeryGood,
            4 => Self::Outstanding,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Poor => "Poor",
            Self::Acceptable => "Acceptable",
            Self::Good => "Good",
            Self::VeryGood => "Very Good",
            Self::Outstanding => "Outstanding",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic rule-engine output for one profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub score: u8,
    pub matched_criteria: Vec<Criterion>,
    pub quality: Quality,
    /// Cluster names, sorted.
    pub clusters: Vec<String>,
    /// Flattened descriptors, sorted and de-duplicated.
    pub descriptors: Vec<String>,
}

impl ScoreResult {
    pub fn matched(&self, criterion: Criterion) -> bool {
        self.matched_criteria.contains(&criterion)
    }

    /// Sorted views of a cluster map, as reported in a score.
    pub fn sorted_views(clusters: &ClusterMap) -> (Vec<String>, Vec<String>) {
        let names = clusters.keys().cloned().collect();
        let descriptors: BTreeSet<String> = clusters.values().flatten().cloned().collect();
        (names, descriptors.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Entity names
// ---------------------------------------------------------------------------

/// Title-case each word of an entity name, leaving numeric words alone.
///
/// `"opus one 2015"` becomes `"Opus One 2015"`. Used as the lookup key by
/// persistence layers.
pub fn normalize_entity_name(name: &str) -> String {
    name.split_whitespace()
        .map(|word| {
            if word.chars().all(|c| c.is_ascii_digit()) {
                return word.to_string();
            }
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
