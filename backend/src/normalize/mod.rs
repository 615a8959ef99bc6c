//! Record normalizer: one raw row into a herb or disease draft.
//!
//! Pure functions only. Nothing here touches the store, the network or the
//! log, so every rule can be checked against literal row fixtures.

pub mod fields;
pub mod text;

use serde::Serialize;
use std::fmt;

use crate::models::EntityKind;
use crate::source::RawRow;
use fields::{canonical, resolve, Field};
use text::{clean_lines, collapse_whitespace, split_list, PROPERTY_SEPARATORS, SYMPTOM_SEPARATORS};

/// Usage text for herbs whose row has none.
pub const DEFAULT_HERB_USAGE: &str = "โปรดปรึกษาผู้เชี่ยวชาญก่อนใช้";

/// Disease description when every source field is empty.
pub const NO_DETAILS: &str = "ไม่พบรายละเอียด";

// =============================================================================
// Drafts
// =============================================================================

/// A herb ready for reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HerbDraft {
    pub name: String,
    pub scientific_name: String,
    pub description: String,
    pub properties: Vec<String>,
    pub usage: String,
}

/// A disease ready for reconciliation.
///
/// The cleaned source fields are kept next to the derived ones so the draft
/// can be written back out as a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiseaseDraft {
    pub name: String,
    pub eng_name: Option<String>,
    pub description: String,
    pub symptoms: Vec<String>,
    /// Treatment text.
    pub usage: String,
    pub main_symptoms: String,
    pub secondary_symptoms: String,
    pub locations: String,
    pub cause: String,
}

/// A normalized record of either kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Record {
    Herb(HerbDraft),
    Disease(DiseaseDraft),
}

impl Record {
    pub fn kind(&self) -> EntityKind {
        match self {
            Record::Herb(_) => EntityKind::Herb,
            Record::Disease(_) => EntityKind::Disease,
        }
    }

    /// Value of the natural key (`scientificName` or `name`).
    pub fn natural_key(&self) -> &str {
        match self {
            Record::Herb(h) => &h.scientific_name,
            Record::Disease(d) => &d.name,
        }
    }

    /// Display name for progress lines.
    pub fn display_name(&self) -> &str {
        match self {
            Record::Herb(h) => &h.name,
            Record::Disease(d) => &d.name,
        }
    }

    /// Render back into a header-style row using canonical column names.
    pub fn to_raw_row(&self) -> RawRow {
        match self {
            Record::Herb(h) => {
                let properties = h.properties.join(", ");
                RawRow::from_pairs(
                    0,
                    &[
                        (canonical(Field::HerbName), h.name.as_str()),
                        (canonical(Field::ScientificName), h.scientific_name.as_str()),
                        (canonical(Field::HerbDescription), h.description.as_str()),
                        (canonical(Field::Properties), properties.as_str()),
                        (canonical(Field::HerbUsage), h.usage.as_str()),
                    ],
                )
            }
            Record::Disease(d) => {
                let mut pairs = vec![
                    (canonical(Field::DiseaseName), d.name.as_str()),
                    (canonical(Field::Symptoms), d.main_symptoms.as_str()),
                    (canonical(Field::SubSymptoms), d.secondary_symptoms.as_str()),
                    (canonical(Field::Locations), d.locations.as_str()),
                    (canonical(Field::Cause), d.cause.as_str()),
                    (canonical(Field::Treatment), d.usage.as_str()),
                ];
                if let Some(eng) = &d.eng_name {
                    pairs.push((canonical(Field::EngName), eng.as_str()));
                }
                RawRow::from_pairs(0, &pairs)
            }
        }
    }
}

// =============================================================================
// Rejection
// =============================================================================

/// Why a row was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Positional row narrower than the entity's minimum.
    TooFewColumns { found: usize, expected: usize },
    /// Required field empty under every candidate column.
    MissingField(&'static str),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::TooFewColumns { found, expected } => {
                write!(f, "only {} columns, need at least {}", found, expected)
            }
            RejectReason::MissingField(field) => write!(f, "missing {}", field),
        }
    }
}

/// A row the normalizer refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub line: usize,
    pub reason: RejectReason,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}: {}", self.line, self.reason)
    }
}

// =============================================================================
// Normalization
// =============================================================================

/// Normalize one raw row.
pub fn normalize(row: &RawRow, kind: EntityKind) -> Result<Record, Rejection> {
    let reject = |reason| Rejection { line: row.line(), reason };

    let expected = kind.min_positional_columns();
    if row.is_positional() && row.width() < expected {
        return Err(reject(RejectReason::TooFewColumns { found: row.width(), expected }));
    }

    match kind {
        EntityKind::Herb => normalize_herb(row).map(Record::Herb).map_err(reject),
        EntityKind::Disease => normalize_disease(row).map(Record::Disease).map_err(reject),
    }
}

fn text_field(row: &RawRow, field: Field) -> String {
    resolve(row, field).map(collapse_whitespace).unwrap_or_default()
}

fn required(value: String, name: &'static str) -> Result<String, RejectReason> {
    if value.is_empty() {
        Err(RejectReason::MissingField(name))
    } else {
        Ok(value)
    }
}

fn normalize_herb(row: &RawRow) -> Result<HerbDraft, RejectReason> {
    let name = required(text_field(row, Field::HerbName), "name")?;
    let scientific_name = required(text_field(row, Field::ScientificName), "scientificName")?;

    let raw_properties = resolve(row, Field::Properties).unwrap_or("");
    let properties = split_list(raw_properties, PROPERTY_SEPARATORS);

    let mut description = text_field(row, Field::HerbDescription);
    if description.is_empty() {
        description = collapse_whitespace(raw_properties);
    }
    let description = required(description, "description")?;

    let mut usage = text_field(row, Field::HerbUsage);
    if usage.is_empty() {
        usage = DEFAULT_HERB_USAGE.to_string();
    }

    Ok(HerbDraft { name, scientific_name, description, properties, usage })
}

fn normalize_disease(row: &RawRow) -> Result<DiseaseDraft, RejectReason> {
    let name = required(text_field(row, Field::DiseaseName), "name")?;
    let eng_name = Some(text_field(row, Field::EngName)).filter(|e| !e.is_empty());

    let main_symptoms = resolve(row, Field::Symptoms).map(clean_lines).unwrap_or_default();
    let secondary_symptoms = resolve(row, Field::SubSymptoms).map(clean_lines).unwrap_or_default();
    let locations = text_field(row, Field::Locations);
    let cause = text_field(row, Field::Cause);
    let usage = text_field(row, Field::Treatment);

    let symptoms = split_list(&format!("{}\n{}", main_symptoms, secondary_symptoms), SYMPTOM_SEPARATORS);

    let description = [locations.as_str(), cause.as_str()]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("\n");
    let description = [description.as_str(), main_symptoms.as_str(), secondary_symptoms.as_str()]
        .into_iter()
        .find(|s| !s.is_empty())
        .unwrap_or(NO_DETAILS)
        .to_string();

    Ok(DiseaseDraft {
        name,
        eng_name,
        description,
        symptoms,
        usage,
        main_symptoms,
        secondary_symptoms,
        locations,
        cause,
    })
}
