//! Herb-disease relation seeding.
//!
//! A relation mapping is a JSON object keyed by disease name:
//!
//! ```json
//! {
//!   "สิว Acne": { "herbs": [{ "name": "ขมิ้นชัน", "effectiveness": "สูง" }] },
//!   "โรคเริม (Herpes simplex)": [{ "herb": "พลู" }]
//! }
//! ```
//!
//! Disease keys match any stored disease whose name contains the text before
//! the first `(`, ignoring case. Herbs match by exact name. Each pair is
//! upserted into `herbdiseaserelations`.

use chrono::Utc;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::{PipelineError, PipelineResult, StoreError};
use crate::models::{DocumentId, Effectiveness, HerbDiseaseRelation, DISEASES, HERBS, RELATIONS};
use crate::report::{log_info, log_info_indent, log_success, log_warning};
use crate::store::DocumentStore;

// =============================================================================
// Mapping
// =============================================================================

/// One herb recommended for a disease.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HerbLink {
    #[serde(alias = "herb")]
    pub name: String,
    #[serde(default)]
    pub effectiveness: Effectiveness,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DiseaseEntry {
    Wrapped { herbs: Vec<HerbLink> },
    Bare(Vec<HerbLink>),
}

/// Disease key and its herbs, in mapping order.
pub type RelationMapping = Vec<(String, Vec<HerbLink>)>;

/// Parse a mapping document.
pub fn parse_mapping(text: &str) -> PipelineResult<RelationMapping> {
    let root: Map<String, Value> =
        serde_json::from_str(text).map_err(|e| PipelineError::Mapping(format!("not a JSON object: {}", e)))?;

    root.into_iter()
        .map(|(disease, entry)| {
            let herbs = match serde_json::from_value::<DiseaseEntry>(entry) {
                Ok(DiseaseEntry::Wrapped { herbs }) | Ok(DiseaseEntry::Bare(herbs)) => herbs,
                Err(e) => return Err(PipelineError::Mapping(format!("entry '{}': {}", disease, e))),
            };
            Ok((disease, herbs))
        })
        .collect()
}

/// Read and parse a mapping file.
pub fn load_mapping(path: &Path) -> PipelineResult<RelationMapping> {
    let text = fs::read_to_string(path)
        .map_err(|e| PipelineError::Mapping(format!("cannot read {}: {}", path.display(), e)))?;
    parse_mapping(&text)
}

/// Case-insensitive matcher for the part of a disease key before `(`.
pub fn disease_matcher(key: &str) -> PipelineResult<Option<Regex>> {
    let stem = key.split('(').next().unwrap_or_default().trim();
    if stem.is_empty() {
        return Ok(None);
    }

    RegexBuilder::new(&regex::escape(stem))
        .case_insensitive(true)
        .build()
        .map(Some)
        .map_err(|e| PipelineError::Mapping(format!("bad disease key '{}': {}", key, e)))
}

// =============================================================================
// Seeding
// =============================================================================

/// Counts for one seeding run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationSummary {
    pub created: usize,
    pub updated: usize,
    pub missing_diseases: usize,
    pub missing_herbs: usize,
}

impl fmt::Display for RelationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "relations: {} created, {} updated, {} unknown diseases, {} unknown herbs",
            self.created, self.updated, self.missing_diseases, self.missing_herbs
        )
    }
}

fn id_of(doc: &Value) -> Option<DocumentId> {
    doc.get("_id").and_then(Value::as_str).map(DocumentId::from)
}

fn find_disease(store: &DocumentStore, key: &str) -> PipelineResult<Option<(DocumentId, String)>> {
    let Some(matcher) = disease_matcher(key)? else {
        return Ok(None);
    };

    for doc in store.find_all(DISEASES)? {
        let name = doc.get("name").and_then(Value::as_str).unwrap_or_default();
        if let Some(id) = id_of(&doc).filter(|_| matcher.is_match(name)) {
            return Ok(Some((id, name.to_string())));
        }
    }
    Ok(None)
}

/// Insert or refresh one relation. Returns true when it was created.
fn upsert_relation(
    store: &mut DocumentStore,
    herb: &DocumentId,
    disease: &DocumentId,
    effectiveness: Effectiveness,
    notes: String,
) -> PipelineResult<bool> {
    let existing = store
        .find_all(RELATIONS)?
        .into_iter()
        .find(|doc| doc["herb"] == herb.as_str() && doc["disease"] == disease.as_str())
        .and_then(|doc| id_of(&doc));

    match existing {
        Some(id) => {
            let effectiveness = serde_json::to_value(effectiveness).map_err(StoreError::from)?;
            store.update(RELATIONS, id.as_str(), json!({ "effectiveness": effectiveness, "notes": notes }))?;
            Ok(false)
        }
        None => {
            let now = Utc::now();
            let doc = serde_json::to_value(HerbDiseaseRelation {
                id: DocumentId::generate(),
                herb: herb.clone(),
                disease: disease.clone(),
                effectiveness,
                notes: Some(notes),
                created_at: now,
                updated_at: now,
            })
            .map_err(StoreError::from)?;
            store.insert(RELATIONS, doc)?;
            Ok(true)
        }
    }
}

/// Upsert every herb-disease pair of `mapping`.
pub fn apply_mapping(store: &mut DocumentStore, mapping: &RelationMapping) -> PipelineResult<RelationSummary> {
    let mut summary = RelationSummary::default();

    for (key, herbs) in mapping {
        let Some((disease_id, disease_name)) = find_disease(store, key)? else {
            summary.missing_diseases += 1;
            log_warning(format!("Disease not found: {}", key));
            continue;
        };
        log_info(format!("{} -> {}", key, disease_name));

        for link in herbs {
            let herb = store.find_one(HERBS, "name", &json!(link.name))?;
            let Some(herb_id) = herb.as_ref().and_then(id_of) else {
                summary.missing_herbs += 1;
                log_warning(format!("Herb not found: {} (for {})", link.name, key));
                continue;
            };

            let notes = format!("Recommended for {}", key);
            if upsert_relation(store, &herb_id, &disease_id, link.effectiveness, notes)? {
                summary.created += 1;
            } else {
                summary.updated += 1;
            }
            log_info_indent(format!("{} <-> {}", disease_name, link.name), 1);
        }
    }

    log_success(format!("Done. {}", summary));
    Ok(summary)
}

/// Load `mapping_path` and seed its relations into the store.
pub fn seed_relations(store: &mut DocumentStore, mapping_path: &Path) -> PipelineResult<RelationSummary> {
    let mapping = load_mapping(mapping_path)?;
    apply_mapping(store, &mapping)
}
