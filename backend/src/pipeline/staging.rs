//! Raw disease staging: a literal copy of disease rows into `datadiseases`.
//!
//! This path skips the normalizer on purpose. Every row with a usable name is
//! kept so it can be re-processed later, however short it is. Existing
//! entries are matched by name and only receive the fields that are non-empty
//! in the new row.

use chrono::Utc;
use serde_json::{json, Map, Value};
use std::path::Path;

use super::Summary;
use crate::error::{BackendError, PipelineResult, SourceError, StoreError};
use crate::models::{DocumentId, EntityKind, StagedDisease, STAGED_DISEASES};
use crate::normalize::text::collapse_whitespace;
use crate::report::{log_error, log_info, log_success, log_warning};
use crate::source::{open_source, RawRow, SourceOptions};
use crate::store::DocumentStore;

/// Staged names must be shorter than this many characters.
pub const MAX_STAGED_NAME_CHARS: usize = 100;

/// Name to stage a row under, if it has an acceptable one.
pub fn staged_name(row: &RawRow) -> Option<String> {
    let name = collapse_whitespace(row.get("name")?);
    if name.is_empty() || name.chars().count() >= MAX_STAGED_NAME_CHARS {
        None
    } else {
        Some(name)
    }
}

/// Non-empty staged fields of a row, whitespace collapsed.
fn staged_fields(row: &RawRow) -> Map<String, Value> {
    // everything after `name`
    EntityKind::Disease.positional_columns()[1..]
        .iter()
        .filter_map(|column| {
            let value = collapse_whitespace(row.get(column)?);
            (!value.is_empty()).then(|| (column.to_string(), Value::String(value)))
        })
        .collect()
}

fn new_staged(name: String, fields: &Map<String, Value>) -> Result<Value, serde_json::Error> {
    let field = |key: &str| fields.get(key).and_then(Value::as_str).unwrap_or("").to_string();
    let now = Utc::now();

    serde_json::to_value(StagedDisease {
        id: DocumentId::generate(),
        name,
        symptoms: field("symptoms"),
        sub_symptoms: field("subSymptoms"),
        locations: field("locations"),
        cause: field("cause"),
        treatment: field("treatment"),
        created_at: now,
        updated_at: now,
    })
}

/// Upsert every usable disease row of `path` into the staging collection.
///
/// `options` should use the positional disease layout. Store failures that
/// mean the store itself is gone abort the run.
pub fn stage_raw_diseases(store: &mut DocumentStore, path: &Path, options: &SourceOptions) -> PipelineResult<Summary> {
    log_info(format!("Staging raw disease rows from {}", path.display()));

    let mut summary = Summary::new(EntityKind::Disease);

    for row in open_source(path, options)? {
        summary.rows_read += 1;

        let row = match row {
            Ok(row) => row,
            Err(SourceError::Parse { line, message }) => {
                summary.skipped_invalid += 1;
                log_warning(format!("Skipped line {}: invalid ({})", line, message));
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let Some(name) = staged_name(&row) else {
            summary.skipped_invalid += 1;
            log_warning(format!("Skipped row {}: no usable name", row.line()));
            continue;
        };

        let fields = staged_fields(&row);
        // Lookup failures are classified like write failures below
        let result = match store.find_one(STAGED_DISEASES, "name", &json!(name)) {
            Ok(Some(existing)) => {
                let id = existing.get("_id").and_then(Value::as_str).unwrap_or_default().to_string();
                store.update(STAGED_DISEASES, &id, Value::Object(fields)).map(|_| false)
            }
            Ok(None) => new_staged(name.clone(), &fields)
                .map_err(StoreError::from)
                .and_then(|doc| store.insert(STAGED_DISEASES, doc).map(|_| true)),
            Err(e) => Err(e),
        };

        match result {
            Ok(true) => {
                summary.created += 1;
                log_success(format!("Staged '{}'", name));
            }
            Ok(false) => {
                summary.updated += 1;
                log_success(format!("Refreshed '{}'", name));
            }
            Err(e) => {
                let err = BackendError::from(e);
                if err.is_fatal() {
                    log_error(format!("Aborted at '{}': {}", name, err));
                    return Err(err.into());
                }
                summary.skipped_write_error += 1;
                log_warning(format!("Skipped '{}': write error ({})", name, err));
            }
        }
    }

    log_success(format!("Done. staging {}", summary));
    Ok(summary)
}
