//! JSON Schema validation for catalogue documents.
//!
//! Herb and disease documents are checked against JSON Schema Draft 7 before
//! the store writes them. Schemas are embedded at compile time from the
//! `schemas/` directory:
//! - `herb.json`
//! - `disease.json`
//!
//! Other collections (staging, relations, users) are not schema-checked.

use once_cell::sync::Lazy;
use serde_json::Value;

use crate::models::{DISEASES, HERBS};

static HERB_SCHEMA: Lazy<Value> = Lazy::new(|| {
    serde_json::from_str(include_str!("../../schemas/herb.json")).expect("Invalid embedded schema")
});

static DISEASE_SCHEMA: Lazy<Value> = Lazy::new(|| {
    serde_json::from_str(include_str!("../../schemas/disease.json")).expect("Invalid embedded schema")
});

/// Validate a JSON value against a schema.
///
/// Returns every error message, not just the first.
pub fn validate(schema: &Value, data: &Value) -> Result<(), Vec<String>> {
    let validator = jsonschema::draft7::new(schema).map_err(|e| vec![format!("Invalid schema: {}", e)])?;

    let errors: Vec<String> = validator.iter_errors(data).map(|e| e.to_string()).collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Schema for a collection, if it has one.
pub fn schema_for(collection: &str) -> Option<&'static Value> {
    match collection {
        HERBS => Some(&*HERB_SCHEMA),
        DISEASES => Some(&*DISEASE_SCHEMA),
        _ => None,
    }
}

/// Validate a document bound for `collection`. Collections without a schema
/// accept anything.
pub fn validate_document(collection: &str, doc: &Value) -> Result<(), Vec<String>> {
    match schema_for(collection) {
        Some(schema) => validate(schema, doc),
        None => Ok(()),
    }
}
