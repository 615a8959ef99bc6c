//! Administrator credited on newly created herbs.

use serde_json::{json, Value};

use crate::error::PipelineResult;
use crate::models::{DocumentId, USERS};
use crate::report::{log_info, log_warning};
use crate::store::DocumentStore;

fn id_of(doc: &Value) -> Option<DocumentId> {
    doc.get("_id").and_then(Value::as_str).map(DocumentId::from)
}

/// Pick the `addedBy` id for a run.
///
/// Order: the explicit id, the first user with `role: "admin"`, the first
/// user of any role, and finally a freshly generated id.
pub fn resolve_admin(store: &DocumentStore, explicit: Option<DocumentId>) -> PipelineResult<DocumentId> {
    if let Some(id) = explicit {
        return Ok(id);
    }

    if let Some(id) = store.find_one(USERS, "role", &json!("admin"))?.as_ref().and_then(id_of) {
        log_info(format!("Using administrator {}", id));
        return Ok(id);
    }

    if let Some(id) = store.find_all(USERS)?.first().and_then(id_of) {
        log_warning(format!("No administrator in '{}', crediting user {}", USERS, id));
        return Ok(id);
    }

    let id = DocumentId::generate();
    log_warning(format!("No users in '{}', crediting placeholder id {}", USERS, id));
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_explicit_wins() {
        let dir = tempdir().unwrap();
        let mut store = DocumentStore::open(dir.path()).unwrap();
        store.insert(USERS, json!({ "_id": "a1", "role": "admin" })).unwrap();

        let id = resolve_admin(&store, Some(DocumentId::new("given"))).unwrap();
        assert_eq!(id.as_str(), "given");
    }

    #[test]
    fn test_prefers_admin_role() {
        let dir = tempdir().unwrap();
        let mut store = DocumentStore::open(dir.path()).unwrap();
        store.insert(USERS, json!({ "_id": "u1", "role": "user" })).unwrap();
        store.insert(USERS, json!({ "_id": "a1", "role": "admin" })).unwrap();

        assert_eq!(resolve_admin(&store, None).unwrap().as_str(), "a1");
    }

    #[test]
    fn test_falls_back_to_any_user() {
        let dir = tempdir().unwrap();
        let mut store = DocumentStore::open(dir.path()).unwrap();
        store.insert(USERS, json!({ "_id": "u1", "role": "user" })).unwrap();

        assert_eq!(resolve_admin(&store, None).unwrap().as_str(), "u1");
    }

    #[test]
    fn test_empty_users_generates_id() {
        let dir = tempdir().unwrap();
        let store = DocumentStore::open(dir.path()).unwrap();

        let id = resolve_admin(&store, None).unwrap();
        assert_eq!(id.as_str().len(), 32);
    }
}
