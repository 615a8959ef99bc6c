//! Document store - JSON documents in one SQLite database
//!
//! Layout on disk:
//!
//! ```text
//! <root>/
//!   catalogue.db
//! ```
//!
//! Every collection is a table of whole JSON documents:
//!
//! ```text
//! id TEXT PRIMARY KEY | natural_key TEXT UNIQUE | created_at TEXT | body TEXT
//! ```
//!
//! `natural_key` carries the collection's unique index (NULL where it has
//! none), so natural-key lookups and duplicate checks hit an index. The
//! connection runs in exclusive locking mode: the first run to open the store
//! keeps it until the connection closes or the process dies.

use chrono::{SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{StoreError, StoreResult};
use crate::models::{DocumentId, DISEASES, HERBS, RELATIONS, STAGED_DISEASES, USERS};
use crate::validation::validate_document;

pub const DB_FILE: &str = "catalogue.db";

/// Collections the store creates tables for.
pub const COLLECTIONS: [&str; 5] = [HERBS, DISEASES, STAGED_DISEASES, RELATIONS, USERS];

/// How long `open` waits for another run to let go.
const LOCK_WAIT_MS: u64 = 500;

/// Joins the parts of a compound natural key.
const KEY_SEPARATOR: &str = "\u{1f}";

/// Fields that together must be unique within a collection.
pub fn unique_index(collection: &str) -> &'static [&'static str] {
    match collection {
        HERBS => &["scientificName"],
        DISEASES | STAGED_DISEASES => &["name"],
        RELATIONS => &["herb", "disease"],
        _ => &[],
    }
}

/// Current time as stored in `createdAt` / `updatedAt`.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

type Document = Map<String, Value>;

/// A SQLite-backed document database owned by a single run.
pub struct DocumentStore {
    root: PathBuf,
    db_path: PathBuf,
    conn: Connection,
}

impl DocumentStore {
    /// Open (creating if needed) the store at `root` and take it for this run.
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        let db_path = root.join(DB_FILE);

        let conn = Connection::open(&db_path)?;
        conn.busy_timeout(Duration::from_millis(LOCK_WAIT_MS))?;
        conn.pragma_update_and_check(None, "locking_mode", "EXCLUSIVE", |row| row.get::<_, String>(0))?;

        // The exclusive lock taken here is kept after COMMIT
        let mut batch = String::from("BEGIN EXCLUSIVE;");
        for collection in COLLECTIONS {
            batch.push_str(&format!(
                "CREATE TABLE IF NOT EXISTS {c} (
                    id          TEXT PRIMARY KEY,
                    natural_key TEXT UNIQUE,
                    created_at  TEXT NOT NULL,
                    body        TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS {c}_created_at ON {c}(created_at);",
                c = collection
            ));
        }
        batch.push_str("COMMIT;");

        conn.execute_batch(&batch).map_err(|e| match e.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => StoreError::Locked(root.clone()),
            _ => StoreError::from(e),
        })?;

        Ok(Self { root, db_path, conn })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Release the store. Dropping it does the same, silently.
    pub fn close(self) -> StoreResult<()> {
        self.conn.close().map_err(|(_, e)| StoreError::from(e))
    }

    /// The connection, once the database file is known to still be there.
    fn conn(&self) -> StoreResult<&Connection> {
        if !self.db_path.is_file() {
            return Err(StoreError::ConnectionLost(format!(
                "database {} no longer exists",
                self.db_path.display()
            )));
        }
        Ok(&self.conn)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Document by `_id`.
    pub fn find_by_id(&self, collection: &str, id: &str) -> StoreResult<Option<Value>> {
        let table = table(collection)?;
        let body: Option<String> = self
            .conn()?
            .query_row(&format!("SELECT body FROM {} WHERE id = ?1", table), [id], |row| row.get(0))
            .optional()
            .map_err(|e| self.sql_error(e))?;

        body.map(|b| serde_json::from_str(&b).map_err(StoreError::from)).transpose()
    }

    /// First document (by `createdAt`) whose `field` equals `value`.
    ///
    /// A lookup on a collection's single-field unique index uses that index.
    pub fn find_one(&self, collection: &str, field: &str, value: &Value) -> StoreResult<Option<Value>> {
        let table = table(collection)?;

        if let (&[key_field], Value::String(key)) = (unique_index(collection), value) {
            if key_field == field {
                let body: Option<String> = self
                    .conn()?
                    .query_row(
                        &format!("SELECT body FROM {} WHERE natural_key = ?1", table),
                        [key],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(|e| self.sql_error(e))?;
                return body.map(|b| serde_json::from_str(&b).map_err(StoreError::from)).transpose();
            }
        }

        let sql = format!(
            "SELECT body FROM {} WHERE json_extract(body, ?1) IS ?2 ORDER BY created_at, rowid",
            table
        );
        let path = format!("$.\"{}\"", field);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql).map_err(|e| self.sql_error(e))?;
        let bodies = stmt
            .query_map(params![path, sql_value(value)], |row| row.get::<_, String>(0))
            .map_err(|e| self.sql_error(e))?;

        // json_extract cannot tell `true` from `1`; the document can
        for body in bodies {
            let doc: Value = serde_json::from_str(&body.map_err(|e| self.sql_error(e))?)?;
            if doc.get(field).map_or(value.is_null(), |v| v == value) {
                return Ok(Some(doc));
            }
        }
        Ok(None)
    }

    /// Every document in a collection, oldest first.
    pub fn find_all(&self, collection: &str) -> StoreResult<Vec<Value>> {
        let table = table(collection)?;
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("SELECT body FROM {} ORDER BY created_at, rowid", table))
            .map_err(|e| self.sql_error(e))?;

        let bodies = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| self.sql_error(e))?;

        let mut docs = Vec::new();
        for body in bodies {
            docs.push(serde_json::from_str(&body.map_err(|e| self.sql_error(e))?)?);
        }
        Ok(docs)
    }

    pub fn count(&self, collection: &str) -> StoreResult<usize> {
        let table = table(collection)?;
        let n: i64 = self
            .conn()?
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
            .map_err(|e| self.sql_error(e))?;
        Ok(n as usize)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert a new document, stamping `_id` (unless given) and timestamps.
    pub fn insert(&mut self, collection: &str, doc: Value) -> StoreResult<DocumentId> {
        let table = table(collection)?;
        let mut doc = into_object(doc)?;

        let id = match doc.get("_id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => DocumentId::new(id),
            _ => DocumentId::generate(),
        };

        let now = timestamp();
        doc.insert("_id".into(), Value::String(id.to_string()));
        doc.insert("createdAt".into(), Value::String(now.clone()));
        doc.insert("updatedAt".into(), Value::String(now.clone()));

        let (key, body) = checked(collection, doc)?;
        self.conn()?
            .execute(
                &format!("INSERT INTO {} (id, natural_key, created_at, body) VALUES (?1, ?2, ?3, ?4)", table),
                params![id.as_str(), key, now, body],
            )
            .map_err(|e| self.write_error(e, collection, id.as_str(), key.as_deref()))?;

        Ok(id)
    }

    /// Merge `changes` into an existing document and stamp `updatedAt`.
    /// `_id` and `createdAt` cannot be changed.
    pub fn update(&mut self, collection: &str, id: &str, changes: Value) -> StoreResult<Value> {
        let table = table(collection)?;
        let changes = into_object(changes)?;

        let mut doc = match self.find_by_id(collection, id)? {
            Some(existing) => into_object(existing)?,
            None => {
                return Err(StoreError::NotFound {
                    collection: collection.to_string(),
                    id: id.to_string(),
                })
            }
        };

        for (key, value) in changes {
            if key != "_id" && key != "createdAt" {
                doc.insert(key, value);
            }
        }
        doc.insert("updatedAt".into(), Value::String(timestamp()));

        let (key, body) = checked(collection, doc.clone())?;
        self.conn()?
            .execute(
                &format!("UPDATE {} SET natural_key = ?2, body = ?3 WHERE id = ?1", table),
                params![id, key, body],
            )
            .map_err(|e| self.write_error(e, collection, id, key.as_deref()))?;

        Ok(Value::Object(doc))
    }

    // =========================================================================
    // Errors
    // =========================================================================

    fn sql_error(&self, err: rusqlite::Error) -> StoreError {
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => StoreError::Locked(self.root.clone()),
            Some(ErrorCode::CannotOpen | ErrorCode::SystemIoFailure | ErrorCode::NotADatabase) => {
                StoreError::ConnectionLost(err.to_string())
            }
            _ => StoreError::from(err),
        }
    }

    fn write_error(&self, err: rusqlite::Error, collection: &str, id: &str, key: Option<&str>) -> StoreError {
        if err.sqlite_error_code() != Some(ErrorCode::ConstraintViolation) {
            return self.sql_error(err);
        }

        // "UNIQUE constraint failed: herbs.id" or "...: herbs.natural_key"
        let on_id = err.to_string().ends_with(".id");
        let key = match key {
            Some(key) if !on_id => key.replace(KEY_SEPARATOR, " / "),
            _ => id.to_string(),
        };
        StoreError::DuplicateKey {
            collection: collection.to_string(),
            key,
        }
    }
}

/// Table name for a collection. Only known collections have one.
fn table(collection: &str) -> StoreResult<&'static str> {
    COLLECTIONS
        .iter()
        .find(|c| **c == collection)
        .copied()
        .ok_or_else(|| StoreError::InvalidDocument(format!("unknown collection '{}'", collection)))
}

/// Schema-check a document and derive its natural key and stored body.
fn checked(collection: &str, doc: Document) -> StoreResult<(Option<String>, String)> {
    let key = natural_key(collection, &doc);
    let value = Value::Object(doc);

    validate_document(collection, &value).map_err(|errors| StoreError::SchemaViolation {
        collection: collection.to_string(),
        errors,
    })?;

    Ok((key, serde_json::to_string(&value)?))
}

/// Unique index value of a document; `None` when the collection has no index
/// or the document lacks one of its fields.
fn natural_key(collection: &str, doc: &Document) -> Option<String> {
    let fields = unique_index(collection);
    if fields.is_empty() {
        return None;
    }

    let parts = fields
        .iter()
        .map(|f| match doc.get(*f)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        })
        .collect::<Option<Vec<_>>>()?;

    Some(parts.join(KEY_SEPARATOR))
}

/// SQL value comparable with what `json_extract` returns for `value`.
fn sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn into_object(value: Value) -> StoreResult<Document> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::InvalidDocument(format!("expected a JSON object, got {}", other))),
    }
}

#[cfg(test)]
impl DocumentStore {
    /// Raw connection for tests that need to damage stored rows.
    pub(crate) fn raw(&self) -> &Connection {
        &self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::process::Command;
    use tempfile::tempdir;

    /// Set in a child test process that takes the store and exits abruptly.
    const HOLDER_ENV: &str = "SKINHERB_STORE_HOLDER";
    const HOLDER_EXIT: i32 = 17;

    fn disease(name: &str) -> Value {
        json!({
            "name": name,
            "description": "ลำตัว\nเชื้อรา",
            "symptoms": ["วงแดง"],
            "medicines": [],
            "usage": "",
            "published": false
        })
    }

    #[test]
    fn test_insert_stamps_id_and_timestamps() {
        let dir = tempdir().unwrap();
        let mut store = DocumentStore::open(dir.path()).unwrap();

        let id = store.insert(DISEASES, disease("กลาก")).unwrap();
        let doc = store.find_by_id(DISEASES, id.as_str()).unwrap().unwrap();

        assert_eq!(doc["_id"], id.as_str());
        assert!(doc["createdAt"].is_string());
        assert_eq!(doc["createdAt"], doc["updatedAt"]);
        assert!(dir.path().join(DB_FILE).is_file());
    }

    #[test]
    fn test_unique_index_rejects_duplicates() {
        let dir = tempdir().unwrap();
        let mut store = DocumentStore::open(dir.path()).unwrap();

        store.insert(DISEASES, disease("กลาก")).unwrap();
        let err = store.insert(DISEASES, disease("กลาก")).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { ref key, .. } if key == "กลาก"));
        assert_eq!(store.count(DISEASES).unwrap(), 1);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let dir = tempdir().unwrap();
        let mut store = DocumentStore::open(dir.path()).unwrap();

        store.insert(USERS, json!({ "_id": "u1" })).unwrap();
        let err = store.insert(USERS, json!({ "_id": "u1" })).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { ref key, .. } if key == "u1"));
    }

    #[test]
    fn test_compound_unique_index() {
        let dir = tempdir().unwrap();
        let mut store = DocumentStore::open(dir.path()).unwrap();

        store.insert(RELATIONS, json!({ "herb": "h1", "disease": "d1" })).unwrap();
        store.insert(RELATIONS, json!({ "herb": "h1", "disease": "d2" })).unwrap();
        let err = store.insert(RELATIONS, json!({ "herb": "h1", "disease": "d1" })).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { ref key, .. } if key == "h1 / d1"));
    }

    #[test]
    fn test_update_onto_taken_key_rejected() {
        let dir = tempdir().unwrap();
        let mut store = DocumentStore::open(dir.path()).unwrap();

        store.insert(DISEASES, disease("กลาก")).unwrap();
        let id = store.insert(DISEASES, disease("เกลื้อน")).unwrap();

        let err = store.update(DISEASES, id.as_str(), json!({ "name": "กลาก" })).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { .. }));
        let kept = store.find_by_id(DISEASES, id.as_str()).unwrap().unwrap();
        assert_eq!(kept["name"], "เกลื้อน");
    }

    #[test]
    fn test_update_merges_and_keeps_created_at() {
        let dir = tempdir().unwrap();
        let mut store = DocumentStore::open(dir.path()).unwrap();

        let id = store.insert(DISEASES, disease("เกลื้อน")).unwrap();
        let before = store.find_by_id(DISEASES, id.as_str()).unwrap().unwrap();

        let after = store
            .update(DISEASES, id.as_str(), json!({ "usage": "ทายา", "createdAt": "1999" }))
            .unwrap();
        assert_eq!(after["usage"], "ทายา");
        assert_eq!(after["name"], "เกลื้อน");
        assert_eq!(after["createdAt"], before["createdAt"]);
        assert_eq!(store.find_by_id(DISEASES, id.as_str()).unwrap().unwrap(), after);
    }

    #[test]
    fn test_update_missing_document() {
        let dir = tempdir().unwrap();
        let mut store = DocumentStore::open(dir.path()).unwrap();
        let err = store.update(DISEASES, "nope", json!({})).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn test_schema_violation() {
        let dir = tempdir().unwrap();
        let mut store = DocumentStore::open(dir.path()).unwrap();

        let err = store.insert(HERBS, json!({ "name": "ขมิ้นชัน" })).unwrap_err();
        assert!(matches!(err, StoreError::SchemaViolation { .. }));
        assert_eq!(store.count(HERBS).unwrap(), 0);
    }

    #[test]
    fn test_find_one_by_key_and_by_other_fields() {
        let dir = tempdir().unwrap();
        let mut store = DocumentStore::open(dir.path()).unwrap();

        store.insert(USERS, json!({ "_id": "u1", "role": "user", "active": true })).unwrap();
        store.insert(USERS, json!({ "_id": "u2", "role": "admin", "active": 1 })).unwrap();
        store.insert(DISEASES, disease("หิด")).unwrap();

        let scabies = store.find_one(DISEASES, "name", &json!("หิด")).unwrap().unwrap();
        assert_eq!(scabies["symptoms"], json!(["วงแดง"]));
        assert!(store.find_one(DISEASES, "name", &json!("กลาก")).unwrap().is_none());

        let admin = store.find_one(USERS, "role", &json!("admin")).unwrap().unwrap();
        assert_eq!(admin["_id"], "u2");
        let numeric = store.find_one(USERS, "active", &json!(1)).unwrap().unwrap();
        assert_eq!(numeric["_id"], "u2");
    }

    #[test]
    fn test_natural_key_lookup_is_indexed() {
        let dir = tempdir().unwrap();
        let mut store = DocumentStore::open(dir.path()).unwrap();
        for i in 0..200 {
            store.insert(DISEASES, disease(&format!("โรค {}", i))).unwrap();
        }

        let plan: String = store
            .raw()
            .query_row(
                "EXPLAIN QUERY PLAN SELECT body FROM diseases WHERE natural_key = ?1",
                ["โรค 150"],
                |row| row.get(3),
            )
            .unwrap();
        assert!(plan.contains("USING INDEX"), "{}", plan);
        assert!(store.find_one(DISEASES, "name", &json!("โรค 150")).unwrap().is_some());
    }

    #[test]
    fn test_find_all_oldest_first() {
        let dir = tempdir().unwrap();
        let mut store = DocumentStore::open(dir.path()).unwrap();

        for id in ["c", "a", "b"] {
            store.insert(USERS, json!({ "_id": id })).unwrap();
        }
        let ids: Vec<Value> = store.find_all(USERS).unwrap().into_iter().map(|d| d["_id"].clone()).collect();
        assert_eq!(ids, vec![json!("c"), json!("a"), json!("b")]);
    }

    #[test]
    fn test_documents_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let mut store = DocumentStore::open(dir.path()).unwrap();
            store.insert(USERS, json!({ "_id": "admin1", "role": "admin" })).unwrap();
            store.close().unwrap();
        }

        let store = DocumentStore::open(dir.path()).unwrap();
        let found = store.find_one(USERS, "role", &json!("admin")).unwrap().unwrap();
        assert_eq!(found["_id"], "admin1");
    }

    #[test]
    fn test_lock_is_exclusive_and_released_on_drop() {
        let dir = tempdir().unwrap();
        let store = DocumentStore::open(dir.path()).unwrap();
        assert!(matches!(DocumentStore::open(dir.path()), Err(StoreError::Locked(_))));

        drop(store);
        assert!(DocumentStore::open(dir.path()).is_ok());
    }

    #[test]
    fn test_lock_released_when_holder_dies() {
        // Child side: take the store, write, and exit without running Drop
        if let Ok(root) = std::env::var(HOLDER_ENV) {
            let mut store = DocumentStore::open(&root).unwrap();
            store.insert(USERS, json!({ "_id": "left-behind" })).unwrap();
            std::process::exit(HOLDER_EXIT);
        }

        let dir = tempdir().unwrap();
        let status = Command::new(std::env::current_exe().unwrap())
            .args(["store::tests::test_lock_released_when_holder_dies", "--exact", "--nocapture"])
            .env(HOLDER_ENV, dir.path())
            .status()
            .unwrap();
        assert_eq!(status.code(), Some(HOLDER_EXIT));

        let store = DocumentStore::open(dir.path()).unwrap();
        assert!(store.find_by_id(USERS, "left-behind").unwrap().is_some());
    }

    #[test]
    fn test_vanished_root_is_connection_lost() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("store");
        let mut store = DocumentStore::open(&root).unwrap();
        store.count(DISEASES).unwrap();

        fs::remove_dir_all(&root).unwrap();
        let err = store.insert(DISEASES, disease("หิด")).unwrap_err();
        assert!(matches!(err, StoreError::ConnectionLost(_)));
    }

    #[test]
    fn test_rejects_non_objects_and_unknown_collections() {
        let dir = tempdir().unwrap();
        let mut store = DocumentStore::open(dir.path()).unwrap();
        assert!(matches!(store.insert(USERS, json!([1, 2])), Err(StoreError::InvalidDocument(_))));
        assert!(matches!(store.count("herbs; DROP TABLE herbs"), Err(StoreError::InvalidDocument(_))));
    }

    #[test]
    fn test_corrupt_body_is_a_json_error() {
        let dir = tempdir().unwrap();
        let mut store = DocumentStore::open(dir.path()).unwrap();
        store.insert(DISEASES, disease("กลาก")).unwrap();

        store.raw().execute("UPDATE diseases SET body = 'not json'", []).unwrap();
        let err = store.find_one(DISEASES, "name", &json!("กลาก")).unwrap_err();
        assert!(matches!(err, StoreError::Json(_)));
    }
}
