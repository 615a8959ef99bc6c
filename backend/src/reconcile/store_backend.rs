//! Back end writing straight into the local document store.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use super::{Backend, RecordDefaults};
use crate::error::{BackendError, BackendResult};
use crate::models::{Disease, DocumentId, EntityKind, Herb};
use crate::normalize::Record;
use crate::store::DocumentStore;

/// Direct-store back end. Owns the store handle for the length of a run.
pub struct StoreBackend {
    store: DocumentStore,
}

impl StoreBackend {
    pub fn new(store: DocumentStore) -> Self {
        Self { store }
    }

    pub fn store_mut(&mut self) -> &mut DocumentStore {
        &mut self.store
    }

    /// Give the store back, e.g. to close it.
    pub fn into_store(self) -> DocumentStore {
        self.store
    }
}

/// New catalogue document for a record.
fn new_document(record: &Record, defaults: &RecordDefaults) -> Result<Value, serde_json::Error> {
    let now = Utc::now();
    match record {
        Record::Herb(h) => serde_json::to_value(Herb {
            id: DocumentId::generate(),
            name: h.name.clone(),
            scientific_name: h.scientific_name.clone(),
            description: h.description.clone(),
            properties: h.properties.clone(),
            usage: h.usage.clone(),
            image: defaults.image.clone(),
            added_by: defaults.added_by.clone(),
            published: defaults.publish,
            created_at: now,
            updated_at: now,
        }),
        Record::Disease(d) => serde_json::to_value(Disease {
            id: DocumentId::generate(),
            name: d.name.clone(),
            eng_name: d.eng_name.clone(),
            description: d.description.clone(),
            symptoms: d.symptoms.clone(),
            medicines: Vec::new(),
            usage: d.usage.clone(),
            published: defaults.publish,
            created_at: now,
            updated_at: now,
        }),
    }
}

/// Mutable fields of an existing document. `image`, `addedBy` and
/// `medicines` belong to whoever edits the catalogue later.
pub(super) fn changes(record: &Record, defaults: &RecordDefaults) -> Value {
    match record {
        Record::Herb(h) => json!({
            "name": h.name,
            "description": h.description,
            "properties": h.properties,
            "usage": h.usage,
            "published": defaults.publish,
        }),
        Record::Disease(d) => {
            let mut changes = json!({
                "name": d.name,
                "description": d.description,
                "symptoms": d.symptoms,
                "usage": d.usage,
                "published": defaults.publish,
            });
            if let Some(eng) = &d.eng_name {
                changes["engName"] = json!(eng);
            }
            changes
        }
    }
}

#[async_trait]
impl Backend for StoreBackend {
    fn name(&self) -> &'static str {
        "store"
    }

    async fn lookup(&mut self, kind: EntityKind, key: &str) -> BackendResult<Option<DocumentId>> {
        let found = self
            .store
            .find_one(kind.collection(), kind.natural_key_field(), &json!(key))?;

        Ok(found
            .as_ref()
            .and_then(|doc| doc.get("_id"))
            .and_then(Value::as_str)
            .map(DocumentId::from))
    }

    async fn insert(&mut self, record: &Record, defaults: &RecordDefaults) -> BackendResult<DocumentId> {
        let doc = new_document(record, defaults).map_err(|e| BackendError::Rejected(e.to_string()))?;
        Ok(self.store.insert(record.kind().collection(), doc)?)
    }

    async fn update(&mut self, id: &DocumentId, record: &Record, defaults: &RecordDefaults) -> BackendResult<()> {
        self.store
            .update(record.kind().collection(), id.as_str(), changes(record, defaults))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DEFAULT_HERB_IMAGE, DISEASES, HERBS};
    use crate::normalize::{DiseaseDraft, HerbDraft};
    use tempfile::tempdir;

    fn herb() -> Record {
        Record::Herb(HerbDraft {
            name: "ขมิ้นชัน".into(),
            scientific_name: "Curcuma longa".into(),
            description: "เหง้าสีเหลือง".into(),
            properties: vec!["ลดสิว".into(), "ลดการอักเสบ".into()],
            usage: "ทาบาง ๆ".into(),
        })
    }

    fn disease(eng_name: Option<&str>) -> Record {
        Record::Disease(DiseaseDraft {
            name: "สิว".into(),
            eng_name: eng_name.map(str::to_string),
            description: "ใบหน้า".into(),
            symptoms: vec!["ตุ่มนูน".into()],
            usage: "ล้างหน้า".into(),
            main_symptoms: "ตุ่มนูน".into(),
            secondary_symptoms: String::new(),
            locations: "ใบหน้า".into(),
            cause: String::new(),
        })
    }

    #[tokio::test]
    async fn test_herb_insert_stamps_defaults() {
        let dir = tempdir().unwrap();
        let mut backend = StoreBackend::new(DocumentStore::open(dir.path()).unwrap());
        let defaults = RecordDefaults::new(DocumentId::new("admin1")).with_publish(true);

        let id = backend.insert(&herb(), &defaults).await.unwrap();
        let doc = backend.store_mut().find_by_id(HERBS, id.as_str()).unwrap().unwrap();

        assert_eq!(doc["image"], DEFAULT_HERB_IMAGE);
        assert_eq!(doc["addedBy"], "admin1");
        assert_eq!(doc["published"], true);
        assert_eq!(doc["properties"][1], "ลดการอักเสบ");
    }

    #[tokio::test]
    async fn test_disease_insert_has_empty_medicines() {
        let dir = tempdir().unwrap();
        let mut backend = StoreBackend::new(DocumentStore::open(dir.path()).unwrap());
        let defaults = RecordDefaults::new(DocumentId::new("admin1"));

        let id = backend.insert(&disease(None), &defaults).await.unwrap();
        let doc = backend.store_mut().find_by_id(DISEASES, id.as_str()).unwrap().unwrap();
        assert_eq!(doc["medicines"], json!([]));
        assert!(doc.get("engName").is_none());

        let found = backend.lookup(EntityKind::Disease, "สิว").await.unwrap();
        assert_eq!(found, Some(id));
        assert_eq!(backend.lookup(EntityKind::Disease, "กลาก").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update_keeps_image_and_author() {
        let dir = tempdir().unwrap();
        let mut backend = StoreBackend::new(DocumentStore::open(dir.path()).unwrap());
        let id = backend
            .insert(&herb(), &RecordDefaults::new(DocumentId::new("admin1")))
            .await
            .unwrap();

        let mut changed = herb();
        if let Record::Herb(h) = &mut changed {
            h.usage = "ต้มดื่ม".into();
        }
        backend
            .update(&id, &changed, &RecordDefaults::new(DocumentId::new("someone-else")))
            .await
            .unwrap();

        let doc = backend.store_mut().find_by_id(HERBS, id.as_str()).unwrap().unwrap();
        assert_eq!(doc["usage"], "ต้มดื่ม");
        assert_eq!(doc["addedBy"], "admin1");
        assert_eq!(doc["image"], DEFAULT_HERB_IMAGE);
    }

    #[tokio::test]
    async fn test_duplicate_insert_maps_to_duplicate_key() {
        let dir = tempdir().unwrap();
        let mut backend = StoreBackend::new(DocumentStore::open(dir.path()).unwrap());
        let defaults = RecordDefaults::new(DocumentId::new("admin1"));

        backend.insert(&disease(Some("Acne")), &defaults).await.unwrap();
        let err = backend.insert(&disease(None), &defaults).await.unwrap_err();
        assert!(matches!(err, BackendError::DuplicateKey(ref k) if k == "สิว"));
    }
}
