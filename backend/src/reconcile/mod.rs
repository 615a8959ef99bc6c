//! Reconciler: create, update or skip each normalized record.
//!
//! The decision logic is written once against the [`Backend`] capability set
//! (lookup by natural key, insert, update). Two back ends implement it:
//!
//! - [`StoreBackend`] - writes straight into the local [`DocumentStore`](crate::store::DocumentStore)
//! - [`ApiBackend`] - authenticated calls to the catalogue HTTP API
//!
//! Per-record failures become [`Outcome::Skipped`]. Only a fatal back-end
//! error ([`BackendError::is_fatal`]) is returned as `Err`.

pub mod api_backend;
pub mod store_backend;

use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;

use crate::error::{BackendError, BackendResult};
use crate::models::{DocumentId, EntityKind, DEFAULT_HERB_IMAGE};
use crate::normalize::Record;

pub use api_backend::ApiBackend;
pub use store_backend::StoreBackend;

// =============================================================================
// Back-end capability set
// =============================================================================

/// Persistence operations the reconciler needs.
#[async_trait]
pub trait Backend: Send {
    /// Short name for log lines.
    fn name(&self) -> &'static str;

    /// Id of the document holding this natural key, if any.
    async fn lookup(&mut self, kind: EntityKind, key: &str) -> BackendResult<Option<DocumentId>>;

    /// Create a new document, stamping the defaulted fields.
    async fn insert(&mut self, record: &Record, defaults: &RecordDefaults) -> BackendResult<DocumentId>;

    /// Overwrite the mutable fields of an existing document.
    async fn update(&mut self, id: &DocumentId, record: &Record, defaults: &RecordDefaults) -> BackendResult<()>;
}

// =============================================================================
// Settings and outcomes
// =============================================================================

/// What to do when the natural key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconcileMode {
    /// Update the existing document in place.
    #[default]
    Upsert,
    /// Leave the existing document alone and count a duplicate.
    InsertOnly,
}

impl FromStr for ReconcileMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "upsert" => Ok(ReconcileMode::Upsert),
            "insert-only" | "insert_only" | "insertonly" | "skip" => Ok(ReconcileMode::InsertOnly),
            other => Err(format!("unknown reconcile mode '{}'", other)),
        }
    }
}

/// Values stamped on records that the source rows do not carry.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordDefaults {
    /// Administrator credited in a new herb's `addedBy`.
    pub added_by: DocumentId,
    /// Image of a new herb.
    pub image: String,
    /// `published` flag written on insert and update.
    pub publish: bool,
}

impl RecordDefaults {
    pub fn new(added_by: DocumentId) -> Self {
        Self {
            added_by,
            image: DEFAULT_HERB_IMAGE.to_string(),
            publish: false,
        }
    }

    pub fn with_publish(mut self, publish: bool) -> Self {
        self.publish = publish;
        self
    }
}

/// Why a record was not written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Rejected by the normalizer.
    Invalid(String),
    /// Natural key already present and the mode is insert-only.
    Duplicate,
    /// The back end refused or failed this single write.
    WriteError(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Invalid(why) => write!(f, "invalid ({})", why),
            SkipReason::Duplicate => f.write_str("duplicate"),
            SkipReason::WriteError(why) => write!(f, "write error ({})", why),
        }
    }
}

/// Result of reconciling one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Created(DocumentId),
    Updated(DocumentId),
    Skipped(SkipReason),
}

// =============================================================================
// Reconciler
// =============================================================================

/// Drives one back end with a fixed mode and defaults.
pub struct Reconciler<B: Backend> {
    backend: B,
    mode: ReconcileMode,
    defaults: RecordDefaults,
}

impl<B: Backend> Reconciler<B> {
    pub fn new(backend: B, mode: ReconcileMode, defaults: RecordDefaults) -> Self {
        Self { backend, mode, defaults }
    }

    pub fn mode(&self) -> ReconcileMode {
        self.mode
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Reconcile one record. `Err` means the whole run must stop.
    pub async fn reconcile(&mut self, record: &Record) -> BackendResult<Outcome> {
        let kind = record.kind();
        let key = record.natural_key();

        let existing = match self.backend.lookup(kind, key).await {
            Ok(found) => found,
            Err(e) => return per_record(e),
        };

        if let Some(id) = existing {
            return self.on_existing(id, record).await;
        }

        match self.backend.insert(record, &self.defaults).await {
            Ok(id) => Ok(Outcome::Created(id)),
            // Lookup missed it but the unique index did not
            Err(BackendError::DuplicateKey(_)) => match self.backend.lookup(kind, key).await {
                Ok(Some(id)) => self.on_existing(id, record).await,
                Ok(None) if self.mode == ReconcileMode::InsertOnly => Ok(Outcome::Skipped(SkipReason::Duplicate)),
                Ok(None) => Ok(Outcome::Skipped(SkipReason::WriteError(format!(
                    "duplicate key '{}' but no matching document",
                    key
                )))),
                Err(e) => per_record(e),
            },
            Err(e) => per_record(e),
        }
    }

    async fn on_existing(&mut self, id: DocumentId, record: &Record) -> BackendResult<Outcome> {
        match self.mode {
            ReconcileMode::InsertOnly => Ok(Outcome::Skipped(SkipReason::Duplicate)),
            ReconcileMode::Upsert => match self.backend.update(&id, record, &self.defaults).await {
                Ok(()) => Ok(Outcome::Updated(id)),
                Err(e) => per_record(e),
            },
        }
    }
}

/// Fatal errors propagate, everything else skips the record.
fn per_record(err: BackendError) -> BackendResult<Outcome> {
    if err.is_fatal() {
        Err(err)
    } else {
        Ok(Outcome::Skipped(SkipReason::WriteError(err.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{DiseaseDraft, HerbDraft};
    use std::collections::HashMap;

    /// In-memory back end with scripted failures.
    #[derive(Default)]
    struct MemoryBackend {
        docs: HashMap<(EntityKind, String), DocumentId>,
        updates: usize,
        hide_from_lookup: bool,
        fail_insert: Option<fn() -> BackendError>,
    }

    #[async_trait]
    impl Backend for MemoryBackend {
        fn name(&self) -> &'static str {
            "memory"
        }

        async fn lookup(&mut self, kind: EntityKind, key: &str) -> BackendResult<Option<DocumentId>> {
            if self.hide_from_lookup {
                self.hide_from_lookup = false;
                return Ok(None);
            }
            Ok(self.docs.get(&(kind, key.to_string())).cloned())
        }

        async fn insert(&mut self, record: &Record, _defaults: &RecordDefaults) -> BackendResult<DocumentId> {
            if let Some(fail) = self.fail_insert {
                return Err(fail());
            }
            let key = (record.kind(), record.natural_key().to_string());
            if self.docs.contains_key(&key) {
                return Err(BackendError::DuplicateKey(key.1));
            }
            let id = DocumentId::generate();
            self.docs.insert(key, id.clone());
            Ok(id)
        }

        async fn update(&mut self, _id: &DocumentId, _record: &Record, _defaults: &RecordDefaults) -> BackendResult<()> {
            self.updates += 1;
            Ok(())
        }
    }

    fn herb(key: &str) -> Record {
        Record::Herb(HerbDraft {
            name: "ขมิ้นชัน".into(),
            scientific_name: key.into(),
            description: "เหง้าสีเหลือง".into(),
            properties: vec!["ลดสิว".into()],
            usage: "ทาบาง ๆ".into(),
        })
    }

    fn disease(name: &str) -> Record {
        Record::Disease(DiseaseDraft {
            name: name.into(),
            eng_name: None,
            description: "ใบหน้า".into(),
            symptoms: vec![],
            usage: String::new(),
            main_symptoms: String::new(),
            secondary_symptoms: String::new(),
            locations: "ใบหน้า".into(),
            cause: String::new(),
        })
    }

    fn reconciler(backend: MemoryBackend, mode: ReconcileMode) -> Reconciler<MemoryBackend> {
        Reconciler::new(backend, mode, RecordDefaults::new(DocumentId::new("admin")))
    }

    #[tokio::test]
    async fn test_create_then_update() {
        let mut r = reconciler(MemoryBackend::default(), ReconcileMode::Upsert);

        let first = r.reconcile(&herb("Curcuma longa")).await.unwrap();
        let second = r.reconcile(&herb("Curcuma longa")).await.unwrap();

        match first {
            Outcome::Created(id) => assert_eq!(second, Outcome::Updated(id)),
            other => panic!("expected created, got {:?}", other),
        }
        assert_eq!(r.backend().updates, 1);
    }

    #[tokio::test]
    async fn test_kinds_do_not_share_keys() {
        let mut r = reconciler(MemoryBackend::default(), ReconcileMode::Upsert);
        assert!(matches!(r.reconcile(&herb("สิว")).await.unwrap(), Outcome::Created(_)));
        assert!(matches!(r.reconcile(&disease("สิว")).await.unwrap(), Outcome::Created(_)));
    }

    #[tokio::test]
    async fn test_insert_only_skips_existing() {
        let mut r = reconciler(MemoryBackend::default(), ReconcileMode::InsertOnly);
        r.reconcile(&disease("กลาก")).await.unwrap();
        let outcome = r.reconcile(&disease("กลาก")).await.unwrap();
        assert_eq!(outcome, Outcome::Skipped(SkipReason::Duplicate));
        assert_eq!(r.backend().updates, 0);
    }

    #[tokio::test]
    async fn test_duplicate_on_insert_becomes_update() {
        let mut backend = MemoryBackend::default();
        backend.docs.insert((EntityKind::Disease, "กลาก".into()), DocumentId::new("d1"));
        backend.hide_from_lookup = true;

        let mut r = reconciler(backend, ReconcileMode::Upsert);
        let outcome = r.reconcile(&disease("กลาก")).await.unwrap();
        assert_eq!(outcome, Outcome::Updated(DocumentId::new("d1")));
    }

    #[tokio::test]
    async fn test_transient_failure_is_per_record() {
        let backend = MemoryBackend {
            fail_insert: Some(|| BackendError::Transient("timeout".into())),
            ..Default::default()
        };
        let mut r = reconciler(backend, ReconcileMode::Upsert);

        let outcome = r.reconcile(&herb("Aloe vera")).await.unwrap();
        assert!(matches!(outcome, Outcome::Skipped(SkipReason::WriteError(ref m)) if m.contains("timeout")));
    }

    #[tokio::test]
    async fn test_lost_connection_is_fatal() {
        let backend = MemoryBackend {
            fail_insert: Some(|| BackendError::ConnectionLost("socket closed".into())),
            ..Default::default()
        };
        let mut r = reconciler(backend, ReconcileMode::Upsert);

        let err = r.reconcile(&herb("Aloe vera")).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("upsert".parse::<ReconcileMode>().unwrap(), ReconcileMode::Upsert);
        assert_eq!("insert-only".parse::<ReconcileMode>().unwrap(), ReconcileMode::InsertOnly);
        assert!("merge".parse::<ReconcileMode>().is_err());
    }
}
