//! # SkinHerb - herb and skin disease data ingestion
//!
//! SkinHerb loads CSV and spreadsheet exports of Thai herb and skin disease
//! data into the catalogue, either straight into the local document store or
//! through the catalogue HTTP API.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ CSV / XLSX  │────▶│   Source    │────▶│  Normalize  │────▶│  Reconcile  │
//! │ (874/UTF8)  │     │  (RawRow)   │     │  (drafts)   │     │ (store/API) │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use skinherb::{run_ingest, EntityKind, IngestOptions};
//!
//! #[tokio::main]
//! async fn main() {
//!     let options = IngestOptions::for_kind(EntityKind::Herb);
//!     let summary = run_ingest(".skinherb/store".as_ref(), "herbs.csv".as_ref(), EntityKind::Herb, &options)
//!         .await
//!         .unwrap();
//!     println!("{}", summary);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Error types per layer
//! - [`models`] - Catalogue documents and identifiers
//! - [`report`] - Console progress log
//! - [`source`] - CSV / spreadsheet reading with encoding detection
//! - [`normalize`] - Raw rows into herb and disease drafts
//! - [`validation`] - JSON schema checks for stored documents
//! - [`store`] - SQLite document store
//! - [`reconcile`] - Create / update / skip decisions over a back end
//! - [`pipeline`] - Run driver, raw staging, administrator lookup
//! - [`relations`] - Herb-disease relation seeding
//! - [`config`] - Environment settings

// Core modules
pub mod error;
pub mod models;
pub mod report;

// Reading
pub mod source;
pub mod normalize;

// Persistence
pub mod validation;
pub mod store;
pub mod reconcile;

// Orchestration
pub mod pipeline;
pub mod relations;
pub mod config;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    BackendError, BackendResult, ConfigError, PipelineError, PipelineResult, SourceError, SourceResult,
    StoreError, StoreResult,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{
    Disease, DocumentId, Effectiveness, EntityKind, Herb, HerbDiseaseRelation, StagedDisease,
};

// =============================================================================
// Re-exports - Source and normalizer
// =============================================================================

pub use source::{
    open_bytes, open_source, ColumnLayout, RawRow, RawRows, SourceFormat, SourceOptions, TextEncoding,
};

pub use normalize::{normalize, DiseaseDraft, HerbDraft, Record, RejectReason, Rejection};

// =============================================================================
// Re-exports - Store and reconciler
// =============================================================================

pub use store::DocumentStore;

pub use reconcile::{
    ApiBackend, Backend, Outcome, ReconcileMode, Reconciler, RecordDefaults, SkipReason, StoreBackend,
};

// =============================================================================
// Re-exports - Pipeline
// =============================================================================

pub use pipeline::{
    resolve_admin, run_ingest, run_remote_ingest, stage_raw_diseases, Driver, IngestOptions, RunState,
    Summary,
};

pub use relations::{seed_relations, RelationSummary};

pub use config::Settings;
