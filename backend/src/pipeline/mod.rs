//! Pipeline driver: source reader -> normalizer -> reconciler.
//!
//! Rows are streamed through all three stages one at a time. Only two things
//! end a run early:
//!
//! - the source cannot be opened or decoded (`Reading -> Aborted`)
//! - the back end reports a fatal error (`Reconciling -> Aborted`)
//!
//! Everything else is counted per record in the [`Summary`].

pub mod admin;
pub mod staging;

use serde::Serialize;
use std::fmt;
use std::path::Path;

use crate::error::{PipelineError, PipelineResult, SourceError};
use crate::models::{DocumentId, EntityKind};
use crate::normalize::normalize;
use crate::reconcile::{ApiBackend, Backend, Outcome, ReconcileMode, Reconciler, RecordDefaults, SkipReason, StoreBackend};
use crate::report::{log_error, log_info, log_success, log_warning};
use crate::source::{open_source, SourceOptions};
use crate::store::DocumentStore;

pub use admin::resolve_admin;
pub use staging::stage_raw_diseases;

// =============================================================================
// Run state
// =============================================================================

/// Where a run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    NotStarted,
    Reading,
    Normalizing,
    Reconciling,
    Done,
    Aborted,
}

/// Counts for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub kind: EntityKind,
    pub rows_read: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped_invalid: usize,
    pub skipped_duplicate: usize,
    pub skipped_write_error: usize,
}

impl Summary {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            rows_read: 0,
            created: 0,
            updated: 0,
            skipped_invalid: 0,
            skipped_duplicate: 0,
            skipped_write_error: 0,
        }
    }

    pub fn skipped(&self) -> usize {
        self.skipped_invalid + self.skipped_duplicate + self.skipped_write_error
    }

    fn count(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Created(_) => self.created += 1,
            Outcome::Updated(_) => self.updated += 1,
            Outcome::Skipped(SkipReason::Invalid(_)) => self.skipped_invalid += 1,
            Outcome::Skipped(SkipReason::Duplicate) => self.skipped_duplicate += 1,
            Outcome::Skipped(SkipReason::WriteError(_)) => self.skipped_write_error += 1,
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} rows, {} created, {} updated, {} skipped ({} invalid, {} duplicate, {} write error)",
            self.kind,
            self.rows_read,
            self.created,
            self.updated,
            self.skipped(),
            self.skipped_invalid,
            self.skipped_duplicate,
            self.skipped_write_error
        )
    }
}

// =============================================================================
// Driver
// =============================================================================

/// Runs files through a reconciler and tracks the run state.
pub struct Driver<B: Backend> {
    reconciler: Reconciler<B>,
    history: Vec<RunState>,
}

impl<B: Backend> Driver<B> {
    pub fn new(reconciler: Reconciler<B>) -> Self {
        Self {
            reconciler,
            history: vec![RunState::NotStarted],
        }
    }

    pub fn state(&self) -> RunState {
        self.history.last().copied().unwrap_or(RunState::NotStarted)
    }

    /// Every state entered so far, in order.
    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    pub fn into_reconciler(self) -> Reconciler<B> {
        self.reconciler
    }

    /// Record the first entry into a state.
    fn enter(&mut self, state: RunState) {
        if !self.history.contains(&state) {
            self.history.push(state);
        }
    }

    /// Ingest one file.
    pub async fn run(&mut self, path: &Path, kind: EntityKind, options: &SourceOptions) -> PipelineResult<Summary> {
        self.history = vec![RunState::NotStarted];
        self.enter(RunState::Reading);
        log_info(format!(
            "Reading {} ({} records, {} back end)",
            path.display(),
            kind,
            self.reconciler.backend().name()
        ));

        let rows = match open_source(path, options) {
            Ok(rows) => rows,
            Err(e) => {
                self.enter(RunState::Aborted);
                log_error(format!("Aborted: {}", e));
                return Err(e.into());
            }
        };

        let mut summary = Summary::new(kind);

        for row in rows {
            summary.rows_read += 1;
            self.enter(RunState::Normalizing);

            let row = match row {
                Ok(row) => row,
                Err(SourceError::Parse { line, message }) => {
                    summary.skipped_invalid += 1;
                    log_warning(format!("Skipped line {}: invalid ({})", line, message));
                    continue;
                }
                Err(e) => {
                    self.enter(RunState::Aborted);
                    log_error(format!("Aborted: {}", e));
                    return Err(e.into());
                }
            };

            let record = match normalize(&row, kind) {
                Ok(record) => record,
                Err(rejection) => {
                    let outcome = Outcome::Skipped(SkipReason::Invalid(rejection.reason.to_string()));
                    summary.count(&outcome);
                    log_warning(format!("Skipped row {}: {}", rejection.line, skip_text(&outcome)));
                    continue;
                }
            };

            self.enter(RunState::Reconciling);
            let outcome = match self.reconciler.reconcile(&record).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.enter(RunState::Aborted);
                    log_error(format!("Aborted at '{}': {}", record.natural_key(), e));
                    log_info(format!("Before abort: {}", summary));
                    return Err(PipelineError::Backend(e));
                }
            };

            summary.count(&outcome);
            match &outcome {
                Outcome::Created(_) => log_success(format!(
                    "Created {} '{}' ({})",
                    kind,
                    record.display_name(),
                    record.natural_key()
                )),
                Outcome::Updated(_) => log_success(format!(
                    "Updated {} '{}' ({})",
                    kind,
                    record.display_name(),
                    record.natural_key()
                )),
                Outcome::Skipped(_) => log_warning(format!(
                    "Skipped {} '{}': {}",
                    kind,
                    record.natural_key(),
                    skip_text(&outcome)
                )),
            }
        }

        self.enter(RunState::Done);
        log_success(format!("Done. {}", summary));
        Ok(summary)
    }
}

fn skip_text(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Skipped(reason) => reason.to_string(),
        _ => String::new(),
    }
}

// =============================================================================
// Direct-store runs
// =============================================================================

/// Options for an ingest run against the local store.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub source: SourceOptions,
    pub mode: ReconcileMode,
    /// Explicit administrator; resolved from `users` when absent.
    pub admin: Option<DocumentId>,
    pub publish: bool,
}

impl IngestOptions {
    /// Positional layout for the kind, upsert mode, unpublished.
    pub fn for_kind(kind: EntityKind) -> Self {
        Self {
            source: SourceOptions::positional(kind.positional_columns()),
            mode: ReconcileMode::Upsert,
            admin: None,
            publish: false,
        }
    }
}

/// Open the store, ingest one file into it and release the store on every
/// exit path.
pub async fn run_ingest(
    store_dir: &Path,
    path: &Path,
    kind: EntityKind,
    options: &IngestOptions,
) -> PipelineResult<Summary> {
    let store = DocumentStore::open(store_dir)?;
    let admin = resolve_admin(&store, options.admin.clone())?;

    let defaults = RecordDefaults::new(admin).with_publish(options.publish);
    let reconciler = Reconciler::new(StoreBackend::new(store), options.mode, defaults);
    let mut driver = Driver::new(reconciler);

    let result = driver.run(path, kind, &options.source).await;

    // Dropping the store on an aborted run releases the lock as well
    let store = driver.into_reconciler().into_backend().into_store();
    let summary = result?;
    store.close()?;
    Ok(summary)
}

/// Ingest one file through the catalogue HTTP API.
///
/// The API has no user listing, so the administrator must be given or a
/// placeholder id is credited.
pub async fn run_remote_ingest(
    base_url: &str,
    token: &str,
    path: &Path,
    kind: EntityKind,
    options: &IngestOptions,
) -> PipelineResult<Summary> {
    let admin = options.admin.clone().unwrap_or_else(|| {
        let id = DocumentId::generate();
        log_warning(format!("No administrator given, crediting placeholder id {}", id));
        id
    });

    let backend = ApiBackend::new(base_url, token)?;
    let defaults = RecordDefaults::new(admin).with_publish(options.publish);
    let mut driver = Driver::new(Reconciler::new(backend, options.mode, defaults));

    driver.run(path, kind, &options.source).await
}
