//! SkinHerb CLI - load herb and skin disease files into the catalogue
//!
//! # Main Commands
//!
//! ```bash
//! skinherb ingest herbs.csv --kind herb              # Into the local store
//! skinherb ingest diseases.xlsx --kind disease --backend api
//! skinherb stage diseases.csv                        # Raw copy into datadiseases
//! skinherb relate mapping.json                       # Seed herb-disease relations
//! skinherb list --names                              # What is in the store
//! ```
//!
//! # Debug Commands
//!
//! ```bash
//! skinherb parse herbs.csv --kind herb               # Raw rows as JSON
//! skinherb normalize herbs.csv --kind herb           # Drafts and rejections
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use skinherb::models::{DISEASES, HERBS, RELATIONS, STAGED_DISEASES, USERS};
use skinherb::{
    normalize, open_source, run_ingest, run_remote_ingest, seed_relations, stage_raw_diseases, DocumentId,
    DocumentStore, EntityKind, IngestOptions, ReconcileMode, Settings, SourceFormat, SourceOptions,
    TextEncoding,
};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "skinherb")]
#[command(about = "Load herb and skin disease CSV / spreadsheet files into the SkinHerb catalogue", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// How to read the input file.
#[derive(Args, Clone)]
struct SourceArgs {
    /// File format: auto, csv or xlsx
    #[arg(long, default_value = "auto")]
    format: SourceFormat,

    /// Text encoding (auto-detect if not specified)
    #[arg(short, long)]
    encoding: Option<TextEncoding>,

    /// CSV delimiter (auto-detect if not specified)
    #[arg(short, long)]
    delimiter: Option<char>,

    /// Use the header row for column names instead of fixed positions
    #[arg(long)]
    header: bool,
}

impl SourceArgs {
    fn options(&self, kind: Option<EntityKind>) -> SourceOptions {
        let mut options = match kind {
            Some(kind) if !self.header => SourceOptions::positional(kind.positional_columns()),
            _ => SourceOptions::header(),
        }
        .with_format(self.format);

        if let Some(encoding) = self.encoding {
            options = options.with_encoding(encoding);
        }
        if let Some(delimiter) = self.delimiter {
            options = options.with_delimiter(delimiter);
        }
        options
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    /// Local document store
    Store,
    /// Catalogue HTTP API
    Api,
}

#[derive(Subcommand)]
enum Commands {
    /// Read a file and output its rows as JSON
    Parse {
        /// Input CSV or spreadsheet
        input: PathBuf,

        /// Name columns by this kind's fixed positions (header row otherwise)
        #[arg(short, long)]
        kind: Option<EntityKind>,

        #[command(flatten)]
        source: SourceArgs,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Normalize a file and output the drafts as JSON
    Normalize {
        /// Input CSV or spreadsheet
        input: PathBuf,

        /// herb or disease
        #[arg(short, long)]
        kind: EntityKind,

        #[command(flatten)]
        source: SourceArgs,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Full pipeline: read, normalize and reconcile into the catalogue
    Ingest {
        /// Input CSV or spreadsheet
        input: PathBuf,

        /// herb or disease
        #[arg(short, long)]
        kind: EntityKind,

        #[command(flatten)]
        source: SourceArgs,

        /// Where records are written
        #[arg(short, long, value_enum, default_value = "store")]
        backend: BackendKind,

        /// upsert or insert-only
        #[arg(short, long, default_value = "upsert")]
        mode: ReconcileMode,

        /// Administrator credited on new herbs (default: ADMIN_ID, then the store's users)
        #[arg(long)]
        admin: Option<String>,

        /// Mark written records as published
        #[arg(long)]
        publish: bool,

        /// Store directory (default: SKINHERB_STORE_DIR or .skinherb/store)
        #[arg(long)]
        store: Option<PathBuf>,

        /// API base URL (default: API_BASE_URL)
        #[arg(long)]
        api_url: Option<String>,

        /// API bearer token (default: ADMIN_TOKEN)
        #[arg(long)]
        token: Option<String>,
    },

    /// Copy disease rows as-is into the staging collection
    Stage {
        /// Input CSV or spreadsheet
        input: PathBuf,

        #[command(flatten)]
        source: SourceArgs,

        /// Store directory (default: SKINHERB_STORE_DIR or .skinherb/store)
        #[arg(long)]
        store: Option<PathBuf>,
    },

    /// Seed herb-disease relations from a JSON mapping
    Relate {
        /// Mapping file: { "disease name": [{ "herb": "...", "effectiveness": "สูง" }] }
        mapping: PathBuf,

        /// Store directory (default: SKINHERB_STORE_DIR or .skinherb/store)
        #[arg(long)]
        store: Option<PathBuf>,
    },

    /// Show document counts per collection
    List {
        /// Also print document names
        #[arg(short, long)]
        names: bool,

        /// Store directory (default: SKINHERB_STORE_DIR or .skinherb/store)
        #[arg(long)]
        store: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let settings = Settings::from_env();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Parse {
            input,
            kind,
            source,
            output,
        } => cmd_parse(&input, &source.options(kind), output.as_deref()),

        Commands::Normalize {
            input,
            kind,
            source,
            output,
        } => cmd_normalize(&input, kind, &source.options(Some(kind)), output.as_deref()),

        Commands::Ingest {
            input,
            kind,
            source,
            backend,
            mode,
            admin,
            publish,
            store,
            api_url,
            token,
        } => {
            let settings = settings
                .with_store_dir(store)
                .with_api(api_url, token)
                .with_admin(admin.map(DocumentId::new));
            let options = IngestOptions {
                source: source.options(Some(kind)),
                mode,
                admin: settings.admin_id.clone(),
                publish,
            };
            cmd_ingest(&settings, backend, &input, kind, &options).await
        }

        Commands::Stage { input, source, store } => {
            let settings = settings.with_store_dir(store);
            cmd_stage(&settings.store_dir, &input, &source.options(Some(EntityKind::Disease)))
        }

        Commands::Relate { mapping, store } => {
            let settings = settings.with_store_dir(store);
            cmd_relate(&settings.store_dir, &mapping)
        }

        Commands::List { names, store } => {
            let settings = settings.with_store_dir(store);
            cmd_list(&settings.store_dir, names)
        }
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

fn cmd_parse(input: &Path, options: &SourceOptions, output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📄 Reading: {}", input.display());

    let rows = open_source(input, options)?;
    if let Some(encoding) = rows.encoding() {
        eprintln!("   Encoding: {}", encoding.label());
    }
    if let Some(delimiter) = rows.delimiter() {
        eprintln!("   Delimiter: '{}'", format_delimiter(delimiter));
    }
    eprintln!("   Columns: {}", rows.columns().join(", "));

    let mut records = Vec::new();
    for row in rows {
        match row {
            Ok(row) => records.push(row.to_json()),
            Err(e) => eprintln!("   ⚠️ {}", e),
        }
    }
    eprintln!("✅ Read {} rows", records.len());

    let json = serde_json::to_string_pretty(&records)?;
    write_output(&json, output)
}

fn cmd_normalize(
    input: &Path,
    kind: EntityKind,
    options: &SourceOptions,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📄 Normalizing {} rows: {}", kind, input.display());

    let mut records = Vec::new();
    let mut rejections = Vec::new();

    for row in open_source(input, options)? {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                rejections.push(json!({ "line": Value::Null, "reason": e.to_string() }));
                continue;
            }
        };
        match normalize(&row, kind) {
            Ok(record) => records.push(serde_json::to_value(&record)?),
            Err(rejection) => {
                eprintln!("   ⚠️ {}", rejection);
                rejections.push(json!({ "line": rejection.line, "reason": rejection.reason.to_string() }));
            }
        }
    }

    eprintln!("✅ {} records, {} rejected", records.len(), rejections.len());

    let json = serde_json::to_string_pretty(&json!({ "records": records, "rejections": rejections }))?;
    write_output(&json, output)
}

async fn cmd_ingest(
    settings: &Settings,
    backend: BackendKind,
    input: &Path,
    kind: EntityKind,
    options: &IngestOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let summary = match backend {
        BackendKind::Store => run_ingest(&settings.store_dir, input, kind, options).await?,
        BackendKind::Api => {
            let (base_url, token) = settings.require_api()?;
            run_remote_ingest(base_url, token, input, kind, options).await?
        }
    };

    eprintln!("\n✨ {}", summary);
    Ok(())
}

fn cmd_stage(store_dir: &Path, input: &Path, options: &SourceOptions) -> Result<(), Box<dyn std::error::Error>> {
    let mut store = DocumentStore::open(store_dir)?;
    let result = stage_raw_diseases(&mut store, input, options);
    store.close()?;

    eprintln!("\n✨ staging {}", result?);
    Ok(())
}

fn cmd_relate(store_dir: &Path, mapping: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut store = DocumentStore::open(store_dir)?;
    let result = seed_relations(&mut store, mapping);
    store.close()?;

    eprintln!("\n✨ {}", result?);
    Ok(())
}

fn cmd_list(store_dir: &Path, names: bool) -> Result<(), Box<dyn std::error::Error>> {
    let store = DocumentStore::open(store_dir)?;

    eprintln!("📋 Store: {}\n", store.root().display());
    for collection in [HERBS, DISEASES, STAGED_DISEASES, RELATIONS, USERS] {
        let docs = store.find_all(collection)?;
        println!("  📄 {} ({})", collection, docs.len());

        if names {
            for doc in &docs {
                let label = doc
                    .get("name")
                    .or_else(|| doc.get("email"))
                    .and_then(Value::as_str)
                    .unwrap_or_else(|| doc.get("_id").and_then(Value::as_str).unwrap_or("?"));
                println!("     - {}", label);
            }
        }
    }

    store.close()?;
    Ok(())
}

fn format_delimiter(d: char) -> String {
    match d {
        '\t' => "\\t".to_string(),
        c => c.to_string(),
    }
}

fn write_output(content: &str, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            eprintln!("💾 Output written to: {}", p.display());
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
