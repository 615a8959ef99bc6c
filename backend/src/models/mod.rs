//! Domain models for the SkinHerb catalogue.
//!
//! - [`EntityKind`] - which kind of record a run ingests
//! - [`DocumentId`] - opaque document identifier
//! - [`Herb`], [`Disease`] - persisted catalogue documents
//! - [`StagedDisease`] - raw disease row kept for re-processing
//! - [`HerbDiseaseRelation`], [`Effectiveness`] - herb recommendations per disease

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Collections
// =============================================================================

pub const HERBS: &str = "herbs";
pub const DISEASES: &str = "diseases";
pub const STAGED_DISEASES: &str = "datadiseases";
pub const RELATIONS: &str = "herbdiseaserelations";
pub const USERS: &str = "users";

/// Image path stamped on herbs created without one.
pub const DEFAULT_HERB_IMAGE: &str = "/uploads/default-herb.png";

// =============================================================================
// Entity Kind
// =============================================================================

/// The two normalized entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Herb,
    Disease,
}

impl EntityKind {
    /// Collection the normalized documents live in.
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Herb => HERBS,
            EntityKind::Disease => DISEASES,
        }
    }

    /// Field holding the natural key.
    pub fn natural_key_field(&self) -> &'static str {
        match self {
            EntityKind::Herb => "scientificName",
            EntityKind::Disease => "name",
        }
    }

    /// Logical column names for header-less sources, in file order.
    pub fn positional_columns(&self) -> &'static [&'static str] {
        match self {
            EntityKind::Herb => &[
                "id",
                "name",
                "scientificName",
                "otherName",
                "description",
                "partUsed",
                "usage",
                "properties",
                "warning",
            ],
            EntityKind::Disease => &[
                "name",
                "symptoms",
                "subSymptoms",
                "locations",
                "cause",
                "treatment",
            ],
        }
    }

    /// Fewest physical cells a positional row may have.
    pub fn min_positional_columns(&self) -> usize {
        match self {
            EntityKind::Herb => 7,
            EntityKind::Disease => 2,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Herb => "herb",
            EntityKind::Disease => "disease",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "herb" | "herbs" => Ok(EntityKind::Herb),
            "disease" | "diseases" => Ok(EntityKind::Disease),
            other => Err(format!("unknown entity kind '{}'", other)),
        }
    }
}

// =============================================================================
// Document Id
// =============================================================================

/// Opaque document identifier (32 lowercase hex characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// =============================================================================
// Catalogue Documents
// =============================================================================

/// A herb in the catalogue. Unique by `scientific_name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Herb {
    #[serde(rename = "_id")]
    pub id: DocumentId,
    pub name: String,
    pub scientific_name: String,
    pub description: String,
    #[serde(default)]
    pub properties: Vec<String>,
    pub usage: String,
    #[serde(default = "default_herb_image")]
    pub image: String,
    pub added_by: DocumentId,
    #[serde(default)]
    pub published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_herb_image() -> String {
    DEFAULT_HERB_IMAGE.to_string()
}

/// A skin disease in the catalogue. Unique by `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Disease {
    #[serde(rename = "_id")]
    pub id: DocumentId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eng_name: Option<String>,
    pub description: String,
    #[serde(default)]
    pub symptoms: Vec<String>,
    #[serde(default)]
    pub medicines: Vec<String>,
    #[serde(default)]
    pub usage: String,
    #[serde(default)]
    pub published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Disease row copied verbatim into the staging collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedDisease {
    #[serde(rename = "_id")]
    pub id: DocumentId,
    pub name: String,
    #[serde(default)]
    pub symptoms: String,
    #[serde(default)]
    pub sub_symptoms: String,
    #[serde(default)]
    pub locations: String,
    #[serde(default)]
    pub cause: String,
    #[serde(default)]
    pub treatment: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Relations
// =============================================================================

/// How well a herb is known to work against a disease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Effectiveness {
    #[serde(rename = "สูง")]
    High,
    #[serde(rename = "ปานกลาง")]
    Medium,
    #[serde(rename = "ต่ำ")]
    Low,
    #[default]
    #[serde(rename = "ยังไม่ได้รับการยืนยัน")]
    Unconfirmed,
}

/// Link between a herb and a disease. Unique by `(herb, disease)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HerbDiseaseRelation {
    #[serde(rename = "_id")]
    pub id: DocumentId,
    pub herb: DocumentId,
    pub disease: DocumentId,
    #[serde(default)]
    pub effectiveness: Effectiveness,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
