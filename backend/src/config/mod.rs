//! Run settings from the environment (and `.env`).
//!
//! Every value can be overridden on the command line.

use std::env;
use std::path::PathBuf;

use crate::error::ConfigError;
use crate::models::DocumentId;

/// Directory of the local document store.
pub const STORE_DIR_VAR: &str = "SKINHERB_STORE_DIR";
/// Base URL of the catalogue HTTP API.
pub const API_BASE_URL_VAR: &str = "API_BASE_URL";
/// Bearer token for the catalogue HTTP API.
pub const ADMIN_TOKEN_VAR: &str = "ADMIN_TOKEN";
/// Administrator credited on new herbs.
pub const ADMIN_ID_VAR: &str = "ADMIN_ID";

/// Store directory used when nothing else is configured.
pub const DEFAULT_STORE_DIR: &str = ".skinherb/store";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub store_dir: PathBuf,
    pub api_base_url: Option<String>,
    pub admin_token: Option<String>,
    pub admin_id: Option<DocumentId>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from(DEFAULT_STORE_DIR),
            api_base_url: None,
            admin_token: None,
            admin_id: None,
        }
    }
}

impl Settings {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build settings from any variable source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Self {
            store_dir: var(STORE_DIR_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_DIR)),
            api_base_url: var(API_BASE_URL_VAR),
            admin_token: var(ADMIN_TOKEN_VAR),
            admin_id: var(ADMIN_ID_VAR).map(DocumentId::new),
        }
    }

    pub fn with_store_dir(mut self, dir: Option<PathBuf>) -> Self {
        if let Some(dir) = dir {
            self.store_dir = dir;
        }
        self
    }

    pub fn with_api(mut self, base_url: Option<String>, token: Option<String>) -> Self {
        self.api_base_url = base_url.or(self.api_base_url);
        self.admin_token = token.or(self.admin_token);
        self
    }

    pub fn with_admin(mut self, admin: Option<DocumentId>) -> Self {
        self.admin_id = admin.or(self.admin_id);
        self
    }

    /// Base URL and token, both required for the API back end.
    pub fn require_api(&self) -> Result<(&str, &str), ConfigError> {
        let base = self
            .api_base_url
            .as_deref()
            .ok_or(ConfigError::MissingVar(API_BASE_URL_VAR))?;
        let token = self
            .admin_token
            .as_deref()
            .ok_or(ConfigError::MissingVar(ADMIN_TOKEN_VAR))?;

        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                name: API_BASE_URL_VAR,
                message: format!("'{}' is not an http(s) URL", base),
            });
        }
        Ok((base, token))
    }
}
