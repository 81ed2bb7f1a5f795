//! Service-account credentials and the secrets file
//!
//! The secrets file is TOML with a single `[gspread]` table: the fields of a
//! Google service-account JSON key plus `gsheet_key`, the id of the target
//! spreadsheet. `import_service_account_json` produces that file from a
//! downloaded key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tdc_common::config::write_toml_atomic;
use tdc_common::{Error, Result};
use tracing::info;

const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// Fields of a Google service-account key
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type", default = "default_account_type")]
    pub account_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_id: Option<String>,
    /// PEM-encoded RSA private key
    pub private_key: String,
    pub client_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_provider_x509_cert_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_x509_cert_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub universe_domain: Option<String>,
}

fn default_account_type() -> String {
    "service_account".to_string()
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("account_type", &self.account_type)
            .field("project_id", &self.project_id)
            .field("private_key_id", &self.private_key_id)
            .field("private_key", &"<redacted>")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

/// The `[gspread]` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetCredentials {
    #[serde(flatten)]
    pub account: ServiceAccountKey,
    /// Spreadsheet id
    pub gsheet_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SecretsFile {
    gspread: SheetCredentials,
}

impl SheetCredentials {
    /// Load the `[gspread]` table from a secrets file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read secrets file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{} ({})", e, path.display())))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let secrets: SecretsFile = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid secrets file: {}", e)))?;
        secrets.gspread.validate()?;
        Ok(secrets.gspread)
    }

    fn validate(&self) -> Result<()> {
        let missing = [
            ("private_key", self.account.private_key.trim()),
            ("client_email", self.account.client_email.trim()),
            ("gsheet_key", self.gsheet_key.trim()),
        ]
        .into_iter()
        .filter(|(_, v)| v.is_empty())
        .map(|(k, _)| k)
        .collect::<Vec<_>>();

        if !missing.is_empty() {
            return Err(Error::Config(format!(
                "Secrets [gspread] table is missing: {}",
                missing.join(", ")
            )));
        }
        if !self.account.private_key.contains("PRIVATE KEY") {
            return Err(Error::Config(
                "Secrets private_key is not a PEM private key".to_string(),
            ));
        }
        Ok(())
    }
}

/// Convert a service-account JSON key into a secrets TOML file
///
/// Writes atomically with owner-only permissions.
pub fn import_service_account_json(json_path: &Path, sheet_key: &str, out_path: &Path) -> Result<()> {
    let json = std::fs::read_to_string(json_path).map_err(|e| {
        Error::Config(format!("Failed to read {}: {}", json_path.display(), e))
    })?;
    let account: ServiceAccountKey = serde_json::from_str(&json).map_err(|e| {
        Error::InvalidInput(format!(
            "{} is not a service-account key: {}",
            json_path.display(),
            e
        ))
    })?;

    let secrets = SecretsFile {
        gspread: SheetCredentials {
            account,
            gsheet_key: sheet_key.trim().to_string(),
        },
    };
    secrets.gspread.validate()?;

    write_toml_atomic(&secrets, out_path)?;
    info!(
        client_email = %secrets.gspread.account.client_email,
        out = %out_path.display(),
        "Wrote secrets file"
    );
    Ok(())
}
