use std::env;
use std::path::{Path, PathBuf};

use anyhow::Context;

pub const DEFAULT_MODEL_NAME: &str = "models/gemini-2.5-flash-image";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_ASPECT_RATIO: &str = "16:9";
pub const FALLBACK_USERNAME: &str = "mezamashi";
pub const FALLBACK_PASSWORD: &str = "mezamashi";
const CONFIG_ENV: &str = "NANOBANANA_CONFIG";

const USERNAME_KEYS: [&str; 4] = ["username", "id", "user", "name"];
const PASSWORD_KEYS: [&str; 3] = ["password", "pass", "pwd"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// False when the hardcoded fallback pair is in use.
    pub configured: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcsSettings {
    pub bucket_name: String,
    pub project_id: Option<String>,
    /// Key file contents as JSON text.
    pub service_account_json: String,
}

/// Secrets file (`secrets.toml`) plus environment overrides.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    secrets: toml::Table,
    source: Option<PathBuf>,
}

impl AppConfig {
    /// Reads `path`, or the default location when `None`. Read or parse failures are logged
    /// and leave an empty configuration.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path.map(Path::to_path_buf).or_else(Self::default_path) else {
            return Self::default();
        };
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no secrets file");
            return Self::default();
        }
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!("Failed to read secrets at {:?}: {}", path, err);
                return Self::default();
            }
        };
        match Self::from_toml_str(&raw) {
            Ok(mut config) => {
                config.source = Some(path);
                config
            }
            Err(err) => {
                tracing::warn!("Failed to parse secrets at {:?}: {:#}", path, err);
                Self::default()
            }
        }
    }

    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        let secrets = raw
            .parse::<toml::Table>()
            .context("secrets file is not valid TOML")?;
        Ok(Self {
            secrets,
            source: None,
        })
    }

    /// Replaces a top-level secret, as command-line flags do.
    pub fn with_override(mut self, key: &str, value: impl Into<String>) -> Self {
        self.secrets
            .insert(key.to_string(), toml::Value::String(value.into()));
        self
    }

    pub fn default_path() -> Option<PathBuf> {
        non_empty_env(CONFIG_ENV)
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|home| home.join(".nanobanana").join("secrets.toml")))
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Top-level secret as trimmed text; empty values count as unset.
    pub fn secret(&self, key: &str) -> Option<String> {
        self.secrets.get(key).and_then(value_text)
    }

    fn section(&self, name: &str) -> Option<&toml::Table> {
        self.secrets.get(name).and_then(toml::Value::as_table)
    }

    fn section_value(&self, section: &str, keys: &[&str]) -> Option<String> {
        let table = self.section(section)?;
        keys.iter()
            .find_map(|key| table.get(*key))
            .and_then(value_text)
    }

    pub fn gemini_api_key(&self) -> Option<String> {
        self.secret("GEMINI_API_KEY")
            .or_else(|| non_empty_env("GOOGLE_API_KEY"))
            .or_else(|| non_empty_env("GEMINI_API_KEY"))
    }

    pub fn api_base(&self) -> String {
        self.secret("GEMINI_API_BASE")
            .or_else(|| non_empty_env("GEMINI_API_BASE"))
            .map(|value| value.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
    }

    pub fn model_name(&self) -> String {
        self.secret("GEMINI_MODEL")
            .unwrap_or_else(|| DEFAULT_MODEL_NAME.to_string())
    }

    /// `[auth]` first, then top-level `USERNAME`/`ID` and `PASSWORD`/`PASS`. Unless both
    /// halves are present the fallback pair is returned.
    pub fn auth_credentials(&self) -> Credentials {
        let username = self
            .section_value("auth", &USERNAME_KEYS)
            .or_else(|| self.secret("USERNAME"))
            .or_else(|| self.secret("ID"));
        let password = self
            .section_value("auth", &PASSWORD_KEYS)
            .or_else(|| self.secret("PASSWORD"))
            .or_else(|| self.secret("PASS"));
        match (username, password) {
            (Some(username), Some(password)) => Credentials {
                username,
                password,
                configured: true,
            },
            _ => Credentials {
                username: FALLBACK_USERNAME.to_string(),
                password: FALLBACK_PASSWORD.to_string(),
                configured: false,
            },
        }
    }

    /// `None` unless `[gcp]` names a bucket and carries `service_account_json`, either as JSON
    /// text or as a table.
    pub fn gcs(&self) -> Option<GcsSettings> {
        let bucket_name = self.section_value("gcp", &["bucket_name"])?;
        let service_account_json = match self.section("gcp")?.get("service_account_json")? {
            toml::Value::String(text) if !text.trim().is_empty() => text.trim().to_string(),
            toml::Value::Table(table) => serde_json::to_string(table).ok()?,
            _ => return None,
        };
        Some(GcsSettings {
            bucket_name,
            project_id: self.section_value("gcp", &["project_id"]),
            service_account_json,
        })
    }

    pub fn local_storage_dir(&self) -> Option<PathBuf> {
        self.section_value("storage", &["local_dir"])
            .map(PathBuf::from)
    }

    pub fn history_dir(&self) -> PathBuf {
        self.secret("HISTORY_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| env::temp_dir().join("nanobanana_history"))
    }

    pub fn reference_dir(&self) -> PathBuf {
        self.secret("REFERENCE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("references"))
    }
}

fn value_text(value: &toml::Value) -> Option<String> {
    let text = match value {
        toml::Value::String(text) => text.clone(),
        toml::Value::Integer(number) => number.to_string(),
        toml::Value::Float(number) => number.to_string(),
        toml::Value::Boolean(flag) => flag.to_string(),
        _ => return None,
    };
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_string())
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
