use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use uuid::Uuid;

use crate::config::GcsSettings;
use crate::service_account::ServiceAccountKey;

const OBJECT_PREFIX: &str = "images";
const DEFAULT_GCS_API_BASE: &str = "https://storage.googleapis.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub path: String,
    pub url: Option<String>,
}

pub trait ObjectStore {
    fn name(&self) -> &str;
    fn upload(&self, bytes: &[u8], object_name: &str) -> Result<StoredObject>;
}

/// `images/<name>.png` with path separators flattened. A blank name gets a timestamped
/// fallback.
pub fn object_key(object_name: &str) -> String {
    let cleaned = object_name.trim();
    if cleaned.is_empty() {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        return format!(
            "{OBJECT_PREFIX}/gemini_image_{stamp}_{}.png",
            Uuid::new_v4().simple()
        );
    }
    let mut cleaned = cleaned.to_string();
    if !cleaned.to_ascii_lowercase().ends_with(".png") {
        cleaned.push_str(".png");
    }
    format!("{OBJECT_PREFIX}/{}", cleaned.replace(['/', '\\'], "_"))
}

/// Uploads and logs; a failure never reaches the caller.
pub fn upload_best_effort(
    store: Option<&dyn ObjectStore>,
    bytes: &[u8],
    object_name: &str,
) -> Option<StoredObject> {
    let Some(store) = store else {
        tracing::warn!("object storage is not configured; upload skipped");
        return None;
    };
    if bytes.is_empty() {
        return None;
    }
    match store.upload(bytes, object_name) {
        Ok(stored) => {
            tracing::info!(store = store.name(), path = %stored.path, "uploaded image");
            Some(stored)
        }
        Err(err) => {
            tracing::warn!(store = store.name(), "upload failed: {err:#}");
            None
        }
    }
}

/// Cloud Storage JSON API upload authorised by a service-account key. The returned URL is
/// a V4 signed GET link valid for an hour.
pub struct GcsObjectStore {
    bucket_name: String,
    project_id: Option<String>,
    key: ServiceAccountKey,
    api_base: String,
    http: HttpClient,
}

impl GcsObjectStore {
    pub fn new(settings: GcsSettings) -> Result<Self> {
        Self::with_api_base(settings, DEFAULT_GCS_API_BASE)
    }

    pub fn with_api_base(settings: GcsSettings, api_base: &str) -> Result<Self> {
        let key = ServiceAccountKey::from_json(&settings.service_account_json)?;
        Ok(Self {
            bucket_name: settings.bucket_name,
            project_id: settings.project_id,
            key,
            api_base: api_base.trim_end_matches('/').to_string(),
            http: HttpClient::new(),
        })
    }

    fn upload_endpoint(&self) -> String {
        format!("{}/upload/storage/v1/b/{}/o", self.api_base, self.bucket_name)
    }
}

impl ObjectStore for GcsObjectStore {
    fn name(&self) -> &str {
        "gcs"
    }

    fn upload(&self, bytes: &[u8], object_name: &str) -> Result<StoredObject> {
        let key = object_key(object_name);
        let access_token = self
            .key
            .fetch_access_token(&self.http)
            .with_context(|| format!("GCS token for {} failed", self.key.client_email()))?;
        let mut request = self
            .http
            .post(self.upload_endpoint())
            .query(&[("uploadType", "media"), ("name", key.as_str())])
            .bearer_auth(access_token)
            .header(CONTENT_TYPE, "image/png")
            .timeout(Duration::from_secs(60))
            .body(bytes.to_vec());
        if let Some(project) = self.project_id.as_deref() {
            request = request.header("x-goog-user-project", project);
        }
        let response = request
            .send()
            .with_context(|| format!("GCS upload request failed ({key})"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!("GCS upload failed ({}): {}", status.as_u16(), body.trim());
        }
        let url = self.key.signed_url(&self.bucket_name, &key, Utc::now())?;
        Ok(StoredObject {
            path: format!("gs://{}/{}", self.bucket_name, key),
            url: Some(url),
        })
    }
}

/// Writes objects below a local directory.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ObjectStore for LocalObjectStore {
    fn name(&self) -> &str {
        "local"
    }

    fn upload(&self, bytes: &[u8], object_name: &str) -> Result<StoredObject> {
        let path = self.root.join(object_key(object_name));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
        let absolute = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        Ok(StoredObject {
            path: path.display().to_string(),
            url: Some(format!("file://{}", absolute.display())),
        })
    }
}
