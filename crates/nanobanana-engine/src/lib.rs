pub mod auth;
pub mod config;
pub mod error;
pub mod references;
pub mod service_account;
pub mod storage;

use std::collections::BTreeMap;
use std::io::Cursor;
use std::time::Duration;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{ImageFormat, Rgb, RgbImage};
use nanobanana_contracts::extract::{collect_image_bytes, collect_text_parts};
use nanobanana_contracts::gemini::{Blob, Candidate, Content, GenerateContentResponse, Part};
use nanobanana_contracts::history::{HistoryEntry, HistoryStore, SessionHistory};
use nanobanana_contracts::naming::build_prompt_based_filename;
use nanobanana_contracts::response::ResponseGraph;
use nanobanana_contracts::session::SessionContext;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::auth::Authenticator;
use crate::config::{AppConfig, DEFAULT_ASPECT_RATIO};
use crate::error::{GenerationError, StudioError};
use crate::references::{load_reference_bytes, ReferenceImage};
use crate::storage::{
    upload_best_effort, GcsObjectStore, LocalObjectStore, ObjectStore, StoredObject,
};

pub const REFERENCE_EDIT_INSTRUCTION: &str = "Modify the man in the reference to match the prompt's image, but keep the composition unchanged and apply the prompt's changes faithfully to the original image.";
pub const DEFAULT_PROMPT_SUFFIX: &str =
    "((masterpiece, best quality, ultra-detailed, photorealistic, 8k, sharp focus))";
pub const NO_TEXT_TOGGLE_SUFFIX: &str = "((no background text, no symbols, no markings, no letters anywhere, no typography, no signboard, no watermark, no logo, no text, no subtitles, no labels, no poster elements, neutral background))";
pub const DEFAULT_PROVIDER: &str = "gemini";

const GEMINI_TIMEOUT_SECS: u64 = 90;
const DRYRUN_HEIGHT: u32 = 180;

/// The user's prompt (trailing whitespace removed) followed by the fixed edit instruction and
/// style suffixes, one per line.
pub fn compose_prompt(prompt: &str) -> String {
    let mut components = Vec::new();
    let stripped = prompt.trim_end();
    if !stripped.is_empty() {
        components.push(stripped);
    }
    components.extend([
        REFERENCE_EDIT_INSTRUCTION,
        DEFAULT_PROMPT_SUFFIX,
        NO_TEXT_TOGGLE_SUFFIX,
    ]);
    components.join("\n")
}

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    pub reference_bytes: Vec<u8>,
    pub reference_mime: String,
    pub aspect_ratio: String,
}

pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    /// Configuration problems that should stop an action before any input is checked.
    fn check_ready(&self) -> Result<(), GenerationError> {
        Ok(())
    }

    fn generate(&self, request: &GenerateRequest) -> Result<ResponseGraph, GenerationError>;
}

#[derive(Default)]
pub struct ImageProviderRegistry {
    providers: BTreeMap<String, Box<dyn ImageProvider>>,
}

impl ImageProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: ImageProvider + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.name().to_string(), Box::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<&dyn ImageProvider> {
        self.providers.get(name).map(|provider| provider.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

pub fn default_provider_registry(config: &AppConfig) -> ImageProviderRegistry {
    let mut providers = ImageProviderRegistry::new();
    providers.register(DryrunProvider);
    providers.register(GeminiProvider::new(config));
    providers
}

/// Cloud Storage when `[gcp]` is complete, else a local directory when `[storage]` names one.
/// An unusable service-account key is logged and treated as absent.
pub fn default_object_store(config: &AppConfig) -> Option<Box<dyn ObjectStore>> {
    if let Some(settings) = config.gcs() {
        match GcsObjectStore::new(settings) {
            Ok(store) => return Some(Box::new(store)),
            Err(err) => tracing::warn!("GCS upload disabled: {err:#}"),
        }
    }
    config
        .local_storage_dir()
        .map(|dir| Box::new(LocalObjectStore::new(dir)) as Box<dyn ObjectStore>)
}

/// Offline provider: a solid PNG whose colour is derived from the prompt.
pub struct DryrunProvider;

impl ImageProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn model(&self) -> &str {
        "dryrun-image-1"
    }

    fn generate(&self, request: &GenerateRequest) -> Result<ResponseGraph, GenerationError> {
        let (width, height) = dims_for_aspect_ratio(&request.aspect_ratio);
        let (r, g, b) = color_from_prompt(&request.prompt, request.reference_bytes.len() as u64);
        let mut image = RgbImage::new(width, height);
        for pixel in image.pixels_mut() {
            *pixel = Rgb([r, g, b]);
        }
        let mut png = Cursor::new(Vec::new());
        image
            .write_to(&mut png, ImageFormat::Png)
            .context("dryrun image encode failed")?;

        let parts = vec![
            Part {
                text: Some(format!("dryrun render {width}x{height}")),
                ..Part::default()
            },
            Part {
                inline_data: Some(Blob {
                    mime_type: Some("image/png".to_string()),
                    data: Some(BASE64.encode(png.into_inner())),
                }),
                ..Part::default()
            },
        ];
        let response = GenerateContentResponse {
            candidates: vec![Candidate {
                content: Some(Content {
                    role: Some("model".to_string()),
                    parts,
                    ..Content::default()
                }),
                finish_reason: Some("STOP".to_string()),
                ..Candidate::default()
            }],
            model_version: Some(self.model().to_string()),
            ..GenerateContentResponse::default()
        };
        Ok(response.to_graph())
    }
}

fn dims_for_aspect_ratio(aspect_ratio: &str) -> (u32, u32) {
    let parsed = aspect_ratio.split_once(':').and_then(|(w, h)| {
        let w = w.trim().parse::<u32>().ok()?;
        let h = h.trim().parse::<u32>().ok()?;
        (w > 0 && h > 0).then_some((w, h))
    });
    let (w, h) = parsed.unwrap_or((1, 1));
    ((DRYRUN_HEIGHT * w / h).max(1), DRYRUN_HEIGHT)
}

fn color_from_prompt(prompt: &str, seed: u64) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(seed.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

/// `generateContent` over HTTPS with the API key as a query parameter. One attempt per call.
pub struct GeminiProvider {
    api_base: String,
    api_key: Option<String>,
    model: String,
    http: HttpClient,
}

impl GeminiProvider {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            api_base: config.api_base(),
            api_key: config.gemini_api_key(),
            model: config.model_name(),
            http: HttpClient::new(),
        }
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn build_payload(request: &GenerateRequest) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    { "text": request.prompt },
                    {
                        "inlineData": {
                            "mimeType": request.reference_mime,
                            "data": BASE64.encode(&request.reference_bytes),
                        }
                    },
                ],
            }],
            "generationConfig": {
                "responseModalities": ["TEXT", "IMAGE"],
                "imageConfig": { "aspectRatio": request.aspect_ratio },
            },
        })
    }
}

impl ImageProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn check_ready(&self) -> Result<(), GenerationError> {
        match self.api_key {
            Some(_) => Ok(()),
            None => Err(GenerationError::MissingApiKey),
        }
    }

    fn generate(&self, request: &GenerateRequest) -> Result<ResponseGraph, GenerationError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(GenerationError::MissingApiKey)?;
        let endpoint = self.endpoint_for_model(&self.model);
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .timeout(Duration::from_secs(GEMINI_TIMEOUT_SECS))
            .json(&Self::build_payload(request))
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        let status = response.status();
        let body = response
            .text()
            .context("Gemini response body read failed")?;
        if !status.is_success() {
            return Err(classify_error(status.as_u16(), &body));
        }
        let payload: Value =
            serde_json::from_str(&body).context("Gemini returned invalid JSON payload")?;
        Ok(response_graph(&payload))
    }
}

/// The typed adaptation of a `generateContent` body, or the raw JSON walk when the body does
/// not fit the typed shape or its typed graph holds no image.
fn response_graph(payload: &Value) -> ResponseGraph {
    match serde_json::from_value::<GenerateContentResponse>(payload.clone()) {
        Ok(typed) => {
            let graph = typed.to_graph();
            if collect_image_bytes(&graph).is_some() {
                return graph;
            }
            tracing::debug!("typed Gemini response has no image; walking raw JSON");
        }
        Err(err) => tracing::debug!(%err, "untyped Gemini response; walking raw JSON"),
    }
    ResponseGraph::from_json(payload)
}

/// Maps a non-success response onto the error taxonomy. HTTP 429 and `RESOURCE_EXHAUSTED` are
/// quota errors; anything else carries the API's own message.
pub fn classify_error(status: u16, body: &str) -> GenerationError {
    let error = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|payload| payload.get("error").cloned());
    let message = error
        .as_ref()
        .and_then(|error| error.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| truncate_text(body.trim(), 512));
    let exhausted = error
        .as_ref()
        .and_then(|error| error.get("status"))
        .and_then(Value::as_str)
        == Some("RESOURCE_EXHAUSTED");
    if status == 429 || exhausted {
        GenerationError::QuotaExceeded { message }
    } else {
        GenerationError::CallFailed { status, message }
    }
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub entry: HistoryEntry,
    pub texts: Vec<String>,
    pub object_name: String,
    pub stored: Option<StoredObject>,
}

/// One user's session: login state, history and the Generate action.
pub struct Studio {
    session: SessionContext,
    auth: Authenticator,
    history: SessionHistory,
    providers: ImageProviderRegistry,
    provider_name: String,
    storage: Option<Box<dyn ObjectStore>>,
    /// Login made in this process; the only record of it when there are no cookies.
    authenticated: bool,
}

impl Studio {
    pub fn new(
        mut session: SessionContext,
        auth: Authenticator,
        history_store: HistoryStore,
        providers: ImageProviderRegistry,
    ) -> Self {
        let session_id = session.browser_session_id(false);
        Self {
            session,
            auth,
            history: SessionHistory::new(history_store, session_id),
            providers,
            provider_name: DEFAULT_PROVIDER.to_string(),
            storage: None,
            authenticated: false,
        }
    }

    pub fn from_config(session: SessionContext, config: &AppConfig) -> Self {
        Self::new(
            session,
            Authenticator::new(config.auth_credentials()),
            HistoryStore::new(config.history_dir()),
            default_provider_registry(config),
        )
        .with_storage(default_object_store(config))
    }

    pub fn with_storage(mut self, storage: Option<Box<dyn ObjectStore>>) -> Self {
        self.storage = storage;
        self
    }

    pub fn select_provider(&mut self, name: &str) -> Result<(), StudioError> {
        if self.providers.get(name).is_none() {
            return Err(StudioError::UnknownProvider(name.to_string()));
        }
        self.provider_name = name.to_string();
        Ok(())
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.names()
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated || self.auth.is_authenticated(&self.session)
    }

    pub fn login(&mut self, username: &str, password: &str) -> bool {
        if !self.auth.login(&mut self.session, username, password) {
            return false;
        }
        self.authenticated = true;
        if let Some(session_id) = self.session.browser_session_id(false) {
            self.history.bind_session(session_id);
        }
        true
    }

    /// Drops the login and this session's history, in memory and on disk.
    pub fn logout(&mut self) {
        if let Err(err) = self.history.clear() {
            tracing::warn!("failed to clear history: {err:#}");
        }
        self.auth.logout(&mut self.session);
        self.authenticated = false;
    }

    pub fn history(&mut self) -> &[HistoryEntry] {
        self.history.ensure_loaded()
    }

    /// Runs one Generate action. Upload and history persistence failures are logged and do
    /// not fail the action.
    pub fn generate(
        &mut self,
        prompt: &str,
        reference: &ReferenceImage,
    ) -> Result<GenerationOutcome, StudioError> {
        if !self.is_authenticated() {
            return Err(StudioError::NotLoggedIn);
        }
        let provider = self
            .providers
            .get(&self.provider_name)
            .ok_or_else(|| StudioError::UnknownProvider(self.provider_name.clone()))?;
        provider.check_ready()?;
        if prompt.trim().is_empty() {
            return Err(StudioError::EmptyPrompt);
        }
        let reference_bytes = load_reference_bytes(&reference.path)
            .ok_or_else(|| StudioError::UnreadableReference(reference.path.clone()))?;

        let request = GenerateRequest {
            prompt: compose_prompt(prompt),
            reference_bytes,
            reference_mime: reference.mime_type().to_string(),
            aspect_ratio: DEFAULT_ASPECT_RATIO.to_string(),
        };
        tracing::info!(
            provider = provider.name(),
            model = provider.model(),
            reference = %reference.label,
            "generating image"
        );
        let graph = provider.generate(&request)?;
        let image = collect_image_bytes(&graph).ok_or(StudioError::NoImage)?;
        let texts = collect_text_parts(&graph);
        let model = provider.model().to_string();

        let user_prompt = prompt.trim();
        let object_name = build_prompt_based_filename(user_prompt);
        let stored = upload_best_effort(self.storage.as_deref(), &image, &object_name);

        let entry = HistoryEntry::new(user_prompt, model, true, Some(image));
        if let Some(session_id) = self.session.browser_session_id(true) {
            self.history.bind_session(session_id);
        }
        if let Err(err) = self.history.append(entry.clone()) {
            tracing::warn!("failed to persist history: {err:#}");
        }
        Ok(GenerationOutcome {
            entry,
            texts,
            object_name,
            stored,
        })
    }
}
