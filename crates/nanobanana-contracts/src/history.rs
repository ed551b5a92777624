use std::path::PathBuf;

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::decode::{decode_base64, encode_base64};

/// One generated image and the prompt that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub id: String,
    pub prompt: String,
    pub model: String,
    pub no_text: bool,
    pub image: Option<Vec<u8>>,
}

impl HistoryEntry {
    pub fn new(
        prompt: impl Into<String>,
        model: impl Into<String>,
        no_text: bool,
        image: Option<Vec<u8>>,
    ) -> Self {
        Self {
            id: new_entry_id(),
            prompt: prompt.into(),
            model: model.into(),
            no_text,
            image,
        }
    }
}

pub fn new_entry_id() -> String {
    format!("img_{}", Uuid::new_v4().simple())
}

/// Keeps alphanumerics, `-` and `_`; everything else is dropped.
pub fn sanitize_session_id(session_id: &str) -> String {
    session_id
        .chars()
        .filter(|ch| ch.is_alphanumeric() || matches!(ch, '-' | '_'))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct StoredEntry {
    id: Option<String>,
    prompt: Option<String>,
    model: Option<String>,
    no_text: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_b64: Option<String>,
}

impl From<&HistoryEntry> for StoredEntry {
    fn from(entry: &HistoryEntry) -> Self {
        Self {
            id: Some(entry.id.clone()),
            prompt: Some(entry.prompt.clone()),
            model: Some(entry.model.clone()),
            no_text: Some(entry.no_text),
            image_b64: entry.image.as_deref().map(encode_base64),
        }
    }
}

/// Reads a stored row field by field; a field of the wrong type is treated as missing.
fn entry_from_row(row: &Map<String, Value>) -> HistoryEntry {
    HistoryEntry {
        id: row
            .get("id")
            .and_then(scalar_text)
            .filter(|id| !id.is_empty())
            .unwrap_or_else(new_entry_id),
        prompt: row.get("prompt").and_then(scalar_text).unwrap_or_default(),
        model: row.get("model").and_then(scalar_text).unwrap_or_default(),
        no_text: row.get("no_text").and_then(Value::as_bool).unwrap_or(false),
        image: row
            .get("image_b64")
            .and_then(Value::as_str)
            .filter(|raw| !raw.is_empty())
            .and_then(decode_base64),
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

#[derive(Debug, Serialize)]
struct StoredRecord {
    updated_at: String,
    history: Vec<StoredEntry>,
}

/// One JSON file per session under `dir`, rewritten whole on every save.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    dir: PathBuf,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_session_id(session_id)))
    }

    /// `None` when nothing usable is stored: missing file, unreadable file, or a payload
    /// that is not `{"history": [...]}`.
    pub fn load(&self, session_id: &str) -> Option<Vec<HistoryEntry>> {
        let path = self.path_for(session_id);
        let raw = std::fs::read_to_string(&path).ok()?;
        let payload: Value = match serde_json::from_str(&raw) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::debug!(path = %path.display(), %err, "ignoring malformed history file");
                return None;
            }
        };
        let rows = payload.as_object()?.get("history")?.as_array()?;
        let entries = rows
            .iter()
            .filter_map(Value::as_object)
            .map(entry_from_row)
            .collect();
        Some(entries)
    }

    pub fn save(&self, session_id: &str, entries: &[HistoryEntry]) -> anyhow::Result<()> {
        let record = StoredRecord {
            updated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            history: entries.iter().map(StoredEntry::from).collect(),
        };
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let path = self.path_for(session_id);
        std::fs::write(&path, serde_json::to_string(&record)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    /// Removing a record that does not exist is not an error.
    pub fn remove(&self, session_id: &str) -> anyhow::Result<()> {
        let path = self.path_for(session_id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed to remove {}", path.display())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryState {
    Uninitialized,
    Loaded,
    Cleared,
}

/// In-memory history of one session, newest first.
///
/// Without a session id nothing is read or written and the history lives only as long as
/// this value.
#[derive(Debug, Clone)]
pub struct SessionHistory {
    store: HistoryStore,
    session_id: Option<String>,
    state: HistoryState,
    entries: Vec<HistoryEntry>,
}

impl SessionHistory {
    pub fn new(store: HistoryStore, session_id: Option<String>) -> Self {
        Self {
            store,
            session_id,
            state: HistoryState::Uninitialized,
            entries: Vec::new(),
        }
    }

    /// Reads the persisted record on first use only.
    pub fn ensure_loaded(&mut self) -> &[HistoryEntry] {
        if self.state == HistoryState::Uninitialized {
            self.entries = self
                .session_id
                .as_deref()
                .and_then(|session_id| self.store.load(session_id))
                .unwrap_or_default();
            self.state = HistoryState::Loaded;
        }
        &self.entries
    }

    pub fn state(&self) -> HistoryState {
        self.state
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Attaches an id minted after construction. An existing id is never replaced. An empty
    /// history loaded without an id is read again on next use.
    pub fn bind_session(&mut self, session_id: String) {
        if self.session_id.is_some() {
            return;
        }
        self.session_id = Some(session_id);
        if self.state == HistoryState::Loaded && self.entries.is_empty() {
            self.state = HistoryState::Uninitialized;
        }
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Puts `entry` in front and rewrites the stored record. The entry stays in memory even
    /// when the write fails.
    pub fn append(&mut self, entry: HistoryEntry) -> anyhow::Result<()> {
        self.ensure_loaded();
        self.entries.insert(0, entry);
        self.state = HistoryState::Loaded;
        self.persist()
    }

    pub fn persist(&self) -> anyhow::Result<()> {
        let Some(session_id) = self.session_id.as_deref() else {
            return Ok(());
        };
        self.store.save(session_id, &self.entries)
    }

    /// Forgets the in-memory entries and deletes the stored record.
    pub fn clear(&mut self) -> anyhow::Result<()> {
        self.entries.clear();
        self.state = HistoryState::Cleared;
        match self.session_id.as_deref() {
            Some(session_id) => self.store.remove(session_id),
            None => Ok(()),
        }
    }
}
