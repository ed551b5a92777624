use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::{Map, Value};
use uuid::Uuid;

pub const LOGIN_COOKIE_KEY: &str = "logged_in";
pub const SESSION_COOKIE_KEY: &str = "browser_session_id";

/// Durable client-side key/value store, the equivalent of browser cookies.
pub trait CookieJar {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()>;
    fn remove(&mut self, key: &str) -> anyhow::Result<()>;
}

/// Cookies kept in a flat JSON object on disk. Every change rewrites the file.
#[derive(Debug, Clone)]
pub struct FileCookieJar {
    path: PathBuf,
    cookies: BTreeMap<String, String>,
}

impl FileCookieJar {
    /// A missing or unreadable file starts an empty jar.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let cookies = read_cookie_file(&path).unwrap_or_default();
        Self { path, cookies }
    }

    fn flush(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let payload = self
            .cookies
            .iter()
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect::<Map<String, Value>>();
        std::fs::write(
            &self.path,
            serde_json::to_string_pretty(&Value::Object(payload))?,
        )
        .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }
}

impl CookieJar for FileCookieJar {
    fn get(&self, key: &str) -> Option<String> {
        self.cookies.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        self.cookies.insert(key.to_string(), value.to_string());
        self.flush()
    }

    fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        if self.cookies.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }
}

fn read_cookie_file(path: &Path) -> Option<BTreeMap<String, String>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    let cookies = parsed
        .as_object()?
        .iter()
        .filter_map(|(key, value)| value.as_str().map(|text| (key.clone(), text.to_string())))
        .collect();
    Some(cookies)
}

/// Cookies that live only as long as the value; useful for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryCookieJar {
    cookies: BTreeMap<String, String>,
}

impl CookieJar for MemoryCookieJar {
    fn get(&self, key: &str) -> Option<String> {
        self.cookies.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        self.cookies.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        self.cookies.remove(key);
        Ok(())
    }
}

/// Per-invocation access to the client's cookies, built once and passed explicitly.
///
/// A context without a jar models a client with cookies disabled: there is no session id,
/// so history never persists and cookie writes are dropped.
pub struct SessionContext {
    cookies: Option<Box<dyn CookieJar>>,
}

impl SessionContext {
    pub fn new(cookies: impl CookieJar + 'static) -> Self {
        Self {
            cookies: Some(Box::new(cookies)),
        }
    }

    pub fn without_cookies() -> Self {
        Self { cookies: None }
    }

    pub fn has_cookies(&self) -> bool {
        self.cookies.is_some()
    }

    pub fn cookie(&self, key: &str) -> Option<String> {
        self.cookies.as_ref()?.get(key)
    }

    pub fn set_cookie(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match self.cookies.as_mut() {
            Some(jar) => jar.set(key, value),
            None => Ok(()),
        }
    }

    pub fn remove_cookie(&mut self, key: &str) -> anyhow::Result<()> {
        match self.cookies.as_mut() {
            Some(jar) => jar.remove(key),
            None => Ok(()),
        }
    }

    /// Returns the session token, minting and storing a fresh one when `create` is set.
    pub fn browser_session_id(&mut self, create: bool) -> Option<String> {
        let jar = self.cookies.as_mut()?;
        if let Some(existing) = jar.get(SESSION_COOKIE_KEY).filter(|id| !id.is_empty()) {
            return Some(existing);
        }
        if !create {
            return None;
        }
        let fresh = Uuid::new_v4().simple().to_string();
        if let Err(err) = jar.set(SESSION_COOKIE_KEY, &fresh) {
            tracing::warn!(error = %err, "could not store session cookie");
            return None;
        }
        Some(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CookieJar, FileCookieJar, MemoryCookieJar, SessionContext, LOGIN_COOKIE_KEY,
        SESSION_COOKIE_KEY,
    };

    #[test]
    fn session_id_is_minted_once_and_reused() {
        let mut context = SessionContext::new(MemoryCookieJar::default());
        assert_eq!(context.browser_session_id(false), None);

        let minted = context.browser_session_id(true).unwrap_or_default();
        assert_eq!(minted.len(), 32);
        assert!(minted.chars().all(|ch| ch.is_ascii_hexdigit()));
        assert_eq!(context.browser_session_id(true), Some(minted.clone()));
        assert_eq!(context.browser_session_id(false), Some(minted));
    }

    #[test]
    fn disabled_cookies_mean_no_session() -> anyhow::Result<()> {
        let mut context = SessionContext::without_cookies();
        assert!(!context.has_cookies());
        assert_eq!(context.browser_session_id(true), None);
        context.set_cookie(LOGIN_COOKIE_KEY, "1")?;
        assert_eq!(context.cookie(LOGIN_COOKIE_KEY), None);
        context.remove_cookie(LOGIN_COOKIE_KEY)?;
        Ok(())
    }

    #[test]
    fn file_jar_survives_reopen() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("client").join("cookies.json");
        let mut jar = FileCookieJar::open(&path);
        jar.set(SESSION_COOKIE_KEY, "token-1")?;
        jar.set(LOGIN_COOKIE_KEY, "1")?;
        jar.remove(LOGIN_COOKIE_KEY)?;

        let reopened = FileCookieJar::open(&path);
        assert_eq!(reopened.get(SESSION_COOKIE_KEY).as_deref(), Some("token-1"));
        assert_eq!(reopened.get(LOGIN_COOKIE_KEY), None);
        Ok(())
    }

    #[test]
    fn corrupt_cookie_file_starts_empty() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("cookies.json");
        std::fs::write(&path, "[1, 2")?;
        let jar = FileCookieJar::open(&path);
        assert_eq!(jar.get(SESSION_COOKIE_KEY), None);
        Ok(())
    }
}
