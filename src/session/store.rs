//! Session persistence backends.
//!
//! [`MemorySessionStore`] keeps sessions for the life of the process;
//! [`FileSessionStore`] persists them as `cache/{broker_id}_session.json`
//! so a restart before midnight IST reuses the token instead of burning a
//! login. File writes go through a temp file and an atomic rename, so a
//! crash mid-write can never leave a half-written session behind.
//!
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::session::SessionData;

/// Pluggable session persistence.
///
/// Load/save failures are non-fatal by design: a corrupt or missing cache
/// entry simply means a fresh login.
pub trait SessionStore: Send + Sync {
    /// Return the cached session for a broker, or `None` if absent/invalid.
    fn load(&self, broker_id: &str) -> Option<SessionData>;
    /// Persist the session for a broker.
    fn save(&self, broker_id: &str, session: &SessionData);
    /// Drop any cached session for a broker.
    fn clear(&self, broker_id: &str);
}

/// Non-persistent store; sessions live only for the current process.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, SessionData>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, broker_id: &str) -> Option<SessionData> {
        self.sessions
            .lock()
            .ok()
            .and_then(|map| map.get(broker_id).cloned())
    }

    fn save(&self, broker_id: &str, session: &SessionData) {
        if let Ok(mut map) = self.sessions.lock() {
            map.insert(broker_id.to_string(), session.clone());
        }
    }

    fn clear(&self, broker_id: &str) {
        if let Ok(mut map) = self.sessions.lock() {
            map.remove(broker_id);
        }
    }
}

/// JSON layout of a persisted session.
#[derive(Serialize, Deserialize)]
struct CachedSession {
    broker: String,
    access_token: String,
    refresh_token: Option<String>,
    feed_token: Option<String>,
    obtained_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Persists sessions under a cache directory (default `cache/`).
pub struct FileSessionStore {
    cache_dir: PathBuf,
}

impl Default for FileSessionStore {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("cache"),
        }
    }
}

impl FileSessionStore {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    fn path(&self, broker_id: &str) -> PathBuf {
        self.cache_dir.join(format!("{}_session.json", broker_id))
    }

    fn write_atomically(&self, path: &Path, contents: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.cache_dir)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, path)
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self, broker_id: &str) -> Option<SessionData> {
        let path = self.path(broker_id);
        let raw = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<CachedSession>(&raw) {
            Ok(cached) if cached.broker == broker_id => Some(SessionData {
                access_token: Secret::new(cached.access_token),
                refresh_token: cached.refresh_token.map(Secret::new),
                feed_token: cached.feed_token.map(Secret::new),
                obtained_at: cached.obtained_at,
                expires_at: cached.expires_at,
            }),
            Ok(_) => None,
            Err(e) => {
                warn!(
                    "[{}] failed to load cached session from {}: {}. Re-login required.",
                    broker_id,
                    path.display(),
                    e
                );
                None
            }
        }
    }

    fn save(&self, broker_id: &str, session: &SessionData) {
        let cached = CachedSession {
            broker: broker_id.to_string(),
            access_token: session.access_token.expose_secret().clone(),
            refresh_token: session
                .refresh_token
                .as_ref()
                .map(|t| t.expose_secret().clone()),
            feed_token: session
                .feed_token
                .as_ref()
                .map(|t| t.expose_secret().clone()),
            obtained_at: session.obtained_at,
            expires_at: session.expires_at,
        };
        let path = self.path(broker_id);
        match serde_json::to_string_pretty(&cached) {
            Ok(contents) => match self.write_atomically(&path, &contents) {
                Ok(()) => debug!("[{}] session cached to {}", broker_id, path.display()),
                Err(e) => warn!("[{}] failed to cache session: {}", broker_id, e),
            },
            Err(e) => warn!("[{}] failed to serialize session: {}", broker_id, e),
        }
    }

    fn clear(&self, broker_id: &str) {
        let path = self.path(broker_id);
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("[{}] failed to clear cached session: {}", broker_id, e);
            } else {
                debug!("[{}] cached session cleared", broker_id);
            }
        }
    }
}
