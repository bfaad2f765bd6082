//! Session state and its storage port
//!
//! The session is the only shared mutable resource in the client. Every
//! component (HTTP interceptor, realtime channel, UI embedder) reads and
//! writes it through the [`SessionStore`] port, never through a global, so
//! tests can inject doubles and the interceptor stays decoupled from any
//! concrete storage.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::User;

/// Fixed storage key the session is persisted under.
pub const SESSION_STORAGE_KEY: &str = "road-infra-auth";

/// Authenticated identity and credential material.
///
/// Invariant: `is_authenticated` implies `user`, `access_token` and
/// `refresh_token` are all present. Only these five fields are ever
/// persisted; refresh-flight and subscription state live elsewhere and are
/// ephemeral by design.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Session {
    pub user: Option<User>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub is_authenticated: bool,
    pub must_change_password: bool,
}

/// Callback invoked after every store mutation with the new session state.
pub type SessionListener = Box<dyn Fn(&Session) + Send + Sync>;

/// Storage port for the session.
///
/// `set` replaces the whole session in one synchronous update, so a reader
/// never observes a half-updated session. `clear` additionally bumps the
/// epoch counter; an epoch moving between two reads means an explicit
/// logout happened in the interim (used to discard a refresh that lost the
/// race against a logout).
pub trait SessionStore: Send + Sync {
    fn get(&self) -> Session;

    fn set(&self, session: Session);

    /// Reset to the empty session and bump the epoch. Idempotent.
    fn clear(&self);

    /// Monotonic counter of explicit clears.
    fn epoch(&self) -> u64;

    /// Register a change listener. Listeners are invoked synchronously
    /// after each `set`/`clear`, outside the store's own locks.
    fn subscribe(&self, listener: SessionListener);
}

/// In-memory store; the building block for tests and for the file-backed
/// store below.
#[derive(Default)]
pub struct MemorySessionStore {
    session: RwLock<Session>,
    epoch: AtomicU64,
    listeners: Mutex<Vec<SessionListener>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn notify(&self, session: &Session) {
        let listeners = self.listeners.lock();
        for listener in listeners.iter() {
            listener(session);
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self) -> Session {
        self.session.read().clone()
    }

    fn set(&self, session: Session) {
        *self.session.write() = session.clone();
        self.notify(&session);
    }

    fn clear(&self) {
        let cleared = Session::default();
        *self.session.write() = cleared.clone();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.notify(&cleared);
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn subscribe(&self, listener: SessionListener) {
        self.listeners.lock().push(listener);
    }
}

/// File-backed store: persists the session as JSON under
/// [`SESSION_STORAGE_KEY`] in a state directory so it survives restarts.
///
/// Writes happen synchronously on every mutation (temp file + rename), so
/// the durable copy is up to date before any navigation that depends on it.
pub struct FileSessionStore {
    inner: MemorySessionStore,
    path: PathBuf,
}

impl FileSessionStore {
    /// Open the store, restoring a previously persisted session if one
    /// exists. A corrupt file is logged and treated as no session.
    pub fn open(state_dir: impl AsRef<Path>) -> Result<Self> {
        let path = state_dir.as_ref().join(format!("{SESSION_STORAGE_KEY}.json"));
        let store = Self {
            inner: MemorySessionStore::new(),
            path,
        };

        match store.load() {
            Ok(Some(session)) => {
                debug!(path = %store.path.display(), "Restored persisted session");
                *store.inner.session.write() = session;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(
                    path = %store.path.display(),
                    error = %e,
                    "Failed to restore persisted session, starting unauthenticated"
                );
            }
        }

        Ok(store)
    }

    fn load(&self) -> Result<Option<Session>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path)?;
        let session: Session = serde_json::from_str(&raw)?;
        Ok(Some(session))
    }

    fn persist(&self, session: &Session) {
        if let Err(e) = self.try_persist(session) {
            warn!(path = %self.path.display(), error = %e, "Failed to persist session");
        }
    }

    fn try_persist(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(session)?;
        // Temp file + rename keeps the durable copy whole even if a write
        // is interrupted.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self) -> Session {
        self.inner.get()
    }

    fn set(&self, session: Session) {
        self.persist(&session);
        self.inner.set(session);
    }

    fn clear(&self) {
        self.persist(&Session::default());
        self.inner.clear();
    }

    fn epoch(&self) -> u64 {
        self.inner.epoch()
    }

    fn subscribe(&self, listener: SessionListener) {
        self.inner.subscribe(listener);
    }
}
