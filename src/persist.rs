//! Versioned, whitelisted session persistence.
//!
//! One JSON document is stored under the configured root key:
//!
//! ```json
//! {
//!   "root": "storefront",
//!   "version": 1,
//!   "savedAt": "2026-10-16T09:30:00Z",
//!   "auth": { "user": { ... }, "accessToken": "...", "status": "authenticated" },
//!   "cart": { "items": [], "appliedCoupons": [] }
//! }
//! ```
//!
//! Only `auth` and `cart` are ever written. A document with a different
//! version or root, or one that fails to decode, is discarded and removed
//! rather than partially loaded.

use std::collections::HashMap;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::Error;
use crate::session::{Session, SessionStatus, Storage};
use crate::types::{AccessToken, RefreshToken, User};

/// Current persisted schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Whitelisted session fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSnapshot {
    pub user: User,
    pub access_token: AccessToken,
    pub status: SessionStatus,
    /// Written only when refresh-token persistence is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<RefreshToken>,
}

/// Persisted cart slice. Items are opaque to this crate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartSnapshot {
    #[serde(default)]
    pub items: Vec<serde_json::Value>,
    #[serde(default)]
    pub applied_coupons: Vec<String>,
}

impl CartSnapshot {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.applied_coupons.is_empty()
    }
}

/// State recovered at startup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rehydrated {
    pub auth: Option<AuthSnapshot>,
    pub cart: CartSnapshot,
}

#[derive(Deserialize)]
struct Header {
    root: String,
    version: u32,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    root: String,
    version: u32,
    #[serde(with = "time::serde::rfc3339")]
    saved_at: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    auth: Option<AuthSnapshot>,
    #[serde(default)]
    cart: CartSnapshot,
}

/// Mirrors whitelisted session and cart state into [`Storage`].
pub(crate) struct Persistence<S> {
    storage: S,
    root: String,
    persist_refresh_token: bool,
    current: Mutex<Rehydrated>,
}

impl<S: Storage> Persistence<S> {
    pub(crate) fn new(storage: S, root: impl Into<String>, persist_refresh_token: bool) -> Self {
        Self {
            storage,
            root: root.into(),
            persist_refresh_token,
            current: Mutex::new(Rehydrated::default()),
        }
    }

    /// Load and validate the stored document.
    ///
    /// Never fails: unreadable or incompatible state is discarded and the
    /// application starts anonymous.
    pub(crate) fn rehydrate(&self) -> Rehydrated {
        let restored = match self.load() {
            Ok(Some(restored)) => restored,
            Ok(None) => Rehydrated::default(),
            Err(e) => {
                tracing::warn!(root = %self.root, error = %e, "Discarding persisted session state");
                if let Err(e) = self.storage.remove(&self.root) {
                    tracing::error!(root = %self.root, error = %e, "Failed to remove discarded state");
                }
                Rehydrated::default()
            }
        };

        if let Ok(mut current) = self.current.lock() {
            *current = restored.clone();
        }
        restored
    }

    fn load(&self) -> Result<Option<Rehydrated>, Error> {
        let Some(raw) = self.storage.load(&self.root)? else {
            return Ok(None);
        };

        let header: Header = serde_json::from_str(&raw)
            .map_err(|e| Error::Storage(format!("undecodable document: {e}")))?;
        if header.root != self.root {
            return Err(Error::Storage(format!(
                "root mismatch: expected {:?}, found {:?}",
                self.root, header.root
            )));
        }
        if header.version != SCHEMA_VERSION {
            return Err(Error::Storage(format!(
                "schema version mismatch: expected {SCHEMA_VERSION}, found {}",
                header.version
            )));
        }

        let document: Document = serde_json::from_str(&raw)
            .map_err(|e| Error::Storage(format!("undecodable document: {e}")))?;

        let auth = document
            .auth
            .filter(|auth| auth.status == SessionStatus::Authenticated)
            .map(|mut auth| {
                if !self.persist_refresh_token {
                    auth.refresh_token = None;
                }
                auth
            });

        Ok(Some(Rehydrated {
            auth,
            cart: document.cart,
        }))
    }

    /// Mirror the whitelisted view of `session`.
    ///
    /// Only an `Authenticated` session is written; any other status removes
    /// the `auth` namespace. Unchanged state is not rewritten.
    pub(crate) fn mirror(&self, session: &Session) -> Result<(), Error> {
        let auth = match (&session.status, &session.access_token, &session.user) {
            (SessionStatus::Authenticated, Some(access_token), Some(user)) => Some(AuthSnapshot {
                user: user.clone(),
                access_token: access_token.clone(),
                status: SessionStatus::Authenticated,
                refresh_token: if self.persist_refresh_token {
                    session.refresh_token.clone()
                } else {
                    None
                },
            }),
            (SessionStatus::Refreshing, ..) => return Ok(()),
            _ => None,
        };

        self.update(|current| {
            if current.auth == auth {
                return false;
            }
            current.auth = auth;
            true
        })
    }

    pub(crate) fn save_cart(&self, cart: CartSnapshot) -> Result<(), Error> {
        self.update(|current| {
            if current.cart == cart {
                return false;
            }
            current.cart = cart;
            true
        })
    }

    pub(crate) fn cart(&self) -> CartSnapshot {
        self.current
            .lock()
            .map(|current| current.cart.clone())
            .unwrap_or_default()
    }

    /// Remove everything persisted. Idempotent.
    pub(crate) fn purge(&self) -> Result<(), Error> {
        let mut current = self
            .current
            .lock()
            .map_err(|_| Error::Storage("persistence state poisoned".into()))?;
        *current = Rehydrated::default();
        self.storage.remove(&self.root)
    }

    fn update(&self, modify: impl FnOnce(&mut Rehydrated) -> bool) -> Result<(), Error> {
        let mut current = self
            .current
            .lock()
            .map_err(|_| Error::Storage("persistence state poisoned".into()))?;
        if !modify(&mut current) {
            return Ok(());
        }

        if current.auth.is_none() && current.cart.is_empty() {
            return self.storage.remove(&self.root);
        }

        let document = Document {
            root: self.root.clone(),
            version: SCHEMA_VERSION,
            saved_at: OffsetDateTime::now_utc(),
            auth: current.auth.clone(),
            cart: current.cart.clone(),
        };
        let raw = serde_json::to_string(&document)
            .map_err(|e| Error::Storage(format!("failed to encode document: {e}")))?;
        self.storage.save(&self.root, &raw)
    }
}

/// In-memory [`Storage`]. Clones share the same entries, which makes a
/// clone usable as the "disk" surviving a simulated restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, Error> {
        self.entries
            .lock()
            .map_err(|_| Error::Storage("memory storage poisoned".into()))
    }
}

impl Storage for MemoryStorage {
    fn load(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<(), Error> {
        self.entries()?.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), Error> {
        self.entries()?.remove(key);
        Ok(())
    }
}

/// File-backed [`Storage`]: one `<key>.json` file per key in a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Use `dir` for storage, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::Storage(format!("{}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> Result<PathBuf, Error> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !key.starts_with('.');
        if !valid {
            return Err(Error::Storage(format!("invalid storage key: {key:?}")));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl Storage for FileStorage {
    fn load(&self, key: &str) -> Result<Option<String>, Error> {
        let path = self.path(key)?;
        match std::fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Storage(format!("{}: {e}", path.display()))),
        }
    }

    fn save(&self, key: &str, value: &str) -> Result<(), Error> {
        let path = self.path(key)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)
            .and_then(|()| std::fs::rename(&tmp, &path))
            .map_err(|e| Error::Storage(format!("{}: {e}", path.display())))
    }

    fn remove(&self, key: &str) -> Result<(), Error> {
        let path = self.path(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!("{}: {e}", path.display()))),
        }
    }
}
