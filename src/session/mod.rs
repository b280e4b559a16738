//! Signed-in user, persisted as a JSON file between runs.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::client::{ClientError, ResourceClient};
use crate::models::{LoginRequest, RegisterRequest, User};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("session file error: {0}")]
    Io(#[from] io::Error),
    #[error("session encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// File holding the last signed-in user.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Saved user, if any. A file that does not parse is ignored.
    pub async fn load(&self) -> Result<Option<User>, SessionError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice(&bytes) {
            Ok(user) => Ok(Some(user)),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "Ignoring unreadable session: {}", e);
                Ok(None)
            }
        }
    }

    pub async fn save(&self, user: &User) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_vec_pretty(user)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), SessionError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Current user plus the account operations that change it.
pub struct Session {
    store: SessionStore,
    backend: Arc<dyn ResourceClient>,
    current: Mutex<Option<User>>,
}

impl Session {
    pub fn new(store: SessionStore, backend: Arc<dyn ResourceClient>) -> Self {
        Self {
            store,
            backend,
            current: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<User>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current(&self) -> Option<User> {
        self.lock().clone()
    }

    /// Id for user-scoped queries; empty while signed out, which disables them.
    pub fn user_id(&self) -> String {
        self.lock().as_ref().map(|u| u.id.clone()).unwrap_or_default()
    }

    /// Load the saved user into memory.
    pub async fn restore(&self) -> Result<Option<User>, SessionError> {
        let user = self.store.load().await?;
        if let Some(user) = &user {
            tracing::info!(user_id = %user.id, "Session restored");
        }
        *self.lock() = user.clone();
        Ok(user)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User, SessionError> {
        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let user = self.backend.login(&request).await?;
        self.sign_in(user).await
    }

    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<User, SessionError> {
        let request = RegisterRequest {
            name: name.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        };
        let user = self.backend.register(&request).await?;
        self.sign_in(user).await
    }

    pub async fn logout(&self) -> Result<(), SessionError> {
        *self.lock() = None;
        self.store.clear().await
    }

    async fn sign_in(&self, user: User) -> Result<User, SessionError> {
        self.store.save(&user).await?;
        *self.lock() = Some(user.clone());
        tracing::info!(user_id = %user.id, "Signed in");
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn user() -> User {
        User {
            id: "u1".to_string(),
            name: "Camille".to_string(),
            email: "camille@example.org".to_string(),
            avatar: String::new(),
            missions_completed: 3,
            hours_volunteered: 12,
            trees_planted: 40,
        }
    }

    #[tokio::test]
    async fn test_store_round_trip_and_clear() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().join("nested").join("session.json"));

        assert!(store.load().await.unwrap().is_none());
        store.save(&user()).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(user()));

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_session_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let store = SessionStore::new(path);
        assert!(store.load().await.unwrap().is_none());
    }
}
